//! The host integration seam: traits a web framework adapter implements so the engine can
//! read an incoming request and write an outgoing response without depending on any
//! particular HTTP stack (Host integration, out of scope for the engine itself beyond
//! these two trait definitions).
use std::error::Error as StdError;

use crate::message::{Request, Response};

/// Adapts a framework's incoming request into the engine's [`Request`] parameter bag.
///
/// Implementations live in a host crate, not here: this engine never parses an HTTP
/// request itself, only consumes the already-decoded parameter bag a `HostRequest`
/// produces.
pub trait HostRequest {
    type Error: StdError + Send + Sync + 'static;

    /// The `Request` parameters decoded from the underlying framework request.
    fn decode(&self) -> Result<Request, Self::Error>;
}

/// Adapts the engine's [`Response`] parameter bag back into a framework's outgoing
/// response (a redirect with a query or fragment, a JSON body, a `WWW-Authenticate`
/// header, depending on the endpoint).
pub trait HostResponse {
    type Error: StdError + Send + Sync + 'static;

    fn encode(&mut self, response: &Response) -> Result<(), Self::Error>;
}
