//! # wayfare-oidc
//!
//! An OAuth 2.0 / OpenID Connect authorization server protocol engine: a dispatcher and
//! handler pipeline that turns request parameters into response parameters for each of
//! the standard endpoints, independent of any particular HTTP front-end or storage
//! backend.
//!
//! ## Shape of the crate
//!
//! - [`options`] is the configuration layer: an [`options::OptionsBuilder`] an operator
//!   fills in (enabled endpoints, grants, scopes, signing/encryption credentials,
//!   lifetimes) and [`options::resolve`], the pure function that validates it and derives
//!   the rest (supported response types/modes, credential precedence, key ids) into an
//!   immutable [`options::Options`].
//! - [`store`] defines the only contact point with persistence: `ApplicationStore`,
//!   `AuthorizationStore`, `TokenStore`, `ScopeStore` traits, plus minimal in-memory
//!   reference implementations under `store::mem` for tests and quick starts.
//! - [`claims`]/[`scope`]/[`serializer`] model the data an issued token carries: a
//!   claims-based `Principal`, scope strings, and the versioned binary envelope used to
//!   seal a principal into a server-side reference token.
//! - [`context`]/[`registry`]/[`dispatcher`]/[`transaction`] are the engine room: every
//!   endpoint is processed as an ordered sequence of phase-scoped handler lists dispatched
//!   against a per-request [`transaction::Transaction`].
//! - [`pipeline`] wires the built-in handlers for each endpoint (authorization, token,
//!   device, verification, introspection, revocation, userinfo, discovery, cryptography,
//!   logout) plus the two cross-cutting processes (`ProcessSignIn`, `ProcessAuthentication`)
//!   every token-issuing or token-validating endpoint shares.
//! - [`host`] is the narrow seam a web front-end implements: decode its native request
//!   into a [`message::Request`], encode a [`message::Response`] back into its native
//!   response.
//! - [`error`] is the taxonomy: [`error::ConfigError`] (fatal at resolve time),
//!   [`error::Rejection`] (a protocol-level error returned on the wire, never an `Err`),
//!   [`error::HostError`] (a host-integration-contract violation, propagated through the
//!   dispatcher), [`error::StoreError`], [`error::CodecError`], [`error::Canceled`].
#![warn(missing_docs)]

pub mod claims;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod message;
pub mod options;
pub mod pipeline;
pub mod registry;
pub mod scope;
pub mod serializer;
pub mod store;
pub mod transaction;

/// Re-exports of the types most integrators need in scope to stand up a deployment:
/// build [`options::Options`], supply store implementations, and drive the endpoint
/// pipelines in [`pipeline`].
pub mod prelude {
    pub use crate::claims::{Claim, Identity, Principal, TokenType};
    pub use crate::error::{ConfigError, HostError, ProtocolErrorCode, Rejection};
    pub use crate::message::{Request, Response};
    pub use crate::options::{Credential, EndpointKind, GrantType, Options, OptionsBuilder};
    pub use crate::pipeline::authorization::AuthorizationEndpoint;
    pub use crate::pipeline::cryptography::CryptographyEndpoint;
    pub use crate::pipeline::device::DeviceEndpoint;
    pub use crate::pipeline::discovery::DiscoveryEndpoint;
    pub use crate::pipeline::introspection::IntrospectionEndpoint;
    pub use crate::pipeline::logout::LogoutEndpoint;
    pub use crate::pipeline::revocation::RevocationEndpoint;
    pub use crate::pipeline::token::TokenEndpoint;
    pub use crate::pipeline::userinfo::UserinfoEndpoint;
    pub use crate::pipeline::verification::VerificationEndpoint;
    pub use crate::store::{ApplicationStore, AuthorizationStore, ScopeStore, TokenStore};
}
