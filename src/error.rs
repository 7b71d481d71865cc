//! Error taxonomy for the protocol engine.
//!
//! Mirrors the distinction drawn by the specification: protocol errors are values carried
//! in a response and in a rejected context, never exceptions; configuration, host
//! integration and persistence errors are exceptional and fatal to the request (or, for
//! configuration, to startup).
use std::borrow::Cow;
use std::fmt;

/// The standard OAuth 2.0 / OIDC error codes (RFC 6749 §5.2, RFC 8628 §3.5, OIDC Core).
///
/// Carried in the `Response` and in a rejected context's `error` field. Never raised as an
/// exception: handlers signal these by calling `Context::reject`, not by returning `Err`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ProtocolErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    InvalidScope,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    AccessDenied,
    ServerError,
    TemporarilyUnavailable,
    /// Device flow: the user has not yet completed verification.
    AuthorizationPending,
    /// Device flow: client polled faster than the advertised interval.
    SlowDown,
    /// Device flow: the device code has expired before verification completed.
    ExpiredToken,
}

impl ProtocolErrorCode {
    /// The wire value used in the `error` parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolErrorCode::InvalidRequest => "invalid_request",
            ProtocolErrorCode::InvalidClient => "invalid_client",
            ProtocolErrorCode::InvalidGrant => "invalid_grant",
            ProtocolErrorCode::InvalidScope => "invalid_scope",
            ProtocolErrorCode::UnauthorizedClient => "unauthorized_client",
            ProtocolErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            ProtocolErrorCode::UnsupportedResponseType => "unsupported_response_type",
            ProtocolErrorCode::AccessDenied => "access_denied",
            ProtocolErrorCode::ServerError => "server_error",
            ProtocolErrorCode::TemporarilyUnavailable => "temporarily_unavailable",
            ProtocolErrorCode::AuthorizationPending => "authorization_pending",
            ProtocolErrorCode::SlowDown => "slow_down",
            ProtocolErrorCode::ExpiredToken => "expired_token",
        }
    }
}

impl fmt::Display for ProtocolErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejection as it will appear on the wire: code, optional human description, optional
/// reference uri. Attached to a rejected context and mirrored into the `Response`.
#[derive(Clone, Debug)]
pub struct Rejection {
    code: ProtocolErrorCode,
    description: Option<Cow<'static, str>>,
    uri: Option<Cow<'static, str>>,
}

impl Rejection {
    /// Construct a rejection with no further detail.
    pub fn new(code: ProtocolErrorCode) -> Self {
        Rejection {
            code,
            description: None,
            uri: None,
        }
    }

    /// Attach a human-readable explanation.
    pub fn with_description<D: Into<Cow<'static, str>>>(mut self, description: D) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a reference uri.
    pub fn with_uri<D: Into<Cow<'static, str>>>(mut self, uri: D) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// The error code.
    pub fn code(&self) -> ProtocolErrorCode {
        self.code
    }

    /// The human-readable description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The reference uri, if any.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Key-value pairs suitable for form encoding or JSON construction: `error`,
    /// `error_description`, `error_uri`.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Cow<'_, str>)> {
        let mut pairs = vec![("error", Cow::Borrowed(self.code.as_str()))];
        if let Some(description) = &self.description {
            pairs.push(("error_description", Cow::Borrowed(description.as_ref())));
        }
        if let Some(uri) = &self.uri {
            pairs.push(("error_uri", Cow::Borrowed(uri.as_ref())));
        }
        pairs.into_iter()
    }
}

/// Raised when `options::resolve` finds the operator-supplied options inconsistent.
///
/// Fatal: a host must not start dispatching requests against unresolved or invalid
/// options, per §3/§4.4 of the specification.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("grant `{0}` requires endpoint `{1}` to be registered")]
    MissingEndpointForGrant(&'static str, &'static str),
    #[error("at least one grant type must be enabled")]
    NoGrantsEnabled,
    #[error("at least one asymmetric signing credential is required")]
    NoAsymmetricSigningCredential,
    #[error("at least one signing credential is required")]
    NoSigningCredential,
    #[error("at least one signing credential must not be expired")]
    NoValidSigningCredential,
    #[error("at least one encryption credential is required")]
    NoEncryptionCredential,
    #[error("at least one encryption credential must not be expired")]
    NoValidEncryptionCredential,
    #[error("degraded mode requires token storage to be disabled")]
    DegradedModeRequiresDisabledStorage,
    #[error("degraded mode requires a custom validation handler for endpoint `{0}`")]
    DegradedModeMissingValidator(&'static str),
    #[error("degraded mode requires custom authentication and sign-in handlers for the device grant")]
    DegradedModeMissingDeviceHandlers,
    #[error("disabling token storage requires reference tokens to be disabled and either rolling refresh tokens enabled or sliding refresh disabled")]
    InconsistentRefreshPolicyWithoutStorage,
}

/// Raised when the host adapter violates its contract with the engine (§7).
///
/// Distinct from protocol and configuration errors: this always indicates a bug in host
/// integration code, never a malformed request from a relying party.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HostError {
    #[error("expected transaction property `{0}` was not set by a prior handler")]
    MissingTransactionProperty(&'static str),
    #[error("no host request object was attached to the transaction")]
    MissingHostRequest,
    #[error("no host response object was attached to the transaction")]
    MissingHostResponse,
    #[error("signing, verification, encryption or decryption failed: {0}")]
    CryptoFailure(Cow<'static, str>),
}

impl HostError {
    pub fn crypto<M: Into<Cow<'static, str>>>(message: M) -> Self {
        HostError::CryptoFailure(message.into())
    }
}

/// Raised by a persistence adapter. Surfaced to the caller as `server_error`; never
/// retried by the core (§7).
#[derive(Clone, Debug, thiserror::Error)]
#[error("persistence operation failed: {message}")]
pub struct StoreError {
    pub message: Cow<'static, str>,
}

impl StoreError {
    pub fn new<M: Into<Cow<'static, str>>>(message: M) -> Self {
        StoreError {
            message: message.into(),
        }
    }
}

/// Raised by the token serializer (§4.3) on malformed input. A version mismatch is
/// explicitly *not* an error (it yields an empty principal); this type is reserved for
/// truncated streams and invalid UTF-8.
#[derive(Clone, Debug, thiserror::Error)]
#[error("token envelope parse error: {0}")]
pub struct CodecError(pub Cow<'static, str>);

impl CodecError {
    pub fn new<M: Into<Cow<'static, str>>>(message: M) -> Self {
        CodecError(message.into())
    }
}

/// The outcome of dispatching a context, distinct from a protocol rejection (§5).
///
/// Cancellation is surfaced through this type rather than `Rejection` because it is not a
/// statement about the request's validity; it is the host withdrawing attention (deadline,
/// client disconnect) from an in-flight operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Canceled;

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("operation canceled")
    }
}

impl std::error::Error for Canceled {}
