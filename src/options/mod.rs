//! Configuration: the operator-facing builder, the resolved, immutable `Options` it
//! produces, and the credentials submodule (§3 Options, §4.4 Configuration Resolver).
pub mod credentials;
mod resolver;

pub use credentials::{Credential, CredentialMaterial};
pub use resolver::resolve;

use std::collections::BTreeSet;

use chrono::Duration;

/// The OAuth 2.0 / OIDC grant types the engine can process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum GrantType {
    AuthorizationCode,
    Implicit,
    ClientCredentials,
    Password,
    RefreshToken,
    DeviceCode,
}

impl GrantType {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::Implicit => "implicit",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::Password => "password",
            GrantType::RefreshToken => "refresh_token",
            GrantType::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
        }
    }
}

/// The endpoints a deployment may expose. Each maps to one pipeline under
/// [`crate::pipeline`] (§4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum EndpointKind {
    Authorization,
    Token,
    Device,
    Verification,
    Introspection,
    Revocation,
    Userinfo,
    Configuration,
    Cryptography,
    Logout,
}

/// `response_type` values the authorization endpoint may be asked to produce.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum ResponseType {
    Code,
    Token,
    IdToken,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseType::Code => "code",
            ResponseType::Token => "token",
            ResponseType::IdToken => "id_token",
        }
    }
}

/// How the authorization response is delivered back to the client.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum ResponseMode {
    Query,
    Fragment,
    FormPost,
}

impl ResponseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseMode::Query => "query",
            ResponseMode::Fragment => "fragment",
            ResponseMode::FormPost => "form_post",
        }
    }
}

/// PKCE code challenge transform (RFC 7636 §4.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CodeChallengeMethod {
    Plain,
    S256,
}

impl CodeChallengeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CodeChallengeMethod::Plain => "plain",
            CodeChallengeMethod::S256 => "S256",
        }
    }
}

/// Default validity windows for each token kind the engine issues.
#[derive(Clone, Debug)]
pub struct Lifetimes {
    pub authorization_code: Duration,
    pub access_token: Duration,
    pub refresh_token: Duration,
    pub identity_token: Duration,
    pub device_code: Duration,
    pub user_code_interval: Duration,
}

impl Default for Lifetimes {
    fn default() -> Self {
        Lifetimes {
            authorization_code: Duration::minutes(5),
            access_token: Duration::hours(1),
            refresh_token: Duration::days(14),
            identity_token: Duration::hours(1),
            device_code: Duration::minutes(10),
            user_code_interval: Duration::seconds(5),
        }
    }
}

/// Operator-supplied configuration, before resolution validates and derives the rest
/// (§4.4 step 1 reads straight off this; later steps derive from it).
#[derive(Clone, Debug, Default)]
pub struct OptionsBuilder {
    pub enabled_endpoints: BTreeSet<EndpointKind>,
    pub enabled_grants: BTreeSet<GrantType>,
    pub scopes: BTreeSet<String>,
    pub signing_credentials: Vec<Credential>,
    pub encryption_credentials: Vec<Credential>,
    pub lifetimes: Option<Lifetimes>,
    pub issuer: Option<String>,
    pub degraded_mode: bool,
    pub disable_token_storage: bool,
    pub disable_reference_tokens: bool,
    pub rolling_refresh_tokens: bool,
    pub disable_sliding_refresh_expiration: bool,
    pub ignore_endpoint_permissions: bool,
    pub ignore_grant_type_permissions: bool,
    pub ignore_scope_permissions: bool,
    pub custom_validators: BTreeSet<EndpointKind>,
    pub has_custom_device_authentication_handler: bool,
    pub has_custom_device_sign_in_handler: bool,
}

impl OptionsBuilder {
    pub fn new() -> Self {
        OptionsBuilder::default()
    }

    pub fn enable_endpoint(mut self, endpoint: EndpointKind) -> Self {
        self.enabled_endpoints.insert(endpoint);
        self
    }

    pub fn enable_grant(mut self, grant: GrantType) -> Self {
        self.enabled_grants.insert(grant);
        self
    }

    pub fn add_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.insert(scope.into());
        self
    }

    pub fn add_signing_credential(mut self, credential: Credential) -> Self {
        self.signing_credentials.push(credential);
        self
    }

    pub fn add_encryption_credential(mut self, credential: Credential) -> Self {
        self.encryption_credentials.push(credential);
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn degraded_mode(mut self, enabled: bool) -> Self {
        self.degraded_mode = enabled;
        self
    }
}

/// Fully resolved, immutable configuration (§4.4). Produced only by [`resolve`]; every
/// field here has already passed the validation and derivation steps, so downstream code
/// never re-checks what resolution already guaranteed.
#[derive(Clone, Debug)]
pub struct Options {
    pub issuer: String,
    pub enabled_endpoints: BTreeSet<EndpointKind>,
    pub enabled_grants: BTreeSet<GrantType>,
    pub supported_response_types: Vec<BTreeSet<ResponseType>>,
    pub supported_response_modes: BTreeSet<ResponseMode>,
    pub supported_scopes: BTreeSet<String>,
    pub signing_credentials: Vec<Credential>,
    pub encryption_credentials: Vec<Credential>,
    pub lifetimes: Lifetimes,
    pub degraded_mode: bool,
    pub disable_token_storage: bool,
    pub disable_reference_tokens: bool,
    pub rolling_refresh_tokens: bool,
    pub disable_sliding_refresh_expiration: bool,
    pub ignore_endpoint_permissions: bool,
    pub ignore_grant_type_permissions: bool,
    pub ignore_scope_permissions: bool,
}

impl Options {
    pub fn supports_grant(&self, grant: GrantType) -> bool {
        self.ignore_grant_type_permissions || self.enabled_grants.contains(&grant)
    }

    pub fn supports_endpoint(&self, endpoint: EndpointKind) -> bool {
        self.ignore_endpoint_permissions || self.enabled_endpoints.contains(&endpoint)
    }
}
