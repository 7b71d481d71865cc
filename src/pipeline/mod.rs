//! Endpoint pipelines (§4.5) and the two cross-cutting processes every pipeline that
//! issues or validates a token delegates to (§4.6).
pub mod authenticate;
pub mod authorization;
pub mod cryptography;
pub mod crypto;
pub mod device;
pub mod discovery;
pub mod introspection;
pub mod logout;
pub mod revocation;
pub mod signin;
pub mod token;
pub mod userinfo;
pub mod verification;

/// Transaction property name under which a pipeline stores the [`crate::claims::Principal`]
/// assembled for the subject of the current request, for [`signin::ProcessSignInHandler`]
/// to read back when it issues tokens.
pub const PROPERTY_PRINCIPAL: &str = "wayfare.principal";
/// Transaction property name for the [`crate::store::ApplicationEntry`] resolved for the
/// requesting client.
pub const PROPERTY_APPLICATION: &str = "wayfare.application";
/// Transaction property name for the [`crate::store::AuthorizationEntry`] backing the
/// current request, once one has been created or loaded.
pub const PROPERTY_AUTHORIZATION: &str = "wayfare.authorization";
/// Transaction property name for the map of issued token strings keyed by
/// [`crate::claims::TokenType`] tag, populated by [`signin::ProcessSignInHandler`].
pub const PROPERTY_ISSUED_TOKENS: &str = "wayfare.issued_tokens";
