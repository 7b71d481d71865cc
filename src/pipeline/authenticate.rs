//! ProcessAuthentication (§4.6): the inverse of [`super::signin`] — given a bearer string
//! presented by a caller, recovers the principal it encodes, whether that string is a
//! self-contained JWT or an opaque server-side reference handle.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::claims::{claim_types, Claim, Identity, Principal, TokenType};
use crate::context::signin::ProcessAuthentication;
use crate::context::Context;
use crate::error::HostError;
use crate::registry::Handler;
use crate::store::{TokenStatus, TokenStore};
use crate::transaction::Transaction;

use super::crypto;
use super::PROPERTY_PRINCIPAL;

/// Transaction property holding the presented token string and the kind it is expected
/// to be, set by the endpoint pipeline before dispatching `ProcessAuthentication`.
pub const PROPERTY_AUTHENTICATE_INPUT: &str = "wayfare.authenticate_input";
/// Transaction property the handler populates with the server-side [`crate::store::TokenEntry`]
/// it found, when the presented token was a reference handle rather than a self-contained JWT.
pub const PROPERTY_TOKEN_ENTRY: &str = "wayfare.token_entry";

#[derive(Clone, Debug)]
pub struct AuthenticateInput {
    pub token: String,
    pub expected_type: TokenType,
}

fn principal_from_claims(claims: &serde_json::Value) -> Principal {
    let mut identity = Identity::new("bearer");
    if let Some(obj) = claims.as_object() {
        for (key, value) in obj {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let claim_type = match key.as_str() {
                "sub" => claim_types::SUBJECT,
                "aud" => claim_types::AUDIENCE,
                "jti" => claim_types::TOKEN_ID,
                "oi_au_id" => claim_types::AUTHORIZATION_ID,
                other => other,
            };
            identity.claims.push(Claim::new(claim_type, value));
        }
    }
    Principal::with_identity(identity)
}

/// The built-in `ProcessAuthentication` handler. Does not itself reject invalid or
/// expired tokens with a protocol error: it records `None` for an unrecoverable principal
/// and lets the calling pipeline's validation phase decide what that means for the
/// specific endpoint (an introspection endpoint reports `active: false`; a token endpoint
/// rejects with `invalid_grant`).
pub struct ProcessAuthenticationHandler {
    pub token_store: Arc<dyn TokenStore>,
}

impl ProcessAuthenticationHandler {
    async fn resolve_reference(&self, input: &AuthenticateInput, options: &crate::options::Options) -> Option<Principal> {
        let entry = self.token_store.find_by_id(&input.token).await.ok().flatten()?;
        if entry.token_type != input.expected_type {
            return None;
        }
        if entry.status != TokenStatus::Valid {
            return None;
        }
        if entry.expiration_date <= Utc::now() {
            return None;
        }

        let sealed = self.token_store.load_payload(&input.token).await.ok().flatten()?;
        let bytes = if options.encryption_credentials.is_empty() {
            sealed
        } else {
            crypto::decrypt(&sealed, &options.encryption_credentials).unwrap_or(sealed)
        };
        let payload = crate::serializer::read(&bytes).ok()?;
        Some(payload.principal)
    }
}

#[async_trait]
impl Handler<ProcessAuthentication> for ProcessAuthenticationHandler {
    async fn handle(&self, ctx: &mut ProcessAuthentication, txn: &mut Transaction) -> Result<(), HostError> {
        let options = txn
            .options
            .clone()
            .ok_or(HostError::MissingTransactionProperty("options"))?;
        let input = txn.require_property::<AuthenticateInput>(PROPERTY_AUTHENTICATE_INPUT)?.clone();

        let self_contained = options.degraded_mode || options.disable_reference_tokens;

        let principal = if self_contained {
            crypto::verify(&input.token, &options.signing_credentials)
                .ok()
                .map(|claims| principal_from_claims(&claims))
        } else {
            self.resolve_reference(&input, &options).await
        };

        match principal {
            Some(principal) => {
                txn.set_property(PROPERTY_PRINCIPAL, principal);
                ctx.handle_request();
            }
            None => {
                ctx.skip_request();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Credential, EndpointKind, GrantType, OptionsBuilder};
    use crate::pipeline::signin::{ProcessSignInHandler, SignInItem, PROPERTY_SIGN_IN_PLAN};
    use crate::store::mem::MemoryTokenStore;
    use chrono::Duration;

    #[tokio::test]
    async fn round_trips_through_sign_in_and_authenticate() {
        let builder = OptionsBuilder::new()
            .enable_endpoint(EndpointKind::Authorization)
            .enable_endpoint(EndpointKind::Token)
            .enable_grant(GrantType::AuthorizationCode)
            .add_signing_credential(Credential::symmetric(b"super-secret-signing-key-0123456".to_vec()))
            .add_signing_credential(Credential::rsa(vec![1, 2, 3]))
            .add_encryption_credential(Credential::symmetric(b"super-secret-encrypt-key-0123456".to_vec()));
        let options = std::sync::Arc::new(crate::options::resolve(builder).unwrap());
        let store = std::sync::Arc::new(MemoryTokenStore::new());

        let mut principal = Principal::new();
        principal.set_subject("alice");

        let mut txn = Transaction::with_options(options.clone());
        txn.set_property(PROPERTY_PRINCIPAL, principal);
        txn.set_property(
            PROPERTY_SIGN_IN_PLAN,
            vec![SignInItem {
                token_type: TokenType::AccessToken,
                token_id: "tok-42".into(),
                subject: "alice".into(),
                client_id: "client-1".into(),
                authorization_id: None,
                lifetime: Duration::hours(1),
            }],
        );

        let sign_in = ProcessSignInHandler {
            token_store: store.clone(),
        };
        let mut sign_in_ctx = crate::context::signin::ProcessSignIn::new();
        sign_in.handle(&mut sign_in_ctx, &mut txn).await.unwrap();

        txn.set_property(
            PROPERTY_AUTHENTICATE_INPUT,
            AuthenticateInput {
                token: "tok-42".into(),
                expected_type: TokenType::AccessToken,
            },
        );

        let authenticate = ProcessAuthenticationHandler {
            token_store: store.clone(),
        };
        let mut auth_ctx = ProcessAuthentication::new();
        authenticate.handle(&mut auth_ctx, &mut txn).await.unwrap();

        assert!(auth_ctx.is_request_handled());
        let principal = txn.property::<Principal>(PROPERTY_PRINCIPAL).unwrap();
        assert_eq!(principal.subject(), Some("alice".to_string()));
    }
}
