//! ProcessSignIn (§4.6): assembles the principal for a subject into one or more issued
//! tokens, honoring each claim's destinations, and persists server-side token entries
//! unless the deployment is in degraded mode or reference tokens are disabled.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::claims::{claim_types, Principal, TokenType};
use crate::context::signin::ProcessSignIn;
use crate::context::Context;
use crate::error::{HostError, ProtocolErrorCode, Rejection};
use crate::registry::Handler;
use crate::serializer::TokenPayload;
use crate::store::{TokenEntry, TokenStatus, TokenStore};
use crate::transaction::Transaction;

use super::crypto;
use super::{PROPERTY_ISSUED_TOKENS, PROPERTY_PRINCIPAL};

/// Transaction property holding the ordered list of tokens to issue this sign-in
/// (populated by the endpoint pipeline before dispatching `ProcessSignIn`).
pub const PROPERTY_SIGN_IN_PLAN: &str = "wayfare.sign_in_plan";

/// One token to issue as part of a sign-in: which kind, under what id, and for how long.
#[derive(Clone, Debug)]
pub struct SignInItem {
    pub token_type: TokenType,
    pub token_id: String,
    pub subject: String,
    pub client_id: String,
    pub authorization_id: Option<String>,
    pub lifetime: Duration,
}

/// Builds the JWT claim set for one issued token from its filtered principal.
fn build_claims(principal: &Principal, item: &SignInItem, issuer: &str, now: chrono::DateTime<Utc>) -> serde_json::Value {
    let mut claims = serde_json::Map::new();
    claims.insert("iss".into(), issuer.into());
    claims.insert("sub".into(), item.subject.clone().into());
    claims.insert("aud".into(), item.client_id.clone().into());
    claims.insert("jti".into(), item.token_id.clone().into());
    claims.insert("iat".into(), now.timestamp().into());
    claims.insert("exp".into(), (now + item.lifetime).timestamp().into());
    if let Some(authorization_id) = &item.authorization_id {
        claims.insert("oi_au_id".into(), authorization_id.clone().into());
    }
    for identity in principal.identities() {
        for claim in &identity.claims {
            if matches!(
                claim.claim_type.as_str(),
                claim_types::SUBJECT | claim_types::AUDIENCE | claim_types::TOKEN_ID
            ) {
                continue;
            }
            claims.insert(claim.claim_type.clone(), claim.value.clone().into());
        }
    }
    serde_json::Value::Object(claims)
}

/// The built-in `ProcessSignIn` handler: for every planned token, filters the principal
/// to that token type's allowed claims, signs a compact JWS, and — unless the token is
/// self-contained by configuration — seals and persists the payload server-side under an
/// opaque reference handle (§4.6, §8 invariant 3).
pub struct ProcessSignInHandler {
    pub token_store: Arc<dyn TokenStore>,
}

#[async_trait]
impl Handler<ProcessSignIn> for ProcessSignInHandler {
    async fn handle(&self, ctx: &mut ProcessSignIn, txn: &mut Transaction) -> Result<(), HostError> {
        let options = txn
            .options
            .clone()
            .ok_or(HostError::MissingTransactionProperty("options"))?;
        let principal = txn.require_property::<Principal>(PROPERTY_PRINCIPAL)?.clone();
        let plan = txn.require_property::<Vec<SignInItem>>(PROPERTY_SIGN_IN_PLAN)?.clone();

        let signing_credential = options
            .signing_credentials
            .first()
            .ok_or_else(|| HostError::crypto("no signing credential resolved"))?;

        let now = Utc::now();
        let mut issued = HashMap::new();

        for item in &plan {
            let filtered = principal.filtered_for(item.token_type);
            let claims = build_claims(&filtered, item, &options.issuer, now);
            let compact = match crypto::sign(&claims, signing_credential) {
                Ok(compact) => compact,
                Err(_) => {
                    ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                    return Ok(());
                }
            };

            let self_contained = options.degraded_mode || options.disable_reference_tokens;

            if self_contained {
                issued.insert(item.token_type, compact);
                continue;
            }

            let payload = TokenPayload::new("Bearer", filtered);
            let bytes = crate::serializer::write(&payload);
            let sealed = match options.encryption_credentials.first() {
                Some(credential) => match crypto::encrypt(&bytes, credential) {
                    Ok(sealed) => sealed,
                    Err(_) => {
                        ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                        return Ok(());
                    }
                },
                None => bytes,
            };

            if !options.disable_token_storage {
                if self.token_store.store_payload(&item.token_id, sealed).await.is_err() {
                    ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                    return Ok(());
                }
                let created = self
                    .token_store
                    .create(TokenEntry {
                        id: item.token_id.clone(),
                        subject: item.subject.clone(),
                        client_id: item.client_id.clone(),
                        authorization_id: item.authorization_id.clone(),
                        token_type: item.token_type,
                        status: TokenStatus::Valid,
                        payload_reference: item.token_id.clone(),
                        creation_date: now,
                        expiration_date: now + item.lifetime,
                        redemption_date: None,
                    })
                    .await;
                if created.is_err() {
                    ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                    return Ok(());
                }
            }

            issued.insert(item.token_type, item.token_id.clone());
        }

        txn.set_property(PROPERTY_ISSUED_TOKENS, issued);
        ctx.handle_request();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::Identity;
    use crate::context::signin::ProcessSignIn;
    use crate::options::{Credential, OptionsBuilder, EndpointKind, GrantType};
    use crate::store::mem::MemoryTokenStore;
    use std::sync::Arc;

    fn resolved_options() -> Arc<crate::options::Options> {
        let builder = OptionsBuilder::new()
            .enable_endpoint(EndpointKind::Authorization)
            .enable_endpoint(EndpointKind::Token)
            .enable_grant(GrantType::AuthorizationCode)
            .add_signing_credential(Credential::symmetric(b"super-secret-signing-key-0123456".to_vec()))
            .add_signing_credential(Credential::rsa(vec![1, 2, 3]))
            .add_encryption_credential(Credential::symmetric(b"super-secret-encrypt-key-0123456".to_vec()));
        Arc::new(crate::options::resolve(builder).unwrap())
    }

    #[tokio::test]
    async fn issues_reference_token_and_persists_entry() {
        let options = resolved_options();
        let store = Arc::new(MemoryTokenStore::new());
        let handler = ProcessSignInHandler {
            token_store: store.clone(),
        };

        let mut principal = Principal::new();
        principal.push_identity(Identity::new("pwd").with_claim(crate::claims::Claim::new("email", "a@b.com")));
        principal.set_subject("alice");

        let mut txn = Transaction::with_options(options);
        txn.set_property(PROPERTY_PRINCIPAL, principal);
        txn.set_property(
            PROPERTY_SIGN_IN_PLAN,
            vec![SignInItem {
                token_type: TokenType::AccessToken,
                token_id: "tok-1".into(),
                subject: "alice".into(),
                client_id: "client-1".into(),
                authorization_id: None,
                lifetime: Duration::hours(1),
            }],
        );

        let mut ctx = ProcessSignIn::new();
        handler.handle(&mut ctx, &mut txn).await.unwrap();

        assert!(ctx.is_request_handled());
        let issued = txn.property::<HashMap<TokenType, String>>(PROPERTY_ISSUED_TOKENS).unwrap();
        assert_eq!(issued.get(&TokenType::AccessToken), Some(&"tok-1".to_string()));
        assert!(store.find_by_id("tok-1").await.unwrap().is_some());
    }
}
