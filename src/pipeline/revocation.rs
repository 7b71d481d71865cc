//! Revocation endpoint pipeline (§4.5, RFC 7009): revokes a presented token and, when it
//! anchors an authorization, cascades to every other token issued under that same
//! authorization (§8 invariant 5).
use std::sync::Arc;

use async_trait::async_trait;

use crate::claims::TokenType;
use crate::context::revocation::{
    ApplyRevocationResponse, ExtractRevocationRequest, HandleRevocationRequest, ValidateRevocationRequest,
};
use crate::context::Context;
use crate::dispatcher::dispatch;
use crate::error::{HostError, ProtocolErrorCode, Rejection};
use crate::message::{Request, Response};
use crate::options::Options;
use crate::registry::{Handler, HandlerDescriptor, HandlerList};
use crate::store::{ApplicationStore, AuthorizationStore, TokenStatus, TokenStore};
use crate::transaction::Transaction;

struct ExtractToken;

#[async_trait]
impl Handler<ExtractRevocationRequest> for ExtractToken {
    async fn handle(&self, ctx: &mut ExtractRevocationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if txn.request.token().is_none() {
            ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("token is required"));
        }
        Ok(())
    }
}

struct ValidateCaller {
    applications: Arc<dyn ApplicationStore>,
}

#[async_trait]
impl Handler<ValidateRevocationRequest> for ValidateCaller {
    async fn handle(&self, ctx: &mut ValidateRevocationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let client_id = match txn.request.client_id() {
            Some(id) => id.to_owned(),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidClient).with_description("revocation requires client authentication"));
                return Ok(());
            }
        };
        match self.applications.find_by_client_id(&client_id).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidClient));
                Ok(())
            }
            Err(_) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                Ok(())
            }
        }
    }
}

/// RFC 7009 §2.2: an unknown token is not an error — the client already got what it
/// wanted. Revocation is therefore reported as handled regardless of whether the token
/// existed; only a store failure produces a rejection.
struct RevokeToken {
    tokens: Arc<dyn TokenStore>,
    authorizations: Arc<dyn AuthorizationStore>,
}

#[async_trait]
impl Handler<HandleRevocationRequest> for RevokeToken {
    async fn handle(&self, ctx: &mut HandleRevocationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let token = txn.request.token().unwrap_or_default().to_owned();

        let entry = match self.tokens.find_by_id(&token).await {
            Ok(entry) => entry,
            Err(_) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                return Ok(());
            }
        };

        if let Some(entry) = entry {
            if self.tokens.set_status(&token, TokenStatus::Revoked).await.is_err() {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                return Ok(());
            }
            if entry.token_type == TokenType::RefreshToken {
                if let Some(authorization_id) = &entry.authorization_id {
                    if self.authorizations.revoke(authorization_id).await.is_err()
                        || self.tokens.revoke_by_authorization(authorization_id).await.is_err()
                    {
                        ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                        return Ok(());
                    }
                }
            }
        }

        ctx.handle_request();
        Ok(())
    }
}

struct ApplyRevocation;

#[async_trait]
impl Handler<ApplyRevocationResponse> for ApplyRevocation {
    async fn handle(&self, _ctx: &mut ApplyRevocationResponse, txn: &mut Transaction) -> Result<(), HostError> {
        txn.response.set_status(200);
        Ok(())
    }
}

/// Wires the revocation endpoint's four phases together.
pub struct RevocationEndpoint {
    extract: HandlerList<ExtractRevocationRequest>,
    validate: HandlerList<ValidateRevocationRequest>,
    handle: HandlerList<HandleRevocationRequest>,
    apply: HandlerList<ApplyRevocationResponse>,
}

impl RevocationEndpoint {
    pub fn new(
        applications: Arc<dyn ApplicationStore>,
        authorizations: Arc<dyn AuthorizationStore>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let mut extract = HandlerList::default();
        extract.register(HandlerDescriptor::new("extract-token", 1000, Arc::new(ExtractToken)));

        let mut validate = HandlerList::default();
        validate.register(HandlerDescriptor::new("validate-caller", 1000, Arc::new(ValidateCaller { applications })));

        let mut handle = HandlerList::default();
        handle.register(HandlerDescriptor::new("revoke-token", 1000, Arc::new(RevokeToken { tokens, authorizations })));

        let mut apply = HandlerList::default();
        apply.register(HandlerDescriptor::new("apply-revocation", 1000, Arc::new(ApplyRevocation)));

        RevocationEndpoint { extract, validate, handle, apply }
    }

    pub async fn process(&self, options: Arc<Options>, request: Request) -> Response {
        let mut txn = Transaction::with_options(options);
        txn.request = request;

        let mut extract_ctx = ExtractRevocationRequest::new();
        let _ = dispatch(&mut extract_ctx, &self.extract, &mut txn).await;
        if !extract_ctx.is_rejected() {
            let mut validate_ctx = ValidateRevocationRequest::new();
            let _ = dispatch(&mut validate_ctx, &self.validate, &mut txn).await;
            if !validate_ctx.is_rejected() {
                let mut handle_ctx = HandleRevocationRequest::new();
                let _ = dispatch(&mut handle_ctx, &self.handle, &mut txn).await;
                if handle_ctx.is_rejected() {
                    txn.response.set_rejection(handle_ctx.rejection().unwrap());
                }
            } else {
                txn.response.set_rejection(validate_ctx.rejection().unwrap());
            }
        } else {
            txn.response.set_rejection(extract_ctx.rejection().unwrap());
        }

        let mut apply_ctx = ApplyRevocationResponse::new();
        let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;
        txn.response
    }
}
