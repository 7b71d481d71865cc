//! UserInfo endpoint pipeline (§4.5, OIDC Core §5.3): recovers the principal behind a
//! bearer access token and projects its claims, restricted to `access_token`'s
//! destinations like any other issuance.
use std::sync::Arc;

use async_trait::async_trait;

use crate::claims::TokenType;
use crate::context::signin::ProcessAuthentication;
use crate::context::userinfo::{ApplyUserinfoResponse, ExtractUserinfoRequest, HandleUserinfoRequest, ValidateUserinfoRequest};
use crate::context::Context;
use crate::dispatcher::dispatch;
use crate::error::{HostError, ProtocolErrorCode, Rejection};
use crate::message::{Request, Response};
use crate::options::Options;
use crate::registry::{Handler, HandlerDescriptor, HandlerList};
use crate::store::TokenStore;
use crate::transaction::Transaction;

use super::authenticate::{AuthenticateInput, ProcessAuthenticationHandler, PROPERTY_AUTHENTICATE_INPUT};
use super::PROPERTY_PRINCIPAL;

struct ExtractBearer;

#[async_trait]
impl Handler<ExtractUserinfoRequest> for ExtractBearer {
    async fn handle(&self, ctx: &mut ExtractUserinfoRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if txn.request.token().is_none() {
            ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("bearer token is required"));
        }
        Ok(())
    }
}

struct PrepareAuthenticateInput;

#[async_trait]
impl Handler<ValidateUserinfoRequest> for PrepareAuthenticateInput {
    async fn handle(&self, _ctx: &mut ValidateUserinfoRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let token = txn.request.token().unwrap_or_default().to_owned();
        txn.set_property(
            PROPERTY_AUTHENTICATE_INPUT,
            AuthenticateInput { token, expected_type: TokenType::AccessToken },
        );
        Ok(())
    }
}

/// Requires that the bearer token resolved to a principal, then re-filters it to the
/// claims allowed in an `id_token` (§8 invariant 3's dual for userinfo): the access
/// token's own destination filtering at issuance time is a separate, possibly broader,
/// allowlist and must not leak claims a deployment never meant to expose to userinfo.
struct RequirePrincipal;

#[async_trait]
impl Handler<HandleUserinfoRequest> for RequirePrincipal {
    async fn handle(&self, ctx: &mut HandleUserinfoRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let principal = match txn.property::<crate::claims::Principal>(PROPERTY_PRINCIPAL) {
            Some(principal) => principal.filtered_for(TokenType::IdentityToken),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("access token is invalid or expired"));
                return Ok(());
            }
        };
        txn.set_property(PROPERTY_PRINCIPAL, principal);
        ctx.handle_request();
        Ok(())
    }
}

struct ApplyUserinfo;

#[async_trait]
impl Handler<ApplyUserinfoResponse> for ApplyUserinfo {
    async fn handle(&self, _ctx: &mut ApplyUserinfoResponse, txn: &mut Transaction) -> Result<(), HostError> {
        if let Some(principal) = txn.property::<crate::claims::Principal>(PROPERTY_PRINCIPAL) {
            if let Some(subject) = principal.subject() {
                txn.response.set("sub", subject);
            }
            for identity in principal.identities() {
                for claim in &identity.claims {
                    txn.response.set(claim.claim_type.clone(), claim.value.clone());
                }
            }
        }
        Ok(())
    }
}

/// Wires the UserInfo endpoint's phases, delegating bearer resolution to
/// `ProcessAuthentication` between Validate and Handle.
pub struct UserinfoEndpoint {
    extract: HandlerList<ExtractUserinfoRequest>,
    validate: HandlerList<ValidateUserinfoRequest>,
    authenticate: HandlerList<ProcessAuthentication>,
    handle: HandlerList<HandleUserinfoRequest>,
    apply: HandlerList<ApplyUserinfoResponse>,
}

impl UserinfoEndpoint {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        let mut extract = HandlerList::default();
        extract.register(HandlerDescriptor::new("extract-bearer", 1000, Arc::new(ExtractBearer)));

        let mut validate = HandlerList::default();
        validate.register(HandlerDescriptor::new("prepare-authenticate-input", 1000, Arc::new(PrepareAuthenticateInput)));

        let mut authenticate = HandlerList::default();
        authenticate.register(HandlerDescriptor::new(
            "process-authentication",
            1000,
            Arc::new(ProcessAuthenticationHandler { token_store: tokens }),
        ));

        let mut handle = HandlerList::default();
        handle.register(HandlerDescriptor::new("require-principal", 1000, Arc::new(RequirePrincipal)));

        let mut apply = HandlerList::default();
        apply.register(HandlerDescriptor::new("apply-userinfo", 1000, Arc::new(ApplyUserinfo)));

        UserinfoEndpoint { extract, validate, authenticate, handle, apply }
    }

    pub async fn process(&self, options: Arc<Options>, request: Request) -> Response {
        let mut txn = Transaction::with_options(options);
        txn.request = request;

        let mut extract_ctx = ExtractUserinfoRequest::new();
        let _ = dispatch(&mut extract_ctx, &self.extract, &mut txn).await;
        if extract_ctx.is_rejected() {
            txn.response.set_rejection(extract_ctx.rejection().unwrap());
            return txn.response;
        }

        let mut validate_ctx = ValidateUserinfoRequest::new();
        let _ = dispatch(&mut validate_ctx, &self.validate, &mut txn).await;

        let mut authenticate_ctx = ProcessAuthentication::new();
        let _ = dispatch(&mut authenticate_ctx, &self.authenticate, &mut txn).await;

        let mut handle_ctx = HandleUserinfoRequest::new();
        let _ = dispatch(&mut handle_ctx, &self.handle, &mut txn).await;
        if handle_ctx.is_rejected() {
            txn.response.set_rejection(handle_ctx.rejection().unwrap());
            return txn.response;
        }

        let mut apply_ctx = ApplyUserinfoResponse::new();
        let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;
        txn.response
    }
}
