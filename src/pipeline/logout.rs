//! Logout endpoint pipeline (§4.5, OIDC RP-Initiated Logout): ends the session backing an
//! identity token's subject and, if a registered `post_logout_redirect_uri` is presented,
//! echoes it back for the host to redirect to.
use std::sync::Arc;

use async_trait::async_trait;

use crate::claims::TokenType;
use crate::context::logout::{ApplyLogoutResponse, ExtractLogoutRequest, HandleLogoutRequest, ValidateLogoutRequest};
use crate::context::signin::ProcessAuthentication;
use crate::context::Context;
use crate::dispatcher::dispatch;
use crate::error::{HostError, ProtocolErrorCode, Rejection};
use crate::message::{Request, Response};
use crate::options::Options;
use crate::registry::{Handler, HandlerDescriptor, HandlerList};
use crate::store::{ApplicationStore, AuthorizationStore, TokenStore};
use crate::transaction::Transaction;

use super::authenticate::{AuthenticateInput, ProcessAuthenticationHandler, PROPERTY_AUTHENTICATE_INPUT};
use super::PROPERTY_PRINCIPAL;

struct ExtractHint;

#[async_trait]
impl Handler<ExtractLogoutRequest> for ExtractHint {
    async fn handle(&self, _ctx: &mut ExtractLogoutRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if let Some(hint) = txn.request.id_token_hint() {
            txn.set_property(
                PROPERTY_AUTHENTICATE_INPUT,
                AuthenticateInput {
                    token: hint.to_owned(),
                    expected_type: TokenType::IdentityToken,
                },
            );
        }
        Ok(())
    }
}

struct ValidatePostLogoutRedirect {
    applications: Arc<dyn ApplicationStore>,
}

#[async_trait]
impl Handler<ValidateLogoutRequest> for ValidatePostLogoutRedirect {
    async fn handle(&self, ctx: &mut ValidateLogoutRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let (client_id, redirect_uri) = match (txn.request.client_id(), txn.request.post_logout_redirect_uri()) {
            (Some(client_id), Some(redirect_uri)) => (client_id.to_owned(), redirect_uri.to_owned()),
            _ => return Ok(()),
        };

        match self.applications.find_by_client_id(&client_id).await {
            Ok(Some(application)) if application.post_logout_redirect_uris.contains(&redirect_uri) => Ok(()),
            Ok(_) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("post_logout_redirect_uri is not registered"));
                Ok(())
            }
            Err(_) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                Ok(())
            }
        }
    }
}

/// Revokes every authorization belonging to the identity token's subject and client, if
/// one was presented and resolved.
struct EndSession {
    authorizations: Arc<dyn AuthorizationStore>,
    tokens: Arc<dyn TokenStore>,
}

#[async_trait]
impl Handler<HandleLogoutRequest> for EndSession {
    async fn handle(&self, ctx: &mut HandleLogoutRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if let Some(principal) = txn.property::<crate::claims::Principal>(PROPERTY_PRINCIPAL) {
            if let Some(authorization_id) = principal.authorization_id() {
                if self.authorizations.revoke(&authorization_id).await.is_err()
                    || self.tokens.revoke_by_authorization(&authorization_id).await.is_err()
                {
                    ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                    return Ok(());
                }
            }
        }
        ctx.handle_request();
        Ok(())
    }
}

struct ApplyLogout;

#[async_trait]
impl Handler<ApplyLogoutResponse> for ApplyLogout {
    async fn handle(&self, _ctx: &mut ApplyLogoutResponse, txn: &mut Transaction) -> Result<(), HostError> {
        if let Some(redirect_uri) = txn.request.post_logout_redirect_uri() {
            txn.response.set("post_logout_redirect_uri", redirect_uri.to_owned());
        }
        if let Some(state) = txn.request.state() {
            txn.response.set("state", state.to_owned());
        }
        Ok(())
    }
}

/// Wires the logout endpoint's phases, delegating `id_token_hint` resolution to
/// `ProcessAuthentication` between Extract and Validate.
pub struct LogoutEndpoint {
    extract: HandlerList<ExtractLogoutRequest>,
    authenticate: HandlerList<ProcessAuthentication>,
    validate: HandlerList<ValidateLogoutRequest>,
    handle: HandlerList<HandleLogoutRequest>,
    apply: HandlerList<ApplyLogoutResponse>,
}

impl LogoutEndpoint {
    pub fn new(
        applications: Arc<dyn ApplicationStore>,
        authorizations: Arc<dyn AuthorizationStore>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let mut extract = HandlerList::default();
        extract.register(HandlerDescriptor::new("extract-hint", 1000, Arc::new(ExtractHint)));

        let mut authenticate = HandlerList::default();
        authenticate.register(HandlerDescriptor::new(
            "process-authentication",
            1000,
            Arc::new(ProcessAuthenticationHandler { token_store: tokens.clone() }),
        ));

        let mut validate = HandlerList::default();
        validate.register(HandlerDescriptor::new(
            "validate-post-logout-redirect",
            1000,
            Arc::new(ValidatePostLogoutRedirect { applications }),
        ));

        let mut handle = HandlerList::default();
        handle.register(HandlerDescriptor::new("end-session", 1000, Arc::new(EndSession { authorizations, tokens })));

        let mut apply = HandlerList::default();
        apply.register(HandlerDescriptor::new("apply-logout", 1000, Arc::new(ApplyLogout)));

        LogoutEndpoint { extract, authenticate, validate, handle, apply }
    }

    pub async fn process(&self, options: Arc<Options>, request: Request) -> Response {
        let mut txn = Transaction::with_options(options);
        txn.request = request;

        let mut extract_ctx = ExtractLogoutRequest::new();
        let _ = dispatch(&mut extract_ctx, &self.extract, &mut txn).await;

        let mut authenticate_ctx = ProcessAuthentication::new();
        let _ = dispatch(&mut authenticate_ctx, &self.authenticate, &mut txn).await;

        let mut validate_ctx = ValidateLogoutRequest::new();
        let _ = dispatch(&mut validate_ctx, &self.validate, &mut txn).await;
        if !validate_ctx.is_rejected() {
            let mut handle_ctx = HandleLogoutRequest::new();
            let _ = dispatch(&mut handle_ctx, &self.handle, &mut txn).await;
            if handle_ctx.is_rejected() {
                txn.response.set_rejection(handle_ctx.rejection().unwrap());
            }
        } else {
            txn.response.set_rejection(validate_ctx.rejection().unwrap());
        }

        let mut apply_ctx = ApplyLogoutResponse::new();
        let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;
        txn.response
    }
}
