//! Authorization endpoint pipeline (§4.5): the `/authorize` front door for the
//! authorization_code and implicit grants.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::context::authorization::{
    ApplyAuthorizationResponse, ExtractAuthorizationRequest, HandleAuthorizationRequest, ValidateAuthorizationRequest,
};
use crate::context::signin::ProcessSignIn;
use crate::context::Context;
use crate::dispatcher::dispatch;
use crate::error::{HostError, ProtocolErrorCode, Rejection};
use crate::message::{Request, Response};
use crate::options::{GrantType, Options};
use crate::registry::{Handler, HandlerDescriptor, HandlerList};
use crate::scope::Scope;
use crate::store::{ApplicationStore, AuthorizationEntry, AuthorizationKind, AuthorizationStatus, AuthorizationStore};
use crate::transaction::Transaction;

use super::signin::{ProcessSignInHandler, SignInItem, PROPERTY_SIGN_IN_PLAN};
use super::{PROPERTY_APPLICATION, PROPERTY_ISSUED_TOKENS, PROPERTY_PRINCIPAL};

fn random_id(len: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

struct ExtractClientAndRedirect;

#[async_trait]
impl Handler<ExtractAuthorizationRequest> for ExtractClientAndRedirect {
    async fn handle(&self, ctx: &mut ExtractAuthorizationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if txn.request.client_id().is_none() || txn.request.redirect_uri().is_none() {
            ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("client_id and redirect_uri are required"));
        }
        if let Some(subject) = txn.request.authenticated_subject() {
            txn.set_property("wayfare.authenticated_subject", subject.to_owned());
        }
        Ok(())
    }
}

struct ValidateClient {
    applications: Arc<dyn ApplicationStore>,
}

#[async_trait]
impl Handler<ValidateAuthorizationRequest> for ValidateClient {
    async fn handle(&self, ctx: &mut ValidateAuthorizationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let client_id = txn.request.client_id().unwrap_or_default().to_owned();
        let redirect_uri = txn.request.redirect_uri().unwrap_or_default().to_owned();

        let application = match self.applications.find_by_client_id(&client_id).await {
            Ok(Some(app)) => app,
            Ok(None) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidClient));
                return Ok(());
            }
            Err(_) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                return Ok(());
            }
        };

        if !application.redirect_uris.contains(&redirect_uri) {
            ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("redirect_uri is not registered"));
            return Ok(());
        }

        txn.set_property(PROPERTY_APPLICATION, application);
        Ok(())
    }
}

struct ValidateResponseTypeAndPkce;

#[async_trait]
impl Handler<ValidateAuthorizationRequest> for ValidateResponseTypeAndPkce {
    async fn handle(&self, ctx: &mut ValidateAuthorizationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if ctx.is_rejected() {
            return Ok(());
        }
        match txn.request.response_type() {
            Some("code") => {}
            Some(_) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::UnsupportedResponseType));
                return Ok(());
            }
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("response_type is required"));
                return Ok(());
            }
        }

        // PKCE: a code_challenge is required whenever the client presented one at all
        // transforms other than S256/plain are rejected up front (RFC 7636 §4.3).
        if let Some(method) = txn.request.code_challenge_method() {
            if method != "S256" && method != "plain" {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("unsupported code_challenge_method"));
            }
        }
        Ok(())
    }
}

struct HandleAuthorization {
    authorizations: Arc<dyn AuthorizationStore>,
}

#[async_trait]
impl Handler<HandleAuthorizationRequest> for HandleAuthorization {
    async fn handle(&self, ctx: &mut HandleAuthorizationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let client_id = txn.request.client_id().unwrap_or_default().to_owned();
        let scope: Scope = txn.request.scope().unwrap_or_default().parse().unwrap_or_else(|_| Scope::empty());

        // The subject must already have been authenticated and recorded by the host
        // before the authorization endpoint is invoked (sign-in UI is out of scope here);
        // it is expected under this well-known property.
        let subject = match txn.property::<String>("wayfare.authenticated_subject") {
            Some(subject) => subject.clone(),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::AccessDenied).with_description("no authenticated subject"));
                return Ok(());
            }
        };

        let authorization = AuthorizationEntry {
            id: random_id(24),
            subject: subject.clone(),
            client_id: client_id.clone(),
            status: AuthorizationStatus::Valid,
            scopes: scope.tokens().map(str::to_owned).collect(),
            kind: AuthorizationKind::AdHoc,
            creation_date: Utc::now(),
        };

        if self.authorizations.create(authorization.clone()).await.is_err() {
            ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
            return Ok(());
        }

        let mut principal = crate::claims::Principal::new();
        principal.set_subject(subject.clone());
        principal.set_scopes(scope.tokens().map(str::to_owned).collect::<Vec<_>>());
        principal.set_audiences([client_id.clone()]);
        if let Some(challenge) = txn.request.code_challenge() {
            let method = txn.request.code_challenge_method().unwrap_or("plain");
            principal.push_identity(
                crate::claims::Identity::new("pkce")
                    .with_claim(crate::claims::Claim::new(crate::claims::claim_types::CODE_CHALLENGE, challenge))
                    .with_claim(crate::claims::Claim::new(crate::claims::claim_types::CODE_CHALLENGE_METHOD, method)),
            );
        }

        let code_id = format!("code-{}", random_id(32));
        txn.set_property(PROPERTY_PRINCIPAL, principal);
        txn.set_property(
            PROPERTY_SIGN_IN_PLAN,
            vec![SignInItem {
                token_type: crate::claims::TokenType::AuthorizationCode,
                token_id: code_id,
                subject,
                client_id,
                authorization_id: Some(authorization.id),
                lifetime: txn.options.as_ref().expect("options resolved").lifetimes.authorization_code,
            }],
        );

        ctx.handle_request();
        Ok(())
    }
}

struct ApplyAuthorization;

#[async_trait]
impl Handler<ApplyAuthorizationResponse> for ApplyAuthorization {
    async fn handle(&self, _ctx: &mut ApplyAuthorizationResponse, txn: &mut Transaction) -> Result<(), HostError> {
        if let Some(issued) = txn.property::<std::collections::HashMap<crate::claims::TokenType, String>>(PROPERTY_ISSUED_TOKENS) {
            if let Some(code) = issued.get(&crate::claims::TokenType::AuthorizationCode) {
                txn.response.set("code", code.clone());
            }
        }
        if let Some(state) = txn.request.state() {
            txn.response.set("state", state.to_owned());
        }
        Ok(())
    }
}

/// Wires together the built-in handlers for the authorization endpoint's four phases and
/// exposes the single `process` entry point a host calls per request.
pub struct AuthorizationEndpoint {
    extract: HandlerList<ExtractAuthorizationRequest>,
    validate: HandlerList<ValidateAuthorizationRequest>,
    handle: HandlerList<HandleAuthorizationRequest>,
    sign_in: HandlerList<ProcessSignIn>,
    apply: HandlerList<ApplyAuthorizationResponse>,
}

impl AuthorizationEndpoint {
    pub fn new(
        applications: Arc<dyn ApplicationStore>,
        authorizations: Arc<dyn AuthorizationStore>,
        token_store: Arc<dyn crate::store::TokenStore>,
    ) -> Self {
        let mut extract = HandlerList::default();
        extract.register(HandlerDescriptor::new("extract-client-and-redirect", 1000, Arc::new(ExtractClientAndRedirect)));

        let mut validate = HandlerList::default();
        validate.register(HandlerDescriptor::new(
            "validate-client",
            1000,
            Arc::new(ValidateClient { applications }),
        ));
        validate.register(HandlerDescriptor::new(
            "validate-response-type-and-pkce",
            2000,
            Arc::new(ValidateResponseTypeAndPkce),
        ));

        let mut handle = HandlerList::default();
        handle.register(HandlerDescriptor::new(
            "handle-authorization",
            1000,
            Arc::new(HandleAuthorization { authorizations }),
        ));

        let mut sign_in = HandlerList::default();
        sign_in.register(HandlerDescriptor::new(
            "process-sign-in",
            1000,
            Arc::new(ProcessSignInHandler { token_store }),
        ));

        let mut apply = HandlerList::default();
        apply.register(HandlerDescriptor::new("apply-authorization", 1000, Arc::new(ApplyAuthorization)));

        AuthorizationEndpoint {
            extract,
            validate,
            handle,
            sign_in,
            apply,
        }
    }

    pub async fn process(&self, options: Arc<Options>, request: Request) -> Response {
        if !options.supports_grant(GrantType::AuthorizationCode) && !options.supports_grant(GrantType::Implicit) {
            let mut response = Response::new();
            response.set_rejection(&Rejection::new(ProtocolErrorCode::UnsupportedResponseType));
            return response;
        }

        let mut txn = Transaction::with_options(options);
        txn.request = request;

        let mut extract_ctx = ExtractAuthorizationRequest::new();
        let _ = dispatch(&mut extract_ctx, &self.extract, &mut txn).await;

        if !extract_ctx.is_rejected() {
            let mut validate_ctx = ValidateAuthorizationRequest::new();
            let _ = dispatch(&mut validate_ctx, &self.validate, &mut txn).await;

            if !validate_ctx.is_rejected() {
                let mut handle_ctx = HandleAuthorizationRequest::new();
                let _ = dispatch(&mut handle_ctx, &self.handle, &mut txn).await;

                if handle_ctx.is_rejected() {
                    txn.response.set_rejection(handle_ctx.rejection().unwrap());
                } else {
                    let mut sign_in_ctx = ProcessSignIn::new();
                    let _ = dispatch(&mut sign_in_ctx, &self.sign_in, &mut txn).await;
                }
            } else {
                txn.response.set_rejection(validate_ctx.rejection().unwrap());
            }
        } else {
            txn.response.set_rejection(extract_ctx.rejection().unwrap());
        }

        let mut apply_ctx = ApplyAuthorizationResponse::new();
        let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;

        txn.response
    }
}
