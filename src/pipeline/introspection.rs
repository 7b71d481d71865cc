//! Introspection endpoint pipeline (§4.5, RFC 7662): reports whether a presented token is
//! currently active, and if so, a claim set describing it.
//!
//! §9 Open Question resolved: the claims exposed on an active introspection response are
//! filtered the same way a token of the presented type would be when issued (the "safer
//! default" of symmetric filtering) rather than exposing the full, unfiltered principal.
use std::sync::Arc;

use async_trait::async_trait;

use crate::claims::TokenType;
use crate::context::introspection::{
    ApplyIntrospectionResponse, ExtractIntrospectionRequest, HandleIntrospectionRequest, ValidateIntrospectionRequest,
};
use crate::context::signin::ProcessAuthentication;
use crate::context::Context;
use crate::dispatcher::dispatch;
use crate::error::{HostError, ProtocolErrorCode, Rejection};
use crate::message::{Request, Response};
use crate::options::Options;
use crate::registry::{Handler, HandlerDescriptor, HandlerList};
use crate::store::{ApplicationStore, TokenStore};
use crate::transaction::Transaction;

use super::authenticate::{AuthenticateInput, ProcessAuthenticationHandler, PROPERTY_AUTHENTICATE_INPUT};
use super::PROPERTY_PRINCIPAL;

fn token_type_hint(request: &Request) -> TokenType {
    match request.token_type_hint() {
        Some("refresh_token") => TokenType::RefreshToken,
        Some("id_token") => TokenType::IdentityToken,
        _ => TokenType::AccessToken,
    }
}

struct ExtractToken;

#[async_trait]
impl Handler<ExtractIntrospectionRequest> for ExtractToken {
    async fn handle(&self, ctx: &mut ExtractIntrospectionRequest, txn: &mut Transaction) -> Result<(), HostError> {
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
impl Handler<ValidateIntrospectionRequest> for ValidateCaller {
    async fn handle(&self, ctx: &mut ValidateIntrospectionRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let client_id = match txn.request.client_id() {
            Some(id) => id.to_owned(),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidClient).with_description("introspection requires client authentication"));
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

struct PrepareAuthenticateInput;

#[async_trait]
impl Handler<HandleIntrospectionRequest> for PrepareAuthenticateInput {
    async fn handle(&self, _ctx: &mut HandleIntrospectionRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let token = txn.request.token().unwrap_or_default().to_owned();
        let expected_type = token_type_hint(&txn.request);
        txn.set_property(PROPERTY_AUTHENTICATE_INPUT, AuthenticateInput { token, expected_type });
        Ok(())
    }
}

struct BuildIntrospectionResult;

#[async_trait]
impl Handler<HandleIntrospectionRequest> for BuildIntrospectionResult {
    async fn handle(&self, ctx: &mut HandleIntrospectionRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if let Some(principal) = txn.property::<crate::claims::Principal>(PROPERTY_PRINCIPAL) {
            let expected_type = token_type_hint(&txn.request);
            txn.set_property(PROPERTY_PRINCIPAL, principal.filtered_for(expected_type));
            txn.set_property("wayfare.introspection_active", true);
        } else {
            txn.set_property("wayfare.introspection_active", false);
        }
        ctx.handle_request();
        Ok(())
    }
}

struct ApplyIntrospection;

#[async_trait]
impl Handler<ApplyIntrospectionResponse> for ApplyIntrospection {
    async fn handle(&self, _ctx: &mut ApplyIntrospectionResponse, txn: &mut Transaction) -> Result<(), HostError> {
        let active = txn.property::<bool>("wayfare.introspection_active").copied().unwrap_or(false);
        txn.response.set("active", if active { "true" } else { "false" });
        if active {
            if let Some(principal) = txn.property::<crate::claims::Principal>(PROPERTY_PRINCIPAL) {
                if let Some(subject) = principal.subject() {
                    txn.response.set("sub", subject);
                }
                if let Some(client_id) = principal.audiences().into_iter().next() {
                    txn.response.set("client_id", client_id);
                }
                let scopes = principal.scopes().join(" ");
                if !scopes.is_empty() {
                    txn.response.set("scope", scopes);
                }
                if let Some(exp) = principal.expiration_date() {
                    txn.response.set("exp", exp.timestamp().to_string());
                }
            }
        }
        Ok(())
    }
}

/// Wires the introspection endpoint's phases, delegating token resolution to
/// `ProcessAuthentication` between Handle's two stages.
pub struct IntrospectionEndpoint {
    extract: HandlerList<ExtractIntrospectionRequest>,
    validate: HandlerList<ValidateIntrospectionRequest>,
    prepare: HandlerList<HandleIntrospectionRequest>,
    authenticate: HandlerList<ProcessAuthentication>,
    finish: HandlerList<HandleIntrospectionRequest>,
    apply: HandlerList<ApplyIntrospectionResponse>,
}

impl IntrospectionEndpoint {
    pub fn new(applications: Arc<dyn ApplicationStore>, tokens: Arc<dyn TokenStore>) -> Self {
        let mut extract = HandlerList::default();
        extract.register(HandlerDescriptor::new("extract-token", 1000, Arc::new(ExtractToken)));

        let mut validate = HandlerList::default();
        validate.register(HandlerDescriptor::new("validate-caller", 1000, Arc::new(ValidateCaller { applications })));

        let mut prepare = HandlerList::default();
        prepare.register(HandlerDescriptor::new("prepare-authenticate-input", 1000, Arc::new(PrepareAuthenticateInput)));

        let mut authenticate = HandlerList::default();
        authenticate.register(HandlerDescriptor::new(
            "process-authentication",
            1000,
            Arc::new(ProcessAuthenticationHandler { token_store: tokens }),
        ));

        let mut finish = HandlerList::default();
        finish.register(HandlerDescriptor::new("build-introspection-result", 1000, Arc::new(BuildIntrospectionResult)));

        let mut apply = HandlerList::default();
        apply.register(HandlerDescriptor::new("apply-introspection", 1000, Arc::new(ApplyIntrospection)));

        IntrospectionEndpoint { extract, validate, prepare, authenticate, finish, apply }
    }

    pub async fn process(&self, options: Arc<Options>, request: Request) -> Response {
        let mut txn = Transaction::with_options(options);
        txn.request = request;

        let mut extract_ctx = ExtractIntrospectionRequest::new();
        let _ = dispatch(&mut extract_ctx, &self.extract, &mut txn).await;
        if extract_ctx.is_rejected() {
            txn.response.set_rejection(extract_ctx.rejection().unwrap());
            return txn.response;
        }

        let mut validate_ctx = ValidateIntrospectionRequest::new();
        let _ = dispatch(&mut validate_ctx, &self.validate, &mut txn).await;
        if validate_ctx.is_rejected() {
            txn.response.set_rejection(validate_ctx.rejection().unwrap());
            return txn.response;
        }

        let mut prepare_ctx = HandleIntrospectionRequest::new();
        let _ = dispatch(&mut prepare_ctx, &self.prepare, &mut txn).await;

        let mut authenticate_ctx = ProcessAuthentication::new();
        let _ = dispatch(&mut authenticate_ctx, &self.authenticate, &mut txn).await;

        let mut finish_ctx = HandleIntrospectionRequest::new();
        let _ = dispatch(&mut finish_ctx, &self.finish, &mut txn).await;

        let mut apply_ctx = ApplyIntrospectionResponse::new();
        let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;
        txn.response
    }
}
