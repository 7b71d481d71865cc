//! Verification endpoint pipeline (§4.5, RFC 8628 §3.3): where an already-authenticated
//! user enters the `user_code` displayed on their device to approve or deny the pending
//! device authorization.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::context::verification::{
    ApplyVerificationResponse, ExtractVerificationRequest, HandleVerificationRequest, ValidateVerificationRequest,
};
use crate::context::Context;
use crate::dispatcher::dispatch;
use crate::error::{HostError, ProtocolErrorCode, Rejection};
use crate::message::{Request, Response};
use crate::options::Options;
use crate::registry::{Handler, HandlerDescriptor, HandlerList};
use crate::store::{TokenStatus, TokenStore};
use crate::transaction::Transaction;

struct ExtractUserCode;

#[async_trait]
impl Handler<ExtractVerificationRequest> for ExtractUserCode {
    async fn handle(&self, ctx: &mut ExtractVerificationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if txn.request.user_code().is_none() {
            ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("user_code is required"));
        }
        if let Some(subject) = txn.request.authenticated_subject() {
            txn.set_property("wayfare.authenticated_subject", subject.to_owned());
        }
        Ok(())
    }
}

struct ValidateUserCode {
    tokens: Arc<dyn TokenStore>,
}

#[async_trait]
impl Handler<ValidateVerificationRequest> for ValidateUserCode {
    async fn handle(&self, ctx: &mut ValidateVerificationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let user_code = txn.request.user_code().unwrap_or_default().to_owned();
        let entry = match self.tokens.find_by_id(&user_code).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidGrant).with_description("user_code is unknown or expired"));
                return Ok(());
            }
            Err(_) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                return Ok(());
            }
        };
        if entry.status != TokenStatus::Inactive || entry.expiration_date <= Utc::now() {
            ctx.reject(Rejection::new(ProtocolErrorCode::InvalidGrant).with_description("user_code is unknown or expired"));
            return Ok(());
        }
        txn.set_property("wayfare.device_code", entry.payload_reference);
        Ok(())
    }
}

/// Approves or denies the device authorization the `user_code` refers to, per the
/// authenticated subject the host attaches under the well-known property (the same
/// contract [`super::authorization`] uses for its own sign-in precondition).
struct ResolveDeviceAuthorization {
    tokens: Arc<dyn TokenStore>,
}

#[async_trait]
impl Handler<HandleVerificationRequest> for ResolveDeviceAuthorization {
    async fn handle(&self, ctx: &mut HandleVerificationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let device_code = txn.require_property::<String>("wayfare.device_code")?.clone();
        let approved = txn.request.get("approve").map(|v| v == "true").unwrap_or(false);

        if !approved {
            if self.tokens.set_status(&device_code, TokenStatus::Revoked).await.is_err() {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                return Ok(());
            }
            ctx.handle_request();
            return Ok(());
        }

        let subject = match txn.property::<String>("wayfare.authenticated_subject") {
            Some(subject) => subject.clone(),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::AccessDenied).with_description("no authenticated subject"));
                return Ok(());
            }
        };
        let scope_bytes = match self.tokens.load_payload(&device_code).await {
            Ok(Some(bytes)) => bytes,
            _ => Vec::new(),
        };

        if self.tokens.store_payload(&device_code, format!("{}\0{}", subject, String::from_utf8_lossy(&scope_bytes)).into_bytes()).await.is_err()
            || self.tokens.set_status(&device_code, TokenStatus::Valid).await.is_err()
        {
            ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
            return Ok(());
        }

        ctx.handle_request();
        Ok(())
    }
}

struct ApplyVerification;

#[async_trait]
impl Handler<ApplyVerificationResponse> for ApplyVerification {
    async fn handle(&self, ctx: &mut ApplyVerificationResponse, txn: &mut Transaction) -> Result<(), HostError> {
        txn.response.set("status", if ctx.is_request_handled() { "approved" } else { "rejected" });
        Ok(())
    }
}

/// Wires the verification endpoint's four phases together.
pub struct VerificationEndpoint {
    extract: HandlerList<ExtractVerificationRequest>,
    validate: HandlerList<ValidateVerificationRequest>,
    handle: HandlerList<HandleVerificationRequest>,
    apply: HandlerList<ApplyVerificationResponse>,
}

impl VerificationEndpoint {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        let mut extract = HandlerList::default();
        extract.register(HandlerDescriptor::new("extract-user-code", 1000, Arc::new(ExtractUserCode)));

        let mut validate = HandlerList::default();
        validate.register(HandlerDescriptor::new(
            "validate-user-code",
            1000,
            Arc::new(ValidateUserCode { tokens: tokens.clone() }),
        ));

        let mut handle = HandlerList::default();
        handle.register(HandlerDescriptor::new(
            "resolve-device-authorization",
            1000,
            Arc::new(ResolveDeviceAuthorization { tokens }),
        ));

        let mut apply = HandlerList::default();
        apply.register(HandlerDescriptor::new("apply-verification", 1000, Arc::new(ApplyVerification)));

        VerificationEndpoint { extract, validate, handle, apply }
    }

    pub async fn process(&self, options: Arc<Options>, request: Request) -> Response {
        let mut txn = Transaction::with_options(options);
        txn.request = request;

        let mut extract_ctx = ExtractVerificationRequest::new();
        let _ = dispatch(&mut extract_ctx, &self.extract, &mut txn).await;
        if !extract_ctx.is_rejected() {
            let mut validate_ctx = ValidateVerificationRequest::new();
            let _ = dispatch(&mut validate_ctx, &self.validate, &mut txn).await;
            if !validate_ctx.is_rejected() {
                let mut handle_ctx = HandleVerificationRequest::new();
                let _ = dispatch(&mut handle_ctx, &self.handle, &mut txn).await;
                if handle_ctx.is_rejected() {
                    txn.response.set_rejection(handle_ctx.rejection().unwrap());
                }
                let mut apply_ctx = ApplyVerificationResponse::new();
                if handle_ctx.is_request_handled() {
                    apply_ctx.handle_request();
                }
                let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;
                return txn.response;
            }
            txn.response.set_rejection(validate_ctx.rejection().unwrap());
        } else {
            txn.response.set_rejection(extract_ctx.rejection().unwrap());
        }

        let mut apply_ctx = ApplyVerificationResponse::new();
        let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;
        txn.response
    }
}
