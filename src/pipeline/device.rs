//! Device authorization endpoint pipeline (§4.5, RFC 8628): issues a `device_code` /
//! `user_code` pair for a client that cannot perform a browser redirect.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::{Alphanumeric, Uniform};
use rand::Rng;

use crate::claims::TokenType;
use crate::context::device::{ApplyDeviceResponse, ExtractDeviceRequest, HandleDeviceRequest, ValidateDeviceRequest};
use crate::context::Context;
use crate::dispatcher::dispatch;
use crate::error::{HostError, ProtocolErrorCode, Rejection};
use crate::message::{Request, Response};
use crate::options::Options;
use crate::registry::{Handler, HandlerDescriptor, HandlerList};
use crate::store::{ApplicationStore, TokenEntry, TokenStatus, TokenStore};
use crate::transaction::Transaction;

const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ"; // no vowels, avoids accidental words

fn random_device_code() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(40).map(char::from).collect()
}

fn random_user_code() -> String {
    let dist = Uniform::new(0, USER_CODE_ALPHABET.len());
    let mut rng = rand::thread_rng();
    let body: String = (0..8).map(|_| USER_CODE_ALPHABET[rng.sample(dist)] as char).collect();
    format!("{}-{}", &body[0..4], &body[4..8])
}

struct ExtractClient;

#[async_trait]
impl Handler<ExtractDeviceRequest> for ExtractClient {
    async fn handle(&self, ctx: &mut ExtractDeviceRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if txn.request.client_id().is_none() {
            ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("client_id is required"));
        }
        Ok(())
    }
}

struct ValidateClient {
    applications: Arc<dyn ApplicationStore>,
}

#[async_trait]
impl Handler<ValidateDeviceRequest> for ValidateClient {
    async fn handle(&self, ctx: &mut ValidateDeviceRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let client_id = txn.request.client_id().unwrap_or_default();
        match self.applications.find_by_client_id(client_id).await {
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

struct IssueDeviceCode {
    tokens: Arc<dyn TokenStore>,
}

#[async_trait]
impl Handler<HandleDeviceRequest> for IssueDeviceCode {
    async fn handle(&self, ctx: &mut HandleDeviceRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let client_id = txn.request.client_id().unwrap_or_default().to_owned();
        let scope = txn.request.scope().unwrap_or_default().to_owned();
        let options = txn.options.as_ref().expect("options resolved").clone();

        let device_code = random_device_code();
        let user_code = random_user_code();
        let now = Utc::now();
        let expiration = now + options.lifetimes.device_code;

        let device_entry = TokenEntry {
            id: device_code.clone(),
            subject: String::new(),
            client_id: client_id.clone(),
            authorization_id: None,
            token_type: TokenType::DeviceCode,
            status: TokenStatus::Inactive,
            payload_reference: user_code.clone(),
            creation_date: now,
            expiration_date: expiration,
            redemption_date: None,
        };
        let user_entry = TokenEntry {
            id: user_code.clone(),
            subject: String::new(),
            client_id: client_id.clone(),
            authorization_id: None,
            token_type: TokenType::UserCode,
            status: TokenStatus::Inactive,
            payload_reference: device_code.clone(),
            creation_date: now,
            expiration_date: expiration,
            redemption_date: None,
        };

        if self.tokens.create(device_entry).await.is_err() || self.tokens.create(user_entry).await.is_err() {
            ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
            return Ok(());
        }
        if self.tokens.store_payload(&device_code, scope.into_bytes()).await.is_err() {
            ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
            return Ok(());
        }

        txn.set_property("wayfare.device_code", device_code);
        txn.set_property("wayfare.user_code", user_code);
        txn.set_property("wayfare.device_expires_in", expiration.signed_duration_since(now).num_seconds());
        ctx.handle_request();
        Ok(())
    }
}

struct ApplyDeviceCode;

#[async_trait]
impl Handler<ApplyDeviceResponse> for ApplyDeviceCode {
    async fn handle(&self, _ctx: &mut ApplyDeviceResponse, txn: &mut Transaction) -> Result<(), HostError> {
        if let Some(device_code) = txn.property::<String>("wayfare.device_code").cloned() {
            txn.response.set("device_code", device_code);
        }
        if let Some(user_code) = txn.property::<String>("wayfare.user_code").cloned() {
            txn.response.set("user_code", user_code);
        }
        if let Some(expires_in) = txn.property::<i64>("wayfare.device_expires_in") {
            txn.response.set("expires_in", expires_in.to_string());
            txn.response.set("interval", "5");
        }
        if let Some(options) = &txn.options {
            txn.response.set("verification_uri", format!("{}/device", options.issuer));
        }
        Ok(())
    }
}

/// Wires the device authorization endpoint's three phases (it has no `ProcessSignIn`
/// step: the device code is itself the artifact handed back, not a signed token).
pub struct DeviceEndpoint {
    extract: HandlerList<ExtractDeviceRequest>,
    validate: HandlerList<ValidateDeviceRequest>,
    handle: HandlerList<HandleDeviceRequest>,
    apply: HandlerList<ApplyDeviceResponse>,
}

impl DeviceEndpoint {
    pub fn new(applications: Arc<dyn ApplicationStore>, tokens: Arc<dyn TokenStore>) -> Self {
        let mut extract = HandlerList::default();
        extract.register(HandlerDescriptor::new("extract-client", 1000, Arc::new(ExtractClient)));

        let mut validate = HandlerList::default();
        validate.register(HandlerDescriptor::new("validate-client", 1000, Arc::new(ValidateClient { applications })));

        let mut handle = HandlerList::default();
        handle.register(HandlerDescriptor::new("issue-device-code", 1000, Arc::new(IssueDeviceCode { tokens })));

        let mut apply = HandlerList::default();
        apply.register(HandlerDescriptor::new("apply-device-code", 1000, Arc::new(ApplyDeviceCode)));

        DeviceEndpoint { extract, validate, handle, apply }
    }

    pub async fn process(&self, options: Arc<Options>, request: Request) -> Response {
        let mut txn = Transaction::with_options(options);
        txn.request = request;

        let mut extract_ctx = ExtractDeviceRequest::new();
        let _ = dispatch(&mut extract_ctx, &self.extract, &mut txn).await;
        if !extract_ctx.is_rejected() {
            let mut validate_ctx = ValidateDeviceRequest::new();
            let _ = dispatch(&mut validate_ctx, &self.validate, &mut txn).await;
            if !validate_ctx.is_rejected() {
                let mut handle_ctx = HandleDeviceRequest::new();
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

        let mut apply_ctx = ApplyDeviceResponse::new();
        let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;
        txn.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Credential, EndpointKind, GrantType, OptionsBuilder};
    use crate::store::mem::{MemoryApplicationStore, MemoryTokenStore};
    use crate::store::{ApplicationEntry, ClientType};

    #[tokio::test]
    async fn issues_device_and_user_codes() {
        let applications = Arc::new(MemoryApplicationStore::new());
        applications.insert(ApplicationEntry::new("device-client", ClientType::Public));
        let tokens = Arc::new(MemoryTokenStore::new());
        let endpoint = DeviceEndpoint::new(applications, tokens);

        let builder = OptionsBuilder::new()
            .enable_endpoint(EndpointKind::Device)
            .enable_endpoint(EndpointKind::Verification)
            .enable_endpoint(EndpointKind::Token)
            .enable_grant(GrantType::DeviceCode)
            .add_signing_credential(Credential::symmetric(b"super-secret-signing-key-0123456".to_vec()))
            .add_signing_credential(Credential::rsa(vec![1, 2, 3]))
            .add_encryption_credential(Credential::symmetric(b"super-secret-encrypt-key-0123456".to_vec()));
        let options = Arc::new(crate::options::resolve(builder).unwrap());

        let mut request = Request::new();
        request.set("client_id", "device-client");
        let response = endpoint.process(options, request).await;

        assert!(response.get("device_code").is_some());
        assert!(response.get("user_code").is_some());
    }
}
