//! Cryptography endpoint pipeline (§4.5): serves the JWKS document advertising the
//! deployment's currently-valid signing credentials, keyed by the same `kid` values
//! [`super::crypto`] stamps onto issued JWTs.
//!
//! Symmetric credentials are deliberately never published here — an HMAC secret is a
//! shared secret, not a public key, and exposing it would defeat its purpose. Only
//! asymmetric credentials (X.509, bare RSA, bare ECDSA) appear in the JWKS.
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::json;

use crate::context::cryptography::{ApplyCryptographyResponse, HandleCryptographyRequest};
use crate::context::Context;
use crate::dispatcher::dispatch;
use crate::error::HostError;
use crate::message::{Request, Response};
use crate::options::credentials::CredentialMaterial;
use crate::options::Options;
use crate::registry::{Handler, HandlerDescriptor, HandlerList};
use crate::transaction::Transaction;

fn jwk_for(credential: &crate::options::Credential) -> Option<serde_json::Value> {
    let kid = credential.key_id.clone().unwrap_or_else(|| credential.derive_key_id());
    match &credential.material {
        CredentialMaterial::Symmetric { .. } => None,
        CredentialMaterial::X509 { certificate_thumbprint, .. } => Some(json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "x5t": URL_SAFE_NO_PAD.encode(certificate_thumbprint),
        })),
        CredentialMaterial::Rsa { modulus, .. } => Some(json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": URL_SAFE_NO_PAD.encode(modulus),
            "e": URL_SAFE_NO_PAD.encode([0x01, 0x00, 0x01]),
        })),
        CredentialMaterial::Ecdsa { x, .. } => Some(json!({
            "kty": "EC",
            "use": "sig",
            "alg": "ES256",
            "crv": "P-256",
            "kid": kid,
            "x": URL_SAFE_NO_PAD.encode(x),
        })),
    }
}

struct BuildJwks;

#[async_trait]
impl Handler<HandleCryptographyRequest> for BuildJwks {
    async fn handle(&self, ctx: &mut HandleCryptographyRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let options = txn
            .options
            .clone()
            .ok_or(HostError::MissingTransactionProperty("options"))?;

        let keys: Vec<serde_json::Value> = options.signing_credentials.iter().filter_map(jwk_for).collect();
        txn.set_property("wayfare.jwks_document", json!({ "keys": keys }));
        ctx.handle_request();
        Ok(())
    }
}

struct ApplyJwks;

#[async_trait]
impl Handler<ApplyCryptographyResponse> for ApplyJwks {
    async fn handle(&self, _ctx: &mut ApplyCryptographyResponse, txn: &mut Transaction) -> Result<(), HostError> {
        if let Some(document) = txn.property::<serde_json::Value>("wayfare.jwks_document") {
            txn.response.set("body", document.to_string());
            txn.response.set("content_type", "application/json");
        }
        Ok(())
    }
}

/// Wires the JWKS endpoint's two phases together (no Extract/Validate: the request
/// carries no parameters).
pub struct CryptographyEndpoint {
    handle: HandlerList<HandleCryptographyRequest>,
    apply: HandlerList<ApplyCryptographyResponse>,
}

impl CryptographyEndpoint {
    pub fn new() -> Self {
        let mut handle = HandlerList::default();
        handle.register(HandlerDescriptor::new("build-jwks", 1000, Arc::new(BuildJwks)));

        let mut apply = HandlerList::default();
        apply.register(HandlerDescriptor::new("apply-jwks", 1000, Arc::new(ApplyJwks)));

        CryptographyEndpoint { handle, apply }
    }

    pub async fn process(&self, options: Arc<Options>, request: Request) -> Response {
        let mut txn = Transaction::with_options(options);
        txn.request = request;

        let mut handle_ctx = HandleCryptographyRequest::new();
        let _ = dispatch(&mut handle_ctx, &self.handle, &mut txn).await;

        let mut apply_ctx = ApplyCryptographyResponse::new();
        let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;
        txn.response
    }
}

impl Default for CryptographyEndpoint {
    fn default() -> Self {
        Self::new()
    }
}
