//! Discovery endpoint pipeline (§4.5, OIDC Discovery): serves the
//! `.well-known/openid-configuration` document describing what this deployment's
//! resolved [`crate::options::Options`] actually supports.
//!
//! Unlike every other endpoint, discovery's body is a single JSON document rather than a
//! flat parameter set, so the built-in Apply handler serializes it into the response
//! under the conventional `body` key (with `content_type` set alongside it) for the host
//! to write out verbatim.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::context::discovery::{ApplyConfigurationResponse, HandleConfigurationRequest};
use crate::context::Context;
use crate::dispatcher::dispatch;
use crate::error::HostError;
use crate::message::{Request, Response};
use crate::options::{EndpointKind, Options};
use crate::registry::{Handler, HandlerDescriptor, HandlerList};
use crate::transaction::Transaction;

fn endpoint_path(issuer: &str, endpoint: EndpointKind) -> String {
    let suffix = match endpoint {
        EndpointKind::Authorization => "authorize",
        EndpointKind::Token => "token",
        EndpointKind::Device => "device_authorization",
        EndpointKind::Verification => "device",
        EndpointKind::Introspection => "introspect",
        EndpointKind::Revocation => "revoke",
        EndpointKind::Userinfo => "userinfo",
        EndpointKind::Configuration => ".well-known/openid-configuration",
        EndpointKind::Cryptography => "jwks.json",
        EndpointKind::Logout => "logout",
    };
    format!("{}/{}", issuer.trim_end_matches('/'), suffix)
}

struct BuildDiscoveryDocument;

#[async_trait]
impl Handler<HandleConfigurationRequest> for BuildDiscoveryDocument {
    async fn handle(&self, ctx: &mut HandleConfigurationRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let options = txn
            .options
            .clone()
            .ok_or(HostError::MissingTransactionProperty("options"))?;

        let mut document = serde_json::Map::new();
        document.insert("issuer".into(), json!(options.issuer));

        if options.supports_endpoint(EndpointKind::Authorization) {
            document.insert("authorization_endpoint".into(), json!(endpoint_path(&options.issuer, EndpointKind::Authorization)));
        }
        if options.supports_endpoint(EndpointKind::Token) {
            document.insert("token_endpoint".into(), json!(endpoint_path(&options.issuer, EndpointKind::Token)));
        }
        if options.supports_endpoint(EndpointKind::Device) {
            document.insert(
                "device_authorization_endpoint".into(),
                json!(endpoint_path(&options.issuer, EndpointKind::Device)),
            );
        }
        if options.supports_endpoint(EndpointKind::Introspection) {
            document.insert("introspection_endpoint".into(), json!(endpoint_path(&options.issuer, EndpointKind::Introspection)));
        }
        if options.supports_endpoint(EndpointKind::Revocation) {
            document.insert("revocation_endpoint".into(), json!(endpoint_path(&options.issuer, EndpointKind::Revocation)));
        }
        if options.supports_endpoint(EndpointKind::Userinfo) {
            document.insert("userinfo_endpoint".into(), json!(endpoint_path(&options.issuer, EndpointKind::Userinfo)));
        }
        if options.supports_endpoint(EndpointKind::Logout) {
            document.insert("end_session_endpoint".into(), json!(endpoint_path(&options.issuer, EndpointKind::Logout)));
        }
        if options.supports_endpoint(EndpointKind::Cryptography) {
            document.insert("jwks_uri".into(), json!(endpoint_path(&options.issuer, EndpointKind::Cryptography)));
        }

        document.insert(
            "grant_types_supported".into(),
            json!(options.enabled_grants.iter().map(|g| g.as_str()).collect::<Vec<_>>()),
        );
        document.insert(
            "response_types_supported".into(),
            json!(options
                .supported_response_types
                .iter()
                .map(|combo| combo.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(" "))
                .collect::<Vec<_>>()),
        );
        document.insert(
            "response_modes_supported".into(),
            json!(options.supported_response_modes.iter().map(|m| m.as_str()).collect::<Vec<_>>()),
        );
        document.insert(
            "scopes_supported".into(),
            json!(options.supported_scopes.iter().cloned().collect::<Vec<_>>()),
        );
        document.insert("subject_types_supported".into(), json!(["public"]));
        document.insert("id_token_signing_alg_values_supported".into(), json!(["HS256", "RS256", "ES256"]));
        document.insert("code_challenge_methods_supported".into(), json!(["S256", "plain"]));
        document.insert("token_endpoint_auth_methods_supported".into(), json!(["client_secret_post", "client_secret_basic"]));

        txn.set_property("wayfare.discovery_document", serde_json::Value::Object(document));
        ctx.handle_request();
        Ok(())
    }
}

struct ApplyDiscovery;

#[async_trait]
impl Handler<ApplyConfigurationResponse> for ApplyDiscovery {
    async fn handle(&self, _ctx: &mut ApplyConfigurationResponse, txn: &mut Transaction) -> Result<(), HostError> {
        if let Some(document) = txn.property::<serde_json::Value>("wayfare.discovery_document") {
            txn.response.set("body", document.to_string());
            txn.response.set("content_type", "application/json");
        }
        Ok(())
    }
}

/// Wires the discovery endpoint's three phases together (it has no Validate phase: the
/// request carries no parameters to validate).
pub struct DiscoveryEndpoint {
    handle: HandlerList<HandleConfigurationRequest>,
    apply: HandlerList<ApplyConfigurationResponse>,
}

impl DiscoveryEndpoint {
    pub fn new() -> Self {
        let mut handle = HandlerList::default();
        handle.register(HandlerDescriptor::new("build-discovery-document", 1000, Arc::new(BuildDiscoveryDocument)));

        let mut apply = HandlerList::default();
        apply.register(HandlerDescriptor::new("apply-discovery", 1000, Arc::new(ApplyDiscovery)));

        DiscoveryEndpoint { handle, apply }
    }

    pub async fn process(&self, options: Arc<Options>, request: Request) -> Response {
        let mut txn = Transaction::with_options(options);
        txn.request = request;

        let mut handle_ctx = HandleConfigurationRequest::new();
        let _ = dispatch(&mut handle_ctx, &self.handle, &mut txn).await;
        if handle_ctx.is_rejected() {
            txn.response.set_rejection(handle_ctx.rejection().unwrap());
        }

        let mut apply_ctx = ApplyConfigurationResponse::new();
        let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;
        txn.response
    }
}

impl Default for DiscoveryEndpoint {
    fn default() -> Self {
        Self::new()
    }
}
