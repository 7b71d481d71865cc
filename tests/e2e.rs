//! End-to-end scenario tests driving the built-in endpoint pipelines together through
//! the in-memory stores, covering the §8 end-to-end scenarios (S1-S4).
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

use wayfare_oidc::message::Request;
use wayfare_oidc::options::{resolve, Credential, EndpointKind, GrantType, OptionsBuilder, Options};
use wayfare_oidc::pipeline::authorization::AuthorizationEndpoint;
use wayfare_oidc::pipeline::device::DeviceEndpoint;
use wayfare_oidc::pipeline::introspection::IntrospectionEndpoint;
use wayfare_oidc::pipeline::token::TokenEndpoint;
use wayfare_oidc::pipeline::verification::VerificationEndpoint;
use wayfare_oidc::store::mem::{MemoryApplicationStore, MemoryAuthorizationStore, MemoryTokenStore};
use wayfare_oidc::store::{ApplicationEntry, ClientType};

fn base_builder() -> OptionsBuilder {
    OptionsBuilder::new()
        .issuer("https://as.example")
        .enable_endpoint(EndpointKind::Authorization)
        .enable_endpoint(EndpointKind::Token)
        .enable_endpoint(EndpointKind::Device)
        .enable_endpoint(EndpointKind::Verification)
        .enable_endpoint(EndpointKind::Introspection)
        .enable_grant(GrantType::AuthorizationCode)
        .enable_grant(GrantType::RefreshToken)
        .enable_grant(GrantType::DeviceCode)
        .add_scope("openid")
        .add_scope("profile")
        .add_signing_credential(Credential::symmetric(b"super-secret-signing-key-0123456".to_vec()))
        .add_signing_credential(Credential::rsa(vec![1, 2, 3]))
        .add_encryption_credential(Credential::symmetric(b"super-secret-encrypt-key-0123456".to_vec()))
}

fn resolved(builder: OptionsBuilder) -> Arc<Options> {
    Arc::new(resolve(builder).expect("options resolve"))
}

struct Harness {
    authorizations: Arc<MemoryAuthorizationStore>,
    tokens: Arc<MemoryTokenStore>,
    authorization_endpoint: AuthorizationEndpoint,
    token_endpoint: TokenEndpoint,
    device_endpoint: DeviceEndpoint,
    verification_endpoint: VerificationEndpoint,
    introspection_endpoint: IntrospectionEndpoint,
}

impl Harness {
    fn new() -> Self {
        let applications = Arc::new(MemoryApplicationStore::new());
        let authorizations = Arc::new(MemoryAuthorizationStore::new());
        let tokens = Arc::new(MemoryTokenStore::new());

        let mut client = ApplicationEntry::new("client-1", ClientType::Public);
        client.redirect_uris.insert("https://client-1.example/cb".into());
        applications.insert(client);

        let authorization_endpoint = AuthorizationEndpoint::new(applications.clone(), authorizations.clone(), tokens.clone());
        let token_endpoint = TokenEndpoint::new(applications.clone(), authorizations.clone(), tokens.clone());
        let device_endpoint = DeviceEndpoint::new(applications.clone(), tokens.clone());
        let verification_endpoint = VerificationEndpoint::new(tokens.clone());
        let introspection_endpoint = IntrospectionEndpoint::new(applications, tokens.clone());

        Harness {
            authorizations,
            tokens,
            authorization_endpoint,
            token_endpoint,
            device_endpoint,
            verification_endpoint,
            introspection_endpoint,
        }
    }
}

#[tokio::test]
async fn s1_authorization_code_with_pkce_round_trips_and_rejects_replay() {
    let harness = Harness::new();
    let options = resolved(base_builder());

    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

    let mut authorize_request = Request::new();
    authorize_request.set("client_id", "client-1");
    authorize_request.set("response_type", "code");
    authorize_request.set("redirect_uri", "https://client-1.example/cb");
    authorize_request.set("scope", "openid profile");
    authorize_request.set("code_challenge", challenge);
    authorize_request.set("code_challenge_method", "S256");
    authorize_request.set("authenticated_subject", "alice");

    let authorize_response = harness.authorization_endpoint.process(options.clone(), authorize_request).await;
    let code = authorize_response.get("code").expect("authorization code issued").to_owned();
    assert!(authorize_response.get("error").is_none());

    let mut token_request = Request::new();
    token_request.set("grant_type", "authorization_code");
    token_request.set("code", code.clone());
    token_request.set("redirect_uri", "https://client-1.example/cb");
    token_request.set("code_verifier", verifier);
    token_request.set("client_id", "client-1");

    let token_response = harness.token_endpoint.process(options.clone(), token_request.clone()).await;
    assert!(token_response.get("access_token").is_some(), "{:?}", token_response);
    assert_eq!(token_response.get("token_type"), Some("Bearer"));
    assert!(token_response.get("refresh_token").is_some());

    // §8 invariant 4: redeeming the same code a second time must fail, never succeed again.
    let replay_response = harness.token_endpoint.process(options, token_request).await;
    assert_eq!(replay_response.get("error"), Some("invalid_grant"));
    assert!(replay_response.get("access_token").is_none());
}

#[tokio::test]
async fn s1_wrong_pkce_verifier_is_rejected() {
    let harness = Harness::new();
    let options = resolved(base_builder());

    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(b"correct-verifier"));

    let mut authorize_request = Request::new();
    authorize_request.set("client_id", "client-1");
    authorize_request.set("response_type", "code");
    authorize_request.set("redirect_uri", "https://client-1.example/cb");
    authorize_request.set("code_challenge", challenge);
    authorize_request.set("code_challenge_method", "S256");
    authorize_request.set("authenticated_subject", "alice");

    let authorize_response = harness.authorization_endpoint.process(options.clone(), authorize_request).await;
    let code = authorize_response.get("code").expect("authorization code issued").to_owned();

    let mut token_request = Request::new();
    token_request.set("grant_type", "authorization_code");
    token_request.set("code", code);
    token_request.set("redirect_uri", "https://client-1.example/cb");
    token_request.set("code_verifier", "wrong-verifier");
    token_request.set("client_id", "client-1");

    let token_response = harness.token_endpoint.process(options, token_request).await;
    assert_eq!(token_response.get("error"), Some("invalid_grant"));
}

#[tokio::test]
async fn s2_rolling_refresh_tokens_rotate_and_reject_reuse() {
    let harness = Harness::new();
    let rolling_options = resolved({
        let mut builder = base_builder();
        builder.rolling_refresh_tokens = true;
        builder
    });

    let mut authorize_request = Request::new();
    authorize_request.set("client_id", "client-1");
    authorize_request.set("response_type", "code");
    authorize_request.set("redirect_uri", "https://client-1.example/cb");
    authorize_request.set("authenticated_subject", "alice");

    let authorize_response = harness
        .authorization_endpoint
        .process(rolling_options.clone(), authorize_request)
        .await;
    let code = authorize_response.get("code").expect("code issued").to_owned();

    let mut token_request = Request::new();
    token_request.set("grant_type", "authorization_code");
    token_request.set("code", code);
    token_request.set("redirect_uri", "https://client-1.example/cb");
    token_request.set("client_id", "client-1");

    let first = harness.token_endpoint.process(rolling_options.clone(), token_request).await;
    let refresh_token_1 = first.get("refresh_token").expect("refresh token issued").to_owned();

    let mut refresh_request_1 = Request::new();
    refresh_request_1.set("grant_type", "refresh_token");
    refresh_request_1.set("refresh_token", refresh_token_1.clone());
    refresh_request_1.set("client_id", "client-1");

    let second = harness
        .token_endpoint
        .process(rolling_options.clone(), refresh_request_1.clone())
        .await;
    let refresh_token_2 = second.get("refresh_token").expect("rotated refresh token issued").to_owned();
    assert_ne!(refresh_token_1, refresh_token_2);

    let mut refresh_request_2 = Request::new();
    refresh_request_2.set("grant_type", "refresh_token");
    refresh_request_2.set("refresh_token", refresh_token_2.clone());
    refresh_request_2.set("client_id", "client-1");

    let third = harness.token_endpoint.process(rolling_options.clone(), refresh_request_2).await;
    let refresh_token_3 = third.get("refresh_token").expect("rotated again").to_owned();
    assert_ne!(refresh_token_2, refresh_token_3);
    assert_ne!(refresh_token_1, refresh_token_3);

    // Reusing the first, already-rotated refresh token must fail.
    let reuse = harness.token_endpoint.process(rolling_options, refresh_request_1).await;
    assert_eq!(reuse.get("error"), Some("invalid_grant"));
}

#[tokio::test]
async fn s3_device_flow_polls_pending_then_succeeds() {
    let harness = Harness::new();
    let options = resolved(base_builder());

    let mut device_request = Request::new();
    device_request.set("client_id", "client-1");
    device_request.set("scope", "openid");
    let device_response = harness.device_endpoint.process(options.clone(), device_request).await;

    let device_code = device_response.get("device_code").expect("device_code issued").to_owned();
    let user_code = device_response.get("user_code").expect("user_code issued").to_owned();
    assert!(device_response.get("verification_uri").is_some());
    assert!(device_response.get("interval").is_some());

    let mut poll_request = Request::new();
    poll_request.set("grant_type", "urn:ietf:params:oauth:grant-type:device_code");
    poll_request.set("device_code", device_code.clone());
    let pending = harness.token_endpoint.process(options.clone(), poll_request.clone()).await;
    assert_eq!(pending.get("error"), Some("authorization_pending"));

    let mut verify_request = Request::new();
    verify_request.set("user_code", user_code);
    verify_request.set("authenticated_subject", "bob");
    verify_request.set("approve", "true");
    let verify_response = harness.verification_endpoint.process(options.clone(), verify_request).await;
    assert_eq!(verify_response.get("status"), Some("approved"));

    let approved = harness.token_endpoint.process(options, poll_request).await;
    assert!(approved.get("access_token").is_some(), "{:?}", approved);
}

#[tokio::test]
async fn s3_device_flow_denied_reports_access_denied() {
    let harness = Harness::new();
    let options = resolved(base_builder());

    let mut device_request = Request::new();
    device_request.set("client_id", "client-1");
    let device_response = harness.device_endpoint.process(options.clone(), device_request).await;
    let device_code = device_response.get("device_code").unwrap().to_owned();
    let user_code = device_response.get("user_code").unwrap().to_owned();

    let mut verify_request = Request::new();
    verify_request.set("user_code", user_code);
    verify_request.set("authenticated_subject", "bob");
    verify_request.set("approve", "false");
    let verify_response = harness.verification_endpoint.process(options.clone(), verify_request).await;
    assert_eq!(verify_response.get("status"), Some("rejected"));

    let mut poll_request = Request::new();
    poll_request.set("grant_type", "urn:ietf:params:oauth:grant-type:device_code");
    poll_request.set("device_code", device_code);
    let denied = harness.token_endpoint.process(options, poll_request).await;
    assert_eq!(denied.get("error"), Some("access_denied"));
}

#[tokio::test]
async fn s4_introspection_reports_inactive_for_unknown_and_revoked_tokens() {
    let harness = Harness::new();
    let options = resolved(base_builder());

    let mut unknown_request = Request::new();
    unknown_request.set("token", "never-issued-token");
    unknown_request.set("client_id", "client-1");
    let unknown_response = harness.introspection_endpoint.process(options.clone(), unknown_request).await;
    assert_eq!(unknown_response.get("active"), Some("false"));

    let mut authorize_request = Request::new();
    authorize_request.set("client_id", "client-1");
    authorize_request.set("response_type", "code");
    authorize_request.set("redirect_uri", "https://client-1.example/cb");
    authorize_request.set("authenticated_subject", "alice");
    let authorize_response = harness.authorization_endpoint.process(options.clone(), authorize_request).await;
    let code = authorize_response.get("code").unwrap().to_owned();

    let mut token_request = Request::new();
    token_request.set("grant_type", "authorization_code");
    token_request.set("code", code);
    token_request.set("redirect_uri", "https://client-1.example/cb");
    token_request.set("client_id", "client-1");
    let token_response = harness.token_endpoint.process(options.clone(), token_request).await;
    let access_token = token_response.get("access_token").unwrap().to_owned();

    let mut active_request = Request::new();
    active_request.set("token", access_token.clone());
    active_request.set("client_id", "client-1");
    let active_response = harness.introspection_endpoint.process(options.clone(), active_request).await;
    assert_eq!(active_response.get("active"), Some("true"));
    assert_eq!(active_response.get("sub"), Some("alice"));

    // Revoke the backing authorization: cascades to every token issued under it (§8
    // invariant 5), so the access token must introspect as inactive afterwards.
    let authorization_id = harness
        .authorizations
        .find_valid_for("alice", "client-1")
        .await
        .unwrap()
        .map(|entry| entry.id);
    if let Some(authorization_id) = authorization_id {
        harness.tokens.revoke_by_authorization(&authorization_id).await.unwrap();
    }

    let mut revoked_request = Request::new();
    revoked_request.set("token", access_token);
    revoked_request.set("client_id", "client-1");
    let revoked_response = harness.introspection_endpoint.process(options, revoked_request).await;
    assert_eq!(revoked_response.get("active"), Some("false"));
}
