//! Token endpoint pipeline (§4.5): redeems an authorization code, rotates a refresh
//! token, or issues a client_credentials grant, dispatching on `grant_type`.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::claims::{Principal, TokenType};
use crate::context::signin::{ProcessAuthentication, ProcessSignIn};
use crate::context::token::{ApplyTokenResponse, ExtractTokenRequest, HandleTokenRequest, ValidateTokenRequest};
use crate::context::Context;
use crate::dispatcher::dispatch;
use crate::error::{HostError, ProtocolErrorCode, Rejection};
use crate::message::{Request, Response};
use crate::options::{GrantType, Options};
use crate::registry::{Handler, HandlerDescriptor, HandlerList};
use crate::store::{ApplicationStore, AuthorizationStore, TokenStore};
use crate::transaction::Transaction;

use super::authenticate::{AuthenticateInput, ProcessAuthenticationHandler, PROPERTY_AUTHENTICATE_INPUT};
use super::signin::{ProcessSignInHandler, SignInItem, PROPERTY_SIGN_IN_PLAN};
use super::{PROPERTY_ISSUED_TOKENS, PROPERTY_PRINCIPAL};

fn random_id(len: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

/// Hash a presented client secret the same way a `client_secret_hash` is expected to have
/// been stored, so the two can be compared directly.
fn hash_secret(secret: &str) -> String {
    Sha256::digest(secret.as_bytes()).iter().map(|b| format!("{:02x}", b)).collect()
}

fn grant_type_of(request: &Request) -> Option<GrantType> {
    match request.grant_type()? {
        "authorization_code" => Some(GrantType::AuthorizationCode),
        "refresh_token" => Some(GrantType::RefreshToken),
        "client_credentials" => Some(GrantType::ClientCredentials),
        "password" => Some(GrantType::Password),
        "urn:ietf:params:oauth:grant-type:device_code" => Some(GrantType::DeviceCode),
        _ => None,
    }
}

struct ExtractGrantType;

#[async_trait]
impl Handler<ExtractTokenRequest> for ExtractGrantType {
    async fn handle(&self, ctx: &mut ExtractTokenRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if grant_type_of(&txn.request).is_none() {
            ctx.reject(Rejection::new(ProtocolErrorCode::UnsupportedGrantType));
        }
        Ok(())
    }
}

struct ValidateClientCredentials {
    applications: Arc<dyn ApplicationStore>,
}

#[async_trait]
impl Handler<ValidateTokenRequest> for ValidateClientCredentials {
    async fn handle(&self, ctx: &mut ValidateTokenRequest, txn: &mut Transaction) -> Result<(), HostError> {
        let client_id = match txn.request.client_id() {
            Some(id) => id.to_owned(),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidClient));
                return Ok(());
            }
        };

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

        if application.client_type.requires_secret() {
            let presented = match txn.request.client_secret() {
                Some(secret) => secret,
                None => {
                    ctx.reject(Rejection::new(ProtocolErrorCode::InvalidClient).with_description("client secret required"));
                    return Ok(());
                }
            };
            let matches = application
                .client_secret_hash
                .as_deref()
                .map(|hash| hash == hash_secret(presented))
                .unwrap_or(false);
            if !matches {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidClient).with_description("client secret does not match"));
                return Ok(());
            }
        }

        txn.set_property(super::PROPERTY_APPLICATION, application);
        Ok(())
    }
}

/// Handles `authorization_code`: redeems the code exactly once (§8 invariant 4), checks
/// PKCE if a challenge was recorded against it, then issues access/identity/refresh
/// tokens for the same subject and client.
struct HandleAuthorizationCodeGrant {
    authorizations: Arc<dyn AuthorizationStore>,
}

#[async_trait]
impl Handler<HandleTokenRequest> for HandleAuthorizationCodeGrant {
    async fn handle(&self, ctx: &mut HandleTokenRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if grant_type_of(&txn.request) != Some(GrantType::AuthorizationCode) {
            return Ok(());
        }

        let code = match txn.request.code() {
            Some(code) => code.to_owned(),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("code is required"));
                return Ok(());
            }
        };

        txn.set_property(
            PROPERTY_AUTHENTICATE_INPUT,
            AuthenticateInput {
                token: code.clone(),
                expected_type: TokenType::AuthorizationCode,
            },
        );
        Ok(())
    }
}

/// After `ProcessAuthentication` has resolved the code's principal, verifies PKCE and
/// redeems the code, then sets up the sign-in plan for the tokens this grant issues.
struct FinishAuthorizationCodeGrant {
    tokens: Arc<dyn TokenStore>,
}

#[async_trait]
impl Handler<HandleTokenRequest> for FinishAuthorizationCodeGrant {
    async fn handle(&self, ctx: &mut HandleTokenRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if grant_type_of(&txn.request) != Some(GrantType::AuthorizationCode) {
            return Ok(());
        }
        let code = txn.request.code().unwrap_or_default().to_owned();

        let principal = match txn.property::<Principal>(PROPERTY_PRINCIPAL) {
            Some(principal) => principal.clone(),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidGrant).with_description("code is invalid or expired"));
                return Ok(());
            }
        };

        if let Some(presented) = txn.request.code_verifier() {
            if let Some(challenge) = principal.find_first(crate::claims::claim_types::CODE_CHALLENGE) {
                let method = principal
                    .find_first(crate::claims::claim_types::CODE_CHALLENGE_METHOD)
                    .map(|c| c.value.as_str());
                let expected = pkce_transform(presented, method);
                if expected != challenge.value {
                    ctx.reject(Rejection::new(ProtocolErrorCode::InvalidGrant).with_description("code_verifier does not match"));
                    return Ok(());
                }
            }
        }

        match self.tokens.try_redeem(&code).await {
            Ok(true) => {}
            Ok(false) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidGrant).with_description("code already redeemed"));
                return Ok(());
            }
            Err(_) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                return Ok(());
            }
        }

        let subject = principal.subject().unwrap_or_default();
        let client_id = principal.audiences().into_iter().next().unwrap_or_default();
        let authorization_id = principal.authorization_id();
        let lifetimes = &txn.options.as_ref().expect("options resolved").lifetimes;

        let plan = vec![
            SignInItem {
                token_type: TokenType::AccessToken,
                token_id: format!("at-{}", random_id(32)),
                subject: subject.clone(),
                client_id: client_id.clone(),
                authorization_id: authorization_id.clone(),
                lifetime: lifetimes.access_token,
            },
            SignInItem {
                token_type: TokenType::RefreshToken,
                token_id: format!("rt-{}", random_id(32)),
                subject: subject.clone(),
                client_id: client_id.clone(),
                authorization_id,
                lifetime: lifetimes.refresh_token,
            },
        ];

        let mut issued_principal = Principal::new();
        issued_principal.set_subject(subject);
        issued_principal.set_audiences([client_id]);
        txn.set_property(PROPERTY_PRINCIPAL, issued_principal);
        txn.set_property(PROPERTY_SIGN_IN_PLAN, plan);
        ctx.handle_request();
        Ok(())
    }
}

fn pkce_transform(verifier: &str, method: Option<&str>) -> String {
    match method {
        Some("S256") | None => {
            use sha2::{Digest, Sha256};
            use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
            URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
        }
        Some(_) => verifier.to_owned(),
    }
}

/// Handles `refresh_token`: validates the presented refresh token, applies the rotation
/// policy, and issues a fresh access token (and, when rotation is enabled, a fresh
/// refresh token replacing the old one).
struct HandleRefreshTokenGrant {
    tokens: Arc<dyn TokenStore>,
}

#[async_trait]
impl Handler<HandleTokenRequest> for HandleRefreshTokenGrant {
    async fn handle(&self, ctx: &mut HandleTokenRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if grant_type_of(&txn.request) != Some(GrantType::RefreshToken) {
            return Ok(());
        }

        let token = match txn.request.refresh_token() {
            Some(token) => token.to_owned(),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("refresh_token is required"));
                return Ok(());
            }
        };

        txn.set_property(
            PROPERTY_AUTHENTICATE_INPUT,
            AuthenticateInput {
                token,
                expected_type: TokenType::RefreshToken,
            },
        );
        Ok(())
    }
}

struct FinishRefreshTokenGrant {
    tokens: Arc<dyn TokenStore>,
}

#[async_trait]
impl Handler<HandleTokenRequest> for FinishRefreshTokenGrant {
    async fn handle(&self, ctx: &mut HandleTokenRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if grant_type_of(&txn.request) != Some(GrantType::RefreshToken) {
            return Ok(());
        }

        let presented_token = txn.request.refresh_token().unwrap_or_default().to_owned();
        let principal = match txn.property::<Principal>(PROPERTY_PRINCIPAL) {
            Some(principal) => principal.clone(),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidGrant).with_description("refresh token is invalid or expired"));
                return Ok(());
            }
        };

        let options = txn.options.as_ref().expect("options resolved").clone();
        let subject = principal.subject().unwrap_or_default();
        let client_id = principal.audiences().into_iter().next().unwrap_or_default();
        let authorization_id = principal.authorization_id();

        let mut plan = vec![SignInItem {
            token_type: TokenType::AccessToken,
            token_id: format!("at-{}", random_id(32)),
            subject: subject.clone(),
            client_id: client_id.clone(),
            authorization_id: authorization_id.clone(),
            lifetime: options.lifetimes.access_token,
        }];

        if options.rolling_refresh_tokens {
            if self.tokens.try_redeem(&presented_token).await.unwrap_or(false) {
                plan.push(SignInItem {
                    token_type: TokenType::RefreshToken,
                    token_id: format!("rt-{}", random_id(32)),
                    subject: subject.clone(),
                    client_id: client_id.clone(),
                    authorization_id,
                    lifetime: options.lifetimes.refresh_token,
                });
            } else {
                // §8 invariant 5: reuse of an already-rotated refresh token is a signal of
                // token theft, so every descendant of the authorization it belongs to is
                // revoked along with rejecting this request, not just this one token.
                if let Some(authorization_id) = &authorization_id {
                    if self.tokens.revoke_by_authorization(authorization_id).await.is_err() {
                        ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                        return Ok(());
                    }
                }
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidGrant).with_description("refresh token already rotated"));
                return Ok(());
            }
        }

        let mut issued_principal = Principal::new();
        issued_principal.set_subject(subject);
        issued_principal.set_audiences([client_id]);
        txn.set_property(PROPERTY_PRINCIPAL, issued_principal);
        txn.set_property(PROPERTY_SIGN_IN_PLAN, plan);
        ctx.handle_request();
        Ok(())
    }
}

/// Handles `urn:ietf:params:oauth:grant-type:device_code` (RFC 8628 §3.5): polls the
/// device code's status and reports `authorization_pending`/`expired_token`/`access_denied`
/// until the user has approved it through [`super::verification`].
struct HandleDeviceCodeGrant {
    tokens: Arc<dyn TokenStore>,
}

#[async_trait]
impl Handler<HandleTokenRequest> for HandleDeviceCodeGrant {
    async fn handle(&self, ctx: &mut HandleTokenRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if grant_type_of(&txn.request) != Some(GrantType::DeviceCode) {
            return Ok(());
        }

        let device_code = match txn.request.device_code() {
            Some(code) => code.to_owned(),
            None => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest).with_description("device_code is required"));
                return Ok(());
            }
        };

        let entry = match self.tokens.find_by_id(&device_code).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::ExpiredToken));
                return Ok(());
            }
            Err(_) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                return Ok(());
            }
        };

        if entry.expiration_date <= chrono::Utc::now() {
            ctx.reject(Rejection::new(ProtocolErrorCode::ExpiredToken));
            return Ok(());
        }

        match entry.status {
            crate::store::TokenStatus::Inactive => {
                ctx.reject(Rejection::new(ProtocolErrorCode::AuthorizationPending));
                return Ok(());
            }
            crate::store::TokenStatus::Revoked | crate::store::TokenStatus::Rejected => {
                ctx.reject(Rejection::new(ProtocolErrorCode::AccessDenied));
                return Ok(());
            }
            crate::store::TokenStatus::Redeemed => {
                ctx.reject(Rejection::new(ProtocolErrorCode::InvalidGrant).with_description("device_code already redeemed"));
                return Ok(());
            }
            crate::store::TokenStatus::Valid => {}
        }

        match self.tokens.try_redeem(&device_code).await {
            Ok(true) => {}
            Ok(false) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::SlowDown));
                return Ok(());
            }
            Err(_) => {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                return Ok(());
            }
        }

        let approval = match self.tokens.load_payload(&device_code).await {
            Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            _ => {
                ctx.reject(Rejection::new(ProtocolErrorCode::ServerError));
                return Ok(());
            }
        };
        let mut parts = approval.splitn(2, '\0');
        let subject = parts.next().unwrap_or_default().to_owned();
        let scope = parts.next().unwrap_or_default().to_owned();

        let mut principal = Principal::new();
        principal.set_subject(subject.clone());
        principal.set_audiences([entry.client_id.clone()]);
        principal.set_scopes(scope.split(' ').filter(|s| !s.is_empty()).map(str::to_owned).collect::<Vec<_>>());

        let lifetimes = &txn.options.as_ref().expect("options resolved").lifetimes;
        txn.set_property(PROPERTY_PRINCIPAL, principal);
        txn.set_property(
            PROPERTY_SIGN_IN_PLAN,
            vec![SignInItem {
                token_type: TokenType::AccessToken,
                token_id: format!("at-{}", random_id(32)),
                subject,
                client_id: entry.client_id,
                authorization_id: None,
                lifetime: lifetimes.access_token,
            }],
        );
        ctx.handle_request();
        Ok(())
    }
}

/// Handles `client_credentials`: the client authenticates as its own subject, no user
/// principal is involved (§6.3).
struct HandleClientCredentialsGrant;

#[async_trait]
impl Handler<HandleTokenRequest> for HandleClientCredentialsGrant {
    async fn handle(&self, ctx: &mut HandleTokenRequest, txn: &mut Transaction) -> Result<(), HostError> {
        if grant_type_of(&txn.request) != Some(GrantType::ClientCredentials) {
            return Ok(());
        }
        if ctx.is_rejected() {
            return Ok(());
        }

        let client_id = txn.request.client_id().unwrap_or_default().to_owned();
        let scope = txn.request.scope().unwrap_or_default().to_owned();

        let mut principal = Principal::new();
        principal.set_subject(client_id.clone());
        principal.set_audiences([client_id.clone()]);
        principal.set_scopes(scope.split(' ').filter(|s| !s.is_empty()).map(str::to_owned).collect::<Vec<_>>());

        let lifetimes = &txn.options.as_ref().expect("options resolved").lifetimes;
        txn.set_property(PROPERTY_PRINCIPAL, principal);
        txn.set_property(
            PROPERTY_SIGN_IN_PLAN,
            vec![SignInItem {
                token_type: TokenType::AccessToken,
                token_id: format!("at-{}", random_id(32)),
                subject: client_id.clone(),
                client_id,
                authorization_id: None,
                lifetime: lifetimes.access_token,
            }],
        );
        ctx.handle_request();
        Ok(())
    }
}

struct ApplyToken;

#[async_trait]
impl Handler<ApplyTokenResponse> for ApplyToken {
    async fn handle(&self, _ctx: &mut ApplyTokenResponse, txn: &mut Transaction) -> Result<(), HostError> {
        if let Some(issued) = txn.property::<HashMap<TokenType, String>>(PROPERTY_ISSUED_TOKENS) {
            if let Some(access_token) = issued.get(&TokenType::AccessToken) {
                txn.response.set("access_token", access_token.clone());
                txn.response.set("token_type", "Bearer");
            }
            if let Some(refresh_token) = issued.get(&TokenType::RefreshToken) {
                txn.response.set("refresh_token", refresh_token.clone());
            }
            if let Some(options) = &txn.options {
                txn.response.set("expires_in", options.lifetimes.access_token.num_seconds().to_string());
            }
        }
        Ok(())
    }
}

/// Wires the token endpoint's four phases together and exposes `process`.
///
/// `handle_probe` and `handle` are both `HandleTokenRequest`-keyed lists, split into two
/// because the authorization_code and refresh_token grants need a `ProcessAuthentication`
/// dispatch sandwiched between "recognize which grant this is and note the presented
/// token" (`handle_probe`) and "finish validating and build the sign-in plan" (`handle`).
pub struct TokenEndpoint {
    extract: HandlerList<ExtractTokenRequest>,
    validate: HandlerList<ValidateTokenRequest>,
    handle_probe: HandlerList<HandleTokenRequest>,
    handle: HandlerList<HandleTokenRequest>,
    authenticate: HandlerList<ProcessAuthentication>,
    sign_in: HandlerList<ProcessSignIn>,
    apply: HandlerList<ApplyTokenResponse>,
}

impl TokenEndpoint {
    pub fn new(
        applications: Arc<dyn ApplicationStore>,
        authorizations: Arc<dyn AuthorizationStore>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let mut extract = HandlerList::default();
        extract.register(HandlerDescriptor::new("extract-grant-type", 1000, Arc::new(ExtractGrantType)));

        let mut validate = HandlerList::default();
        validate.register(HandlerDescriptor::new(
            "validate-client-credentials",
            1000,
            Arc::new(ValidateClientCredentials { applications }),
        ));

        let mut handle = HandlerList::default();
        handle.register(HandlerDescriptor::new(
            "handle-authorization-code",
            1000,
            Arc::new(HandleAuthorizationCodeGrant { authorizations }),
        ));
        handle.register(HandlerDescriptor::new(
            "handle-refresh-token",
            1100,
            Arc::new(HandleRefreshTokenGrant { tokens: tokens.clone() }),
        ));

        let mut authenticate = HandlerList::default();
        authenticate.register(HandlerDescriptor::new(
            "process-authentication",
            1000,
            Arc::new(ProcessAuthenticationHandler { token_store: tokens.clone() }),
        ));

        let mut finish = HandlerList::default();
        finish.register(HandlerDescriptor::new(
            "finish-authorization-code",
            1000,
            Arc::new(FinishAuthorizationCodeGrant { tokens: tokens.clone() }),
        ));
        finish.register(HandlerDescriptor::new(
            "finish-refresh-token",
            1100,
            Arc::new(FinishRefreshTokenGrant { tokens: tokens.clone() }),
        ));
        finish.register(HandlerDescriptor::new(
            "handle-client-credentials",
            1200,
            Arc::new(HandleClientCredentialsGrant),
        ));
        finish.register(HandlerDescriptor::new(
            "handle-device-code",
            1300,
            Arc::new(HandleDeviceCodeGrant { tokens: tokens.clone() }),
        ));

        let mut sign_in = HandlerList::default();
        sign_in.register(HandlerDescriptor::new("process-sign-in", 1000, Arc::new(ProcessSignInHandler { token_store: tokens })));

        let mut apply = HandlerList::default();
        apply.register(HandlerDescriptor::new("apply-token", 1000, Arc::new(ApplyToken)));

        TokenEndpoint {
            extract,
            validate,
            handle_probe: handle,
            handle: finish,
            authenticate,
            sign_in,
            apply,
        }
    }

    pub async fn process(&self, options: Arc<Options>, request: Request) -> Response {
        let mut txn = Transaction::with_options(options.clone());
        txn.request = request;

        let mut extract_ctx = ExtractTokenRequest::new();
        let _ = dispatch(&mut extract_ctx, &self.extract, &mut txn).await;

        if extract_ctx.is_rejected() {
            txn.response.set_rejection(extract_ctx.rejection().unwrap());
            return txn.response;
        }

        let grant = grant_type_of(&txn.request);
        if let Some(grant) = grant {
            if !options.supports_grant(grant) {
                txn.response.set_rejection(&Rejection::new(ProtocolErrorCode::UnsupportedGrantType));
                return txn.response;
            }
        }

        let mut validate_ctx = ValidateTokenRequest::new();
        let _ = dispatch(&mut validate_ctx, &self.validate, &mut txn).await;
        if validate_ctx.is_rejected() {
            txn.response.set_rejection(validate_ctx.rejection().unwrap());
            return txn.response;
        }

        let mut probe_ctx = HandleTokenRequest::new();
        let _ = dispatch(&mut probe_ctx, &self.handle_probe, &mut txn).await;
        if probe_ctx.is_rejected() {
            txn.response.set_rejection(probe_ctx.rejection().unwrap());
            return txn.response;
        }

        if matches!(grant, Some(GrantType::AuthorizationCode) | Some(GrantType::RefreshToken)) {
            let mut authenticate_ctx = ProcessAuthentication::new();
            let _ = dispatch(&mut authenticate_ctx, &self.authenticate, &mut txn).await;
        }

        let mut handle_ctx = HandleTokenRequest::new();
        let _ = dispatch(&mut handle_ctx, &self.handle, &mut txn).await;
        if handle_ctx.is_rejected() {
            txn.response.set_rejection(handle_ctx.rejection().unwrap());
            return txn.response;
        }

        let mut sign_in_ctx = ProcessSignIn::new();
        let _ = dispatch(&mut sign_in_ctx, &self.sign_in, &mut txn).await;

        let mut apply_ctx = ApplyTokenResponse::new();
        let _ = dispatch(&mut apply_ctx, &self.apply, &mut txn).await;

        txn.response
    }
}
