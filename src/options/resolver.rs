//! The pure configuration resolver (§4.4): turns an [`OptionsBuilder`] into a validated,
//! immutable [`Options`], or a [`ConfigError`] naming the first inconsistency found.
//!
//! Steps run in a fixed order because later steps assume earlier ones already hold (e.g.
//! precedence sorting assumes the credential-set validity checks already passed), matching
//! how the resolution algorithm is laid out.
use std::collections::BTreeSet;

use chrono::Utc;

use crate::error::ConfigError;

use super::credentials;
use super::{EndpointKind, GrantType, Options, OptionsBuilder, ResponseMode, ResponseType};

fn required_endpoints(grant: GrantType) -> &'static [EndpointKind] {
    match grant {
        GrantType::AuthorizationCode => &[EndpointKind::Authorization, EndpointKind::Token],
        GrantType::Implicit => &[EndpointKind::Authorization],
        GrantType::ClientCredentials => &[EndpointKind::Token],
        GrantType::Password => &[EndpointKind::Token],
        GrantType::RefreshToken => &[EndpointKind::Token],
        GrantType::DeviceCode => &[EndpointKind::Device, EndpointKind::Verification, EndpointKind::Token],
    }
}

fn endpoint_name(endpoint: EndpointKind) -> &'static str {
    match endpoint {
        EndpointKind::Authorization => "authorization",
        EndpointKind::Token => "token",
        EndpointKind::Device => "device",
        EndpointKind::Verification => "verification",
        EndpointKind::Introspection => "introspection",
        EndpointKind::Revocation => "revocation",
        EndpointKind::Userinfo => "userinfo",
        EndpointKind::Configuration => "configuration",
        EndpointKind::Cryptography => "cryptography",
        EndpointKind::Logout => "logout",
    }
}

/// Resolve an [`OptionsBuilder`] into validated, immutable [`Options`] (§4.4 steps 1-8).
pub fn resolve(mut builder: OptionsBuilder) -> Result<Options, ConfigError> {
    let now = Utc::now();

    // Step 1: degraded mode forces server-side storage off regardless of what the
    // operator set, since a degraded deployment has nowhere to store it.
    if builder.degraded_mode {
        builder.disable_token_storage = true;
        builder.disable_reference_tokens = true;
    }

    // Step 2: every enabled grant must have its required endpoints enabled, unless the
    // operator opted out of the permission matrix entirely.
    if !builder.ignore_grant_type_permissions && !builder.ignore_endpoint_permissions {
        for &grant in &builder.enabled_grants {
            for &endpoint in required_endpoints(grant) {
                if !builder.enabled_endpoints.contains(&endpoint) {
                    return Err(ConfigError::MissingEndpointForGrant(grant.as_str(), endpoint_name(endpoint)));
                }
            }
        }
    }

    if builder.enabled_grants.is_empty() && !builder.ignore_grant_type_permissions {
        return Err(ConfigError::NoGrantsEnabled);
    }

    // Step 3: credential-set validation. Signing needs at least one asymmetric and one
    // currently-valid credential; encryption needs at least one currently-valid one.
    if builder.signing_credentials.is_empty() {
        return Err(ConfigError::NoSigningCredential);
    }
    if !credentials::has_asymmetric(&builder.signing_credentials) {
        return Err(ConfigError::NoAsymmetricSigningCredential);
    }
    if !credentials::has_currently_valid(&builder.signing_credentials, now) {
        return Err(ConfigError::NoValidSigningCredential);
    }
    if builder.encryption_credentials.is_empty() {
        return Err(ConfigError::NoEncryptionCredential);
    }
    if !credentials::has_currently_valid(&builder.encryption_credentials, now) {
        return Err(ConfigError::NoValidEncryptionCredential);
    }

    // Step 4: disabling storage without disabling reference tokens (which require
    // storage to resolve) or without a coherent refresh policy is a contradiction.
    if builder.disable_token_storage {
        let refresh_policy_coherent = builder.rolling_refresh_tokens || builder.disable_sliding_refresh_expiration;
        if !builder.disable_reference_tokens || !refresh_policy_coherent {
            return Err(ConfigError::InconsistentRefreshPolicyWithoutStorage);
        }
    }

    // Step 5: degraded mode requires a custom validator for every enabled endpoint, since
    // there is no server-side store to validate against by default.
    if builder.degraded_mode {
        for &endpoint in &builder.enabled_endpoints {
            if !builder.custom_validators.contains(&endpoint) {
                return Err(ConfigError::DegradedModeMissingValidator(endpoint_name(endpoint)));
            }
        }
        if builder.enabled_grants.contains(&GrantType::DeviceCode)
            && !(builder.has_custom_device_authentication_handler && builder.has_custom_device_sign_in_handler)
        {
            return Err(ConfigError::DegradedModeMissingDeviceHandlers);
        }
    }

    // Step 6: sort both credential sets by precedence so downstream signing/encryption
    // logic can always take the first entry as "the" active credential.
    credentials::sort_by_precedence(&mut builder.signing_credentials, now);
    credentials::sort_by_precedence(&mut builder.encryption_credentials, now);

    // Step 7: derive supported response types, response modes and scopes from the
    // enabled grants and operator-declared scope set.
    let has_auth_code = builder.enabled_grants.contains(&GrantType::AuthorizationCode);
    let has_implicit = builder.enabled_grants.contains(&GrantType::Implicit);

    let mut supported_response_types: Vec<BTreeSet<ResponseType>> = Vec::new();
    if has_auth_code {
        supported_response_types.push([ResponseType::Code].into_iter().collect());
    }
    if has_implicit {
        supported_response_types.push([ResponseType::Token].into_iter().collect());
        supported_response_types.push([ResponseType::IdToken].into_iter().collect());
        supported_response_types.push([ResponseType::Token, ResponseType::IdToken].into_iter().collect());
    }
    if has_auth_code && has_implicit {
        supported_response_types.push([ResponseType::Code, ResponseType::Token].into_iter().collect());
        supported_response_types.push([ResponseType::Code, ResponseType::IdToken].into_iter().collect());
        supported_response_types.push([ResponseType::Code, ResponseType::Token, ResponseType::IdToken].into_iter().collect());
    }

    // Response modes: form_post and fragment are offered whenever any response type is
    // enabled at all; query is additionally offered once `code` is among them.
    let mut supported_response_modes: BTreeSet<ResponseMode> = BTreeSet::new();
    if !supported_response_types.is_empty() {
        supported_response_modes.insert(ResponseMode::FormPost);
        supported_response_modes.insert(ResponseMode::Fragment);
    }
    if has_auth_code {
        supported_response_modes.insert(ResponseMode::Query);
    }

    // `offline_access` is implied by the refresh grant, independent of whatever scopes
    // the operator declared explicitly.
    let mut supported_scopes: BTreeSet<String> = builder.scopes.clone();
    if builder.enabled_grants.contains(&GrantType::RefreshToken) {
        supported_scopes.insert("offline_access".to_owned());
    }

    // Step 8: assign a key id to every credential that arrived without one.
    for credential in builder.signing_credentials.iter_mut().chain(builder.encryption_credentials.iter_mut()) {
        credential.ensure_key_id();
    }

    Ok(Options {
        issuer: builder.issuer.unwrap_or_default(),
        enabled_endpoints: builder.enabled_endpoints,
        enabled_grants: builder.enabled_grants,
        supported_response_types,
        supported_response_modes,
        supported_scopes,
        signing_credentials: builder.signing_credentials,
        encryption_credentials: builder.encryption_credentials,
        lifetimes: builder.lifetimes.unwrap_or_default(),
        degraded_mode: builder.degraded_mode,
        disable_token_storage: builder.disable_token_storage,
        disable_reference_tokens: builder.disable_reference_tokens,
        rolling_refresh_tokens: builder.rolling_refresh_tokens,
        disable_sliding_refresh_expiration: builder.disable_sliding_refresh_expiration,
        ignore_endpoint_permissions: builder.ignore_endpoint_permissions,
        ignore_grant_type_permissions: builder.ignore_grant_type_permissions,
        ignore_scope_permissions: builder.ignore_scope_permissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Credential;

    fn valid_builder() -> OptionsBuilder {
        OptionsBuilder::new()
            .enable_endpoint(EndpointKind::Authorization)
            .enable_endpoint(EndpointKind::Token)
            .enable_grant(GrantType::AuthorizationCode)
            .add_signing_credential(Credential::rsa(vec![1, 2, 3]))
            .add_signing_credential(Credential::symmetric(vec![9, 9, 9]))
            .add_encryption_credential(Credential::symmetric(vec![4, 5, 6]))
    }

    #[test]
    fn missing_endpoint_for_grant_is_rejected() {
        let builder = OptionsBuilder::new()
            .enable_grant(GrantType::AuthorizationCode)
            .add_signing_credential(Credential::rsa(vec![1]))
            .add_encryption_credential(Credential::symmetric(vec![2]));
        let err = resolve(builder).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEndpointForGrant("authorization_code", "authorization")));
    }

    #[test]
    fn valid_configuration_resolves_with_derived_response_types() {
        let options = resolve(valid_builder()).unwrap();
        assert!(options.supported_response_types.iter().any(|rt| rt.contains(&ResponseType::Code)));
        assert!(options.supported_response_modes.contains(&ResponseMode::Query));
        assert!(options.signing_credentials[0].key_id.is_some());
    }

    #[test]
    fn refresh_grant_implies_offline_access_scope() {
        let builder = valid_builder().enable_endpoint(EndpointKind::Token).enable_grant(GrantType::RefreshToken);
        let options = resolve(builder).unwrap();
        assert!(options.supported_scopes.contains("offline_access"));
    }

    #[test]
    fn auth_code_and_implicit_together_derive_hybrid_response_types() {
        let builder = valid_builder().enable_grant(GrantType::Implicit);
        let options = resolve(builder).unwrap();
        let has_hybrid = options
            .supported_response_types
            .iter()
            .any(|rt| rt.contains(&ResponseType::Code) && rt.contains(&ResponseType::Token) && rt.contains(&ResponseType::IdToken));
        assert!(has_hybrid, "{:?}", options.supported_response_types);
        assert!(options.supported_response_modes.contains(&ResponseMode::Fragment));
        assert!(options.supported_response_modes.contains(&ResponseMode::FormPost));
    }

    #[test]
    fn degraded_mode_forces_storage_off_and_requires_validators() {
        let builder = valid_builder().degraded_mode(true);
        let err = resolve(builder).unwrap_err();
        assert!(matches!(err, ConfigError::DegradedModeMissingValidator(_)));
    }

    #[test]
    fn missing_asymmetric_signing_credential_is_rejected() {
        let builder = OptionsBuilder::new()
            .enable_endpoint(EndpointKind::Authorization)
            .enable_endpoint(EndpointKind::Token)
            .enable_grant(GrantType::AuthorizationCode)
            .add_signing_credential(Credential::symmetric(vec![1]))
            .add_encryption_credential(Credential::symmetric(vec![2]));
        let err = resolve(builder).unwrap_err();
        assert!(matches!(err, ConfigError::NoAsymmetricSigningCredential));
    }
}
