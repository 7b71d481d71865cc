//! Claims Model & Token Payload.
//!
//! A [`Principal`] is an ordered set of [`Identity`] instances, each a set of [`Claim`]s.
//! This mirrors the teacher's `primitives::grant::Grant` + `Extensions` pair but widens
//! it from a single fixed grant shape into the general claims container the
//! specification requires (§3), since the same container must cross authorization,
//! access, identity and refresh tokens with differing subsets of claims visible in each.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The reserved claim property naming which issued token types may carry a claim.
pub const DESTINATIONS_PROPERTY: &str = "destinations";

/// Token-type tags used as destinations and, more generally, to discriminate issued
/// tokens (§3 Token entry `type`, §4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    AccessToken,
    IdentityToken,
    RefreshToken,
    AuthorizationCode,
    DeviceCode,
    UserCode,
}

impl TokenType {
    /// The lowercase, canonical wire tag used inside the `destinations` property.
    pub fn tag(self) -> &'static str {
        match self {
            TokenType::AccessToken => "access_token",
            TokenType::IdentityToken => "id_token",
            TokenType::RefreshToken => "refresh_token",
            TokenType::AuthorizationCode => "authorization_code",
            TokenType::DeviceCode => "device_code",
            TokenType::UserCode => "user_code",
        }
    }
}

/// A single claim: type, value, value-type, issuer, original-issuer and a property map.
///
/// Property keys are compared case-sensitively except for the reserved `destinations`
/// key, whose *values* are canonicalized (§3): compared case-insensitively, deduplicated,
/// and stored lowercase. An empty destination set is represented as "property absent",
/// never as an empty array, so that claim equality and serialization stay unambiguous.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
    #[serde(default = "Claim::default_value_type")]
    pub value_type: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub original_issuer: String,
    #[serde(default)]
    properties: HashMap<String, String>,
}

impl Claim {
    /// The default value-type used by the reader/writer of §4.3 when no other is given.
    pub fn default_value_type() -> String {
        "http://www.w3.org/2001/XMLSchema#string".to_owned()
    }

    /// The default issuer used by the reader/writer of §4.3.
    pub fn default_issuer() -> String {
        "LOCAL AUTHORITY".to_owned()
    }

    /// Construct a claim with the library defaults for value-type, issuer and
    /// original-issuer.
    pub fn new<T: Into<String>, V: Into<String>>(claim_type: T, value: V) -> Self {
        let issuer = Claim::default_issuer();
        Claim {
            claim_type: claim_type.into(),
            value: value.into(),
            value_type: Claim::default_value_type(),
            original_issuer: issuer.clone(),
            issuer,
            properties: HashMap::new(),
        }
    }

    /// Arbitrary (non-`destinations`) properties attached to this claim.
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Set an arbitrary property. Setting `destinations` directly is allowed here but
    /// bypasses canonicalization; prefer [`Claim::set_destinations`].
    pub fn set_property<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The destinations restricting which issued token types may carry this claim.
    ///
    /// An absent property means "unrestricted": the claim may be copied into any issued
    /// token type. This matches the teacher's convention (grant extensions default to
    /// "no restriction" when absent) generalized to the spec's per-claim destinations.
    pub fn destinations(&self) -> Vec<String> {
        match self.properties.get(DESTINATIONS_PROPERTY) {
            None => Vec::new(),
            Some(raw) => serde_json::from_str(raw).unwrap_or_default(),
        }
    }

    /// Whether this claim is permitted to appear in a token of type `token_type`.
    ///
    /// A claim with no `destinations` property is permitted everywhere (§3, §8 invariant
    /// 3 only restricts claims that *have* a destinations list excluding the token type).
    pub fn allows_destination(&self, token_type: TokenType) -> bool {
        let destinations = self.destinations();
        destinations.is_empty() || destinations.iter().any(|d| d == token_type.tag())
    }

    /// Set the destinations for this claim, canonicalizing per §3: case-insensitive
    /// dedup, lowercase storage, empty array represented as property absence.
    pub fn set_destinations<I, S>(&mut self, destinations: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = std::collections::HashSet::new();
        let mut canonical = Vec::new();
        for d in destinations {
            let lower = d.as_ref().to_lowercase();
            if seen.insert(lower.clone()) {
                canonical.push(lower);
            }
        }
        if canonical.is_empty() {
            self.properties.remove(DESTINATIONS_PROPERTY);
        } else {
            let encoded = serde_json::to_string(&canonical).expect("string vec always encodes");
            self.properties.insert(DESTINATIONS_PROPERTY.to_owned(), encoded);
        }
    }

    /// Builder-style variant of [`Claim::set_destinations`].
    pub fn with_destinations<I, S>(mut self, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set_destinations(destinations);
        self
    }
}

/// A set of claims sharing one authentication type, plus the conventional name/role
/// claim-type markers and optional bootstrap context and actor (delegation) chain.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub authentication_type: String,
    #[serde(default = "Identity::default_name_claim_type")]
    pub name_claim_type: String,
    #[serde(default = "Identity::default_role_claim_type")]
    pub role_claim_type: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub bootstrap: Option<String>,
    #[serde(default)]
    pub actor: Option<Box<Identity>>,
}

impl Identity {
    pub fn default_name_claim_type() -> String {
        "name".to_owned()
    }

    pub fn default_role_claim_type() -> String {
        "role".to_owned()
    }

    pub fn new<T: Into<String>>(authentication_type: T) -> Self {
        Identity {
            authentication_type: authentication_type.into(),
            name_claim_type: Identity::default_name_claim_type(),
            role_claim_type: Identity::default_role_claim_type(),
            claims: Vec::new(),
            bootstrap: None,
            actor: None,
        }
    }

    pub fn with_claim(mut self, claim: Claim) -> Self {
        self.claims.push(claim);
        self
    }

    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.claim_type == claim_type)
    }

    pub fn find_all<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a Claim> {
        self.claims.iter().filter(move |c| c.claim_type == claim_type)
    }

    /// The subject's display name, per `name_claim_type`.
    pub fn name(&self) -> Option<&str> {
        self.find_first(&self.name_claim_type).map(|c| c.value.as_str())
    }
}

/// Well-known protocol-private claim types stored in the identity's claim list and/or
/// mapped to properties by the serializer (§4.3).
pub mod claim_types {
    pub const SUBJECT: &str = "sub";
    pub const AUDIENCE: &str = "aud";
    pub const PRESENTER: &str = "azp";
    pub const RESOURCE: &str = "resource";
    pub const SCOPE: &str = "scope";
    pub const TOKEN_ID: &str = "jti";
    pub const AUTHORIZATION_ID: &str = "oi_au_id";
    pub const TOKEN_TYPE: &str = "oi_tkn_typ";
    pub const CREATION_DATE: &str = "oi_crt_dt";
    pub const EXPIRATION_DATE: &str = "oi_exp_dt";
    pub const ACCESS_TOKEN_LIFETIME: &str = "oi_at_lft";
    pub const AUTHORIZATION_CODE_LIFETIME: &str = "oi_ac_lft";
    pub const DEVICE_CODE_LIFETIME: &str = "oi_dc_lft";
    pub const IDENTITY_TOKEN_LIFETIME: &str = "oi_idt_lft";
    pub const REFRESH_TOKEN_LIFETIME: &str = "oi_rt_lft";
    pub const USER_CODE_LIFETIME: &str = "oi_uc_lft";
    pub const CODE_CHALLENGE: &str = "oi_cc_chl";
    pub const CODE_CHALLENGE_METHOD: &str = "oi_cc_chl_mth";
    pub const DEVICE_CODE_ID: &str = "oi_dc_id";
    pub const NONCE: &str = "nonce";
    pub const ORIGINAL_REDIRECT_URI: &str = "oi_orig_red_uri";
}

/// An ordered set of identities representing the subject of a token or request (§3).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Principal {
    identities: Vec<Identity>,
}

impl Principal {
    pub fn new() -> Self {
        Principal::default()
    }

    pub fn with_identity(identity: Identity) -> Self {
        Principal {
            identities: vec![identity],
        }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn push_identity(&mut self, identity: Identity) {
        self.identities.push(identity);
    }

    pub fn primary(&self) -> Option<&Identity> {
        self.identities.first()
    }

    pub fn primary_mut(&mut self) -> Option<&mut Identity> {
        self.identities.first_mut()
    }

    /// Find the first claim of the given type across all identities.
    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.identities.iter().find_map(|i| i.find_first(claim_type))
    }

    /// Iterate every claim of the given type across all identities, in identity order.
    pub fn find_all<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a Claim> {
        self.identities.iter().flat_map(move |i| i.find_all(claim_type))
    }

    fn single_string(&self, claim_type: &str) -> Option<String> {
        self.find_first(claim_type).map(|c| c.value.clone())
    }

    fn set_single_string(&mut self, claim_type: &str, value: impl Into<String>) {
        self.remove_all(claim_type);
        self.push_well_known(Claim::new(claim_type, value.into()));
    }

    fn remove_all(&mut self, claim_type: &str) {
        for identity in &mut self.identities {
            identity.claims.retain(|c| c.claim_type != claim_type);
        }
    }

    fn push_well_known(&mut self, claim: Claim) {
        if self.identities.is_empty() {
            self.identities.push(Identity::new(""));
        }
        self.identities[0].claims.push(claim);
    }

    fn string_list(&self, claim_type: &str) -> Vec<String> {
        self.find_all(claim_type).map(|c| c.value.clone()).collect()
    }

    fn set_string_list<I, S>(&mut self, claim_type: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_all(claim_type);
        for value in values {
            self.push_well_known(Claim::new(claim_type, value.into()));
        }
    }

    /// The subject identifier (`sub`).
    pub fn subject(&self) -> Option<String> {
        self.single_string(claim_types::SUBJECT)
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) {
        self.set_single_string(claim_types::SUBJECT, subject);
    }

    /// The audiences this token is intended for.
    pub fn audiences(&self) -> Vec<String> {
        self.string_list(claim_types::AUDIENCE)
    }

    pub fn set_audiences<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, values: I) {
        self.set_string_list(claim_types::AUDIENCE, values);
    }

    /// The client(s) ("authorized party") the token was presented to.
    pub fn presenters(&self) -> Vec<String> {
        self.string_list(claim_types::PRESENTER)
    }

    pub fn set_presenters<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, values: I) {
        self.set_string_list(claim_types::PRESENTER, values);
    }

    /// The resources the token is valid for.
    pub fn resources(&self) -> Vec<String> {
        self.string_list(claim_types::RESOURCE)
    }

    pub fn set_resources<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, values: I) {
        self.set_string_list(claim_types::RESOURCE, values);
    }

    /// The granted scopes.
    pub fn scopes(&self) -> Vec<String> {
        self.string_list(claim_types::SCOPE)
    }

    pub fn set_scopes<I: IntoIterator<Item = S>, S: Into<String>>(&mut self, values: I) {
        self.set_string_list(claim_types::SCOPE, values);
    }

    pub fn token_id(&self) -> Option<String> {
        self.single_string(claim_types::TOKEN_ID)
    }

    pub fn set_token_id(&mut self, id: impl Into<String>) {
        self.set_single_string(claim_types::TOKEN_ID, id);
    }

    pub fn authorization_id(&self) -> Option<String> {
        self.single_string(claim_types::AUTHORIZATION_ID)
    }

    pub fn set_authorization_id(&mut self, id: impl Into<String>) {
        self.set_single_string(claim_types::AUTHORIZATION_ID, id);
    }

    pub fn token_type(&self) -> Option<TokenType> {
        self.single_string(claim_types::TOKEN_TYPE).and_then(|raw| {
            serde_json::from_value(serde_json::Value::String(raw)).ok()
        })
    }

    pub fn set_token_type(&mut self, kind: TokenType) {
        self.set_single_string(claim_types::TOKEN_TYPE, kind.tag());
    }

    fn timestamp(&self, claim_type: &str) -> Option<DateTime<Utc>> {
        self.single_string(claim_type)
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    fn set_timestamp(&mut self, claim_type: &str, at: DateTime<Utc>) {
        self.set_single_string(claim_type, at.timestamp().to_string());
    }

    pub fn creation_date(&self) -> Option<DateTime<Utc>> {
        self.timestamp(claim_types::CREATION_DATE)
    }

    pub fn set_creation_date(&mut self, at: DateTime<Utc>) {
        self.set_timestamp(claim_types::CREATION_DATE, at);
    }

    pub fn expiration_date(&self) -> Option<DateTime<Utc>> {
        self.timestamp(claim_types::EXPIRATION_DATE)
    }

    pub fn set_expiration_date(&mut self, at: DateTime<Utc>) {
        self.set_timestamp(claim_types::EXPIRATION_DATE, at);
    }

    /// Strip every claim whose `destinations` excludes `token_type`, leaving a principal
    /// fit to embed in an issued token of that type (§4.6, §8 invariant 3).
    pub fn filtered_for(&self, token_type: TokenType) -> Principal {
        let identities = self
            .identities
            .iter()
            .map(|identity| Identity {
                authentication_type: identity.authentication_type.clone(),
                name_claim_type: identity.name_claim_type.clone(),
                role_claim_type: identity.role_claim_type.clone(),
                bootstrap: identity.bootstrap.clone(),
                actor: identity.actor.clone(),
                claims: identity
                    .claims
                    .iter()
                    .filter(|c| c.allows_destination(token_type))
                    .cloned()
                    .collect(),
            })
            .collect();
        Principal { identities }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destinations_canonicalize_case_and_dedup() {
        let mut claim = Claim::new("email", "b@x");
        claim.set_destinations(["ID_Token", "id_token", "Access_Token"]);
        let mut destinations = claim.destinations();
        destinations.sort();
        assert_eq!(destinations, vec!["access_token", "id_token"]);
    }

    #[test]
    fn empty_destinations_are_absent() {
        let mut claim = Claim::new("email", "b@x");
        claim.set_destinations(std::iter::empty::<&str>());
        assert!(claim.property(DESTINATIONS_PROPERTY).is_none());
        assert!(claim.destinations().is_empty());
    }

    #[test]
    fn claim_without_destinations_allows_everywhere() {
        let claim = Claim::new("email", "b@x");
        assert!(claim.allows_destination(TokenType::IdentityToken));
        assert!(claim.allows_destination(TokenType::AccessToken));
    }

    #[test]
    fn filtered_for_respects_destinations() {
        let mut principal = Principal::new();
        let id_only = Claim::new("email", "b@x").with_destinations(["id_token"]);
        let access_only = Claim::new("scope_detail", "admin").with_destinations(["access_token"]);
        principal.push_identity(Identity::new("pwd").with_claim(id_only).with_claim(access_only));

        let id_token_claims = principal.filtered_for(TokenType::IdentityToken);
        assert!(id_token_claims.find_first("email").is_some());
        assert!(id_token_claims.find_first("scope_detail").is_none());

        let access_token_claims = principal.filtered_for(TokenType::AccessToken);
        assert!(access_token_claims.find_first("email").is_none());
        assert!(access_token_claims.find_first("scope_detail").is_some());
    }

    #[test]
    fn audiences_round_trip_through_accessors() {
        let mut principal = Principal::new();
        principal.set_audiences(["a1", "a2"]);
        assert_eq!(principal.audiences(), vec!["a1", "a2"]);
    }
}
