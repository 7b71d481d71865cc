//! Token Serializer: symmetric read/write of the versioned binary envelope (§4.3, §6.1).
//!
//! The envelope carries a [`Principal`] plus a side-table of string properties. A fixed
//! set of protocol-private claims is additionally mirrored into that side-table on write
//! and restored from it on read, for compatibility with earlier token envelopes that
//! predate the claims-model unification (§4.3 "Rationale").
use std::collections::HashMap;
use std::convert::TryInto;

use crate::claims::{claim_types, Claim, Identity, Principal};
use crate::error::CodecError;

/// Current envelope version. A stream whose version field does not match this value
/// yields an empty principal on read rather than an error (§4.3 Failure modes).
pub const VERSION: i32 = 5;

const DEFAULT_NAME_CLAIM_TYPE: &str = "name";
const DEFAULT_ROLE_CLAIM_TYPE: &str = "role";
const DEFAULT_CLAIM_TYPE: &str = "";
const SENTINEL: &str = "\0";

/// Claim types mirrored into the top-level property side-table on write, and restored
/// from it on read (§4.3). Scalar entries map one claim to one property; array entries
/// collect every claim of that type into a single JSON-array-valued property.
const SCALAR_PROPERTY_CLAIMS: &[&str] = &[
    claim_types::CREATION_DATE,
    claim_types::EXPIRATION_DATE,
    claim_types::ACCESS_TOKEN_LIFETIME,
    claim_types::AUTHORIZATION_CODE_LIFETIME,
    claim_types::DEVICE_CODE_LIFETIME,
    claim_types::IDENTITY_TOKEN_LIFETIME,
    claim_types::REFRESH_TOKEN_LIFETIME,
    claim_types::USER_CODE_LIFETIME,
    claim_types::CODE_CHALLENGE,
    claim_types::CODE_CHALLENGE_METHOD,
    claim_types::AUTHORIZATION_ID,
    claim_types::TOKEN_ID,
    claim_types::DEVICE_CODE_ID,
    claim_types::NONCE,
    claim_types::ORIGINAL_REDIRECT_URI,
];

const ARRAY_PROPERTY_CLAIMS: &[&str] = &[
    claim_types::AUDIENCE,
    claim_types::PRESENTER,
    claim_types::RESOURCE,
    claim_types::SCOPE,
];

/// The decoded envelope: the subject principal plus the side-table of authentication
/// properties that travel alongside it (§3 "a versioned binary envelope carrying a
/// subject principal plus a side-table of authentication properties").
#[derive(Clone, Debug, Default)]
pub struct TokenPayload {
    pub scheme: String,
    pub principal: Principal,
    pub properties: HashMap<String, String>,
}

impl TokenPayload {
    pub fn new(scheme: impl Into<String>, principal: Principal) -> Self {
        TokenPayload {
            scheme: scheme.into(),
            principal,
            properties: HashMap::new(),
        }
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn write_bool(&mut self, value: bool) {
        self.buf.push(if value { 1 } else { 0 });
    }

    fn write_string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        self.write_i32(bytes.len() as i32);
        self.buf.extend_from_slice(bytes);
    }

    fn write_defaulted(&mut self, value: &str, default: &str) {
        if value == default {
            self.write_string(SENTINEL);
        } else {
            self.write_string(value);
        }
    }

    fn write_claim(&mut self, claim: &Claim) {
        self.write_defaulted(&claim.claim_type, DEFAULT_CLAIM_TYPE);
        self.write_string(&claim.value);
        self.write_defaulted(&claim.value_type, &Claim::default_value_type());
        self.write_defaulted(&claim.issuer, &Claim::default_issuer());
        self.write_defaulted(&claim.original_issuer, &Claim::default_issuer());
        self.write_i32(claim.properties().len() as i32);
        for (key, value) in claim.properties() {
            self.write_string(key);
            self.write_string(value);
        }
    }

    fn write_identity(&mut self, identity: &Identity, excluded_claim_types: &std::collections::HashSet<&str>) {
        self.write_string(&identity.authentication_type);
        self.write_defaulted(&identity.name_claim_type, DEFAULT_NAME_CLAIM_TYPE);
        self.write_defaulted(&identity.role_claim_type, DEFAULT_ROLE_CLAIM_TYPE);

        let retained: Vec<&Claim> = identity
            .claims
            .iter()
            .filter(|c| !excluded_claim_types.contains(c.claim_type.as_str()))
            .collect();
        self.write_i32(retained.len() as i32);
        for claim in retained {
            self.write_claim(claim);
        }

        self.write_bool(identity.bootstrap.is_some());
        if let Some(bootstrap) = &identity.bootstrap {
            self.write_string(bootstrap);
        }

        self.write_bool(identity.actor.is_some());
        if let Some(actor) = &identity.actor {
            self.write_identity(actor, excluded_claim_types);
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        if self.pos + 4 > self.data.len() {
            return Err(CodecError::new("truncated stream reading i32"));
        }
        let bytes: [u8; 4] = self.data[self.pos..self.pos + 4]
            .try_into()
            .expect("slice is exactly 4 bytes");
        self.pos += 4;
        Ok(i32::from_le_bytes(bytes))
    }

    fn read_bool(&mut self) -> Result<bool, CodecError> {
        if self.pos + 1 > self.data.len() {
            return Err(CodecError::new("truncated stream reading bool"));
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value != 0)
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::new("negative string length"));
        }
        let len = len as usize;
        if self.pos + len > self.data.len() {
            return Err(CodecError::new("truncated stream reading string"));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        String::from_utf8(slice.to_vec()).map_err(|_| CodecError::new("invalid utf-8 in string"))
    }

    fn read_defaulted(&mut self, default: &str) -> Result<String, CodecError> {
        let raw = self.read_string()?;
        if raw == SENTINEL {
            Ok(default.to_owned())
        } else {
            Ok(raw)
        }
    }

    fn read_claim(&mut self) -> Result<Claim, CodecError> {
        let claim_type = self.read_defaulted(DEFAULT_CLAIM_TYPE)?;
        let value = self.read_string()?;
        let value_type = self.read_defaulted(&Claim::default_value_type())?;
        let issuer = self.read_defaulted(&Claim::default_issuer())?;
        let original_issuer = self.read_defaulted(&Claim::default_issuer())?;
        let property_count = self.read_i32()?;
        if property_count < 0 {
            return Err(CodecError::new("negative property count"));
        }
        let mut claim = Claim::new(claim_type, value);
        claim.value_type = value_type;
        claim.issuer = issuer;
        claim.original_issuer = original_issuer;
        for _ in 0..property_count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            claim.set_property(key, value);
        }
        Ok(claim)
    }

    fn read_identity(&mut self) -> Result<Identity, CodecError> {
        let authentication_type = self.read_string()?;
        let name_claim_type = self.read_defaulted(DEFAULT_NAME_CLAIM_TYPE)?;
        let role_claim_type = self.read_defaulted(DEFAULT_ROLE_CLAIM_TYPE)?;
        let claim_count = self.read_i32()?;
        if claim_count < 0 {
            return Err(CodecError::new("negative claim count"));
        }
        let mut claims = Vec::with_capacity(claim_count as usize);
        for _ in 0..claim_count {
            claims.push(self.read_claim()?);
        }

        let has_bootstrap = self.read_bool()?;
        let bootstrap = if has_bootstrap {
            Some(self.read_string()?)
        } else {
            None
        };

        let has_actor = self.read_bool()?;
        let actor = if has_actor {
            Some(Box::new(self.read_identity()?))
        } else {
            None
        };

        Ok(Identity {
            authentication_type,
            name_claim_type,
            role_claim_type,
            claims,
            bootstrap,
            actor,
        })
    }
}

/// Write a `TokenPayload` to its binary envelope representation.
///
/// Claims of the fixed protocol-private types (§4.3) are stripped from the identities'
/// claim lists after being copied into the trailing properties table; `payload.properties`
/// is used as the starting point so caller-supplied properties survive untouched.
pub fn write(payload: &TokenPayload) -> Vec<u8> {
    let mut properties = payload.properties.clone();

    for claim_type in SCALAR_PROPERTY_CLAIMS {
        if let Some(claim) = payload.principal.find_first(claim_type) {
            properties.insert((*claim_type).to_owned(), claim.value.clone());
        }
    }
    for claim_type in ARRAY_PROPERTY_CLAIMS {
        let values: Vec<&str> = payload
            .principal
            .find_all(claim_type)
            .map(|c| c.value.as_str())
            .collect();
        if !values.is_empty() {
            let encoded = serde_json::to_string(&values).expect("string vec always encodes");
            properties.insert((*claim_type).to_owned(), encoded);
        }
    }

    let excluded: std::collections::HashSet<&str> = SCALAR_PROPERTY_CLAIMS
        .iter()
        .chain(ARRAY_PROPERTY_CLAIMS.iter())
        .copied()
        .collect();

    let mut writer = Writer::new();
    writer.write_i32(VERSION);
    writer.write_string(&payload.scheme);
    writer.write_i32(payload.principal.identities().len() as i32);
    for identity in payload.principal.identities() {
        writer.write_identity(identity, &excluded);
    }

    writer.write_i32(VERSION);
    writer.write_i32(properties.len() as i32);
    let mut keys: Vec<&String> = properties.keys().collect();
    keys.sort();
    for key in keys {
        writer.write_string(key);
        writer.write_string(&properties[key]);
    }

    writer.buf
}

/// Read a `TokenPayload` from its binary envelope representation.
///
/// A version mismatch at the start of the stream is not an error: it returns an empty
/// principal and empty properties (§4.3 Failure modes), which lets a host treat it the
/// same as "no usable payload" rather than aborting the request.
pub fn read(data: &[u8]) -> Result<TokenPayload, CodecError> {
    let mut reader = Reader::new(data);
    let version = reader.read_i32()?;
    if version != VERSION {
        return Ok(TokenPayload::default());
    }

    let scheme = reader.read_string()?;
    let identity_count = reader.read_i32()?;
    if identity_count < 0 {
        return Err(CodecError::new("negative identity count"));
    }
    let mut identities = Vec::with_capacity(identity_count as usize);
    for _ in 0..identity_count {
        identities.push(reader.read_identity()?);
    }

    let properties_version = reader.read_i32()?;
    let mut properties = HashMap::new();
    if properties_version == VERSION {
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(CodecError::new("negative property count"));
        }
        for _ in 0..count {
            let key = reader.read_string()?;
            let value = reader.read_string()?;
            properties.insert(key, value);
        }
    }

    let mut principal = Principal::default();
    for identity in identities {
        principal.push_identity(identity);
    }

    for claim_type in SCALAR_PROPERTY_CLAIMS {
        if let Some(value) = properties.get(*claim_type) {
            if principal.find_first(claim_type).is_none() {
                if let Some(identity) = principal.primary_mut() {
                    identity.claims.push(Claim::new(*claim_type, value.clone()));
                } else {
                    principal.push_identity(Identity::new("").with_claim(Claim::new(*claim_type, value.clone())));
                }
            }
        }
    }
    for claim_type in ARRAY_PROPERTY_CLAIMS {
        if let Some(encoded) = properties.get(*claim_type) {
            let values: Vec<String> = serde_json::from_str(encoded).unwrap_or_default();
            for value in values {
                if principal.identities().is_empty() {
                    principal.push_identity(Identity::new(""));
                }
                principal
                    .primary_mut()
                    .expect("identity just ensured")
                    .claims
                    .push(Claim::new(*claim_type, value));
            }
        }
    }

    Ok(TokenPayload {
        scheme,
        principal,
        properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::Identity;

    #[test]
    fn round_trip_preserves_ordinary_claims_and_maps_private_ones() {
        let mut principal = Principal::new();
        let mut identity = Identity::new("pwd");
        identity.claims.push(Claim::new("name", "Bob"));
        identity.claims.push(Claim::new("email", "b@x"));
        principal.push_identity(identity);
        principal.set_audiences(["a1", "a2"]);

        let payload = TokenPayload::new("Bearer", principal);
        let bytes = write(&payload);
        let decoded = read(&bytes).unwrap();

        assert_eq!(decoded.scheme, "Bearer");
        assert_eq!(decoded.principal.find_first("email").unwrap().value, "b@x");
        assert_eq!(decoded.principal.find_first("name").unwrap().value, "Bob");
        assert_eq!(decoded.principal.audiences(), vec!["a1", "a2"]);
        assert_eq!(decoded.properties.get("aud").unwrap(), "[\"a1\",\"a2\"]");
    }

    #[test]
    fn version_mismatch_yields_empty_principal_not_error() {
        let mut writer = Writer::new();
        writer.write_i32(999);
        writer.write_string("Bearer");
        writer.write_i32(0);
        let decoded = read(&writer.buf).unwrap();
        assert!(decoded.principal.identities().is_empty());
    }

    #[test]
    fn truncated_stream_is_a_codec_error() {
        let bytes = [5i32.to_le_bytes().to_vec(), vec![0, 1]].concat();
        assert!(read(&bytes).is_err());
    }

    #[test]
    fn defaulted_fields_round_trip_through_sentinel() {
        let mut principal = Principal::new();
        let identity = Identity::new("pwd");
        principal.push_identity(identity);
        let payload = TokenPayload::new("Bearer", principal);
        let bytes = write(&payload);
        let decoded = read(&bytes).unwrap();
        let identity = decoded.principal.primary().unwrap();
        assert_eq!(identity.name_claim_type, DEFAULT_NAME_CLAIM_TYPE);
        assert_eq!(identity.role_claim_type, DEFAULT_ROLE_CLAIM_TYPE);
    }
}
