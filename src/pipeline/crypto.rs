//! Signing, verification, encryption and decryption helpers shared by every endpoint
//! pipeline that issues or validates self-contained tokens (§4.6 ProcessSignIn /
//! ProcessAuthentication).
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};

use crate::error::HostError;
use crate::options::{Credential, CredentialMaterial};

fn algorithm_for(credential: &Credential) -> Algorithm {
    match &credential.material {
        CredentialMaterial::Symmetric { .. } => Algorithm::HS256,
        CredentialMaterial::Ecdsa { .. } => Algorithm::ES256,
        // X.509 certificates and bare RSA keys both sign with RS256; a deployment mixing
        // RSA and EC certificates distinguishes them by `kid`, not by credential shape.
        CredentialMaterial::X509 { .. } | CredentialMaterial::Rsa { .. } => Algorithm::RS256,
    }
}

fn encoding_key_for(credential: &Credential) -> Result<EncodingKey, HostError> {
    let material = credential.key_material();
    match &credential.material {
        CredentialMaterial::Symmetric { .. } => Ok(EncodingKey::from_secret(material)),
        CredentialMaterial::Ecdsa { .. } => {
            EncodingKey::from_ec_pem(material).map_err(|e| HostError::crypto(e.to_string()))
        }
        CredentialMaterial::X509 { .. } | CredentialMaterial::Rsa { .. } => {
            EncodingKey::from_rsa_pem(material).map_err(|e| HostError::crypto(e.to_string()))
        }
    }
}

fn decoding_key_for(credential: &Credential) -> Result<DecodingKey, HostError> {
    let material = credential.key_material();
    match &credential.material {
        CredentialMaterial::Symmetric { .. } => Ok(DecodingKey::from_secret(material)),
        CredentialMaterial::Ecdsa { .. } => {
            DecodingKey::from_ec_pem(material).map_err(|e| HostError::crypto(e.to_string()))
        }
        CredentialMaterial::X509 { .. } | CredentialMaterial::Rsa { .. } => {
            DecodingKey::from_rsa_pem(material).map_err(|e| HostError::crypto(e.to_string()))
        }
    }
}

/// Sign a JSON claim set into a compact JWS using the given credential, stamping its
/// resolved key id into the JOSE header so a verifier can select the matching key
/// without trying every credential in the set.
pub fn sign(claims: &serde_json::Value, credential: &Credential) -> Result<String, HostError> {
    let mut header = Header::new(algorithm_for(credential));
    header.kid = credential.key_id.clone();
    let key = encoding_key_for(credential)?;
    jsonwebtoken::encode(&header, claims, &key).map_err(|e| HostError::crypto(e.to_string()))
}

/// Verify a compact JWS against a set of candidate credentials, preferring the one whose
/// `kid` matches the token header when present, and otherwise trying each in precedence
/// order (§4.4 step 6 — the set is already sorted by the time it reaches here).
pub fn verify(token: &str, credentials: &[Credential]) -> Result<serde_json::Value, HostError> {
    let header = jsonwebtoken::decode_header(token).map_err(|e| HostError::crypto(e.to_string()))?;

    let ordered: Vec<&Credential> = match &header.kid {
        Some(kid) => credentials
            .iter()
            .filter(|c| c.key_id.as_deref() == Some(kid.as_str()))
            .chain(credentials.iter().filter(|c| c.key_id.as_deref() != Some(kid.as_str())))
            .collect(),
        None => credentials.iter().collect(),
    };

    for credential in ordered {
        if algorithm_for(credential) != header.alg {
            continue;
        }
        let key = match decoding_key_for(credential) {
            Ok(key) => key,
            Err(_) => continue,
        };
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = true;
        if let Ok(decoded) = jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation) {
            return Ok(decoded.claims);
        }
    }

    Err(HostError::crypto("no candidate credential verified the token"))
}

fn aead_key(credential: &Credential) -> Key<Aes256Gcm> {
    let digest = Sha256::digest(credential.key_material());
    Key::<Aes256Gcm>::clone_from_slice(&digest)
}

/// Encrypt a byte string (typically a serialized [`crate::serializer::TokenPayload`])
/// under a symmetric encryption credential, for the JWE-style sealed-reference tokens a
/// host may choose to issue instead of plain server-side reference handles.
pub fn encrypt(plaintext: &[u8], credential: &Credential) -> Result<Vec<u8>, HostError> {
    let cipher = Aes256Gcm::new(&aead_key(credential));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| HostError::crypto(e.to_string()))?;
    let mut sealed = nonce.to_vec();
    sealed.append(&mut ciphertext);
    Ok(sealed)
}

/// Decrypt a value sealed by [`encrypt`], trying every candidate credential in order.
pub fn decrypt(sealed: &[u8], credentials: &[Credential]) -> Result<Vec<u8>, HostError> {
    if sealed.len() < 12 {
        return Err(HostError::crypto("sealed value shorter than the nonce prefix"));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    for credential in credentials {
        let cipher = Aes256Gcm::new(&aead_key(credential));
        if let Ok(plaintext) = cipher.decrypt(nonce, ciphertext) {
            return Ok(plaintext);
        }
    }
    Err(HostError::crypto("no candidate credential verified the token"))
}
