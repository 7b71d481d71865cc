//! Signing and encryption credentials, their precedence ordering and key-id assignment
//! (§4.4 steps 6 and 8).
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// The key material backing a credential. Distinguishing the shape (rather than just
/// storing raw bytes) is what lets the resolver apply the right key-id derivation and
/// precedence rule to each kind (§4.4 steps 6, 8).
#[derive(Clone, Debug)]
pub enum CredentialMaterial {
    /// A shared secret used for HMAC signing or AEAD encryption.
    Symmetric { key: Vec<u8> },
    /// An X.509 certificate's public/private key pair, with its validity window.
    /// `private_key_pem` is the PKCS#8 PEM used to actually sign; `certificate_thumbprint`
    /// is only the key-id material.
    X509 {
        certificate_thumbprint: Vec<u8>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        private_key_pem: Vec<u8>,
    },
    /// A bare RSA key (no certificate wrapper). `modulus` is key-id material only; signing
    /// uses `private_key_pem`.
    Rsa { modulus: Vec<u8>, private_key_pem: Vec<u8> },
    /// A bare ECDSA key (no certificate wrapper). `x` is key-id material only; signing uses
    /// `private_key_pem`.
    Ecdsa { x: Vec<u8>, private_key_pem: Vec<u8> },
}

/// A signing or encryption credential as supplied by the operator, before or after a
/// key-id has been assigned by the resolver.
#[derive(Clone, Debug)]
pub struct Credential {
    pub material: CredentialMaterial,
    pub key_id: Option<String>,
}

impl Credential {
    pub fn symmetric(key: Vec<u8>) -> Self {
        Credential {
            material: CredentialMaterial::Symmetric { key },
            key_id: None,
        }
    }

    pub fn x509(certificate_thumbprint: Vec<u8>, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        Credential {
            material: CredentialMaterial::X509 {
                certificate_thumbprint,
                not_before,
                not_after,
                private_key_pem: Vec::new(),
            },
            key_id: None,
        }
    }

    pub fn x509_with_key(
        certificate_thumbprint: Vec<u8>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        private_key_pem: Vec<u8>,
    ) -> Self {
        Credential {
            material: CredentialMaterial::X509 {
                certificate_thumbprint,
                not_before,
                not_after,
                private_key_pem,
            },
            key_id: None,
        }
    }

    pub fn rsa(modulus: Vec<u8>) -> Self {
        Credential {
            material: CredentialMaterial::Rsa {
                modulus,
                private_key_pem: Vec::new(),
            },
            key_id: None,
        }
    }

    pub fn rsa_with_key(modulus: Vec<u8>, private_key_pem: Vec<u8>) -> Self {
        Credential {
            material: CredentialMaterial::Rsa { modulus, private_key_pem },
            key_id: None,
        }
    }

    pub fn ecdsa(x: Vec<u8>) -> Self {
        Credential {
            material: CredentialMaterial::Ecdsa {
                x,
                private_key_pem: Vec::new(),
            },
            key_id: None,
        }
    }

    pub fn ecdsa_with_key(x: Vec<u8>, private_key_pem: Vec<u8>) -> Self {
        Credential {
            material: CredentialMaterial::Ecdsa { x, private_key_pem },
            key_id: None,
        }
    }

    pub fn is_asymmetric(&self) -> bool {
        !matches!(self.material, CredentialMaterial::Symmetric { .. })
    }

    /// Whether the credential is currently usable: X.509 credentials must be within
    /// their validity window (§3 Options invariants: "at least one not-yet-expired");
    /// every other kind has no expiry concept and is always currently valid.
    pub fn is_currently_valid(&self, now: DateTime<Utc>) -> bool {
        match &self.material {
            CredentialMaterial::X509 { not_before, not_after, .. } => *not_before <= now && now <= *not_after,
            _ => true,
        }
    }

    fn is_not_yet_valid_x509(&self, now: DateTime<Utc>) -> bool {
        matches!(&self.material, CredentialMaterial::X509 { not_before, .. } if *not_before > now)
    }

    /// Sort tier per §9's resolution of the symmetric-precedence open question:
    /// `symmetric > X.509 valid > non-X.509 > X.509 not-yet-valid`. Lower tier sorts
    /// first. Intra-tier order is left to the caller's stable sort (insertion order).
    fn tier(&self, now: DateTime<Utc>) -> (u8, std::cmp::Reverse<DateTime<Utc>>) {
        match &self.material {
            CredentialMaterial::Symmetric { .. } => (0, std::cmp::Reverse(now)),
            CredentialMaterial::X509 { not_after, .. } if self.is_currently_valid(now) => {
                (1, std::cmp::Reverse(*not_after))
            }
            CredentialMaterial::Rsa { .. } | CredentialMaterial::Ecdsa { .. } => {
                (2, std::cmp::Reverse(now))
            }
            CredentialMaterial::X509 { .. } if self.is_not_yet_valid_x509(now) => {
                (3, std::cmp::Reverse(now))
            }
            CredentialMaterial::X509 { not_after, .. } => (3, std::cmp::Reverse(*not_after)),
        }
    }

    /// Derive a key-id for a credential lacking one (§4.4 step 8).
    pub fn derive_key_id(&self) -> String {
        match &self.material {
            CredentialMaterial::X509 { certificate_thumbprint, .. } => hex_encode(certificate_thumbprint),
            CredentialMaterial::Rsa { modulus, .. } => {
                let encoded = URL_SAFE_NO_PAD.encode(modulus);
                truncate(&encoded, 40).to_uppercase()
            }
            CredentialMaterial::Ecdsa { x, .. } => {
                let encoded = URL_SAFE_NO_PAD.encode(x);
                truncate(&encoded, 40).to_owned()
            }
            CredentialMaterial::Symmetric { key } => {
                // Symmetric keys carry no inherent public identifier; derive a stable
                // one from a digest of the key so repeated resolution is idempotent
                // (§8 invariant 7).
                let digest = Sha256::digest(key);
                truncate(&hex_encode(&digest), 40).to_owned()
            }
        }
    }

    pub fn ensure_key_id(&mut self) {
        if self.key_id.is_none() {
            self.key_id = Some(self.derive_key_id());
        }
    }

    /// Raw signing/encryption key material: the shared secret for symmetric credentials,
    /// the PEM-encoded private key for everything else.
    pub fn key_material(&self) -> &[u8] {
        match &self.material {
            CredentialMaterial::Symmetric { key } => key,
            CredentialMaterial::X509 { private_key_pem, .. } => private_key_pem,
            CredentialMaterial::Rsa { private_key_pem, .. } => private_key_pem,
            CredentialMaterial::Ecdsa { private_key_pem, .. } => private_key_pem,
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Sort credentials by precedence (§4.4 step 6), stable on ties so insertion order is
/// preserved within a tier.
pub fn sort_by_precedence(credentials: &mut [Credential], now: DateTime<Utc>) {
    credentials.sort_by_key(|c| c.tier(now));
}

/// At least one currently-valid credential, required of both signing and encryption sets
/// (§3 Options invariants).
pub fn has_currently_valid(credentials: &[Credential], now: DateTime<Utc>) -> bool {
    credentials.iter().any(|c| c.is_currently_valid(now))
}

/// At least one asymmetric credential, required of the signing set (§3 Options invariants).
pub fn has_asymmetric(credentials: &[Credential]) -> bool {
    credentials.iter().any(Credential::is_asymmetric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn precedence_orders_symmetric_first_then_valid_x509_by_furthest_expiry() {
        let now = Utc::now();
        let mut credentials = vec![
            Credential::rsa(vec![1, 2, 3]),
            Credential::x509(vec![9], now - Duration::days(1), now + Duration::days(10)),
            Credential::symmetric(vec![4, 5, 6]),
            Credential::x509(vec![8], now - Duration::days(1), now + Duration::days(30)),
        ];
        sort_by_precedence(&mut credentials, now);

        assert!(matches!(credentials[0].material, CredentialMaterial::Symmetric { .. }));
        // The valid X.509 cert with the furthest not_after comes next.
        match &credentials[1].material {
            CredentialMaterial::X509 { not_after, .. } => {
                assert_eq!(*not_after, now + Duration::days(30));
            }
            _ => panic!("expected x509"),
        }
    }

    #[test]
    fn not_yet_valid_x509_sorts_last() {
        let now = Utc::now();
        let mut credentials = vec![
            Credential::x509(vec![1], now + Duration::days(1), now + Duration::days(10)),
            Credential::rsa(vec![2]),
        ];
        sort_by_precedence(&mut credentials, now);
        assert!(matches!(credentials[0].material, CredentialMaterial::Rsa { .. }));
    }

    #[test]
    fn key_id_assignment_uses_expected_derivations() {
        let mut rsa = Credential::rsa(vec![1, 2, 3, 4]);
        rsa.ensure_key_id();
        assert_eq!(rsa.key_id.as_deref(), Some(rsa.key_id.as_deref().unwrap()));
        assert!(rsa.key_id.unwrap().chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_'));
    }
}
