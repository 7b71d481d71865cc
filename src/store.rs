//! Persistence-facing entries and store traits (§3, §1 "external collaborators").
//!
//! These traits are the only contact point between the protocol engine and the
//! application/authorization/token/scope stores a host must provide. Only interfaces are
//! specified here, matching the teacher's separation of `Registrar`/`Authorizer`/`Issuer`
//! traits from any particular backend; `mem` additionally supplies minimal in-memory
//! reference implementations (mirroring `ClientMap`/`AuthMap`/`TokenMap`) so the crate is
//! testable on its own and so integrators have a worked starting point.
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::claims::TokenType;
use crate::error::StoreError;
use crate::scope::ScopeEntry;

/// Whether a client can keep a secret confidential (§3 Application entry).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Public,
    Confidential,
    Hybrid,
}

impl ClientType {
    /// Confidential and hybrid clients must present a client secret (§4.5.2).
    pub fn requires_secret(self) -> bool {
        matches!(self, ClientType::Confidential | ClientType::Hybrid)
    }
}

/// A registered relying-party application (§3 Application entry). Opaque to the engine
/// beyond the fields it actually consults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApplicationEntry {
    pub client_id: String,
    pub client_secret_hash: Option<String>,
    pub client_type: ClientType,
    pub endpoint_permissions: HashSet<String>,
    pub grant_type_permissions: HashSet<String>,
    pub scope_permissions: HashSet<String>,
    pub redirect_uris: HashSet<String>,
    pub post_logout_redirect_uris: HashSet<String>,
}

impl ApplicationEntry {
    pub fn new(client_id: impl Into<String>, client_type: ClientType) -> Self {
        ApplicationEntry {
            client_id: client_id.into(),
            client_secret_hash: None,
            client_type,
            endpoint_permissions: HashSet::new(),
            grant_type_permissions: HashSet::new(),
            scope_permissions: HashSet::new(),
            redirect_uris: HashSet::new(),
            post_logout_redirect_uris: HashSet::new(),
        }
    }
}

/// Status of an authorization entry (§3). Revocation is monotonic: once `Revoked`, an
/// entry never returns to `Valid` (§5 "Shared resources").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Valid,
    Revoked,
}

/// How an authorization was established (§3 Authorization entry `type`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationKind {
    Permanent,
    AdHoc,
    External,
    Device,
}

/// A consent/authorization record (§3 Authorization entry). Revoking one cascades to
/// every token that references it (§8 invariant 5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationEntry {
    pub id: String,
    pub subject: String,
    pub client_id: String,
    pub status: AuthorizationStatus,
    pub scopes: HashSet<String>,
    pub kind: AuthorizationKind,
    pub creation_date: DateTime<Utc>,
}

/// Status of a token entry (§3). `Inactive` is the state a token is created in during
/// sign-in, before it is promoted to `Valid` once issuance completes successfully.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Inactive,
    Valid,
    Redeemed,
    Revoked,
    Rejected,
}

/// A server-side token record (§3 Token entry). `payload_reference` locates the
/// serialized [`crate::serializer::TokenPayload`] for reference tokens, or is empty for
/// self-contained JWTs that carry their own payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenEntry {
    pub id: String,
    pub subject: String,
    pub client_id: String,
    pub authorization_id: Option<String>,
    pub token_type: TokenType,
    pub status: TokenStatus,
    pub payload_reference: String,
    pub creation_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub redemption_date: Option<DateTime<Utc>>,
}

/// Looks up registered applications. Never builds or exposes a registration UI (§1
/// Non-goals); read-only from the engine's perspective.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<ApplicationEntry>, StoreError>;
}

/// Creates, looks up and revokes authorization entries (§3, §8 invariant 5).
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<AuthorizationEntry>, StoreError>;

    async fn create(&self, entry: AuthorizationEntry) -> Result<(), StoreError>;

    /// Mark the authorization revoked. Monotonic: revoking an already-revoked entry is a
    /// harmless no-op, never un-revokes it. Returns `false` if no such entry exists.
    async fn revoke(&self, id: &str) -> Result<bool, StoreError>;

    /// Find a still-valid authorization for `(subject, client_id)`, used by the
    /// authorization endpoint's implicit-consent short-circuit (§4.5.1).
    async fn find_valid_for(&self, subject: &str, client_id: &str) -> Result<Option<AuthorizationEntry>, StoreError>;
}

/// Creates, looks up, redeems and revokes token entries, and stores/loads reference
/// token payloads (§3, §4.6, §8 invariant 4).
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<TokenEntry>, StoreError>;

    async fn create(&self, entry: TokenEntry) -> Result<(), StoreError>;

    async fn set_status(&self, id: &str, status: TokenStatus) -> Result<(), StoreError>;

    /// Atomically transition a token from `Valid` to `Redeemed`. Of `N` concurrent
    /// callers racing the same one-time token, exactly one must observe `Ok(true)`; the
    /// rest observe `Ok(false)` (§5, §8 invariant 4). Implementations MUST provide this
    /// as a compare-and-set, not a read-then-write.
    async fn try_redeem(&self, id: &str) -> Result<bool, StoreError>;

    /// Revoke every token referencing `authorization_id` (§8 invariant 5 cascade).
    async fn revoke_by_authorization(&self, authorization_id: &str) -> Result<(), StoreError>;

    async fn store_payload(&self, id: &str, payload: Vec<u8>) -> Result<(), StoreError>;

    async fn load_payload(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Looks up registered scopes and the resources behind them (§3 Scope entry).
#[async_trait]
pub trait ScopeStore: Send + Sync {
    async fn find(&self, name: &str) -> Result<Option<ScopeEntry>, StoreError>;
}

/// Minimal in-memory store implementations, analogous to the teacher's `ClientMap`,
/// `AuthMap` and `TokenMap`. Useful for tests and as a starting point; not intended for
/// production use (no persistence across restarts, coarse-grained locking).
pub mod mem {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryApplicationStore {
        applications: Mutex<HashMap<String, ApplicationEntry>>,
    }

    impl MemoryApplicationStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, entry: ApplicationEntry) {
            self.applications.lock().unwrap().insert(entry.client_id.clone(), entry);
        }
    }

    #[async_trait]
    impl ApplicationStore for MemoryApplicationStore {
        async fn find_by_client_id(&self, client_id: &str) -> Result<Option<ApplicationEntry>, StoreError> {
            Ok(self.applications.lock().unwrap().get(client_id).cloned())
        }
    }

    #[derive(Default)]
    pub struct MemoryAuthorizationStore {
        authorizations: Mutex<HashMap<String, AuthorizationEntry>>,
    }

    impl MemoryAuthorizationStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl AuthorizationStore for MemoryAuthorizationStore {
        async fn find_by_id(&self, id: &str) -> Result<Option<AuthorizationEntry>, StoreError> {
            Ok(self.authorizations.lock().unwrap().get(id).cloned())
        }

        async fn create(&self, entry: AuthorizationEntry) -> Result<(), StoreError> {
            self.authorizations.lock().unwrap().insert(entry.id.clone(), entry);
            Ok(())
        }

        async fn revoke(&self, id: &str) -> Result<bool, StoreError> {
            let mut authorizations = self.authorizations.lock().unwrap();
            match authorizations.get_mut(id) {
                Some(entry) => {
                    entry.status = AuthorizationStatus::Revoked;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn find_valid_for(&self, subject: &str, client_id: &str) -> Result<Option<AuthorizationEntry>, StoreError> {
            Ok(self
                .authorizations
                .lock()
                .unwrap()
                .values()
                .find(|entry| {
                    entry.subject == subject
                        && entry.client_id == client_id
                        && entry.status == AuthorizationStatus::Valid
                })
                .cloned())
        }
    }

    #[derive(Default)]
    pub struct MemoryTokenStore {
        tokens: Mutex<HashMap<String, TokenEntry>>,
        payloads: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryTokenStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl TokenStore for MemoryTokenStore {
        async fn find_by_id(&self, id: &str) -> Result<Option<TokenEntry>, StoreError> {
            Ok(self.tokens.lock().unwrap().get(id).cloned())
        }

        async fn create(&self, entry: TokenEntry) -> Result<(), StoreError> {
            self.tokens.lock().unwrap().insert(entry.id.clone(), entry);
            Ok(())
        }

        async fn set_status(&self, id: &str, status: TokenStatus) -> Result<(), StoreError> {
            if let Some(entry) = self.tokens.lock().unwrap().get_mut(id) {
                entry.status = status;
            }
            Ok(())
        }

        async fn try_redeem(&self, id: &str) -> Result<bool, StoreError> {
            let mut tokens = self.tokens.lock().unwrap();
            match tokens.get_mut(id) {
                Some(entry) if entry.status == TokenStatus::Valid => {
                    entry.status = TokenStatus::Redeemed;
                    entry.redemption_date = Some(Utc::now());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn revoke_by_authorization(&self, authorization_id: &str) -> Result<(), StoreError> {
            let mut tokens = self.tokens.lock().unwrap();
            for entry in tokens.values_mut() {
                if entry.authorization_id.as_deref() == Some(authorization_id) {
                    entry.status = TokenStatus::Revoked;
                }
            }
            Ok(())
        }

        async fn store_payload(&self, id: &str, payload: Vec<u8>) -> Result<(), StoreError> {
            self.payloads.lock().unwrap().insert(id.to_owned(), payload);
            Ok(())
        }

        async fn load_payload(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(self.payloads.lock().unwrap().get(id).cloned())
        }
    }

    #[derive(Default)]
    pub struct MemoryScopeStore {
        scopes: Mutex<HashMap<String, ScopeEntry>>,
    }

    impl MemoryScopeStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, entry: ScopeEntry) {
            self.scopes.lock().unwrap().insert(entry.name.clone(), entry);
        }
    }

    #[async_trait]
    impl ScopeStore for MemoryScopeStore {
        async fn find(&self, name: &str) -> Result<Option<ScopeEntry>, StoreError> {
            Ok(self.scopes.lock().unwrap().get(name).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mem::*;
    use super::*;

    #[tokio::test]
    async fn redeem_is_single_use() {
        let store = MemoryTokenStore::new();
        store
            .create(TokenEntry {
                id: "code-1".into(),
                subject: "alice".into(),
                client_id: "c1".into(),
                authorization_id: None,
                token_type: TokenType::AuthorizationCode,
                status: TokenStatus::Valid,
                payload_reference: String::new(),
                creation_date: Utc::now(),
                expiration_date: Utc::now(),
                redemption_date: None,
            })
            .await
            .unwrap();

        assert!(store.try_redeem("code-1").await.unwrap());
        assert!(!store.try_redeem("code-1").await.unwrap());
    }

    #[tokio::test]
    async fn revoking_authorization_cascades_to_tokens() {
        let store = MemoryTokenStore::new();
        store
            .create(TokenEntry {
                id: "access-1".into(),
                subject: "alice".into(),
                client_id: "c1".into(),
                authorization_id: Some("auth-1".into()),
                token_type: TokenType::AccessToken,
                status: TokenStatus::Valid,
                payload_reference: String::new(),
                creation_date: Utc::now(),
                expiration_date: Utc::now(),
                redemption_date: None,
            })
            .await
            .unwrap();

        store.revoke_by_authorization("auth-1").await.unwrap();
        let entry = store.find_by_id("access-1").await.unwrap().unwrap();
        assert_eq!(entry.status, TokenStatus::Revoked);
    }
}
