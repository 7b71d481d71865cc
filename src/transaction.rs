//! The transaction: the mutable, per-request record threaded through every handler
//! invocation for one endpoint call (§3 Transaction).
//!
//! Holds the request and response payloads, a resolved [`Options`](crate::options::Options)
//! snapshot, a cancellation signal the host can trip, and an open property bag handlers use
//! to pass data to later handlers in the same pipeline (e.g. a loaded `ApplicationEntry`,
//! or the `Principal` assembled during sign-in).
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::message::{Request, Response};
use crate::options::Options;

/// A single-fire cancellation signal shared between a host and the transaction it created
/// (§5). Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        CancellationSignal(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The mutable record one endpoint call carries through its dispatch phases.
///
/// `properties` is intentionally untyped (`Box<dyn Any>` keyed by a handler-chosen name)
/// rather than a growing struct of optional fields: the set of things one handler hands to
/// a later one is open-ended and pipeline-specific, the same way the specification leaves
/// it unenumerated (§3 Transaction, §9 design note on handler communication).
pub struct Transaction {
    pub request: Request,
    pub response: Response,
    pub options: Option<Arc<Options>>,
    cancellation: CancellationSignal,
    properties: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction {
            request: Request::default(),
            response: Response::default(),
            options: None,
            cancellation: CancellationSignal::new(),
            properties: HashMap::new(),
        }
    }

    pub fn with_options(options: Arc<Options>) -> Self {
        let mut txn = Transaction::new();
        txn.options = Some(options);
        txn
    }

    pub fn cancellation_signal(&self) -> CancellationSignal {
        self.cancellation.clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_canceled()
    }

    /// Store a value for a later handler in the same pipeline to retrieve by name.
    pub fn set_property<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.properties.insert(name.into(), Box::new(value));
    }

    pub fn property<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.properties.get(name).and_then(|b| b.downcast_ref::<T>())
    }

    pub fn property_mut<T: Any + Send + Sync>(&mut self, name: &str) -> Option<&mut T> {
        self.properties.get_mut(name).and_then(|b| b.downcast_mut::<T>())
    }

    /// Required property lookup for handlers that cannot proceed without a value an
    /// earlier handler was contracted to set (§7: a missing one is a `HostError`, never a
    /// protocol rejection).
    pub fn require_property<T: Any + Send + Sync>(&self, name: &'static str) -> Result<&T, crate::error::HostError> {
        self.property(name).ok_or(crate::error::HostError::MissingTransactionProperty(name))
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_round_trips_by_name_and_type() {
        let mut txn = Transaction::new();
        txn.set_property("client_id", "abc".to_string());
        assert_eq!(txn.property::<String>("client_id"), Some(&"abc".to_string()));
        assert_eq!(txn.property::<u32>("client_id"), None);
    }

    #[test]
    fn cancellation_signal_is_observed_through_clones() {
        let txn = Transaction::new();
        let signal = txn.cancellation_signal();
        assert!(!txn.is_canceled());
        signal.cancel();
        assert!(txn.is_canceled());
    }
}
