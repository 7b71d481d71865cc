//! Handler Descriptor Registry (§4.1).
//!
//! A handler is a pure unit of logic bound to exactly one [`ContextKind`]. Its descriptor
//! records an `order` used to sort the handlers active for that kind; orders are meant to
//! be assigned relative to neighbors (`previous + 1000`) so new handlers slot in without
//! renumbering everything else, the same convention the teacher's endpoint pipelines use
//! implicitly through fixed call order.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, ContextKind};
use crate::transaction::Transaction;

/// Whether a handler's instance is shared, built fresh per transaction, or a fixed
/// pre-built object attached to the descriptor (§3 Handler Descriptor).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImplementationKind {
    /// One instance shared across all transactions; must hold no mutable per-transaction
    /// state outside of the `Transaction` argument (§5 "Shared resources").
    Singleton,
    /// A fresh instance resolved per transaction from the ambient scope.
    Scoped,
    /// A pre-built object attached directly to the descriptor.
    Instance,
}

/// Where a handler originated: shipped with the engine, or registered by a host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandlerOrigin {
    BuiltIn,
    Custom,
}

/// A predicate the dispatcher evaluates before invoking a handler. All filters attached
/// to a handler must return `true` for it to run (§4.1).
pub trait Filter<C: Context>: Send + Sync {
    fn accept(&self, ctx: &C) -> bool;
}

impl<C: Context, F: Fn(&C) -> bool + Send + Sync> Filter<C> for F {
    fn accept(&self, ctx: &C) -> bool {
        self(ctx)
    }
}

/// A unit of pipeline logic. Handlers signal protocol failure by calling
/// `ctx.reject(..)`, never by returning `Err` (§7 Propagation policy); they may still
/// return `Err` for unexpected conditions, which the dispatcher lets propagate
/// unmodified after a debug-level log (§4.2).
#[async_trait]
pub trait Handler<C: Context>: Send + Sync {
    async fn handle(&self, ctx: &mut C, txn: &mut Transaction) -> Result<(), crate::error::HostError>;
}

/// Metadata for one handler (§3 Handler Descriptor).
///
/// `order` determines position within its `ContextKind`'s sorted list; ties resolve by
/// stable insertion order (§3 invariant, §8 invariant 1).
pub struct HandlerDescriptor<C: Context> {
    pub context_kind: ContextKind,
    pub order: i32,
    pub name: &'static str,
    pub origin: HandlerOrigin,
    pub implementation: ImplementationKind,
    pub filters: Vec<Arc<dyn Filter<C>>>,
    pub handler: Arc<dyn Handler<C>>,
}

impl<C: Context> HandlerDescriptor<C> {
    pub fn new(name: &'static str, order: i32, handler: Arc<dyn Handler<C>>) -> Self {
        HandlerDescriptor {
            context_kind: C::KIND,
            order,
            name,
            origin: HandlerOrigin::BuiltIn,
            implementation: ImplementationKind::Singleton,
            filters: Vec::new(),
            handler,
        }
    }

    pub fn custom(mut self) -> Self {
        self.origin = HandlerOrigin::Custom;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn Filter<C>>) -> Self {
        self.filters.push(filter);
        self
    }

    fn passes_filters(&self, ctx: &C) -> bool {
        self.filters.iter().all(|f| f.accept(ctx))
    }
}

/// Sorted handler descriptors for one `ContextKind`, keyed by insertion sequence to
/// implement the stable tie-break (§3 invariant, §8 invariant 1).
pub struct HandlerList<C: Context> {
    entries: Vec<(usize, HandlerDescriptor<C>)>,
    next_seq: usize,
}

impl<C: Context> Default for HandlerList<C> {
    fn default() -> Self {
        HandlerList {
            entries: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<C: Context> HandlerList<C> {
    /// Register a handler and re-sort. Colliding orders are permitted (stable insertion
    /// order breaks the tie) and logged rather than rejected (§4.1).
    pub fn register(&mut self, descriptor: HandlerDescriptor<C>) {
        if self.entries.iter().any(|(_, existing)| existing.order == descriptor.order) {
            tracing::debug!(order = descriptor.order, name = descriptor.name, "handler order collision, resolving by insertion order");
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push((seq, descriptor));
        self.sort();
    }

    fn sort(&mut self) {
        self.entries.sort_by(|(seq_a, a), (seq_b, b)| a.order.cmp(&b.order).then(seq_a.cmp(seq_b)));
    }

    /// The active handlers whose filters currently pass, in dispatch order.
    pub fn active<'a>(&'a self, ctx: &'a C) -> impl Iterator<Item = &'a HandlerDescriptor<C>> + 'a {
        self.entries.iter().map(|(_, d)| d).filter(move |d| d.passes_filters(ctx))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry of handler lists, one per `ContextKind` actually in use. Hosts build one
/// `HandlerList<C>` per context type they dispatch and own it directly; `Registry` here
/// is a thin typed facade used by `Dispatcher` so call sites don't need to track which
/// list belongs to which context type by hand.
#[derive(Default)]
pub struct Registry {
    _private: HashMap<&'static str, ()>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::authorization::ExtractAuthorizationRequest;
    use crate::transaction::Transaction;

    struct NoopHandler(&'static str, Arc<std::sync::Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Handler<ExtractAuthorizationRequest> for NoopHandler {
        async fn handle(&self, _ctx: &mut ExtractAuthorizationRequest, _txn: &mut Transaction) -> Result<(), crate::error::HostError> {
            self.1.lock().unwrap().push(self.0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn ties_resolve_by_insertion_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut list: HandlerList<ExtractAuthorizationRequest> = HandlerList::default();
        list.register(HandlerDescriptor::new("first", 100, Arc::new(NoopHandler("first", log.clone()))));
        list.register(HandlerDescriptor::new("second", 100, Arc::new(NoopHandler("second", log.clone()))));
        list.register(HandlerDescriptor::new("earlier", 50, Arc::new(NoopHandler("earlier", log.clone()))));

        let names: Vec<&str> = {
            let ctx = ExtractAuthorizationRequest::new();
            list.active(&ctx).map(|d| d.name).collect()
        };
        assert_eq!(names, vec!["earlier", "first", "second"]);
    }
}
