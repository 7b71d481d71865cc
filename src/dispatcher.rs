//! The dispatcher: walks a [`HandlerList`] for one [`Context`], invoking each active
//! handler until the context is handled, skipped, rejected, or the list is exhausted
//! (§4.2).
use thiserror::Error;

use crate::context::Context;
use crate::error::HostError;
use crate::registry::HandlerList;
use crate::transaction::Transaction;

/// Everything that can stop a dispatch loop besides the context's own control flow.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// A handler returned `Err` for a condition that is not a protocol rejection (§7);
    /// propagated to the caller unmodified after being logged at debug level.
    #[error(transparent)]
    Host(#[from] HostError),
    /// The host withdrew attention from this transaction before dispatch completed (§5).
    #[error(transparent)]
    Canceled(#[from] crate::error::Canceled),
}

/// Run every active handler in `list` against `ctx`, in order, stopping as soon as the
/// context reports it is handled, skipped, or rejected (§4.2).
///
/// A handler `Err` is not caught or translated into a rejection: it propagates to the
/// caller as-is, after a debug-level log naming the handler, because it represents a
/// condition the protocol layer has no vocabulary for (a broken host contract, a bug).
pub async fn dispatch<C: Context>(
    ctx: &mut C,
    list: &HandlerList<C>,
    txn: &mut Transaction,
) -> Result<(), DispatchError> {
    if txn.is_canceled() {
        return Err(DispatchError::Canceled(crate::error::Canceled));
    }

    let active: Vec<_> = list.active(ctx).map(|d| (d.name, d.handler.clone())).collect();

    for (name, handler) in active {
        if txn.is_canceled() {
            return Err(DispatchError::Canceled(crate::error::Canceled));
        }

        match handler.handle(ctx, txn).await {
            Ok(()) => {}
            Err(err) => {
                tracing::debug!(handler = name, error = %err, "handler returned an error, aborting dispatch");
                return Err(DispatchError::Host(err));
            }
        }

        if ctx.control().should_stop() {
            tracing::trace!(
                handler = name,
                handled = ctx.is_request_handled(),
                skipped = ctx.is_request_skipped(),
                rejected = ctx.is_rejected(),
                "dispatch stopped"
            );
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::authorization::ExtractAuthorizationRequest;
    use crate::error::{ProtocolErrorCode, Rejection};
    use crate::registry::{Handler, HandlerDescriptor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler<ExtractAuthorizationRequest> for CountingHandler {
        async fn handle(&self, _ctx: &mut ExtractAuthorizationRequest, _txn: &mut Transaction) -> Result<(), HostError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RejectingHandler;

    #[async_trait]
    impl Handler<ExtractAuthorizationRequest> for RejectingHandler {
        async fn handle(&self, ctx: &mut ExtractAuthorizationRequest, _txn: &mut Transaction) -> Result<(), HostError> {
            ctx.reject(Rejection::new(ProtocolErrorCode::InvalidRequest));
            Ok(())
        }
    }

    #[tokio::test]
    async fn stops_after_rejection() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut list: HandlerList<ExtractAuthorizationRequest> = HandlerList::default();
        list.register(HandlerDescriptor::new("reject", 100, Arc::new(RejectingHandler)));
        list.register(HandlerDescriptor::new("after", 200, Arc::new(CountingHandler(count.clone()))));

        let mut ctx = ExtractAuthorizationRequest::new();
        let mut txn = Transaction::new();
        dispatch(&mut ctx, &list, &mut txn).await.unwrap();

        assert!(ctx.is_rejected());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn runs_every_handler_when_none_short_circuit() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut list: HandlerList<ExtractAuthorizationRequest> = HandlerList::default();
        list.register(HandlerDescriptor::new("a", 100, Arc::new(CountingHandler(count.clone()))));
        list.register(HandlerDescriptor::new("b", 200, Arc::new(CountingHandler(count.clone()))));

        let mut ctx = ExtractAuthorizationRequest::new();
        let mut txn = Transaction::new();
        dispatch(&mut ctx, &list, &mut txn).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
