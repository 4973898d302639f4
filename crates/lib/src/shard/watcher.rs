//! Change propagation for a shard handle.
//!
//! Store watches are one-shot, so the task re-arms before it refreshes: any
//! change that lands after the refresh's read is then guaranteed to produce
//! another notification. Bursts of remote writes may collapse into a single
//! refresh; only convergence on the latest state is promised.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::Inner;
use crate::coordination::{WatchEvent, Watcher};

const RETRY_BACKOFF_START: Duration = Duration::from_millis(50);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Runs until the handle is closed (which aborts the task).
pub(crate) async fn run(
    inner: Arc<Inner>,
    sender: mpsc::UnboundedSender<WatchEvent>,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
) {
    while let Some(event) = events.recv().await {
        if inner.is_closed() {
            break;
        }
        trace!(kind = ?event.kind, "term record changed");

        if !rearm(&inner, &sender).await {
            break;
        }

        if !refresh(&inner).await {
            break;
        }
    }
    debug!("watch task stopped");
}

/// Refreshes the cache and publishes any change, retrying with backoff
/// while the store is unreachable. Returns false if the handle closed.
async fn refresh(inner: &Inner) -> bool {
    let mut backoff = RETRY_BACKOFF_START;
    loop {
        if inner.is_closed() {
            return false;
        }
        match inner.store.refresh().await {
            Ok(changed) => {
                trace!(changed, "refreshed terms");
                // Also flushes local writes that were not published inline.
                inner.publish();
                return true;
            }
            Err(e) if e.is_connection_error() => {
                warn!(error = %e, ?backoff, "failed to refresh terms after watch fired");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
            }
            Err(e) => {
                warn!(error = %e, "dropping unreadable terms update");
                return true;
            }
        }
    }
}

/// Arms a fresh watcher, retrying with backoff while the store is
/// unreachable. Returns false if the handle closed meanwhile.
async fn rearm(inner: &Inner, sender: &mpsc::UnboundedSender<WatchEvent>) -> bool {
    let mut backoff = RETRY_BACKOFF_START;
    loop {
        if inner.is_closed() {
            return false;
        }
        let watcher = Watcher::channel(sender.clone());
        match inner.store.client().watch(inner.store.path(), watcher).await {
            Ok(()) => return true,
            Err(e) => {
                warn!(error = %e, ?backoff, "failed to re-arm terms watch");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
            }
        }
    }
}
