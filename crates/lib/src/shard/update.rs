//! Conflict-retry loop shared by every mutation.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::store::CasOutcome;
use super::{Inner, ShardTermsError};
use crate::Result;
use crate::terms::Terms;

impl Inner {
    /// Applies `compute` to the freshest cached mapping and writes the result
    /// with compare-and-swap, recomputing after every conflict.
    ///
    /// `compute` returns `None` when no write is needed. That verdict only
    /// stands if a fresh read leaves the cache at the generation it was
    /// computed from; otherwise it is recomputed, so a lagging cache never
    /// turns a needed write into a no-op. Errors from `compute` end the
    /// update. The loop gives up with [`ShardTermsError::RetryTimeout`] once
    /// the configured retry budget is spent, and with
    /// [`ShardTermsError::Closed`] if the handle is closed between attempts.
    pub(super) async fn update<F>(&self, operation: &'static str, mut compute: F) -> Result<()>
    where
        F: FnMut(&Terms) -> Result<Option<Terms>>,
    {
        let started = Instant::now();
        let timeout = self.config.retry_timeout();
        let mut attempt: u32 = 0;

        loop {
            self.ensure_open()?;
            attempt += 1;

            let base = self.store.read();
            let Some(new_terms) = compute(&base.terms)? else {
                self.store.refresh().await?;
                if self.store.read().generation == base.generation {
                    trace!(operation, attempt, "terms already satisfy the update");
                    return Ok(());
                }
                self.publish();
                trace!(operation, attempt, "terms moved while confirming a no-op");
                self.check_budget(operation, started, timeout)?;
                continue;
            };

            match self.store.compare_and_swap(&base, &new_terms).await? {
                CasOutcome::Applied(version) => {
                    debug!(
                        operation,
                        attempt,
                        %version,
                        collection = %self.collection,
                        shard = %self.shard,
                        "terms updated"
                    );
                    if self.config.notify_on_local_write {
                        self.publish();
                    }
                    return Ok(());
                }
                CasOutcome::Conflict => {
                    // The refresh behind the conflict may carry remote changes.
                    self.publish();
                    self.check_budget(operation, started, timeout)?;
                    trace!(operation, attempt, "retrying after conflict");

                    let backoff = self.config.conflict_backoff();
                    if backoff.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
    }

    fn check_budget(&self, operation: &'static str, started: Instant, timeout: Duration) -> Result<()> {
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(ShardTermsError::RetryTimeout {
                collection: self.collection.clone(),
                shard: self.shard.clone(),
                operation,
                elapsed,
            }
            .into());
        }
        Ok(())
    }
}
