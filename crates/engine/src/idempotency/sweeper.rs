use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::ResultEngine;

use super::IdempotencyStore;

/// Periodically deletes idempotency records older than the TTL.
///
/// Cleanup only: replay correctness never depends on it.
#[derive(Clone)]
pub struct IdempotencySweeper {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
    interval: Duration,
}

impl IdempotencySweeper {
    /// `interval` is raised to at least one millisecond.
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration, interval: Duration) -> Self {
        Self {
            store,
            ttl,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Deletes every record older than the TTL; returns how many.
    pub async fn sweep_once(&self) -> ResultEngine<u64> {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return Ok(0);
        };
        self.store.delete_expired(cutoff).await
    }

    /// Sweeps on every tick until `cancel` fires.
    ///
    /// A cancellation also interrupts an in-flight sweep; the delete is a
    /// single statement, so an interrupted sweep deletes nothing.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            ttl_secs = self.ttl.as_secs(),
            interval_secs = self.interval.as_secs(),
            "idempotency sweeper started"
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = self.sweep_once() => match result {
                            Ok(deleted) => tracing::debug!(deleted, "idempotency sweep done"),
                            Err(err) => tracing::error!(error = %err, "idempotency sweep failed"),
                        },
                    }
                }
            }
        }
        tracing::info!("idempotency sweeper stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
