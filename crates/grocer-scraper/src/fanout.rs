//! Bounded concurrent execution of independent fetch units.
//!
//! A [`RequestLimiter`] pairs a per-store semaphore with the run's
//! cancellation token. Every network call holds exactly one permit, so all
//! fanouts built on the same limiter (outer over categories, inner over
//! pages, the count pass, discovery side passes) share a single in-flight
//! ceiling for the store.
//!
//! Outer fanouts whose units only orchestrate inner fanouts run without a
//! permit ([`BoundedFanout::run_unbounded`]); holding one there while inner
//! units wait for theirs would deadlock once every permit is parked in an
//! outer unit.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::ScraperError;

#[derive(Debug, Clone)]
pub struct RequestLimiter {
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    capacity: usize,
}

impl RequestLimiter {
    /// Creates a limiter allowing `capacity` in-flight calls (at least one).
    #[must_use]
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            cancel,
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for a permit. `None` once the run is cancelled.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        }
    }

    /// Runs `fut` while holding one permit.
    ///
    /// Returns `None` if cancellation fires before the permit is granted or
    /// while `fut` is still in flight; `fut` is dropped in the latter case.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        let _permit = self.acquire().await?;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

/// Per-fanout accounting. `completed + skipped + failed == submitted` once
/// the fanout has returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    pub submitted: usize,
    pub completed: usize,
    /// Units never started, or abandoned mid-flight, because the run was
    /// cancelled.
    pub skipped: usize,
    pub failed: usize,
}

impl FanoutSummary {
    pub fn absorb(&mut self, other: FanoutSummary) {
        self.submitted += other.submitted;
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug)]
pub struct FanoutResults<R> {
    /// Outputs of completed units, in completion order.
    pub outputs: Vec<R>,
    pub summary: FanoutSummary,
}

enum UnitOutcome<R> {
    Completed(R),
    Failed,
    Skipped,
}

impl<R> From<Option<Result<R, ScraperError>>> for UnitOutcome<R> {
    fn from(result: Option<Result<R, ScraperError>>) -> Self {
        match result {
            Some(Ok(value)) => UnitOutcome::Completed(value),
            None | Some(Err(ScraperError::Cancelled)) => UnitOutcome::Skipped,
            Some(Err(_)) => UnitOutcome::Failed,
        }
    }
}

/// Spawns one task per unit and joins all of them before returning.
///
/// Units report failure by returning `Err`; the fanout only counts it. Log
/// inside `work` where the unit's context (category, page) is known.
#[derive(Debug, Clone)]
pub struct BoundedFanout {
    limiter: RequestLimiter,
}

impl BoundedFanout {
    #[must_use]
    pub fn new(limiter: RequestLimiter) -> Self {
        Self { limiter }
    }

    #[must_use]
    pub fn limiter(&self) -> &RequestLimiter {
        &self.limiter
    }

    /// Runs every unit under one limiter permit.
    pub async fn collect_bounded<U, R, F, Fut>(
        &self,
        units: impl IntoIterator<Item = U>,
        work: F,
    ) -> FanoutResults<R>
    where
        U: Send + 'static,
        R: Send + 'static,
        F: Fn(U) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<R, ScraperError>> + Send + 'static,
    {
        let mut summary = FanoutSummary::default();
        let mut set = JoinSet::new();
        for unit in units {
            summary.submitted += 1;
            if self.limiter.is_cancelled() {
                summary.skipped += 1;
                continue;
            }
            let limiter = self.limiter.clone();
            let work = work.clone();
            set.spawn(async move { UnitOutcome::from(limiter.run(work(unit)).await) });
        }
        join_all(set, summary).await
    }

    /// Runs every unit without taking a permit. Units are expected to issue
    /// their network calls through a bounded fanout or [`RequestLimiter::run`]
    /// on the same limiter.
    pub async fn run_unbounded<U, R, F, Fut>(
        &self,
        units: impl IntoIterator<Item = U>,
        work: F,
    ) -> FanoutResults<R>
    where
        U: Send + 'static,
        R: Send + 'static,
        F: Fn(U) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<R, ScraperError>> + Send + 'static,
    {
        let mut summary = FanoutSummary::default();
        let mut set = JoinSet::new();
        for unit in units {
            summary.submitted += 1;
            if self.limiter.is_cancelled() {
                summary.skipped += 1;
                continue;
            }
            let work = work.clone();
            set.spawn(async move { UnitOutcome::from(Some(work(unit).await)) });
        }
        join_all(set, summary).await
    }
}

async fn join_all<R: Send + 'static>(
    mut set: JoinSet<UnitOutcome<R>>,
    mut summary: FanoutSummary,
) -> FanoutResults<R> {
    let mut outputs = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(UnitOutcome::Completed(value)) => {
                summary.completed += 1;
                outputs.push(value);
            }
            Ok(UnitOutcome::Skipped) => summary.skipped += 1,
            Ok(UnitOutcome::Failed) => summary.failed += 1,
            Err(e) => {
                tracing::error!(error = %e, "fanout task panicked");
                summary.failed += 1;
            }
        }
    }
    FanoutResults { outputs, summary }
}

/// Producer half of the record aggregation channel.
///
/// Pages are sent whole. Once the run is cancelled nothing more is sent, so
/// a consumer that drains after cancellation only sees pages finished
/// before it.
pub struct Emitter<T> {
    tx: mpsc::UnboundedSender<T>,
    cancel: CancellationToken,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> Emitter<T> {
    /// Sends every item of one page; returns how many were sent.
    pub fn emit_page(&self, items: Vec<T>) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }
        let mut sent = 0;
        for item in items {
            if self.tx.send(item).is_err() {
                break;
            }
            sent += 1;
        }
        sent
    }
}

#[must_use]
pub fn record_channel<T>(cancel: CancellationToken) -> (Emitter<T>, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Emitter { tx, cancel }, rx)
}

#[cfg(test)]
#[path = "fanout_test.rs"]
mod tests;
