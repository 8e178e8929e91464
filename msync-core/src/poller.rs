//! Polling Fallback Timer
//!
//! Fires a callback (a reconciliation trigger) every interval until stopped.
//! The first fire happens one full interval after start; the opening pass is
//! the scope's job.

use msync_common::ScopeKey;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Stops a running poll timer; dropping it stops the timer too
#[derive(Debug)]
pub struct PollHandle {
    key: ScopeKey,
    interval: Duration,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// No further ticks fire after this returns
    ///
    /// A callback already running is allowed to finish.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            debug!(scope = %self.key, "Polling stopped");
            self.token.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop and wait for the timer task to exit
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start firing `on_tick` every `interval` for `key`
///
/// Ticks that fall behind are skipped rather than bunched. `on_tick` runs
/// inline, so ticks never overlap.
pub fn start_polling<F, Fut>(key: ScopeKey, interval: Duration, on_tick: F) -> PollHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();
    let scope = key.clone();

    debug!(scope = %key, interval_ms = interval.as_millis() as u64, "Polling started");

    let task = tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                _ = timer.tick() => {
                    debug!(scope = %scope, "Poll tick");
                    on_tick().await;
                }
            }
        }
    });

    PollHandle {
        key,
        interval,
        token,
        task: Some(task),
    }
}
