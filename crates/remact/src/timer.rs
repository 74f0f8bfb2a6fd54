// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic task driver.
//!
//! Ports and catalog components expose synchronous `tick`/`do_periodic_tasks`
//! entry points; [`spawn_periodic`] drives them from a tokio interval.
//! [`TickGate`] prevents a slow tick from overlapping the next one.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Reentrancy guard for periodic work.
#[derive(Debug, Default)]
pub struct TickGate {
    busy: AtomicBool,
}

impl TickGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the gate, or `None` when a tick is still running.
    pub fn try_enter(&self) -> Option<TickGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickGuard { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the [`TickGate`] on drop.
#[derive(Debug)]
pub struct TickGuard<'a> {
    gate: &'a TickGate,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

/// Handle to a task started by [`spawn_periodic`].
#[derive(Debug)]
pub struct PeriodicTask {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl PeriodicTask {
    /// Stop after the current tick and wait for the task to end.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            debug!("periodic task ended abnormally: {}", e);
        }
    }

    /// Stop without waiting.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Call `tick` every `period` with the time elapsed since the previous call.
///
/// Missed ticks are skipped, not replayed.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> PeriodicTask
where
    F: FnMut(Duration) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let shutdown = Arc::new(Notify::new());
    let stop = Arc::clone(&shutdown);
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately.
        interval.tick().await;
        let mut last = Instant::now();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last);
                    last = now;
                    trace!("{} tick ({:?})", name, elapsed);
                    tick(elapsed).await;
                }
                _ = stop.notified() => {
                    debug!("{} stopped", name);
                    break;
                }
            }
        }
    });
    PeriodicTask { handle, shutdown }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_gate_rejects_reentry() {
        let gate = TickGate::new();
        let guard = gate.try_enter();
        assert!(guard.is_some());
        assert!(gate.is_busy());
        assert!(gate.try_enter().is_none());
        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_enter().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_reports_elapsed_time() {
        let total_ms = Arc::new(AtomicU64::new(0));
        let ticks = Arc::new(AtomicU64::new(0));
        let (t, n) = (Arc::clone(&total_ms), Arc::clone(&ticks));
        let task = spawn_periodic("test", Duration::from_millis(100), move |elapsed| {
            let (t, n) = (Arc::clone(&t), Arc::clone(&n));
            async move {
                t.fetch_add(elapsed.as_millis() as u64, Ordering::SeqCst);
                n.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        task.stop().await;

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(total_ms.load(Ordering::SeqCst), 300);
    }
}
