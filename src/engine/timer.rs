//! Inactivity timers and one-shot ephemeral timers.
//!
//! Each active question token owns at most one inactivity timer. A timer entry
//! carries a generation that `restart` bumps, and a serial unique within the
//! scheduler. When a delay elapses the timer task calls [`TimerScheduler::fire`],
//! which forwards an [`Expiry`] to the escalation receiver only if the entry
//! still matches. The receiver re-checks with [`TimerScheduler::settle`] under
//! the question's lock before acting, so a restart that races with an elapsed
//! delay always wins, whatever the outcome of the abort.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::AbortHandle};
use tracing::{debug, instrument};

use crate::base::types::Void;

/// An elapsed inactivity timer, awaiting escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub token: String,
    pub generation: u64,
    serial: u64,
}

struct TimerEntry {
    generation: u64,
    serial: u64,
    handle: AbortHandle,
}

struct TimerSchedulerInner {
    timers: Mutex<HashMap<String, TimerEntry>>,
    next_serial: AtomicU64,
    expired: mpsc::UnboundedSender<Expiry>,
}

/// Owner of all inactivity timers.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct TimerScheduler {
    inner: Arc<TimerSchedulerInner>,
}

impl TimerScheduler {
    /// Creates a scheduler and the receiver on which current expiries arrive.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (expired, receiver) = mpsc::unbounded_channel();

        let inner = TimerSchedulerInner {
            timers: Mutex::new(HashMap::new()),
            next_serial: AtomicU64::new(0),
            expired,
        };

        (Self { inner: Arc::new(inner) }, receiver)
    }

    /// Starts a timer with generation 0.
    ///
    /// Returns `false` and leaves the existing timer alone if one is already running.
    #[instrument(skip(self))]
    pub fn start(&self, token: &str, timeout: Duration) -> bool {
        let mut timers = self.inner.timers.lock();

        if timers.contains_key(token) {
            debug!("Timer already running; start ignored.");
            return false;
        }

        let entry = self.spawn_entry(token, 0, timeout);
        timers.insert(token.to_string(), entry);

        true
    }

    /// Replaces the timer with one of the next generation, or starts one at 0.
    ///
    /// Returns the new generation.
    #[instrument(skip(self))]
    pub fn restart(&self, token: &str, timeout: Duration) -> u64 {
        let mut timers = self.inner.timers.lock();

        let generation = match timers.remove(token) {
            Some(previous) => {
                previous.handle.abort();
                previous.generation + 1
            }
            None => 0,
        };

        let entry = self.spawn_entry(token, generation, timeout);
        timers.insert(token.to_string(), entry);

        generation
    }

    /// Cancels and removes the timer; stopping an absent timer does nothing.
    ///
    /// Returns whether a timer was removed.
    #[instrument(skip(self))]
    pub fn stop(&self, token: &str) -> bool {
        match self.inner.timers.lock().remove(token) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// The live generation for `token`, if a timer is running.
    pub fn generation(&self, token: &str) -> Option<u64> {
        self.inner.timers.lock().get(token).map(|e| e.generation)
    }

    /// Number of running timers.
    pub fn len(&self) -> usize {
        self.inner.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forwards an elapsed timer for escalation if it is still the live one.
    ///
    /// Stale expiries (the timer was restarted or stopped meanwhile) are dropped.
    fn fire(&self, expiry: Expiry) -> bool {
        let timers = self.inner.timers.lock();

        if !Self::is_current(&timers, &expiry) {
            debug!(token = %expiry.token, generation = expiry.generation, "Discarding stale timer.");
            return false;
        }

        self.inner.expired.send(expiry).is_ok()
    }

    /// Consumes the timer entry if `expiry` is still the live one.
    ///
    /// Escalation must only proceed when this returns `true`.
    pub fn settle(&self, expiry: &Expiry) -> bool {
        let mut timers = self.inner.timers.lock();

        if !Self::is_current(&timers, expiry) {
            return false;
        }

        timers.remove(&expiry.token);
        true
    }

    /// Runs `action` once after `delay`; its failure is logged and dropped.
    pub fn schedule_once<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = Void> + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Err(err) = action.await {
                debug!("Ephemeral action failed: {}", err);
            }
        });
    }

    fn is_current(timers: &HashMap<String, TimerEntry>, expiry: &Expiry) -> bool {
        timers
            .get(&expiry.token)
            .is_some_and(|e| e.generation == expiry.generation && e.serial == expiry.serial)
    }

    fn spawn_entry(&self, token: &str, generation: u64, timeout: Duration) -> TimerEntry {
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
        let expiry = Expiry {
            token: token.to_string(),
            generation,
            serial,
        };

        let scheduler: Weak<TimerSchedulerInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            if let Some(inner) = scheduler.upgrade() {
                TimerScheduler { inner }.fire(expiry);
            }
        });

        TimerEntry {
            generation,
            serial,
            handle: task.abort_handle(),
        }
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn start_is_a_no_op_when_running() {
        let (timers, _rx) = TimerScheduler::new();

        assert!(timers.start("Q1", TIMEOUT));
        assert!(!timers.start("Q1", TIMEOUT));
        assert_eq!(timers.generation("Q1"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_bumps_generation_or_starts_fresh() {
        let (timers, _rx) = TimerScheduler::new();

        assert_eq!(timers.restart("Q1", TIMEOUT), 0);
        assert_eq!(timers.restart("Q1", TIMEOUT), 1);
        assert_eq!(timers.restart("Q1", TIMEOUT), 2);
        assert_eq!(timers.generation("Q1"), Some(2));
        assert_eq!(timers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let (timers, mut rx) = TimerScheduler::new();

        assert!(!timers.stop("missing"));

        timers.start("Q1", TIMEOUT);
        assert!(timers.stop("Q1"));
        assert!(!timers.stop("Q1"));

        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(rx.try_recv().is_err());
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_final_generation_fires() {
        let (timers, mut rx) = TimerScheduler::new();

        timers.start("Q1", TIMEOUT);
        for _ in 0..5 {
            tokio::time::sleep(TIMEOUT / 2).await;
            timers.restart("Q1", TIMEOUT);
        }

        tokio::time::sleep(TIMEOUT * 2).await;

        let expiry = rx.recv().await.unwrap();
        assert_eq!(expiry.token, "Q1");
        assert_eq!(expiry.generation, 5);
        assert!(rx.try_recv().is_err());

        assert!(timers.settle(&expiry));
        assert!(!timers.settle(&expiry));
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_dispatch_invalidates_expiry() {
        let (timers, mut rx) = TimerScheduler::new();

        timers.start("Q1", TIMEOUT);
        tokio::time::sleep(TIMEOUT * 2).await;
        let expiry = rx.recv().await.unwrap();

        // A message arrived between dispatch and escalation.
        timers.restart("Q1", TIMEOUT);

        assert!(!timers.settle(&expiry));
        assert_eq!(timers.generation("Q1"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_start_does_not_revive_old_expiry() {
        let (timers, mut rx) = TimerScheduler::new();

        timers.start("Q1", TIMEOUT);
        tokio::time::sleep(TIMEOUT * 2).await;
        let old = rx.recv().await.unwrap();

        timers.stop("Q1");
        timers.start("Q1", TIMEOUT);

        assert_eq!(timers.generation("Q1"), Some(old.generation));
        assert!(!timers.settle(&old));
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_are_independent() {
        let (timers, mut rx) = TimerScheduler::new();

        timers.start("Q1", TIMEOUT);
        timers.start("Q2", TIMEOUT * 3);
        tokio::time::sleep(TIMEOUT * 2).await;

        assert_eq!(rx.recv().await.unwrap().token, "Q1");
        assert!(rx.try_recv().is_err());
        assert_eq!(timers.generation("Q2"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn ephemeral_failures_are_swallowed() {
        let (timers, _rx) = TimerScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        timers.schedule_once(Duration::from_secs(30), async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("message already deleted"))
        });

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
