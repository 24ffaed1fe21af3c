//! Idle Watchdog
//!
//! Forces a reconnect when the stream has been silent for longer than the
//! configured timeout. Runs on its own timer, independent of the read loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Floor for the check interval; the timer cannot tick on a zero period.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// What the watchdog observes and acts on.
pub trait WatchdogTarget: Send + Sync {
    /// Check whether the stream is currently listening.
    fn is_listening(&self) -> bool;

    /// Instant the idle period started: the last event, or the start of the
    /// session if nothing has arrived yet.
    fn idle_since(&self) -> Option<Instant>;

    /// Drop the current connection and reconnect. Returns `false` if there
    /// was no live connection to drop.
    fn force_reconnect(&self) -> bool;
}

/// Configuration for the idle watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Idle threshold; `None` disables the watchdog.
    pub timeout: Option<Duration>,
    /// Interval between checks, at least one millisecond.
    pub check_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            check_interval: Duration::from_secs(5),
        }
    }
}

impl WatchdogConfig {
    /// Build from a timeout in seconds; zero or negative disables the watchdog.
    #[must_use]
    pub fn from_secs(timeout_secs: f64, check_interval: Duration) -> Self {
        let timeout = (timeout_secs > 0.0)
            .then(|| Duration::try_from_secs_f64(timeout_secs).ok())
            .flatten();
        Self {
            timeout,
            check_interval,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background idle check.
pub struct IdleWatchdog {
    config: WatchdogConfig,
    running: Mutex<Option<Running>>,
}

impl IdleWatchdog {
    /// Create a stopped watchdog.
    #[must_use]
    pub const fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    /// Check whether the watchdog is enabled at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.timeout.is_some()
    }

    /// Start checking `target`. Does nothing if disabled or already started.
    pub fn start(&self, target: Arc<dyn WatchdogTarget>) {
        let Some(timeout) = self.config.timeout else {
            return;
        };

        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let interval = self.config.check_interval.max(MIN_CHECK_INTERVAL);
        let handle = tokio::spawn(run(target, timeout, interval, cancel.clone()));
        *running = Some(Running { cancel, handle });

        tracing::debug!(
            timeout_secs = timeout.as_secs_f64(),
            interval_secs = interval.as_secs_f64(),
            "Idle watchdog started"
        );
    }

    /// Stop the watchdog. Safe to call when it never started.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.cancel.cancel();
            running.handle.abort();
            tracing::debug!("Idle watchdog stopped");
        }
    }
}

impl Drop for IdleWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    target: Arc<dyn WatchdogTarget>,
    timeout: Duration,
    check_interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + check_interval, check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => check(target.as_ref(), timeout),
        }
    }
}

fn check(target: &dyn WatchdogTarget, timeout: Duration) {
    if !target.is_listening() {
        return;
    }
    let Some(since) = target.idle_since() else {
        return;
    };

    let idle = since.elapsed();
    if idle > timeout {
        tracing::warn!(
            idle_secs = idle.as_secs_f64(),
            timeout_secs = timeout.as_secs_f64(),
            "Stream idle, forcing reconnect"
        );
        // No live connection while a reconnect is already pending.
        if target.force_reconnect() {
            crate::infrastructure::metrics::record_watchdog_reconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeTarget {
        listening: AtomicBool,
        since: Mutex<Option<Instant>>,
        forced: AtomicUsize,
    }

    impl FakeTarget {
        fn idle_for(idle: Duration) -> Arc<Self> {
            Arc::new(Self {
                listening: AtomicBool::new(true),
                since: Mutex::new(Some(Instant::now() - idle)),
                forced: AtomicUsize::new(0),
            })
        }
    }

    impl WatchdogTarget for FakeTarget {
        fn is_listening(&self) -> bool {
            self.listening.load(Ordering::SeqCst)
        }

        fn idle_since(&self) -> Option<Instant> {
            *self.since.lock()
        }

        fn force_reconnect(&self) -> bool {
            self.forced.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn non_positive_timeout_disables() {
        let watchdog =
            |secs| IdleWatchdog::new(WatchdogConfig::from_secs(secs, Duration::from_secs(5)));

        assert!(!watchdog(0.0).is_enabled());
        assert!(!watchdog(-1.0).is_enabled());
        assert!(watchdog(0.5).is_enabled());
    }

    #[test]
    fn stop_without_start_is_safe() {
        let watchdog = IdleWatchdog::new(WatchdogConfig::from_secs(1.0, Duration::from_secs(5)));
        watchdog.stop();
        watchdog.stop();
    }

    #[test]
    fn check_forces_reconnect_once_per_call() {
        let target = FakeTarget::idle_for(Duration::from_secs(10));

        check(target.as_ref(), Duration::from_secs(1));
        assert_eq!(target.forced.load(Ordering::SeqCst), 1);

        check(target.as_ref(), Duration::from_secs(1));
        assert_eq!(target.forced.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn check_ignores_when_not_listening() {
        let target = FakeTarget::idle_for(Duration::from_secs(10));
        target.listening.store(false, Ordering::SeqCst);

        check(target.as_ref(), Duration::from_secs(1));

        assert_eq!(target.forced.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn check_ignores_recent_activity() {
        let target = FakeTarget::idle_for(Duration::ZERO);

        check(target.as_ref(), Duration::from_secs(1));

        assert_eq!(target.forced.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_tick_while_idle() {
        let target = FakeTarget::idle_for(Duration::from_secs(10));
        let watchdog = IdleWatchdog::new(WatchdogConfig::from_secs(1.0, Duration::from_secs(5)));

        watchdog.start(target.clone());
        tokio::time::sleep(Duration::from_millis(12_500)).await;

        assert_eq!(target.forced.load(Ordering::SeqCst), 2);
        watchdog.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_check_interval_still_ticks() {
        let target = FakeTarget::idle_for(Duration::from_secs(10));
        let watchdog = IdleWatchdog::new(WatchdogConfig::from_secs(1.0, Duration::ZERO));

        watchdog.start(target.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(target.forced.load(Ordering::SeqCst) >= 1);
        watchdog.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_watchdog_never_fires() {
        let target = FakeTarget::idle_for(Duration::from_secs(10));
        let watchdog = IdleWatchdog::new(WatchdogConfig::default());

        watchdog.start(target.clone());
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(target.forced.load(Ordering::SeqCst), 0);
    }
}
