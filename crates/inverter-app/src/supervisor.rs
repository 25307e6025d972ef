use std::env;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIN_WATCHDOG_PING: Duration = Duration::from_millis(100);

/// Service manager hooks: readiness, shutdown and watchdog keep-alives.
///
/// Without a service manager (no `NOTIFY_SOCKET`, non-Linux targets) every
/// signal is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    watchdog: Option<Duration>,
}

impl Supervisor {
    pub fn new(watchdog: Option<Duration>) -> Self {
        Self { watchdog }
    }

    /// Reads the watchdog period systemd hands over in `WATCHDOG_USEC`/`WATCHDOG_PID`.
    pub fn from_env() -> Self {
        let usec = env::var("WATCHDOG_USEC").ok();
        let pid = env::var("WATCHDOG_PID").ok();
        Self::new(watchdog_interval(usec.as_deref(), pid.as_deref(), std::process::id()))
    }

    /// Period between keep-alive pings, if the manager expects them.
    pub fn watchdog(&self) -> Option<Duration> {
        self.watchdog
    }

    pub fn ready(&self, status: &str) {
        send(Signal::Ready(status));
    }

    pub fn stopping(&self) {
        send(Signal::Stopping);
    }

    /// Pings the watchdog until `shutdown` flips to true or its sender is dropped.
    pub fn spawn_watchdog(&self, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let period = self.watchdog?;
        info!(period_ms = period.as_millis() as u64, "watchdog enabled");
        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => send(Signal::Watchdog),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("watchdog stopped");
                            return;
                        }
                    }
                }
            }
        }))
    }
}

/// Half the manager's watchdog timeout, never below 100 ms.
///
/// `None` when no timeout is set, it does not parse, or it targets another pid.
pub fn watchdog_interval(usec: Option<&str>, pid: Option<&str>, own_pid: u32) -> Option<Duration> {
    let timeout = Duration::from_micros(usec?.trim().parse::<u64>().ok()?);
    if timeout.is_zero() {
        return None;
    }
    let addressed_to_us = pid
        .and_then(|value| value.trim().parse::<u32>().ok())
        .map_or(true, |target| target == own_pid);
    if !addressed_to_us {
        return None;
    }
    Some((timeout / 2).max(MIN_WATCHDOG_PING))
}

enum Signal<'a> {
    Ready(&'a str),
    Stopping,
    Watchdog,
}

#[cfg(target_os = "linux")]
fn send(signal: Signal<'_>) {
    use sd_notify::NotifyState;

    let (name, result) = match signal {
        Signal::Ready(status) => (
            "ready",
            sd_notify::notify(false, &[NotifyState::Ready, NotifyState::Status(status)]),
        ),
        Signal::Stopping => ("stopping", sd_notify::notify(false, &[NotifyState::Stopping])),
        Signal::Watchdog => ("watchdog", sd_notify::notify(false, &[NotifyState::Watchdog])),
    };
    if let Err(err) = result {
        warn!(signal = name, error = %err, "service manager notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn send(_signal: Signal<'_>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_half_the_timeout() {
        assert_eq!(
            watchdog_interval(Some("30000000"), None, 42),
            Some(Duration::from_secs(15))
        );
        assert_eq!(
            watchdog_interval(Some("30000000"), Some("42"), 42),
            Some(Duration::from_secs(15))
        );
    }

    #[test]
    fn short_timeouts_are_floored() {
        assert_eq!(
            watchdog_interval(Some("50000"), None, 1),
            Some(MIN_WATCHDOG_PING)
        );
    }

    #[test]
    fn missing_or_foreign_watchdog_is_ignored() {
        assert_eq!(watchdog_interval(None, None, 1), None);
        assert_eq!(watchdog_interval(Some("0"), None, 1), None);
        assert_eq!(watchdog_interval(Some("soon"), None, 1), None);
        assert_eq!(watchdog_interval(Some("30000000"), Some("7"), 1), None);
    }

    #[tokio::test]
    async fn watchdog_task_ends_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor::new(Some(Duration::from_millis(5)));
        let handle = supervisor.spawn_watchdog(shutdown_rx).expect("watchdog");

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).expect("send");
        handle.await.expect("join");
    }

    #[test]
    fn no_watchdog_spawns_nothing() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(Supervisor::default().spawn_watchdog(shutdown_rx).is_none());
    }
}
