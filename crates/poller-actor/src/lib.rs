use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use inverter::{InverterAdapter, RefreshReport};

mod command;
mod health;
mod snapshot;

pub use command::{CommandError, SinkCommand};
pub use health::{HealthMonitor, HealthState, HealthThresholds, HealthTransition};
pub use snapshot::{ServiceInfo, Snapshot, UpdateIndex, PRODUCT_ID};

#[derive(Debug, Clone)]
pub struct ActorConfig {
    pub poll_interval: Duration,
    pub health: HealthThresholds,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            health: HealthThresholds::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("inverter offline after {failures} consecutive failed polls")]
    Offline { failures: u32 },
    #[error("terminate_after ({terminate_after}) must exceed offline_after ({offline_after}) and offline_after must be >= 1")]
    InvalidThresholds { offline_after: u32, terminate_after: u32 },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("publish channel closed")]
    Closed,
}

/// Consumer of per-poll snapshots.
#[async_trait]
pub trait PublishSink: Send {
    async fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishError>;
}

/// Forwards snapshots to a channel, e.g. a publisher task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Snapshot>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<Snapshot>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl PublishSink for ChannelSink {
    async fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishError> {
        self.sender
            .send(snapshot.clone())
            .await
            .map_err(|_| PublishError::Closed)
    }
}

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub success: bool,
    pub online: bool,
    pub transition: HealthTransition,
    pub update_index: u8,
}

/// Drives one inverter: refresh, health bookkeeping, publish, on a fixed interval.
pub struct PollerActor<S> {
    adapter: Box<dyn InverterAdapter>,
    sink: S,
    commands: mpsc::Receiver<SinkCommand>,
    shutdown: watch::Receiver<bool>,
    config: ActorConfig,
    health: HealthMonitor,
    service: ServiceInfo,
    custom_name: String,
    update_index: UpdateIndex,
}

impl<S: PublishSink> PollerActor<S> {
    pub fn new(
        adapter: Box<dyn InverterAdapter>,
        sink: S,
        commands: mpsc::Receiver<SinkCommand>,
        shutdown: watch::Receiver<bool>,
        service: ServiceInfo,
        config: ActorConfig,
    ) -> Result<Self, PollerError> {
        let health = HealthMonitor::new(config.health)?;
        let custom_name = service.product_name.clone();
        Ok(Self {
            adapter,
            sink,
            commands,
            shutdown,
            config,
            health,
            service,
            custom_name,
            update_index: UpdateIndex::default(),
        })
    }

    pub fn adapter(&self) -> &dyn InverterAdapter {
        self.adapter.as_ref()
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Polls until shutdown is requested or the health monitor gives up.
    pub async fn run(mut self) -> Result<(), PollerError> {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *self.shutdown.borrow() {
                info!("poller shutdown requested");
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await?;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("poller shutdown requested");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// One cycle: apply pending commands, refresh, record health, publish.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, PollerError> {
        self.apply_commands();

        let report = self.adapter.refresh_data().await;
        let success = report.is_success();
        log_report(&report);

        let transition = self.health.record(success);
        let failures = self.health.failures();
        metrics::counter!(
            "inverter_refresh_total",
            "result" => if success { "success" } else { "failure" }
        )
        .increment(1);
        metrics::gauge!("inverter_consecutive_failures").set(f64::from(failures));
        match transition {
            HealthTransition::WentOffline => warn!(failures, "inverter marked offline"),
            HealthTransition::Recovered => info!("inverter back online"),
            HealthTransition::Terminated => {
                warn!(failures, "inverter seems to be offline, quitting")
            }
            HealthTransition::Unchanged => {}
        }

        let online = self.health.is_online();
        let update_index = self.update_index.advance();
        let snapshot = Snapshot::capture(
            self.adapter.as_ref(),
            &self.service,
            &self.custom_name,
            online,
            update_index,
        );
        if let Err(err) = self.sink.publish(&snapshot).await {
            warn!(error = %err, "snapshot publish failed");
        }
        debug!(
            update_index,
            energy_forwarded = ?self.adapter.energy().overall.energy_forwarded,
            "published"
        );

        if transition == HealthTransition::Terminated {
            return Err(PollerError::Offline { failures });
        }

        Ok(PollOutcome {
            success,
            online,
            transition,
            update_index,
        })
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                SinkCommand::SetPowerLimit(watts) => {
                    self.adapter.set_power_limit(watts);
                }
                SinkCommand::SetCustomName(name) => {
                    info!(%name, "custom name changed");
                    self.custom_name = name;
                }
            }
        }
    }
}

fn log_report(report: &RefreshReport) {
    for failure in &report.failures {
        debug!(error = %failure, transient = failure.is_transient(), "refresh step failed");
    }
    if let Some(err) = &report.correction_failure {
        warn!(error = %err, "power limit correction not applied");
    }
    if let Some(encoded) = report.limit_written {
        info!(encoded, "power limit written");
    }
}
