use crate::PollerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Consecutive failures before the device is published as offline.
    pub offline_after: u32,
    /// Consecutive failures before polling gives up for good.
    pub terminate_after: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            offline_after: 10,
            terminate_after: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    /// Degraded -> Healthy.
    Recovered,
    /// Healthy -> Degraded.
    WentOffline,
    /// Entered Terminal. Reported once; Terminal is absorbing.
    Terminated,
}

/// Consecutive-failure counter deciding online/offline and when to give up.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    failures: u32,
    state: HealthState,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds) -> Result<Self, PollerError> {
        if thresholds.offline_after == 0 || thresholds.terminate_after <= thresholds.offline_after {
            return Err(PollerError::InvalidThresholds {
                offline_after: thresholds.offline_after,
                terminate_after: thresholds.terminate_after,
            });
        }
        Ok(Self {
            thresholds,
            failures: 0,
            state: HealthState::Healthy,
        })
    }

    pub fn record(&mut self, success: bool) -> HealthTransition {
        if success {
            self.record_success()
        } else {
            self.record_failure()
        }
    }

    pub fn record_success(&mut self) -> HealthTransition {
        match self.state {
            HealthState::Terminal => HealthTransition::Unchanged,
            HealthState::Degraded => {
                self.failures = 0;
                self.state = HealthState::Healthy;
                HealthTransition::Recovered
            }
            HealthState::Healthy => {
                self.failures = 0;
                HealthTransition::Unchanged
            }
        }
    }

    pub fn record_failure(&mut self) -> HealthTransition {
        if self.state == HealthState::Terminal {
            return HealthTransition::Unchanged;
        }
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.thresholds.terminate_after {
            self.state = HealthState::Terminal;
            return HealthTransition::Terminated;
        }
        if self.failures >= self.thresholds.offline_after && self.state == HealthState::Healthy {
            self.state = HealthState::Degraded;
            return HealthTransition::WentOffline;
        }
        HealthTransition::Unchanged
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The flag published downstream; only Healthy counts as online.
    pub fn is_online(&self) -> bool {
        self.state == HealthState::Healthy
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }
}
