use async_trait::async_trait;
use types::{DeviceIdentity, EnergyModel, InverterSettings, Phase, PhaseReading, Status};

use crate::adapter::{ConnectionState, InverterAdapter, RefreshReport};
use crate::{AdapterError, InverterType};

const NOMINAL_VOLTAGE: f64 = 230.0;
const ENERGY_FORWARDED: f64 = 0.1;

/// Simulated inverter producing exactly its power limit on L1.
///
/// Only connects when it was selected explicitly, so probing never mistakes
/// it for real hardware.
pub struct Dummy {
    settings: InverterSettings,
    selected: bool,
    state: ConnectionState,
    identity: Option<DeviceIdentity>,
    energy: EnergyModel,
    status: Status,
}

impl Dummy {
    pub fn new(settings: InverterSettings, selected: bool) -> Self {
        Self {
            settings,
            selected,
            state: ConnectionState::Disconnected,
            identity: None,
            energy: EnergyModel::default(),
            status: Status::Off,
        }
    }
}

#[async_trait]
impl InverterAdapter for Dummy {
    fn kind(&self) -> InverterType {
        InverterType::Dummy
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    async fn test_connection(&mut self) -> Result<(), AdapterError> {
        self.state = ConnectionState::Connected {
            settings_loaded: false,
        };
        self.get_settings().await
    }

    async fn get_settings(&mut self) -> Result<(), AdapterError> {
        if !self.selected {
            self.state = ConnectionState::Disconnected;
            return Err(AdapterError::NotSelected(InverterType::Dummy));
        }
        if self.settings.max_ac_power == 0 {
            self.state = ConnectionState::Disconnected;
            return Err(AdapterError::MissingMaxPower);
        }
        let max = f64::from(self.settings.max_ac_power);
        self.identity = Some(DeviceIdentity::new(&self.settings, "1.0.0", "12345678"));
        self.energy.overall.power_limit = Some(max);
        self.energy.overall.active_power_limit = Some(max);
        self.state = ConnectionState::Connected {
            settings_loaded: true,
        };
        Ok(())
    }

    async fn refresh_data(&mut self) -> RefreshReport {
        if !self.state.is_ready() {
            return RefreshReport::not_connected();
        }
        let power = self.energy.overall.power_limit.unwrap_or(0.0);

        self.energy.zero_phases();
        *self.energy.phase_mut(Phase::L1) = PhaseReading {
            ac_voltage: Some(NOMINAL_VOLTAGE),
            ac_current: Some(power / NOMINAL_VOLTAGE),
            ac_power: Some(power),
            energy_forwarded: Some(ENERGY_FORWARDED),
        };
        self.energy.overall.ac_power = Some(power);
        self.energy.overall.energy_forwarded = Some(ENERGY_FORWARDED);
        self.energy.overall.active_power_limit = Some(power);
        self.status = Status::Generating;

        RefreshReport::default()
    }

    fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    fn energy(&self) -> &EnergyModel {
        &self.energy
    }

    fn energy_mut(&mut self) -> &mut EnergyModel {
        &mut self.energy
    }

    fn status(&self) -> Status {
        self.status
    }

    fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    fn settings(&self) -> &InverterSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        "Simulated".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> InverterSettings {
        InverterSettings {
            max_ac_power: 2_300,
            ..InverterSettings::default()
        }
    }

    #[tokio::test]
    async fn unselected_dummy_never_connects() {
        let mut dummy = Dummy::new(settings(), false);
        assert!(matches!(
            dummy.test_connection().await,
            Err(AdapterError::NotSelected(InverterType::Dummy))
        ));
        assert_eq!(dummy.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn refresh_follows_power_limit() {
        let mut dummy = Dummy::new(settings(), true);
        dummy.test_connection().await.expect("connect");
        dummy.set_power_limit(1_150.0);

        assert!(dummy.refresh_data().await.is_success());
        let energy = dummy.energy();
        assert_eq!(energy.l1.ac_power, Some(1_150.0));
        assert_eq!(energy.l1.ac_current, Some(5.0));
        assert_eq!(energy.l2, PhaseReading::zeroed());
        assert_eq!(dummy.status(), Status::Generating);
        assert_eq!(dummy.identity().map(|id| id.serial_number.as_str()), Some("12345678"));
    }
}
