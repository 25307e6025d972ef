use async_trait::async_trait;
use modbus_client::Transport;
use register_codec::{serial_from_words, DataType};
use tracing::{debug, info, warn};
use types::{DeviceIdentity, EnergyModel, InverterSettings, Phase, Status, StatusTable};

use crate::adapter::{read_scaled, ConnectionState, InverterAdapter, RefreshReport};
use crate::power_limit::{Correction, PowerLimitController, PowerLimitRegisters};
use crate::{AdapterError, InverterType};

pub const PRODUCT_MODEL: u16 = 224;

const REG_PRODUCT_MODEL: u16 = 2999;
const REG_DSP_VERSION: u16 = 3000;
const REG_OUTPUT_TYPE: u16 = 3002;
const REG_AC_POWER: u16 = 3004;
const REG_ENERGY_TOTAL: u16 = 3014;
const REG_VOLTAGE: [u16; 3] = [3033, 3034, 3035];
const REG_CURRENT: [u16; 3] = [3036, 3037, 3038];
const REG_SINGLE_VOLTAGE: u16 = 3035;
const REG_SINGLE_CURRENT: u16 = 3038;
const REG_STATUS: u16 = 3043;
const REG_SERIAL: u16 = 3060;
const SERIAL_REGISTERS: u16 = 4;

const POWER_LIMIT: PowerLimitRegisters = PowerLimitRegisters {
    read: 3049,
    write: 3051,
};

/// Solis operating states. Anything else the device reports is a fault.
pub const STATUS_TABLE: StatusTable = StatusTable::new(&[
    (0, Status::Waiting),
    (1, Status::StartingA),
    (2, Status::StartingB),
    (3, Status::Generating),
]);

/// Solis string inverters over Modbus RTU.
pub struct Solis<T> {
    transport: T,
    settings: InverterSettings,
    power_limit: PowerLimitController,
    state: ConnectionState,
    identity: Option<DeviceIdentity>,
    energy: EnergyModel,
    status: Status,
}

impl<T: Transport> Solis<T> {
    pub fn new(transport: T, settings: InverterSettings) -> Self {
        let power_limit = PowerLimitController::new(POWER_LIMIT, settings.max_ac_power);
        Self {
            transport,
            settings,
            power_limit,
            state: ConnectionState::Disconnected,
            identity: None,
            energy: EnergyModel::default(),
            status: Status::Off,
        }
    }

    async fn read(
        &mut self,
        address: u16,
        data_type: DataType,
        scale: f64,
        digits: u32,
        failures: &mut Vec<AdapterError>,
    ) -> Option<f64> {
        match read_scaled(&mut self.transport, address, data_type, scale, digits).await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(address, error = %err, "register read failed");
                failures.push(err);
                None
            }
        }
    }

    async fn load_settings(&mut self) -> Result<DeviceIdentity, AdapterError> {
        if self.settings.max_ac_power == 0 {
            return Err(AdapterError::MissingMaxPower);
        }

        let hardware_version =
            read_scaled(&mut self.transport, REG_DSP_VERSION, DataType::U16, 1.0, 0).await?;
        debug!(hardware_version, "DSP version");

        let words = self
            .transport
            .read_input_registers(REG_SERIAL, SERIAL_REGISTERS)
            .await
            .map_err(|source| AdapterError::Transport {
                address: REG_SERIAL,
                source,
            })?;
        let serial_number = serial_from_words(&words);
        debug!(%serial_number, "serial number");

        let watts = self
            .power_limit
            .read_active(&mut self.transport, &mut self.energy)
            .await?;
        self.energy.overall.power_limit = Some(watts);

        Ok(DeviceIdentity::new(
            &self.settings,
            format!("{}", hardware_version as u32),
            serial_number,
        ))
    }

    async fn read_phases(&mut self, single_phase: bool, failures: &mut Vec<AdapterError>) {
        if single_phase {
            let phase = self.settings.phase;
            self.energy.zero_phases();
            if let Some(voltage) = self.read(REG_SINGLE_VOLTAGE, DataType::U16, 0.1, 0, failures).await {
                self.energy.phase_mut(phase).ac_voltage = Some(voltage);
            }
            if let Some(current) = self.read(REG_SINGLE_CURRENT, DataType::U16, 0.1, 2, failures).await {
                self.energy.phase_mut(phase).ac_current = Some(current);
            }
            // Single-phase units meter one channel; the aggregate stands in for it.
            let overall = self.energy.overall;
            let reading = self.energy.phase_mut(phase);
            reading.ac_power = overall.ac_power;
            reading.energy_forwarded = overall.energy_forwarded;
            return;
        }

        for (index, phase) in Phase::ALL.into_iter().enumerate() {
            if let Some(voltage) = self.read(REG_VOLTAGE[index], DataType::U16, 0.1, 0, failures).await {
                self.energy.phase_mut(phase).ac_voltage = Some(voltage);
            }
        }
        for (index, phase) in Phase::ALL.into_iter().enumerate() {
            if let Some(current) = self.read(REG_CURRENT[index], DataType::U16, 0.1, 2, failures).await {
                self.energy.phase_mut(phase).ac_current = Some(current);
            }
        }
        // Per-phase energy is not metered by three-phase units.
        for phase in Phase::ALL {
            self.energy.phase_mut(phase).energy_forwarded = Some(0.0);
        }
    }
}

#[async_trait]
impl<T: Transport> InverterAdapter for Solis<T> {
    fn kind(&self) -> InverterType {
        InverterType::Solis
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    async fn test_connection(&mut self) -> Result<(), AdapterError> {
        self.state = ConnectionState::Disconnected;
        self.transport.connect().await.map_err(AdapterError::Connect)?;
        self.state = ConnectionState::Identifying;

        let model = match read_scaled(&mut self.transport, REG_PRODUCT_MODEL, DataType::U16, 1.0, 0).await {
            Ok(model) => model as u16,
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                return Err(err);
            }
        };
        debug!(model, "product model");
        if model != PRODUCT_MODEL {
            warn!(model, expected = PRODUCT_MODEL, "unsupported product model");
            self.state = ConnectionState::Disconnected;
            return Err(AdapterError::ProtocolMismatch {
                expected: PRODUCT_MODEL,
                found: model,
            });
        }

        self.state = ConnectionState::Connected {
            settings_loaded: false,
        };
        self.get_settings().await
    }

    async fn get_settings(&mut self) -> Result<(), AdapterError> {
        if !matches!(self.state, ConnectionState::Connected { .. }) {
            return Err(AdapterError::NotConnected);
        }
        match self.load_settings().await {
            Ok(identity) => {
                self.identity = Some(identity);
                self.state = ConnectionState::Connected {
                    settings_loaded: true,
                };
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "settings retrieval failed");
                self.identity = None;
                self.state = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    async fn refresh_data(&mut self) -> RefreshReport {
        if !self.state.is_ready() {
            return RefreshReport::not_connected();
        }
        let mut report = RefreshReport::default();
        let failures = &mut report.failures;

        let output_type = self.read(REG_OUTPUT_TYPE, DataType::U16, 1.0, 0, failures).await;

        if let Some(power) = self.read(REG_AC_POWER, DataType::U32, 1.0, 0, failures).await {
            self.energy.overall.ac_power = Some(power);
        }
        if let Some(energy) = self.read(REG_ENERGY_TOTAL, DataType::U16, 0.1, 2, failures).await {
            self.energy.overall.energy_forwarded = Some(energy);
        }

        // An unreadable topology falls back to the single-phase layout; the
        // failure is already recorded, so the refresh still reports failed.
        let single_phase = output_type.map_or(true, |output_type| output_type == 0.0);
        self.read_phases(single_phase, failures).await;

        self.status = match self.read(REG_STATUS, DataType::U16, 1.0, 0, failures).await {
            Some(code) => STATUS_TABLE.lookup(code as u16),
            None => Status::Off,
        };
        debug!(status = ?self.status, "inverter status");

        match self
            .power_limit
            .check_and_correct(&mut self.transport, &mut self.energy)
            .await
        {
            Ok(Correction::Written(encoded)) => report.limit_written = Some(encoded),
            Ok(Correction::Rejected(err)) => report.correction_failure = Some(err),
            Ok(Correction::InSync | Correction::NoTarget) => {}
            Err(err) => {
                warn!(error = %err, "power limit read failed");
                report.failures.push(err);
            }
        }

        report
    }

    fn disconnect(&mut self) {
        self.transport.disconnect();
        self.state = ConnectionState::Disconnected;
        info!("solis adapter disconnected");
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
        self.transport.describe()
    }
}
