use async_trait::async_trait;
use modbus_client::Transport;
use register_codec::{decode_scaled, DataType};
use tracing::{debug, info, warn};
use types::{DeviceIdentity, EnergyModel, InverterSettings, Status};

use crate::{AdapterError, InverterType};

/// Session state of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Identifying,
    Connected { settings_loaded: bool },
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        matches!(self, ConnectionState::Connected { settings_loaded: true })
    }
}

/// Outcome of one refresh cycle.
///
/// The cycle succeeds only when every read succeeded. A rejected power-limit
/// write is kept apart in `correction_failure` and does not fail the cycle.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub failures: Vec<AdapterError>,
    pub correction_failure: Option<AdapterError>,
    /// Fixed-point percentage written to the device this cycle, if any.
    pub limit_written: Option<u16>,
}

impl RefreshReport {
    pub fn not_connected() -> Self {
        Self {
            failures: vec![AdapterError::NotConnected],
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Capability every vendor adapter provides to the poll loop.
#[async_trait]
pub trait InverterAdapter: Send {
    fn kind(&self) -> InverterType;

    fn connection_state(&self) -> ConnectionState;

    /// Connects, checks the device is this vendor's model and loads settings.
    async fn test_connection(&mut self) -> Result<(), AdapterError>;

    /// One-time retrieval of identity and power-limit settings.
    async fn get_settings(&mut self) -> Result<(), AdapterError>;

    async fn refresh_data(&mut self) -> RefreshReport;

    /// Drops the session; `test_connection` starts over from scratch.
    fn disconnect(&mut self);

    fn energy(&self) -> &EnergyModel;

    fn energy_mut(&mut self) -> &mut EnergyModel;

    fn status(&self) -> Status;

    fn identity(&self) -> Option<&DeviceIdentity>;

    fn settings(&self) -> &InverterSettings;

    fn endpoint(&self) -> String;

    /// Sets the target power limit, clamped to `[0, max_ac_power]`.
    fn set_power_limit(&mut self, watts: f64) -> f64 {
        let max = f64::from(self.settings().max_ac_power);
        let clamped = if watts.is_nan() { 0.0 } else { watts.clamp(0.0, max) };
        self.energy_mut().overall.power_limit = Some(clamped);
        info!(requested = watts, applied = clamped, "power limit setpoint updated");
        clamped
    }

    fn log_settings(&self) {
        info!(kind = %self.kind(), endpoint = %self.endpoint(), "inverter connected");
        match self.identity() {
            Some(identity) => info!(
                serial = %identity.serial_number,
                hardware_version = %identity.hardware_version,
                software_version = identity.software_version.as_deref().unwrap_or("-"),
                max_ac_power = identity.max_ac_power,
                phase = %identity.phase,
                position = identity.position.code(),
                "inverter settings"
            ),
            None => warn!("inverter settings not loaded"),
        }
    }
}

/// Reads the registers `data_type` spans at `address` and decodes them.
pub async fn read_scaled<T: Transport + ?Sized>(
    transport: &mut T,
    address: u16,
    data_type: DataType,
    scale: f64,
    digits: u32,
) -> Result<f64, AdapterError> {
    let count = data_type.word_count() as u16;
    let words = transport
        .read_input_registers(address, count)
        .await
        .map_err(|source| AdapterError::Transport { address, source })?;
    let value = decode_scaled(&words, data_type, scale, digits)
        .map_err(|source| AdapterError::Decode { address, source })?;
    debug!(address, count, ?words, value, "register decoded");
    Ok(value)
}
