use modbus_client::Transport;
use register_codec::DataType;
use tracing::{debug, info, warn};
use types::EnergyModel;

use crate::adapter::read_scaled;
use crate::AdapterError;

/// Registers holding the device's active power limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerLimitRegisters {
    /// Input register with the limit in hundredths of a percent.
    pub read: u16,
    /// Holding register accepting the limit in hundredths of a percent.
    pub write: u16,
}

/// What one check-and-correct step did.
#[derive(Debug)]
pub enum Correction {
    /// Device already reports the target.
    InSync,
    /// No target setpoint is held locally.
    NoTarget,
    /// A corrective write was accepted; the value is the encoded percentage.
    Written(u16),
    /// The write failed or could not be encoded. Logged, never escalated.
    Rejected(AdapterError),
}

/// Keeps the device's active power limit converged on the local target.
///
/// Runs every cycle with an exact comparison and no hysteresis: a write the
/// device does not honor is simply issued again on the next cycle.
#[derive(Debug, Clone)]
pub struct PowerLimitController {
    registers: PowerLimitRegisters,
    max_ac_power: u32,
}

impl PowerLimitController {
    pub fn new(registers: PowerLimitRegisters, max_ac_power: u32) -> Self {
        Self {
            registers,
            max_ac_power,
        }
    }

    pub fn registers(&self) -> PowerLimitRegisters {
        self.registers
    }

    /// Whole percent of `max_ac_power`, in watts.
    pub fn percent_to_watts(&self, percent: f64) -> Result<f64, AdapterError> {
        let max = self.max_power()?;
        Ok(max * (percent.trunc() / 100.0))
    }

    /// Target watts as the device's fixed-point percentage (truncated percent × 100).
    pub fn watts_to_encoded(&self, watts: f64) -> Result<u16, AdapterError> {
        let max = self.max_power()?;
        let percent = (watts / (max / 100.0)).trunc();
        let encoded = percent * 100.0;
        if !(0.0..=f64::from(u16::MAX)).contains(&encoded) {
            return Err(AdapterError::Correction(format!(
                "{watts} W is {percent}% of {max} W, outside the register range"
            )));
        }
        Ok(encoded as u16)
    }

    /// Reads the active limit into `active_power_limit`, in watts.
    pub async fn read_active<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        energy: &mut EnergyModel,
    ) -> Result<f64, AdapterError> {
        let percent = read_scaled(transport, self.registers.read, DataType::U16, 0.01, 0).await?;
        let watts = self.percent_to_watts(percent)?;
        energy.overall.active_power_limit = Some(watts);
        debug!(watts, percent, "active power limit");
        Ok(watts)
    }

    /// Reads the active limit and writes the target back when they differ.
    ///
    /// Only the read can fail this step; write problems come back as
    /// [`Correction::Rejected`].
    pub async fn check_and_correct<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        energy: &mut EnergyModel,
    ) -> Result<Correction, AdapterError> {
        let active = self.read_active(transport, energy).await?;
        let Some(target) = energy.overall.power_limit else {
            return Ok(Correction::NoTarget);
        };
        if active == target {
            return Ok(Correction::InSync);
        }

        let encoded = match self.watts_to_encoded(target) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(target, error = %err, "power limit not encodable");
                return Ok(Correction::Rejected(err));
            }
        };
        info!(from = active, to = target, encoded, "power limit has changed");
        match transport.write_registers(self.registers.write, &[encoded]).await {
            Ok(()) => {
                metrics::counter!("inverter_power_limit_writes_total").increment(1);
                Ok(Correction::Written(encoded))
            }
            Err(source) => {
                metrics::counter!("inverter_power_limit_write_failures_total").increment(1);
                warn!(register = self.registers.write, error = %source, "power limit write failed");
                Ok(Correction::Rejected(AdapterError::Transport {
                    address: self.registers.write,
                    source,
                }))
            }
        }
    }

    fn max_power(&self) -> Result<f64, AdapterError> {
        if self.max_ac_power == 0 {
            return Err(AdapterError::MissingMaxPower);
        }
        Ok(f64::from(self.max_ac_power))
    }
}
