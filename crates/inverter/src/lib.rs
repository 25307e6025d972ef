use std::fmt;
use std::str::FromStr;

use modbus_client::{ClientConfig, Link};

mod adapter;
mod dummy;
mod error;
mod power_limit;
mod solis;

pub use adapter::{read_scaled, ConnectionState, InverterAdapter, RefreshReport};
pub use dummy::Dummy;
pub use error::AdapterError;
pub use power_limit::{Correction, PowerLimitController, PowerLimitRegisters};
pub use solis::{Solis, PRODUCT_MODEL as SOLIS_PRODUCT_MODEL, STATUS_TABLE as SOLIS_STATUS_TABLE};

/// Adapter implementations this driver can probe for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InverterType {
    Dummy,
    Solis,
}

impl InverterType {
    /// Probe order.
    pub const ALL: [InverterType; 2] = [InverterType::Dummy, InverterType::Solis];

    pub fn as_str(self) -> &'static str {
        match self {
            InverterType::Dummy => "Dummy",
            InverterType::Solis => "Solis",
        }
    }

    pub fn baud_rate(self) -> u32 {
        match self {
            InverterType::Dummy => 0,
            InverterType::Solis => 9_600,
        }
    }

    pub fn slave(self) -> u8 {
        match self {
            InverterType::Dummy => 0,
            InverterType::Solis => 1,
        }
    }

    /// Types to probe given the configured selector; `None` probes all of them.
    pub fn expected(selector: Option<InverterType>) -> Vec<InverterType> {
        Self::ALL
            .into_iter()
            .filter(|kind| selector.map_or(true, |selected| selected == *kind))
            .collect()
    }

    /// Applies this type's serial parameters to a base client configuration.
    pub fn client_config(self, base: &ClientConfig) -> ClientConfig {
        let mut config = base.clone();
        config.slave = self.slave();
        if let Link::Rtu { baud_rate, .. } = &mut config.link {
            *baud_rate = self.baud_rate();
        }
        config
    }
}

impl fmt::Display for InverterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InverterType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown inverter type '{value}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_filters_probe_list() {
        assert_eq!(InverterType::expected(None), InverterType::ALL.to_vec());
        assert_eq!(
            InverterType::expected(Some(InverterType::Solis)),
            vec![InverterType::Solis]
        );
        assert_eq!("solis".parse::<InverterType>(), Ok(InverterType::Solis));
        assert!("Growatt".parse::<InverterType>().is_err());
    }

    #[test]
    fn client_config_takes_type_serial_parameters() {
        let config = InverterType::Solis.client_config(&ClientConfig {
            link: Link::Rtu {
                port: "/dev/ttyUSB1".to_string(),
                baud_rate: 115_200,
            },
            slave: 7,
            ..ClientConfig::default()
        });
        assert_eq!(config.slave, 1);
        assert_eq!(
            config.link,
            Link::Rtu {
                port: "/dev/ttyUSB1".to_string(),
                baud_rate: 9_600
            }
        );
    }
}
