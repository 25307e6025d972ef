use modbus_client::ClientError;
use register_codec::DecodeError;
use thiserror::Error;

use crate::InverterType;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connect failed: {0}")]
    Connect(#[source] ClientError),
    #[error("transport failure at register {address}: {source}")]
    Transport {
        address: u16,
        #[source]
        source: ClientError,
    },
    #[error("unsupported product model {found}, expected {expected}")]
    ProtocolMismatch { expected: u16, found: u16 },
    #[error("decode failure at register {address}: {source}")]
    Decode {
        address: u16,
        #[source]
        source: DecodeError,
    },
    #[error("power limit correction failed: {0}")]
    Correction(String),
    #[error("adapter is not connected")]
    NotConnected,
    #[error("max_ac_power must be non-zero before power limits can be converted")]
    MissingMaxPower,
    #[error("{0} adapter is not selected by configuration")]
    NotSelected(InverterType),
}

impl AdapterError {
    /// Transport and decode failures are the ones a later poll may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::Connect(_) | AdapterError::Transport { .. } | AdapterError::Decode { .. }
        )
    }
}
