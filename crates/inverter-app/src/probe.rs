use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use inverter::{Dummy, InverterAdapter, InverterType, Solis};
use modbus_client::ModbusClient;
use poller_actor::ServiceInfo;

use crate::InverterAppConfig;

pub fn build_adapter(kind: InverterType, config: &InverterAppConfig) -> Box<dyn InverterAdapter> {
    let settings = config.inverter.clone();
    match kind {
        InverterType::Dummy => {
            let selected = matches!(config.selected_type(), Ok(Some(InverterType::Dummy)));
            Box::new(Dummy::new(settings, selected))
        }
        InverterType::Solis => {
            let client = ModbusClient::new(kind.client_config(&config.modbus));
            Box::new(Solis::new(client, settings))
        }
    }
}

/// Tries every expected adapter type, for up to `probe_rounds` rounds.
pub async fn probe_inverter(config: &InverterAppConfig) -> Option<Box<dyn InverterAdapter>> {
    let selector = match config.selected_type() {
        Ok(selector) => selector,
        Err(err) => {
            warn!(error = %err, "invalid inverter type");
            return None;
        }
    };
    let expected = InverterType::expected(selector);

    for round in 1..=config.probe_rounds {
        for kind in &expected {
            info!(kind = %kind, round, "testing inverter type");
            let mut adapter = build_adapter(*kind, config);
            match adapter.test_connection().await {
                Ok(()) => {
                    info!(kind = %kind, "connection established");
                    return Some(adapter);
                }
                Err(err) => {
                    info!(kind = %kind, error = %err, "inverter type not detected");
                    adapter.disconnect();
                }
            }
        }
        if round < config.probe_rounds {
            sleep(Duration::from_millis(config.probe_delay_ms)).await;
        }
    }

    None
}

pub fn service_info(
    config: &InverterAppConfig,
    adapter: &dyn InverterAdapter,
) -> anyhow::Result<ServiceInfo> {
    let (_, device_instance) = config.device_instance()?;
    let port = config.port();
    let short_port = port.rsplit('/').next().unwrap_or(&port).to_string();
    let product_name = format!("SerialInverter ({})", adapter.kind());
    let extra = if config.publish_config_values {
        config.published_values()
    } else {
        Default::default()
    };

    Ok(ServiceInfo {
        service_name: format!("com.victronenergy.pvinverter.{short_port}"),
        process_name: env!("CARGO_PKG_NAME").to_string(),
        process_version: format!("Rust {}", env!("CARGO_PKG_VERSION")),
        connection: adapter.endpoint(),
        device_instance,
        product_name,
        firmware_version: env!("CARGO_PKG_VERSION").to_string(),
        extra,
    })
}
