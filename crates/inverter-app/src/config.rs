use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use inverter::InverterType;
use modbus_client::{ClientConfig, Link};
use poller_actor::ActorConfig;
use types::{InverterSettings, Phase, Position};

const DEFAULT_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_INSTANCE: &str = "inverter:20";
const DEFAULT_CHANNEL_CAPACITY: usize = 16;
const DEFAULT_PROBE_ROUNDS: u32 = 3;
const DEFAULT_PROBE_DELAY_MS: u64 = 500;

#[derive(Clone, Debug)]
pub struct InverterAppConfig {
    /// Adapter selector; empty probes every supported type.
    pub inverter_type: String,
    pub inverter: InverterSettings,
    pub modbus: ClientConfig,
    pub poller: ActorConfig,
    pub probe_rounds: u32,
    pub probe_delay_ms: u64,
    pub channel_capacity: usize,
    pub state_path: Option<String>,
    pub publish_config_values: bool,
    pub control_stdin: bool,
    /// `<role>:<device instance>`.
    pub instance: String,
    pub metrics_listen: Option<String>,
}

impl InverterAppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config)?;
        }

        apply_env_overrides(&mut config)?;
        config.inverter.poll_interval = config.poller.poll_interval;
        Ok(config)
    }

    /// Points the RTU link at `port`, e.g. the first command-line argument.
    pub fn set_serial_port(&mut self, port: &str) {
        if let Link::Rtu { port: current, .. } = &mut self.modbus.link {
            *current = port.to_string();
        }
    }

    pub fn port(&self) -> String {
        match &self.modbus.link {
            Link::Rtu { port, .. } => port.clone(),
            Link::Tcp { host, port } => format!("{host}:{port}"),
        }
    }

    pub fn selected_type(&self) -> Result<Option<InverterType>> {
        let value = self.inverter_type.trim();
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse::<InverterType>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!(err))
    }

    pub fn device_instance(&self) -> Result<(String, u32)> {
        parse_instance(&self.instance)
    }

    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>> {
        self.metrics_listen
            .as_deref()
            .map(|value| {
                value
                    .parse::<SocketAddr>()
                    .with_context(|| format!("service.metrics_listen '{value}' is not host:port"))
            })
            .transpose()
    }

    pub fn validate(&self) -> Result<()> {
        self.selected_type().context("inverter.type is invalid")?;
        if self.inverter.max_ac_power == 0 {
            anyhow::bail!("inverter.max_ac_power must be >= 1");
        }
        if self.poller.poll_interval.as_millis() == 0 {
            anyhow::bail!("inverter.poll_interval_ms must be >= 1");
        }
        if self.poller.health.offline_after == 0 {
            anyhow::bail!("health.offline_after must be >= 1");
        }
        if self.poller.health.terminate_after <= self.poller.health.offline_after {
            anyhow::bail!("health.terminate_after must be greater than health.offline_after");
        }
        if self.modbus.timeout_ms == 0 {
            anyhow::bail!("modbus.timeout_ms must be >= 1");
        }
        if self.modbus.retry_backoff_ms == 0 {
            anyhow::bail!("modbus.retry_backoff_ms must be >= 1");
        }
        if self.modbus.retry_max_backoff_ms == 0 {
            anyhow::bail!("modbus.retry_max_backoff_ms must be >= 1");
        }
        match &self.modbus.link {
            Link::Rtu { port, .. } if port.trim().is_empty() => {
                anyhow::bail!("serial port must be non-empty");
            }
            Link::Tcp { port: 0, .. } => anyhow::bail!("modbus.tcp_port must be >= 1"),
            _ => {}
        }
        if self.probe_rounds == 0 {
            anyhow::bail!("probe.rounds must be >= 1");
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be >= 1");
        }
        if let Some(ref path) = self.state_path {
            if path.trim().is_empty() {
                anyhow::bail!("publish.state_path must be non-empty when set");
            }
        }
        self.device_instance().context("service.instance is invalid")?;
        self.metrics_addr()?;

        Ok(())
    }

    /// Configuration published under `/Info/Config/*` when enabled.
    pub fn published_values(&self) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        let mut add = |key: &str, value: Value| {
            values.insert(format!("/Info/Config/{key}"), value);
        };
        add("INVERTER_TYPE", json!(self.inverter_type));
        add("INVERTER_MAX_AC_POWER", json!(self.inverter.max_ac_power));
        add("INVERTER_PHASE", json!(self.inverter.phase.as_str()));
        add(
            "INVERTER_POLL_INTERVAL",
            json!(self.poller.poll_interval.as_millis() as u64),
        );
        add("INVERTER_POSITION", json!(self.inverter.position.code()));
        add("PUBLISH_CONFIG_VALUES", json!(u8::from(self.publish_config_values)));
        values
    }
}

impl Default for InverterAppConfig {
    fn default() -> Self {
        let poller = ActorConfig::default();
        Self {
            inverter_type: String::new(),
            inverter: InverterSettings {
                poll_interval: poller.poll_interval,
                ..InverterSettings::default()
            },
            modbus: ClientConfig {
                link: Link::Rtu {
                    port: DEFAULT_PORT.to_string(),
                    baud_rate: 9_600,
                },
                ..ClientConfig::default()
            },
            poller,
            probe_rounds: DEFAULT_PROBE_ROUNDS,
            probe_delay_ms: DEFAULT_PROBE_DELAY_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            state_path: None,
            publish_config_values: false,
            control_stdin: true,
            instance: DEFAULT_INSTANCE.to_string(),
            metrics_listen: None,
        }
    }
}

pub fn parse_instance(value: &str) -> Result<(String, u32)> {
    let (role, instance) = value
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("instance must look like 'inverter:20', got '{value}'"))?;
    if role.trim().is_empty() {
        anyhow::bail!("instance role must be non-empty");
    }
    let instance = instance
        .trim()
        .parse::<u32>()
        .with_context(|| format!("instance number in '{value}' is not an integer"))?;
    Ok((role.trim().to_string(), instance))
}

fn apply_env_overrides(config: &mut InverterAppConfig) -> Result<()> {
    if let Ok(value) = env::var("SERIALINVERTER_TYPE") {
        config.inverter_type = value;
    }

    if let Some(max) = parse_env_u32("SERIALINVERTER_MAX_AC_POWER") {
        config.inverter.max_ac_power = max;
    }

    if let Ok(value) = env::var("SERIALINVERTER_PHASE") {
        config.inverter.phase = value.parse::<Phase>()?;
    }

    if let Some(interval_ms) = parse_env_u64("SERIALINVERTER_POLL_INTERVAL_MS") {
        config.poller.poll_interval = Duration::from_millis(interval_ms);
    }

    if let Some(position) = parse_env_u8("SERIALINVERTER_POSITION") {
        config.inverter.position = Position::try_from(position)?;
    }

    if let Ok(port) = env::var("SERIALINVERTER_PORT") {
        config.set_serial_port(&port);
    }

    if let Some(timeout_ms) = parse_env_u64("SERIALINVERTER_MODBUS_TIMEOUT_MS") {
        config.modbus.timeout_ms = timeout_ms;
    }

    if let Some(value) = parse_env_u32("SERIALINVERTER_OFFLINE_AFTER") {
        config.poller.health.offline_after = value;
    }

    if let Some(value) = parse_env_u32("SERIALINVERTER_TERMINATE_AFTER") {
        config.poller.health.terminate_after = value;
    }

    config.state_path = env::var("SERIALINVERTER_STATE_PATH").ok().or(config.state_path.take());
    config.publish_config_values =
        parse_env_bool("SERIALINVERTER_PUBLISH_CONFIG_VALUES").unwrap_or(config.publish_config_values);
    config.control_stdin = parse_env_bool("SERIALINVERTER_CONTROL_STDIN").unwrap_or(config.control_stdin);
    if let Ok(value) = env::var("SERIALINVERTER_INSTANCE") {
        config.instance = value;
    }
    config.metrics_listen = env::var("SERIALINVERTER_METRICS_LISTEN")
        .ok()
        .or(config.metrics_listen.take());

    Ok(())
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    inverter: Option<FileInverterConfig>,
    modbus: Option<FileModbusConfig>,
    health: Option<FileHealthConfig>,
    probe: Option<FileProbeConfig>,
    publish: Option<FilePublishConfig>,
    service: Option<FileServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct FileInverterConfig {
    #[serde(rename = "type")]
    kind: Option<String>,
    max_ac_power: Option<u32>,
    phase: Option<String>,
    poll_interval_ms: Option<u64>,
    position: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct FileModbusConfig {
    port: Option<String>,
    tcp_host: Option<String>,
    tcp_port: Option<u16>,
    timeout_ms: Option<u64>,
    retry_count: Option<usize>,
    retry_backoff_ms: Option<u64>,
    retry_max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileHealthConfig {
    offline_after: Option<u32>,
    terminate_after: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FileProbeConfig {
    rounds: Option<u32>,
    delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FilePublishConfig {
    state_path: Option<String>,
    publish_config_values: Option<bool>,
    control_stdin: Option<bool>,
    channel_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FileServiceConfig {
    instance: Option<String>,
    metrics_listen: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("SERIALINVERTER_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut InverterAppConfig, file: FileConfig) -> Result<()> {
    if let Some(inverter) = file.inverter {
        if let Some(kind) = inverter.kind {
            config.inverter_type = kind;
        }
        if let Some(max) = inverter.max_ac_power {
            config.inverter.max_ac_power = max;
        }
        if let Some(phase) = inverter.phase {
            config.inverter.phase = phase.parse::<Phase>()?;
        }
        if let Some(interval_ms) = inverter.poll_interval_ms {
            config.poller.poll_interval = Duration::from_millis(interval_ms);
        }
        if let Some(position) = inverter.position {
            config.inverter.position = Position::try_from(position)?;
        }
    }

    if let Some(modbus) = file.modbus {
        if let Some(port) = modbus.port {
            config.set_serial_port(&port);
        }
        if let Some(host) = modbus.tcp_host {
            config.modbus.link = Link::Tcp {
                host,
                port: modbus.tcp_port.unwrap_or(502),
            };
        }
        if let Some(timeout_ms) = modbus.timeout_ms {
            config.modbus.timeout_ms = timeout_ms;
        }
        if let Some(retry_count) = modbus.retry_count {
            config.modbus.retry_count = retry_count;
        }
        if let Some(backoff) = modbus.retry_backoff_ms {
            config.modbus.retry_backoff_ms = backoff;
        }
        if let Some(max_backoff) = modbus.retry_max_backoff_ms {
            config.modbus.retry_max_backoff_ms = max_backoff;
        }
    }

    if let Some(health) = file.health {
        if let Some(value) = health.offline_after {
            config.poller.health.offline_after = value;
        }
        if let Some(value) = health.terminate_after {
            config.poller.health.terminate_after = value;
        }
    }

    if let Some(probe) = file.probe {
        if let Some(rounds) = probe.rounds {
            config.probe_rounds = rounds;
        }
        if let Some(delay_ms) = probe.delay_ms {
            config.probe_delay_ms = delay_ms;
        }
    }

    if let Some(publish) = file.publish {
        if let Some(path) = publish.state_path {
            config.state_path = Some(path);
        }
        if let Some(enabled) = publish.publish_config_values {
            config.publish_config_values = enabled;
        }
        if let Some(enabled) = publish.control_stdin {
            config.control_stdin = enabled;
        }
        if let Some(capacity) = publish.channel_capacity {
            config.channel_capacity = capacity;
        }
    }

    if let Some(service) = file.service {
        if let Some(instance) = service.instance {
            config.instance = instance;
        }
        if let Some(listen) = service.metrics_listen {
            config.metrics_listen = Some(listen);
        }
    }

    Ok(())
}

fn parse_env_u8(key: &str) -> Option<u8> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}
