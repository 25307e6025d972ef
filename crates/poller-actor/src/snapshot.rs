use std::collections::BTreeMap;

use inverter::InverterAdapter;
use serde::Serialize;
use serde_json::{json, Value};
use types::{Phase, PhaseReading};

pub const PRODUCT_ID: u16 = 41284;

/// Static description of the published service, fixed at setup.
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    pub service_name: String,
    pub process_name: String,
    pub process_version: String,
    pub connection: String,
    pub device_instance: u32,
    pub product_name: String,
    pub firmware_version: String,
    /// Extra paths published verbatim, e.g. `/Info/Config/*`.
    pub extra: BTreeMap<String, Value>,
}

/// Counter signalling a new snapshot; wraps from 255 to 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateIndex(u8);

impl UpdateIndex {
    pub fn advance(&mut self) -> u8 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// Flat path -> value view of one poll, as handed to the publish sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    values: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn capture(
        adapter: &dyn InverterAdapter,
        service: &ServiceInfo,
        custom_name: &str,
        online: bool,
        update_index: u8,
    ) -> Self {
        let mut snapshot = Snapshot::default();
        let energy = adapter.energy();
        let settings = adapter.settings();
        let hardware_version = adapter.identity().map(|id| id.hardware_version.as_str());
        let serial = adapter.identity().map(|id| id.serial_number.as_str());

        snapshot.insert("/Mgmt/ProcessName", json!(service.process_name));
        snapshot.insert("/Mgmt/ProcessVersion", json!(service.process_version));
        snapshot.insert("/Mgmt/Connection", json!(service.connection));
        snapshot.insert("/DeviceInstance", json!(service.device_instance));
        snapshot.insert("/ProductId", json!(PRODUCT_ID));
        snapshot.insert("/ProductName", json!(service.product_name));
        snapshot.insert("/FirmwareVersion", json!(service.firmware_version));
        snapshot.insert("/HardwareVersion", json!(hardware_version));
        snapshot.insert("/Serial", json!(serial));
        snapshot.insert("/CustomName", json!(custom_name));
        snapshot.insert("/Ac/MaxPower", json!(settings.max_ac_power));
        snapshot.insert("/Position", json!(settings.position.code()));
        snapshot.insert("/Connected", json!(u8::from(online)));
        snapshot.insert("/StatusCode", json!(adapter.status().code()));

        for phase in Phase::ALL {
            snapshot.insert_phase(phase, energy.phase(phase));
        }
        snapshot.insert("/Ac/Voltage", json!(energy.overall.ac_voltage));
        snapshot.insert("/Ac/Current", json!(energy.overall.ac_current));
        snapshot.insert("/Ac/Power", json!(energy.overall.ac_power));
        snapshot.insert("/Ac/PowerLimit", json!(energy.overall.power_limit));
        snapshot.insert("/Ac/Energy/Forward", json!(energy.overall.energy_forwarded));

        for (path, value) in &service.extra {
            snapshot.insert(path, value.clone());
        }
        snapshot.insert("/UpdateIndex", json!(update_index));
        snapshot
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.values.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn insert(&mut self, path: impl Into<String>, value: Value) {
        self.values.insert(path.into(), value);
    }

    fn insert_phase(&mut self, phase: Phase, reading: &PhaseReading) {
        let prefix = format!("/Ac/{phase}");
        self.insert(format!("{prefix}/Voltage"), json!(reading.ac_voltage));
        self.insert(format!("{prefix}/Current"), json!(reading.ac_current));
        self.insert(format!("{prefix}/Power"), json!(reading.ac_power));
        self.insert(format!("{prefix}/Energy/Forward"), json!(reading.energy_forwarded));
    }
}
