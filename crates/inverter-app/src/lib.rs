pub mod config;
pub mod probe;
pub mod publisher;
pub mod supervisor;

pub use config::InverterAppConfig;
pub use probe::{build_adapter, probe_inverter, service_info};
pub use publisher::StatePublisher;
pub use supervisor::Supervisor;
