use std::time::Duration;

use inverter::{
    AdapterError, ConnectionState, InverterAdapter, Solis, SOLIS_PRODUCT_MODEL, SOLIS_STATUS_TABLE,
};
use modbus_client::MockTransport;
use types::{InverterSettings, Phase, PhaseReading, Position, Status};

fn settings(max_ac_power: u32, phase: Phase) -> InverterSettings {
    InverterSettings {
        max_ac_power,
        phase,
        poll_interval: Duration::from_millis(1_000),
        position: Position::AcOutput,
    }
}

/// A device that identifies as a Solis with the limit at `limit_percent`.
fn device(limit_percent: u16) -> MockTransport {
    MockTransport::new()
        .with_register(2999, SOLIS_PRODUCT_MODEL)
        .with_register(3000, 3_616)
        .with_registers(3060, &[0x1234, 0x5678, 0x9abc, 0x0def])
        .with_register(3049, limit_percent * 100)
        .with_register(3004, 0)
        .with_register(3005, 2_500)
        .with_register(3014, 12_345)
        .with_register(3043, 3)
}

fn three_phase(device: MockTransport) -> MockTransport {
    device
        .with_register(3002, 1)
        .with_registers(3033, &[2_301, 2_322, 2_338])
        .with_registers(3036, &[105, 110, 95])
}

fn single_phase(device: MockTransport) -> MockTransport {
    device
        .with_register(3002, 0)
        .with_register(3035, 2_301)
        .with_register(3038, 95)
}

async fn connected(transport: MockTransport, settings: InverterSettings) -> Solis<MockTransport> {
    let mut solis = Solis::new(transport, settings);
    solis.test_connection().await.expect("connect");
    solis
}

#[tokio::test]
async fn identify_loads_settings() {
    let solis = connected(device(80), settings(5_000, Phase::L1)).await;

    assert_eq!(
        solis.connection_state(),
        ConnectionState::Connected { settings_loaded: true }
    );
    let identity = solis.identity().expect("identity");
    assert_eq!(identity.serial_number, "43218765cba9fed");
    assert_eq!(identity.hardware_version, "3616");
    assert_eq!(identity.max_ac_power, 5_000);
    assert_eq!(solis.energy().overall.power_limit, Some(4_000.0));
    assert_eq!(solis.energy().overall.active_power_limit, Some(4_000.0));
}

#[tokio::test]
async fn wrong_model_is_a_protocol_mismatch() {
    let transport = device(100).with_register(2999, 99);
    let mut solis = Solis::new(transport, settings(5_000, Phase::L1));

    let err = solis.test_connection().await.expect_err("mismatch");
    assert!(matches!(err, AdapterError::ProtocolMismatch { expected: 224, found: 99 }));
    assert_eq!(solis.connection_state(), ConnectionState::Disconnected);
    assert!(solis.identity().is_none());
}

#[tokio::test]
async fn unreachable_device_stays_disconnected() {
    let transport = device(100);
    transport.set_offline(true);
    let mut solis = Solis::new(transport, settings(5_000, Phase::L1));

    assert!(matches!(solis.test_connection().await, Err(AdapterError::Connect(_))));
    assert_eq!(solis.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn any_settings_read_failure_drops_the_session() {
    for register in [3000, 3062, 3049] {
        let transport = device(100);
        transport.fail_address(register);
        let mut solis = Solis::new(transport, settings(5_000, Phase::L1));

        let err = solis.test_connection().await.expect_err("settings failure");
        assert!(matches!(err, AdapterError::Transport { .. }), "register {register}");
        assert_eq!(solis.connection_state(), ConnectionState::Disconnected);
        assert!(solis.identity().is_none());
    }
}

#[tokio::test]
async fn zero_max_power_refuses_settings() {
    let mut solis = Solis::new(device(100), settings(0, Phase::L1));
    assert!(matches!(
        solis.test_connection().await,
        Err(AdapterError::MissingMaxPower)
    ));
}

#[tokio::test]
async fn refresh_before_connect_fails() {
    let mut solis = Solis::new(device(100), settings(5_000, Phase::L1));
    let report = solis.refresh_data().await;
    assert!(!report.is_success());
    assert!(matches!(report.failures[0], AdapterError::NotConnected));
}

#[tokio::test]
async fn single_phase_copies_aggregate_into_configured_phase() {
    let mut solis = connected(single_phase(device(100)), settings(5_000, Phase::L1)).await;

    let report = solis.refresh_data().await;
    assert!(report.is_success(), "{:?}", report.failures);

    let energy = solis.energy();
    assert_eq!(energy.overall.ac_power, Some(2_500.0));
    assert_eq!(energy.overall.energy_forwarded, Some(1_234.5));
    assert_eq!(energy.l1.ac_voltage, Some(230.0));
    assert_eq!(energy.l1.ac_current, Some(9.5));
    assert_eq!(energy.l1.ac_power, energy.overall.ac_power);
    assert_eq!(energy.l1.energy_forwarded, energy.overall.energy_forwarded);
    assert_eq!(energy.l2, PhaseReading::zeroed());
    assert_eq!(energy.l3, PhaseReading::zeroed());
}

#[tokio::test]
async fn single_phase_honours_configured_phase() {
    let mut solis = connected(single_phase(device(100)), settings(5_000, Phase::L2)).await;
    assert!(solis.refresh_data().await.is_success());

    let energy = solis.energy();
    assert_eq!(energy.l1, PhaseReading::zeroed());
    assert_eq!(energy.l2.ac_voltage, Some(230.0));
    assert_eq!(energy.l2.ac_power, Some(2_500.0));
    assert_eq!(energy.l3, PhaseReading::zeroed());
}

#[tokio::test]
async fn three_phase_reads_each_phase_from_its_own_registers() {
    let mut solis = connected(three_phase(device(100)), settings(5_000, Phase::L1)).await;
    assert!(solis.refresh_data().await.is_success());

    let energy = solis.energy();
    assert_eq!(energy.l1.ac_voltage, Some(230.0));
    assert_eq!(energy.l2.ac_voltage, Some(232.0));
    assert_eq!(energy.l3.ac_voltage, Some(234.0));
    assert_eq!(energy.l1.ac_current, Some(10.5));
    assert_eq!(energy.l2.ac_current, Some(11.0));
    assert_eq!(energy.l3.ac_current, Some(9.5));
    for phase in Phase::ALL {
        assert_eq!(energy.phase(phase).energy_forwarded, Some(0.0));
        assert_eq!(energy.phase(phase).ac_power, None);
    }
}

#[tokio::test]
async fn status_codes_map_through_table() {
    let expected = [
        (0, Status::Waiting),
        (1, Status::StartingA),
        (2, Status::StartingB),
        (3, Status::Generating),
        (4, Status::Fault),
        (0x1015, Status::Fault),
    ];
    let transport = three_phase(device(100));
    let mut solis = connected(transport.clone(), settings(5_000, Phase::L1)).await;

    for (code, status) in expected {
        transport.set_register(3043, code);
        assert!(solis.refresh_data().await.is_success());
        assert_eq!(solis.status(), status, "code {code}");
    }
    assert_eq!(SOLIS_STATUS_TABLE.codes().count(), 4);
}

#[tokio::test]
async fn failed_status_read_reports_off_and_fails_refresh() {
    let transport = three_phase(device(100));
    let mut solis = connected(transport.clone(), settings(5_000, Phase::L1)).await;
    transport.fail_address(3043);

    let report = solis.refresh_data().await;
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(solis.status(), Status::Off);
}

#[tokio::test]
async fn one_failed_read_still_updates_the_rest() {
    let transport = three_phase(device(100));
    let mut solis = connected(transport.clone(), settings(5_000, Phase::L1)).await;
    transport.fail_address(3034);

    let report = solis.refresh_data().await;
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    let energy = solis.energy();
    assert_eq!(energy.l2.ac_voltage, None);
    assert_eq!(energy.l1.ac_voltage, Some(230.0));
    assert_eq!(energy.l3.ac_current, Some(9.5));
    assert_eq!(solis.status(), Status::Generating);
}

#[tokio::test]
async fn failed_topology_read_still_reads_single_phase_registers() {
    let transport = single_phase(device(100));
    let mut solis = connected(transport.clone(), settings(5_000, Phase::L2)).await;
    transport.fail_address(3002);
    let reads_before = transport.read_count();

    let report = solis.refresh_data().await;
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(transport.read_count() - reads_before, 7);

    let energy = solis.energy();
    assert_eq!(energy.l2.ac_voltage, Some(230.0));
    assert_eq!(energy.l2.ac_current, Some(9.5));
    assert_eq!(energy.l2.ac_power, Some(2_500.0));
    assert_eq!(energy.l1, PhaseReading::zeroed());
    assert_eq!(energy.l3, PhaseReading::zeroed());
    assert_eq!(solis.status(), Status::Generating);
}

#[tokio::test]
async fn power_limit_is_corrected_towards_target() {
    let transport = three_phase(device(40));
    let mut solis = connected(transport.clone(), settings(1_000, Phase::L1)).await;
    solis.set_power_limit(500.0);

    let report = solis.refresh_data().await;
    assert!(report.is_success());
    assert_eq!(report.limit_written, Some(5_000));
    assert_eq!(transport.writes(), vec![(3051, vec![5_000])]);
    assert_eq!(solis.energy().overall.active_power_limit, Some(400.0));

    transport.set_register(3049, 5_000);
    let report = solis.refresh_data().await;
    assert_eq!(report.limit_written, None);
    assert_eq!(transport.writes().len(), 1);
    assert_eq!(solis.energy().overall.active_power_limit, Some(500.0));
}

#[tokio::test]
async fn ignored_write_is_retried_every_cycle() {
    let transport = three_phase(device(40));
    let mut solis = connected(transport.clone(), settings(1_000, Phase::L1)).await;
    solis.set_power_limit(500.0);

    for _ in 0..3 {
        solis.refresh_data().await;
    }
    assert_eq!(transport.writes().len(), 3);
}

#[tokio::test]
async fn rejected_write_does_not_fail_refresh() {
    let transport = three_phase(device(40));
    let mut solis = connected(transport.clone(), settings(1_000, Phase::L1)).await;
    solis.set_power_limit(500.0);
    transport.reject_writes(true);

    let report = solis.refresh_data().await;
    assert!(report.is_success());
    assert!(report.correction_failure.is_some());
    assert_eq!(report.limit_written, None);
}

#[tokio::test]
async fn failed_limit_read_fails_refresh_without_writing() {
    let transport = three_phase(device(40));
    let mut solis = connected(transport.clone(), settings(1_000, Phase::L1)).await;
    solis.set_power_limit(500.0);
    transport.fail_address(3049);

    let report = solis.refresh_data().await;
    assert!(!report.is_success());
    assert!(transport.writes().is_empty());
}

#[tokio::test]
async fn disconnect_requires_new_identify() {
    let mut solis = connected(three_phase(device(100)), settings(5_000, Phase::L1)).await;
    solis.disconnect();
    assert_eq!(solis.connection_state(), ConnectionState::Disconnected);
    assert!(!solis.refresh_data().await.is_success());

    solis.test_connection().await.expect("reconnect");
    assert!(solis.refresh_data().await.is_success());
}
