use std::env;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use inverter_app::{probe_inverter, service_info, InverterAppConfig, StatePublisher, Supervisor};
use metrics_exporter_prometheus::PrometheusBuilder;
use poller_actor::{PollerActor, SinkCommand};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("start serialinverter");
    let args = parse_args();
    let mut config = InverterAppConfig::load_with_path(args.config).context("load config failed")?;
    if let Some(port) = args.port.as_deref() {
        config.set_serial_port(port);
    } else {
        info!(port = %config.port(), "no port argument, using configured port");
    }
    config.validate().context("config validation failed")?;

    if let Some(addr) = config.metrics_addr()? {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("metrics exporter init failed")?;
        info!(%addr, "metrics listener started");
    }

    let Some(adapter) = probe_inverter(&config).await else {
        anyhow::bail!("no inverter connection at {}", config.port());
    };
    adapter.log_settings();
    metrics::gauge!("inverter_max_ac_power_watts").set(f64::from(config.inverter.max_ac_power));

    let service = service_info(&config, adapter.as_ref()).context("service setup failed")?;
    info!(service = %service.service_name, instance = service.device_instance, "publishing service");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::channel(config.channel_capacity);
    if config.control_stdin {
        spawn_control_reader(command_tx);
    }

    let publisher = StatePublisher::new(config.state_path.clone().map(PathBuf::from));
    let actor = PollerActor::new(
        adapter,
        publisher,
        command_rx,
        shutdown_rx,
        service,
        config.poller.clone(),
    )
    .context("poller setup failed")?;

    let supervisor = Supervisor::from_env();
    supervisor.ready(&format!("polling {}", config.port()));
    let watchdog_handle = supervisor.spawn_watchdog(shutdown_tx.subscribe());

    let result = tokio::select! {
        result = actor.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    supervisor.stopping();
    let _ = shutdown_tx.send(true);
    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }
    result.context("poller stopped")
}

struct Args {
    port: Option<String>,
    config: Option<String>,
}

fn parse_args() -> Args {
    let mut parsed = Args {
        port: None,
        config: None,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            parsed.config = args.next();
        } else if let Some(path) = arg.strip_prefix("--config=") {
            parsed.config = Some(path.to_string());
        } else if parsed.port.is_none() && !arg.starts_with("--") {
            parsed.port = Some(arg);
        }
    }
    parsed
}

/// Reads `<path>=<value>` lines from stdin on a plain thread; a blocked stdin
/// read must not hold up runtime shutdown.
fn spawn_control_reader(sender: mpsc::Sender<SinkCommand>) {
    let spawned = thread::Builder::new()
        .name("control-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<SinkCommand>() {
                    Ok(command) => {
                        if sender.blocking_send(command).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "ignoring control line"),
                }
            }
        });
    if let Err(err) = spawned {
        warn!(error = %err, "control reader not started");
    }
}
