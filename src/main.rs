//! Service binary: brings the bus up, runs the cycle engine and prints the
//! decoded drive status once a second until Ctrl-C, then dumps any scope
//! and latency recordings to CSV.
//!
//! ```bash
//! RUST_LOG=info linmot-ethercat <interface> [config.json]
//! ```

use env_logger::Env;
use std::error::Error;
use std::path::Path;
use std::time::Duration;

use linmot_ethercat::{
    command,
    cycle::{self, CycleConfig},
    scope::{write_latency_csv, write_scope_capture},
    BusConfig, DriveModel, EthercatMaster,
};

const LOG_KEY: &str = "linmot";

fn load_config(path: Option<&str>) -> Result<BusConfig, Box<dyn Error>> {
    let Some(path) = path else {
        return Ok(BusConfig::default());
    };
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let interface = args
        .next()
        .ok_or("usage: linmot-ethercat <interface> [config.json]")?;
    let mut config = load_config(args.next().as_deref())?;
    config.interface = interface;
    config.validate()?;

    log::info!(
        target: LOG_KEY,
        "starting on {} with {} drive(s), cycle time {} s, {}M/{}P channels",
        config.interface,
        config.expected_subdevices,
        config.cycle_time,
        config.monitoring_channels,
        config.parameter_channels
    );

    let master = EthercatMaster::new(&config.interface)?;

    // SDO setup right after drive power-up fails sporadically; keep trying.
    let bus = loop {
        match master.bring_up(&config).await {
            Ok(bus) => break bus,
            Err(e) => {
                log::warn!(target: LOG_KEY, "bring-up failed, retrying: {e}");
                tokio::time::sleep(Duration::from_millis(1000)).await;
            }
        }
    };

    let mut drives: Vec<DriveModel> = bus
        .drive_types()
        .iter()
        .enumerate()
        .map(|(i, drive_type)| {
            DriveModel::new(
                i + 1,
                config.monitoring_channels,
                config.parameter_channels,
            )
            .with_drive_type(drive_type.clone())
        })
        .collect();

    let mut handle = cycle::spawn(bus, CycleConfig::from_bus_config(&config))?;
    if config.record_scope {
        handle.set_scope_recording(true);
    }
    if config.record_latency {
        handle.set_latency_recording(true);
    }

    let mut status_tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = status_tick.tick() => {
                for message in handle.drain_info() {
                    log::info!(target: LOG_KEY, "{message}");
                }
                for message in handle.drain_errors() {
                    log::error!(target: LOG_KEY, "{message}");
                }
                if handle.is_stopped() {
                    log::error!(target: LOG_KEY, "cycle engine stopped on its own");
                    break;
                }
                if let Err(e) = command::refresh(&handle, &mut drives) {
                    log::warn!(target: LOG_KEY, "could not decode snapshot: {e}");
                    continue;
                }
                for drive in &drives {
                    log::info!(
                        target: LOG_KEY,
                        "drive {} ({}): {:?}",
                        drive.index,
                        drive.drive_type,
                        drive.status
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!(target: LOG_KEY, "interrupted, shutting down");
                break;
            }
        }
    }

    handle.request_stop();

    let latency = handle.drain_latency();
    if !latency.is_empty() {
        write_latency_csv(Path::new("latency_log.csv"), &latency)?;
        log::info!(target: LOG_KEY, "saved {} latency entries", latency.len());
    }

    let samples = handle.drain_scope();
    if !samples.is_empty() {
        let scaling = drives
            .first()
            .map(|d| d.scaling.clone())
            .unwrap_or_default();
        write_scope_capture(
            Path::new("."),
            "scope_recording",
            0,
            &samples,
            &scaling,
            config.monitoring_channels,
        )?;
    }

    match handle.stop(Duration::from_secs(2)) {
        Some(Ok(())) => log::info!(target: LOG_KEY, "cycle engine exited cleanly"),
        Some(Err(e)) => log::error!(target: LOG_KEY, "cycle engine exited with: {e}"),
        None => log::error!(target: LOG_KEY, "cycle engine did not exit in time"),
    }

    for message in handle.drain_info() {
        log::info!(target: LOG_KEY, "{message}");
    }
    for message in handle.drain_errors() {
        log::error!(target: LOG_KEY, "{message}");
    }

    Ok(())
}
