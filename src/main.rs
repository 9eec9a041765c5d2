//! Classic MQTT bridge
//!
//! Polls a Midnite Classic charge controller over MODBUS/TCP and publishes the
//! decoded readings as JSON to an MQTT broker. The publish rate drops to a slow
//! snooze rate when nobody is watching and is raised again by a `wake` command.

use anyhow::{bail, Context, Result};
use clap::Parser;
use classic_mqtt_lib::supervisor::ShutdownReason;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::panic;

mod commandline;
mod config;
mod mqtt;

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .with_context(|| "Cannot init logging")?
        .start()
        .with_context(|| "Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    Ok(log_handle)
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter())?;
    info!(
        "Classic MQTT started. Log level: {}",
        args.verbose.log_level_filter()
    );

    let mut config = config::Config::load(args.config_file.as_deref())?;
    config.apply_args(&args);
    let settings = config.rates.to_settings()?;

    info!(
        "Classic {}:{} (unit {}), broker {}, root topic {}/{}",
        config.classic.host,
        config.classic.port,
        config.classic.unit_id,
        config.mqtt.url(),
        config.mqtt.root,
        config.classic.name
    );
    info!(
        "Publishing every {}s awake, every {}s snoozing, {} awake publishes before snoozing",
        settings.awake_interval_secs, settings.snooze_interval_secs, settings.awake_publish_limit
    );

    match mqtt::run_daemon(&config, settings)? {
        ShutdownReason::Stopped => {
            info!("Classic MQTT stopped");
            Ok(())
        }
        ShutdownReason::ModbusErrors => {
            bail!("Too many MODBUS errors, giving up on {}", config.classic.host)
        }
        ShutdownReason::MqttErrors => {
            bail!("Too many MQTT errors, giving up on {}", config.mqtt.url())
        }
    }
}
