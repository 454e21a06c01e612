use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use jbdbms_lib::serialport::SerialJbdBms;
use log::*;
use std::{ops::Deref, panic};

mod commandline;
mod config;
mod monitor;

use commandline::{CliArgs, CliCommands};
use config::{Config, DirectionMode};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn open_bms(config: &Config) -> Result<SerialJbdBms> {
    let rts_transmit_level = match config.direction {
        DirectionMode::Auto => None,
        DirectionMode::Rts => Some(true),
        DirectionMode::RtsInverted => Some(false),
    };
    let mut bms = SerialJbdBms::open_serial(
        &config.device,
        config.baud_rate,
        config.timeout,
        rts_transmit_level,
        config.delay,
    )
    .with_context(|| format!("Cannot open serial port '{}'", config.device))?;
    bms.set_temperature_order(config.temperature_order);
    Ok(bms)
}

macro_rules! print_status {
    ($bms:expr) => {
        println!(
            "{}",
            monitor::format_status(&$bms.get_status().with_context(|| "Cannot get status")?)
        )
    };
}
macro_rules! print_cells {
    ($bms:expr) => {
        println!(
            "{}",
            monitor::format_cells(&$bms.get_cells().with_context(|| "Cannot get cell voltages")?)
        )
    };
}
macro_rules! print_hardware {
    ($bms:expr) => {
        println!(
            "Hardware: {}",
            $bms.get_hardware()
                .with_context(|| "Cannot get hardware id")?
        )
    };
}
macro_rules! print_faults {
    ($bms:expr) => {
        println!(
            "{}",
            monitor::format_faults(&$bms.get_status().with_context(|| "Cannot get status")?)
        )
    };
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let config = args.resolve_config()?;
    debug!("Using {config:?}");
    let mut bms = open_bms(&config)?;

    match args.command {
        CliCommands::Status => print_status!(bms),
        CliCommands::Cells => print_cells!(bms),
        CliCommands::Hardware => print_hardware!(bms),
        CliCommands::Faults => print_faults!(bms),
        CliCommands::All => {
            print_hardware!(bms);
            print_status!(bms);
            print_cells!(bms);
        }
        CliCommands::SetMosfet { mask } => bms
            .set_mosfet_status(mask.into())
            .with_context(|| "Cannot set mosfets")?,
        CliCommands::ToggleCharge => {
            let status = bms.get_status().with_context(|| "Cannot get status")?;
            let mask = status.mosfet().toggle_charge();
            bms.set_mosfet_status(mask)
                .with_context(|| "Cannot set mosfets")?;
            info!(
                "Charge mosfet switched {}",
                if mask.charge() { "ON" } else { "OFF" }
            );
        }
        CliCommands::Monitor {
            interval,
            metrics,
            format,
            changes_only,
        } => monitor::run(bms, interval, metrics, format, changes_only)?,
    }

    Ok(())
}
