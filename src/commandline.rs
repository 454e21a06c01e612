use crate::config::{Config, DirectionMode};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use jbdbms_lib::MosfetMask;
use std::time::Duration;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MosfetArg {
    None,
    Charge,
    Discharge,
    Both,
}

impl From<MosfetArg> for MosfetMask {
    fn from(arg: MosfetArg) -> Self {
        match arg {
            MosfetArg::None => MosfetMask::None,
            MosfetArg::Charge => MosfetMask::Charge,
            MosfetArg::Discharge => MosfetMask::Discharge,
            MosfetArg::Both => MosfetMask::Both,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show voltage, current, capacities, balancing, faults, mosfets and temperatures
    Status,
    /// Show individual cell voltages
    Cells,
    /// Show the hardware id of the BMS
    Hardware,
    /// Show active fault protections
    Faults,
    /// Show all available BMS information
    All,
    /// Switch the charge and discharge MOSFETs
    SetMosfet {
        /// Which MOSFETs are switched on afterwards
        #[arg(value_enum)]
        mask: MosfetArg,
    },
    /// Toggle the charge MOSFET, keeping the discharge MOSFET as it is
    ToggleCharge,
    /// Poll the BMS periodically and print the readings
    Monitor {
        /// Interval between polls (e.g., "10s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
        interval: Duration,
        /// Comma-separated list of metrics to fetch (status, cells, hardware or all)
        #[clap(long, short, use_value_delimiter = true, default_value = "status,cells")]
        metrics: Vec<String>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Only print a metric when it differs from the previous reading
        #[arg(long)]
        changes_only: bool,
    },
}

const fn about_text() -> &'static str {
    "jbd bms command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// YAML file with the port settings, command line options take precedence
    #[arg(long)]
    pub config: Option<String>,

    /// Serial port device path (default /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Baud rate (default 9600)
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Timeout for serial reads (e.g., "500ms", "1s"), default 500ms
    #[arg(value_parser = humantime::parse_duration, long)]
    pub timeout: Option<Duration>,

    // Some USB - RS485 dongles requires time to switch between TX and RX, so use a save delay between frames
    /// Minimum delay between two commands (e.g., "20ms", "100ms"), default 20ms
    #[arg(value_parser = humantime::parse_duration, long)]
    pub delay: Option<Duration>,

    /// How the RS485 transceiver is switched between transmit and receive
    #[arg(long, value_enum)]
    pub direction: Option<DirectionMode>,

    #[command(subcommand)]
    pub command: CliCommands,
}

impl CliArgs {
    /// Config file (or defaults) overridden by the given options.
    pub fn resolve_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(delay) = self.delay {
            config.delay = delay;
        }
        if let Some(direction) = self.direction {
            config.direction = direction;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_defaults() {
        let args = CliArgs::parse_from([
            "jbdbms",
            "--device",
            "/dev/ttyS1",
            "--delay",
            "100ms",
            "--direction",
            "rts",
            "status",
        ]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.device, "/dev/ttyS1");
        assert_eq!(config.delay, Duration::from_millis(100));
        assert_eq!(config.direction, DirectionMode::Rts);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(args.command, CliCommands::Status);
    }

    #[test]
    fn set_mosfet_argument() {
        let args = CliArgs::parse_from(["jbdbms", "set-mosfet", "discharge"]);
        assert_eq!(
            args.command,
            CliCommands::SetMosfet {
                mask: MosfetArg::Discharge
            }
        );
        assert_eq!(MosfetMask::from(MosfetArg::Discharge), MosfetMask::Discharge);
    }

    #[test]
    fn monitor_arguments() {
        let args = CliArgs::parse_from([
            "jbdbms",
            "monitor",
            "--interval",
            "1m",
            "--metrics",
            "status,hardware",
            "--format",
            "json",
            "--changes-only",
        ]);
        assert_eq!(
            args.command,
            CliCommands::Monitor {
                interval: Duration::from_secs(60),
                metrics: vec!["status".into(), "hardware".into()],
                format: OutputFormat::Json,
                changes_only: true,
            }
        );
    }
}
