use anyhow::{Context, Result};
use jbdbms_lib::TemperatureOrder;
use serde::Deserialize;
use std::time::Duration;

#[derive(clap::ValueEnum, Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DirectionMode {
    /// The RS485 adapter switches between TX and RX by itself
    #[default]
    Auto,
    /// RTS high enables the transmitter (DE/!RE wired to RTS)
    Rts,
    /// RTS low enables the transmitter
    RtsInverted,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "Config::default_device")]
    pub device: String,
    #[serde(default = "Config::default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "Config::default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "Config::default_delay", with = "humantime_serde")]
    pub delay: Duration,
    #[serde(default)]
    pub direction: DirectionMode,
    #[serde(default)]
    pub temperature_order: TemperatureOrder,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: Self::default_device(),
            baud_rate: Self::default_baud_rate(),
            timeout: Self::default_timeout(),
            delay: Self::default_delay(),
            direction: DirectionMode::default(),
            temperature_order: TemperatureOrder::default(),
        }
    }
}

impl Config {
    fn default_device() -> String {
        if cfg!(target_os = "windows") {
            String::from("COM1")
        } else {
            String::from("/dev/ttyUSB0")
        }
    }

    fn default_baud_rate() -> u32 {
        9600
    }

    fn default_timeout() -> Duration {
        Duration::from_millis(500)
    }

    fn default_delay() -> Duration {
        jbdbms_lib::DEFAULT_DELAY
    }

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_gives_defaults() {
        let file = write_config("{}\n");
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn full_file() {
        let file = write_config(
            "device: /dev/ttyAMA0\n\
             baud_rate: 19200\n\
             timeout: 1s\n\
             delay: 50ms\n\
             direction: rts-inverted\n\
             temperature_order: unswapped\n",
        );
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.device, "/dev/ttyAMA0");
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.delay, Duration::from_millis(50));
        assert_eq!(config.direction, DirectionMode::RtsInverted);
        assert_eq!(config.temperature_order, TemperatureOrder::Unswapped);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("baudrate: 9600\n");
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn missing_file() {
        assert!(Config::load("/nonexistent/jbdbms.yaml").is_err());
    }
}
