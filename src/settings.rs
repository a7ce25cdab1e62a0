use crate::commandline::CliArgs;
use anyhow::{Context, Result};
use bmchain_lib::{BoardAddress, ChainConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/serial0")
    }
}

/// Controller settings as read from the YAML file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub device: String,
    pub baud_rate: u32,
    pub addresses: Vec<u8>,
    pub board_count: Option<usize>,
    pub system_current_ma: u16,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    pub retries: u8,
    pub simulate: bool,
    /// Seed of the simulated cell readings.
    pub simulation_seed: u64,
    /// GPIO driving the first board's trigger input, none if not wired.
    pub trigger_gpio: Option<u32>,
    pub buzzer_gpio: Option<u32>,
    pub alert: bool,
    #[serde(with = "humantime_serde")]
    pub alert_duration: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        let chain = ChainConfig::default();
        Self {
            device: default_device_name(),
            baud_rate: bmchain_lib::serialport::SerialTransport::DEFAULT_BAUD_RATE,
            addresses: ChainConfig::DEFAULT_ADDRESSES.to_vec(),
            board_count: None,
            system_current_ma: chain.system_current_ma,
            timeout: chain.timeout,
            delay: chain.delay,
            settle_delay: chain.settle_delay,
            retries: chain.retries,
            simulate: false,
            simulation_seed: 0,
            trigger_gpio: Some(23),
            buzzer_gpio: Some(25),
            alert: false,
            alert_duration: Duration::from_millis(500),
        }
    }
}

impl Settings {
    pub const DEFAULT_CONFIG_FILE: &str = "bmchain.yaml";

    pub fn load<P: AsRef<Path>>(config_file_path: P) -> Result<Self> {
        let config_file_path = config_file_path.as_ref();
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let settings: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(settings)
    }

    /// Settings from the file named on the command line, else from
    /// [`Self::DEFAULT_CONFIG_FILE`] if present, else the defaults.
    pub fn resolve(args: &CliArgs) -> Result<Self> {
        let mut settings = match &args.config {
            Some(path) => Self::load(path)?,
            None if Path::new(Self::DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Self::DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        settings.apply_args(args);
        Ok(settings)
    }

    pub fn apply_args(&mut self, args: &CliArgs) {
        if let Some(device) = &args.device {
            self.device = device.clone();
        }
        if let Some(baud_rate) = args.baud_rate {
            self.baud_rate = baud_rate;
        }
        if !args.addresses.is_empty() {
            self.addresses = args.addresses.clone();
            self.board_count = None;
        }
        if let Some(current) = args.system_current {
            self.system_current_ma = current;
        }
        if let Some(timeout) = args.timeout {
            self.timeout = timeout;
        }
        if let Some(delay) = args.delay {
            self.delay = delay;
        }
        if let Some(retries) = args.retries {
            self.retries = retries;
        }
        self.simulate |= args.simulate;
    }

    pub fn chain_config(&self) -> Result<ChainConfig> {
        let address_pool = self
            .addresses
            .iter()
            .map(|&a| BoardAddress::assignable(a))
            .collect::<bmchain_lib::Result<Vec<_>>>()
            .with_context(|| "Invalid board address in configuration")?;
        let config = ChainConfig {
            board_count: self.board_count.unwrap_or(address_pool.len()),
            address_pool,
            system_current_ma: self.system_current_ma,
            timeout: self.timeout,
            delay: self.delay,
            settle_delay: self.settle_delay,
            retries: self.retries,
            alert: self.alert,
        };
        config
            .validate()
            .with_context(|| "Invalid chain configuration")?;
        Ok(config)
    }
}
