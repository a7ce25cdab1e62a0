use anyhow::{Context, Result};
use std::path::PathBuf;

const SYSFS_GPIO: &str = "/sys/class/gpio";

#[derive(Debug)]
pub struct SysfsPinError(std::io::Error);

impl embedded_hal::digital::Error for SysfsPinError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

/// Output pin driven through the Linux sysfs GPIO interface.
#[derive(Debug)]
pub struct SysfsPin {
    value: PathBuf,
}

impl SysfsPin {
    /// Exports the pin if needed and configures it as an output.
    pub fn export(number: u32) -> Result<Self> {
        let base = PathBuf::from(format!("{SYSFS_GPIO}/gpio{number}"));
        if !base.exists() {
            std::fs::write(format!("{SYSFS_GPIO}/export"), number.to_string())
                .with_context(|| format!("Cannot export GPIO {number}"))?;
        }
        std::fs::write(base.join("direction"), "out")
            .with_context(|| format!("Cannot set GPIO {number} as output"))?;
        log::debug!("GPIO {number} exported as output");
        Ok(Self {
            value: base.join("value"),
        })
    }

    fn write(&self, level: &str) -> std::result::Result<(), SysfsPinError> {
        std::fs::write(&self.value, level).map_err(SysfsPinError)
    }
}

impl embedded_hal::digital::ErrorType for SysfsPin {
    type Error = SysfsPinError;
}

impl embedded_hal::digital::OutputPin for SysfsPin {
    fn set_low(&mut self) -> std::result::Result<(), Self::Error> {
        self.write("0")
    }

    fn set_high(&mut self) -> std::result::Result<(), Self::Error> {
        self.write("1")
    }
}
