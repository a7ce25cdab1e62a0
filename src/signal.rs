//! Trigger line and buzzer driven by the controller.

use crate::Result;

pub trait Signaling {
    /// Opens (`true`) or closes the isolation gate of the first board in the chain.
    fn set_isolation_gate(&mut self, enabled: bool) -> Result<()>;

    /// Short audible cue before a data transaction.
    fn sound_alert(&mut self) -> Result<()>;
}

impl<S: Signaling + ?Sized> Signaling for Box<S> {
    fn set_isolation_gate(&mut self, enabled: bool) -> Result<()> {
        (**self).set_isolation_gate(enabled)
    }

    fn sound_alert(&mut self) -> Result<()> {
        (**self).sound_alert()
    }
}

/// For chains whose addresses are already known and no trigger line is wired.
#[derive(Debug, Default)]
pub struct NullSignaling;

impl Signaling for NullSignaling {
    fn set_isolation_gate(&mut self, enabled: bool) -> Result<()> {
        log::debug!("No trigger line wired, ignoring gate enabled={enabled}");
        Ok(())
    }

    fn sound_alert(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "embedded-hal")]
pub use pins::OutputPinSignaling;

#[cfg(feature = "embedded-hal")]
mod pins {
    use super::Signaling;
    use crate::{Error, Result};
    use embedded_hal::digital::OutputPin;
    use std::time::Duration;

    /// Drives the trigger line (active low) and an optional buzzer through GPIO pins.
    #[derive(Debug)]
    pub struct OutputPinSignaling<T, B> {
        trigger: T,
        buzzer: Option<B>,
        alert_duration: Duration,
    }

    impl<T: OutputPin, B: OutputPin> OutputPinSignaling<T, B> {
        pub fn new(trigger: T, buzzer: Option<B>, alert_duration: Duration) -> Self {
            Self {
                trigger,
                buzzer,
                alert_duration,
            }
        }
    }

    fn pin_error<E: std::fmt::Debug>(what: &str, err: E) -> Error {
        Error::Signal(format!("{what}: {err:?}"))
    }

    impl<T: OutputPin, B: OutputPin> Signaling for OutputPinSignaling<T, B> {
        fn set_isolation_gate(&mut self, enabled: bool) -> Result<()> {
            log::trace!("Trigger line enabled={enabled}");
            let result = if enabled {
                self.trigger.set_low()
            } else {
                self.trigger.set_high()
            };
            result.map_err(|e| pin_error("Cannot drive trigger line", e))
        }

        fn sound_alert(&mut self) -> Result<()> {
            if let Some(buzzer) = &mut self.buzzer {
                buzzer
                    .set_high()
                    .map_err(|e| pin_error("Cannot start buzzer", e))?;
                std::thread::sleep(self.alert_duration);
                buzzer
                    .set_low()
                    .map_err(|e| pin_error("Cannot stop buzzer", e))?;
                std::thread::sleep(self.alert_duration);
            }
            Ok(())
        }
    }

}
