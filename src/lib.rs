#![cfg_attr(docsrs, feature(doc_cfg))]
//! # bmchain_lib
//!
//! Master-side driver for daisy-chained battery monitor (BM) boards sharing
//! one half-duplex serial bus.
//!
//! The controller gives the initially address-less boards unique addresses
//! through the trigger line that gates each board from its predecessor, then
//! polls cell voltages and summaries and sets balance targets per board.
//!
//! ```no_run
//! # #[cfg(feature = "serialport")]
//! # fn main() -> Result<(), bmchain_lib::Error> {
//! use bmchain_lib::{serialport::SerialTransport, signal::NullSignaling, BmChain, ChainConfig};
//!
//! let transport = SerialTransport::new("/dev/serial0", SerialTransport::DEFAULT_BAUD_RATE)?;
//! let mut chain = BmChain::new(transport, NullSignaling, ChainConfig::default())?;
//! for reading in chain.poll_all()? {
//!     println!("{reading:?}");
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "serialport"))]
//! # fn main() {}
//! ```
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `bmchain` command-line tool.
//! - `serialport`: Enables the serial port transport using the `serialport` crate.
//! - `embedded-hal`: Enables driving the trigger line and buzzer through `embedded_hal` output pins.
//! - `protocol_serde`: Enables `serde` support for the telemetry records.
//! - `bin-dependencies`: Enables all features required by the `bmchain` binary executable.

mod addressing;
mod bus;
mod config;
/// Contains error types for the library.
mod error;

pub mod crc;
/// Defines the wire protocol of the board chain.
pub mod protocol;
pub mod signal;
pub mod simulator;
pub mod telemetry;
pub mod transport;

pub use bus::{BmChain, BoardReading};
pub use config::ChainConfig;
pub use error::{Error, Result};
pub use protocol::BoardAddress;

/// Serial port transport.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;
