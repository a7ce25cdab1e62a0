/// Errors reported by the battery-monitor bus driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A reply was truncated or had the wrong size, usually a read timeout cut it short.
    #[error("Invalid frame length - expected={expected} received={actual}")]
    LengthMismatch { expected: usize, actual: usize },
    /// The CRC-8 over the received frame was not zero.
    #[error("Invalid checksum - residue={computed:#04x} frame={frame:02X?}")]
    ChecksumMismatch { computed: u8, frame: Vec<u8> },
    /// A board did not confirm its address during chain setup.
    #[error("Addressing failed at board #{board_index} (address {address:#04x}): {reason}")]
    AddressingFailed {
        board_index: usize,
        address: u8,
        reason: String,
    },
    /// A board replied with bytes that failed frame validation.
    #[error("Bad reply from board {address:#04x} to command {command:#04x}: {source}")]
    BadReply {
        address: u8,
        command: u8,
        source: Box<Error>,
    },
    /// A targeted command expected a reply that never arrived.
    #[error("No acknowledgment from board {address:#04x} for command {command:#04x}")]
    AcknowledgmentTimeout { address: u8, command: u8 },
    /// A valid frame arrived, but from another board than the one addressed.
    #[error("Reply to command {command:#04x} came from {actual:#04x}, expected {expected:#04x}")]
    UnexpectedResponder { expected: u8, actual: u8, command: u8 },
    /// Reserved addresses cannot be assigned to a board.
    #[error("Address {0:#04x} is reserved")]
    InvalidAddress(u8),
    #[error("Address {0:#04x} appears more than once in the address pool")]
    DuplicateAddress(u8),
    #[error("Address pool holds {pool} addresses but {boards} boards are configured")]
    AddressPoolExhausted { boards: usize, pool: usize },
    #[error("No boards configured, the chain needs at least one address")]
    EmptyAddressPool,
    /// Failure while driving the trigger or buzzer line.
    #[error("Signal line error: {0}")]
    Signal(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serialport")]
    #[error("Serial port error: {0}")]
    SerialPort(#[from] ::serialport::Error),
}

impl Error {
    /// True for errors caused by a single bad or missing reply, which the
    /// polling loop recovers from by skipping the affected reading.
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Error::LengthMismatch { .. }
                | Error::ChecksumMismatch { .. }
                | Error::BadReply { .. }
                | Error::AcknowledgmentTimeout { .. }
                | Error::UnexpectedResponder { .. }
        )
    }

    /// Wraps a frame validation error with the exchange it happened in.
    pub(crate) fn in_reply(self, address: u8, command: u8) -> Self {
        match self {
            Error::LengthMismatch { .. } | Error::ChecksumMismatch { .. } => Error::BadReply {
                address,
                command,
                source: Box::new(self),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
