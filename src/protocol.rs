//! Wire format of the battery monitor bus: frame layout, reserved addresses,
//! command codes and the request builders for every command.

use crate::crc;
use crate::{Error, Result};
use std::fmt;
use std::ops::Deref;

#[cfg(feature = "protocol_serde")]
use serde::{Deserialize, Serialize};

pub const HEAD: u8 = 0x58;
pub const COMMAND_LENGTH: usize = 8;
pub const RESPONSE_LENGTH: usize = 14;
pub const PAYLOAD_LENGTH: usize = 4;

/// Balance target meaning "stop balancing" (encoded on the wire as 0x0FFF).
pub const BALANCE_STOP_MV: u16 = 4096;

// Trailing payload byte of SET_ADDRESS expected by the board firmware.
const SET_ADDRESS_FLAGS: u8 = 0x02;

/// 8-bit bus address of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "protocol_serde", serde(transparent))]
pub struct BoardAddress(u8);

impl BoardAddress {
    /// Broadcast, every board listens.
    pub const GLOBAL: BoardAddress = BoardAddress(0xFF);
    /// Factory address of a board that has not been addressed yet.
    pub const DEFAULT: BoardAddress = BoardAddress(0xFE);

    /// Any address, reserved ones included.
    pub const fn raw(value: u8) -> Self {
        Self(value)
    }

    /// An address that may be given to a board during chain addressing.
    pub fn assignable(value: u8) -> Result<Self> {
        let address = Self(value);
        if address.is_reserved() {
            return Err(Error::InvalidAddress(value));
        }
        Ok(address)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::GLOBAL
    }

    pub fn is_reserved(self) -> bool {
        self == Self::GLOBAL || self == Self::DEFAULT
    }
}

impl fmt::Display for BoardAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

impl From<BoardAddress> for u8 {
    fn from(address: BoardAddress) -> u8 {
        address.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Trigger = 0x32,
    SetAddress = 0x3C,
    AutoAddrDone = 0x41,
    GlobalSnapshot = 0x46,
    SendSummary = 0x50,
    SendAllVoltages1 = 0xA0,
    SendAllVoltages2 = 0xA1,
    SendAllVoltages3 = 0xA2,
    BalanceTarget = 0xAA,
}

impl Command {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let command = match code {
            0x32 => Command::Trigger,
            0x3C => Command::SetAddress,
            0x41 => Command::AutoAddrDone,
            0x46 => Command::GlobalSnapshot,
            0x50 => Command::SendSummary,
            0xA0 => Command::SendAllVoltages1,
            0xA1 => Command::SendAllVoltages2,
            0xA2 => Command::SendAllVoltages3,
            0xAA => Command::BalanceTarget,
            _ => return None,
        };
        Some(command)
    }

    /// Whether an addressed board answers this command with a response frame.
    pub fn expects_reply(self) -> bool {
        !matches!(
            self,
            Command::Trigger | Command::AutoAddrDone | Command::GlobalSnapshot
        )
    }
}

/// An 8-byte command frame `[HEAD, ADDR, CMD, PAYLOAD[4], CRC]` with its CRC fixed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; COMMAND_LENGTH]);

impl CommandFrame {
    pub fn address(&self) -> BoardAddress {
        BoardAddress(self.0[1])
    }

    pub fn command_code(&self) -> u8 {
        self.0[2]
    }

    pub fn payload(&self) -> [u8; PAYLOAD_LENGTH] {
        [self.0[3], self.0[4], self.0[5], self.0[6]]
    }

    /// Parses a frame written to the bus, as the boards do.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let buffer: [u8; COMMAND_LENGTH] =
            bytes.try_into().map_err(|_| Error::LengthMismatch {
                expected: COMMAND_LENGTH,
                actual: bytes.len(),
            })?;
        validate_checksum(&buffer)?;
        Ok(Self(buffer))
    }
}

impl Deref for CommandFrame {
    type Target = [u8; COMMAND_LENGTH];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X?}", self.0)
    }
}

/// A 14-byte response frame `[HEAD, ADDR, PAYLOAD[11], CRC]` that passed validation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame([u8; RESPONSE_LENGTH]);

impl ResponseFrame {
    /// Builds a response the way a board does, with the CRC fixed. Bytes past
    /// the 11 payload bytes are ignored.
    pub fn build(address: BoardAddress, payload: &[u8]) -> Self {
        let mut buffer = [0; RESPONSE_LENGTH];
        buffer[0] = HEAD;
        buffer[1] = address.value();
        let n = payload.len().min(RESPONSE_LENGTH - 3);
        buffer[2..2 + n].copy_from_slice(&payload[..n]);
        calc_crc_and_set(&mut buffer);
        Self(buffer)
    }

    pub fn address(&self) -> BoardAddress {
        BoardAddress(self.0[1])
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[2..RESPONSE_LENGTH - 1]
    }
}

impl Deref for ResponseFrame {
    type Target = [u8; RESPONSE_LENGTH];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ResponseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X?}", self.0)
    }
}

fn calc_crc_and_set(buffer: &mut [u8]) {
    let len = buffer.len();
    buffer[len - 1] = crc::compute_checksum(&buffer[..len - 1]);
}

fn validate_checksum(buffer: &[u8]) -> Result<()> {
    let residue = crc::compute_checksum(buffer);
    if residue != 0 {
        log::warn!(
            "Invalid checksum - residue={:02X?} buffer={:02X?}",
            residue,
            buffer
        );
        return Err(Error::ChecksumMismatch {
            computed: residue,
            frame: buffer.to_vec(),
        });
    }
    Ok(())
}

/// Assembles a command frame and fixes its trailing CRC.
pub fn build_command(
    address: BoardAddress,
    command: Command,
    payload: [u8; PAYLOAD_LENGTH],
) -> CommandFrame {
    let mut tx_buffer = [0; COMMAND_LENGTH];
    tx_buffer[0] = HEAD;
    tx_buffer[1] = address.value();
    tx_buffer[2] = command.code();
    tx_buffer[3..7].copy_from_slice(&payload);
    calc_crc_and_set(&mut tx_buffer);
    CommandFrame(tx_buffer)
}

/// Validates raw reply bytes. Nothing may be decoded from bytes that did not pass here.
pub fn decode_response(rx_buffer: &[u8]) -> Result<ResponseFrame> {
    let buffer: [u8; RESPONSE_LENGTH] =
        rx_buffer.try_into().map_err(|_| {
            log::warn!(
                "Invalid buffer size - required={} received={}",
                RESPONSE_LENGTH,
                rx_buffer.len()
            );
            Error::LengthMismatch {
                expected: RESPONSE_LENGTH,
                actual: rx_buffer.len(),
            }
        })?;
    validate_checksum(&buffer)?;
    Ok(ResponseFrame(buffer))
}

// Commands carrying a 16-bit quantity put it little-endian in payload bytes 1..3.
fn word_payload(value: u16) -> [u8; PAYLOAD_LENGTH] {
    let [lsb, msb] = value.to_le_bytes();
    [0x00, lsb, msb, 0x00]
}

/// Decodes the 16-bit quantity of [`word_payload`].
pub fn payload_word(payload: [u8; PAYLOAD_LENGTH]) -> u16 {
    u16::from_le_bytes([payload[1], payload[2]])
}

/// One of the three cell groups a board reports its 12 cell voltages in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageGroup {
    First,
    Second,
    Third,
}

impl VoltageGroup {
    pub const ALL: [VoltageGroup; 3] = [
        VoltageGroup::First,
        VoltageGroup::Second,
        VoltageGroup::Third,
    ];

    pub fn command(self) -> Command {
        match self {
            VoltageGroup::First => Command::SendAllVoltages1,
            VoltageGroup::Second => Command::SendAllVoltages2,
            VoltageGroup::Third => Command::SendAllVoltages3,
        }
    }

    /// Index of the first cell of this group.
    pub fn first_cell(self) -> usize {
        match self {
            VoltageGroup::First => 0,
            VoltageGroup::Second => 4,
            VoltageGroup::Third => 8,
        }
    }

    pub fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::SendAllVoltages1 => Some(VoltageGroup::First),
            Command::SendAllVoltages2 => Some(VoltageGroup::Second),
            Command::SendAllVoltages3 => Some(VoltageGroup::Third),
            _ => None,
        }
    }
}

/// Tells the addressed board to toggle the trigger line enabling its successor.
pub fn trigger(address: BoardAddress) -> CommandFrame {
    build_command(address, Command::Trigger, [0; PAYLOAD_LENGTH])
}

/// Gives `new_address` to the single board currently answering to DEFAULT.
pub fn set_address(new_address: BoardAddress) -> CommandFrame {
    build_command(
        BoardAddress::DEFAULT,
        Command::SetAddress,
        [new_address.value(), 0x00, 0x00, SET_ADDRESS_FLAGS],
    )
}

pub fn autoaddr_done() -> CommandFrame {
    build_command(
        BoardAddress::GLOBAL,
        Command::AutoAddrDone,
        [0; PAYLOAD_LENGTH],
    )
}

/// Broadcast latching the system current into every board before a read cycle.
pub fn request_global_snapshot(system_current_ma: u16) -> CommandFrame {
    build_command(
        BoardAddress::GLOBAL,
        Command::GlobalSnapshot,
        word_payload(system_current_ma),
    )
}

pub fn request_voltages(address: BoardAddress, group: VoltageGroup) -> CommandFrame {
    build_command(address, group.command(), [0; PAYLOAD_LENGTH])
}

pub fn request_summary(address: BoardAddress, system_current_ma: u16) -> CommandFrame {
    build_command(
        address,
        Command::SendSummary,
        word_payload(system_current_ma),
    )
}

/// The firmware stores the target minus one, so 4096 mV goes out as 0x0FFF.
pub fn set_balance_target(address: BoardAddress, target_mv: u16) -> CommandFrame {
    build_command(
        address,
        Command::BalanceTarget,
        word_payload(target_mv.saturating_sub(1)),
    )
}

pub fn reset_balance_target(address: BoardAddress) -> CommandFrame {
    set_balance_target(address, BALANCE_STOP_MV)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD: BoardAddress = BoardAddress::raw(0xAD);

    #[test]
    fn built_commands_are_valid() {
        let frames = [
            trigger(BOARD),
            set_address(BOARD),
            autoaddr_done(),
            request_global_snapshot(285),
            request_voltages(BOARD, VoltageGroup::Second),
            request_summary(BOARD, 285),
            set_balance_target(BOARD, 3300),
            reset_balance_target(BoardAddress::GLOBAL),
        ];
        for frame in frames {
            assert_eq!(frame[0], HEAD);
            assert!(crc::is_valid(&*frame), "{frame:?}");
        }
    }

    #[test]
    fn command_layout() {
        let frame = request_summary(BOARD, 0x011D);
        assert_eq!(&frame[..7], &[HEAD, 0xAD, 0x50, 0x00, 0x1D, 0x01, 0x00]);
        assert_eq!(frame.address(), BOARD);
        assert_eq!(Command::from_code(frame.command_code()), Some(Command::SendSummary));
    }

    #[test]
    fn set_address_targets_default() {
        let frame = set_address(BoardAddress::raw(0xBC));
        assert_eq!(frame.address(), BoardAddress::DEFAULT);
        assert_eq!(frame.payload(), [0xBC, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn balance_target_is_sent_minus_one() {
        let frame = set_balance_target(BOARD, 3300);
        assert_eq!(payload_word(frame.payload()), 3299);
        let reset = reset_balance_target(BOARD);
        assert_eq!(reset.payload(), [0x00, 0xFF, 0x0F, 0x00]);
    }

    #[test]
    fn voltage_groups_map_to_commands() {
        let codes: Vec<u8> = VoltageGroup::ALL
            .iter()
            .map(|g| request_voltages(BOARD, *g).command_code())
            .collect();
        assert_eq!(codes, vec![0xA0, 0xA1, 0xA2]);
    }

    #[test]
    fn decode_response_rejects_wrong_length() {
        for len in [0, 1, 8, 13, 15, 28] {
            let bytes = vec![HEAD; len];
            assert!(matches!(
                decode_response(&bytes),
                Err(Error::LengthMismatch { expected: 14, actual }) if actual == len
            ));
        }
    }

    #[test]
    fn decode_response_rejects_corruption() {
        let frame = ResponseFrame::build(BOARD, &[0xB8, 0x0B, 0xAC, 0x0D]);
        assert!(decode_response(&*frame).is_ok());
        let mut corrupted = frame.to_vec();
        corrupted[5] ^= 0x10;
        assert!(matches!(
            decode_response(&corrupted),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn command_frame_parse_round_trip() {
        let frame = request_global_snapshot(285);
        let parsed = CommandFrame::parse(&*frame).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(payload_word(parsed.payload()), 285);
    }

    #[test]
    fn reserved_addresses_are_not_assignable() {
        assert!(matches!(BoardAddress::assignable(0xFF), Err(Error::InvalidAddress(0xFF))));
        assert!(matches!(BoardAddress::assignable(0xFE), Err(Error::InvalidAddress(0xFE))));
        assert_eq!(BoardAddress::assignable(0xDE).unwrap().value(), 0xDE);
    }
}
