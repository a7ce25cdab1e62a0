//! Decoding of validated response frames into cell voltages and board summaries.

use crate::protocol::{ResponseFrame, VoltageGroup};
use std::ops::Deref;

#[cfg(feature = "protocol_serde")]
use serde::{Deserialize, Serialize};

pub const CELLS_PER_BOARD: usize = 12;
pub const CELLS_PER_GROUP: usize = 4;

/// The 12 cell voltages of one board in millivolts, cell 0 first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct CellVoltageSet([u16; CELLS_PER_BOARD]);

impl CellVoltageSet {
    pub fn new(cells: [u16; CELLS_PER_BOARD]) -> Self {
        Self(cells)
    }

    /// Decodes the replies to `SEND_ALL_VOLTAGES_1..3`, given in request order.
    pub fn decode(frames: &[ResponseFrame; 3]) -> Self {
        let mut cells = [0; CELLS_PER_BOARD];
        for (group, frame) in VoltageGroup::ALL.iter().zip(frames) {
            let first = group.first_cell();
            cells[first..first + CELLS_PER_GROUP].copy_from_slice(&decode_voltage_group(frame));
        }
        Self(cells)
    }

    pub fn cells(&self) -> &[u16; CELLS_PER_BOARD] {
        &self.0
    }

    pub fn min(&self) -> u16 {
        self.0.iter().copied().min().unwrap_or_default()
    }

    pub fn max(&self) -> u16 {
        self.0.iter().copied().max().unwrap_or_default()
    }

    /// Sum of all cells in millivolts.
    pub fn total(&self) -> u32 {
        self.0.iter().map(|&v| u32::from(v)).sum()
    }
}

impl Deref for CellVoltageSet {
    type Target = [u16; CELLS_PER_BOARD];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Four little-endian cell voltages in bytes 2..10 of a voltage reply.
pub fn decode_voltage_group(frame: &ResponseFrame) -> [u16; CELLS_PER_GROUP] {
    let mut cells = [0; CELLS_PER_GROUP];
    for (i, cell) in cells.iter_mut().enumerate() {
        *cell = u16::from_le_bytes([frame[2 + 2 * i], frame[3 + 2 * i]]);
    }
    log::trace!("Board {} cells {:?}", frame.address(), cells);
    cells
}

/// Payload bytes of a voltage reply carrying `cells`.
pub fn encode_voltage_group(cells: &[u16; CELLS_PER_GROUP]) -> [u8; 8] {
    let mut payload = [0; 8];
    for (i, cell) in cells.iter().enumerate() {
        payload[2 * i..2 * i + 2].copy_from_slice(&cell.to_le_bytes());
    }
    payload
}

/// Aggregate readings a board returns for `SEND_SUMMARY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
pub struct SummaryRecord {
    pub min_voltage: u16,
    pub min_voltage_cell: u8,
    pub max_voltage: u16,
    pub max_voltage_cell: u8,
    pub avg_voltage: u16,
    pub temperature1: u16,
    pub temperature2: u16,
    pub status: u8,
}

impl SummaryRecord {
    pub fn decode(frame: &ResponseFrame) -> Self {
        let record = Self {
            min_voltage: u16::from_le_bytes([frame[2], frame[3]]),
            max_voltage: u16::from_le_bytes([frame[4], frame[5]]),
            avg_voltage: u16::from_le_bytes([frame[6], frame[7]]),
            // cell locations share byte 8: min in the low nibble, max in the high one
            min_voltage_cell: frame[8] & 0x0F,
            max_voltage_cell: frame[8] >> 4,
            // two 12-bit temperatures share byte 10
            temperature1: u16::from(frame[9]) | (u16::from(frame[10] & 0x0F) << 8),
            temperature2: u16::from(frame[10] >> 4) | (u16::from(frame[11]) << 4),
            status: frame[12],
        };
        log::trace!("Board {} summary {:?}", frame.address(), record);
        record
    }

    /// Payload bytes of a summary reply. Cell indices and temperatures are
    /// truncated to their 4 and 12 bit fields.
    pub fn encode(&self) -> [u8; 11] {
        let [min_lsb, min_msb] = self.min_voltage.to_le_bytes();
        let [max_lsb, max_msb] = self.max_voltage.to_le_bytes();
        let [avg_lsb, avg_msb] = self.avg_voltage.to_le_bytes();
        [
            min_lsb,
            min_msb,
            max_lsb,
            max_msb,
            avg_lsb,
            avg_msb,
            (self.min_voltage_cell & 0x0F) | (self.max_voltage_cell << 4),
            (self.temperature1 & 0xFF) as u8,
            ((self.temperature1 >> 8) & 0x0F) as u8 | (((self.temperature2 & 0x0F) as u8) << 4),
            ((self.temperature2 >> 4) & 0xFF) as u8,
            self.status,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BoardAddress, ResponseFrame};

    const BOARD: BoardAddress = BoardAddress::raw(0xBC);

    fn voltage_frame(cells: [u16; 4]) -> ResponseFrame {
        ResponseFrame::build(BOARD, &encode_voltage_group(&cells))
    }

    #[test]
    fn voltages_keep_request_order() {
        let frames = [
            voltage_frame([100, 200, 300, 400]),
            voltage_frame([500, 600, 700, 800]),
            voltage_frame([900, 1000, 1100, 1200]),
        ];
        let set = CellVoltageSet::decode(&frames);
        assert_eq!(
            *set.cells(),
            [100, 200, 300, 400, 500, 600, 700, 800, 900, 1000, 1100, 1200]
        );
        assert_eq!(set.min(), 100);
        assert_eq!(set.max(), 1200);
        assert_eq!(set.total(), 7800);
    }

    #[test]
    fn voltage_bytes_are_little_endian() {
        let mut payload = [0u8; 11];
        payload[..8].copy_from_slice(&[0xE4, 0x0C, 0x01, 0x00, 0x00, 0x10, 0xFF, 0x0F]);
        let frame = ResponseFrame::build(BOARD, &payload);
        assert_eq!(decode_voltage_group(&frame), [3300, 1, 4096, 4095]);
    }

    #[test]
    fn summary_fields() {
        let expected = SummaryRecord {
            min_voltage: 3000,
            min_voltage_cell: 3,
            max_voltage: 3500,
            max_voltage_cell: 9,
            avg_voltage: 3250,
            temperature1: 250,
            temperature2: 300,
            status: 0b101,
        };
        let frame = ResponseFrame::build(BOARD, &expected.encode());
        assert_eq!(frame[8], 0x93);
        assert_eq!(SummaryRecord::decode(&frame), expected);
    }

    #[test]
    fn summary_temperature_packing() {
        // temp1 = 0xABC, temp2 = 0x123: byte9=0xBC, byte10=0x3A, byte11=0x12
        let mut payload = [0u8; 11];
        payload[7] = 0xBC;
        payload[8] = 0x3A;
        payload[9] = 0x12;
        let record = SummaryRecord::decode(&ResponseFrame::build(BOARD, &payload));
        assert_eq!(record.temperature1, 0xABC);
        assert_eq!(record.temperature2, 0x123);
    }
}
