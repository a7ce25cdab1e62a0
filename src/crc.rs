//! CRC-8 used by the battery monitor firmware to protect every frame.
//!
//! The checksum is a plain MSB-first CRC without reflection or final XOR, so a
//! frame whose last byte is the CRC of everything before it checksums to zero.

use ::crc::{Algorithm, Crc, CRC_8_SMBUS};

/// A frame checksum over any catalogued non-reflected CRC-8 with zero final XOR.
pub struct FrameCrc(Crc<u8>);

impl FrameCrc {
    /// CRC-8/SMBUS: x^8 + x^2 + x + 1, initial value 0x00.
    pub const BOARD: FrameCrc = FrameCrc::new(&CRC_8_SMBUS);

    pub const fn new(algorithm: &'static Algorithm<u8>) -> Self {
        Self(Crc::<u8>::new(algorithm))
    }

    pub fn algorithm(&self) -> &'static Algorithm<u8> {
        self.0.algorithm
    }

    pub fn checksum(&self, bytes: &[u8]) -> u8 {
        self.0.checksum(bytes)
    }

    /// Checks a frame whose last byte holds the checksum of the preceding bytes.
    pub fn is_valid(&self, frame: &[u8]) -> bool {
        !frame.is_empty() && self.checksum(frame) == 0
    }
}

impl std::fmt::Debug for FrameCrc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FrameCrc")
            .field(&format_args!("poly={:#04x}", self.0.algorithm.poly))
            .finish()
    }
}

/// Checksum of `bytes` with the board CRC.
pub fn compute_checksum(bytes: &[u8]) -> u8 {
    FrameCrc::BOARD.checksum(bytes)
}

/// `true` iff the board CRC over the whole frame, checksum byte included, is zero.
pub fn is_valid(frame: &[u8]) -> bool {
    FrameCrc::BOARD.is_valid(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value_matches_crc8_smbus() {
        // Standard check input for catalogued CRC parameters.
        assert_eq!(compute_checksum(b"123456789"), 0xF4);
        assert_eq!(compute_checksum(b"123456789"), CRC_8_SMBUS.check);
    }

    #[test]
    fn empty_input_is_never_valid() {
        assert_eq!(compute_checksum(&[]), 0x00);
        assert!(!is_valid(&[]));
    }

    #[test]
    fn appended_checksum_gives_zero_residue() {
        let mut frame = vec![0x58, 0xAD, 0x50, 0x00, 0x1D, 0x01, 0x00];
        frame.push(compute_checksum(&frame));
        assert!(is_valid(&frame));
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let mut frame = vec![
            0x58, 0xBC, 0x00, 0x0B, 0xB8, 0x0D, 0xAC, 0x0C, 0x93, 0xFA, 0xC2, 0x12, 0x05,
        ];
        frame.push(compute_checksum(&frame));
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(!is_valid(&corrupted), "flip byte {byte} bit {bit} not detected");
            }
        }
    }

    #[test]
    fn other_catalogued_algorithms_can_be_swapped_in() {
        let cdma = FrameCrc::new(&::crc::CRC_8_CDMA2000);
        let mut frame = vec![0x01, 0x02, 0x03];
        frame.push(cdma.checksum(&frame));
        assert!(cdma.is_valid(&frame));
        assert_eq!(cdma.algorithm().poly, 0x9B);
        assert_ne!(cdma.checksum(b"123456789"), compute_checksum(b"123456789"));
    }
}
