//! MPEG-2 CRC-32 (ITU-T H.222.0 Annex A).
//!
//! Polynomial 0x04C11DB7, init 0xFFFFFFFF, no reflection, no final XOR.

use crc::{Crc, CRC_32_MPEG_2};

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Computes the MPEG-2 CRC-32 over `data`.
pub fn mpeg2_crc32(data: &[u8]) -> u32 {
    CRC_MPEG.checksum(data)
}

/// A complete section, trailing CRC included, leaves a zero residue.
pub fn validate_section_crc32(section: &[u8]) -> bool {
    mpeg2_crc32(section) == 0
}
