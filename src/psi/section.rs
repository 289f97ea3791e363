// psi/section.rs
//! Generic PSI / SI section head with length limits and CRC-32 trailer.

use serde::Serialize;

use crate::constants::*;
use crate::{Result, TsError};

/// Tables the section layer tells apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SectionKind {
    Pat,
    Cat,
    Pmt,
    SdtActual,
    SdtOther,
    Other(u8),
}

impl SectionKind {
    pub fn from_table_id(table_id: u8) -> Self {
        match table_id {
            TABLE_ID_PAT => Self::Pat,
            TABLE_ID_CAT => Self::Cat,
            TABLE_ID_PMT => Self::Pmt,
            TABLE_ID_SDT_ACTUAL => Self::SdtActual,
            TABLE_ID_SDT_OTHER => Self::SdtOther,
            other => Self::Other(other),
        }
    }

    /// PAT, CAT, PMT and SDT sections are CRC checked; others pass through.
    pub fn requires_crc(self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// `section_length` from the first three bytes of a section.
pub fn section_length(head: &[u8; 3]) -> usize {
    (((head[1] & 0x0F) as usize) << 8) | head[2] as usize
}

/// Upper bound on `section_length` for a section starting with `head`.
pub fn section_length_limit(head: &[u8; 3]) -> usize {
    if head[1] & 0x40 != 0 {
        MAX_PRIVATE_SECTION_LENGTH
    } else {
        MAX_SECTION_LENGTH
    }
}

/// Fixed section head (ISO 13818-1 2.4.4.10). The long-form fields are
/// zero when `section_syntax_indicator` is clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SectionHeader {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub private_indicator: bool,
    pub section_length: usize,
    pub table_id_extension: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
}

impl SectionHeader {
    /// Decodes the head of a complete section (`3 + section_length` bytes).
    pub fn parse(section: &[u8]) -> Result<Self> {
        if section.len() < 3 {
            return Err(TsError::SectionTooShort(section.len()));
        }
        let head = [section[0], section[1], section[2]];
        let length = section_length(&head);
        let limit = section_length_limit(&head);
        if length > limit {
            return Err(TsError::SectionTooLong { length, limit });
        }
        if section.len() < 3 + length {
            return Err(TsError::SectionTooShort(section.len()));
        }

        let mut header = SectionHeader {
            table_id: head[0],
            section_syntax_indicator: head[1] & 0x80 != 0,
            private_indicator: head[1] & 0x40 != 0,
            section_length: length,
            ..Default::default()
        };
        if header.section_syntax_indicator {
            // 5 long-form bytes + CRC_32
            if length < 9 {
                return Err(TsError::SectionTooShort(3 + length));
            }
            header.table_id_extension = u16::from_be_bytes([section[3], section[4]]);
            header.version_number = (section[5] >> 1) & 0x1F;
            header.current_next_indicator = section[5] & 0x01 != 0;
            header.section_number = section[6];
            header.last_section_number = section[7];
        }
        Ok(header)
    }

    pub fn total_len(&self) -> usize {
        3 + self.section_length
    }

    pub fn kind(&self) -> SectionKind {
        SectionKind::from_table_id(self.table_id)
    }

    /// Bytes between the long-form head and the CRC.
    pub fn body<'a>(&self, section: &'a [u8]) -> &'a [u8] {
        if self.section_syntax_indicator {
            &section[8..self.total_len() - 4]
        } else {
            &section[3..self.total_len()]
        }
    }

    /// Trailing CRC_32 as carried in the section.
    pub fn crc(&self, section: &[u8]) -> Option<u32> {
        let end = self.total_len();
        if !self.section_syntax_indicator || end < 4 {
            return None;
        }
        let bytes = &section[end - 4..end];
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
