use bytes::Bytes;

use crate::constants::TABLE_ID_PMT;
use crate::psi::descriptor::{ca_descriptors, CaDescriptor};
use crate::psi::section::SectionHeader;
use crate::{Result, TsError};

/// ─────────── PMT ───────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtSection {
    pub program_number: u16,
    pub version: u8,
    pub pcr_pid: u16,
    pub program_info: Bytes,
    /// ECM streams that apply to the whole program.
    pub ca: Vec<CaDescriptor>,
    /// Elementary streams in PMT order.
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub es_info: Bytes,
    pub ca: Vec<CaDescriptor>,
}

/// Decodes a complete PMT section.
///
/// Any malformed descriptor in either loop, or a loop length running past the
/// section, fails the whole section.
pub fn parse_pmt(section: &[u8]) -> Result<PmtSection> {
    let sec = SectionHeader::parse(section)?;
    if sec.table_id != TABLE_ID_PMT {
        return Err(TsError::UnexpectedTableId(sec.table_id));
    }
    if !sec.section_syntax_indicator {
        return Err(TsError::MissingSectionSyntax(sec.table_id));
    }
    let b = sec.body(section);
    if b.len() < 4 {
        return Err(TsError::SectionTooShort(sec.total_len()));
    }

    // fixed part
    let pcr_pid = u16::from_be_bytes([b[0] & 0x1F, b[1]]);
    let program_info_len = (((b[2] & 0x0F) as usize) << 8) | b[3] as usize;
    let program_info = b.get(4..4 + program_info_len).ok_or(TsError::MalformedDescriptor {
        tag: 0,
        length: program_info_len,
    })?;
    let ca = ca_descriptors(program_info)?;

    // ES loop
    let mut streams = Vec::new();
    let mut idx = 4 + program_info_len;
    while idx + 5 <= b.len() {
        let stream_type = b[idx];
        let elementary_pid = u16::from_be_bytes([b[idx + 1] & 0x1F, b[idx + 2]]);
        let es_info_len = (((b[idx + 3] & 0x0F) as usize) << 8) | b[idx + 4] as usize;
        let es_info = b
            .get(idx + 5..idx + 5 + es_info_len)
            .ok_or(TsError::MalformedDescriptor {
                tag: 0,
                length: es_info_len,
            })?;
        streams.push(StreamInfo {
            stream_type,
            elementary_pid,
            es_info: Bytes::copy_from_slice(es_info),
            ca: ca_descriptors(es_info)?,
        });
        idx += 5 + es_info_len;
    }

    Ok(PmtSection {
        program_number: sec.table_id_extension,
        version: sec.version_number,
        pcr_pid,
        program_info: Bytes::copy_from_slice(program_info),
        ca,
        streams,
    })
}
