use serde::Serialize;

use crate::constants::TABLE_ID_PAT;
use crate::psi::section::SectionHeader;
use crate::{Result, TsError};

/// ─────────── PAT ───────────
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatSection {
    pub transport_stream_id: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Every entry in section order, program 0 (network PID) included.
    pub programs: Vec<PatEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatEntry {
    pub program_number: u16,
    /// PMT PID, or the network PID for program 0.
    pub pid: u16,
}

impl PatEntry {
    pub fn is_network(&self) -> bool {
        self.program_number == 0
    }
}

/// Decodes a complete PAT section (head to CRC inclusive).
pub fn parse_pat(section: &[u8]) -> Result<PatSection> {
    let sec = SectionHeader::parse(section)?;
    if sec.table_id != TABLE_ID_PAT {
        return Err(TsError::UnexpectedTableId(sec.table_id));
    }
    if !sec.section_syntax_indicator {
        return Err(TsError::MissingSectionSyntax(sec.table_id));
    }

    let body = sec.body(section);
    let programs = body
        .chunks_exact(4)
        .map(|entry| PatEntry {
            program_number: u16::from_be_bytes([entry[0], entry[1]]),
            pid: u16::from_be_bytes([entry[2] & 0x1F, entry[3]]),
        })
        .collect();

    Ok(PatSection {
        transport_stream_id: sec.table_id_extension,
        version: sec.version_number,
        current_next: sec.current_next_indicator,
        section_number: sec.section_number,
        last_section_number: sec.last_section_number,
        programs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::section::tests::build_section;

    #[test]
    fn test_program_entries() {
        let body = [
            0x00, 0x00, 0xE0, 0x10, // network PID
            0x00, 0x01, 0xE1, 0x00, // program 1 -> 0x0100
            0x00, 0x02, 0xE2, 0x00, // program 2 -> 0x0200
        ];
        let pat = parse_pat(&build_section(0x00, 0x1234, 3, 0, 0, &body)).unwrap();
        assert_eq!(pat.transport_stream_id, 0x1234);
        assert_eq!(pat.version, 3);
        assert_eq!(pat.programs.len(), 3);
        assert!(pat.programs[0].is_network());
        assert_eq!(pat.programs[0].pid, 0x0010);
        assert_eq!(
            pat.programs[2],
            PatEntry {
                program_number: 2,
                pid: 0x0200
            }
        );
    }

    #[test]
    fn test_rejects_other_tables() {
        let section = build_section(0x02, 1, 0, 0, 0, &[0, 1, 0xE1, 0]);
        assert!(parse_pat(&section).is_err());
    }
}
