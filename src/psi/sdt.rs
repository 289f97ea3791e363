// psi/sdt.rs
use crate::constants::{DESCRIPTOR_SERVICE, TABLE_ID_SDT_ACTUAL, TABLE_ID_SDT_OTHER};
use crate::psi::descriptor::{Descriptors, ServiceDescriptor};
use crate::psi::section::SectionHeader;
use crate::{Result, TsError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdtSection {
    pub table_id: u8,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub version: u8,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub service_id: u16,
    pub eit_schedule: bool,
    pub eit_present_following: bool,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub descriptor: Option<ServiceDescriptor>,
}

/// SDT (table_id 0x42 actual / 0x46 other-TS).
pub fn parse_sdt(section: &[u8]) -> Result<SdtSection> {
    let sec = SectionHeader::parse(section)?;
    if !matches!(sec.table_id, TABLE_ID_SDT_ACTUAL | TABLE_ID_SDT_OTHER) {
        return Err(TsError::UnexpectedTableId(sec.table_id));
    }
    if !sec.section_syntax_indicator {
        return Err(TsError::MissingSectionSyntax(sec.table_id));
    }

    let b = sec.body(section);
    if b.len() < 3 {
        return Err(TsError::SectionTooShort(sec.total_len()));
    }
    let original_network_id = u16::from_be_bytes([b[0], b[1]]);

    let mut idx = 3; // start of service loop
    let mut services = Vec::new();
    while idx + 5 <= b.len() {
        let desc_len = (((b[idx + 3] & 0x0F) as usize) << 8) | b[idx + 4] as usize;
        let loop_bytes = b
            .get(idx + 5..idx + 5 + desc_len)
            .ok_or(TsError::MalformedDescriptor {
                tag: 0,
                length: desc_len,
            })?;

        let mut descriptor = None;
        for entry in Descriptors::new(loop_bytes) {
            let entry = entry?;
            if entry.tag == DESCRIPTOR_SERVICE {
                descriptor = Some(ServiceDescriptor::parse(&entry)?);
            }
        }

        services.push(Service {
            service_id: u16::from_be_bytes([b[idx], b[idx + 1]]),
            eit_schedule: b[idx + 2] & 0x02 != 0,
            eit_present_following: b[idx + 2] & 0x01 != 0,
            running_status: b[idx + 3] >> 5,
            free_ca_mode: b[idx + 3] & 0x10 != 0,
            descriptor,
        });
        idx += 5 + desc_len;
    }

    Ok(SdtSection {
        table_id: sec.table_id,
        transport_stream_id: sec.table_id_extension,
        original_network_id,
        version: sec.version_number,
        services,
    })
}
