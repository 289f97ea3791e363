use crate::constants::TABLE_ID_CAT;
use crate::psi::descriptor::{ca_descriptors, CaDescriptor};
use crate::psi::section::SectionHeader;
use crate::{Result, TsError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatSection {
    pub version: u8,
    /// EMM streams announced by the CA descriptors.
    pub ca: Vec<CaDescriptor>,
}

pub fn parse_cat(section: &[u8]) -> Result<CatSection> {
    let sec = SectionHeader::parse(section)?;
    if sec.table_id != TABLE_ID_CAT {
        return Err(TsError::UnexpectedTableId(sec.table_id));
    }
    if !sec.section_syntax_indicator {
        return Err(TsError::MissingSectionSyntax(sec.table_id));
    }
    Ok(CatSection {
        version: sec.version_number,
        ca: ca_descriptors(sec.body(section))?,
    })
}
