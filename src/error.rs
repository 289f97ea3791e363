use thiserror::Error;

use crate::tr101::ErrorKind;

/// Errors surfaced by the decoders and the arena.
///
/// Stream-content variants map onto a TR 101 290 [`ErrorKind`] through
/// [`TsError::kind`]; the processor records them and carries on. Caller
/// errors (`InvalidPacketSize`, `InvalidArenaOrders`) are returned to the
/// caller unchanged.
#[derive(Debug, Error)]
pub enum TsError {
    #[error("invalid packet size: {0} bytes (expected 188, 192 or 204)")]
    InvalidPacketSize(usize),

    #[error("invalid sync byte: 0x{0:02X}")]
    InvalidSyncByte(u8),

    #[error("insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("adaptation field length {length} exceeds the {available} bytes left in the packet")]
    AdaptationFieldLength { length: usize, available: usize },

    #[error("invalid PES start code")]
    InvalidPesStartCode,

    #[error("invalid PES marker bits: 0x{0:02X}")]
    InvalidPesMarker(u8),

    #[error("forbidden PTS_DTS_flags value {0:#04b}")]
    InvalidPtsDtsFlags(u8),

    #[error("PES header_data_length {declared} exceeds the {available} bytes available")]
    PesHeaderLength { declared: usize, available: usize },

    #[error("section_length {length} exceeds limit {limit}")]
    SectionTooLong { length: usize, limit: usize },

    #[error("section too short: {0} bytes")]
    SectionTooShort(usize),

    #[error("section_syntax_indicator not set for table 0x{0:02X}")]
    MissingSectionSyntax(u8),

    #[error("unexpected table_id 0x{0:02X} for this decoder")]
    UnexpectedTableId(u8),

    #[error("malformed descriptor (tag 0x{tag:02X}, length {length})")]
    MalformedDescriptor { tag: u8, length: usize },

    #[error("invalid arena orders: max {max}, min {min}")]
    InvalidArenaOrders { max: u8, min: u8 },

    #[error("block at offset {offset} (order {order}) is not allocated from this arena")]
    UnknownBlock { offset: usize, order: u8 },

    #[error("bitstream read past end of field")]
    Bitstream(#[from] std::io::Error),
}

impl TsError {
    /// TR 101 290 classification of a stream-content error.
    ///
    /// `None` for caller errors and for truncated bit fields, whose kind
    /// depends on which structure was being decoded.
    pub fn kind(&self) -> Option<ErrorKind> {
        let kind = match self {
            TsError::InvalidSyncByte(_) => ErrorKind::SyncByte,
            TsError::AdaptationFieldLength { .. } => ErrorKind::AdaptationFieldLength,
            TsError::InvalidPesStartCode
            | TsError::InvalidPesMarker(_)
            | TsError::InvalidPtsDtsFlags(_)
            | TsError::PesHeaderLength { .. } => ErrorKind::Pes,
            TsError::SectionTooLong { .. } | TsError::SectionTooShort(_) => {
                ErrorKind::SectionLength
            }
            TsError::MissingSectionSyntax(_) => ErrorKind::SectionSyntax,
            TsError::MalformedDescriptor { .. } => ErrorKind::Descriptor,
            TsError::InvalidPacketSize(_)
            | TsError::UnexpectedTableId(_)
            | TsError::InsufficientData { .. }
            | TsError::InvalidArenaOrders { .. }
            | TsError::UnknownBlock { .. }
            | TsError::Bitstream(_) => return None,
        };
        Some(kind)
    }
}
