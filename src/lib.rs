// src/lib.rs
//! MPEG-2 transport stream demultiplexer with TR 101 290 validation.
//!
//! Feed packets one at a time to a [`PacketProcessor`]; it learns the
//! program structure from the PSI/SI tables, recovers each program's clock
//! from its PCRs and counts errors in an [`tr101::ErrorCounts`] aggregate.

pub mod adaptation_field;
pub mod arena;
pub mod constants;
pub mod crc32;
mod error;
pub mod list;
pub mod packet;
pub mod pes;
pub mod processor;
pub mod psi;
pub mod report;
pub mod stats;
pub mod timestamp;
pub mod tr101;
pub mod types;

pub use error::TsError;
pub use processor::{PacketInfo, PacketProcessor};
pub use report::{Reporter, StreamReport, StreamSnapshot};
pub use types::{AnalysisMode, PacketMeta, ProcessorConfig};

pub type Result<T> = std::result::Result<T, TsError>;
