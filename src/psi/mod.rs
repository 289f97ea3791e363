pub mod cat;
pub mod descriptor;
pub mod pat;
pub mod pmt;
pub mod sdt;
pub mod section;

pub use cat::{parse_cat, CatSection};
pub use descriptor::{CaDescriptor, Descriptor, Descriptors, ServiceDescriptor};
pub use pat::{parse_pat, PatEntry, PatSection};
pub use pmt::{parse_pmt, PmtSection, StreamInfo};
pub use sdt::{parse_sdt, SdtSection, Service};
pub use section::{SectionHeader, SectionKind};
