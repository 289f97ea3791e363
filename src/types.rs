use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arena::Block;
use crate::constants::*;
use crate::list::{Keyed, OrderedList};
use crate::psi::section::{SectionHeader, SectionKind};

/// What a PID carries, learned from its value or from the tables naming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidKind {
    Pat,
    Cat,
    Tsdt,
    Nit,
    Sdt,
    Eit,
    Rst,
    Tdt,
    NetworkSync,
    Signalling,
    Pmt,
    Pcr,
    Video,
    Audio,
    Data,
    Private,
    Ecm,
    Emm,
    User,
    Null,
    Reserved,
}

impl PidKind {
    /// Classification of a PID seen before any table names it.
    pub fn classify(pid: u16) -> Self {
        match pid {
            PID_PAT => Self::Pat,
            PID_CAT => Self::Cat,
            PID_TSDT => Self::Tsdt,
            PID_NIT => Self::Nit,
            PID_SDT => Self::Sdt,
            PID_EIT => Self::Eit,
            PID_RST => Self::Rst,
            PID_TDT => Self::Tdt,
            PID_NETWORK_SYNC => Self::NetworkSync,
            0x001C..=0x001F => Self::Signalling,
            PID_NULL => Self::Null,
            PID_USER_MIN..PID_NULL => Self::User,
            _ => Self::Reserved,
        }
    }

    /// Elementary stream kind for a PMT `stream_type`.
    pub fn from_stream_type(stream_type: u8) -> Self {
        match stream_type {
            // MPEG-1/2 video, MPEG-4 visual, H.264 and its SVC/MVC layers,
            // HEVC, CAVS, VC-1
            0x01 | 0x02 | 0x10 | 0x1B | 0x1F | 0x20 | 0x24 | 0x42 | 0xEA => Self::Video,
            // MPEG-1/2 audio, AAC ADTS/LATM, MPEG-4 raw audio, AC-3 family,
            // DTS family
            0x03 | 0x04 | 0x0F | 0x11 | 0x1C | 0x81..=0x87 => Self::Audio,
            // private sections, MHEG, DSM-CC, metadata
            0x05 | 0x07 | 0x0A..=0x0D | 0x13 | 0x15 | 0x16 => Self::Data,
            0x06 | 0x80 | 0x88..=0xFF => Self::Private,
            _ => Self::Reserved,
        }
    }

    /// Kinds whose payload is PSI/SI sections.
    pub fn carries_sections(self) -> bool {
        matches!(
            self,
            Self::Pat
                | Self::Cat
                | Self::Tsdt
                | Self::Nit
                | Self::Sdt
                | Self::Eit
                | Self::Rst
                | Self::Tdt
                | Self::Pmt
        )
    }

    /// Sections decoded under the PSI toggle (the rest fall under SI).
    pub fn is_psi(self) -> bool {
        matches!(self, Self::Pat | Self::Cat | Self::Pmt | Self::Tsdt)
    }

    pub fn is_elementary(self) -> bool {
        matches!(self, Self::Video | Self::Audio | Self::Data | Self::Private)
    }

    /// Precedence when a table assigns a new kind to a known PID: fixed PIDs
    /// never change, range-derived kinds always yield, and a PCR-only PID is
    /// upgraded when it turns out to carry a stream too.
    fn rank(self) -> u8 {
        match self {
            Self::User | Self::Reserved | Self::Signalling => 0,
            Self::Pcr => 1,
            Self::Pmt | Self::Ecm | Self::Emm | Self::Video | Self::Audio | Self::Data
            | Self::Private => 2,
            _ => 3,
        }
    }
}

/// CA system and the PID of its ECM or EMM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaEntry {
    pub ca_system_id: u16,
    pub pid: u16,
}

impl Keyed for CaEntry {
    fn key(&self) -> u32 {
        self.pid as u32
    }
}

/// Result of feeding one continuity counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcOutcome {
    Seeded,
    InOrder,
    Duplicate,
    Lost(u8),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuityState {
    synced: bool,
    last: u8,
    duplicate_seen: bool,
}

impl ContinuityState {
    /// The counter advances only with a payload; one repeated payload packet
    /// is accepted as a duplicate. A discontinuity indicator reseeds.
    pub fn check(&mut self, cc: u8, has_payload: bool, discontinuity: bool) -> CcOutcome {
        if !self.synced || discontinuity {
            self.reseed(cc);
            return CcOutcome::Seeded;
        }

        let expected = if has_payload {
            (self.last + 1) & 0x0F
        } else {
            self.last
        };
        if cc == expected {
            self.last = cc;
            self.duplicate_seen = false;
            return CcOutcome::InOrder;
        }
        if has_payload && cc == self.last && !self.duplicate_seen {
            self.duplicate_seen = true;
            return CcOutcome::Duplicate;
        }

        self.last = cc;
        self.duplicate_seen = false;
        CcOutcome::Lost(cc.wrapping_sub(expected) & 0x0F)
    }

    /// Takes `cc` as the last counter seen, without checking it.
    pub fn reseed(&mut self, cc: u8) {
        *self = ContinuityState {
            synced: true,
            last: cc,
            duplicate_seen: false,
        };
    }

    pub fn reset(&mut self) {
        *self = ContinuityState::default();
    }
}

/// Packet and byte tallies over one statistics interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub packets: u64,
    pub bytes: u64,
}

impl Counters {
    pub fn count(&mut self, bytes: usize) {
        self.packets += 1;
        self.bytes += bytes as u64;
    }
}

/// One queued piece of a section still being reassembled.
#[derive(Debug)]
pub(crate) struct Fragment {
    pub seq: u32,
    pub block: Block,
}

impl Keyed for Fragment {
    fn key(&self) -> u32 {
        self.seq
    }
}

/// Reassembly state of a PSI/SI PID.
#[derive(Debug, Default)]
pub(crate) struct SectionAssembler {
    pub fragments: OrderedList<Fragment>,
    pub accumulated: usize,
    pub head: [u8; 3],
    pub head_len: usize,
    pub next_seq: u32,
}

impl SectionAssembler {
    pub fn in_progress(&self) -> bool {
        self.accumulated > 0
    }

    /// `3 + section_length` once the first three bytes are known.
    pub fn total_len(&self) -> Option<usize> {
        (self.head_len == 3).then(|| 3 + crate::psi::section::section_length(&self.head))
    }
}

#[derive(Debug)]
pub struct Pid {
    pub pid: u16,
    pub kind: PidKind,
    pub carries_pcr: bool,
    /// Owning program, by program_number.
    pub program: Option<u16>,
    /// Set when the PID is an elementary stream of `program`.
    pub is_element: bool,
    pub scrambled: bool,
    pub counters: Counters,
    pub previous: Counters,
    pub(crate) continuity: ContinuityState,
    pub(crate) assembler: Option<SectionAssembler>,
}

impl Pid {
    pub fn new(pid: u16) -> Self {
        let mut entry = Pid {
            pid,
            kind: PidKind::classify(pid),
            carries_pcr: false,
            program: None,
            is_element: false,
            scrambled: false,
            counters: Counters::default(),
            previous: Counters::default(),
            continuity: ContinuityState::default(),
            assembler: None,
        };
        entry.sync_assembler();
        entry
    }

    /// Applies a kind learned from a table, honouring the precedence rules.
    pub fn assign(&mut self, kind: PidKind) {
        if kind.rank() >= self.kind.rank() && self.kind.rank() < 3 {
            self.kind = kind;
        }
        self.sync_assembler();
    }

    fn sync_assembler(&mut self) {
        if self.kind.carries_sections() {
            self.assembler.get_or_insert_with(SectionAssembler::default);
        }
    }
}

impl Keyed for Pid {
    fn key(&self) -> u32 {
        self.pid as u32
    }
}

/// A complete section retained in its table.
#[derive(Debug)]
pub struct Section {
    pub header: SectionHeader,
    pub crc: Option<u32>,
    pub crc_checked: bool,
    pub kind: SectionKind,
    pub(crate) block: Block,
}

impl Keyed for Section {
    fn key(&self) -> u32 {
        self.header.section_number as u32
    }
}

/// Sections of one PSI/SI table, keyed by section_number.
#[derive(Debug)]
pub struct Table {
    pub table_id: u8,
    pub table_id_extension: u16,
    pub version: Option<u8>,
    pub last_section_number: u8,
    pub sections: OrderedList<Section>,
    /// Clock (27 MHz) when a section of this table last arrived.
    pub last_seen: Option<u64>,
}

impl Table {
    pub fn new(table_id: u8, table_id_extension: u16) -> Self {
        Table {
            table_id,
            table_id_extension,
            version: None,
            last_section_number: 0,
            sections: OrderedList::new(),
            last_seen: None,
        }
    }

    /// Every section `0..=last_section_number` is present.
    pub fn is_complete(&self) -> bool {
        self.version.is_some()
            && (0..=self.last_section_number as u32).all(|n| self.sections.contains(n))
    }

    /// Ordering key in the processor's table list. Only SDT-other tables
    /// from several transport streams can share a table_id.
    pub fn key_for(table_id: u8, table_id_extension: u16) -> u32 {
        if table_id == TABLE_ID_SDT_OTHER {
            ((table_id as u32) << 16) | table_id_extension as u32
        } else {
            (table_id as u32) << 16
        }
    }
}

impl Keyed for Table {
    fn key(&self) -> u32 {
        Table::key_for(self.table_id, self.table_id_extension)
    }
}

/// A PCR value and where it was seen: byte address, plus the arrival clock
/// when one is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub pcr: u64,
    pub address: u64,
    pub arrival: Option<u64>,
}

#[derive(Debug)]
pub struct Element {
    pub pid: u16,
    pub stream_type: u8,
    pub kind: PidKind,
    pub carries_pcr: bool,
    pub es_info: Bytes,
    pub ca: OrderedList<CaEntry>,
    pub last_pts: Option<u64>,
    pub last_dts: Option<u64>,
    /// STC when the last PTS arrived.
    pub last_stc: Option<u64>,
    pub(crate) last_pts_clock: Option<u64>,
    /// A PES start has been seen since the last continuity break.
    pub align: bool,
}

impl Element {
    pub fn new(pid: u16, stream_type: u8, pcr_pid: Option<u16>) -> Self {
        Element {
            pid,
            stream_type,
            kind: PidKind::from_stream_type(stream_type),
            carries_pcr: pcr_pid == Some(pid),
            es_info: Bytes::new(),
            ca: OrderedList::new(),
            last_pts: None,
            last_dts: None,
            last_stc: None,
            last_pts_clock: None,
            align: false,
        }
    }
}

impl Keyed for Element {
    fn key(&self) -> u32 {
        self.pid as u32
    }
}

#[derive(Debug)]
pub struct Program {
    pub number: u16,
    pub pmt_pid: u16,
    pub pcr_pid: Option<u16>,
    pub program_info: Bytes,
    pub ca: OrderedList<CaEntry>,
    pub service_type: Option<u8>,
    pub service_provider: Bytes,
    pub service_name: Bytes,
    /// Elementary streams in PMT order.
    pub elements: OrderedList<Element>,
    pub pmt: Table,
    pub is_parsed: bool,
    pub is_stc_sync: bool,
    pub(crate) pcr_a: Option<ClockSample>,
    pub(crate) pcr_b: Option<ClockSample>,
    /// Transport rate from the last two PCRs, bits per second.
    pub bitrate: Option<u64>,
}

impl Program {
    pub fn new(number: u16, pmt_pid: u16) -> Self {
        Program {
            number,
            pmt_pid,
            pcr_pid: None,
            program_info: Bytes::new(),
            ca: OrderedList::new(),
            service_type: None,
            service_provider: Bytes::new(),
            service_name: Bytes::new(),
            elements: OrderedList::new(),
            pmt: Table::new(TABLE_ID_PMT, number),
            is_parsed: false,
            is_stc_sync: false,
            pcr_a: None,
            pcr_b: None,
            bitrate: None,
        }
    }

    pub fn element(&self, pid: u16) -> Option<&Element> {
        self.elements.search(pid as u32)
    }

    /// Drops the clock samples; the next PCR starts a new sync.
    pub fn lose_stc_sync(&mut self) {
        self.is_stc_sync = false;
        self.pcr_a = None;
    }
}

impl Keyed for Program {
    fn key(&self) -> u32 {
        self.number as u32
    }
}

/// Bootstrap progress of the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseState {
    /// Waiting for a complete PAT.
    NextPat,
    /// Waiting for every program's PMT.
    NextPmt,
    /// Bootstrap complete.
    NextPkt,
}

/// Analysis modes for different levels of processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Program structure and bitrates, no TR 101 290 timing checks
    Mux,
    /// Full TR 101 290 compliance analysis (all priorities)
    Tr101,
    /// TR 101 290 Priority 1 errors only (critical transport errors)
    Tr101Priority1,
    /// TR 101 290 Priority 1+2 errors (critical + recommended)
    Tr101Priority12,
    /// No analysis, packet counting only
    None,
}

/// Processor toggles and sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub continuity_check: bool,
    /// Adaptation field PCR checks.
    pub pcr_check: bool,
    pub timestamps: bool,
    /// PAT, CAT and PMT sections.
    pub psi: bool,
    /// SDT and the other SI PIDs.
    pub si: bool,
    pub pes: bool,
    /// Report ES payload only after a PES start on the element.
    pub align_only: bool,
    pub statistics: bool,
    pub stats_interval_ms: u64,
    /// A re-sent section with a new version replaces the stored table.
    pub invalidate_on_version_change: bool,
    pub arena_max_order: u8,
    pub arena_min_order: u8,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            continuity_check: true,
            pcr_check: true,
            timestamps: true,
            psi: true,
            si: true,
            pes: true,
            align_only: false,
            statistics: true,
            stats_interval_ms: STATS_INTERVAL_MS,
            invalidate_on_version_change: false,
            arena_max_order: ARENA_MAX_ORDER,
            arena_min_order: ARENA_MIN_ORDER,
        }
    }
}

impl ProcessorConfig {
    pub fn for_mode(mode: AnalysisMode) -> Self {
        let base = ProcessorConfig::default();
        match mode {
            AnalysisMode::Tr101 => base,
            AnalysisMode::Mux => ProcessorConfig {
                continuity_check: false,
                pcr_check: false,
                ..base
            },
            AnalysisMode::Tr101Priority1 => ProcessorConfig {
                pcr_check: false,
                si: false,
                pes: false,
                ..base
            },
            AnalysisMode::Tr101Priority12 => ProcessorConfig { si: false, ..base },
            AnalysisMode::None => ProcessorConfig {
                continuity_check: false,
                pcr_check: false,
                timestamps: false,
                psi: false,
                si: false,
                pes: false,
                ..base
            },
        }
    }
}

/// Arrival clock reading supplied with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    /// 27 MHz ticks.
    pub ticks: u64,
    /// Modulus the ticks wrap at.
    pub wrap: u64,
}

/// Optional side information for one ingested packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketMeta {
    /// Byte offset of the packet in the stream; defaults to a running count.
    pub address: Option<u64>,
    pub arrival: Option<Arrival>,
    pub receive_time: Option<DateTime<Utc>>,
}
