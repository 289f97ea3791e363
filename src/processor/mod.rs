//! Main packet processing logic

mod sections;
mod timing;

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::Result;
use crate::adaptation_field::AdaptationField;
use crate::arena::BuddyArena;
use crate::constants::*;
use crate::list::OrderedList;
use crate::packet::{PacketFormat, RawPacket, TsHeader};
use crate::pes::PesHeader;
use crate::report::StreamSnapshot;
use crate::stats::StatsManager;
use crate::timestamp::{split_27mhz, ts_diff};
use crate::tr101::{ErrorCounts, ErrorKind, TableChanges};
use crate::types::{
    AnalysisMode, Arrival, CaEntry, CcOutcome, PacketMeta, ParseState, Pid, PidKind,
    ProcessorConfig, Program, Table,
};

pub(crate) use timing::program_stc;
use timing::ClockState;

/// Everything learned from the last ingested packet.
///
/// Ranges index into the 188-byte packet (arrival stamp and parity bytes
/// excluded).
#[derive(Debug, Clone, Default, Serialize)]
pub struct PacketInfo {
    /// Zero-based count of ingested units.
    pub index: u64,
    /// Byte address of the unit in the stream.
    pub address: u64,
    pub format: Option<PacketFormat>,
    pub arrival_stamp: Option<u32>,
    #[serde(skip)]
    pub fec: Option<[u8; TS_FEC_SIZE]>,
    #[serde(skip)]
    pub receive_time: Option<DateTime<Utc>>,
    pub sync_locked: bool,
    pub header: Option<TsHeader>,
    pub adaptation_field: Option<AdaptationField>,
    pub pes: Option<PesHeader>,
    pub payload: Option<Range<usize>>,
    /// Elementary stream bytes of a video/audio/data element.
    pub es_payload: Option<Range<usize>>,
    pub pcr: Option<u64>,
    /// PCR minus the interpolated STC, in 27 MHz ticks.
    pub pcr_jitter: Option<i64>,
    pub stc: Option<u64>,
    pub cts: Option<u64>,
    /// Packets missing before this one on its PID.
    pub lost: u8,
    pub duplicate: bool,
    pub errors: Vec<ErrorKind>,
}

impl PacketInfo {
    fn begin(&mut self, index: u64, address: u64, format: PacketFormat) {
        let mut errors = std::mem::take(&mut self.errors);
        errors.clear();
        *self = PacketInfo {
            index,
            address,
            format: Some(format),
            errors,
            ..Default::default()
        };
    }

    /// STC as `(base 90 kHz, extension)`.
    pub fn stc_parts(&self) -> Option<(u64, u16)> {
        self.stc.map(split_27mhz)
    }

    pub fn cts_parts(&self) -> Option<(u64, u16)> {
        self.cts.map(split_27mhz)
    }

    pub fn es_bytes<'a>(&self, packet: &'a [u8]) -> Option<&'a [u8]> {
        self.es_payload.clone().and_then(|range| packet.get(range))
    }
}

/// Sync byte hysteresis.
#[derive(Debug, Clone, Copy, Default)]
struct SyncState {
    locked: bool,
    good: u32,
    bad: u32,
}

/// Transport stream demultiplexer and validator.
///
/// Packets go in one at a time through [`PacketProcessor::ingest`]; the
/// processor learns the program structure from the PSI/SI tables, tracks
/// clocks per program, and counts TR 101 290 errors along the way.
pub struct PacketProcessor {
    config: ProcessorConfig,
    arena: BuddyArena,
    pids: OrderedList<Pid>,
    programs: OrderedList<Program>,
    tables: OrderedList<Table>,
    ca: OrderedList<CaEntry>,
    state: ParseState,
    transport_stream_id: Option<u16>,
    network_pid: Option<u16>,
    cat_seen: bool,
    packets: u64,
    next_address: u64,
    clock: ClockState,
    /// Processor clock for the packet being ingested.
    now: Option<u64>,
    sync: SyncState,
    errors: ErrorCounts,
    changes: TableChanges,
    stats: StatsManager,
    stats_window_started: bool,
    pat_last_seen: Option<u64>,
    info: PacketInfo,
}

impl PacketProcessor {
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        let arena = BuddyArena::new(config.arena_max_order, config.arena_min_order)?;
        Ok(Self {
            stats: StatsManager::new(config.stats_interval_ms),
            config,
            arena,
            pids: OrderedList::new(),
            programs: OrderedList::new(),
            tables: OrderedList::new(),
            ca: OrderedList::new(),
            state: ParseState::NextPat,
            transport_stream_id: None,
            network_pid: None,
            cat_seen: false,
            packets: 0,
            next_address: 0,
            clock: ClockState::default(),
            now: None,
            sync: SyncState::default(),
            errors: ErrorCounts::default(),
            changes: TableChanges::default(),
            stats_window_started: false,
            pat_last_seen: None,
            info: PacketInfo::default(),
        })
    }

    pub fn with_mode(mode: AnalysisMode) -> Result<Self> {
        Self::new(ProcessorConfig::for_mode(mode))
    }

    /// Process a single transport unit of 188, 192 or 204 bytes.
    ///
    /// Only a unit of the wrong size is an error; everything wrong with the
    /// stream itself is counted and reported in the returned [`PacketInfo`].
    pub fn ingest(&mut self, unit: &[u8], meta: &PacketMeta) -> Result<&PacketInfo> {
        let raw = RawPacket::split(unit)?;
        let address = meta.address.unwrap_or(self.next_address);
        self.next_address = address + unit.len() as u64;
        self.info.begin(self.packets, address, raw.format);
        self.packets += 1;
        self.info.arrival_stamp = raw.arrival_stamp;
        self.info.receive_time = meta.receive_time;
        if let Some(parity) = raw.fec {
            let mut fec = [0u8; TS_FEC_SIZE];
            fec.copy_from_slice(parity);
            self.info.fec = Some(fec);
        }

        let arrival = meta.arrival.or_else(|| {
            raw.arrival_stamp.map(|stamp| Arrival {
                ticks: stamp as u64,
                wrap: ARRIVAL_STAMP_WRAP,
            })
        });
        self.clock.advance(arrival);
        self.info.cts = self.clock.cts();

        let header = match TsHeader::parse(raw.bytes) {
            Ok(header) => header,
            Err(err) => {
                debug!(address, %err, "dropping packet");
                self.raise(err.kind().unwrap_or(ErrorKind::SyncByte));
                self.track_sync(false);
                self.info.sync_locked = self.sync.locked;
                return Ok(&self.info);
            }
        };
        self.track_sync(true);
        self.info.sync_locked = self.sync.locked;
        self.info.header = Some(header);
        let pid = header.pid;

        if self.config.statistics {
            self.stats.count(TS_PACKET_SIZE, pid == PID_NULL);
        }

        if header.transport_error_indicator {
            self.raise(ErrorKind::Transport);
            // later packets continue from this counter
            if let Some(entry) = self.pids.search_mut(pid as u32) {
                entry.continuity.reseed(header.continuity_counter);
            }
            return Ok(&self.info);
        }

        let mut payload_start = 4;
        let mut usable = header.has_payload();
        let mut discontinuity = false;
        if header.adaptation_field_control == 0 {
            self.raise(ErrorKind::AdaptationFieldControl);
        }
        if header.has_adaptation_field() {
            match AdaptationField::parse(&raw.bytes[4..], header.has_payload()) {
                Ok(af) => {
                    payload_start += 1 + af.length as usize;
                    discontinuity = af.discontinuity_indicator;
                    self.info.adaptation_field = Some(af);
                }
                Err(err) => {
                    self.raise(err.kind().unwrap_or(ErrorKind::AdaptationFieldLength));
                    usable = false;
                }
            }
        }

        let entry = self.pids.get_or_insert_with(pid as u32, || Pid::new(pid));
        if self.config.statistics {
            entry.counters.count(TS_PACKET_SIZE);
        }
        entry.scrambled = header.is_scrambled();
        let kind = entry.kind;
        let program = entry.program;
        let is_element = entry.is_element;

        let mut lost = false;
        if self.config.continuity_check && pid != PID_NULL {
            match entry.continuity.check(
                header.continuity_counter,
                header.has_payload(),
                discontinuity,
            ) {
                CcOutcome::Lost(missing) => {
                    self.info.lost = missing;
                    lost = true;
                }
                CcOutcome::Duplicate => {
                    self.info.duplicate = true;
                    usable = false;
                }
                CcOutcome::Seeded | CcOutcome::InOrder => {}
            }
        }
        if lost {
            self.raise(ErrorKind::ContinuityCount);
            debug!(pid, missing = self.info.lost, "continuity break");
            self.on_continuity_break(pid);
        }

        if header.is_scrambled() {
            if pid == PID_PAT {
                self.raise(ErrorKind::Pat);
            } else if kind == PidKind::Pmt {
                self.raise(ErrorKind::Pmt);
            }
            if self.state == ParseState::NextPkt && !self.cat_seen {
                self.raise(ErrorKind::Cat);
            }
        }

        let pcr = self.info.adaptation_field.as_ref().and_then(|af| af.pcr);
        if let Some(pcr) = pcr {
            self.info.pcr = Some(pcr);
            if self.config.pcr_check || self.config.timestamps {
                self.handle_pcr(pid, pcr, discontinuity, address);
            }
        }

        self.now = self.current_clock(address);
        if self.config.psi {
            if let Some(now) = self.now {
                self.check_table_repetition(now);
            }
        }

        let payload = (usable && payload_start < TS_PACKET_SIZE)
            .then_some(payload_start..TS_PACKET_SIZE);
        self.info.payload = payload.clone();
        if let Some(range) = payload {
            let data = &raw.bytes[range.clone()];
            let pusi = header.payload_unit_start_indicator;
            if header.is_scrambled() {
                // encrypted payload cannot be parsed
            } else if kind.carries_sections() {
                let enabled = if kind.is_psi() {
                    self.config.psi
                } else {
                    self.config.si
                };
                if enabled {
                    self.feed_sections(pid, pusi, data);
                    self.advance_state();
                }
            } else if is_element && self.config.pes {
                self.handle_elementary(pid, pusi, range, data, lost, address);
            }
        }

        if self.config.timestamps {
            let owner = program.or_else(|| self.programs.first().map(|p| p.number));
            self.info.stc = owner
                .and_then(|number| self.programs.search(number as u32))
                .and_then(|p| program_stc(p, address, self.clock.cts()));
        }

        if self.config.statistics {
            if let Some(now) = self.now {
                if self.stats.tick(now) {
                    for entry in self.pids.iter_mut() {
                        entry.previous = std::mem::take(&mut entry.counters);
                    }
                }
            }
        }

        Ok(&self.info)
    }

    /// Drops every PID, program and table and starts over from the PAT.
    ///
    /// The error aggregate and table change counters survive; see
    /// [`PacketProcessor::clear_errors`].
    pub fn reset(&mut self) {
        self.clear_model();
        self.packets = 0;
        self.next_address = 0;
        self.clock = ClockState::default();
        self.sync = SyncState::default();
        self.info = PacketInfo::default();
        info!("processor reset");
    }

    pub fn clear_errors(&mut self) {
        self.errors = ErrorCounts::default();
        self.changes = TableChanges::default();
    }

    /// Rebuilds the PID set from the known tables, programs and CA streams.
    ///
    /// Pending section fragments and per-PID counters are dropped, and the
    /// bootstrap is considered complete.
    pub fn tidy(&mut self) {
        let Self {
            pids,
            arena,
            programs,
            tables,
            ca,
            network_pid,
            ..
        } = self;
        for mut entry in pids.drain() {
            if let Some(assembler) = entry.assembler.as_mut() {
                sections::drop_fragments(arena, assembler);
            }
        }

        if tables.contains(Table::key_for(TABLE_ID_PAT, 0)) {
            register(pids, PID_PAT, PidKind::Pat, None);
        }
        if tables.contains(Table::key_for(TABLE_ID_CAT, 0)) {
            register(pids, PID_CAT, PidKind::Cat, None);
        }
        if tables.iter().any(|t| t.table_id == TABLE_ID_SDT_ACTUAL) {
            register(pids, PID_SDT, PidKind::Sdt, None);
        }
        if let Some(nit) = *network_pid {
            register(pids, nit, PidKind::Nit, None);
        }
        for emm in ca.iter() {
            register(pids, emm.pid, PidKind::Emm, None);
        }
        for program in programs.iter() {
            let number = Some(program.number);
            register(pids, program.pmt_pid, PidKind::Pmt, number);
            match program.pcr_pid {
                Some(pcr) => register(pids, pcr, PidKind::Pcr, number).carries_pcr = true,
                None if program.is_parsed => {
                    register(pids, PID_NULL, PidKind::Null, None).carries_pcr = true;
                }
                None => {}
            }
            for ecm in program.ca.iter() {
                register(pids, ecm.pid, PidKind::Ecm, number);
            }
            for element in program.elements.iter() {
                let entry = register(pids, element.pid, element.kind, number);
                entry.is_element = true;
                entry.carries_pcr |= element.carries_pcr;
                for ecm in element.ca.iter() {
                    register(pids, ecm.pid, PidKind::Ecm, number);
                }
            }
        }

        self.state = ParseState::NextPkt;
        info!(pids = self.pids.len(), "PID set rebuilt");
    }

    /// Loads a saved program model in place of the current one and
    /// rebuilds the PID set from it.
    pub fn restore(&mut self, snapshot: &StreamSnapshot) {
        self.clear_model();
        self.transport_stream_id = snapshot.transport_stream_id;
        self.network_pid = snapshot.network_pid;
        self.cat_seen = snapshot.cat_seen;
        for entry in &snapshot.ca {
            let _ = self.ca.insert_sorted(*entry);
        }
        for program in &snapshot.programs {
            let _ = self.programs.insert_sorted(program.to_program());
        }
        info!(programs = self.programs.len(), "program model restored");
        self.tidy();
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Units ingested since creation or the last reset.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn errors(&self) -> &ErrorCounts {
        &self.errors
    }

    pub fn table_changes(&self) -> &TableChanges {
        &self.changes
    }

    pub fn stats(&self) -> &StatsManager {
        &self.stats
    }

    pub fn last_info(&self) -> &PacketInfo {
        &self.info
    }

    pub fn is_sync_locked(&self) -> bool {
        self.sync.locked
    }

    pub fn transport_stream_id(&self) -> Option<u16> {
        self.transport_stream_id
    }

    pub fn network_pid(&self) -> Option<u16> {
        self.network_pid
    }

    pub fn cat_seen(&self) -> bool {
        self.cat_seen
    }

    pub fn pids(&self) -> impl Iterator<Item = &Pid> {
        self.pids.iter()
    }

    pub fn pid(&self, pid: u16) -> Option<&Pid> {
        self.pids.search(pid as u32)
    }

    pub fn programs(&self) -> impl Iterator<Item = &Program> {
        self.programs.iter()
    }

    pub fn program(&self, number: u16) -> Option<&Program> {
        self.programs.search(number as u32)
    }

    /// PAT, CAT, SDT and other tables; PMTs live on their programs.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn table(&self, table_id: u8, table_id_extension: u16) -> Option<&Table> {
        self.tables
            .search(Table::key_for(table_id, table_id_extension))
    }

    /// EMM streams announced by the CAT.
    pub fn ca(&self) -> impl Iterator<Item = &CaEntry> {
        self.ca.iter()
    }

    pub fn arena(&self) -> &BuddyArena {
        &self.arena
    }

    /// Raw bytes of a stored section.
    pub fn section_bytes(&self, section: &crate::types::Section) -> &[u8] {
        self.arena.bytes(&section.block)
    }

    /// System time clock of a program at the last ingested address.
    pub fn program_stc(&self, number: u16) -> Option<u64> {
        self.programs
            .search(number as u32)
            .and_then(|p| program_stc(p, self.info.address, self.clock.cts()))
    }

    fn raise(&mut self, kind: ErrorKind) {
        record_error(&mut self.errors, &mut self.info, kind);
    }

    fn track_sync(&mut self, ok: bool) {
        let sync = &mut self.sync;
        if ok {
            sync.bad = 0;
            if !sync.locked {
                sync.good += 1;
                if sync.good >= SYNC_ACQUIRE_THRESHOLD {
                    sync.locked = true;
                    sync.good = 0;
                    info!("transport stream sync acquired");
                }
            }
            return;
        }

        sync.good = 0;
        sync.bad += 1;
        if sync.locked && sync.bad >= SYNC_LOSS_THRESHOLD {
            sync.locked = false;
            warn!("transport stream sync lost");
            self.raise(ErrorKind::SyncLoss);
        }
    }

    /// Clock used for repetition checks and statistics windows: the arrival
    /// clock when packets carry one, otherwise the primary program's STC.
    fn current_clock(&self, address: u64) -> Option<u64> {
        self.clock.cts().or_else(|| {
            self.programs
                .first()
                .and_then(|p| program_stc(p, address, None))
        })
    }

    fn on_continuity_break(&mut self, pid: u16) {
        let Self {
            pids,
            arena,
            programs,
            ..
        } = self;
        if let Some(assembler) = pids
            .search_mut(pid as u32)
            .and_then(|entry| entry.assembler.as_mut())
        {
            if assembler.in_progress() {
                sections::drop_fragments(arena, assembler);
            }
        }
        for program in programs.iter_mut() {
            if program.pcr_pid == Some(pid) {
                program.lose_stc_sync();
            }
            if let Some(element) = program.elements.search_mut(pid as u32) {
                element.align = false;
            }
        }
    }

    /// Drops the whole stream model, keeping counters and clocks.
    fn clear_model(&mut self) {
        self.arena.clear();
        self.pids.clear();
        self.programs.clear();
        self.tables.clear();
        self.ca.clear();
        self.state = ParseState::NextPat;
        self.transport_stream_id = None;
        self.network_pid = None;
        self.cat_seen = false;
        self.stats.restart();
        self.stats_window_started = false;
        self.pat_last_seen = None;
    }

    fn handle_elementary(
        &mut self,
        pid: u16,
        pusi: bool,
        range: Range<usize>,
        data: &[u8],
        lost: bool,
        address: u64,
    ) {
        let Some(number) = self.pids.search(pid as u32).and_then(|entry| entry.program) else {
            return;
        };
        let now = self.now;
        let cts = self.clock.cts();
        let Self {
            programs,
            errors,
            info,
            config,
            ..
        } = self;
        let Some(program) = programs.search_mut(number as u32) else {
            return;
        };
        let stc = program_stc(program, address, cts);
        let Some(element) = program.elements.search_mut(pid as u32) else {
            return;
        };

        if lost {
            element.align = false;
        }
        let decodes_pes = matches!(element.kind, PidKind::Video | PidKind::Audio);
        if !(pusi && decodes_pes) {
            if pusi {
                element.align = true;
            }
            if !config.align_only || element.align {
                info.es_payload = Some(range);
            }
            return;
        }

        match PesHeader::parse(data) {
            Ok(pes) => {
                element.align = true;
                if pes.payload_offset < data.len() {
                    info.es_payload = Some(range.start + pes.payload_offset..range.end);
                }
                if let Some(pts) = pes.pts {
                    if config.timestamps {
                        if let (Some(now), Some(previous)) = (now, element.last_pts_clock) {
                            let gap = ts_diff(now, previous, PCR_WRAP);
                            if gap > crate::timestamp::ms_to_27mhz(PTS_REPETITION_MS) {
                                record_error(errors, info, ErrorKind::Pts);
                            }
                        }
                    }
                    element.last_pts_clock = now;
                    element.last_pts = Some(pts);
                    element.last_dts = pes.dts;
                    element.last_stc = stc;
                }
                info.pes = Some(pes);
            }
            Err(err) => {
                debug!(pid, %err, "bad PES header");
                element.align = false;
                record_error(errors, info, err.kind().unwrap_or(ErrorKind::Pes));
            }
        }
    }
}

fn record_error(errors: &mut ErrorCounts, info: &mut PacketInfo, kind: ErrorKind) {
    errors.record(kind);
    info.errors.push(kind);
}

/// Finds or creates a PID entry and applies what a table says about it.
fn register(
    pids: &mut OrderedList<Pid>,
    pid: u16,
    kind: PidKind,
    program: Option<u16>,
) -> &mut Pid {
    let entry = pids.get_or_insert_with(pid as u32, || Pid::new(pid));
    entry.assign(kind);
    if program.is_some() {
        entry.program = program;
    }
    entry
}

#[cfg(test)]
pub(crate) mod tests;
