//! Section reassembly and PSI/SI table handling.

use tracing::{debug, info, warn};

use super::{PacketProcessor, record_error, register};
use crate::arena::{Block, BuddyArena};
use crate::constants::*;
use crate::crc32::validate_section_crc32;
use crate::psi::section::{SectionHeader, SectionKind, section_length_limit};
use crate::psi::{parse_cat, parse_pat, parse_pmt, parse_sdt};
use crate::tr101::ErrorKind;
use crate::types::{
    CaEntry, Element, Fragment, ParseState, PidKind, Section, SectionAssembler, Table,
};
use crate::TsError;

/// What a newly completed section means for its table.
enum Disposition {
    /// Same section number and CRC as the stored one.
    Repeat,
    /// Same section number, different content.
    Changed { version_changed: bool },
    New,
}

fn classify(table: &Table, header: &SectionHeader, crc: Option<u32>) -> Disposition {
    match table.sections.search(header.section_number as u32) {
        Some(stored) if stored.crc == crc => Disposition::Repeat,
        Some(stored) => Disposition::Changed {
            version_changed: stored.header.version_number != header.version_number,
        },
        None => Disposition::New,
    }
}

pub(super) fn release(arena: &mut BuddyArena, block: Block) {
    if let Err(err) = arena.free(block) {
        warn!(%err, "failed to release section block");
    }
}

pub(super) fn drop_fragments(arena: &mut BuddyArena, assembler: &mut SectionAssembler) {
    while let Some(fragment) = assembler.fragments.shift() {
        release(arena, fragment.block);
    }
    assembler.accumulated = 0;
    assembler.head_len = 0;
}

fn clear_sections(arena: &mut BuddyArena, table: &mut Table) {
    for section in table.sections.drain() {
        release(arena, section.block);
    }
    table.version = None;
}

/// Joins the queued fragments into one block and empties the queue.
fn assemble(arena: &mut BuddyArena, assembler: &mut SectionAssembler) -> Option<Block> {
    let total = assembler.accumulated;
    let joined = if assembler.fragments.len() == 1 {
        assembler.fragments.shift().map(|fragment| fragment.block)
    } else {
        match arena.alloc(total) {
            Some(block) => {
                let mut at = 0;
                while let Some(fragment) = assembler.fragments.shift() {
                    arena.copy_between(&fragment.block, &block, at);
                    at += fragment.block.len();
                    release(arena, fragment.block);
                }
                Some(block)
            }
            None => None,
        }
    };
    drop_fragments(arena, assembler);
    joined
}

fn error_kind(err: TsError, fallback: ErrorKind) -> ErrorKind {
    err.kind().unwrap_or(fallback)
}

impl PacketProcessor {
    /// Feeds the payload of a section-carrying PID.
    pub(super) fn feed_sections(&mut self, pid: u16, pusi: bool, payload: &[u8]) {
        if !pusi {
            if self.assembling(pid) {
                self.append(pid, payload);
            }
            return;
        }

        let pointer = payload[0] as usize;
        let Some(tail) = payload.get(1..1 + pointer) else {
            debug!(pid, pointer, "pointer_field past end of payload");
            self.raise(ErrorKind::PointerField);
            self.abandon(pid);
            return;
        };
        if self.assembling(pid) {
            self.append(pid, tail);
            if self.assembling(pid) {
                debug!(pid, "section cut short by a new payload unit");
                self.abandon(pid);
            }
        }

        let mut rest = &payload[1 + pointer..];
        while let Some(&table_id) = rest.first() {
            if table_id == 0xFF {
                break;
            }
            let consumed = self.append(pid, rest);
            if consumed == 0 || self.assembling(pid) {
                break;
            }
            rest = &rest[consumed..];
        }
    }

    fn assembling(&self, pid: u16) -> bool {
        self.pids
            .search(pid as u32)
            .and_then(|entry| entry.assembler.as_ref())
            .is_some_and(SectionAssembler::in_progress)
    }

    fn abandon(&mut self, pid: u16) {
        let Self { pids, arena, .. } = self;
        if let Some(assembler) = pids
            .search_mut(pid as u32)
            .and_then(|entry| entry.assembler.as_mut())
        {
            drop_fragments(arena, assembler);
        }
    }

    /// Queues the bytes of `data` belonging to the current section and
    /// returns how many were taken. A completed section is processed before
    /// returning.
    fn append(&mut self, pid: u16, data: &[u8]) -> usize {
        let Self {
            pids,
            arena,
            errors,
            info,
            ..
        } = self;
        let Some(assembler) = pids
            .search_mut(pid as u32)
            .and_then(|entry| entry.assembler.as_mut())
        else {
            return 0;
        };

        let mut seen = 0;
        while assembler.head_len < 3 && seen < data.len() {
            assembler.head[assembler.head_len] = data[seen];
            assembler.head_len += 1;
            seen += 1;
        }

        let total = assembler.total_len();
        if let Some(total) = total {
            let limit = section_length_limit(&assembler.head);
            if total - 3 > limit {
                debug!(pid, length = total - 3, limit, "section_length over limit");
                record_error(errors, info, ErrorKind::SectionLength);
                drop_fragments(arena, assembler);
                return data.len();
            }
        }

        let wanted = total.map_or(data.len(), |total| total - assembler.accumulated);
        let take = wanted.min(data.len());
        if take == 0 {
            return 0;
        }
        let Some(block) = arena.alloc_copy(&data[..take]) else {
            warn!(pid, bytes = take, "section arena exhausted, dropping section");
            record_error(errors, info, ErrorKind::Allocation);
            drop_fragments(arena, assembler);
            return data.len();
        };
        let seq = assembler.next_seq;
        assembler.next_seq = assembler.next_seq.wrapping_add(1);
        assembler.fragments.push(Fragment { seq, block });
        assembler.accumulated += take;

        if total != Some(assembler.accumulated) {
            return take;
        }
        match assemble(arena, assembler) {
            Some(block) => self.process_section(pid, block),
            None => {
                warn!(pid, "section arena exhausted while joining fragments");
                self.raise(ErrorKind::Allocation);
            }
        }
        take
    }

    fn process_section(&mut self, pid: u16, block: Block) {
        let data = self.arena.bytes(&block).to_vec();
        let header = match self.check_section(pid, &data) {
            Ok(header) => header,
            Err(kind) => {
                self.raise(kind);
                release(&mut self.arena, block);
                return;
            }
        };
        if let SectionKind::Other(table_id) = header.kind() {
            // not decoded, so nothing is retained
            if header.section_syntax_indicator
                && !validate_section_crc32(&data[..header.total_len()])
            {
                debug!(pid, table_id, "section CRC mismatch");
                self.raise(ErrorKind::Crc);
            }
            release(&mut self.arena, block);
            return;
        }
        let section = Section {
            header,
            crc: header.crc(&data),
            crc_checked: header.kind().requires_crc(),
            kind: header.kind(),
            block,
        };
        if section.kind == SectionKind::Pmt {
            self.store_pmt_section(pid, section, &data);
        } else {
            self.store_table_section(pid, section, &data);
        }
    }

    fn check_section(&self, pid: u16, data: &[u8]) -> Result<SectionHeader, ErrorKind> {
        let header = SectionHeader::parse(data)
            .map_err(|err| error_kind(err, ErrorKind::SectionLength))?;
        let kind = header.kind();

        if pid == PID_PAT && kind != SectionKind::Pat {
            return Err(ErrorKind::Pat);
        }
        let allowed = match kind {
            SectionKind::Pat => pid == PID_PAT,
            SectionKind::Cat => pid == PID_CAT,
            SectionKind::Pmt => self
                .pids
                .search(pid as u32)
                .is_some_and(|entry| entry.kind == PidKind::Pmt),
            SectionKind::SdtActual => pid == PID_SDT,
            SectionKind::SdtOther | SectionKind::Other(_) => true,
        };
        if !allowed {
            debug!(pid, table_id = header.table_id, "table on unexpected PID");
            return Err(ErrorKind::PidTable);
        }

        if kind.requires_crc() {
            if !header.section_syntax_indicator {
                return Err(ErrorKind::SectionSyntax);
            }
            if !validate_section_crc32(&data[..header.total_len()]) {
                debug!(pid, table_id = header.table_id, "section CRC mismatch");
                return Err(ErrorKind::Crc);
            }
        }
        Ok(header)
    }

    fn store_table_section(&mut self, pid: u16, section: Section, data: &[u8]) {
        let header = section.header;
        let key = Table::key_for(header.table_id, header.table_id_extension);
        let now = self.now;
        if section.kind == SectionKind::Pat {
            self.pat_last_seen = now.or(self.pat_last_seen);
        }

        let table = self
            .tables
            .get_or_insert_with(key, || Table::new(header.table_id, header.table_id_extension));
        if now.is_some() {
            table.last_seen = now;
        }
        match classify(table, &header, section.crc) {
            Disposition::Repeat => {
                release(&mut self.arena, section.block);
                return;
            }
            Disposition::Changed { version_changed } => {
                if self.config.invalidate_on_version_change && version_changed {
                    if section.kind == SectionKind::Pat {
                        info!(version = header.version_number, "PAT version change, restarting");
                        self.clear_model();
                        // the arena was cleared along with the old block
                        drop(section);
                        self.restart_with(pid, data);
                        return;
                    }
                    info!(table_id = header.table_id, "table version change");
                    clear_sections(&mut self.arena, table);
                } else {
                    debug!(table_id = header.table_id, "table content changed");
                    self.changes.record(section.kind);
                    release(&mut self.arena, section.block);
                    return;
                }
            }
            Disposition::New => {}
        }

        let decoded = match section.kind {
            SectionKind::Pat => self.apply_pat(data),
            SectionKind::Cat => self.apply_cat(data),
            SectionKind::SdtActual | SectionKind::SdtOther => self.apply_sdt(data),
            SectionKind::Pmt | SectionKind::Other(_) => Ok(()),
        };
        if let Err(kind) = decoded {
            self.raise(kind);
            release(&mut self.arena, section.block);
            return;
        }

        let table = self
            .tables
            .get_or_insert_with(key, || Table::new(header.table_id, header.table_id_extension));
        table.version = Some(header.version_number);
        table.last_section_number = header.last_section_number;
        if let Err(rejected) = table.sections.insert_sorted(section) {
            release(&mut self.arena, rejected.block);
        }
    }

    /// Re-feeds a section into a freshly cleared model.
    fn restart_with(&mut self, pid: u16, data: &[u8]) {
        register(&mut self.pids, pid, PidKind::Pat, None);
        match self.arena.alloc_copy(data) {
            Some(block) => self.process_section(pid, block),
            None => self.raise(ErrorKind::Allocation),
        }
    }

    fn store_pmt_section(&mut self, pid: u16, section: Section, data: &[u8]) {
        let header = section.header;
        let number = header.table_id_extension;
        let now = self.now;
        let invalidate = self.config.invalidate_on_version_change;

        let Self {
            programs,
            arena,
            errors,
            info,
            changes,
            ..
        } = self;
        let Some(program) = programs.search_mut(number as u32) else {
            debug!(pid, program = number, "PMT for a program not in the PAT");
            release(arena, section.block);
            return;
        };
        if program.pmt_pid != pid {
            record_error(errors, info, ErrorKind::PidTable);
            release(arena, section.block);
            return;
        }
        if now.is_some() {
            program.pmt.last_seen = now;
        }
        match classify(&program.pmt, &header, section.crc) {
            Disposition::Repeat => {
                release(arena, section.block);
                return;
            }
            Disposition::Changed { version_changed } if invalidate && version_changed => {
                info!(program = number, version = header.version_number, "PMT version change");
                clear_sections(arena, &mut program.pmt);
                program.elements.clear();
                program.ca.clear();
                program.is_parsed = false;
            }
            Disposition::Changed { .. } => {
                debug!(program = number, "PMT content changed");
                changes.record(SectionKind::Pmt);
                release(arena, section.block);
                return;
            }
            Disposition::New => {}
        }
        let parsed = program.is_parsed;

        if !parsed {
            if let Err(kind) = self.apply_pmt(data) {
                self.raise(kind);
                release(&mut self.arena, section.block);
                return;
            }
        }

        let Self { programs, arena, .. } = self;
        let Some(program) = programs.search_mut(number as u32) else {
            release(arena, section.block);
            return;
        };
        program.pmt.version = Some(header.version_number);
        program.pmt.last_section_number = header.last_section_number;
        if let Err(rejected) = program.pmt.sections.insert_sorted(section) {
            release(arena, rejected.block);
        }
    }

    fn apply_pat(&mut self, data: &[u8]) -> Result<(), ErrorKind> {
        let pat = parse_pat(data).map_err(|err| error_kind(err, ErrorKind::Pat))?;
        if self.state != ParseState::NextPat {
            return Ok(());
        }

        self.transport_stream_id = Some(pat.transport_stream_id);
        for entry in pat.programs {
            if entry.is_network() {
                if entry.pid != PID_NIT {
                    self.raise(ErrorKind::NitPid);
                }
                self.network_pid = Some(entry.pid);
                register(&mut self.pids, entry.pid, PidKind::Nit, None);
                continue;
            }
            let number = entry.program_number;
            if self
                .programs
                .insert_sorted(crate::types::Program::new(number, entry.pid))
                .is_ok()
            {
                debug!(program = number, pmt_pid = entry.pid, "program announced");
            }
            register(&mut self.pids, entry.pid, PidKind::Pmt, Some(number));
        }
        Ok(())
    }

    fn apply_cat(&mut self, data: &[u8]) -> Result<(), ErrorKind> {
        let cat = parse_cat(data).map_err(|err| error_kind(err, ErrorKind::Cat))?;
        for descriptor in cat.ca {
            let entry = CaEntry {
                ca_system_id: descriptor.ca_system_id,
                pid: descriptor.ca_pid,
            };
            let _ = self.ca.insert_sorted(entry);
            register(&mut self.pids, descriptor.ca_pid, PidKind::Emm, None);
        }
        self.cat_seen = true;
        Ok(())
    }

    fn apply_sdt(&mut self, data: &[u8]) -> Result<(), ErrorKind> {
        let sdt = parse_sdt(data).map_err(|err| error_kind(err, ErrorKind::SectionLength))?;
        if sdt.table_id != TABLE_ID_SDT_ACTUAL {
            return Ok(());
        }
        if let Some(ts_id) = self.transport_stream_id {
            if ts_id != sdt.transport_stream_id {
                debug!(
                    expected = ts_id,
                    found = sdt.transport_stream_id,
                    "SDT actual for another transport stream"
                );
                return Err(ErrorKind::SdtTransportId);
            }
        }
        for service in sdt.services {
            let Some(descriptor) = service.descriptor else {
                continue;
            };
            if let Some(program) = self.programs.search_mut(service.service_id as u32) {
                program.service_type = Some(descriptor.service_type);
                program.service_provider = descriptor.provider_name;
                program.service_name = descriptor.service_name;
            }
        }
        Ok(())
    }

    fn apply_pmt(&mut self, data: &[u8]) -> Result<(), ErrorKind> {
        let pmt = parse_pmt(data).map_err(|err| error_kind(err, ErrorKind::Pmt))?;
        let number = pmt.program_number;
        let pids = &mut self.pids;

        let pcr_pid = (pmt.pcr_pid != PID_NULL).then_some(pmt.pcr_pid);
        match pcr_pid {
            Some(pcr) => register(pids, pcr, PidKind::Pcr, Some(number)).carries_pcr = true,
            None => register(pids, PID_NULL, PidKind::Null, None).carries_pcr = true,
        }

        let mut program_ca = Vec::with_capacity(pmt.ca.len());
        for descriptor in &pmt.ca {
            register(pids, descriptor.ca_pid, PidKind::Ecm, Some(number));
            program_ca.push(CaEntry {
                ca_system_id: descriptor.ca_system_id,
                pid: descriptor.ca_pid,
            });
        }

        let mut elements = Vec::with_capacity(pmt.streams.len());
        for stream in pmt.streams {
            let mut element = Element::new(stream.elementary_pid, stream.stream_type, pcr_pid);
            element.es_info = stream.es_info;
            for descriptor in stream.ca {
                register(pids, descriptor.ca_pid, PidKind::Ecm, Some(number));
                let _ = element.ca.insert_sorted(CaEntry {
                    ca_system_id: descriptor.ca_system_id,
                    pid: descriptor.ca_pid,
                });
            }
            let entry = register(pids, element.pid, element.kind, Some(number));
            entry.is_element = true;
            entry.carries_pcr |= element.carries_pcr;
            elements.push(element);
        }

        let Some(program) = self.programs.search_mut(number as u32) else {
            return Ok(());
        };
        program.pcr_pid = pcr_pid;
        program.program_info = pmt.program_info;
        for entry in program_ca {
            let _ = program.ca.insert_sorted(entry);
        }
        for element in elements {
            if !program.elements.contains(element.pid as u32) {
                program.elements.push(element);
            }
        }
        program.is_parsed = true;
        info!(
            program = number,
            elements = program.elements.len(),
            pcr_pid = ?program.pcr_pid,
            "PMT parsed"
        );
        Ok(())
    }

    /// Moves the bootstrap forward once the PAT, then every PMT, is known.
    pub(super) fn advance_state(&mut self) {
        if self.state == ParseState::NextPat {
            let complete = self
                .tables
                .search(Table::key_for(TABLE_ID_PAT, 0))
                .is_some_and(Table::is_complete);
            if !complete {
                return;
            }
            self.state = if self.programs.is_empty() {
                ParseState::NextPkt
            } else {
                ParseState::NextPmt
            };
            info!(
                programs = self.programs.len(),
                ts_id = ?self.transport_stream_id,
                "PAT complete"
            );
        }
        if self.state == ParseState::NextPmt && self.programs.iter().all(|p| p.is_parsed) {
            self.state = ParseState::NextPkt;
            info!("all PMTs parsed");
        }
    }
}
