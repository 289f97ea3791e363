//! Report generation for transport stream analysis results

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::processor::PacketProcessor;
use crate::stats::bitrate_bps;
use crate::tr101::{ErrorCounts, TableChanges};
use crate::types::{AnalysisMode, CaEntry, Element, ParseState, PidKind, Program};

/// Elementary stream of a program
#[derive(Debug, Clone, Serialize)]
pub struct ElementReport {
    pub pid: u16,
    pub stream_type: u8,
    pub kind: PidKind,
    pub carries_pcr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pts: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ca: Vec<CaEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgramReport {
    pub program_number: u16,
    pub pmt_pid: u16,
    pub pcr_pid: Option<u16>,
    pub pmt_version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub stc_locked: bool,
    /// Transport rate seen through this program's PCRs.
    pub bitrate_bps: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ca: Vec<CaEntry>,
    pub streams: Vec<ElementReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PidReport {
    pub pid: u16,
    pub kind: PidKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<u16>,
    pub carries_pcr: bool,
    pub scrambled: bool,
    /// Packets in the current statistics interval.
    pub packets: u64,
    /// Rate over the previous statistics interval.
    pub bitrate_bps: Option<u64>,
}

/// Complete report of one processor.
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub timestamp: String,
    pub mode: AnalysisMode,
    pub state: ParseState,
    pub transport_stream_id: Option<u16>,
    pub packets: u64,
    pub sync_locked: bool,
    pub bitrate_bps: Option<u64>,
    pub null_ratio: Option<f64>,
    pub programs: Vec<ProgramReport>,
    pub pids: Vec<PidReport>,
    pub errors: ErrorCounts,
    pub table_changes: TableChanges,
}

/// Program model that can be saved and fed back through
/// [`PacketProcessor::restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub transport_stream_id: Option<u16>,
    pub network_pid: Option<u16>,
    pub cat_seen: bool,
    pub ca: Vec<CaEntry>,
    pub programs: Vec<ProgramSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSnapshot {
    pub number: u16,
    pub pmt_pid: u16,
    pub pcr_pid: Option<u16>,
    pub pmt_version: Option<u8>,
    pub program_info: Vec<u8>,
    pub ca: Vec<CaEntry>,
    pub service_type: Option<u8>,
    pub service_provider: Vec<u8>,
    pub service_name: Vec<u8>,
    pub elements: Vec<ElementSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub pid: u16,
    pub stream_type: u8,
    pub es_info: Vec<u8>,
    pub ca: Vec<CaEntry>,
}

impl ProgramSnapshot {
    fn capture(program: &Program) -> Self {
        ProgramSnapshot {
            number: program.number,
            pmt_pid: program.pmt_pid,
            pcr_pid: program.pcr_pid,
            pmt_version: program.pmt.version,
            program_info: program.program_info.to_vec(),
            ca: program.ca.iter().copied().collect(),
            service_type: program.service_type,
            service_provider: program.service_provider.to_vec(),
            service_name: program.service_name.to_vec(),
            elements: program
                .elements
                .iter()
                .map(|element| ElementSnapshot {
                    pid: element.pid,
                    stream_type: element.stream_type,
                    es_info: element.es_info.to_vec(),
                    ca: element.ca.iter().copied().collect(),
                })
                .collect(),
        }
    }

    /// Rebuilds the program as if its PMT had just been parsed.
    pub(crate) fn to_program(&self) -> Program {
        let mut program = Program::new(self.number, self.pmt_pid);
        program.pcr_pid = self.pcr_pid;
        program.program_info = Bytes::from(self.program_info.clone());
        program.service_type = self.service_type;
        program.service_provider = Bytes::from(self.service_provider.clone());
        program.service_name = Bytes::from(self.service_name.clone());
        for entry in &self.ca {
            let _ = program.ca.insert_sorted(*entry);
        }
        for snapshot in &self.elements {
            if program.elements.contains(snapshot.pid as u32) {
                continue;
            }
            let mut element = Element::new(snapshot.pid, snapshot.stream_type, self.pcr_pid);
            element.es_info = Bytes::from(snapshot.es_info.clone());
            for entry in &snapshot.ca {
                let _ = element.ca.insert_sorted(*entry);
            }
            program.elements.push(element);
        }
        program.pmt.version = self.pmt_version;
        program.is_parsed = true;
        program
    }
}

/// DVB text without its leading character table selector.
fn dvb_text(raw: &Bytes) -> Option<String> {
    let text = match raw.first() {
        None => return None,
        Some(&selector) if selector < 0x20 => &raw[1..],
        Some(_) => &raw[..],
    };
    Some(String::from_utf8_lossy(text).into_owned())
}

/// Report generator for transport stream analysis results
pub struct Reporter;

impl Reporter {
    /// Generate a structured StreamReport for API consumers
    pub fn create_report(processor: &PacketProcessor, analysis_mode: AnalysisMode) -> StreamReport {
        let stats = processor.stats();

        let programs = processor
            .programs()
            .map(|program| ProgramReport {
                program_number: program.number,
                pmt_pid: program.pmt_pid,
                pcr_pid: program.pcr_pid,
                pmt_version: program.pmt.version,
                service_type: program.service_type,
                service_provider: dvb_text(&program.service_provider),
                service_name: dvb_text(&program.service_name),
                stc_locked: program.is_stc_sync,
                bitrate_bps: program.bitrate,
                ca: program.ca.iter().copied().collect(),
                streams: program
                    .elements
                    .iter()
                    .map(|element| ElementReport {
                        pid: element.pid,
                        stream_type: element.stream_type,
                        kind: element.kind,
                        carries_pcr: element.carries_pcr,
                        last_pts: element.last_pts,
                        ca: element.ca.iter().copied().collect(),
                    })
                    .collect(),
            })
            .collect();

        let pids = processor
            .pids()
            .map(|entry| PidReport {
                pid: entry.pid,
                kind: entry.kind,
                program: entry.program,
                carries_pcr: entry.carries_pcr,
                scrambled: entry.scrambled,
                packets: entry.counters.packets,
                bitrate_bps: bitrate_bps(entry.previous.bytes, stats.previous_ticks),
            })
            .collect();

        // Filter TR 101 290 counters based on analysis mode
        let errors = match analysis_mode {
            AnalysisMode::Tr101Priority1 => processor.errors().priority_1_only(),
            AnalysisMode::Tr101Priority12 => processor.errors().priority_1_and_2_only(),
            _ => processor.errors().clone(),
        };

        StreamReport {
            timestamp: chrono::Utc::now().to_rfc3339(),
            mode: analysis_mode,
            state: processor.state(),
            transport_stream_id: processor.transport_stream_id(),
            packets: processor.packets(),
            sync_locked: processor.is_sync_locked(),
            bitrate_bps: stats.bitrate(),
            null_ratio: stats.null_ratio(),
            programs,
            pids,
            errors,
            table_changes: processor.table_changes().clone(),
        }
    }

    /// Generate a JSON string for CLI output
    pub fn generate_json_report(
        processor: &PacketProcessor,
        analysis_mode: AnalysisMode,
        pretty: bool,
    ) -> String {
        let report = Self::create_report(processor, analysis_mode);
        let json = if pretty {
            serde_json::to_string_pretty(&report)
        } else {
            serde_json::to_string(&report)
        };
        json.unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string())
    }

    pub fn snapshot(processor: &PacketProcessor) -> StreamSnapshot {
        StreamSnapshot {
            transport_stream_id: processor.transport_stream_id(),
            network_pid: processor.network_pid(),
            cat_seen: processor.cat_seen(),
            ca: processor.ca().copied().collect(),
            programs: processor.programs().map(ProgramSnapshot::capture).collect(),
        }
    }
}
