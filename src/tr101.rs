// src/tr101.rs
//! ETSI TR 101 290 error classification and the cumulative error aggregate.

use serde::{Deserialize, Serialize};

use crate::psi::section::SectionKind;

/// TR 101 290 priority tier of an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    First,
    Second,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /* ───── Priority 1 ───── */
    SyncLoss,        // 1.1
    SyncByte,        // 1.2
    Pat,             // 1.3
    ContinuityCount, // 1.4
    Pmt,             // 1.5

    /* ───── Priority 2 ───── */
    Transport,        // 2.1
    Crc,              // 2.2
    PcrRepetition,    // 2.3a
    PcrDiscontinuity, // 2.3b
    PcrAccuracy,      // 2.4
    Pts,              // 2.5
    Cat,              // 2.6

    /* ───── structural / other ───── */
    AdaptationFieldControl,
    AdaptationFieldLength,
    WildPcr,
    SectionLength,
    SectionSyntax,
    PointerField,
    PidTable,
    Descriptor,
    Pes,
    SdtTransportId,
    NitPid,
    Allocation,
}

impl ErrorKind {
    pub fn priority(self) -> Priority {
        use ErrorKind::*;
        match self {
            SyncLoss | SyncByte | Pat | ContinuityCount | Pmt => Priority::First,
            Transport | Crc | PcrRepetition | PcrDiscontinuity | PcrAccuracy | Pts | Cat => {
                Priority::Second
            }
            _ => Priority::Other,
        }
    }
}

/// Cumulative error counters, one per [`ErrorKind`].
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounts {
    // Priority-1 counters
    pub sync_loss: u64,
    pub sync_byte_errors: u64,
    pub pat_errors: u64,
    pub continuity_counter_errors: u64,
    pub pmt_errors: u64,

    // Priority-2 counters
    pub transport_errors: u64,
    pub crc_errors: u64,
    pub pcr_repetition_errors: u64,
    pub pcr_discontinuity_errors: u64,
    pub pcr_accuracy_errors: u64,
    pub pts_errors: u64,
    pub cat_errors: u64,

    // structural
    pub adaptation_field_control_errors: u64,
    pub adaptation_field_length_errors: u64,
    pub wild_pcr: u64,
    pub section_length_errors: u64,
    pub section_syntax_errors: u64,
    pub pointer_field_errors: u64,
    pub pid_table_errors: u64,
    pub descriptor_errors: u64,
    pub pes_errors: u64,
    pub sdt_transport_id_mismatch: u64,
    pub nit_pid_errors: u64,
    pub allocation_failures: u64,
}

impl ErrorCounts {
    pub fn record(&mut self, kind: ErrorKind) {
        *self.slot(kind) += 1;
    }

    pub fn count(&self, kind: ErrorKind) -> u64 {
        use ErrorKind::*;
        match kind {
            SyncLoss => self.sync_loss,
            SyncByte => self.sync_byte_errors,
            Pat => self.pat_errors,
            ContinuityCount => self.continuity_counter_errors,
            Pmt => self.pmt_errors,
            Transport => self.transport_errors,
            Crc => self.crc_errors,
            PcrRepetition => self.pcr_repetition_errors,
            PcrDiscontinuity => self.pcr_discontinuity_errors,
            PcrAccuracy => self.pcr_accuracy_errors,
            Pts => self.pts_errors,
            Cat => self.cat_errors,
            AdaptationFieldControl => self.adaptation_field_control_errors,
            AdaptationFieldLength => self.adaptation_field_length_errors,
            WildPcr => self.wild_pcr,
            SectionLength => self.section_length_errors,
            SectionSyntax => self.section_syntax_errors,
            PointerField => self.pointer_field_errors,
            PidTable => self.pid_table_errors,
            Descriptor => self.descriptor_errors,
            Pes => self.pes_errors,
            SdtTransportId => self.sdt_transport_id_mismatch,
            NitPid => self.nit_pid_errors,
            Allocation => self.allocation_failures,
        }
    }

    fn slot(&mut self, kind: ErrorKind) -> &mut u64 {
        use ErrorKind::*;
        match kind {
            SyncLoss => &mut self.sync_loss,
            SyncByte => &mut self.sync_byte_errors,
            Pat => &mut self.pat_errors,
            ContinuityCount => &mut self.continuity_counter_errors,
            Pmt => &mut self.pmt_errors,
            Transport => &mut self.transport_errors,
            Crc => &mut self.crc_errors,
            PcrRepetition => &mut self.pcr_repetition_errors,
            PcrDiscontinuity => &mut self.pcr_discontinuity_errors,
            PcrAccuracy => &mut self.pcr_accuracy_errors,
            Pts => &mut self.pts_errors,
            Cat => &mut self.cat_errors,
            AdaptationFieldControl => &mut self.adaptation_field_control_errors,
            AdaptationFieldLength => &mut self.adaptation_field_length_errors,
            WildPcr => &mut self.wild_pcr,
            SectionLength => &mut self.section_length_errors,
            SectionSyntax => &mut self.section_syntax_errors,
            PointerField => &mut self.pointer_field_errors,
            PidTable => &mut self.pid_table_errors,
            Descriptor => &mut self.descriptor_errors,
            Pes => &mut self.pes_errors,
            SdtTransportId => &mut self.sdt_transport_id_mismatch,
            NitPid => &mut self.nit_pid_errors,
            Allocation => &mut self.allocation_failures,
        }
    }

    pub fn priority_total(&self, priority: Priority) -> u64 {
        ALL_KINDS
            .iter()
            .filter(|kind| kind.priority() == priority)
            .map(|&kind| self.count(kind))
            .sum()
    }

    pub fn total(&self) -> u64 {
        ALL_KINDS.iter().map(|&kind| self.count(kind)).sum()
    }

    /// Copy with every counter outside `keep` zeroed.
    fn retain(&self, keep: impl Fn(Priority) -> bool) -> ErrorCounts {
        let mut filtered = self.clone();
        for kind in ALL_KINDS {
            if !keep(kind.priority()) {
                *filtered.slot(kind) = 0;
            }
        }
        filtered
    }

    pub fn priority_1_only(&self) -> ErrorCounts {
        self.retain(|p| p == Priority::First)
    }

    pub fn priority_1_and_2_only(&self) -> ErrorCounts {
        self.retain(|p| matches!(p, Priority::First | Priority::Second))
    }
}

const ALL_KINDS: [ErrorKind; 24] = {
    use ErrorKind::*;
    [
        SyncLoss,
        SyncByte,
        Pat,
        ContinuityCount,
        Pmt,
        Transport,
        Crc,
        PcrRepetition,
        PcrDiscontinuity,
        PcrAccuracy,
        Pts,
        Cat,
        AdaptationFieldControl,
        AdaptationFieldLength,
        WildPcr,
        SectionLength,
        SectionSyntax,
        PointerField,
        PidTable,
        Descriptor,
        Pes,
        SdtTransportId,
        NitPid,
        Allocation,
    ]
};

/// Re-sent sections whose CRC differs from the stored copy.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChanges {
    pub pat: u64,
    pub cat: u64,
    pub pmt: u64,
    pub sdt: u64,
}

impl TableChanges {
    pub fn record(&mut self, kind: SectionKind) {
        let slot = match kind {
            SectionKind::Pat => &mut self.pat,
            SectionKind::Cat => &mut self.cat,
            SectionKind::Pmt => &mut self.pmt,
            SectionKind::SdtActual | SectionKind::SdtOther => &mut self.sdt,
            // undecoded tables are not retained, so they cannot change
            SectionKind::Other(_) => return,
        };
        *slot += 1;
    }
}
