//! Arrival clock, per-program STC recovery and the PCR/repetition checks.

use tracing::{debug, info};

use super::{PacketProcessor, record_error};
use crate::constants::*;
use crate::stats::bitrate_bps;
use crate::timestamp::{ms_to_27mhz, ts_add, ts_diff};
use crate::tr101::ErrorKind;
use crate::types::{Arrival, ClockSample, ParseState, Program};

/// Arrival clock (CTS) kept in PCR units, advanced by arrival deltas so the
/// arrival source may wrap at any even modulus.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct ClockState {
    last: Option<Arrival>,
    cts: Option<u64>,
}

impl ClockState {
    pub fn cts(&self) -> Option<u64> {
        self.cts
    }

    /// A packet without arrival information switches back to byte mode.
    pub fn advance(&mut self, arrival: Option<Arrival>) {
        let Some(arrival) = arrival else {
            *self = ClockState::default();
            return;
        };
        let Some(ticks) = arrival.ticks.checked_rem(arrival.wrap) else {
            *self = ClockState::default();
            return;
        };

        let cts = match (self.last, self.cts) {
            (Some(last), Some(cts)) if last.wrap == arrival.wrap => {
                ts_add(cts, ts_diff(ticks, last.ticks, arrival.wrap), PCR_WRAP)
            }
            _ => ticks % PCR_WRAP,
        };
        self.cts = Some(cts);
        self.last = Some(Arrival {
            ticks,
            wrap: arrival.wrap,
        });
    }
}

/// STC of `program` for a packet at `address`.
///
/// With an arrival clock the STC runs from the last PCR by the arrival
/// delta. Without one it is interpolated linearly between the last two
/// PCRs by byte position.
pub(crate) fn program_stc(program: &Program, address: u64, cts: Option<u64>) -> Option<u64> {
    if !program.is_stc_sync {
        return None;
    }
    let b = program.pcr_b?;
    if let (Some(now), Some(at)) = (cts, b.arrival) {
        return Some(ts_add(b.pcr, ts_diff(now, at, PCR_WRAP), PCR_WRAP));
    }

    let a = program.pcr_a?;
    let span = b.address as i128 - a.address as i128;
    if span <= 0 {
        return None;
    }
    let ticks = ts_diff(b.pcr, a.pcr, PCR_WRAP) as i128;
    let delta = ticks * (address as i128 - b.address as i128) / span;
    Some(ts_add(b.pcr, delta as i64, PCR_WRAP))
}

impl PacketProcessor {
    /// Feeds a PCR seen on `pid` to every program using it as PCR_PID.
    pub(super) fn handle_pcr(&mut self, pid: u16, pcr: u64, discontinuity: bool, address: u64) {
        // extensions above 299 are out of range; keep the value on the clock
        let pcr = pcr % PCR_WRAP;
        let cts = self.clock.cts();
        let sample = ClockSample {
            pcr,
            address,
            arrival: cts,
        };
        let primary = self.programs.first().map(|p| p.number);
        let check = self.config.pcr_check;
        let repetition_limit = ms_to_27mhz(PCR_REPETITION_MS);
        let discontinuity_limit = ms_to_27mhz(PCR_DISCONTINUITY_MS);
        let mut owned = false;
        let mut open_window = false;

        let Self {
            programs,
            errors,
            info,
            stats_window_started,
            ..
        } = self;
        for program in programs.iter_mut().filter(|p| p.pcr_pid == Some(pid)) {
            owned = true;
            let mut resync = discontinuity;

            if let Some(previous) = program.pcr_b {
                if check {
                    let elapsed = match (cts, previous.arrival) {
                        (Some(now), Some(then)) => Some(ts_diff(now, then, PCR_WRAP)),
                        _ => program_stc(program, address, None)
                            .map(|stc| ts_diff(stc, previous.pcr, PCR_WRAP)),
                    };
                    if let Some(elapsed) = elapsed {
                        if elapsed <= 0 || elapsed > repetition_limit {
                            record_error(errors, info, ErrorKind::PcrRepetition);
                        }
                    }
                }

                if !discontinuity {
                    let step = ts_diff(pcr, previous.pcr, PCR_WRAP);
                    if step <= 0 || step > discontinuity_limit {
                        debug!(program = program.number, step, "PCR discontinuity");
                        if check {
                            record_error(errors, info, ErrorKind::PcrDiscontinuity);
                        }
                        resync = true;
                    } else if let Some(stc) = program_stc(program, address, cts) {
                        let jitter = ts_diff(pcr, stc, PCR_WRAP);
                        info.pcr_jitter = Some(jitter);
                        if check && jitter.abs() > PCR_ACCURACY_TICKS {
                            record_error(errors, info, ErrorKind::PcrAccuracy);
                        }
                    }
                }
            }

            let was_synced = program.is_stc_sync;
            if resync {
                program.lose_stc_sync();
            } else {
                program.pcr_a = program.pcr_b;
            }
            program.pcr_b = Some(sample);
            // one PCR is enough against an arrival clock, two otherwise
            program.is_stc_sync = cts.is_some() || program.pcr_a.is_some();

            if let (Some(a), Some(b)) = (program.pcr_a, program.pcr_b) {
                let ticks = ts_diff(b.pcr, a.pcr, PCR_WRAP);
                if ticks > 0 {
                    program.bitrate =
                        bitrate_bps(b.address.saturating_sub(a.address), ticks as u64);
                }
            }

            if program.is_stc_sync && !was_synced {
                debug!(program = program.number, pcr, "STC locked");
                if Some(program.number) == primary && !*stats_window_started {
                    open_window = true;
                }
            }
        }

        if !owned && check && self.state == ParseState::NextPkt {
            self.raise(ErrorKind::WildPcr);
        }
        if open_window {
            self.start_statistics_window();
        }
    }

    /// Zeroes all counters once the primary program's clock first locks, so
    /// rates are measured over a known time base.
    fn start_statistics_window(&mut self) {
        self.stats.restart();
        for entry in self.pids.iter_mut() {
            entry.counters = Default::default();
            entry.previous = Default::default();
        }
        self.stats_window_started = true;
        info!("statistics window started");
    }

    /// PAT and PMT must repeat at least every 500 ms.
    pub(super) fn check_table_repetition(&mut self, now: u64) {
        let Self {
            programs,
            errors,
            info,
            pat_last_seen,
            ..
        } = self;

        if let Some(last) = *pat_last_seen {
            if ts_diff(now, last, PCR_WRAP) > ms_to_27mhz(PAT_TIMEOUT_MS) {
                record_error(errors, info, ErrorKind::Pat);
                *pat_last_seen = Some(now);
            }
        }
        for program in programs.iter_mut() {
            if let Some(last) = program.pmt.last_seen {
                if ts_diff(now, last, PCR_WRAP) > ms_to_27mhz(PMT_TIMEOUT_MS) {
                    debug!(program = program.number, "PMT overdue");
                    record_error(errors, info, ErrorKind::Pmt);
                    program.pmt.last_seen = Some(now);
                }
            }
        }
    }
}
