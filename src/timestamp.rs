//! Modular arithmetic over wrapping clock counters.
//!
//! PCR values wrap at `2^33 * 300`, PTS/DTS at `2^33`, arrival stamps of
//! 192-byte packets at `2^30`. Every interval test in the processor goes
//! through [`ts_diff`] so that a wrap between two samples reads as a small
//! positive step instead of a huge negative one.

use crate::constants::{PCR_TICKS_PER_MS, PTS_CLOCK_HZ};

fn check_modulus(overflow: u64) {
    assert!(
        overflow > 0 && overflow % 2 == 0 && overflow <= i64::MAX as u64,
        "clock modulus must be even and positive, got {overflow}"
    );
}

/// `(t0 + delta) mod overflow`, normalised into `[0, overflow)`.
pub fn ts_add(t0: u64, delta: i64, overflow: u64) -> u64 {
    check_modulus(overflow);
    assert!(t0 < overflow, "timestamp {t0} outside [0, {overflow})");
    let sum = t0 as i128 + delta as i128;
    sum.rem_euclid(overflow as i128) as u64
}

/// Signed shortest distance from `t0` to `t1`, in `[-overflow/2, overflow/2)`.
pub fn ts_diff(t1: u64, t0: u64, overflow: u64) -> i64 {
    check_modulus(overflow);
    assert!(
        t0 < overflow && t1 < overflow,
        "timestamps {t1}/{t0} outside [0, {overflow})"
    );
    let half = (overflow / 2) as i128;
    let raw = t1 as i128 - t0 as i128;
    ((raw + half).rem_euclid(overflow as i128) - half) as i64
}

/// Splits a 27 MHz value into its 90 kHz base and 0..299 extension.
pub fn split_27mhz(ticks: u64) -> (u64, u16) {
    (ticks / 300, (ticks % 300) as u16)
}

pub fn ms_to_27mhz(ms: u64) -> i64 {
    (ms * PCR_TICKS_PER_MS) as i64
}

pub fn ms_to_90khz(ms: u64) -> i64 {
    (ms * PTS_CLOCK_HZ / 1000) as i64
}
