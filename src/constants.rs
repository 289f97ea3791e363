//! Constants for MPEG-TS processing and TR 101 290 compliance

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;
/// 188 bytes preceded by a 4-byte arrival timestamp (M2TS / BDAV)
pub const TS_TIMESTAMPED_PACKET_SIZE: usize = 192;
/// 188 bytes followed by 16 Reed-Solomon parity bytes
pub const TS_FEC_PACKET_SIZE: usize = 204;
pub const TS_FEC_SIZE: usize = TS_FEC_PACKET_SIZE - TS_PACKET_SIZE;

/// PES packet constants
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// Well-known PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_CAT: u16 = 0x0001;
pub const PID_TSDT: u16 = 0x0002;
pub const PID_NIT: u16 = 0x0010;
pub const PID_SDT: u16 = 0x0011;
pub const PID_EIT: u16 = 0x0012;
pub const PID_RST: u16 = 0x0013;
pub const PID_TDT: u16 = 0x0014;
pub const PID_NETWORK_SYNC: u16 = 0x0015;
pub const PID_USER_MIN: u16 = 0x0020;
pub const PID_NULL: u16 = 0x1FFF;

/// Table ids handled by the section layer
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_CAT: u8 = 0x01;
pub const TABLE_ID_PMT: u8 = 0x02;
pub const TABLE_ID_SDT_ACTUAL: u8 = 0x42;
pub const TABLE_ID_SDT_OTHER: u8 = 0x46;

/// Descriptor tags
pub const DESCRIPTOR_CA: u8 = 0x09;
pub const DESCRIPTOR_SERVICE: u8 = 0x48;

/// section_length limits (ISO 13818-1 2.4.4)
pub const MAX_SECTION_LENGTH: usize = 1021;
pub const MAX_PRIVATE_SECTION_LENGTH: usize = 4093;

/// PCR constants
pub const PCR_CLOCK_HZ: u64 = 27_000_000; // 27 MHz
pub const PCR_TICKS_PER_MS: u64 = PCR_CLOCK_HZ / 1000;
pub const PCR_WRAP: u64 = (1u64 << 33) * 300; // PCR wrap-around point
/// ±500 ns in PCR ticks
pub const PCR_ACCURACY_TICKS: i64 = 13;
/// TR 101 290 2.3a: PCR at least every 40 ms
pub const PCR_REPETITION_MS: u64 = 40;
/// TR 101 290 2.3b: consecutive PCR values at most 100 ms apart
pub const PCR_DISCONTINUITY_MS: u64 = 100;

/// PTS constants
pub const PTS_CLOCK_HZ: u64 = 90_000; // 90 kHz
pub const PTS_WRAP: u64 = 1u64 << 33; // 33-bit PTS counter
/// TR 101 290 2.5: PTS at least every 700 ms
pub const PTS_REPETITION_MS: u64 = 700;

/// 30-bit arrival timestamp carried in front of 192-byte packets
pub const ARRIVAL_STAMP_WRAP: u64 = 1u64 << 30;

/// TR 101 290 timeout constants (in milliseconds)
pub const PAT_TIMEOUT_MS: u64 = 500;
pub const PMT_TIMEOUT_MS: u64 = 500;

/// TR 101 290 sync acquisition: lost after 2 bad sync bytes, regained after 5 good
pub const SYNC_LOSS_THRESHOLD: u32 = 2;
pub const SYNC_ACQUIRE_THRESHOLD: u32 = 5;

/// Default statistics window
pub const STATS_INTERVAL_MS: u64 = 1000;

/// Default arena geometry: 4 MiB split down to 64-byte blocks
pub const ARENA_MAX_ORDER: u8 = 22;
pub const ARENA_MIN_ORDER: u8 = 6;
