use super::*;
use crate::adaptation_field::tests::encode_pcr;
use crate::pes::tests::make_pes_with_pts;
use crate::psi::section::tests::build_section;

const PMT_PID: u16 = 0x0100;
const VIDEO_PID: u16 = 0x0101;
const AUDIO_PID: u16 = 0x0102;

pub(crate) fn ts_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![
        TS_SYNC_BYTE,
        ((pusi as u8) << 6) | (pid >> 8) as u8 & 0x1F,
        pid as u8,
        0x10 | (cc & 0x0F),
    ];
    packet.extend_from_slice(payload);
    packet.resize(TS_PACKET_SIZE, 0xFF);
    packet
}

/// One section starting right after a zero pointer_field.
pub(crate) fn section_packet(pid: u16, cc: u8, section: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x00];
    payload.extend_from_slice(section);
    ts_packet(pid, true, cc, &payload)
}

/// Adaptation-only packet carrying a PCR.
pub(crate) fn pcr_packet(pid: u16, cc: u8, pcr: u64, discontinuity: bool) -> Vec<u8> {
    let mut packet = vec![
        TS_SYNC_BYTE,
        (pid >> 8) as u8 & 0x1F,
        pid as u8,
        0x20 | (cc & 0x0F),
        183,
        0x10 | ((discontinuity as u8) << 7),
    ];
    packet.extend_from_slice(&encode_pcr(pcr));
    packet.resize(TS_PACKET_SIZE, 0xFF);
    packet
}

pub(crate) fn pat_section(version: u8, programs: &[(u16, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    for &(number, pid) in programs {
        body.extend_from_slice(&number.to_be_bytes());
        body.extend_from_slice(&(0xE000 | pid).to_be_bytes());
    }
    build_section(TABLE_ID_PAT, 1, version, 0, 0, &body)
}

pub(crate) fn pmt_section(number: u16, es_info_extra: usize) -> Vec<u8> {
    let mut body = vec![0xE1, 0x01, 0xF0, 0x00];
    body.extend_from_slice(&[0x1B, 0xE1, 0x01]);
    if es_info_extra > 0 {
        let es_info_len = es_info_extra + 2;
        body.extend_from_slice(&[0xF0 | (es_info_len >> 8) as u8, es_info_len as u8]);
        body.extend_from_slice(&[0x05, es_info_extra as u8]);
        body.extend(std::iter::repeat_n(0x41, es_info_extra));
    } else {
        body.extend_from_slice(&[0xF0, 0x00]);
    }
    body.extend_from_slice(&[0x0F, 0xE1, 0x02, 0xF0, 0x00]);
    build_section(TABLE_ID_PMT, number, 0, 0, 0, &body)
}

fn cat_section(ca_system_id: u16, emm_pid: u16) -> Vec<u8> {
    let mut body = vec![0x09, 0x04];
    body.extend_from_slice(&ca_system_id.to_be_bytes());
    body.extend_from_slice(&(0xE000 | emm_pid).to_be_bytes());
    build_section(TABLE_ID_CAT, 0xFFFF, 0, 0, 0, &body)
}

fn sdt_section(ts_id: u16, service_id: u16, name: &[u8]) -> Vec<u8> {
    let mut descriptor = vec![0x48, 3 + name.len() as u8, 0x01, 0x00, name.len() as u8];
    descriptor.extend_from_slice(name);
    // original_network_id 1, then one running service
    let mut body = vec![0x00, 0x01, 0xFF];
    body.extend_from_slice(&service_id.to_be_bytes());
    body.extend_from_slice(&[0xFD, 0x80, descriptor.len() as u8]);
    body.extend_from_slice(&descriptor);
    build_section(TABLE_ID_SDT_ACTUAL, ts_id, 0, 0, 0, &body)
}

fn scrambled(mut packet: Vec<u8>) -> Vec<u8> {
    packet[3] |= 0x80;
    packet
}

fn feed(processor: &mut PacketProcessor, packet: &[u8]) -> PacketInfo {
    processor
        .ingest(packet, &PacketMeta::default())
        .unwrap()
        .clone()
}

fn feed_at(processor: &mut PacketProcessor, packet: &[u8], address: u64) -> PacketInfo {
    let meta = PacketMeta {
        address: Some(address),
        ..Default::default()
    };
    processor.ingest(packet, &meta).unwrap().clone()
}

fn feed_arrival(processor: &mut PacketProcessor, packet: &[u8], ms: u64, extra: u64) -> PacketInfo {
    let meta = PacketMeta {
        arrival: Some(Arrival {
            ticks: ms * PCR_TICKS_PER_MS + extra,
            wrap: PCR_WRAP,
        }),
        ..Default::default()
    };
    processor.ingest(packet, &meta).unwrap().clone()
}

fn bootstrapped() -> PacketProcessor {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)])));
    feed(&mut processor, &section_packet(PMT_PID, 0, &pmt_section(1, 0)));
    processor
}

#[test]
fn test_bootstrap_states() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    assert_eq!(processor.state(), ParseState::NextPat);

    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)])));
    assert_eq!(processor.state(), ParseState::NextPmt);
    assert_eq!(processor.transport_stream_id(), Some(1));
    assert_eq!(processor.pid(PMT_PID).unwrap().kind, PidKind::Pmt);
    assert!(!processor.program(1).unwrap().is_parsed);

    feed(&mut processor, &section_packet(PMT_PID, 0, &pmt_section(1, 0)));
    assert_eq!(processor.state(), ParseState::NextPkt);

    let program = processor.program(1).unwrap();
    assert_eq!(program.pcr_pid, Some(VIDEO_PID));
    let pids: Vec<u16> = program.elements.iter().map(|e| e.pid).collect();
    assert_eq!(pids, vec![VIDEO_PID, AUDIO_PID]);

    let video = processor.pid(VIDEO_PID).unwrap();
    assert_eq!(video.kind, PidKind::Video);
    assert!(video.carries_pcr && video.is_element);
    assert_eq!(processor.pid(AUDIO_PID).unwrap().kind, PidKind::Audio);
    assert_eq!(processor.errors().total(), 0);
    // PAT and PMT sections are retained
    assert_eq!(processor.arena().live_blocks(), 2);
}

#[test]
fn test_program_less_pat_completes_bootstrap() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(0, 0x0010)])));
    assert_eq!(processor.state(), ParseState::NextPkt);
    assert_eq!(processor.network_pid(), Some(0x0010));
    assert_eq!(processor.errors().nit_pid_errors, 0);
}

#[test]
fn test_section_spanning_packets() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)])));

    let pmt = pmt_section(1, 200);
    assert!(pmt.len() > 183);
    feed(&mut processor, &section_packet(PMT_PID, 0, &pmt[..183]));
    assert_eq!(processor.state(), ParseState::NextPmt);
    feed(&mut processor, &ts_packet(PMT_PID, false, 1, &pmt[183..]));
    assert_eq!(processor.state(), ParseState::NextPkt);

    let program = processor.program(1).unwrap();
    assert_eq!(program.element(VIDEO_PID).unwrap().es_info.len(), 202);
    // fragments were joined and freed
    assert_eq!(processor.arena().live_blocks(), 2);
    assert_eq!(processor.errors().total(), 0);
}

#[test]
fn test_pointer_field_overrun() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    let info = feed(&mut processor, &ts_packet(PID_PAT, true, 0, &[200]));
    assert_eq!(info.errors, vec![ErrorKind::PointerField]);
    assert_eq!(processor.state(), ParseState::NextPat);
}

#[test]
fn test_crc_error_discards_section() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    let mut pat = pat_section(0, &[(1, PMT_PID)]);
    let last = pat.len() - 1;
    pat[last] ^= 0x01;
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat));
    assert_eq!(processor.errors().crc_errors, 1);
    assert_eq!(processor.state(), ParseState::NextPat);
    assert!(processor.arena().is_pristine());
}

#[test]
fn test_wrong_table_on_pat_pid() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pmt_section(1, 0)));
    assert_eq!(processor.errors().pat_errors, 1);
}

#[test]
fn test_changed_table_is_counted_not_applied() {
    let mut processor = bootstrapped();
    feed(
        &mut processor,
        &section_packet(PID_PAT, 1, &pat_section(1, &[(2, 0x0200)])),
    );
    assert_eq!(processor.table_changes().pat, 1);
    assert!(processor.program(2).is_none());
    assert_eq!(processor.state(), ParseState::NextPkt);

    // an identical repeat is neither a change nor an error
    feed(
        &mut processor,
        &section_packet(PID_PAT, 2, &pat_section(0, &[(1, PMT_PID)])),
    );
    assert_eq!(processor.table_changes().pat, 1);
    assert_eq!(processor.errors().total(), 0);
}

#[test]
fn test_pat_version_change_restarts_when_invalidating() {
    let config = ProcessorConfig {
        invalidate_on_version_change: true,
        ..Default::default()
    };
    let mut processor = PacketProcessor::new(config).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)])));
    feed(&mut processor, &section_packet(PMT_PID, 0, &pmt_section(1, 0)));
    assert_eq!(processor.state(), ParseState::NextPkt);

    feed(
        &mut processor,
        &section_packet(PID_PAT, 1, &pat_section(1, &[(2, 0x0200)])),
    );
    assert_eq!(processor.state(), ParseState::NextPmt);
    assert!(processor.program(1).is_none());
    assert_eq!(processor.program(2).unwrap().pmt_pid, 0x0200);
    assert_eq!(processor.table_changes().pat, 0);
}

#[test]
fn test_continuity_loss_and_duplicate() {
    let mut processor = bootstrapped();
    feed(&mut processor, &ts_packet(AUDIO_PID, false, 0, &[]));
    feed(&mut processor, &ts_packet(AUDIO_PID, false, 1, &[]));
    let duplicate = feed(&mut processor, &ts_packet(AUDIO_PID, false, 1, &[]));
    assert!(duplicate.duplicate);
    assert!(duplicate.payload.is_none());
    assert!(duplicate.errors.is_empty());

    let lost = feed(&mut processor, &ts_packet(AUDIO_PID, false, 3, &[]));
    assert_eq!(lost.lost, 1);
    assert_eq!(lost.errors, vec![ErrorKind::ContinuityCount]);
    assert_eq!(processor.errors().continuity_counter_errors, 1);
}

#[test]
fn test_pcr_discontinuity_byte_mode() {
    let mut processor = bootstrapped();
    let step = 10 * PCR_TICKS_PER_MS;
    for k in 0..3u64 {
        let info = feed_at(&mut processor, &pcr_packet(VIDEO_PID, 0, k * step, false), k * 1880);
        assert!(info.errors.is_empty(), "PCR {k}: {:?}", info.errors);
    }
    assert!(processor.program(1).unwrap().is_stc_sync);
    assert_eq!(processor.last_info().pcr_jitter, Some(0));
    // 10 ms over ten packets
    assert_eq!(processor.program(1).unwrap().bitrate, Some(1_504_000));

    let jump = feed_at(
        &mut processor,
        &pcr_packet(VIDEO_PID, 0, 2 * step + 200 * PCR_TICKS_PER_MS, false),
        3 * 1880,
    );
    assert!(jump.errors.contains(&ErrorKind::PcrDiscontinuity));
    assert!(!processor.program(1).unwrap().is_stc_sync);
}

#[test]
fn test_pcr_discontinuity_indicator_suppresses_check() {
    let mut processor = bootstrapped();
    let step = 10 * PCR_TICKS_PER_MS;
    feed_at(&mut processor, &pcr_packet(VIDEO_PID, 0, 0, false), 0);
    feed_at(&mut processor, &pcr_packet(VIDEO_PID, 0, step, false), 1880);
    let info = feed_at(
        &mut processor,
        &pcr_packet(VIDEO_PID, 0, 900 * PCR_TICKS_PER_MS, true),
        3760,
    );
    assert!(!info.errors.contains(&ErrorKind::PcrDiscontinuity));
}

#[test]
fn test_pcr_repetition_byte_mode() {
    let mut processor = bootstrapped();
    let step = 50 * PCR_TICKS_PER_MS;
    feed_at(&mut processor, &pcr_packet(VIDEO_PID, 0, 0, false), 0);
    feed_at(&mut processor, &pcr_packet(VIDEO_PID, 0, step, false), 9400);
    let info = feed_at(&mut processor, &pcr_packet(VIDEO_PID, 0, 2 * step, false), 18800);
    assert_eq!(info.errors, vec![ErrorKind::PcrRepetition]);
}

#[test]
fn test_pcr_accuracy_arrival_mode() {
    let mut processor = bootstrapped();
    let ms = PCR_TICKS_PER_MS;
    let first = feed_arrival(&mut processor, &pcr_packet(VIDEO_PID, 0, 0, false), 0, 0);
    assert!(first.errors.is_empty());
    // one PCR locks against the arrival clock
    assert!(processor.program(1).unwrap().is_stc_sync);

    let on_time = feed_arrival(&mut processor, &pcr_packet(VIDEO_PID, 0, 40 * ms, false), 40, 0);
    assert!(on_time.errors.is_empty(), "{:?}", on_time.errors);
    assert_eq!(on_time.pcr_jitter, Some(0));

    let late = feed_arrival(&mut processor, &pcr_packet(VIDEO_PID, 0, 80 * ms + 20, false), 80, 0);
    assert_eq!(late.errors, vec![ErrorKind::PcrAccuracy]);
    assert_eq!(late.pcr_jitter, Some(20));
}

#[test]
fn test_wild_pcr() {
    let mut processor = bootstrapped();
    let info = feed(&mut processor, &pcr_packet(0x0300, 0, 1000, false));
    assert_eq!(info.errors, vec![ErrorKind::WildPcr]);
}

#[test]
fn test_pes_header_and_es_range() {
    let mut processor = bootstrapped();
    let info = feed(
        &mut processor,
        &ts_packet(VIDEO_PID, true, 0, &make_pes_with_pts(0xE0, 90_000)),
    );
    assert_eq!(info.pes.as_ref().and_then(|pes| pes.pts), Some(90_000));
    assert_eq!(info.es_payload, Some(18..TS_PACKET_SIZE));

    let element = processor.program(1).unwrap().element(VIDEO_PID).unwrap();
    assert_eq!(element.last_pts, Some(90_000));
    assert!(element.align);

    let bad = feed(&mut processor, &ts_packet(VIDEO_PID, true, 1, &[0, 0, 2, 0xE0]));
    assert_eq!(bad.errors, vec![ErrorKind::Pes]);
}

#[test]
fn test_align_only_waits_for_pes_start() {
    let config = ProcessorConfig {
        align_only: true,
        ..Default::default()
    };
    let mut processor = PacketProcessor::new(config).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)])));
    feed(&mut processor, &section_packet(PMT_PID, 0, &pmt_section(1, 0)));

    let before = feed(&mut processor, &ts_packet(AUDIO_PID, false, 0, &[]));
    assert!(before.es_payload.is_none());
    feed(
        &mut processor,
        &ts_packet(AUDIO_PID, true, 1, &make_pes_with_pts(0xC0, 0)),
    );
    let after = feed(&mut processor, &ts_packet(AUDIO_PID, false, 2, &[]));
    assert_eq!(after.es_payload, Some(4..TS_PACKET_SIZE));
}

#[test]
fn test_sync_hysteresis() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    let good = ts_packet(PID_NULL, false, 0, &[]);
    let mut bad = good.clone();
    bad[0] = 0x00;

    for _ in 0..4 {
        feed(&mut processor, &good);
    }
    assert!(!processor.is_sync_locked());
    feed(&mut processor, &good);
    assert!(processor.is_sync_locked());

    feed(&mut processor, &bad);
    assert!(processor.is_sync_locked());
    let info = feed(&mut processor, &bad);
    assert!(!processor.is_sync_locked());
    assert_eq!(info.errors, vec![ErrorKind::SyncByte, ErrorKind::SyncLoss]);
    assert_eq!(processor.errors().sync_byte_errors, 2);
}

#[test]
fn test_transport_error_skips_payload() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    let mut packet = section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)]));
    packet[1] |= 0x80;
    let info = feed(&mut processor, &packet);
    assert_eq!(info.errors, vec![ErrorKind::Transport]);
    assert!(info.payload.is_none());
    assert_eq!(processor.state(), ParseState::NextPat);
}

#[test]
fn test_pat_repetition_timeout() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    let pat = section_packet(PID_PAT, 0, &pat_section(0, &[]));
    feed_arrival(&mut processor, &pat, 0, 0);
    let quiet = feed_arrival(&mut processor, &ts_packet(PID_NULL, false, 0, &[]), 400, 0);
    assert!(quiet.errors.is_empty());
    let late = feed_arrival(&mut processor, &ts_packet(PID_NULL, false, 0, &[]), 600, 0);
    assert_eq!(late.errors, vec![ErrorKind::Pat]);
}

#[test]
fn test_arena_exhaustion_drops_section() {
    let config = ProcessorConfig {
        arena_max_order: 8,
        arena_min_order: 6,
        ..Default::default()
    };
    let mut processor = PacketProcessor::new(config).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)])));

    let pmt = pmt_section(1, 200);
    let info = feed(&mut processor, &section_packet(PMT_PID, 0, &pmt[..183]));
    assert_eq!(info.errors, vec![ErrorKind::Allocation]);
    feed(&mut processor, &ts_packet(PMT_PID, false, 1, &pmt[183..]));
    assert_eq!(processor.state(), ParseState::NextPmt);
    assert_eq!(processor.arena().live_blocks(), 1);
}

#[test]
fn test_reset_keeps_error_totals() {
    let mut processor = bootstrapped();
    feed(&mut processor, &ts_packet(PID_PAT, true, 1, &[200]));
    processor.reset();
    assert_eq!(processor.state(), ParseState::NextPat);
    assert_eq!(processor.programs().count(), 0);
    assert!(processor.arena().is_pristine());
    assert_eq!(processor.errors().pointer_field_errors, 1);
    processor.clear_errors();
    assert_eq!(processor.errors().total(), 0);
}

#[test]
fn test_tidy_rebuilds_pid_set() {
    let mut processor = bootstrapped();
    feed(&mut processor, &ts_packet(0x0777, false, 0, &[]));
    assert!(processor.pid(0x0777).is_some());

    processor.tidy();
    let pids: Vec<u16> = processor.pids().map(|p| p.pid).collect();
    assert_eq!(pids, vec![PID_PAT, PMT_PID, VIDEO_PID, AUDIO_PID]);
    assert_eq!(processor.state(), ParseState::NextPkt);
    assert!(processor.pid(VIDEO_PID).unwrap().carries_pcr);
}

#[test]
fn test_rejects_bad_unit_size() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    assert!(processor.ingest(&[0x47; 100], &PacketMeta::default()).is_err());
    assert_eq!(processor.packets(), 0);
}

#[test]
fn test_transport_error_counts_fault_once() {
    let mut processor = bootstrapped();
    feed(&mut processor, &ts_packet(AUDIO_PID, false, 0, &[]));
    feed(&mut processor, &ts_packet(AUDIO_PID, false, 1, &[]));

    let mut errored = ts_packet(AUDIO_PID, false, 2, &[]);
    errored[1] |= 0x80;
    assert_eq!(feed(&mut processor, &errored).errors, vec![ErrorKind::Transport]);

    let next = feed(&mut processor, &ts_packet(AUDIO_PID, false, 3, &[]));
    assert!(next.errors.is_empty(), "{:?}", next.errors);
    assert_eq!(processor.errors().continuity_counter_errors, 0);
}

#[test]
fn test_cat_registers_emm_streams() {
    let mut processor = bootstrapped();
    let info = feed(&mut processor, &scrambled(ts_packet(AUDIO_PID, false, 0, &[])));
    assert_eq!(info.errors, vec![ErrorKind::Cat]);

    feed(&mut processor, &section_packet(PID_CAT, 0, &cat_section(0x0604, 0x0050)));
    assert!(processor.cat_seen());
    assert_eq!(processor.pid(0x0050).unwrap().kind, PidKind::Emm);
    let ca: Vec<(u16, u16)> = processor
        .ca()
        .map(|entry| (entry.ca_system_id, entry.pid))
        .collect();
    assert_eq!(ca, vec![(0x0604, 0x0050)]);

    // scrambling is expected once a CAT announced the CA system
    let info = feed(&mut processor, &scrambled(ts_packet(AUDIO_PID, false, 1, &[])));
    assert!(info.errors.is_empty(), "{:?}", info.errors);
    assert_eq!(processor.errors().cat_errors, 1);
}

#[test]
fn test_sdt_names_services() {
    let mut processor = bootstrapped();
    let info = feed(&mut processor, &section_packet(PID_SDT, 0, &sdt_section(1, 1, b"News")));
    assert!(info.errors.is_empty(), "{:?}", info.errors);
    let program = processor.program(1).unwrap();
    assert_eq!(&program.service_name[..], b"News");
    assert_eq!(program.service_type, Some(0x01));
}

#[test]
fn test_sdt_for_another_transport_stream_is_rejected() {
    let mut processor = bootstrapped();
    let info = feed(&mut processor, &section_packet(PID_SDT, 0, &sdt_section(2, 1, b"Other")));
    assert_eq!(info.errors, vec![ErrorKind::SdtTransportId]);
    assert!(processor.program(1).unwrap().service_name.is_empty());
    // only the PAT and PMT sections remain
    assert_eq!(processor.arena().live_blocks(), 2);
}

#[test]
fn test_new_unit_abandons_partial_section() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)])));
    let long = pmt_section(1, 200);
    feed(&mut processor, &section_packet(PMT_PID, 0, &long[..183]));
    // PAT plus the pending fragment
    assert_eq!(processor.arena().live_blocks(), 2);

    feed(&mut processor, &section_packet(PMT_PID, 1, &pmt_section(1, 0)));
    assert_eq!(processor.state(), ParseState::NextPkt);
    let element = processor.program(1).unwrap().element(VIDEO_PID).unwrap();
    assert!(element.es_info.is_empty());
    assert_eq!(processor.arena().live_blocks(), 2);
    assert_eq!(processor.errors().total(), 0);
}

#[test]
fn test_section_length_limits() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)])));

    // section_length 1022 without the private indicator
    let info = feed(&mut processor, &ts_packet(PMT_PID, true, 0, &[0x00, 0x02, 0xB3, 0xFE]));
    assert_eq!(info.errors, vec![ErrorKind::SectionLength]);
    assert_eq!(processor.arena().live_blocks(), 1);

    // private sections may run to 4093
    let info = feed(&mut processor, &ts_packet(PMT_PID, true, 1, &[0x00, 0x02, 0xF3, 0xFE]));
    assert!(info.errors.is_empty(), "{:?}", info.errors);
    assert_eq!(processor.arena().live_blocks(), 2);

    let info = feed(&mut processor, &ts_packet(PMT_PID, true, 2, &[0x00, 0x02, 0xFF, 0xFF]));
    assert_eq!(info.errors, vec![ErrorKind::SectionLength]);
    assert_eq!(processor.arena().live_blocks(), 1);
    assert_eq!(processor.errors().section_length_errors, 2);
}

#[test]
fn test_malformed_pmt_descriptor() {
    let mut processor = PacketProcessor::new(ProcessorConfig::default()).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)])));

    // program_info holds a zero-length descriptor with the forbidden tag
    let body = [0xE1, 0x01, 0xF0, 0x02, 0xFF, 0x00, 0x1B, 0xE1, 0x01, 0xF0, 0x00];
    let pmt = build_section(TABLE_ID_PMT, 1, 0, 0, 0, &body);
    let info = feed(&mut processor, &section_packet(PMT_PID, 0, &pmt));
    assert_eq!(info.errors, vec![ErrorKind::Descriptor]);
    assert!(!processor.program(1).unwrap().is_parsed);
    assert_eq!(processor.state(), ParseState::NextPmt);
    assert_eq!(processor.arena().live_blocks(), 1);
}

#[test]
fn test_undecoded_tables_are_not_retained() {
    let config = ProcessorConfig {
        arena_max_order: 12,
        arena_min_order: 6,
        ..Default::default()
    };
    let mut processor = PacketProcessor::new(config).unwrap();
    feed(&mut processor, &section_packet(PID_PAT, 0, &pat_section(0, &[(1, PMT_PID)])));
    feed(&mut processor, &section_packet(PMT_PID, 0, &pmt_section(1, 0)));
    assert_eq!(processor.arena().live_blocks(), 2);

    // EIT present/following from many services, section numbers colliding
    let body = [0x5A; 150];
    for k in 0..40u8 {
        let eit = build_section(0x4E, 0x0100 + k as u16, 0, k % 2, 1, &body);
        let info = feed(&mut processor, &section_packet(PID_EIT, k, &eit));
        assert!(info.errors.is_empty(), "EIT {k}: {:?}", info.errors);
    }
    assert_eq!(processor.arena().live_blocks(), 2);
    assert_eq!(processor.table_changes(), &TableChanges::default());

    let mut corrupt = build_section(0x4E, 0x0100, 0, 0, 1, &body);
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0x01;
    let info = feed(&mut processor, &section_packet(PID_EIT, 40, &corrupt));
    assert_eq!(info.errors, vec![ErrorKind::Crc]);
    assert_eq!(processor.arena().live_blocks(), 2);
}
