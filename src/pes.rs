use bitstream_io::{BigEndian, BitRead, BitReader};
use serde::Serialize;

use crate::adaptation_field::read_marked_timestamp;
use crate::constants::PES_START_CODE;
use crate::{Result, TsError};

/// Video stream ID range (0xE0..=0xEF)
pub const STREAM_ID_VIDEO_MIN: u8 = 0xE0;
pub const STREAM_ID_VIDEO_MAX: u8 = 0xEF;
/// Audio stream ID range (0xC0..=0xDF)
pub const STREAM_ID_AUDIO_MIN: u8 = 0xC0;
pub const STREAM_ID_AUDIO_MAX: u8 = 0xDF;
pub const STREAM_ID_PADDING: u8 = 0xBE;

/// Stream ids whose PES packets carry no optional header: the bytes after
/// `PES_packet_length` are opaque (ISO 13818-1 Table 2-21).
fn has_optional_pes_header(stream_id: u8) -> bool {
    !matches!(
        stream_id,
        0xBC   // program_stream_map
        | 0xBE // padding_stream
        | 0xBF // private_stream_2
        | 0xF0 // ECM_stream
        | 0xF1 // EMM_stream
        | 0xF2 // DSMCC_stream
        | 0xF8 // ITU-T Rec. H.222.1 type E
        | 0xFF // program_stream_directory
    )
}

/// ESCR as a 27 MHz value: `reserved(2) | base(33, marked) | ext(9) | 1`
fn read_escr<R: std::io::Read>(br: &mut BitReader<R, BigEndian>) -> Result<u64> {
    br.skip(2)?;
    let base = read_marked_timestamp(br)?;
    let extension = br.read::<9, u64>()?;
    br.skip(1)?;
    Ok(base * 300 + extension)
}

/// Decoded PES packet header (ISO 13818-1 2.4.3.6).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PesHeader {
    pub stream_id: u8,
    pub pes_packet_length: u16,
    pub scrambling_control: u8,
    pub priority: bool,
    pub data_alignment_indicator: bool,
    pub copyright: bool,
    pub original_or_copy: bool,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// 27 MHz
    pub escr: Option<u64>,
    pub es_rate: Option<u32>,
    pub trick_mode: Option<u8>,
    pub additional_copy_info: Option<u8>,
    pub previous_pes_crc: Option<u16>,
    pub pes_header_data_length: u8,
    /// Offset of the first elementary stream byte.
    pub payload_offset: usize,
}

impl PesHeader {
    /// Parses a PES header from bytes starting at the start code prefix.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 6 {
            return Err(TsError::InsufficientData {
                expected: 6,
                actual: data.len(),
            });
        }
        if data[..3] != PES_START_CODE {
            return Err(TsError::InvalidPesStartCode);
        }

        let stream_id = data[3];
        let pes_packet_length = u16::from_be_bytes([data[4], data[5]]);
        if !has_optional_pes_header(stream_id) {
            return Ok(PesHeader {
                stream_id,
                pes_packet_length,
                payload_offset: 6,
                ..Default::default()
            });
        }

        if data.len() < 9 {
            return Err(TsError::InsufficientData {
                expected: 9,
                actual: data.len(),
            });
        }
        if data[6] & 0xC0 != 0x80 {
            return Err(TsError::InvalidPesMarker(data[6]));
        }

        let header_len = data[8] as usize;
        let header_end = 9 + header_len;
        if header_end > data.len() {
            return Err(TsError::PesHeaderLength {
                declared: header_len,
                available: data.len() - 9,
            });
        }

        let flags = data[7];
        let pts_dts_flags = flags >> 6;
        if pts_dts_flags == 0b01 {
            return Err(TsError::InvalidPtsDtsFlags(pts_dts_flags));
        }

        let mut header = PesHeader {
            stream_id,
            pes_packet_length,
            scrambling_control: (data[6] >> 4) & 0x03,
            priority: data[6] & 0x08 != 0,
            data_alignment_indicator: data[6] & 0x04 != 0,
            copyright: data[6] & 0x02 != 0,
            original_or_copy: data[6] & 0x01 != 0,
            pes_header_data_length: data[8],
            payload_offset: header_end,
            ..Default::default()
        };

        // Optional fields only advance the reader; whatever they consume the
        // ES payload starts at `header_end`.
        let too_short = || TsError::PesHeaderLength {
            declared: header_len,
            available: data.len() - 9,
        };
        let mut br = BitReader::endian(&data[9..header_end], BigEndian);
        if pts_dts_flags & 0b10 != 0 {
            br.skip(4).map_err(|_| too_short())?;
            header.pts = Some(read_marked_timestamp(&mut br).map_err(|_| too_short())?);
        }
        if pts_dts_flags == 0b11 {
            br.skip(4).map_err(|_| too_short())?;
            header.dts = Some(read_marked_timestamp(&mut br).map_err(|_| too_short())?);
        }
        if flags & 0x20 != 0 {
            header.escr = Some(read_escr(&mut br).map_err(|_| too_short())?);
        }
        if flags & 0x10 != 0 {
            br.skip(1).map_err(|_| too_short())?;
            header.es_rate = Some(br.read::<22, u32>().map_err(|_| too_short())?);
            br.skip(1).map_err(|_| too_short())?;
        }
        if flags & 0x08 != 0 {
            header.trick_mode = Some(br.read::<8, u8>().map_err(|_| too_short())?);
        }
        if flags & 0x04 != 0 {
            br.skip(1).map_err(|_| too_short())?;
            header.additional_copy_info = Some(br.read::<7, u8>().map_err(|_| too_short())?);
        }
        if flags & 0x02 != 0 {
            header.previous_pes_crc = Some(br.read::<16, u16>().map_err(|_| too_short())?);
        }
        if flags & 0x01 != 0 {
            skip_pes_extension(&mut br).map_err(|_| too_short())?;
        }

        Ok(header)
    }

    pub fn is_video(&self) -> bool {
        (STREAM_ID_VIDEO_MIN..=STREAM_ID_VIDEO_MAX).contains(&self.stream_id)
    }

    pub fn is_audio(&self) -> bool {
        (STREAM_ID_AUDIO_MIN..=STREAM_ID_AUDIO_MAX).contains(&self.stream_id)
    }
}

fn skip_pes_extension<R: std::io::Read>(br: &mut BitReader<R, BigEndian>) -> Result<()> {
    let private_data_flag = br.read_bit()?;
    let pack_header_field_flag = br.read_bit()?;
    let sequence_counter_flag = br.read_bit()?;
    let p_std_buffer_flag = br.read_bit()?;
    br.skip(3)?;
    let extension_flag_2 = br.read_bit()?;

    if private_data_flag {
        br.skip(128)?;
    }
    if pack_header_field_flag {
        let pack_field_length = br.read::<8, u32>()?;
        br.skip(pack_field_length * 8)?;
    }
    if sequence_counter_flag {
        br.skip(16)?;
    }
    if p_std_buffer_flag {
        br.skip(16)?;
    }
    if extension_flag_2 {
        br.skip(1)?;
        let field_length = br.read::<7, u32>()?;
        br.skip(field_length * 8)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
        [
            (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 0x01,
            (ts >> 22) as u8,
            (((ts >> 15) as u8 & 0x7F) << 1) | 0x01,
            (ts >> 7) as u8,
            ((ts as u8 & 0x7F) << 1) | 0x01,
        ]
    }

    pub(crate) fn make_pes_with_pts(stream_id: u8, pts: u64) -> Vec<u8> {
        let mut data = vec![0x00, 0x00, 0x01, stream_id, 0x00, 0x00, 0x80, 0x80, 0x05];
        data.extend_from_slice(&encode_timestamp(0b0010, pts));
        data.extend_from_slice(&[0xDE, 0xAD]);
        data
    }

    #[test]
    fn test_pes_header_pts_only() {
        let header = PesHeader::parse(&make_pes_with_pts(0xE0, 90_000)).unwrap();
        assert_eq!(header.stream_id, 0xE0);
        assert!(header.is_video());
        assert_eq!(header.pts, Some(90_000));
        assert!(header.dts.is_none());
        assert_eq!(header.payload_offset, 14);
    }

    #[test]
    fn test_pes_header_pts_dts() {
        let mut data = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x84, 0xC0, 0x0A];
        data.extend_from_slice(&encode_timestamp(0b0011, 180_000));
        data.extend_from_slice(&encode_timestamp(0b0001, 90_000));
        data.push(0xFF);

        let header = PesHeader::parse(&data).unwrap();
        assert_eq!(header.pts, Some(180_000));
        assert_eq!(header.dts, Some(90_000));
        assert!(header.data_alignment_indicator);
        assert_eq!(header.payload_offset, 19);
    }

    #[test]
    fn test_max_pts() {
        let header = PesHeader::parse(&make_pes_with_pts(0xC0, 0x1_FFFF_FFFF)).unwrap();
        assert_eq!(header.pts, Some(0x1_FFFF_FFFF));
        assert!(header.is_audio());
    }

    #[test]
    fn test_cursor_forced_to_header_length() {
        // PTS plus three stuffing bytes inside the header
        let mut data = vec![0x00, 0x00, 0x01, 0xC0, 0x00, 0x00, 0x80, 0x80, 0x08];
        data.extend_from_slice(&encode_timestamp(0b0010, 1234));
        data.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0x11]);
        let header = PesHeader::parse(&data).unwrap();
        assert_eq!(header.payload_offset, 17);
        assert_eq!(data[header.payload_offset], 0x11);
    }

    #[test]
    fn test_optional_fields_walk() {
        // ES_rate + additional copy info + previous CRC
        let data = vec![
            0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x16, 0x06, //
            0x80, 0x00, 0x03, // ES_rate = 1
            0x85, // additional_copy_info = 5
            0x12, 0x34, // previous_PES_CRC
            0x77,
        ];
        let header = PesHeader::parse(&data).unwrap();
        assert_eq!(header.es_rate, Some(1));
        assert_eq!(header.additional_copy_info, Some(5));
        assert_eq!(header.previous_pes_crc, Some(0x1234));
        assert_eq!(header.payload_offset, 15);
    }

    #[test]
    fn test_invalid_start_code() {
        let data = vec![0x00, 0x00, 0x00, 0xE0, 0x00, 0x00];
        assert!(matches!(
            PesHeader::parse(&data),
            Err(TsError::InvalidPesStartCode)
        ));
    }

    #[test]
    fn test_forbidden_pts_dts_flags() {
        let data = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x40, 0x00];
        assert!(matches!(
            PesHeader::parse(&data),
            Err(TsError::InvalidPtsDtsFlags(0b01))
        ));
    }

    #[test]
    fn test_header_length_beyond_packet() {
        let data = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x00, 0x20, 0x00];
        assert!(matches!(
            PesHeader::parse(&data),
            Err(TsError::PesHeaderLength { declared: 0x20, .. })
        ));
    }

    #[test]
    fn test_padding_stream_is_opaque() {
        let data = vec![0x00, 0x00, 0x01, STREAM_ID_PADDING, 0x00, 0x04, 0xFF, 0xFF, 0xFF, 0xFF];
        let header = PesHeader::parse(&data).unwrap();
        assert_eq!(header.stream_id, STREAM_ID_PADDING);
        assert!(header.pts.is_none());
        assert_eq!(header.payload_offset, 6);
    }
}
