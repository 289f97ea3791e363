use bitstream_io::{BigEndian, BitRead, BitReader};
use serde::Serialize;

use crate::{Result, TsError};

/// Program Clock Reference from 6 bytes, as a 27 MHz value.
///
/// Layout: `base(33) | reserved(6) | extension(9)`
pub fn read_pcr(data: &[u8]) -> Result<u64> {
    let mut br = BitReader::endian(data, BigEndian);
    let base = br.read::<33, u64>()?;
    br.skip(6)?;
    let extension = br.read::<9, u64>()?;
    Ok(base * 300 + extension)
}

/// 33-bit timestamp split by marker bits, as in PES PTS/DTS and the
/// seamless splice `DTS_next_AU`: `prefix(4) | ts[32..30] | 1 | ts[29..15] | 1 | ts[14..0] | 1`
pub(crate) fn read_marked_timestamp<R: std::io::Read>(
    br: &mut BitReader<R, BigEndian>,
) -> Result<u64> {
    let high = br.read::<3, u64>()?;
    br.skip(1)?;
    let mid = br.read::<15, u64>()?;
    br.skip(1)?;
    let low = br.read::<15, u64>()?;
    br.skip(1)?;
    Ok((high << 30) | (mid << 15) | low)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeamlessSplice {
    pub splice_type: u8,
    pub dts_next_au: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdaptationFieldExtension {
    /// `(ltw_valid_flag, ltw_offset)`
    pub legal_time_window: Option<(bool, u16)>,
    pub piecewise_rate: Option<u32>,
    pub seamless_splice: Option<SeamlessSplice>,
}

/// Decoded adaptation field (ISO 13818-1 2.4.3.4).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdaptationField {
    pub length: u8,
    pub discontinuity_indicator: bool,
    pub random_access_indicator: bool,
    pub elementary_stream_priority_indicator: bool,
    /// 27 MHz
    pub pcr: Option<u64>,
    /// 27 MHz
    pub opcr: Option<u64>,
    pub splice_countdown: Option<i8>,
    pub transport_private_data: Option<Vec<u8>>,
    pub extension: Option<AdaptationFieldExtension>,
}

impl AdaptationField {
    /// Decodes the adaptation field starting at its length byte.
    ///
    /// `data` runs to the end of the packet. On success the field occupies
    /// exactly `1 + length` bytes whatever optional parts were present.
    pub fn parse(data: &[u8], has_payload: bool) -> Result<Self> {
        let Some(&length) = data.first() else {
            return Err(TsError::InsufficientData {
                expected: 1,
                actual: 0,
            });
        };
        let available = data.len() - 1;
        let len = length as usize;
        // without payload the field must fill the packet; with payload it
        // must leave at least one byte
        let fits = if has_payload {
            len < available
        } else {
            len == available
        };
        if !fits {
            return Err(TsError::AdaptationFieldLength {
                length: len,
                available,
            });
        }

        let mut field = AdaptationField {
            length,
            ..Default::default()
        };
        if len == 0 {
            return Ok(field);
        }

        let body = &data[1..1 + len];
        let overrun = || TsError::AdaptationFieldLength {
            length: len,
            available,
        };

        let flags = body[0];
        field.discontinuity_indicator = flags & 0x80 != 0;
        field.random_access_indicator = flags & 0x40 != 0;
        field.elementary_stream_priority_indicator = flags & 0x20 != 0;
        let pcr_flag = flags & 0x10 != 0;
        let opcr_flag = flags & 0x08 != 0;
        let splicing_point_flag = flags & 0x04 != 0;
        let private_data_flag = flags & 0x02 != 0;
        let extension_flag = flags & 0x01 != 0;

        let mut cursor = 1;
        if pcr_flag {
            let bytes = body.get(cursor..cursor + 6).ok_or_else(overrun)?;
            field.pcr = Some(read_pcr(bytes)?);
            cursor += 6;
        }
        if opcr_flag {
            let bytes = body.get(cursor..cursor + 6).ok_or_else(overrun)?;
            field.opcr = Some(read_pcr(bytes)?);
            cursor += 6;
        }
        if splicing_point_flag {
            let &countdown = body.get(cursor).ok_or_else(overrun)?;
            field.splice_countdown = Some(countdown as i8);
            cursor += 1;
        }
        if private_data_flag {
            let &private_len = body.get(cursor).ok_or_else(overrun)?;
            cursor += 1;
            let bytes = body
                .get(cursor..cursor + private_len as usize)
                .ok_or_else(overrun)?;
            field.transport_private_data = Some(bytes.to_vec());
            cursor += private_len as usize;
        }
        if extension_flag {
            let &ext_len = body.get(cursor).ok_or_else(overrun)?;
            cursor += 1;
            let ext = body
                .get(cursor..cursor + ext_len as usize)
                .ok_or_else(overrun)?;
            field.extension = Some(parse_extension(ext).map_err(|_| overrun())?);
        }
        // remaining bytes up to `length` are stuffing

        Ok(field)
    }
}

fn parse_extension(ext: &[u8]) -> Result<AdaptationFieldExtension> {
    let mut extension = AdaptationFieldExtension::default();
    if ext.is_empty() {
        return Ok(extension);
    }

    let mut br = BitReader::endian(ext, BigEndian);
    let ltw_flag = br.read_bit()?;
    let piecewise_rate_flag = br.read_bit()?;
    let seamless_splice_flag = br.read_bit()?;
    br.skip(5)?;

    if ltw_flag {
        let valid = br.read_bit()?;
        let offset = br.read::<15, u16>()?;
        extension.legal_time_window = Some((valid, offset));
    }
    if piecewise_rate_flag {
        br.skip(2)?;
        extension.piecewise_rate = Some(br.read::<22, u32>()?);
    }
    if seamless_splice_flag {
        let splice_type = br.read::<4, u8>()?;
        let dts_next_au = read_marked_timestamp(&mut br)?;
        extension.seamless_splice = Some(SeamlessSplice {
            splice_type,
            dts_next_au,
        });
    }
    Ok(extension)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn encode_pcr(pcr: u64) -> [u8; 6] {
        let base = pcr / 300;
        let ext = pcr % 300;
        [
            (base >> 25) as u8,
            (base >> 17) as u8,
            (base >> 9) as u8,
            (base >> 1) as u8,
            (((base & 1) as u8) << 7) | 0x7E | ((ext >> 8) as u8 & 0x01),
            ext as u8,
        ]
    }

    #[test]
    fn test_pcr_decode() {
        let pcr = 0x1_2345_6789 * 300 + 123;
        assert_eq!(read_pcr(&encode_pcr(pcr)).unwrap(), pcr);
        assert_eq!(read_pcr(&encode_pcr(0)).unwrap(), 0);
    }

    #[test]
    fn test_pcr_and_flags() {
        // length 7: flags + PCR, followed by one payload byte
        let mut data = vec![7, 0xD0];
        data.extend_from_slice(&encode_pcr(27_000_000));
        data.push(0xAA);
        let af = AdaptationField::parse(&data, true).unwrap();
        assert!(af.discontinuity_indicator);
        assert!(af.random_access_indicator);
        assert!(!af.elementary_stream_priority_indicator);
        assert_eq!(af.pcr, Some(27_000_000));
        assert_eq!(af.opcr, None);
    }

    #[test]
    fn test_optional_fields_and_stuffing() {
        // flags: splice + private + extension
        let mut data = vec![0, 0x07, 0xFD, 2, 0xAB, 0xCD, 4, 0x80, 0x80, 0x10];
        data.extend_from_slice(&[0xFF, 0xFF]); // stuffing
        data[0] = (data.len() - 1) as u8;
        let af = AdaptationField::parse(&data, false).unwrap();
        assert_eq!(af.splice_countdown, Some(-3));
        assert_eq!(af.transport_private_data.as_deref(), Some(&[0xAB, 0xCD][..]));
        let ext = af.extension.unwrap();
        assert_eq!(ext.legal_time_window, Some((true, 0x10)));
        assert_eq!(ext.piecewise_rate, None);
    }

    #[test]
    fn test_zero_length_field() {
        let af = AdaptationField::parse(&[0, 0x47, 0x00], true).unwrap();
        assert_eq!(af.length, 0);
        assert!(af.pcr.is_none());
    }

    #[test]
    fn test_length_overrun() {
        assert!(matches!(
            AdaptationField::parse(&[5, 0x00, 0x00], true),
            Err(TsError::AdaptationFieldLength { .. })
        ));
        // AF-only packet must fill the remainder
        assert!(AdaptationField::parse(&[1, 0x00, 0x00], false).is_err());
        // PCR flag set but field too short
        assert!(AdaptationField::parse(&[3, 0x10, 0x00, 0x00], false).is_err());
    }
}
