//! Transport packet framing and the fixed 4-byte header.

use bitstream_io::{BigEndian, BitRead, BitReader};
use serde::Serialize;

use crate::constants::*;
use crate::{Result, TsError};

/// On-the-wire packet layouts accepted by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PacketFormat {
    /// Bare 188-byte packets.
    Plain,
    /// 4-byte arrival timestamp followed by the packet (M2TS).
    Timestamped,
    /// Packet followed by 16 Reed-Solomon bytes.
    Fec,
}

impl PacketFormat {
    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            TS_PACKET_SIZE => Some(Self::Plain),
            TS_TIMESTAMPED_PACKET_SIZE => Some(Self::Timestamped),
            TS_FEC_PACKET_SIZE => Some(Self::Fec),
            _ => None,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::Plain => TS_PACKET_SIZE,
            Self::Timestamped => TS_TIMESTAMPED_PACKET_SIZE,
            Self::Fec => TS_FEC_PACKET_SIZE,
        }
    }

    /// Offset of the sync byte within one unit of this format.
    pub fn sync_offset(self) -> usize {
        match self {
            Self::Timestamped => 4,
            Self::Plain | Self::Fec => 0,
        }
    }

    /// Guesses the framing from the first bytes of a capture by looking for
    /// three sync bytes at the format's stride.
    pub fn detect(data: &[u8]) -> Option<Self> {
        [Self::Plain, Self::Timestamped, Self::Fec]
            .into_iter()
            .find(|format| {
                (0..3).all(|i| {
                    data.get(format.sync_offset() + i * format.size()) == Some(&TS_SYNC_BYTE)
                })
            })
    }
}

/// One input unit split into the 188-byte packet and its side channels.
#[derive(Debug, Clone, Copy)]
pub struct RawPacket<'a> {
    pub format: PacketFormat,
    pub bytes: &'a [u8],
    /// 30-bit 27 MHz arrival stamp of a [`PacketFormat::Timestamped`] unit.
    pub arrival_stamp: Option<u32>,
    pub fec: Option<&'a [u8]>,
}

impl<'a> RawPacket<'a> {
    pub fn split(data: &'a [u8]) -> Result<Self> {
        let format = PacketFormat::from_len(data.len())
            .ok_or(TsError::InvalidPacketSize(data.len()))?;
        let packet = match format {
            PacketFormat::Plain => RawPacket {
                format,
                bytes: data,
                arrival_stamp: None,
                fec: None,
            },
            PacketFormat::Timestamped => {
                let prefix = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                RawPacket {
                    format,
                    bytes: &data[4..],
                    arrival_stamp: Some(prefix & 0x3FFF_FFFF),
                    fec: None,
                }
            }
            PacketFormat::Fec => RawPacket {
                format,
                bytes: &data[..TS_PACKET_SIZE],
                arrival_stamp: None,
                fec: Some(&data[TS_PACKET_SIZE..]),
            },
        };
        Ok(packet)
    }
}

/// Fixed transport packet header (ISO 13818-1 2.4.3.2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TsHeader {
    pub transport_error_indicator: bool,
    pub payload_unit_start_indicator: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub transport_scrambling_control: u8,
    pub adaptation_field_control: u8,
    pub continuity_counter: u8,
}

impl TsHeader {
    /// Decodes the header of a packet starting at its sync byte.
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < 4 {
            return Err(TsError::InsufficientData {
                expected: 4,
                actual: packet.len(),
            });
        }
        if packet[0] != TS_SYNC_BYTE {
            return Err(TsError::InvalidSyncByte(packet[0]));
        }

        let mut br = BitReader::endian(&packet[1..4], BigEndian);
        Ok(TsHeader {
            transport_error_indicator: br.read_bit()?,
            payload_unit_start_indicator: br.read_bit()?,
            transport_priority: br.read_bit()?,
            pid: br.read::<13, u16>()?,
            transport_scrambling_control: br.read::<2, u8>()?,
            adaptation_field_control: br.read::<2, u8>()?,
            continuity_counter: br.read::<4, u8>()?,
        })
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0b01 != 0
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0b10 != 0
    }

    pub fn is_scrambled(&self) -> bool {
        self.transport_scrambling_control != 0
    }
}
