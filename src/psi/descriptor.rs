//! Descriptor loops and the two descriptors the tables act upon.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::constants::{DESCRIPTOR_CA, DESCRIPTOR_SERVICE};
use crate::{Result, TsError};

/// One `[tag][length][data]` entry of a descriptor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor<'a> {
    pub tag: u8,
    pub data: &'a [u8],
}

/// Strict iterator over a descriptor loop.
///
/// A forbidden tag (0xFF), a zero length or a length running past the loop
/// yields one `MalformedDescriptor` error and ends the iteration.
#[derive(Debug, Clone)]
pub struct Descriptors<'a> {
    data: &'a [u8],
}

impl<'a> Descriptors<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Descriptors { data }
    }
}

impl<'a> Iterator for Descriptors<'a> {
    type Item = Result<Descriptor<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let tag = self.data[0];
        let Some(&length) = self.data.get(1) else {
            self.data = &[];
            return Some(Err(TsError::MalformedDescriptor { tag, length: 0 }));
        };
        let length = length as usize;
        if tag == 0xFF || length == 0 || 2 + length > self.data.len() {
            self.data = &[];
            return Some(Err(TsError::MalformedDescriptor { tag, length }));
        }

        let descriptor = Descriptor {
            tag,
            data: &self.data[2..2 + length],
        };
        self.data = &self.data[2 + length..];
        Some(Ok(descriptor))
    }
}

/// CA_descriptor (tag 0x09): conditional access system and the PID of its
/// ECM (in a PMT) or EMM (in the CAT) stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaDescriptor {
    pub ca_system_id: u16,
    pub ca_pid: u16,
}

impl CaDescriptor {
    pub fn parse(descriptor: &Descriptor<'_>) -> Result<Self> {
        let data = descriptor.data;
        if descriptor.tag != DESCRIPTOR_CA || data.len() < 4 {
            return Err(TsError::MalformedDescriptor {
                tag: descriptor.tag,
                length: data.len(),
            });
        }
        Ok(CaDescriptor {
            ca_system_id: u16::from_be_bytes([data[0], data[1]]),
            ca_pid: u16::from_be_bytes([data[2] & 0x1F, data[3]]),
        })
    }
}

/// Collects the CA descriptors of a loop, failing on the first malformed entry.
pub fn ca_descriptors(data: &[u8]) -> Result<Vec<CaDescriptor>> {
    let mut found = Vec::new();
    for descriptor in Descriptors::new(data) {
        let descriptor = descriptor?;
        if descriptor.tag == DESCRIPTOR_CA {
            found.push(CaDescriptor::parse(&descriptor)?);
        }
    }
    Ok(found)
}

/// service_descriptor (tag 0x48, EN 300 468 6.2.33). Names are kept as the
/// raw bytes of the stream; no character set conversion is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_type: u8,
    pub provider_name: Bytes,
    pub service_name: Bytes,
}

impl ServiceDescriptor {
    pub fn parse(descriptor: &Descriptor<'_>) -> Result<Self> {
        let data = descriptor.data;
        let malformed = || TsError::MalformedDescriptor {
            tag: descriptor.tag,
            length: data.len(),
        };
        if descriptor.tag != DESCRIPTOR_SERVICE || data.len() < 2 {
            return Err(malformed());
        }

        let provider_len = data[1] as usize;
        let provider = data.get(2..2 + provider_len).ok_or_else(malformed)?;
        let &name_len = data.get(2 + provider_len).ok_or_else(malformed)?;
        let name_start = 3 + provider_len;
        let name = data
            .get(name_start..name_start + name_len as usize)
            .ok_or_else(malformed)?;

        Ok(ServiceDescriptor {
            service_type: data[0],
            provider_name: Bytes::copy_from_slice(provider),
            service_name: Bytes::copy_from_slice(name),
        })
    }
}
