//! Advertisement data parsing.
//!
//! Advertising payloads are a sequence of AD structures:
//! `[len][type][data; len - 1]`.  A zero length or a structure running past
//! the end of the buffer terminates parsing.

use btuuid::{BluetoothUuid, BluetoothUuid128};
use heapless::String;

use crate::error::Error;

/// Incomplete list of 128-bit service UUIDs.
pub const AD_TYPE_UUID128_SOME: u8 = 0x06;
/// Complete list of 128-bit service UUIDs.
pub const AD_TYPE_UUID128_ALL: u8 = 0x07;
/// Shortened local name.
pub const AD_TYPE_NAME_SHORT: u8 = 0x08;
/// Complete local name.
pub const AD_TYPE_NAME_COMPLETE: u8 = 0x09;

const UUID128_LEN: usize = 16;

/// One AD structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdElement<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

impl<'a> AdElement<'a> {
    /// Whether this element lists 128-bit service UUIDs.
    pub fn is_uuid128_list(&self) -> bool {
        matches!(self.ad_type, AD_TYPE_UUID128_SOME | AD_TYPE_UUID128_ALL)
    }

    /// The 128-bit UUIDs carried by a UUID list element, in advertised
    /// order.  The data must be a whole number of 16-byte UUIDs.
    pub fn uuid128s(&self) -> Result<Uuid128Iter<'a>, Error> {
        if self.data.len() % UUID128_LEN != 0 {
            return Err(Error::MalformedAdvertisement);
        }
        Ok(Uuid128Iter {
            chunks: self.data.chunks_exact(UUID128_LEN),
        })
    }
}

/// Iterator over the AD structures of an advertising payload.
pub struct AdElements<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for AdElements<'a> {
    type Item = AdElement<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.pos;
        if i >= self.data.len() {
            return None;
        }
        let len = self.data[i] as usize;
        if len == 0 || i + len >= self.data.len() {
            self.pos = self.data.len();
            return None;
        }
        self.pos = i + len + 1;
        Some(AdElement {
            ad_type: self.data[i + 1],
            data: &self.data[i + 2..i + 1 + len],
        })
    }
}

/// Walk the AD structures of `data`.
pub fn elements(data: &[u8]) -> AdElements<'_> {
    AdElements { data, pos: 0 }
}

/// 128-bit UUIDs of one list element (little-endian on air).
pub struct Uuid128Iter<'a> {
    chunks: core::slice::ChunksExact<'a, u8>,
}

impl Iterator for Uuid128Iter<'_> {
    type Item = BluetoothUuid;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;
        let mut raw = [0u8; UUID128_LEN];
        raw.copy_from_slice(chunk);
        Some(BluetoothUuid::Uuid128(BluetoothUuid128::from_le_bytes(raw)))
    }
}

/// Check if raw advertisement data lists `uuid` as a 128-bit service UUID.
/// Malformed UUID elements are skipped.
pub fn contains_service_uuid128(data: &[u8], uuid: &BluetoothUuid) -> bool {
    elements(data)
        .filter(|e| e.is_uuid128_list())
        .filter_map(|e| e.uuid128s().ok())
        .flatten()
        .any(|candidate| &candidate == uuid)
}

/// Extract complete/shortened local name from advertisement data.
pub fn extract_device_name(data: &[u8]) -> String<32> {
    for element in elements(data) {
        if matches!(element.ad_type, AD_TYPE_NAME_SHORT | AD_TYPE_NAME_COMPLETE) {
            let mut name = String::new();
            for &b in element.data {
                if name.push(b as char).is_err() {
                    break;
                }
            }
            return name;
        }
    }

    let mut s = String::new();
    let _ = s.push_str("Unknown");
    s
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
