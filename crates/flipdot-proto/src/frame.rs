//! Binary command frames.
//!
//! Frame format:
//! - MARKER (1 byte): always `0xFF`
//! - OPCODE (1 byte): `0xA0..=0xA4`
//! - PAYLOAD: opcode specific
//!   - PICTURE: `[length][packed bitmap; length]`
//!   - switches: a single `0x00` / `0x01`
//!
//! Inbound binary traffic is decoded leniently. Only a well formed PICTURE is
//! recognised; the device also echoes arbitrary diagnostic bytes, which come
//! back as [`Decoded::Unstructured`] rather than as an error.

use crate::bitmap::{self, PACKED_LEN, PixelGrid};
use crate::status::Flag;
use crate::{ProtoError, ProtoResult};

/// Sentinel byte that starts every command frame.
pub const MARKER: u8 = 0xFF;

pub const SWITCH_ON: u8 = 0x01;
pub const SWITCH_OFF: u8 = 0x00;

/// Bytes in front of a picture's packed bitmap: marker, opcode, length.
pub const PICTURE_HEADER_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Picture = 0xA0,
    Backlight = 0xA1,
    Invert = 0xA2,
    Active = 0xA3,
    FastMode = 0xA4,
}

impl Opcode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0xA0 => Some(Self::Picture),
            0xA1 => Some(Self::Backlight),
            0xA2 => Some(Self::Invert),
            0xA3 => Some(Self::Active),
            0xA4 => Some(Self::FastMode),
            _ => None,
        }
    }
}

/// A single command unit. Built through [`Frame::picture`] or
/// [`Frame::switch`], so every value encodes without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: Opcode,
    payload: Vec<u8>,
}

impl Frame {
    pub fn picture(grid: &PixelGrid) -> Self {
        Self {
            opcode: Opcode::Picture,
            payload: bitmap::encode(grid),
        }
    }

    pub fn switch(flag: Flag, on: bool) -> Self {
        Self {
            opcode: flag.opcode(),
            payload: vec![if on { SWITCH_ON } else { SWITCH_OFF }],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PICTURE_HEADER_LEN + self.payload.len());
        out.push(MARKER);
        out.push(self.opcode.as_u8());
        if self.opcode == Opcode::Picture {
            // constructors only build 168-byte pictures
            out.push(self.payload.len() as u8);
        }
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Prepends the marker and opcode, plus the length byte for PICTURE.
pub fn encode(opcode: Opcode, payload: &[u8]) -> ProtoResult<Vec<u8>> {
    let mut out = Vec::with_capacity(PICTURE_HEADER_LEN + payload.len());
    out.push(MARKER);
    out.push(opcode.as_u8());
    if opcode == Opcode::Picture {
        let length =
            u8::try_from(payload.len()).map_err(|_| ProtoError::PayloadTooLarge(payload.len()))?;
        out.push(length);
    }
    out.extend_from_slice(payload);
    Ok(out)
}

/// Result of classifying an inbound binary message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Picture(PixelGrid),
    Unstructured(Vec<u8>),
}

pub fn decode(bytes: &[u8]) -> Decoded {
    match picture_payload(bytes).map(bitmap::decode) {
        Some(Ok(grid)) => Decoded::Picture(grid),
        _ => Decoded::Unstructured(bytes.to_vec()),
    }
}

fn picture_payload(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < PICTURE_HEADER_LEN {
        return None;
    }
    let (header, rest) = bytes.split_at(PICTURE_HEADER_LEN);
    if header[0] != MARKER || Opcode::from_byte(header[1]) != Some(Opcode::Picture) {
        return None;
    }
    let declared = usize::from(header[2]);
    if declared != PACKED_LEN {
        return None;
    }
    // trailing bytes after the bitmap are tolerated
    rest.get(..declared)
}

/// Space separated lowercase hex, used when logging unstructured traffic.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
