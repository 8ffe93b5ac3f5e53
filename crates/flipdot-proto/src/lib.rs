//! Shared protocol definitions for the flipdot panel link.
//!
//! The panel talks to the display controller over one duplex connection that
//! carries two kinds of traffic:
//! - binary command frames (`0xFF`, opcode, payload), see [`frame`]
//! - textual JSON status snapshots and text commands, see [`status`]
//!
//! Picture frames carry the pixel grid packed eight rows per byte, see
//! [`bitmap`]. Nothing in this crate performs I/O.

use thiserror::Error;

pub mod bitmap;
pub mod frame;
pub mod status;

pub use bitmap::{HEIGHT, PACKED_LEN, PixelGrid, WIDTH};
pub use frame::{Decoded, Frame, MARKER, Opcode};
pub use status::{ControlCommand, DeviceFlags, Flag, Mode, StatusSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    #[error("packed bitmap must be {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("pixel ({x}, {y}) is outside the {}x{} grid", WIDTH, HEIGHT)]
    OutOfBounds { x: usize, y: usize },
    #[error("payload of {0} bytes does not fit a one-byte length prefix")]
    PayloadTooLarge(usize),
    /// Carries the reported value as JSON text.
    #[error("unknown mode {0}")]
    UnknownMode(String),
    #[error("unknown flag {0:?}")]
    UnknownFlag(String),
    #[error("invalid status snapshot: {0}")]
    Snapshot(String),
    #[error("invalid control command: {0:?}")]
    Command(String),
}

pub type ProtoResult<T> = Result<T, ProtoError>;
