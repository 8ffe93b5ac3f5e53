//! Operator panel for a flipdot display controller.
//!
//! One [`runtime::Runtime`] task owns the [`panel::Panel`], which in turn owns
//! the pixel buffer, the single device connection, the mode state machine and
//! the flag mirror. Everything else talks to it through channels.

pub mod cli;
pub mod config;
pub mod connection;
pub mod flags;
pub mod grid;
pub mod mode;
pub mod panel;
pub mod persistence;
pub mod raster;
pub mod runtime;
pub mod telemetry;
pub mod transport;
