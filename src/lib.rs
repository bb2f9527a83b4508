//! Central side of a BLE split keyboard link.
//!
//! Scans for the peripheral half, connects, walks its attribute table to
//! the key-state characteristic, subscribes, and turns each 16-byte
//! key-state notification into [`PositionChanged`] events.
//!
//! Everything in this library is pure logic over the [`Transport`] trait
//! and runs on the host (`cargo test --lib`).  The embedded binary
//! (`--features embedded`) supplies a SoftDevice-backed transport.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod ble;
pub mod config;
pub mod error;
pub mod event;
pub mod split;
pub mod transport;

pub use config::CentralConfig;
pub use error::{DecodeError, Error, TransportError};
pub use event::{EventSink, PositionChanged};
pub use split::{Central, LinkState};
pub use transport::{Transport, TransportEvent};
