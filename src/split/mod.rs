//! Split keyboard link, central side.
//!
//! `central` drives the link lifecycle, `discovery` walks the peripheral's
//! attribute table, `subscription` turns notifications into
//! [`PositionChanged`](crate::event::PositionChanged) events through the
//! `key_state` decoder.

pub mod central;
pub mod discovery;
pub mod key_state;
pub mod subscription;
pub mod uuid;


pub use central::{Central, LinkState};
pub use key_state::KeyStateBitmap;
pub use subscription::SubscriptionRecord;
