//! Application-wide constants and compile-time configuration.
//!
//! Link timing, protocol sizes and the recovery policies of the central
//! live here so they can be tuned in one place.

use crate::transport::{ConnParams, Phy, SecurityLevel};

// BLE

/// BLE connection interval range (in 1.25 ms units).
/// 6 = 7.5 ms (lowest latency for key events).
pub const BLE_CONN_INTERVAL_MIN: u16 = 6;
pub const BLE_CONN_INTERVAL_MAX: u16 = 6;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 30;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// Security level requested right after connecting.
pub const BLE_SECURITY_LEVEL: SecurityLevel = SecurityLevel::Encrypted;

/// Number of 200 ms polls the driver waits for encryption to come up.
pub const BLE_SECURITY_WAIT_POLLS: u32 = 25;

// Split protocol

/// Key-state payload length (bytes).
pub const POSITION_STATE_DATA_LEN: usize = 16;

/// Number of key positions carried by one payload.
pub const POSITION_COUNT: usize = POSITION_STATE_DATA_LEN * 8;

// Channels (embedded)

/// Depth of the transport request queue.
pub const REQUEST_QUEUE_DEPTH: usize = 8;

/// Depth of the transport callback queue.
pub const TRANSPORT_EVENT_QUEUE_DEPTH: usize = 16;

/// Depth of the key position event bus.
pub const POSITION_EVENT_QUEUE_DEPTH: usize = 32;

// Runtime policies

/// What to do with a link that is up but will never deliver key events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InertLinkPolicy {
    /// Leave the link connected; it recovers only on disconnect.
    KeepConnected,
    /// Drop the link and go back to scanning.
    Disconnect,
}

/// How the first payload after subscribing is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BaselinePolicy {
    /// Diff against an all-released bitmap: keys already held are reported
    /// as pressed.
    DiffAgainstZero,
    /// Store the first payload without emitting events.
    BaselineOnly,
}

/// Runtime configuration of [`Central`](crate::split::central::Central).
///
/// `Default` is the stock split keyboard behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CentralConfig {
    pub conn_params: ConnParams,
    pub security_level: SecurityLevel,
    /// PHY requested after initiating a connection (`None` = leave as is).
    pub phy: Option<Phy>,
    pub on_security_failure: InertLinkPolicy,
    pub on_discovery_incomplete: InertLinkPolicy,
    pub first_notification: BaselinePolicy,
    /// Emit releases for held positions when a subscription ends.
    pub release_on_unsubscribe: bool,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            conn_params: ConnParams::default(),
            security_level: BLE_SECURITY_LEVEL,
            phy: Some(Phy::Le2M),
            on_security_failure: InertLinkPolicy::KeepConnected,
            on_discovery_incomplete: InertLinkPolicy::KeepConnected,
            first_notification: BaselinePolicy::DiffAgainstZero,
            release_on_unsubscribe: true,
        }
    }
}
