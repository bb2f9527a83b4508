//! Radio stack capability consumed by the split central.
//!
//! The link layer (scanning, connection setup, encryption, attribute
//! protocol) is not implemented here.  The central drives it through the
//! [`Transport`] trait and receives its results as callbacks on
//! [`Central`](crate::split::central::Central), either directly or as an
//! owned [`TransportEvent`] handed over a channel.
//!
//! Every `Transport` request is fire-and-forget: `Ok(())` only means the
//! stack accepted the request.  The outcome arrives later as a callback.

use btuuid::BluetoothUuid;
use heapless::Vec;

use crate::config;
use crate::error::TransportError;

/// Largest legacy advertising payload.
pub const MAX_ADV_DATA_LEN: usize = 31;

/// Largest notification payload with the default ATT MTU (23 - 3).
pub const MAX_NOTIFICATION_LEN: usize = 20;

/// Opaque handle of one link, allocated by the transport when a connection
/// is initiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u16);

/// LE device address (type + 48-bit address, little-endian as on air).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    pub kind: AddressKind,
    pub bytes: [u8; 6],
}

impl PeerAddress {
    pub const fn new(kind: AddressKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressKind {
    Public,
    RandomStatic,
    RandomPrivateResolvable,
    RandomPrivateNonResolvable,
}

/// Advertising PDU type of a scan report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvEventType {
    /// ADV_IND
    ConnectableUndirected,
    /// ADV_DIRECT_IND
    ConnectableDirected,
    /// ADV_SCAN_IND
    ScannableUndirected,
    /// ADV_NONCONN_IND
    NonConnectable,
    /// SCAN_RSP
    ScanResponse,
}

impl AdvEventType {
    /// Only these can be answered with a connection request.
    pub fn is_connectable(self) -> bool {
        matches!(
            self,
            AdvEventType::ConnectableUndirected | AdvEventType::ConnectableDirected
        )
    }
}

/// One advertisement report delivered while scanning.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvReport {
    pub peer: PeerAddress,
    pub event_type: AdvEventType,
    pub rssi: i8,
    /// Raw AD structures (length, type, data)*.
    pub data: Vec<u8, MAX_ADV_DATA_LEN>,
}

/// Connection parameters requested when initiating a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    /// Minimum connection interval (1.25 ms units).
    pub interval_min: u16,
    /// Maximum connection interval (1.25 ms units).
    pub interval_max: u16,
    /// Slave latency (connection events).
    pub latency: u16,
    /// Supervision timeout (10 ms units).
    pub timeout: u16,
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            interval_min: config::BLE_CONN_INTERVAL_MIN,
            interval_max: config::BLE_CONN_INTERVAL_MAX,
            latency: config::BLE_SLAVE_LATENCY,
            timeout: config::BLE_SUP_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phy {
    Le1M,
    Le2M,
    LeCoded,
}

/// LE security levels, ordered from weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityLevel {
    /// Level 1: no encryption.
    Open,
    /// Level 2: encrypted, unauthenticated pairing.
    Encrypted,
    /// Level 3: encrypted, authenticated pairing.
    Authenticated,
    /// Level 4: authenticated LE Secure Connections.
    SecureConnections,
}

/// Link parameters in effect, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionInfo {
    /// Connection interval (1.25 ms units).
    pub interval: u16,
    pub latency: u16,
    pub rx_phy: Phy,
}

/// Which attribute type an attribute walk looks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryKind {
    PrimaryService,
    Characteristic,
    Descriptor,
}

/// One attribute walk: find `uuid` among attributes of `kind` in
/// `[start_handle, end_handle]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoverRequest {
    pub kind: DiscoveryKind,
    pub uuid: BluetoothUuid,
    pub start_handle: u16,
    pub end_handle: u16,
}

/// An attribute reported by a walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredAttribute {
    /// Handle of the attribute itself (service or characteristic
    /// declaration, or descriptor).
    pub handle: u16,
    pub uuid: BluetoothUuid,
    /// For characteristic declarations, the value handle carried in the
    /// declaration, if the stack reports it.
    pub value_handle: Option<u16>,
}

/// Tells the stack whether to keep delivering attributes for the current
/// walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WalkControl {
    Continue,
    Stop,
}

/// Enable notifications on `value_handle` by writing its CCC descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubscribeRequest {
    pub value_handle: u16,
    pub ccc_handle: u16,
}

/// Capabilities the central needs from the radio stack.
///
/// Implementations must not block: requests are queued and their results
/// are delivered later, in link order, on the same dispatch context as
/// every other callback.
pub trait Transport {
    /// Start passive scanning.
    fn start_scan(&mut self) -> Result<(), TransportError>;

    fn stop_scan(&mut self) -> Result<(), TransportError>;

    /// Existing link to `peer`, if the stack already has one.
    fn find_connection(&self, peer: &PeerAddress) -> Option<ConnHandle>;

    /// Initiate a connection.  The handle is valid from now on; completion
    /// is reported through `on_connected` / `on_connect_failed`.
    fn connect(
        &mut self,
        peer: &PeerAddress,
        params: &ConnParams,
    ) -> Result<ConnHandle, TransportError>;

    fn update_phy(&mut self, conn: ConnHandle, phy: Phy) -> Result<(), TransportError>;

    /// Ask for at least `level` on the link (pairs or encrypts as needed).
    fn set_security(&mut self, conn: ConnHandle, level: SecurityLevel)
        -> Result<(), TransportError>;

    /// Current security level of the link.
    fn security(&self, conn: ConnHandle) -> SecurityLevel;

    /// Start an attribute walk.  Attributes arrive through `on_discovered`,
    /// followed by `None` when the range is exhausted.  A stack that calls
    /// back directly stops walking once `on_discovered` returns
    /// [`WalkControl::Stop`]; one that queues [`TransportEvent`]s may keep
    /// reporting, and the central drops results of walks it has moved past.
    fn discover(&mut self, conn: ConnHandle, request: &DiscoverRequest)
        -> Result<(), TransportError>;

    /// Enable notifications.  Returns `AlreadySubscribed` when the stack
    /// already holds an identical subscription.
    fn subscribe(&mut self, conn: ConnHandle, request: &SubscribeRequest)
        -> Result<(), TransportError>;

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), TransportError>;

    /// Parameters in effect, for diagnostics only.
    fn connection_info(&self, conn: ConnHandle) -> Option<ConnectionInfo>;
}

/// Transport callbacks as owned values, for stacks that report results from
/// another task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Advertisement(AdvReport),
    Connected {
        conn: ConnHandle,
    },
    ConnectFailed {
        conn: ConnHandle,
        reason: u8,
    },
    SecurityChanged {
        conn: ConnHandle,
        level: SecurityLevel,
        error: Option<u8>,
    },
    /// Result of the walk started with `kind` at `start_handle`.
    Discovered {
        conn: ConnHandle,
        kind: DiscoveryKind,
        start_handle: u16,
        attribute: Option<DiscoveredAttribute>,
    },
    Notification {
        conn: ConnHandle,
        value_handle: u16,
        /// `None` when the stack reports the subscription as gone.
        payload: Option<Vec<u8, MAX_NOTIFICATION_LEN>>,
    },
    Disconnected {
        conn: ConnHandle,
        reason: u8,
    },
}
