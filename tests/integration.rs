//! Integration tests for the split central against a simulated radio stack.

use std::collections::VecDeque;

use btuuid::BluetoothUuid;
use split_central::ble::adv_parser::{contains_service_uuid128, extract_device_name};
use split_central::config::InertLinkPolicy;
use split_central::split::uuid::{
    GATT_CCC_UUID, POSITION_STATE_UUID, SPLIT_SERVICE_UUID, SPLIT_SERVICE_UUID_RAW,
};
use split_central::transport::*;
use split_central::{
    Central, CentralConfig, Error, LinkState, PositionChanged, TransportError, TransportEvent,
};

const PEER: PeerAddress = PeerAddress::new(AddressKind::RandomStatic, [1, 2, 3, 4, 5, 0xC6]);

/// Stack that answers every request from a fixed attribute table and
/// queues the results as events.
struct SimulatedStack {
    table: Vec<(DiscoveryKind, DiscoveredAttribute)>,
    pending: VecDeque<TransportEvent>,
    scanning: bool,
    link: Option<ConnHandle>,
    next: u16,
    refuse_connections: bool,
    /// Report the end of every walk, even after a match.
    walk_to_end: bool,
}

impl SimulatedStack {
    fn new(table: Vec<(DiscoveryKind, DiscoveredAttribute)>) -> Self {
        Self {
            table,
            pending: VecDeque::new(),
            scanning: false,
            link: None,
            next: 1,
            refuse_connections: false,
            walk_to_end: false,
        }
    }

    fn split_keyboard() -> Self {
        let attr = |handle, uuid, value_handle| DiscoveredAttribute {
            handle,
            uuid,
            value_handle,
        };
        Self::new(vec![
            (DiscoveryKind::PrimaryService, attr(1, BluetoothUuid::from_u16(0x1801), None)),
            (DiscoveryKind::PrimaryService, attr(10, SPLIT_SERVICE_UUID, None)),
            (
                DiscoveryKind::Characteristic,
                attr(12, BluetoothUuid::from_u16(0x2A19), Some(13)),
            ),
            (DiscoveryKind::Characteristic, attr(20, POSITION_STATE_UUID, Some(21))),
            (DiscoveryKind::Descriptor, attr(14, GATT_CCC_UUID, None)),
            (DiscoveryKind::Descriptor, attr(23, GATT_CCC_UUID, None)),
        ])
    }
}

impl Transport for SimulatedStack {
    fn start_scan(&mut self) -> Result<(), TransportError> {
        self.scanning = true;
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        self.scanning = false;
        Ok(())
    }

    fn find_connection(&self, _peer: &PeerAddress) -> Option<ConnHandle> {
        self.link
    }

    fn connect(
        &mut self,
        _peer: &PeerAddress,
        _params: &ConnParams,
    ) -> Result<ConnHandle, TransportError> {
        let conn = ConnHandle(self.next);
        self.next += 1;
        if self.refuse_connections {
            self.pending
                .push_back(TransportEvent::ConnectFailed { conn, reason: 0x3E });
        } else {
            self.link = Some(conn);
            self.pending.push_back(TransportEvent::Connected { conn });
        }
        Ok(conn)
    }

    fn update_phy(&mut self, _conn: ConnHandle, _phy: Phy) -> Result<(), TransportError> {
        Ok(())
    }

    fn set_security(
        &mut self,
        conn: ConnHandle,
        level: SecurityLevel,
    ) -> Result<(), TransportError> {
        self.pending.push_back(TransportEvent::SecurityChanged {
            conn,
            level,
            error: None,
        });
        Ok(())
    }

    fn security(&self, _conn: ConnHandle) -> SecurityLevel {
        SecurityLevel::Open
    }

    /// Reports the first attribute of the requested kind and UUID in range,
    /// or the end of the walk.
    fn discover(
        &mut self,
        conn: ConnHandle,
        request: &DiscoverRequest,
    ) -> Result<(), TransportError> {
        let attribute = self
            .table
            .iter()
            .filter(|(kind, a)| {
                *kind == request.kind
                    && a.uuid == request.uuid
                    && (request.start_handle..=request.end_handle).contains(&a.handle)
            })
            .map(|(_, a)| a.clone())
            .next();
        let found = attribute.is_some();
        self.pending.push_back(TransportEvent::Discovered {
            conn,
            kind: request.kind,
            start_handle: request.start_handle,
            attribute,
        });
        if found && self.walk_to_end {
            self.pending.push_back(TransportEvent::Discovered {
                conn,
                kind: request.kind,
                start_handle: request.start_handle,
                attribute: None,
            });
        }
        Ok(())
    }

    fn subscribe(
        &mut self,
        _conn: ConnHandle,
        _request: &SubscribeRequest,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), TransportError> {
        if self.link != Some(conn) {
            return Err(TransportError::NotConnected);
        }
        self.link = None;
        self.pending
            .push_back(TransportEvent::Disconnected { conn, reason: 0x16 });
        Ok(())
    }

    fn connection_info(&self, _conn: ConnHandle) -> Option<ConnectionInfo> {
        None
    }
}

type Sink = heapless::Vec<PositionChanged, 64>;

fn split_advertisement() -> AdvReport {
    let mut data = heapless::Vec::new();
    data.extend_from_slice(&[0x02, 0x01, 0x06, 17, 0x07]).unwrap();
    data.extend_from_slice(&SPLIT_SERVICE_UUID_RAW.to_le_bytes()).unwrap();
    data.extend_from_slice(&[5, 0x09, b'l', b'e', b'f', b't']).unwrap();
    AdvReport {
        peer: PEER,
        event_type: AdvEventType::ConnectableUndirected,
        rssi: -52,
        data,
    }
}

fn notification(conn: ConnHandle, bitmap: [u8; 16]) -> TransportEvent {
    TransportEvent::Notification {
        conn,
        value_handle: 21,
        payload: Some(heapless::Vec::from_slice(&bitmap).unwrap()),
    }
}

/// Deliver queued stack events until the stack goes quiet.
fn pump(central: &mut Central<SimulatedStack, Sink>) {
    while let Some(event) = central.transport_mut().pending.pop_front() {
        central.handle(event);
    }
}

fn session(stack: SimulatedStack, config: CentralConfig) -> Central<SimulatedStack, Sink> {
    let mut central = Central::new(stack, Sink::new(), config);
    central.start_scanning().unwrap();
    central.handle(TransportEvent::Advertisement(split_advertisement()));
    pump(&mut central);
    central
}

#[test]
fn advertisement_carries_split_service() {
    let report = split_advertisement();
    assert!(contains_service_uuid128(&report.data, &SPLIT_SERVICE_UUID));
    assert!(!contains_service_uuid128(&report.data, &POSITION_STATE_UUID));
    assert_eq!(extract_device_name(&report.data).as_str(), "left");
}

#[test]
fn full_session_turns_notifications_into_key_events() {
    let mut central = session(SimulatedStack::split_keyboard(), CentralConfig::default());

    assert_eq!(*central.state(), LinkState::Subscribed);
    let record = central.subscription().copied().unwrap();
    assert_eq!((record.value_handle, record.ccc_handle), (21, 23));
    assert!(!central.transport().scanning);

    let conn = central.connection().unwrap();
    let mut bitmap = [0u8; 16];
    bitmap[0] = 0b0000_0101;
    central.handle(notification(conn, bitmap));
    bitmap[0] = 0b0000_0100;
    bitmap[3] = 0b0000_0010;
    central.handle(notification(conn, bitmap));

    assert_eq!(
        central.sink().as_slice(),
        [
            PositionChanged::new(0, true),
            PositionChanged::new(2, true),
            PositionChanged::new(0, false),
            PositionChanged::new(25, true),
        ]
    );
}

#[test]
fn peripheral_loss_releases_keys_and_reconnects() {
    let mut central = session(SimulatedStack::split_keyboard(), CentralConfig::default());
    let conn = central.connection().unwrap();

    let mut bitmap = [0u8; 16];
    bitmap[1] = 0x01;
    central.handle(notification(conn, bitmap));

    central.transport_mut().link = None;
    central.handle(TransportEvent::Disconnected { conn, reason: 0x08 });

    assert_eq!(
        central.sink().as_slice(),
        [PositionChanged::new(8, true), PositionChanged::new(8, false)]
    );
    assert_eq!(*central.state(), LinkState::Scanning);
    assert!(central.transport().scanning);

    // The peripheral comes back.
    central.handle(TransportEvent::Advertisement(split_advertisement()));
    pump(&mut central);
    assert_eq!(*central.state(), LinkState::Subscribed);
    assert_ne!(central.connection(), Some(conn));
}

#[test]
fn missing_service_leaves_an_inert_link() {
    let stack = SimulatedStack::new(vec![(
        DiscoveryKind::PrimaryService,
        DiscoveredAttribute {
            handle: 1,
            uuid: BluetoothUuid::from_u16(0x1800),
            value_handle: None,
        },
    )]);
    let central = session(stack, CentralConfig::default());

    assert_eq!(*central.state(), LinkState::Connected);
    assert_eq!(central.last_error(), Some(Error::DiscoveryIncomplete));
    assert!(central.connection().is_some());
}

#[test]
fn missing_service_can_be_dropped_and_rescanned() {
    let config = CentralConfig {
        on_discovery_incomplete: InertLinkPolicy::Disconnect,
        ..CentralConfig::default()
    };
    let central = session(SimulatedStack::new(Vec::new()), config);

    assert_eq!(*central.state(), LinkState::Scanning);
    assert_eq!(central.connection(), None);
    assert!(central.transport().scanning);
}

#[test]
fn refused_connection_goes_back_to_scanning() {
    let mut stack = SimulatedStack::split_keyboard();
    stack.refuse_connections = true;
    let central = session(stack, CentralConfig::default());

    assert_eq!(*central.state(), LinkState::Scanning);
    assert_eq!(central.connection(), None);
    assert!(central.transport().scanning);
}

#[test]
fn stack_that_finishes_every_walk_still_subscribes() {
    let mut stack = SimulatedStack::split_keyboard();
    stack.walk_to_end = true;
    let central = session(stack, CentralConfig::default());

    assert_eq!(*central.state(), LinkState::Subscribed);
    assert_eq!(central.last_error(), None);
}
