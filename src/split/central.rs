//! Connection Lifecycle Manager.
//!
//! Owns the single split link: scans for the peripheral half, connects,
//! raises security, runs discovery and keeps the subscription fed.  Every
//! transport callback maps to one `on_*` method; none of them block.
//!
//! ```text
//!  Idle ──start──▶ Scanning ──match──▶ Connecting ──connected──▶ Connected
//!   ▲                 ▲                    │                        │ security ok
//!   │                 └──── failure / disconnect ◀──────────────────┤
//!   │                                                   Discovering(cursor)
//!   └── scan start failed                                           │ CCC found
//!                                                               Subscribed
//! ```

use crate::ble::adv_parser;
use crate::config::{CentralConfig, InertLinkPolicy};
use crate::error::{Error, TransportError};
use crate::event::EventSink;
use crate::split::discovery::{DiscoveryCursor, DiscoveryPhase, DiscoveryStep};
use crate::split::subscription::{NotificationOutcome, Subscription, SubscriptionRecord};
use crate::split::uuid::{uuid_matches, SPLIT_SERVICE_UUID};
use crate::transport::{
    AdvEventType, ConnHandle, DiscoveredAttribute, DiscoveryKind, PeerAddress, SecurityLevel,
    Transport, TransportEvent, WalkControl,
};

/// Where the split link is.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    /// No link and not scanning.
    Idle,
    /// No link; looking for the peripheral.
    Scanning,
    /// Connection initiated, waiting for completion.
    Connecting,
    /// Link up but neither discovering nor subscribed.
    Connected,
    /// Attribute walk in progress.
    Discovering(DiscoveryCursor),
    /// Notifications armed; key events flow.
    Subscribed,
}

/// Everything that belongs to the one tracked peripheral.
#[derive(Debug)]
struct Session {
    conn: Option<ConnHandle>,
    state: LinkState,
    scanning: bool,
    subscription: Subscription,
    last_error: Option<Error>,
}

impl Session {
    const fn new() -> Self {
        Self {
            conn: None,
            state: LinkState::Idle,
            scanning: false,
            subscription: Subscription::new(),
            last_error: None,
        }
    }

    fn is_tracked(&self, conn: ConnHandle) -> bool {
        self.conn == Some(conn)
    }
}

/// Central side of the split link.
pub struct Central<T: Transport, S: EventSink> {
    transport: T,
    sink: S,
    config: CentralConfig,
    session: Session,
}

impl<T: Transport, S: EventSink> Central<T, S> {
    pub fn new(transport: T, sink: S, config: CentralConfig) -> Self {
        Self {
            transport,
            sink,
            config,
            session: Session::new(),
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.session.state
    }

    /// The tracked link, if any.
    pub fn connection(&self) -> Option<ConnHandle> {
        self.session.conn
    }

    /// Cursor of the running discovery.
    pub fn discovery(&self) -> Option<&DiscoveryCursor> {
        match &self.session.state {
            LinkState::Discovering(cursor) => Some(cursor),
            _ => None,
        }
    }

    pub fn subscription(&self) -> Option<&SubscriptionRecord> {
        self.session.subscription.record()
    }

    pub fn is_scanning(&self) -> bool {
        self.session.scanning
    }

    /// Most recent failure, for diagnostics.
    pub fn last_error(&self) -> Option<Error> {
        self.session.last_error
    }

    pub fn config(&self) -> &CentralConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Begin passive scanning.  Idempotent; a failure is reported to the
    /// caller and not retried here.
    pub fn start_scanning(&mut self) -> Result<(), TransportError> {
        if !self.session.scanning {
            if let Err(e) = self.transport.start_scan() {
                error!("Scanning failed to start (err {})", e);
                self.session.last_error = Some(e.into());
                return Err(e);
            }
            debug!("Scanning successfully started");
            self.session.scanning = true;
        }
        if self.session.conn.is_none() {
            self.session.state = LinkState::Scanning;
        }
        Ok(())
    }

    /// Dispatch an owned transport callback.
    pub fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Advertisement(report) => {
                self.on_advertisement(report.peer, report.event_type, report.rssi, &report.data)
            }
            TransportEvent::Connected { conn } => self.on_connected(conn),
            TransportEvent::ConnectFailed { conn, reason } => self.on_connect_failed(conn, reason),
            TransportEvent::SecurityChanged { conn, level, error } => {
                self.on_security_changed(conn, level, error)
            }
            TransportEvent::Discovered {
                conn,
                kind,
                start_handle,
                attribute,
            } => {
                if !self.is_current_walk(kind, start_handle) {
                    trace!("Dropping result of a finished walk on {}", conn);
                    return;
                }
                // Queued results cannot stop the stack's walk.
                let _ = self.on_discovered(conn, attribute.as_ref());
            }
            TransportEvent::Notification {
                conn,
                value_handle,
                payload,
            } => self.on_notification(conn, value_handle, payload.as_deref()),
            TransportEvent::Disconnected { conn, reason } => self.on_disconnected(conn, reason),
        }
    }

    /// Whether a queued discovery result belongs to the walk in progress.
    fn is_current_walk(&self, kind: DiscoveryKind, start_handle: u16) -> bool {
        self.discovery().is_some_and(|cursor| {
            let request = cursor.request();
            request.kind == kind && request.start_handle == start_handle
        })
    }

    /// Scan report.  The first connectable report listing the split service
    /// UUID stops the scan and starts connecting.
    pub fn on_advertisement(
        &mut self,
        peer: PeerAddress,
        event_type: AdvEventType,
        rssi: i8,
        data: &[u8],
    ) {
        trace!(
            "[DEVICE]: {}, AD evt type {}, AD data len {}, RSSI {}",
            peer,
            event_type,
            data.len(),
            rssi
        );

        if !self.session.scanning || self.session.conn.is_some() {
            return;
        }
        if !event_type.is_connectable() {
            return;
        }

        for element in adv_parser::elements(data) {
            trace!("[AD]: {} data_len {}", element.ad_type, element.data.len());
            if !element.is_uuid128_list() {
                continue;
            }

            let uuids = match element.uuid128s() {
                Ok(uuids) => uuids,
                Err(e) => {
                    error!("AD malformed");
                    self.session.last_error = Some(e);
                    continue;
                }
            };

            for uuid in uuids {
                if !uuid_matches(&uuid, &SPLIT_SERVICE_UUID) {
                    continue;
                }

                info!(
                    "Found the split service on {}",
                    adv_parser::extract_device_name(data).as_str()
                );

                if let Err(e) = self.transport.stop_scan() {
                    error!("Stop LE scan failed (err {})", e);
                    self.session.last_error = Some(e.into());
                    continue;
                }
                self.session.scanning = false;
                self.connect_to(peer);
                return;
            }
        }
    }

    /// Link established.
    pub fn on_connected(&mut self, conn: ConnHandle) {
        debug!("Connected: {}", conn);
        if !self.session.is_tracked(conn) {
            debug!("Ignoring link {} - not the split peripheral", conn);
            return;
        }
        if self.session.scanning {
            // Left running by a failed PHY request.
            match self.transport.stop_scan() {
                Ok(()) => self.session.scanning = false,
                Err(e) => warn!("Stop LE scan failed (err {})", e),
            }
        }
        self.session.state = LinkState::Connected;
        self.process_connection(conn);
    }

    /// Connection attempt failed; back to scanning.
    pub fn on_connect_failed(&mut self, conn: ConnHandle, reason: u8) {
        error!("Failed to connect {} ({})", conn, reason);
        if !self.session.is_tracked(conn) {
            return;
        }
        self.release_link();
        self.resume_scanning();
    }

    /// Encryption finished (or failed) on a link.
    pub fn on_security_changed(&mut self, conn: ConnHandle, level: SecurityLevel, error: Option<u8>) {
        let Some(err) = error else {
            debug!("Security changed: {} level {}", conn, level);
            return;
        };

        error!("Security failed: {} level {} err {}", conn, level, err);
        if !self.session.is_tracked(conn) {
            return;
        }
        self.session.last_error = Some(Error::Transport(TransportError::Raw(err.into())));
        // No key events on a link that never got its security level.
        self.disarm();
        self.apply_inert_policy(conn, self.config.on_security_failure);
    }

    /// One attribute of the running walk, or `None` at its end.
    pub fn on_discovered(
        &mut self,
        conn: ConnHandle,
        attribute: Option<&DiscoveredAttribute>,
    ) -> WalkControl {
        if !self.session.is_tracked(conn) {
            return WalkControl::Stop;
        }
        let LinkState::Discovering(cursor) = &mut self.session.state else {
            return WalkControl::Stop;
        };

        let Some(attr) = attribute else {
            debug!("Discover complete");
            let phase = cursor.phase();
            self.discovery_failed(conn, phase);
            return WalkControl::Stop;
        };

        match cursor.on_attribute(attr) {
            DiscoveryStep::Continue => WalkControl::Continue,
            DiscoveryStep::Next(request) => {
                if let Err(e) = self.transport.discover(conn, &request) {
                    error!("Discover failed (err {})", e);
                    self.session.last_error = Some(e.into());
                    self.session.state = LinkState::Connected;
                    self.drop_link(conn);
                }
                WalkControl::Stop
            }
            DiscoveryStep::Subscribe(request) => {
                self.session.state = LinkState::Connected;
                match self.session.subscription.subscribe(
                    &mut self.transport,
                    conn,
                    &request,
                    self.config.first_notification,
                ) {
                    Ok(_) => self.session.state = LinkState::Subscribed,
                    Err(e) => {
                        self.session.last_error = Some(e.into());
                        self.apply_inert_policy(conn, self.config.on_discovery_incomplete);
                    }
                }
                WalkControl::Stop
            }
            DiscoveryStep::Exhausted => {
                let phase = cursor.phase();
                self.discovery_failed(conn, phase);
                WalkControl::Stop
            }
        }
    }

    /// Notification on the tracked link.  `None` means the stack dropped
    /// the subscription.
    pub fn on_notification(&mut self, conn: ConnHandle, value_handle: u16, payload: Option<&[u8]>) {
        if !self.session.is_tracked(conn) {
            trace!("Notification on stale link {}", conn);
            return;
        }

        match self.session.subscription.on_notification(
            value_handle,
            payload,
            &mut self.sink,
            self.config.release_on_unsubscribe,
        ) {
            Ok(NotificationOutcome::Unsubscribed) => self.session.state = LinkState::Connected,
            Ok(_) => {}
            Err(e) => self.session.last_error = Some(e.into()),
        }
    }

    /// Link lost.  Only the tracked link matters; anything else is stale.
    pub fn on_disconnected(&mut self, conn: ConnHandle, reason: u8) {
        debug!("Disconnected: {} (reason {})", conn, reason);
        if !self.session.is_tracked(conn) {
            return;
        }
        self.release_link();
        self.resume_scanning();
    }

    fn connect_to(&mut self, peer: PeerAddress) {
        if let Some(conn) = self.transport.find_connection(&peer) {
            debug!("Found existing connection");
            self.session.conn = Some(conn);
            self.session.state = LinkState::Connected;
            self.process_connection(conn);
            return;
        }

        let conn = match self.transport.connect(&peer, &self.config.conn_params) {
            Ok(conn) => conn,
            Err(e) => {
                error!("Create conn failed (err {})", e);
                self.session.last_error = Some(e.into());
                self.resume_scanning();
                return;
            }
        };
        self.session.conn = Some(conn);
        self.session.state = LinkState::Connecting;

        if let Some(phy) = self.config.phy {
            if let Err(e) = self.transport.update_phy(conn, phy) {
                // The connection attempt stays in flight.
                error!("Update phy conn failed (err {})", e);
                self.session.last_error = Some(e.into());
                self.resume_scanning();
            }
        }
    }

    /// Security upgrade, then discovery on the tracked link.
    fn process_connection(&mut self, conn: ConnHandle) {
        debug!(
            "Current security for connection: {}",
            self.transport.security(conn)
        );

        if let Err(e) = self.transport.set_security(conn, self.config.security_level) {
            error!("Failed to set security (reason {})", e);
            self.session.last_error = Some(e.into());
            self.apply_inert_policy(conn, self.config.on_security_failure);
            return;
        }

        let cursor = DiscoveryCursor::new();
        match self.transport.discover(conn, &cursor.request()) {
            Ok(()) => self.session.state = LinkState::Discovering(cursor),
            Err(e) => {
                error!("Discover failed (err {})", e);
                self.session.last_error = Some(e.into());
                self.drop_link(conn);
                return;
            }
        }

        if let Some(info) = self.transport.connection_info(conn) {
            debug!(
                "New connection params: Interval: {}, Latency: {}, PHY: {}",
                info.interval,
                info.latency,
                info.rx_phy
            );
        }
    }

    fn discovery_failed(&mut self, conn: ConnHandle, phase: DiscoveryPhase) {
        warn!("Discovery ended in {} phase without a match", phase);
        self.session.state = LinkState::Connected;
        self.session.last_error = Some(Error::DiscoveryIncomplete);
        self.apply_inert_policy(conn, self.config.on_discovery_incomplete);
    }

    fn apply_inert_policy(&mut self, conn: ConnHandle, policy: InertLinkPolicy) {
        match policy {
            InertLinkPolicy::KeepConnected => {
                warn!("Link {} stays up without key events", conn);
            }
            InertLinkPolicy::Disconnect => self.drop_link(conn),
        }
    }

    /// Give up on the link and get back to scanning.
    fn drop_link(&mut self, conn: ConnHandle) {
        if self.transport.disconnect(conn).is_ok() {
            // `on_disconnected` resumes scanning.
            return;
        }
        warn!("Disconnect of {} refused, releasing locally", conn);
        self.release_link();
        self.resume_scanning();
    }

    fn release_link(&mut self) {
        self.session.conn = None;
        self.disarm();
        self.session.state = LinkState::Idle;
    }

    /// Abandon discovery and any subscription, keeping the link.
    fn disarm(&mut self) {
        self.session.state = LinkState::Connected;
        self.session
            .subscription
            .clear(&mut self.sink, self.config.release_on_unsubscribe);
    }

    fn resume_scanning(&mut self) {
        // Failure is already logged; the caller's init sequence retries.
        let _ = self.start_scanning();
    }
}
