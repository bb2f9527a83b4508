//! SoftDevice S140 side of the split link.
//!
//! The [`Central`](split_central::Central) never touches the SoftDevice
//! directly.  It queues [`Request`]s through
//! [`SoftdeviceTransport`](transport::SoftdeviceTransport); the [`Driver`]
//! task executes them one at a time and reports results as
//! [`TransportEvent`]s on the event channel.
//!
//! While idle the driver keeps the scan running (when asked to) and listens
//! for notifications on the active link.

pub mod bonder;
pub mod gatt;
pub mod links;
pub mod transport;

use core::future::pending;

use defmt::{debug, info, trace, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_time::{Duration, Timer};
use heapless::Vec;
use nrf_softdevice::ble::{central, gatt_client, Address, Connection, EncryptError, SecurityMode};
use nrf_softdevice::{raw, Softdevice};
use split_central::config::{
    BLE_SECURITY_WAIT_POLLS, REQUEST_QUEUE_DEPTH, TRANSPORT_EVENT_QUEUE_DEPTH,
};
use split_central::transport::{
    AdvEventType, AdvReport, ConnHandle, ConnParams, ConnectionInfo, DiscoverRequest,
    DiscoveryKind, PeerAddress, Phy, SecurityLevel, SubscribeRequest, TransportEvent,
};

use bonder::Bonder;
use gatt::SplitServiceClient;
use transport::{from_address, to_address};

/// Work queued by [`SoftdeviceTransport`](transport::SoftdeviceTransport).
pub enum Request {
    StartScan,
    StopScan,
    Connect {
        conn: ConnHandle,
        peer: PeerAddress,
        params: ConnParams,
    },
    UpdatePhy {
        conn: ConnHandle,
        phy: Phy,
    },
    SetSecurity {
        conn: ConnHandle,
        level: SecurityLevel,
    },
    Discover {
        conn: ConnHandle,
        request: DiscoverRequest,
    },
    Subscribe {
        conn: ConnHandle,
        request: SubscribeRequest,
    },
    Disconnect {
        conn: ConnHandle,
    },
}

pub type RequestReceiver = Receiver<'static, CriticalSectionRawMutex, Request, REQUEST_QUEUE_DEPTH>;
pub type EventSender =
    Sender<'static, CriticalSectionRawMutex, TransportEvent, TRANSPORT_EVENT_QUEUE_DEPTH>;

// HCI reason codes reported with link events.
const HCI_AUTH_FAILURE: u8 = 0x05;
const HCI_REMOTE_USER_TERMINATED: u8 = 0x13;
const HCI_LOCAL_HOST_TERMINATED: u8 = 0x16;
const HCI_CONN_FAILED_TO_ESTABLISH: u8 = 0x3E;

/// Scan window for a connection attempt (10 ms units).
const CONNECT_TIMEOUT: u16 = 500;

/// Pause before restarting a scan the SoftDevice ended on its own.
const SCAN_RETRY: Duration = Duration::from_secs(1);

struct ActiveLink {
    conn: ConnHandle,
    link: Connection,
    client: SplitServiceClient,
    /// Disconnect requested locally.
    closing: bool,
}

/// Why the background activity returned.
enum Background {
    ScanEnded,
    LinkLost,
}

pub struct Driver {
    sd: &'static Softdevice,
    bonder: &'static Bonder,
    requests: RequestReceiver,
    events: EventSender,
    scanning: bool,
    active: Option<ActiveLink>,
}

impl Driver {
    pub fn new(
        sd: &'static Softdevice,
        bonder: &'static Bonder,
        requests: RequestReceiver,
        events: EventSender,
    ) -> Self {
        Self {
            sd,
            bonder,
            requests,
            events,
            scanning: false,
            active: None,
        }
    }

    /// Requests run one at a time.  The notification listener is only
    /// polled between requests, so notifications arriving while a request
    /// is in flight (e.g. a security wait) are lost.
    pub async fn run(mut self) -> ! {
        loop {
            match select(self.requests.receive(), self.background()).await {
                Either::First(request) => {
                    if self.active.is_some() {
                        trace!("Notification listener paused while a request runs");
                    }
                    self.process(request).await
                }
                Either::Second(Background::ScanEnded) => Timer::after(SCAN_RETRY).await,
                Either::Second(Background::LinkLost) => self.link_lost().await,
            }
        }
    }

    async fn background(&self) -> Background {
        match (self.scanning, &self.active) {
            (true, Some(active)) => match select(self.scan(), self.watch(active)).await {
                Either::First(outcome) | Either::Second(outcome) => outcome,
            },
            (true, None) => self.scan().await,
            (false, Some(active)) => self.watch(active).await,
            (false, None) => pending().await,
        }
    }

    /// Passive scan; connectable reports go to the central.
    async fn scan(&self) -> Background {
        let config = central::ScanConfig {
            active: false,
            ..Default::default()
        };

        let result = central::scan(self.sd, &config, |params| {
            let event_type = adv_event_type(&params.type_);
            if !event_type.is_connectable() {
                return None;
            }

            let data =
                unsafe { core::slice::from_raw_parts(params.data.p_data, params.data.len as usize) };
            // Extended advertising payloads do not fit a legacy report.
            let Ok(data) = Vec::from_slice(data) else {
                return None;
            };

            let report = AdvReport {
                peer: from_address(&Address::from_raw(params.peer_addr)),
                event_type,
                rssi: params.rssi,
                data,
            };
            if self
                .events
                .try_send(TransportEvent::Advertisement(report))
                .is_err()
            {
                trace!("Event queue full - dropping advertisement");
            }
            None::<()>
        })
        .await;

        if result.is_err() {
            warn!("BLE scan ended with error");
        }
        Background::ScanEnded
    }

    /// Forward notifications until the link drops.
    async fn watch(&self, active: &ActiveLink) -> Background {
        let conn = active.conn;
        let _ = gatt_client::run(&active.link, &active.client, |hvx| {
            let event = TransportEvent::Notification {
                conn,
                value_handle: hvx.handle,
                payload: Some(hvx.data),
            };
            if self.events.try_send(event).is_err() {
                warn!("Event queue full - dropping notification");
            }
        })
        .await;
        Background::LinkLost
    }

    async fn process(&mut self, request: Request) {
        match request {
            Request::StartScan => {
                debug!("Scan requested");
                self.scanning = true;
            }
            Request::StopScan => self.scanning = false,
            Request::Connect { conn, peer, params } => self.connect(conn, peer, params).await,
            Request::UpdatePhy { conn, phy } => self.update_phy(conn, phy),
            Request::SetSecurity { conn, level } => self.secure(conn, level).await,
            Request::Discover { conn, request } => self.discover(conn, &request).await,
            Request::Subscribe { conn, request } => self.subscribe(conn, &request).await,
            Request::Disconnect { conn } => self.disconnect(conn),
        }
    }

    async fn emit(&self, event: TransportEvent) {
        self.events.send(event).await;
    }

    fn link_for(&self, conn: ConnHandle) -> Option<&ActiveLink> {
        self.active.as_ref().filter(|a| a.conn == conn)
    }

    async fn connect(&mut self, conn: ConnHandle, peer: PeerAddress, params: ConnParams) {
        if self.active.is_some() {
            warn!("Split link already up - connect request dropped");
            links::with(|t| t.release(conn));
            self.emit(TransportEvent::ConnectFailed {
                conn,
                reason: HCI_CONN_FAILED_TO_ESTABLISH,
            })
            .await;
            return;
        }

        let address = to_address(&peer);
        let whitelist = [&address];
        let config = central::ConnectConfig {
            scan_config: central::ScanConfig {
                whitelist: Some(&whitelist),
                timeout: CONNECT_TIMEOUT,
                ..Default::default()
            },
            conn_params: raw::ble_gap_conn_params_t {
                min_conn_interval: params.interval_min,
                max_conn_interval: params.interval_max,
                slave_latency: params.latency,
                conn_sup_timeout: params.timeout,
            },
            ..Default::default()
        };

        match central::connect_with_security(self.sd, &config, self.bonder).await {
            Ok(link) => {
                info!("Connected to the peripheral half");
                links::with(|t| {
                    if let Some(l) = t.get_mut(conn) {
                        l.established = true;
                        l.info = Some(ConnectionInfo {
                            interval: params.interval_max,
                            latency: params.latency,
                            rx_phy: Phy::Le1M,
                        });
                    }
                });
                self.active = Some(ActiveLink {
                    conn,
                    link,
                    client: SplitServiceClient::default(),
                    closing: false,
                });
                self.emit(TransportEvent::Connected { conn }).await;
            }
            Err(_) => {
                warn!("Connection to the peripheral half failed");
                links::with(|t| t.release(conn));
                self.emit(TransportEvent::ConnectFailed {
                    conn,
                    reason: HCI_CONN_FAILED_TO_ESTABLISH,
                })
                .await;
            }
        }
    }

    fn update_phy(&mut self, conn: ConnHandle, phy: Phy) {
        let Some(handle) = self.link_for(conn).and_then(|a| a.link.handle()) else {
            return;
        };

        let phys = match phy {
            Phy::Le1M => raw::BLE_GAP_PHY_1MBPS,
            Phy::Le2M => raw::BLE_GAP_PHY_2MBPS,
            Phy::LeCoded => raw::BLE_GAP_PHY_CODED,
        } as u8;
        let request = raw::ble_gap_phys_t {
            tx_phys: phys,
            rx_phys: phys,
        };

        let ret = unsafe { raw::sd_ble_gap_phy_update(handle, &request) };
        if ret != raw::NRF_SUCCESS {
            warn!("PHY update failed (err {})", ret);
            return;
        }
        links::with(|t| {
            if let Some(info) = t.get_mut(conn).and_then(|l| l.info.as_mut()) {
                info.rx_phy = phy;
            }
        });
    }

    async fn secure(&mut self, conn: ConnHandle, level: SecurityLevel) {
        let Some(active) = self.link_for(conn) else {
            return;
        };

        if self.bonder.is_bonded(&active.link) {
            debug!("Encrypting {} with stored keys", conn);
        } else {
            debug!("No keys for {}, pairing", conn);
        }
        let started = match active.link.encrypt() {
            Ok(()) => true,
            Err(EncryptError::PeerKeysNotFound) => active.link.request_pairing().is_ok(),
            Err(_) => false,
        };
        let reached = if started {
            wait_for_secure_link(&active.link).await
        } else {
            security_level(active.link.security_mode())
        };

        links::with(|t| {
            if let Some(l) = t.get_mut(conn) {
                l.security = reached;
            }
        });
        let error = (reached < level).then_some(HCI_AUTH_FAILURE);
        self.emit(TransportEvent::SecurityChanged {
            conn,
            level: reached,
            error,
        })
        .await;
    }

    async fn discover(&mut self, conn: ConnHandle, request: &DiscoverRequest) {
        let Some(active) = self.active.as_mut().filter(|a| a.conn == conn) else {
            return;
        };

        if request.kind == DiscoveryKind::PrimaryService {
            active.client = match gatt_client::discover::<SplitServiceClient>(&active.link).await {
                Ok(client) => client,
                Err(_) => {
                    warn!("Split service not found");
                    SplitServiceClient::default()
                }
            };
        }

        let attribute = active.client.attribute(request);
        self.emit(TransportEvent::Discovered {
            conn,
            kind: request.kind,
            start_handle: request.start_handle,
            attribute,
        })
        .await;
    }

    async fn subscribe(&mut self, conn: ConnHandle, request: &SubscribeRequest) {
        let Some(active) = self.link_for(conn) else {
            return;
        };

        // Notifications on, indications off.
        if gatt_client::write(&active.link, request.ccc_handle, &[0x01, 0x00])
            .await
            .is_err()
        {
            warn!("CCC write failed");
            self.emit(TransportEvent::Notification {
                conn,
                value_handle: request.value_handle,
                payload: None,
            })
            .await;
        }
    }

    fn disconnect(&mut self, conn: ConnHandle) {
        let Some(active) = self.active.as_mut().filter(|a| a.conn == conn) else {
            return;
        };
        active.closing = true;
        if active.link.disconnect().is_err() {
            debug!("Link already down");
        }
    }

    async fn link_lost(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        links::with(|t| t.release(active.conn));

        let reason = if active.closing {
            HCI_LOCAL_HOST_TERMINATED
        } else {
            HCI_REMOTE_USER_TERMINATED
        };
        info!("Split link down (reason {})", reason);
        self.emit(TransportEvent::Disconnected {
            conn: active.conn,
            reason,
        })
        .await;
    }
}

fn adv_event_type(t: &raw::ble_gap_adv_report_type_t) -> AdvEventType {
    if t.scan_response() != 0 {
        AdvEventType::ScanResponse
    } else if t.connectable() != 0 && t.directed() != 0 {
        AdvEventType::ConnectableDirected
    } else if t.connectable() != 0 {
        AdvEventType::ConnectableUndirected
    } else if t.scannable() != 0 {
        AdvEventType::ScannableUndirected
    } else {
        AdvEventType::NonConnectable
    }
}

fn security_level(mode: SecurityMode) -> SecurityLevel {
    match mode {
        SecurityMode::JustWorks => SecurityLevel::Encrypted,
        SecurityMode::Mitm => SecurityLevel::Authenticated,
        SecurityMode::LescMitm => SecurityLevel::SecureConnections,
        _ => SecurityLevel::Open,
    }
}

async fn wait_for_secure_link(link: &Connection) -> SecurityLevel {
    for _ in 0..BLE_SECURITY_WAIT_POLLS {
        match link.security_mode() {
            SecurityMode::NoAccess | SecurityMode::Open => {
                Timer::after(Duration::from_millis(200)).await
            }
            mode => return security_level(mode),
        }
    }
    SecurityLevel::Open
}
