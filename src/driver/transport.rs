//! [`Transport`] backed by the driver task.
//!
//! Requests are queued with `try_send`; a full queue is reported as
//! `Busy`.  Queries are answered from the shared link table.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use nrf_softdevice::ble::{Address, AddressType};
use split_central::config::REQUEST_QUEUE_DEPTH;
use split_central::transport::{
    AddressKind, ConnHandle, ConnParams, ConnectionInfo, DiscoverRequest, PeerAddress, Phy,
    SecurityLevel, SubscribeRequest, Transport,
};
use split_central::TransportError;

use super::{links, Request};

pub type RequestSender = Sender<'static, CriticalSectionRawMutex, Request, REQUEST_QUEUE_DEPTH>;

pub struct SoftdeviceTransport {
    requests: RequestSender,
}

impl SoftdeviceTransport {
    pub fn new(requests: RequestSender) -> Self {
        Self { requests }
    }

    fn push(&self, request: Request) -> Result<(), TransportError> {
        self.requests.try_send(request).map_err(|_| {
            defmt::warn!("BLE request queue full");
            TransportError::Busy
        })
    }
}

impl Transport for SoftdeviceTransport {
    fn start_scan(&mut self) -> Result<(), TransportError> {
        self.push(Request::StartScan)
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        self.push(Request::StopScan)
    }

    fn find_connection(&self, peer: &PeerAddress) -> Option<ConnHandle> {
        links::with(|t| t.find(peer))
    }

    fn connect(
        &mut self,
        peer: &PeerAddress,
        params: &ConnParams,
    ) -> Result<ConnHandle, TransportError> {
        let conn = links::with(|t| t.allocate(*peer));
        if let Err(e) = self.push(Request::Connect {
            conn,
            peer: *peer,
            params: *params,
        }) {
            links::with(|t| t.release(conn));
            return Err(e);
        }
        Ok(conn)
    }

    fn update_phy(&mut self, conn: ConnHandle, phy: Phy) -> Result<(), TransportError> {
        self.push(Request::UpdatePhy { conn, phy })
    }

    fn set_security(
        &mut self,
        conn: ConnHandle,
        level: SecurityLevel,
    ) -> Result<(), TransportError> {
        links::with(|t| t.get(conn).map(|_| ())).ok_or(TransportError::NotConnected)?;
        self.push(Request::SetSecurity { conn, level })
    }

    fn security(&self, conn: ConnHandle) -> SecurityLevel {
        links::with(|t| t.get(conn).map_or(SecurityLevel::Open, |l| l.security))
    }

    fn discover(
        &mut self,
        conn: ConnHandle,
        request: &DiscoverRequest,
    ) -> Result<(), TransportError> {
        if request.start_handle == 0 || request.start_handle > request.end_handle {
            return Err(TransportError::InvalidHandle);
        }
        self.push(Request::Discover {
            conn,
            request: request.clone(),
        })
    }

    fn subscribe(
        &mut self,
        conn: ConnHandle,
        request: &SubscribeRequest,
    ) -> Result<(), TransportError> {
        self.push(Request::Subscribe {
            conn,
            request: *request,
        })
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), TransportError> {
        links::with(|t| t.get(conn).map(|_| ())).ok_or(TransportError::NotConnected)?;
        self.push(Request::Disconnect { conn })
    }

    fn connection_info(&self, conn: ConnHandle) -> Option<ConnectionInfo> {
        links::with(|t| t.get(conn).and_then(|l| l.info))
    }
}

pub fn to_address(peer: &PeerAddress) -> Address {
    let kind = match peer.kind {
        AddressKind::Public => AddressType::Public,
        AddressKind::RandomStatic => AddressType::RandomStatic,
        AddressKind::RandomPrivateResolvable => AddressType::RandomPrivateResolvable,
        AddressKind::RandomPrivateNonResolvable => AddressType::RandomPrivateNonResolvable,
    };
    Address::new(kind, peer.bytes)
}

pub fn from_address(address: &Address) -> PeerAddress {
    let kind = match address.address_type() {
        AddressType::Public => AddressKind::Public,
        AddressType::RandomStatic => AddressKind::RandomStatic,
        AddressType::RandomPrivateResolvable => AddressKind::RandomPrivateResolvable,
        AddressType::RandomPrivateNonResolvable | AddressType::Anonymous => {
            AddressKind::RandomPrivateNonResolvable
        }
    };
    PeerAddress::new(kind, address.bytes())
}
