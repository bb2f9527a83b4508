//! Pairing and bonding for the split link.
//!
//! The central only ever talks to one peripheral half, so there is a single
//! bond slot.  Bonding with another device replaces it.  Keys live in RAM
//! only: after a reset the halves pair again.

use core::cell::RefCell;

use defmt::{debug, info};
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{Connection, EncryptionInfo, IdentityKey, MasterId, SecurityMode};
use split_central::transport::PeerAddress;
use static_cell::StaticCell;

use super::transport::from_address;

/// Keys exchanged with the peripheral half.
struct SplitBond {
    peer: PeerAddress,
    master_id: MasterId,
    key: EncryptionInfo,
    identity: IdentityKey,
}

pub struct Bonder {
    bond: RefCell<Option<SplitBond>>,
}

impl Bonder {
    const fn new() -> Self {
        Self {
            bond: RefCell::new(None),
        }
    }

    /// Whether keys for the link's peer are on hand, so encryption can skip
    /// pairing.
    pub fn is_bonded(&self, conn: &Connection) -> bool {
        self.bond.borrow().as_ref().is_some_and(|b| b.matches(conn))
    }
}

impl SplitBond {
    fn matches(&self, conn: &Connection) -> bool {
        let address = conn.peer_address();
        self.peer == from_address(&address) || self.identity.is_match(address)
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::None
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        true
    }

    fn on_bonded(
        &self,
        conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        identity: IdentityKey,
    ) {
        let peer = from_address(&conn.peer_address());
        let previous = self.bond.replace(Some(SplitBond {
            peer,
            master_id,
            key,
            identity,
        }));
        match previous {
            Some(old) if old.peer == peer => debug!("Refreshed keys of {}", peer),
            Some(old) => info!("Bond with {} replaced by {}", old.peer, peer),
            None => info!("Bonded with the peripheral half {}", peer),
        }
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.bond
            .borrow()
            .as_ref()
            .and_then(|b| (b.master_id == master_id).then_some(b.key))
    }

    fn get_peripheral_key(&self, conn: &Connection) -> Option<(MasterId, EncryptionInfo)> {
        self.bond
            .borrow()
            .as_ref()
            .and_then(|b| b.matches(conn).then_some((b.master_id, b.key)))
    }

    fn on_security_update(&self, _conn: &Connection, mode: SecurityMode) {
        info!("Split link security mode: {}", mode);
    }
}

pub fn bonder() -> &'static Bonder {
    static BONDER: StaticCell<Bonder> = StaticCell::new();
    BONDER.init(Bonder::new())
}
