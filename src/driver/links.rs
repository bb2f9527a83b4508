//! Link table shared between the transport handle and the driver task.
//!
//! The central only ever holds one link, so this is a single slot plus the
//! handle counter.  Access goes through a critical section; nothing here
//! awaits.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use split_central::transport::{ConnHandle, ConnectionInfo, PeerAddress, SecurityLevel};

#[derive(Clone, Copy)]
pub struct Link {
    pub conn: ConnHandle,
    pub peer: PeerAddress,
    /// Set once the stack reports the connection up.
    pub established: bool,
    pub security: SecurityLevel,
    pub info: Option<ConnectionInfo>,
}

pub struct LinkTable {
    next: u16,
    link: Option<Link>,
}

impl LinkTable {
    pub const fn new() -> Self {
        Self {
            next: 1,
            link: None,
        }
    }

    /// Hand out a handle for a connection about to be initiated.
    pub fn allocate(&mut self, peer: PeerAddress) -> ConnHandle {
        let conn = ConnHandle(self.next);
        self.next = self.next.wrapping_add(1).max(1);
        self.link = Some(Link {
            conn,
            peer,
            established: false,
            security: SecurityLevel::Open,
            info: None,
        });
        conn
    }

    /// Established link to `peer`.
    pub fn find(&self, peer: &PeerAddress) -> Option<ConnHandle> {
        self.link
            .filter(|l| l.established && &l.peer == peer)
            .map(|l| l.conn)
    }

    pub fn get(&self, conn: ConnHandle) -> Option<&Link> {
        self.link.as_ref().filter(|l| l.conn == conn)
    }

    pub fn get_mut(&mut self, conn: ConnHandle) -> Option<&mut Link> {
        self.link.as_mut().filter(|l| l.conn == conn)
    }

    pub fn release(&mut self, conn: ConnHandle) {
        if self.get(conn).is_some() {
            self.link = None;
        }
    }
}

static LINKS: Mutex<CriticalSectionRawMutex, RefCell<LinkTable>> =
    Mutex::new(RefCell::new(LinkTable::new()));

/// Run `f` with exclusive access to the link table.
pub fn with<R>(f: impl FnOnce(&mut LinkTable) -> R) -> R {
    LINKS.lock(|links| f(&mut links.borrow_mut()))
}
