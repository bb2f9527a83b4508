//! Discovery State Machine - walks the peripheral's attribute table to the
//! CCC descriptor of the position-state characteristic.
//!
//! Three walks run back to back on one link:
//!
//! 1. **Service** - primary service `SPLIT_SERVICE_UUID` in `[0x0001, 0xFFFF]`.
//! 2. **Characteristic** - `POSITION_STATE_UUID`, starting right after the
//!    service declaration.  The value handle is kept for subscribing.
//! 3. **Descriptor** - `GATT_CCC_UUID`, starting two handles after the
//!    characteristic declaration (past the declaration and value).
//!
//! The start of the search range only moves forward.

use btuuid::BluetoothUuid;

use crate::split::uuid::{uuid_matches, GATT_CCC_UUID, POSITION_STATE_UUID, SPLIT_SERVICE_UUID};
use crate::transport::{DiscoverRequest, DiscoveredAttribute, DiscoveryKind, SubscribeRequest};

/// First valid attribute handle.
pub const ATT_FIRST_HANDLE: u16 = 0x0001;
/// Last valid attribute handle.
pub const ATT_LAST_HANDLE: u16 = 0xFFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryPhase {
    Service,
    Characteristic,
    Descriptor,
}

impl DiscoveryPhase {
    fn kind(self) -> DiscoveryKind {
        match self {
            DiscoveryPhase::Service => DiscoveryKind::PrimaryService,
            DiscoveryPhase::Characteristic => DiscoveryKind::Characteristic,
            DiscoveryPhase::Descriptor => DiscoveryKind::Descriptor,
        }
    }

    fn target(self) -> BluetoothUuid {
        match self {
            DiscoveryPhase::Service => SPLIT_SERVICE_UUID,
            DiscoveryPhase::Characteristic => POSITION_STATE_UUID,
            DiscoveryPhase::Descriptor => GATT_CCC_UUID,
        }
    }
}

/// What the walk should do after one attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryStep {
    /// Not the attribute we are looking for; keep walking.
    Continue,
    /// Phase matched; issue this walk next.
    Next(DiscoverRequest),
    /// CCC descriptor found; discovery is complete.
    Subscribe(SubscribeRequest),
    /// Matched at the end of the handle space, nothing can follow.
    Exhausted,
}

/// Where the walk currently is.  Lives only while discovery runs.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveryCursor {
    phase: DiscoveryPhase,
    start_handle: u16,
    end_handle: u16,
    value_handle: Option<u16>,
}

impl Default for DiscoveryCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryCursor {
    /// Service phase over the full handle space.
    pub const fn new() -> Self {
        Self {
            phase: DiscoveryPhase::Service,
            start_handle: ATT_FIRST_HANDLE,
            end_handle: ATT_LAST_HANDLE,
            value_handle: None,
        }
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    pub fn start_handle(&self) -> u16 {
        self.start_handle
    }

    pub fn end_handle(&self) -> u16 {
        self.end_handle
    }

    /// Value handle recorded in the characteristic phase.
    pub fn value_handle(&self) -> Option<u16> {
        self.value_handle
    }

    /// The walk for the current phase.
    pub fn request(&self) -> DiscoverRequest {
        DiscoverRequest {
            kind: self.phase.kind(),
            uuid: self.phase.target(),
            start_handle: self.start_handle,
            end_handle: self.end_handle,
        }
    }

    /// Feed one attribute of the current walk.
    pub fn on_attribute(&mut self, attr: &DiscoveredAttribute) -> DiscoveryStep {
        trace!("[ATTRIBUTE] handle {}", attr.handle);

        if attr.handle < self.start_handle || !uuid_matches(&attr.uuid, &self.phase.target()) {
            return DiscoveryStep::Continue;
        }

        match self.phase {
            DiscoveryPhase::Service => {
                let Some(start) = attr.handle.checked_add(1) else {
                    return DiscoveryStep::Exhausted;
                };
                self.advance(DiscoveryPhase::Characteristic, start);
                DiscoveryStep::Next(self.request())
            }
            DiscoveryPhase::Characteristic => {
                let value_handle = match attr.value_handle {
                    Some(handle) => handle,
                    None => match attr.handle.checked_add(1) {
                        Some(handle) => handle,
                        None => return DiscoveryStep::Exhausted,
                    },
                };
                let Some(start) = attr.handle.checked_add(2) else {
                    return DiscoveryStep::Exhausted;
                };
                self.value_handle = Some(value_handle);
                self.advance(DiscoveryPhase::Descriptor, start);
                DiscoveryStep::Next(self.request())
            }
            DiscoveryPhase::Descriptor => match self.value_handle {
                Some(value_handle) => DiscoveryStep::Subscribe(SubscribeRequest {
                    value_handle,
                    ccc_handle: attr.handle,
                }),
                None => DiscoveryStep::Exhausted,
            },
        }
    }

    fn advance(&mut self, phase: DiscoveryPhase, start_handle: u16) {
        debug_assert!(start_handle >= self.start_handle);
        debug!("Discovery {} -> {} from handle {}", self.phase, phase, start_handle);
        self.phase = phase;
        self.start_handle = start_handle;
    }
}
