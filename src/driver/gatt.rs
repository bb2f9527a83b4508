//! GATT client for the split service.
//!
//! `gatt_client::discover` walks the whole service in one go.  The result
//! is cached here and the central's three attribute walks are answered
//! from it, each reporting the first attribute inside the requested range.

use heapless::Vec;
use nrf_softdevice::ble::gatt_client::{self, Characteristic, Descriptor, DiscoverError, HvxType};
use nrf_softdevice::ble::{Connection, Uuid};
use split_central::split::uuid::{
    GATT_CCC_UUID, GATT_CCC_UUID_RAW, POSITION_STATE_UUID, POSITION_STATE_UUID_RAW,
    SPLIT_SERVICE_UUID, SPLIT_SERVICE_UUID_RAW,
};
use split_central::transport::{DiscoverRequest, DiscoveredAttribute, DiscoveryKind, MAX_NOTIFICATION_LEN};

fn position_state_uuid() -> Uuid {
    Uuid::new_128(&POSITION_STATE_UUID_RAW.to_le_bytes())
}

fn ccc_uuid() -> Uuid {
    Uuid::new_16(GATT_CCC_UUID_RAW)
}

/// A notification or indication received on the link.
pub struct Hvx {
    pub handle: u16,
    pub data: Vec<u8, MAX_NOTIFICATION_LEN>,
}

/// Handles found on the peripheral.  Empty until discovery ran.
#[derive(Default)]
pub struct SplitServiceClient {
    service: Option<u16>,
    /// (declaration, value)
    characteristic: Option<(u16, u16)>,
    ccc: Option<u16>,
}

impl SplitServiceClient {
    /// First cached attribute matching `request`.
    pub fn attribute(&self, request: &DiscoverRequest) -> Option<DiscoveredAttribute> {
        let in_range = |handle: u16| (request.start_handle..=request.end_handle).contains(&handle);

        match request.kind {
            DiscoveryKind::PrimaryService => self.service.filter(|&h| in_range(h)).map(|handle| {
                DiscoveredAttribute {
                    handle,
                    uuid: SPLIT_SERVICE_UUID,
                    value_handle: None,
                }
            }),
            DiscoveryKind::Characteristic => self
                .characteristic
                .filter(|&(decl, _)| in_range(decl))
                .map(|(handle, value)| DiscoveredAttribute {
                    handle,
                    uuid: POSITION_STATE_UUID,
                    value_handle: Some(value),
                }),
            DiscoveryKind::Descriptor => self.ccc.filter(|&h| in_range(h)).map(|handle| {
                DiscoveredAttribute {
                    handle,
                    uuid: GATT_CCC_UUID,
                    value_handle: None,
                }
            }),
        }
    }
}

impl gatt_client::Client for SplitServiceClient {
    type Event = Hvx;

    fn uuid() -> Uuid {
        Uuid::new_128(&SPLIT_SERVICE_UUID_RAW.to_le_bytes())
    }

    fn new_undiscovered(_conn: Connection) -> Self {
        Self::default()
    }

    fn discovered_characteristic(
        &mut self,
        characteristic: &Characteristic,
        descriptors: &[Descriptor],
    ) {
        if self.characteristic.is_some() || characteristic.uuid != Some(position_state_uuid()) {
            return;
        }

        // The service declaration sits right before its first characteristic.
        self.service = Some(characteristic.handle_decl.saturating_sub(1));
        self.characteristic = Some((characteristic.handle_decl, characteristic.handle_value));
        self.ccc = descriptors
            .iter()
            .find(|d| d.uuid == Some(ccc_uuid()))
            .map(|d| d.handle);
    }

    fn discovery_complete(&mut self) -> Result<(), DiscoverError> {
        // Missing pieces surface as empty walks.
        Ok(())
    }

    fn on_hvx(&self, _conn: &Connection, type_: HvxType, handle: u16, data: &[u8]) -> Option<Hvx> {
        if !matches!(type_, HvxType::Notification) {
            return None;
        }
        match Vec::from_slice(data) {
            Ok(data) => Some(Hvx { handle, data }),
            Err(()) => {
                defmt::warn!("Notification of {} bytes dropped", data.len());
                None
            }
        }
    }
}
