//! UUIDs of the split link GATT service.

use btuuid::{BluetoothUuid, BluetoothUuid128, BluetoothUuid16};

pub const SPLIT_SERVICE_UUID_RAW: u128 = 0x00000000_0096_7107_c967_c5cfb1c2482a;
pub const POSITION_STATE_UUID_RAW: u128 = 0x00000001_0096_7107_c967_c5cfb1c2482a;
pub const GATT_CCC_UUID_RAW: u16 = 0x2902;

/// Split service, advertised by the peripheral half.
pub const SPLIT_SERVICE_UUID: BluetoothUuid =
    BluetoothUuid::Uuid128(BluetoothUuid128::new(SPLIT_SERVICE_UUID_RAW));

/// Position-state characteristic (notify, 16-byte key bitmap).
pub const POSITION_STATE_UUID: BluetoothUuid =
    BluetoothUuid::Uuid128(BluetoothUuid128::new(POSITION_STATE_UUID_RAW));

/// Client Characteristic Configuration descriptor.
pub const GATT_CCC_UUID: BluetoothUuid =
    BluetoothUuid::Uuid16(BluetoothUuid16::new(GATT_CCC_UUID_RAW));

/// Compare two UUIDs regardless of the width they were encoded with.
pub fn uuid_matches(a: &BluetoothUuid, b: &BluetoothUuid) -> bool {
    a.to_u128() == b.to_u128()
}
