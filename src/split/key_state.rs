//! Key-state bitmap and the edge decoder.
//!
//! Layout (16 bytes, one bit per key position):
//! ```text
//! Byte i, bit j  ->  position i * 8 + j     (bit 0 = LSB)
//! 1 = pressed, 0 = released
//! ```

use crate::config::{POSITION_COUNT, POSITION_STATE_DATA_LEN};
use crate::error::DecodeError;
use crate::event::PositionChanged;

/// Snapshot of every key position on the peripheral half.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyStateBitmap([u8; POSITION_STATE_DATA_LEN]);

impl KeyStateBitmap {
    /// All positions released.
    pub const fn new() -> Self {
        Self([0; POSITION_STATE_DATA_LEN])
    }

    pub const fn from_array(bytes: [u8; POSITION_STATE_DATA_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a notification payload.  Anything but exactly
    /// `POSITION_STATE_DATA_LEN` bytes is rejected.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != POSITION_STATE_DATA_LEN {
            return Err(DecodeError::Length {
                expected: POSITION_STATE_DATA_LEN,
                actual: data.len(),
            });
        }
        let mut bytes = [0u8; POSITION_STATE_DATA_LEN];
        bytes.copy_from_slice(data);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; POSITION_STATE_DATA_LEN] {
        &self.0
    }

    pub fn is_pressed(&self, position: usize) -> bool {
        position < POSITION_COUNT && self.0[position / 8] & (1 << (position % 8)) != 0
    }

    /// Whether no position is held.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

/// Positions that differ between `previous` and `current`, in ascending
/// order, each carrying its state in `current`.
pub fn decode(previous: &KeyStateBitmap, current: &KeyStateBitmap) -> Changes {
    let mut changed = [0u8; POSITION_STATE_DATA_LEN];
    for (c, (p, n)) in changed.iter_mut().zip(previous.0.iter().zip(current.0.iter())) {
        *c = p ^ n;
    }
    Changes {
        changed,
        current: current.0,
        position: 0,
    }
}

/// Iterator returned by [`decode`].
#[derive(Clone, Debug)]
pub struct Changes {
    changed: [u8; POSITION_STATE_DATA_LEN],
    current: [u8; POSITION_STATE_DATA_LEN],
    position: usize,
}

impl Iterator for Changes {
    type Item = PositionChanged;

    fn next(&mut self) -> Option<Self::Item> {
        while self.position < POSITION_COUNT {
            let byte = self.position / 8;
            if self.changed[byte] == 0 {
                // Skip unchanged bytes in one step.
                self.position = (byte + 1) * 8;
                continue;
            }

            let bit = 1u8 << (self.position % 8);
            let position = self.position;
            self.position += 1;

            if self.changed[byte] & bit != 0 {
                return Some(PositionChanged {
                    position: position as u8,
                    pressed: self.current[byte] & bit != 0,
                });
            }
        }
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn bitmap(pairs: &[(usize, u8)]) -> KeyStateBitmap {
        let mut bytes = [0u8; POSITION_STATE_DATA_LEN];
        for &(i, v) in pairs {
            bytes[i] = v;
        }
        KeyStateBitmap::from_array(bytes)
    }

    #[test]
    fn single_press_then_release() {
        let zero = KeyStateBitmap::new();
        let one = bitmap(&[(0, 0x01)]);

        let pressed: Vec<_> = decode(&zero, &one).collect();
        assert_eq!(pressed, [PositionChanged::new(0, true)]);

        let released: Vec<_> = decode(&one, &zero).collect();
        assert_eq!(released, [PositionChanged::new(0, false)]);
    }

    #[test]
    fn identical_bitmaps_produce_nothing() {
        let state = bitmap(&[(3, 0xA5), (15, 0x80)]);
        assert_eq!(decode(&state, &state).count(), 0);
    }

    #[test]
    fn changes_are_ordered_by_byte_then_bit() {
        let previous = bitmap(&[(0, 0b0000_0100), (2, 0b1000_0000)]);
        let current = bitmap(&[(0, 0b0000_0001), (1, 0b0001_0000), (15, 0b1000_0000)]);

        let changes: Vec<_> = decode(&previous, &current).collect();
        assert_eq!(
            changes,
            [
                PositionChanged::new(0, true),
                PositionChanged::new(2, false),
                PositionChanged::new(12, true),
                PositionChanged::new(23, false),
                PositionChanged::new(127, true),
            ]
        );
    }

    #[test]
    fn every_position_reported_once() {
        let all = KeyStateBitmap::from_array([0xFF; POSITION_STATE_DATA_LEN]);
        let changes: Vec<_> = decode(&KeyStateBitmap::new(), &all).collect();
        assert_eq!(changes.len(), POSITION_COUNT);
        for (i, change) in changes.iter().enumerate() {
            assert_eq!(change.position as usize, i);
            assert!(change.pressed);
        }
    }

    #[test]
    fn decode_matches_bitwise_definition() {
        // Deterministic pseudo-random pairs (xorshift).
        let mut seed: u32 = 0x1234_5678;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed as u8
        };

        for _ in 0..64 {
            let mut a = [0u8; POSITION_STATE_DATA_LEN];
            let mut b = [0u8; POSITION_STATE_DATA_LEN];
            a.iter_mut().for_each(|x| *x = next());
            b.iter_mut().for_each(|x| *x = next());
            let (previous, current) = (KeyStateBitmap::from_array(a), KeyStateBitmap::from_array(b));

            let changes: Vec<_> = decode(&previous, &current).collect();
            let expected: Vec<_> = (0..POSITION_COUNT)
                .filter(|&p| previous.is_pressed(p) != current.is_pressed(p))
                .map(|p| PositionChanged::new(p as u8, current.is_pressed(p)))
                .collect();
            assert_eq!(changes, expected);

            // Same inputs, same sequence.
            let again: Vec<_> = decode(&previous, &current).collect();
            assert_eq!(changes, again);
        }
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert_eq!(
            KeyStateBitmap::from_bytes(&[0u8; 15]),
            Err(DecodeError::Length {
                expected: 16,
                actual: 15
            })
        );
        assert!(KeyStateBitmap::from_bytes(&[0u8; 17]).is_err());
        assert!(KeyStateBitmap::from_bytes(&[]).is_err());
        assert!(KeyStateBitmap::from_bytes(&[0u8; 16]).is_ok());
    }

    #[test]
    fn is_pressed_out_of_range_is_false() {
        let all = KeyStateBitmap::from_array([0xFF; POSITION_STATE_DATA_LEN]);
        assert!(all.is_pressed(127));
        assert!(!all.is_pressed(128));
    }
}
