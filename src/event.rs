//! Key position events handed to the application event bus.

/// A key position changed state on the peripheral half.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PositionChanged {
    /// Key position, `0..POSITION_COUNT`.
    pub position: u8,
    pub pressed: bool,
}

impl PositionChanged {
    pub const fn new(position: u8, pressed: bool) -> Self {
        Self { position, pressed }
    }
}

/// Downstream consumer of decoded key events.
///
/// Called from the transport dispatch context; implementations must not
/// block (queue or drop instead).
pub trait EventSink {
    fn raise(&mut self, event: PositionChanged);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn raise(&mut self, event: PositionChanged) {
        (**self).raise(event)
    }
}

impl<const N: usize> EventSink for heapless::Vec<PositionChanged, N> {
    fn raise(&mut self, event: PositionChanged) {
        if self.push(event).is_err() {
            warn!("event buffer full - dropping position {}", event.position);
        }
    }
}
