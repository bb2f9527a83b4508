//! Unified error types for the split central.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging.

/// Top-level error type used across the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The radio stack rejected or could not issue a request.
    Transport(TransportError),

    /// A key-state notification could not be decoded.
    Decode(DecodeError),

    /// An attribute walk ended before the key-state descriptor was found.
    DiscoveryIncomplete,

    /// An advertisement data element had an impossible length.
    MalformedAdvertisement,
}

/// Failures reported by the radio stack when a request is issued.
///
/// Results of accepted requests arrive later as callbacks; these only cover
/// the synchronous "could not even start" case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// Radio not enabled / not ready.
    Unavailable,
    /// Request queue full or another operation in flight.
    Busy,
    /// The connection handle does not refer to a live link.
    NotConnected,
    /// Notifications are already enabled for this characteristic.
    AlreadySubscribed,
    /// The attribute handle range or handle is invalid.
    InvalidHandle,
    /// Raw stack error code.
    Raw(u32),
}

/// Key-state payload decoding errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Payload length differs from the fixed bitmap length.
    Length { expected: usize, actual: usize },
}

// Convenience conversions

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}
