//! Subscription Manager - owns the notification subscription on the
//! position-state characteristic and turns each payload into key events.

use crate::config::BaselinePolicy;
use crate::error::{DecodeError, TransportError};
use crate::event::EventSink;
use crate::split::key_state::{decode, KeyStateBitmap};
use crate::transport::{ConnHandle, SubscribeRequest, Transport};

/// Handles of an armed subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubscriptionRecord {
    pub value_handle: u16,
    pub ccc_handle: u16,
}

/// Result of [`Subscription::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubscribeOutcome {
    /// A new subscription was armed.
    Subscribed,
    /// The same subscription was already active; nothing changed.
    AlreadySubscribed,
}

/// What a notification did to the subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotificationOutcome {
    /// The payload was decoded; this many events were raised.
    Decoded(usize),
    /// First payload stored as the baseline without events.
    Baseline,
    /// The stack reported the subscription gone; it is now cleared.
    Unsubscribed,
    /// Not subscribed, or a different value handle.  Dropped.
    Ignored,
}

/// Subscription state plus the last key bitmap seen on it.
#[derive(Debug, Default)]
pub struct Subscription {
    record: Option<SubscriptionRecord>,
    state: KeyStateBitmap,
    baseline_pending: bool,
}

impl Subscription {
    pub const fn new() -> Self {
        Self {
            record: None,
            state: KeyStateBitmap::new(),
            baseline_pending: false,
        }
    }

    pub fn record(&self) -> Option<&SubscriptionRecord> {
        self.record.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.record.is_some()
    }

    /// Last bitmap received on this subscription.
    pub fn key_state(&self) -> &KeyStateBitmap {
        &self.state
    }

    /// Enable notifications for `request`.
    ///
    /// Subscribing again with the same handles is a no-op success, as is the
    /// stack reporting the subscription already present.  A new subscription
    /// starts from an all-released bitmap.
    pub fn subscribe<T: Transport>(
        &mut self,
        transport: &mut T,
        conn: ConnHandle,
        request: &SubscribeRequest,
        first_notification: BaselinePolicy,
    ) -> Result<SubscribeOutcome, TransportError> {
        let wanted = SubscriptionRecord {
            value_handle: request.value_handle,
            ccc_handle: request.ccc_handle,
        };
        if self.record == Some(wanted) {
            debug!("[SUBSCRIBED] already active on {}", wanted.value_handle);
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        match transport.subscribe(conn, request) {
            Ok(()) | Err(TransportError::AlreadySubscribed) => {}
            Err(e) => {
                error!("Subscribe failed (err {})", e);
                return Err(e);
            }
        }

        debug!("[SUBSCRIBED] value handle {}", wanted.value_handle);
        self.record = Some(wanted);
        self.state = KeyStateBitmap::new();
        self.baseline_pending = first_notification == BaselinePolicy::BaselineOnly;
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Process one notification.
    ///
    /// A wrong-length payload raises nothing and leaves the stored bitmap
    /// untouched.
    pub fn on_notification<S: EventSink>(
        &mut self,
        value_handle: u16,
        payload: Option<&[u8]>,
        sink: &mut S,
        release_on_unsubscribe: bool,
    ) -> Result<NotificationOutcome, DecodeError> {
        let Some(record) = self.record else {
            trace!("notification on {} without subscription", value_handle);
            return Ok(NotificationOutcome::Ignored);
        };
        if record.value_handle != value_handle {
            trace!("notification on foreign handle {}", value_handle);
            return Ok(NotificationOutcome::Ignored);
        }

        let Some(data) = payload else {
            debug!("[UNSUBSCRIBED]");
            self.clear(sink, release_on_unsubscribe);
            return Ok(NotificationOutcome::Unsubscribed);
        };

        debug!("[NOTIFICATION] length {}", data.len());

        let current = match KeyStateBitmap::from_bytes(data) {
            Ok(bitmap) => bitmap,
            Err(e) => {
                warn!("Dropping key state notification: {}", e);
                return Err(e);
            }
        };

        if self.baseline_pending {
            self.baseline_pending = false;
            self.state = current;
            debug!("Key state baseline stored");
            return Ok(NotificationOutcome::Baseline);
        }

        let mut raised = 0;
        for change in decode(&self.state, &current) {
            debug!("Trigger key position state change for {}", change.position);
            sink.raise(change);
            raised += 1;
        }
        self.state = current;
        Ok(NotificationOutcome::Decoded(raised))
    }

    /// Drop the subscription (disconnect or stack-side unsubscribe).
    ///
    /// With `release_held` every position still pressed is reported
    /// released, in ascending order.
    pub fn clear<S: EventSink>(&mut self, sink: &mut S, release_held: bool) {
        if release_held {
            for change in decode(&self.state, &KeyStateBitmap::new()) {
                debug!("Releasing held position {}", change.position);
                sink.raise(change);
            }
        }
        self.record = None;
        self.state = KeyStateBitmap::new();
        self.baseline_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PositionChanged;
    use crate::split::tests::MockTransport;
    use std::vec::Vec;

    struct Recorder(Vec<PositionChanged>);

    impl EventSink for Recorder {
        fn raise(&mut self, event: PositionChanged) {
            self.0.push(event);
        }
    }

    const CONN: ConnHandle = ConnHandle(1);
    const REQUEST: SubscribeRequest = SubscribeRequest {
        value_handle: 21,
        ccc_handle: 23,
    };

    fn payload(byte0: u8) -> [u8; 16] {
        let mut p = [0u8; 16];
        p[0] = byte0;
        p
    }

    #[test]
    fn repeated_subscribe_is_idempotent() {
        let mut transport = MockTransport::default();
        let mut sub = Subscription::new();

        let first = sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero);
        let second = sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero);

        assert_eq!(first, Ok(SubscribeOutcome::Subscribed));
        assert_eq!(second, Ok(SubscribeOutcome::AlreadySubscribed));
        assert_eq!(transport.subscribe_calls(), 1);
    }

    #[test]
    fn repeated_subscribe_keeps_decode_stream() {
        let mut transport = MockTransport::default();
        let mut sub = Subscription::new();
        let mut sink = Recorder(Vec::new());

        sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero)
            .unwrap();
        sub.on_notification(21, Some(&payload(0x01)), &mut sink, true)
            .unwrap();
        sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero)
            .unwrap();
        // Bitmap survives the repeat: no second press for position 0.
        sub.on_notification(21, Some(&payload(0x01)), &mut sink, true)
            .unwrap();

        assert_eq!(sink.0, [PositionChanged::new(0, true)]);
    }

    #[test]
    fn stack_reporting_already_subscribed_is_success() {
        let mut transport = MockTransport::default();
        transport.subscribe_result = Err(TransportError::AlreadySubscribed);
        let mut sub = Subscription::new();

        let outcome = sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero);
        assert_eq!(outcome, Ok(SubscribeOutcome::Subscribed));
        assert!(sub.is_active());
    }

    #[test]
    fn subscribe_failure_leaves_record_empty() {
        let mut transport = MockTransport::default();
        transport.subscribe_result = Err(TransportError::Busy);
        let mut sub = Subscription::new();

        let outcome = sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero);
        assert_eq!(outcome, Err(TransportError::Busy));
        assert!(!sub.is_active());
    }

    #[test]
    fn length_mismatch_raises_nothing() {
        let mut transport = MockTransport::default();
        let mut sub = Subscription::new();
        let mut sink = Recorder(Vec::new());
        sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero)
            .unwrap();

        let result = sub.on_notification(21, Some(&[0xFF; 15]), &mut sink, true);
        assert_eq!(
            result,
            Err(DecodeError::Length {
                expected: 16,
                actual: 15
            })
        );
        assert!(sink.0.is_empty());
        assert!(sub.key_state().is_empty());
    }

    #[test]
    fn baseline_policy_swallows_first_payload() {
        let mut transport = MockTransport::default();
        let mut sub = Subscription::new();
        let mut sink = Recorder(Vec::new());
        sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::BaselineOnly)
            .unwrap();

        assert_eq!(
            sub.on_notification(21, Some(&payload(0x03)), &mut sink, true),
            Ok(NotificationOutcome::Baseline)
        );
        assert!(sink.0.is_empty());

        assert_eq!(
            sub.on_notification(21, Some(&payload(0x01)), &mut sink, true),
            Ok(NotificationOutcome::Decoded(1))
        );
        assert_eq!(sink.0, [PositionChanged::new(1, false)]);
    }

    #[test]
    fn diff_against_zero_reports_already_held_keys() {
        let mut transport = MockTransport::default();
        let mut sub = Subscription::new();
        let mut sink = Recorder(Vec::new());
        sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero)
            .unwrap();

        sub.on_notification(21, Some(&payload(0x03)), &mut sink, true)
            .unwrap();
        assert_eq!(
            sink.0,
            [PositionChanged::new(0, true), PositionChanged::new(1, true)]
        );
    }

    #[test]
    fn foreign_handle_is_ignored() {
        let mut transport = MockTransport::default();
        let mut sub = Subscription::new();
        let mut sink = Recorder(Vec::new());
        sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero)
            .unwrap();

        assert_eq!(
            sub.on_notification(40, Some(&payload(0x01)), &mut sink, true),
            Ok(NotificationOutcome::Ignored)
        );
        assert!(sink.0.is_empty());
    }

    #[test]
    fn unsubscribe_releases_held_positions() {
        let mut transport = MockTransport::default();
        let mut sub = Subscription::new();
        let mut sink = Recorder(Vec::new());
        sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero)
            .unwrap();
        sub.on_notification(21, Some(&payload(0x05)), &mut sink, true)
            .unwrap();
        sink.0.clear();

        assert_eq!(
            sub.on_notification(21, None, &mut sink, true),
            Ok(NotificationOutcome::Unsubscribed)
        );
        assert_eq!(
            sink.0,
            [PositionChanged::new(0, false), PositionChanged::new(2, false)]
        );
        assert!(!sub.is_active());
    }

    #[test]
    fn unsubscribe_without_release_is_silent() {
        let mut transport = MockTransport::default();
        let mut sub = Subscription::new();
        let mut sink = Recorder(Vec::new());
        sub.subscribe(&mut transport, CONN, &REQUEST, BaselinePolicy::DiffAgainstZero)
            .unwrap();
        sub.on_notification(21, Some(&payload(0x05)), &mut sink, false)
            .unwrap();
        sink.0.clear();

        sub.on_notification(21, None, &mut sink, false).unwrap();
        assert!(sink.0.is_empty());
        assert_eq!(
            sub.on_notification(21, Some(&payload(0x00)), &mut sink, false),
            Ok(NotificationOutcome::Ignored)
        );
    }
}
