//! Republishes database notifications on the bus.

use std::time::Duration;

use crate::bus::Publisher;
use crate::error::Error;
use crate::session::{NotificationEvent, Session};

/// Drains a session's notification buffer onto the bus.
#[derive(Debug)]
pub struct NotificationForwarder {
    check_interval: Duration,
    forwarded: u64,
}

impl NotificationForwarder {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval,
            forwarded: 0,
        }
    }

    /// Total notifications published.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Publish every buffered notification.
    ///
    /// Returns the suggested wait before checking again when nothing was
    /// pending, and `None` after forwarding at least one notification.
    pub fn drain<S: Session, P: Publisher>(
        &mut self,
        session: &mut S,
        publisher: &mut P,
    ) -> Result<Option<Duration>, Error> {
        let pending = session.pending_notifications();
        if pending == 0 {
            return Ok(Some(self.check_interval));
        }

        tracing::info!(count = pending, "found notifies");
        while let Some(event) = session.pop_notification() {
            tracing::debug!(
                channel = %event.channel,
                process_id = ?event.process_id,
                bytes = event.payload_len(),
                "notify"
            );
            publish_event(publisher, &event)?;
            self.forwarded += 1;
        }

        Ok(None)
    }
}

/// Publish one notification: the channel frame, then the payload frame
/// when there is one.
pub fn publish_event<P: Publisher>(
    publisher: &mut P,
    event: &NotificationEvent,
) -> Result<(), Error> {
    match &event.payload {
        Some(payload) => {
            publisher.send(event.channel.as_bytes(), true)?;
            publisher.send(payload, false)
        }
        None => publisher.send(event.channel.as_bytes(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::os::fd::BorrowedFd;

    use crate::session::Readiness;

    #[derive(Default)]
    struct Buffered {
        events: VecDeque<NotificationEvent>,
    }

    impl Session for Buffered {
        fn poll(&mut self) -> Result<Readiness, Error> {
            Ok(Readiness::Ready)
        }

        fn descriptor(&self) -> Option<BorrowedFd<'_>> {
            None
        }

        fn execute(&mut self, _sql: &str) -> Result<(), Error> {
            Ok(())
        }

        fn pending_notifications(&self) -> usize {
            self.events.len()
        }

        fn pop_notification(&mut self) -> Option<NotificationEvent> {
            self.events.pop_front()
        }

        fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Sends {
        calls: Vec<(Vec<u8>, bool)>,
    }

    impl Publisher for Sends {
        fn send(&mut self, frame: &[u8], more: bool) -> Result<(), Error> {
            self.calls.push((frame.to_vec(), more));
            Ok(())
        }

        fn close(&mut self, _linger: Duration) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn test_idle_suggests_check_interval() {
        let mut forwarder = NotificationForwarder::new(Duration::from_secs(1));
        let mut session = Buffered::default();
        let mut sends = Sends::default();

        let wait = forwarder.drain(&mut session, &mut sends).unwrap();
        assert_eq!(wait, Some(Duration::from_secs(1)));
        assert!(sends.calls.is_empty());
    }

    #[test]
    fn test_drains_everything_in_arrival_order() {
        let mut forwarder = NotificationForwarder::new(Duration::from_secs(1));
        let mut session = Buffered::default();
        session.events.push_back(NotificationEvent::new("orders", "42"));
        session
            .events
            .push_back(NotificationEvent::without_payload("inventory"));
        let mut sends = Sends::default();

        let wait = forwarder.drain(&mut session, &mut sends).unwrap();
        assert_eq!(wait, None);
        assert_eq!(session.pending_notifications(), 0);
        assert_eq!(forwarder.forwarded(), 2);
        assert_eq!(
            sends.calls,
            vec![
                (b"orders".to_vec(), true),
                (b"42".to_vec(), false),
                (b"inventory".to_vec(), false),
            ]
        );
    }

    #[test]
    fn test_binary_payload_unchanged() {
        let payload: Vec<u8> = (0..=255).collect();
        let event = NotificationEvent::new("blobs", payload.clone());
        let mut sends = Sends::default();

        publish_event(&mut sends, &event).unwrap();
        assert_eq!(sends.calls[1], (payload, false));
    }

    #[test]
    fn test_empty_payload_still_two_frames() {
        let event = NotificationEvent::new("orders", "");
        let mut sends = Sends::default();

        publish_event(&mut sends, &event).unwrap();
        assert_eq!(sends.calls.len(), 2);
        assert!(sends.calls[1].0.is_empty());
    }
}
