//! Single-slot rendezvous for checksum replies.
//!
//! During a checksum handshake the inbound dispatcher deposits the reply
//! byte here and the sender drains it. The slot holds at most one value and
//! is cleared when read. A newer deposit replaces an unread one, so the
//! sender always sees the last byte the hub sent.
//!
//! ```text
//! dispatcher ──deposit(Some(b))──► [ slot ] ──take()──► send_message
//!                                     │
//!                                  Notify (wakes the waiting sender)
//! ```

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// One-shot single-slot mailbox.
///
/// A deposited `None` records that the hub answered with an empty fragment,
/// which the sender reports as a missing reply rather than a timeout.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Option<Option<u8>>>,
    notify: Notify,
}

impl Mailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reply, replacing any unread one, and wake the waiter.
    pub fn deposit(&self, reply: Option<u8>) {
        *self.lock() = Some(reply);
        self.notify.notify_one();
    }

    /// Take the reply if one is waiting.
    pub fn try_take(&self) -> Option<Option<u8>> {
        self.lock().take()
    }

    /// Discard any unread reply.
    pub fn clear(&self) {
        self.lock().take();
    }

    /// Check if a reply is waiting.
    pub fn is_full(&self) -> bool {
        self.lock().is_some()
    }

    /// Wait for a reply for at most `timeout`.
    ///
    /// Returns `None` if nothing arrived in time. The wait is woken by the
    /// deposit; `poll` only bounds how long a missed wakeup can go unnoticed.
    pub async fn take_within(&self, timeout: Duration, poll: Duration) -> Option<Option<u8>> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();

            if let Some(reply) = self.try_take() {
                return Some(reply);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wake_at = std::cmp::min(deadline, now + poll);

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Option<u8>>> {
        // The slot is a plain value; a panic while holding it cannot leave it torn.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_mailbox_starts_empty() {
        let mailbox = Mailbox::new();
        assert!(!mailbox.is_full());
        assert_eq!(mailbox.try_take(), None);
    }

    #[test]
    fn test_take_clears_slot() {
        let mailbox = Mailbox::new();
        mailbox.deposit(Some(0x42));

        assert!(mailbox.is_full());
        assert_eq!(mailbox.try_take(), Some(Some(0x42)));
        assert_eq!(mailbox.try_take(), None);
    }

    #[test]
    fn test_newer_deposit_replaces_unread() {
        let mailbox = Mailbox::new();
        mailbox.deposit(Some(1));
        mailbox.deposit(Some(2));

        assert_eq!(mailbox.try_take(), Some(Some(2)));
        assert!(!mailbox.is_full());
    }

    #[test]
    fn test_empty_reply_is_distinct() {
        let mailbox = Mailbox::new();
        mailbox.deposit(None);

        assert_eq!(mailbox.try_take(), Some(None));
    }

    #[test]
    fn test_clear() {
        let mailbox = Mailbox::new();
        mailbox.deposit(Some(9));
        mailbox.clear();
        assert!(!mailbox.is_full());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_within_immediate() {
        let mailbox = Mailbox::new();
        mailbox.deposit(Some(7));

        let start = Instant::now();
        let reply = mailbox
            .take_within(Duration::from_millis(500), Duration::from_millis(10))
            .await;

        assert_eq!(reply, Some(Some(7)));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_within_timeout_is_exact() {
        let mailbox = Mailbox::new();

        let start = Instant::now();
        let reply = mailbox
            .take_within(Duration::from_millis(500), Duration::from_millis(10))
            .await;

        assert_eq!(reply, None);
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_within_wakes_on_deposit() {
        let mailbox = Arc::new(Mailbox::new());

        let depositor = mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(123)).await;
            depositor.deposit(Some(0xAB));
        });

        let start = Instant::now();
        let reply = mailbox
            .take_within(Duration::from_millis(500), Duration::from_millis(10))
            .await;

        assert_eq!(reply, Some(Some(0xAB)));
        assert_eq!(start.elapsed(), Duration::from_millis(123));
    }
}
