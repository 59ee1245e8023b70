//! Bounded trailing window of recently sent notifications.
//!
//! The gateway reports failures asynchronously, naming only the sequence
//! identifier of the rejected notification. Everything written after that
//! notification was dropped by the gateway, so the connection keeps the most
//! recent notifications around to replay them. Anything older than the
//! window is gone for good.

use std::collections::VecDeque;

use crate::notification::Notification;

/// FIFO cache of notifications in transmission order.
#[derive(Debug, Default)]
pub struct SendCache {
    entries: VecDeque<Notification>,
    capacity: usize,
}

/// Outcome of matching an error report against the cache.
#[derive(Debug, Default, PartialEq)]
pub struct Recovery {
    /// The notification the gateway rejected, if it was still cached.
    pub failed: Option<Notification>,
    /// Notifications to replay, in their original order.
    pub resend: Vec<Notification>,
}

impl SendCache {
    /// Create an empty cache holding at most `capacity` notifications.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a notification, evicting and returning the oldest entry when
    /// the bound is exceeded.
    pub fn push(&mut self, notification: Notification) -> Option<Notification> {
        self.entries.push_back(notification);
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Number of cached notifications.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether the cache holds no notifications.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Maximum number of cached notifications.
    #[must_use]
    pub fn capacity(&self) -> usize { self.capacity }

    /// Iterate over cached notifications, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Notification> { self.entries.iter() }

    /// Swap the contents out for an empty cache with the same bound.
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::new(self.capacity))
    }

    /// Split the cache around the notification with `sequence_id`.
    ///
    /// Entries up to and including the first match are consumed; the match
    /// becomes [`Recovery::failed`] and every later entry is returned for
    /// replay. When nothing matches, the whole cache is replayed.
    #[must_use]
    pub fn recover(self, sequence_id: u32) -> Recovery {
        let mut entries = self.entries;
        match entries
            .iter()
            .position(|note| note.sequence_id() == Some(sequence_id))
        {
            Some(index) => {
                let resend = entries.split_off(index + 1);
                Recovery {
                    failed: entries.pop_back(),
                    resend: resend.into(),
                }
            }
            None => Recovery {
                failed: None,
                resend: entries.into(),
            },
        }
    }
}
