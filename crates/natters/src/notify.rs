//! Best-effort side-channel pushes.

use crate::metrics::counters;
use crate::registry::SessionRegistry;
use crate::store::FriendStore;
use natter_common::frame::{Envelope, Kind, Notice};
use natter_common::{unix_now, UserId};
use tokio::sync::mpsc::error::TrySendError;

/// A notification to push to `to` about something `from` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// What happened.
    pub notice: Notice,
    /// Identity that caused the notification.
    pub from: UserId,
    /// Identity to notify.
    pub to: UserId,
    /// Human-readable text.
    pub content: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl Notification {
    /// `from` sent `to` a friend request carrying `message`.
    #[must_use]
    pub fn friend_request(from: &UserId, to: &UserId, message: &str) -> Self {
        Self {
            notice: Notice::FriendRequest,
            from: from.clone(),
            to: to.clone(),
            content: message.to_owned(),
            timestamp: unix_now(),
        }
    }

    /// `from` delivered a message of `kind` to `to`.
    #[must_use]
    pub fn chat_alert(from: &UserId, to: &UserId, kind: Kind) -> Self {
        Self {
            notice: Notice::ChatAlert,
            from: from.clone(),
            to: to.clone(),
            content: format!("new {} message from {from}", kind.as_str()),
            timestamp: unix_now(),
        }
    }

    /// Wire form of this notification.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            from: self.from.to_string(),
            to: self.to.to_string(),
            content: self.content.clone(),
            timestamp: self.timestamp,
            ..Envelope::new(Kind::Notification(self.notice))
        }
    }
}

/// What happened to a dispatched notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued on the recipient's connection.
    Delivered,
    /// The recipient has no session.
    Offline,
    /// The recipient has DND set for the sender.
    Muted,
    /// The recipient's queue was full or closing.
    Dropped,
}

impl Dispatch {
    fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Offline => "offline",
            Self::Muted => "muted",
            Self::Dropped => "dropped",
        }
    }
}

/// Pushes notifications to bound sessions, honouring the recipient's DND
/// setting for the sender. Nothing is stored or retried.
pub struct NotificationDispatcher<'a> {
    registry: &'a SessionRegistry,
    store: &'a dyn FriendStore,
}

impl<'a> NotificationDispatcher<'a> {
    /// Create a dispatcher over the given registry and friend store.
    #[must_use]
    pub fn new(registry: &'a SessionRegistry, store: &'a dyn FriendStore) -> Self {
        Self { registry, store }
    }

    /// Push `notification` if its recipient is online and has not muted the
    /// sender. The DND read and the push are separate steps.
    pub fn dispatch(&self, notification: &Notification) -> Dispatch {
        let outcome = self.try_dispatch(notification);
        counters::notifications_total(outcome.as_str());
        tracing::trace!(
            notice = ?notification.notice,
            from = %notification.from,
            to = %notification.to,
            outcome = outcome.as_str(),
            "notification dispatched"
        );
        outcome
    }

    fn try_dispatch(&self, notification: &Notification) -> Dispatch {
        let Some(handle) = self.registry.lookup(&notification.to) else {
            return Dispatch::Offline;
        };
        match self.store.get_dnd(&notification.to, &notification.from) {
            Ok(true) => return Dispatch::Muted,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(to = %notification.to, "dnd lookup failed, dropping notification: {}", e);
                return Dispatch::Dropped;
            }
        }
        match handle.tx.try_send(notification.to_envelope().serialize()) {
            Ok(()) => Dispatch::Delivered,
            Err(TrySendError::Full(_) | TrySendError::Closed(_)) => Dispatch::Dropped,
        }
    }
}
