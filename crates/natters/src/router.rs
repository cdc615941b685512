use crate::metrics::counters;
use crate::notify::{Notification, NotificationDispatcher};
use crate::registry::SessionRegistry;
use crate::store::FriendStore;
use natter_common::frame::Envelope;
use natter_common::types::reply_text;
use natter_common::UserId;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;

/// Why a frame could not be forwarded. The frame is dropped either way.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouteError {
    /// The recipient has no bound session.
    #[error("recipient {0} offline")]
    Offline(UserId),
    /// The recipient's outbound queue is full.
    #[error("recipient {0} busy")]
    Busy(UserId),
}

impl RouteError {
    /// Text of the `error` frame sent back to the sender.
    #[must_use]
    pub fn reply_text(&self) -> &'static str {
        match self {
            Self::Offline(_) => reply_text::RECIPIENT_OFFLINE,
            Self::Busy(_) => reply_text::RECIPIENT_BUSY,
        }
    }
}

/// Forwards addressed frames to the recipient's connection.
///
/// Delivery is at-most-once: the frame is queued on the recipient's bounded
/// outbound queue or dropped. A forwarded chat-class frame is followed by a
/// chat alert through the [`NotificationDispatcher`] when alerts are on.
pub struct MessageRouter<'a> {
    registry: &'a SessionRegistry,
    notifier: NotificationDispatcher<'a>,
    chat_alerts: bool,
}

impl<'a> MessageRouter<'a> {
    /// Create a router over the given registry and friend store.
    #[must_use]
    pub fn new(registry: &'a SessionRegistry, store: &'a dyn FriendStore, chat_alerts: bool) -> Self {
        Self {
            registry,
            notifier: NotificationDispatcher::new(registry, store),
            chat_alerts,
        }
    }

    /// Forward `frame` verbatim to the session bound to `frame.to`.
    ///
    /// `frame.from` must already carry the sender's bound identity.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if the recipient is offline or its queue is full.
    pub fn route(&self, frame: &Envelope) -> Result<(), RouteError> {
        let to = UserId::from(frame.to.as_str());
        let Some(handle) = self.registry.lookup(&to) else {
            counters::frames_dropped_total("offline");
            return Err(RouteError::Offline(to));
        };

        match handle.tx.try_send(frame.serialize()) {
            Ok(()) => {
                counters::frames_routed_total(frame.kind.as_str());
            }
            Err(TrySendError::Full(_)) => {
                counters::frames_dropped_total("busy");
                tracing::debug!(to = %to, conn = %handle.conn_id, "recipient queue full, dropping frame");
                return Err(RouteError::Busy(to));
            }
            Err(TrySendError::Closed(_)) => {
                counters::frames_dropped_total("offline");
                self.registry.unbind(&to, handle.conn_id);
                return Err(RouteError::Offline(to));
            }
        }

        if self.chat_alerts && frame.kind.is_routable() {
            let from = UserId::from(frame.from.as_str());
            self.notifier
                .dispatch(&Notification::chat_alert(&from, &to, frame.kind));
        }
        Ok(())
    }
}
