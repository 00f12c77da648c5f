use std::{cmp::Ordering, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teloxide::{
    types::{ChatId, Message, MessageId},
    RequestError,
};
use tokio::time::Instant;

/// A message somewhere, identified by its chat and its ID in that chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageTarget {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl MessageTarget {
    #[must_use]
    pub fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        MessageTarget {
            chat_id,
            message_id,
        }
    }

    #[must_use]
    pub fn of(message: &Message) -> Self {
        Self::new(message.chat.id, message.id)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[default]
    DeleteMessage,
}

/// A deletion that should happen at `due_at`, as saved on disk.
/// IDs are kept as plain integers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub chat_id: i64,
    pub message_id: i32,
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub kind: ActionKind,
}

impl ScheduledAction {
    #[must_use]
    pub fn new(target: MessageTarget, due_at: DateTime<Utc>) -> Self {
        ScheduledAction {
            chat_id: target.chat_id.0,
            message_id: target.message_id.0,
            due_at,
            kind: ActionKind::DeleteMessage,
        }
    }

    #[must_use]
    pub fn target(&self) -> MessageTarget {
        MessageTarget::new(ChatId(self.chat_id), MessageId(self.message_id))
    }
}

/// Something that can delete messages. Normally that's the [`teloxide::Bot`].
pub trait MessageDeleter: Send + Sync + 'static {
    fn delete_target(
        &self,
        target: MessageTarget,
    ) -> impl Future<Output = Result<(), RequestError>> + Send;
}

/// An action waiting in the dispatcher's queue.
#[derive(Debug)]
pub(super) struct Armed {
    pub fire_at: Instant,
    /// Order of arming, to keep same-time actions in order.
    pub seq: u64,
    pub target: MessageTarget,
}

impl PartialEq for Armed {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Armed {}

impl PartialOrd for Armed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Armed {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}
