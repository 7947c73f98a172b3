use async_trait::async_trait;
use futures::Stream;
use std::{
    collections::HashSet,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use inbox_api::{Message, MessageId, NewMessage, Participant};

pub mod memory;
pub mod realtime;
pub mod rest;

pub use memory::MemorySource;
pub use rest::RestSource;

/// Which inserts a subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertFilter {
    /// Only messages addressed to this participant.
    pub receiver: Participant,
}

impl InsertFilter {
    pub fn addressed_to(receiver: Participant) -> Self {
        Self { receiver }
    }

    pub fn matches(&self, msg: &Message) -> bool {
        msg.is_to(&self.receiver)
    }
}

/// Shared store of chat messages with realtime insert notifications.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Every message between `a` and `b` in either direction, oldest first.
    async fn fetch_conversation(&self, a: Participant, b: Participant) -> Result<Vec<Message>>;

    /// Every message sent by or to `me`, oldest first.
    async fn fetch_inbox(&self, me: Participant) -> Result<Vec<Message>>;

    /// Store a new message and return the stored row.
    async fn insert(&self, msg: NewMessage) -> Result<Message>;

    /// Remove a message for both participants.
    async fn delete(&self, id: MessageId) -> Result<()>;

    /// Flag every unread message from `from` to `to` as read.
    async fn mark_read(&self, from: Participant, to: Participant) -> Result<()>;

    /// Which of `ids` are still stored.
    async fn existing(&self, ids: &[MessageId]) -> Result<HashSet<MessageId>>;

    /// Start receiving inserts matching `filter`.
    async fn subscribe(&self, filter: InsertFilter) -> Result<Subscription>;
}

/// Live feed of inserted messages. Dropping it releases the backend
/// subscription.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Wrap the receiving half of a feed. `cancel` is triggered on release so
    /// the producing task can detach from its backend.
    pub fn new(rx: mpsc::UnboundedReceiver<Message>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Wait for the next insert. `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// An already delivered insert, without waiting.
    pub fn try_next(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Release the feed. Same as dropping it.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

/// Order used for every message list: creation time, then id.
pub fn chronological(a: &Message, b: &Message) -> std::cmp::Ordering {
    a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
}
