use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{chronological, InsertFilter, MessageSource, Subscription};
use crate::error::{InboxError, Result};
use inbox_api::{Message, MessageId, NewMessage, Participant};

struct Rows {
    next_id: MessageId,
    messages: Vec<Message>,
}

/// In-process message store with broadcast fan-out of inserts.
pub struct MemorySource {
    rows: Mutex<Rows>,
    events: broadcast::Sender<Message>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(100);
        Self {
            rows: Mutex::new(Rows {
                next_id: 1,
                messages: Vec::new(),
            }),
            events,
        }
    }

    /// Store a row with an explicit timestamp without notifying subscribers.
    pub fn seed(&self, msg: NewMessage, created_at: OffsetDateTime) -> Message {
        self.store(msg, created_at)
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().messages.len()
    }

    pub fn get(&self, id: MessageId) -> Option<Message> {
        self.rows.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn store(&self, msg: NewMessage, created_at: OffsetDateTime) -> Message {
        let mut rows = self.rows.lock();
        let row = Message {
            id: rows.next_id,
            sender_id: msg.sender_id,
            sender_type: msg.sender_type,
            receiver_id: msg.receiver_id,
            receiver_type: msg.receiver_type,
            message: msg.message,
            created_at,
            is_read: msg.is_read,
        };
        rows.next_id += 1;
        rows.messages.push(row.clone());
        row
    }

    fn select(&self, pred: impl Fn(&Message) -> bool) -> Vec<Message> {
        let mut out: Vec<Message> = self
            .rows
            .lock()
            .messages
            .iter()
            .filter(|m| pred(m))
            .cloned()
            .collect();
        out.sort_by(chronological);
        out
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn fetch_conversation(&self, a: Participant, b: Participant) -> Result<Vec<Message>> {
        Ok(self.select(|m| m.involves(&a, &b)))
    }

    async fn fetch_inbox(&self, me: Participant) -> Result<Vec<Message>> {
        Ok(self.select(|m| m.is_from(&me) || m.is_to(&me)))
    }

    async fn insert(&self, msg: NewMessage) -> Result<Message> {
        let row = self.store(msg, OffsetDateTime::now_utc());
        // no subscribers is not an error
        let _ = self.events.send(row.clone());
        Ok(row)
    }

    async fn delete(&self, id: MessageId) -> Result<()> {
        let mut rows = self.rows.lock();
        let before = rows.messages.len();
        rows.messages.retain(|m| m.id != id);
        if rows.messages.len() == before {
            return Err(InboxError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_read(&self, from: Participant, to: Participant) -> Result<()> {
        let mut rows = self.rows.lock();
        for m in rows
            .messages
            .iter_mut()
            .filter(|m| m.is_from(&from) && m.is_to(&to))
        {
            m.is_read = true;
        }
        Ok(())
    }

    async fn existing(&self, ids: &[MessageId]) -> Result<HashSet<MessageId>> {
        let rows = self.rows.lock();
        Ok(rows
            .messages
            .iter()
            .map(|m| m.id)
            .filter(|id| ids.contains(id))
            .collect())
    }

    async fn subscribe(&self, filter: InsertFilter) -> Result<Subscription> {
        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    ev = events.recv() => match ev {
                        Ok(msg) => {
                            if filter.matches(&msg) && tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber fell behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        Ok(Subscription::new(rx, cancel))
    }
}
