use std::{cmp::Ordering, sync::Arc};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::{InboxError, Result};
use crate::grouping::{group_by_day, DisplayEntry};
use crate::ledger::DeletionLedger;
use crate::selection::{self, Selection, TapOutcome};
use crate::source::{chronological, InsertFilter, MessageSource, Subscription};
use inbox_api::{Message, MessageId, NewMessage, Participant};

/// Lifecycle of an open conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Live,
    Closed,
}

/// Outcome of a delete-for-everyone request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: Vec<MessageId>,
    /// Still visible; the store refused or could not be reached.
    pub failed: Vec<MessageId>,
}

/// Controller of one open conversation between `me` and `other`.
///
/// Owns the in-memory message list, keeps it in ascending (`created_at`, id)
/// order, and never holds an id twice or an id hidden in the ledger.
pub struct Conversation {
    source: Arc<dyn MessageSource>,
    ledger: Arc<DeletionLedger>,
    me: Participant,
    other: Participant,
    messages: Vec<Message>,
    selection: Selection,
    subscription: Option<Subscription>,
    state: SessionState,
}

impl Conversation {
    /// Subscribe, load history and go live.
    ///
    /// The subscription is attached before history is fetched so nothing sent
    /// in between is missed; overlap with the history is removed by id.
    /// Failures are logged and leave whatever could be loaded.
    pub async fn open(
        source: Arc<dyn MessageSource>,
        ledger: Arc<DeletionLedger>,
        me: Participant,
        other: Participant,
    ) -> Self {
        let mut conv = Self {
            source,
            ledger,
            me,
            other,
            messages: Vec::new(),
            selection: Selection::new(),
            subscription: None,
            state: SessionState::Initializing,
        };
        match conv.source.subscribe(InsertFilter::addressed_to(me)).await {
            Ok(sub) => conv.subscription = Some(sub),
            Err(e) => warn!(%me, %other, "realtime subscription failed: {e}"),
        }
        match conv.source.fetch_conversation(me, other).await {
            Ok(history) => {
                for msg in history {
                    conv.merge(msg);
                }
            }
            Err(e) => warn!(%me, %other, "failed to load conversation: {e}"),
        }
        conv.drain_pending();
        conv.state = SessionState::Live;
        info!(%me, %other, count = conv.messages.len(), "conversation live");
        conv.sweep_read();
        conv
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn me(&self) -> Participant {
        self.me
    }

    pub fn other(&self) -> Participant {
        self.other
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Day separated rows for rendering.
    pub fn entries(&self, now: OffsetDateTime) -> Vec<DisplayEntry<'_>> {
        group_by_day(&self.messages, now)
    }

    /// Wait for the next realtime insert that belongs on screen and merge it.
    /// Returns its id, or `None` once there is no live feed.
    pub async fn next_insert(&mut self) -> Option<MessageId> {
        loop {
            let sub = self.subscription.as_mut()?;
            let Some(msg) = sub.next().await else {
                warn!(me = %self.me, "realtime feed ended");
                self.subscription = None;
                return None;
            };
            let id = msg.id;
            if self.merge(msg) {
                self.sweep_read();
                return Some(id);
            }
        }
    }

    /// Send the draft. Blank drafts are ignored without contacting the store.
    /// The draft is cleared only once the store accepted the message.
    pub async fn send(&mut self, draft: &mut String) -> Result<Option<Message>> {
        if self.state == SessionState::Closed {
            return Err(InboxError::Closed);
        }
        let text = draft.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let new = NewMessage::unread(self.me, self.other, text);
        match self.source.insert(new).await {
            Ok(row) => {
                draft.clear();
                self.merge(row.clone());
                Ok(Some(row))
            }
            Err(e) => {
                warn!(me = %self.me, other = %self.other, "send failed: {e}");
                Err(e)
            }
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Ids that are not on screen are ignored.
    pub fn long_press(&mut self, id: MessageId) {
        if self.is_visible(id) {
            self.selection.long_press(id);
        }
    }

    pub fn tap(&mut self, id: MessageId) -> TapOutcome {
        if !self.is_visible(id) {
            return TapOutcome::Ignored;
        }
        self.selection.tap(id)
    }

    pub fn cancel_selection(&mut self) {
        self.selection.clear();
    }

    pub fn can_delete_for_everyone(&self) -> bool {
        selection::can_delete_for_everyone(self.selected(), &self.me)
    }

    /// Hide the selected messages on this device only.
    pub async fn delete_for_me(&mut self) -> usize {
        self.selection.retain_visible(&self.messages);
        let ids = self.selection.ids();
        self.selection.clear();
        if ids.is_empty() {
            return 0;
        }
        self.ledger.hide_all(ids.iter().copied()).await;
        self.messages.retain(|m| !ids.contains(&m.id));
        debug!(count = ids.len(), "messages hidden");
        ids.len()
    }

    /// Delete the selected messages from the shared store. Messages the store
    /// fails to delete stay on screen.
    pub async fn delete_for_everyone(&mut self) -> Result<DeleteReport> {
        self.selection.retain_visible(&self.messages);
        if !self.can_delete_for_everyone() {
            return Err(InboxError::NotPermitted);
        }
        let ids: Vec<MessageId> = self.selected().map(|m| m.id).collect();
        let mut report = DeleteReport::default();
        for id in ids {
            match self.source.delete(id).await {
                // already gone remotely
                Ok(()) | Err(InboxError::NotFound(_)) => report.deleted.push(id),
                Err(e) => {
                    warn!(id, "delete for everyone failed: {e}");
                    report.failed.push(id);
                }
            }
        }
        self.selection.clear();
        self.messages.retain(|m| !report.deleted.contains(&m.id));
        Ok(report)
    }

    /// Hide every visible message on this device. The other participant's
    /// view and the store are untouched.
    pub async fn clear_all(&mut self) -> usize {
        let ids: Vec<MessageId> = self.messages.iter().map(|m| m.id).collect();
        self.selection.clear();
        self.ledger.hide_all(ids.iter().copied()).await;
        self.messages.clear();
        ids.len()
    }

    /// Release the realtime subscription. Requests already in flight may
    /// still finish; their results are discarded.
    pub fn close(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        self.selection.clear();
        self.state = SessionState::Closed;
        debug!(me = %self.me, other = %self.other, "conversation closed");
    }

    fn is_visible(&self, id: MessageId) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    fn selected(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(move |m| self.selection.contains(m.id))
    }

    fn drain_pending(&mut self) {
        let mut pending = Vec::new();
        if let Some(sub) = self.subscription.as_mut() {
            while let Some(msg) = sub.try_next() {
                pending.push(msg);
            }
        }
        for msg in pending {
            self.merge(msg);
        }
    }

    /// Insert in order. Returns false for hidden, foreign or duplicate rows.
    fn merge(&mut self, msg: Message) -> bool {
        if !msg.involves(&self.me, &self.other) || self.ledger.is_hidden(msg.id) {
            return false;
        }
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        let pos = self
            .messages
            .partition_point(|m| chronological(m, &msg) == Ordering::Less);
        self.messages.insert(pos, msg);
        true
    }

    /// Flag received messages as read locally and ask the store to do the
    /// same, without waiting for the answer.
    fn sweep_read(&mut self) {
        if self.state != SessionState::Live {
            return;
        }
        let (me, other) = (self.me, self.other);
        let mut flipped = 0;
        for m in self
            .messages
            .iter_mut()
            .filter(|m| !m.is_read && m.is_from(&other) && m.is_to(&me))
        {
            m.is_read = true;
            flipped += 1;
        }
        if flipped == 0 {
            return;
        }
        let source = self.source.clone();
        tokio::spawn(async move {
            if let Err(e) = source.mark_read(other, me).await {
                warn!(%me, %other, "mark as read failed: {e}");
            }
        });
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            self.close();
        }
    }
}
