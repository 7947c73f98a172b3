use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::Result;
use crate::ledger::DeletionLedger;
use crate::source::MessageSource;
use inbox_api::{Message, MessageId, Participant};

/// One row of the chats list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub peer: Participant,
    pub last_message: Message,
    /// Received messages not yet read.
    pub unread: usize,
}

/// Per-counterpart summaries of everything `me` can still see, most recent
/// conversation first. Conversations whose messages are all hidden are left out.
///
/// Hidden ids missing from the inbox are pruned from the ledger once the store
/// confirms their messages were deleted for everyone.
pub async fn chat_summaries(
    source: &dyn MessageSource,
    ledger: &DeletionLedger,
    me: Participant,
) -> Result<Vec<ChatSummary>> {
    let inbox = source.fetch_inbox(me).await?;
    prune_ledger(source, ledger, &inbox).await;
    let mut by_peer: HashMap<Participant, ChatSummary> = HashMap::new();
    for msg in inbox.into_iter().filter(|m| !ledger.is_hidden(m.id)) {
        let peer = msg.counterpart(&me);
        let unread = usize::from(msg.is_to(&me) && !msg.is_read);
        match by_peer.get_mut(&peer) {
            Some(summary) => {
                summary.unread += unread;
                if crate::source::chronological(&summary.last_message, &msg).is_lt() {
                    summary.last_message = msg;
                }
            }
            None => {
                by_peer.insert(
                    peer,
                    ChatSummary {
                        peer,
                        last_message: msg,
                        unread,
                    },
                );
            }
        }
    }
    let mut summaries: Vec<ChatSummary> = by_peer.into_values().collect();
    summaries.sort_by(|a, b| crate::source::chronological(&b.last_message, &a.last_message));
    Ok(summaries)
}

async fn prune_ledger(source: &dyn MessageSource, ledger: &DeletionLedger, inbox: &[Message]) {
    let listed: HashSet<MessageId> = inbox.iter().map(|m| m.id).collect();
    let candidates: Vec<MessageId> = ledger
        .ids()
        .into_iter()
        .filter(|id| !listed.contains(id))
        .collect();
    if candidates.is_empty() {
        return;
    }
    // a short inbox listing proves nothing, ask for the ids themselves
    let still_stored = match source.existing(&candidates).await {
        Ok(found) => found,
        Err(e) => {
            warn!("skipping ledger pruning: {e}");
            return;
        }
    };
    let gone: Vec<MessageId> = candidates
        .into_iter()
        .filter(|id| !still_stored.contains(id))
        .collect();
    if !gone.is_empty() {
        debug!(count = gone.len(), "pruning ledger entries of deleted messages");
        ledger.forget(gone).await;
    }
}

/// Hide a whole conversation on this device. Returns how many messages were hidden.
pub async fn clear_chat(
    source: &dyn MessageSource,
    ledger: &DeletionLedger,
    me: Participant,
    peer: Participant,
) -> Result<usize> {
    let ids: Vec<_> = source
        .fetch_conversation(me, peer)
        .await?
        .iter()
        .map(|m| m.id)
        .filter(|id| !ledger.is_hidden(*id))
        .collect();
    ledger.hide_all(ids.iter().copied()).await;
    Ok(ids.len())
}
