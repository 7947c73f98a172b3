use std::collections::BTreeSet;

use inbox_api::{Message, MessageId, Participant};

/// What a tap on a message bubble does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    /// Selection mode is active; the message was toggled.
    Toggled,
    /// No selection in progress; the tap is a normal interaction.
    Navigate,
    /// The message is not on screen; nothing changed.
    Ignored,
}

/// Multi-select state of a conversation. Selection mode is simply "the set is
/// not empty": it starts with a long press and ends when the last message is
/// deselected.
#[derive(Debug, Default, Clone)]
pub struct Selection {
    ids: BTreeSet<MessageId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !self.ids.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.ids.iter().copied().collect()
    }

    /// Long press always toggles, entering selection mode if needed.
    pub fn long_press(&mut self, id: MessageId) {
        self.toggle(id);
    }

    pub fn tap(&mut self, id: MessageId) -> TapOutcome {
        if !self.is_active() {
            return TapOutcome::Navigate;
        }
        self.toggle(id);
        TapOutcome::Toggled
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Drop ids that are no longer on screen.
    pub fn retain_visible(&mut self, messages: &[Message]) {
        self.ids.retain(|id| messages.iter().any(|m| m.id == *id));
    }

    fn toggle(&mut self, id: MessageId) {
        if !self.ids.remove(&id) {
            self.ids.insert(id);
        }
    }
}

/// Deleting for everyone is offered only when `me` sent every selected
/// message; an empty selection offers nothing.
pub fn can_delete_for_everyone<'a, I>(selected: I, me: &Participant) -> bool
where
    I: IntoIterator<Item = &'a Message>,
{
    let mut any = false;
    for msg in selected {
        if !msg.is_from(me) {
            return false;
        }
        any = true;
    }
    any
}
