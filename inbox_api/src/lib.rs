use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod realtime;

pub use realtime::{Frame, PostgresChange};

/// Identifier assigned to a message by the remote store.
pub type MessageId = i64;

/// Which side of the marketplace an identity belongs to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Customer,
    Provider,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Customer => "customer",
            ParticipantRole::Provider => "provider",
        }
    }
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ParticipantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" | "user" => Ok(ParticipantRole::Customer),
            "provider" => Ok(ParticipantRole::Provider),
            other => Err(format!("unknown participant role `{other}`")),
        }
    }
}

/// One end of a conversation: an id scoped by its role.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Participant {
    pub id: i64,
    pub role: ParticipantRole,
}

impl Participant {
    pub fn new(id: i64, role: ParticipantRole) -> Self {
        Self { id, role }
    }

    pub fn customer(id: i64) -> Self {
        Self::new(id, ParticipantRole::Customer)
    }

    pub fn provider(id: i64) -> Self {
        Self::new(id, ParticipantRole::Provider)
    }
}

impl std::fmt::Display for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

/// Parses the `role:id` form used on the command line.
impl std::str::FromStr for Participant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (role, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected role:id, got `{s}`"))?;
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("invalid participant id `{id}`: {e}"))?;
        Ok(Self::new(id, role.trim().parse()?))
    }
}

/// A stored chat row as returned by the remote store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: i64,
    pub sender_type: ParticipantRole,
    pub receiver_id: i64,
    pub receiver_type: ParticipantRole,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    pub fn sender(&self) -> Participant {
        Participant::new(self.sender_id, self.sender_type)
    }

    pub fn receiver(&self) -> Participant {
        Participant::new(self.receiver_id, self.receiver_type)
    }

    pub fn is_from(&self, p: &Participant) -> bool {
        self.sender() == *p
    }

    pub fn is_to(&self, p: &Participant) -> bool {
        self.receiver() == *p
    }

    /// True when the message was exchanged between `a` and `b`, in either direction.
    pub fn involves(&self, a: &Participant, b: &Participant) -> bool {
        (self.is_from(a) && self.is_to(b)) || (self.is_from(b) && self.is_to(a))
    }

    /// The other end of the message as seen by `me`.
    pub fn counterpart(&self, me: &Participant) -> Participant {
        if self.is_from(me) {
            self.receiver()
        } else {
            self.sender()
        }
    }
}

/// Insert payload; id and timestamp are assigned by the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: i64,
    pub sender_type: ParticipantRole,
    pub receiver_id: i64,
    pub receiver_type: ParticipantRole,
    pub message: String,
    pub is_read: bool,
}

impl NewMessage {
    pub fn unread(from: Participant, to: Participant, text: impl Into<String>) -> Self {
        Self {
            sender_id: from.id,
            sender_type: from.role,
            receiver_id: to.id,
            receiver_type: to.role,
            message: text.into(),
            is_read: false,
        }
    }

    pub fn sender(&self) -> Participant {
        Participant::new(self.sender_id, self.sender_type)
    }

    pub fn receiver(&self) -> Participant {
        Participant::new(self.receiver_id, self.receiver_type)
    }
}
