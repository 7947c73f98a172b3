pub mod app;
pub mod chats;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod grouping;
pub mod ledger;
pub mod selection;
pub mod services;
pub mod source;

pub use conversation::{Conversation, DeleteReport, SessionState};
pub use error::{InboxError, Result};
pub use ledger::DeletionLedger;
pub use source::{InsertFilter, MessageSource, Subscription};
