use clap::{Parser, Subcommand};

use crate::config::Options;
use inbox_api::{MessageId, Participant};

/// Command line interface for the inbox client.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub options: Options,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List conversations, most recent first.
    Chats,
    /// Print a conversation grouped by day.
    Show {
        #[arg(value_name = "ROLE:ID")]
        peer: Participant,
    },
    /// Send a message.
    Send {
        #[arg(value_name = "ROLE:ID")]
        peer: Participant,
        text: String,
    },
    /// Print a conversation and follow new messages until Ctrl+C.
    Watch {
        #[arg(value_name = "ROLE:ID")]
        peer: Participant,
    },
    /// Hide messages on this device only.
    Hide {
        #[arg(required = true)]
        ids: Vec<MessageId>,
    },
    /// Delete your own messages for both participants.
    Unsend {
        #[arg(value_name = "ROLE:ID")]
        peer: Participant,
        #[arg(required = true)]
        ids: Vec<MessageId>,
    },
    /// Hide a whole conversation on this device.
    Clear {
        #[arg(value_name = "ROLE:ID")]
        peer: Participant,
    },
}
