use thiserror::Error;

use inbox_api::MessageId;

/// Errors produced by the inbox library.
#[derive(Error, Debug)]
pub enum InboxError {
    /// Transport failure talking to the hosted store.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Realtime websocket failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The store answered with something other than the expected rows.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// The realtime server refused to join the channel.
    #[error("realtime join rejected: {0}")]
    JoinRejected(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Failed to determine a platform data directory.
    #[error("could not determine application data directory")]
    NoDataDir,

    /// The store has no row with this id.
    #[error("message {0} not found")]
    NotFound(MessageId),

    /// Delete for everyone requested on a selection containing received messages.
    #[error("only messages you sent can be deleted for everyone")]
    NotPermitted,

    /// A storage key kept changing underneath a read-modify-write.
    #[error("storage key `{0}` kept changing during update")]
    Contended(String),

    /// The subscription or session has been released.
    #[error("subscription closed")]
    Closed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, InboxError>;
