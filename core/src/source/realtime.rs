use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{sync::mpsc, time::Duration};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::{InsertFilter, Subscription};
use crate::error::{InboxError, Result};
use inbox_api::{Frame, Message};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const JOIN_REF: &str = "1";

/// Join a realtime channel for inserts into `table` addressed to the filter's
/// receiver. Returns once the server has acknowledged the join.
pub async fn subscribe(url: Url, table: &str, filter: InsertFilter) -> Result<Subscription> {
    let (ws, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    let topic = format!(
        "realtime:{table}:{}:{}",
        filter.receiver.id,
        Uuid::new_v4().simple()
    );
    let row_filter = format!("receiver_id=eq.{}", filter.receiver.id);
    send(&mut sink, &Frame::join(&topic, table, &row_filter, JOIN_REF)).await?;

    loop {
        let frame = next_frame(&mut stream).await?.ok_or(InboxError::Closed)?;
        if frame.topic != topic || frame.reference.as_deref() != Some(JOIN_REF) {
            continue;
        }
        match frame.reply_status() {
            Some("ok") => break,
            Some(_) => return Err(InboxError::JoinRejected(frame.payload.to_string())),
            None => continue,
        }
    }
    debug!(%topic, "realtime channel joined");

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    tokio::spawn(pump(sink, stream, topic, filter, tx, cancel.clone()));
    Ok(Subscription::new(rx, cancel))
}

/// Forward inserts until the subscription is released or the socket closes.
async fn pump<K, S>(
    mut sink: K,
    mut stream: S,
    topic: String,
    filter: InsertFilter,
    tx: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
) where
    K: Sink<WsMessage, Error = WsError> + Unpin,
    S: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut seq: u64 = 1;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                seq += 1;
                let _ = send(&mut sink, &Frame::leave(&topic, &seq.to_string())).await;
                let _ = sink.close().await;
                debug!(%topic, "realtime channel left");
                break;
            }
            _ = heartbeat.tick() => {
                seq += 1;
                if let Err(e) = send(&mut sink, &Frame::heartbeat(&seq.to_string())).await {
                    warn!(%topic, "heartbeat failed: {e}");
                    break;
                }
            }
            frame = next_frame(&mut stream) => match frame {
                Ok(Some(frame)) => {
                    if frame.topic != topic {
                        continue;
                    }
                    if let Some(msg) = frame.inserted_message() {
                        if filter.matches(&msg) && tx.send(msg).is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    debug!(%topic, "realtime socket closed");
                    break;
                }
                Err(e) => {
                    warn!(%topic, "realtime socket failed: {e}");
                    break;
                }
            }
        }
    }
}

async fn send<K>(sink: &mut K, frame: &Frame) -> Result<()>
where
    K: Sink<WsMessage, Error = WsError> + Unpin,
{
    sink.send(WsMessage::Text(serde_json::to_string(frame)?)).await?;
    Ok(())
}

/// Next decodable frame; `None` when the socket is closed.
async fn next_frame<S>(stream: &mut S) -> Result<Option<Frame>>
where
    S: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg? {
            WsMessage::Text(text) => match serde_json::from_str(&text) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => warn!("skipping undecodable realtime frame: {e}"),
            },
            WsMessage::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}
