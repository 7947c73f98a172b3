use std::{
    io::{self, Write},
    sync::Arc,
};

use anyhow::{Context, Result};
use time::{OffsetDateTime, UtcOffset};
use tracing::{info, warn};

use crate::chats;
use crate::cli::Command;
use crate::config::{Config, StorageBackend};
use crate::conversation::Conversation;
use crate::grouping::{day_label, format_time, DisplayEntry};
use crate::ledger::DeletionLedger;
use crate::services::{FileKvStore, KvStore, SqliteKvStore};
use crate::source::{MemorySource, MessageSource, RestSource};
use inbox_api::{Message, Participant};

/// Entry point of the command line client.
pub async fn run(command: Command, cfg: Config) -> Result<()> {
    let source = open_source(&cfg)?;
    execute(command, &cfg, source, &mut io::stdout()).await
}

/// Run one command against `source`, writing its report to `out`.
pub async fn execute<W: Write>(
    command: Command,
    cfg: &Config,
    source: Arc<dyn MessageSource>,
    out: &mut W,
) -> Result<()> {
    let me = cfg
        .me
        .context("no identity configured; pass --as ROLE:ID")?;
    let store = open_store(cfg).await?;
    let ledger = Arc::new(DeletionLedger::load(store, ledger_key(cfg, me)).await);

    match command {
        Command::Chats => {
            let now = local_now();
            for s in chats::chat_summaries(source.as_ref(), &ledger, me).await? {
                writeln!(
                    out,
                    "{:<16} {:>3} unread  {:<12} {}",
                    s.peer.to_string(),
                    s.unread,
                    day_label(s.last_message.created_at, now),
                    s.last_message.message
                )?;
            }
        }
        Command::Show { peer } => {
            let mut conv = Conversation::open(source, ledger, me, peer).await;
            print_conversation(&conv, out)?;
            conv.close();
        }
        Command::Send { peer, text } => {
            let mut conv = Conversation::open(source, ledger, me, peer).await;
            let mut draft = text;
            let sent = conv.send(&mut draft).await;
            conv.close();
            match sent? {
                Some(m) => writeln!(out, "sent #{}", m.id)?,
                None => anyhow::bail!("nothing to send: message is empty"),
            }
        }
        Command::Watch { peer } => {
            let mut conv = Conversation::open(source, ledger, me, peer).await;
            print_conversation(&conv, out)?;
            if !conv.is_subscribed() {
                anyhow::bail!("realtime feed unavailable");
            }
            let offset = local_now().offset();
            loop {
                tokio::select! {
                    id = conv.next_insert() => match id {
                        Some(id) => {
                            if let Some(m) = conv.messages().iter().find(|m| m.id == id) {
                                print_message(out, m, &me, offset)?;
                            }
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            conv.close();
        }
        Command::Hide { ids } => {
            ledger.hide_all(ids.iter().copied()).await;
            ledger
                .flush()
                .await
                .context("failed to persist hidden messages")?;
            info!(count = ids.len(), "messages hidden");
        }
        Command::Unsend { peer, ids } => {
            let mut conv = Conversation::open(source, ledger, me, peer).await;
            for id in &ids {
                if !conv.messages().iter().any(|m| m.id == *id) {
                    anyhow::bail!("message {id} is not in this conversation");
                }
                conv.long_press(*id);
            }
            let report = conv.delete_for_everyone().await;
            conv.close();
            let report = report?;
            writeln!(out, "deleted {:?}", report.deleted)?;
            if !report.failed.is_empty() {
                anyhow::bail!("could not delete {:?}", report.failed);
            }
        }
        Command::Clear { peer } => {
            let n = chats::clear_chat(source.as_ref(), &ledger, me, peer).await?;
            writeln!(out, "hid {n} messages")?;
        }
    }
    Ok(())
}

/// Hosted store from the configuration, or an in-process one when offline.
pub fn open_source(cfg: &Config) -> Result<Arc<dyn MessageSource>> {
    match &cfg.backend {
        Some(b) => Ok(Arc::new(RestSource::new(
            b.url.as_str(),
            b.api_key.clone(),
            b.table.clone(),
        )?)),
        None => {
            warn!("offline mode: messages live only for this process");
            Ok(Arc::new(MemorySource::new()))
        }
    }
}

/// Device storage holding the deletion ledger.
pub async fn open_store(cfg: &Config) -> Result<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match cfg.storage {
        StorageBackend::File => Arc::new(FileKvStore::open(&cfg.data_dir).await?),
        StorageBackend::Sqlite => {
            tokio::fs::create_dir_all(&cfg.data_dir).await?;
            Arc::new(SqliteKvStore::open(cfg.data_dir.join("inbox.db"))?)
        }
    };
    Ok(store)
}

fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Storage key of the ledger of `me`. One ledger per identity, so pruning only
/// ever weighs ids against the active identity's inbox.
pub fn ledger_key(cfg: &Config, me: Participant) -> String {
    format!("{}:{}", cfg.ledger_key, me)
}

fn print_conversation<W: Write>(conv: &Conversation, out: &mut W) -> io::Result<()> {
    let now = local_now();
    let me = conv.me();
    for entry in conv.entries(now) {
        match entry {
            DisplayEntry::DateSeparator(label) => writeln!(out, "-- {label} --")?,
            DisplayEntry::Message(m) => print_message(out, m, &me, now.offset())?,
        }
    }
    Ok(())
}

fn print_message<W: Write>(
    out: &mut W,
    m: &Message,
    me: &Participant,
    offset: UtcOffset,
) -> io::Result<()> {
    let who = if m.is_from(me) { "you" } else { "them" };
    writeln!(
        out,
        "{:>6}  {}  {:<4}  {}",
        m.id,
        format_time(m.created_at, offset),
        who,
        m.message
    )
}
