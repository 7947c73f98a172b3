use std::{
    io,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use inbox_core::{
    ledger::DEFAULT_LEDGER_KEY, services::KvStore, DeletionLedger, InboxError, Result,
};

struct LogWriter(Arc<Mutex<Vec<u8>>>);
impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
struct MakeLogWriter(Arc<Mutex<Vec<u8>>>);
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogWriter {
    type Writer = LogWriter;
    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.0.clone())
    }
}

/// Reads succeed with an empty ledger, every write fails.
struct ReadOnlyStore;

#[async_trait]
impl KvStore for ReadOnlyStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }
    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(InboxError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "read-only")))
    }
    async fn compare_and_swap(&self, _: &str, _: Option<&str>, _: &str) -> Result<bool> {
        Err(InboxError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "read-only")))
    }
}

#[tokio::test]
async fn swallowed_persist_failure_is_logged() {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(MakeLogWriter(buf.clone()))
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let ledger = DeletionLedger::load(Arc::new(ReadOnlyStore), DEFAULT_LEDGER_KEY).await;
    ledger.hide(42).await;
    // still hidden for this session
    assert!(ledger.is_hidden(42));
    assert!(ledger.flush().await.is_err());

    let out = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    assert!(out.contains("WARN"), "logs: {out}");
    assert!(out.contains("failed to persist hidden messages"), "logs: {out}");
    assert!(out.contains("deleted_messages"), "logs: {out}");
}
