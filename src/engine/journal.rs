use std::io;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability;
use crate::wal::Wal;

use super::EngineError;

/// Where committed events go. The engine applies an event to memory only
/// after `append` returns `Ok`.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, event: &Event) -> Result<(), EngineError>;
    async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError>;
    async fn appends_since_compact(&self) -> u64;
}

// ── WAL-backed journal ───────────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Journal backed by a group-commit writer task that owns the WAL file.
pub struct WalJournal {
    tx: mpsc::Sender<WalCommand>,
}

impl WalJournal {
    /// Open the log and spawn its writer. Returns the events already on disk.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Ok((Self { tx }, events))
    }
}

/// Writer loop: take one append, drain whatever else is already queued,
/// fsync once for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    if result.is_ok() {
        result = wal.flush_sync();
    }
    // Every caller in the batch hears the error, so none of it may stay on disk.
    if let Err(e) = &result {
        tracing::error!(error = %e, events = batch.len(), "WAL batch failed, rolling back");
        if let Err(rollback) = wal.rollback() {
            tracing::error!(error = %rollback, "WAL rollback failed");
        }
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, response) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

fn writer_gone() -> EngineError {
    EngineError::WalError("WAL writer shut down".into())
}

#[async_trait]
impl Journal for WalJournal {
    async fn append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| writer_gone())?;
        rx.await
            .map_err(|_| writer_gone())?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| writer_gone())?;
        rx.await
            .map_err(|_| writer_gone())?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

// ── In-memory journal ────────────────────────────────────

type FaultFn = Box<dyn Fn(&Event) -> bool + Send + Sync>;

/// Journal that keeps events in memory. Used by tests and throwaway engines;
/// `fail_when` injects a write failure for matching events.
#[derive(Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<Event>>,
    appends_since_compact: Mutex<u64>,
    fault: Mutex<Option<FaultFn>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when(&self, predicate: impl Fn(&Event) -> bool + Send + Sync + 'static) {
        *lock(&self.fault) = Some(Box::new(predicate));
    }

    pub fn clear_fault(&self) {
        *lock(&self.fault) = None;
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, event: &Event) -> Result<(), EngineError> {
        if lock(&self.fault).as_ref().is_some_and(|f| f(event)) {
            return Err(EngineError::WalError("injected write failure".into()));
        }
        lock(&self.events).push(event.clone());
        *lock(&self.appends_since_compact) += 1;
        Ok(())
    }

    async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError> {
        *lock(&self.events) = events;
        *lock(&self.appends_since_compact) = 0;
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        *lock(&self.appends_since_compact)
    }
}
