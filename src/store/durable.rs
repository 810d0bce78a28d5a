use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::{Event, Item, ItemFilter, ItemId};
use crate::observability;
use crate::wal::Wal;

use super::{next_version, ItemStore, MemoryStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before compacting or reporting counters.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    tracing::debug!("WAL writer for {} stopped", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let results = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for ((_, tx), result) in batch.drain(..).zip(results) {
        let _ = tx.send(result);
    }
}

/// Buffer, then sync the whole batch once. Each event gets its own result:
/// `Ok` means it is durable, `Err` means it is not in the log.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> Vec<io::Result<()>> {
    let mut results: Vec<io::Result<()>> = Vec::with_capacity(batch.len());
    let mut write_err = None;
    for (event, _) in batch {
        match wal.append_buffered(event) {
            Ok(()) => results.push(Ok(())),
            // Encoding failed before any byte was written; only this event is lost.
            Err(e) if e.kind() == io::ErrorKind::InvalidData => results.push(Err(e)),
            Err(e) => {
                write_err = Some(e);
                break;
            }
        }
    }
    let outcome = match write_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    let Err(e) = outcome else {
        return results;
    };

    tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    if let Err(rollback) = wal.rollback() {
        tracing::error!("WAL rollback failed, log tail may be torn: {rollback}");
    }
    batch
        .iter()
        .map(|_| Err(io::Error::new(e.kind(), e.to_string())))
        .collect()
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            commit_batch(wal, &mut vec![(event, response)]);
        }
    }
}

fn io_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Io(e.to_string())
}

/// Item table persisted through a write-ahead log.
///
/// Every mutation is appended (and fsynced in a group commit) before it is
/// applied to the in-memory table. Mutations run on their own task, so a
/// caller that stops waiting never leaves the table behind the log.
/// Opening the store replays the log.
pub struct WalStore {
    state: Arc<DurableState>,
}

struct DurableState {
    table: MemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared; compaction holds it exclusively so its
    /// snapshot lines up with the log position it replaces.
    commit_gate: RwLock<()>,
}

impl WalStore {
    /// Replay `wal_path` and start the writer task. Must run inside a Tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let table = MemoryStore::new();
        let replayed = events.len();
        for event in events {
            match event {
                Event::ItemCreated { item } | Event::ItemSaved { item } => table.put(item),
                Event::ItemDeleted { id } => {
                    table.remove(&id);
                }
            }
        }
        tracing::info!(
            "opened item WAL {}: {replayed} events, {} items",
            wal_path.display(),
            table.len()
        );

        Ok(Self {
            state: Arc::new(DurableState {
                table,
                wal_tx,
                commit_gate: RwLock::new(()),
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.state.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.table.is_empty()
    }

    /// Run a mutation to completion on its own task.
    async fn detached<T, F, Fut>(&self, mutation: F) -> Result<T, StoreError>
    where
        F: FnOnce(Arc<DurableState>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(mutation(self.state.clone()))
            .await
            .map_err(|e| io_err(format!("WAL mutation task failed: {e}")))?
    }

    /// Rewrite the log as one `ItemCreated` per live item.
    pub async fn compact(&self) -> Result<(), StoreError> {
        self.detached(|state| async move { state.compact().await }).await
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .state
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

impl DurableState {
    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| io_err("WAL writer shut down"))?;
        rx.await
            .map_err(|_| io_err("WAL writer dropped response"))?
            .map_err(io_err)
    }

    async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.commit_gate.write().await;
        let events: Vec<Event> = self
            .table
            .snapshot(&ItemFilter::default())
            .await
            .into_iter()
            .map(|item| Event::ItemCreated { item })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| io_err("WAL writer shut down"))?;
        rx.await
            .map_err(|_| io_err("WAL writer dropped response"))?
            .map_err(io_err)?;
        tracing::info!("compacted item WAL to {count} items");
        Ok(())
    }

    async fn create_item(&self, item: Item) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        if self.table.contains(&item.id) {
            return Err(StoreError::AlreadyExists(item.id));
        }
        self.wal_append(Event::ItemCreated { item: item.clone() }).await?;
        self.table.try_insert(item)
    }

    async fn save_item(&self, item: Item) -> Result<Item, StoreError> {
        let _gate = self.commit_gate.read().await;
        let id = item.id;
        let shared = self.table.shared(&id)?;
        let mut guard = shared.write().await;
        if !self.table.is_live(&id, &shared) {
            return Err(StoreError::NotFound(id));
        }
        let next = next_version(&guard, item)?;
        self.wal_append(Event::ItemSaved { item: next.clone() }).await?;
        *guard = next.clone();
        Ok(next)
    }

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        let shared = self.table.shared(&id)?;
        let _guard = shared.write().await;
        if !self.table.is_live(&id, &shared) {
            return Err(StoreError::NotFound(id));
        }
        self.wal_append(Event::ItemDeleted { id }).await?;
        self.table.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl ItemStore for WalStore {
    async fn create_item(&self, item: Item) -> Result<(), StoreError> {
        self.detached(|state| async move { state.create_item(item).await })
            .await
    }

    async fn load_item(&self, id: ItemId) -> Result<Item, StoreError> {
        self.state.table.load_item(id).await
    }

    async fn save_item(&self, item: Item) -> Result<Item, StoreError> {
        self.detached(|state| async move { state.save_item(item).await })
            .await
    }

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError> {
        self.detached(|state| async move { state.delete_item(id).await })
            .await
    }

    async fn find_items(&self, filter: &ItemFilter) -> Result<Vec<Item>, StoreError> {
        Ok(self.state.table.snapshot(filter).await)
    }
}
