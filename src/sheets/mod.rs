//! Spreadsheet collaborator and write-back dispatch
//!
//! The backing spreadsheet is reached through [`SheetClient`]. Row positions
//! are zero-based data-row indexes; the header row is never addressed.
//!
//! Write-back is fire-and-forget: [`SheetSync::dispatch`] queues the operation
//! on the directory's write-back worker, which retries a bounded number of
//! times and then logs and drops it. Each directory has one worker, so
//! positional operations reach the sheet in commit order. Local state is
//! already committed when a write-back starts and is never touched by one.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::SheetSyncConfig;
use crate::db::Directory;
use crate::error::DirectoryError;

pub use memory::{MemorySheetClient, MemorySheetProvider};

/// Access to one spreadsheet
#[async_trait]
pub trait SheetClient: Send + Sync {
    /// Every row of the sheet; the first row is the header
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, DirectoryError>;

    async fn append_row(&self, values: &[String]) -> Result<(), DirectoryError>;

    async fn update_cell(&self, row: usize, column: usize, value: &str) -> Result<(), DirectoryError>;

    async fn delete_row(&self, row: usize) -> Result<(), DirectoryError>;
}

/// Hands out a client for a directory's backing sheet.
///
/// Credentials are the provider's concern. `None` means the directory has no
/// reachable sheet.
pub trait SheetClientProvider: Send + Sync {
    fn client_for(&self, directory: &Directory) -> Result<Option<Arc<dyn SheetClient>>, DirectoryError>;
}

/// A committed row mutation to mirror into the sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SheetOp {
    UpdateCell { row: usize, column: usize, value: String },
    AppendRow { values: Vec<String> },
    DeleteRow { row: usize },
}

impl SheetOp {
    pub fn name(&self) -> &'static str {
        match self {
            SheetOp::UpdateCell { .. } => "update_cell",
            SheetOp::AppendRow { .. } => "append_row",
            SheetOp::DeleteRow { .. } => "delete_row",
        }
    }

    async fn apply(&self, client: &dyn SheetClient) -> Result<(), DirectoryError> {
        match self {
            SheetOp::UpdateCell { row, column, value } => client.update_cell(*row, *column, value).await,
            SheetOp::AppendRow { values } => client.append_row(values).await,
            SheetOp::DeleteRow { row } => client.delete_row(*row).await,
        }
    }
}

/// One queued write-back
struct WriteBack {
    client: Arc<dyn SheetClient>,
    op: SheetOp,
    done: oneshot::Sender<()>,
}

/// Dispatches write-backs and serves sheet reads for import
pub struct SheetSync {
    provider: Option<Arc<dyn SheetClientProvider>>,
    config: SheetSyncConfig,
    /// Write-back queue per directory ID
    queues: DashMap<String, mpsc::UnboundedSender<WriteBack>>,
}

impl SheetSync {
    pub fn new(provider: Option<Arc<dyn SheetClientProvider>>, config: SheetSyncConfig) -> Self {
        Self {
            provider,
            config,
            queues: DashMap::new(),
        }
    }

    /// No provider: imports fail and write-backs are skipped
    pub fn disabled() -> Self {
        Self::new(
            None,
            SheetSyncConfig {
                enabled: false,
                ..SheetSyncConfig::default()
            },
        )
    }

    fn client_for(&self, directory: &Directory) -> Result<Option<Arc<dyn SheetClient>>, DirectoryError> {
        if directory.sheet_id.is_none() {
            return Ok(None);
        }
        match &self.provider {
            Some(provider) => provider.client_for(directory),
            None => Ok(None),
        }
    }

    /// Read every row of the directory's sheet, header first
    pub async fn fetch_rows(&self, directory: &Directory) -> Result<Vec<Vec<String>>, DirectoryError> {
        let client = self.client_for(directory)?.ok_or_else(|| {
            DirectoryError::SheetSync(format!("directory {} has no reachable sheet", directory.id))
        })?;
        client.fetch_rows().await
    }

    /// Mirror a committed mutation into the sheet in the background.
    ///
    /// Operations for one directory are applied in dispatch order. Returns a
    /// handle that completes once this operation has been applied or dropped,
    /// or `None` when nothing was dispatched.
    pub fn dispatch(&self, directory: &Directory, op: SheetOp) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            return None;
        }

        let client = match self.client_for(directory) {
            Ok(Some(client)) => client,
            Ok(None) => return None,
            Err(e) => {
                error!("Sheet write-back for {} skipped, no client: {}", directory.id, e);
                return None;
            }
        };

        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("Sheet write-back for {} skipped, no async runtime", directory.id);
                return None;
            }
        };

        let (done, finished) = oneshot::channel();
        self.enqueue(&runtime, &directory.id, WriteBack { client, op, done });

        Some(runtime.spawn(async move {
            let _ = finished.await;
        }))
    }

    /// Drop a directory's write-back queue. Already queued operations still run.
    pub fn forget(&self, directory_id: &str) {
        self.queues.remove(directory_id);
    }

    fn enqueue(&self, runtime: &Handle, directory_id: &str, job: WriteBack) {
        let mut queue = self
            .queues
            .entry(directory_id.to_string())
            .or_insert_with(|| self.spawn_worker(runtime, directory_id));

        // The worker is gone when the runtime that ran it has shut down
        if let Err(mpsc::error::SendError(job)) = queue.send(job) {
            debug!("Restarting sheet write-back worker for {}", directory_id);
            *queue = self.spawn_worker(runtime, directory_id);
            if queue.send(job).is_err() {
                error!("Sheet write-back for {} dropped, worker unavailable", directory_id);
            }
        }
    }

    fn spawn_worker(&self, runtime: &Handle, directory_id: &str) -> mpsc::UnboundedSender<WriteBack> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteBack>();
        let directory_id = directory_id.to_string();
        let max_attempts = self.config.max_attempts.max(1);
        let delay = self.config.retry_delay();

        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                write_back(&directory_id, job.client.as_ref(), &job.op, max_attempts, delay).await;
                let _ = job.done.send(());
            }
            debug!("Sheet write-back worker for {} stopped", directory_id);
        });
        tx
    }
}

async fn write_back(
    directory_id: &str,
    client: &dyn SheetClient,
    op: &SheetOp,
    max_attempts: u32,
    delay: std::time::Duration,
) {
    for attempt in 1..=max_attempts {
        match op.apply(client).await {
            Ok(()) => {
                debug!("Sheet {} for {} succeeded (attempt {})", op.name(), directory_id, attempt);
                return;
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    "Sheet {} for {} failed (attempt {}/{}): {}",
                    op.name(),
                    directory_id,
                    attempt,
                    max_attempts,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    "Sheet {} for {} dropped after {} attempts: {}",
                    op.name(),
                    directory_id,
                    max_attempts,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(sheet_id: Option<&str>) -> Directory {
        Directory {
            id: "d1".to_string(),
            name: "Test".to_string(),
            description: None,
            storage_ref: "d1.db".to_string(),
            sheet_id: sheet_id.map(str::to_string),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
        }
    }

    fn sync_with(client: Arc<MemorySheetClient>, max_attempts: u32) -> SheetSync {
        let provider = MemorySheetProvider::new();
        provider.insert("sheet-1", client);
        SheetSync::new(
            Some(Arc::new(provider)),
            SheetSyncConfig {
                enabled: true,
                max_attempts,
                retry_delay_ms: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_dispatch_applies_op() {
        let client = Arc::new(MemorySheetClient::with_rows(vec![
            vec!["Name".into(), "City".into()],
            vec!["Ann".into(), "Boston".into()],
        ]));
        let sync = sync_with(client.clone(), 3);

        let handle = sync
            .dispatch(
                &directory(Some("sheet-1")),
                SheetOp::UpdateCell {
                    row: 0,
                    column: 1,
                    value: "Paris".into(),
                },
            )
            .expect("dispatched");
        handle.await.unwrap();

        assert_eq!(client.data_rows()[0], vec!["Ann", "Paris"]);
    }

    #[tokio::test]
    async fn test_dispatch_retries_then_succeeds() {
        let client = Arc::new(MemorySheetClient::with_rows(vec![vec!["Name".into()]]));
        client.fail_next(2);
        let sync = sync_with(client.clone(), 3);

        sync.dispatch(
            &directory(Some("sheet-1")),
            SheetOp::AppendRow {
                values: vec!["Bo".into()],
            },
        )
        .expect("dispatched")
        .await
        .unwrap();

        assert_eq!(client.data_rows(), vec![vec!["Bo".to_string()]]);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_keeps_commit_order_across_retries() {
        let client = Arc::new(MemorySheetClient::with_rows(vec![
            vec!["Name".into(), "City".into()],
            vec!["Ann".into(), "Boston".into()],
            vec!["Bo".into(), "Lima".into()],
        ]));
        client.fail_next(1);
        let provider = MemorySheetProvider::new();
        provider.insert("sheet-1", client.clone());
        let sync = SheetSync::new(
            Some(Arc::new(provider)),
            SheetSyncConfig {
                enabled: true,
                max_attempts: 3,
                retry_delay_ms: 50,
            },
        );
        let dir = directory(Some("sheet-1"));

        // Ann is deleted first, so Bo moves up to position 0
        let delete = sync.dispatch(&dir, SheetOp::DeleteRow { row: 0 }).expect("dispatched");
        let update = sync
            .dispatch(
                &dir,
                SheetOp::UpdateCell {
                    row: 0,
                    column: 1,
                    value: "Quito".into(),
                },
            )
            .expect("dispatched");
        update.await.unwrap();
        delete.await.unwrap();

        assert_eq!(client.data_rows(), vec![vec!["Bo".to_string(), "Quito".to_string()]]);
        assert_eq!(client.calls(), 3);
    }

    #[test]
    fn test_worker_restarts_on_new_runtime() {
        let client = Arc::new(MemorySheetClient::with_rows(vec![vec!["Name".into()]]));
        let sync = sync_with(client.clone(), 1);
        let dir = directory(Some("sheet-1"));

        for name in ["Ann", "Bo"] {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                sync.dispatch(
                    &dir,
                    SheetOp::AppendRow {
                        values: vec![name.to_string()],
                    },
                )
                .expect("dispatched")
                .await
                .unwrap();
            });
        }

        assert_eq!(
            client.data_rows(),
            vec![vec!["Ann".to_string()], vec!["Bo".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_dispatch_gives_up_after_max_attempts() {
        let client = Arc::new(MemorySheetClient::with_rows(vec![vec!["Name".into()]]));
        client.fail_next(10);
        let sync = sync_with(client.clone(), 2);

        sync.dispatch(&directory(Some("sheet-1")), SheetOp::DeleteRow { row: 0 })
            .expect("dispatched")
            .await
            .unwrap();

        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_skips_directories_without_sheet() {
        let client = Arc::new(MemorySheetClient::new());
        let sync = sync_with(client, 3);
        assert!(sync
            .dispatch(&directory(None), SheetOp::DeleteRow { row: 0 })
            .is_none());
        assert!(SheetSync::disabled()
            .dispatch(&directory(Some("sheet-1")), SheetOp::DeleteRow { row: 0 })
            .is_none());
    }

    #[test]
    fn test_dispatch_without_runtime_is_skipped() {
        let client = Arc::new(MemorySheetClient::new());
        let sync = sync_with(client, 3);
        assert!(sync
            .dispatch(&directory(Some("sheet-1")), SheetOp::DeleteRow { row: 0 })
            .is_none());
    }
}
