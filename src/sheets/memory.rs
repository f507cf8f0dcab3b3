//! In-process spreadsheet
//!
//! Backs local directories and tests. Can be told to fail the next N calls
//! to exercise write-back retries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{SheetClient, SheetClientProvider};
use crate::db::Directory;
use crate::error::DirectoryError;

#[derive(Default)]
pub struct MemorySheetClient {
    /// Header first, then data rows
    rows: Mutex<Vec<Vec<String>>>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl MemorySheetClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    /// Fail the next `n` write calls
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Write calls made so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Rows below the header
    pub fn data_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .lock()
            .map(|rows| rows.iter().skip(1).cloned().collect())
            .unwrap_or_default()
    }

    fn begin_write(&self) -> Result<MutexGuard<'_, Vec<Vec<String>>>, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DirectoryError::SheetSync("injected failure".into()));
        }

        self.rows
            .lock()
            .map_err(|e| DirectoryError::Internal(format!("Lock poisoned: {}", e)))
    }
}

#[async_trait]
impl SheetClient for MemorySheetClient {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, DirectoryError> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .map_err(|e| DirectoryError::Internal(format!("Lock poisoned: {}", e)))
    }

    async fn append_row(&self, values: &[String]) -> Result<(), DirectoryError> {
        let mut rows = self.begin_write()?;
        if rows.is_empty() {
            // keep row 0 reserved for the header
            rows.push(Vec::new());
        }
        rows.push(values.to_vec());
        Ok(())
    }

    async fn update_cell(&self, row: usize, column: usize, value: &str) -> Result<(), DirectoryError> {
        let mut rows = self.begin_write()?;
        let cells = rows
            .get_mut(row + 1)
            .ok_or_else(|| DirectoryError::SheetSync(format!("sheet has no data row {}", row)))?;
        if cells.len() <= column {
            cells.resize(column + 1, String::new());
        }
        cells[column] = value.to_string();
        Ok(())
    }

    async fn delete_row(&self, row: usize) -> Result<(), DirectoryError> {
        let mut rows = self.begin_write()?;
        if row + 1 >= rows.len() {
            return Err(DirectoryError::SheetSync(format!("sheet has no data row {}", row)));
        }
        rows.remove(row + 1);
        Ok(())
    }
}

/// Provider resolving a directory's `sheet_id` to an in-memory sheet
#[derive(Default)]
pub struct MemorySheetProvider {
    sheets: DashMap<String, Arc<MemorySheetClient>>,
}

impl MemorySheetProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sheet_id: &str, client: Arc<MemorySheetClient>) {
        self.sheets.insert(sheet_id.to_string(), client);
    }

    pub fn sheet(&self, sheet_id: &str) -> Option<Arc<MemorySheetClient>> {
        self.sheets.get(sheet_id).map(|entry| entry.value().clone())
    }
}

impl SheetClientProvider for MemorySheetProvider {
    fn client_for(&self, directory: &Directory) -> Result<Option<Arc<dyn SheetClient>>, DirectoryError> {
        let sheet_id = match &directory.sheet_id {
            Some(id) => id,
            None => return Ok(None),
        };
        Ok(self
            .sheet(sheet_id)
            .map(|client| client as Arc<dyn SheetClient>))
    }
}
