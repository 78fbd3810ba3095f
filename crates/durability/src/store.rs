use std::collections::BTreeMap;

use tidemark_client_api_messages::SyncCursor;
use tidemark_value::{lww_accepts, Row};

use crate::{KeyValueBackend, PersistError};

/// The durable row store: per-row LWW upsert plus the cursor slot.
#[derive(Debug)]
pub struct RowStore<B> {
    backend: B,
}

impl<B: KeyValueBackend> RowStore<B> {
    pub fn new(backend: B) -> RowStore<B> {
        RowStore { backend }
    }

    /// Every persisted table with its rows, for bootstrap.
    pub fn get_all_tables(&self) -> Result<BTreeMap<String, Vec<Row>>, PersistError> {
        let mut tables = BTreeMap::new();
        for name in self.backend.table_names()? {
            let rows = self.backend.scan_table(&name)?;
            tables.insert(name, rows);
        }
        Ok(tables)
    }

    /// Upsert `rows` into `table`, keyed by id, last writer wins on
    /// `updatedAt`. Strictly older incoming rows are dropped; an unversioned
    /// incoming row never displaces a versioned one. Every row is attempted
    /// even after a failure, and the last error surfaces once the batch (and
    /// its commit) has been driven to the end.
    pub fn put_rows(&mut self, table: &str, rows: &[Row]) -> Result<(), PersistError> {
        let mut last_err = None;
        for row in rows {
            if let Err(e) = self.put_row(table, row) {
                log::warn!("failed to persist row in `{table}`: {e}");
                last_err = Some(e);
            }
        }
        if let Err(e) = self.backend.commit() {
            last_err = Some(e);
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn put_row(&mut self, table: &str, row: &Row) -> Result<(), PersistError> {
        let id = row.id().map_err(|_| PersistError::RowWithoutId)?;
        if let Some(existing) = self.backend.get_row(table, &id)? {
            if !lww_accepts(&existing, row) {
                return Ok(());
            }
        }
        self.backend.put_row(table, &id, row)
    }

    pub fn get_cursor(&self) -> Result<Option<SyncCursor>, PersistError> {
        self.backend.get_cursor()
    }

    pub fn put_cursor(&mut self, cursor: &SyncCursor) -> Result<(), PersistError> {
        self.backend.put_cursor(cursor)?;
        self.backend.commit()
    }

    /// Drop every row and the cursor.
    pub fn reset(&mut self) -> Result<(), PersistError> {
        self.backend.clear()
    }
}
