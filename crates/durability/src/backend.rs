use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tidemark_client_api_messages::SyncCursor;
use tidemark_value::{Row, RowId};

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored value does not decode: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("row without an `id` cannot be persisted")]
    RowWithoutId,
}

/// The persistence bridge: what an embedding's key–value store must offer.
///
/// Values are serialized rows keyed by (table, id); one dedicated slot holds
/// the sync cursor. Mutations accumulate until [`commit`](Self::commit),
/// which makes a batch of row writes land together with respect to the
/// cursor that follows them.
pub trait KeyValueBackend {
    fn get_row(&self, table: &str, id: &RowId) -> Result<Option<Row>, PersistError>;
    fn put_row(&mut self, table: &str, id: &RowId, row: &Row) -> Result<(), PersistError>;
    fn scan_table(&self, table: &str) -> Result<Vec<Row>, PersistError>;
    fn table_names(&self) -> Result<Vec<String>, PersistError>;
    fn get_cursor(&self) -> Result<Option<SyncCursor>, PersistError>;
    fn put_cursor(&mut self, cursor: &SyncCursor) -> Result<(), PersistError>;
    fn clear(&mut self) -> Result<(), PersistError>;
    fn commit(&mut self) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Rows held as serialized JSON in memory. The default backend for tests
/// and for embeddings that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: BTreeMap<String, BTreeMap<RowId, String>>,
    cursor: Option<String>,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        MemoryBackend::default()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get_row(&self, table: &str, id: &RowId) -> Result<Option<Row>, PersistError> {
        match self.tables.get(table).and_then(|t| t.get(id)) {
            Some(serialized) => Ok(Some(serde_json::from_str(serialized)?)),
            None => Ok(None),
        }
    }

    fn put_row(&mut self, table: &str, id: &RowId, row: &Row) -> Result<(), PersistError> {
        let serialized = serde_json::to_string(row)?;
        self.tables.entry(table.to_owned()).or_default().insert(id.clone(), serialized);
        Ok(())
    }

    fn scan_table(&self, table: &str) -> Result<Vec<Row>, PersistError> {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|t| t.values())
            .map(|serialized| Ok(serde_json::from_str(serialized)?))
            .collect()
    }

    fn table_names(&self) -> Result<Vec<String>, PersistError> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn get_cursor(&self) -> Result<Option<SyncCursor>, PersistError> {
        match &self.cursor {
            Some(serialized) => Ok(Some(serde_json::from_str(serialized)?)),
            None => Ok(None),
        }
    }

    fn put_cursor(&mut self, cursor: &SyncCursor) -> Result<(), PersistError> {
        self.cursor = Some(serde_json::to_string(cursor)?);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PersistError> {
        self.tables.clear();
        self.cursor = None;
        Ok(())
    }
}

/// A whole logical database in one JSON file, rewritten atomically on
/// commit via a sibling temp file.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    state: MemoryBackend,
    dirty: bool,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct FileState {
    tables: BTreeMap<String, BTreeMap<String, Row>>,
    cursor: Option<SyncCursor>,
}

impl JsonFileBackend {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<JsonFileBackend, PersistError> {
        let path = path.as_ref().to_owned();
        let mut state = MemoryBackend::new();
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let file: FileState = serde_json::from_str(&contents)?;
            for (table, rows) in file.tables {
                for row in rows.into_values() {
                    if let Ok(id) = row.id() {
                        state.put_row(&table, &id, &row)?;
                    }
                }
            }
            if let Some(cursor) = &file.cursor {
                state.put_cursor(cursor)?;
            }
        }
        Ok(JsonFileBackend {
            path,
            state,
            dirty: false,
        })
    }

    fn flush(&mut self) -> Result<(), PersistError> {
        let mut file = FileState {
            cursor: self.state.get_cursor()?,
            ..FileState::default()
        };
        for table in self.state.table_names()? {
            let rows = self.state.scan_table(&table)?;
            let entry = file.tables.entry(table).or_default();
            for row in rows {
                if let Ok(id) = row.id() {
                    entry.insert(id.to_string(), row);
                }
            }
        }
        let serialized = serde_json::to_vec(&file)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&serialized)?;
        tmp.persist(&self.path).map_err(|e| PersistError::Io(e.error))?;
        self.dirty = false;
        Ok(())
    }
}

impl KeyValueBackend for JsonFileBackend {
    fn get_row(&self, table: &str, id: &RowId) -> Result<Option<Row>, PersistError> {
        self.state.get_row(table, id)
    }

    fn put_row(&mut self, table: &str, id: &RowId, row: &Row) -> Result<(), PersistError> {
        self.state.put_row(table, id, row)?;
        self.dirty = true;
        Ok(())
    }

    fn scan_table(&self, table: &str) -> Result<Vec<Row>, PersistError> {
        self.state.scan_table(table)
    }

    fn table_names(&self) -> Result<Vec<String>, PersistError> {
        self.state.table_names()
    }

    fn get_cursor(&self) -> Result<Option<SyncCursor>, PersistError> {
        self.state.get_cursor()
    }

    fn put_cursor(&mut self, cursor: &SyncCursor) -> Result<(), PersistError> {
        self.state.put_cursor(cursor)?;
        self.dirty = true;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PersistError> {
        self.state.clear()?;
        self.dirty = true;
        self.flush()
    }

    fn commit(&mut self) -> Result<(), PersistError> {
        if self.dirty {
            self.flush()?;
        }
        Ok(())
    }
}
