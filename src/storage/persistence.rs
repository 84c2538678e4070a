//! On-disk store snapshots.
//!
//! A store file is one MessagePack document holding every part with its
//! table schemas and rows. Indexes and full-text catalogs are derived data and
//! are rebuilt on load.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::core::{DbError, Result};

use super::{PartState, Store, StoredRow, Table, TableSchema};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub format_version: u32,
    pub created_at_unix_ms: i64,
    pub parts: Vec<PartSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PartSnapshot {
    pub name: String,
    pub tables: Vec<TableSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub schema: TableSchema,
    pub rows: Vec<StoredRow>,
}

impl StoreSnapshot {
    pub fn capture(store: &Store) -> Result<Self> {
        let parts = store
            .snapshot_parts()?
            .into_iter()
            .map(|(name, state)| PartSnapshot {
                name,
                tables: state
                    .tables()
                    .map(|table| TableSnapshot {
                        schema: table.schema().clone(),
                        rows: table.rows().map(|(_, row)| row.clone()).collect(),
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            format_version: FORMAT_VERSION,
            created_at_unix_ms: Utc::now().timestamp_millis(),
            parts,
        })
    }

    pub fn into_store(self) -> Result<Store> {
        if self.format_version != FORMAT_VERSION {
            return Err(DbError::Serialization(format!(
                "unsupported store format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        let mut parts = HashMap::with_capacity(self.parts.len());
        for part in self.parts {
            let mut state = PartState::default();
            for table in part.tables {
                state.put_table(Table::restore(table.schema, table.rows)?);
            }
            parts.insert(part.name, state);
        }
        Ok(Store::from_parts(parts))
    }
}

impl Store {
    /// Writes the whole store to `path`, replacing the file atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let snapshot = StoreSnapshot::capture(self)?;
        let serialized = rmp_serde::to_vec_named(&snapshot)
            .map_err(|e| DbError::Serialization(format!("Failed to serialize store: {}", e)))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let temp = NamedTempFile::new_in(dir)?;
        let mut writer = BufWriter::new(temp);
        writer.write_all(&serialized)?;
        writer.flush()?;
        let temp = writer
            .into_inner()
            .map_err(|e| DbError::IoError(format!("Failed to flush store file: {}", e)))?;
        temp.as_file().sync_all()?;
        temp.persist(path)
            .map_err(|e| DbError::IoError(format!("Failed to replace {}: {}", path.display(), e)))?;

        info!(
            path = %path.display(),
            parts = snapshot.parts.len(),
            bytes = serialized.len(),
            "store saved"
        );
        Ok(())
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut data = Vec::new();
        BufReader::new(file).read_to_end(&mut data)?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| DbError::Serialization(format!("Failed to deserialize store: {}", e)))?;
        debug!(path = %path.display(), parts = snapshot.parts.len(), "store loaded");
        snapshot.into_store()
    }

    /// Opens `path`, or starts an empty store when the file does not exist yet.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Ok(Self::new())
        }
    }
}
