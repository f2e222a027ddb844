use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::info;

use crate::error::DbResult;
use crate::file::{HeapFile, TableId};
use crate::record::{ColumnDef, DataType, RecordError, TableSchema};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Invalid schema for table {table}: {reason}")]
    InvalidSchema { table: String, reason: String },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String, // "INT", "FLOAT" or "CHAR(n)"
    #[serde(default)]
    pub not_null: bool,
}

impl ColumnMetadata {
    pub fn from_column(column: &ColumnDef) -> Self {
        Self {
            name: column.name.clone(),
            column_type: column.data_type.to_string(),
            not_null: column.not_null,
        }
    }

    pub fn to_column_def(&self) -> Result<ColumnDef, RecordError> {
        let data_type: DataType = self.column_type.parse()?;
        Ok(ColumnDef::new(self.name.clone(), data_type, self.not_null))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
    #[serde(default)]
    pub primary_key: Option<String>,
}

impl TableMetadata {
    pub fn to_schema(&self) -> CatalogResult<TableSchema> {
        let invalid = |reason: String| CatalogError::InvalidSchema {
            table: self.name.clone(),
            reason,
        };

        if self.columns.is_empty() {
            return Err(invalid("no columns".into()));
        }
        let columns = self
            .columns
            .iter()
            .map(|c| c.to_column_def().map_err(|e| invalid(e.to_string())))
            .collect::<CatalogResult<Vec<_>>>()?;
        let schema = TableSchema::new(columns);

        if let Some(pk) = &self.primary_key
            && schema.find_column(pk).is_none()
        {
            return Err(invalid(format!("primary key {} is not a column", pk)));
        }
        Ok(schema)
    }
}

/// One registered table
#[derive(Clone)]
struct TableEntry {
    name: String,
    file: Arc<HeapFile>,
    primary_key: Option<String>,
}

/// Registry of the tables the engine knows about, keyed by table id.
///
/// Shared by the buffer pool (to find the heap file of a page) and by scans.
pub struct Catalog {
    page_size: usize,
    tables: RwLock<AHashMap<TableId, TableEntry>>,
    next_id: AtomicU32,
}

impl Catalog {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            tables: RwLock::new(AHashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn tables(&self) -> RwLockReadGuard<'_, AHashMap<TableId, TableEntry>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn tables_mut(&self) -> RwLockWriteGuard<'_, AHashMap<TableId, TableEntry>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, id: TableId) -> CatalogResult<TableEntry> {
        self.tables()
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(id.to_string()))
    }

    /// Register a table stored at `path`, creating the file if needed.
    ///
    /// A table previously registered under the same name or the same file is
    /// replaced.
    pub fn add_table<P: AsRef<Path>>(
        &self,
        name: &str,
        path: P,
        schema: TableSchema,
        primary_key: Option<&str>,
    ) -> DbResult<TableId> {
        if let Some(pk) = primary_key
            && schema.find_column(pk).is_none()
        {
            return Err(CatalogError::InvalidSchema {
                table: name.to_string(),
                reason: format!("primary key {} is not a column", pk),
            }
            .into());
        }

        let id = TableId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let file = HeapFile::open(id, path, schema, self.page_size)?;

        let mut tables = self.tables_mut();
        tables.retain(|_, t| t.name != name && t.file.path() != file.path());
        info!(table = name, %id, path = %file.path().display(), "table registered");
        tables.insert(
            id,
            TableEntry {
                name: name.to_string(),
                file: Arc::new(file),
                primary_key: primary_key.map(str::to_string),
            },
        );
        Ok(id)
    }

    pub fn table_id(&self, name: &str) -> CatalogResult<TableId> {
        self.tables()
            .iter()
            .find(|(_, t)| t.name == name)
            .map(|(id, _)| *id)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    pub fn heap_file(&self, id: TableId) -> CatalogResult<Arc<HeapFile>> {
        self.entry(id).map(|t| t.file)
    }

    pub fn schema(&self, id: TableId) -> CatalogResult<TableSchema> {
        self.entry(id).map(|t| t.file.schema().clone())
    }

    pub fn table_name(&self, id: TableId) -> CatalogResult<String> {
        self.entry(id).map(|t| t.name)
    }

    pub fn primary_key(&self, id: TableId) -> CatalogResult<Option<String>> {
        self.entry(id).map(|t| t.primary_key)
    }

    /// Ids of every registered table, ascending
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self.tables().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        self.tables_mut().clear();
    }

    /// Register every table described by a JSON catalog file.
    ///
    /// The file holds an array of [`TableMetadata`]; each table's data lives
    /// next to the catalog as `<name>.dat`.
    pub fn load_schema<P: AsRef<Path>>(&self, path: P) -> DbResult<Vec<TableId>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(CatalogError::from)?;
        let tables: Vec<TableMetadata> =
            serde_json::from_str(&content).map_err(CatalogError::from)?;
        let dir = data_dir(path);

        let mut ids = Vec::with_capacity(tables.len());
        for table in &tables {
            let schema = table.to_schema()?;
            let data_path = dir.join(format!("{}.dat", table.name));
            ids.push(self.add_table(
                &table.name,
                data_path,
                schema,
                table.primary_key.as_deref(),
            )?);
        }
        info!(path = %path.display(), tables = ids.len(), "catalog loaded");
        Ok(ids)
    }

    /// Describe every registered table in the format `load_schema` reads
    pub fn metadata(&self) -> Vec<TableMetadata> {
        let tables = self.tables();
        let mut ids: Vec<_> = tables.keys().copied().collect();
        ids.sort();
        ids.iter()
            .filter_map(|id| tables.get(id))
            .map(|t| TableMetadata {
                name: t.name.clone(),
                columns: t
                    .file
                    .schema()
                    .columns()
                    .iter()
                    .map(ColumnMetadata::from_column)
                    .collect(),
                primary_key: t.primary_key.clone(),
            })
            .collect()
    }

    pub fn save_schema<P: AsRef<Path>>(&self, path: P) -> CatalogResult<()> {
        let content = serde_json::to_string_pretty(&self.metadata())?;
        fs::write(path, content)?;
        Ok(())
    }
}

fn data_dir(catalog_path: &Path) -> PathBuf {
    catalog_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}
