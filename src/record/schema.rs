use super::error::{RecordError, RecordResult};
use super::value::{DataType, Value};

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType, not_null: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            not_null,
        }
    }

    /// Get the size of this column in bytes
    pub fn size(&self) -> usize {
        self.data_type.size()
    }
}

/// Ordered list of columns fixing the encoding of every tuple of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
    null_bitmap_size: usize,
    record_size: usize,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        let null_bitmap_size = columns.len().div_ceil(8); // ⌈n/8⌉
        let record_size = null_bitmap_size + columns.iter().map(|c| c.size()).sum::<usize>();

        Self {
            columns,
            null_bitmap_size,
            record_size,
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnDef> {
        self.columns.get(idx)
    }

    /// Find column index by name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Get NULL bitmap size in bytes
    pub fn null_bitmap_size(&self) -> usize {
        self.null_bitmap_size
    }

    /// Get total record size in bytes (including NULL bitmap); this is the slot width
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Column names prefixed with `alias.`, as reported by a scan
    pub fn qualified_names(&self, alias: &str) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| format!("{}.{}", alias, c.name))
            .collect()
    }

    /// Validate a record against this schema
    pub fn validate_record(&self, values: &[Value]) -> RecordResult<()> {
        if values.len() != self.columns.len() {
            return Err(RecordError::SchemaMismatch(format!(
                "Expected {} columns, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        for (value, col) in values.iter().zip(&self.columns) {
            if col.not_null && value.is_null() {
                return Err(RecordError::NullConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    col.name
                )));
            }

            match (&col.data_type, value) {
                (_, Value::Null) => {}
                (DataType::Int, Value::Int(_)) => {}
                (DataType::Float, Value::Float(_)) => {}
                (DataType::Char(_), Value::String(_)) => {}
                (dt, val) => {
                    return Err(RecordError::TypeMismatch {
                        expected: dt.to_string(),
                        actual: format!("{:?}", val),
                    });
                }
            }
        }

        Ok(())
    }
}
