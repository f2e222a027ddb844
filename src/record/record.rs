use std::fmt;

use super::error::{RecordError, RecordResult};
use super::schema::TableSchema;
use super::value::Value;
use crate::file::PageId;

/// Slot index within a page
pub type SlotId = usize;

/// Physical identifier for a record (page + slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: SlotId,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: SlotId) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}

/// A tuple: typed values plus, once stored, the slot it lives in
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
    record_id: Option<RecordId>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            record_id: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Encode into a slot buffer of exactly `schema.record_size()` bytes.
    /// Format: [NULL bitmap] [col0 data] [col1 data] ...
    pub fn encode_into(&self, schema: &TableSchema, out: &mut [u8]) -> RecordResult<()> {
        schema.validate_record(&self.values)?;
        if out.len() != schema.record_size() {
            return Err(RecordError::Serialization(format!(
                "Slot is {} bytes, record needs {}",
                out.len(),
                schema.record_size()
            )));
        }

        let (bitmap, mut rest) = out.split_at_mut(schema.null_bitmap_size());
        bitmap.fill(0);
        for (i, (value, col)) in self.values.iter().zip(schema.columns()).enumerate() {
            if value.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
            let (field, tail) = rest.split_at_mut(col.size());
            value.encode_into(&col.data_type, field)?;
            rest = tail;
        }

        Ok(())
    }

    pub fn encode(&self, schema: &TableSchema) -> RecordResult<Vec<u8>> {
        let mut out = vec![0u8; schema.record_size()];
        self.encode_into(schema, &mut out)?;
        Ok(out)
    }

    /// Decode a record from slot bytes; the record id is left unset
    pub fn decode(data: &[u8], schema: &TableSchema) -> RecordResult<Self> {
        if data.len() != schema.record_size() {
            return Err(RecordError::Deserialization(format!(
                "Expected {} bytes, got {}",
                schema.record_size(),
                data.len()
            )));
        }

        let bitmap = &data[..schema.null_bitmap_size()];
        let mut offset = schema.null_bitmap_size();
        let mut values = Vec::with_capacity(schema.column_count());

        for (i, col) in schema.columns().iter().enumerate() {
            let is_null = bitmap[i / 8] & (1 << (i % 8)) != 0;
            let field = &data[offset..offset + col.size()];
            values.push(Value::decode(field, &col.data_type, is_null)?);
            offset += col.size();
        }

        Ok(Record::new(values))
    }
}
