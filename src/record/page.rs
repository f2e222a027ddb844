use super::error::{RecordError, RecordResult};
use super::record::SlotId;
use crate::file::PageId;
use crate::transaction::TransactionId;

/// In-memory image of one heap page.
///
/// Layout: an occupancy bitmap of `⌈slot_count/8⌉` bytes (bit *i* set means
/// slot *i* holds a record) followed by `slot_count` fixed-width records.
/// Bytes after the last slot are unused and kept zero.
///
/// A page is either clean (no dirtier, no before-image) or dirty (dirtier set,
/// before-image equal to the content at the moment it last left the clean
/// state). Every mutating method captures the before-image *before* touching
/// the bytes.
#[derive(Debug, Clone)]
pub struct HeapPage {
    id: PageId,
    data: Vec<u8>,
    slot_count: usize,
    record_size: usize,
    dirtier: Option<TransactionId>,
    before_image: Option<Vec<u8>>,
}

impl HeapPage {
    /// Number of `record_size` slots that fit in a page, one bitmap bit each
    pub fn slot_capacity(page_size: usize, record_size: usize) -> usize {
        if record_size == 0 {
            return 0;
        }
        // slot_count * (record_size + 1/8) <= page_size
        (page_size * 8) / (record_size * 8 + 1)
    }

    /// Bytes of a freshly allocated page: all slots free
    pub fn empty_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    /// Wrap bytes read from disk (or freshly allocated) as a clean page
    pub fn new(id: PageId, data: Vec<u8>, record_size: usize) -> RecordResult<Self> {
        let slot_count = Self::slot_capacity(data.len(), record_size);
        if slot_count == 0 {
            return Err(RecordError::InvalidRecord(format!(
                "Record size {} does not fit a {} byte page",
                record_size,
                data.len()
            )));
        }

        Ok(Self {
            id,
            data,
            slot_count,
            record_size,
            dirtier: None,
            before_image: None,
        })
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    /// Raw page bytes, exactly one page long
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    fn bitmap_size(&self) -> usize {
        self.slot_count.div_ceil(8)
    }

    fn slot_range(&self, slot: SlotId) -> std::ops::Range<usize> {
        let start = self.bitmap_size() + slot * self.record_size;
        start..start + self.record_size
    }

    fn check_slot(&self, slot: SlotId) -> RecordResult<()> {
        if slot >= self.slot_count {
            return Err(RecordError::InvalidSlot(self.id.to_string(), slot));
        }
        Ok(())
    }

    pub fn is_slot_used(&self, slot: SlotId) -> bool {
        slot < self.slot_count && self.data[slot / 8] & (1 << (slot % 8)) != 0
    }

    /// Lowest-numbered free slot, if any
    pub fn find_free_slot(&self) -> Option<SlotId> {
        (0..self.slot_count).find(|&slot| !self.is_slot_used(slot))
    }

    pub fn empty_slot_count(&self) -> usize {
        (0..self.slot_count)
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    /// Occupied slots in ascending order
    pub fn used_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        (0..self.slot_count).filter(move |&slot| self.is_slot_used(slot))
    }

    /// Bytes of an occupied slot
    pub fn record_bytes(&self, slot: SlotId) -> RecordResult<&[u8]> {
        self.check_slot(slot)?;
        if !self.is_slot_used(slot) {
            return Err(RecordError::EmptySlot(self.id.to_string(), slot));
        }
        Ok(&self.data[self.slot_range(slot)])
    }

    /// Store `record` in the first free slot on behalf of `tid`
    pub fn insert_record(&mut self, tid: TransactionId, record: &[u8]) -> RecordResult<SlotId> {
        if record.len() != self.record_size {
            return Err(RecordError::InvalidRecord(format!(
                "Record size mismatch: expected {}, got {}",
                self.record_size,
                record.len()
            )));
        }
        let slot = self
            .find_free_slot()
            .ok_or_else(|| RecordError::PageFull(self.id.to_string()))?;

        self.mark_dirty(Some(tid));
        let range = self.slot_range(slot);
        self.data[range].copy_from_slice(record);
        self.data[slot / 8] |= 1 << (slot % 8);
        Ok(slot)
    }

    /// Free an occupied slot on behalf of `tid`; the record bytes are left in place
    pub fn delete_record(&mut self, tid: TransactionId, slot: SlotId) -> RecordResult<()> {
        self.check_slot(slot)?;
        if !self.is_slot_used(slot) {
            return Err(RecordError::EmptySlot(self.id.to_string(), slot));
        }

        self.mark_dirty(Some(tid));
        self.data[slot / 8] &= !(1 << (slot % 8));
        Ok(())
    }

    /// `Some(tid)` marks the page dirty, snapshotting the before-image only on
    /// the clean→dirty transition. `None` marks it clean and drops the snapshot.
    pub fn mark_dirty(&mut self, dirtier: Option<TransactionId>) {
        match dirtier {
            Some(tid) => {
                if self.dirtier.is_none() {
                    self.before_image = Some(self.data.clone());
                }
                self.dirtier = Some(tid);
            }
            None => {
                self.dirtier = None;
                self.before_image = None;
            }
        }
    }

    /// Transaction that dirtied this page, `None` when clean
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtier.is_some()
    }

    pub fn before_image(&self) -> Option<&[u8]> {
        self.before_image.as_deref()
    }

    /// Restore the before-image and return to clean; no-op on a clean page
    pub fn revert(&mut self) {
        if let Some(image) = self.before_image.take() {
            self.data = image;
        }
        self.dirtier = None;
    }
}
