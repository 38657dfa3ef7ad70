//! Slotted record pages.
//!
//! Layout: a `u32` record count, then fixed-size records back to back,
//! then free space. Deletion tombstones the slot; the physical shift
//! happens in one compaction pass when the handler goes away. A handler
//! owns its frame for its whole lifetime (the handle keeps it pinned)
//! and serializes access through the frame's reader/writer lock.

use std::collections::BTreeSet;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::storage::buffer_pool::PageHandle;
use crate::storage::page::PAGE_SIZE;
use crate::storage::types::{
    read_record, record_width, write_record, RecId, Record, RecordLayout,
};

/// Bytes of the record-count header at the front of every record page.
pub const RECORD_HEADER_SIZE: usize = 4;

pub struct RecordPage {
    handle: PageHandle,
    layout: RecordLayout,
    record_size: usize,
    num_records: i32,
    /// Next free byte in the page.
    cursor: usize,
    /// Slots deleted but not yet compacted away.
    tombstones: BTreeSet<i32>,
}

impl RecordPage {
    /// Wrap a page handle. The record count is taken from the page
    /// header, which is zero for freshly created pages.
    pub fn new(handle: PageHandle) -> Result<Self> {
        let layout = handle.layout().clone();
        let record_size = record_width(&layout);
        debug_assert!(record_size > 0, "record layout is empty");

        let num_records =
            handle.with_page(|page| LittleEndian::read_i32(&page[..RECORD_HEADER_SIZE]))?;
        if num_records < 0
            || RECORD_HEADER_SIZE + num_records as usize * record_size > PAGE_SIZE
        {
            return Err(Error::InvalidRecord(format!(
                "page {} header claims {num_records} records of {record_size} bytes",
                handle.page_num()
            )));
        }

        Ok(Self {
            cursor: RECORD_HEADER_SIZE + num_records as usize * record_size,
            handle,
            layout,
            record_size,
            num_records,
            tombstones: BTreeSet::new(),
        })
    }

    pub fn page_num(&self) -> i32 {
        self.handle.page_num()
    }

    pub fn num_records(&self) -> i32 {
        self.num_records
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    fn slot_offset(&self, slot: i32) -> usize {
        RECORD_HEADER_SIZE + slot as usize * self.record_size
    }

    fn check_slot(&self, slot: i32) -> Result<()> {
        if slot < 0 || slot >= self.num_records {
            return Err(Error::InvalidRecord(format!(
                "slot {slot} out of range, page has {} records",
                self.num_records
            )));
        }
        Ok(())
    }

    fn write_count(&self) -> Result<()> {
        let count = self.num_records;
        self.handle.with_page_mut(|page| {
            LittleEndian::write_i32(&mut page[..RECORD_HEADER_SIZE], count)
        })
    }

    /// Append a record, reusing the largest tombstoned slot first.
    /// Fails with `PageFull` when neither is possible.
    pub fn add(&mut self, record: &Record) -> Result<RecId> {
        if let Some(&slot) = self.tombstones.iter().next_back() {
            let offset = self.slot_offset(slot);
            self.handle
                .with_page_mut(|page| write_record(page, offset, &self.layout, record))??;
            self.tombstones.remove(&slot);
            return Ok(RecId::new(self.handle.page_num(), slot));
        }

        if self.cursor + self.record_size > PAGE_SIZE {
            return Err(Error::PageFull);
        }

        let offset = self.cursor;
        self.handle
            .with_page_mut(|page| write_record(page, offset, &self.layout, record))??;
        let slot = self.num_records;
        self.num_records += 1;
        self.cursor += self.record_size;
        self.write_count()?;
        Ok(RecId::new(self.handle.page_num(), slot))
    }

    /// Tombstone a slot. Physical removal is deferred to compaction.
    pub fn delete(&mut self, slot: i32) -> Result<()> {
        if self.num_records == 0 {
            return Err(Error::PageEmpty);
        }
        self.check_slot(slot)?;
        if self.tombstones.contains(&slot) {
            return Err(Error::DeletedRecord(slot));
        }
        self.tombstones.insert(slot);
        Ok(())
    }

    /// Overwrite a live slot in place.
    pub fn update(&mut self, slot: i32, record: &Record) -> Result<()> {
        self.check_slot(slot)?;
        if self.tombstones.contains(&slot) {
            return Err(Error::DeletedRecord(slot));
        }
        let offset = self.slot_offset(slot);
        self.handle
            .with_page_mut(|page| write_record(page, offset, &self.layout, record))??;
        Ok(())
    }

    /// Read a live slot under the frame's shared lock.
    pub fn read(&self, slot: i32) -> Result<Record> {
        self.check_slot(slot)?;
        if self.tombstones.contains(&slot) {
            return Err(Error::DeletedRecord(slot));
        }
        let offset = self.slot_offset(slot);
        self.handle
            .with_page(|page| read_record(page, offset, &self.layout))?
    }

    /// The slot moves the pending compaction will perform: for every
    /// surviving record whose slot changes, `(old_slot, new_slot)`.
    /// Callers that key external state by slot number apply these
    /// before the handler goes away.
    pub fn compaction_remap(&self) -> Vec<(i32, i32)> {
        let mut remap = Vec::new();
        let mut holes = 0;
        for slot in 0..self.num_records {
            if self.tombstones.contains(&slot) {
                holes += 1;
            } else if holes > 0 {
                remap.push((slot, slot - holes));
            }
        }
        remap
    }

    /// Shift live records over the tombstoned slots and rewrite the
    /// record count. Quadratic in the worst case; the page is bounded.
    pub fn compact(&mut self) -> Result<()> {
        if self.tombstones.is_empty() {
            return Ok(());
        }

        let record_size = self.record_size;
        let mut count = self.num_records;
        let tombstones = std::mem::take(&mut self.tombstones);
        self.handle.with_page_mut(|page| {
            for &slot in tombstones.iter().rev() {
                for from in slot + 1..count {
                    let src = RECORD_HEADER_SIZE + from as usize * record_size;
                    let dst = src - record_size;
                    page.copy_within(src..src + record_size, dst);
                }
                count -= 1;
            }
            LittleEndian::write_i32(&mut page[..RECORD_HEADER_SIZE], count);
        })?;

        self.num_records = count;
        self.cursor = RECORD_HEADER_SIZE + count as usize * record_size;
        Ok(())
    }
}

impl Drop for RecordPage {
    fn drop(&mut self) {
        // A reclaimed frame has nothing left to compact into.
        if let Err(e) = self.compact() {
            if e != Error::InvalidTimestamp {
                tracing::error!(page = self.handle.page_num(), error = %e, "compaction failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::io::file::DataFile;
    use crate::storage::buffer_pool::BufferPool;
    use crate::storage::types::{DataType, Value};
    use tempfile::TempDir;
    use std::sync::Arc;

    fn layout() -> RecordLayout {
        vec![DataType::int(), DataType::text(6)]
    }

    fn rec(n: i32) -> Record {
        vec![Value::Int(n), Value::Text(format!("r{n}"))]
    }

    async fn page(pool: &Arc<BufferPool>, file: &DataFile, num: i32) -> RecordPage {
        let handle = pool.create_page(file, num, &layout()).await.unwrap();
        RecordPage::new(handle).unwrap()
    }

    async fn reopen(pool: &Arc<BufferPool>, file: &DataFile, num: i32) -> RecordPage {
        let handle = pool.read_page(file, num, &layout()).await.unwrap();
        RecordPage::new(handle).unwrap()
    }

    fn harness() -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::start(EngineConfig::new(dir.path()).io_frames(4).scratch_frames(4));
        (dir, engine)
    }

    #[test]
    fn test_add_then_read_round_trip() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let file = DataFile::create(dir.path().join("data")).unwrap();

        engine.sync_wait(async move {
            let mut page = page(&pool, &file, 0).await;
            for n in 0..10 {
                let rid = page.add(&rec(n)).unwrap();
                assert_eq!(rid, RecId::new(0, n));
            }
            assert_eq!(page.num_records(), 10);
            for n in 0..10 {
                let record = page.read(n).unwrap();
                assert_eq!(record[0], Value::Int(n));
                assert_eq!(
                    crate::storage::types::compare_records(&record, &rec(n)),
                    std::cmp::Ordering::Equal
                );
            }
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_page_full() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let file = DataFile::create(dir.path().join("data")).unwrap();

        engine.sync_wait(async move {
            let mut page = page(&pool, &file, 0).await;
            let capacity = (PAGE_SIZE - RECORD_HEADER_SIZE) / page.record_size();
            for n in 0..capacity as i32 {
                page.add(&rec(n)).unwrap();
            }
            assert_eq!(page.add(&rec(-1)), Err(Error::PageFull));

            // Deleting reopens exactly one slot.
            page.delete(3).unwrap();
            assert_eq!(page.add(&rec(-1)).unwrap().slot_num, 3);
            assert_eq!(page.add(&rec(-2)), Err(Error::PageFull));
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_delete_reuses_largest_tombstone() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let file = DataFile::create(dir.path().join("data")).unwrap();

        engine.sync_wait(async move {
            let mut page = page(&pool, &file, 0).await;
            for n in 0..6 {
                page.add(&rec(n)).unwrap();
            }
            page.delete(1).unwrap();
            page.delete(4).unwrap();
            assert_eq!(page.read(1), Err(Error::DeletedRecord(1)));
            assert_eq!(page.delete(4), Err(Error::DeletedRecord(4)));

            assert_eq!(page.add(&rec(40)).unwrap().slot_num, 4);
            assert_eq!(page.add(&rec(10)).unwrap().slot_num, 1);
            assert_eq!(page.read(4).unwrap()[0], Value::Int(40));
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_update_and_bad_slots() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let file = DataFile::create(dir.path().join("data")).unwrap();

        engine.sync_wait(async move {
            let mut page = page(&pool, &file, 0).await;
            page.add(&rec(1)).unwrap();
            page.update(0, &rec(99)).unwrap();
            assert_eq!(page.read(0).unwrap()[0], Value::Int(99));

            assert!(matches!(page.update(5, &rec(0)), Err(Error::InvalidRecord(_))));
            assert!(matches!(page.read(-1), Err(Error::InvalidRecord(_))));
            page.delete(0).unwrap();
            assert_eq!(page.update(0, &rec(0)), Err(Error::DeletedRecord(0)));
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_compaction_preserves_live_records() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let file = DataFile::create(dir.path().join("data")).unwrap();

        engine.sync_wait(async move {
            let mut page = page(&pool, &file, 0).await;
            for n in 0..8 {
                page.add(&rec(n)).unwrap();
            }
            page.delete(0).unwrap();
            page.delete(3).unwrap();
            page.delete(7).unwrap();

            assert_eq!(
                page.compaction_remap(),
                vec![(1, 0), (2, 1), (4, 2), (5, 3), (6, 4)]
            );
            page.compact().unwrap();
            assert!(page.compaction_remap().is_empty());
            assert_eq!(page.num_records(), 5);
            let live: Vec<i32> = (0..5)
                .map(|slot| match page.read(slot).unwrap()[0] {
                    Value::Int(n) => n,
                    _ => unreachable!(),
                })
                .collect();
            assert_eq!(live, vec![1, 2, 4, 5, 6]);

            // Compacting again is a no-op.
            page.compact().unwrap();
            assert_eq!(page.num_records(), 5);
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_drop_compacts_and_count_survives_reopen() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let file = DataFile::create(dir.path().join("data")).unwrap();

        engine.sync_wait(async move {
            {
                let mut page = page(&pool, &file, 0).await;
                for n in 0..5 {
                    page.add(&rec(n)).unwrap();
                }
                page.delete(2).unwrap();
            }
            // Handler dropped: tombstone compacted away, header updated.
            let page = reopen(&pool, &file, 0).await;
            assert_eq!(page.num_records(), 4);
            assert_eq!(page.read(2).unwrap()[0], Value::Int(3));
        });
        engine.shutdown().unwrap();
    }
}
