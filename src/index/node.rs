//! B+tree node pages.
//!
//! Layout: a 25-byte header (six `i32` fields and one `u8` leaf flag),
//! the key array, then the parallel record-id array at the offsets the
//! tree metadata fixes. Interior nodes keep `num_children == num_keys`:
//! the recid at index `i` points at the subtree whose max is the key at
//! index `i`. A node handler pins its frame for its whole lifetime and
//! reads and writes header fields through the page bytes, so two
//! handlers on one page always agree.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::index::meta::IndexMeta;
use crate::storage::buffer_pool::PageHandle;
use crate::storage::types::{
    compare_records, read_record, write_record, RecId, Record, RecordLayout,
};

/// Sentinel for an absent page link: no parent, free-list end, or no
/// adjacent leaf.
pub const NO_PAGE: i32 = -1;

/// Bytes of the node header at the front of every index page.
pub const INDEX_HEADER_SIZE: usize = 25;

const OFF_PARENT: usize = 0;
const OFF_NEXT_FREE: usize = 4;
const OFF_NUM_KEYS: usize = 8;
const OFF_NUM_CHILDREN: usize = 12;
const OFF_PREV_LEAF: usize = 16;
const OFF_NEXT_LEAF: usize = 20;
const OFF_IS_LEAF: usize = 24;

pub struct IndexNode {
    handle: PageHandle,
    key_layout: RecordLayout,
    key_size: usize,
    key_offset: usize,
    rid_offset: usize,
    order: i32,
}

impl IndexNode {
    pub fn new(handle: PageHandle, meta: &IndexMeta) -> Self {
        Self {
            handle,
            key_layout: meta.key_layout.clone(),
            key_size: meta.key_size as usize,
            key_offset: meta.key_offset as usize,
            rid_offset: meta.rid_offset as usize,
            order: meta.order,
        }
    }

    pub fn page_num(&self) -> i32 {
        self.handle.page_num()
    }

    /// Write a fresh header: no links, no entries.
    pub fn init_header(&self, parent: i32, is_leaf: bool) -> Result<()> {
        self.handle.with_page_mut(|page| {
            LittleEndian::write_i32(&mut page[OFF_PARENT..], parent);
            LittleEndian::write_i32(&mut page[OFF_NEXT_FREE..], NO_PAGE);
            LittleEndian::write_i32(&mut page[OFF_NUM_KEYS..], 0);
            LittleEndian::write_i32(&mut page[OFF_NUM_CHILDREN..], 0);
            LittleEndian::write_i32(&mut page[OFF_PREV_LEAF..], NO_PAGE);
            LittleEndian::write_i32(&mut page[OFF_NEXT_LEAF..], NO_PAGE);
            page[OFF_IS_LEAF] = is_leaf as u8;
        })
    }

    fn header_i32(&self, offset: usize) -> Result<i32> {
        self.handle.with_page(|page| LittleEndian::read_i32(&page[offset..]))
    }

    fn set_header_i32(&self, offset: usize, value: i32) -> Result<()> {
        self.handle.with_page_mut(|page| LittleEndian::write_i32(&mut page[offset..], value))
    }

    pub fn parent(&self) -> Result<i32> {
        self.header_i32(OFF_PARENT)
    }

    pub fn set_parent(&self, parent: i32) -> Result<()> {
        self.set_header_i32(OFF_PARENT, parent)
    }

    pub fn next_free(&self) -> Result<i32> {
        self.header_i32(OFF_NEXT_FREE)
    }

    pub fn set_next_free(&self, next_free: i32) -> Result<()> {
        self.set_header_i32(OFF_NEXT_FREE, next_free)
    }

    pub fn num_keys(&self) -> Result<i32> {
        self.header_i32(OFF_NUM_KEYS)
    }

    pub fn num_children(&self) -> Result<i32> {
        self.header_i32(OFF_NUM_CHILDREN)
    }

    pub fn prev_leaf(&self) -> Result<i32> {
        self.header_i32(OFF_PREV_LEAF)
    }

    pub fn set_prev_leaf(&self, prev: i32) -> Result<()> {
        self.set_header_i32(OFF_PREV_LEAF, prev)
    }

    pub fn next_leaf(&self) -> Result<i32> {
        self.header_i32(OFF_NEXT_LEAF)
    }

    pub fn set_next_leaf(&self, next: i32) -> Result<()> {
        self.set_header_i32(OFF_NEXT_LEAF, next)
    }

    pub fn is_leaf(&self) -> Result<bool> {
        self.handle.with_page(|page| page[OFF_IS_LEAF] != 0)
    }

    fn key_pos(&self, idx: i32) -> usize {
        self.key_offset + idx as usize * self.key_size
    }

    fn rid_pos(&self, idx: i32) -> usize {
        self.rid_offset + idx as usize * RecId::ENCODED_SIZE
    }

    fn check_key_idx(&self, idx: i32) -> Result<()> {
        if idx < 0 || idx >= self.num_keys()? {
            return Err(Error::InvalidKey(format!(
                "key index {idx} out of range on page {}",
                self.page_num()
            )));
        }
        Ok(())
    }

    fn check_rid_idx(&self, idx: i32) -> Result<()> {
        if idx < 0 || idx >= self.num_children()? {
            return Err(Error::InvalidRid(format!(
                "recid index {idx} out of range on page {}",
                self.page_num()
            )));
        }
        Ok(())
    }

    pub fn key(&self, idx: i32) -> Result<Record> {
        self.check_key_idx(idx)?;
        let pos = self.key_pos(idx);
        self.handle.with_page(|page| read_record(page, pos, &self.key_layout))?
    }

    pub fn keys(&self, idx: i32, count: i32) -> Result<Vec<Record>> {
        (idx..idx + count).map(|i| self.key(i)).collect()
    }

    pub fn max_key(&self) -> Result<Record> {
        self.key(self.num_keys()? - 1)
    }

    pub fn min_key(&self) -> Result<Record> {
        self.key(0)
    }

    pub fn set_key(&self, idx: i32, key: &Record) -> Result<()> {
        self.check_key_idx(idx)?;
        let pos = self.key_pos(idx);
        self.handle
            .with_page_mut(|page| write_record(page, pos, &self.key_layout, key))??;
        Ok(())
    }

    pub fn rid(&self, idx: i32) -> Result<RecId> {
        self.check_rid_idx(idx)?;
        let pos = self.rid_pos(idx);
        self.handle.with_page(|page| RecId::read_at(page, pos))?
    }

    pub fn rids(&self, idx: i32, count: i32) -> Result<Vec<RecId>> {
        (idx..idx + count).map(|i| self.rid(i)).collect()
    }

    pub fn max_rid(&self) -> Result<RecId> {
        self.rid(self.num_children()? - 1)
    }

    pub fn min_rid(&self) -> Result<RecId> {
        self.rid(0)
    }

    pub fn set_rid(&self, idx: i32, rid: RecId) -> Result<()> {
        self.check_rid_idx(idx)?;
        let pos = self.rid_pos(idx);
        self.handle.with_page_mut(|page| rid.write_at(page, pos))?
    }

    /// Insert keys at `idx`, shifting the tail up. Fails with `PageFull`
    /// past the tree order.
    pub fn insert_keys(&self, keys: &[Record], idx: i32) -> Result<()> {
        let num_keys = self.num_keys()?;
        if idx < 0 || idx > num_keys {
            return Err(Error::InvalidKey(format!(
                "insertion index {idx} out of range on page {}",
                self.page_num()
            )));
        }
        if num_keys + keys.len() as i32 > self.order {
            return Err(Error::PageFull);
        }

        let src = self.key_pos(idx);
        let dst = self.key_pos(idx + keys.len() as i32);
        let end = self.key_pos(num_keys);
        self.handle.with_page_mut(|page| -> Result<()> {
            page.copy_within(src..end, dst);
            let mut at = src;
            for key in keys {
                at = write_record(page, at, &self.key_layout, key)?;
            }
            LittleEndian::write_i32(&mut page[OFF_NUM_KEYS..], num_keys + keys.len() as i32);
            Ok(())
        })??;
        Ok(())
    }

    pub fn insert_key(&self, key: &Record, idx: i32) -> Result<()> {
        self.insert_keys(std::slice::from_ref(key), idx)
    }

    pub fn push_back_key(&self, key: &Record) -> Result<()> {
        self.insert_key(key, self.num_keys()?)
    }

    pub fn push_back_keys(&self, keys: &[Record]) -> Result<()> {
        self.insert_keys(keys, self.num_keys()?)
    }

    pub fn erase_key(&self, idx: i32) -> Result<()> {
        let num_keys = self.num_keys()?;
        self.check_key_idx(idx)?;
        let dst = self.key_pos(idx);
        let src = self.key_pos(idx + 1);
        let end = self.key_pos(num_keys);
        self.handle.with_page_mut(|page| {
            page.copy_within(src..end, dst);
            LittleEndian::write_i32(&mut page[OFF_NUM_KEYS..], num_keys - 1);
        })
    }

    /// Insert recids at `idx`, shifting the tail up. Fails with
    /// `PageFull` past the tree order.
    pub fn insert_rids(&self, rids: &[RecId], idx: i32) -> Result<()> {
        let num_children = self.num_children()?;
        if idx < 0 || idx > num_children {
            return Err(Error::InvalidRid(format!(
                "insertion index {idx} out of range on page {}",
                self.page_num()
            )));
        }
        if num_children + rids.len() as i32 > self.order {
            return Err(Error::PageFull);
        }

        let src = self.rid_pos(idx);
        let dst = self.rid_pos(idx + rids.len() as i32);
        let end = self.rid_pos(num_children);
        self.handle.with_page_mut(|page| -> Result<()> {
            page.copy_within(src..end, dst);
            let mut at = src;
            for rid in rids {
                rid.write_at(page, at)?;
                at += RecId::ENCODED_SIZE;
            }
            LittleEndian::write_i32(
                &mut page[OFF_NUM_CHILDREN..],
                num_children + rids.len() as i32,
            );
            Ok(())
        })??;
        Ok(())
    }

    pub fn insert_rid(&self, rid: RecId, idx: i32) -> Result<()> {
        self.insert_rids(&[rid], idx)
    }

    pub fn push_back_rid(&self, rid: RecId) -> Result<()> {
        self.insert_rid(rid, self.num_children()?)
    }

    pub fn push_back_rids(&self, rids: &[RecId]) -> Result<()> {
        self.insert_rids(rids, self.num_children()?)
    }

    pub fn erase_rid(&self, idx: i32) -> Result<()> {
        let num_children = self.num_children()?;
        self.check_rid_idx(idx)?;
        let dst = self.rid_pos(idx);
        let src = self.rid_pos(idx + 1);
        let end = self.rid_pos(num_children);
        self.handle.with_page_mut(|page| {
            page.copy_within(src..end, dst);
            LittleEndian::write_i32(&mut page[OFF_NUM_CHILDREN..], num_children - 1);
        })
    }

    /// Replace the node's whole entry set. Used when a split
    /// redistributes a materialized entry run across two nodes.
    pub fn set_entries(&self, keys: &[Record], rids: &[RecId]) -> Result<()> {
        debug_assert_eq!(keys.len(), rids.len());
        debug_assert!(keys.len() as i32 <= self.order);
        let key_start = self.key_pos(0);
        let rid_start = self.rid_pos(0);
        self.handle.with_page_mut(|page| -> Result<()> {
            let mut at = key_start;
            for key in keys {
                at = write_record(page, at, &self.key_layout, key)?;
            }
            let mut at = rid_start;
            for rid in rids {
                rid.write_at(page, at)?;
                at += RecId::ENCODED_SIZE;
            }
            LittleEndian::write_i32(&mut page[OFF_NUM_KEYS..], keys.len() as i32);
            LittleEndian::write_i32(&mut page[OFF_NUM_CHILDREN..], rids.len() as i32);
            Ok(())
        })??;
        Ok(())
    }

    /// First index whose key is `>= key`, or `num_keys` if none.
    pub fn lower_bound(&self, key: &Record) -> Result<i32> {
        self.bound(key, Ordering::Less)
    }

    /// First index whose key is `> key`, or `num_keys` if none.
    pub fn upper_bound(&self, key: &Record) -> Result<i32> {
        self.bound(key, Ordering::Equal)
    }

    fn bound(&self, key: &Record, keep_going: Ordering) -> Result<i32> {
        let mut low = 0;
        let mut high = self.num_keys()?;
        while low < high {
            let mid = (low + high) / 2;
            // Less: stop at the first key >= target. Equal: also step
            // over equal keys.
            if compare_records(&self.key(mid)?, key) <= keep_going {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    /// Index of the recid pointing at the given child page.
    pub fn find_child(&self, child_page: i32) -> Result<i32> {
        for idx in 0..self.num_children()? {
            if self.rid(idx)?.page_num == child_page {
                return Ok(idx);
            }
        }
        Err(Error::InvalidRid(format!(
            "page {} has no child {child_page}",
            self.page_num()
        )))
    }
}
