//! Per-tree metadata and its on-disk encoding.
//!
//! Packed little-endian: ten `i32` fields (`order, num_pages, root_page,
//! first_free_page, first_leaf, last_leaf, key_size, num_key_attrs,
//! key_offset, recid_offset`) followed by one 5-byte type record per key
//! attribute. The order is computed from the page geometry; a key wide
//! enough to push it to 2 or below cannot form a tree and aborts.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::index::node::{INDEX_HEADER_SIZE, NO_PAGE};
use crate::io::file::DataFile;
use crate::storage::page::PAGE_SIZE;
use crate::storage::types::{record_width, DataType, RecId, RecordLayout};

#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    /// Maximum number of children per node.
    pub order: i32,
    pub num_pages: i32,
    pub root_page: i32,
    /// Head of the released-page list, `NO_PAGE` when empty.
    pub first_free_page: i32,
    pub first_leaf: i32,
    pub last_leaf: i32,
    pub key_size: i32,
    /// Byte offset of the key array within a node page.
    pub key_offset: i32,
    /// Byte offset of the record-id array within a node page.
    pub rid_offset: i32,
    pub key_layout: RecordLayout,
}

impl IndexMeta {
    /// Metadata for a fresh tree: one page, the root, which is both the
    /// first and last leaf.
    pub fn new(key_layout: RecordLayout) -> Self {
        let key_size = record_width(&key_layout) as i32;
        let order =
            (PAGE_SIZE as i32 - INDEX_HEADER_SIZE as i32) / (key_size + RecId::ENCODED_SIZE as i32);
        assert!(order > 2, "key of {key_size} bytes yields tree order {order}");

        let key_offset = INDEX_HEADER_SIZE as i32;
        Self {
            order,
            num_pages: 1,
            root_page: 0,
            first_free_page: NO_PAGE,
            first_leaf: 0,
            last_leaf: 0,
            key_size,
            key_offset,
            rid_offset: key_offset + key_size * order,
            key_layout,
        }
    }

    /// Minimum number of children of a non-root node,
    /// `floor((order + 1) / 2)`. Kept below the ceiling so that merging
    /// two nodes around the threshold never exceeds the order.
    pub fn min_children(&self) -> i32 {
        (self.order + 1) / 2
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for field in [
            self.order,
            self.num_pages,
            self.root_page,
            self.first_free_page,
            self.first_leaf,
            self.last_leaf,
            self.key_size,
            self.key_layout.len() as i32,
            self.key_offset,
            self.rid_offset,
        ] {
            buf.write_i32::<LittleEndian>(field).unwrap();
        }
        for dtype in &self.key_layout {
            dtype.encode(&mut buf);
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let order = cursor.read_i32::<LittleEndian>()?;
        let num_pages = cursor.read_i32::<LittleEndian>()?;
        let root_page = cursor.read_i32::<LittleEndian>()?;
        let first_free_page = cursor.read_i32::<LittleEndian>()?;
        let first_leaf = cursor.read_i32::<LittleEndian>()?;
        let last_leaf = cursor.read_i32::<LittleEndian>()?;
        let key_size = cursor.read_i32::<LittleEndian>()?;
        let num_key_attrs = cursor.read_i32::<LittleEndian>()? as usize;
        let key_offset = cursor.read_i32::<LittleEndian>()?;
        let rid_offset = cursor.read_i32::<LittleEndian>()?;
        let key_layout = (0..num_key_attrs)
            .map(|_| DataType::decode(&mut cursor))
            .collect::<Result<RecordLayout>>()?;

        Ok(Self {
            order,
            num_pages,
            root_page,
            first_free_page,
            first_leaf,
            last_leaf,
            key_size,
            key_offset,
            rid_offset,
            key_layout,
        })
    }

    pub fn write_to(&self, file: &DataFile) -> Result<()> {
        file.overwrite(&self.encode())
    }

    pub fn read_from(file: &DataFile) -> Result<Self> {
        Self::decode(&file.read_all()?)
    }
}
