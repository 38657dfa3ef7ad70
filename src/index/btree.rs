//! The composite-key B+tree.
//!
//! Interior nodes pair each key with the child whose subtree that key
//! is the maximum of; leaves pair keys with table record ids and chain
//! doubly to their neighbors. Duplicate keys are allowed: point lookups
//! walk the `[lower_bound, upper_bound)` leaf range. Overflow splits a
//! node around its midpoint and cascades upward; underflow borrows from
//! a sibling when one can spare (and stops there) or merges and
//! continues with the parent. Released pages go on a per-tree free list
//! and are reused before the file grows.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::index::meta::IndexMeta;
use crate::index::node::{IndexNode, NO_PAGE};
use crate::io::file::DataFile;
use crate::storage::buffer_pool::BufferPool;
use crate::storage::types::{compare_records, RecId, Record, RecordLayout};

/// Tree metadata file name within an index directory.
pub const META_FILE: &str = "META_DATA";
/// Node pages file name within an index directory.
pub const DATA_FILE: &str = "INDEX_DATA";

/// A position within the leaf level: a leaf page and an entry index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePos {
    pub page_num: i32,
    pub idx: i32,
}

pub struct BTree {
    meta: IndexMeta,
    meta_file: DataFile,
    data_file: DataFile,
    pool: Arc<BufferPool>,
}

impl BTree {
    /// Create a new tree under `dir`: metadata plus a root page that is
    /// an empty leaf.
    pub async fn create(dir: &Path, key_layout: RecordLayout, pool: Arc<BufferPool>) -> Result<Self> {
        Self::create_with_meta(dir, IndexMeta::new(key_layout), pool).await
    }

    pub(crate) async fn create_with_meta(
        dir: &Path,
        meta: IndexMeta,
        pool: Arc<BufferPool>,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let meta_file = DataFile::create(dir.join(META_FILE))?;
        let data_file = DataFile::create(dir.join(DATA_FILE))?;
        meta.write_to(&meta_file)?;

        let tree = Self { meta, meta_file, data_file, pool };
        let handle = tree
            .pool
            .create_page(&tree.data_file, tree.meta.root_page, &tree.meta.key_layout)
            .await?;
        let root = IndexNode::new(handle, &tree.meta);
        root.init_header(NO_PAGE, true)?;
        Ok(tree)
    }

    /// Open an existing tree under `dir`.
    pub async fn open(dir: &Path, pool: Arc<BufferPool>) -> Result<Self> {
        let meta_file = DataFile::open(dir.join(META_FILE))?;
        let data_file = DataFile::open(dir.join(DATA_FILE))?;
        let meta = IndexMeta::read_from(&meta_file)?;
        Ok(Self { meta, meta_file, data_file, pool })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn key_layout(&self) -> &RecordLayout {
        &self.meta.key_layout
    }

    async fn get_node(&self, page_num: i32) -> Result<IndexNode> {
        debug_assert!(page_num >= 0 && page_num < self.meta.num_pages);
        let handle = self
            .pool
            .read_page(&self.data_file, page_num, &self.meta.key_layout)
            .await?;
        Ok(IndexNode::new(handle, &self.meta))
    }

    /// Allocate a node: pop the free list if it has a page, otherwise
    /// grow the file. The node comes back with a fresh header.
    async fn create_node(&mut self, parent: i32, is_leaf: bool) -> Result<IndexNode> {
        let node = if self.meta.first_free_page != NO_PAGE {
            let node = self.get_node(self.meta.first_free_page).await?;
            self.meta.first_free_page = node.next_free()?;
            node
        } else {
            let page_num = self.meta.num_pages;
            let handle = self
                .pool
                .create_page(&self.data_file, page_num, &self.meta.key_layout)
                .await?;
            self.meta.num_pages += 1;
            IndexNode::new(handle, &self.meta)
        };
        node.init_header(parent, is_leaf)?;
        Ok(node)
    }

    /// Push a node onto the free list. The link write dirties the page
    /// so the list survives write-back.
    fn release_node(&mut self, node: &IndexNode) -> Result<()> {
        node.set_next_free(self.meta.first_free_page)?;
        self.meta.first_free_page = node.page_num();
        tracing::debug!(page = node.page_num(), "released index page to free list");
        Ok(())
    }

    /// First leaf position whose key is `>= key`.
    pub async fn lower_bound(&self, key: &Record) -> Result<NodePos> {
        self.descend(key, false).await
    }

    /// First leaf position whose key is `> key`.
    pub async fn upper_bound(&self, key: &Record) -> Result<NodePos> {
        self.descend(key, true).await
    }

    async fn descend(&self, key: &Record, upper: bool) -> Result<NodePos> {
        let mut node = self.get_node(self.meta.root_page).await?;
        while !node.is_leaf()? {
            let idx = if upper { node.upper_bound(key)? } else { node.lower_bound(key)? };
            if idx >= node.num_keys()? {
                return self.leaf_end().await;
            }
            let child = node.rid(idx)?;
            node = self.get_node(child.page_num).await?;
        }
        let idx = if upper { node.upper_bound(key)? } else { node.lower_bound(key)? };
        Ok(NodePos { page_num: node.page_num(), idx })
    }

    /// The first entry of the leaf chain.
    pub fn leaf_begin(&self) -> NodePos {
        NodePos { page_num: self.meta.first_leaf, idx: 0 }
    }

    /// One past the last entry of the leaf chain.
    pub async fn leaf_end(&self) -> Result<NodePos> {
        let last = self.get_node(self.meta.last_leaf).await?;
        Ok(NodePos { page_num: self.meta.last_leaf, idx: last.num_children()? })
    }

    /// Every record id stored under `key`, in leaf order.
    pub async fn get_matches(&self, key: &Record) -> Result<Vec<RecId>> {
        let mut cursor = LeafCursor {
            pos: self.lower_bound(key).await?,
            end: self.upper_bound(key).await?,
        };
        let mut matches = Vec::new();
        while let Some(pos) = cursor.next(self).await? {
            matches.push(self.get_node(pos.page_num).await?.rid(pos.idx)?);
        }
        Ok(matches)
    }

    /// Cursor over the whole leaf level, for full-index scans.
    pub async fn scan(&self) -> Result<LeafCursor> {
        Ok(LeafCursor { pos: self.leaf_begin(), end: self.leaf_end().await? })
    }

    /// The record id at a leaf position.
    pub async fn rid_at(&self, pos: NodePos) -> Result<RecId> {
        self.get_node(pos.page_num).await?.rid(pos.idx)
    }

    /// Insert one `(key, recid)` entry, splitting overflowing nodes
    /// around their midpoint up the tree.
    pub async fn insert_entry(&mut self, key: &Record, rid: RecId) -> Result<()> {
        let pos = self.upper_bound(key).await?;
        let at_tail = pos.page_num == self.meta.last_leaf
            && pos.idx == self.get_node(pos.page_num).await?.num_keys()?;

        // The staged insertion: (key at key_idx, rid at rid_idx) aimed
        // at one node. A split re-aims it at the parent as the
        // separator for the new sibling.
        let mut staged_key = key.clone();
        let mut staged_rid = rid;
        let mut key_idx = pos.idx;
        let mut rid_idx = pos.idx;
        let mut page_num = pos.page_num;

        loop {
            let node = self.get_node(page_num).await?;
            if node.num_children()? < self.meta.order {
                node.insert_key(&staged_key, key_idx)?;
                node.insert_rid(staged_rid, rid_idx)?;
                break;
            }

            // Node is at capacity: materialize its entries with the
            // staged insertion applied, then redistribute around the
            // midpoint.
            let mut keys = node.keys(0, node.num_keys()?)?;
            let mut rids = node.rids(0, node.num_children()?)?;
            keys.insert(key_idx as usize, staged_key.clone());
            rids.insert(rid_idx as usize, staged_rid);

            if node.parent()? == NO_PAGE {
                let root = self.create_node(NO_PAGE, false).await?;
                root.insert_rid(RecId::new(node.page_num(), -1), 0)?;
                root.insert_key(keys.last().expect("split of an empty node"), 0)?;
                node.set_parent(root.page_num())?;
                self.meta.root_page = root.page_num();
                tracing::debug!(root = root.page_num(), "grew tree with new root");
            }
            let parent_page = node.parent()?;
            let is_leaf = node.is_leaf()?;

            let sibling = self.create_node(parent_page, is_leaf).await?;
            if is_leaf {
                let old_next = node.next_leaf()?;
                sibling.set_next_leaf(old_next)?;
                sibling.set_prev_leaf(node.page_num())?;
                node.set_next_leaf(sibling.page_num())?;
                if old_next != NO_PAGE {
                    self.get_node(old_next).await?.set_prev_leaf(sibling.page_num())?;
                }
            }

            let mid = keys.len() / 2;
            node.set_entries(&keys[..mid], &rids[..mid])?;
            sibling.set_entries(&keys[mid..], &rids[mid..])?;
            if !is_leaf {
                for idx in 0..sibling.num_children()? {
                    self.maintain_child(&sibling, idx).await?;
                }
            }
            if is_leaf && self.meta.last_leaf == node.page_num() {
                self.meta.last_leaf = sibling.page_num();
            }
            tracing::debug!(
                node = node.page_num(),
                sibling = sibling.page_num(),
                "split index node"
            );

            // Aim the separator at the parent: the left half's max at
            // the node's slot, the sibling's pointer one past it.
            let parent = self.get_node(parent_page).await?;
            let child_idx = parent.find_child(node.page_num())?;
            staged_key = node.max_key()?;
            staged_rid = RecId::new(sibling.page_num(), -1);
            key_idx = child_idx;
            rid_idx = child_idx + 1;
            page_num = parent_page;
        }

        if at_tail {
            // The new key became the tree maximum; ancestors must agree.
            let last = self.get_node(self.meta.last_leaf).await?;
            self.maintain_parent(&last).await?;
        }
        self.meta.write_to(&self.meta_file)
    }

    /// Delete the first `[lower_bound, upper_bound)` entry whose recid
    /// matches, rebalancing underflowing nodes up the tree. Deleting an
    /// absent entry is a no-op.
    pub async fn delete_entry(&mut self, key: &Record, rid: RecId) -> Result<()> {
        let mut cursor = LeafCursor {
            pos: self.lower_bound(key).await?,
            end: self.upper_bound(key).await?,
        };
        let target = loop {
            match cursor.next(self).await? {
                None => return Ok(()),
                Some(pos) => {
                    if self.get_node(pos.page_num).await?.rid(pos.idx)? == rid {
                        break pos;
                    }
                }
            }
        };

        let node = self.get_node(target.page_num).await?;
        node.erase_key(target.idx)?;
        node.erase_rid(target.idx)?;
        // The leaf's max may have been the erased entry.
        self.maintain_parent(&node).await?;
        self.rebalance(node).await?;
        self.meta.write_to(&self.meta_file)
    }

    async fn rebalance(&mut self, mut node: IndexNode) -> Result<()> {
        let min_children = self.meta.min_children();
        while node.num_children()? < min_children {
            if node.parent()? == NO_PAGE {
                // The root tolerates underflow; an interior root with a
                // single child hands the root over to it.
                if !node.is_leaf()? && node.num_keys()? <= 1 {
                    let only_child = node.rid(0)?;
                    self.get_node(only_child.page_num).await?.set_parent(NO_PAGE)?;
                    self.meta.root_page = only_child.page_num;
                    self.release_node(&node)?;
                    tracing::debug!(root = only_child.page_num, "collapsed tree root");
                }
                break;
            }

            let parent = self.get_node(node.parent()?).await?;
            let child_idx = parent.find_child(node.page_num())?;

            // Borrow the left sibling's max entry and stop.
            if child_idx > 0 {
                let left = self.get_node(parent.rid(child_idx - 1)?.page_num).await?;
                if left.num_children()? > min_children {
                    node.insert_key(&left.max_key()?, 0)?;
                    node.insert_rid(left.max_rid()?, 0)?;
                    left.erase_key(left.num_keys()? - 1)?;
                    left.erase_rid(left.num_children()? - 1)?;
                    self.maintain_parent(&left).await?;
                    self.maintain_child(&node, 0).await?;
                    break;
                }
            }
            // Borrow the right sibling's min entry and stop.
            if child_idx + 1 < parent.num_children()? {
                let right = self.get_node(parent.rid(child_idx + 1)?.page_num).await?;
                if right.num_children()? > min_children {
                    node.push_back_key(&right.min_key()?)?;
                    node.push_back_rid(right.min_rid()?)?;
                    right.erase_key(0)?;
                    right.erase_rid(0)?;
                    self.maintain_parent(&node).await?;
                    self.maintain_child(&node, node.num_children()? - 1).await?;
                    break;
                }
            }

            // Neither sibling can spare: merge and continue upward.
            if child_idx > 0 {
                let left = self.get_node(parent.rid(child_idx - 1)?.page_num).await?;
                let first_moved = left.num_children()?;
                left.push_back_keys(&node.keys(0, node.num_keys()?)?)?;
                left.push_back_rids(&node.rids(0, node.num_children()?)?)?;
                for idx in first_moved..left.num_children()? {
                    self.maintain_child(&left, idx).await?;
                }
                parent.erase_key(child_idx)?;
                parent.erase_rid(child_idx)?;
                self.maintain_parent(&left).await?;
                if node.is_leaf()? {
                    self.erase_leaf(&node).await?;
                }
                if self.meta.last_leaf == node.page_num() {
                    self.meta.last_leaf = left.page_num();
                }
                self.release_node(&node)?;
                tracing::debug!(from = node.page_num(), into = left.page_num(), "merged into left sibling");
            } else {
                let right = self.get_node(parent.rid(child_idx + 1)?.page_num).await?;
                let first_moved = node.num_children()?;
                node.push_back_keys(&right.keys(0, right.num_keys()?)?)?;
                node.push_back_rids(&right.rids(0, right.num_children()?)?)?;
                for idx in first_moved..node.num_children()? {
                    self.maintain_child(&node, idx).await?;
                }
                parent.erase_rid(child_idx + 1)?;
                parent.erase_key(child_idx)?;
                self.maintain_parent(&node).await?;
                if right.is_leaf()? {
                    self.erase_leaf(&right).await?;
                }
                if self.meta.last_leaf == right.page_num() {
                    self.meta.last_leaf = node.page_num();
                }
                self.release_node(&right)?;
                tracing::debug!(from = right.page_num(), into = node.page_num(), "merged right sibling");
            }

            node = parent;
        }
        Ok(())
    }

    /// Walk toward the root, overwriting each ancestor's key for this
    /// branch until one already equals the branch maximum.
    async fn maintain_parent(&self, node: &IndexNode) -> Result<()> {
        if node.num_keys()? == 0 {
            return Ok(());
        }
        let mut child_page = node.page_num();
        let mut child_max = node.max_key()?;
        let mut parent_page = node.parent()?;

        while parent_page != NO_PAGE {
            let parent = self.get_node(parent_page).await?;
            let child_idx = parent.find_child(child_page)?;
            if compare_records(&parent.key(child_idx)?, &child_max) == Ordering::Equal {
                break;
            }
            parent.set_key(child_idx, &child_max)?;
            child_page = parent_page;
            child_max = parent.max_key()?;
            parent_page = parent.parent()?;
        }
        Ok(())
    }

    /// Point the child at `idx` back at its (possibly new) parent.
    async fn maintain_child(&self, parent: &IndexNode, idx: i32) -> Result<()> {
        if parent.is_leaf()? {
            return Ok(());
        }
        let child = parent.rid(idx)?;
        self.get_node(child.page_num).await?.set_parent(parent.page_num())
    }

    /// Splice a leaf out of the chain.
    async fn erase_leaf(&mut self, leaf: &IndexNode) -> Result<()> {
        let prev = leaf.prev_leaf()?;
        let next = leaf.next_leaf()?;
        if prev != NO_PAGE {
            self.get_node(prev).await?.set_next_leaf(next)?;
        }
        if next != NO_PAGE {
            self.get_node(next).await?.set_prev_leaf(prev)?;
        }
        if self.meta.first_leaf == leaf.page_num() {
            self.meta.first_leaf = next;
        }
        Ok(())
    }
}

/// Cursor over a leaf range `[pos, end)`, following the chain across
/// leaf boundaries.
pub struct LeafCursor {
    pos: NodePos,
    end: NodePos,
}

impl LeafCursor {
    /// The next position, or `None` at the end of the range.
    pub async fn next(&mut self, tree: &BTree) -> Result<Option<NodePos>> {
        loop {
            if self.pos == self.end {
                return Ok(None);
            }
            let node = tree.get_node(self.pos.page_num).await?;
            if self.pos.idx >= node.num_keys()? {
                if self.pos.page_num == tree.meta.last_leaf {
                    return Ok(None);
                }
                self.pos = NodePos { page_num: node.next_leaf()?, idx: 0 };
                continue;
            }
            let current = self.pos;
            self.pos.idx += 1;
            return Ok(Some(current));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::storage::types::{DataType, Value};
    use tempfile::TempDir;

    fn key(n: i32) -> Record {
        vec![Value::Int(n)]
    }

    fn harness() -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::start(EngineConfig::new(dir.path()).io_frames(8).scratch_frames(8));
        (dir, engine)
    }

    /// A small tree: order 4 over a single int key, with the array
    /// offsets recomputed for the shrunken order.
    async fn small_tree(dir: &Path, pool: Arc<BufferPool>) -> BTree {
        let mut meta = IndexMeta::new(vec![DataType::int()]);
        meta.order = 4;
        meta.rid_offset = meta.key_offset + meta.key_size * meta.order;
        BTree::create_with_meta(dir, meta, pool).await.unwrap()
    }

    /// Walk the whole tree checking the structural invariants: parent
    /// pointers, parent keys as subtree maxima, occupancy bounds, and
    /// the leaf chain.
    async fn check_invariants(tree: &BTree) {
        let meta = tree.meta();
        let min_children = meta.min_children();
        let mut stack = vec![(meta.root_page, NO_PAGE)];
        let mut leaves_seen = Vec::new();

        while let Some((page_num, expected_parent)) = stack.pop() {
            let node = tree.get_node(page_num).await.unwrap();
            assert_eq!(node.parent().unwrap(), expected_parent, "parent of page {page_num}");
            assert_eq!(
                node.num_keys().unwrap(),
                node.num_children().unwrap(),
                "parallel counts on page {page_num}"
            );
            if expected_parent != NO_PAGE {
                assert!(
                    node.num_children().unwrap() >= min_children
                        && node.num_children().unwrap() <= meta.order,
                    "occupancy of page {page_num}"
                );
            }
            if node.is_leaf().unwrap() {
                leaves_seen.push(page_num);
                continue;
            }
            for idx in 0..node.num_children().unwrap() {
                let child_page = node.rid(idx).unwrap().page_num;
                let child = tree.get_node(child_page).await.unwrap();
                assert_eq!(
                    child.max_key().unwrap(),
                    node.key(idx).unwrap(),
                    "separator for child {child_page} of page {page_num}"
                );
                stack.push((child_page, page_num));
            }
        }

        // The chain visits exactly the reachable leaves, in order.
        let mut chained = Vec::new();
        let mut page_num = meta.first_leaf;
        let mut prev = NO_PAGE;
        loop {
            let leaf = tree.get_node(page_num).await.unwrap();
            assert!(leaf.is_leaf().unwrap());
            assert_eq!(leaf.prev_leaf().unwrap(), prev, "prev link of leaf {page_num}");
            chained.push(page_num);
            if page_num == meta.last_leaf {
                break;
            }
            prev = page_num;
            page_num = leaf.next_leaf().unwrap();
        }
        leaves_seen.sort_unstable();
        let mut chained_sorted = chained.clone();
        chained_sorted.sort_unstable();
        assert_eq!(chained_sorted, leaves_seen);
    }

    async fn collect_keys(tree: &BTree) -> Vec<i32> {
        let mut cursor = tree.scan().await.unwrap();
        let mut keys = Vec::new();
        while let Some(pos) = cursor.next(tree).await.unwrap() {
            match tree.get_node(pos.page_num).await.unwrap().key(pos.idx).unwrap()[0] {
                Value::Int(n) => keys.push(n),
                _ => unreachable!(),
            }
        }
        keys
    }

    #[test]
    fn test_leaf_split_at_order_four() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let path = dir.path().join("INDEX0");

        engine.sync_wait(async move {
            let mut tree = small_tree(&path, pool).await;
            for n in 1..=5 {
                tree.insert_entry(&key(n), RecId::new(n, 0)).await.unwrap();
            }

            let meta = tree.meta();
            assert_ne!(meta.root_page, meta.first_leaf);
            assert_ne!(meta.first_leaf, meta.last_leaf);

            let root = tree.get_node(meta.root_page).await.unwrap();
            assert!(!root.is_leaf().unwrap());
            assert_eq!(root.keys(0, 2).unwrap(), vec![key(2), key(5)]);

            let first = tree.get_node(meta.first_leaf).await.unwrap();
            assert_eq!(first.keys(0, first.num_keys().unwrap()).unwrap(), vec![key(1), key(2)]);
            let last = tree.get_node(meta.last_leaf).await.unwrap();
            assert_eq!(
                last.keys(0, last.num_keys().unwrap()).unwrap(),
                vec![key(3), key(4), key(5)]
            );
            assert_eq!(first.next_leaf().unwrap(), meta.last_leaf);
            assert_eq!(last.prev_leaf().unwrap(), meta.first_leaf);

            check_invariants(&tree).await;
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_merge_collapses_to_single_leaf_and_recycles_pages() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let path = dir.path().join("INDEX0");

        engine.sync_wait(async move {
            let mut tree = small_tree(&path, pool).await;
            for n in 1..=5 {
                tree.insert_entry(&key(n), RecId::new(n, 0)).await.unwrap();
            }
            for n in (3..=5).rev() {
                tree.delete_entry(&key(n), RecId::new(n, 0)).await.unwrap();
            }

            // A single leaf again, holding [1, 2], with both released
            // pages on the free list.
            let meta = tree.meta();
            assert_eq!(meta.root_page, meta.first_leaf);
            assert_eq!(meta.first_leaf, meta.last_leaf);
            assert_eq!(collect_keys(&tree).await, vec![1, 2]);
            assert_ne!(meta.first_free_page, NO_PAGE);
            assert_eq!(meta.num_pages, 3);

            // The next split allocates from the free list instead of
            // growing the file.
            for n in 3..=5 {
                tree.insert_entry(&key(n), RecId::new(n, 0)).await.unwrap();
            }
            assert_eq!(tree.meta().num_pages, 3);
            assert_eq!(tree.meta().first_free_page, NO_PAGE);
            assert_eq!(collect_keys(&tree).await, vec![1, 2, 3, 4, 5]);
            check_invariants(&tree).await;
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_duplicate_keys_point_lookup() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let path = dir.path().join("INDEX0");

        engine.sync_wait(async move {
            let mut tree = small_tree(&path, pool).await;
            for slot in 0..4 {
                tree.insert_entry(&key(7), RecId::new(0, slot)).await.unwrap();
            }
            tree.insert_entry(&key(3), RecId::new(0, 9)).await.unwrap();
            tree.insert_entry(&key(9), RecId::new(0, 8)).await.unwrap();

            let matches = tree.get_matches(&key(7)).await.unwrap();
            assert_eq!(matches.len(), 4);
            for slot in 0..4 {
                assert!(matches.contains(&RecId::new(0, slot)));
            }
            assert!(tree.get_matches(&key(5)).await.unwrap().is_empty());

            // Deleting one (key, rid) pair leaves its duplicates.
            tree.delete_entry(&key(7), RecId::new(0, 2)).await.unwrap();
            let matches = tree.get_matches(&key(7)).await.unwrap();
            assert_eq!(matches.len(), 3);
            assert!(!matches.contains(&RecId::new(0, 2)));

            // Deleting an absent pair is a no-op.
            tree.delete_entry(&key(7), RecId::new(0, 2)).await.unwrap();
            assert_eq!(tree.get_matches(&key(7)).await.unwrap().len(), 3);
            check_invariants(&tree).await;
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_iteration_is_sorted_across_leaves() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let path = dir.path().join("INDEX0");

        engine.sync_wait(async move {
            let mut tree = small_tree(&path, pool).await;
            // A fixed permutation of 1..=24.
            let inserts = [
                17, 3, 22, 8, 1, 14, 20, 6, 11, 24, 2, 19, 9, 15, 4, 23, 12, 7, 18, 5, 21, 10,
                16, 13,
            ];
            for n in inserts {
                tree.insert_entry(&key(n), RecId::new(n, 0)).await.unwrap();
                check_invariants(&tree).await;
            }
            assert_eq!(collect_keys(&tree).await, (1..=24).collect::<Vec<_>>());
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_random_deletes_keep_invariants() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let path = dir.path().join("INDEX0");

        engine.sync_wait(async move {
            let mut tree = small_tree(&path, pool).await;
            for n in 1..=24 {
                tree.insert_entry(&key(n), RecId::new(n, 0)).await.unwrap();
            }

            // Delete in an order that exercises left and right borrows
            // and merges at several depths.
            let deletes = [
                12, 1, 24, 7, 13, 2, 23, 8, 14, 3, 22, 9, 15, 4, 21, 10, 16, 5, 20, 11, 17, 6,
            ];
            let mut remaining: Vec<i32> = (1..=24).collect();
            for n in deletes {
                tree.delete_entry(&key(n), RecId::new(n, 0)).await.unwrap();
                remaining.retain(|&m| m != n);
                check_invariants(&tree).await;
                assert_eq!(collect_keys(&tree).await, remaining);
                for &m in &remaining {
                    assert_eq!(
                        tree.get_matches(&key(m)).await.unwrap(),
                        vec![RecId::new(m, 0)],
                        "lookup of {m}"
                    );
                }
            }
            assert_eq!(collect_keys(&tree).await, vec![18, 19]);
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_tree_survives_reopen() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let path = dir.path().join("INDEX0");

        engine.sync_wait({
            let path = path.clone();
            async move {
                let mut tree = small_tree(&path, pool).await;
                for n in 1..=10 {
                    tree.insert_entry(&key(n), RecId::new(n, 0)).await.unwrap();
                }
            }
        });
        engine.shutdown().unwrap();

        let (_, engine2) = {
            let engine = Engine::start(
                EngineConfig::new(dir.path()).io_frames(8).scratch_frames(8),
            );
            ((), engine)
        };
        let pool = engine2.pool().clone();
        engine2.sync_wait(async move {
            let tree = BTree::open(&path, pool).await.unwrap();
            assert_eq!(collect_keys(&tree).await, (1..=10).collect::<Vec<_>>());
            for n in 1..=10 {
                assert_eq!(tree.get_matches(&key(n)).await.unwrap(), vec![RecId::new(n, 0)]);
            }
            check_invariants(&tree).await;
        });
        engine2.shutdown().unwrap();
    }
}
