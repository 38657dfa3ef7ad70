//! The per-table index catalog.
//!
//! One 4096-byte catalog page per table: a `cursor`/`num_indexes`
//! header, then one UTF-8 line per index holding the attribute tuple
//! joined by commas, a comma, and the index id in decimal. Index `0` is the
//! table's mandatory primary-key index. Each index id names an
//! `INDEX<id>/` directory holding that tree's metadata and pages.
//!
//! The catalog keeps a weak reference to its page and revalidates it on
//! every operation; while an operation runs it holds a pinned handle so
//! the page cannot be evicted mid-walk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::errdata;
use crate::error::{Error, Result};
use crate::index::btree::BTree;
use crate::io::file::DataFile;
use crate::storage::buffer_pool::{BufferPool, PageHandle, PageRef};
use crate::storage::page::PAGE_SIZE;
use crate::storage::types::{RecId, Record};
use crate::table::meta::TableMeta;

/// Catalog page file name within a table's index folder.
pub const CATALOG_FILE: &str = "CATALOG_FILE";

/// `cursor: u32` then `num_indexes: u32`.
const CATALOG_HEADER_SIZE: usize = 8;

/// Sentinel id for "no such index".
pub const NO_INDEX: i32 = -1;

pub struct IndexCatalog {
    dir: PathBuf,
    file: DataFile,
    pool: Arc<BufferPool>,
    /// Weak reference to the catalog page, revalidated per operation.
    page: Option<PageRef>,
    /// Trees opened so far, by index id.
    trees: HashMap<i32, BTree>,
}

impl IndexCatalog {
    /// Create a fresh catalog under `dir` with an empty index list.
    pub async fn create(dir: PathBuf, pool: Arc<BufferPool>) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let file = DataFile::create(dir.join(CATALOG_FILE))?;
        let mut catalog = Self { dir, file, pool, page: None, trees: HashMap::new() };

        let handle = catalog
            .pool
            .create_page(&catalog.file, 0, &Vec::new())
            .await?;
        handle.with_page_mut(|page| {
            LittleEndian::write_u32(&mut page[0..], CATALOG_HEADER_SIZE as u32);
            LittleEndian::write_u32(&mut page[4..], 0);
        })?;
        catalog.page = Some(handle.downgrade());
        Ok(catalog)
    }

    /// Open an existing catalog under `dir`.
    pub fn open(dir: PathBuf, pool: Arc<BufferPool>) -> Result<Self> {
        let file = DataFile::open(dir.join(CATALOG_FILE))?;
        Ok(Self { dir, file, pool, page: None, trees: HashMap::new() })
    }

    /// A pinned handle to the catalog page, refetching it if the cached
    /// reference has gone stale.
    async fn catalog_page(&mut self) -> Result<PageHandle> {
        if let Some(page) = &self.page {
            match page.upgrade().await {
                Ok(handle) => return Ok(handle),
                Err(Error::InvalidTimestamp) => {}
                Err(e) => return Err(e),
            }
        }
        let handle = self.pool.read_page(&self.file, 0, &Vec::new()).await?;
        self.page = Some(handle.downgrade());
        Ok(handle)
    }

    fn header(handle: &PageHandle) -> Result<(u32, u32)> {
        handle.with_page(|page| {
            (LittleEndian::read_u32(&page[0..]), LittleEndian::read_u32(&page[4..]))
        })
    }

    /// Every `(attribute tuple, index id)` line on the catalog page.
    fn lines(handle: &PageHandle) -> Result<Vec<(Vec<String>, i32)>> {
        let (cursor, count) = Self::header(handle)?;
        if (cursor as usize) < CATALOG_HEADER_SIZE || cursor as usize > PAGE_SIZE {
            return Err(errdata!("catalog cursor {cursor} out of range"));
        }
        let text = handle.with_page(|page| {
            String::from_utf8(page[CATALOG_HEADER_SIZE..cursor as usize].to_vec())
        })?;
        let text = text.map_err(|_| errdata!("catalog page is not valid utf-8"))?;

        let mut lines = Vec::new();
        for line in text.lines() {
            let (attrs, id) = line
                .rsplit_once(',')
                .ok_or_else(|| errdata!("malformed catalog line '{line}'"))?;
            let id = id
                .parse::<i32>()
                .map_err(|_| errdata!("malformed catalog index id '{id}'"))?;
            lines.push((attrs.split(',').map(str::to_owned).collect(), id));
        }
        if lines.len() != count as usize {
            return Err(errdata!(
                "catalog header claims {count} indexes, page has {}",
                lines.len()
            ));
        }
        Ok(lines)
    }

    fn index_dir(&self, id: i32) -> PathBuf {
        self.dir.join(format!("INDEX{id}"))
    }

    /// Number of indexes on this table.
    pub async fn num_indexes(&mut self) -> Result<u32> {
        let handle = self.catalog_page().await?;
        Ok(Self::header(&handle)?.1)
    }

    /// The id of the index on exactly this attribute tuple, or
    /// [`NO_INDEX`].
    pub async fn find_index(&mut self, attrs: &[String]) -> Result<i32> {
        let handle = self.catalog_page().await?;
        for (line_attrs, id) in Self::lines(&handle)? {
            if line_attrs == attrs {
                return Ok(id);
            }
        }
        Ok(NO_INDEX)
    }

    /// Register an index over the attribute tuple and create its tree.
    /// A duplicate tuple is a no-op. Returns the index id.
    pub async fn create_index(&mut self, attrs: &[String], meta: &TableMeta) -> Result<i32> {
        let existing = self.find_index(attrs).await?;
        if existing != NO_INDEX {
            return Ok(existing);
        }
        let key_layout = meta.projected_layout(attrs)?;

        let handle = self.catalog_page().await?;
        let (cursor, count) = Self::header(&handle)?;
        let id = count as i32;
        let line = format!("{},{id}\n", attrs.join(","));
        if cursor as usize + line.len() > PAGE_SIZE {
            return Err(Error::PageFull);
        }
        handle.with_page_mut(|page| {
            page[cursor as usize..cursor as usize + line.len()].copy_from_slice(line.as_bytes());
            LittleEndian::write_u32(&mut page[0..], cursor + line.len() as u32);
            LittleEndian::write_u32(&mut page[4..], count + 1);
        })?;

        let tree = BTree::create(&self.index_dir(id), key_layout, self.pool.clone()).await?;
        self.trees.insert(id, tree);
        tracing::info!(id, attrs = ?attrs, "created index");
        Ok(id)
    }

    /// The tree behind an index id, opened on first use and reused
    /// after.
    pub async fn get_index(&mut self, id: i32) -> Result<&mut BTree> {
        if !self.trees.contains_key(&id) {
            let tree = BTree::open(&self.index_dir(id), self.pool.clone()).await?;
            self.trees.insert(id, tree);
        }
        Ok(self.trees.get_mut(&id).expect("tree opened above"))
    }

    /// Find the tree for an attribute tuple, if one exists.
    pub async fn get_index_on(&mut self, attrs: &[String]) -> Result<Option<&mut BTree>> {
        let id = self.find_index(attrs).await?;
        if id == NO_INDEX {
            return Ok(None);
        }
        Ok(Some(self.get_index(id).await?))
    }

    /// Project `record` onto every indexed attribute tuple and insert
    /// the projection into that tree.
    pub async fn insert_into_indexes(
        &mut self,
        record: &Record,
        rid: RecId,
        meta: &TableMeta,
    ) -> Result<()> {
        self.update_indexes(record, rid, meta, true).await
    }

    /// Remove `record`'s projections from every tree.
    pub async fn delete_from_indexes(
        &mut self,
        record: &Record,
        rid: RecId,
        meta: &TableMeta,
    ) -> Result<()> {
        self.update_indexes(record, rid, meta, false).await
    }

    async fn update_indexes(
        &mut self,
        record: &Record,
        rid: RecId,
        meta: &TableMeta,
        insert: bool,
    ) -> Result<()> {
        let lines = {
            let handle = self.catalog_page().await?;
            Self::lines(&handle)?
        };
        for (attrs, id) in lines {
            let projection = project(record, &attrs, meta)?;
            let tree = self.get_index(id).await?;
            if insert {
                tree.insert_entry(&projection, rid).await?;
            } else {
                tree.delete_entry(&projection, rid).await?;
            }
        }
        Ok(())
    }
}

/// The subset of `record` named by `attrs`, in tuple order.
pub fn project(record: &Record, attrs: &[String], meta: &TableMeta) -> Result<Record> {
    attrs
        .iter()
        .map(|attr| Ok(record[meta.attr_idx(attr)?].clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::storage::types::{DataType, Value};
    use tempfile::TempDir;

    fn meta() -> TableMeta {
        TableMeta::build(
            &["a".into(), "b".into(), "s".into()],
            &[DataType::int(), DataType::int(), DataType::text(8)],
            &["a".into()],
            &[],
        )
    }

    fn record(a: i32, b: i32, s: &str) -> Record {
        vec![Value::Int(a), Value::Int(b), Value::Text(s.into())]
    }

    fn harness() -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::start(EngineConfig::new(dir.path()).io_frames(8).scratch_frames(8));
        (dir, engine)
    }

    #[test]
    fn test_create_and_find_index() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let folder = dir.path().join("INDEX_FOLDER");

        engine.sync_wait(async move {
            let meta = meta();
            let mut catalog = IndexCatalog::create(folder, pool).await.unwrap();
            assert_eq!(catalog.num_indexes().await.unwrap(), 0);

            let a = catalog.create_index(&["a".into()], &meta).await.unwrap();
            let ab = catalog
                .create_index(&["a".into(), "b".into()], &meta)
                .await
                .unwrap();
            assert_eq!((a, ab), (0, 1));

            // Same tuple again is a no-op returning the existing id.
            let again = catalog.create_index(&["a".into()], &meta).await.unwrap();
            assert_eq!(again, 0);
            assert_eq!(catalog.num_indexes().await.unwrap(), 2);

            assert_eq!(catalog.find_index(&["a".into()]).await.unwrap(), 0);
            assert_eq!(
                catalog.find_index(&["a".into(), "b".into()]).await.unwrap(),
                1
            );
            // Tuples are ordered; a permutation is a different index.
            assert_eq!(
                catalog.find_index(&["b".into(), "a".into()]).await.unwrap(),
                NO_INDEX
            );
            assert_eq!(catalog.find_index(&["s".into()]).await.unwrap(), NO_INDEX);

            let tree = catalog.get_index(1).await.unwrap();
            assert_eq!(tree.key_layout(), &vec![DataType::int(), DataType::int()]);
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_mutations_fan_out_to_every_index() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let folder = dir.path().join("INDEX_FOLDER");

        engine.sync_wait(async move {
            let meta = meta();
            let mut catalog = IndexCatalog::create(folder, pool).await.unwrap();
            catalog.create_index(&["a".into()], &meta).await.unwrap();
            catalog.create_index(&["b".into()], &meta).await.unwrap();
            catalog
                .create_index(&["s".into(), "b".into()], &meta)
                .await
                .unwrap();

            let rid = RecId::new(0, 5);
            let row = record(1, 42, "ember");
            catalog.insert_into_indexes(&row, rid, &meta).await.unwrap();

            let by_a = catalog.get_index(0).await.unwrap();
            assert_eq!(by_a.get_matches(&vec![Value::Int(1)]).await.unwrap(), vec![rid]);
            let by_b = catalog.get_index(1).await.unwrap();
            assert_eq!(by_b.get_matches(&vec![Value::Int(42)]).await.unwrap(), vec![rid]);
            let by_sb = catalog.get_index(2).await.unwrap();
            assert_eq!(
                by_sb
                    .get_matches(&vec![Value::Text("ember".into()), Value::Int(42)])
                    .await
                    .unwrap(),
                vec![rid]
            );

            catalog.delete_from_indexes(&row, rid, &meta).await.unwrap();
            for id in 0..3 {
                let tree = catalog.get_index(id).await.unwrap();
                let probe = match id {
                    0 => vec![Value::Int(1)],
                    1 => vec![Value::Int(42)],
                    _ => vec![Value::Text("ember".into()), Value::Int(42)],
                };
                assert!(tree.get_matches(&probe).await.unwrap().is_empty());
            }
        });
        engine.shutdown().unwrap();
    }

    #[test]
    fn test_catalog_survives_reopen() {
        let (dir, engine) = harness();
        let pool = engine.pool().clone();
        let folder = dir.path().join("INDEX_FOLDER");

        engine.sync_wait({
            let folder = folder.clone();
            async move {
                let meta = meta();
                let mut catalog = IndexCatalog::create(folder, pool).await.unwrap();
                catalog.create_index(&["b".into()], &meta).await.unwrap();
                catalog
                    .insert_into_indexes(&record(1, 7, "x"), RecId::new(2, 3), &meta)
                    .await
                    .unwrap();
            }
        });
        engine.shutdown().unwrap();

        let engine = Engine::start(EngineConfig::new(dir.path()).io_frames(8).scratch_frames(8));
        let pool = engine.pool().clone();
        engine.sync_wait(async move {
            let mut catalog = IndexCatalog::open(folder, pool).unwrap();
            assert_eq!(catalog.num_indexes().await.unwrap(), 1);
            assert_eq!(catalog.find_index(&["b".into()]).await.unwrap(), 0);
            let tree = catalog.get_index(0).await.unwrap();
            assert_eq!(
                tree.get_matches(&vec![Value::Int(7)]).await.unwrap(),
                vec![RecId::new(2, 3)]
            );
        });
        engine.shutdown().unwrap();
    }
}
