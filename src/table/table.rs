//! The table adapter: thin orchestration over record pages and the
//! index catalog.
//!
//! Every mutation keeps every index in step: inserts fan the new row
//! out through the catalog (the primary-key index is catalog line 0),
//! deletes remove each victim's projections, and updates re-key the row
//! wherever a changed attribute is indexed. Deletes also re-key
//! surviving records whose slots shift when the page compacts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errdata;
use crate::error::{Error, Result};
use crate::index::catalog::{project, IndexCatalog, NO_INDEX};
use crate::io::file::DataFile;
use crate::statement::{Command, Statement};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::record_page::RecordPage;
use crate::storage::types::{RecId, Record};
use crate::table::meta::TableMeta;
use crate::table::record::TableRecord;

/// Record pages file name within a table directory.
pub const TABLE_DATA_FILE: &str = "TABLE_DATA_FILE";
/// Table metadata file name within a table directory.
pub const TABLE_META_FILE: &str = "TABLE_META_DATA";
/// Index folder name within a table directory.
pub const INDEX_FOLDER: &str = "INDEX_FOLDER";

/// What a statement produced: the selected rows, and how many rows the
/// statement touched.
#[derive(Debug, Default, PartialEq)]
pub struct QueryOutput {
    pub records: Vec<Record>,
    pub rows_affected: usize,
}

impl QueryOutput {
    fn affected(rows_affected: usize) -> Self {
        Self { records: Vec::new(), rows_affected }
    }
}

pub struct Table {
    meta: TableMeta,
    meta_file: DataFile,
    data_file: DataFile,
    catalog: IndexCatalog,
    pool: Arc<BufferPool>,
}

impl Table {
    /// Create a table directory: data file, metadata, and a catalog
    /// whose line 0 is the mandatory primary-key index.
    pub async fn create(dir: PathBuf, meta: TableMeta, pool: Arc<BufferPool>) -> Result<Self> {
        if meta.primary_key.is_empty() {
            return Err(Error::InvalidRecord("table needs a primary key".into()));
        }
        std::fs::create_dir_all(&dir)?;
        let data_file = DataFile::create(dir.join(TABLE_DATA_FILE))?;
        let meta_file = DataFile::create(dir.join(TABLE_META_FILE))?;
        meta.write_to(&meta_file)?;

        let mut catalog = IndexCatalog::create(dir.join(INDEX_FOLDER), pool.clone()).await?;
        catalog.create_index(&meta.primary_key, &meta).await?;
        tracing::info!(dir = %dir.display(), "created table");

        Ok(Self { meta, meta_file, data_file, catalog, pool })
    }

    /// Open an existing table directory.
    pub async fn open(dir: PathBuf, pool: Arc<BufferPool>) -> Result<Self> {
        let meta_file = DataFile::open(dir.join(TABLE_META_FILE))?;
        let data_file = DataFile::open(dir.join(TABLE_DATA_FILE))?;
        let meta = TableMeta::read_from(&meta_file)?;
        let catalog = IndexCatalog::open(dir.join(INDEX_FOLDER), pool.clone())?;
        Ok(Self { meta, meta_file, data_file, catalog, pool })
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    /// Dispatch one statement against this table.
    pub async fn execute(&mut self, stmt: &Statement) -> Result<QueryOutput> {
        match stmt.command {
            Command::Insert => self.execute_insert(stmt).await,
            Command::Select => self.execute_select(stmt).await,
            Command::Update => self.execute_update(stmt).await,
            Command::Delete => self.execute_delete(stmt).await,
            Command::CreateIndex => self.execute_create_index(stmt).await,
            Command::Vacuum => self.execute_vacuum().await,
            Command::Size => Ok(QueryOutput::affected(self.meta.num_pages as usize)),
            Command::Create | Command::Drop => {
                Err(errdata!("statement is handled by the database manager"))
            }
        }
    }

    /// Register an index and backfill it with every live record already
    /// in the table. Re-creating an existing tuple is a no-op.
    async fn execute_create_index(&mut self, stmt: &Statement) -> Result<QueryOutput> {
        if self.catalog.find_index(&stmt.attrs).await? != NO_INDEX {
            return Ok(QueryOutput::affected(0));
        }
        let id = self.catalog.create_index(&stmt.attrs, &self.meta).await?;

        let mut backfilled = 0;
        for page_num in 0..self.meta.num_pages as i32 {
            let page = self.record_page(page_num).await?;
            for slot in 0..page.num_records() {
                let record = match page.read(slot) {
                    Ok(record) => record,
                    Err(Error::DeletedRecord(_)) => continue,
                    Err(e) => return Err(e),
                };
                let projection = project(&record, &stmt.attrs, &self.meta)?;
                let tree = self.catalog.get_index(id).await?;
                tree.insert_entry(&projection, RecId::new(page_num, slot)).await?;
                backfilled += 1;
            }
        }
        tracing::debug!(id, backfilled, "backfilled new index");
        Ok(QueryOutput::affected(0))
    }

    async fn record_page(&self, page_num: i32) -> Result<RecordPage> {
        debug_assert!(page_num >= 0 && (page_num as u32) < self.meta.num_pages);
        let handle = self
            .pool
            .read_page(&self.data_file, page_num, &self.meta.record_layout)
            .await?;
        RecordPage::new(handle)
    }

    async fn create_record_page(&mut self) -> Result<RecordPage> {
        let page_num = self.meta.num_pages as i32;
        let handle = self
            .pool
            .create_page(&self.data_file, page_num, &self.meta.record_layout)
            .await?;
        self.meta.num_pages += 1;
        self.meta.write_to(&self.meta_file)?;
        RecordPage::new(handle)
    }

    /// Append a record to the last record page, growing the table by a
    /// page when it is full.
    pub async fn push_back_record(&mut self, record: &Record) -> Result<RecId> {
        if self.meta.num_pages > 0 {
            let mut page = self.record_page(self.meta.num_pages as i32 - 1).await?;
            match page.add(record) {
                Err(Error::PageFull) => {}
                result => return result,
            }
        }
        let mut page = self.create_record_page().await?;
        page.add(record)
    }

    async fn execute_insert(&mut self, stmt: &Statement) -> Result<QueryOutput> {
        let row = TableRecord::from_statement(stmt, &self.meta)?;
        let key = row.primary_key()?;

        // Uniqueness through the primary-key index; a duplicate insert
        // is dropped, not an error.
        let primary = self.catalog.get_index(0).await?;
        if !primary.get_matches(&key).await?.is_empty() {
            tracing::debug!(key = ?key, "dropped insert with duplicate primary key");
            return Ok(QueryOutput::affected(0));
        }

        let record = row.into_record();
        let rid = self.push_back_record(&record).await?;
        self.catalog.insert_into_indexes(&record, rid, &self.meta).await?;
        Ok(QueryOutput::affected(1))
    }

    /// Candidate record ids for a statement's WHERE clause: by index
    /// when its equality conjunct matches an indexed attribute tuple,
    /// by full scan otherwise. Candidates are filtered through the full
    /// predicate either way.
    async fn search_table(&mut self, stmt: &Statement) -> Result<Vec<RecId>> {
        let (attrs, key) = stmt.where_tree.equality_attrs(&self.meta)?;
        let index_id = if attrs.is_empty() {
            NO_INDEX
        } else {
            self.catalog.find_index(&attrs).await?
        };
        if index_id == NO_INDEX {
            return self.scan_matches(stmt).await;
        }

        tracing::debug!(attrs = ?attrs, index_id, "searching through index");
        let candidates = {
            let tree = self.catalog.get_index(index_id).await?;
            tree.get_matches(&key).await?
        };
        let mut matches = Vec::new();
        for rid in candidates {
            let page = self.record_page(rid.page_num).await?;
            match page.read(rid.slot_num) {
                Ok(record) => {
                    if stmt.where_tree.matches(&record, &self.meta)? {
                        matches.push(rid);
                    }
                }
                Err(Error::DeletedRecord(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(matches)
    }

    async fn scan_matches(&mut self, stmt: &Statement) -> Result<Vec<RecId>> {
        let mut matches = Vec::new();
        for page_num in 0..self.meta.num_pages as i32 {
            let page = self.record_page(page_num).await?;
            for slot in 0..page.num_records() {
                match page.read(slot) {
                    Ok(record) => {
                        if stmt.where_tree.matches(&record, &self.meta)? {
                            matches.push(RecId::new(page_num, slot));
                        }
                    }
                    Err(Error::DeletedRecord(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(matches)
    }

    async fn execute_select(&mut self, stmt: &Statement) -> Result<QueryOutput> {
        let matches = self.search_table(stmt).await?;
        let mut records = Vec::with_capacity(matches.len());
        for rid in matches {
            let page = self.record_page(rid.page_num).await?;
            match page.read(rid.slot_num) {
                Ok(record) => records.push(record),
                Err(Error::DeletedRecord(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        let rows_affected = records.len();
        Ok(QueryOutput { records, rows_affected })
    }

    async fn execute_update(&mut self, stmt: &Statement) -> Result<QueryOutput> {
        let matches = self.search_table(stmt).await?;
        let mut updated = 0;
        for rid in matches {
            let mut page = self.record_page(rid.page_num).await?;
            let old = match page.read(rid.slot_num) {
                Ok(record) => record,
                Err(Error::DeletedRecord(_)) => continue,
                Err(e) => return Err(e),
            };

            let mut row = TableRecord::new(old.clone(), &self.meta);
            for (attr, value) in stmt.set_attrs.iter().zip(stmt.set_values.iter()) {
                row.set_attr(attr, value)?;
            }
            let new = row.into_record();
            page.update(rid.slot_num, &new)?;
            drop(page);

            // Re-key the row in every index.
            self.catalog.delete_from_indexes(&old, rid, &self.meta).await?;
            self.catalog.insert_into_indexes(&new, rid, &self.meta).await?;
            updated += 1;
        }
        Ok(QueryOutput::affected(updated))
    }

    async fn execute_delete(&mut self, stmt: &Statement) -> Result<QueryOutput> {
        let matches = self.search_table(stmt).await?;
        let mut by_page: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for rid in matches {
            by_page.entry(rid.page_num).or_default().push(rid.slot_num);
        }

        let mut deleted = 0;
        for (page_num, slots) in by_page {
            let mut page = self.record_page(page_num).await?;
            for slot in slots {
                let record = match page.read(slot) {
                    Ok(record) => record,
                    Err(Error::DeletedRecord(_)) => continue,
                    Err(e) => return Err(e),
                };
                page.delete(slot)?;
                self.catalog
                    .delete_from_indexes(&record, RecId::new(page_num, slot), &self.meta)
                    .await?;
                deleted += 1;
            }

            // Compaction shifts the survivors above the holes; their
            // index entries move with them.
            for (old_slot, new_slot) in page.compaction_remap() {
                let record = page.read(old_slot)?;
                self.catalog
                    .delete_from_indexes(&record, RecId::new(page_num, old_slot), &self.meta)
                    .await?;
                self.catalog
                    .insert_into_indexes(&record, RecId::new(page_num, new_slot), &self.meta)
                    .await?;
            }
        }
        Ok(QueryOutput::affected(deleted))
    }

    async fn execute_vacuum(&mut self) -> Result<QueryOutput> {
        let mut compacted = 0;
        for page_num in 0..self.meta.num_pages as i32 {
            let mut page = self.record_page(page_num).await?;
            page.compact()?;
            compacted += 1;
        }
        Ok(QueryOutput::affected(compacted))
    }
}
