//! The database manager: table directory lifecycle and statement entry
//! point.
//!
//! One [`Database`] owns an [`Engine`] and the map of loaded tables.
//! `Create` and `Drop` manage table directories; every other statement
//! is dispatched to its table, loading it from disk on first touch.
//! [`Database::execute`] is the blocking entry point for synchronous
//! callers; the work itself runs as a task on the worker pool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::errdata;
use crate::error::{Error, Result};
use crate::statement::{Command, ForeignRef, Statement};
use crate::storage::buffer_pool::BufferPool;
use crate::table::meta::TableMeta;
use crate::table::table::{QueryOutput, Table};

pub struct Database {
    engine: Engine,
    dir: PathBuf,
    tables: Arc<AsyncMutex<HashMap<String, Table>>>,
}

impl Database {
    /// Open (creating if needed) a database root directory and start
    /// the engine services.
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        let dir = config.dir.clone();
        let engine = Engine::start(config);
        Ok(Self { engine, dir, tables: Arc::new(AsyncMutex::new(HashMap::new())) })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Execute one statement, blocking until its result. Exit-code
    /// mapping for a surrounding CLI: `Ok` is 0, any error is nonzero.
    pub fn execute(&self, stmt: Statement) -> Result<QueryOutput> {
        let dir = self.dir.clone();
        let pool = self.engine.pool().clone();
        let tables = self.tables.clone();
        self.engine
            .sync_wait(async move { dispatch(dir, pool, tables, stmt).await })
    }

    /// Shut down the engine, flushing all cached state.
    pub fn close(self) -> Result<()> {
        self.engine.shutdown()
    }
}

async fn dispatch(
    dir: PathBuf,
    pool: Arc<BufferPool>,
    tables: Arc<AsyncMutex<HashMap<String, Table>>>,
    stmt: Statement,
) -> Result<QueryOutput> {
    match stmt.command {
        Command::Create => create_table(dir, pool, tables, &stmt).await,
        Command::Drop => drop_table(dir, tables, &stmt).await,
        _ => {
            let mut tables = tables.lock().await;
            let table = load_table(&dir, &pool, &mut tables, stmt.table()).await?;
            table.execute(&stmt).await
        }
    }
}

async fn create_table(
    dir: PathBuf,
    pool: Arc<BufferPool>,
    tables: Arc<AsyncMutex<HashMap<String, Table>>>,
    stmt: &Statement,
) -> Result<QueryOutput> {
    let name = stmt.table();
    if name.is_empty() {
        return Err(errdata!("table name is empty"));
    }
    let mut tables = tables.lock().await;
    let table_dir = dir.join(name);
    if tables.contains_key(name) || table_dir.is_dir() {
        tracing::debug!(table = name, "create of existing table ignored");
        return Ok(QueryOutput::default());
    }

    let foreign: Vec<ForeignRef> = stmt.foreign.clone();
    let meta = TableMeta::build(&stmt.attrs, &stmt.attr_types, &stmt.primary_key, &foreign);
    let table = Table::create(table_dir, meta, pool).await?;
    tables.insert(name.to_owned(), table);
    Ok(QueryOutput::default())
}

async fn drop_table(
    dir: PathBuf,
    tables: Arc<AsyncMutex<HashMap<String, Table>>>,
    stmt: &Statement,
) -> Result<QueryOutput> {
    let name = stmt.table();
    let mut tables = tables.lock().await;
    tables.remove(name);
    let table_dir = dir.join(name);
    if table_dir.is_dir() {
        std::fs::remove_dir_all(&table_dir)?;
        tracing::info!(table = name, "dropped table");
    }
    Ok(QueryOutput::default())
}

async fn load_table<'a>(
    dir: &PathBuf,
    pool: &Arc<BufferPool>,
    tables: &'a mut HashMap<String, Table>,
    name: &str,
) -> Result<&'a mut Table> {
    if !tables.contains_key(name) {
        let table_dir = dir.join(name);
        if !table_dir.is_dir() {
            return Err(Error::InvalidData(format!("table '{name}' does not exist")));
        }
        let table = Table::open(table_dir, pool.clone()).await?;
        tables.insert(name.to_owned(), table);
    }
    Ok(tables.get_mut(name).expect("table loaded above"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{AstTree, Comparator};
    use crate::storage::types::{DataType, Value};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> EngineConfig {
        EngineConfig::new(dir.path().join("db")).io_frames(8).scratch_frames(8).workers(2)
    }

    fn create_stmt() -> Statement {
        Statement::create(
            "users",
            &[("id", DataType::int()), ("name", DataType::text(10))],
            &["id"],
        )
    }

    #[test]
    fn test_create_insert_select_drop() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(config(&dir)).unwrap();

        db.execute(create_stmt()).unwrap();
        db.execute(Statement::insert("users", &["1", "ada"])).unwrap();
        db.execute(Statement::insert("users", &["2", "grace"])).unwrap();

        let out = db
            .execute(Statement::select("users", AstTree::cond("name", Comparator::Equal, "ada")))
            .unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0][0], Value::Int(1));

        // Creating the same table again is a no-op, not a reset.
        db.execute(create_stmt()).unwrap();
        let out = db.execute(Statement::select("users", AstTree::all())).unwrap();
        assert_eq!(out.records.len(), 2);

        db.execute(Statement::new(Command::Drop, "users")).unwrap();
        assert!(db.execute(Statement::select("users", AstTree::all())).is_err());

        db.close().unwrap();
    }

    #[test]
    fn test_missing_table_errors() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(config(&dir)).unwrap();
        assert!(db.execute(Statement::insert("ghost", &["1"])).is_err());
        db.close().unwrap();
    }

    #[test]
    fn test_rows_survive_restart() {
        let dir = TempDir::new().unwrap();

        let db = Database::open(config(&dir)).unwrap();
        db.execute(create_stmt()).unwrap();
        for n in 0..100 {
            db.execute(Statement::insert("users", &[&n.to_string(), &format!("u{n}")]))
                .unwrap();
        }
        db.close().unwrap();

        // A fresh engine over the same directory sees every row, both
        // by scan and through the primary index.
        let db = Database::open(config(&dir)).unwrap();
        let out = db.execute(Statement::select("users", AstTree::all())).unwrap();
        assert_eq!(out.records.len(), 100);
        let out = db
            .execute(Statement::select("users", AstTree::cond("id", Comparator::Equal, "73")))
            .unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0][1], Value::Text(format!("u73\0\0\0\0\0\0\0")));
        db.close().unwrap();
    }
}
