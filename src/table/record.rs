//! A typed row bound to its table's schema.

use crate::error::{Error, Result};
use crate::index::catalog::project;
use crate::statement::Statement;
use crate::storage::types::{Record, Value};
use crate::table::meta::TableMeta;

pub struct TableRecord<'a> {
    record: Record,
    meta: &'a TableMeta,
}

impl<'a> TableRecord<'a> {
    pub fn new(record: Record, meta: &'a TableMeta) -> Self {
        debug_assert_eq!(record.len(), meta.num_attrs());
        Self { record, meta }
    }

    /// Build a candidate row from an insert statement's literals, in
    /// attribute order.
    pub fn from_statement(stmt: &Statement, meta: &'a TableMeta) -> Result<Self> {
        if stmt.set_values.len() != meta.num_attrs() {
            return Err(Error::InvalidRecord(format!(
                "insert provides {} values, table has {} attributes",
                stmt.set_values.len(),
                meta.num_attrs()
            )));
        }
        let record = stmt
            .set_values
            .iter()
            .zip(meta.record_layout.iter())
            .map(|(literal, dtype)| Value::cast(literal, *dtype))
            .collect::<Result<Record>>()?;
        Ok(Self { record, meta })
    }

    pub fn get(&self, attr: &str) -> Result<&Value> {
        Ok(&self.record[self.meta.attr_idx(attr)?])
    }

    /// The row's projection onto an attribute tuple.
    pub fn project(&self, attrs: &[String]) -> Result<Record> {
        project(&self.record, attrs, self.meta)
    }

    /// The row's primary-key tuple.
    pub fn primary_key(&self) -> Result<Record> {
        self.project(&self.meta.primary_key)
    }

    /// Overwrite one attribute from a literal.
    pub fn set_attr(&mut self, attr: &str, literal: &str) -> Result<()> {
        let idx = self.meta.attr_idx(attr)?;
        self.record[idx] = Value::cast(literal, self.meta.record_layout[idx])?;
        Ok(())
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }
}
