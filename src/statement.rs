//! Parsed statement shapes.
//!
//! Parsing itself is out of scope; the engine consumes statements that a
//! front end (or a test) has already built. The WHERE clause arrives as
//! a dense binary heap of 128 nodes: leaves compare one attribute
//! against a literal, interior nodes conjoin their two children.

use std::cmp::Ordering;

use crate::error::Result;
use crate::storage::types::{compare_values, DataType, Record, Value};
use crate::table::meta::TableMeta;

/// Statement kinds the engine dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Create,
    CreateIndex,
    Drop,
    Insert,
    Select,
    Update,
    Delete,
    Vacuum,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    Larger,
    Smaller,
    LargerThanOrEqual,
    SmallerThanOrEqual,
}

impl Comparator {
    fn eval(self, ordering: Ordering) -> bool {
        match self {
            Comparator::Equal => ordering == Ordering::Equal,
            Comparator::NotEqual => ordering != Ordering::Equal,
            Comparator::Larger => ordering == Ordering::Greater,
            Comparator::Smaller => ordering == Ordering::Less,
            Comparator::LargerThanOrEqual => ordering != Ordering::Less,
            Comparator::SmallerThanOrEqual => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunctor {
    And,
    Or,
}

/// One leaf condition: `lhs op rhs`, with `lhs` an attribute name and
/// `rhs` a literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub lhs: String,
    pub rhs: String,
    pub comparator: Comparator,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum AstNode {
    #[default]
    Empty,
    Cond(Conditional),
    Conj(Conjunctor),
}

/// Number of nodes in a WHERE tree, and the bound on most statement
/// parameter lists.
pub const MAX_PARAMS: usize = 128;

/// A WHERE clause: a dense binary heap of [`MAX_PARAMS`] nodes, children
/// of node `i` at `2i + 1` and `2i + 2`.
#[derive(Debug, Clone, PartialEq)]
pub struct AstTree {
    pub nodes: Vec<AstNode>,
}

impl Default for AstTree {
    fn default() -> Self {
        Self { nodes: vec![AstNode::Empty; MAX_PARAMS] }
    }
}

fn left(node: usize) -> usize {
    2 * node + 1
}

fn right(node: usize) -> usize {
    2 * node + 2
}

impl AstTree {
    /// A tree that matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// A single condition at the root.
    pub fn cond(lhs: &str, comparator: Comparator, rhs: &str) -> Self {
        let mut tree = Self::default();
        tree.nodes[0] = AstNode::Cond(Conditional {
            lhs: lhs.into(),
            rhs: rhs.into(),
            comparator,
        });
        tree
    }

    /// Conjoin two subtrees under a new root.
    pub fn join(conjunctor: Conjunctor, lhs: Self, rhs: Self) -> Self {
        let mut tree = Self::default();
        tree.nodes[0] = AstNode::Conj(conjunctor);
        tree.graft(1, &lhs, 0);
        tree.graft(2, &rhs, 0);
        tree
    }

    fn graft(&mut self, at: usize, src: &AstTree, from: usize) {
        if from >= src.nodes.len() || at >= self.nodes.len() {
            return;
        }
        if src.nodes[from] == AstNode::Empty {
            return;
        }
        self.nodes[at] = src.nodes[from].clone();
        self.graft(left(at), src, left(from));
        self.graft(right(at), src, right(from));
    }

    /// Evaluate the clause against a record of the given table. An empty
    /// node matches everything.
    pub fn matches(&self, record: &Record, meta: &TableMeta) -> Result<bool> {
        self.matches_at(0, record, meta)
    }

    fn matches_at(&self, node: usize, record: &Record, meta: &TableMeta) -> Result<bool> {
        match self.nodes.get(node) {
            None | Some(AstNode::Empty) => Ok(true),
            Some(AstNode::Cond(cond)) => {
                let attr_idx = meta.attr_idx(&cond.lhs)?;
                let dtype = meta.record_layout[attr_idx];
                let literal = Value::cast(&cond.rhs, dtype)?;
                let ordering = compare_values(&record[attr_idx], &literal);
                Ok(cond.comparator.eval(ordering))
            }
            Some(AstNode::Conj(conjunctor)) => {
                let lhs = self.matches_at(left(node), record, meta)?;
                let rhs = self.matches_at(right(node), record, meta)?;
                Ok(match conjunctor {
                    Conjunctor::And => lhs && rhs,
                    Conjunctor::Or => lhs || rhs,
                })
            }
        }
    }

    /// The equality conjunct of the clause: attribute names and literal
    /// values of every `Equal` leaf, in node order. A clause containing
    /// any `Or` has no equality conjunct, since an index can only stand
    /// in for a pure conjunction.
    pub fn equality_attrs(&self, meta: &TableMeta) -> Result<(Vec<String>, Record)> {
        let mut attrs = Vec::new();
        let mut key = Record::new();
        for node in &self.nodes {
            match node {
                AstNode::Conj(Conjunctor::Or) => return Ok((Vec::new(), Record::new())),
                AstNode::Cond(cond) if cond.comparator == Comparator::Equal => {
                    let attr_idx = meta.attr_idx(&cond.lhs)?;
                    let dtype = meta.record_layout[attr_idx];
                    attrs.push(cond.lhs.clone());
                    key.push(Value::cast(&cond.rhs, dtype)?);
                }
                _ => {}
            }
        }
        Ok((attrs, key))
    }
}

/// A foreign-key reference: local attribute and referenced table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignRef {
    pub key: String,
    pub table: String,
}

/// A parsed statement, as the front end hands it to the engine.
#[derive(Debug, Clone)]
pub struct Statement {
    pub command: Command,
    pub table_names: [String; 2],
    pub join_attrs: [String; 2],
    /// Attribute names: the schema for Create, the value list order for
    /// Insert, the indexed tuple for CreateIndex.
    pub attrs: Vec<String>,
    /// Column types, parallel to `attrs` (Create only).
    pub attr_types: Vec<DataType>,
    pub primary_key: Vec<String>,
    pub foreign: Vec<ForeignRef>,
    /// SET targets and values: literals for Insert values and Update
    /// assignments.
    pub set_attrs: Vec<String>,
    pub set_values: Vec<String>,
    pub where_tree: AstTree,
}

impl Statement {
    pub fn new(command: Command, table: &str) -> Self {
        Self {
            command,
            table_names: [table.to_owned(), String::new()],
            join_attrs: [String::new(), String::new()],
            attrs: Vec::new(),
            attr_types: Vec::new(),
            primary_key: Vec::new(),
            foreign: Vec::new(),
            set_attrs: Vec::new(),
            set_values: Vec::new(),
            where_tree: AstTree::all(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table_names[0]
    }

    /// Create-table statement for the given schema.
    pub fn create(
        table: &str,
        attrs: &[(&str, DataType)],
        primary_key: &[&str],
    ) -> Self {
        let mut stmt = Self::new(Command::Create, table);
        stmt.attrs = attrs.iter().map(|(name, _)| (*name).to_owned()).collect();
        stmt.attr_types = attrs.iter().map(|(_, dtype)| *dtype).collect();
        stmt.primary_key = primary_key.iter().map(|k| (*k).to_owned()).collect();
        stmt
    }

    /// Insert statement with values as literals, in attribute order.
    pub fn insert(table: &str, values: &[&str]) -> Self {
        let mut stmt = Self::new(Command::Insert, table);
        stmt.set_values = values.iter().map(|v| (*v).to_owned()).collect();
        stmt
    }

    /// Create-index statement over the given attribute tuple.
    pub fn create_index(table: &str, attrs: &[&str]) -> Self {
        let mut stmt = Self::new(Command::CreateIndex, table);
        stmt.attrs = attrs.iter().map(|a| (*a).to_owned()).collect();
        stmt
    }

    /// Select statement with a WHERE clause.
    pub fn select(table: &str, where_tree: AstTree) -> Self {
        let mut stmt = Self::new(Command::Select, table);
        stmt.where_tree = where_tree;
        stmt
    }

    /// Update statement: SET assignments plus a WHERE clause.
    pub fn update(table: &str, sets: &[(&str, &str)], where_tree: AstTree) -> Self {
        let mut stmt = Self::new(Command::Update, table);
        stmt.set_attrs = sets.iter().map(|(a, _)| (*a).to_owned()).collect();
        stmt.set_values = sets.iter().map(|(_, v)| (*v).to_owned()).collect();
        stmt.where_tree = where_tree;
        stmt
    }

    /// Delete statement with a WHERE clause.
    pub fn delete(table: &str, where_tree: AstTree) -> Self {
        let mut stmt = Self::new(Command::Delete, table);
        stmt.where_tree = where_tree;
        stmt
    }
}
