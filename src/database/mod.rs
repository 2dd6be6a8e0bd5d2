//! Read-only access to pangenome SQLite databases.
//!
//! Two concerns live here: loosely-structured row access with explicit
//! defaulting (the tables vary between schema generations, so no column is
//! assumed), and user-genome detection via an ordered chain of independent
//! strategies.

pub mod schema;

use crate::error::{ExtractError, Result};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

/// Opens a database strictly read-only. No schema migration is ever
/// performed on input databases.
pub fn open_readonly(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|source| ExtractError::OpenDatabase {
        path: path.to_path_buf(),
        source,
    })
}

/// Returns true if `table` exists in the database.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// An in-memory snapshot of a query result with dynamic columns.
///
/// Extraction is batch-style and single-pass per table, so materializing
/// rows up front is both simple and cheap relative to the derived indexes
/// built from them.
#[derive(Debug, Default)]
pub struct Table {
    columns: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Runs `sql` and snapshots all rows. Missing tables are a normal
    /// condition for optional data: the error is logged and an empty
    /// snapshot is returned so callers proceed with absent-field
    /// semantics.
    pub fn query_optional(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Table {
        match Self::query(conn, sql, params) {
            Ok(table) => table,
            Err(err) => {
                warn!("optional query degraded to empty result: {err}");
                Table::default()
            }
        }
    }

    /// Runs `sql` and snapshots all rows, propagating database errors.
    pub fn query(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> rusqlite::Result<Table> {
        let mut stmt = conn.prepare(sql)?;
        let columns: HashMap<String, usize> = stmt
            .column_names()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        let n_cols = columns.len();

        let mut rows = Vec::new();
        let mut raw = stmt.query(params)?;
        while let Some(row) = raw.next()? {
            let mut values = Vec::with_capacity(n_cols);
            for i in 0..n_cols {
                values.push(row.get::<_, Value>(i)?);
            }
            rows.push(values);
        }
        Ok(Table { columns, rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Iterates rows as [`RowView`]s.
    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(move |values| RowView {
            columns: &self.columns,
            values,
        })
    }
}

/// Typed accessor over one loosely-structured row.
///
/// All "missing field" policy is concentrated here: a missing column, a
/// NULL, or a type mismatch yields `None` (or the caller's default),
/// never an error.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a HashMap<String, usize>,
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    fn value(&self, column: &str) -> Option<&'a Value> {
        self.columns.get(column).map(|&i| &self.values[i])
    }

    pub fn str(&self, column: &str) -> Option<&'a str> {
        match self.value(column) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn str_or(&self, column: &str, default: &str) -> String {
        self.str(column).unwrap_or(default).to_string()
    }

    pub fn i64(&self, column: &str) -> Option<i64> {
        match self.value(column) {
            Some(Value::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn i64_or(&self, column: &str, default: i64) -> i64 {
        self.i64(column).unwrap_or(default)
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        match self.value(column) {
            Some(Value::Real(v)) => Some(*v),
            Some(Value::Integer(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn f64_or(&self, column: &str, default: f64) -> f64 {
        self.f64(column).unwrap_or(default)
    }
}

/// Determines the user genome id via an ordered strategy chain.
///
/// Each strategy is independent and side-effect-free; the first one that
/// yields a row wins. The chain covers both supported schema generations:
///
/// 1. explicit kind flag (`genome.is_user_genome = 1`),
/// 2. naming-prefix convention (`genome_features.genome_id LIKE 'user%'`),
/// 3. legacy convention: lexicographically first genome id in the feature
///    table.
///
/// An exhausted chain (in practice: an empty feature table) is the one
/// fatal condition of the whole extraction.
pub fn detect_user_genome(conn: &Connection) -> Result<String> {
    let strategies: [(&str, fn(&Connection) -> rusqlite::Result<Option<String>>); 3] = [
        ("kind flag", detect_by_flag),
        ("naming prefix", detect_by_prefix),
        ("legacy first id", detect_legacy),
    ];

    for (name, strategy) in strategies {
        match strategy(conn) {
            Ok(Some(genome_id)) => {
                debug!("user genome '{genome_id}' detected via {name} strategy");
                return Ok(genome_id);
            }
            Ok(None) => {}
            Err(err) => debug!("user genome {name} strategy not applicable: {err}"),
        }
    }
    Err(ExtractError::UserGenomeUndetectable)
}

fn detect_by_flag(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT genome_id FROM genome WHERE is_user_genome = 1 ORDER BY genome_id LIMIT 1",
        [],
        |row| row.get(0),
    )
    .optional()
}

fn detect_by_prefix(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT DISTINCT genome_id FROM genome_features WHERE genome_id LIKE 'user%' \
         ORDER BY genome_id LIMIT 1",
        [],
        |row| row.get(0),
    )
    .optional()
}

fn detect_legacy(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT DISTINCT genome_id FROM genome_features ORDER BY genome_id LIMIT 1",
        [],
        |row| row.get(0),
    )
    .optional()
}

#[cfg(test)]
pub(crate) mod testutil {
    use rusqlite::Connection;

    /// Creates an in-memory database with the full modern schema and no
    /// rows. Tests insert what they need.
    pub fn empty_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE genome (
              genome_id TEXT PRIMARY KEY,
              is_user_genome INTEGER,
              organism_name TEXT,
              gtdb_taxonomy TEXT,
              ncbi_taxonomy TEXT,
              assembly_size INTEGER,
              n_contigs INTEGER,
              n_features INTEGER,
              completeness REAL,
              contamination REAL,
              ani_to_user REAL,
              phenotype_accuracy REAL
            );
            CREATE TABLE genome_features (
              feature_id TEXT,
              genome_id TEXT,
              contig TEXT,
              start INTEGER,
              strand TEXT,
              protein_length INTEGER,
              rast_function TEXT,
              bakta_function TEXT,
              aliases TEXT,
              clusters TEXT,
              psortb_localization TEXT,
              ontology_ko TEXT,
              ontology_cog TEXT,
              ontology_pfam TEXT,
              ontology_go TEXT,
              ontology_ec TEXT
            );
            CREATE TABLE pangenome_features (
              feature_id TEXT,
              genome_id TEXT,
              cluster_id TEXT,
              is_core INTEGER,
              rast_function TEXT,
              bakta_function TEXT,
              ontology_ko TEXT,
              ontology_go TEXT,
              ontology_ec TEXT
            );
            CREATE TABLE model_reactions (
              genome_id TEXT,
              reaction_id TEXT,
              name TEXT,
              equation TEXT,
              gene_association TEXT,
              flux_minimal REAL,
              class_minimal TEXT,
              flux_rich REAL,
              class_rich TEXT,
              is_gapfilled INTEGER
            );
            CREATE TABLE gene_fitness (
              feature_id TEXT,
              media TEXT,
              class TEXT,
              score REAL
            );
            CREATE TABLE phenotypes (
              genome_id TEXT,
              phenotype_id TEXT,
              feature_id TEXT,
              growth_class TEXT,
              accuracy REAL
            );
            ",
        )
        .unwrap();
        conn
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::empty_db;
    use super::*;

    #[test]
    fn test_table_exists() {
        let conn = empty_db();
        assert!(table_exists(&conn, "genome").unwrap());
        assert!(!table_exists(&conn, "no_such_table").unwrap());
    }

    #[test]
    fn test_row_view_defaults() {
        let conn = empty_db();
        conn.execute(
            "INSERT INTO genome_features (feature_id, genome_id, start, protein_length) \
             VALUES ('f1', 'g1', 100, NULL)",
            [],
        )
        .unwrap();
        let table = Table::query(&conn, "SELECT * FROM genome_features", &[]).unwrap();
        let row = table.rows().next().unwrap();

        assert_eq!(row.str("feature_id"), Some("f1"));
        assert_eq!(row.i64_or("start", 0), 100);
        // NULL column
        assert_eq!(row.i64_or("protein_length", -1), -1);
        // missing column
        assert_eq!(row.str_or("no_such_column", ""), "");
        assert_eq!(row.f64_or("no_such_column", -1.0), -1.0);
        // integer readable as f64
        assert_eq!(row.f64_or("start", -1.0), 100.0);
    }

    #[test]
    fn test_query_optional_missing_table() {
        let conn = Connection::open_in_memory().unwrap();
        let table = Table::query_optional(&conn, "SELECT * FROM missing", &[]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_detect_user_genome_by_flag() {
        let conn = empty_db();
        conn.execute(
            "INSERT INTO genome (genome_id, is_user_genome) VALUES ('g.ref', 0), ('g.mine', 1)",
            [],
        )
        .unwrap();
        assert_eq!(detect_user_genome(&conn).unwrap(), "g.mine");
    }

    #[test]
    fn test_detect_user_genome_by_prefix() {
        let conn = empty_db();
        conn.execute(
            "INSERT INTO genome_features (feature_id, genome_id) \
             VALUES ('f1', 'ref_1'), ('f2', 'user_genome')",
            [],
        )
        .unwrap();
        assert_eq!(detect_user_genome(&conn).unwrap(), "user_genome");
    }

    #[test]
    fn test_detect_user_genome_legacy() {
        let conn = empty_db();
        conn.execute(
            "INSERT INTO genome_features (feature_id, genome_id) \
             VALUES ('f1', 'b_genome'), ('f2', 'a_genome')",
            [],
        )
        .unwrap();
        assert_eq!(detect_user_genome(&conn).unwrap(), "a_genome");
    }

    #[test]
    fn test_detect_user_genome_fatal_when_empty() {
        let conn = empty_db();
        assert!(matches!(
            detect_user_genome(&conn),
            Err(ExtractError::UserGenomeUndetectable)
        ));
    }
}
