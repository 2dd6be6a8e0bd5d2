//! Ontology column discovery.
//!
//! Annotation pipelines differ in which ontologies they write, so feature
//! tables carry a variable set of `ontology_<short>` columns. This adapter
//! introspects a table once and exposes a short-name -> physical-column
//! mapping; callers cache the result for the duration of one extraction.

use indexmap::IndexMap;
use log::debug;
use rusqlite::Connection;

/// Column-name prefix marking an ontology term column.
const ONTOLOGY_PREFIX: &str = "ontology_";

/// Discovered ontology columns of one table.
#[derive(Debug, Clone, Default)]
pub struct OntologyColumns {
    columns: IndexMap<String, String>,
}

impl OntologyColumns {
    /// Introspects `table` and records every `ontology_<short>` column.
    ///
    /// A missing table is not an error: discovery returns an empty mapping
    /// and callers proceed with absent-field semantics.
    pub fn discover(conn: &Connection, table: &str) -> OntologyColumns {
        let mut columns = IndexMap::new();
        // Table names come from a fixed internal set, never user input.
        let pragma = format!("PRAGMA table_info({table})");
        let result = conn.prepare(&pragma).and_then(|mut stmt| {
            let names: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<rusqlite::Result<_>>()?;
            Ok(names)
        });

        match result {
            Ok(names) => {
                for name in names {
                    if let Some(short) = name.strip_prefix(ONTOLOGY_PREFIX) {
                        if !short.is_empty() {
                            columns.insert(short.to_string(), name.clone());
                        }
                    }
                }
            }
            Err(err) => {
                debug!("ontology discovery skipped for table '{table}': {err}");
            }
        }

        if columns.is_empty() {
            debug!("no ontology columns discovered in table '{table}'");
        }
        OntologyColumns { columns }
    }

    /// Physical column name for an ontology short name, if present.
    pub fn column(&self, short: &str) -> Option<&str> {
        self.columns.get(short).map(String::as_str)
    }

    pub fn has(&self, short: &str) -> bool {
        self.columns.contains_key(short)
    }

    /// Discovered short names, in table-column order.
    pub fn shorts(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testutil::empty_db;
    use rusqlite::Connection;

    #[test]
    fn test_discover_feature_columns() {
        let conn = empty_db();
        let schema = OntologyColumns::discover(&conn, "genome_features");
        assert_eq!(schema.column("ko"), Some("ontology_ko"));
        assert_eq!(schema.column("cog"), Some("ontology_cog"));
        assert_eq!(schema.column("ec"), Some("ontology_ec"));
        assert!(schema.has("pfam"));
        assert!(schema.has("go"));
        assert!(!schema.has("kegg_missing"));
    }

    #[test]
    fn test_discover_missing_table_is_empty() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = OntologyColumns::discover(&conn, "genome_features");
        assert!(schema.is_empty());
        assert_eq!(schema.column("ko"), None);
    }

    #[test]
    fn test_shorts_order_follows_table() {
        let conn = empty_db();
        let schema = OntologyColumns::discover(&conn, "genome_features");
        let shorts: Vec<&str> = schema.shorts().collect();
        assert_eq!(shorts, vec!["ko", "cog", "pfam", "go", "ec"]);
    }
}
