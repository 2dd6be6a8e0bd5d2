//! Cluster/pangenome aggregation.
//!
//! One pass over the pangenome feature table builds every index the rest
//! of the pipeline needs: cluster membership by genome, cluster sizes, the
//! core-flagged subset, per-cluster reference annotation tuples (for
//! consistency scoring), per-genome cluster-presence sets (for the tree
//! builder), and per-genome annotation tallies (for coverage stats).

use crate::database::schema::OntologyColumns;
use crate::database::{table_exists, Table};
use crate::error::Result;
use log::info;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Annotation sources recorded per reference feature, beyond the
/// discovered ontology columns.
const FUNCTION_SOURCES: &[(&str, &str)] = &[("rast", "rast_function"), ("bakta", "bakta_function")];

/// Per-genome feature tallies used for ontology coverage statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenomeTally {
    pub n_features: usize,
    pub n_annotated: usize,
}

/// Indexes derived from the pangenome feature table.
#[derive(Debug, Default)]
pub struct ClusterIndex {
    /// cluster id -> genome ids containing at least one member feature.
    members: HashMap<String, BTreeSet<String>>,
    /// cluster id -> member feature-row count.
    sizes: HashMap<String, usize>,
    /// Clusters flagged core on any member row.
    core: HashSet<String>,
    /// cluster id -> reference annotation tuples (source -> value).
    annotations: HashMap<String, Vec<HashMap<String, String>>>,
    /// genome id -> clusters present.
    genome_clusters: HashMap<String, BTreeSet<String>>,
    /// genome id -> feature/annotation tallies.
    tallies: HashMap<String, GenomeTally>,
    /// Reference genome ids (everything in the table except the user).
    ref_genomes: BTreeSet<String>,
}

impl ClusterIndex {
    /// Builds all indexes in one pass over `pangenome_features`.
    ///
    /// A missing table yields an empty index; every downstream consumer
    /// then degrades to unclustered semantics.
    pub fn build(
        conn: &Connection,
        user_genome: &str,
        schema: &OntologyColumns,
    ) -> Result<ClusterIndex> {
        let table = Table::query_optional(conn, "SELECT * FROM pangenome_features", &[]);
        let mut index = ClusterIndex::default();

        for row in table.rows() {
            let cluster_id = match row.str("cluster_id") {
                Some(id) if !id.trim().is_empty() => id.trim().to_string(),
                _ => continue,
            };
            let genome_id = row.str_or("genome_id", "");
            if genome_id.is_empty() {
                continue;
            }

            *index.sizes.entry(cluster_id.clone()).or_insert(0) += 1;
            index
                .members
                .entry(cluster_id.clone())
                .or_default()
                .insert(genome_id.clone());
            index
                .genome_clusters
                .entry(genome_id.clone())
                .or_default()
                .insert(cluster_id.clone());
            if row.i64_or("is_core", 0) == 1 {
                index.core.insert(cluster_id.clone());
            }

            let mut annotated = false;
            if genome_id != user_genome {
                index.ref_genomes.insert(genome_id.clone());

                let mut tuple = HashMap::new();
                for (source, column) in FUNCTION_SOURCES {
                    if let Some(value) = row.str(column) {
                        if !value.trim().is_empty() {
                            tuple.insert(source.to_string(), value.trim().to_string());
                        }
                    }
                }
                for short in schema.shorts() {
                    let column = schema.column(short).unwrap_or_default();
                    if let Some(value) = row.str(column) {
                        if !value.trim().is_empty() {
                            tuple.insert(short.to_string(), value.trim().to_string());
                            annotated = true;
                        }
                    }
                }
                index
                    .annotations
                    .entry(cluster_id.clone())
                    .or_default()
                    .push(tuple);
            } else {
                for short in schema.shorts() {
                    let column = schema.column(short).unwrap_or_default();
                    if row.str(column).map_or(false, |v| !v.trim().is_empty()) {
                        annotated = true;
                    }
                }
            }

            let tally = index.tallies.entry(genome_id).or_default();
            tally.n_features += 1;
            if annotated {
                tally.n_annotated += 1;
            }
        }

        info!(
            "cluster index: {} clusters ({} core) across {} reference genomes",
            index.sizes.len(),
            index.core.len(),
            index.ref_genomes.len()
        );
        Ok(index)
    }

    /// Fraction of reference genomes containing `cluster`; 0.0 when there
    /// are no reference genomes or the cluster is unknown.
    pub fn conservation(&self, cluster: &str, user_genome: &str) -> f64 {
        if self.ref_genomes.is_empty() {
            return 0.0;
        }
        let containing = self
            .members
            .get(cluster)
            .map(|genomes| genomes.iter().filter(|g| *g != user_genome).count())
            .unwrap_or(0);
        containing as f64 / self.ref_genomes.len() as f64
    }

    /// Member feature-row count of `cluster`; 0 when unknown.
    pub fn size(&self, cluster: &str) -> usize {
        self.sizes.get(cluster).copied().unwrap_or(0)
    }

    pub fn is_core(&self, cluster: &str) -> bool {
        self.core.contains(cluster)
    }

    pub fn n_core_clusters(&self) -> usize {
        self.core.len()
    }

    pub fn core_clusters(&self) -> &HashSet<String> {
        &self.core
    }

    pub fn n_clusters(&self) -> usize {
        self.sizes.len()
    }

    /// Reference annotation tuples of `cluster`; empty when none exist.
    pub fn annotations(&self, cluster: &str) -> &[HashMap<String, String>] {
        self.annotations
            .get(cluster)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Clusters present in `genome`, per the pangenome table.
    pub fn clusters_of(&self, genome: &str) -> Option<&BTreeSet<String>> {
        self.genome_clusters.get(genome)
    }

    pub fn tally(&self, genome: &str) -> GenomeTally {
        self.tallies.get(genome).copied().unwrap_or_default()
    }

    /// Reference genome ids in ascending order.
    pub fn ref_genomes(&self) -> &BTreeSet<String> {
        &self.ref_genomes
    }
}

/// Builds the `clusters_data.json` document from precomputed 2-D cluster
/// embeddings, when the annotation pipeline produced them.
///
/// Databases without a `cluster_embeddings` table yield an empty object;
/// the viewer then skips its cluster scatter panel.
pub fn extract_cluster_embeddings(conn: &Connection) -> Result<Value> {
    if !table_exists(conn, "cluster_embeddings")? {
        info!("no cluster_embeddings table; clusters document left empty");
        return Ok(json!({}));
    }

    let table = Table::query_optional(conn, "SELECT * FROM cluster_embeddings", &[]);
    let mut entries = Vec::with_capacity(table.len());
    for row in table.rows() {
        let cluster_id = row.str_or("cluster_id", "");
        if cluster_id.is_empty() {
            continue;
        }
        entries.push(json!({
            "cluster_id": cluster_id,
            "umap_x": row.f64_or("umap_x", 0.0),
            "umap_y": row.f64_or("umap_y", 0.0),
        }));
    }
    Ok(json!({ "clusters": entries }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testutil::empty_db;
    use approx::assert_relative_eq;
    use rusqlite::Connection;

    fn schema(conn: &Connection) -> OntologyColumns {
        OntologyColumns::discover(conn, "pangenome_features")
    }

    fn insert_pan(
        conn: &Connection,
        feature: &str,
        genome: &str,
        cluster: &str,
        core: i64,
        ko: &str,
    ) {
        conn.execute(
            "INSERT INTO pangenome_features \
             (feature_id, genome_id, cluster_id, is_core, rast_function, ontology_ko) \
             VALUES (?1, ?2, ?3, ?4, 'thr operon leader', ?5)",
            rusqlite::params![feature, genome, cluster, core, ko],
        )
        .unwrap();
    }

    #[test]
    fn test_build_indexes() {
        let conn = empty_db();
        insert_pan(&conn, "r1", "ref_a", "c1", 1, "K001");
        insert_pan(&conn, "r2", "ref_b", "c1", 0, "K001");
        insert_pan(&conn, "r3", "ref_b", "c2", 0, "");
        insert_pan(&conn, "u1", "user_genome", "c1", 0, "K001");

        let schema = schema(&conn);
        let index = ClusterIndex::build(&conn, "user_genome", &schema).unwrap();

        assert_eq!(index.n_clusters(), 2);
        assert_eq!(index.size("c1"), 3);
        assert!(index.is_core("c1"));
        assert!(!index.is_core("c2"));
        assert_eq!(index.ref_genomes().len(), 2);
        // 2 of 2 reference genomes carry c1; the user row does not count.
        assert_relative_eq!(index.conservation("c1", "user_genome"), 1.0);
        assert_relative_eq!(index.conservation("c2", "user_genome"), 0.5);
        assert_relative_eq!(index.conservation("absent", "user_genome"), 0.0);
        // Only reference rows contribute annotation tuples.
        assert_eq!(index.annotations("c1").len(), 2);
        assert_eq!(index.annotations("c1")[0].get("ko").unwrap(), "K001");
        assert!(index.annotations("c2")[0].get("ko").is_none());
    }

    #[test]
    fn test_missing_table_degrades_to_empty() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = OntologyColumns::default();
        let index = ClusterIndex::build(&conn, "user_genome", &schema).unwrap();
        assert_eq!(index.n_clusters(), 0);
        assert_relative_eq!(index.conservation("c1", "user_genome"), 0.0);
        assert!(index.annotations("c1").is_empty());
    }

    #[test]
    fn test_cluster_embeddings_absent_table() {
        let conn = empty_db();
        let doc = extract_cluster_embeddings(&conn).unwrap();
        assert_eq!(doc, serde_json::json!({}));
    }

    #[test]
    fn test_cluster_embeddings_present() {
        let conn = empty_db();
        conn.execute_batch(
            "CREATE TABLE cluster_embeddings (cluster_id TEXT, umap_x REAL, umap_y REAL);
             INSERT INTO cluster_embeddings VALUES ('c1', 1.5, -0.25), ('c2', 0.0, 3.0);",
        )
        .unwrap();
        let doc = extract_cluster_embeddings(&conn).unwrap();
        let clusters = doc["clusters"].as_array().unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0]["cluster_id"], "c1");
        assert_eq!(clusters[0]["umap_x"], 1.5);
        assert_eq!(clusters[1]["umap_y"], 3.0);
    }

    #[test]
    fn test_tallies() {
        let conn = empty_db();
        insert_pan(&conn, "r1", "ref_a", "c1", 0, "K001");
        insert_pan(&conn, "r2", "ref_a", "c2", 0, "");
        let schema = schema(&conn);
        let index = ClusterIndex::build(&conn, "user_genome", &schema).unwrap();
        let tally = index.tally("ref_a");
        assert_eq!(tally.n_features, 2);
        assert_eq!(tally.n_annotated, 1);
    }
}
