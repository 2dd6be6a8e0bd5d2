//! Phylogenetic tree construction over cluster presence/absence.
//!
//! The user genome plus every reference genome in the pangenome table are
//! placed in a binary (genome x cluster) incidence matrix; pairwise
//! Jaccard distances over the presence sets feed UPGMA clustering. The
//! resulting document carries the linkage table, a leaf ordering, and
//! per-genome taxonomy, quality, and coverage statistics.

use crate::bio::taxonomy::parse_lineage;
use crate::database::Table;
use crate::error::Result;
use crate::extract::clusters::{ClusterIndex, GenomeTally};
use crate::extract::NO_SCORE;
use crate::stats::{jaccard_distance, leaf_order, round4, upgma};
use indexmap::IndexMap;
use log::info;
use ndarray::Array2;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Per-genome descriptive fields pulled from the `genome` table.
#[derive(Debug, Clone, Default)]
struct GenomeMeta {
    gtdb_taxonomy: String,
    ncbi_taxonomy: String,
    completeness: Option<f64>,
    contamination: Option<f64>,
    ani_to_user: Option<f64>,
}

/// Builds the `tree_data.json` document.
///
/// With fewer than 2 genomes the distance/linkage computation is skipped
/// entirely and a minimal document (genome list and counts) is returned;
/// this is a normal outcome, not an error.
pub fn build_tree(
    conn: &Connection,
    user_genome: &str,
    clusters: &ClusterIndex,
    user_clusters: &BTreeSet<String>,
    user_tally: GenomeTally,
) -> Result<Value> {
    // User genome first, references in ascending id order.
    let mut genome_ids = vec![user_genome.to_string()];
    genome_ids.extend(clusters.ref_genomes().iter().cloned());
    let n = genome_ids.len();

    if n < 2 {
        info!("tree builder: {n} genome(s), skipping linkage computation");
        return Ok(json!({
            "n_genomes": n,
            "genome_ids": genome_ids,
            "n_clusters": clusters.n_clusters(),
        }));
    }

    // Presence sets; the user genome unions its feature-table assignments
    // with any of its rows in the pangenome table.
    let presence: Vec<HashSet<&str>> = genome_ids
        .iter()
        .map(|genome| {
            let mut set: HashSet<&str> = clusters
                .clusters_of(genome)
                .map(|s| s.iter().map(String::as_str).collect())
                .unwrap_or_default();
            if genome == user_genome {
                set.extend(user_clusters.iter().map(String::as_str));
            }
            set
        })
        .collect();

    // Incidence matrix over the union of observed clusters, in sorted
    // cluster order. The matrix itself is not serialized; it documents
    // the distance computation and feeds nothing else.
    let all_clusters: BTreeSet<&str> = presence.iter().flatten().copied().collect();
    let cluster_pos: HashMap<&str, usize> = all_clusters
        .iter()
        .enumerate()
        .map(|(i, c)| (*c, i))
        .collect();
    let mut incidence = Array2::<u8>::zeros((n, all_clusters.len()));
    for (g, set) in presence.iter().enumerate() {
        for cluster in set {
            incidence[[g, cluster_pos[cluster]]] = 1;
        }
    }

    let mut distances = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = jaccard_distance(&presence[i], &presence[j]);
            distances[[i, j]] = d;
            distances[[j, i]] = d;
        }
    }

    let linkage = upgma(&distances);
    let order = leaf_order(&linkage, n);
    let linkage_rows: Vec<Value> = linkage
        .iter()
        .map(|row| json!([row.left, row.right, round4(row.distance), row.size]))
        .collect();

    let meta = load_genome_meta(conn);
    let mut genomes: IndexMap<String, Value> = IndexMap::new();
    for (g, genome) in genome_ids.iter().enumerate() {
        let info = meta.get(genome).cloned().unwrap_or_default();
        let similarity = if genome == user_genome {
            Some(1.0)
        } else {
            info.ani_to_user
        };
        let tally = if genome == user_genome {
            user_tally
        } else {
            clusters.tally(genome)
        };
        genomes.insert(
            genome.clone(),
            genome_entry(&info, similarity, &presence[g], clusters, tally),
        );
    }

    Ok(json!({
        "n_genomes": n,
        "genome_ids": genome_ids,
        "n_clusters": incidence.ncols(),
        "linkage": linkage_rows,
        "leaf_order": order,
        "genomes": genomes,
    }))
}

fn genome_entry(
    meta: &GenomeMeta,
    similarity: Option<f64>,
    present: &HashSet<&str>,
    clusters: &ClusterIndex,
    tally: GenomeTally,
) -> Value {
    let core = clusters.core_clusters();
    let core_present = core.iter().filter(|c| present.contains(c.as_str())).count();
    let core_pct = if core.is_empty() {
        0.0
    } else {
        round4(100.0 * core_present as f64 / core.len() as f64)
    };
    let ontology_coverage = if tally.n_features == 0 {
        0.0
    } else {
        round4(100.0 * tally.n_annotated as f64 / tally.n_features as f64)
    };

    json!({
        "taxonomy": parse_lineage(&meta.gtdb_taxonomy),
        "ncbi_taxonomy": meta.ncbi_taxonomy,
        "completeness": meta.completeness.unwrap_or(NO_SCORE),
        "contamination": meta.contamination.unwrap_or(NO_SCORE),
        "similarity": similarity,
        "core_pct": core_pct,
        "missing_core": core.len() - core_present,
        "ontology_coverage": ontology_coverage,
        "n_features": tally.n_features,
    })
}

fn load_genome_meta(conn: &Connection) -> HashMap<String, GenomeMeta> {
    let table = Table::query_optional(conn, "SELECT * FROM genome", &[]);
    let mut meta = HashMap::new();
    for row in table.rows() {
        let genome_id = row.str_or("genome_id", "");
        if genome_id.is_empty() {
            continue;
        }
        meta.insert(
            genome_id,
            GenomeMeta {
                gtdb_taxonomy: row.str_or("gtdb_taxonomy", ""),
                ncbi_taxonomy: row.str_or("ncbi_taxonomy", ""),
                completeness: row.f64("completeness"),
                contamination: row.f64("contamination"),
                ani_to_user: row.f64("ani_to_user"),
            },
        );
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::OntologyColumns;
    use crate::database::testutil::empty_db;
    use rusqlite::Connection;

    fn insert_pan(conn: &Connection, feature: &str, genome: &str, cluster: &str, core: i64) {
        conn.execute(
            "INSERT INTO pangenome_features (feature_id, genome_id, cluster_id, is_core) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![feature, genome, cluster, core],
        )
        .unwrap();
    }

    fn build_index(conn: &Connection) -> ClusterIndex {
        let schema = OntologyColumns::discover(conn, "pangenome_features");
        ClusterIndex::build(conn, "user_genome", &schema).unwrap()
    }

    #[test]
    fn test_single_genome_minimal_form() {
        let conn = empty_db();
        let clusters = build_index(&conn);
        let user_clusters: BTreeSet<String> = ["c1".to_string()].into();
        let doc = build_tree(
            &conn,
            "user_genome",
            &clusters,
            &user_clusters,
            GenomeTally::default(),
        )
        .unwrap();

        assert_eq!(doc["n_genomes"], 1);
        assert_eq!(doc["genome_ids"], json!(["user_genome"]));
        assert!(doc.get("linkage").is_none());
        assert!(doc.get("leaf_order").is_none());
    }

    #[test]
    fn test_three_genome_tree() {
        let conn = empty_db();
        // ref_a shares both user clusters, ref_b shares none.
        insert_pan(&conn, "a1", "ref_a", "c1", 1);
        insert_pan(&conn, "a2", "ref_a", "c2", 0);
        insert_pan(&conn, "b1", "ref_b", "c3", 0);
        conn.execute(
            "INSERT INTO genome (genome_id, gtdb_taxonomy, completeness, ani_to_user) \
             VALUES ('ref_a', 'd__Bacteria;g__Escherichia', 99.1, 0.98)",
            [],
        )
        .unwrap();

        let clusters = build_index(&conn);
        let user_clusters: BTreeSet<String> = ["c1".to_string(), "c2".to_string()].into();
        let doc = build_tree(
            &conn,
            "user_genome",
            &clusters,
            &user_clusters,
            GenomeTally {
                n_features: 10,
                n_annotated: 5,
            },
        )
        .unwrap();

        // User genome first, references sorted after.
        assert_eq!(doc["genome_ids"], json!(["user_genome", "ref_a", "ref_b"]));
        assert_eq!(doc["n_clusters"], 3);
        assert_eq!(doc["linkage"].as_array().unwrap().len(), 2);
        // Identical cluster sets merge first: user (0) and ref_a (1).
        assert_eq!(doc["linkage"][0][0], 0);
        assert_eq!(doc["linkage"][0][1], 1);
        assert_eq!(doc["linkage"][0][2], 0.0);
        assert_eq!(doc["leaf_order"].as_array().unwrap().len(), 3);

        let genomes = &doc["genomes"];
        assert_eq!(genomes["user_genome"]["similarity"], 1.0);
        assert_eq!(genomes["ref_a"]["similarity"], 0.98);
        assert_eq!(genomes["ref_b"]["similarity"], Value::Null);
        assert_eq!(genomes["ref_a"]["taxonomy"]["g"], "Escherichia");
        assert_eq!(genomes["ref_a"]["completeness"], 99.1);
        assert_eq!(genomes["ref_b"]["completeness"], -1.0);
        // c1 is the only core cluster; user and ref_a carry it.
        assert_eq!(genomes["user_genome"]["core_pct"], 100.0);
        assert_eq!(genomes["ref_b"]["core_pct"], 0.0);
        assert_eq!(genomes["ref_b"]["missing_core"], 1);
        assert_eq!(genomes["user_genome"]["ontology_coverage"], 50.0);
    }
}
