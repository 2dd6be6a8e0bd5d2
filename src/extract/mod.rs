//! Extraction pipeline: one pangenome database in, seven JSON documents out.
//!
//! The orchestrator here is the only entry point the outer service layer
//! calls. It sequences the component modules (schema discovery, cluster
//! aggregation, reaction and phenotype side-table aggregation, per-gene
//! scoring, tree construction) and assembles the document map consumed
//! by the heatmap viewer.

pub mod clusters;
pub mod genes;
pub mod phenotypes;
pub mod reactions;
pub mod tree;

use crate::bio::taxonomy::organism_name;
use crate::database::schema::OntologyColumns;
use crate::database::{detect_user_genome, open_readonly, Table};
use crate::error::Result;
use clusters::ClusterIndex;
use genes::GeneExtract;
use indexmap::IndexMap;
use log::info;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::Path;

/// Sentinel for numeric fields that could not be computed. 0 is a valid
/// score and the empty string is the sentinel for class/text fields;
/// downstream consumers rely on these conventions exactly.
pub const NO_SCORE: f64 = -1.0;

/// File names of the output documents, in assembly order.
pub const DOCUMENT_NAMES: [&str; 7] = [
    "genes_data.json",
    "metadata.json",
    "tree_data.json",
    "reactions_data.json",
    "summary_stats.json",
    "ref_genomes_data.json",
    "clusters_data.json",
];

/// The result of one extraction run: all derived state is local to this
/// value, nothing is cached across calls.
#[derive(Debug)]
pub struct ExtractionOutput {
    pub pangenome_id: String,
    pub user_genome: String,
    /// Document name -> JSON document, keyed by [`DOCUMENT_NAMES`].
    pub documents: IndexMap<String, Value>,
}

/// Runs the full extraction for one pangenome database.
///
/// Missing optional tables degrade to empty/sentinel structures inside
/// the individual components; the only fatal conditions are an
/// undeterminable user genome and a feature table with no rows for it.
pub fn extract_all(db_path: &Path, pangenome_id: &str) -> Result<ExtractionOutput> {
    info!("extracting pangenome '{pangenome_id}' from {}", db_path.display());
    let conn = open_readonly(db_path)?;
    let user_genome = detect_user_genome(&conn)?;

    let feature_schema = OntologyColumns::discover(&conn, "genome_features");
    let pangenome_schema = OntologyColumns::discover(&conn, "pangenome_features");

    let clusters = ClusterIndex::build(&conn, &user_genome, &pangenome_schema)?;
    let reactions = reactions::extract_reactions(&conn, &user_genome)?;
    let phenotypes = phenotypes::extract_phenotypes(&conn, &user_genome)?;
    let genes = genes::extract_genes(
        &conn,
        &user_genome,
        &feature_schema,
        &clusters,
        &reactions.per_gene,
        &phenotypes.per_gene,
    )?;
    let tree = tree::build_tree(
        &conn,
        &user_genome,
        &clusters,
        &genes.user_clusters,
        genes.user_tally,
    )?;

    let metadata = build_metadata(&conn, &user_genome, pangenome_id, &genes, &clusters);
    let summary = json!({
        "genes": {
            "total": genes.summary.total,
            "core": genes.summary.core,
            "accessory": genes.summary.accessory,
            "unknown": genes.summary.unknown,
        },
        "phenotypes": phenotypes.summary,
        "phenotype_landscape": phenotypes.landscape,
        "reactions": reactions.doc.stats.clone(),
        "comparison": {
            "n_ref_genomes": clusters.ref_genomes().len(),
            "n_clusters": clusters.n_clusters(),
            "n_core_clusters": clusters.n_core_clusters(),
        },
    });
    let ref_genomes = build_ref_genomes(&conn, &user_genome);
    let cluster_embeddings = clusters::extract_cluster_embeddings(&conn)?;

    let mut documents = IndexMap::new();
    documents.insert(DOCUMENT_NAMES[0].to_string(), Value::Array(genes.rows));
    documents.insert(DOCUMENT_NAMES[1].to_string(), metadata);
    documents.insert(DOCUMENT_NAMES[2].to_string(), tree);
    documents.insert(
        DOCUMENT_NAMES[3].to_string(),
        serde_json::to_value(&reactions.doc)?,
    );
    documents.insert(DOCUMENT_NAMES[4].to_string(), summary);
    documents.insert(DOCUMENT_NAMES[5].to_string(), ref_genomes);
    documents.insert(DOCUMENT_NAMES[6].to_string(), cluster_embeddings);

    info!(
        "extraction of '{pangenome_id}' complete: user genome '{user_genome}', {} documents",
        documents.len()
    );
    Ok(ExtractionOutput {
        pangenome_id: pangenome_id.to_string(),
        user_genome,
        documents,
    })
}

/// Assembles `metadata.json` for the user genome.
fn build_metadata(
    conn: &Connection,
    user_genome: &str,
    pangenome_id: &str,
    genes: &GeneExtract,
    clusters: &ClusterIndex,
) -> Value {
    let table = Table::query_optional(
        conn,
        "SELECT * FROM genome WHERE genome_id = ?1 LIMIT 1",
        &[&user_genome],
    );
    let row = table.rows().next();

    let ncbi_taxonomy = row
        .map(|r| r.str_or("ncbi_taxonomy", ""))
        .unwrap_or_default();
    let taxonomy = row
        .and_then(|r| r.str("gtdb_taxonomy").map(str::to_string))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| ncbi_taxonomy.clone());
    let organism = row
        .and_then(|r| r.str("organism_name").map(str::to_string))
        .filter(|o| !o.trim().is_empty())
        .unwrap_or_else(|| organism_name(&taxonomy, user_genome));
    let n_contigs = row
        .and_then(|r| r.i64("n_contigs"))
        .unwrap_or(genes.contigs.len() as i64);
    let n_features = row
        .and_then(|r| r.i64("n_features"))
        .unwrap_or(genes.summary.total as i64);

    json!({
        "organism": organism,
        "genome_id": user_genome,
        "pangenome_id": pangenome_id,
        "taxonomy": taxonomy,
        "ncbi_taxonomy": ncbi_taxonomy,
        "n_contigs": n_contigs,
        "n_features": n_features,
        "n_genomes": clusters.ref_genomes().len() + 1,
        "n_clusters": clusters.n_clusters(),
    })
}

/// Assembles `ref_genomes_data.json`: one object per genome in the
/// source database, in genome-id order.
fn build_ref_genomes(conn: &Connection, user_genome: &str) -> Value {
    let table = Table::query_optional(conn, "SELECT * FROM genome ORDER BY genome_id", &[]);
    let mut entries = Vec::with_capacity(table.len());
    for row in table.rows() {
        let genome_id = row.str_or("genome_id", "");
        if genome_id.is_empty() {
            continue;
        }
        let taxonomy = row.str_or("gtdb_taxonomy", "");
        let organism = {
            let recorded = row.str_or("organism_name", "");
            if recorded.trim().is_empty() {
                organism_name(&taxonomy, &genome_id)
            } else {
                recorded
            }
        };
        entries.push(json!({
            "genome_id": genome_id,
            "organism": organism,
            "gtdb_taxonomy": taxonomy,
            "ncbi_taxonomy": row.str_or("ncbi_taxonomy", ""),
            "n_features": row.i64_or("n_features", 0),
            "assembly_size": row.i64_or("assembly_size", 0),
            "completeness": row.f64_or("completeness", NO_SCORE),
            "contamination": row.f64_or("contamination", NO_SCORE),
            "is_user": (genome_id == user_genome) as i64,
        }));
    }
    Value::Array(entries)
}
