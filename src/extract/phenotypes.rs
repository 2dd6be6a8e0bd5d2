//! Phenotype-accuracy matching.
//!
//! The user genome's binary growth-outcome vector is compared against
//! every reference genome's vector over a fixed, sorted reference
//! phenotype-id list. The nearest reference by Jaccard similarity donates
//! its experimental accuracy score. Ties resolve to the lowest genome id,
//! which keeps repeated extractions byte-identical.

use crate::database::{table_exists, Table};
use crate::error::Result;
use crate::extract::NO_SCORE;
use crate::stats::{jaccard_similarity, round4};
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Counts over the user genome's phenotype observations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhenotypeSummary {
    pub n_observations: usize,
    pub n_positive: usize,
    pub n_negative: usize,
}

/// The phenotype landscape entry embedded in `summary_stats.json`.
#[derive(Debug, Clone, Serialize)]
pub struct PhenotypeLandscape {
    pub user_genome: String,
    pub accuracy: f64,
    pub matched_genome: String,
    pub match_similarity: f64,
    pub n_phenotypes: usize,
    pub n_positive: usize,
}

/// Phenotype outputs plus the per-feature merge index for gene records.
#[derive(Debug)]
pub struct PhenotypeExtract {
    pub summary: PhenotypeSummary,
    pub landscape: PhenotypeLandscape,
    /// feature id -> phenotype ids linked to that feature.
    pub per_gene: HashMap<String, BTreeSet<String>>,
}

/// Matches the user genome against reference phenotype vectors.
pub fn extract_phenotypes(conn: &Connection, user_genome: &str) -> Result<PhenotypeExtract> {
    let mut extract = PhenotypeExtract {
        summary: PhenotypeSummary::default(),
        landscape: PhenotypeLandscape {
            user_genome: user_genome.to_string(),
            accuracy: NO_SCORE,
            matched_genome: String::new(),
            match_similarity: NO_SCORE,
            n_phenotypes: 0,
            n_positive: 0,
        },
        per_gene: HashMap::new(),
    };

    if !table_exists(conn, "phenotypes")? {
        info!("no phenotypes table; phenotype landscape left at sentinels");
        return Ok(extract);
    }

    let table = Table::query_optional(conn, "SELECT * FROM phenotypes", &[]);

    let mut user_positive: HashSet<String> = HashSet::new();
    let mut user_accuracies: Vec<f64> = Vec::new();
    // Reference genome -> positive phenotype ids, iterated in id order.
    let mut ref_positive: BTreeMap<String, HashSet<String>> = BTreeMap::new();
    let mut ref_accuracies: HashMap<String, Vec<f64>> = HashMap::new();
    let mut reference_ids: BTreeSet<String> = BTreeSet::new();

    for row in table.rows() {
        let genome_id = row.str_or("genome_id", "");
        let phenotype_id = row.str_or("phenotype_id", "");
        if genome_id.is_empty() || phenotype_id.is_empty() {
            continue;
        }
        let positive = row
            .str("growth_class")
            .map_or(false, |c| c.trim().eq_ignore_ascii_case("positive"));

        if genome_id == user_genome {
            extract.summary.n_observations += 1;
            if positive {
                extract.summary.n_positive += 1;
                user_positive.insert(phenotype_id.clone());
            } else {
                extract.summary.n_negative += 1;
            }
            if let Some(accuracy) = row.f64("accuracy") {
                user_accuracies.push(accuracy);
            }
            if let Some(feature_id) = row.str("feature_id") {
                if !feature_id.trim().is_empty() {
                    extract
                        .per_gene
                        .entry(feature_id.trim().to_string())
                        .or_default()
                        .insert(phenotype_id.clone());
                }
            }
        } else {
            reference_ids.insert(phenotype_id.clone());
            let positives = ref_positive.entry(genome_id.clone()).or_default();
            if positive {
                positives.insert(phenotype_id);
            }
            if let Some(accuracy) = row.f64("accuracy") {
                ref_accuracies.entry(genome_id).or_default().push(accuracy);
            }
        }
    }

    extract.landscape.n_phenotypes = reference_ids.len();

    // Vector positions are the fixed reference phenotype-id list; user
    // calls for phenotypes outside that list carry no comparison signal.
    let user_vector: HashSet<String> = user_positive
        .iter()
        .filter(|p| reference_ids.contains(*p))
        .cloned()
        .collect();
    extract.landscape.n_positive = user_positive.len();

    if ref_positive.is_empty() {
        // No reference dataset: fall back to accuracy values already
        // recorded on the user's own observations.
        if !user_accuracies.is_empty() {
            extract.landscape.accuracy =
                round4(user_accuracies.iter().sum::<f64>() / user_accuracies.len() as f64);
        }
        return Ok(extract);
    }

    let genome_accuracy = load_genome_accuracies(conn);

    let mut best: Option<(&String, f64)> = None;
    for (genome_id, positives) in &ref_positive {
        let similarity = jaccard_similarity(&user_vector, positives);
        // Strict > keeps the incumbent, so ties resolve to the lowest id.
        if best.map_or(true, |(_, s)| similarity > s) {
            best = Some((genome_id, similarity));
        }
    }

    if let Some((matched, similarity)) = best {
        extract.landscape.matched_genome = matched.clone();
        extract.landscape.match_similarity = round4(similarity);
        extract.landscape.accuracy = genome_accuracy
            .get(matched)
            .copied()
            .or_else(|| {
                ref_accuracies
                    .get(matched)
                    .map(|values| round4(values.iter().sum::<f64>() / values.len() as f64))
            })
            .unwrap_or(NO_SCORE);
        info!(
            "phenotype match: {} (similarity {})",
            extract.landscape.matched_genome, extract.landscape.match_similarity
        );
    }

    Ok(extract)
}

/// Precomputed experimental accuracy per genome, from the genome table.
fn load_genome_accuracies(conn: &Connection) -> HashMap<String, f64> {
    let table = Table::query_optional(conn, "SELECT * FROM genome", &[]);
    let mut accuracies = HashMap::new();
    for row in table.rows() {
        if let (Some(genome_id), Some(accuracy)) =
            (row.str("genome_id"), row.f64("phenotype_accuracy"))
        {
            accuracies.insert(genome_id.to_string(), accuracy);
        }
    }
    accuracies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testutil::empty_db;
    use approx::assert_relative_eq;
    use rusqlite::Connection;

    fn insert_phenotype(conn: &Connection, genome: &str, phenotype: &str, growth: &str) {
        conn.execute(
            "INSERT INTO phenotypes (genome_id, phenotype_id, growth_class) VALUES (?1, ?2, ?3)",
            rusqlite::params![genome, phenotype, growth],
        )
        .unwrap();
    }

    #[test]
    fn test_missing_table_sentinels() {
        let conn = Connection::open_in_memory().unwrap();
        let extract = extract_phenotypes(&conn, "user_genome").unwrap();
        assert_relative_eq!(extract.landscape.accuracy, NO_SCORE);
        assert_relative_eq!(extract.landscape.match_similarity, NO_SCORE);
        assert_eq!(extract.landscape.matched_genome, "");
        assert_eq!(extract.summary.n_observations, 0);
    }

    #[test]
    fn test_nearest_reference_wins() {
        let conn = empty_db();
        insert_phenotype(&conn, "user_genome", "pm1", "positive");
        insert_phenotype(&conn, "user_genome", "pm2", "positive");
        insert_phenotype(&conn, "user_genome", "pm3", "negative");
        // ref_a shares both positives; ref_b shares one of two.
        insert_phenotype(&conn, "ref_a", "pm1", "positive");
        insert_phenotype(&conn, "ref_a", "pm2", "positive");
        insert_phenotype(&conn, "ref_a", "pm3", "negative");
        insert_phenotype(&conn, "ref_b", "pm1", "positive");
        insert_phenotype(&conn, "ref_b", "pm2", "negative");
        insert_phenotype(&conn, "ref_b", "pm4", "positive");
        conn.execute(
            "INSERT INTO genome (genome_id, phenotype_accuracy) VALUES ('ref_a', 0.87)",
            [],
        )
        .unwrap();

        let extract = extract_phenotypes(&conn, "user_genome").unwrap();
        assert_eq!(extract.landscape.matched_genome, "ref_a");
        assert_relative_eq!(extract.landscape.match_similarity, 1.0);
        assert_relative_eq!(extract.landscape.accuracy, 0.87);
        assert_eq!(extract.landscape.n_phenotypes, 4);
        assert_eq!(extract.summary.n_positive, 2);
        assert_eq!(extract.summary.n_negative, 1);
    }

    #[test]
    fn test_tie_breaks_to_lowest_genome_id() {
        let conn = empty_db();
        insert_phenotype(&conn, "user_genome", "pm1", "positive");
        insert_phenotype(&conn, "ref_b", "pm1", "positive");
        insert_phenotype(&conn, "ref_a", "pm1", "positive");

        let extract = extract_phenotypes(&conn, "user_genome").unwrap();
        assert_eq!(extract.landscape.matched_genome, "ref_a");
        assert_relative_eq!(extract.landscape.match_similarity, 1.0);
    }

    #[test]
    fn test_fallback_to_observation_accuracy() {
        let conn = empty_db();
        conn.execute(
            "INSERT INTO phenotypes (genome_id, phenotype_id, growth_class, accuracy) \
             VALUES ('user_genome', 'pm1', 'positive', 0.9), \
                    ('user_genome', 'pm2', 'negative', 0.7)",
            [],
        )
        .unwrap();

        let extract = extract_phenotypes(&conn, "user_genome").unwrap();
        assert_eq!(extract.landscape.matched_genome, "");
        assert_relative_eq!(extract.landscape.accuracy, 0.8);
    }

    #[test]
    fn test_per_gene_links() {
        let conn = empty_db();
        conn.execute(
            "INSERT INTO phenotypes (genome_id, phenotype_id, feature_id, growth_class) \
             VALUES ('user_genome', 'pm1', 'b0001', 'positive')",
            [],
        )
        .unwrap();
        let extract = extract_phenotypes(&conn, "user_genome").unwrap();
        assert!(extract.per_gene["b0001"].contains("pm1"));
    }
}
