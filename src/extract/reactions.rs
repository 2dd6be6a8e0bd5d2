//! Reaction/flux aggregation.
//!
//! Parses gene-association expressions into a gene -> reaction index,
//! computes per-reaction conservation across all reaction-bearing genomes,
//! and summarizes flux classes under the two media conditions. An absent
//! reaction table produces an empty-but-well-formed document.

use crate::database::{table_exists, Table};
use crate::error::Result;
use crate::extract::NO_SCORE;
use crate::stats::round4;
use indexmap::IndexMap;
use log::info;
use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

/// One reaction of the user genome's model.
#[derive(Debug, Clone, Serialize)]
pub struct ReactionEntry {
    pub name: String,
    pub equation: String,
    pub genes: Vec<String>,
    pub flux_minimal: f64,
    pub class_minimal: String,
    pub flux_rich: f64,
    pub class_rich: String,
    pub is_gapfilled: i64,
    pub conservation: f64,
}

/// The `reactions_data.json` document.
#[derive(Debug, Serialize)]
pub struct ReactionsDoc {
    pub user_genome: String,
    pub n_genomes: usize,
    pub reactions: IndexMap<String, ReactionEntry>,
    pub gene_index: IndexMap<String, Vec<usize>>,
    pub stats: IndexMap<String, i64>,
}

/// Per-feature reaction facts merged into the gene records.
#[derive(Debug, Clone, Default)]
pub struct GeneReactionInfo {
    pub reaction_ids: BTreeSet<String>,
    pub n_essential: usize,
    pub gapfilled: bool,
    pub flux_minimal: f64,
    pub class_minimal: String,
    pub flux_rich: f64,
    pub class_rich: String,
}

impl GeneReactionInfo {
    fn new() -> Self {
        GeneReactionInfo {
            flux_minimal: NO_SCORE,
            flux_rich: NO_SCORE,
            ..Default::default()
        }
    }
}

/// Aggregated reaction output: the serializable document plus the
/// per-gene merge index consumed by the gene scoring engine.
#[derive(Debug)]
pub struct ReactionExtract {
    pub doc: ReactionsDoc,
    pub per_gene: HashMap<String, GeneReactionInfo>,
}

/// Aggregates the `model_reactions` table for one user genome.
pub fn extract_reactions(conn: &Connection, user_genome: &str) -> Result<ReactionExtract> {
    let mut doc = ReactionsDoc {
        user_genome: user_genome.to_string(),
        n_genomes: 0,
        reactions: IndexMap::new(),
        gene_index: IndexMap::new(),
        stats: IndexMap::new(),
    };
    let mut per_gene: HashMap<String, GeneReactionInfo> = HashMap::new();

    if !table_exists(conn, "model_reactions")? {
        info!("no model_reactions table; reactions document left empty");
        return Ok(ReactionExtract { doc, per_gene });
    }

    let table = Table::query_optional(conn, "SELECT * FROM model_reactions", &[]);

    // Conservation denominators: which genomes have any reaction data,
    // and which genomes carry each reaction id.
    let mut genomes_with_reactions: HashSet<String> = HashSet::new();
    let mut reaction_genomes: HashMap<String, HashSet<String>> = HashMap::new();
    // User rows keyed by reaction id; sorted so output order is stable.
    let mut user_rows: BTreeMap<String, UserReaction> = BTreeMap::new();

    for row in table.rows() {
        let genome_id = row.str_or("genome_id", "");
        let reaction_id = row.str_or("reaction_id", "");
        if genome_id.is_empty() || reaction_id.is_empty() {
            continue;
        }
        genomes_with_reactions.insert(genome_id.clone());
        reaction_genomes
            .entry(reaction_id.clone())
            .or_default()
            .insert(genome_id.clone());

        if genome_id == user_genome {
            user_rows.insert(
                reaction_id,
                UserReaction {
                    name: row.str_or("name", ""),
                    equation: row.str_or("equation", ""),
                    gene_association: row.str_or("gene_association", ""),
                    flux_minimal: row.f64("flux_minimal"),
                    class_minimal: row.str_or("class_minimal", ""),
                    flux_rich: row.f64("flux_rich"),
                    class_rich: row.str_or("class_rich", ""),
                    is_gapfilled: row.i64_or("is_gapfilled", 0),
                },
            );
        }
    }

    doc.n_genomes = genomes_with_reactions.len();

    let mut stats = MediaStats::default();
    for (idx, (reaction_id, raw)) in user_rows.iter().enumerate() {
        let genes = parse_gene_association(&raw.gene_association);
        let n_containing = reaction_genomes
            .get(reaction_id)
            .map(HashSet::len)
            .unwrap_or(0);
        let conservation = if doc.n_genomes == 0 {
            0.0
        } else {
            round4(n_containing as f64 / doc.n_genomes as f64)
        };

        stats.record(&raw.class_minimal, &raw.class_rich, raw.is_gapfilled);

        let entry = ReactionEntry {
            name: raw.name.clone(),
            equation: raw.equation.clone(),
            genes: genes.iter().cloned().collect(),
            flux_minimal: raw.flux_minimal.unwrap_or(NO_SCORE),
            class_minimal: raw.class_minimal.clone(),
            flux_rich: raw.flux_rich.unwrap_or(NO_SCORE),
            class_rich: raw.class_rich.clone(),
            is_gapfilled: raw.is_gapfilled,
            conservation,
        };

        let essential = is_essential(&raw.class_minimal) || is_essential(&raw.class_rich);
        for gene in &genes {
            doc.gene_index.entry(gene.clone()).or_default().push(idx);

            let info = per_gene
                .entry(gene.clone())
                .or_insert_with(GeneReactionInfo::new);
            info.reaction_ids.insert(reaction_id.clone());
            if essential {
                info.n_essential += 1;
            }
            if raw.is_gapfilled != 0 {
                info.gapfilled = true;
            }
            merge_flux(
                &mut info.flux_minimal,
                &mut info.class_minimal,
                raw.flux_minimal,
                &raw.class_minimal,
            );
            merge_flux(
                &mut info.flux_rich,
                &mut info.class_rich,
                raw.flux_rich,
                &raw.class_rich,
            );
        }

        doc.reactions.insert(reaction_id.clone(), entry);
    }

    if !user_rows.is_empty() {
        doc.stats = stats.into_map(user_rows.len());
    }
    doc.gene_index.sort_keys();

    info!(
        "reactions: {} user reactions across {} reaction-bearing genomes",
        doc.reactions.len(),
        doc.n_genomes
    );
    Ok(ReactionExtract { doc, per_gene })
}

struct UserReaction {
    name: String,
    equation: String,
    gene_association: String,
    flux_minimal: Option<f64>,
    class_minimal: String,
    flux_rich: Option<f64>,
    class_rich: String,
    is_gapfilled: i64,
}

/// Per-media summary counters.
#[derive(Default)]
struct MediaStats {
    active_minimal: i64,
    blocked_minimal: i64,
    essential_minimal: i64,
    active_rich: i64,
    blocked_rich: i64,
    essential_rich: i64,
    gapfilled: i64,
}

impl MediaStats {
    fn record(&mut self, class_minimal: &str, class_rich: &str, is_gapfilled: i64) {
        tally_media(
            class_minimal,
            &mut self.active_minimal,
            &mut self.blocked_minimal,
            &mut self.essential_minimal,
        );
        tally_media(
            class_rich,
            &mut self.active_rich,
            &mut self.blocked_rich,
            &mut self.essential_rich,
        );
        if is_gapfilled != 0 {
            self.gapfilled += 1;
        }
    }

    fn into_map(self, total: usize) -> IndexMap<String, i64> {
        let mut map = IndexMap::new();
        map.insert("total".to_string(), total as i64);
        map.insert("active_minimal".to_string(), self.active_minimal);
        map.insert("blocked_minimal".to_string(), self.blocked_minimal);
        map.insert("essential_minimal".to_string(), self.essential_minimal);
        map.insert("active_rich".to_string(), self.active_rich);
        map.insert("blocked_rich".to_string(), self.blocked_rich);
        map.insert("essential_rich".to_string(), self.essential_rich);
        map.insert("gapfilled".to_string(), self.gapfilled);
        map
    }
}

fn tally_media(class: &str, active: &mut i64, blocked: &mut i64, essential: &mut i64) {
    let class = class.trim();
    if class.is_empty() {
        return;
    }
    if class.eq_ignore_ascii_case("blocked") {
        *blocked += 1;
    } else {
        *active += 1;
    }
    if is_essential(class) {
        *essential += 1;
    }
}

fn is_essential(class: &str) -> bool {
    class.to_ascii_lowercase().contains("essential")
}

/// Keeps the flux value with the largest magnitude for a gene that maps
/// to several reactions, along with its qualitative class.
fn merge_flux(flux: &mut f64, class: &mut String, candidate: Option<f64>, candidate_class: &str) {
    if let Some(value) = candidate {
        if *flux == NO_SCORE || value.abs() > flux.abs() {
            *flux = value;
            *class = candidate_class.to_string();
        }
    } else if class.is_empty() && !candidate_class.is_empty() && *flux == NO_SCORE {
        *class = candidate_class.to_string();
    }
}

/// Tokenizes a boolean gene-association expression into gene identifiers.
///
/// Identifier-like substrings are kept; boolean operator tokens are
/// discarded. Parenthesization is irrelevant to the index, so it is not
/// parsed.
pub fn parse_gene_association(expression: &str) -> BTreeSet<String> {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token =
        TOKEN.get_or_init(|| Regex::new(r"[A-Za-z0-9][A-Za-z0-9_.|-]*").expect("valid regex"));

    token
        .find_iter(expression)
        .map(|m| m.as_str())
        .filter(|t| {
            !t.eq_ignore_ascii_case("and")
                && !t.eq_ignore_ascii_case("or")
                && !t.eq_ignore_ascii_case("not")
                && !t.eq_ignore_ascii_case("unknown")
        })
        .map(str::to_string)
        .collect()
}
