//! Per-gene scoring and record assembly.
//!
//! For every user-genome feature this module computes annotation
//! consistency against cluster-mates, annotation specificity, pangenome
//! category, conservation, hypothetical/agreement flags, and a gene name
//! extracted from the alias string, then merges the essentiality, flux,
//! reaction, and phenotype side-tables keyed by feature id. The result is
//! one fixed 42-field array per feature, in a stable position-then-id
//! order.

use crate::database::schema::OntologyColumns;
use crate::database::Table;
use crate::error::{ExtractError, Result};
use crate::extract::clusters::{ClusterIndex, GenomeTally};
use crate::extract::reactions::GeneReactionInfo;
use crate::extract::NO_SCORE;
use crate::stats::{round4, sentinel_mean};
use itertools::Itertools;
use log::info;
use regex::Regex;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// Fallback annotation for features with no recorded function.
pub const HYPOTHETICAL: &str = "hypothetical protein";

/// Field names of the 42-field gene record, in output order.
/// This order is a public contract with the heatmap viewer.
pub const GENE_FIELDS: [&str; 42] = [
    "row",
    "feature_id",
    "contig",
    "start",
    "strand",
    "length",
    "function",
    "gene_name",
    "pan_category",
    "conservation",
    "n_clusters",
    "cluster_size",
    "n_ko",
    "n_cog",
    "n_pfam",
    "n_go",
    "n_ec",
    "localization",
    "rast_cons",
    "bakta_cons",
    "ko_cons",
    "go_cons",
    "ec_cons",
    "ec_map_cons",
    "avg_cons",
    "specificity",
    "is_hypothetical",
    "agreement",
    "essential_minimal",
    "essential_rich",
    "fitness_minimal",
    "fitness_rich",
    "flux_minimal",
    "flux_class_minimal",
    "flux_rich",
    "flux_class_rich",
    "n_reactions",
    "reaction_ids",
    "n_phenotypes",
    "phenotype_ids",
    "n_essential_reactions",
    "is_gapfilled",
];

/// Gene counts by pangenome category.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneSummary {
    pub total: usize,
    pub core: usize,
    pub accessory: usize,
    pub unknown: usize,
}

/// Output of the scoring engine: the record rows plus the user-genome
/// facts the tree builder and metadata assembly need.
#[derive(Debug)]
pub struct GeneExtract {
    pub rows: Vec<Value>,
    pub summary: GeneSummary,
    pub user_clusters: BTreeSet<String>,
    pub user_tally: GenomeTally,
    pub contigs: BTreeSet<String>,
}

/// Per-feature essentiality/fitness calls from the `gene_fitness` table.
#[derive(Debug, Clone, Default)]
struct FitnessCall {
    class_minimal: String,
    score_minimal: Option<f64>,
    class_rich: String,
    score_rich: Option<f64>,
}

/// A cluster assignment parsed from a feature's `clusters` column.
#[derive(Debug, Clone)]
struct ClusterAssignment {
    id: String,
    /// Explicit category flag: 1 accessory, 2 core; None when unset.
    flag: Option<i64>,
}

/// Scores every feature of the user genome.
///
/// Zero processable features is fatal to this pangenome's extraction;
/// all other absences degrade to sentinels.
pub fn extract_genes(
    conn: &Connection,
    user_genome: &str,
    schema: &OntologyColumns,
    clusters: &ClusterIndex,
    reactions: &HashMap<String, GeneReactionInfo>,
    phenotypes: &HashMap<String, BTreeSet<String>>,
) -> Result<GeneExtract> {
    let table = Table::query_optional(
        conn,
        "SELECT * FROM genome_features WHERE genome_id = ?1",
        &[&user_genome],
    );
    if table.is_empty() {
        return Err(ExtractError::NoFeatures(user_genome.to_string()));
    }
    let fitness = load_fitness(conn);

    // Stable row order: genomic position, then feature id.
    let mut features: Vec<_> = table.rows().collect();
    features.sort_by(|a, b| {
        let ka = (a.str_or("contig", ""), a.i64_or("start", 0), a.str_or("feature_id", ""));
        let kb = (b.str_or("contig", ""), b.i64_or("start", 0), b.str_or("feature_id", ""));
        ka.cmp(&kb)
    });

    let mut extract = GeneExtract {
        rows: Vec::with_capacity(features.len()),
        summary: GeneSummary::default(),
        user_clusters: BTreeSet::new(),
        user_tally: GenomeTally::default(),
        contigs: BTreeSet::new(),
    };

    for (idx, row) in features.iter().enumerate() {
        let feature_id = row.str_or("feature_id", "");
        if feature_id.is_empty() {
            continue;
        }
        let contig = row.str_or("contig", "");
        if !contig.is_empty() {
            extract.contigs.insert(contig.clone());
        }

        let rast = row.str("rast_function").map(str::trim).filter(|s| !s.is_empty());
        let bakta = row.str("bakta_function").map(str::trim).filter(|s| !s.is_empty());
        let function = rast.or(bakta).unwrap_or(HYPOTHETICAL).to_string();

        let assignments = parse_cluster_assignments(&row.str_or("clusters", ""));
        for assignment in &assignments {
            extract.user_clusters.insert(assignment.id.clone());
        }

        let category = pangenome_category(&assignments, clusters);
        extract.summary.total += 1;
        match category {
            2 => extract.summary.core += 1,
            1 => extract.summary.accessory += 1,
            _ => extract.summary.unknown += 1,
        }

        let conservation = assignments
            .iter()
            .map(|a| clusters.conservation(&a.id, user_genome))
            .fold(0.0, f64::max);
        let cluster_size = assignments
            .iter()
            .map(|a| clusters.size(&a.id))
            .max()
            .unwrap_or(0);

        // Ontology term fields, via the discovered column mapping.
        let term = |short: &str| -> Option<&str> {
            schema
                .column(short)
                .and_then(|col| row.str(col))
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let gene_name = extract_gene_name(&row.str_or("aliases", ""), &feature_id);

        let consistencies = [
            consistency(rast, "rast", &assignments, clusters),
            consistency(bakta, "bakta", &assignments, clusters),
            consistency(term("ko"), "ko", &assignments, clusters),
            consistency(term("go"), "go", &assignments, clusters),
            consistency(term("ec"), "ec", &assignments, clusters),
            consistency(term("ec_map"), "ec_map", &assignments, clusters),
        ];
        let avg_cons = sentinel_mean(&consistencies);

        let specificity = specificity_score(
            &function,
            &SpecificitySignals {
                has_ec: term("ec").is_some(),
                has_ko: term("ko").is_some(),
                has_gene_name: !gene_name.is_empty(),
                has_cog: term("cog").is_some(),
                has_pfam: term("pfam").is_some(),
                has_go: term("go").is_some(),
            },
            !assignments.is_empty(),
        );

        let hyp_primary = is_hypothetical_text(rast.unwrap_or(""));
        let hyp_secondary = is_hypothetical_text(bakta.unwrap_or(""));
        let is_hypothetical = hyp_primary && hyp_secondary;
        let agreement = agreement_level(rast, bakta, hyp_primary, hyp_secondary);

        if term("ko").is_some()
            || term("cog").is_some()
            || term("pfam").is_some()
            || term("go").is_some()
            || term("ec").is_some()
        {
            extract.user_tally.n_annotated += 1;
        }
        extract.user_tally.n_features += 1;

        let fitness_call = fitness.get(&feature_id).cloned().unwrap_or_default();
        let reaction_info = reactions.get(&feature_id).cloned().unwrap_or_else(|| {
            let mut info = GeneReactionInfo::default();
            info.flux_minimal = NO_SCORE;
            info.flux_rich = NO_SCORE;
            info
        });
        let phenotype_ids: Vec<&String> = phenotypes
            .get(&feature_id)
            .map(|set| set.iter().collect())
            .unwrap_or_default();

        let strand = row
            .str("strand")
            .map(str::to_string)
            .or_else(|| row.i64("strand").map(|v| v.to_string()))
            .unwrap_or_default();

        extract.rows.push(json!([
            idx,
            feature_id,
            contig,
            row.i64_or("start", 0),
            strand,
            row.i64_or("protein_length", 0),
            function,
            gene_name,
            category,
            round4(conservation),
            assignments.len(),
            cluster_size,
            count_terms(term("ko")),
            count_terms(term("cog")),
            count_terms(term("pfam")),
            count_terms(term("go")),
            count_terms(term("ec")),
            row.str_or("psortb_localization", "Unknown"),
            consistencies[0],
            consistencies[1],
            consistencies[2],
            consistencies[3],
            consistencies[4],
            consistencies[5],
            avg_cons,
            specificity,
            is_hypothetical as i64,
            agreement,
            fitness_call.class_minimal,
            fitness_call.class_rich,
            fitness_call.score_minimal.unwrap_or(NO_SCORE),
            fitness_call.score_rich.unwrap_or(NO_SCORE),
            reaction_info.flux_minimal,
            reaction_info.class_minimal,
            reaction_info.flux_rich,
            reaction_info.class_rich,
            reaction_info.reaction_ids.len(),
            reaction_info.reaction_ids.iter().join(";"),
            phenotype_ids.len(),
            phenotype_ids.iter().join(";"),
            reaction_info.n_essential,
            reaction_info.gapfilled as i64,
        ]));
    }

    if extract.rows.is_empty() {
        return Err(ExtractError::NoFeatures(user_genome.to_string()));
    }
    info!(
        "scored {} features ({} core, {} accessory, {} unknown)",
        extract.summary.total,
        extract.summary.core,
        extract.summary.accessory,
        extract.summary.unknown
    );
    Ok(extract)
}

fn load_fitness(conn: &Connection) -> HashMap<String, FitnessCall> {
    let table = Table::query_optional(conn, "SELECT * FROM gene_fitness", &[]);
    let mut calls: HashMap<String, FitnessCall> = HashMap::new();
    for row in table.rows() {
        let feature_id = row.str_or("feature_id", "");
        if feature_id.is_empty() {
            continue;
        }
        let call = calls.entry(feature_id).or_default();
        let class = row.str_or("class", "");
        let score = row.f64("score");
        match row.str_or("media", "").as_str() {
            "minimal" => {
                call.class_minimal = class;
                call.score_minimal = score;
            }
            "rich" => {
                call.class_rich = class;
                call.score_rich = score;
            }
            _ => {}
        }
    }
    calls
}

/// Parses a `clusters` column value of the form
/// `clust_001:core;clust_002:accessory;clust_003`.
fn parse_cluster_assignments(raw: &str) -> Vec<ClusterAssignment> {
    raw.split(';')
        .filter_map(|token| {
            let token = token.trim();
            if token.is_empty() {
                return None;
            }
            let (id, flag_text) = match token.split_once(':') {
                Some((id, flag)) => (id.trim(), Some(flag.trim())),
                None => (token, None),
            };
            if id.is_empty() {
                return None;
            }
            let flag = match flag_text {
                Some(f) if f.eq_ignore_ascii_case("core") || f == "2" => Some(2),
                Some(f) if f.eq_ignore_ascii_case("accessory") || f == "1" => Some(1),
                _ => None,
            };
            Some(ClusterAssignment {
                id: id.to_string(),
                flag,
            })
        })
        .collect()
}

/// Pangenome category: 0 unknown, 1 accessory, 2 core.
///
/// An explicit flag on any assignment wins; otherwise membership in an
/// independently core-flagged cluster promotes to core.
fn pangenome_category(assignments: &[ClusterAssignment], clusters: &ClusterIndex) -> i64 {
    if assignments.is_empty() {
        return 0;
    }
    if let Some(flagged) = assignments.iter().filter_map(|a| a.flag).max() {
        return flagged;
    }
    if assignments.iter().any(|a| clusters.is_core(&a.id)) {
        2
    } else {
        1
    }
}

/// Consistency of one annotation source against cluster-mate annotations.
///
/// Per cluster: exact matches / reference values present, rounded to 4
/// decimals; the maximum across assigned clusters is reported. Sentinel
/// -1 when the feature has no value or no cluster carries reference
/// values for this source.
fn consistency(
    value: Option<&str>,
    source: &str,
    assignments: &[ClusterAssignment],
    clusters: &ClusterIndex,
) -> f64 {
    let value = match value {
        Some(v) if !v.trim().is_empty() => v.trim(),
        _ => return NO_SCORE,
    };

    let mut best = NO_SCORE;
    for assignment in assignments {
        let tuples = clusters.annotations(&assignment.id);
        let reference: Vec<&str> = tuples
            .iter()
            .filter_map(|t| t.get(source))
            .map(String::as_str)
            .collect();
        if reference.is_empty() {
            continue;
        }
        let matches = reference.iter().filter(|r| **r == value).count();
        let score = round4(matches as f64 / reference.len() as f64);
        if score > best {
            best = score;
        }
    }
    best
}

/// Presence flags of the annotation signals feeding the specificity base
/// weight.
struct SpecificitySignals {
    has_ec: bool,
    has_ko: bool,
    has_gene_name: bool,
    has_cog: bool,
    has_pfam: bool,
    has_go: bool,
}

/// Words that cap specificity at 0.3: the annotation names a family or
/// domain, not a function.
const VAGUE_WORDS: &[&str] = &[
    "uncharacterized",
    "unknown function",
    "domain of unknown function",
    "duf",
];

/// Words that cap specificity at 0.5: the annotation is tentative.
const TENTATIVE_WORDS: &[&str] = &["putative", "probable", "possible", "predicted", "uncharacterised"];

/// Annotation specificity in [0, 1], or -1 for features that cannot be
/// cluster-validated.
fn specificity_score(function: &str, signals: &SpecificitySignals, clustered: bool) -> f64 {
    if !clustered {
        return NO_SCORE;
    }
    let text = function.trim().to_lowercase();
    if text.is_empty() || text == HYPOTHETICAL {
        return 0.0;
    }

    let weights = [
        (signals.has_ec, 0.9),
        (signals.has_ko, 0.7),
        (signals.has_gene_name, 0.6),
        (signals.has_cog, 0.5),
        (signals.has_pfam, 0.5),
        (signals.has_go, 0.4),
    ];
    let mut score = weights
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, w)| *w)
        .fold(f64::NAN, f64::max);
    if score.is_nan() {
        score = 0.3;
    }

    if ec_pattern().is_match(&text) {
        score = (score + 0.1).min(1.0);
    }
    if text.contains("conserved protein") && text.contains("unknown") {
        score = score.min(0.2);
    }
    if VAGUE_WORDS.iter().any(|w| text.contains(w)) {
        score = score.min(0.3);
    }
    if TENTATIVE_WORDS.iter().any(|w| text.contains(w)) {
        score = score.min(0.5);
    }
    round4(score)
}

fn ec_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\d+\.\d+\.\d+").expect("valid regex"))
}

/// True when `text` is empty, the hypothetical-protein literal, or a
/// systematic identifier followed by that literal.
pub fn is_hypothetical_text(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let systematic = RE.get_or_init(|| {
        Regex::new(r"(?i)^[a-z]+\d+(\.\d+)?:?\s+hypothetical protein$").expect("valid regex")
    });

    let text = text.trim();
    text.is_empty() || text.eq_ignore_ascii_case(HYPOTHETICAL) || systematic.is_match(text)
}

/// Agreement between the primary and secondary annotation sources:
/// 0 both hypothetical, 1 exactly one hypothetical/missing, 2 both
/// present but differing, 3 both present and identical.
fn agreement_level(
    primary: Option<&str>,
    secondary: Option<&str>,
    hyp_primary: bool,
    hyp_secondary: bool,
) -> i64 {
    match (hyp_primary, hyp_secondary) {
        (true, true) => 0,
        (true, false) | (false, true) => 1,
        (false, false) => match (primary, secondary) {
            (Some(p), Some(s)) if p.trim() == s.trim() => 3,
            _ => 2,
        },
    }
}

fn accession_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{1,3}_?\d+$").expect("valid regex"))
}

fn locus_tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]{1,4}\d{3,}$").expect("valid regex"))
}

/// Extracts a display gene name from a semicolon-delimited alias string.
///
/// Tokens equal to the feature id, carrying an internal namespace
/// (`GeneID:...`), or shaped like accessions/locus tags are discarded;
/// the first surviving candidate of length >= 3 wins, else the first
/// candidate, else the empty string.
pub fn extract_gene_name(aliases: &str, feature_id: &str) -> String {
    let candidates: Vec<&str> = aliases
        .split(';')
        .map(|token| token.trim())
        .map(|token| token.strip_prefix("alias:").unwrap_or(token).trim())
        .filter(|token| !token.is_empty())
        .filter(|token| *token != feature_id)
        .filter(|token| !token.contains(':'))
        .filter(|token| !accession_pattern().is_match(token))
        .filter(|token| !locus_tag_pattern().is_match(token))
        .collect();

    candidates
        .iter()
        .find(|c| c.len() >= 3)
        .or_else(|| candidates.first())
        .map(|c| c.to_string())
        .unwrap_or_default()
}

/// Counts non-empty semicolon-separated terms.
fn count_terms(value: Option<&str>) -> usize {
    value
        .map(|v| v.split(';').filter(|t| !t.trim().is_empty()).count())
        .unwrap_or(0)
}
