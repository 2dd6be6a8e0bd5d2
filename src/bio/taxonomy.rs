//! Taxonomic classification utilities.
//!
//! This module provides structures and functions for working with
//! rank-prefixed taxonomy strings (GTDB style, `d__Bacteria;p__...`)
//! and for deriving an organism display name for a genome.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Taxonomic classification levels, in hierarchical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxonomicRank {
    Domain,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl TaxonomicRank {
    /// Returns the single-letter rank code used in lineage strings and
    /// in the tree document's taxonomy maps.
    pub fn code(&self) -> &'static str {
        match self {
            TaxonomicRank::Domain => "d",
            TaxonomicRank::Phylum => "p",
            TaxonomicRank::Class => "c",
            TaxonomicRank::Order => "o",
            TaxonomicRank::Family => "f",
            TaxonomicRank::Genus => "g",
            TaxonomicRank::Species => "s",
        }
    }

    /// Returns all ranks in hierarchical order, domain first.
    pub fn all_ranks() -> [TaxonomicRank; 7] {
        [
            TaxonomicRank::Domain,
            TaxonomicRank::Phylum,
            TaxonomicRank::Class,
            TaxonomicRank::Order,
            TaxonomicRank::Family,
            TaxonomicRank::Genus,
            TaxonomicRank::Species,
        ]
    }
}

/// Parses a rank-prefixed lineage string into a code -> name map.
///
/// Accepts GTDB-style prefixes (`d__Bacteria`); tokens without a
/// recognized prefix are assigned positionally, domain first, so plain
/// `Bacteria; Pseudomonadota; ...` strings also parse. Empty rank
/// payloads (a bare `s__`) are skipped. Insertion order of the returned
/// map follows hierarchical rank order.
pub fn parse_lineage(lineage: &str) -> IndexMap<String, String> {
    let ranks = TaxonomicRank::all_ranks();
    let mut by_rank: IndexMap<String, String> = IndexMap::new();

    for (i, raw) in lineage.split(';').enumerate() {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        let prefixed = ranks.iter().find_map(|r| {
            token
                .strip_prefix(r.code())
                .and_then(|rest| rest.strip_prefix("__"))
                .map(|name| (*r, name.trim()))
        });
        match prefixed {
            Some((rank, name)) => {
                if !name.is_empty() {
                    by_rank.insert(rank.code().to_string(), name.to_string());
                }
            }
            None => {
                if i < ranks.len() {
                    by_rank.insert(ranks[i].code().to_string(), token.to_string());
                }
            }
        }
    }

    // Re-emit in hierarchical order regardless of input order.
    let mut ordered = IndexMap::new();
    for rank in ranks {
        if let Some(name) = by_rank.get(rank.code()) {
            ordered.insert(rank.code().to_string(), name.clone());
        }
    }
    ordered
}

/// Genome-id suffixes stripped when falling back to id-derived names.
const ID_SUFFIXES: &[&str] = &[".RAST", ".fna", ".fa", ".assembly", "_genome"];

/// Derives an organism display name.
///
/// Prefers the deepest named rank of `taxonomy`; falls back to the genome
/// id with known annotation/assembly suffixes stripped.
pub fn organism_name(taxonomy: &str, genome_id: &str) -> String {
    let lineage = parse_lineage(taxonomy);
    for rank in TaxonomicRank::all_ranks().iter().rev() {
        if let Some(name) = lineage.get(rank.code()) {
            return name.clone();
        }
    }

    let mut name = genome_id.to_string();
    for suffix in ID_SUFFIXES {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped.to_string();
        }
    }
    name
}
