//! Biological domain utilities.
//!
//! Currently limited to taxonomy handling: parsing rank-prefixed lineage
//! strings and deriving display names for genomes.

pub mod taxonomy;
