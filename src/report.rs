//! Writes extraction output documents to an output directory.

use crate::error::Result;
use crate::extract::ExtractionOutput;
use log::info;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Writes every document of one extraction into `dir`, creating the
/// directory if needed. Returns the written paths in document order.
pub fn write_documents(output: &ExtractionOutput, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(output.documents.len());
    for (name, document) in &output.documents {
        let path = dir.join(name);
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), document)?;
        info!("wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}
