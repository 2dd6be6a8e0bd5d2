//! Command-line interface: single-database and batch extraction.

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::error;
use std::path::{Path, PathBuf};

use crate::extract;
use crate::report;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract dashboard documents from one pangenome database
    Extract {
        /// Path to the pangenome SQLite database
        #[arg(short, long)]
        db: PathBuf,

        /// Pangenome identifier recorded in the output documents;
        /// defaults to the database file stem
        #[arg(short, long)]
        pangenome_id: Option<String>,

        /// Path to the output directory
        #[arg(short, long, default_value = "dashboard_data")]
        output: PathBuf,
    },

    /// Extract every pangenome database found in a directory
    Batch {
        /// Directory containing .db / .sqlite databases
        #[arg(short, long)]
        dir: PathBuf,

        /// Root output directory; each database gets its own subdirectory
        #[arg(short, long, default_value = "dashboard_data")]
        output: PathBuf,
    },
}

/// Main entry point for CLI
pub fn run_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Extract {
            db,
            pangenome_id,
            output,
        } => {
            let pangenome_id = pangenome_id.unwrap_or_else(|| file_stem(&db));
            let result = extract::extract_all(&db, &pangenome_id)
                .with_context(|| format!("extraction failed for {}", db.display()))?;
            let written = report::write_documents(&result, &output)?;
            println!(
                "Wrote {} documents for '{}' to {}",
                written.len(),
                result.user_genome,
                output.display()
            );
        }

        Commands::Batch { dir, output } => {
            let databases = find_databases(&dir)?;
            println!("Found {} databases in {}", databases.len(), dir.display());

            let failures = run_batch(&databases, &output);

            println!(
                "Processed {} databases ({} failed)",
                databases.len(),
                failures
            );
            if !databases.is_empty() && failures == databases.len() {
                anyhow::bail!("all {failures} extractions failed");
            }
        }
    }

    Ok(())
}

/// Extracts and writes each database in turn, returning the failure
/// count. A failure on one database, whether during extraction or while
/// writing its documents, is logged and never blocks the remaining
/// databases.
fn run_batch(databases: &[PathBuf], output: &Path) -> usize {
    let mut failures = 0usize;
    for (i, db) in databases.iter().enumerate() {
        let pangenome_id = file_stem(db);
        println!(
            "Processing database {}/{}: {}",
            i + 1,
            databases.len(),
            db.display()
        );
        let outcome = extract::extract_all(db, &pangenome_id)
            .and_then(|result| report::write_documents(&result, &output.join(&pangenome_id)));
        if let Err(err) = outcome {
            error!("skipping {}: {err}", db.display());
            failures += 1;
        }
    }
    failures
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pangenome".to_string())
}

/// Finds database files directly under `dir`, in sorted order.
fn find_databases(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut databases = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("cannot read directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file()
            && path
                .extension()
                .map_or(false, |ext| ext == "db" || ext == "sqlite")
        {
            databases.push(path);
        }
    }
    databases.sort();
    Ok(databases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(Path::new("/data/clade_7.db")), "clade_7");
        assert_eq!(file_stem(Path::new("clade_7.sqlite")), "clade_7");
    }

    #[test]
    fn test_batch_continues_after_write_failure() {
        let dir = TempDir::new().unwrap();
        for name in ["a.db", "b.db"] {
            let conn = rusqlite::Connection::open(dir.path().join(name)).unwrap();
            conn.execute_batch(
                "CREATE TABLE genome_features \
                   (feature_id TEXT, genome_id TEXT, contig TEXT, start INTEGER);
                 INSERT INTO genome_features VALUES ('f1', 'user_genome', 'c1', 10);",
            )
            .unwrap();
        }
        let output = TempDir::new().unwrap();
        // Occupy the first database's output slot with a plain file so
        // its document write fails.
        File::create(output.path().join("a")).unwrap();

        let databases = vec![dir.path().join("a.db"), dir.path().join("b.db")];
        let failures = run_batch(&databases, output.path());

        assert_eq!(failures, 1);
        assert!(output.path().join("b").join("genes_data.json").exists());
    }

    #[test]
    fn test_find_databases() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("b.db")).unwrap();
        File::create(dir.path().join("a.sqlite")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();
        std::fs::create_dir(dir.path().join("sub.db")).unwrap();

        let found = find_databases(dir.path()).unwrap();
        let names: Vec<String> = found.iter().map(|p| file_stem(p)).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
