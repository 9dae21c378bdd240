//! `text2sparql index …`

use crate::{embedder_from_env, open_index};
use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use text2sparql_rag::corpus::load_corpus;
use text2sparql_rag::embeddings_file::{read_embeddings_file, write_embeddings_file};
use text2sparql_rag::{datasets_info, EmbeddingsFileV1, RetrievalIndex, RetrievalQuery};

#[derive(Subcommand)]
pub enum IndexCommands {
    /// Embed a corpus and write an embeddings file.
    Build {
        #[arg(long = "corpus", required = true)]
        corpus: Vec<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },

    /// Per-dataset exemplar counts, plus the header of an embeddings file.
    Info {
        #[arg(long = "corpus")]
        corpus: Vec<PathBuf>,
        #[arg(long)]
        embeddings: Option<PathBuf>,
    },

    /// Rank exemplars against a text.
    Search {
        text: String,
        #[arg(long = "corpus", required = true)]
        corpus: Vec<PathBuf>,
        #[arg(long)]
        embeddings: Option<PathBuf>,
        #[arg(long, default_value_t = 3)]
        top_k: usize,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        dataset: Option<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(command: IndexCommands) -> Result<()> {
    match command {
        IndexCommands::Build { corpus, out } => {
            let exemplars = load_corpus(&corpus)?;
            let index = RetrievalIndex::build(exemplars, embedder_from_env()?).await?;
            write_embeddings_file(&out, &EmbeddingsFileV1::from_index(&index))?;
            eprintln!(
                "{} {} ({} exemplars, dim {})",
                "wrote".green().bold(),
                out.display().to_string().bold(),
                index.len(),
                index.dim()
            );
        }
        IndexCommands::Info { corpus, embeddings } => {
            if corpus.is_empty() && embeddings.is_none() {
                return Err(anyhow!("give at least one `--corpus` or an `--embeddings` file"));
            }
            if !corpus.is_empty() {
                let exemplars = load_corpus(&corpus)?;
                for (tag, info) in datasets_info(&exemplars) {
                    println!("{:<10} {:>6}  {}", tag.bold(), info.size, info.description);
                }
            }
            if let Some(path) = embeddings {
                let file = read_embeddings_file(&path)?;
                let created = Utc
                    .timestamp_opt(file.created_at_unix_secs as i64, 0)
                    .single()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| file.created_at_unix_secs.to_string());
                println!("{}", path.display().to_string().bold());
                println!("  version  {}", file.version);
                println!("  backend  {} ({})", file.backend, file.model);
                println!("  rows     {} x {}", file.rows.len(), file.dim);
                println!("  created  {created}");
            }
        }
        IndexCommands::Search {
            text,
            corpus,
            embeddings,
            top_k,
            threshold,
            dataset,
            language,
            json,
        } => {
            let index = open_index(&corpus, embeddings.as_deref()).await?;
            let mut query = RetrievalQuery::new(text).top_k(top_k);
            if let Some(t) = threshold {
                query = query.threshold(t);
            }
            if let Some(d) = dataset {
                query = query.dataset(d);
            }
            if let Some(l) = language {
                query = query.language(l);
            }
            let results = index.retrieve(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("{}", "no exemplars matched".yellow());
            } else {
                for (rank, r) in results.iter().enumerate() {
                    println!(
                        "{:>2}. [{:.4}] {} {}",
                        rank + 1,
                        r.score,
                        r.exemplar.dataset.dimmed(),
                        r.exemplar.question.bold()
                    );
                    if !r.exemplar.query.is_empty() {
                        println!("    {}", r.exemplar.query);
                    }
                }
            }
        }
    }
    Ok(())
}
