//! Text2SPARQL CLI
//!
//! - `ask`: run the full question → SPARQL pipeline
//! - `index`: build, inspect and search the exemplar retrieval index
//! - `validate`: execute one query against the configured endpoint
//!
//! Logs go to stderr (`RUST_LOG`, default `text2sparql=info`); stdout carries
//! only results.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use text2sparql_llm::{EmbedConfig, Embedder, LlmConfig, LlmProvider, UnifiedClient};
use text2sparql_pipeline::{
    HttpSparqlEndpoint, Pipeline, PipelineConfig, QueryValidator, ValidationOutcome,
};
use text2sparql_rag::{corpus::load_corpus, embeddings_file::load_or_build, RetrievalIndex};

mod index;
mod output;

#[derive(Parser)]
#[command(name = "text2sparql")]
#[command(
    author,
    version,
    about = "Text2SPARQL: natural-language questions to validated SPARQL"
)]
struct Cli {
    /// Pipeline configuration JSON. Without it, defaults plus `TEXT2SPARQL_*`
    /// environment overrides are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a question into a validated SPARQL query.
    Ask {
        question: String,
        /// Repair budget; overrides the configured `max_retries`.
        #[arg(long)]
        max_retries: Option<usize>,
        /// Exemplar corpus file (QALD or LC-QuAD JSON). Repeatable.
        #[arg(long = "corpus")]
        corpus: Vec<PathBuf>,
        /// Embeddings file; reused when current, rebuilt otherwise.
        #[arg(long)]
        embeddings: Option<PathBuf>,
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Exemplar retrieval index.
    Index {
        #[command(subcommand)]
        command: index::IndexCommands,
    },

    /// Execute one query and report whether it validates.
    Validate {
        /// File holding the SPARQL query.
        query_file: PathBuf,
    },
}

const EXIT_PIPELINE_ERROR: u8 = 2;

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    let succeeded = rt.block_on(async move {
        match cli.command {
            Commands::Ask {
                question,
                max_retries,
                corpus,
                embeddings,
                json,
            } => {
                cmd_ask(
                    cli.config.as_deref(),
                    &question,
                    max_retries,
                    &corpus,
                    embeddings.as_deref(),
                    json,
                )
                .await
            }
            Commands::Index { command } => index::run(command).await.map(|()| true),
            Commands::Validate { query_file } => {
                cmd_validate(cli.config.as_deref(), &query_file).await
            }
        }
    })?;

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PIPELINE_ERROR)
    })
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "text2sparql=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn pipeline_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(p) => PipelineConfig::from_json_file(p)?,
        None => PipelineConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

pub(crate) fn embedder_from_env() -> Result<Arc<dyn Embedder>> {
    Ok(EmbedConfig::from_env()?.build()?)
}

/// Index over the given corpus files; an empty corpus yields an empty index.
pub(crate) async fn open_index(
    corpus: &[PathBuf],
    embeddings: Option<&Path>,
) -> Result<RetrievalIndex> {
    let exemplars = load_corpus(corpus)?;
    let embedder = embedder_from_env()?;
    let index = match embeddings {
        Some(path) => load_or_build(path, exemplars, embedder).await?,
        None => RetrievalIndex::build(exemplars, embedder).await?,
    };
    Ok(index)
}

async fn cmd_ask(
    config_path: Option<&Path>,
    question: &str,
    max_retries: Option<usize>,
    corpus: &[PathBuf],
    embeddings: Option<&Path>,
    json: bool,
) -> Result<bool> {
    let config = pipeline_config(config_path)?;
    let llm: Arc<dyn LlmProvider> = Arc::new(
        UnifiedClient::from_config(LlmConfig::from_env()?).context("creating LLM client")?,
    );
    let index = Arc::new(open_index(corpus, embeddings).await?);
    if index.is_empty() {
        eprintln!(
            "{} no exemplar corpus given, generating without few-shot context",
            "info:".yellow().bold()
        );
    }

    let retries = max_retries.unwrap_or(config.max_retries);
    let pipeline = Pipeline::from_config(config, llm, index)?;
    let result = pipeline.execute(question, retries).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", output::render_result(&result));
    }
    Ok(result.is_success())
}

async fn cmd_validate(config_path: Option<&Path>, query_file: &Path) -> Result<bool> {
    let config = pipeline_config(config_path)?;
    let query = std::fs::read_to_string(query_file)
        .with_context(|| format!("reading {}", query_file.display()))?;
    let endpoint = HttpSparqlEndpoint::new(&config.endpoint_url, config.call_timeout())?;
    let validator = QueryValidator::new(Arc::new(endpoint), config.call_timeout());

    match validator.validate(query.trim()).await {
        ValidationOutcome::Valid => {
            println!("{} query returned results", "valid".green().bold());
            Ok(true)
        }
        ValidationOutcome::Invalid { diagnostic } => {
            println!("{} {}", "invalid".red().bold(), diagnostic);
            Ok(false)
        }
    }
}
