use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use security_kb_core::{
    DocumentType, KnowledgeConfig, KnowledgeOrchestrator, RetrievalOutcome,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "security-kb", version)]
struct Cli {
    /// Folder containing the methodology documents (*.txt, recursive).
    #[arg(long, default_value = "docs")]
    docs_dir: PathBuf,

    /// Folder holding the persisted vector index.
    #[arg(long, default_value = "vectorstore")]
    persist_dir: PathBuf,

    /// Collection name inside the persist folder.
    #[arg(long, default_value = "security_knowledge")]
    collection: String,

    /// Embedding provider credential.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build or refresh the vector index from the document folder.
    Index {
        /// Discard the existing snapshot and rebuild from scratch.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Query the knowledge base and print ranked context.
    Search {
        /// Search query.
        #[arg(long)]
        query: String,
        /// Maximum number of context chunks to return.
        #[arg(long, default_value = "5")]
        max_chunks: usize,
        /// Restrict results to document types (repeatable).
        #[arg(long = "document-type")]
        document_types: Vec<String>,
        /// Print the delimited knowledge block instead of per-hit lines.
        #[arg(long, default_value_t = false)]
        prompt_format: bool,
    },
    /// Search scoped to one methodology (MAGERIT, OCTAVE, ISO27001, NIST).
    Methodology {
        /// Search query.
        #[arg(long)]
        query: String,
        /// Methodology name.
        #[arg(long)]
        name: String,
        /// Maximum number of results.
        #[arg(long, default_value = "5")]
        max_results: usize,
    },
    /// Check component health and run a live probe query.
    Health,
    /// Print merged knowledge-base statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = KnowledgeConfig::default().with_dirs(&cli.docs_dir, &cli.persist_dir);
    config.collection = cli.collection.clone();
    config.api_key = cli.api_key.clone();

    let orchestrator = KnowledgeOrchestrator::new(config);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        docs_dir = %cli.docs_dir.display(),
        "security-kb boot"
    );

    match cli.command {
        Command::Index { force } => {
            if force {
                orchestrator.reinitialize(true).await?;
            } else {
                orchestrator.initialize().await?;
            }

            let stats = orchestrator.get_stats().await;
            println!(
                "{} records in collection {} ({} documents loaded, {} chunks created)",
                stats.index.record_count,
                stats.index.collection,
                stats.orchestrator.documents_loaded,
                stats.orchestrator.chunks_created
            );
        }
        Command::Search {
            query,
            max_chunks,
            document_types,
            prompt_format,
        } => {
            orchestrator.initialize().await?;

            let parsed_types = parse_document_types(&document_types)?;
            let filter = (!parsed_types.is_empty()).then_some(parsed_types.as_slice());

            let outcome = orchestrator
                .search_relevant_context(&query, max_chunks, filter)
                .await?;
            print_outcome(&orchestrator, outcome, prompt_format);
        }
        Command::Methodology {
            query,
            name,
            max_results,
        } => {
            orchestrator.initialize().await?;

            let outcome = orchestrator
                .search_by_methodology(&query, &name, max_results)
                .await?;
            print_outcome(&orchestrator, outcome, false);
        }
        Command::Health => {
            if let Err(error) = orchestrator.initialize().await {
                warn!(%error, "initialization failed, reporting health as-is");
            }

            let report = orchestrator.health_check().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stats => {
            if let Err(error) = orchestrator.initialize().await {
                warn!(%error, "initialization failed, reporting stats as-is");
            }

            let stats = orchestrator.get_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

fn parse_document_types(raw: &[String]) -> anyhow::Result<Vec<DocumentType>> {
    raw.iter()
        .map(|value| {
            value
                .parse::<DocumentType>()
                .map_err(|error| anyhow::anyhow!(error))
                .context("expected one of: risk_methodology, security_principles, it_risk_management, regulatory_framework, compliance, general")
        })
        .collect()
}

fn print_outcome(
    orchestrator: &KnowledgeOrchestrator,
    outcome: RetrievalOutcome,
    prompt_format: bool,
) {
    match outcome {
        RetrievalOutcome::Degraded { reason } => {
            println!("retrieval degraded ({reason}); no context available");
        }
        RetrievalOutcome::Results { hits } if hits.is_empty() => {
            println!("no relevant context found");
        }
        RetrievalOutcome::Results { hits } => {
            if prompt_format {
                println!("{}", orchestrator.format_context_for_prompt(&hits));
                return;
            }

            for hit in &hits {
                println!(
                    "[{}] score={} type={} file={}",
                    hit.relevance_rank,
                    hit.score
                        .map(|s| format!("{s:.4}"))
                        .unwrap_or_else(|| "n/a".to_string()),
                    hit.metadata.document_type.as_str(),
                    hit.metadata.filename
                );
                if !hit.matched_keywords.is_empty() {
                    println!("  matched: {}", hit.matched_keywords.join(", "));
                }
                println!("  {}", hit.content.trim());
            }
        }
    }
}
