use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use doctax_cli::{classify, review, taxonomy};
use doctax_core::config::{self, AppConfig};
use doctax_core::hitl::{Completion, CompletionOutcome};
use doctax_core::pipeline;
use doctax_core::taxonomy::SqliteCatalog;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Classify {
            chunk_id,
            text,
            file,
            version,
            json,
        } => run_classify(cfg, chunk_id, text, file, &version, json).await,
        Commands::Review { command } => run_review(cfg, command).await,
        Commands::Taxonomy { command } => run_taxonomy(cfg, command).await,
    }
}

#[derive(Parser)]
#[command(name = "doctax")]
#[command(about = "Hybrid rule/LLM taxonomy classifier with human review", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify one chunk of text and store the mapping
    Classify {
        /// Chunk id; defaults to the blake3 hash of the text
        #[arg(long)]
        chunk_id: Option<String>,
        /// Text to classify
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,
        /// Read the text from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Taxonomy version
        #[arg(long)]
        version: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Work the human review queue
    Review {
        #[command(subcommand)]
        command: ReviewCommand,
    },
    /// Manage taxonomy nodes
    Taxonomy {
        #[command(subcommand)]
        command: TaxonomyCommand,
    },
}

#[derive(Subcommand)]
enum ReviewCommand {
    /// List pending tasks, least confident first
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one task
    Show {
        task_id: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Approve or correct a task
    Complete {
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        chunk_id: String,
        /// Approved path, e.g. "Finance/Reports"
        #[arg(long)]
        path: String,
        /// Final confidence; 1.0 when omitted
        #[arg(long)]
        confidence: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        reviewer: String,
    },
    /// Queue statistics and readiness
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TaxonomyCommand {
    /// Load nodes from a TOML file into the database
    Import {
        #[arg(long)]
        file: PathBuf,
    },
    /// Compute node embeddings with the configured provider
    Embed {
        #[arg(long)]
        version: String,
        /// Re-embed nodes that already have a vector
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// List nodes of a version (`*` marks embedded nodes)
    List {
        #[arg(long)]
        version: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run_classify(
    cfg: AppConfig,
    chunk_id: Option<String>,
    text: Option<String>,
    file: Option<PathBuf>,
    version: &str,
    json: bool,
) -> Result<()> {
    let text = classify::read_input(text, file.as_deref())?;
    let chunk_id = chunk_id.unwrap_or_else(|| classify::default_chunk_id(&text));

    let pool = pipeline::open_database(&cfg).await?;
    let orchestrator = pipeline::build_orchestrator(&cfg, &pool)?;
    let result = orchestrator
        .classify(&chunk_id, &text, version)
        .await
        .with_context(|| format!("classify {chunk_id}"))?;

    if json {
        let out = serde_json::json!({ "chunk_id": chunk_id, "result": result });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", classify::render(&chunk_id, &result));
    }
    Ok(())
}

async fn run_review(cfg: AppConfig, command: ReviewCommand) -> Result<()> {
    let pool = pipeline::open_database(&cfg).await?;
    let catalog = pipeline::build_catalog(&cfg, &pool)?;
    let queue = pipeline::build_hitl(&cfg, &pool, catalog);

    match command {
        ReviewCommand::List { limit, json } => {
            let tasks = queue.get_pending_tasks(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("no pending tasks");
            } else {
                for task in &tasks {
                    println!("{}", review::task_line(task));
                }
            }
        }
        ReviewCommand::Show { task_id, json } => {
            let Some(task) = queue.get_task(&task_id).await? else {
                bail!("no such task: {task_id}");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                println!("{}", review::task_detail(&task));
            }
        }
        ReviewCommand::Complete {
            task_id,
            chunk_id,
            path,
            confidence,
            notes,
            reviewer,
        } => {
            let outcome = queue
                .complete_task(Completion {
                    task_id,
                    chunk_id,
                    approved_path: review::parse_path(&path)?,
                    confidence_override: confidence,
                    reviewer_notes: notes,
                    reviewer_id: reviewer,
                })
                .await?;
            match outcome {
                CompletionOutcome::Completed(task) => println!("completed {}", task.task_id),
                CompletionOutcome::AlreadyCompleted(task) => {
                    println!("{} was already completed; nothing changed", task.task_id)
                }
            }
        }
        ReviewCommand::Stats { json } => {
            let stats = queue.get_stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", review::stats_summary(&stats));
            }
        }
    }
    Ok(())
}

async fn run_taxonomy(cfg: AppConfig, command: TaxonomyCommand) -> Result<()> {
    let pool = pipeline::open_database(&cfg).await?;
    let catalog = SqliteCatalog::new(pool.clone());

    match command {
        TaxonomyCommand::Import { file } => {
            let n = taxonomy::import(&catalog, &file).await?;
            println!("imported {n} nodes");
        }
        TaxonomyCommand::Embed { version, refresh } => {
            let registry = pipeline::build_registry(&cfg);
            let provider = pipeline::embedding_provider(&registry);
            let n = taxonomy::embed(&catalog, provider.as_ref(), &version, refresh).await?;
            println!("embedded {n} nodes");
        }
        TaxonomyCommand::List { version, json } => {
            let nodes = catalog.all_nodes(&version).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&nodes)?);
            } else {
                for node in &nodes {
                    println!("{}", taxonomy::node_line(node));
                }
            }
        }
    }
    Ok(())
}
