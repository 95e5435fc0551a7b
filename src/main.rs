//! # Contract Assistant CLI (`ca`)
//!
//! Ingest PDF contracts and ask questions about them from the terminal, or
//! start the web dashboard.
//!
//! ## Usage
//!
//! ```bash
//! ca --config ./config/ca.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ca init` | Create the data directories and the vector database |
//! | `ca config` | Print the effective configuration |
//! | `ca ingest <pdf>` | Extract, chunk, embed and register a contract |
//! | `ca ask "<question>" [--id <contract>]` | Answer a question from the contract text |
//! | `ca list` | List registered contracts |
//! | `ca show <id>` | Show a contract's metadata and entities |
//! | `ca delete <id>` | Remove a contract and its vectors |
//! | `ca embed` | Embed chunks that were stored without vectors |
//! | `ca serve` | Start the HTTP server and dashboard |
//!
//! Results go to stdout; logs go to stderr (`RUST_LOG` overrides
//! `[logging].level`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use contract_assistant::config::{self, Config};
use contract_assistant::context::AppContext;
use contract_assistant::ingest::{self, IngestOptions};
use contract_assistant::{migrate, qa, server};

const DEFAULT_CONFIG: &str = "./config/ca.toml";

#[derive(Parser)]
#[command(
    name = "ca",
    about = "Contract assistant: ingest PDF contracts, extract key entities, and ask questions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the default file does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directories and the vector database. Idempotent.
    Init,

    /// Print the effective configuration.
    Config,

    /// Ingest a PDF contract.
    Ingest {
        /// Path to the PDF.
        pdf: PathBuf,

        /// Extraction strategy: auto, text, or ocr.
        #[arg(long)]
        strategy: Option<String>,

        /// Skip the text layer and OCR every page.
        #[arg(long)]
        force_ocr: bool,

        /// Only extract the first N pages.
        #[arg(long)]
        max_pages: Option<usize>,

        /// OCR language (tesseract code, e.g. `eng`, `deu`).
        #[arg(long)]
        lang: Option<String>,

        /// Re-ingest even if the contract is already registered.
        #[arg(long)]
        force: bool,
    },

    /// Ask a question about ingested contracts.
    Ask {
        question: String,

        /// Restrict retrieval to one contract.
        #[arg(long = "id")]
        contract_id: Option<String>,

        /// Number of excerpts to retrieve (default: `[retrieval].k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// List registered contracts, newest first.
    List,

    /// Show a contract's metadata and extracted entities.
    Show { id: String },

    /// Delete a contract.
    Delete {
        id: String,

        /// Leave the contract's chunks in the vector store.
        #[arg(long)]
        keep_vectors: bool,
    },

    /// Embed chunks stored without vectors (e.g. after a provider outage).
    Embed {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the HTTP server and dashboard.
    Serve,
}

fn load(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        return Ok(Config::minimal());
    }
    config::load_config(path)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load(&cli.config)?;
    init_logging(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(cfg.data.contracts_dir())
                .context("Failed to create contracts directory")?;
            migrate::run_migrations(&cfg).await?;
            println!("Initialized data directory at {}", cfg.data.root.display());
        }
        Commands::Config => {
            println!("{}", cfg.summary());
        }
        Commands::Ingest {
            pdf,
            strategy,
            force_ocr,
            max_pages,
            lang,
            force,
        } => {
            if !pdf.is_file() {
                bail!("PDF not found: {}", pdf.display());
            }
            let ctx = AppContext::open(cfg).await?;
            let opts = IngestOptions {
                strategy,
                force_ocr,
                max_pages,
                lang,
                force,
            };
            let report = ingest::ingest_file(&ctx, &pdf, &opts).await?;

            println!("ingest {}", report.filename);
            println!("  contract id: {}", report.contract_id);
            if report.skipped {
                println!("  already registered (use --force to re-ingest)");
            } else {
                println!("  pages: {}", report.pages);
                println!("  chunks: {}", report.chunks);
                println!("  embedded: {}", report.embedded);
                println!("  pending embeddings: {}", report.pending);
            }
            println!("  entities: {}", report.entities);
            println!("ok");
        }
        Commands::Ask {
            question,
            contract_id,
            k,
        } => {
            let ctx = AppContext::open(cfg).await?;

            if let Some(id) = &contract_id {
                let entities = ctx.registry.load_contract_entities(id);
                if let Some(answer) = qa::answer_from_entities(
                    &question,
                    &entities,
                    ctx.config.retrieval.enable_entity_routing,
                ) {
                    println!("{}", answer);
                    return Ok(());
                }
            }

            let k = k.unwrap_or(ctx.config.retrieval.k);
            let answer = qa::ask(
                &ctx.store,
                ctx.chat()?,
                &question,
                contract_id.as_deref(),
                k,
            )
            .await?;

            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources:");
                for s in &answer.sources {
                    println!(
                        "  page {} [{:.3}] {}",
                        s.page_number,
                        s.score,
                        s.text.lines().next().unwrap_or("")
                    );
                }
            }
        }
        Commands::List => {
            let ctx = AppContext::open(cfg).await?;
            let contracts = ctx.registry.list_contracts();
            if contracts.is_empty() {
                println!("No contracts registered.");
            }
            for c in contracts {
                println!(
                    "{}  {}  {} pages  {}",
                    c.contract_id, c.uploaded_at, c.num_pages, c.original_filename
                );
            }
        }
        Commands::Show { id } => {
            let ctx = AppContext::open(cfg).await?;
            let meta = ctx
                .registry
                .load_contract_meta(&id)
                .ok_or_else(|| anyhow::anyhow!("contract not found: {}", id))?;
            println!("contract {}", meta.contract_id);
            println!("  file: {}", meta.original_filename);
            println!("  stored at: {}", meta.stored_pdf_path);
            println!("  uploaded: {}", meta.uploaded_at);
            println!("  pages: {}", meta.num_pages);
            println!("  chunks: {}", ctx.store.count(Some(&id)).await?);
            let entities = ctx.registry.load_contract_entities(&id);
            println!("  entities: {}", entities.len());
            for e in entities {
                println!("    {}: {} (page {})", e.label, e.value, e.page);
            }
        }
        Commands::Delete { id, keep_vectors } => {
            let ctx = AppContext::open(cfg).await?;
            let store = if keep_vectors { None } else { Some(&ctx.store) };
            if ctx.registry.delete_contract(&id, store).await? {
                println!("deleted {}", id);
            } else {
                bail!("contract not found: {}", id);
            }
        }
        Commands::Embed { limit } => {
            let ctx = AppContext::open(cfg).await?;
            let stats = ctx.store.embed_pending(limit).await?;
            println!("embed pending");
            println!("  embedded: {}", stats.embedded);
            println!("  still pending: {}", ctx.store.pending_embeddings().await?);
        }
        Commands::Serve => {
            let ctx = AppContext::open(cfg).await?;
            server::run_server(ctx).await?;
        }
    }

    Ok(())
}
