//! Coalesce CLI: category deduplication with an MCP server.
//!
//! Usage:
//!   coalesce dedup [--similarity-cutoff x] [--word-similarity x] [--db path]
//!   coalesce sanitize [--db path]
//!   coalesce import <dump.json> [--db path]
//!   coalesce stats [--db path]
//!   coalesce mcp [--db path]

use clap::{Parser, Subcommand};
use coalesce::config::default_db_path;
use coalesce::dedup::GraphSanitizer;
use coalesce::llm_orc::{LlmOrcClient, SubprocessClient};
use coalesce::{
    CancellationToken, DedupConfig, DedupParams, Deduplicator, GraphDump, GraphStats,
    LlmOrcResolver, OpenStore, SqliteStore,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "coalesce",
    version,
    about = "Category deduplication for knowledge graphs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Find and merge duplicate categories, then clean up relationships
    Dedup {
        /// Minimum cosine similarity for two categories to share a community
        #[arg(long)]
        similarity_cutoff: Option<f64>,
        /// Minimum fuzzy name similarity for adjudication (0-1)
        #[arg(long)]
        word_similarity: Option<f64>,
        /// Resolver calls in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// llm-orc ensemble used to adjudicate clusters
        #[arg(long)]
        ensemble: Option<String>,
        /// Per-cluster resolver timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Remove self-loops and duplicate relationships
    Sanitize {
        /// Only clean relationships of this type
        #[arg(long)]
        relationship_type: Option<String>,
    },
    /// Load categories and relationships from a JSON dump
    Import {
        /// Path to the JSON dump
        path: PathBuf,
    },
    /// Show graph statistics
    Stats,
    /// Start the MCP (Model Context Protocol) server on stdio
    Mcp,
}

fn init_logging(level: &str) -> Result<(), String> {
    let level: tracing::Level = level
        .parse()
        .map_err(|_| format!("invalid log level '{}'", level))?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
    Ok(())
}

fn open_store(path: &Path) -> Result<Arc<SqliteStore>, String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
    }
    let store = SqliteStore::open(path).map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(Arc::new(store))
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("failed to create tokio runtime: {}", e))
}

fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_dedup(store: Arc<SqliteStore>, config: DedupConfig, params: DedupParams) -> i32 {
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let mut client = SubprocessClient::new();
        if let Some(dir) = &config.llm_orc_project_dir {
            client = client.with_project_dir(dir.clone());
        }
        if !client.is_available().await {
            eprintln!("Error: llm-orc is not available; it adjudicates duplicate clusters");
            return 1;
        }
        let resolver = Arc::new(LlmOrcResolver::new(Arc::new(client), config.ensemble.clone()));
        let dedup = Deduplicator::new(store, resolver, config);

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, finishing in-flight adjudications");
                on_interrupt.cancel();
            }
        });

        match dedup.deduplicate_with_cancel(params, &cancel).await {
            Ok(summary) => {
                let code = print_json(&summary);
                if summary.cancelled {
                    130
                } else {
                    code
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        }
    })
}

fn cmd_sanitize(store: Arc<SqliteStore>, config: DedupConfig) -> i32 {
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return 1;
    }
    let sanitizer = GraphSanitizer::new(store)
        .with_batch_size(config.sanitize_batch_size)
        .with_relationship_type(config.sanitize_relationship_type);
    match rt.block_on(sanitizer.run()) {
        Ok(report) => {
            println!(
                "Removed {} relationships ({} self-loops, {} duplicates, {} reciprocals)",
                report.total(),
                report.loops_removed,
                report.duplicates_removed,
                report.reciprocals_removed
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_import(store: &SqliteStore, path: &Path) -> i32 {
    let dump = match GraphDump::load(path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match dump.write_to(store) {
        Ok(report) => {
            println!(
                "Imported {} categories, {} other nodes, {} relationships",
                report.categories, report.nodes, report.relationships
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_stats(store: &SqliteStore) -> i32 {
    let stats = match GraphStats::collect(store) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    println!("{:<24}  {:>8}", "categories", stats.categories);
    println!("{:<24}  {:>8}", "  with community", stats.categorized);
    println!("{:<24}  {:>8}", "communities", stats.communities);
    println!("{:<24}  {:>8}", "relationships", stats.relationships);
    println!("{:<24}  {:>8}", "  self-loops", stats.self_loops);
    for (rel_type, count) in &stats.relationships_by_type {
        println!("{:<24}  {:>8}", format!("  {}", rel_type), count);
    }
    0
}

fn main() {
    let cli = Cli::parse();

    let mut config = match DedupConfig::load_or_default(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    if let Err(e) = init_logging(&level) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let db_path = cli.db.unwrap_or_else(default_db_path);

    if let Commands::Mcp = cli.command {
        let code = coalesce::mcp::run_mcp_server(db_path, config);
        std::process::exit(code);
    }

    let store = match open_store(&db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Dedup {
            similarity_cutoff,
            word_similarity,
            concurrency,
            ensemble,
            timeout_secs,
        } => {
            if let Some(n) = concurrency {
                config.adjudication_concurrency = n;
            }
            if let Some(name) = ensemble {
                config.ensemble = name;
            }
            if let Some(secs) = timeout_secs {
                config.adjudication_timeout_secs = secs;
            }
            let params = DedupParams {
                similarity_cutoff,
                word_similarity,
            };
            cmd_dedup(store, config, params)
        }
        Commands::Sanitize { relationship_type } => {
            if relationship_type.is_some() {
                config.sanitize_relationship_type = relationship_type;
            }
            cmd_sanitize(store, config)
        }
        Commands::Import { path } => cmd_import(&store, &path),
        Commands::Stats => cmd_stats(&store),
        Commands::Mcp => 0,
    };
    std::process::exit(code);
}
