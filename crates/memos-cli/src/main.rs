//! `memos-cli` – MemOS Command Line Interface
//!
//! This binary is the chat front end for the MemOS memory stack.  It:
//!
//! 1. Checks for `~/.memos/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Opens the on-disk stores under `data_dir` (core memory document plus
//!    the SQLite vector database) and wires them into an
//!    [`Orchestrator`][memos_runtime::Orchestrator].
//! 3. Drops the user into an **interactive chat REPL** with slash-commands
//!    (`/profile`, `/entities`, `/timeline`, `/debug`, `/help`).
//! 4. Intercepts **Ctrl-C**, finishes pending archival writes and exits.

mod config;
mod repl;

use colored::Colorize;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

use memos_memory::archival::{ArchivalError, ArchivalStore};
use memos_memory::core_memory::{CoreMemoryError, CoreMemoryStore};
use memos_memory::embedding::{Embedder, HashEmbedder, HttpEmbedder};
use memos_memory::vector::{VectorDatabase, VectorIndexError};
use memos_runtime::{ChatModel, LlmDriver, Orchestrator, OrchestratorConfig};

/// Failures while opening the memory stores at startup.
#[derive(Error, Debug)]
enum StartupError {
    #[error("cannot create data directory {path}: {source}")]
    DataDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Vector(#[from] VectorIndexError),
    #[error(transparent)]
    Archival(#[from] ArchivalError),
    #[error(transparent)]
    Core(#[from] CoreMemoryError),
    #[error("cannot start async runtime: {0}")]
    Runtime(std::io::Error),
}

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "warn"); MEMOS_LOG_FORMAT=json switches to
    // JSON lines.  Logs go to stderr, chat output stays on stdout.
    let _tracing = memos_runtime::init_tracing("memos");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – finishing the current turn …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    if let Err(e) = run(cfg, shutdown) {
        println!("{}: {}", "Startup failed".red().bold(), e);
        std::process::exit(1);
    }
}

/// Build the runtime and the memory stack, then hand over to the REPL.
fn run(cfg: config::Config, shutdown: Arc<AtomicBool>) -> Result<(), StartupError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(StartupError::Runtime)?;

    runtime.block_on(async move {
        let orchestrator = build_orchestrator(&cfg)?;
        println!(
            "  Model {} at {}",
            cfg.active_model.bold(),
            cfg.llm_base_url.dimmed()
        );
        println!("  Memory in {}", cfg.data_dir.display().to_string().dimmed());
        println!();
        println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

        repl::run(&orchestrator, shutdown).await;

        print!("  Flushing archival queue … ");
        std::io::stdout().flush().ok();
        orchestrator.shutdown().await;
        println!("{}", "done".green());
        println!("{}", "  ✓ Exiting MemOS.".green());
        Ok::<(), StartupError>(())
    })
}

/// Open every store under `cfg.data_dir` and inject them into an
/// [`Orchestrator`].  Must run inside the Tokio runtime.
fn build_orchestrator(cfg: &config::Config) -> Result<Orchestrator, StartupError> {
    std::fs::create_dir_all(&cfg.data_dir).map_err(|source| StartupError::DataDir {
        path: cfg.data_dir.clone(),
        source,
    })?;

    let embedder: Arc<dyn Embedder> = if cfg.embedding_model.is_empty() {
        info!("using offline hashing embedder");
        Arc::new(HashEmbedder::default())
    } else {
        info!(model = %cfg.embedding_model, url = %cfg.embedding_url, "using HTTP embedder");
        Arc::new(
            HttpEmbedder::new(cfg.embedding_url.clone(), cfg.embedding_model.clone())
                .with_api_key(cfg.embedding_api_key.clone()),
        )
    };

    let db = VectorDatabase::open(&cfg.vector_db_path().to_string_lossy(), embedder)?;
    let archival = Arc::new(ArchivalStore::open(&db)?);
    let core = Arc::new(CoreMemoryStore::open_with_database(cfg.core_memory_path(), &db)?);

    let model: Arc<dyn ChatModel> = Arc::new(
        LlmDriver::new(cfg.llm_base_url.clone(), cfg.active_model.clone())
            .with_api_key(cfg.api_key.clone())
            .with_max_tokens(cfg.max_tokens),
    );

    let orchestrator_config = OrchestratorConfig {
        buffer_capacity: cfg.buffer_capacity,
        ..Default::default()
    };
    Ok(Orchestrator::new(model, core, archival, orchestrator_config))
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        MemOS First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up MemOS.\n");

    let mut cfg = config::Config::default();

    // Chat endpoint
    println!("  Any OpenAI-compatible endpoint works (Groq, OpenAI, Ollama …).");
    cfg.llm_base_url = prompt_line(
        &format!("  Chat API base URL [{}]: ", cfg.llm_base_url),
        &cfg.llm_base_url,
    );
    cfg.active_model = prompt_line(
        &format!("  Chat model [{}]: ", cfg.active_model),
        &cfg.active_model,
    );
    cfg.api_key = prompt_line("  API key (leave empty for none): ", "");

    // Embeddings
    println!();
    println!("  Leave the embedding model empty to use the built-in offline embedder.");
    cfg.embedding_model = prompt_line("  Embedding model []: ", "");
    if !cfg.embedding_model.is_empty() {
        cfg.embedding_url = prompt_line(
            &format!("  Embedding API base URL [{}]: ", cfg.embedding_url),
            &cfg.embedding_url,
        );
        cfg.embedding_api_key = prompt_line("  Embedding API key (leave empty for none): ", "");
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __  ___           ____  _____"#.bold().cyan());
    println!("{}", r#"  /  |/  /__ __ _   / __ \/ ___/"#.bold().cyan());
    println!("{}", r#" / /|_/ / -_)  ' \ / /_/ /\__ \ "#.bold().cyan());
    println!("{}", r#"/_/  /_/\__/_/_/_/ \____/____/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "MemOS".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Long-term memory for conversational agents");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::BufRead;
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
