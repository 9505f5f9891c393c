// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use gleaner::engine::{Engine, EngineConfig};
use gleaner::instructions;
use gleaner::persist::Store;
use gleaner::provider::browser::BrowserProvider;
use gleaner::provider::offline::OfflineProvider;
use gleaner::provider::DocumentProvider;
use gleaner::server::{self, SharedState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Parser)]
#[command(
    name = "gleaner",
    about = "Gleaner — declarative record extraction from HTML pages",
    version,
    after_help = "Run 'gleaner <command> --help' for details on each command."
)]
struct Cli {
    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an instruction queue from a JSON file
    Run {
        /// Path to the instruction file (a JSON array)
        file: PathBuf,
        /// Output directory for results, images, and the CSV export
        #[arg(long, default_value = "gleaner-out")]
        out_dir: PathBuf,
        /// Drive a headless Chromium tab instead of plain HTTP fetches
        #[arg(long)]
        browser: bool,
        /// Abort the queue on the first fatal instruction error
        #[arg(long)]
        stop_on_error: bool,
        /// Wrap each URL as {prefix}{encoded-url} before navigating
        #[arg(long)]
        proxy_prefix: Option<String>,
        /// Page load timeout in milliseconds
        #[arg(long, default_value = "100000")]
        page_timeout: u64,
    },
    /// Serve the extraction engine over HTTP
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "3021")]
        port: u16,
        /// Output directory for results, images, and the CSV export
        #[arg(long, default_value = "gleaner-out")]
        out_dir: PathBuf,
        /// Drive a headless Chromium tab instead of plain HTTP fetches
        #[arg(long)]
        browser: bool,
        /// Abort each queue on the first fatal instruction error
        #[arg(long)]
        stop_on_error: bool,
        /// Wrap each URL as {prefix}{encoded-url} before navigating
        #[arg(long)]
        proxy_prefix: Option<String>,
        /// Page load timeout in milliseconds
        #[arg(long, default_value = "100000")]
        page_timeout: u64,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

fn init_logging(quiet: bool, verbose: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn build_provider(browser: bool) -> Result<Box<dyn DocumentProvider>> {
    if browser {
        Ok(Box::new(BrowserProvider::launch().await?))
    } else {
        Ok(Box::new(OfflineProvider::new(30_000)))
    }
}

fn engine_config(stop_on_error: bool, proxy_prefix: Option<String>, page_timeout: u64) -> EngineConfig {
    EngineConfig {
        stop_on_error,
        proxy_prefix,
        page_load_timeout_ms: page_timeout,
        ..EngineConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            out_dir,
            browser,
            stop_on_error,
            proxy_prefix,
            page_timeout,
        } => {
            let list = instructions::load_instructions(&file)
                .with_context(|| format!("failed to load {}", file.display()))?;
            let provider = build_provider(browser).await?;
            let engine = Engine::new(
                provider,
                engine_config(stop_on_error, proxy_prefix, page_timeout),
            );
            let mut store = Store::open(&out_dir)?;

            let report = engine.run_queue(&list, &mut store).await;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if report.stopped_early {
                anyhow::bail!("queue stopped early after a fatal instruction error");
            }
            Ok(())
        }
        Commands::Serve {
            port,
            out_dir,
            browser,
            stop_on_error,
            proxy_prefix,
            page_timeout,
        } => {
            let provider = build_provider(browser).await?;
            let state = Arc::new(SharedState {
                engine: Engine::new(
                    provider,
                    engine_config(stop_on_error, proxy_prefix, page_timeout),
                ),
                store: Mutex::new(Store::open(&out_dir)?),
            });
            server::start(port, state).await
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "gleaner", &mut std::io::stdout());
            Ok(())
        }
    }
}
