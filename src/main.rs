//! Quickdev CLI
//!
//! Serve a project directory, or only pre-bundle its dependencies.

use anyhow::Context;
use clap::{Parser, Subcommand};
use quickdev::{optimizer, plugins, server, ServerConfig, ServerContext};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quickdev")]
#[command(author, version, about = "A no-bundle development server for ES module projects", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Project root
    #[arg(value_name = "ROOT", default_value = ".")]
    root: PathBuf,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Update channel port
    #[arg(long)]
    hmr_port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Scan entry, relative to the root (repeatable)
    #[arg(long = "entry", value_name = "PATH")]
    entries: Vec<String>,

    /// Skip dependency pre-bundling at startup
    #[arg(long)]
    no_optimize: bool,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dev server (default)
    Serve,

    /// Scan and pre-bundle dependencies, then exit
    Optimize,
}

fn setup_logging(verbose: u8) {
    let default = match verbose {
        0 => "quickdev=info,tower_http=warn",
        1 => "quickdev=debug,tower_http=debug",
        _ => "quickdev=trace,tower_http=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig::load(&cli.root)
        .with_context(|| format!("loading config from {}", cli.root.display()))?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(hmr_port) = cli.hmr_port {
        config.hmr_port = hmr_port;
    }
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if !cli.entries.is_empty() {
        config.entries = cli.entries.clone();
    }
    if cli.no_optimize {
        config.optimize_deps = false;
    }
    config.normalize()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = load_config(&cli)?;
    let ctx = ServerContext::new(config, plugins::builtin_plugins())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => server::serve(ctx).await?,
        Commands::Optimize => {
            let summary = optimizer::optimize(&ctx).await?;
            println!(
                "pre-bundled {} of {} dependencies into {}",
                summary.outputs.len(),
                summary.dependencies.len(),
                ctx.config.pre_bundle_dir().display()
            );
            for skipped in &summary.skipped {
                println!("  skipped {}", skipped);
            }
        }
    }
    Ok(())
}
