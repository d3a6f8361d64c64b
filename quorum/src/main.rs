//! Quorum operational binary
//!
//! Runs one request through the autonomy pipeline, lists registered
//! skills, or runs the error-healing daemon.
//!
//! # Usage
//!
//! ```bash
//! # Process a request end-to-end
//! quorum --config quorum.toml --request "create a skill to add two numbers"
//!
//! # Run the healing monitor
//! quorum --config quorum.toml --heal-daemon
//!
//! # List registered skills
//! quorum --config quorum.toml --list-skills
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use quorum::autonomy::AutonomyPipeline;
use quorum::collab::{CollabEngine, InMemorySessionStore};
use quorum::config::QuorumConfig;
use quorum::errors::{ErrorHealer, ErrorTracker};
use quorum::invoker::HttpInvoker;
use quorum::sandbox::DockerSandbox;
use quorum::skills::SkillRegistry;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "quorum.toml")]
    config: std::path::PathBuf,

    /// Process one request through the autonomy pipeline
    #[arg(long)]
    request: Option<String>,

    /// Run the continuous error-healing monitor
    #[arg(long, default_value_t = false)]
    heal_daemon: bool,

    /// List registered skills and exit
    #[arg(long, default_value_t = false)]
    list_skills: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quorum=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = QuorumConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    tracing::info!(
        agents = config.agents.len(),
        enabled = config.enabled_agents().len(),
        "Quorum starting"
    );

    let store = InMemorySessionStore::new().shared();
    let invoker = HttpInvoker::new()
        .map_err(|e| anyhow::anyhow!("Failed to create invoker: {e}"))?
        .shared();
    let engine = Arc::new(CollabEngine::from_config(&config, store, invoker));

    let sandbox = DockerSandbox::new(config.sandbox.clone()).shared();
    let registry = SkillRegistry::open(
        &config.autonomy.registry_dir,
        sandbox.clone(),
        config.autonomy.safe_paths.clone(),
    )
    .map_err(|e| anyhow::anyhow!("Failed to open skill registry: {e}"))?
    .shared();

    let tracker = Arc::new(ErrorTracker::new(&config.errors));

    if args.list_skills {
        for summary in registry.list() {
            println!("{}\t{}", summary.name, summary.path);
        }
        return Ok(());
    }

    if let Some(request) = args.request {
        let pipeline = AutonomyPipeline::new(
            engine.clone(),
            registry,
            sandbox,
            tracker.clone(),
            config.autonomy.clone(),
        );
        let response = pipeline.process_request(&request, &[]).await;
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if args.heal_daemon {
        let healer = ErrorHealer::new(tracker, engine, config.healer.clone());
        healer.run().await;
        return Ok(());
    }

    tracing::info!("Nothing to do; pass --request, --heal-daemon, or --list-skills");
    Ok(())
}
