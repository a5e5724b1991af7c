//! hostpatch CLI entry point.
//!
//! Provides `init`, `gate` and `soak` subcommands for writing a default
//! config, inspecting effective feature decisions, and driving the leak
//! remediation against the in-memory host.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use hostpatch::commands::OperatorCommand;
use hostpatch::config::{self, Config, FeatureToggles};
use hostpatch::gate::FeatureGate;
use hostpatch::host::MainLoop;
use hostpatch::logging;
use hostpatch::remediation::ReplacementSite;
use hostpatch::runtime::Runtime;
use hostpatch::sim::SimHost;

/// Runtime remediation hooks for a dedicated game server.
#[derive(Parser)]
#[command(name = "hostpatch", version, about)]
struct Cli {
    /// Config file (defaults to `$HOSTPATCH_CONFIG_PATH` or `~/.hostpatch/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON logs with daily rotation into this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Fetch remote overrides and print the effective decision per feature.
    Gate,
    /// Drive synthetic mesh replacements through the in-memory host.
    Soak {
        /// Number of simulated voxel edits.
        #[arg(long, default_value_t = 1000)]
        events: usize,
        /// Vertices per generated mesh.
        #[arg(long, default_value_t = 300)]
        units: u64,
        /// Maximum slots dirtied by one edit; each edit picks 1..=fanout.
        #[arg(long, default_value_t = 1)]
        fanout: usize,
        /// RNG seed for the fan-out choice.
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Run without the remediation hooks to show the leak.
        #[arg(long)]
        unhooked: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_path_with(|key| std::env::var(key).ok())?,
    };

    let log_dir = cli.log_dir.as_deref();

    match cli.command {
        Command::Init { force } => {
            let _guard = logging::init("info", log_dir)?;
            handle_init(&config_path, force)
        }
        Command::Gate => {
            let config = load(&config_path)?;
            let _guard = logging::init(&config.logging.level, log_dir)?;
            handle_gate(&config).await
        }
        Command::Soak {
            events,
            units,
            fanout,
            seed,
            unhooked,
        } => {
            let config = load(&config_path)?;
            let _guard = logging::init(&config.logging.level, log_dir)?;
            handle_soak(&config, events, units, fanout, seed, unhooked)
        }
    }
}

fn load(config_path: &Path) -> anyhow::Result<Config> {
    let mut config = config::load_config(config_path)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Write the default config.
fn handle_init(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let contents = Config::default().to_toml()?;
    std::fs::write(config_path, contents)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    info!(path = %config_path.display(), "wrote default config");
    println!("{}", config_path.display());
    Ok(())
}

/// Print the effective feature decisions.
async fn handle_gate(config: &Config) -> anyhow::Result<()> {
    let gate = FeatureGate::from_config(config).await;

    match gate.snapshot() {
        Some(snapshot) => {
            let fetched = snapshot
                .fetched_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_owned());
            println!("remote: fetched {fetched}");
            if let Some(message) = &snapshot.message {
                println!("remote message: {message}");
            }
        }
        None => println!("remote: none (local config only)"),
    }

    for decision in gate.decisions() {
        let effective = gate.effective(decision.feature, decision.local_enabled);
        let reason = gate
            .disabled_reason(decision.feature)
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();
        println!(
            "{:<13} local={:<5} effective={}{reason}",
            decision.feature, decision.local_enabled, effective
        );
    }
    Ok(())
}

/// Run the synthetic leak soak.
fn handle_soak(
    config: &Config,
    events: usize,
    units: u64,
    fanout: usize,
    seed: u64,
    unhooked: bool,
) -> anyhow::Result<()> {
    let fanout = fanout.max(1);

    let sim = SimHost::new();
    let (main, _main_loop) = MainLoop::channel();
    let toggles = FeatureToggles {
        terrain_leak: !unhooked,
        ..config.features
    };
    let gate = Arc::new(FeatureGate::local_only(toggles));
    let runtime = Runtime::with_gate(
        config,
        gate,
        &sim,
        main,
        tokio::runtime::Handle::current(),
    );
    let table = runtime.table();

    let slots: Vec<_> = (0..fanout).map(|_| sim.new_slot()).collect();
    for slot in &slots {
        sim.apply(
            table,
            ReplacementSite::ChunkMeshAssign,
            slot.as_ref(),
            Some(sim.alloc_mesh(units)),
        );
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut replacements: u64 = 0;
    for _ in 0..events {
        let dirtied = rng.gen_range(1..=fanout);
        for slot in slots.choose_multiple(&mut rng, dirtied) {
            sim.apply(
                table,
                ReplacementSite::ChunkMeshAssign,
                slot.as_ref(),
                Some(sim.alloc_mesh(units)),
            );
            replacements = replacements.saturating_add(1);
        }
    }

    println!("{replacements} replacements across {fanout} slots");
    println!("live meshes: {}", sim.live_meshes());
    println!(
        "{}",
        runtime.commands().execute(OperatorCommand::StatsDump)
    );
    Ok(())
}
