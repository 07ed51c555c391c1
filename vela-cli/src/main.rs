mod sim;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use thiserror::Error;

use vela_core::engine::{ApplyEngine, CancelToken, EngineConfig};
use vela_core::manifest::Manifest;
use vela_core::plan::Plan;
use vela_core::report::{Outcome, RunReport};
use vela_core::state::{ResourceStatus, StateError, StateStore};
use vela_state::{LocalStore, LockInfo};

use crate::sim::SimulatedAdapter;

/// Exit code for unrecoverable configuration problems (bad manifest,
/// dependency cycle, foreign state file).
const EXIT_CONFIG: i32 = 1;
/// Exit code for a partial failure: state is committed, re-running is safe.
const EXIT_PARTIAL: i32 = 3;

#[derive(Parser)]
#[command(name = "vela")]
#[command(about = "Declarative infrastructure provisioning with idempotent applies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the manifest: descriptor fields, references, cycles
    Validate {
        /// Path to the manifest file
        #[arg(short, long, default_value = "vela.json")]
        file: PathBuf,
    },
    /// Show what an apply would change, without touching the provider
    Plan {
        #[arg(short, long, default_value = "vela.json")]
        file: PathBuf,

        /// Path to the state file
        #[arg(long, default_value = LocalStore::DEFAULT_STATE_FILE)]
        state: PathBuf,
    },
    /// Apply the manifest: create, update, or skip each resource
    Apply {
        #[arg(short, long, default_value = "vela.json")]
        file: PathBuf,

        #[arg(long, default_value = LocalStore::DEFAULT_STATE_FILE)]
        state: PathBuf,

        /// Worker pool size (overrides the manifest setting)
        #[arg(long)]
        parallelism: Option<usize>,

        /// Write the run report to this path as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Destroy every managed resource, in reverse dependency order
    Destroy {
        #[arg(short, long, default_value = "vela.json")]
        file: PathBuf,

        #[arg(long, default_value = LocalStore::DEFAULT_STATE_FILE)]
        state: PathBuf,

        /// Skip the confirmation prompt
        #[arg(long)]
        auto_approve: bool,

        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{failed} step(s) failed; committed resources are saved, re-run to retry")]
    PartialFailure { failed: usize },

    #[error("aborted")]
    Aborted,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file, state } => run_plan(&file, &state).await,
        Commands::Apply {
            file,
            state,
            parallelism,
            report,
        } => run_apply(&file, &state, parallelism, report.as_deref()).await,
        Commands::Destroy {
            file,
            state,
            auto_approve,
            report,
        } => run_destroy(&file, &state, auto_approve, report.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        let code = match e {
            CliError::PartialFailure { .. } => EXIT_PARTIAL,
            _ => EXIT_CONFIG,
        };
        std::process::exit(code);
    }
}

fn load_plan(file: &Path) -> Result<(Manifest, Plan), CliError> {
    let manifest =
        Manifest::from_path(file).map_err(|e| CliError::Configuration(e.to_string()))?;
    let graph = manifest
        .graph()
        .map_err(|e| CliError::Configuration(e.to_string()))?;
    let plan = Plan::compile(&graph).map_err(|e| CliError::Configuration(e.to_string()))?;
    Ok((manifest, plan))
}

fn engine_config(manifest: &Manifest, parallelism: Option<usize>) -> EngineConfig {
    let mut config = EngineConfig {
        // The simulated control plane settles quickly; no point in
        // five-second polls.
        poll_interval: Duration::from_millis(200),
        readiness_timeout: Duration::from_secs(30),
        ..EngineConfig::default()
    };
    if let Some(parallelism) = parallelism.or(manifest.parallelism) {
        config.parallelism = parallelism;
    }
    config
}

/// Cancel the token on Ctrl-C; in-flight steps finish and commit.
fn install_interrupt_handler(cancel: &CancelToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupt received; finishing in-flight steps...");
            cancel.cancel();
        }
    });
}

fn run_validate(file: &Path) -> Result<(), CliError> {
    let (manifest, plan) = load_plan(file)?;
    println!(
        "{} {} resource(s) in environment {}",
        "Valid:".green().bold(),
        plan.len(),
        manifest.environment.bold()
    );
    Ok(())
}

async fn run_plan(file: &Path, state: &Path) -> Result<(), CliError> {
    let (manifest, plan) = load_plan(file)?;
    let store = LocalStore::open(state, &manifest.environment)?;

    let mut create = 0usize;
    let mut update = 0usize;
    let mut replace = 0usize;
    let mut unchanged = 0usize;

    for step in plan.steps() {
        let label = format!("{}.{}", step.kind, step.logical_name);
        match store.get(&step.logical_name).await? {
            Some(entry)
                if entry.status == ResourceStatus::Created && entry.physical_id.is_some() =>
            {
                if entry.config_hash == step.config_hash() {
                    unchanged += 1;
                } else if step.kind.supports_update() {
                    println!("{} {}", "~".yellow(), label);
                    update += 1;
                } else {
                    println!("{} {} (cannot update in place; recreate)", "!".red(), label);
                    replace += 1;
                }
            }
            _ => {
                println!("{} {}", "+".green(), label);
                create += 1;
            }
        }
    }

    println!(
        "\nPlan: {create} to create, {update} to update, {replace} require replacement, {unchanged} unchanged"
    );
    Ok(())
}

async fn run_apply(
    file: &Path,
    state: &Path,
    parallelism: Option<usize>,
    report_path: Option<&Path>,
) -> Result<(), CliError> {
    let (manifest, plan) = load_plan(file)?;
    let store = Arc::new(LocalStore::open(state, &manifest.environment)?);
    let lock = store.acquire_lock("apply")?;

    let engine = ApplyEngine::new(
        Arc::new(SimulatedAdapter::new()),
        Arc::clone(&store) as Arc<dyn StateStore>,
    )
    .with_config(engine_config(&manifest, parallelism));

    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel);

    println!(
        "Applying {} resource(s) to {}...\n",
        plan.len(),
        manifest.environment.bold()
    );
    let report = engine.apply(&plan, &manifest.environment, &cancel).await;
    release_lock_best_effort(&store, &lock);

    print_report(&report);
    if let Some(path) = report_path {
        write_report(&report, path)?;
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::PartialFailure {
            failed: report.failed_count(),
        })
    }
}

async fn run_destroy(
    file: &Path,
    state: &Path,
    auto_approve: bool,
    report_path: Option<&Path>,
) -> Result<(), CliError> {
    let (manifest, plan) = load_plan(file)?;
    let store = Arc::new(LocalStore::open(state, &manifest.environment)?);

    let managed = store.all().await?;
    if managed.is_empty() {
        println!("Nothing to destroy in {}.", manifest.environment.bold());
        return Ok(());
    }

    if !auto_approve {
        println!(
            "This will destroy {} resource(s) in {}:",
            managed.len(),
            manifest.environment.bold()
        );
        for entry in &managed {
            println!(
                "  {} {}.{} ({})",
                "-".red(),
                entry.kind,
                entry.logical_name,
                entry.physical_id.as_deref().unwrap_or("no identifier")
            );
        }
        print!("\nEnter {} to confirm: ", "yes".bold());
        use std::io::Write;
        std::io::stdout()
            .flush()
            .map_err(|e| CliError::Configuration(e.to_string()))?;
        let mut answer = String::new();
        std::io::stdin()
            .read_line(&mut answer)
            .map_err(|e| CliError::Configuration(e.to_string()))?;
        if answer.trim() != "yes" {
            return Err(CliError::Aborted);
        }
    }

    let lock = store.acquire_lock("destroy")?;
    let engine = ApplyEngine::new(
        Arc::new(SimulatedAdapter::new()),
        Arc::clone(&store) as Arc<dyn StateStore>,
    )
    .with_config(engine_config(&manifest, None));

    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel);

    let report = engine.destroy(&plan, &manifest.environment, &cancel).await;
    release_lock_best_effort(&store, &lock);

    print_report(&report);
    if let Some(path) = report_path {
        write_report(&report, path)?;
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::PartialFailure {
            failed: report.failed_count(),
        })
    }
}

/// A failed release must not discard the run report or mask a partial
/// failure; the resources are committed either way.
fn release_lock_best_effort(store: &LocalStore, lock: &LockInfo) {
    if let Err(e) = store.release_lock(lock) {
        log::warn!("could not release state lock {}: {e}", lock.id);
    }
}

fn print_report(report: &RunReport) {
    for result in &report.results {
        let id = result.physical_id.as_deref().unwrap_or("-");
        match &result.outcome {
            Outcome::Created => {
                println!("{} created {} ({id})", "+".green(), result.logical_name)
            }
            Outcome::Updated => {
                println!("{} updated {} ({id})", "~".yellow(), result.logical_name)
            }
            Outcome::Deleted => {
                println!("{} deleted {} ({id})", "-".red(), result.logical_name)
            }
            Outcome::Skipped(reason) => println!(
                "{} skipped {} ({reason:?})",
                "=".dimmed(),
                result.logical_name
            ),
            Outcome::Failed(_) => println!(
                "{} failed  {}: {}",
                "x".red().bold(),
                result.logical_name,
                result.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!("\n{}: {}", report.operation.bold(), report.summary());
}

fn write_report(report: &RunReport, path: &Path) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| CliError::Configuration(format!("failed to serialize report: {e}")))?;
    std::fs::write(path, json).map_err(|e| {
        CliError::Configuration(format!("failed to write {}: {e}", path.display()))
    })?;
    println!("Run report written to {}", path.display());
    Ok(())
}
