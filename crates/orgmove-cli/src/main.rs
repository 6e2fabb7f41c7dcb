//! orgmove - staged cross-organization device migration
//!
//! ## Commands
//!
//! - `validate`: check a plan file and print its digest
//! - `run`: migrate the devices in a plan
//! - `resume`: continue an interrupted or failed run from its checkpoint
//! - `rollback`: undo the completed stages of a run
//! - `status`: show saved checkpoints
//! - `regions`: list API regions

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use orgmove_core::{
    CheckpointStatus, CheckpointStore, DeviceGateway, EngineConfig, MigrationPlan, ProgressEvent,
    Region, RollbackOutcome, RunController, RunOutcome, RunPhase, RunResult, StageCheckpoint,
    StageFailure,
};
use orgmove_gateway::DashboardClient;
use orgmove_state::SurrealCheckpointStore;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "orgmove")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Move devices between management organizations, stage by stage", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of text (progress events and summaries)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a plan file and print its digest
    Validate {
        /// Path to the migration plan (JSON)
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Start a migration
    Run {
        /// Path to the migration plan (JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// What to do when a stage fails
        #[arg(long, value_enum, default_value_t = FailurePolicy::Prompt)]
        on_failure: FailurePolicy,

        /// Retries allowed under `--on-failure retry`
        #[arg(long, default_value = "3")]
        max_retries: u32,
    },

    /// Continue a failed or interrupted migration from its checkpoint
    Resume {
        /// Path to the migration plan (JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// What to do when a stage fails
        #[arg(long, value_enum, default_value_t = FailurePolicy::Prompt)]
        on_failure: FailurePolicy,

        /// Retries allowed under `--on-failure retry`
        #[arg(long, default_value = "3")]
        max_retries: u32,
    },

    /// Undo the completed stages of a migration
    Rollback {
        /// Path to the migration plan (JSON)
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Show saved checkpoints
    Status {
        /// Only show the checkpoint for this plan
        #[arg(short, long)]
        plan: Option<PathBuf>,
    },

    /// List API regions and their base URLs
    Regions,
}

/// Recovery policy applied when a run halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FailurePolicy {
    /// Ask on stdin
    Prompt,
    /// Stop and leave the checkpoint for `resume` or `rollback`
    Abort,
    /// Retry transient failures up to `--max-retries`; abort on anything else
    Retry,
    /// Roll back completed stages
    Rollback,
    /// Mark the migration done without verification
    Skip,
}

/// Operator decision after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    Retry,
    Rollback,
    Skip,
    Abort,
}

/// How a driven run ended.
#[derive(Debug)]
enum Finish {
    Migrated(RunOutcome),
    RolledBack(RollbackOutcome),
    Halted(StageFailure),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    orgmove_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate { plan } => cmd_validate(&plan, cli.json),
        Commands::Regions => cmd_regions(cli.json),
        Commands::Status { plan } => {
            let store = open_store().await?;
            cmd_status(store, plan.as_deref(), cli.json).await
        }
        Commands::Run {
            plan,
            on_failure,
            max_retries,
        } => {
            let plan = load_plan(&plan)?;
            let store = open_store().await?;
            let gateway = open_gateway()?;
            cmd_run(plan, gateway, store, on_failure, max_retries, cli.json).await
        }
        Commands::Resume {
            plan,
            on_failure,
            max_retries,
        } => {
            let plan = load_plan(&plan)?;
            let store = open_store().await?;
            let gateway = open_gateway()?;
            cmd_resume(plan, gateway, store, on_failure, max_retries, cli.json).await
        }
        Commands::Rollback { plan } => {
            let plan = load_plan(&plan)?;
            let store = open_store().await?;
            let gateway = open_gateway()?;
            cmd_rollback(plan, gateway, store, cli.json).await
        }
    }
}

/// Read, fill API keys from the environment, and validate a plan file.
fn load_plan(path: &Path) -> Result<MigrationPlan> {
    let plan = MigrationPlan::from_json_file(path)
        .with_context(|| format!("Failed to load plan {:?}", path))?
        .with_env_api_keys();
    plan.validate()
        .with_context(|| format!("Plan {:?} is invalid", path))?;
    Ok(plan)
}

async fn open_store() -> Result<Arc<dyn CheckpointStore>> {
    let store = SurrealCheckpointStore::from_env()
        .await
        .context("Failed to open checkpoint database")?;
    Ok(Arc::new(store))
}

fn open_gateway() -> Result<Arc<dyn DeviceGateway>> {
    let client = DashboardClient::from_env().context("Failed to build Dashboard client")?;
    Ok(Arc::new(client))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn cmd_validate(path: &Path, json: bool) -> Result<()> {
    let plan = load_plan(path)?;
    let digest = plan.digest();
    if json {
        print_json(&serde_json::json!({
            "valid": true,
            "plan_id": digest.as_str(),
            "devices": plan.devices.len(),
            "source": { "org_id": plan.source.org_id, "region": plan.source.region },
            "destination": { "org_id": plan.destination.org_id, "region": plan.destination.region },
        }))?;
    } else {
        println!("Plan is valid");
        println!("  plan id:     {}", digest);
        println!(
            "  source:      org {} ({}), key {}",
            plan.source.org_id,
            plan.source.region,
            plan.source.key_hint()
        );
        println!(
            "  destination: org {} ({}), network {}, key {}",
            plan.destination.org_id,
            plan.destination.region,
            plan.destination_network().unwrap_or("-"),
            plan.destination.key_hint()
        );
        println!("  devices:     {}", plan.devices.len());
    }
    Ok(())
}

fn cmd_regions(json: bool) -> Result<()> {
    if json {
        let regions: Vec<_> = Region::ALL
            .iter()
            .map(|r| serde_json::json!({ "region": r.as_str(), "base_url": r.base_url() }))
            .collect();
        return print_json(&regions);
    }
    for region in Region::ALL {
        println!("{:<8} {}", region.as_str(), region.base_url());
    }
    Ok(())
}

async fn cmd_status(
    store: Arc<dyn CheckpointStore>,
    plan: Option<&Path>,
    json: bool,
) -> Result<()> {
    let checkpoints: Vec<StageCheckpoint> = match plan {
        Some(path) => {
            let plan = load_plan(path)?;
            store.load(&plan.digest()).await?.into_iter().collect()
        }
        None => store.list().await?,
    };

    if json {
        return print_json(&checkpoints);
    }
    if checkpoints.is_empty() {
        println!("No checkpoints found");
        return Ok(());
    }
    for cp in &checkpoints {
        print_checkpoint(cp);
    }
    Ok(())
}

fn print_checkpoint(cp: &StageCheckpoint) {
    println!(
        "{}  stage {}/4  {:<11}  {}",
        cp.plan_id.short(),
        cp.stage,
        cp.status.as_str(),
        cp.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(err) = &cp.last_error {
        println!("    last error: {err}");
    }
}

async fn cmd_run(
    plan: MigrationPlan,
    gateway: Arc<dyn DeviceGateway>,
    store: Arc<dyn CheckpointStore>,
    policy: FailurePolicy,
    max_retries: u32,
    json: bool,
) -> Result<()> {
    if let Some(cp) = store.load(&plan.digest()).await? {
        match cp.status {
            CheckpointStatus::RolledBack => {
                debug!(plan_id = cp.plan_id.short(), "previous run was rolled back, starting over");
            }
            CheckpointStatus::Succeeded | CheckpointStatus::Overridden => {
                bail!("Plan {} was already migrated ({})", cp.plan_id.short(), cp.status);
            }
            CheckpointStatus::Running | CheckpointStatus::Failed => {
                bail!(
                    "Plan {} has an unfinished run at stage {}/4; use `orgmove resume` or `orgmove rollback`",
                    cp.plan_id.short(),
                    cp.stage
                );
            }
        }
    }

    let mut run = RunController::new(plan, gateway, EngineConfig::from_env())?.with_store(store);
    let printer = spawn_printer(run.subscribe(), json);
    watch_ctrl_c(&run);

    let first = run.start().await?;
    let finish = drive(&mut run, first, policy, max_retries).await;
    drop(run);
    let _ = printer.await;
    report(finish?, json)
}

async fn cmd_resume(
    plan: MigrationPlan,
    gateway: Arc<dyn DeviceGateway>,
    store: Arc<dyn CheckpointStore>,
    policy: FailurePolicy,
    max_retries: u32,
    json: bool,
) -> Result<()> {
    let mut run = RunController::resume(plan, gateway, store, EngineConfig::from_env()).await?;
    match run.phase() {
        RunPhase::Failed => {}
        RunPhase::Succeeded => {
            println!("Migration already completed; nothing to resume");
            return Ok(());
        }
        RunPhase::RolledBack => {
            println!("Migration was rolled back; start a new run with `orgmove run`");
            return Ok(());
        }
        other => bail!("Cannot resume a run that is {other}"),
    }

    let printer = spawn_printer(run.subscribe(), json);
    watch_ctrl_c(&run);

    let first = run.retry().await?;
    let finish = drive(&mut run, first, policy, max_retries).await;
    drop(run);
    let _ = printer.await;
    report(finish?, json)
}

async fn cmd_rollback(
    plan: MigrationPlan,
    gateway: Arc<dyn DeviceGateway>,
    store: Arc<dyn CheckpointStore>,
    json: bool,
) -> Result<()> {
    let mut run = RunController::resume(plan, gateway, store, EngineConfig::from_env()).await?;
    if run.phase() == RunPhase::RolledBack {
        println!("Migration was already rolled back");
        return Ok(());
    }
    let printer = spawn_printer(run.subscribe(), json);
    let outcome = run.rollback().await?;
    drop(run);
    let _ = printer.await;
    report(Finish::RolledBack(outcome), json)
}

/// Apply `policy` to failures until the run succeeds, is rolled back or is abandoned.
async fn drive(
    run: &mut RunController,
    mut result: RunResult,
    policy: FailurePolicy,
    max_retries: u32,
) -> Result<Finish> {
    let mut retries = 0;
    loop {
        let failure = match result {
            RunResult::Succeeded(outcome) => return Ok(Finish::Migrated(outcome)),
            RunResult::Failed(failure) => failure,
        };

        let recovery = match policy {
            FailurePolicy::Prompt => prompt_recovery(failure.clone()).await?,
            other => decide(other, &failure, retries, max_retries),
        };
        debug!(?recovery, retries, "recovering from failed stage");

        result = match recovery {
            Recovery::Retry => {
                retries += 1;
                run.retry().await?
            }
            Recovery::Rollback => return Ok(Finish::RolledBack(run.rollback().await?)),
            Recovery::Skip => return Ok(Finish::Migrated(run.skip().await?)),
            Recovery::Abort => return Ok(Finish::Halted(failure)),
        };
    }
}

/// Non-interactive recovery for a policy. Only transient failures are retried.
fn decide(policy: FailurePolicy, failure: &StageFailure, retries: u32, max_retries: u32) -> Recovery {
    match policy {
        FailurePolicy::Retry if failure.transient && retries < max_retries => Recovery::Retry,
        FailurePolicy::Retry | FailurePolicy::Abort | FailurePolicy::Prompt => Recovery::Abort,
        FailurePolicy::Rollback => Recovery::Rollback,
        FailurePolicy::Skip => Recovery::Skip,
    }
}

fn parse_recovery(answer: &str) -> Option<Recovery> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "r" | "retry" => Some(Recovery::Retry),
        "b" | "rollback" => Some(Recovery::Rollback),
        "s" | "skip" => Some(Recovery::Skip),
        "a" | "abort" | "q" | "" => Some(Recovery::Abort),
        _ => None,
    }
}

/// Ask the operator on stdin, off the async workers.
async fn prompt_recovery(failure: StageFailure) -> Result<Recovery> {
    tokio::task::spawn_blocking(move || {
        ask_recovery(&failure, &mut std::io::stdin().lock(), &mut std::io::stderr())
    })
    .await
    .context("Recovery prompt panicked")?
}

fn ask_recovery(
    failure: &StageFailure,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<Recovery> {
    loop {
        writeln!(output, "\nStage {} failed: {}", failure.stage_number(), failure.error)?;
        write!(
            output,
            "[r]etry, roll[b]ack, [s]kip (devices were moved manually, unverified), [a]bort? "
        )?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(Recovery::Abort);
        }
        if let Some(recovery) = parse_recovery(&line) {
            return Ok(recovery);
        }
    }
}

/// Print progress events as they are appended. Ends when the run is dropped.
fn spawn_printer(mut rx: broadcast::Receiver<ProgressEvent>, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if json {
                        if let Ok(line) = serde_json::to_string(&event) {
                            println!("{line}");
                        }
                    } else {
                        println!("{event}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("({n} progress events dropped)");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Ctrl-C cancels the run at the next stage boundary.
fn watch_ctrl_c(run: &RunController) {
    let handle = run.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current stage...");
            handle.cancel();
        }
    });
}

fn report(finish: Finish, json: bool) -> Result<()> {
    if json {
        let summary = match &finish {
            Finish::Migrated(outcome) => serde_json::json!({ "result": "migrated", "outcome": outcome }),
            Finish::RolledBack(outcome) => {
                serde_json::json!({ "result": "rolled_back", "outcome": outcome })
            }
            Finish::Halted(failure) => serde_json::json!({ "result": "halted", "failure": failure }),
        };
        print_json(&summary)?;
    } else {
        match &finish {
            Finish::Migrated(outcome) if outcome.verified => {
                println!("Migrated {} device(s)", outcome.migrated_devices.len());
            }
            Finish::Migrated(outcome) => {
                println!(
                    "Marked {} device(s) migrated by operator override (unverified)",
                    outcome.migrated_devices.len()
                );
            }
            Finish::RolledBack(outcome) if outcome.is_clean() => {
                println!("Rolled back from {}", outcome.from_stage);
            }
            Finish::RolledBack(outcome) => {
                println!(
                    "Rolled back from {} with {} warning(s):",
                    outcome.from_stage,
                    outcome.warnings.len()
                );
                for w in &outcome.warnings {
                    println!("  {} {}: {}", w.stage, w.serial.as_deref().unwrap_or("-"), w.error);
                }
            }
            Finish::Halted(_) => {}
        }
    }

    match finish {
        Finish::Halted(failure) => Err(anyhow!(
            "Migration halted at stage {}: {}. Use `orgmove resume` or `orgmove rollback`",
            failure.stage_number(),
            failure.error
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgmove_core::{DeviceRef, OrgCredentials, Stage};
    use orgmove_gateway::fakes::{Operation, RecordingGateway};
    use orgmove_gateway::GatewayError;
    use orgmove_state::fakes::MemoryCheckpointStore;

    fn plan() -> MigrationPlan {
        MigrationPlan::new(
            OrgCredentials::new("src-key", Region::Global, "org-src").with_network("N_src"),
            OrgCredentials::new("dst-key", Region::Global, "org-dst").with_network("N_dst"),
            vec![DeviceRef::new("Q2AA-0001", "lobby").in_network("N_src")],
        )
    }

    fn controller(gw: &Arc<RecordingGateway>) -> RunController {
        RunController::new(plan(), gw.clone(), EngineConfig::immediate())
            .unwrap()
            .with_store(Arc::new(MemoryCheckpointStore::new()))
    }

    #[test]
    fn cli_parses_run_options() {
        let cli = Cli::try_parse_from([
            "orgmove",
            "--json",
            "run",
            "--plan",
            "plan.json",
            "--on-failure",
            "rollback",
            "--max-retries",
            "5",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run {
                plan,
                on_failure,
                max_retries,
            } => {
                assert_eq!(plan, PathBuf::from("plan.json"));
                assert_eq!(on_failure, FailurePolicy::Rollback);
                assert_eq!(max_retries, 5);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn cli_defaults_to_prompt() {
        let cli = Cli::try_parse_from(["orgmove", "resume", "-p", "plan.json"]).unwrap();
        match cli.command {
            Commands::Resume { on_failure, .. } => assert_eq!(on_failure, FailurePolicy::Prompt),
            _ => panic!("expected resume"),
        }
    }

    fn rate_limited() -> GatewayError {
        GatewayError::RateLimited {
            message: "rate limited".into(),
        }
    }

    #[test]
    fn decide_respects_retry_budget() {
        let transient = StageFailure::from_gateway(Stage::ClaimedToDestination, &rate_limited());
        assert_eq!(decide(FailurePolicy::Retry, &transient, 0, 2), Recovery::Retry);
        assert_eq!(decide(FailurePolicy::Retry, &transient, 2, 2), Recovery::Abort);
        assert_eq!(decide(FailurePolicy::Skip, &transient, 0, 0), Recovery::Skip);
        assert_eq!(decide(FailurePolicy::Rollback, &transient, 0, 0), Recovery::Rollback);
        assert_eq!(decide(FailurePolicy::Abort, &transient, 0, 3), Recovery::Abort);
    }

    #[test]
    fn decide_never_retries_permanent_failures() {
        let permanent = StageFailure::from_gateway(
            Stage::ClaimedToDestination,
            &GatewayError::Api {
                status: 400,
                message: "Device already claimed".into(),
            },
        );
        assert_eq!(decide(FailurePolicy::Retry, &permanent, 0, 5), Recovery::Abort);
    }

    #[test]
    fn recovery_prompt_repeats_until_answered() {
        let failure = StageFailure::new(Stage::ClaimedToDestination, "Device already claimed");
        let mut input = std::io::Cursor::new("maybe\nb\n");
        let mut output = Vec::new();
        let recovery = ask_recovery(&failure, &mut input, &mut output).unwrap();
        assert_eq!(recovery, Recovery::Rollback);
        let shown = String::from_utf8(output).unwrap();
        assert_eq!(shown.matches("Stage 3 failed: Device already claimed").count(), 2);

        let mut closed = std::io::Cursor::new("");
        assert_eq!(
            ask_recovery(&failure, &mut closed, &mut Vec::new()).unwrap(),
            Recovery::Abort
        );
    }

    #[test]
    fn prompt_answers() {
        assert_eq!(parse_recovery("R\n"), Some(Recovery::Retry));
        assert_eq!(parse_recovery("rollback"), Some(Recovery::Rollback));
        assert_eq!(parse_recovery("s"), Some(Recovery::Skip));
        assert_eq!(parse_recovery("\n"), Some(Recovery::Abort));
        assert_eq!(parse_recovery("maybe"), None);
    }

    #[test]
    fn load_plan_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let mut bad = plan();
        bad.devices.clear();
        std::fs::write(&path, serde_json::to_string(&bad).unwrap()).unwrap();
        let err = load_plan(&path).unwrap_err();
        assert!(format!("{err:#}").contains("at least one device"));

        std::fs::write(&path, serde_json::to_string(&plan()).unwrap()).unwrap();
        assert_eq!(load_plan(&path).unwrap().devices.len(), 1);
    }

    #[tokio::test]
    async fn retry_policy_recovers_from_transient_failure() {
        let gw = Arc::new(RecordingGateway::new());
        gw.fail_once_with(Operation::ClaimToInventory, rate_limited());
        let mut run = controller(&gw);
        let first = run.start().await.unwrap();
        let finish = drive(&mut run, first, FailurePolicy::Retry, 3).await.unwrap();
        assert!(matches!(finish, Finish::Migrated(ref o) if o.verified));
        assert_eq!(gw.count(Operation::ClaimToInventory), 2);
    }

    #[tokio::test]
    async fn retry_policy_gives_up_after_budget() {
        let gw = Arc::new(RecordingGateway::new());
        gw.fail_with(Operation::ClaimToInventory, rate_limited());
        let mut run = controller(&gw);
        let first = run.start().await.unwrap();
        let finish = drive(&mut run, first, FailurePolicy::Retry, 2).await.unwrap();
        assert!(matches!(finish, Finish::Halted(ref f) if f.stage == Stage::ClaimedToDestination));
        assert_eq!(gw.count(Operation::ClaimToInventory), 3);
        assert!(report(finish, false).is_err());
    }

    #[tokio::test]
    async fn retry_policy_halts_on_permanent_failure() {
        let gw = Arc::new(RecordingGateway::new());
        gw.fail(Operation::ClaimToInventory, "Device already claimed");
        let mut run = controller(&gw);
        let first = run.start().await.unwrap();
        let finish = drive(&mut run, first, FailurePolicy::Retry, 3).await.unwrap();
        assert!(matches!(finish, Finish::Halted(ref f) if !f.transient));
        assert_eq!(gw.count(Operation::ClaimToInventory), 1);
    }

    #[tokio::test]
    async fn rollback_and_skip_policies() {
        let gw = Arc::new(RecordingGateway::new());
        gw.fail(Operation::AddToNetwork, "network full");

        let mut run = controller(&gw);
        let first = run.start().await.unwrap();
        let finish = drive(&mut run, first, FailurePolicy::Rollback, 0).await.unwrap();
        assert!(matches!(finish, Finish::RolledBack(_)));
        assert_eq!(run.stage(), Stage::None);

        let mut run = controller(&gw);
        let first = run.start().await.unwrap();
        let finish = drive(&mut run, first, FailurePolicy::Skip, 0).await.unwrap();
        assert!(matches!(finish, Finish::Migrated(ref o) if !o.verified));
        assert!(report(finish, true).is_ok());
    }

    #[tokio::test]
    async fn run_refuses_plan_with_unfinished_checkpoint() {
        let gw = Arc::new(RecordingGateway::new());
        gw.fail(Operation::UnclaimFromInventory, "locked");
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let mut run = RunController::new(plan(), gw.clone(), EngineConfig::immediate())
            .unwrap()
            .with_store(store.clone());
        run.start().await.unwrap();
        drop(run);

        let err = cmd_run(plan(), gw, store, FailurePolicy::Abort, 0, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unfinished run"));
    }
}
