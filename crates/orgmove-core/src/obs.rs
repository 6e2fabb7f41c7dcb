//! Structured lifecycle events for migration runs.
//!
//! Each function emits one `info!`/`warn!` record with an `event` field, so
//! log pipelines can key on `event = "run.started"` and friends. The
//! human-readable progress log lives in [`crate::sink`]; these are the
//! machine-oriented counterparts.

use tracing::{info, warn};

use crate::domain::Stage;

/// Run-scoped span. Attach with `tracing::Instrument` so it survives awaits.
///
/// ```ignore
/// orchestrator.run(..).instrument(run_span(&run_id, digest.short())).await
/// ```
pub fn run_span(run_id: &str, plan_id: &str) -> tracing::Span {
    tracing::info_span!("orgmove.run", run_id = %run_id, plan_id = %plan_id)
}

pub fn emit_run_started(run_id: &str, plan_id: &str, devices: usize, resume_from: Stage) {
    info!(
        event = "run.started",
        run_id = %run_id,
        plan_id = %plan_id,
        devices = devices,
        resume_from = resume_from.index(),
    );
}

pub fn emit_stage_completed(run_id: &str, stage: Stage, device_warnings: usize) {
    info!(
        event = "run.stage_completed",
        run_id = %run_id,
        stage = stage.index(),
        device_warnings = device_warnings,
    );
}

/// Emitted when a run halts on a stage failure or cancellation.
pub fn emit_run_failed(run_id: &str, stage: Stage, error: &str) {
    warn!(
        event = "run.failed",
        run_id = %run_id,
        stage = stage.index(),
        error = %error,
    );
}

pub fn emit_run_succeeded(run_id: &str, migrated: usize, duration_ms: u64) {
    info!(
        event = "run.succeeded",
        run_id = %run_id,
        migrated = migrated,
        duration_ms = duration_ms,
    );
}

pub fn emit_rollback_finished(run_id: &str, from_stage: Stage, warnings: usize) {
    info!(
        event = "run.rolled_back",
        run_id = %run_id,
        from_stage = from_stage.index(),
        warnings = warnings,
    );
}

/// The operator skipped a failed run; the outcome is unverified.
pub fn emit_operator_override(run_id: &str, failed_stage: Option<Stage>) {
    warn!(
        event = "run.operator_override",
        run_id = %run_id,
        failed_stage = failed_stage.map(|s| s.index()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitters_do_not_panic_without_subscriber() {
        let _span = run_span("run-1", "abc123").entered();
        emit_run_started("run-1", "abc123", 2, Stage::None);
        emit_stage_completed("run-1", Stage::RemovedFromSourceNetwork, 1);
        emit_run_failed("run-1", Stage::ClaimedToDestination, "rate limited");
        emit_rollback_finished("run-1", Stage::UnclaimedFromSource, 0);
        emit_operator_override("run-1", Some(Stage::ClaimedToDestination));
        emit_run_succeeded("run-1", 2, 40_000);
    }
}
