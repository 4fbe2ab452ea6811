//! The pipeline orchestrator: one detached task per job that walks
//! Validate → Prepare → Compile → Run, racing every step against a global
//! deadline and a client cancellation flag, and persisting each transition
//! to the state store.
//!
//! The pipeline holds no authoritative in-memory job state; everything a
//! poller can observe goes through the store. Store writes are best-effort:
//! a failed write is logged and the pipeline keeps going, trading stale
//! visibility for never aborting a running job.

use crate::steps::{StepHandle, StepKind, StepProducer};
use crate::workspace::WorkspaceLifecycle;
use kiln_common::store::{JobField, StateStore};
use kiln_common::types::Status;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    kind: StepKind,
    error_status: Status,
    next_status: Status,
}

const STEP_SEQUENCE: [StepPlan; 4] = [
    StepPlan {
        kind: StepKind::Validate,
        error_status: Status::ValidationError,
        next_status: Status::Preparing,
    },
    StepPlan {
        kind: StepKind::Prepare,
        error_status: Status::PreparationError,
        next_status: Status::Compiling,
    },
    StepPlan {
        kind: StepKind::Compile,
        error_status: Status::CompileError,
        next_status: Status::Executing,
    },
    StepPlan {
        kind: StepKind::Run,
        error_status: Status::RunError,
        next_status: Status::Finished,
    },
];

/// Outcome of racing one step against the deadline and cancellation.
/// First of the four wins and is observed at most once.
enum StepOutcome {
    Succeeded(Option<Vec<u8>>),
    Failed {
        error: String,
        output: Option<Vec<u8>>,
    },
    TimedOut,
    Canceled,
}

/// Run one job to a terminal status and tear its workspace down.
///
/// The submission handler has already written the initial `Validating`
/// status; every later transition belongs to this task. Teardown runs
/// exactly once, whichever way the pipeline ends.
pub async fn process_job(
    store: Arc<dyn StateStore>,
    producer: Box<dyn StepProducer>,
    workspace: Box<dyn WorkspaceLifecycle>,
    job_id: Uuid,
    timeout: Duration,
    cancel_poll: Duration,
) {
    let (cancel_tx, cancel_rx) = mpsc::channel(1);
    tokio::spawn(watch_cancel(store.clone(), job_id, cancel_poll, cancel_tx));

    drive_steps(&*store, &*producer, job_id, timeout, cancel_rx).await;
    cleanup(&*workspace, job_id).await;
}

async fn drive_steps(
    store: &dyn StateStore,
    producer: &dyn StepProducer,
    job_id: Uuid,
    timeout: Duration,
    mut cancel_rx: mpsc::Receiver<()>,
) {
    let deadline = Instant::now() + timeout;

    for plan in STEP_SEQUENCE {
        info!(%job_id, step = %plan.kind, "step starting");
        let handle = match producer.launch(plan.kind).await {
            Ok(handle) => handle,
            Err(err) => {
                error!(%job_id, step = %plan.kind, "step setup failed: {err:#}");
                clear_cancel_flag(store, job_id).await;
                set_status(store, job_id, Status::Error).await;
                return;
            }
        };

        match race_step(handle, deadline, &mut cancel_rx).await {
            StepOutcome::TimedOut => {
                finish_timed_out(store, job_id).await;
                return;
            }
            StepOutcome::Canceled => {
                finish_canceled(store, job_id).await;
                return;
            }
            StepOutcome::Failed { error, output } => {
                finish_step_failed(store, job_id, plan, error, output).await;
                return;
            }
            StepOutcome::Succeeded(output) => {
                advance(store, job_id, plan, output).await;
            }
        }
    }
}

/// Wait for the first of: deadline elapsed, cancellation delivered, step
/// resolved.
async fn race_step(
    mut handle: StepHandle,
    deadline: Instant,
    cancel_rx: &mut mpsc::Receiver<()>,
) -> StepOutcome {
    tokio::select! {
        _ = time::sleep_until(deadline) => StepOutcome::TimedOut,
        _ = recv_cancel(cancel_rx) => StepOutcome::Canceled,
        succeeded = &mut handle.success => {
            let output = collect_output(handle.output).await;
            match succeeded {
                Ok(true) => StepOutcome::Succeeded(output),
                Ok(false) => {
                    let error = handle
                        .error
                        .await
                        .unwrap_or_else(|_| "step reported no error detail".to_string());
                    StepOutcome::Failed { error, output }
                }
                Err(_) => StepOutcome::Failed {
                    error: "step task dropped before reporting".to_string(),
                    output,
                },
            }
        }
    }
}

/// Resolves only when a cancel signal is delivered. A closed channel means
/// the watcher exited without observing a cancel; park instead of firing.
async fn recv_cancel(cancel_rx: &mut mpsc::Receiver<()>) {
    match cancel_rx.recv().await {
        Some(()) => {}
        None => std::future::pending().await,
    }
}

async fn collect_output(output: Option<oneshot::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match output {
        Some(rx) => rx.await.ok(),
        None => None,
    }
}

/// Poll the cancel flag for one job.
///
/// The flag is absent until either the cancel operation sets it true or
/// the pipeline resets it false at a terminal state; absence and transport
/// errors both mean "keep polling". On true, deliver one best-effort
/// signal and stop; on false, the job already ended, stop silently.
pub(crate) async fn watch_cancel(
    store: Arc<dyn StateStore>,
    job_id: Uuid,
    poll: Duration,
    cancel_tx: mpsc::Sender<()>,
) {
    loop {
        match store.get_field(job_id, JobField::Canceled).await {
            Ok(flag) if flag == "true" => {
                let _ = cancel_tx.try_send(());
                return;
            }
            Ok(_) => return,
            Err(_) => time::sleep(poll).await,
        }
    }
}

async fn finish_timed_out(store: &dyn StateStore, job_id: Uuid) {
    error!(%job_id, "pipeline hit the execution deadline");
    clear_cancel_flag(store, job_id).await;
    set_status(store, job_id, Status::RunTimeout).await;
}

async fn finish_canceled(store: &dyn StateStore, job_id: Uuid) {
    info!(%job_id, "pipeline canceled by client");
    clear_cancel_flag(store, job_id).await;
    set_status(store, job_id, Status::Canceled).await;
}

async fn finish_step_failed(
    store: &dyn StateStore,
    job_id: Uuid,
    plan: StepPlan,
    error: String,
    output: Option<Vec<u8>>,
) {
    error!(%job_id, step = %plan.kind, "step failed: {error}");
    let combined = String::from_utf8_lossy(output.as_deref().unwrap_or_default()).into_owned();
    match plan.kind {
        StepKind::Compile => {
            set_field(
                store,
                job_id,
                JobField::CompileOutput,
                &format!("error: {}, output: {}", error, combined),
            )
            .await;
        }
        StepKind::Run => {
            set_field(
                store,
                job_id,
                JobField::RunError,
                &format!("error: {}, output: {}", error, combined),
            )
            .await;
        }
        _ => {}
    }
    set_status(store, job_id, plan.error_status).await;
    clear_cancel_flag(store, job_id).await;
}

async fn advance(store: &dyn StateStore, job_id: Uuid, plan: StepPlan, output: Option<Vec<u8>>) {
    info!(%job_id, step = %plan.kind, "step finished");
    match plan.kind {
        StepKind::Compile => {
            let combined =
                String::from_utf8_lossy(output.as_deref().unwrap_or_default()).into_owned();
            set_field(store, job_id, JobField::CompileOutput, &combined).await;
            set_status(store, job_id, plan.next_status).await;
        }
        StepKind::Run => {
            let combined =
                String::from_utf8_lossy(output.as_deref().unwrap_or_default()).into_owned();
            set_field(store, job_id, JobField::RunOutput, &combined).await;
            clear_cancel_flag(store, job_id).await;
            set_status(store, job_id, plan.next_status).await;
        }
        _ => set_status(store, job_id, plan.next_status).await,
    }
}

async fn cleanup(workspace: &dyn WorkspaceLifecycle, job_id: Uuid) {
    info!(%job_id, "tearing down workspace");
    if let Err(err) = workspace.destroy().await {
        error!(%job_id, "workspace teardown failed: {err}");
    }
}

async fn set_status(store: &dyn StateStore, job_id: Uuid, status: Status) {
    if let Err(err) = store
        .set_field(job_id, JobField::Status, status.as_str())
        .await
    {
        error!(%job_id, %status, "status write failed: {err}");
    }
}

async fn set_field(store: &dyn StateStore, job_id: Uuid, field: JobField, value: &str) {
    if let Err(err) = store.set_field(job_id, field, value).await {
        error!(%job_id, %field, "output write failed: {err}");
    }
}

/// Reset the cancel flag so a still-polling watcher exits instead of
/// firing against a job that already reached a terminal state.
async fn clear_cancel_flag(store: &dyn StateStore, job_id: Uuid) {
    if let Err(err) = store.set_field(job_id, JobField::Canceled, "false").await {
        error!(%job_id, "cancel flag reset failed: {err}");
    }
}
