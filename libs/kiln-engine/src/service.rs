//! Job service: the submission surface an external transport layer
//! consumes. `submit` is the only operation that touches a pipeline;
//! everything else is a direct state store read or write.

use crate::pipeline::process_job;
use crate::steps::{ProcessStepFactory, StepProducerFactory};
use crate::workspace::{JobWorkspace, WorkspaceLifecycle};
use kiln_common::config::Config;
use kiln_common::store::{JobField, StateStore, StoreError};
use kiln_common::types::{Sdk, Status};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

/// Errors surfaced synchronously to the submitter. Everything that happens
/// after `submit` returns is observable only through polling.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub struct JobService {
    store: Arc<dyn StateStore>,
    factory: Arc<dyn StepProducerFactory>,
    config: Config,
}

impl JobService {
    pub fn new(store: Arc<dyn StateStore>, config: Config) -> Self {
        Self::with_factory(store, Arc::new(ProcessStepFactory), config)
    }

    pub fn with_factory(
        store: Arc<dyn StateStore>,
        factory: Arc<dyn StepProducerFactory>,
        config: Config,
    ) -> Self {
        Self {
            store,
            factory,
            config,
        }
    }

    /// Accept a job: materialize its workspace, build its step producer,
    /// mark it `Validating`, arm the store TTL, and detach the pipeline
    /// task. Setup failures tear the workspace back down before reporting,
    /// so no job ever holds file-system resources without a live pipeline.
    pub async fn submit(&self, sdk: Sdk, code: &str) -> Result<Uuid, ServiceError> {
        if !self.config.enabled_sdks.contains(&sdk) {
            return Err(ServiceError::InvalidArgument(format!(
                "sdk not enabled: {sdk}"
            )));
        }

        let job_id = Uuid::new_v4();
        let workspace = JobWorkspace::create(&self.config.working_dir, job_id, sdk, code)
            .await
            .map_err(|e| ServiceError::Internal(format!("workspace setup failed: {e}")))?;

        let producer = match self.factory.for_job(sdk, &workspace) {
            Ok(producer) => producer,
            Err(err) => {
                discard(&workspace, job_id).await;
                return Err(ServiceError::Internal(format!("step setup failed: {err:#}")));
            }
        };

        if let Err(err) = self
            .store
            .set_field(job_id, JobField::Status, Status::Validating.as_str())
            .await
        {
            error!(%job_id, "initial status write failed: {err}");
        }
        if let Err(err) = self.store.set_expiry(job_id, self.config.job_expiry()).await {
            discard(&workspace, job_id).await;
            return Err(ServiceError::Internal(format!(
                "job expiry setup failed: {err}"
            )));
        }

        info!(%job_id, %sdk, "job accepted");
        tokio::spawn(process_job(
            self.store.clone(),
            producer,
            Box::new(workspace),
            job_id,
            self.config.pipeline_timeout(),
            self.config.cancel_poll(),
        ));
        Ok(job_id)
    }

    /// Ask a running job to stop. Idempotent: the flag is last-writer-wins
    /// and the pipeline resets it once the job is terminal.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), ServiceError> {
        info!(%job_id, "cancel requested");
        self.store
            .set_field(job_id, JobField::Canceled, "true")
            .await
            .map_err(|e| ServiceError::Internal(format!("cancel flag write failed: {e}")))
    }

    pub async fn status(&self, job_id: Uuid) -> Result<Status, ServiceError> {
        let raw = self.read_field(job_id, JobField::Status).await?;
        Status::parse(&raw).ok_or_else(|| {
            ServiceError::Internal(format!("stored status {raw:?} is not a known status"))
        })
    }

    pub async fn compile_output(&self, job_id: Uuid) -> Result<String, ServiceError> {
        self.read_field(job_id, JobField::CompileOutput).await
    }

    pub async fn run_output(&self, job_id: Uuid) -> Result<String, ServiceError> {
        self.read_field(job_id, JobField::RunOutput).await
    }

    pub async fn run_error(&self, job_id: Uuid) -> Result<String, ServiceError> {
        self.read_field(job_id, JobField::RunError).await
    }

    /// Any store failure reads as NotFound to pollers; from outside, an
    /// expired job and a transport blip are indistinguishable.
    async fn read_field(&self, job_id: Uuid, field: JobField) -> Result<String, ServiceError> {
        self.store.get_field(job_id, field).await.map_err(|err| {
            if let StoreError::Transport(e) = &err {
                error!(%job_id, %field, "store read failed: {e}");
            }
            ServiceError::NotFound(format!("no {field} for job {job_id}"))
        })
    }
}

async fn discard(workspace: &JobWorkspace, job_id: Uuid) {
    if let Err(err) = workspace.destroy().await {
        error!(%job_id, "workspace discard failed: {err}");
    }
}
