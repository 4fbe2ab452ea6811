//! State store contract and its Redis adapter.
//!
//! Job state lives in a Redis hash per job, `kiln:job:<uuid>`, with one
//! field per [`JobField`]. The whole hash expires together; the TTL is set
//! once at submission. Every field has exactly one writer role, so no
//! cross-field transactions are needed.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const JOB_KEY_PREFIX: &str = "kiln:job";

/// Generate the deterministic store key for a job
pub fn job_key(job_id: &Uuid) -> String {
    format!("{}:{}", JOB_KEY_PREFIX, job_id)
}

/// Hash fields of the per-job record.
/// Writers: the pipeline owns `Status` and the output fields; the cancel
/// operation sets `Canceled`, and the pipeline resets it at terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobField {
    Status,
    CompileOutput,
    RunOutput,
    RunError,
    Canceled,
}

impl JobField {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobField::Status => "status",
            JobField::CompileOutput => "compile_output",
            JobField::RunOutput => "run_output",
            JobField::RunError => "run_error",
            JobField::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no value for job {job_id} field {field}")]
    NotFound { job_id: Uuid, field: JobField },
    #[error("state store unreachable: {0}")]
    Transport(String),
}

/// Contract the pipeline and the polling operations consume.
///
/// `get_field` distinguishes an absent or expired value (`NotFound`) from a
/// transport failure so the cancellation watcher can retry the latter
/// indefinitely.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn set_field(&self, job_id: Uuid, field: JobField, value: &str)
        -> Result<(), StoreError>;

    async fn get_field(&self, job_id: Uuid, field: JobField) -> Result<String, StoreError>;

    async fn set_expiry(&self, job_id: Uuid, ttl: Duration) -> Result<(), StoreError>;
}

/// Redis-backed store adapter.
/// The managed connection multiplexes; clone it per call.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn set_field(
        &self,
        job_id: Uuid,
        field: JobField,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(job_key(&job_id), field.as_str(), value)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn get_field(&self, job_id: Uuid, field: JobField) -> Result<String, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .hget(job_key(&job_id), field.as_str())
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        value.ok_or(StoreError::NotFound { job_id, field })
    }

    async fn set_expiry(&self, job_id: Uuid, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .expire(job_key(&job_id), ttl.as_secs() as i64)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(())
    }
}
