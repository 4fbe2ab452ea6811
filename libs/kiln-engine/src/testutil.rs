//! In-memory collaborators for engine tests: a recording state store, a
//! scripted step producer, and a counting workspace.

use crate::steps::{StepHandle, StepKind, StepProducer, StepProducerFactory};
use crate::workspace::{JobWorkspace, WorkspaceLifecycle};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kiln_common::store::{JobField, StateStore, StoreError};
use kiln_common::types::{Sdk, Status};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

pub(crate) struct MemoryStore {
    fields: Mutex<HashMap<(Uuid, JobField), String>>,
    status_history: Mutex<Vec<Status>>,
    expiry: Mutex<Option<Duration>>,
    fail_writes: AtomicBool,
    fail_expiry: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fields: Mutex::new(HashMap::new()),
            status_history: Mutex::new(Vec::new()),
            expiry: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
            fail_expiry: AtomicBool::new(false),
        })
    }

    /// Write a field directly, bypassing failure injection. Used to model
    /// writers other than the pipeline, like the cancel operation.
    pub fn seed(&self, job_id: Uuid, field: JobField, value: &str) {
        self.fields
            .lock()
            .unwrap()
            .insert((job_id, field), value.to_string());
    }

    pub fn field(&self, job_id: Uuid, field: JobField) -> Option<String> {
        self.fields.lock().unwrap().get(&(job_id, field)).cloned()
    }

    /// Status values in the order the pipeline wrote them.
    pub fn status_history(&self) -> Vec<Status> {
        self.status_history.lock().unwrap().clone()
    }

    pub fn expiry(&self) -> Option<Duration> {
        *self.expiry.lock().unwrap()
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_expiry(&self, on: bool) {
        self.fail_expiry.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn set_field(
        &self,
        job_id: Uuid,
        field: JobField,
        value: &str,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("injected write failure".to_string()));
        }
        self.fields
            .lock()
            .unwrap()
            .insert((job_id, field), value.to_string());
        if field == JobField::Status {
            if let Some(status) = Status::parse(value) {
                self.status_history.lock().unwrap().push(status);
            }
        }
        Ok(())
    }

    async fn get_field(&self, job_id: Uuid, field: JobField) -> Result<String, StoreError> {
        self.fields
            .lock()
            .unwrap()
            .get(&(job_id, field))
            .cloned()
            .ok_or(StoreError::NotFound { job_id, field })
    }

    async fn set_expiry(&self, _job_id: Uuid, ttl: Duration) -> Result<(), StoreError> {
        if self.fail_expiry.load(Ordering::SeqCst) {
            return Err(StoreError::Transport(
                "injected expiry failure".to_string(),
            ));
        }
        *self.expiry.lock().unwrap() = Some(ttl);
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) enum ScriptedStep {
    Succeed { output: Option<Vec<u8>> },
    Fail { error: String, output: Option<Vec<u8>> },
    Hang,
    SetupFail,
}

impl ScriptedStep {
    pub fn succeed() -> Self {
        ScriptedStep::Succeed { output: None }
    }

    pub fn succeed_with(output: &[u8]) -> Self {
        ScriptedStep::Succeed {
            output: Some(output.to_vec()),
        }
    }

    pub fn fail(error: &str) -> Self {
        ScriptedStep::Fail {
            error: error.to_string(),
            output: None,
        }
    }

    pub fn fail_with(error: &str, output: &[u8]) -> Self {
        ScriptedStep::Fail {
            error: error.to_string(),
            output: Some(output.to_vec()),
        }
    }

    pub fn hang() -> Self {
        ScriptedStep::Hang
    }

    pub fn setup_fail() -> Self {
        ScriptedStep::SetupFail
    }
}

/// Plays back a fixed list of step outcomes; hangs if the script runs dry.
pub(crate) struct ScriptedProducer {
    script: Mutex<VecDeque<ScriptedStep>>,
    launches: Arc<AtomicUsize>,
}

impl ScriptedProducer {
    pub fn new(script: Vec<ScriptedStep>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `launch` calls, usable after the producer is
    /// handed to the pipeline.
    pub fn launch_counter(&self) -> Arc<AtomicUsize> {
        self.launches.clone()
    }
}

fn buffered_output(output: Option<Vec<u8>>) -> Option<oneshot::Receiver<Vec<u8>>> {
    output.map(|bytes| {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(bytes);
        rx
    })
}

#[async_trait]
impl StepProducer for ScriptedProducer {
    async fn launch(&self, _step: StepKind) -> Result<StepHandle> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let planned = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedStep::Hang);

        if let ScriptedStep::SetupFail = planned {
            return Err(anyhow!("scripted setup failure"));
        }

        let (success_tx, success) = oneshot::channel();
        let (error_tx, error) = oneshot::channel();
        match planned {
            ScriptedStep::Succeed { output } => {
                let output = buffered_output(output);
                let _ = success_tx.send(true);
                drop(error_tx);
                Ok(StepHandle {
                    success,
                    error,
                    output,
                })
            }
            ScriptedStep::Fail { error: msg, output } => {
                let output = buffered_output(output);
                let _ = error_tx.send(msg);
                let _ = success_tx.send(false);
                Ok(StepHandle {
                    success,
                    error,
                    output,
                })
            }
            ScriptedStep::Hang => {
                tokio::spawn(async move {
                    let _hold = (success_tx, error_tx);
                    std::future::pending::<()>().await;
                });
                Ok(StepHandle {
                    success,
                    error,
                    output: None,
                })
            }
            ScriptedStep::SetupFail => unreachable!(),
        }
    }
}

/// Hands every job the same scripted outcome list.
pub(crate) struct ScriptedFactory {
    script: Vec<ScriptedStep>,
}

impl ScriptedFactory {
    pub fn new(script: Vec<ScriptedStep>) -> Self {
        Self { script }
    }
}

impl StepProducerFactory for ScriptedFactory {
    fn for_job(&self, _sdk: Sdk, _workspace: &JobWorkspace) -> Result<Box<dyn StepProducer>> {
        Ok(Box::new(ScriptedProducer::new(self.script.clone())))
    }
}

/// Factory whose construction always fails, for submit-path error tests.
pub(crate) struct FailingFactory;

impl StepProducerFactory for FailingFactory {
    fn for_job(&self, sdk: Sdk, _workspace: &JobWorkspace) -> Result<Box<dyn StepProducer>> {
        Err(anyhow!("no step executables for sdk {sdk}"))
    }
}

#[derive(Clone)]
pub(crate) struct CountingWorkspace {
    destroyed: Arc<AtomicUsize>,
}

impl CountingWorkspace {
    pub fn new() -> Self {
        Self {
            destroyed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn destroy_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkspaceLifecycle for CountingWorkspace {
    async fn destroy(&self) -> io::Result<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
