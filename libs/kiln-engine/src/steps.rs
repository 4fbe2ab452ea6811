//! Step producers: turn one pipeline step into asynchronous
//! success/error/output signals.
//!
//! Validate and Prepare are in-process checks; Compile and Run are
//! external process invocations with combined stdout+stderr capture. All
//! four are normalized to the same [`StepHandle`] signal trio so the
//! pipeline races them with one piece of code.

use crate::workspace::JobWorkspace;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kiln_common::types::Sdk;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Validate,
    Prepare,
    Compile,
    Run,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Validate => write!(f, "validate"),
            StepKind::Prepare => write!(f, "prepare"),
            StepKind::Compile => write!(f, "compile"),
            StepKind::Run => write!(f, "run"),
        }
    }
}

/// Single-shot signals for one launched step.
///
/// `error` fires iff `success` resolves to false; `output` is present for
/// Compile and Run only. On completion the producer sends output first,
/// then the error (on failure), then the success flag, so an observer that
/// saw the success flag can collect the rest without blocking.
pub struct StepHandle {
    pub success: oneshot::Receiver<bool>,
    pub error: oneshot::Receiver<String>,
    pub output: Option<oneshot::Receiver<Vec<u8>>>,
}

/// Collaborator contract consumed by the pipeline.
///
/// `launch` must not block beyond spawning the underlying work; a returned
/// error is a setup failure, distinct from the launched step failing.
#[async_trait]
pub trait StepProducer: Send + Sync {
    async fn launch(&self, step: StepKind) -> Result<StepHandle>;
}

/// Builder seam used by the submission handler: one producer per job,
/// keyed by SDK.
pub trait StepProducerFactory: Send + Sync {
    fn for_job(&self, sdk: Sdk, workspace: &JobWorkspace) -> Result<Box<dyn StepProducer>>;
}

/// External command invocation, resolved per SDK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// Compiler invocation for the SDK, with artifacts landing in `bin_dir`.
pub fn compile_spec(sdk: Sdk, source_file: &Path, bin_dir: &Path) -> CommandSpec {
    let source = source_file.display().to_string();
    let bin = bin_dir.display().to_string();
    match sdk {
        Sdk::Java => CommandSpec {
            program: "javac".to_string(),
            args: vec!["-d".to_string(), bin, source],
        },
        Sdk::Go => CommandSpec {
            program: "go".to_string(),
            args: vec![
                "build".to_string(),
                "-o".to_string(),
                format!("{}/job", bin),
                source,
            ],
        },
        Sdk::Python => CommandSpec {
            program: "python3".to_string(),
            args: vec!["-m".to_string(), "py_compile".to_string(), source],
        },
        Sdk::Scio => CommandSpec {
            program: "scalac".to_string(),
            args: vec!["-d".to_string(), bin, source],
        },
    }
}

/// Run invocation for the SDK. JVM SDKs need the entry class discovered
/// from the compiled artifacts.
pub fn run_spec(
    sdk: Sdk,
    source_file: &Path,
    bin_dir: &Path,
    main_class: Option<&str>,
) -> Result<CommandSpec> {
    let bin = bin_dir.display().to_string();
    match sdk {
        Sdk::Java => {
            let class = main_class.ok_or_else(|| anyhow!("java run needs an entry class"))?;
            Ok(CommandSpec {
                program: "java".to_string(),
                args: vec!["-cp".to_string(), bin, class.to_string()],
            })
        }
        Sdk::Go => Ok(CommandSpec {
            program: bin_dir.join("job").display().to_string(),
            args: vec![],
        }),
        Sdk::Python => Ok(CommandSpec {
            program: "python3".to_string(),
            args: vec![source_file.display().to_string()],
        }),
        Sdk::Scio => {
            let class = main_class.ok_or_else(|| anyhow!("scio run needs an entry class"))?;
            Ok(CommandSpec {
                program: "scala".to_string(),
                args: vec!["-cp".to_string(), bin, class.to_string()],
            })
        }
    }
}

/// Find the entry class among compiled artifacts, skipping inner classes.
/// Sorted so the pick is deterministic when several top-level classes
/// compiled.
async fn main_class_in(bin_dir: &Path) -> Result<String> {
    let mut classes = Vec::new();
    let mut entries = fs::read_dir(bin_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(stem) = name.strip_suffix(".class") {
            if !stem.contains('$') {
                classes.push(stem.to_string());
            }
        }
    }
    classes.sort();
    classes
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no compiled class found in {}", bin_dir.display()))
}

/// In-process validation of the submitted source.
async fn validate_source(sdk: Sdk, source_file: PathBuf) -> Result<(), String> {
    let meta = fs::metadata(&source_file)
        .await
        .map_err(|e| format!("source file unreadable: {}", e))?;
    if meta.len() == 0 {
        return Err("source file is empty".to_string());
    }
    let expected = sdk.file_extension();
    let actual = source_file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    if actual != expected {
        return Err(format!(
            "expected a .{} source file, got .{}",
            expected, actual
        ));
    }
    Ok(())
}

/// In-process source normalization before the compiler sees the file.
async fn prepare_source(source_file: PathBuf) -> Result<(), String> {
    let raw = fs::read_to_string(&source_file)
        .await
        .map_err(|e| format!("source file unreadable: {}", e))?;
    let mut cleaned = raw
        .strip_prefix('\u{feff}')
        .map(str::to_string)
        .unwrap_or_else(|| raw.clone());
    if !cleaned.ends_with('\n') {
        cleaned.push('\n');
    }
    if cleaned != raw {
        fs::write(&source_file, &cleaned)
            .await
            .map_err(|e| format!("source rewrite failed: {}", e))?;
    }
    Ok(())
}

/// Spawn an in-process check and wire its result into a signal trio.
fn launch_check<F>(work: F) -> StepHandle
where
    F: std::future::Future<Output = Result<(), String>> + Send + 'static,
{
    let (success_tx, success) = oneshot::channel();
    let (error_tx, error) = oneshot::channel();
    tokio::spawn(async move {
        match work.await {
            Ok(()) => {
                let _ = success_tx.send(true);
            }
            Err(msg) => {
                let _ = error_tx.send(msg);
                let _ = success_tx.send(false);
            }
        }
    });
    StepHandle {
        success,
        error,
        output: None,
    }
}

/// Spawn an external process and wire its exit into a signal trio, with
/// combined stdout+stderr as the output signal.
fn launch_process(spec: CommandSpec, cwd: PathBuf) -> StepHandle {
    let (success_tx, success) = oneshot::channel();
    let (error_tx, error) = oneshot::channel();
    let (output_tx, output) = oneshot::channel();
    tokio::spawn(async move {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).current_dir(&cwd);
        match cmd.output().await {
            Ok(out) => {
                let mut combined = out.stdout;
                combined.extend_from_slice(&out.stderr);
                let _ = output_tx.send(combined);
                if out.status.success() {
                    let _ = success_tx.send(true);
                } else {
                    let _ = error_tx.send(out.status.to_string());
                    let _ = success_tx.send(false);
                }
            }
            Err(e) => {
                let _ = output_tx.send(Vec::new());
                let _ = error_tx.send(e.to_string());
                let _ = success_tx.send(false);
            }
        }
    });
    StepHandle {
        success,
        error,
        output: Some(output),
    }
}

/// Process-backed step producer: in-process checks for Validate/Prepare,
/// per-SDK external commands for Compile/Run.
pub struct ProcessStepProducer {
    sdk: Sdk,
    root: PathBuf,
    source_file: PathBuf,
    bin_dir: PathBuf,
}

impl ProcessStepProducer {
    pub fn new(sdk: Sdk, workspace: &JobWorkspace) -> Self {
        Self {
            sdk,
            root: workspace.root().to_path_buf(),
            source_file: workspace.source_file().to_path_buf(),
            bin_dir: workspace.bin_dir().to_path_buf(),
        }
    }
}

#[async_trait]
impl StepProducer for ProcessStepProducer {
    async fn launch(&self, step: StepKind) -> Result<StepHandle> {
        match step {
            StepKind::Validate => Ok(launch_check(validate_source(
                self.sdk,
                self.source_file.clone(),
            ))),
            StepKind::Prepare => Ok(launch_check(prepare_source(self.source_file.clone()))),
            StepKind::Compile => {
                let spec = compile_spec(self.sdk, &self.source_file, &self.bin_dir);
                Ok(launch_process(spec, self.root.clone()))
            }
            StepKind::Run => {
                let main_class = match self.sdk {
                    Sdk::Java | Sdk::Scio => Some(main_class_in(&self.bin_dir).await?),
                    Sdk::Go | Sdk::Python => None,
                };
                let spec = run_spec(
                    self.sdk,
                    &self.source_file,
                    &self.bin_dir,
                    main_class.as_deref(),
                )?;
                Ok(launch_process(spec, self.root.clone()))
            }
        }
    }
}

pub struct ProcessStepFactory;

impl StepProducerFactory for ProcessStepFactory {
    fn for_job(&self, sdk: Sdk, workspace: &JobWorkspace) -> Result<Box<dyn StepProducer>> {
        Ok(Box::new(ProcessStepProducer::new(sdk, workspace)))
    }
}
