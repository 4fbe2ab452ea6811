//! Per-job file-system resources.

use async_trait::async_trait;
use kiln_common::types::Sdk;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Teardown seam driven by the pipeline.
/// Destruction runs exactly once per job, after the terminal status is
/// persisted, no matter how the pipeline ended.
#[async_trait]
pub trait WorkspaceLifecycle: Send + Sync {
    async fn destroy(&self) -> io::Result<()>;
}

/// On-disk resources for one job: `<working_dir>/<job_id>/` containing the
/// submitted source as `<job_id>.<ext>` and a `bin/` folder for compiled
/// artifacts.
pub struct JobWorkspace {
    root: PathBuf,
    source_file: PathBuf,
    bin_dir: PathBuf,
}

impl JobWorkspace {
    pub async fn create(
        working_dir: &Path,
        job_id: Uuid,
        sdk: Sdk,
        code: &str,
    ) -> io::Result<Self> {
        let root = working_dir.join(job_id.to_string());
        let bin_dir = root.join("bin");
        fs::create_dir_all(&bin_dir).await?;

        let source_file = root.join(format!("{}.{}", job_id, sdk.file_extension()));
        fs::write(&source_file, code).await?;

        Ok(Self {
            root,
            source_file,
            bin_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }
}

#[async_trait]
impl WorkspaceLifecycle for JobWorkspace {
    async fn destroy(&self) -> io::Result<()> {
        fs::remove_dir_all(&self.root).await
    }
}
