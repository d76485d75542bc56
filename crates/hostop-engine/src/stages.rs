//! Stages of the CVD launch procedure.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::downloader::{AndroidBuild, ArtifactDownloader};
use crate::errors::StageError;
use crate::procedure::Stage;
use crate::process::ProcessRunner;

pub const DOWNLOADED_BIN_MODE: u32 = 0o750;
pub const CREATED_DIR_MODE: u32 = 0o755;
pub const ENV_ANDROID_HOST_OUT: &str = "ANDROID_HOST_OUT";

/// Fetches the cvd binary unless it is already on disk.
///
/// `lock` is shared by every stage built for the same binary so concurrent
/// procedures download at most once. The body is streamed to a `.part`
/// sibling and only renamed onto `bin` once complete, so `bin` existing
/// always means a whole binary.
pub struct DownloadCvdStage {
    pub bin: PathBuf,
    pub build: AndroidBuild,
    pub artifact: String,
    pub downloader: Arc<dyn ArtifactDownloader>,
    pub lock: Arc<Mutex<()>>,
}

#[async_trait]
impl Stage for DownloadCvdStage {
    fn name(&self) -> &str {
        "download_cvd"
    }

    async fn run(&self) -> Result<(), StageError> {
        let _guard = self.lock.lock().await;

        let exists = tokio::fs::try_exists(&self.bin)
            .await
            .map_err(|e| StageError::io(&self.bin, e))?;
        if exists {
            debug!(path = %self.bin.display(), "cvd binary already present");
            return Ok(());
        }

        if let Some(parent) = self.bin.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageError::io(parent, e))?;
        }
        let part = partial_path(&self.bin);
        if let Err(e) = self.download_to(&part).await {
            if let Err(rm) = tokio::fs::remove_file(&part).await {
                warn!(path = %part.display(), error = %rm, "failed to remove partial download");
            }
            return Err(e);
        }
        tokio::fs::rename(&part, &self.bin)
            .await
            .map_err(|e| StageError::io(&self.bin, e))?;
        info!(path = %self.bin.display(), build_id = %self.build.id, "cvd binary downloaded");
        Ok(())
    }
}

impl DownloadCvdStage {
    async fn download_to(&self, part: &Path) -> Result<(), StageError> {
        // A leftover from an interrupted run is truncated here.
        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| StageError::io(part, e))?;
        self.downloader
            .download(&mut file, &self.build, &self.artifact)
            .await?;
        file.flush().await.map_err(|e| StageError::io(part, e))?;
        drop(file);

        tokio::fs::set_permissions(part, std::fs::Permissions::from_mode(DOWNLOADED_BIN_MODE))
            .await
            .map_err(|e| StageError::io(part, e))
    }
}

fn partial_path(bin: &Path) -> PathBuf {
    let mut name = bin.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Starts the cvd server daemon once per process.
///
/// `started` is shared across procedures; it is only set after a successful
/// start so a failed attempt may be retried by a later request.
pub struct StartCvdServerStage {
    pub program: PathBuf,
    pub runner: Arc<dyn ProcessRunner>,
    pub started: Arc<Mutex<bool>>,
}

#[async_trait]
impl Stage for StartCvdServerStage {
    fn name(&self) -> &str {
        "start_cvd_server"
    }

    async fn run(&self) -> Result<(), StageError> {
        let mut started = self.started.lock().await;
        if *started {
            return Ok(());
        }
        self.runner
            .run(
                &self.program,
                &[],
                &[(ENV_ANDROID_HOST_OUT.to_owned(), String::new())],
            )
            .await?;
        *started = true;
        info!(program = %self.program.display(), "cvd server started");
        Ok(())
    }
}

/// Creates a directory, parents included.
pub struct CreateDirStage {
    name: String,
    dir: PathBuf,
    fail_if_exists: bool,
}

impl CreateDirStage {
    /// Idempotent directory creation.
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            fail_if_exists: false,
        }
    }

    /// Fail instead of succeeding when the directory is already there.
    #[must_use]
    pub fn fail_if_exists(mut self, fail: bool) -> Self {
        self.fail_if_exists = fail;
        self
    }
}

#[async_trait]
impl Stage for CreateDirStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<(), StageError> {
        match tokio::fs::create_dir(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && !self.fail_if_exists => {}
            Err(e) => return Err(StageError::io(&self.dir, e)),
        }
        // create_dir is subject to the umask.
        tokio::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(CREATED_DIR_MODE))
            .await
            .map_err(|e| StageError::io(&self.dir, e))
    }
}
