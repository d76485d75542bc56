use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use hostop_core::api::CreateCvdRequest;
use hostop_settings::OrchestratorSettings;
use tokio::sync::Mutex;

use crate::downloader::{AndroidBuild, ArtifactDownloader};
use crate::procedure::{Procedure, Stage};
use crate::process::ProcessRunner;
use crate::stages::{CreateDirStage, DownloadCvdStage, StartCvdServerStage};

/// Turns a validated request into the procedure that fulfils it.
pub trait ProcedureBuilder: Send + Sync {
    fn build(&self, req: &CreateCvdRequest) -> Procedure;
}

/// Builds the CVD launch sequence.
///
/// The download lock and the server-started flag live here, so every
/// procedure built by one builder shares them. Each procedure also gets a
/// per-build artifacts directory, `<artifacts>/<build_id>_<target>`, and a
/// fresh home directory, `<homes>/cvd-<n>`, numbered from 1 per builder.
pub struct LaunchCvdProcedureBuilder {
    cvd_bin: PathBuf,
    cvd_bin_target: String,
    cvd_artifact_name: String,
    artifacts_root: PathBuf,
    homes_root: PathBuf,
    downloader: Arc<dyn ArtifactDownloader>,
    runner: Arc<dyn ProcessRunner>,
    download_lock: Arc<Mutex<()>>,
    server_started: Arc<Mutex<bool>>,
    instance_counter: AtomicU32,
    create_artifacts_root: Arc<dyn Stage>,
    create_homes_root: Arc<dyn Stage>,
}

impl LaunchCvdProcedureBuilder {
    #[must_use]
    pub fn new(
        settings: &OrchestratorSettings,
        downloader: Arc<dyn ArtifactDownloader>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            cvd_bin: settings.cvd_bin(),
            cvd_bin_target: settings.cvd_bin_target.clone(),
            cvd_artifact_name: settings.cvd_artifact_name.clone(),
            artifacts_root: settings.artifacts_root_dir(),
            homes_root: settings.homes_root_dir(),
            downloader,
            runner,
            download_lock: Arc::default(),
            server_started: Arc::default(),
            instance_counter: AtomicU32::new(0),
            create_artifacts_root: Arc::new(CreateDirStage::new(
                "create_artifacts_root_dir",
                settings.artifacts_root_dir(),
            )),
            create_homes_root: Arc::new(CreateDirStage::new(
                "create_homes_root_dir",
                settings.homes_root_dir(),
            )),
        }
    }
}

impl ProcedureBuilder for LaunchCvdProcedureBuilder {
    fn build(&self, req: &CreateCvdRequest) -> Procedure {
        let download: Arc<dyn Stage> = Arc::new(DownloadCvdStage {
            bin: self.cvd_bin.clone(),
            build: AndroidBuild {
                id: req.fetch_cvd_build_id.clone(),
                target: self.cvd_bin_target.clone(),
            },
            artifact: self.cvd_artifact_name.clone(),
            downloader: Arc::clone(&self.downloader),
            lock: Arc::clone(&self.download_lock),
        });
        let start_server: Arc<dyn Stage> = Arc::new(StartCvdServerStage {
            program: self.cvd_bin.clone(),
            runner: Arc::clone(&self.runner),
            started: Arc::clone(&self.server_started),
        });

        let mut procedure = Procedure::new(vec![
            download,
            start_server,
            Arc::clone(&self.create_artifacts_root),
        ]);
        if let Some(info) = &req.build_info {
            procedure.push(Arc::new(CreateDirStage::new(
                "create_build_artifacts_dir",
                self.artifacts_root
                    .join(format!("{}_{}", info.build_id, info.target)),
            )));
        }
        procedure.push(Arc::clone(&self.create_homes_root));

        let instance = self.instance_counter.fetch_add(1, Ordering::SeqCst) + 1;
        procedure.push(Arc::new(
            CreateDirStage::new(
                "create_instance_home_dir",
                self.homes_root.join(format!("cvd-{instance}")),
            )
            .fail_if_exists(true),
        ));
        procedure
    }
}
