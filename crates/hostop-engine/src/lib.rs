//! Provisioning engine: the operation registry, the staged procedure
//! pipeline and the instance manager that ties them together.

pub mod builder;
pub mod downloader;
pub mod errors;
pub mod instance_manager;
pub mod operations;
pub mod procedure;
pub mod process;
pub mod stages;

pub use builder::{LaunchCvdProcedureBuilder, ProcedureBuilder};
pub use downloader::{AndroidBuild, ArtifactDownloader, SignedUrlArtifactDownloader};
pub use errors::{DownloadError, InstanceError, OperationError, ProcedureError, StageError};
pub use instance_manager::InstanceManager;
pub use operations::OperationRegistry;
pub use procedure::{Procedure, Stage};
pub use process::{ProcessRunner, TokioProcessRunner};
