use std::path::PathBuf;

use hostop_core::OperatorError;

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("Operation not found: {0}")]
    NotFound(String),

    #[error("operation {0} is already done")]
    AlreadyDone(String),

    #[error("failed to allocate a unique operation name")]
    IdSpaceExhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid artifact service URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error object returned by the artifact service.
    #[error("{message}")]
    Remote {
        status: u16,
        code: i64,
        message: String,
    },

    #[error("unparseable error response (status {status})")]
    MalformedErrorBody { status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus { program: PathBuf, status: String },
}

impl StageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcedureError {
    #[error("stage {index} ({stage}) failed: {source}")]
    StageFailed {
        stage: String,
        index: usize,
        #[source]
        source: StageError,
    },
}

impl ProcedureError {
    pub fn stage(&self) -> &str {
        match self {
            Self::StageFailed { stage, .. } => stage,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("invalid CreateCvdRequest: {0}")]
    Validation(String),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl From<OperationError> for OperatorError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::NotFound(_) => OperatorError::NotFound(err.to_string()),
            OperationError::AlreadyDone(_) | OperationError::IdSpaceExhausted => {
                tracing::error!(error = %err, "operation registry invariant violated");
                OperatorError::internal("Internal server error")
            }
        }
    }
}

impl From<InstanceError> for OperatorError {
    fn from(err: InstanceError) -> Self {
        match err {
            InstanceError::Validation(_) => OperatorError::Validation(err.to_string()),
            InstanceError::Operation(e) => e.into(),
        }
    }
}

impl From<ProcedureError> for OperatorError {
    fn from(err: ProcedureError) -> Self {
        OperatorError::Stage {
            stage: err.stage().to_owned(),
            message: err.to_string(),
        }
    }
}
