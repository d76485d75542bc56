use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not JSON, or its merged result does not fit [`HostopSettings`].
    ///
    /// [`HostopSettings`]: crate::HostopSettings
    #[error("invalid settings file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode default settings: {0}")]
    Defaults(#[source] serde_json::Error),

    /// A `HOSTOP_*` variable was set to something unusable.
    #[error("invalid value {value:?} for {key}: {reason}")]
    EnvOverride {
        key: String,
        value: String,
        reason: &'static str,
    },
}

impl SettingsError {
    pub(crate) fn read(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(path: &std::path::Path, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;
