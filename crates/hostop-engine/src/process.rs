use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::StageError;

/// Runs an external program to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args` and an environment containing only `env`.
    /// A non-zero exit is an error.
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<(), StageError>;
}

/// Spawns real processes with stdio detached.
///
/// Detaching matters for daemons: an inherited pipe would never reach EOF.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<(), StageError> {
        let status = Command::new(program)
            .args(args)
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| StageError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        if !status.success() {
            return Err(StageError::ExitStatus {
                program: program.to_path_buf(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}
