//! Operation data model as exposed over the wire.

use serde::{Deserialize, Serialize};

/// Fixed message recorded on operations whose provisioning failed.
pub const ERR_MSG_LAUNCH_CVD_FAILED: &str = "failed to launch cvd";

/// A handle to a long-running task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OperationResult>,
}

impl Operation {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            result: None,
        }
    }

    /// Whether the operation finished with a non-empty error message.
    pub fn is_error(&self) -> bool {
        self.result.as_ref().is_some_and(OperationResult::is_error)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationResultError>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(OperationResultError {
                error: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.error.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResultError {
    pub error: String,
}
