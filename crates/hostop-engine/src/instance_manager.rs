use std::sync::Arc;

use hostop_core::api::CreateCvdRequest;
use hostop_core::operation::ERR_MSG_LAUNCH_CVD_FAILED;
use hostop_core::{Operation, OperationResult};
use tracing::{error, info, instrument};

use crate::builder::ProcedureBuilder;
use crate::errors::InstanceError;
use crate::operations::OperationRegistry;

/// Accepts CVD creation requests and runs them in the background.
pub struct InstanceManager {
    operations: Arc<OperationRegistry>,
    builder: Arc<dyn ProcedureBuilder>,
}

impl InstanceManager {
    #[must_use]
    pub fn new(operations: Arc<OperationRegistry>, builder: Arc<dyn ProcedureBuilder>) -> Self {
        Self {
            operations,
            builder,
        }
    }

    /// Registry the manager records its operations in.
    #[must_use]
    pub fn operations(&self) -> &Arc<OperationRegistry> {
        &self.operations
    }

    /// Validate `req`, open an operation and launch the procedure.
    ///
    /// Returns as soon as the operation exists; the work runs on a spawned
    /// task that completes the operation exactly once.
    #[instrument(skip_all)]
    pub fn create_cvd(&self, req: CreateCvdRequest) -> Result<Operation, InstanceError> {
        validate_request(&req)?;
        let op = self.operations.create()?;
        info!(operation = %op.name, fetch_cvd_build_id = %req.fetch_cvd_build_id, "launching cvd");

        let operations = Arc::clone(&self.operations);
        let builder = Arc::clone(&self.builder);
        let name = op.name.clone();
        tokio::spawn(async move {
            let procedure = builder.build(&req);
            let result = match procedure.execute().await {
                Ok(()) => {
                    info!(operation = %name, "cvd launched");
                    OperationResult::ok()
                }
                Err(e) => {
                    error!(operation = %name, error = %e, "failed to launch cvd");
                    OperationResult::error(ERR_MSG_LAUNCH_CVD_FAILED)
                }
            };
            if let Err(e) = operations.complete(&name, result) {
                error!(operation = %name, error = %e, "failed to complete operation");
            }
        });

        Ok(op)
    }
}

fn validate_request(req: &CreateCvdRequest) -> Result<(), InstanceError> {
    let empty = |field: &str| InstanceError::Validation(format!("field {field} is empty"));

    let Some(build_info) = &req.build_info else {
        return Err(empty("build_info"));
    };
    if build_info.build_id.is_empty() {
        return Err(empty("build_info.build_id"));
    }
    if build_info.target.is_empty() {
        return Err(empty("build_info.target"));
    }
    // Both end up in a directory name.
    for (field, value) in [
        ("build_info.build_id", &build_info.build_id),
        ("build_info.target", &build_info.target),
    ] {
        if value.contains('/') {
            return Err(InstanceError::Validation(format!(
                "field {field} must not contain '/'"
            )));
        }
    }
    if req.fetch_cvd_build_id.is_empty() {
        return Err(empty("fetch_cvd_build_id"));
    }
    if req.instances_count == Some(0) {
        return Err(InstanceError::Validation(
            "field instances_count must be at least 1".into(),
        ));
    }
    Ok(())
}
