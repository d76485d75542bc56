use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::{ProcedureError, StageError};

/// One unit of provisioning work.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), StageError>;
}

/// Ordered stages executed until the first failure.
#[derive(Clone, Default)]
pub struct Procedure {
    stages: Vec<Arc<dyn Stage>>,
}

impl Procedure {
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn push(&mut self, stage: Arc<dyn Stage>) {
        self.stages.push(stage);
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run each stage in order. Stops at the first failing stage and reports
    /// its name along with the cause.
    pub async fn execute(&self) -> Result<(), ProcedureError> {
        for (index, stage) in self.stages.iter().enumerate() {
            debug!(stage = stage.name(), index, "running stage");
            if let Err(source) = stage.run().await {
                warn!(stage = stage.name(), index, error = %source, "stage failed");
                return Err(ProcedureError::StageFailed {
                    stage: stage.name().to_owned(),
                    index,
                    source,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Stage that records its name into a shared journal.
    pub(crate) struct JournalStage {
        pub name: &'static str,
        pub fail: bool,
        pub journal: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Stage for JournalStage {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> Result<(), StageError> {
            self.journal.lock().push(self.name);
            if self.fail {
                return Err(StageError::ExitStatus {
                    program: self.name.into(),
                    status: "exit status: 1".into(),
                });
            }
            Ok(())
        }
    }

    fn stage(
        name: &'static str,
        fail: bool,
        journal: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn Stage> {
        Arc::new(JournalStage {
            name,
            fail,
            journal: Arc::clone(journal),
        })
    }

    #[tokio::test]
    async fn runs_all_stages_in_order() {
        let journal = Arc::default();
        let p = Procedure::new(vec![
            stage("a", false, &journal),
            stage("b", false, &journal),
            stage("c", false, &journal),
        ]);
        p.execute().await.unwrap();
        assert_eq!(*journal.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let journal = Arc::default();
        let p = Procedure::new(vec![
            stage("a", false, &journal),
            stage("b", true, &journal),
            stage("c", false, &journal),
        ]);

        let err = p.execute().await.unwrap_err();
        assert_eq!(*journal.lock(), vec!["a", "b"]);
        assert_eq!(err.stage(), "b");
        let ProcedureError::StageFailed { index, .. } = err;
        assert_eq!(index, 1);
    }

    #[tokio::test]
    async fn empty_procedure_succeeds() {
        Procedure::default().execute().await.unwrap();
    }
}
