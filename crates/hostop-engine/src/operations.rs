//! Registry of long-running operations.
//!
//! Each operation is stored behind a `watch` channel. Completion flips the
//! value to `done` exactly once; waiters that subscribe before or after that
//! point all observe the same final value.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hostop_core::{Operation, OperationName, OperationResult};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::errors::OperationError;

/// Attempts at generating an unused name before giving up.
pub const MAX_NAME_ATTEMPTS: usize = 10;

type NameGenerator = Box<dyn Fn() -> OperationName + Send + Sync>;

/// Named long-running operations and their completion results.
pub struct OperationRegistry {
    operations: DashMap<String, watch::Sender<Operation>>,
    generate_name: NameGenerator,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_name_generator(OperationName::new)
    }

    /// Use a custom name source.
    pub fn with_name_generator<F>(generate_name: F) -> Self
    where
        F: Fn() -> OperationName + Send + Sync + 'static,
    {
        Self {
            operations: DashMap::new(),
            generate_name: Box::new(generate_name),
        }
    }

    /// Open a new pending operation.
    pub fn create(&self) -> Result<Operation, OperationError> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = (self.generate_name)();
            match self.operations.entry(name.to_string()) {
                Entry::Occupied(_) => warn!(operation = %name, "operation name collision"),
                Entry::Vacant(slot) => {
                    let op = Operation::pending(name.as_str());
                    slot.insert(watch::Sender::new(op.clone()));
                    debug!(operation = %name, "operation created");
                    return Ok(op);
                }
            }
        }
        Err(OperationError::IdSpaceExhausted)
    }

    /// Current state of the operation called `name`.
    pub fn get(&self, name: &str) -> Result<Operation, OperationError> {
        self.operations
            .get(name)
            .map(|tx| tx.borrow().clone())
            .ok_or_else(|| OperationError::NotFound(name.to_owned()))
    }

    /// Record the terminal result and release every waiter.
    ///
    /// A second completion is rejected with [`OperationError::AlreadyDone`]
    /// and leaves the first result in place.
    pub fn complete(
        &self,
        name: &str,
        result: OperationResult,
    ) -> Result<Operation, OperationError> {
        let tx = self
            .operations
            .get(name)
            .ok_or_else(|| OperationError::NotFound(name.to_owned()))?;

        let mut result = Some(result);
        let completed = tx.send_if_modified(|op| {
            if op.done {
                return false;
            }
            op.done = true;
            op.result = result.take();
            true
        });
        if !completed {
            return Err(OperationError::AlreadyDone(name.to_owned()));
        }

        let op = tx.borrow().clone();
        debug!(operation = %name, failed = op.is_error(), "operation completed");
        Ok(op)
    }

    /// Wait until the operation is done and return its final value.
    pub async fn wait(&self, name: &str) -> Result<Operation, OperationError> {
        let mut rx = self
            .operations
            .get(name)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| OperationError::NotFound(name.to_owned()))?;

        let op = match rx.wait_for(|op| op.done).await {
            Ok(op) => op.clone(),
            Err(_) => return Err(OperationError::NotFound(name.to_owned())),
        };
        Ok(op)
    }

    /// Operations that have not completed yet.
    pub fn list_running(&self) -> Vec<Operation> {
        self.operations
            .iter()
            .map(|entry| entry.value().borrow().clone())
            .filter(|op| !op.done)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn create_returns_pending_operation() {
        let reg = OperationRegistry::new();
        let op = reg.create().unwrap();
        assert!(op.name.starts_with("op_"));
        assert!(!op.done);
        assert!(op.result.is_none());
        assert_eq!(reg.get(&op.name).unwrap(), op);
    }

    #[test]
    fn unknown_names_are_not_found() {
        let reg = OperationRegistry::new();
        assert!(matches!(reg.get("op_x"), Err(OperationError::NotFound(_))));
        assert!(matches!(
            reg.complete("op_x", OperationResult::ok()),
            Err(OperationError::NotFound(_))
        ));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn wait_on_unknown_is_not_found() {
        let reg = OperationRegistry::new();
        assert!(matches!(reg.wait("op_x").await, Err(OperationError::NotFound(_))));
    }

    #[test]
    fn collisions_retry_then_exhaust() {
        let reg = OperationRegistry::with_name_generator(|| OperationName::from_raw("op_fixed"));
        reg.create().unwrap();
        assert!(matches!(reg.create(), Err(OperationError::IdSpaceExhausted)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn collision_is_retried_with_a_new_name() {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let reg = OperationRegistry::with_name_generator(move || {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            OperationName::from_raw(if n < 2 { "op_a" } else { "op_b" })
        });
        assert_eq!(reg.create().unwrap().name, "op_a");
        assert_eq!(reg.create().unwrap().name, "op_b");
    }

    #[test]
    fn second_completion_is_rejected() {
        let reg = OperationRegistry::new();
        let op = reg.create().unwrap();
        reg.complete(&op.name, OperationResult::ok()).unwrap();

        let err = reg
            .complete(&op.name, OperationResult::error("late"))
            .unwrap_err();
        assert!(matches!(err, OperationError::AlreadyDone(_)));

        let stored = reg.get(&op.name).unwrap();
        assert!(stored.done);
        assert!(!stored.is_error());
    }

    #[tokio::test]
    async fn waiters_before_and_after_completion_agree() {
        let reg = Arc::new(OperationRegistry::new());
        let op = reg.create().unwrap();

        let early: Vec<_> = (0..4)
            .map(|_| {
                let reg = Arc::clone(&reg);
                let name = op.name.clone();
                tokio::spawn(async move { reg.wait(&name).await.unwrap() })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let completed = reg
            .complete(&op.name, OperationResult::error("boom"))
            .unwrap();

        for handle in early {
            assert_eq!(handle.await.unwrap(), completed);
        }
        assert_eq!(reg.wait(&op.name).await.unwrap(), completed);
        assert_eq!(reg.get(&op.name).unwrap(), completed);
        assert!(completed.is_error());
    }

    #[test]
    fn list_running_skips_done() {
        let reg = OperationRegistry::new();
        let a = reg.create().unwrap();
        let b = reg.create().unwrap();
        reg.complete(&a.name, OperationResult::ok()).unwrap();

        let running = reg.list_running();
        assert_eq!(running, vec![b]);
    }
}
