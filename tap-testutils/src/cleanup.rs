//! Deferred teardown, run last-registered first.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::{CleanupFailure, LoadTestError};

type CleanupFuture = Pin<Box<dyn Future<Output = Result<(), LoadTestError>> + Send>>;
type CleanupAction = Box<dyn FnOnce() -> CleanupFuture + Send>;

/// A stack of named async teardown actions.
///
/// Resources register their release as soon as they are acquired, so a
/// setup that aborts halfway still releases what it got. [`Cleanup::run`]
/// runs every action even when some fail.
#[derive(Default)]
pub struct Cleanup {
    actions: Vec<(String, CleanupAction)>,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an action. It runs before everything registered earlier.
    pub fn register<F, Fut>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), LoadTestError>> + Send + 'static,
    {
        let label = label.into();
        tracing::debug!(%label, "registered cleanup");
        self.actions
            .push((label, Box::new(move || Box::pin(action()) as CleanupFuture)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Pending labels, in registration order.
    pub fn labels(&self) -> Vec<&str> {
        self.actions.iter().map(|(label, _)| label.as_str()).collect()
    }

    /// Run every action, newest first. Failures are collected in the order
    /// the actions ran.
    pub async fn run(mut self) -> Result<(), LoadTestError> {
        let mut failures = Vec::new();
        while let Some((label, action)) = self.actions.pop() {
            tracing::debug!(%label, "running cleanup");
            if let Err(error) = action().await {
                tracing::error!(%label, %error, "cleanup action failed");
                failures.push(CleanupFailure {
                    label,
                    error: Box::new(error),
                });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(LoadTestError::Cleanup(failures))
        }
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup")
            .field("pending", &self.labels())
            .finish()
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            tracing::warn!(pending = ?self.labels(), "cleanup dropped without running");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tap_netutils::ConnectionError;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) + Clone) {
        let ran = Arc::new(Mutex::new(Vec::new()));
        let record = {
            let ran = ran.clone();
            move |label: &'static str| ran.lock().unwrap().push(label)
        };
        (ran, record)
    }

    #[tokio::test]
    async fn runs_newest_first() {
        let (ran, record) = recorder();
        let mut cleanup = Cleanup::new();
        for label in ["alice", "bob", "bitcoind"] {
            let record = record.clone();
            cleanup.register(label, move || async move {
                record(label);
                Ok(())
            });
        }
        assert_eq!(cleanup.labels(), vec!["alice", "bob", "bitcoind"]);

        cleanup.run().await.unwrap();
        assert_eq!(*ran.lock().unwrap(), vec!["bitcoind", "bob", "alice"]);
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_actions() {
        let (ran, record) = recorder();
        let mut cleanup = Cleanup::new();
        {
            let record = record.clone();
            cleanup.register("first", move || async move {
                record("first");
                Ok(())
            });
        }
        cleanup.register("second", || async {
            Err(LoadTestError::from(ConnectionError::AlreadyClosed))
        });
        cleanup.register("third", || async {
            Err(LoadTestError::from(ConnectionError::Closed))
        });

        let err = cleanup.run().await.unwrap_err();
        assert_eq!(*ran.lock().unwrap(), vec!["first"]);
        let LoadTestError::Cleanup(failures) = &err else {
            panic!("unexpected error {err}");
        };
        let labels: Vec<_> = failures.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, vec!["third", "second"]);
        assert!(err.to_string().contains("second: connection error"), "{err}");
    }

    #[tokio::test]
    async fn empty_stack_succeeds() {
        let cleanup = Cleanup::new();
        assert!(cleanup.is_empty());
        cleanup.run().await.unwrap();
    }
}
