//! Cleanup ledger
//!
//! Every object the provisioner creates registers a teardown action here.
//! Draining runs the actions newest-first, keeps going past failures and
//! reports them together.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use scorecard_common::{poll_until, Error, PollConfig};

use crate::cluster::{ClusterApi, ObjectKey};

type CleanupAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Error>> + Send>;

/// LIFO stack of teardown actions
#[derive(Default)]
pub struct CleanupLedger {
    actions: Vec<(String, CleanupAction)>,
}

impl CleanupLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a teardown action
    pub fn push<F, Fut>(&mut self, description: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let description = description.into();
        debug!(action = %description, "registered cleanup");
        self.actions
            .push((description, Box::new(move || action().boxed())));
    }

    /// Actions still pending
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Descriptions of the registered actions, in registration order
    pub fn descriptions(&self) -> Vec<&str> {
        self.actions.iter().map(|(d, _)| d.as_str()).collect()
    }

    /// Run every action in reverse registration order.
    ///
    /// All actions run even if some fail. The ledger is empty afterwards, so a
    /// second drain does nothing.
    pub async fn drain(&mut self) -> Result<(), Error> {
        let actions = std::mem::take(&mut self.actions);
        let total = actions.len();
        let mut failures = Vec::new();

        for (description, action) in actions.into_iter().rev() {
            match action().await {
                Ok(()) => debug!(action = %description, "cleanup succeeded"),
                Err(e) => {
                    warn!(action = %description, error = %e, "cleanup failed");
                    failures.push(format!("{}: {}", description, e));
                }
            }
        }

        if failures.is_empty() {
            if total > 0 {
                info!(actions = total, "cleanup complete");
            }
            Ok(())
        } else {
            Err(Error::Cleanup {
                failed: failures.len(),
                total,
                failures,
            })
        }
    }
}

/// Delete an object and wait until the server no longer returns it.
///
/// A not-found answer at any point counts as gone; any other error fails
/// the cleanup.
pub async fn delete_and_confirm(
    cluster: Arc<dyn ClusterApi>,
    key: ObjectKey,
    poll: PollConfig,
) -> Result<(), Error> {
    cluster.delete(&key).await?;

    let operation = format!("deletion of {}", key);
    poll_until(&poll, &operation, || {
        let cluster = Arc::clone(&cluster);
        let key = key.clone();
        async move {
            match cluster.get(&key).await {
                Ok(None) => Ok(true),
                Ok(Some(_)) => Ok(false),
                Err(e) if e.is_not_found() => Ok(true),
                Err(e) => Err(e),
            }
        }
    })
    .await
}
