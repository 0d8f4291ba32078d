//! Waiting for the operator to populate a field on the CR

use tracing::{debug, info};

use scorecard_common::{poll_until, Error, PollConfig};

use crate::cluster::{ClusterApi, ObjectKey};

/// Poll until the top-level `field` of `key` is present and non-null.
///
/// Running out of time is not an error: the run continues and tests that
/// need the field score accordingly. A vanished object or a failed get is.
pub async fn wait_for_field(
    cluster: &dyn ClusterApi,
    key: &ObjectKey,
    field: &str,
    poll: PollConfig,
) -> Result<(), Error> {
    let operation = format!("{} on {}", field, key);
    let result = poll_until(&poll, &operation, || async move {
        match cluster.get(key).await? {
            Some(object) => Ok(object.data.get(field).is_some_and(|v| !v.is_null())),
            None => Err(Error::internal_with_context(
                "readiness",
                format!("{} disappeared while waiting for {}", key, field),
            )),
        }
    })
    .await;

    match result {
        Ok(()) => {
            debug!(object = %key, field, "field populated");
            Ok(())
        }
        Err(e) if e.is_timeout() => {
            info!(
                object = %key,
                field,
                timeout_secs = poll.timeout.as_secs(),
                "field not populated before timeout, continuing"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::testing::{memcached_cr, memcached_key};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast() -> PollConfig {
        PollConfig::immediate(Duration::from_millis(2), Duration::from_millis(30))
    }

    #[tokio::test]
    async fn test_returns_once_status_appears() {
        let gets = Arc::new(AtomicU32::new(0));
        let g = Arc::clone(&gets);
        let mut mock = MockClusterApi::new();
        mock.expect_get().returning(move |_| {
            let mut cr = memcached_cr();
            if g.fetch_add(1, Ordering::SeqCst) >= 2 {
                cr.data["status"] = serde_json::json!({"nodes": ["memcached-0"]});
            }
            Ok(Some(cr))
        });

        wait_for_field(&mock, &memcached_key(), "status", fast())
            .await
            .unwrap();
        assert_eq!(gets.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_null_field_is_not_ready() {
        let mut mock = MockClusterApi::new();
        mock.expect_get().returning(|_| {
            let mut cr = memcached_cr();
            cr.data["status"] = serde_json::Value::Null;
            Ok(Some(cr))
        });
        // Times out, which is still Ok
        wait_for_field(&mock, &memcached_key(), "status", fast())
            .await
            .unwrap();
    }

    /// Story: an operator that never writes status does not fail the run
    #[tokio::test]
    async fn story_timeout_is_not_an_error() {
        let mut mock = MockClusterApi::new();
        mock.expect_get().returning(|_| Ok(Some(memcached_cr())));
        assert!(wait_for_field(&mock, &memcached_key(), "status", fast())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_get_error_is_fatal() {
        let mut mock = MockClusterApi::new();
        mock.expect_get()
            .times(1)
            .returning(|_| Err(Error::internal("connection reset")));
        let err = wait_for_field(&mock, &memcached_key(), "status", fast())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_vanished_resource_is_fatal() {
        let mut mock = MockClusterApi::new();
        mock.expect_get().times(1).returning(|_| Ok(None));
        let err = wait_for_field(&mock, &memcached_key(), "status", fast())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disappeared"));
    }
}
