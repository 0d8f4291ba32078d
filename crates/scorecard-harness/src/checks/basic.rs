//! Basic functional checks against a running operator

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use scorecard_common::{poll_for, Error, PROXY_CONTAINER_NAME};

use crate::context::RunContext;
use crate::observer::detect_write_traffic;
use crate::score::{Score, TestInfo, TestOutcome};
use crate::suite::{ScorecardTest, TestSuite};

/// Name of [`SpecBlockExists`]
pub const SPEC_BLOCK_EXISTS: &str = "Spec Block Exists";
/// Name of [`StatusBlockExists`]
pub const STATUS_BLOCK_EXISTS: &str = "Status Block Exists";
/// Name of [`StatusReflectsActions`]
pub const STATUS_REFLECTS_ACTIONS: &str = "Operator actions are reflected in status";
/// Name of [`WritingIntoCrs`]
pub const WRITING_INTO_CRS: &str = "Writing into CRs has an effect";

/// Build the basic suite
pub fn basic_suite() -> Result<TestSuite, Error> {
    let tests: Vec<(Box<dyn ScorecardTest>, u32)> = vec![
        (Box::new(SpecBlockExists), 34),
        (Box::new(StatusBlockExists), 22),
        (Box::new(StatusReflectsActions), 22),
        (Box::new(WritingIntoCrs), 22),
    ];
    TestSuite::new(
        "Basic Tests",
        "Test suite that runs basic, functional operator tests",
        tests,
    )
}

async fn block_exists(ctx: &RunContext, field: &str) -> Result<TestOutcome, Error> {
    let cr = ctx.refresh_cr().await?;
    if cr.data.get(field).is_some_and(|v| !v.is_null()) {
        Ok(TestOutcome::new(Score::pass()))
    } else {
        Ok(TestOutcome::new(Score::fail())
            .with_suggestion(format!("Add a '{}' field to your Custom Resource", field)))
    }
}

/// The CR manifest has a `spec` object
pub struct SpecBlockExists;

#[async_trait]
impl ScorecardTest for SpecBlockExists {
    fn info(&self) -> TestInfo {
        TestInfo::pass_fail(SPEC_BLOCK_EXISTS, "Custom Resource has a Spec Block")
    }

    async fn run(&self, ctx: &RunContext) -> Result<TestOutcome, Error> {
        block_exists(ctx, "spec").await
    }
}

/// The live CR has a `status` object
pub struct StatusBlockExists;

#[async_trait]
impl ScorecardTest for StatusBlockExists {
    fn info(&self) -> TestInfo {
        TestInfo::pass_fail(STATUS_BLOCK_EXISTS, "Custom Resource has a Status Block")
    }

    async fn run(&self, ctx: &RunContext) -> Result<TestOutcome, Error> {
        block_exists(ctx, "status").await
    }
}

/// New value for a scalar spec field; `None` for values left alone
fn perturb(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(json!(i.wrapping_add(1)))
            } else if let Some(u) = n.as_u64() {
                Some(json!(u.wrapping_add(1)))
            } else {
                n.as_f64().map(|f| json!(f + 1.0))
            }
        }
        Value::String(_) => {
            let marker: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect();
            Some(json!(format!("scorecard-{}", marker.to_lowercase())))
        }
        Value::Bool(b) => Some(json!(!b)),
        _ => None,
    }
}

/// Changes each scalar spec field in turn and expects status to follow
pub struct StatusReflectsActions;

#[async_trait]
impl ScorecardTest for StatusReflectsActions {
    fn info(&self) -> TestInfo {
        TestInfo::pass_fail(
            STATUS_REFLECTS_ACTIONS,
            "The operator updates the Custom Resource's status when the spec changes",
        )
    }

    async fn run(&self, ctx: &RunContext) -> Result<TestOutcome, Error> {
        let cr = ctx.refresh_cr().await?;
        let spec_keys: Vec<String> = match cr.data.get("spec").and_then(Value::as_object) {
            Some(spec) => spec.keys().cloned().collect(),
            None => Vec::new(),
        };
        let mut baseline = match cr.data.get("status") {
            Some(status) if !status.is_null() && !spec_keys.is_empty() => status.clone(),
            _ => {
                return Ok(TestOutcome::new(Score::skipped()).with_suggestion(
                    "Operator actions can only be checked when the Custom Resource has both 'spec' and 'status' fields",
                ));
            }
        };
        let mut modified = 0;
        for key in spec_keys {
            let mut current = ctx.refresh_cr().await?;
            let Some(value) = current.data["spec"].get(&key).and_then(perturb) else {
                debug!(field = %key, "spec field is not a scalar, leaving it alone");
                continue;
            };
            current.data["spec"][key.as_str()] = value;
            modified += 1;

            match ctx.cluster.replace(&current).await {
                Ok(_) => debug!(cr = %ctx.cr_key, field = %key, "updated spec field"),
                Err(e) if e.is_rejection() => {
                    return Ok(TestOutcome::new(Score::fail()).with_suggestion(format!(
                        "The API server rejected a change to spec field '{}': {}",
                        key, e
                    )));
                }
                Err(e) => return Err(e),
            }

            let cluster = ctx.cluster.as_ref();
            let cr_key = &ctx.cr_key;
            let previous = &baseline;
            let operation = format!("status change after updating spec.{}", key);
            let changed = poll_for(&ctx.timing.status_change, &operation, || async move {
                let live = cluster.get(cr_key).await?.ok_or_else(|| {
                    Error::internal_with_context("status-update", format!("{} disappeared", cr_key))
                })?;
                let status = live.data.get("status").cloned().unwrap_or(Value::Null);
                Ok((status != *previous).then_some(status))
            })
            .await;

            match changed {
                Ok(status) => baseline = status,
                Err(e) if e.is_timeout() => {
                    return Ok(TestOutcome::new(Score::fail()).with_suggestion(format!(
                        "Status did not change within {}s of updating spec field '{}'; the operator should reflect its actions in the status",
                        ctx.timing.status_change.timeout.as_secs(),
                        key
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        if modified == 0 {
            return Ok(TestOutcome::new(Score::skipped()));
        }
        Ok(TestOutcome::new(Score::pass()))
    }
}

/// Looks for writes in the proxy's request log
pub struct WritingIntoCrs;

#[async_trait]
impl ScorecardTest for WritingIntoCrs {
    fn info(&self) -> TestInfo {
        TestInfo::pass_fail(
            WRITING_INTO_CRS,
            "A CR sends PUT/POST requests to the API server to modify resources in response to spec block changes",
        )
    }

    async fn run(&self, ctx: &RunContext) -> Result<TestOutcome, Error> {
        let pod = ctx.proxy_pod_name()?;
        if detect_write_traffic(ctx.cluster.as_ref(), &ctx.namespace, pod, PROXY_CONTAINER_NAME)
            .await?
        {
            Ok(TestOutcome::new(Score::pass()))
        } else {
            Ok(TestOutcome::new(Score::fail()).with_suggestion(
                "The operator should write into objects to update state. No PUT or POST requests from the operator were recorded by the scorecard.",
            ))
        }
    }
}
