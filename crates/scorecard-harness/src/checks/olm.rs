//! Packaging checks against the operator's ClusterServiceVersion
//!
//! All of these are cumulative: every CR adds to the points available.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use scorecard_common::kube_utils::kind_matches;
use scorecard_common::{Error, PROXY_CONTAINER_NAME};

use crate::context::RunContext;
use crate::csv::{CrdDescription, Descriptor};
use crate::observer::{used_resources, UsedResource};
use crate::score::{Score, TestInfo, TestOutcome};
use crate::suite::{ScorecardTest, TestSuite};

/// Name of [`ProvidedApisHaveValidation`]
pub const PROVIDED_APIS_HAVE_VALIDATION: &str = "Provided APIs have validation";
/// Name of [`OwnedCrdsHaveResources`]
pub const OWNED_CRDS_HAVE_RESOURCES: &str = "Owned CRDs have resources listed";
/// Name of [`CrsHaveExample`]
pub const CRS_HAVE_EXAMPLE: &str = "CRs have at least 1 example";
/// Name of the spec [`DescriptorCoverage`] check
pub const SPEC_DESCRIPTORS: &str = "Spec fields with descriptors";
/// Name of the status [`DescriptorCoverage`] check
pub const STATUS_DESCRIPTORS: &str = "Status fields with descriptors";

/// Build the OLM suite
pub fn olm_suite() -> Result<TestSuite, Error> {
    let tests: Vec<(Box<dyn ScorecardTest>, u32)> = vec![
        (Box::new(ProvidedApisHaveValidation), 24),
        (Box::new(OwnedCrdsHaveResources), 19),
        (Box::new(CrsHaveExample), 19),
        (Box::new(DescriptorCoverage::Spec), 19),
        (Box::new(DescriptorCoverage::Status), 19),
    ];
    TestSuite::new(
        "OLM Tests",
        "Test suite checks if an operator's CSV follows best practices",
        tests,
    )
}

/// Every CRD serving the CR's kind and version declares its fields
pub struct ProvidedApisHaveValidation;

#[async_trait]
impl ScorecardTest for ProvidedApisHaveValidation {
    fn info(&self) -> TestInfo {
        TestInfo::cumulative(
            PROVIDED_APIS_HAVE_VALIDATION,
            "All CRDs have an OpenAPI validation subsection",
        )
    }

    async fn run(&self, ctx: &RunContext) -> Result<TestOutcome, Error> {
        let cr = ctx.refresh_cr().await?;
        let gvk = ctx.cr_key.gvk();
        let mut score = Score::default();
        let mut suggestions = Vec::new();

        for crd in &ctx.crds {
            let crd_kind = &crd.spec.names.kind;
            if !kind_matches(&gvk.kind, crd_kind) {
                continue;
            }
            let Some(version) = crd
                .spec
                .versions
                .iter()
                .find(|v| v.name.eq_ignore_ascii_case(&gvk.version))
            else {
                continue;
            };

            let Some(schema) = version
                .schema
                .as_ref()
                .and_then(|s| s.open_api_v3_schema.as_ref())
            else {
                score.record(false);
                suggestions.push(format!("Add CRD validation for {}/{}", crd_kind, version.name));
                continue;
            };

            let mut complete = true;
            for block in ["spec", "status"] {
                let Some(fields) = cr.data.get(block).and_then(Value::as_object) else {
                    continue;
                };
                let declared = schema
                    .properties
                    .as_ref()
                    .and_then(|p| p.get(block))
                    .and_then(|b| b.properties.as_ref());
                for key in fields.keys() {
                    if !declared.is_some_and(|d| d.contains_key(key)) {
                        complete = false;
                        suggestions.push(format!(
                            "Add CRD validation for {} field `{}` in {}/{}",
                            block, key, gvk.kind, gvk.version
                        ));
                    }
                }
            }
            score.record(complete);
        }

        Ok(TestOutcome::new(score).with_suggestions(suggestions))
    }
}

/// Owned CRD descriptions list the resources the operator works with
pub struct OwnedCrdsHaveResources;

impl OwnedCrdsHaveResources {
    /// Resources seen in the proxy log; empty when the log is unavailable
    async fn observed(ctx: &RunContext) -> BTreeSet<UsedResource> {
        let Ok(pod) = ctx.proxy_pod_name() else {
            debug!("no proxy pod, skipping resource usage scan");
            return BTreeSet::new();
        };
        match ctx
            .cluster
            .pod_logs(&ctx.namespace, pod, PROXY_CONTAINER_NAME)
            .await
        {
            Ok(logs) => used_resources(&logs),
            Err(e) => {
                warn!(pod, error = %e, "could not read proxy log for resource usage");
                BTreeSet::new()
            }
        }
    }
}

fn lists_resource(crd: &CrdDescription, used: &UsedResource) -> bool {
    crd.resources
        .iter()
        .any(|r| kind_matches(&used.resource, &r.kind) && used.version.eq_ignore_ascii_case(&r.version))
}

#[async_trait]
impl ScorecardTest for OwnedCrdsHaveResources {
    fn info(&self) -> TestInfo {
        TestInfo::cumulative(
            OWNED_CRDS_HAVE_RESOURCES,
            "All Owned CRDs contain a resources subsection",
        )
    }

    async fn run(&self, ctx: &RunContext) -> Result<TestOutcome, Error> {
        let csv = ctx.csv()?;
        let gvk = ctx.cr_key.gvk();
        let used = Self::observed(ctx).await;

        let mut score = Score::default();
        let mut missing = Vec::new();
        for crd in csv
            .spec
            .customresourcedefinitions
            .owned
            .iter()
            .filter(|crd| crd.version.eq_ignore_ascii_case(&gvk.version))
            .filter(|crd| kind_matches(&gvk.kind, &crd.kind))
        {
            score.record(!crd.resources.is_empty());
            missing.extend(
                used.iter()
                    .filter(|u| !lists_resource(crd, u))
                    .map(|u| format!("{}/{}", u.resource, u.version)),
            );
        }

        let mut outcome = TestOutcome::new(score);
        if !missing.is_empty() {
            outcome = outcome.with_suggestion(format!(
                "If it would be helpful to an end-user to understand or troubleshoot your CR, consider adding resources [{}] to the resources section for owned CRD {}",
                missing.join(", "),
                gvk.kind
            ));
        }
        Ok(outcome)
    }
}

/// The CSV carries at least one example CR
pub struct CrsHaveExample;

#[async_trait]
impl ScorecardTest for CrsHaveExample {
    fn info(&self) -> TestInfo {
        TestInfo::cumulative(
            CRS_HAVE_EXAMPLE,
            "The CSV's metadata contains an alm-examples section",
        )
    }

    async fn run(&self, ctx: &RunContext) -> Result<TestOutcome, Error> {
        if ctx.csv()?.alm_examples().is_some() {
            Ok(TestOutcome::new(Score::pass()))
        } else {
            Ok(TestOutcome::new(Score::fail()).with_suggestion(format!(
                "Add an alm-examples annotation to your CSV to pass the {} test",
                CRS_HAVE_EXAMPLE
            )))
        }
    }
}

/// Top-level CR fields documented by CSV descriptors
pub enum DescriptorCoverage {
    /// Fields under `spec` need spec descriptors
    Spec,
    /// Fields under `status` need status descriptors
    Status,
}

impl DescriptorCoverage {
    fn block(&self) -> &'static str {
        match self {
            DescriptorCoverage::Spec => "spec",
            DescriptorCoverage::Status => "status",
        }
    }

    fn descriptors<'a>(&self, crd: &'a CrdDescription) -> &'a [Descriptor] {
        match self {
            DescriptorCoverage::Spec => &crd.spec_descriptors,
            DescriptorCoverage::Status => &crd.status_descriptors,
        }
    }
}

#[async_trait]
impl ScorecardTest for DescriptorCoverage {
    fn info(&self) -> TestInfo {
        match self {
            DescriptorCoverage::Spec => TestInfo::cumulative(
                SPEC_DESCRIPTORS,
                "All spec fields have matching descriptors in the CSV",
            ),
            DescriptorCoverage::Status => TestInfo::cumulative(
                STATUS_DESCRIPTORS,
                "All status fields have matching descriptors in the CSV",
            ),
        }
    }

    async fn run(&self, ctx: &RunContext) -> Result<TestOutcome, Error> {
        let cr = ctx.refresh_cr().await?;
        let block = self.block();
        let Some(fields) = cr.data.get(block).and_then(Value::as_object) else {
            return Ok(TestOutcome::new(Score::skipped()));
        };

        let gvk = ctx.cr_key.gvk();
        let descriptors = ctx
            .csv()?
            .owned_for(&gvk.kind, &gvk.version)
            .map(|crd| self.descriptors(crd))
            .unwrap_or_default();

        let mut score = Score::default();
        let mut suggestions = Vec::new();
        for key in fields.keys() {
            let covered = descriptors.iter().any(|d| d.covers(key));
            score.record(covered);
            if !covered {
                suggestions.push(format!("Add a {} descriptor for {}", block, key));
            }
        }
        Ok(TestOutcome::new(score).with_suggestions(suggestions))
    }
}
