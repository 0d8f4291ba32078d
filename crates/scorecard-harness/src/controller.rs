//! Run orchestration
//!
//! Drives one scorecard run through its phases: validate the config,
//! provision the operator and each CR, wait for the CR to settle, run the
//! enabled suites, and tear everything down again. Teardown happens after
//! every CR whether or not the CR's run succeeded.
//!
//! An operator already installed by OLM is scored in place. Only the CR is
//! created, and the installed Deployment's pod is used for the proxy logs.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use scorecard_common::Error;

use crate::checks::{basic_suite, olm_suite};
use crate::cluster::{ClusterApi, ObjectKey};
use crate::config::ScorecardConfig;
use crate::context::{RunContext, Timing};
use crate::csv::ClusterServiceVersion;
use crate::manifest::{
    default_global_manifest, default_namespaced_manifest, load_resources, load_single_resource,
    resource_gvks, ManifestSource,
};
use crate::output::SuiteResult;
use crate::provisioner::{ProxySettings, Provisioner};
use crate::readiness::wait_for_field;
use crate::suite::TestSuite;

const CRD_KIND: &str = "CustomResourceDefinition";
const CRD_API_VERSION: &str = "apiextensions.k8s.io/v1";
const CRD_API_VERSION_V1BETA1: &str = "apiextensions.k8s.io/v1beta1";
const ALM_EXAMPLES_SOURCE: &str = "alm-examples";

/// Where a run currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    /// Checking the config and loading manifests
    Validating,
    /// Creating the operator's resources and the CR
    Provisioning,
    /// Waiting for the CR to grow a status
    WaitingReady,
    /// Running the basic suite
    RunningBasic,
    /// Running the OLM suite
    RunningOlm,
    /// Removing what the run created
    Cleanup,
    /// Assembling results
    Reporting,
    /// Finished successfully
    Complete,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Validating => "Validating",
            RunPhase::Provisioning => "Provisioning",
            RunPhase::WaitingReady => "WaitingReady",
            RunPhase::RunningBasic => "RunningBasic",
            RunPhase::RunningOlm => "RunningOlm",
            RunPhase::Cleanup => "Cleanup",
            RunPhase::Reporting => "Reporting",
            RunPhase::Complete => "Complete",
        };
        f.write_str(name)
    }
}

/// Outcome of a completed run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// One entry per enabled suite, results of every CR merged
    pub suites: Vec<SuiteResult>,
    /// Teardown failures; reported, never fatal
    pub cleanup_errors: Vec<String>,
}

/// How the operator comes to be running for each CR
enum Workload {
    /// Created from manifests and removed again after every CR
    Provisioned {
        global: ManifestSource,
        namespaced: ManifestSource,
    },
    /// Installed by OLM before the run; left alone
    Installed { deployment: String },
}

/// Inputs resolved once per run and shared by every CR
struct Prepared {
    proxy: ProxySettings,
    csv: Option<ClusterServiceVersion>,
    workload: Workload,
    crds: Vec<CustomResourceDefinition>,
}

struct Suites {
    basic: Option<TestSuite>,
    olm: Option<TestSuite>,
}

impl Suites {
    fn results(&self) -> Vec<SuiteResult> {
        [&self.basic, &self.olm]
            .into_iter()
            .flatten()
            .map(SuiteResult::from_suite)
            .collect()
    }
}

/// Runs the configured suites against every CR manifest
pub struct RunController {
    cluster: Arc<dyn ClusterApi>,
    config: ScorecardConfig,
    namespace: String,
    timing: Timing,
    phase: RunPhase,
    workload_tx: Option<Arc<watch::Sender<Option<ObjectKey>>>>,
}

impl RunController {
    /// Controller for one run in `namespace`, with timeouts from `config`
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        config: ScorecardConfig,
        namespace: impl Into<String>,
    ) -> Self {
        let timing = Timing::with_init_timeout(config.init_timeout());
        Self {
            cluster,
            config,
            namespace: namespace.into(),
            timing,
            phase: RunPhase::Validating,
            workload_tx: None,
        }
    }

    /// Replace every wait and poll interval
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Publish the identity of the provisioned workload on `tx` while it
    /// exists. The sender lives as long as the controller.
    pub fn with_workload_watch(mut self, tx: watch::Sender<Option<ObjectKey>>) -> Self {
        self.workload_tx = Some(Arc::new(tx));
        self
    }

    /// Phase most recently entered; after a failure, where it failed
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        info!(from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    /// Execute the whole run.
    ///
    /// Configuration problems surface before anything touches the cluster.
    /// Each CR is provisioned from scratch and torn down before the next.
    pub async fn run(&mut self) -> Result<RunReport, Error> {
        self.enter(RunPhase::Validating);
        self.config.validate()?;
        let prepared = self.prepare()?;
        let mut suites = Suites {
            basic: self.config.basic_tests.then(basic_suite).transpose()?,
            olm: self.config.olm_tests.then(olm_suite).transpose()?,
        };
        let cr_sources = self.cr_sources(prepared.csv.as_ref())?;
        warn_on_shared_gvks(&cr_sources)?;

        let mut provisioner = Provisioner::new(
            Arc::clone(&self.cluster),
            self.namespace.clone(),
            prepared.proxy.clone(),
            self.timing,
        );
        if let Some(tx) = &self.workload_tx {
            provisioner = provisioner.with_workload_watch(Arc::clone(tx));
        }

        let mut cleanup_errors = Vec::new();
        for source in &cr_sources {
            info!(cr = %source, "scoring custom resource");
            let result = self
                .run_one(&mut provisioner, &prepared, &mut suites, source)
                .await;

            self.enter(RunPhase::Cleanup);
            if let Err(e) = provisioner.cleanup().await {
                warn!(error = %e, "cleanup incomplete; resources may remain in the cluster");
                cleanup_errors.push(e.to_string());
            }
            result?;
        }

        self.enter(RunPhase::Reporting);
        let report = RunReport {
            suites: suites.results(),
            cleanup_errors,
        };
        self.enter(RunPhase::Complete);
        Ok(report)
    }

    fn prepare(&self) -> Result<Prepared, Error> {
        let config = &self.config;
        let proxy = ProxySettings {
            image: config.proxy_image.clone(),
            pull_policy: config.pull_policy()?,
        };
        let csv = match &config.csv_path {
            Some(path) if config.olm_tests || config.olm_deployed => {
                Some(ClusterServiceVersion::load(path)?)
            }
            _ => None,
        };

        if config.olm_deployed {
            let deployment = csv
                .as_ref()
                .ok_or_else(|| {
                    Error::validation_for_field("csv-path", "olm-deployed needs a CSV")
                })?
                .install_deployment()?
                .to_string();
            // OLM has installed the CRDs; the local copies only feed the checks
            let crds = self
                .global_source()
                .and_then(|global| typed_crds(&global))
                .unwrap_or_else(|e| {
                    warn!(error = %e, "could not read CRDs; CRD checks will find none");
                    Vec::new()
                });
            return Ok(Prepared {
                proxy,
                csv,
                workload: Workload::Installed { deployment },
                crds,
            });
        }

        let namespaced = match &config.namespaced_manifest {
            Some(path) => ManifestSource::from(path.clone()),
            None => default_namespaced_manifest(&config.deploy_dir)?,
        };
        let global = self.global_source()?;
        let crds = typed_crds(&global)?;
        Ok(Prepared {
            proxy,
            csv,
            workload: Workload::Provisioned { global, namespaced },
            crds,
        })
    }

    fn global_source(&self) -> Result<ManifestSource, Error> {
        match &self.config.global_manifest {
            Some(path) => Ok(ManifestSource::from(path.clone())),
            None => default_global_manifest(&self.config.crds_dir),
        }
    }

    /// CR manifests to score, or the CSV's first `alm-examples` entry when
    /// none are configured
    fn cr_sources(
        &self,
        csv: Option<&ClusterServiceVersion>,
    ) -> Result<Vec<ManifestSource>, Error> {
        if !self.config.cr_manifest.is_empty() {
            return Ok(self
                .config
                .cr_manifest
                .iter()
                .cloned()
                .map(ManifestSource::from)
                .collect());
        }
        let example = match csv {
            Some(csv) => csv.first_alm_example()?,
            None => None,
        };
        let example = example.ok_or_else(|| {
            Error::validation_for_field(
                "cr-manifest",
                "no CR manifest given and the CSV has no alm-examples",
            )
        })?;
        let data = serde_json::to_string(&example)
            .map_err(|e| Error::serialization_for_kind("ClusterServiceVersion", e.to_string()))?;
        info!("using the first alm-examples entry as the CR");
        Ok(vec![ManifestSource::bytes(ALM_EXAMPLES_SOURCE, data)])
    }

    async fn run_one(
        &mut self,
        provisioner: &mut Provisioner,
        prepared: &Prepared,
        suites: &mut Suites,
        source: &ManifestSource,
    ) -> Result<(), Error> {
        let cr = load_single_resource(source)?;

        self.enter(RunPhase::Provisioning);
        match &prepared.workload {
            Workload::Provisioned { global, namespaced } => {
                provisioner.create_all(global).await?;
                provisioner.create_all(namespaced).await?;
            }
            Workload::Installed { deployment } => {
                provisioner.attach_workload(deployment).await?;
            }
        }
        let created = provisioner.create_one(cr.clone()).await?;
        let cr_key = ObjectKey::from_object(&created)?;

        self.enter(RunPhase::WaitingReady);
        wait_for_field(
            self.cluster.as_ref(),
            &cr_key,
            "status",
            self.timing.readiness(),
        )
        .await?;

        let ctx = RunContext::new(
            Arc::clone(&self.cluster),
            self.namespace.clone(),
            cr_key,
            cr,
            self.timing,
        )
        .with_proxy_pod(provisioner.proxy_pod().cloned())
        .with_csv(prepared.csv.clone())
        .with_crds(prepared.crds.clone());

        if let Some(suite) = suites.basic.as_mut() {
            self.enter(RunPhase::RunningBasic);
            suite.run(&ctx).await?;
        }
        if let Some(suite) = suites.olm.as_mut() {
            self.enter(RunPhase::RunningOlm);
            suite.run(&ctx).await?;
        }
        Ok(())
    }
}

/// CRDs in the global manifest, as `apiextensions.k8s.io/v1` objects.
///
/// `v1beta1` definitions are converted first; other versions are skipped
/// with a warning.
fn typed_crds(global: &ManifestSource) -> Result<Vec<CustomResourceDefinition>, Error> {
    let mut crds = Vec::new();
    for object in load_resources(global)? {
        let Some(types) = &object.types else { continue };
        if types.kind != CRD_KIND {
            continue;
        }
        let value = serde_json::to_value(&object)
            .map_err(|e| Error::conversion(CRD_KIND, e.to_string()))?;
        let value = match types.api_version.as_str() {
            CRD_API_VERSION => value,
            CRD_API_VERSION_V1BETA1 => v1beta1_to_v1(value),
            other => {
                warn!(
                    name = object.metadata.name.as_deref().unwrap_or_default(),
                    api_version = %other,
                    "skipping CRD with unsupported apiVersion"
                );
                continue;
            }
        };
        let crd = serde_json::from_value(value)
            .map_err(|e| Error::conversion(CRD_KIND, e.to_string()))?;
        crds.push(crd);
    }
    Ok(crds)
}

/// Rewrite a `v1beta1` CRD in `v1` shape.
///
/// The top-level `validation` and `subresources` apply to every version
/// that has none of its own. A CRD without `versions` has the single
/// `version`, which is served and stored.
fn v1beta1_to_v1(value: Value) -> Value {
    let spec = &value["spec"];
    let shared_schema = &spec["validation"]["openAPIV3Schema"];
    let shared_subresources = &spec["subresources"];
    let or_shared = |own: &Value, shared: &Value| {
        if own.is_null() {
            shared.clone()
        } else {
            own.clone()
        }
    };

    let versions: Vec<Value> = match spec["versions"].as_array() {
        Some(versions) if !versions.is_empty() => versions
            .iter()
            .map(|v| {
                json!({
                    "name": v["name"],
                    "served": v["served"].as_bool().unwrap_or(true),
                    "storage": v["storage"].as_bool().unwrap_or(false),
                    "schema": {
                        "openAPIV3Schema": or_shared(&v["schema"]["openAPIV3Schema"], shared_schema),
                    },
                    "subresources": or_shared(&v["subresources"], shared_subresources),
                })
            })
            .collect(),
        _ => vec![json!({
            "name": spec["version"],
            "served": true,
            "storage": true,
            "schema": { "openAPIV3Schema": shared_schema },
            "subresources": shared_subresources,
        })],
    };

    json!({
        "apiVersion": CRD_API_VERSION,
        "kind": CRD_KIND,
        "metadata": value["metadata"],
        "spec": {
            "group": spec["group"],
            "names": spec["names"],
            "scope": spec["scope"].as_str().unwrap_or("Namespaced"),
            "versions": versions,
        },
    })
}

/// Results for CRs of the same type are merged, which can hide a bad CR
fn warn_on_shared_gvks(sources: &[ManifestSource]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for source in sources {
        for gvk in resource_gvks(source)? {
            if !seen.insert(gvk.clone()) {
                warn!(
                    group = %gvk.group,
                    version = %gvk.version,
                    kind = %gvk.kind,
                    "multiple CR manifests share a type; per-CR results will be merged"
                );
            }
        }
    }
    Ok(())
}
