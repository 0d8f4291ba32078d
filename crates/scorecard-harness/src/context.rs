//! Per-run state handed to every test

use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::DynamicObject;

use scorecard_common::poll::DEFAULT_POLL_INTERVAL;
use scorecard_common::{Error, PollConfig};

use crate::cluster::{ClusterApi, ObjectKey};
use crate::csv::ClusterServiceVersion;

/// Default time to wait for the operator to populate `status`
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Every wait the harness performs, in one place so tests can shrink them
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Interval for the readiness wait
    pub poll_interval: Duration,
    /// How long to wait for the CR's `status` to appear
    pub init_timeout: Duration,
    /// Waiting for a just-registered type to show up in discovery
    pub discovery: PollConfig,
    /// Waiting for a deleted object to disappear
    pub cleanup: PollConfig,
    /// Waiting for the workload's pod to be created
    pub pod: PollConfig,
    /// Waiting for status to react to a spec change
    pub status_change: PollConfig,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            discovery: PollConfig::immediate(DEFAULT_POLL_INTERVAL, Duration::from_secs(10)),
            cleanup: PollConfig::every_second(Duration::from_secs(10)),
            pod: PollConfig::every_second(Duration::from_secs(60)),
            status_change: PollConfig::every_second(Duration::from_secs(15)),
        }
    }
}

impl Timing {
    /// Defaults with the CR readiness wait replaced
    pub fn with_init_timeout(init_timeout: Duration) -> Self {
        Self {
            init_timeout,
            ..Self::default()
        }
    }

    /// Readiness poll derived from the interval and init timeout
    pub fn readiness(&self) -> PollConfig {
        PollConfig::new(self.poll_interval, self.init_timeout)
    }
}

/// Everything a test may look at for one CR
pub struct RunContext {
    /// Cluster the run provisions into
    pub cluster: Arc<dyn ClusterApi>,
    /// Run namespace
    pub namespace: String,
    /// Identity of the CR under test
    pub cr_key: ObjectKey,
    /// The CR as written in its manifest
    pub cr_manifest: DynamicObject,
    /// Pod running the workload and the injected proxy
    pub proxy_pod: Option<Pod>,
    /// Packaging metadata; present when OLM checks run
    pub csv: Option<ClusterServiceVersion>,
    /// CRDs from the global manifest
    pub crds: Vec<CustomResourceDefinition>,
    /// Waits shared by every check
    pub timing: Timing,
    live_cr: Mutex<Option<DynamicObject>>,
}

impl RunContext {
    /// Context without a proxy pod, CSV or CRDs
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        namespace: impl Into<String>,
        cr_key: ObjectKey,
        cr_manifest: DynamicObject,
        timing: Timing,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            cr_key,
            cr_manifest,
            proxy_pod: None,
            csv: None,
            crds: Vec::new(),
            timing,
            live_cr: Mutex::new(None),
        }
    }

    /// Set the pod whose proxy logs the checks read
    pub fn with_proxy_pod(mut self, pod: Option<Pod>) -> Self {
        self.proxy_pod = pod;
        self
    }

    /// Set the packaging metadata
    pub fn with_csv(mut self, csv: Option<ClusterServiceVersion>) -> Self {
        self.csv = csv;
        self
    }

    /// Set the CRDs the OLM checks inspect
    pub fn with_crds(mut self, crds: Vec<CustomResourceDefinition>) -> Self {
        self.crds = crds;
        self
    }

    /// Fetch the CR from the cluster and remember it as the live copy.
    ///
    /// A CR that no longer exists is an infrastructure failure.
    pub async fn refresh_cr(&self) -> Result<DynamicObject, Error> {
        let cr = self.cluster.get(&self.cr_key).await?.ok_or_else(|| {
            Error::internal_with_context("run-context", format!("{} no longer exists", self.cr_key))
        })?;
        if let Ok(mut live) = self.live_cr.lock() {
            *live = Some(cr.clone());
        }
        Ok(cr)
    }

    /// Most recently fetched copy of the CR, if any
    pub fn live_cr(&self) -> Option<DynamicObject> {
        self.live_cr.lock().ok().and_then(|live| live.clone())
    }

    /// Name of the proxy pod; tests that need traffic logs require it
    pub fn proxy_pod_name(&self) -> Result<&str, Error> {
        self.proxy_pod
            .as_ref()
            .and_then(|p| p.metadata.name.as_deref())
            .ok_or_else(|| Error::internal_with_context("run-context", "proxy pod was not located"))
    }

    /// CSV; OLM checks require it
    pub fn csv(&self) -> Result<&ClusterServiceVersion, Error> {
        self.csv
            .as_ref()
            .ok_or_else(|| Error::internal_with_context("run-context", "no CSV loaded"))
    }
}
