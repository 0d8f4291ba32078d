//! Run configuration
//!
//! Loaded from a YAML file and/or flags, then validated before the cluster
//! is contacted.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use scorecard_common::{Error, DEFAULT_PROXY_IMAGE};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = ".osdk-scorecard.yaml";

/// Image pull policy for the proxy sidecar
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullPolicy {
    /// Pull on every pod start
    Always,
    /// Use only an image already on the node
    Never,
    /// Pull only when the node lacks the image
    IfNotPresent,
}

impl PullPolicy {
    /// Value written into the container spec
    pub fn as_k8s(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::Never => "Never",
            PullPolicy::IfNotPresent => "IfNotPresent",
        }
    }
}

impl FromStr for PullPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Always" => Ok(PullPolicy::Always),
            "Never" => Ok(PullPolicy::Never),
            "PullIfNotPresent" => Ok(PullPolicy::IfNotPresent),
            other => Err(Error::validation_for_field(
                "proxy-pull-policy",
                format!(
                    "invalid proxy pull policy '{}', must be one of Always, Never, PullIfNotPresent",
                    other
                ),
            )),
        }
    }
}

/// Output rendering
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Indented text with coloured suggestion and error lines
    HumanReadable,
    /// One `ScorecardOutput` document
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human-readable" => Ok(OutputFormat::HumanReadable),
            "json" => Ok(OutputFormat::Json),
            other => Err(Error::validation_for_field(
                "output",
                format!("invalid output format '{}', must be human-readable or json", other),
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::HumanReadable => write!(f, "human-readable"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Everything a run needs, as read from file and flags
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScorecardConfig {
    /// Run namespace; the kubeconfig context namespace when unset
    pub namespace: Option<String>,
    /// Kubeconfig file; the default client discovery when unset
    pub kubeconfig: Option<PathBuf>,
    /// Seconds to wait for the CR's status to appear
    pub init_timeout: u64,
    /// Run the basic suite
    pub basic_tests: bool,
    /// Run the OLM suite
    pub olm_tests: bool,
    /// The operator was installed by OLM: nothing but the CR is created,
    /// and the workload is read from the CSV install strategy
    pub olm_deployed: bool,
    /// ClusterServiceVersion manifest
    pub csv_path: Option<PathBuf>,
    /// Operator resources created in the run namespace
    pub namespaced_manifest: Option<PathBuf>,
    /// Cluster-scoped resources, typically CRDs
    pub global_manifest: Option<PathBuf>,
    /// CRs to score, one run each
    pub cr_manifest: Vec<PathBuf>,
    /// Operator `deploy/` directory, source of the default namespaced manifest
    pub deploy_dir: PathBuf,
    /// Source of the default global manifest
    pub crds_dir: PathBuf,
    /// Image of the injected proxy container
    pub proxy_image: String,
    /// `Always`, `Never` or `PullIfNotPresent`
    pub proxy_pull_policy: String,
    /// `human-readable` or `json`
    pub output: String,
    /// Log at debug level
    pub verbose: bool,
}

impl Default for ScorecardConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            kubeconfig: None,
            init_timeout: 60,
            basic_tests: true,
            olm_tests: true,
            olm_deployed: false,
            csv_path: None,
            namespaced_manifest: None,
            global_manifest: None,
            cr_manifest: Vec::new(),
            deploy_dir: PathBuf::from("deploy"),
            crds_dir: PathBuf::from("deploy/crds"),
            proxy_image: DEFAULT_PROXY_IMAGE.to_string(),
            proxy_pull_policy: "Always".to_string(),
            output: "human-readable".to_string(),
            verbose: false,
        }
    }
}

impl ScorecardConfig {
    /// Parse a YAML config document
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        serde_yaml::from_str(text).map_err(|e| {
            Error::validation_for_field("config", format!("invalid config file: {}", e))
        })
    }

    /// Read a YAML config file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&text)
    }

    /// Parsed `proxy-pull-policy`
    pub fn pull_policy(&self) -> Result<PullPolicy, Error> {
        self.proxy_pull_policy.parse()
    }

    /// Parsed `output`
    pub fn output_format(&self) -> Result<OutputFormat, Error> {
        self.output.parse()
    }

    /// `init-timeout` as a duration
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout)
    }

    /// Reject incomplete or contradictory settings
    pub fn validate(&self) -> Result<(), Error> {
        self.pull_policy()?;
        self.output_format()?;

        if self.olm_deployed && self.csv_path.is_none() {
            return Err(Error::validation_for_field(
                "csv-path",
                "csv-path is required when olm-deployed is set",
            ));
        }
        // An OLM-deployed run can fall back to the CSV's first example
        if self.cr_manifest.is_empty() && !self.olm_deployed {
            return Err(Error::validation_for_field(
                "cr-manifest",
                "at least one CR manifest is required",
            ));
        }
        if !self.basic_tests && !self.olm_tests {
            return Err(Error::validation(
                "at least one of basic-tests or olm-tests must be enabled",
            ));
        }
        if self.olm_tests && self.csv_path.is_none() {
            return Err(Error::validation_for_field(
                "csv-path",
                "csv-path is required when olm-tests is enabled",
            ));
        }
        if self.init_timeout == 0 {
            return Err(Error::validation_for_field(
                "init-timeout",
                "init-timeout must be greater than zero",
            ));
        }
        if self.proxy_image.trim().is_empty() {
            return Err(Error::validation_for_field("proxy-image", "proxy image is empty"));
        }
        Ok(())
    }
}
