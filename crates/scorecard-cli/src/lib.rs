//! Scorecard CLI library
//!
//! Flags override the YAML config file; the merged config is validated
//! before a cluster client is created.

pub mod error;

pub use error::{Error, Result};

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use scorecard_common::kube_utils::create_client;
use scorecard_common::telemetry::{init_logging, LogBuffer};
use scorecard_harness::config::DEFAULT_CONFIG_FILE;
use scorecard_harness::output::{render_human, render_json, ScorecardOutput};
use scorecard_harness::{
    ClusterApi, KubeCluster, ObjectKey, OutputFormat, RunController, ScorecardConfig,
};

/// Exit status after Ctrl-C, as a shell would report SIGINT
const INTERRUPTED: u8 = 130;

/// Scorecard - score an operator against conformance and packaging checks
#[derive(Parser, Debug, Default)]
#[command(name = "scorecard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file; a missing default file is ignored
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Namespace to run in (default: kubeconfig context namespace)
    #[arg(short, long)]
    pub namespace: Option<String>,

    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Seconds to wait for the CR's status to appear
    #[arg(long)]
    pub init_timeout: Option<u64>,

    #[arg(long, value_name = "BOOL")]
    pub basic_tests: Option<bool>,

    #[arg(long, value_name = "BOOL")]
    pub olm_tests: Option<bool>,

    /// ClusterServiceVersion manifest, required for OLM tests
    #[arg(long)]
    pub csv_path: Option<PathBuf>,

    /// The operator is already installed by OLM; score it without deploying
    #[arg(long)]
    pub olm_deployed: bool,

    /// Operator resources (default: well-known files under deploy/)
    #[arg(long)]
    pub namespaced_manifest: Option<PathBuf>,

    /// Cluster-scoped resources (default: CRDs under deploy/crds/)
    #[arg(long)]
    pub global_manifest: Option<PathBuf>,

    /// Operator deploy directory used for the default namespaced manifest
    #[arg(long)]
    pub deploy_dir: Option<PathBuf>,

    /// Directory of `*_crd.yaml` files used for the default global manifest
    #[arg(long)]
    pub crds_dir: Option<PathBuf>,

    /// CR manifest to score; repeat for several
    #[arg(long)]
    pub cr_manifest: Vec<PathBuf>,

    #[arg(long)]
    pub proxy_image: Option<String>,

    /// Always, Never or PullIfNotPresent
    #[arg(long)]
    pub proxy_pull_policy: Option<String>,

    /// human-readable or json
    #[arg(short, long)]
    pub output: Option<String>,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    fn config_path(&self) -> &Path {
        self.config
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load the config file and lay the flags over it
    pub fn resolve_config(&self) -> Result<ScorecardConfig> {
        let path = self.config_path();
        let mut config = if path.exists() {
            ScorecardConfig::load(path)?
        } else if self.config.is_some() {
            return Err(Error::ConfigNotFound {
                path: path.to_path_buf(),
            });
        } else {
            ScorecardConfig::default()
        };

        if let Some(namespace) = &self.namespace {
            config.namespace = Some(namespace.clone());
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            config.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(timeout) = self.init_timeout {
            config.init_timeout = timeout;
        }
        if let Some(enabled) = self.basic_tests {
            config.basic_tests = enabled;
        }
        if let Some(enabled) = self.olm_tests {
            config.olm_tests = enabled;
        }
        if let Some(path) = &self.csv_path {
            config.csv_path = Some(path.clone());
        }
        if let Some(path) = &self.namespaced_manifest {
            config.namespaced_manifest = Some(path.clone());
        }
        if let Some(path) = &self.global_manifest {
            config.global_manifest = Some(path.clone());
        }
        if let Some(dir) = &self.deploy_dir {
            config.deploy_dir = dir.clone();
        }
        if let Some(dir) = &self.crds_dir {
            config.crds_dir = dir.clone();
        }
        if !self.cr_manifest.is_empty() {
            config.cr_manifest = self.cr_manifest.clone();
        }
        if let Some(image) = &self.proxy_image {
            config.proxy_image = image.clone();
        }
        if let Some(policy) = &self.proxy_pull_policy {
            config.proxy_pull_policy = policy.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        config.olm_deployed |= self.olm_deployed;
        config.verbose |= self.verbose;
        Ok(config)
    }

    /// Run the scorecard and print the report
    pub async fn run(self) -> Result<ExitCode> {
        let config = self.resolve_config()?;
        config.validate()?;
        let format = config.output_format()?;

        let capture = (format == OutputFormat::Json).then(LogBuffer::new);
        init_logging(config.verbose, capture.clone())?;
        if !self.config_path().exists() {
            warn!(path = %self.config_path().display(), "no config file; using flags only");
        }

        let client = create_client(config.kubeconfig.as_deref()).await?;
        let cluster = KubeCluster::connect(client).await?;
        let namespace = config
            .namespace
            .clone()
            .unwrap_or_else(|| cluster.default_namespace().to_string());
        info!(namespace = %namespace, "starting scorecard run");
        let cluster: Arc<dyn ClusterApi> = Arc::new(cluster);

        let (tx, rx) = watch::channel(None);
        let mut controller =
            RunController::new(Arc::clone(&cluster), config, namespace).with_workload_watch(tx);

        let outcome = tokio::select! {
            result = controller.run() => result,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted; removing the operator workload");
                remove_workload(cluster.as_ref(), &rx).await;
                return Ok(ExitCode::from(INTERRUPTED));
            }
        };

        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                error!(phase = %controller.phase(), error = %e, "scorecard run failed");
                return Err(e.into());
            }
        };

        match format {
            OutputFormat::HumanReadable => {
                print!("{}", render_human(&report.suites, &report.cleanup_errors));
            }
            OutputFormat::Json => {
                let log = capture.map(|b| b.contents()).unwrap_or_default();
                println!("{}", render_json(&ScorecardOutput::new(report.suites, log))?);
            }
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// Best-effort delete of the workload published on `rx`.
///
/// Removing the Deployment stops the operator. Everything else the run
/// created is left in place.
async fn remove_workload(cluster: &dyn ClusterApi, rx: &watch::Receiver<Option<ObjectKey>>) {
    let workload = rx.borrow().clone();
    let Some(key) = workload else {
        return;
    };
    match cluster.delete(&key).await {
        Ok(()) => info!(workload = %key, "deleted workload"),
        Err(e) => warn!(workload = %key, error = %e, "failed to delete workload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
namespace: from-file
init-timeout: 120
olm-tests: false
cr-manifest:
  - deploy/crds/cache_v1alpha1_memcached_cr.yaml
proxy-pull-policy: Never
"#;

    fn cli_with_file(dir: &TempDir, content: &str) -> Cli {
        let path = dir.path().join("scorecard.yaml");
        std::fs::write(&path, content).unwrap();
        Cli {
            config: Some(path),
            ..Default::default()
        }
    }

    #[test]
    fn test_file_values_used_without_flags() {
        let dir = TempDir::new().unwrap();
        let config = cli_with_file(&dir, CONFIG).resolve_config().unwrap();

        assert_eq!(config.namespace.as_deref(), Some("from-file"));
        assert_eq!(config.init_timeout, 120);
        assert!(!config.olm_tests);
        assert!(config.basic_tests);
        assert_eq!(config.proxy_pull_policy, "Never");
        assert_eq!(config.cr_manifest.len(), 1);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let cli = Cli {
            namespace: Some("from-flag".to_string()),
            olm_tests: Some(true),
            csv_path: Some(PathBuf::from("deploy/olm-catalog/csv.yaml")),
            cr_manifest: vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")],
            output: Some("json".to_string()),
            verbose: true,
            ..cli_with_file(&dir, CONFIG)
        };
        let config = cli.resolve_config().unwrap();

        assert_eq!(config.namespace.as_deref(), Some("from-flag"));
        assert!(config.olm_tests);
        assert_eq!(config.cr_manifest, vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]);
        assert_eq!(config.output, "json");
        assert!(config.verbose);
        assert_eq!(config.init_timeout, 120);
        config.validate().unwrap();
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/scorecard.yaml")),
            ..Default::default()
        };
        let err = cli.resolve_config().unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
        assert!(err.is_usage());
    }

    #[test]
    fn test_unknown_config_key_rejected() {
        let dir = TempDir::new().unwrap();
        let err = cli_with_file(&dir, "cr-manifests: [a.yaml]\n")
            .resolve_config()
            .unwrap_err();
        assert!(err.is_usage(), "{err}");
    }

    #[rstest]
    #[case::flags_only(&["scorecard", "--cr-manifest", "cr.yaml", "--basic-tests", "false"])]
    #[case::repeated_cr(&["scorecard", "--cr-manifest", "a.yaml", "--cr-manifest", "b.yaml"])]
    #[case::short_output(&["scorecard", "-o", "json", "-v"])]
    #[case::short_namespace(&["scorecard", "-n", "ops", "--crds-dir", "deploy/crds"])]
    fn test_flag_parsing(#[case] args: &[&str]) {
        Cli::try_parse_from(args).unwrap();
    }

    #[test]
    fn test_olm_deployed_flag_sets_config() {
        let dir = TempDir::new().unwrap();
        let cli = Cli {
            olm_deployed: true,
            csv_path: Some(PathBuf::from("deploy/olm-catalog/csv.yaml")),
            ..cli_with_file(&dir, CONFIG)
        };
        let config = cli.resolve_config().unwrap();
        assert!(config.olm_deployed);
        config.validate().unwrap();

        let parsed = Cli::try_parse_from(["scorecard", "--olm-deployed"]).unwrap();
        assert!(parsed.olm_deployed);
    }

    #[test]
    fn test_bool_flags_take_values() {
        let cli = Cli::try_parse_from(["scorecard", "--olm-tests", "false"]).unwrap();
        assert_eq!(cli.olm_tests, Some(false));
        assert!(Cli::try_parse_from(["scorecard", "--olm-tests", "maybe"]).is_err());
    }
}
