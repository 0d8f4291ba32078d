//! The parts of a ClusterServiceVersion the OLM checks read

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use scorecard_common::Error;

/// Annotation holding example CRs as a JSON array
pub const ALM_EXAMPLES_ANNOTATION: &str = "alm-examples";
const DEPLOYMENT_STRATEGY: &str = "deployment";

/// Operator packaging metadata
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterServiceVersion {
    /// Name and annotations
    #[serde(default)]
    pub metadata: CsvMetadata,
    /// Install strategy and CRD descriptions
    #[serde(default)]
    pub spec: CsvSpec,
}

/// CSV object metadata
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CsvMetadata {
    /// CSV name, e.g. `memcached-operator.v0.0.1`
    #[serde(default)]
    pub name: String,
    /// Annotations, including `alm-examples`
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// CSV spec
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CsvSpec {
    /// How OLM installs the operator
    #[serde(default)]
    pub install: Option<InstallStrategy>,
    /// Owned and required CRDs
    #[serde(default)]
    pub customresourcedefinitions: CrdDescriptions,
}

/// `spec.install` of a CSV
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InstallStrategy {
    /// Strategy name; only `deployment` is understood
    #[serde(default)]
    pub strategy: String,
    /// Strategy details
    #[serde(default)]
    pub spec: InstallSpec,
}

/// Details of a `deployment` install strategy
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InstallSpec {
    /// Deployments OLM creates; the first one runs the operator
    #[serde(default)]
    pub deployments: Vec<StrategyDeployment>,
}

/// One Deployment named by the install strategy
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StrategyDeployment {
    /// Deployment name in the install namespace
    pub name: String,
}

/// CRDs the operator owns or depends on
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CrdDescriptions {
    /// CRDs the operator provides
    #[serde(default)]
    pub owned: Vec<CrdDescription>,
    /// CRDs the operator expects from elsewhere
    #[serde(default)]
    pub required: Vec<CrdDescription>,
}

/// One owned or required CRD as described in the CSV
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdDescription {
    /// Full CRD name, e.g. `memcacheds.cache.example.com`
    pub name: String,
    /// API version served for the CR, e.g. `v1alpha1`
    pub version: String,
    /// CR kind
    pub kind: String,
    /// Name shown in the OLM console
    #[serde(default)]
    pub display_name: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Resources the operator creates for instances of this CRD
    #[serde(default)]
    pub resources: Vec<ResourceReference>,
    /// Descriptors for fields under `spec`
    #[serde(default)]
    pub spec_descriptors: Vec<Descriptor>,
    /// Descriptors for fields under `status`
    #[serde(default)]
    pub status_descriptors: Vec<Descriptor>,
}

/// A resource kind listed under an owned CRD
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ResourceReference {
    /// Object name, often empty
    #[serde(default)]
    pub name: String,
    /// Resource kind, e.g. `Deployment`
    pub kind: String,
    /// API version of the kind
    #[serde(default)]
    pub version: String,
}

/// UI metadata for one spec or status field
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Dotted path below spec/status, e.g. `size` or `nodes.count`
    pub path: String,
    /// Field label
    #[serde(default)]
    pub display_name: String,
    /// Field help text
    #[serde(default)]
    pub description: String,
    /// Console widget hints
    #[serde(default, rename = "x-descriptors")]
    pub x_descriptors: Vec<String>,
}

impl Descriptor {
    /// True if this descriptor documents the top-level field `key`
    pub fn covers(&self, key: &str) -> bool {
        self.path == key
            || self
                .path
                .strip_prefix(key)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl ClusterServiceVersion {
    /// Parse a CSV document
    pub fn from_yaml(name: &str, text: &str) -> Result<Self, Error> {
        serde_yaml::from_str(text).map_err(|e| {
            Error::serialization_for_kind("ClusterServiceVersion", format!("{}: {}", name, e))
        })
    }

    /// Read and parse a CSV file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&path.display().to_string(), &text)
    }

    /// Owned CRD description for a CR's kind and version
    pub fn owned_for(&self, kind: &str, version: &str) -> Option<&CrdDescription> {
        self.spec
            .customresourcedefinitions
            .owned
            .iter()
            .find(|crd| crd.kind == kind && crd.version == version)
    }

    /// Value of the `alm-examples` annotation, if set and non-blank
    pub fn alm_examples(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(ALM_EXAMPLES_ANNOTATION)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// First example CR from `alm-examples`, if the annotation is set
    pub fn first_alm_example(&self) -> Result<Option<Value>, Error> {
        let Some(raw) = self.alm_examples() else {
            return Ok(None);
        };
        let examples: Vec<Value> = serde_json::from_str(raw).map_err(|e| {
            Error::serialization_for_kind(
                "ClusterServiceVersion",
                format!(
                    "{}: invalid {} annotation: {}",
                    self.metadata.name, ALM_EXAMPLES_ANNOTATION, e
                ),
            )
        })?;
        Ok(examples.into_iter().next())
    }

    /// Name of the operator Deployment from the `deployment` install strategy
    pub fn install_deployment(&self) -> Result<&str, Error> {
        let install = self.spec.install.as_ref().ok_or_else(|| {
            Error::validation_for_field(
                "csv-path",
                format!("{} has no install strategy", self.metadata.name),
            )
        })?;
        if install.strategy != DEPLOYMENT_STRATEGY {
            return Err(Error::validation_for_field(
                "csv-path",
                format!(
                    "{}: expected install strategy '{}', got '{}'",
                    self.metadata.name, DEPLOYMENT_STRATEGY, install.strategy
                ),
            ));
        }
        install
            .spec
            .deployments
            .first()
            .map(|d| d.name.as_str())
            .ok_or_else(|| {
                Error::validation_for_field(
                    "csv-path",
                    format!("{}: install strategy lists no deployments", self.metadata.name),
                )
            })
    }
}
