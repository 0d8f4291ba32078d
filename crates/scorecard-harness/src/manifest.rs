//! Manifest loading
//!
//! Turns multi-document YAML into `DynamicObject`s without touching the
//! cluster. Also builds the default namespaced and global manifests from an
//! operator project's `deploy/` directory.

use std::fmt;
use std::path::{Path, PathBuf};

use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use serde_json::Value;
use tracing::debug;

use scorecard_common::kube_utils::gvk;
use scorecard_common::yaml::parse_yaml_multi;
use scorecard_common::Error;

/// Files making up the default namespaced manifest, relative to the deploy directory
pub const NAMESPACED_MANIFEST_FILES: &[&str] = &[
    "service_account.yaml",
    "role.yaml",
    "role_binding.yaml",
    "operator.yaml",
];

/// Suffix identifying CRD files in the CRDs directory
pub const CRD_FILE_SUFFIX: &str = "_crd.yaml";

/// Where a manifest comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManifestSource {
    /// A file on disk
    Path(PathBuf),
    /// In-memory YAML, labelled for error messages
    Bytes {
        /// Label used in errors and logs
        name: String,
        /// Raw YAML
        data: Vec<u8>,
    },
}

impl ManifestSource {
    /// In-memory manifest
    pub fn bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    fn read(&self) -> Result<String, Error> {
        match self {
            Self::Path(path) => std::fs::read_to_string(path).map_err(|e| Error::io(path, e)),
            Self::Bytes { name, data } => String::from_utf8(data.clone())
                .map_err(|e| Error::parse(name, format!("not valid UTF-8: {}", e))),
        }
    }
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Bytes { name, .. } => write!(f, "{}", name),
        }
    }
}

impl From<PathBuf> for ManifestSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ManifestSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

fn decode_document(
    source: &ManifestSource,
    index: usize,
    doc: Value,
) -> Result<DynamicObject, Error> {
    let name = format!("{} (document {})", source, index + 1);
    let map = doc
        .as_object()
        .ok_or_else(|| Error::parse(&name, "document is not a mapping"))?;
    for field in ["apiVersion", "kind"] {
        if !map.get(field).is_some_and(Value::is_string) {
            return Err(Error::parse(&name, format!("missing {}", field)));
        }
    }
    serde_json::from_value(doc).map_err(|e| Error::parse(&name, e.to_string()))
}

/// Parse every resource in a manifest, in document order.
///
/// Empty documents are skipped. Any document that is not a mapping with
/// `apiVersion` and `kind` fails the whole load.
pub fn load_resources(source: &ManifestSource) -> Result<Vec<DynamicObject>, Error> {
    let text = source.read()?;
    let docs =
        parse_yaml_multi(&text).map_err(|e| Error::parse(source.to_string(), e.to_string()))?;

    let resources = docs
        .into_iter()
        .enumerate()
        .filter(|(_, doc)| !doc.is_null())
        .map(|(i, doc)| decode_document(source, i, doc))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(source = %source, count = resources.len(), "loaded manifest");
    Ok(resources)
}

/// Parse a manifest that must hold exactly one resource
pub fn load_single_resource(source: &ManifestSource) -> Result<DynamicObject, Error> {
    let mut resources = load_resources(source)?;
    match resources.len() {
        0 => Err(Error::parse(source.to_string(), "manifest contains no resources")),
        1 => Ok(resources.remove(0)),
        count => Err(Error::MultipleResources {
            source_name: source.to_string(),
            count,
        }),
    }
}

/// Group/version/kind of every resource in a manifest
pub fn resource_gvks(source: &ManifestSource) -> Result<Vec<GroupVersionKind>, Error> {
    Ok(load_resources(source)?
        .iter()
        .filter_map(|obj| obj.types.as_ref())
        .map(|t| gvk(&t.api_version, &t.kind))
        .collect())
}

/// Concatenate files into one in-memory manifest, skipping missing ones
fn combine_files(name: &str, paths: &[PathBuf]) -> Result<ManifestSource, Error> {
    let mut combined = String::new();
    for path in paths {
        if !path.exists() {
            debug!(path = %path.display(), "skipping missing manifest file");
            continue;
        }
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        if !combined.is_empty() {
            combined.push_str("\n---\n");
        }
        combined.push_str(text.trim_end());
        combined.push('\n');
    }
    if combined.is_empty() {
        return Err(Error::validation(format!("no manifest files found for {}", name)));
    }
    Ok(ManifestSource::bytes(name, combined))
}

/// Service account, RBAC and operator Deployment from a deploy directory
pub fn default_namespaced_manifest(deploy_dir: &Path) -> Result<ManifestSource, Error> {
    let paths: Vec<PathBuf> = NAMESPACED_MANIFEST_FILES
        .iter()
        .map(|f| deploy_dir.join(f))
        .collect();
    combine_files("namespaced manifest", &paths)
}

/// Every `*_crd.yaml` in a CRDs directory, sorted by file name
pub fn default_global_manifest(crds_dir: &Path) -> Result<ManifestSource, Error> {
    let entries = std::fs::read_dir(crds_dir).map_err(|e| Error::io(crds_dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::io(crds_dir, e))?.path();
        let is_crd = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(CRD_FILE_SUFFIX));
        if is_crd {
            paths.push(path);
        }
    }
    paths.sort();
    combine_files("global manifest", &paths)
}
