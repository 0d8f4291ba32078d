//! Shared fixtures and an in-memory cluster for unit tests

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use serde_json::{json, Value};

use scorecard_common::{Error, PollConfig};

use crate::cluster::{ClusterApi, ObjectKey};
use crate::context::Timing;

pub const MEMCACHED_CSV: &str = r#"
apiVersion: operators.coreos.com/v1alpha1
kind: ClusterServiceVersion
metadata:
  name: memcached-operator.v0.0.1
  namespace: placeholder
  annotations:
    capabilities: Basic Install
    alm-examples: '[{"apiVersion":"cache.example.com/v1alpha1","kind":"Memcached","metadata":{"name":"example-memcached"},"spec":{"size":3}}]'
spec:
  displayName: Memcached Operator
  version: 0.0.1
  install:
    strategy: deployment
    spec:
      deployments:
        - name: memcached-operator
          spec:
            replicas: 1
            selector:
              matchLabels:
                name: memcached-operator
  customresourcedefinitions:
    owned:
      - name: memcacheds.cache.example.com
        version: v1alpha1
        kind: Memcached
        displayName: Memcached App
        description: Represents a Memcached cluster
        resources:
          - kind: Deployment
            version: v1
        specDescriptors:
          - path: size
            displayName: Size
            description: The desired number of member Pods for the deployment.
            x-descriptors:
              - 'urn:alm:descriptor:com.tectonic.ui:podCount'
        statusDescriptors:
          - path: nodes
            displayName: Nodes
            description: The list of pod names for the memcached nodes.
"#;

pub const MEMCACHED_CRD: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: memcacheds.cache.example.com
spec:
  group: cache.example.com
  names:
    kind: Memcached
    listKind: MemcachedList
    plural: memcacheds
    singular: memcached
  scope: Namespaced
  versions:
    - name: v1alpha1
      served: true
      storage: true
      subresources:
        status: {}
      schema:
        openAPIV3Schema:
          type: object
          properties:
            spec:
              type: object
              properties:
                size:
                  type: integer
            status:
              type: object
              properties:
                nodes:
                  type: array
                  items:
                    type: string
"#;

pub const OPERATOR_MANIFEST: &str = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: memcached-operator
---
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: memcached-operator
rules:
  - apiGroups: ["cache.example.com"]
    resources: ["*"]
    verbs: ["*"]
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: memcached-operator
spec:
  replicas: 1
  selector:
    matchLabels:
      name: memcached-operator
  template:
    metadata:
      labels:
        name: memcached-operator
    spec:
      serviceAccountName: memcached-operator
      containers:
        - name: memcached-operator
          image: quay.io/example/memcached-operator:v0.0.1
"#;

pub const MEMCACHED_CR: &str = r#"
apiVersion: cache.example.com/v1alpha1
kind: Memcached
metadata:
  name: example-memcached
spec:
  size: 1
"#;

pub fn parse_object(yaml: &str) -> DynamicObject {
    serde_json::from_value(scorecard_common::yaml::parse_yaml(yaml).unwrap()).unwrap()
}

pub fn memcached_cr() -> DynamicObject {
    let mut cr = parse_object(MEMCACHED_CR);
    cr.metadata.namespace = Some("scorecard".to_string());
    cr
}

pub fn memcached_key() -> ObjectKey {
    ObjectKey::namespaced(
        "cache.example.com/v1alpha1",
        "Memcached",
        "scorecard",
        "example-memcached",
    )
}

/// Every wait shrunk to milliseconds
pub fn fast_timing() -> Timing {
    let ms = Duration::from_millis;
    Timing {
        poll_interval: ms(2),
        init_timeout: ms(30),
        discovery: PollConfig::immediate(ms(2), ms(200)),
        cleanup: PollConfig::new(ms(2), ms(100)),
        pod: PollConfig::new(ms(2), ms(200)),
        status_change: PollConfig::new(ms(2), ms(30)),
    }
}

const BUILTIN_TYPES: &[(&str, &str)] = &[
    ("v1", "ServiceAccount"),
    ("v1", "Secret"),
    ("v1", "ConfigMap"),
    ("rbac.authorization.k8s.io/v1", "Role"),
    ("rbac.authorization.k8s.io/v1", "RoleBinding"),
    ("rbac.authorization.k8s.io/v1", "ClusterRole"),
    ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding"),
    ("apps/v1", "Deployment"),
    ("apiextensions.k8s.io/v1", "CustomResourceDefinition"),
];

const CLUSTER_SCOPED: &[&str] = &["CustomResourceDefinition", "ClusterRole", "ClusterRoleBinding"];

fn api_version_of(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::from(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

/// How the fake operator reacts to its CR
#[derive(Clone, Debug, Default)]
pub struct OperatorBehavior {
    /// Status written on the CR as soon as it is created
    pub initial_status: Option<Value>,
    /// Rewrite `status.nodes` from spec on every replace
    pub reflect_spec_in_status: bool,
    /// Log text served for every container
    pub logs: String,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    served: BTreeSet<(String, String)>,
    pending: BTreeSet<(String, String)>,
    pods: Vec<Pod>,
    created: Vec<ObjectKey>,
    deleted: Vec<ObjectKey>,
    failing_deletes: BTreeSet<String>,
    refreshes: u32,
}

/// In-memory cluster.
///
/// Created CRDs register their types only after the next discovery
/// refresh. Creating a Deployment starts one pod labelled with its
/// `matchLabels`. CRs get status according to [`OperatorBehavior`].
pub struct FakeCluster {
    state: Mutex<FakeState>,
    behavior: OperatorBehavior,
}

impl FakeCluster {
    pub fn new(behavior: OperatorBehavior) -> Self {
        let served = BUILTIN_TYPES
            .iter()
            .map(|(v, k)| (v.to_string(), k.to_string()))
            .collect();
        Self {
            state: Mutex::new(FakeState {
                served,
                ..Default::default()
            }),
            behavior,
        }
    }

    /// Make deletes of `kind` fail
    pub fn fail_deletes_of(self, kind: &str) -> Self {
        self.state.lock().unwrap().failing_deletes.insert(kind.to_string());
        self
    }

    pub fn created(&self) -> Vec<ObjectKey> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<ObjectKey> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Objects currently stored
    pub fn live_keys(&self) -> Vec<ObjectKey> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn refreshes(&self) -> u32 {
        self.state.lock().unwrap().refreshes
    }

    fn normalize(key: &mut ObjectKey, object: &mut DynamicObject) {
        if CLUSTER_SCOPED.contains(&key.kind.as_str()) {
            key.namespace = None;
            object.metadata.namespace = None;
        }
    }

    fn is_custom(kind: &str) -> bool {
        !BUILTIN_TYPES.iter().any(|(_, k)| *k == kind)
    }
}

fn crd_types(object: &DynamicObject) -> Vec<(String, String)> {
    let spec = &object.data["spec"];
    let group = spec["group"].as_str().unwrap_or_default();
    let kind = spec["names"]["kind"].as_str().unwrap_or_default();
    spec["versions"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|v| v["name"].as_str())
        .map(|v| (format!("{}/{}", group, v), kind.to_string()))
        .collect()
}

fn pod_for(deployment: &DynamicObject) -> Pod {
    let labels: BTreeMap<String, String> =
        serde_json::from_value(deployment.data["spec"]["selector"]["matchLabels"].clone())
            .unwrap_or_default();
    let mut pod = Pod::default();
    pod.metadata.name = Some(format!(
        "{}-5d8f7c",
        deployment.metadata.name.as_deref().unwrap_or_default()
    ));
    pod.metadata.namespace = deployment.metadata.namespace.clone();
    pod.metadata.labels = Some(labels);
    pod
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    selector.split(',').filter(|s| !s.is_empty()).all(|pair| {
        pair.split_once('=')
            .is_some_and(|(k, v)| labels.get(k).map(String::as_str) == Some(v))
    })
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject, Error> {
        let mut key = ObjectKey::from_object(object)?;
        let mut stored = object.clone();
        Self::normalize(&mut key, &mut stored);

        let mut state = self.state.lock().unwrap();
        if !state
            .served
            .contains(&(key.api_version.clone(), key.kind.clone()))
        {
            return Err(Error::UnknownResourceType {
                api_version: key.api_version.clone(),
                kind: key.kind.clone(),
            });
        }
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{} already exists", key)));
        }

        match key.kind.as_str() {
            "CustomResourceDefinition" => {
                let types = crd_types(&stored);
                state.pending.extend(types);
            }
            "Deployment" => state.pods.push(pod_for(&stored)),
            kind if Self::is_custom(kind) => {
                if let Some(status) = &self.behavior.initial_status {
                    stored.data["status"] = status.clone();
                }
            }
            _ => {}
        }

        state.created.push(key.clone());
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error> {
        let mut key = key.clone();
        if CLUSTER_SCOPED.contains(&key.kind.as_str()) {
            key.namespace = None;
        }
        Ok(self.state.lock().unwrap().objects.get(&key).cloned())
    }

    async fn replace(&self, object: &DynamicObject) -> Result<DynamicObject, Error> {
        let key = ObjectKey::from_object(object)?;
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.objects.get(&key) else {
            return Err(api_error(404, "NotFound", format!("{} not found", key)));
        };
        let mut updated = object.clone();
        match existing.data.get("status").cloned() {
            Some(status) => updated.data["status"] = status,
            None => {
                if let Some(map) = updated.data.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        if self.behavior.reflect_spec_in_status && Self::is_custom(&key.kind) {
            updated.data["status"] = json!({"nodes": [updated.data["spec"].to_string()]});
        }
        state.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), Error> {
        let mut key = key.clone();
        if CLUSTER_SCOPED.contains(&key.kind.as_str()) {
            key.namespace = None;
        }
        let mut state = self.state.lock().unwrap();
        if state.failing_deletes.contains(&key.kind) {
            return Err(api_error(403, "Forbidden", format!("cannot delete {}", key)));
        }
        if let Some(removed) = state.objects.remove(&key) {
            if key.kind == "Deployment" {
                let name = pod_for(&removed).metadata.name;
                state.pods.retain(|p| p.metadata.name != name);
            }
            state.deleted.push(key);
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| matches_selector(p, selector))
            .cloned()
            .collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        _container: &str,
    ) -> Result<String, Error> {
        let state = self.state.lock().unwrap();
        let exists = state.pods.iter().any(|p| {
            p.metadata.name.as_deref() == Some(pod)
                && p.metadata.namespace.as_deref() == Some(namespace)
        });
        if !exists {
            return Err(api_error(404, "NotFound", format!("pod {} not found", pod)));
        }
        Ok(self.behavior.logs.clone())
    }

    async fn is_served(&self, gvk: &GroupVersionKind) -> bool {
        self.state
            .lock()
            .unwrap()
            .served
            .contains(&(api_version_of(gvk), gvk.kind.clone()))
    }

    async fn refresh_discovery(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.refreshes += 1;
        let pending = std::mem::take(&mut state.pending);
        state.served.extend(pending);
        Ok(())
    }
}
