//! Common types for the scorecard: errors, YAML, Kubernetes helpers, polling

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod poll;
pub mod retry;
pub mod telemetry;
pub mod yaml;

pub use error::Error;
pub use poll::{poll_for, poll_until, PollConfig};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Container name of the injected traffic-observing sidecar
pub const PROXY_CONTAINER_NAME: &str = "scorecard-proxy";

/// Local address the sidecar listens on inside the workload pod
pub const PROXY_URL: &str = "http://localhost:8889";

/// Default sidecar image
pub const DEFAULT_PROXY_IMAGE: &str = "quay.io/operator-framework/scorecard-proxy:latest";
