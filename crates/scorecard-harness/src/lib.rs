//! Operator conformance harness
//!
//! Provisions an operator and its custom resources into a namespace, runs
//! weighted test suites against them and tears everything down again.

#![deny(missing_docs)]

pub mod checks;
pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod context;
pub mod controller;
pub mod csv;
pub mod manifest;
pub mod observer;
pub mod output;
pub mod provisioner;
pub mod readiness;
pub mod score;
pub mod suite;

#[cfg(test)]
mod testing;

pub use cluster::{ClusterApi, KubeCluster, ObjectKey};
pub use config::{OutputFormat, ScorecardConfig};
pub use controller::{RunController, RunPhase, RunReport};
