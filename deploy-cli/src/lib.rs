//! Idempotent promotion of the research-agent service onto a GKE cluster.
//!
//! The crate is a library first; the `deploy` binary is a thin clap front
//! end over [`pipeline::Pipeline`] and the single-stage commands.

pub mod access;
pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod gcloud;
pub mod kube_backend;
pub mod manifests;
pub mod pipeline;
pub mod preflight;
pub mod provisioner;
pub mod report;
pub mod rollout;
pub mod secrets;
pub mod target;

#[cfg(test)]
mod testing;

pub use config::DeployConfig;
pub use error::{DeployError, Result, Stage};
pub use pipeline::{Backends, DeployOutcome, Pipeline, RunRecord};
