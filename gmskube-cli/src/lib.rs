//! Lifecycle management for GMS instances on Kubernetes.
//!
//! An instance is a helm release living in a namespace of the same name.
//! The [`orchestrator`] drives install, upgrade, uninstall, reconfigure and
//! augmentation changes through the [`cluster`] and [`helm`] clients, and
//! hands configuration to the instance's loader service via [`dataload`].

pub mod catalog;
pub mod cluster;
pub mod commands;
pub mod dataload;
pub mod error;
pub mod helm;
pub mod ingress;
pub mod instance;
pub mod labels;
pub mod listing;
pub mod orchestrator;
pub mod settings;

#[cfg(test)]
mod testing;

pub use error::{Error, ErrorKind, Result};
pub use orchestrator::Orchestrator;
pub use settings::{Defaults, InstanceSettings};
