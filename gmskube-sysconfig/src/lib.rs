//! Scoped system configuration for GMS instances.
//!
//! Values live in a central networked key/value store and may be shadowed by
//! a local property file. Keys are dot-separated scopes ending in a leaf
//! name; lookups fall back from the most specific scope to the bare leaf.

pub mod backend;
pub mod central;
pub mod error;
pub mod file;
pub mod redis_backend;
pub mod repository;
pub mod resolver;
pub mod scope;

#[cfg(test)]
mod testing;

pub use backend::KvBackend;
pub use central::{CentralRepository, CentralSettings};
pub use error::{Error, Result};
pub use file::FileRepository;
pub use repository::ConfigRepository;
pub use resolver::SystemConfig;
