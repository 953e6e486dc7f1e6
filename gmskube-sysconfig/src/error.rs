use std::path::PathBuf;
use std::time::Duration;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("No central configuration {what} specified."))]
    MissingSetting { what: &'static str },

    #[snafu(display("Invalid central configuration endpoint '{endpoint}'"))]
    InvalidEndpoint { endpoint: String },

    #[snafu(display("Central configuration repository unavailable at endpoint '{endpoints}'"))]
    Unavailable { endpoints: String },

    #[snafu(display("Central store request failed: {source}"))]
    Store { source: redis::RedisError },

    #[snafu(display("Central store backend failure: {message}"))]
    Backend { message: String },

    #[snafu(display("Timed out after {waited:?} acquiring lock '{name}'"))]
    LockTimeout { name: String, waited: Duration },

    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("FATAL: central configuration load aborted at '{key}': {source}"))]
    LoadAborted { key: String, source: Box<Error> },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
