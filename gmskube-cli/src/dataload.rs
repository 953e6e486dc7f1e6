//! Data-load handshake with an instance's `config-loader` service.
//!
//! A load runs as a single asynchronous job on the loader: wait for the
//! service to come alive, submit the job (optionally with an override
//! bundle), then poll `/result` until the job finishes or the timeout
//! expires.

mod bundle;
mod retry;


use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Certificate, StatusCode, redirect};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, warn};

pub use bundle::{OVERRIDE_DIRS, build_override_bundle};
pub use retry::RetryPolicy;

use crate::cluster::{ClusterClient, ClusterError};
use crate::labels;
use crate::settings::WaitSettings;

/// Log a liveness progress line every this many polls
const ALIVE_PROGRESS_EVERY: u64 = 30;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DataLoadError {
    #[snafu(display("Unable to look up the config-loader service: {source}"))]
    ServiceLookup { source: ClusterError },

    #[snafu(display("Config override directory {} does not exist", path.display()))]
    BundleRoot { path: PathBuf },

    #[snafu(display("Unable to walk config overrides: {source}"))]
    BundleWalk { source: walkdir::Error },

    #[snafu(display("Unable to read config override {}: {source}", path.display()))]
    BundleIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to create zip file from user supplied overrides: {source}"))]
    BundleWrite { source: zip::result::ZipError },

    #[snafu(display("Unable to read CA bundle {}: {source}", path.display()))]
    CaBundle {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to build HTTP client: {source}"))]
    Client { source: reqwest::Error },

    #[snafu(display("Request to {url} failed: {source}"))]
    Transport { url: String, source: reqwest::Error },

    #[snafu(display("Failed to initiate a data load. {status}"))]
    SubmitRejected { status: StatusCode },

    #[snafu(display("Data load failed to execute successfully"))]
    JobFailed { result: Option<String> },

    #[snafu(display("Timed out waiting for data load after {} minutes", waited.as_secs() / 60))]
    TimedOut { waited: Duration },
}

/// Loader endpoint that starts the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadEndpoint {
    /// Full initial load
    Load,
    /// Reduced load for a running instance
    Reload,
}

impl LoadEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Reload => "reload",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataLoadRequest {
    pub namespace: String,
    /// Loader address, e.g. `https://dev.example.com:443/config-loader`
    pub base_url: String,
    pub endpoint: LoadEndpoint,
    pub timeout: Duration,
    /// Directory whose override trees are bundled with the submission
    pub override_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLoadOutcome {
    /// The instance has no loader service
    Skipped,
    Completed {
        /// False when the liveness wait timed out and the job was
        /// submitted anyway
        liveness_confirmed: bool,
        /// Partial log chunks reported while the job ran
        log: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum JobState {
    Pending,
    Finished,
    #[serde(other)]
    Unknown,
}

/// Body of `GET /result`
#[derive(Debug, Clone, Deserialize)]
struct JobStatus {
    status: JobState,
    #[serde(default)]
    successful: bool,
    #[serde(default)]
    partial_result: Option<String>,
    #[serde(default)]
    result: Option<String>,
}

/// Default loader address of an instance
pub fn loader_url(instance: &str, base_domain: &str, port: &str) -> String {
    format!("https://{instance}.{base_domain}:{port}/config-loader")
}

#[derive(Debug, Clone)]
pub struct DataLoadClient {
    http: reqwest::Client,
    policy: RetryPolicy,
    wait: WaitSettings,
}

impl DataLoadClient {
    /// Build a client that trusts the system roots plus an optional PEM
    /// bundle.
    pub fn new(ca_bundle: Option<&Path>) -> Result<Self, DataLoadError> {
        let mut builder = reqwest::Client::builder().redirect(redirect::Policy::none());
        if let Some(path) = ca_bundle {
            let pem = std::fs::read(path).context(CaBundleSnafu { path })?;
            let certificate = Certificate::from_pem(&pem).context(ClientSnafu)?;
            builder = builder.add_root_certificate(certificate);
        }
        let http = builder.build().context(ClientSnafu)?;

        Ok(Self {
            http,
            policy: RetryPolicy::default(),
            wait: WaitSettings::default(),
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_wait(mut self, wait: WaitSettings) -> Self {
        self.wait = wait;
        self
    }

    /// Run one data-load job to completion.
    ///
    /// Returns [`DataLoadOutcome::Skipped`] when the instance has no
    /// `config-loader` service.
    pub async fn run_data_load(
        &self,
        cluster: &dyn ClusterClient,
        request: &DataLoadRequest,
    ) -> Result<DataLoadOutcome, DataLoadError> {
        match cluster
            .read_service(&request.namespace, labels::CONFIG_LOADER_SERVICE)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!("config-loader service does not exist, skipping data load");
                return Ok(DataLoadOutcome::Skipped);
            }
            Err(source) => return Err(DataLoadError::ServiceLookup { source }),
        }

        let bundle = request
            .override_root
            .as_deref()
            .map(build_override_bundle)
            .transpose()?;

        let polls = self.wait.polls_within(request.timeout);
        let liveness_confirmed = self.wait_until_alive(&request.base_url, polls).await;

        info!("Requesting data load");
        self.submit(request, bundle).await?;

        let log = self.wait_for_result(&request.base_url, polls, request.timeout).await?;
        info!("Data load successfully completed");

        Ok(DataLoadOutcome::Completed {
            liveness_confirmed,
            log,
        })
    }

    async fn wait_until_alive(&self, base_url: &str, polls: u64) -> bool {
        let url = format!("{base_url}/alive");
        info!("Waiting for config loader to be alive");

        for poll in 0..polls {
            match self.policy.send(|| self.http.get(&url)).await {
                Ok(response) if response.status() == StatusCode::OK => return true,
                Ok(response) => debug!("{url} returned {}", response.status()),
                Err(e) => debug!("{url} not reachable yet: {e}"),
            }

            if poll > 0 && poll % ALIVE_PROGRESS_EVERY == 0 {
                info!("Waiting for config loader to be alive");
            }
            tokio::time::sleep(self.wait.poll_interval).await;
        }

        warn!("Timed out waiting for config loader to be alive, will attempt data load anyway");
        false
    }

    async fn submit(
        &self,
        request: &DataLoadRequest,
        bundle: Option<Vec<u8>>,
    ) -> Result<(), DataLoadError> {
        let url = format!("{}/{}", request.base_url, request.endpoint.path());

        let response = self
            .policy
            .send(|| {
                let post = self.http.post(&url);
                match &bundle {
                    Some(bytes) => {
                        let part = Part::bytes(bytes.clone()).file_name("overrides.zip");
                        post.multipart(Form::new().part("zipfile", part))
                    }
                    None => post,
                }
            })
            .await
            .context(TransportSnafu { url: url.as_str() })?;

        let status = response.status();
        snafu::ensure!(status.is_success(), SubmitRejectedSnafu { status });
        Ok(())
    }

    async fn wait_for_result(
        &self,
        base_url: &str,
        polls: u64,
        timeout: Duration,
    ) -> Result<Vec<String>, DataLoadError> {
        let url = format!("{base_url}/result");
        let mut log = Vec::new();

        for _ in 0..polls {
            tokio::time::sleep(self.wait.poll_interval).await;

            let response = match self.policy.send(|| self.http.get(&url)).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Unable to reach result endpoint ({url}): {e}");
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                warn!("Status code from result endpoint ({url}) was unexpected: {status}");
                continue;
            }

            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Unable to read result response: {e}");
                    continue;
                }
            };
            let job: JobStatus = match serde_json::from_str(&body) {
                Ok(job) => job,
                Err(_) => {
                    warn!("Unable to convert response to json: '{body}'");
                    continue;
                }
            };

            let partial = job.partial_result.as_deref().map(str::trim).unwrap_or_default();
            if !partial.is_empty() {
                info!("{partial}");
                log.push(partial.to_string());
            }

            match job.status {
                JobState::Finished if job.successful => return Ok(log),
                JobState::Finished => return JobFailedSnafu { result: job.result }.fail(),
                JobState::Pending | JobState::Unknown => {}
            }
        }

        TimedOutSnafu { waited: timeout }.fail()
    }
}
