//! Package tool client. Every release change goes through the `helm` binary.

use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, warn};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PackageError {
    #[snafu(display("Unable to run `{command}`: {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("helm task panicked or was cancelled: {source}"))]
    Join { source: tokio::task::JoinError },
}

/// One value override, rendered in the order it was added
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueArg {
    Set(String),
    SetString(String),
    ValuesFile(PathBuf),
}

impl ValueArg {
    pub fn set(key: &str, value: impl std::fmt::Display) -> Self {
        Self::Set(format!("{key}={value}"))
    }

    fn push_args(&self, args: &mut Vec<String>) {
        match self {
            Self::Set(value) => args.extend(["--set".to_string(), value.clone()]),
            Self::SetString(value) => args.extend(["--set-string".to_string(), value.clone()]),
            Self::ValuesFile(path) => {
                args.extend(["--values".to_string(), path.display().to_string()]);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    Install,
    Upgrade,
    /// Render manifests without touching the cluster
    Template,
}

impl ReleaseAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Template => "template",
        }
    }
}

/// A `helm install|upgrade|template` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseCommand {
    pub action: ReleaseAction,
    pub release: String,
    pub chart: String,
    pub namespace: String,
    pub timeout_minutes: u64,
    pub values: Vec<ValueArg>,
    /// Adds `--dry-run --debug`
    pub dry_run: bool,
}

impl ReleaseCommand {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.action.as_str().to_string(),
            self.release.clone(),
            self.chart.clone(),
            "--namespace".to_string(),
            self.namespace.clone(),
            "--timeout".to_string(),
            format!("{}m", self.timeout_minutes),
        ];
        for value in &self.values {
            value.push_args(&mut args);
        }
        if self.dry_run {
            args.extend(["--dry-run".to_string(), "--debug".to_string()]);
        }
        args
    }

    /// Position of the first `--set` equal to `value`
    pub fn position_of(&self, value: &str) -> Option<usize> {
        self.values
            .iter()
            .position(|arg| matches!(arg, ValueArg::Set(v) if v == value))
    }
}

/// Exit status and captured streams of a helm run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// A row of `helm list --output json`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseSummary {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub status: String,
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn apply(&self, command: &ReleaseCommand) -> Result<CommandOutput, PackageError>;

    /// `helm get values <release> --all`
    async fn get_values(&self, release: &str, namespace: &str)
    -> Result<CommandOutput, PackageError>;

    async fn uninstall(&self, release: &str, namespace: &str)
    -> Result<CommandOutput, PackageError>;

    /// Every release in every namespace as JSON
    async fn list(&self) -> Result<CommandOutput, PackageError>;
}

/// Runs the `helm` binary from the deploy directory
#[derive(Debug, Clone)]
pub struct HelmCli {
    deploy_dir: PathBuf,
    /// Directory prepended to `PATH` for the child process
    helm_dir: Option<PathBuf>,
}

impl HelmCli {
    pub fn new(deploy_dir: impl Into<PathBuf>) -> Self {
        Self {
            deploy_dir: deploy_dir.into(),
            helm_dir: None,
        }
    }

    /// Use the helm build installed under `/opt/helm_<version>`
    pub fn with_helm_version(mut self, version: &str) -> Self {
        self.helm_dir = Some(PathBuf::from(format!("/opt/helm_{version}")));
        self
    }

    fn search_path(&self) -> Option<OsString> {
        let dir = self.helm_dir.as_deref()?;
        let current = std::env::var_os("PATH").unwrap_or_default();
        let paths = std::iter::once(dir.to_path_buf()).chain(std::env::split_paths(&current));
        std::env::join_paths(paths).ok()
    }

    async fn run(&self, args: Vec<String>, echo: bool) -> Result<CommandOutput, PackageError> {
        let command = format!("helm {}", args.join(" "));
        debug!("Running command: {command}");

        let mut expression = duct::cmd("helm", &args)
            .dir(&self.deploy_dir)
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        if let Some(path) = self.search_path() {
            expression = expression.env("PATH", path);
        }

        let output = tokio::task::spawn_blocking(move || expression.run())
            .await
            .context(JoinSnafu)?
            .context(SpawnSnafu { command })?;

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if echo {
            echo_output(&result);
        }
        Ok(result)
    }
}

/// Print helm output, dropping the symlink notices helm emits for charts
/// that link shared subcharts.
fn echo_output(output: &CommandOutput) {
    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        info!("{stdout}");
    }

    let stderr = output
        .stderr
        .lines()
        .filter(|line| !is_symlink_notice(line))
        .collect::<Vec<_>>()
        .join("\n");
    if !stderr.trim().is_empty() {
        warn!("{}", stderr.trim());
    }
}

fn is_symlink_notice(line: &str) -> bool {
    line.contains("walk.go") && line.contains("found symbolic link in path")
}

#[async_trait]
impl PackageManager for HelmCli {
    async fn apply(&self, command: &ReleaseCommand) -> Result<CommandOutput, PackageError> {
        self.run(command.args(), true).await
    }

    async fn get_values(
        &self,
        release: &str,
        namespace: &str,
    ) -> Result<CommandOutput, PackageError> {
        let args = ["get", "values", release, "--all", "--namespace", namespace];
        self.run(args.map(String::from).to_vec(), false).await
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<CommandOutput, PackageError> {
        let args = ["uninstall", release, "--namespace", namespace];
        self.run(args.map(String::from).to_vec(), true).await
    }

    async fn list(&self) -> Result<CommandOutput, PackageError> {
        let args = ["list", "--all", "--all-namespaces", "--output", "json"];
        self.run(args.map(String::from).to_vec(), false).await
    }
}

/// Helm release matching a Kubernetes `major.minor` version, per the helm
/// version skew policy. Unsupported versions get the newest helm with a
/// warning.
pub fn helm_version_for(kubernetes_version: &str) -> &'static str {
    let minor = kubernetes_version
        .strip_prefix("1.")
        .and_then(|minor| minor.parse::<u32>().ok());

    match minor {
        Some(20..=23) => "3.8",
        Some(24..=25) => "3.12",
        Some(26..=29) => "3.14",
        _ => {
            warn!(
                "Kubernetes version {kubernetes_version} detected. Only Kubernetes versions \
                 1.20-1.29 are supported by gmskube. Helm 3.14 will be used, which may not be compatible."
            );
            "3.14"
        }
    }
}

/// Write `helm get values` output where a later `--values` can read it
pub fn save_values(values: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("existing_values")
        .suffix(".yaml")
        .tempfile()?;
    std::io::Write::write_all(&mut file, values.as_bytes())?;
    Ok(file)
}
