//! In-memory collaborators for orchestrator and data-load tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};

use crate::cluster::{ClusterClient, ClusterError, ConfigMapInfo, NamespaceSpec, RouteRule};
use crate::dataload::{DataLoadClient, RetryPolicy};
use crate::helm::{CommandOutput, PackageError, PackageManager, ReleaseCommand, ValueArg};
use crate::labels;
use crate::settings::WaitSettings;

#[derive(Debug, Default)]
pub struct ClusterState {
    pub namespaces: BTreeMap<String, BTreeMap<String, String>>,
    pub config_maps: BTreeMap<(String, String), ConfigMapInfo>,
    pub services: BTreeSet<(String, String)>,
    /// `(namespace, name, labels)`
    pub deployments: Vec<(String, String, BTreeMap<String, String>)>,
    /// Counts returned by successive workload polls; the last one repeats
    pub workload_counts: VecDeque<usize>,
    pub workload_polls: usize,
    pub created: Vec<NamespaceSpec>,
    pub patched: Vec<NamespaceSpec>,
    pub deleted: Vec<String>,
    /// `(namespace, deployment, restarted_at)`
    pub restarted: Vec<(String, String, String)>,
    /// `(namespace, istio, route)`
    pub routes: Vec<(String, bool, RouteRule)>,
    pub fail_namespace_delete: bool,
    pub server_version: String,
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    pub state: Mutex<ClusterState>,
}

impl FakeCluster {
    /// A cluster with the shared ingress config in place
    pub fn with_ingress() -> Self {
        let cluster = Self::default();
        cluster.add_config_map(
            labels::GMS_SYSTEM_NAMESPACE,
            labels::INGRESS_PORTS_CONFIG_MAP,
            ConfigMapInfo {
                labels: BTreeMap::new(),
                data: BTreeMap::from([
                    ("base_domain".to_string(), "cluster.example.com".to_string()),
                    ("istio_port".to_string(), "8443".to_string()),
                    ("nginx_port".to_string(), "443".to_string()),
                ]),
            },
        );
        cluster
    }

    pub fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(name.to_string(), labels);
    }

    pub fn add_config_map(&self, namespace: &str, name: &str, info: ConfigMapInfo) {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .insert((namespace.to_string(), name.to_string()), info);
    }

    /// Record an instance type the way an install does
    pub fn add_instance_labels(&self, namespace: &str, instance_type: &str) {
        self.add_config_map(
            namespace,
            labels::GMS_CONFIG_MAP,
            ConfigMapInfo {
                labels: BTreeMap::from([
                    (labels::GMS_TYPE.to_string(), instance_type.to_string()),
                    (labels::GMS_NAME.to_string(), namespace.to_string()),
                ]),
                data: BTreeMap::new(),
            },
        );
    }

    pub fn add_service(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .services
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn add_deployment(&self, namespace: &str, name: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        self.state
            .lock()
            .unwrap()
            .deployments
            .push((namespace.to_string(), name.to_string(), labels));
    }

    pub fn script_workloads(&self, counts: &[usize]) {
        self.state.lock().unwrap().workload_counts = counts.iter().copied().collect();
    }

    /// Publish a route as a virtual service when `istio`, otherwise as an
    /// ingress path
    pub fn add_route(&self, namespace: &str, istio: bool, service: &str, host: &str, path: &str) {
        self.state.lock().unwrap().routes.push((
            namespace.to_string(),
            istio,
            RouteRule {
                service: service.to_string(),
                host: host.to_string(),
                path: path.to_string(),
            },
        ));
    }
}

/// `key=value` selectors only
fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector.split(',').all(|term| match term.split_once('=') {
        Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
        None => labels.contains_key(term),
    })
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_namespace(&self, spec: &NamespaceSpec) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.namespaces.contains_key(&spec.name) {
            return Err(ClusterError::Conflict {
                kind: "namespace",
                name: spec.name.clone(),
            });
        }
        state
            .namespaces
            .insert(spec.name.clone(), spec.labels.clone());
        state.created.push(spec.clone());
        Ok(())
    }

    async fn patch_namespace(&self, spec: &NamespaceSpec) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let Some(labels) = state.namespaces.get_mut(&spec.name) else {
            return Err(ClusterError::NotFound {
                kind: "namespace",
                name: spec.name.clone(),
            });
        };
        labels.extend(spec.labels.clone());
        state.patched.push(spec.clone());
        Ok(())
    }

    async fn namespace_labels(&self, name: &str) -> Result<BTreeMap<String, String>, ClusterError> {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "namespace",
                name: name.to_string(),
            })
    }

    async fn delete_namespace(&self, name: &str, _timeout: Duration) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_namespace_delete {
            return Err(ClusterError::Injected {
                message: "Forbidden".to_string(),
            });
        }
        state.namespaces.remove(name);
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn config_map(&self, namespace: &str, name: &str) -> Result<ConfigMapInfo, ClusterError> {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "configmap",
                name: name.to_string(),
            })
    }

    async fn gms_config_map_labels(&self) -> Result<Vec<BTreeMap<String, String>>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .config_maps
            .iter()
            .filter(|((_, name), _)| name == labels::GMS_CONFIG_MAP)
            .map(|(_, info)| info.labels.clone())
            .collect())
    }

    async fn read_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let state = self.state.lock().unwrap();
        if state
            .services
            .contains(&(namespace.to_string(), name.to_string()))
        {
            Ok(())
        } else {
            Err(ClusterError::NotFound {
                kind: "service",
                name: name.to_string(),
            })
        }
    }

    async fn count_managed_workloads(&self, _namespace: &str) -> Result<usize, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.workload_polls += 1;
        let count = if state.workload_counts.len() > 1 {
            state.workload_counts.pop_front().unwrap_or_default()
        } else {
            state.workload_counts.front().copied().unwrap_or_default()
        };
        Ok(count)
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<String>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .deployments
            .iter()
            .filter(|(ns, _, labels)| ns == namespace && matches_selector(labels, selector))
            .map(|(_, name, _)| name.clone())
            .collect())
    }

    async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        restarted_at: &str,
    ) -> Result<(), ClusterError> {
        self.state.lock().unwrap().restarted.push((
            namespace.to_string(),
            name.to_string(),
            restarted_at.to_string(),
        ));
        Ok(())
    }

    async fn list_routes(
        &self,
        namespace: &str,
        istio: bool,
    ) -> Result<Vec<RouteRule>, ClusterError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .routes
            .iter()
            .filter(|(ns, kind, _)| ns == namespace && *kind == istio)
            .map(|(_, _, route)| route.clone())
            .collect())
    }

    async fn server_version(&self) -> Result<String, ClusterError> {
        Ok(self.state.lock().unwrap().server_version.clone())
    }
}

#[derive(Debug, Default)]
pub struct HelmState {
    pub applied: Vec<ReleaseCommand>,
    pub uninstalled: Vec<String>,
    pub get_values_calls: usize,
    /// Exit code of every `apply`
    pub apply_code: i32,
    pub uninstall_code: i32,
    pub get_values: CommandOutput,
    pub list: CommandOutput,
    /// Contents of `--values` files at the time they were applied
    pub values_files: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeHelm {
    pub state: Mutex<HelmState>,
}

impl FakeHelm {
    pub fn applied(&self) -> Vec<ReleaseCommand> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn fail_apply(&self, code: i32) {
        self.state.lock().unwrap().apply_code = code;
    }
}

fn output(code: i32) -> CommandOutput {
    CommandOutput {
        code,
        stdout: String::new(),
        stderr: if code == 0 {
            String::new()
        } else {
            "Error: INSTALLATION FAILED".to_string()
        },
    }
}

#[async_trait]
impl PackageManager for FakeHelm {
    async fn apply(&self, command: &ReleaseCommand) -> Result<CommandOutput, PackageError> {
        let mut state = self.state.lock().unwrap();
        for value in &command.values {
            if let ValueArg::ValuesFile(path) = value {
                state
                    .values_files
                    .push(std::fs::read_to_string(path).unwrap_or_default());
            }
        }
        state.applied.push(command.clone());
        Ok(output(state.apply_code))
    }

    async fn get_values(
        &self,
        _release: &str,
        _namespace: &str,
    ) -> Result<CommandOutput, PackageError> {
        let mut state = self.state.lock().unwrap();
        state.get_values_calls += 1;
        Ok(state.get_values.clone())
    }

    async fn uninstall(&self, release: &str, _namespace: &str) -> Result<CommandOutput, PackageError> {
        let mut state = self.state.lock().unwrap();
        state.uninstalled.push(release.to_string());
        Ok(output(state.uninstall_code))
    }

    async fn list(&self) -> Result<CommandOutput, PackageError> {
        Ok(self.state.lock().unwrap().list.clone())
    }
}

pub const FINISHED_OK: &str =
    r#"{"status":"FINISHED","successful":true,"partial_result":"","result":"done"}"#;
pub const FINISHED_FAILED: &str =
    r#"{"status":"FINISHED","successful":false,"partial_result":"","result":"bad station"}"#;

#[derive(Debug, Default)]
pub struct LoaderState {
    pub alive: bool,
    /// Submissions answered with 404 before one is accepted
    pub submit_not_found: usize,
    pub submit_status: Option<u16>,
    /// Scripted `/result` replies; the last one repeats
    pub results: VecDeque<(u16, String)>,
    pub alive_calls: usize,
    pub load_calls: usize,
    pub reload_calls: usize,
    pub saw_zipfile: bool,
}

/// A `config-loader` service answering from a script, served on a local port
#[derive(Debug, Clone, Default)]
pub struct ScriptedLoader {
    pub state: Arc<Mutex<LoaderState>>,
}

impl ScriptedLoader {
    pub fn alive() -> Self {
        let loader = Self::default();
        loader.state.lock().unwrap().alive = true;
        loader
    }

    pub fn script_results(&self, results: &[(u16, &str)]) {
        self.state.lock().unwrap().results = results
            .iter()
            .map(|(code, body)| (*code, (*body).to_string()))
            .collect();
    }

    pub fn with<R>(&self, f: impl FnOnce(&LoaderState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }

    /// Start serving and return the loader base URL
    pub async fn serve(&self) -> String {
        let app = Router::new()
            .route("/config-loader/alive", get(alive))
            .route("/config-loader/load", post(load))
            .route("/config-loader/reload", post(reload))
            .route("/config-loader/result", get(result))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/config-loader")
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn alive(State(loader): State<ScriptedLoader>) -> StatusCode {
    let mut state = loader.state.lock().unwrap();
    state.alive_calls += 1;
    if state.alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

fn accept_submission(state: &mut LoaderState, headers: &HeaderMap, body: &Bytes) -> StatusCode {
    if state.submit_not_found > 0 {
        state.submit_not_found -= 1;
        return StatusCode::NOT_FOUND;
    }
    let multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));
    if multipart && String::from_utf8_lossy(body).contains("name=\"zipfile\"") {
        state.saw_zipfile = true;
    }
    state.submit_status.map_or(StatusCode::OK, status)
}

async fn load(State(loader): State<ScriptedLoader>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let mut state = loader.state.lock().unwrap();
    state.load_calls += 1;
    accept_submission(&mut state, &headers, &body)
}

async fn reload(
    State(loader): State<ScriptedLoader>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let mut state = loader.state.lock().unwrap();
    state.reload_calls += 1;
    accept_submission(&mut state, &headers, &body)
}

async fn result(State(loader): State<ScriptedLoader>) -> (StatusCode, String) {
    let mut state = loader.state.lock().unwrap();
    let reply = if state.results.len() > 1 {
        state.results.pop_front()
    } else {
        state.results.front().cloned()
    };
    let (code, body) = reply.unwrap_or((200, r#"{"status":"PENDING"}"#.to_string()));
    (status(code), body)
}

/// Loader client with millisecond waits and a short retry budget
pub fn quick_loader_client() -> DataLoadClient {
    DataLoadClient::new(None)
        .unwrap()
        .with_wait(WaitSettings {
            poll_interval: Duration::from_millis(10),
        })
        .with_policy(RetryPolicy {
            max_retries: 3,
            backoff_factor: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        })
}

/// Formatted events recorded on the current thread
#[derive(Debug, Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Record events until the returned guard is dropped
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
