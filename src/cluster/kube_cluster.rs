//! Live cluster implementation over kube-rs.

use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::{Event, Node as KubeNode, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{
    Api, ApiResource, AttachParams, DynamicObject, GroupVersionKind, ListParams, LogParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::exec_policy::{self, ExecRequest, ExecTransport, IssueError};
use super::kubectl::Kubectl;
use super::types::{ExecOutcome, Mutation, NetworkAttachment, Node, Workload, WorkloadEvent};
use super::Cluster;
use crate::config::{TestConfig, Thresholds};
use crate::error::{Error, Result};

const NAD_GROUP: &str = "k8s.cni.cncf.io";
const NAD_VERSION: &str = "v1";
const NAD_KIND: &str = "NetworkAttachmentDefinition";
const NAD_PLURAL: &str = "network-attachment-definitions";

/// Cluster client backed by the Kubernetes API and `kubectl`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    kubectl: Kubectl,
    thresholds: Thresholds,
}

impl KubeCluster {
    /// Connect using the configured credentials file, falling back to the
    /// in-cluster service account when the file does not exist.
    pub async fn connect(config: &TestConfig) -> Result<Self> {
        Self::connect_at(&config.kubeconfig_path(), config.thresholds()).await
    }

    /// Connect with the credentials file at `kubeconfig_path`.
    ///
    /// Every failure to reach the API server, including an unusable
    /// credentials file, is [`Error::ClusterUnavailable`].
    pub async fn connect_at(kubeconfig_path: &Path, thresholds: Thresholds) -> Result<Self> {
        let (mut kube_config, credentials) = if kubeconfig_path.exists() {
            let kubeconfig = Kubeconfig::read_from(kubeconfig_path).map_err(|e| {
                Error::ClusterUnavailable(format!(
                    "cannot read kubeconfig at '{}': {}",
                    kubeconfig_path.display(),
                    e
                ))
            })?;
            let kube_config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        Error::ClusterUnavailable(format!("invalid kubeconfig: {e}"))
                    })?;
            (kube_config, Some(kubeconfig_path.to_path_buf()))
        } else {
            let kube_config = Config::incluster().map_err(|e| {
                Error::ClusterUnavailable(format!(
                    "cannot load kubeconfig at '{}' and not in cluster: {}",
                    kubeconfig_path.display(),
                    e
                ))
            })?;
            (kube_config, None)
        };

        kube_config.connect_timeout = Some(thresholds.api_timeout);
        kube_config.read_timeout = Some(thresholds.read_timeout());

        let client = Client::try_from(kube_config)
            .map_err(|e| Error::ClusterUnavailable(format!("cannot build client: {e}")))?;

        let version = client
            .apiserver_version()
            .await
            .map_err(|e| Error::ClusterUnavailable(e.to_string()))?;
        info!(
            platform = %version.platform,
            version = %version.git_version,
            "Connected to Kubernetes cluster"
        );

        Ok(Self::from_client(client, credentials, thresholds))
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client, kubeconfig: Option<PathBuf>, thresholds: Thresholds) -> Self {
        Self {
            kubectl: Kubectl::new(kubeconfig, thresholds.kubectl_timeout),
            client,
            thresholds,
        }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn nad_resource() -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(NAD_GROUP, NAD_VERSION, NAD_KIND),
            NAD_PLURAL,
        )
    }

    async fn run_exec(
        &self,
        request: &ExecRequest<'_>,
        container: Option<&str>,
    ) -> std::result::Result<ExecOutcome, kube::Error> {
        let mut params = AttachParams::default()
            .stdin(false)
            .stdout(true)
            .stderr(true);
        if let Some(container) = container {
            params = params.container(container);
        }

        let command: Vec<String> = request.command.iter().map(|s| s.to_string()).collect();
        let mut attached = self
            .pods(request.namespace)
            .exec(request.workload, command, &params)
            .await?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (stdout, stderr) = tokio::join!(drain(stdout), drain(stderr));
        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        if let Err(e) = attached.join().await {
            debug!(error = %e, "Exec stream closed with error");
        }

        Ok(ExecOutcome {
            stdout,
            stderr,
            exit_status: exit_status_from(status.as_ref()),
        })
    }
}

/// Read a stream to the end, lossily decoding it as UTF-8.
async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "Failed to read exec stream");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Exit status from the Status object sent on the exec error channel.
fn exit_status_from(status: Option<&Status>) -> i32 {
    let Some(status) = status else {
        return 0;
    };
    if status.status.as_deref() == Some("Success") {
        return 0;
    }
    status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
                .and_then(|c| c.message.as_deref())
                .and_then(|m| m.trim().parse().ok())
        })
        .unwrap_or(1)
}

impl ExecTransport for KubeCluster {
    async fn exec_once(
        &self,
        request: &ExecRequest<'_>,
        container: Option<&str>,
    ) -> std::result::Result<ExecOutcome, IssueError> {
        match timeout(self.thresholds.exec_timeout, self.run_exec(request, container)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(kube::Error::Api(resp))) => Err(IssueError::Rejected(resp.message)),
            Ok(Err(e)) => Err(IssueError::Rejected(e.to_string())),
            Err(_) => Err(IssueError::TimedOut(self.thresholds.exec_timeout)),
        }
    }

    async fn first_declared_container(&self, workload: &str, namespace: &str) -> Option<String> {
        match self.pods(namespace).get(workload).await {
            Ok(pod) => Workload::from_pod(&pod).first_container().map(String::from),
            Err(e) => {
                warn!(workload, namespace, error = %e, "Cannot re-read workload spec");
                None
            }
        }
    }
}

impl Cluster for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes: Api<KubeNode> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(Error::from_list_error)?;
        Ok(list.items.iter().map(Node::from_kube).collect())
    }

    async fn list_workloads(&self, namespace: Option<&str>) -> Result<Vec<Workload>> {
        let pods: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = pods
            .list(&ListParams::default())
            .await
            .map_err(Error::from_list_error)?;
        Ok(list.items.iter().map(Workload::from_pod).collect())
    }

    async fn list_network_attachments(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<NetworkAttachment>> {
        let resource = Self::nad_resource();
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        };
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items.iter().map(NetworkAttachment::from_dynamic).collect()),
            // Resource type not installed: nothing to find
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!("NetworkAttachmentDefinition resource not served");
                Ok(Vec::new())
            }
            Err(e) => Err(Error::from_list_error(e)),
        }
    }

    async fn read_logs(
        &self,
        workload: &str,
        namespace: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> Result<String> {
        let params = LogParams {
            container: container.map(String::from),
            tail_lines: Some(tail_lines),
            timestamps: false,
            ..LogParams::default()
        };
        self.pods(namespace)
            .logs(workload, &params)
            .await
            .map_err(|e| Error::LogUnavailable {
                workload: workload.to_string(),
                namespace: namespace.to_string(),
                reason: e.to_string(),
            })
    }

    async fn list_events(&self, workload: &str, namespace: &str) -> Result<Vec<WorkloadEvent>> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!(
            "involvedObject.kind=Pod,involvedObject.name={workload},involvedObject.namespace={namespace}"
        );
        let list = events
            .list(&ListParams::default().fields(&selector))
            .await
            .map_err(Error::from_list_error)?;
        Ok(list.items.iter().map(WorkloadEvent::from_kube).collect())
    }

    async fn exec_command(
        &self,
        workload: &str,
        namespace: &str,
        command: &[&str],
        container: Option<&str>,
    ) -> ExecOutcome {
        let request = ExecRequest {
            workload,
            namespace,
            command,
            container,
        };
        exec_policy::execute(self, &request).await
    }

    async fn mutate(&self, mutation: &Mutation) -> ExecOutcome {
        self.kubectl.apply(mutation).await
    }
}
