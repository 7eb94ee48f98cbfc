//! Kubernetes REST client.
//!
//! Talks to the API server directly over HTTPS with a bearer token:
//!
//! - `GET /api/v1/nodes` for membership, `status.capacity.cpu` for capacity
//! - `GET /apis/metrics.k8s.io/v1beta1/nodes/{node}` for CPU usage
//! - `/api/v1/namespaces/{ns}/pods` for running counts and drains
//! - `/apis/batch/v1/namespaces/{ns}/jobs` for stress workloads

use std::collections::BTreeMap;

use capgrid_core::config::ApiConfig;
use capgrid_core::{NodeRole, NodeSpec};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::api::{ApiFuture, ClusterApi, Member};
use crate::error::{ClusterError, ClusterResult};
use crate::quantity::utilization_percent;
use crate::workload::WorkloadManifest;

const ROLE_LABEL: &str = "role";
const NODE_TYPE_LABEL: &str = "nodetype";
const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

// ── Wire types (only the fields we read) ───────────────────────────

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct NodeObject {
    metadata: ObjectMeta,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    capacity: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct NodeMetrics {
    #[serde(default)]
    usage: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    metadata: ObjectMeta,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    phase: Option<String>,
}

impl PodObject {
    fn is_running(&self) -> bool {
        self.status.phase.as_deref() == Some("Running")
    }
}

impl NodeObject {
    fn role(&self) -> NodeRole {
        match self.metadata.labels.get(ROLE_LABEL) {
            Some(role) => NodeRole::from_label(role),
            None if self.metadata.labels.contains_key(CONTROL_PLANE_LABEL) => NodeRole::Master,
            None => NodeRole::Worker,
        }
    }
}

/// [`ClusterApi`] backed by a Kubernetes API server.
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: Client,
    base: String,
    token: Option<String>,
}

impl KubeClient {
    /// Build a client from the `[api]` config section. The token comes from
    /// `token` or, failing that, from the contents of `token_file`.
    pub fn new(config: &ApiConfig) -> ClusterResult<Self> {
        let token = match (&config.token, &config.token_file) {
            (Some(token), _) => Some(token.trim().to_string()),
            (None, Some(path)) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ClusterError::Config(format!("reading token file {}: {e}", path.display()))
                })?;
                Some(raw.trim().to_string())
            }
            (None, None) => None,
        };

        let http = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base: config.server.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Unauthenticated client for an explicit base URL.
    pub fn with_base_url(base: &str) -> ClusterResult<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> ClusterResult<T> {
        let url = format!("{}{}", self.base, path);
        trace!(%method, %url, "api request");

        let mut req = self.http.request(method, &url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClusterError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClusterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClusterError::Decode(format!("{path}: {e}")))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ClusterResult<T> {
        self.request(Method::GET, path, query, None).await
    }

    async fn node_pods(&self, node: &str, namespace: &str) -> ClusterResult<Vec<PodObject>> {
        let selector = format!("spec.nodeName={node}");
        let pods: List<PodObject> = self
            .get(
                &format!("/api/v1/namespaces/{namespace}/pods"),
                &[("fieldSelector", selector.as_str())],
            )
            .await?;
        Ok(pods.items)
    }

    async fn utilization(&self, node: &str) -> ClusterResult<f64> {
        let metrics: NodeMetrics = self
            .get(&format!("/apis/metrics.k8s.io/v1beta1/nodes/{node}"), &[])
            .await?;
        let usage = metrics
            .usage
            .get("cpu")
            .ok_or_else(|| ClusterError::Decode("metrics without usage.cpu".to_string()))?;

        let info: NodeObject = self.get(&format!("/api/v1/nodes/{node}"), &[]).await?;
        let capacity = info
            .status
            .capacity
            .get("cpu")
            .ok_or_else(|| ClusterError::Decode("node without status.capacity.cpu".to_string()))?;

        let percent = utilization_percent(usage, capacity)?;
        debug!(node, usage = %usage, capacity = %capacity, percent, "node utilization");
        Ok(percent)
    }
}

/// Node object registered for an inventory entry.
pub(crate) fn node_body(spec: &NodeSpec) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {
            "name": spec.name,
            "labels": {
                ROLE_LABEL: spec.labels.role.as_str(),
                NODE_TYPE_LABEL: spec.labels.node_type,
            },
        },
        "status": {
            "addresses": [{ "type": "InternalIP", "address": spec.address }],
        },
    })
}

/// batch/v1 Job running the manifest's container once per replica.
pub(crate) fn job_body(m: &WorkloadManifest) -> Value {
    let mut pod_spec = json!({
        "restartPolicy": "Never",
        "containers": [{
            "name": "stress",
            "image": m.image,
            "args": m.args,
        }],
        "tolerations": [{
            "key": CONTROL_PLANE_LABEL,
            "operator": "Exists",
            "effect": "NoSchedule",
        }],
    });
    if let Some(node_type) = &m.node_type {
        pod_spec["affinity"] = json!({
            "nodeAffinity": {
                "requiredDuringSchedulingIgnoredDuringExecution": {
                    "nodeSelectorTerms": [{
                        "matchExpressions": [{
                            "key": NODE_TYPE_LABEL,
                            "operator": "In",
                            "values": [node_type],
                        }],
                    }],
                },
            },
        });
    }

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": m.name,
            "namespace": m.namespace,
            "labels": { "app": m.name },
        },
        "spec": {
            "parallelism": m.replicas,
            "completions": m.replicas,
            "backoffLimit": 0,
            "ttlSecondsAfterFinished": m.ttl_after_finished,
            "template": {
                "metadata": { "labels": { "app": m.name } },
                "spec": pod_spec,
            },
        },
    })
}

fn tolerate_missing(result: ClusterResult<Value>) -> ClusterResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

impl ClusterApi for KubeClient {
    fn list_members(&self) -> ApiFuture<'_, Vec<Member>> {
        Box::pin(async move {
            let nodes: List<NodeObject> = self.get("/api/v1/nodes", &[]).await?;
            Ok(nodes
                .items
                .iter()
                .map(|n| Member::new(&n.metadata.name, n.role()))
                .collect())
        })
    }

    fn node_utilization<'a>(&'a self, node: &'a str) -> ApiFuture<'a, f64> {
        Box::pin(async move {
            self.utilization(node)
                .await
                .map_err(|e| ClusterError::MetricsUnavailable {
                    node: node.to_string(),
                    reason: e.to_string(),
                })
        })
    }

    fn running_workloads<'a>(&'a self, node: &'a str, namespace: &'a str) -> ApiFuture<'a, u32> {
        Box::pin(async move {
            let pods = self.node_pods(node, namespace).await?;
            Ok(pods.iter().filter(|p| p.is_running()).count() as u32)
        })
    }

    fn create_node<'a>(&'a self, spec: &'a NodeSpec) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let _: Value = self
                .request(Method::POST, "/api/v1/nodes", &[], Some(&node_body(spec)))
                .await?;
            Ok(())
        })
    }

    fn delete_node<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let _: Value = self
                .request(Method::DELETE, &format!("/api/v1/nodes/{name}"), &[], None)
                .await?;
            Ok(())
        })
    }

    fn workload_exists<'a>(&'a self, namespace: &'a str, name: &'a str) -> ApiFuture<'a, bool> {
        Box::pin(async move {
            let path = format!("/apis/batch/v1/namespaces/{namespace}/jobs/{name}");
            match self.get::<Value>(&path, &[]).await {
                Ok(_) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            }
        })
    }

    fn create_workload<'a>(&'a self, manifest: &'a WorkloadManifest) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/apis/batch/v1/namespaces/{}/jobs", manifest.namespace);
            let _: Value = self
                .request(Method::POST, &path, &[], Some(&job_body(manifest)))
                .await?;
            Ok(())
        })
    }

    fn delete_workload<'a>(&'a self, namespace: &'a str, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/apis/batch/v1/namespaces/{namespace}/jobs/{name}");
            let body = json!({ "propagationPolicy": "Foreground" });
            tolerate_missing(self.request(Method::DELETE, &path, &[], Some(&body)).await)
        })
    }

    fn count_running<'a>(&'a self, namespace: &'a str, selector: &'a str) -> ApiFuture<'a, u32> {
        Box::pin(async move {
            let pods: List<PodObject> = self
                .get(
                    &format!("/api/v1/namespaces/{namespace}/pods"),
                    &[("labelSelector", selector)],
                )
                .await?;
            Ok(pods.items.iter().filter(|p| p.is_running()).count() as u32)
        })
    }

    fn drain_node<'a>(&'a self, node: &'a str, namespace: &'a str) -> ApiFuture<'a, u32> {
        Box::pin(async move {
            let pods = self.node_pods(node, namespace).await?;
            let mut deleted = 0;
            for pod in &pods {
                let path = format!("/api/v1/namespaces/{namespace}/pods/{}", pod.metadata.name);
                tolerate_missing(self.request(Method::DELETE, &path, &[], None).await)?;
                deleted += 1;
            }
            debug!(node, deleted, "node drained");
            Ok(deleted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> KubeClient {
        KubeClient::new(&ApiConfig {
            server: server.uri(),
            token: Some("secret-token".to_string()),
            token_file: None,
            insecure: false,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn lists_members_with_roles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/nodes"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    { "metadata": { "name": "node0", "labels": { "role": "master" } } },
                    { "metadata": { "name": "node1", "labels": { "role": "worker", "nodetype": "worker1" } } },
                    { "metadata": { "name": "node2", "labels": { CONTROL_PLANE_LABEL: "" } } }
                ]
            })))
            .mount(&server)
            .await;

        let members = client(&server).await.list_members().await.unwrap();
        assert_eq!(
            members,
            vec![
                Member::new("node0", NodeRole::Master),
                Member::new("node1", NodeRole::Worker),
                Member::new("node2", NodeRole::Master),
            ]
        );
    }

    #[tokio::test]
    async fn utilization_from_metrics_and_capacity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/metrics.k8s.io/v1beta1/nodes/node1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "usage": { "cpu": "1000000u", "memory": "1Gi" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/nodes/node1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata": { "name": "node1" },
                "status": { "capacity": { "cpu": "4" } }
            })))
            .mount(&server)
            .await;

        let util = client(&server).await.node_utilization("node1").await.unwrap();
        assert!((util - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_metrics_reported_as_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/metrics.k8s.io/v1beta1/nodes/node2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server).await.node_utilization("node2").await.unwrap_err();
        assert!(matches!(
            err,
            ClusterError::MetricsUnavailable { ref node, .. } if node == "node2"
        ));
    }

    #[tokio::test]
    async fn running_workloads_counts_running_pods_on_node() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/jobs/pods"))
            .and(query_param("fieldSelector", "spec.nodeName=node1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    { "metadata": { "name": "a" }, "status": { "phase": "Running" } },
                    { "metadata": { "name": "b" }, "status": { "phase": "Pending" } },
                    { "metadata": { "name": "c" }, "status": { "phase": "Running" } },
                    { "metadata": { "name": "d" }, "status": { "phase": "Succeeded" } }
                ]
            })))
            .mount(&server)
            .await;

        let count = client(&server).await.running_workloads("node1", "jobs").await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn workload_exists_and_delete_tolerate_not_found() {
        let server = MockServer::start().await;
        Mock::given(path("/apis/batch/v1/namespaces/jobs/jobs/job-worker1-0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let kube = client(&server).await;
        assert!(!kube.workload_exists("jobs", "job-worker1-0").await.unwrap());
        kube.delete_workload("jobs", "job-worker1-0").await.unwrap();
    }

    #[tokio::test]
    async fn create_workload_posts_pinned_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apis/batch/v1/namespaces/jobs/jobs"))
            .and(body_partial_json(json!({
                "kind": "Job",
                "metadata": { "name": "job-worker1-0" },
                "spec": { "parallelism": 2, "completions": 2, "backoffLimit": 0 }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let manifest = WorkloadManifest::new("job-worker1-0", "jobs", "polinux/stress-ng")
            .with_replicas(2)
            .pinned_to("worker1");
        client(&server).await.create_workload(&manifest).await.unwrap();
    }

    #[tokio::test]
    async fn server_errors_surface_status() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/nodes/node1"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = client(&server).await.delete_node("node1").await.unwrap_err();
        assert!(matches!(
            err,
            ClusterError::Status { status: 403, ref body } if body == "forbidden"
        ));
    }

    #[tokio::test]
    async fn drain_deletes_every_pod_on_node() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/jobs/pods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    { "metadata": { "name": "p1" }, "status": { "phase": "Running" } },
                    { "metadata": { "name": "p2" }, "status": { "phase": "Running" } }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/jobs/pods/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/jobs/pods/p2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let drained = client(&server).await.drain_node("node1", "jobs").await.unwrap();
        assert_eq!(drained, 2);
    }

    #[test]
    fn token_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "file-token\n").unwrap();

        let kube = KubeClient::new(&ApiConfig {
            server: "https://10.0.0.1:6443/".to_string(),
            token: None,
            token_file: Some(token_path),
            insecure: true,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(kube.token.as_deref(), Some("file-token"));
        assert_eq!(kube.base_url(), "https://10.0.0.1:6443");
    }

    #[test]
    fn node_and_job_bodies() {
        let spec = NodeSpec::new("node1", "10.0.0.2", NodeRole::Worker, "worker1");
        let node = node_body(&spec);
        assert_eq!(node["metadata"]["labels"]["nodetype"], "worker1");
        assert_eq!(node["metadata"]["labels"]["role"], "worker");
        assert_eq!(node["status"]["addresses"][0]["address"], "10.0.0.2");

        let job = job_body(&WorkloadManifest::new("stress", "default", "img"));
        assert!(job["spec"]["template"]["spec"].get("affinity").is_none());
        assert_eq!(job["spec"]["template"]["spec"]["restartPolicy"], "Never");

        let pinned =
            job_body(&WorkloadManifest::new("stress", "default", "img").pinned_to("worker2"));
        let term = &pinned["spec"]["template"]["spec"]["affinity"]["nodeAffinity"]
            ["requiredDuringSchedulingIgnoredDuringExecution"]["nodeSelectorTerms"][0]
            ["matchExpressions"][0];
        assert_eq!(term["values"][0], "worker2");
    }
}
