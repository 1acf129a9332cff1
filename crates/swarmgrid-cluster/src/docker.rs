//! Docker Engine API client over plain HTTP.
//!
//! One connection per request, each bounded by the client's timeout.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use swarmgrid_state::{ContainerConfig, PortBinding, Protocol};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{ContainerHandle, ContainerSummary, EngineInfo, RuntimeClient};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InfoResponse {
    #[serde(default)]
    name: String,
    #[serde(rename = "NCPU", default)]
    ncpu: f64,
    #[serde(default)]
    mem_total: u64,
    #[serde(default)]
    labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: String,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedContainer {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    ports: Vec<ListedPort>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedPort {
    private_port: u16,
    #[serde(default)]
    public_port: Option<u16>,
    #[serde(rename = "Type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// Talks to `dockerd` listening on TCP at each node's address.
#[derive(Debug, Clone)]
pub struct DockerClient {
    timeout: Duration,
}

impl DockerClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn request(
        &self,
        addr: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> RuntimeResult<(StatusCode, Bytes)> {
        let body = match body {
            Some(v) => Bytes::from(serde_json::to_vec(&v).map_err(|e| RuntimeError::Decode(e.to_string()))?),
            None => Bytes::new(),
        };
        debug!(node = %addr, %method, %path, "runtime request");
        match tokio::time::timeout(self.timeout, send(addr, method, path, body)).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout(format!("{addr}{path}"))),
        }
    }
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

/// Map a non-2xx response to a `RuntimeError`.
fn api_error(status: StatusCode, body: &[u8], what: &str) -> RuntimeError {
    let message = serde_json::from_slice::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    if status == StatusCode::NOT_FOUND {
        return RuntimeError::NotFound(what.to_string());
    }
    RuntimeError::Api {
        status: status.as_u16(),
        message,
    }
}

fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> RuntimeResult<T> {
    serde_json::from_slice(body).map_err(|e| RuntimeError::Decode(e.to_string()))
}

/// Docker reports engine labels as `key=value` strings.
fn parse_engine_labels(labels: &[String]) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Percent-encode everything outside the URI unreserved set.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(b as char),
            b => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Request body for `POST /containers/create`.
fn create_body(config: &ContainerConfig) -> Value {
    let mut exposed: HashMap<String, Value> = HashMap::new();
    let mut bindings: HashMap<String, Vec<Value>> = HashMap::new();
    for port in &config.ports {
        let key = format!("{}/{}", port.container_port, port.protocol);
        exposed.insert(key.clone(), json!({}));
        if let Some(host_port) = port.host_port {
            bindings
                .entry(key)
                .or_default()
                .push(json!({ "HostPort": host_port.to_string() }));
        }
    }

    let nano_cpus = (config.cpus * 1e9) as i64;
    let mut body = json!({
        "Image": config.image,
        "Env": config.env,
        "Labels": config.labels,
        "ExposedPorts": exposed,
        "HostConfig": {
            "NanoCpus": nano_cpus,
            "Memory": config.memory_bytes,
            "PortBindings": bindings,
        },
    });
    if !config.cmd.is_empty() {
        body["Cmd"] = json!(config.cmd);
    }
    body
}

#[async_trait]
impl RuntimeClient for DockerClient {
    async fn info(&self, addr: &str) -> RuntimeResult<EngineInfo> {
        let (status, body) = self.request(addr, Method::GET, "/info", None).await?;
        if !status.is_success() {
            return Err(api_error(status, &body, "/info"));
        }
        let info: InfoResponse = decode(&body)?;
        Ok(EngineInfo {
            name: info.name,
            cpus: info.ncpu,
            memory_bytes: info.mem_total,
            labels: parse_engine_labels(info.labels.as_deref().unwrap_or_default()),
        })
    }

    async fn create_container(
        &self,
        addr: &str,
        config: &ContainerConfig,
        name: &str,
    ) -> RuntimeResult<ContainerHandle> {
        let mut path = "/containers/create".to_string();
        if !name.is_empty() {
            path.push_str(&format!("?name={}", encode_component(name)));
        }
        let (status, body) = self
            .request(addr, Method::POST, &path, Some(create_body(config)))
            .await?;
        if !status.is_success() {
            return Err(api_error(status, &body, &format!("image {}", config.image)));
        }
        let created: CreateResponse = decode(&body)?;
        for warning in created.warnings.unwrap_or_default() {
            debug!(node = %addr, container = %created.id, %warning, "runtime warning");
        }
        Ok(ContainerHandle {
            id: created.id,
            name: name.to_string(),
        })
    }

    async fn destroy_container(&self, addr: &str, id: &str, force: bool) -> RuntimeResult<()> {
        let path = format!("/containers/{}?force={force}", encode_component(id));
        let (status, body) = self.request(addr, Method::DELETE, &path, None).await?;
        if !status.is_success() {
            return Err(api_error(status, &body, &format!("container {id}")));
        }
        Ok(())
    }

    async fn list_containers(&self, addr: &str) -> RuntimeResult<Vec<ContainerSummary>> {
        let (status, body) = self
            .request(addr, Method::GET, "/containers/json?all=1", None)
            .await?;
        if !status.is_success() {
            return Err(api_error(status, &body, "/containers/json"));
        }
        let listed: Vec<ListedContainer> = decode(&body)?;
        Ok(listed
            .into_iter()
            .map(|c| ContainerSummary {
                name: c
                    .names
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                id: c.id,
                image: c.image,
                labels: c.labels.unwrap_or_default(),
                ports: c
                    .ports
                    .into_iter()
                    .map(|p| PortBinding {
                        container_port: p.private_port,
                        host_port: p.public_port,
                        protocol: if p.kind == "udp" { Protocol::Udp } else { Protocol::Tcp },
                    })
                    .collect(),
            })
            .collect())
    }
}

/// One HTTP/1.1 request over a fresh connection.
async fn send(addr: &str, method: Method, path: &str, body: Bytes) -> RuntimeResult<(StatusCode, Bytes)> {
    let connect_err = |reason: String| RuntimeError::Connect {
        addr: addr.to_string(),
        reason,
    };

    let stream = tokio::net::TcpStream::connect(addr)
        .await
        .map_err(|e| connect_err(e.to_string()))?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| connect_err(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method(method)
        .uri(path)
        .header("host", addr)
        .header("user-agent", "swarmgrid/0.1")
        .header("content-type", "application/json")
        .body(Full::new(body))
        .map_err(|e| connect_err(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| connect_err(e.to_string()))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| connect_err(e.to_string()))?
        .to_bytes();
    Ok((status, body))
}
