//! Consul KV store: `consul://host:8500[,host:8500]/swarm`.
//!
//! Reads use Consul blocking queries (`?recurse&index=N&wait=Ns`) and the
//! `X-Consul-Index` response header as the watermark. Registrations with a
//! TTL are bound to a Consul session with `Behavior=delete`, renewed on
//! every write, so keys vanish when a member stops refreshing them.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backends::kv::{KvBackend, KvListing, KvStore};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::uri::DiscoveryUri;

/// Slack added on top of a blocking query's `wait` before giving up.
const REQUEST_SLACK: Duration = Duration::from_secs(5);
/// Timeout for non-blocking requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Consul rejects session TTLs below ten seconds.
const MIN_SESSION_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPair {
    #[allow(dead_code)]
    key: String,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

/// Consul HTTP API client for the KV endpoints discovery needs.
pub struct ConsulKv {
    endpoints: Vec<String>,
    session: Mutex<Option<String>>,
}

impl ConsulKv {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            session: Mutex::new(None),
        }
    }

    /// Build a Consul-backed discovery backend from its URI.
    pub fn backend_from_uri(
        uri: &DiscoveryUri,
        heartbeat: Duration,
    ) -> DiscoveryResult<KvBackend<ConsulKv>> {
        let endpoints = uri.require_addresses()?.to_vec();
        let path = uri.require_path()?;
        Ok(KvBackend::new(ConsulKv::new(endpoints), path, heartbeat))
    }

    /// Issue a request against the first endpoint that answers.
    async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<String>,
        timeout: Duration,
    ) -> DiscoveryResult<Response> {
        let mut last_error = DiscoveryError::Transport("no consul endpoints configured".to_string());
        for endpoint in &self.endpoints {
            let attempt = tokio::time::timeout(
                timeout,
                send(endpoint, method.clone(), path_and_query, body.clone()),
            )
            .await;
            match attempt {
                Ok(Ok(resp)) => return Ok(resp),
                Ok(Err(e)) => {
                    debug!(%endpoint, error = %e, "consul request failed");
                    last_error = e;
                }
                Err(_) => {
                    debug!(%endpoint, "consul request timed out");
                    last_error =
                        DiscoveryError::Transport(format!("{endpoint}: request timed out"));
                }
            }
        }
        Err(last_error)
    }

    async fn read_listing(&self, prefix: &str, query: &str, timeout: Duration) -> DiscoveryResult<KvListing> {
        let path = format!("/v1/kv/{}/?recurse=true{query}", encode_key(prefix));
        let resp = self.request(Method::GET, &path, None, timeout).await?;
        let index = resp
            .headers
            .get("x-consul-index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        match resp.status {
            StatusCode::NOT_FOUND => Ok(KvListing {
                values: Vec::new(),
                index,
            }),
            s if s.is_success() => {
                let pairs: Vec<KvPair> = serde_json::from_slice(&resp.body)
                    .map_err(|e| DiscoveryError::Transport(format!("decode consul kv: {e}")))?;
                let mut values = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    let Some(encoded) = pair.value else { continue };
                    let raw = STANDARD
                        .decode(encoded.as_bytes())
                        .map_err(|e| DiscoveryError::Transport(format!("decode consul value: {e}")))?;
                    values.push(String::from_utf8_lossy(&raw).into_owned());
                }
                Ok(KvListing { values, index })
            }
            s => Err(DiscoveryError::Transport(format!("consul returned {s}"))),
        }
    }

    /// Renew the current session or create a new one.
    async fn ensure_session(&self, ttl: Duration) -> DiscoveryResult<String> {
        let mut session = self.session.lock().await;

        if let Some(id) = session.as_ref() {
            let resp = self
                .request(Method::PUT, &format!("/v1/session/renew/{id}"), None, REQUEST_TIMEOUT)
                .await?;
            if resp.status.is_success() {
                return Ok(id.clone());
            }
            warn!(session = %id, status = %resp.status, "consul session lost, creating a new one");
        }

        let ttl = ttl.max(MIN_SESSION_TTL);
        let body = serde_json::json!({
            "Name": "swarmgrid-discovery",
            "TTL": format!("{}s", ttl.as_secs()),
            "Behavior": "delete",
        })
        .to_string();
        let resp = self
            .request(Method::PUT, "/v1/session/create", Some(body), REQUEST_TIMEOUT)
            .await?;
        if !resp.status.is_success() {
            return Err(DiscoveryError::Transport(format!(
                "consul session create returned {}",
                resp.status
            )));
        }
        let created: SessionCreated = serde_json::from_slice(&resp.body)
            .map_err(|e| DiscoveryError::Transport(format!("decode consul session: {e}")))?;
        *session = Some(created.id.clone());
        Ok(created.id)
    }
}

#[async_trait]
impl KvStore for ConsulKv {
    fn name(&self) -> &'static str {
        "consul"
    }

    async fn list(&self, prefix: &str) -> DiscoveryResult<KvListing> {
        self.read_listing(prefix, "", REQUEST_TIMEOUT).await
    }

    async fn wait(
        &self,
        prefix: &str,
        after_index: u64,
        timeout: Duration,
    ) -> DiscoveryResult<KvListing> {
        let wait_secs = timeout.as_secs().max(1);
        let query = format!("&index={after_index}&wait={wait_secs}s");
        self.read_listing(prefix, &query, timeout + REQUEST_SLACK)
            .await
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> DiscoveryResult<()> {
        let mut path = format!("/v1/kv/{}", encode_key(key));
        if let Some(ttl) = ttl {
            let session = self.ensure_session(ttl).await?;
            path.push_str(&format!("?acquire={session}"));
        }
        let resp = self
            .request(Method::PUT, &path, Some(value.to_string()), REQUEST_TIMEOUT)
            .await?;
        if !resp.status.is_success() {
            return Err(DiscoveryError::Transport(format!(
                "consul put {key} returned {}",
                resp.status
            )));
        }
        Ok(())
    }
}

/// Percent-encode the characters of a node address that are not path-safe.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            ' ' => out.push_str("%20"),
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            c => out.push(c),
        }
    }
    out
}

/// One HTTP/1.1 request over a fresh connection.
async fn send(
    endpoint: &str,
    method: Method,
    path_and_query: &str,
    body: Option<String>,
) -> DiscoveryResult<Response> {
    let transport = |e: &dyn std::fmt::Display| DiscoveryError::Transport(format!("{endpoint}: {e}"));

    let stream = tokio::net::TcpStream::connect(endpoint)
        .await
        .map_err(|e| transport(&e))?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| transport(&e))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method(method)
        .uri(path_and_query)
        .header("host", endpoint)
        .header("user-agent", "swarmgrid-discovery/0.1")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.unwrap_or_default())))
        .map_err(|e| transport(&e))?;

    let resp = sender.send_request(req).await.map_err(|e| transport(&e))?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| transport(&e))?
        .to_bytes();

    Ok(Response {
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_requires_path_and_address() {
        let heartbeat = Duration::from_secs(20);

        let uri = DiscoveryUri::parse("consul://127.0.0.1:8500").unwrap();
        assert!(matches!(
            ConsulKv::backend_from_uri(&uri, heartbeat),
            Err(DiscoveryError::Configuration(_))
        ));

        let uri = DiscoveryUri::parse("consul:///swarm").unwrap();
        assert!(matches!(
            ConsulKv::backend_from_uri(&uri, heartbeat),
            Err(DiscoveryError::Configuration(_))
        ));

        let uri = DiscoveryUri::parse("consul://127.0.0.1:8500/swarm").unwrap();
        let backend = ConsulKv::backend_from_uri(&uri, heartbeat).unwrap();
        assert_eq!(backend.prefix(), "swarm/nodes");
    }

    #[test]
    fn encodes_ipv6_brackets() {
        assert_eq!(encode_key("swarm/nodes/[::1]:2375"), "swarm/nodes/%5B::1%5D:2375");
    }

    #[test]
    fn decodes_kv_pairs() {
        let body = r#"[{"Key":"swarm/nodes/10.0.0.1:2375","Value":"MTAuMC4wLjE6MjM3NQ=="},{"Key":"swarm/nodes/","Value":null}]"#;
        let pairs: Vec<KvPair> = serde_json::from_str(body).unwrap();
        assert_eq!(pairs.len(), 2);
        let raw = STANDARD.decode(pairs[0].value.as_ref().unwrap()).unwrap();
        assert_eq!(raw, b"10.0.0.1:2375");
        assert!(pairs[1].value.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let kv = ConsulKv::new(vec!["127.0.0.1:9".to_string()]);
        assert!(matches!(kv.list("swarm/nodes").await, Err(DiscoveryError::Transport(_))));
    }
}
