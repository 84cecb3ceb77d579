//! HTTP implementations of the remote and the network source.
//!
//! `HttpRemote` maps entity kinds onto REST collections:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create    | `POST {base}/{collection}` |
//! | update    | `PUT {base}/{collection}/{id}` |
//! | delete    | `DELETE {base}/{collection}/{id}` |
//!
//! `HttpProbe` polls a health URL and reports reachability.

use super::listener::{Observer, Subscription};
use super::network::{ManualNetwork, NetworkSource};
use super::remote::{RemoteDataService, RemoteError};
use super::types::Connectivity;
use crate::model::{EntityKind, EntityRecord};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// REST remote for pantry records.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpRemote {
    /// Create a remote rooted at `base_url`, with an optional bearer token.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
        }
    }

    fn url(&self, kind: EntityKind, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/{id}", self.base_url, kind.collection()),
            None => format!("{}/{}", self.base_url, kind.collection()),
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url).timeout(self.timeout);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        kind: EntityKind,
    ) -> Result<reqwest::Response, RemoteError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        trace!(%status, url = %response.url(), "Remote responded");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body, kind))
    }
}

fn body(record: &EntityRecord) -> Result<Value, RemoteError> {
    record
        .to_value()
        .map_err(|e| RemoteError::Validation(format!("cannot encode record: {e}")))
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transient(err.to_string())
    }
}

/// Map a non-2xx response onto a [`RemoteError`].
fn classify_failure(status: StatusCode, body: &str, kind: EntityKind) -> RemoteError {
    match status.as_u16() {
        409 => match serde_json::from_str::<Value>(body)
            .map_err(|e| e.to_string())
            .and_then(|v| EntityRecord::from_value(kind, v).map_err(|e| e.to_string()))
        {
            Ok(remote) => RemoteError::Conflict { remote },
            Err(e) => RemoteError::Validation(format!("unreadable conflict response: {e}")),
        },
        408 | 429 | 500..=599 => RemoteError::Transient(format!("HTTP {status}")),
        _ if body.is_empty() => RemoteError::Validation(format!("HTTP {status}")),
        _ => RemoteError::Validation(format!("HTTP {status}: {body}")),
    }
}

impl RemoteDataService for HttpRemote {
    async fn create_entity(&self, record: &EntityRecord) -> Result<String, RemoteError> {
        let kind = record.kind();
        let builder = self
            .request(reqwest::Method::POST, &self.url(kind, None))
            .json(&body(record)?);
        let response = self.send(builder, kind).await?;

        let assigned = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string));
        Ok(assigned.unwrap_or_else(|| record.id().to_string()))
    }

    async fn update_entity(&self, id: &str, record: &EntityRecord) -> Result<(), RemoteError> {
        let kind = record.kind();
        let builder = self
            .request(reqwest::Method::PUT, &self.url(kind, Some(id)))
            .json(&body(record)?);
        self.send(builder, kind).await.map(drop)
    }

    async fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError> {
        let builder = self.request(reqwest::Method::DELETE, &self.url(kind, Some(id)));
        self.send(builder, kind).await.map(drop)
    }
}

/// Network source backed by periodic health checks.
pub struct HttpProbe {
    status: Arc<ManualNetwork>,
    task: JoinHandle<()>,
}

impl HttpProbe {
    /// Probe `url` once, then keep probing every `every` in the background.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn connect(url: impl Into<String>, every: Duration) -> Self {
        let url = url.into();
        let client = reqwest::Client::new();
        let initial = probe(&client, &url).await;
        debug!(%url, status = %initial, "Initial reachability");

        let status = Arc::new(ManualNetwork::new(initial));
        let reporter = Arc::clone(&status);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(100)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                reporter.set(probe(&client, &url).await);
            }
        });

        Self { status, task }
    }
}

impl NetworkSource for HttpProbe {
    fn current(&self) -> Connectivity {
        self.status.current()
    }

    fn subscribe(&self, observer: Arc<dyn Observer<Connectivity>>) -> Subscription {
        self.status.subscribe(observer)
    }
}

impl Drop for HttpProbe {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One health check; any 2xx means online.
pub async fn probe(client: &reqwest::Client, url: &str) -> Connectivity {
    match client.get(url).timeout(Duration::from_secs(5)).send().await {
        Ok(response) if response.status().is_success() => Connectivity::Online,
        Ok(response) => {
            debug!(status = %response.status(), "Health check failed");
            Connectivity::Offline
        }
        Err(e) => {
            debug!(error = %e, "Health check unreachable");
            Connectivity::Offline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Product;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn milk() -> EntityRecord {
        EntityRecord::Product(Product::new(
            "p1",
            "Milk",
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        ))
    }

    /// Serve one canned response and hand back the raw request.
    async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap()))
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (base, handle)
    }

    #[test]
    fn test_classify_failure() {
        let kind = EntityKind::Product;
        assert!(matches!(
            classify_failure(StatusCode::SERVICE_UNAVAILABLE, "", kind),
            RemoteError::Transient(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, "", kind),
            RemoteError::Transient(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::UNPROCESSABLE_ENTITY, "bad", kind),
            RemoteError::Validation(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::CONFLICT, "not json", kind),
            RemoteError::Validation(_)
        ));

        let remote = json!({"id": "p1", "name": "Oat milk", "createdAt": "2024-01-01T00:00:00Z"});
        match classify_failure(StatusCode::CONFLICT, &remote.to_string(), kind) {
            RemoteError::Conflict { remote } => assert_eq!(remote.id(), "p1"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_posts_to_collection() {
        let (base, server) = serve_once("201 Created", r#"{"id":"srv_1"}"#).await;
        let remote = HttpRemote::new(base, Some("secret".into()), Duration::from_secs(5));

        let assigned = remote.create_entity(&milk()).await.unwrap();
        assert_eq!(assigned, "srv_1");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /products "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains("\"name\":\"Milk\""));
    }

    #[tokio::test]
    async fn test_update_maps_server_error_to_transient() {
        let (base, server) = serve_once("503 Service Unavailable", "").await;
        let remote = HttpRemote::new(format!("{base}/"), None, Duration::from_secs(5));

        let err = remote.update_entity("p1", &milk()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(server.await.unwrap().starts_with("PUT /products/p1 "));
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let remote = HttpRemote::new(base.clone(), None, Duration::from_secs(5));
        let err = remote
            .delete_entity(EntityKind::Recipe, "r1")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Transient(_)));

        let status = probe(&reqwest::Client::new(), &format!("{base}/health")).await;
        assert_eq!(status, Connectivity::Offline);
    }
}
