//! Minimal Kubernetes REST client
//!
//! Covers exactly what the agent needs: read one pod, list and watch the
//! pods of one node, and read/write the leader-election Lease.
//!
//! Watch responses are newline-delimited JSON, one [`WatchEvent`] per line.
//! HTTP chunks do not line up with event boundaries, so the watch stream
//! buffers bytes until it sees a full line.

use std::fs;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::stream::{Stream, StreamExt};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use super::types::{Lease, Pod, PodList, WatchEvent};
use super::KubeError;
use crate::reconcile::WorkloadKey;

/// Where a pod's service-account credentials are mounted
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Server-side timeout of one watch request; the controller re-watches after it
const WATCH_TIMEOUT_SECS: &str = "300";

/// How long a service-account token is used before the file is read again
///
/// Projected tokens are rotated by the kubelet well before they expire.
const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Stream of decoded watch events
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent, KubeError>> + Send>>;

/// Client for the Kubernetes API server
#[derive(Clone)]
pub struct KubeClient {
    base_url: String,
    client: reqwest::Client,
    token: Option<Arc<BearerToken>>,
}

/// Bearer token backed by a file that may be rewritten underneath us
#[derive(Debug)]
pub struct BearerToken {
    path: PathBuf,
    refresh: Duration,
    cached: Mutex<(String, Instant)>,
}

impl BearerToken {
    /// Read the token at `path`, re-reading it once `refresh` has passed
    pub fn load(path: impl Into<PathBuf>, refresh: Duration) -> Result<Self, KubeError> {
        let path = path.into();
        let token = read_token(&path)?;
        Ok(Self {
            path,
            refresh,
            cached: Mutex::new((token, Instant::now())),
        })
    }

    /// Current token value
    ///
    /// A failed re-read keeps the previous token and retries on the next call.
    pub fn current(&self) -> String {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if cached.1.elapsed() >= self.refresh {
            match read_token(&self.path) {
                Ok(token) => *cached = (token, Instant::now()),
                Err(e) => warn!(error = %e, "Failed to re-read service account token"),
            }
        }
        cached.0.clone()
    }
}

fn read_token(path: &Path) -> Result<String, KubeError> {
    fs::read_to_string(path)
        .map(|token| token.trim().to_string())
        .map_err(|source| KubeError::Io {
            path: path.to_path_buf(),
            source,
        })
}

impl KubeClient {
    /// Create an unauthenticated client
    ///
    /// # Arguments
    /// * `base_url` - API server URL (e.g., "http://127.0.0.1:8001" from `kubectl proxy`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            token: None,
        }
    }

    /// Build a client from the pod's service account
    ///
    /// Reads `KUBERNETES_SERVICE_HOST` / `KUBERNETES_SERVICE_PORT`, the bearer
    /// token and the cluster CA from the standard mount.
    pub fn in_cluster() -> Result<Self, KubeError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| KubeError::Config("KUBERNETES_SERVICE_HOST is not set".to_string()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .map_err(|_| KubeError::Config("KUBERNETES_SERVICE_PORT is not set".to_string()))?;

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = BearerToken::load(dir.join("token"), TOKEN_REFRESH_INTERVAL)?;
        let ca_path = dir.join("ca.crt");
        let ca = fs::read(&ca_path).map_err(|source| KubeError::Io {
            path: ca_path,
            source,
        })?;

        let client = reqwest::Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(&ca)?)
            .build()?;

        Ok(Self {
            base_url: format!("https://{}", join_host_port(&host, &port)),
            client,
            token: Some(Arc::new(token)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.current());
        }
        request
    }

    /// Fetch one pod; `None` when it does not exist
    pub async fn get_pod(&self, key: &WorkloadKey) -> Result<Option<Pod>, KubeError> {
        let path = format!("/api/v1/namespaces/{}/pods/{}", key.namespace, key.name);
        let response = self.request(Method::GET, &path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let pod = check(response).await?.json::<Pod>().await?;
        Ok(Some(pod))
    }

    /// List pods across all namespaces matching `field_selector`
    pub async fn list_pods(&self, field_selector: &str) -> Result<PodList, KubeError> {
        let response = self
            .request(Method::GET, "/api/v1/pods")
            .query(&[("fieldSelector", field_selector)])
            .send()
            .await?;
        Ok(check(response).await?.json::<PodList>().await?)
    }

    /// Watch pods matching `field_selector`, starting after `resource_version`
    pub async fn watch_pods(
        &self,
        field_selector: &str,
        resource_version: &str,
    ) -> Result<WatchStream, KubeError> {
        debug!(field_selector, resource_version, "Starting pod watch");
        let response = self
            .request(Method::GET, "/api/v1/pods")
            .query(&[
                ("watch", "true"),
                ("fieldSelector", field_selector),
                ("resourceVersion", resource_version),
                ("allowWatchBookmarks", "true"),
                ("timeoutSeconds", WATCH_TIMEOUT_SECS),
            ])
            .send()
            .await?;
        let mut bytes_stream = check(response).await?.bytes_stream();

        let events = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes_stream.next().await {
                match chunk {
                    Ok(bytes) => buffer.extend_from_slice(&bytes),
                    Err(e) => {
                        yield Err(KubeError::from(e));
                        return;
                    }
                }
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_watch_line(&line) {
                        Ok(Some(event)) => {
                            yield Ok(event);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            match parse_watch_line(&buffer) {
                Ok(Some(event)) => {
                    yield Ok(event);
                }
                Ok(None) => {}
                Err(e) => {
                    yield Err(e);
                }
            }
        };

        Ok(Box::pin(events))
    }

    pub async fn get_lease(&self, namespace: &str, name: &str) -> Result<Option<Lease>, KubeError> {
        let response = self
            .request(Method::GET, &lease_path(namespace, Some(name)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json::<Lease>().await?))
    }

    /// Create a Lease; `None` when someone else created it first
    pub async fn create_lease(&self, lease: &Lease) -> Result<Option<Lease>, KubeError> {
        let response = self
            .request(Method::POST, &lease_path(&lease.metadata.namespace, None))
            .json(lease)
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json::<Lease>().await?))
    }

    /// Replace a Lease; `None` when its resourceVersion is stale
    pub async fn replace_lease(&self, lease: &Lease) -> Result<Option<Lease>, KubeError> {
        let path = lease_path(&lease.metadata.namespace, Some(&lease.metadata.name));
        let response = self.request(Method::PUT, &path).json(lease).send().await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json::<Lease>().await?))
    }
}

fn lease_path(namespace: &str, name: Option<&str>) -> String {
    let base = format!(
        "/apis/coordination.k8s.io/v1/namespaces/{}/leases",
        namespace
    );
    match name {
        Some(name) => format!("{}/{}", base, name),
        None => base,
    }
}

/// `host:port`, bracketing IPv6 literals
fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Turn a non-2xx response into a [`KubeError`]
async fn check(response: Response) -> Result<Response, KubeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::GONE {
        return Err(KubeError::Gone);
    }
    let message = response.text().await.unwrap_or_default();
    Err(KubeError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Decode one watch line; blank lines (keep-alives, trailing newline) yield `None`
fn parse_watch_line(line: &[u8]) -> Result<Option<WatchEvent>, KubeError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(line)?))
}
