//! Transports for overlay style and data documents.
//!
//! Every fetch takes a [`CancellationToken`]. Once the token fires the fetch
//! resolves to [`FetchError::Cancelled`] and the underlying request future is
//! dropped, which aborts it.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type FetchResult = Result<Bytes, FetchError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("reading {path} failed: {message}")]
    Io { path: String, message: String },
    #[error("request to {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    fn network(url: &str, err: impl std::fmt::Display) -> Self {
        FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// Retrieves overlay documents by URL.
///
/// Implementations must be `Send + Sync`; methods return boxed futures for
/// dyn-compatibility.
pub trait StyleFetcher: Send + Sync {
    fn fetch(&self, url: &str, cancel: CancellationToken) -> BoxFuture<'_, FetchResult>;
}

/// Race `fut` against the token and an optional timeout.
async fn guarded<F>(
    cancel: CancellationToken,
    url: &str,
    timeout: Option<Duration>,
    fut: F,
) -> FetchResult
where
    F: Future<Output = FetchResult>,
{
    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(_) => Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(url, "fetch cancelled");
            Err(FetchError::Cancelled)
        }
        res = bounded => res,
    }
}

/// HTTP transport. Relative URLs (`/landcover-style.json`) are joined onto the
/// configured base URL.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: None,
            timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match self.base_url.as_deref() {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            None => url.to_string(),
        }
    }
}

impl StyleFetcher for HttpFetcher {
    fn fetch(&self, url: &str, cancel: CancellationToken) -> BoxFuture<'_, FetchResult> {
        let url = self.resolve(url);
        Box::pin(async move {
            let request = async {
                let resp = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| FetchError::network(&url, e))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url: url.clone(),
                        status: status.as_u16(),
                    });
                }
                resp.bytes().await.map_err(|e| FetchError::network(&url, e))
            };
            guarded(cancel, &url, self.timeout, request).await
        })
    }
}

/// Serves documents from a local directory, mirroring a web app's `public/`
/// folder. A missing file is reported as HTTP 404.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(url.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(FetchError::Io {
                path: url.to_string(),
                message: "path escapes the document root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl StyleFetcher for FileFetcher {
    fn fetch(&self, url: &str, cancel: CancellationToken) -> BoxFuture<'_, FetchResult> {
        let url = url.to_string();
        let path = self.resolve(&url);
        Box::pin(async move {
            let path = path?;
            let read = async {
                match tokio::fs::read(&path).await {
                    Ok(data) => Ok(Bytes::from(data)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(FetchError::Status {
                            url: url.clone(),
                            status: 404,
                        })
                    }
                    Err(e) => Err(FetchError::Io {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    }),
                }
            };
            guarded(cancel, &url, None, read).await
        })
    }
}

/// Fixed in-memory documents keyed by URL. Unknown URLs answer 404.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    documents: BTreeMap<String, Bytes>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.insert(url, body);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.documents.insert(url.into(), body.into());
    }
}

impl StyleFetcher for MemoryFetcher {
    fn fetch(&self, url: &str, cancel: CancellationToken) -> BoxFuture<'_, FetchResult> {
        let found = self.documents.get(url).cloned();
        let url = url.to_string();
        Box::pin(async move {
            let lookup = async {
                found.ok_or_else(|| FetchError::Status {
                    url: url.clone(),
                    status: 404,
                })
            };
            guarded(cancel, &url, None, lookup).await
        })
    }
}
