use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;

use crate::errors::FetchError;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of remote artifacts (genesis, peer documents, probe responses).
pub trait ArtifactFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// POST a JSON body and return the response bytes. Used by the EVM probe.
    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<Vec<u8>, FetchError> {
        let _ = body;
        Err(FetchError::Transport {
            url: url.to_string(),
            message: "fetcher does not support POST".to_string(),
        })
    }
}

impl<T: ArtifactFetcher + ?Sized> ArtifactFetcher for &T {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url)
    }

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<Vec<u8>, FetchError> {
        (**self).post_json(url, body)
    }
}

/// Blocking HTTP fetcher with a wall-clock timeout. `file://` URLs are read from disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("monoctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| FetchError::Transport {
                url: String::new(),
                message: format!("unable to build HTTP client: {err}"),
            })?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, url: &str, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    fn read_body(&self, url: &str, response: reqwest::blocking::Response) -> Result<Vec<u8>, FetchError> {
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                code: status.as_u16(),
            });
        }
        let bytes = response.bytes().map_err(|err| self.map_error(url, err))?;
        debug!(target: "monoctl::fetch", url, bytes = bytes.len(), "fetched artifact");
        Ok(bytes.to_vec())
    }
}

impl ArtifactFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if let Some(path) = url.strip_prefix("file://") {
            return fs::read(path).map_err(|err| FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            });
        }
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| self.map_error(url, err))?;
        self.read_body(url, response)
    }

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|err| self.map_error(url, err))?;
        self.read_body(url, response)
    }
}

/// Offline fetcher answering from a fixed table. Unknown URLs fail with HTTP 404.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: HashMap<String, Result<Vec<u8>, FetchError>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.into(), Ok(body.into()));
        self
    }

    pub fn with_error(mut self, url: impl Into<String>, error: FetchError) -> Self {
        self.responses.insert(url.into(), Err(error));
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl ArtifactFetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        self.responses
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::HttpStatus {
                    url: url.to_string(),
                    code: 404,
                })
            })
    }

    fn post_json(&self, url: &str, _body: &serde_json::Value) -> Result<Vec<u8>, FetchError> {
        self.fetch(url)
    }
}
