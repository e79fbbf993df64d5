//! Remote retrieval of metadata and target files
//!
//! A [`RemoteFetcher`] moves opaque bytes from the mirror and nothing else:
//! it performs no verification. [`HttpFetcher`] is the production
//! implementation; transient failures are retried according to a
//! [`FetchPolicy`].

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::{Error, Result};

/// Future returned by [`RemoteFetcher`] operations
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Retrieves metadata and target blobs from a mirror
///
/// A missing file is reported as [`Error::NotFound`]; every other failure
/// that survives the retry policy as [`Error::Network`]. Dropping a returned
/// future cancels the request.
pub trait RemoteFetcher: Send + Sync + Debug {
    /// Fetch a metadata file (`timestamp.json`, `2.root.json`, ...)
    fn fetch_metadata(&self, name: &str) -> FetchFuture<'_>;

    /// Fetch a target file, addressed relative to `targets/`
    fn fetch_target(&self, name: &str) -> FetchFuture<'_>;
}

impl<T: RemoteFetcher + ?Sized> RemoteFetcher for Arc<T> {
    fn fetch_metadata(&self, name: &str) -> FetchFuture<'_> {
        (**self).fetch_metadata(name)
    }

    fn fetch_target(&self, name: &str) -> FetchFuture<'_> {
        (**self).fetch_target(name)
    }
}

/// Timeouts and retry behaviour for remote requests
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Upper bound for a single request, body included
    pub timeout: Duration,
    /// Upper bound for establishing a connection
    pub connect_timeout: Duration,
    /// Total number of attempts per file (at least 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Cap for the exponentially growing delay
    pub max_backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl FetchPolicy {
    /// Delay to wait after the failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Outcome of a single failed attempt
#[derive(Debug)]
enum AttemptError {
    NotFound,
    Transient(String),
    Fatal(String),
}

/// HTTP(S) fetcher for a TUF mirror
///
/// Metadata lives directly below the mirror URL, targets below
/// `<mirror>/targets/`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    metadata_base: Url,
    targets_base: Url,
    client: reqwest::Client,
    policy: FetchPolicy,
}

impl HttpFetcher {
    /// Create a fetcher for `mirror`
    ///
    /// `mirror` must end with `/` (see [`crate::config::parse_mirror_url`]).
    pub fn new(mirror: &Url, policy: FetchPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .connect_timeout(policy.connect_timeout)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;
        let targets_base = mirror
            .join("targets/")
            .map_err(|e| Error::Config(format!("invalid mirror URL {}: {}", mirror, e)))?;

        Ok(Self {
            metadata_base: mirror.clone(),
            targets_base,
            client,
            policy,
        })
    }

    /// The URL metadata is fetched from
    pub fn metadata_base(&self) -> &Url {
        &self.metadata_base
    }

    /// The URL targets are fetched from
    pub fn targets_base(&self) -> &Url {
        &self.targets_base
    }

    async fn fetch(&self, base: &Url, name: &str) -> Result<Vec<u8>> {
        let url = base
            .join(name)
            .map_err(|e| Error::Config(format!("invalid file name {}: {}", name, e)))?;
        if !url.as_str().starts_with(base.as_str()) {
            return Err(Error::Config(format!(
                "file name {} resolves outside of the mirror",
                name
            )));
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("fetching {} (attempt {}/{})", url, attempt, max_attempts);

            match self.try_fetch(&url).await {
                Ok(bytes) => return Ok(bytes),
                Err(AttemptError::NotFound) => return Err(Error::NotFound(name.to_string())),
                Err(AttemptError::Fatal(reason)) => {
                    return Err(Error::Network(format!("{}: {}", url, reason)))
                }
                Err(AttemptError::Transient(reason)) if attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "fetching {} failed (attempt {}/{}): {}, retrying in {:?}",
                        url, attempt, max_attempts, reason, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Transient(reason)) => {
                    return Err(Error::Network(format!(
                        "{} failed after {} attempts: {}",
                        url, attempt, reason
                    )))
                }
            }
        }
    }

    async fn try_fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, AttemptError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        // Object stores answer 403 for missing keys
        if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            return Err(AttemptError::NotFound);
        }
        if !status.is_success() {
            let reason = format!("unexpected status {}", status);
            return Err(if is_transient_status(status) {
                AttemptError::Transient(reason)
            } else {
                AttemptError::Fatal(reason)
            });
        }

        let bytes = response.bytes().await.map_err(classify_error)?;
        Ok(bytes.to_vec())
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch_metadata(&self, name: &str) -> FetchFuture<'_> {
        let name = name.to_string();
        Box::pin(async move { self.fetch(&self.metadata_base, &name).await })
    }

    fn fetch_target(&self, name: &str) -> FetchFuture<'_> {
        let name = name.to_string();
        Box::pin(async move { self.fetch(&self.targets_base, &name).await })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn classify_error(err: reqwest::Error) -> AttemptError {
    if err.is_builder() {
        AttemptError::Fatal(err.to_string())
    } else {
        AttemptError::Transient(err.to_string())
    }
}
