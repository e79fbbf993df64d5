//! TUF verification engine
//!
//! The client never verifies signatures itself. It hands the trusted root,
//! the metadata it already trusts and a [`RemoteFetcher`] to a
//! [`VerificationEngine`], and gets back a fully verified bundle or an
//! error. [`ToughEngine`] runs the TUF client workflow with the `tough`
//! crate.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;
use sigstore_cache::Entries;
use tough::schema::{Signed, Targets};
use tough::{
    ExpirationEnforcement, IntoVec, RepositoryLoader, TargetName, Transport, TransportError,
    TransportErrorKind,
};
use tracing::debug;
use url::Url;

use crate::config::{ROOT_ENTRY, TIMESTAMP_ENTRY};
use crate::custom::{TargetIndex, TARGETS_ROLE};
use crate::fetcher::RemoteFetcher;
use crate::{Error, Result};

/// Future returned by [`VerificationEngine::update`]
pub type UpdateFuture<'a> = Pin<Box<dyn Future<Output = Result<VerifiedBundle>> + Send + 'a>>;

/// Input of a TUF update
pub struct UpdateRequest<'a> {
    /// Root metadata to start the root chain from
    pub root: &'a [u8],
    /// Previously trusted metadata files (rollback protection), may be empty
    pub trusted: &'a Entries,
    /// Mirror the fetcher talks to
    pub mirror: &'a Url,
    /// Transport for every remote file
    pub fetcher: Arc<dyn RemoteFetcher>,
}

/// Output of a successful TUF update
#[derive(Debug, Clone, Default)]
pub struct VerifiedBundle {
    /// Verified metadata: `root.json`, `timestamp.json`, `snapshot.json`,
    /// `targets.json` and one file per delegated role
    pub metadata: Entries,
    /// Verified content of every target listed by the metadata
    pub targets: Entries,
}

/// Runs the TUF client workflow
///
/// Implementations fail with [`Error::Network`] when the mirror could not
/// be reached and with [`Error::Verification`] for anything the TUF rules
/// reject (bad signatures, expired or rolled-back metadata, hash
/// mismatches, broken root chains).
pub trait VerificationEngine: Send + Sync + Debug {
    /// Walk the root chain from `request.root` and fetch and verify the
    /// current timestamp, snapshot, targets and every target file
    fn update<'a>(&'a self, request: UpdateRequest<'a>) -> UpdateFuture<'a>;
}

impl<T: VerificationEngine + ?Sized> VerificationEngine for Arc<T> {
    fn update<'a>(&'a self, request: UpdateRequest<'a>) -> UpdateFuture<'a> {
        (**self).update(request)
    }
}

/// [`VerificationEngine`] backed by `tough`
#[derive(Debug, Clone, Copy, Default)]
pub struct ToughEngine;

impl ToughEngine {
    /// Create an engine
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, request: UpdateRequest<'_>) -> Result<VerifiedBundle> {
        let metadata_base = request.mirror.clone();
        let targets_base = metadata_base
            .join("targets/")
            .map_err(|e| Error::Config(format!("invalid mirror URL {}: {}", metadata_base, e)))?;

        let transport = FetcherTransport::new(
            request.fetcher.clone(),
            metadata_base.clone(),
            targets_base.clone(),
        );

        // tough reads previously trusted metadata from its datastore
        let datastore = tempfile::tempdir()
            .map_err(|e| Error::Config(format!("failed to create datastore: {}", e)))?;
        for (name, bytes) in request.trusted {
            if name == TIMESTAMP_ENTRY || name == "snapshot.json" {
                tokio::fs::write(datastore.path().join(name), bytes)
                    .await
                    .map_err(|e| Error::Config(format!("failed to seed datastore: {}", e)))?;
            }
        }

        let root = request.root.to_vec();
        let repo = RepositoryLoader::new(&root, metadata_base, targets_base)
            .transport(transport.clone())
            .datastore(datastore.path())
            .expiration_enforcement(ExpirationEnforcement::Safe)
            .load()
            .await
            .map_err(|e| transport.classify(format!("failed to load repository: {}", e)))?;

        let mut metadata = Entries::new();
        metadata.insert(ROOT_ENTRY.to_string(), encode(repo.root())?);
        metadata.insert(TIMESTAMP_ENTRY.to_string(), encode(repo.timestamp())?);
        metadata.insert("snapshot.json".to_string(), encode(repo.snapshot())?);
        metadata.insert(TARGETS_ROLE.to_string(), encode(repo.targets())?);
        collect_delegated(repo.targets(), &mut metadata)?;

        let index = TargetIndex::from_metadata(&metadata)?;
        let mut targets = Entries::new();
        for name in index.names() {
            let target_name = TargetName::new(name)
                .map_err(|e| Error::Verification(format!("invalid target name {}: {}", name, e)))?;
            let stream = repo
                .read_target(&target_name)
                .await
                .map_err(|e| transport.classify(format!("failed to read {}: {}", name, e)))?
                .ok_or_else(|| Error::Verification(format!("target {} is not listed", name)))?;
            let content = stream
                .into_vec()
                .await
                .map_err(|e| transport.classify(format!("failed to read {}: {}", name, e)))?;
            debug!("verified target {} ({} bytes)", name, content.len());
            targets.insert(name.to_string(), content);
        }

        Ok(VerifiedBundle { metadata, targets })
    }
}

impl VerificationEngine for ToughEngine {
    fn update<'a>(&'a self, request: UpdateRequest<'a>) -> UpdateFuture<'a> {
        Box::pin(self.run(request))
    }
}

fn encode<T: Serialize>(role: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(role)
        .map_err(|e| Error::Verification(format!("failed to encode metadata: {}", e)))
}

fn collect_delegated(targets: &Signed<Targets>, metadata: &mut Entries) -> Result<()> {
    let Some(delegations) = &targets.signed.delegations else {
        return Ok(());
    };
    for role in &delegations.roles {
        if let Some(delegated) = &role.targets {
            let file = format!("{}.json", role.name);
            if metadata.contains_key(&file) {
                continue;
            }
            metadata.insert(file, encode(delegated)?);
            collect_delegated(delegated, metadata)?;
        }
    }
    Ok(())
}

type TransportStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, TransportError>> + Send>>;

/// Adapts a [`RemoteFetcher`] to tough's [`Transport`]
///
/// URLs below the targets base become [`RemoteFetcher::fetch_target`] calls,
/// all others [`RemoteFetcher::fetch_metadata`]. The first network failure
/// is remembered so that engine errors can be attributed to the network
/// rather than to verification.
#[derive(Debug, Clone)]
pub struct FetcherTransport {
    fetcher: Arc<dyn RemoteFetcher>,
    metadata_base: Url,
    targets_base: Url,
    network_failure: Arc<Mutex<Option<String>>>,
}

impl FetcherTransport {
    /// Create a transport serving `metadata_base` and `targets_base`
    pub fn new(fetcher: Arc<dyn RemoteFetcher>, metadata_base: Url, targets_base: Url) -> Self {
        Self {
            fetcher,
            metadata_base,
            targets_base,
            network_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// The first network failure seen, if any
    pub fn network_failure(&self) -> Option<String> {
        self.network_failure
            .lock()
            .ok()
            .and_then(|failure| failure.clone())
    }

    fn record_failure(&self, failure: String) {
        if let Ok(mut slot) = self.network_failure.lock() {
            slot.get_or_insert(failure);
        }
    }

    fn classify(&self, message: String) -> Error {
        match self.network_failure() {
            Some(failure) => Error::Network(format!("{} ({})", message, failure)),
            None => Error::Verification(message),
        }
    }

    async fn fetch_bytes(&self, url: &Url) -> std::result::Result<Vec<u8>, TransportError> {
        let result = if let Some(name) = url.as_str().strip_prefix(self.targets_base.as_str()) {
            self.fetcher.fetch_target(name).await
        } else if let Some(name) = url.as_str().strip_prefix(self.metadata_base.as_str()) {
            self.fetcher.fetch_metadata(name).await
        } else {
            return Err(TransportError::new_with_cause(
                TransportErrorKind::Other,
                url.as_str(),
                Error::Config(format!("{} is outside of the mirror", url)),
            ));
        };

        result.map_err(|err| {
            let kind = match &err {
                Error::NotFound(_) => TransportErrorKind::FileNotFound,
                Error::Network(reason) => {
                    self.record_failure(reason.clone());
                    TransportErrorKind::Other
                }
                _ => TransportErrorKind::Other,
            };
            TransportError::new_with_cause(kind, url.as_str(), err)
        })
    }
}

#[async_trait]
impl Transport for FetcherTransport {
    async fn fetch(&self, url: Url) -> std::result::Result<TransportStream, TransportError> {
        let bytes = self.fetch_bytes(&url).await?;
        let body = futures_util::stream::once(futures_util::future::ready(Ok::<_, TransportError>(
            Bytes::from(bytes),
        )));
        Ok(Box::pin(body))
    }
}
