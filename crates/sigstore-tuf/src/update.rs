//! Refresh protocol
//!
//! Decides whether the bundle held by the store can be served as-is or
//! must be refreshed through the [`VerificationEngine`], and commits
//! refreshed bundles back to the store in one generation.

use std::sync::Arc;

use sigstore_cache::{Entries, MetadataStore};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{RemoteRecord, TrustRootConfig, REMOTE_ENTRY, ROOT_ENTRY, TIMESTAMP_ENTRY};
use crate::custom::{StatusKind, TargetEntry, TargetIndex, TargetInfo, UsageKind};
use crate::engine::{UpdateRequest, VerificationEngine};
use crate::expiration::ExpirationChecker;
use crate::fetcher::RemoteFetcher;
use crate::{Error, Result};

/// Store prefix of target files
pub(crate) const TARGET_PREFIX: &str = "targets/";

/// A verified metadata bundle and the target contents it vouches for
///
/// Every target listed by the metadata is present and matches its declared
/// length and hashes.
#[derive(Debug, Clone)]
pub struct TrustBundle {
    metadata: Entries,
    targets: Entries,
    index: TargetIndex,
}

impl TrustBundle {
    /// Check `targets` against the targets metadata in `metadata`
    ///
    /// Fails with [`Error::Verification`] if a required role is missing, the
    /// metadata does not parse, or a target is absent or does not match.
    /// Contents not listed by the metadata are dropped.
    pub fn new(metadata: Entries, mut targets: Entries) -> Result<Self> {
        for role in [ROOT_ENTRY, TIMESTAMP_ENTRY] {
            if !metadata.contains_key(role) {
                return Err(Error::Verification(format!("bundle has no {}", role)));
            }
        }

        let index = TargetIndex::from_metadata(&metadata)?;
        let mut verified = Entries::new();
        for info in index.iter() {
            let content = targets.remove(&info.name).ok_or_else(|| {
                Error::Verification(format!("target {} is missing from the bundle", info.name))
            })?;
            if !info.matches(&content) {
                return Err(Error::Verification(format!(
                    "target {} does not match its metadata",
                    info.name
                )));
            }
            verified.insert(info.name.clone(), content);
        }
        for name in targets.keys() {
            debug!("dropping unlisted target {}", name);
        }

        Ok(Self {
            metadata,
            targets: verified,
            index,
        })
    }

    /// Metadata files by name
    pub fn metadata(&self) -> &Entries {
        &self.metadata
    }

    /// The trusted `timestamp.json`
    pub fn timestamp(&self) -> &[u8] {
        self.metadata
            .get(TIMESTAMP_ENTRY)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Index of all targets
    pub fn index(&self) -> &TargetIndex {
        &self.index
    }

    /// Verified content of `name`
    pub fn get_target(&self, name: &str) -> Result<Vec<u8>> {
        self.targets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Targets tagged with `usage`, or the `fallback` names when none is
    ///
    /// The fallback is only consulted when no target declares `usage`. Each
    /// fallback name must exist; the first one that does not fails the
    /// call with [`Error::NotFound`].
    pub fn get_targets_by_meta(
        &self,
        usage: UsageKind,
        fallback: &[&str],
    ) -> Result<Vec<TargetEntry>> {
        let tagged = self
            .index
            .by_usage(usage)
            .map(|info| self.entry(info, info.status()))
            .collect::<Result<Vec<_>>>()?;
        if !tagged.is_empty() {
            return Ok(tagged);
        }

        fallback
            .iter()
            .map(|name| {
                let info = self
                    .index
                    .get(name)
                    .ok_or_else(|| Error::NotFound(name.to_string()))?;
                self.entry(info, StatusKind::Active)
            })
            .collect()
    }

    fn entry(&self, info: &TargetInfo, status: StatusKind) -> Result<TargetEntry> {
        Ok(TargetEntry {
            name: info.name.clone(),
            content: self.get_target(&info.name)?,
            usage: info.usage(),
            status,
        })
    }

    /// Store layout of the bundle: metadata by name, targets below
    /// `targets/` and the mirror record
    pub(crate) fn store_entries(&self, mirror: &Url) -> Result<Entries> {
        let mut entries = self.metadata.clone();
        for (name, content) in &self.targets {
            entries.insert(format!("{}{}", TARGET_PREFIX, name), content.clone());
        }
        let record = RemoteRecord {
            mirror: mirror.to_string(),
        };
        let record = serde_json::to_vec(&record)
            .map_err(|e| Error::Config(format!("failed to encode {}: {}", REMOTE_ENTRY, e)))?;
        entries.insert(REMOTE_ENTRY.to_string(), record);
        Ok(entries)
    }
}

/// Store content that has not been checked yet
#[derive(Debug, Clone, Default)]
pub struct CachedBundle {
    /// Metadata files by name
    pub metadata: Entries,
    /// Target files by name
    pub targets: Entries,
}

impl CachedBundle {
    /// Split raw store entries into metadata and targets
    pub fn from_entries(entries: Entries) -> Self {
        let mut bundle = CachedBundle::default();
        for (name, bytes) in entries {
            if name == REMOTE_ENTRY {
                continue;
            }
            match name.strip_prefix(TARGET_PREFIX) {
                Some(target) => {
                    bundle.targets.insert(target.to_string(), bytes);
                }
                None => {
                    bundle.metadata.insert(name, bytes);
                }
            }
        }
        bundle
    }

    /// The cached `timestamp.json`, empty if absent
    pub fn timestamp(&self) -> &[u8] {
        self.metadata
            .get(TIMESTAMP_ENTRY)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// What the store holds before a refresh decision
#[derive(Debug)]
pub enum LocalState {
    /// Nothing bootstrapped yet
    NoLocalBundle,
    /// A bundle with at least `root.json` and `timestamp.json`
    LocalBundlePresent(CachedBundle),
}

impl LocalState {
    /// Read the store
    pub async fn load(store: &dyn MetadataStore) -> Result<Self> {
        let names = store.list().await?;
        if !names.contains(ROOT_ENTRY) || !names.contains(TIMESTAMP_ENTRY) {
            return Ok(LocalState::NoLocalBundle);
        }

        let mut entries = Entries::new();
        for name in names {
            if let Some(bytes) = store.get(&name).await? {
                entries.insert(name, bytes);
            }
        }
        Ok(LocalState::LocalBundlePresent(CachedBundle::from_entries(
            entries,
        )))
    }
}

/// Runs the refresh protocol for one client construction
pub(crate) struct Updater<'a> {
    pub store: &'a dyn MetadataStore,
    pub fetcher: Arc<dyn RemoteFetcher>,
    pub engine: &'a dyn VerificationEngine,
    pub checker: &'a dyn ExpirationChecker,
    pub config: &'a TrustRootConfig,
}

impl Updater<'_> {
    /// Serve the local bundle if it is fresh and intact, refresh otherwise
    pub async fn open(&self) -> Result<TrustBundle> {
        let cached = match LocalState::load(self.store).await? {
            LocalState::NoLocalBundle => {
                debug!("no local trust bundle, bootstrapping");
                return self.bootstrap().await;
            }
            LocalState::LocalBundlePresent(cached) => cached,
        };

        if self.checker.is_expired(cached.timestamp()) {
            debug!("cached timestamp is expired, refreshing");
            return self.update(&cached.metadata).await;
        }

        match TrustBundle::new(cached.metadata.clone(), cached.targets) {
            Ok(bundle) => {
                debug!("serving cached trust bundle");
                Ok(bundle)
            }
            Err(e) => {
                warn!("cached trust bundle is inconsistent, refreshing: {}", e);
                self.update(&cached.metadata).await
            }
        }
    }

    /// Bootstrap from the configured root, ignoring the store's content
    pub async fn bootstrap(&self) -> Result<TrustBundle> {
        self.update(&Entries::new()).await
    }

    async fn update(&self, trusted: &Entries) -> Result<TrustBundle> {
        let root = self
            .config
            .root
            .as_deref()
            .ok_or_else(|| Error::Config("no trusted root available".into()))?;
        let mirror = &self.config.remote_url;

        let verified = self
            .engine
            .update(UpdateRequest {
                root,
                trusted,
                mirror,
                fetcher: self.fetcher.clone(),
            })
            .await?;
        let bundle = TrustBundle::new(verified.metadata, verified.targets)?;

        self.store.commit(bundle.store_entries(mirror)?).await?;
        info!(
            "committed trust bundle with {} targets from {}",
            bundle.index().len(),
            mirror
        );
        Ok(bundle)
    }
}
