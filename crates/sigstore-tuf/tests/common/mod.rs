//! Test doubles: an in-memory mirror, an engine checking it the way a TUF
//! engine would (hashes, lengths, timestamp rollback) and a store that
//! counts writes.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use sha2::{Digest, Sha256};
use sigstore_cache::{StoreGetFuture, StoreListFuture, StoreOpFuture};
use sigstore_tuf::expiration::parse_timestamp;
use sigstore_tuf::{
    Entries, Error, FetchFuture, MetadataStore, RemoteFetcher, RootLocator, TargetIndex,
    TufConfig, UpdateFuture, UpdateRequest, VerificationEngine, VerifiedBundle,
};

pub const MIRROR: &str = "https://mirror.example.com/sigstore";

pub const ROOT: &[u8] = br#"{"signed":{"_type":"root","version":1},"signatures":[]}"#;

/// A published target: name, content and optional `(usage, status)` tags
pub type Published<'a> = (&'a str, &'a [u8], Option<(&'a str, &'a str)>);

#[derive(Debug, Default)]
struct MirrorState {
    metadata: Entries,
    targets: Entries,
    offline: bool,
    reject: bool,
}

/// Mirror serving metadata and targets from memory, counting fetches
#[derive(Debug, Clone, Default)]
pub struct MemoryMirror {
    state: Arc<Mutex<MirrorState>>,
    fetches: Arc<AtomicUsize>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the repository content with `targets` at `version`
    pub fn publish(&self, version: u64, targets: &[Published<'_>]) {
        let mut listed = serde_json::Map::new();
        let mut contents = Entries::new();
        for (name, content, tags) in targets {
            let mut descriptor = json!({
                "length": content.len(),
                "hashes": { "sha256": hex::encode(Sha256::digest(content)) },
            });
            if let Some((usage, status)) = tags {
                descriptor["custom"] = json!({ "sigstore": { "usage": usage, "status": status } });
            }
            listed.insert(name.to_string(), descriptor);
            contents.insert(name.to_string(), content.to_vec());
        }

        let targets_role = json!({
            "signed": {
                "_type": "targets",
                "spec_version": "1.0",
                "version": version,
                "expires": "2030-01-01T00:00:00Z",
                "targets": listed,
            },
            "signatures": [],
        });
        let timestamp = json!({
            "signed": {
                "_type": "timestamp",
                "spec_version": "1.0",
                "version": version,
                "expires": "2030-01-01T00:00:00Z",
                "meta": {},
            },
            "signatures": [],
        });

        let mut state = self.state.lock().unwrap();
        state.metadata = Entries::from([
            (
                "timestamp.json".to_string(),
                serde_json::to_vec(&timestamp).unwrap(),
            ),
            (
                "targets.json".to_string(),
                serde_json::to_vec(&targets_role).unwrap(),
            ),
        ]);
        state.targets = contents;
    }

    /// Serve a different content for an already published target
    pub fn tamper(&self, name: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.targets.insert(name.to_string(), content.to_vec());
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Make the engine reject every signature
    pub fn set_reject(&self, reject: bool) {
        self.state.lock().unwrap().reject = reject;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn rejecting(&self) -> bool {
        self.state.lock().unwrap().reject
    }

    fn serve(&self, name: &str, target: bool) -> sigstore_tuf::Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.offline {
            return Err(Error::Network(format!("{} failed after 3 attempts", name)));
        }
        let files = if target { &state.targets } else { &state.metadata };
        files
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }
}

impl RemoteFetcher for MemoryMirror {
    fn fetch_metadata(&self, name: &str) -> FetchFuture<'_> {
        let result = self.serve(name, false);
        Box::pin(async move { result })
    }

    fn fetch_target(&self, name: &str) -> FetchFuture<'_> {
        let result = self.serve(name, true);
        Box::pin(async move { result })
    }
}

/// Engine trusting [`ROOT`] and checking what it fetches against the
/// targets metadata
#[derive(Debug, Clone)]
pub struct FakeEngine {
    mirror: MemoryMirror,
}

impl FakeEngine {
    pub fn new(mirror: &MemoryMirror) -> Self {
        Self {
            mirror: mirror.clone(),
        }
    }

    async fn run(&self, request: UpdateRequest<'_>) -> sigstore_tuf::Result<VerifiedBundle> {
        if request.root != ROOT {
            return Err(Error::Verification("root is not trusted".into()));
        }

        let timestamp = request.fetcher.fetch_metadata("timestamp.json").await?;
        if self.mirror.rejecting() {
            return Err(Error::Verification("signature threshold not met".into()));
        }
        let fetched = parse_timestamp(&timestamp)
            .ok_or_else(|| Error::Verification("malformed timestamp".into()))?;
        if let Some(previous) = request
            .trusted
            .get("timestamp.json")
            .and_then(|bytes| parse_timestamp(bytes))
        {
            if fetched.version < previous.version {
                return Err(Error::Verification(format!(
                    "timestamp version {} is older than trusted version {}",
                    fetched.version, previous.version
                )));
            }
        }

        let targets_role = request.fetcher.fetch_metadata("targets.json").await?;
        let metadata = Entries::from([
            ("root.json".to_string(), request.root.to_vec()),
            ("timestamp.json".to_string(), timestamp),
            ("targets.json".to_string(), targets_role),
        ]);

        let index = TargetIndex::from_metadata(&metadata)?;
        let mut targets = Entries::new();
        for info in index.iter() {
            let content = request.fetcher.fetch_target(&info.name).await?;
            if !info.matches(&content) {
                return Err(Error::Verification(format!(
                    "hash mismatch for {}",
                    info.name
                )));
            }
            targets.insert(info.name.clone(), content);
        }

        Ok(VerifiedBundle { metadata, targets })
    }
}

impl VerificationEngine for FakeEngine {
    fn update<'a>(&'a self, request: UpdateRequest<'a>) -> UpdateFuture<'a> {
        Box::pin(self.run(request))
    }
}

/// Store wrapper counting every mutating operation
#[derive(Clone)]
pub struct CountingStore {
    inner: Arc<dyn MetadataStore>,
    writes: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new(inner: impl MetadataStore + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl MetadataStore for CountingStore {
    fn get(&self, name: &str) -> StoreGetFuture<'_> {
        self.inner.get(name)
    }

    fn put(&self, name: &str, value: &[u8]) -> StoreOpFuture<'_> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put(name, value)
    }

    fn list(&self) -> StoreListFuture<'_> {
        self.inner.list()
    }

    fn commit(&self, entries: Entries) -> StoreOpFuture<'_> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(entries)
    }

    fn is_persistent(&self) -> bool {
        self.inner.is_persistent()
    }
}

/// Configuration pointing at `dir` and [`MIRROR`]
pub fn config(dir: &std::path::Path) -> TufConfig {
    TufConfig::default().with_cache_dir(dir).with_mirror(MIRROR)
}

/// Locator that never falls back to a compiled-in root
pub fn locator() -> RootLocator {
    RootLocator::new().with_embedded_root(None)
}

/// Names of all entries in a directory tree, relative to `dir`
pub fn files_under(dir: &std::path::Path) -> BTreeSet<String> {
    let mut files = BTreeSet::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            for nested in files_under(&path) {
                files.insert(format!("{}/{}", name, nested));
            }
        } else {
            files.insert(name);
        }
    }
    files
}
