//! Client configuration and trust-root location
//!
//! [`TufConfig`] collects the caller's overrides (usually from the
//! environment), and [`RootLocator`] turns them into the immutable
//! [`TrustRootConfig`] a client runs with: where the cache lives, which
//! mirror to talk to and which root of trust to bootstrap from.
//!
//! # Example
//!
//! ```no_run
//! use sigstore_tuf::TufConfig;
//!
//! // TUF_ROOT and SIGSTORE_NO_CACHE
//! let config = TufConfig::from_env();
//!
//! // Or explicit
//! let config = TufConfig::default()
//!     .with_mirror("https://tuf.example.com")
//!     .with_cache_dir("/var/cache/tuf")
//!     .without_cache();
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sigstore_cache::{FileSystemStore, InMemoryStore, MetadataStore};
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// Default Sigstore production TUF repository URL
pub const DEFAULT_TUF_URL: &str = "https://tuf-repo-cdn.sigstore.dev";

/// Environment variable overriding the cache directory
pub const TUF_ROOT_ENV: &str = "TUF_ROOT";

/// Environment variable disabling local persistence
pub const NO_CACHE_ENV: &str = "SIGSTORE_NO_CACHE";

/// Store entry holding the trusted root metadata
pub(crate) const ROOT_ENTRY: &str = "root.json";

/// Store entry holding the trusted timestamp metadata
pub(crate) const TIMESTAMP_ENTRY: &str = "timestamp.json";

/// Store entry recording the mirror a bundle was bootstrapped from
pub(crate) const REMOTE_ENTRY: &str = "remote.json";

/// Compiled-in root of trust, used when nothing else supplies one
#[cfg(embedded_root)]
pub const EMBEDDED_ROOT: Option<&[u8]> =
    Some(include_bytes!("../repository/root.json").as_slice());

/// Compiled-in root of trust, used when nothing else supplies one
///
/// `None` when the crate was built without `repository/root.json`.
#[cfg(not(embedded_root))]
pub const EMBEDDED_ROOT: Option<&[u8]> = None;

/// Caller-supplied configuration overrides
#[derive(Debug, Clone, Default)]
pub struct TufConfig {
    /// Base URL of the TUF mirror
    pub url: Option<String>,
    /// Path to the local cache directory
    pub cache_dir: Option<PathBuf>,
    /// Whether to disable local persistence
    pub disable_cache: bool,
    /// Explicit root metadata to bootstrap trust from
    pub root: Option<Vec<u8>>,
}

impl TufConfig {
    /// Read `TUF_ROOT` and `SIGSTORE_NO_CACHE` from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an environment-style lookup function
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            url: None,
            cache_dir: lookup(TUF_ROOT_ENV)
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            disable_cache: lookup(NO_CACHE_ENV)
                .and_then(|value| parse_bool(&value))
                .unwrap_or(false),
            root: None,
        }
    }

    /// Set the mirror URL
    pub fn with_mirror(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the cache directory
    pub fn with_cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Disable local persistence
    pub fn without_cache(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    /// Bootstrap trust from `root` instead of the cached or embedded root
    pub fn with_root(mut self, root: impl Into<Vec<u8>>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// The cache directory this configuration points at
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_cache_dir(),
        }
    }

    /// Open the store selected by this configuration
    ///
    /// With persistence enabled the cache directory is created first;
    /// otherwise an [`InMemoryStore`] is returned and nothing is created.
    pub async fn open_store(&self) -> Result<Box<dyn MetadataStore>> {
        if self.disable_cache {
            debug!("persistence disabled, using in-memory store");
            return Ok(Box::new(InMemoryStore::new()));
        }

        let dir = self.resolved_cache_dir()?;
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            Error::Cache(sigstore_cache::Error::Io(format!(
                "failed to create cache directory {}: {}",
                dir.display(),
                e
            )))
        })?;
        Ok(Box::new(FileSystemStore::new(dir)))
    }
}

/// Effective configuration of a client instance
#[derive(Debug, Clone)]
pub struct TrustRootConfig {
    /// Local cache directory
    pub cache_dir: PathBuf,
    /// Mirror serving metadata (and `targets/` below it)
    pub remote_url: Url,
    /// Root metadata used when bootstrapping
    pub root: Option<Vec<u8>>,
    /// Whether the store outlives the client
    pub persistence_enabled: bool,
}

/// Mirror record persisted next to a bootstrapped bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RemoteRecord {
    pub mirror: String,
}

/// Resolves a [`TufConfig`] into a [`TrustRootConfig`]
#[derive(Debug, Clone)]
pub struct RootLocator {
    embedded_root: Option<&'static [u8]>,
}

impl Default for RootLocator {
    fn default() -> Self {
        Self {
            embedded_root: EMBEDDED_ROOT,
        }
    }
}

impl RootLocator {
    /// Create a locator using the compiled-in root
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the compiled-in root
    pub fn with_embedded_root(mut self, root: Option<&'static [u8]>) -> Self {
        self.embedded_root = root;
        self
    }

    /// Resolve the configuration against what `store` already holds
    ///
    /// The mirror comes from the explicit override, then from the mirror a
    /// previous bootstrap recorded, then [`DEFAULT_TUF_URL`]. The root comes
    /// from explicit bytes, then the cached `root.json` (skipped when
    /// `use_cached_root` is false), then the compiled-in root.
    pub async fn resolve(
        &self,
        config: &TufConfig,
        store: &dyn MetadataStore,
        use_cached_root: bool,
    ) -> Result<TrustRootConfig> {
        let mirror = match &config.url {
            Some(url) => url.clone(),
            None => match store.get(REMOTE_ENTRY).await? {
                Some(bytes) => {
                    let record: RemoteRecord = serde_json::from_slice(&bytes).map_err(|e| {
                        Error::Config(format!("invalid cached {}: {}", REMOTE_ENTRY, e))
                    })?;
                    record.mirror
                }
                None => DEFAULT_TUF_URL.to_string(),
            },
        };

        let root = match &config.root {
            Some(root) => Some(root.clone()),
            None if use_cached_root => match store.get(ROOT_ENTRY).await? {
                Some(root) => Some(root),
                None => self.embedded_root.map(<[u8]>::to_vec),
            },
            None => self.embedded_root.map(<[u8]>::to_vec),
        };

        Ok(TrustRootConfig {
            cache_dir: config.resolved_cache_dir()?,
            remote_url: parse_mirror_url(&mirror)?,
            root,
            persistence_enabled: store.is_persistent(),
        })
    }
}

/// Parse a mirror URL, normalizing it to end with `/` so relative names
/// resolve below it
pub fn parse_mirror_url(url: &str) -> Result<Url> {
    let mut parsed =
        Url::parse(url).map_err(|e| Error::Config(format!("invalid mirror URL {}: {}", url, e)))?;
    if parsed.cannot_be_a_base() {
        return Err(Error::Config(format!("invalid mirror URL {}", url)));
    }
    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    Ok(parsed)
}

/// Parse a boolean the way Go's `strconv.ParseBool` does
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Get the default cache directory
///
/// `~/.sigstore/root`, or the platform cache directory when no home
/// directory can be determined.
pub fn default_cache_dir() -> Result<PathBuf> {
    if let Some(base_dirs) = directories::BaseDirs::new() {
        return Ok(base_dirs.home_dir().join(".sigstore").join("root"));
    }

    let project_dirs = directories::ProjectDirs::from("dev", "sigstore", "sigstore-rust")
        .ok_or_else(|| Error::Config("could not determine cache directory".into()))?;
    Ok(project_dirs.cache_dir().join("tuf"))
}
