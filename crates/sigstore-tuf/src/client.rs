//! Trust root client
//!
//! [`TufClient`] is what callers hold: it is constructed by running the
//! refresh protocol once and then serves trust targets from the verified
//! bundle it ended up with. A caller wanting fresher data constructs a new
//! client.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigstore_cache::MetadataStore;
use tracing::debug;
use url::Url;

use crate::config::{RootLocator, TrustRootConfig, TufConfig};
use crate::custom::{TargetEntry, UsageKind};
use crate::engine::{ToughEngine, VerificationEngine};
use crate::expiration::{ExpirationChecker, WallClock};
use crate::fetcher::{FetchPolicy, HttpFetcher, RemoteFetcher};
use crate::update::{TrustBundle, Updater};
use crate::Result;

/// Diagnostic snapshot of a client's trust bundle
#[derive(Debug, Clone, Serialize)]
pub struct RootStatus {
    /// Cache directory, `None` when persistence is disabled
    pub local: Option<PathBuf>,
    /// Mirror the bundle is refreshed from
    pub remote: Url,
    /// Version, size and expiry of each metadata file
    pub metadata: BTreeMap<String, RoleStatus>,
    /// Names of all targets, sorted
    pub targets: Vec<String>,
    /// Whether the client's expiration policy considers the bundle expired
    pub bundle_expired: bool,
}

/// Summary of one metadata file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleStatus {
    /// Role version
    pub version: u64,
    /// Size of the metadata file in bytes
    pub len: usize,
    /// When the role expires
    pub expiration: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RoleEnvelope {
    signed: RoleHeader,
}

#[derive(Deserialize)]
struct RoleHeader {
    version: u64,
    expires: DateTime<Utc>,
}

/// Builder for [`TufClient`]
///
/// Every collaborator has a production default: the store selected by
/// [`TufConfig`], [`HttpFetcher`], [`ToughEngine`] and [`WallClock`].
pub struct TufClientBuilder {
    config: TufConfig,
    locator: RootLocator,
    store: Option<Box<dyn MetadataStore>>,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
    engine: Option<Arc<dyn VerificationEngine>>,
    checker: Arc<dyn ExpirationChecker>,
    policy: FetchPolicy,
}

impl TufClientBuilder {
    /// Start from `config`
    pub fn new(config: TufConfig) -> Self {
        Self {
            config,
            locator: RootLocator::default(),
            store: None,
            fetcher: None,
            engine: None,
            checker: Arc::new(WallClock),
            policy: FetchPolicy::default(),
        }
    }

    /// Use `store` instead of the one the configuration selects
    pub fn store(mut self, store: impl MetadataStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Use `fetcher` instead of an [`HttpFetcher`] for the resolved mirror
    pub fn fetcher(mut self, fetcher: impl RemoteFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Use `engine` instead of [`ToughEngine`]
    pub fn engine(mut self, engine: impl VerificationEngine + 'static) -> Self {
        self.engine = Some(Arc::new(engine));
        self
    }

    /// Decide freshness of the cached timestamp with `checker`
    pub fn expiration_checker(mut self, checker: impl ExpirationChecker + 'static) -> Self {
        self.checker = Arc::new(checker);
        self
    }

    /// Timeouts and retries of the default [`HttpFetcher`]
    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use `locator` to resolve the root of trust
    pub fn root_locator(mut self, locator: RootLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Construct the client, serving the cached bundle when it is fresh
    pub async fn build(self) -> Result<TufClient> {
        self.construct(false).await
    }

    /// Construct the client by bootstrapping from the configured root,
    /// replacing whatever the store holds
    pub async fn initialize(self) -> Result<TufClient> {
        self.construct(true).await
    }

    async fn construct(self, bootstrap: bool) -> Result<TufClient> {
        let store = match self.store {
            Some(store) => store,
            None => self.config.open_store().await?,
        };
        let config = self.locator.resolve(&self.config, &*store, !bootstrap).await?;
        debug!(
            "resolved trust root config: mirror {}, cache {}, persistent {}",
            config.remote_url,
            config.cache_dir.display(),
            config.persistence_enabled
        );

        let fetcher: Arc<dyn RemoteFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(&config.remote_url, self.policy)?),
        };
        let engine = self.engine.unwrap_or_else(|| Arc::new(ToughEngine::new()));

        let updater = Updater {
            store: &*store,
            fetcher,
            engine: &*engine,
            checker: &*self.checker,
            config: &config,
        };
        let bundle = if bootstrap {
            updater.bootstrap().await?
        } else {
            updater.open().await?
        };

        Ok(TufClient {
            config,
            store,
            checker: self.checker,
            bundle,
        })
    }
}

impl fmt::Debug for TufClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TufClientBuilder")
            .field("config", &self.config)
            .field("locator", &self.locator)
            .field("custom_store", &self.store.is_some())
            .field("fetcher", &self.fetcher)
            .field("engine", &self.engine)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Client holding a verified Sigstore trust bundle
///
/// # Example
///
/// ```no_run
/// use sigstore_tuf::{TufClient, UsageKind};
///
/// # async fn example() -> Result<(), sigstore_tuf::Error> {
/// let client = TufClient::from_env().await?;
///
/// let trusted_root = client.get_target("trusted_root.json")?;
/// let rekor_keys = client.get_targets_by_meta(UsageKind::RekorLog, &["rekor.pub"])?;
/// println!("{} bytes, {} rekor keys", trusted_root.len(), rekor_keys.len());
///
/// client.close();
/// # Ok(())
/// # }
/// ```
pub struct TufClient {
    config: TrustRootConfig,
    store: Box<dyn MetadataStore>,
    checker: Arc<dyn ExpirationChecker>,
    bundle: TrustBundle,
}

impl TufClient {
    /// Construct a client configured from the environment
    pub async fn from_env() -> Result<Self> {
        Self::new(TufConfig::from_env()).await
    }

    /// Construct a client, refreshing the cached bundle if needed
    pub async fn new(config: TufConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    /// Builder with custom collaborators
    pub fn builder(config: TufConfig) -> TufClientBuilder {
        TufClientBuilder::new(config)
    }

    /// Bootstrap trust from the configured root, replacing any cached bundle
    pub async fn initialize(config: TufConfig) -> Result<Self> {
        Self::builder(config).initialize().await
    }

    /// Effective configuration
    pub fn config(&self) -> &TrustRootConfig {
        &self.config
    }

    /// The verified bundle
    pub fn bundle(&self) -> &TrustBundle {
        &self.bundle
    }

    /// Verified content of target `name`
    pub fn get_target(&self, name: &str) -> Result<Vec<u8>> {
        self.bundle.get_target(name)
    }

    /// Targets tagged with `usage`, falling back to `fallback` by name
    ///
    /// See [`TrustBundle::get_targets_by_meta`].
    pub fn get_targets_by_meta(
        &self,
        usage: UsageKind,
        fallback: &[&str],
    ) -> Result<Vec<TargetEntry>> {
        self.bundle.get_targets_by_meta(usage, fallback)
    }

    /// Diagnostic view of the bundle
    pub fn root_status(&self) -> RootStatus {
        let metadata = self
            .bundle
            .metadata()
            .iter()
            .filter_map(|(name, bytes)| {
                let envelope: RoleEnvelope = serde_json::from_slice(bytes).ok()?;
                Some((
                    name.clone(),
                    RoleStatus {
                        version: envelope.signed.version,
                        len: bytes.len(),
                        expiration: envelope.signed.expires,
                    },
                ))
            })
            .collect();

        RootStatus {
            local: self
                .store
                .is_persistent()
                .then(|| self.config.cache_dir.clone()),
            remote: self.config.remote_url.clone(),
            metadata,
            targets: self.bundle.index().names().map(str::to_string).collect(),
            bundle_expired: self.checker.is_expired(self.bundle.timestamp()),
        }
    }

    /// Release the store; cached content stays in place
    pub fn close(self) {
        debug!("closing trust root client for {}", self.config.remote_url);
    }
}

impl fmt::Debug for TufClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TufClient")
            .field("config", &self.config)
            .field("persistent", &self.store.is_persistent())
            .field("targets", &self.bundle.index().len())
            .finish_non_exhaustive()
    }
}

/// Bootstrap trust in `mirror` from `root`, everything else from the
/// environment
///
/// Without `root` the compiled-in root is used; when there is none either,
/// this fails with [`crate::Error::Config`].
pub async fn initialize(mirror: &str, root: Option<Vec<u8>>) -> Result<TufClient> {
    let mut config = TufConfig::from_env().with_mirror(mirror);
    if let Some(root) = root {
        config = config.with_root(root);
    }
    TufClient::initialize(config).await
}
