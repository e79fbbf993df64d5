//! Sigstore trust root client
//!
//! This crate keeps a locally cached, verified copy of the Sigstore TUF
//! repository and exposes the trust targets it distributes:
//! - Fulcio certificate authority certificates
//! - Rekor transparency log public keys
//! - Certificate Transparency log public keys
//! - the `trusted_root.json` bundle and any other published target
//!
//! A client is constructed by running the refresh protocol once. Without a
//! local bundle it bootstraps from the configured root of trust. With a
//! fresh local bundle it serves it without touching the network. With an
//! expired one it refreshes through the TUF verification engine. A failed
//! refresh fails construction and the previous bundle is never used as a
//! fallback.
//!
//! # Compiled-in root
//!
//! The build script embeds `repository/root.json` as [`EMBEDDED_ROOT`],
//! used when neither the caller nor the cache supplies a root. A build
//! without that file warns and has no compiled-in root.
//!
//! # Example
//!
//! ```no_run
//! use sigstore_tuf::{Always, TufClient, TufConfig, UsageKind};
//!
//! # async fn example(root: Vec<u8>) -> Result<(), sigstore_tuf::Error> {
//! // Establish trust in a mirror once
//! let client = sigstore_tuf::initialize("https://tuf-repo-cdn.sigstore.dev", Some(root)).await?;
//! client.close();
//!
//! // Later constructions reuse the cache and the recorded mirror
//! let client = TufClient::builder(TufConfig::from_env())
//!     .expiration_checker(Always(true))
//!     .build()
//!     .await?;
//! for ca in client.get_targets_by_meta(UsageKind::Fulcio, &["fulcio.crt.pem"])? {
//!     println!("{} ({})", ca.name, ca.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod custom;
pub mod engine;
pub mod error;
pub mod expiration;
pub mod fetcher;
pub mod update;

pub use client::{initialize, RootStatus, RoleStatus, TufClient, TufClientBuilder};
pub use config::{
    RootLocator, TrustRootConfig, TufConfig, DEFAULT_TUF_URL, EMBEDDED_ROOT, NO_CACHE_ENV,
    TUF_ROOT_ENV,
};
pub use custom::{CustomMetadata, StatusKind, TargetEntry, TargetIndex, TargetInfo, UsageKind};
pub use engine::{
    FetcherTransport, ToughEngine, UpdateFuture, UpdateRequest, VerificationEngine,
    VerifiedBundle,
};
pub use error::{Error, Result};
pub use expiration::{Always, ExpirationChecker, TimestampInfo, VersionAtMost, WallClock};
pub use fetcher::{FetchFuture, FetchPolicy, HttpFetcher, RemoteFetcher};
pub use sigstore_cache::{Entries, FileSystemStore, InMemoryStore, MetadataStore};
pub use update::{CachedBundle, LocalState, TrustBundle};
