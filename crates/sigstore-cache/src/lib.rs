//! Metadata stores for the Sigstore TUF client
//!
//! This crate provides the key-value store that holds a verified TUF
//! metadata bundle between client runs. Two implementations share one
//! contract:
//!
//! - [`FileSystemStore`]: durable store; every commit is published atomically
//!   by renaming a fully written generation into place.
//! - [`InMemoryStore`]: ephemeral store used when persistence is disabled.
//!   It never touches the filesystem.
//!
//! # Example
//!
//! ```no_run
//! use sigstore_cache::{FileSystemStore, MetadataStore};
//!
//! # async fn example() -> Result<(), sigstore_cache::Error> {
//! let store = FileSystemStore::new("/tmp/tuf-root");
//!
//! store.put("root.json", b"{}").await?;
//!
//! if let Some(data) = store.get("root.json").await? {
//!     println!("Got {} bytes", data.len());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod filesystem;
mod memory;

pub use error::{Error, Result};
pub use filesystem::FileSystemStore;
pub use memory::InMemoryStore;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by [`MetadataStore::get`]
pub type StoreGetFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>>;

/// Future returned by [`MetadataStore::list`]
pub type StoreListFuture<'a> = Pin<Box<dyn Future<Output = Result<BTreeSet<String>>> + Send + 'a>>;

/// Future returned by mutating [`MetadataStore`] operations
pub type StoreOpFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A set of named entries committed together
pub type Entries = BTreeMap<String, Vec<u8>>;

/// Key-value store over named metadata and target blobs
///
/// Readers never observe partially written content: an entry is either
/// absent, the previously committed value, or the newly committed value.
pub trait MetadataStore: Send + Sync {
    /// Get a stored value by name
    ///
    /// Returns `Ok(None)` if no committed entry has that name.
    fn get(&self, name: &str) -> StoreGetFuture<'_>;

    /// Store a single value, keeping every other entry
    fn put(&self, name: &str, value: &[u8]) -> StoreOpFuture<'_>;

    /// List the names of all committed entries
    fn list(&self) -> StoreListFuture<'_>;

    /// Replace the whole content of the store with `entries` in one step
    ///
    /// Either every entry is committed or the previous content is left
    /// untouched.
    fn commit(&self, entries: Entries) -> StoreOpFuture<'_>;

    /// Whether this store outlives the process
    fn is_persistent(&self) -> bool;
}

impl<T: MetadataStore + ?Sized> MetadataStore for Arc<T> {
    fn get(&self, name: &str) -> StoreGetFuture<'_> {
        (**self).get(name)
    }

    fn put(&self, name: &str, value: &[u8]) -> StoreOpFuture<'_> {
        (**self).put(name, value)
    }

    fn list(&self) -> StoreListFuture<'_> {
        (**self).list()
    }

    fn commit(&self, entries: Entries) -> StoreOpFuture<'_> {
        (**self).commit(entries)
    }

    fn is_persistent(&self) -> bool {
        (**self).is_persistent()
    }
}

impl MetadataStore for Box<dyn MetadataStore> {
    fn get(&self, name: &str) -> StoreGetFuture<'_> {
        (**self).get(name)
    }

    fn put(&self, name: &str, value: &[u8]) -> StoreOpFuture<'_> {
        (**self).put(name, value)
    }

    fn list(&self) -> StoreListFuture<'_> {
        (**self).list()
    }

    fn commit(&self, entries: Entries) -> StoreOpFuture<'_> {
        (**self).commit(entries)
    }

    fn is_persistent(&self) -> bool {
        (**self).is_persistent()
    }
}

/// Check that `name` can be used as an entry name
pub(crate) fn validate_name(name: &str) -> Result<()> {
    match name {
        "" | "." | ".." => Err(Error::InvalidName(name.to_string())),
        _ if name.contains('\0') => Err(Error::InvalidName(name.to_string())),
        _ => Ok(()),
    }
}
