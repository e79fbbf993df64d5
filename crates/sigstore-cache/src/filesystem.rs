//! File system based store implementation

use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{
    validate_name, Entries, Error, MetadataStore, Result, StoreGetFuture, StoreListFuture,
    StoreOpFuture,
};

/// File naming the live generation
const CURRENT: &str = "CURRENT";

/// Temporary file used to swap [`CURRENT`]
const CURRENT_TMP: &str = "CURRENT.tmp";

const GENERATION_PREFIX: &str = "gen-";
const PARTIAL_SUFFIX: &str = ".partial";

/// File system based store
///
/// Entries are grouped in immutable generations. A commit writes a complete
/// new generation next to the live one and then switches the `CURRENT`
/// pointer with an atomic rename, so a reader sees either the old or the
/// new content and never a mix of both. Files and the base directory are
/// synced before a commit returns.
///
/// # Directory Structure
///
/// ```text
/// cache_dir/
/// ├── CURRENT              # "gen-2"
/// └── gen-2/
///     ├── root.json
///     ├── timestamp.json
///     └── targets%2Ffulcio.crt.pem
/// ```
///
/// Entry names are stored percent-encoded (controls, `%`, `/` and `\`) so every entry
/// is a single file inside its generation.
///
/// Only one store instance may write to a directory at a time.
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    /// Base directory of the store
    root: PathBuf,
}

impl FileSystemStore {
    /// Create a store backed by `dir`
    ///
    /// The directory is created on the first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            root: dir.as_ref().to_path_buf(),
        }
    }

    /// The directory backing this store
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, generation: u64) -> PathBuf {
        self.root.join(format!("{}{}", GENERATION_PREFIX, generation))
    }

    /// Read the live generation number, `None` if nothing was committed yet
    async fn current_generation(&self) -> Result<Option<u64>> {
        match fs::read_to_string(self.root.join(CURRENT)).await {
            Ok(content) => parse_generation(content.trim()).map(Some).ok_or_else(|| {
                Error::Corrupt(format!("unexpected {} contents: {:?}", CURRENT, content))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_generation(&self, generation: u64) -> Result<Entries> {
        let mut entries = Entries::new();
        let mut dir = fs::read_dir(self.generation_dir(generation)).await?;

        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(decode_name) else {
                warn!("ignoring unexpected file {:?} in store", entry.path());
                continue;
            };
            entries.insert(name, fs::read(entry.path()).await?);
        }

        Ok(entries)
    }

    /// Read every committed entry
    async fn read_all(&self) -> Result<Entries> {
        match self.current_generation().await? {
            Some(generation) => self.read_generation(generation).await,
            None => Ok(Entries::new()),
        }
    }

    async fn write_generation(&self, entries: &Entries) -> Result<()> {
        for name in entries.keys() {
            validate_name(name)?;
        }

        fs::create_dir_all(&self.root).await?;

        let previous = self.current_generation().await?;
        let next = match previous {
            None => 1,
            Some(generation) => generation.checked_add(1).ok_or_else(|| {
                Error::Corrupt(format!("generation counter exhausted at {}", generation))
            })?,
        };
        let staging = self
            .root
            .join(format!("{}{}{}", GENERATION_PREFIX, next, PARTIAL_SUFFIX));
        let target = self.generation_dir(next);

        // Leftovers of an interrupted commit are never live, drop them.
        remove_dir_if_exists(&staging).await?;
        remove_dir_if_exists(&target).await?;

        fs::create_dir(&staging).await?;
        if let Err(e) = write_entries(&staging, entries).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }
        fs::rename(&staging, &target).await?;
        sync_dir(&self.root).await?;

        let pointer = self.root.join(CURRENT_TMP);
        write_synced(&pointer, format!("{}{}\n", GENERATION_PREFIX, next).as_bytes()).await?;
        fs::rename(&pointer, self.root.join(CURRENT)).await?;
        sync_dir(&self.root).await?;

        debug!(
            "committed {} entries to {} (generation {})",
            entries.len(),
            self.root.display(),
            next
        );

        self.remove_stale_generations(next).await;
        Ok(())
    }

    /// Best-effort removal of every generation other than `keep`
    async fn remove_stale_generations(&self, keep: u64) {
        let keep = format!("{}{}", GENERATION_PREFIX, keep);
        let Ok(mut dir) = fs::read_dir(&self.root).await else {
            return;
        };

        while let Ok(Some(entry)) = dir.next_entry().await {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with(GENERATION_PREFIX) && file_name != keep {
                if let Err(e) = fs::remove_dir_all(entry.path()).await {
                    warn!("failed to remove stale generation {}: {}", file_name, e);
                }
            }
        }
    }
}

impl MetadataStore for FileSystemStore {
    fn get(&self, name: &str) -> StoreGetFuture<'_> {
        let name = name.to_string();
        Box::pin(async move {
            validate_name(&name)?;
            let file_name = encode_name(&name);

            // A commit may retire the generation between reading CURRENT and
            // reading the entry; retry against the new pointer when it moved.
            for _ in 0..3 {
                let Some(generation) = self.current_generation().await? else {
                    return Ok(None);
                };
                match fs::read(self.generation_dir(generation).join(&file_name)).await {
                    Ok(data) => return Ok(Some(data)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        if self.current_generation().await? == Some(generation) {
                            return Ok(None);
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            Ok(None)
        })
    }

    fn put(&self, name: &str, value: &[u8]) -> StoreOpFuture<'_> {
        let name = name.to_string();
        let value = value.to_vec();
        Box::pin(async move {
            validate_name(&name)?;
            let mut entries = self.read_all().await?;
            entries.insert(name, value);
            self.write_generation(&entries).await
        })
    }

    fn list(&self) -> StoreListFuture<'_> {
        Box::pin(async move { Ok(self.read_all().await?.into_keys().collect()) })
    }

    fn commit(&self, entries: Entries) -> StoreOpFuture<'_> {
        Box::pin(async move { self.write_generation(&entries).await })
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

fn parse_generation(value: &str) -> Option<u64> {
    value.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

async fn write_entries(dir: &Path, entries: &Entries) -> Result<()> {
    for (name, value) in entries {
        write_synced(&dir.join(encode_name(name)), value).await?;
    }
    Ok(())
}

async fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

/// Flush directory entries so renames survive a crash
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Characters escaped in file names: controls, `%` and path separators
const NAME_SET: &AsciiSet = &CONTROLS.add(b'%').add(b'/').add(b'\\');

/// Map an entry name to a single file name
fn encode_name(name: &str) -> String {
    utf8_percent_encode(name, NAME_SET).to_string()
}

/// Inverse of [`encode_name`], `None` for names this store never writes
fn decode_name(file_name: &str) -> Option<String> {
    let name = percent_decode_str(file_name).decode_utf8().ok()?;
    (encode_name(&name) == file_name).then(|| name.into_owned())
}
