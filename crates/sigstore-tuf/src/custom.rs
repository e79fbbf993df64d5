//! Sigstore custom target metadata
//!
//! Targets in the Sigstore TUF repository carry a small document in their
//! `custom` field declaring which trust role they serve and whether they
//! are still in use:
//!
//! ```json
//! { "sigstore": { "usage": "Fulcio", "status": "Active" } }
//! ```
//!
//! [`TargetIndex`] decodes these documents for every target of a bundle,
//! top-level and delegated, and answers the role-based lookups.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha512};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Metadata file of the top-level targets role
pub const TARGETS_ROLE: &str = "targets.json";

/// Which trust role a target serves
///
/// Unrecognized wire values decode to [`UsageKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum UsageKind {
    /// No (or an unrecognized) usage declared
    #[default]
    Unknown,
    /// Fulcio certificate authority
    Fulcio,
    /// Certificate Transparency log key
    CtLog,
    /// Rekor transparency log key
    RekorLog,
}

impl UsageKind {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Unknown => "Unknown",
            UsageKind::Fulcio => "Fulcio",
            UsageKind::CtLog => "CTFE",
            UsageKind::RekorLog => "Rekor",
        }
    }

    /// Parse a wire value, case-insensitively
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "fulcio" => UsageKind::Fulcio,
            "ctfe" | "ctlog" => UsageKind::CtLog,
            "rekor" | "rekorlog" => UsageKind::RekorLog,
            _ => UsageKind::Unknown,
        }
    }
}

/// Lifecycle state of a target
///
/// Unrecognized wire values decode to [`StatusKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum StatusKind {
    /// No (or an unrecognized) status declared
    #[default]
    Unknown,
    /// In use for new verifications
    Active,
    /// Kept for verifying old artifacts only
    Expired,
}

impl StatusKind {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Unknown => "Unknown",
            StatusKind::Active => "Active",
            StatusKind::Expired => "Expired",
        }
    }

    /// Parse a wire value, case-insensitively
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "active" => StatusKind::Active,
            "expired" => StatusKind::Expired,
            _ => StatusKind::Unknown,
        }
    }
}

macro_rules! string_enum_serde {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                Ok(Self::parse(&value))
            }
        }
    };
}

string_enum_serde!(UsageKind);
string_enum_serde!(StatusKind);

/// Decoded `custom.sigstore` document of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomMetadata {
    /// Declared usage
    #[serde(default)]
    pub usage: UsageKind,
    /// Declared status
    #[serde(default)]
    pub status: StatusKind,
}

#[derive(Deserialize)]
struct SigstoreCustom {
    sigstore: CustomMetadata,
}

impl CustomMetadata {
    /// Decode the Sigstore document from a target's `custom` object
    ///
    /// Returns `None` when no `sigstore` document is present.
    pub fn from_custom(custom: &serde_json::Value) -> Option<serde_json::Result<Self>> {
        custom.get("sigstore")?;
        Some(SigstoreCustom::deserialize(custom).map(|doc| doc.sigstore))
    }
}

/// A trust target with its content and decoded custom metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntry {
    /// Target name
    pub name: String,
    /// Verified content
    pub content: Vec<u8>,
    /// Declared usage
    pub usage: UsageKind,
    /// Declared status
    pub status: StatusKind,
}

/// Verified description of a single target
#[derive(Debug, Clone)]
pub struct TargetInfo {
    /// Target name
    pub name: String,
    /// Metadata file of the role that lists the target
    pub role: String,
    /// Expected length in bytes
    pub length: u64,
    sha256: Option<Vec<u8>>,
    sha512: Option<Vec<u8>>,
    /// Decoded custom metadata, `None` when the target declares none
    pub custom: Option<CustomMetadata>,
}

impl TargetInfo {
    /// Whether `content` matches the declared length and hashes
    pub fn matches(&self, content: &[u8]) -> bool {
        if content.len() as u64 != self.length {
            return false;
        }
        if self.sha256.is_none() && self.sha512.is_none() {
            return false;
        }
        let sha256_ok = self
            .sha256
            .as_ref()
            .map_or(true, |expected| Sha256::digest(content).as_slice() == expected.as_slice());
        let sha512_ok = self
            .sha512
            .as_ref()
            .map_or(true, |expected| Sha512::digest(content).as_slice() == expected.as_slice());
        sha256_ok && sha512_ok
    }

    /// Usage declared by custom metadata, [`UsageKind::Unknown`] if none
    pub fn usage(&self) -> UsageKind {
        self.custom.map(|c| c.usage).unwrap_or_default()
    }

    /// Status declared by custom metadata, [`StatusKind::Active`] if none
    pub fn status(&self) -> StatusKind {
        self.custom.map_or(StatusKind::Active, |c| c.status)
    }
}

#[derive(Deserialize)]
struct Envelope {
    signed: TargetsRole,
}

#[derive(Deserialize)]
struct TargetsRole {
    #[serde(rename = "_type")]
    role_type: String,
    #[serde(default)]
    targets: BTreeMap<String, TargetDescriptor>,
    #[serde(default)]
    delegations: Option<Delegations>,
}

#[derive(Deserialize)]
struct TargetDescriptor {
    length: u64,
    #[serde(default)]
    hashes: BTreeMap<String, String>,
    #[serde(default)]
    custom: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Delegations {
    #[serde(default)]
    roles: Vec<DelegatedRoleName>,
}

#[derive(Deserialize)]
struct DelegatedRoleName {
    name: String,
}

/// Every target of a bundle, keyed by name
#[derive(Debug, Clone, Default)]
pub struct TargetIndex {
    targets: BTreeMap<String, TargetInfo>,
}

impl TargetIndex {
    /// Build the index from a bundle's metadata files
    ///
    /// Starts at `targets.json` and follows delegations in order; the first
    /// role listing a name defines it.
    pub fn from_metadata(metadata: &BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let mut index = TargetIndex::default();
        let mut visited = BTreeSet::new();
        index.add_role(metadata, TARGETS_ROLE, &mut visited, true)?;
        Ok(index)
    }

    fn add_role(
        &mut self,
        metadata: &BTreeMap<String, Vec<u8>>,
        role: &str,
        visited: &mut BTreeSet<String>,
        required: bool,
    ) -> Result<()> {
        if !visited.insert(role.to_string()) {
            return Ok(());
        }

        let Some(bytes) = metadata.get(role) else {
            if required {
                return Err(Error::Verification(format!("bundle has no {}", role)));
            }
            debug!("delegated role {} not present in bundle", role);
            return Ok(());
        };

        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::Verification(format!("failed to parse {}: {}", role, e)))?;
        if envelope.signed.role_type != "targets" {
            return Err(Error::Verification(format!(
                "{} is a {} role, expected targets",
                role, envelope.signed.role_type
            )));
        }

        for (name, descriptor) in envelope.signed.targets {
            if self.targets.contains_key(&name) {
                continue;
            }
            let info = target_info(&name, role, descriptor)?;
            self.targets.insert(name, info);
        }

        if let Some(delegations) = envelope.signed.delegations {
            for delegated in delegations.roles {
                let file = format!("{}.json", delegated.name);
                self.add_role(metadata, &file, visited, false)?;
            }
        }

        Ok(())
    }

    /// Look up a target by name
    pub fn get(&self, name: &str) -> Option<&TargetInfo> {
        self.targets.get(name)
    }

    /// All targets, ordered by name
    pub fn iter(&self) -> impl Iterator<Item = &TargetInfo> {
        self.targets.values()
    }

    /// All target names, ordered
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the bundle lists no targets
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Targets whose explicit custom metadata declares `usage`, any status
    ///
    /// Targets without custom metadata never match, not even
    /// [`UsageKind::Unknown`].
    pub fn by_usage(&self, usage: UsageKind) -> impl Iterator<Item = &TargetInfo> {
        self.targets
            .values()
            .filter(move |info| matches!(info.custom, Some(custom) if custom.usage == usage))
    }
}

fn target_info(name: &str, role: &str, descriptor: TargetDescriptor) -> Result<TargetInfo> {
    let decode = |algorithm: &str| -> Result<Option<Vec<u8>>> {
        descriptor
            .hashes
            .get(algorithm)
            .map(|value| {
                hex::decode(value).map_err(|e| {
                    Error::Verification(format!("invalid {} hash for {}: {}", algorithm, name, e))
                })
            })
            .transpose()
    };

    let custom = match descriptor.custom.as_ref().and_then(CustomMetadata::from_custom) {
        Some(Ok(custom)) => Some(custom),
        Some(Err(e)) => {
            warn!("ignoring undecodable custom metadata of {}: {}", name, e);
            None
        }
        None => None,
    };

    Ok(TargetInfo {
        name: name.to_string(),
        role: role.to_string(),
        length: descriptor.length,
        sha256: decode("sha256")?,
        sha512: decode("sha512")?,
        custom,
    })
}
