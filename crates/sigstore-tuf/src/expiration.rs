//! Expiration policies for cached timestamp metadata
//!
//! The refresh protocol asks an [`ExpirationChecker`] whether the cached
//! `timestamp.json` can still be served. The checker is configuration of a
//! single client: tests and concurrent clients can each use their own
//! policy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Classifies a raw `timestamp.json` blob as expired or fresh
pub trait ExpirationChecker: Send + Sync {
    /// Whether `timestamp` must be refreshed before it is trusted
    fn is_expired(&self, timestamp: &[u8]) -> bool;
}

impl<F> ExpirationChecker for F
where
    F: Fn(&[u8]) -> bool + Send + Sync,
{
    fn is_expired(&self, timestamp: &[u8]) -> bool {
        self(timestamp)
    }
}

impl fmt::Debug for dyn ExpirationChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExpirationChecker")
    }
}

/// The fields of a signed timestamp role the policies look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampInfo {
    /// Declared metadata version
    pub version: u64,
    /// Declared expiry instant
    pub expires: DateTime<Utc>,
}

#[derive(Deserialize)]
struct Envelope {
    signed: SignedTimestamp,
}

#[derive(Deserialize)]
struct SignedTimestamp {
    #[serde(rename = "_type")]
    role_type: String,
    version: u64,
    expires: DateTime<Utc>,
}

/// Parse the signed portion of a `timestamp.json` document
///
/// Returns `None` for anything that is not a well-formed timestamp role.
pub fn parse_timestamp(timestamp: &[u8]) -> Option<TimestampInfo> {
    let envelope: Envelope = serde_json::from_slice(timestamp).ok()?;
    if envelope.signed.role_type != "timestamp" {
        return None;
    }
    Some(TimestampInfo {
        version: envelope.signed.version,
        expires: envelope.signed.expires,
    })
}

/// Wall-clock policy: expired once the declared expiry has passed
///
/// Malformed metadata counts as expired.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl ExpirationChecker for WallClock {
    fn is_expired(&self, timestamp: &[u8]) -> bool {
        match parse_timestamp(timestamp) {
            Some(info) => info.expires <= Utc::now(),
            None => true,
        }
    }
}

/// Fixed answer regardless of content
#[derive(Debug, Clone, Copy)]
pub struct Always(pub bool);

impl ExpirationChecker for Always {
    fn is_expired(&self, _timestamp: &[u8]) -> bool {
        self.0
    }
}

/// Expired while the declared version is at most the given one
///
/// Malformed metadata counts as expired.
#[derive(Debug, Clone, Copy)]
pub struct VersionAtMost(pub u64);

impl ExpirationChecker for VersionAtMost {
    fn is_expired(&self, timestamp: &[u8]) -> bool {
        match parse_timestamp(timestamp) {
            Some(info) => info.version <= self.0,
            None => true,
        }
    }
}
