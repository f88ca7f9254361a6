//! The tamper-evident side: username → content-hash anchors.
//!
//! [`LedgerAnchor`] is the capability set the service needs from a ledger.
//! Implementations are remote in production; every call may fail with
//! `Unavailable` (transient) or `Rejected` (permanent) in addition to the
//! per-operation outcomes. Single-key atomicity is the backing ledger's job.
//!
//! Anchor values are stored as `{"info_hash": "<hash>"}`, the same JSON the
//! on-ledger contract keeps per user.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IdvaultError;

/// The value stored under each username on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorValue {
    pub info_hash: String,
}

/// One username → hash pair returned by [`LedgerAnchor::range`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorEntry {
    pub username: String,
    pub content_hash: String,
}

/// A finite, key-ordered snapshot of anchors. A new call to `range`
/// starts a new enumeration; this is not a live cursor.
#[derive(Debug)]
pub struct AnchorRange {
    inner: std::vec::IntoIter<AnchorEntry>,
}

impl AnchorRange {
    pub fn new(entries: Vec<AnchorEntry>) -> Self {
        Self {
            inner: entries.into_iter(),
        }
    }
}

impl Iterator for AnchorRange {
    type Item = AnchorEntry;

    fn next(&mut self) -> Option<AnchorEntry> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Ledger operations on anchors.
pub trait LedgerAnchor: Send + Sync {
    /// Current hash for `username`, or `NotFound`.
    fn get(&self, username: &str) -> Result<String, IdvaultError>;

    /// Create the anchor. Fails with `AlreadyExists` if one is present.
    fn put(&self, username: &str, content_hash: &str) -> Result<(), IdvaultError>;

    /// Move an existing anchor. Fails with `NotFound` if there is none.
    fn update(&self, username: &str, content_hash: &str) -> Result<(), IdvaultError>;

    /// Anchors with `start <= username < end`, ordered by username. An empty
    /// bound is open-ended.
    fn range(&self, start: &str, end: &str) -> Result<AnchorRange, IdvaultError>;
}

/// Identity issuance on the ledger platform (certificate enrollment).
pub trait IdentityIssuer: Send + Sync {
    /// Enroll the platform administrator identity.
    fn enroll_admin(&self) -> Result<(), IdvaultError>;

    /// Register `username` so that it can own an anchor.
    fn register_user(&self, username: &str) -> Result<(), IdvaultError>;
}

fn bound(key: &str) -> Bound<String> {
    if key.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Included(key.to_string())
    }
}

fn end_bound(key: &str) -> Bound<String> {
    if key.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Excluded(key.to_string())
    }
}

// ---------------------------------------------------------------------------
// In-memory ledger
// ---------------------------------------------------------------------------

/// An in-process ledger keeping anchor JSON in an ordered map.
///
/// Each operation runs under one lock, which gives the single-key atomicity
/// the service relies on.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, IdvaultError> {
        self.state
            .lock()
            .map_err(|_| IdvaultError::Unavailable("ledger state poisoned".into()))
    }

    fn encode(content_hash: &str) -> Result<Vec<u8>, IdvaultError> {
        serde_json::to_vec(&AnchorValue {
            info_hash: content_hash.to_string(),
        })
        .map_err(|e| IdvaultError::Rejected(format!("anchor encoding: {}", e)))
    }

    fn decode(username: &str, raw: &[u8]) -> Result<String, IdvaultError> {
        serde_json::from_slice::<AnchorValue>(raw)
            .map(|v| v.info_hash)
            .map_err(|_| IdvaultError::Inconsistent(format!("unreadable anchor for {}", username)))
    }

    /// Number of anchors held.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LedgerAnchor for MemoryLedger {
    fn get(&self, username: &str) -> Result<String, IdvaultError> {
        let state = self.lock()?;
        let raw = state
            .get(username)
            .ok_or_else(|| IdvaultError::NotFound(username.to_string()))?;
        Self::decode(username, raw)
    }

    fn put(&self, username: &str, content_hash: &str) -> Result<(), IdvaultError> {
        let value = Self::encode(content_hash)?;
        let mut state = self.lock()?;
        if state.contains_key(username) {
            return Err(IdvaultError::AlreadyExists(username.to_string()));
        }
        state.insert(username.to_string(), value);
        debug!(username, content_hash, "anchor created");
        Ok(())
    }

    fn update(&self, username: &str, content_hash: &str) -> Result<(), IdvaultError> {
        let value = Self::encode(content_hash)?;
        let mut state = self.lock()?;
        let slot = state
            .get_mut(username)
            .ok_or_else(|| IdvaultError::NotFound(username.to_string()))?;
        *slot = value;
        debug!(username, content_hash, "anchor moved");
        Ok(())
    }

    fn range(&self, start: &str, end: &str) -> Result<AnchorRange, IdvaultError> {
        if !start.is_empty() && !end.is_empty() && start > end {
            return Err(IdvaultError::Validation(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        let state = self.lock()?;
        let entries = state
            .range((bound(start), end_bound(end)))
            .map(|(username, raw)| {
                Ok(AnchorEntry {
                    username: username.clone(),
                    content_hash: Self::decode(username, raw)?,
                })
            })
            .collect::<Result<Vec<_>, IdvaultError>>()?;
        Ok(AnchorRange::new(entries))
    }
}

// ---------------------------------------------------------------------------
// In-memory issuer
// ---------------------------------------------------------------------------

/// An in-process identity issuer.
///
/// Registering a username twice succeeds, so a create that failed after
/// registration can be retried.
#[derive(Debug, Default)]
pub struct MemoryIssuer {
    admin_enrolled: Mutex<bool>,
    registered: Mutex<HashSet<String>>,
}

impl MemoryIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_admin_enrolled(&self) -> bool {
        self.admin_enrolled.lock().map(|e| *e).unwrap_or(false)
    }

    pub fn is_registered(&self, username: &str) -> bool {
        self.registered
            .lock()
            .map(|r| r.contains(username))
            .unwrap_or(false)
    }
}

impl IdentityIssuer for MemoryIssuer {
    fn enroll_admin(&self) -> Result<(), IdvaultError> {
        let mut enrolled = self
            .admin_enrolled
            .lock()
            .map_err(|_| IdvaultError::Unavailable("issuer state poisoned".into()))?;
        *enrolled = true;
        Ok(())
    }

    fn register_user(&self, username: &str) -> Result<(), IdvaultError> {
        if username.is_empty() {
            return Err(IdvaultError::Rejected("empty enrollment id".into()));
        }
        self.registered
            .lock()
            .map_err(|_| IdvaultError::Unavailable("issuer state poisoned".into()))?
            .insert(username.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_update() {
        let ledger = MemoryLedger::new();
        assert!(matches!(ledger.get("alice"), Err(IdvaultError::NotFound(_))));
        assert!(matches!(
            ledger.update("alice", "h0"),
            Err(IdvaultError::NotFound(_))
        ));

        ledger.put("alice", "h1").unwrap();
        assert_eq!(ledger.get("alice").unwrap(), "h1");
        assert!(matches!(
            ledger.put("alice", "h2"),
            Err(IdvaultError::AlreadyExists(_))
        ));
        assert_eq!(ledger.get("alice").unwrap(), "h1");

        ledger.update("alice", "h2").unwrap();
        assert_eq!(ledger.get("alice").unwrap(), "h2");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn stores_contract_json() {
        let ledger = MemoryLedger::new();
        ledger.put("user1", "abc").unwrap();
        let raw = ledger.state.lock().unwrap().get("user1").cloned().unwrap();
        assert_eq!(raw, br#"{"info_hash":"abc"}"#.to_vec());
    }

    #[test]
    fn range_is_ordered_half_open_and_restartable() {
        let ledger = MemoryLedger::new();
        for (u, h) in [("user3", "c"), ("user1", "a"), ("user2", "b"), ("zed", "z")] {
            ledger.put(u, h).unwrap();
        }

        let names: Vec<_> = ledger
            .range("user1", "user3")
            .unwrap()
            .map(|e| e.username)
            .collect();
        assert_eq!(names, vec!["user1", "user2"]);

        let all: Vec<_> = ledger.range("", "").unwrap().collect();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].username, "user1");
        assert_eq!(all[3].content_hash, "z");

        assert_eq!(ledger.range("", "").unwrap().count(), 4);
        assert!(ledger.range("z", "a").is_err());
    }

    #[test]
    fn issuer_registration_is_idempotent() {
        let issuer = MemoryIssuer::new();
        assert!(!issuer.is_admin_enrolled());
        issuer.enroll_admin().unwrap();
        assert!(issuer.is_admin_enrolled());
        issuer.register_user("alice").unwrap();
        issuer.register_user("alice").unwrap();
        assert!(issuer.is_registered("alice"));
        assert!(issuer.register_user("").is_err());
    }
}
