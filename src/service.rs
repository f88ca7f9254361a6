//! Identity orchestration across the ledger and the off-chain store.
//!
//! ## Create
//! ```text
//! Validate → CheckUnique → BuildRecord → RegisterIdentity → StoreOffchain → AnchorLedger → Registered
//! ```
//! The record is written off-chain before the anchor, so the ledger never
//! names a hash that has no record. If anchoring then fails the record
//! stays behind as an orphan and `LedgerAnchorFailed` reports its hash.
//!
//! ## Update
//! ```text
//! Validate → Authorize → BuildRecord → AnchorLedger → ReplaceOffchain → Updated
//! ```
//! The anchor moves first because the ledger decides which hash is current.
//! Until the replace lands the anchor names a hash with no record; readers
//! treat that miss as transient. The replace is retried, and if a racing
//! update already superseded the old record the new one is inserted, so
//! whichever anchor wins has a record behind it.
//!
//! ## Read
//! Anchor lookup, record fetch, then decryption only when the password
//! matches. Otherwise the private data comes back in its encrypted form.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cipher::Cipher;
use crate::config::IdvaultConfig;
use crate::error::IdvaultError;
use crate::hasher;
use crate::ledger::{AnchorEntry, IdentityIssuer, LedgerAnchor};
use crate::reconcile::{self, ReconciliationReport};
use crate::record::{CipheredRecord, RecordBuilder, UserSubmission};
use crate::store::OffchainStore;

/// Steps of the create and update flows. Used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    CheckUnique,
    Authorize,
    BuildRecord,
    RegisterIdentity,
    StoreOffchain,
    AnchorLedger,
    ReplaceOffchain,
    Registered,
    Updated,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::CheckUnique => "check_unique",
            Self::Authorize => "authorize",
            Self::BuildRecord => "build_record",
            Self::RegisterIdentity => "register_identity",
            Self::StoreOffchain => "store_offchain",
            Self::AnchorLedger => "anchor_ledger",
            Self::ReplaceOffchain => "replace_offchain",
            Self::Registered => "registered",
            Self::Updated => "updated",
        };
        f.write_str(name)
    }
}

/// Private data as returned to a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "access", rename_all = "lowercase")]
pub enum PrivateData {
    /// The password matched; these are the plaintext fields.
    Disclosed { fields: Vec<String> },
    /// No or wrong password; the stored hex envelope, untouched.
    Redacted { ciphertext: String },
}

impl PrivateData {
    pub fn is_disclosed(&self) -> bool {
        matches!(self, Self::Disclosed { .. })
    }
}

/// A record as seen by a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    #[serde(rename = "userhash")]
    pub content_hash: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "privdata")]
    pub private_data: PrivateData,
}

/// Runs create, read, and update against a ledger and an off-chain store.
pub struct IdentityService<L, S, I> {
    ledger: L,
    store: S,
    issuer: I,
    builder: RecordBuilder,
    config: IdvaultConfig,
}

impl<L, S, I> IdentityService<L, S, I>
where
    L: LedgerAnchor,
    S: OffchainStore,
    I: IdentityIssuer,
{
    /// Assemble a service. Refuses an uninitialized cipher.
    pub fn new(
        ledger: L,
        store: S,
        issuer: I,
        cipher: Arc<Cipher>,
        config: IdvaultConfig,
    ) -> Result<Self, IdvaultError> {
        config.validate()?;
        if !cipher.is_initialized() {
            error!("refusing to start without an encryption key");
            return Err(IdvaultError::UninitializedKey);
        }
        let builder = RecordBuilder::new(cipher, config.record_encoding);
        Ok(Self {
            ledger,
            store,
            issuer,
            builder,
            config,
        })
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn issuer(&self) -> &I {
        &self.issuer
    }

    pub fn config(&self) -> &IdvaultConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Register a new user. Returns the stored record.
    pub fn create(&self, submission: &UserSubmission) -> Result<CipheredRecord, IdvaultError> {
        let username = submission.username.as_str();
        debug!(username, stage = %Stage::Validate, "create");
        submission.validate()?;

        debug!(username, stage = %Stage::CheckUnique, "create");
        match self.anchor_of(username) {
            Ok(_) => return Err(IdvaultError::DuplicateUser(username.to_string())),
            Err(IdvaultError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        debug!(username, stage = %Stage::BuildRecord, "create");
        let record = self.builder.build(submission)?;
        let content_hash = record.content_hash.clone();

        debug!(username, stage = %Stage::RegisterIdentity, "create");
        self.config
            .retry
            .run("register_user", || self.issuer.register_user(username))
            .map_err(|e| {
                error!(username, error = %e, "identity registration failed");
                IdvaultError::RegistrationFailed(e.to_string())
            })?;

        debug!(username, %content_hash, stage = %Stage::StoreOffchain, "create");
        self.store.insert(record.clone()).map_err(|e| match e {
            IdvaultError::DuplicateKey(_) => IdvaultError::DuplicateUser(username.to_string()),
            other => {
                error!(username, %content_hash, error = %other, "off-chain insert failed");
                other
            }
        })?;

        debug!(username, %content_hash, stage = %Stage::AnchorLedger, "create");
        if let Err(e) = self.put_anchor(username, &content_hash) {
            warn!(
                username,
                orphan_hash = %content_hash,
                error = %e,
                "anchor failed; off-chain record left orphaned"
            );
            return Err(match e {
                IdvaultError::AlreadyExists(_) => IdvaultError::DuplicateUser(username.to_string()),
                other => IdvaultError::LedgerAnchorFailed {
                    username: username.to_string(),
                    orphan_hash: content_hash,
                    reason: other.to_string(),
                },
            });
        }

        info!(username, %content_hash, stage = %Stage::Registered, "user registered");
        Ok(record)
    }

    /// `put` with retries. An `AlreadyExists` that names our own hash means
    /// an earlier, seemingly failed attempt did commit.
    fn put_anchor(&self, username: &str, content_hash: &str) -> Result<(), IdvaultError> {
        let mut attempted = false;
        self.config.retry.run("put_anchor", || {
            let first = !attempted;
            attempted = true;
            match self.ledger.put(username, content_hash) {
                Err(IdvaultError::AlreadyExists(key)) if !first => {
                    if self.ledger.get(username)? == content_hash {
                        Ok(())
                    } else {
                        Err(IdvaultError::AlreadyExists(key))
                    }
                }
                other => other,
            }
        })
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    /// Read a user. Private data is decrypted only for the right password.
    pub fn read(&self, username: &str, password: Option<&str>) -> Result<UserView, IdvaultError> {
        let content_hash = self.anchor_of(username)?;
        let record = self.fetch_anchored(username, &content_hash)?;
        self.view(record, password)
    }

    /// Read a record directly by content hash. Debug and admin use.
    pub fn read_by_hash(
        &self,
        content_hash: &str,
        password: Option<&str>,
    ) -> Result<UserView, IdvaultError> {
        let record = self.store.find_by_hash(content_hash)?;
        self.check_integrity(&record, None)?;
        self.view(record, password)
    }

    fn view(
        &self,
        record: CipheredRecord,
        password: Option<&str>,
    ) -> Result<UserView, IdvaultError> {
        let authorized =
            password.is_some_and(|pw| hasher::password_matches(pw, &record.password_hash));

        let private_data = if authorized {
            let fields = self.builder.open_private_fields(&record).map_err(|e| {
                error!(
                    username = %record.username,
                    content_hash = %record.content_hash,
                    error = %e,
                    "private data decrypt failed"
                );
                e
            })?;
            PrivateData::Disclosed { fields }
        } else {
            debug!(username = %record.username, "password missing or wrong; redacting");
            PrivateData::Redacted {
                ciphertext: record.private_data.clone(),
            }
        };

        Ok(UserView {
            content_hash: record.content_hash,
            username: record.username,
            email: record.email,
            private_data,
        })
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    /// Replace a user's record. `password` must match the current record.
    pub fn update(
        &self,
        username: &str,
        password: &str,
        submission: &UserSubmission,
    ) -> Result<CipheredRecord, IdvaultError> {
        debug!(username, stage = %Stage::Validate, "update");
        submission.validate()?;
        if submission.username != username {
            return Err(IdvaultError::Validation(
                "submission username does not match the user being updated".into(),
            ));
        }

        debug!(username, stage = %Stage::Authorize, "update");
        let old_hash = self.anchor_of(username)?;
        let current = self.fetch_anchored(username, &old_hash)?;
        if !hasher::password_matches(password, &current.password_hash) {
            warn!(username, "update refused: wrong password");
            return Err(IdvaultError::Unauthorized);
        }

        debug!(username, stage = %Stage::BuildRecord, "update");
        let record = self.builder.build(submission)?;
        let new_hash = record.content_hash.clone();

        debug!(username, %old_hash, %new_hash, stage = %Stage::AnchorLedger, "update");
        self.config
            .retry
            .run("update_anchor", || self.ledger.update(username, &new_hash))
            .map_err(|e| {
                error!(username, %old_hash, error = %e, "anchor update failed; nothing changed");
                e
            })?;

        debug!(username, %old_hash, %new_hash, stage = %Stage::ReplaceOffchain, "update");
        if let Err(e) = self.store_superseding(username, &old_hash, &record) {
            error!(
                username,
                anchored_hash = %new_hash,
                %old_hash,
                error = %e,
                "off-chain replace failed; anchor points at a missing record"
            );
            return Err(IdvaultError::OffchainWriteFailed {
                username: username.to_string(),
                anchored_hash: new_hash,
                reason: e.to_string(),
            });
        }

        info!(username, %old_hash, %new_hash, stage = %Stage::Updated, "user updated");
        Ok(record)
    }

    /// Write the record the anchor now names, with retries.
    ///
    /// `NotFound` on `old_hash` means a racing update already superseded it;
    /// the record is inserted instead so the anchor still has a target. A
    /// `DuplicateKey` on that insert means an earlier attempt landed.
    fn store_superseding(
        &self,
        username: &str,
        old_hash: &str,
        record: &CipheredRecord,
    ) -> Result<(), IdvaultError> {
        self.config.retry.run("replace_record", || {
            match self.store.replace(old_hash, record.clone()) {
                Err(IdvaultError::NotFound(_)) => {
                    warn!(
                        username,
                        %old_hash,
                        new_hash = %record.content_hash,
                        "superseded record already replaced; inserting"
                    );
                    match self.store.insert(record.clone()) {
                        Err(IdvaultError::DuplicateKey(_)) => Ok(()),
                        other => other,
                    }
                }
                other => other,
            }
        })
    }

    // -----------------------------------------------------------------------
    // Listing and reconciliation
    // -----------------------------------------------------------------------

    /// All off-chain records, fetched page by page. Debug and admin use.
    pub fn list_records(&self) -> Result<Vec<CipheredRecord>, IdvaultError> {
        let mut out = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self.list_records_page(after.as_deref(), self.config.page_size)?;
            let done = page.len() < self.config.page_size;
            after = page.last().map(|r| r.content_hash.clone());
            out.extend(page);
            if done {
                return Ok(out);
            }
        }
    }

    /// One page of off-chain records ordered by content hash.
    pub fn list_records_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CipheredRecord>, IdvaultError> {
        self.store.find_page(after, limit)
    }

    /// Anchors within the configured range.
    pub fn list_anchors(&self) -> Result<Vec<AnchorEntry>, IdvaultError> {
        let range = &self.config.anchor_range;
        let anchors = self
            .config
            .retry
            .run("range", || self.ledger.range(&range.start, &range.end))?;
        Ok(anchors.collect())
    }

    /// Compare both stores and report disagreements. Changes nothing.
    pub fn reconcile(&self) -> Result<ReconciliationReport, IdvaultError> {
        reconcile::reconcile(
            &self.ledger,
            &self.store,
            self.config.record_encoding,
            &self.config.anchor_range,
            self.config.page_size,
        )
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn anchor_of(&self, username: &str) -> Result<String, IdvaultError> {
        self.config
            .retry
            .run("get_anchor", || self.ledger.get(username))
    }

    /// Fetch the record an anchor names. A miss is retried and then
    /// reported as `Unavailable`: the anchor proves the user exists.
    fn fetch_anchored(
        &self,
        username: &str,
        content_hash: &str,
    ) -> Result<CipheredRecord, IdvaultError> {
        let mut misses = 0;
        let record = loop {
            match self.store.find_by_hash(content_hash) {
                Ok(record) => break record,
                Err(IdvaultError::NotFound(_)) if misses < self.config.offchain_miss_retries => {
                    misses += 1;
                    debug!(username, content_hash, misses, "anchored record not visible yet");
                    thread::sleep(Duration::from_millis(self.config.offchain_miss_backoff_ms));
                }
                Err(IdvaultError::NotFound(_)) => {
                    warn!(username, content_hash, "anchor names a record that is not stored");
                    return Err(IdvaultError::Unavailable(format!(
                        "record {} for {} not available",
                        content_hash, username
                    )));
                }
                Err(e) => return Err(e),
            }
        };
        self.check_integrity(&record, Some(username))?;
        Ok(record)
    }

    fn check_integrity(
        &self,
        record: &CipheredRecord,
        username: Option<&str>,
    ) -> Result<(), IdvaultError> {
        if let Some(username) = username {
            if record.username != username {
                error!(
                    username,
                    stored = %record.username,
                    content_hash = %record.content_hash,
                    "anchored record belongs to another user"
                );
                return Err(IdvaultError::Inconsistent(format!(
                    "record {} is not owned by {}",
                    record.content_hash, username
                )));
            }
        }
        if !record.verify_content_hash(self.builder.encoding()) {
            error!(content_hash = %record.content_hash, "record fields do not match its hash");
            return Err(IdvaultError::Inconsistent(format!(
                "record {} fails hash check",
                record.content_hash
            )));
        }
        Ok(())
    }
}

impl<L, S, I> fmt::Debug for IdentityService<L, S, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityService")
            .field("builder", &self.builder)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
