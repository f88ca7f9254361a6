//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

use idvault::ledger::AnchorRange;
use idvault::retry::RetryPolicy;
use idvault::{
    Cipher, CipheredRecord, IdentityService, IdvaultConfig, IdvaultError, LedgerAnchor,
    MemoryIssuer, MemoryLedger, MemoryStore, OffchainStore, UserSubmission, MIN_RSA_BITS,
};

/// One keypair per test binary; generating RSA keys is slow.
pub fn shared_cipher() -> Arc<Cipher> {
    static CIPHER: OnceLock<Arc<Cipher>> = OnceLock::new();
    CIPHER
        .get_or_init(|| {
            let cipher = Cipher::new(MIN_RSA_BITS);
            cipher.init().unwrap();
            Arc::new(cipher)
        })
        .clone()
}

pub fn test_config() -> IdvaultConfig {
    IdvaultConfig {
        rsa_bits: MIN_RSA_BITS,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            deadline_ms: 1_000,
        },
        offchain_miss_retries: 1,
        offchain_miss_backoff_ms: 1,
        page_size: 2,
        ..IdvaultConfig::default()
    }
}

pub fn submission(username: &str, email: &str, password: &str, fields: &[&str]) -> UserSubmission {
    UserSubmission::new(
        username,
        email,
        password,
        fields.iter().map(|f| f.to_string()).collect(),
    )
}

pub type MemoryService = IdentityService<MemoryLedger, MemoryStore, MemoryIssuer>;

pub fn memory_service() -> MemoryService {
    IdentityService::new(
        MemoryLedger::new(),
        MemoryStore::new(),
        MemoryIssuer::new(),
        shared_cipher(),
        test_config(),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Which ledger call a scripted fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    Get,
    Put,
    Update,
    Range,
}

/// Scripted failure, consumed by the next matching call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail with `Unavailable` without touching the ledger.
    Unavailable,
    /// Fail with `Rejected` without touching the ledger.
    Rejected,
    /// Apply the call, then report `Unavailable` anyway.
    CommitThenUnavailable,
}

/// Wraps a `MemoryLedger` and fails calls on demand.
#[derive(Default)]
pub struct FlakyLedger {
    pub inner: MemoryLedger,
    faults: Mutex<VecDeque<(LedgerOp, Fault)>>,
    calls: Mutex<Vec<LedgerOp>>,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, op: LedgerOp, fault: Fault) {
        self.faults.lock().unwrap().push_back((op, fault));
    }

    pub fn calls(&self, op: LedgerOp) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    fn take_fault(&self, op: LedgerOp) -> Option<Fault> {
        self.calls.lock().unwrap().push(op);
        let mut faults = self.faults.lock().unwrap();
        let pos = faults.iter().position(|(o, _)| *o == op)?;
        faults.remove(pos).map(|(_, f)| f)
    }

    fn apply<T>(
        &self,
        op: LedgerOp,
        call: impl FnOnce() -> Result<T, IdvaultError>,
    ) -> Result<T, IdvaultError> {
        match self.take_fault(op) {
            None => call(),
            Some(Fault::Unavailable) => Err(IdvaultError::Unavailable("peer down".into())),
            Some(Fault::Rejected) => Err(IdvaultError::Rejected("endorsement failed".into())),
            Some(Fault::CommitThenUnavailable) => {
                call()?;
                Err(IdvaultError::Unavailable("response lost".into()))
            }
        }
    }
}

impl LedgerAnchor for FlakyLedger {
    fn get(&self, username: &str) -> Result<String, IdvaultError> {
        self.apply(LedgerOp::Get, || self.inner.get(username))
    }

    fn put(&self, username: &str, content_hash: &str) -> Result<(), IdvaultError> {
        self.apply(LedgerOp::Put, || self.inner.put(username, content_hash))
    }

    fn update(&self, username: &str, content_hash: &str) -> Result<(), IdvaultError> {
        self.apply(LedgerOp::Update, || self.inner.update(username, content_hash))
    }

    fn range(&self, start: &str, end: &str) -> Result<AnchorRange, IdvaultError> {
        self.apply(LedgerOp::Range, || self.inner.range(start, end))
    }
}

/// Wraps a `MemoryStore`; can be told to fail upcoming replaces.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing_replaces: Mutex<usize>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_replace(&self) {
        self.fail_replaces(1);
    }

    pub fn fail_replaces(&self, count: usize) {
        *self.failing_replaces.lock().unwrap() += count;
    }
}

impl OffchainStore for FlakyStore {
    fn find_by_hash(&self, content_hash: &str) -> Result<CipheredRecord, IdvaultError> {
        self.inner.find_by_hash(content_hash)
    }

    fn insert(&self, record: CipheredRecord) -> Result<(), IdvaultError> {
        self.inner.insert(record)
    }

    fn replace(&self, old_hash: &str, record: CipheredRecord) -> Result<(), IdvaultError> {
        let mut failing = self.failing_replaces.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return Err(IdvaultError::Unavailable("mongo down".into()));
        }
        drop(failing);
        self.inner.replace(old_hash, record)
    }

    fn find_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CipheredRecord>, IdvaultError> {
        self.inner.find_page(after, limit)
    }
}
