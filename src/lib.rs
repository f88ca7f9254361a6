//! # idvault
//!
//! Ledger-anchored identity records with an encrypted off-chain store.
//!
//! A user's full record lives in a mutable off-chain store, with private
//! fields sealed under envelope encryption and the password kept only as a
//! hash. The ledger holds a single anchor per user: the content hash of the
//! current record. [`IdentityService`] keeps the two in step on create,
//! read, and update, and [`reconcile`](reconcile::reconcile) reports where
//! they have drifted apart.
//!
//! ## Public API
//!
//! The symmetric primitives (`crypto`) and raw key handling (`keys`) stay
//! crate-private apart from [`RecordKeyPair`]. Everything a caller needs is
//! re-exported here.

pub(crate) mod crypto;
pub(crate) mod keys;

pub mod cipher;
pub mod config;
pub mod error;
pub mod hasher;
pub mod ledger;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod service;
pub mod store;

use std::sync::Arc;

pub use cipher::Cipher;
pub use config::IdvaultConfig;
pub use error::{IdvaultError, Result};
pub use keys::{RecordKeyPair, MIN_RSA_BITS};
pub use ledger::{IdentityIssuer, LedgerAnchor, MemoryIssuer, MemoryLedger};
pub use record::{CipheredRecord, RecordBuilder, RecordEncoding, UserSubmission};
pub use service::{IdentityService, PrivateData, UserView};
pub use store::{FileStore, MemoryStore, OffchainStore};

/// Create a cipher and generate its keypair.
///
/// This is the startup step every deployment runs once before serving.
/// In production the keypair should come from a KMS and be handed to
/// [`Cipher::install`] instead.
pub fn init_cipher(config: &IdvaultConfig) -> Result<Arc<Cipher>> {
    config.validate()?;
    let cipher = Cipher::new(config.rsa_bits);
    cipher.init()?;
    Ok(Arc::new(cipher))
}
