//! Error types for idvault.
//!
//! Every error variant is a distinct failure mode of the two-store identity
//! protocol. Error messages are intentionally minimal: they name *what*
//! failed and which identity or hash was involved, never the plaintext,
//! password, or key material that was being handled.

use std::fmt;

/// The single error type for all idvault operations.
#[derive(Debug)]
pub enum IdvaultError {
    /// Caller input was malformed (empty username, missing password, ...).
    Validation(String),

    /// The Cipher keypair has not been generated yet. Fatal at startup.
    UninitializedKey,

    /// A second initializer tried to install a keypair into a Cipher that
    /// already holds one. The existing key is kept.
    KeyAlreadyInitialized,

    /// Key material was invalid (wrong length, unusable modulus size, ...).
    InvalidKey,

    /// Encryption failed inside the RSA or AEAD primitive.
    EncryptionFailure,

    /// Decryption failed. This includes: wrong key, corrupted or truncated
    /// ciphertext, and failed padding or tag checks.
    DecryptionFailure,

    /// The system's random number generator failed to produce bytes.
    RandomnessFailure,

    /// A ciphered record could not be built from a submission.
    BuildFailed(Box<IdvaultError>),

    /// The external identity issuer refused to register the user.
    RegistrationFailed(String),

    /// The supplied password does not match the stored password hash.
    Unauthorized,

    /// A user with this username (or identical record) already exists.
    DuplicateUser(String),

    /// An off-chain record with this content hash already exists.
    DuplicateKey(String),

    /// The ledger already holds an anchor for this username.
    AlreadyExists(String),

    /// No anchor or record exists for the given username or hash.
    NotFound(String),

    /// A store or ledger was temporarily unreachable. Safe to retry.
    Unavailable(String),

    /// The ledger permanently rejected the call (endorsement or validation).
    Rejected(String),

    /// The off-chain record was written but the ledger anchor was not. The
    /// orphan record is left in place.
    LedgerAnchorFailed {
        username: String,
        orphan_hash: String,
        reason: String,
    },

    /// The ledger anchor was moved but the off-chain record could not be
    /// replaced. The anchor points at a hash that has no record yet.
    OffchainWriteFailed {
        username: String,
        anchored_hash: String,
        reason: String,
    },

    /// The ledger and the off-chain store disagree. Requires an operator.
    Inconsistent(String),

    /// A persistent store could not read or write its backing file.
    Storage(String),

    /// Configuration was missing or invalid.
    Config(String),
}

impl IdvaultError {
    /// Whether the failed call may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl fmt::Display for IdvaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(reason) => write!(f, "invalid input: {}", reason),
            Self::UninitializedKey => write!(f, "encryption key not initialized"),
            Self::KeyAlreadyInitialized => write!(f, "encryption key already initialized"),
            Self::InvalidKey => write!(f, "invalid key"),
            Self::EncryptionFailure => write!(f, "encryption failed"),
            Self::DecryptionFailure => write!(f, "decryption failed"),
            Self::RandomnessFailure => write!(f, "randomness source failed"),
            Self::BuildFailed(cause) => write!(f, "record build failed: {}", cause),
            Self::RegistrationFailed(reason) => {
                write!(f, "identity registration failed: {}", reason)
            }
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::DuplicateUser(username) => write!(f, "user already exists: {}", username),
            Self::DuplicateKey(hash) => write!(f, "record already exists: {}", hash),
            Self::AlreadyExists(key) => write!(f, "anchor already exists: {}", key),
            Self::NotFound(key) => write!(f, "not found: {}", key),
            Self::Unavailable(reason) => write!(f, "unavailable: {}", reason),
            Self::Rejected(reason) => write!(f, "rejected: {}", reason),
            Self::LedgerAnchorFailed {
                username,
                orphan_hash,
                reason,
            } => write!(
                f,
                "ledger anchor failed for {} (orphan record {}): {}",
                username, orphan_hash, reason
            ),
            Self::OffchainWriteFailed {
                username,
                anchored_hash,
                reason,
            } => write!(
                f,
                "off-chain write failed for {} (anchored {}): {}",
                username, anchored_hash, reason
            ),
            Self::Inconsistent(reason) => write!(f, "stores inconsistent: {}", reason),
            Self::Storage(reason) => write!(f, "storage error: {}", reason),
            Self::Config(reason) => write!(f, "invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for IdvaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BuildFailed(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// Shorthand for results carrying an [`IdvaultError`].
pub type Result<T> = std::result::Result<T, IdvaultError>;
