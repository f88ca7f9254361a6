//! Key ownership.
//!
//! This module owns two kinds of key material:
//! 1. The record keypair: an RSA keypair that wraps data keys with
//!    OAEP (SHA-256, empty label).
//! 2. Data keys: single-use AES-256 keys, one per encrypted blob.
//!
//! Both are opaque, non-cloneable, and zeroised on drop. Raw bytes never
//! leave the crate.

use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, KEY_LEN};
use crate::error::IdvaultError;

/// Smallest modulus accepted for the record keypair.
pub const MIN_RSA_BITS: usize = 1024;

// ---------------------------------------------------------------------------
// Data key
// ---------------------------------------------------------------------------

/// A fresh AES-256 key protecting exactly one blob.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct DataKey {
    bytes: [u8; KEY_LEN],
}

impl DataKey {
    pub(crate) fn generate() -> Result<Self, IdvaultError> {
        Ok(Self {
            bytes: crypto::random_bytes::<KEY_LEN>()?,
        })
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

// ---------------------------------------------------------------------------
// Record keypair
// ---------------------------------------------------------------------------

/// The asymmetric keypair that protects every data key.
///
/// `RsaPrivateKey` zeroises its own limbs on drop.
pub struct RecordKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RecordKeyPair {
    /// Generate a keypair with a modulus of `bits` bits.
    pub fn generate(bits: usize) -> Result<Self, IdvaultError> {
        if bits < MIN_RSA_BITS {
            return Err(IdvaultError::InvalidKey);
        }
        let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(|_| IdvaultError::InvalidKey)?;
        Ok(Self::from_private_key(private))
    }

    /// Adopt an existing private key, e.g. one restored from a KMS.
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self { private, public }
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.public.size() * 8
    }

    /// Hex SHA-256 of the public modulus. Safe to log.
    pub fn fingerprint(&self) -> String {
        hex::encode(crypto::sha256(&self.public.n().to_bytes_be()))
    }

    /// Encrypt a data key to the public half.
    pub(crate) fn wrap_key(&self, key: &DataKey) -> Result<Vec<u8>, IdvaultError> {
        self.public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_bytes())
            .map_err(|_| IdvaultError::EncryptionFailure)
    }

    /// Recover a data key with the private half.
    ///
    /// Uses blinded decryption; every failure maps to `DecryptionFailure`.
    pub(crate) fn unwrap_key(&self, wrapped: &[u8]) -> Result<DataKey, IdvaultError> {
        let mut raw = self
            .private
            .decrypt_blinded(&mut OsRng, Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| IdvaultError::DecryptionFailure)?;

        let result = if raw.len() == KEY_LEN {
            let mut bytes = [0u8; KEY_LEN];
            bytes.copy_from_slice(&raw);
            Ok(DataKey { bytes })
        } else {
            Err(IdvaultError::DecryptionFailure)
        };
        raw.zeroize();
        result
    }
}

impl std::fmt::Debug for RecordKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordKeyPair")
            .field("bits", &self.bits())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
