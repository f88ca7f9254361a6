//! Envelope encryption of private-data blobs.
//!
//! A `Cipher` owns one slot for the record keypair. The slot is filled
//! exactly once by [`Cipher::init`] (or [`Cipher::install`]); every encrypt
//! or decrypt before that fails with `UninitializedKey`, and a late second
//! initializer fails with `KeyAlreadyInitialized` instead of replacing the
//! key that is already protecting data.
//!
//! ## Envelope layout
//!
//! ```text
//! [ wrapped key len (u16 BE) ][ RSA-OAEP wrapped data key ][ nonce (12) ][ AES-GCM ciphertext + tag ]
//! ```
//!
//! The data key is fresh per call, as are the OAEP seed and the GCM nonce,
//! so two encryptions of the same plaintext never produce the same bytes.

use std::sync::OnceLock;

use tracing::{debug, info};

use crate::crypto;
use crate::error::IdvaultError;
use crate::keys::{DataKey, RecordKeyPair};

const LEN_PREFIX: usize = 2;

/// Encrypts and decrypts private data under a single process keypair.
pub struct Cipher {
    bits: usize,
    keypair: OnceLock<RecordKeyPair>,
}

impl Cipher {
    /// Create an uninitialized cipher that will generate a `bits`-bit keypair.
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            keypair: OnceLock::new(),
        }
    }

    /// Create a cipher that already holds `keypair`.
    pub fn with_keypair(keypair: RecordKeyPair) -> Self {
        let cipher = Self::new(keypair.bits());
        // A freshly created lock is always empty.
        let _ = cipher.keypair.set(keypair);
        cipher
    }

    /// Generate the keypair.
    ///
    /// Fails with `KeyAlreadyInitialized` if the slot is already filled,
    /// including when another thread won a concurrent initialization.
    pub fn init(&self) -> Result<(), IdvaultError> {
        if self.keypair.get().is_some() {
            return Err(IdvaultError::KeyAlreadyInitialized);
        }
        let keypair = RecordKeyPair::generate(self.bits)?;
        self.install(keypair)
    }

    /// Install an externally sourced keypair into an empty slot.
    pub fn install(&self, keypair: RecordKeyPair) -> Result<(), IdvaultError> {
        let fingerprint = keypair.fingerprint();
        self.keypair
            .set(keypair)
            .map_err(|_| IdvaultError::KeyAlreadyInitialized)?;
        info!(bits = self.bits, %fingerprint, "record keypair initialized");
        Ok(())
    }

    /// Whether a keypair is present.
    pub fn is_initialized(&self) -> bool {
        self.keypair.get().is_some()
    }

    /// Fingerprint of the active keypair, if any.
    pub fn fingerprint(&self) -> Option<String> {
        self.keypair.get().map(RecordKeyPair::fingerprint)
    }

    fn keypair(&self) -> Result<&RecordKeyPair, IdvaultError> {
        self.keypair.get().ok_or(IdvaultError::UninitializedKey)
    }

    /// Encrypt `plaintext` into a self-describing envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, IdvaultError> {
        let keypair = self.keypair()?;
        let data_key = DataKey::generate()?;
        let wrapped = keypair.wrap_key(&data_key)?;
        let body = crypto::seal(data_key.as_bytes(), plaintext)?;

        let wrapped_len =
            u16::try_from(wrapped.len()).map_err(|_| IdvaultError::EncryptionFailure)?;
        let mut out = Vec::with_capacity(LEN_PREFIX + wrapped.len() + body.len());
        out.extend_from_slice(&wrapped_len.to_be_bytes());
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&body);

        debug!(plaintext_len = plaintext.len(), envelope_len = out.len(), "sealed envelope");
        Ok(out)
    }

    /// Open an envelope produced by [`Cipher::encrypt`].
    ///
    /// Truncation, a foreign key, and a corrupted body all surface as the
    /// same `DecryptionFailure`.
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, IdvaultError> {
        let keypair = self.keypair()?;
        if envelope.len() < LEN_PREFIX {
            return Err(IdvaultError::DecryptionFailure);
        }
        let (prefix, rest) = envelope.split_at(LEN_PREFIX);
        let wrapped_len = u16::from_be_bytes([prefix[0], prefix[1]]) as usize;
        if rest.len() < wrapped_len {
            return Err(IdvaultError::DecryptionFailure);
        }
        let (wrapped, body) = rest.split_at(wrapped_len);

        let data_key = keypair.unwrap_key(wrapped)?;
        crypto::open(data_key.as_bytes(), body)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("bits", &self.bits)
            .field("keypair", &self.keypair.get())
            .finish()
    }
}
