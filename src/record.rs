//! User submissions and ciphered records.
//!
//! A [`UserSubmission`] is what a client sends; it carries a plaintext
//! password and plaintext private fields and is never persisted. The
//! [`RecordBuilder`] turns it into a [`CipheredRecord`], the only shape that
//! reaches the off-chain store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::Cipher;
use crate::error::IdvaultError;
use crate::hasher;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// How private fields are serialized and record fields are hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordEncoding {
    /// `[a, b]` private data and delimiter-free content hashing. Byte
    /// compatible with records from earlier deployments.
    Legacy,
    /// JSON-array private data and length-prefixed content hashing.
    #[default]
    Canonical,
}

impl RecordEncoding {
    /// Serialize private fields into the string that gets encrypted.
    pub fn encode_private_fields(&self, fields: &[String]) -> Result<String, IdvaultError> {
        match self {
            Self::Legacy => Ok(format!("[{}]", fields.join(", "))),
            Self::Canonical => serde_json::to_string(fields)
                .map_err(|e| IdvaultError::Validation(format!("private fields: {}", e))),
        }
    }

    /// Inverse of [`encode_private_fields`](Self::encode_private_fields).
    ///
    /// Legacy decoding splits on `", "` and so cannot restore a field that
    /// itself contains that separator.
    pub fn decode_private_fields(&self, serialized: &str) -> Result<Vec<String>, IdvaultError> {
        match self {
            Self::Legacy => {
                let inner = serialized
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .ok_or(IdvaultError::DecryptionFailure)?;
                if inner.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(inner.split(", ").map(str::to_string).collect())
                }
            }
            Self::Canonical => {
                serde_json::from_str(serialized).map_err(|_| IdvaultError::DecryptionFailure)
            }
        }
    }

    /// Content hash over the four stored fields.
    pub fn content_hash(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        private_data_hex: &str,
    ) -> String {
        let fields = [username, email, password_hash, private_data_hex];
        match self {
            Self::Legacy => hasher::hash_concatenated(&fields),
            Self::Canonical => hasher::hash_length_prefixed(&fields),
        }
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// A raw registration or update request. Zeroised on drop.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct UserSubmission {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "priv_data", default)]
    pub private_fields: Vec<String>,
}

impl UserSubmission {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        private_fields: Vec<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            private_fields,
        }
    }

    /// Reject submissions that can never form a valid record.
    pub fn validate(&self) -> Result<(), IdvaultError> {
        if self.username.is_empty() {
            return Err(IdvaultError::Validation("username is empty".into()));
        }
        if self.username.chars().any(char::is_whitespace) {
            return Err(IdvaultError::Validation(
                "username contains whitespace".into(),
            ));
        }
        if self.email.is_empty() {
            return Err(IdvaultError::Validation("email is empty".into()));
        }
        if self.password.is_empty() {
            return Err(IdvaultError::Validation("password is empty".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for UserSubmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSubmission")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("private_fields", &self.private_fields.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Ciphered record
// ---------------------------------------------------------------------------

/// The off-chain record. `content_hash` is its primary key and never
/// changes; an edit produces a new record under a new hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipheredRecord {
    #[serde(rename = "userhash")]
    pub content_hash: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "hashedpassword")]
    pub password_hash: String,
    /// Hex-encoded envelope.
    #[serde(rename = "privdata")]
    pub private_data: String,
}

impl CipheredRecord {
    /// Decode the stored hex back into envelope bytes.
    pub fn encrypted_private_data(&self) -> Result<Vec<u8>, IdvaultError> {
        hex::decode(&self.private_data).map_err(|_| IdvaultError::DecryptionFailure)
    }

    /// Recompute the content hash from the stored fields.
    pub fn expected_hash(&self, encoding: RecordEncoding) -> String {
        encoding.content_hash(
            &self.username,
            &self.email,
            &self.password_hash,
            &self.private_data,
        )
    }

    /// Whether the stored hash matches the stored fields.
    pub fn verify_content_hash(&self, encoding: RecordEncoding) -> bool {
        self.expected_hash(encoding) == self.content_hash
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Turns submissions into ciphered records.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    cipher: Arc<Cipher>,
    encoding: RecordEncoding,
}

impl RecordBuilder {
    pub fn new(cipher: Arc<Cipher>, encoding: RecordEncoding) -> Self {
        Self { cipher, encoding }
    }

    pub fn encoding(&self) -> RecordEncoding {
        self.encoding
    }

    /// Build a complete record or fail with `BuildFailed`.
    pub fn build(&self, submission: &UserSubmission) -> Result<CipheredRecord, IdvaultError> {
        let wrap = |e: IdvaultError| IdvaultError::BuildFailed(Box::new(e));

        let mut serialized = self
            .encoding
            .encode_private_fields(&submission.private_fields)
            .map_err(wrap)?;
        let encrypted = self.cipher.encrypt(serialized.as_bytes());
        serialized.zeroize();
        let private_data = hex::encode(encrypted.map_err(wrap)?);

        let password_hash = hasher::hash_password(&submission.password);
        let content_hash = self.encoding.content_hash(
            &submission.username,
            &submission.email,
            &password_hash,
            &private_data,
        );

        Ok(CipheredRecord {
            content_hash,
            username: submission.username.clone(),
            email: submission.email.clone(),
            password_hash,
            private_data,
        })
    }

    /// Decrypt and decode a record's private fields.
    pub fn open_private_fields(
        &self,
        record: &CipheredRecord,
    ) -> Result<Vec<String>, IdvaultError> {
        let envelope = record.encrypted_private_data()?;
        let mut plaintext = self.cipher.decrypt(&envelope)?;
        let decoded = std::str::from_utf8(&plaintext)
            .map_err(|_| IdvaultError::DecryptionFailure)
            .and_then(|s| self.encoding.decode_private_fields(s));
        plaintext.zeroize();
        decoded
    }
}
