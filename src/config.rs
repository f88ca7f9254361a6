//! Service configuration.
//!
//! Loaded from JSON. Every field has a default, so `{}` is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IdvaultError;
use crate::keys::MIN_RSA_BITS;
use crate::record::RecordEncoding;
use crate::retry::RetryPolicy;

/// Bounds for anchor enumeration. Empty means open-ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorRangeConfig {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdvaultConfig {
    /// Modulus size of the record keypair.
    pub rsa_bits: usize,
    pub record_encoding: RecordEncoding,
    /// Applied to every ledger call.
    pub retry: RetryPolicy,
    /// Extra off-chain lookups when an anchored hash is not found yet.
    pub offchain_miss_retries: u32,
    pub offchain_miss_backoff_ms: u64,
    pub anchor_range: AnchorRangeConfig,
    pub page_size: usize,
}

impl Default for IdvaultConfig {
    fn default() -> Self {
        Self {
            rsa_bits: 2048,
            record_encoding: RecordEncoding::default(),
            retry: RetryPolicy::default(),
            offchain_miss_retries: 2,
            offchain_miss_backoff_ms: 25,
            anchor_range: AnchorRangeConfig::default(),
            page_size: 100,
        }
    }
}

impl IdvaultConfig {
    pub fn from_json_str(json: &str) -> Result<Self, IdvaultError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| IdvaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IdvaultError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| IdvaultError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), IdvaultError> {
        if self.rsa_bits < MIN_RSA_BITS {
            return Err(IdvaultError::Config(format!(
                "rsa_bits must be at least {}",
                MIN_RSA_BITS
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(IdvaultError::Config("retry.max_attempts must be >= 1".into()));
        }
        if self.page_size == 0 {
            return Err(IdvaultError::Config("page_size must be >= 1".into()));
        }
        let range = &self.anchor_range;
        if !range.start.is_empty() && !range.end.is_empty() && range.start > range.end {
            return Err(IdvaultError::Config("anchor_range start is after end".into()));
        }
        Ok(())
    }
}
