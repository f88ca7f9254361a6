//! Content hashing.
//!
//! All hashes are lowercase hex SHA-256, 64 characters long. Two ways of
//! combining record fields are offered:
//!
//! - [`hash_concatenated`] joins the fields with no separator. This matches
//!   records written by earlier deployments, but `("ab", "c")` and
//!   `("a", "bc")` hash identically.
//! - [`hash_length_prefixed`] prefixes a domain tag and each field's length,
//!   so distinct field tuples never share an input.

use subtle::ConstantTimeEq;

use crate::crypto;

/// Length of every hash returned by this module.
pub const HASH_HEX_LEN: usize = 64;

const FIELD_DOMAIN: &[u8] = b"idvault.record.v1";

/// Hash arbitrary bytes.
pub fn hash(input: &[u8]) -> String {
    hex::encode(crypto::sha256(input))
}

/// Hash a password for storage or comparison.
pub fn hash_password(password: &str) -> String {
    hash(password.as_bytes())
}

/// Hash fields joined with no delimiter.
pub fn hash_concatenated(fields: &[&str]) -> String {
    hash(fields.concat().as_bytes())
}

/// Hash fields as `tag ‖ (len_be64 ‖ bytes)*`.
pub fn hash_length_prefixed(fields: &[&str]) -> String {
    let total: usize = fields.iter().map(|f| f.len() + 8).sum();
    let mut buf = Vec::with_capacity(FIELD_DOMAIN.len() + total);
    buf.extend_from_slice(FIELD_DOMAIN);
    for field in fields {
        buf.extend_from_slice(&(field.len() as u64).to_be_bytes());
        buf.extend_from_slice(field.as_bytes());
    }
    hash(&buf)
}

/// Compare a supplied password against a stored hash in constant time.
pub fn password_matches(password: &str, stored_hash: &str) -> bool {
    let supplied = hash_password(password);
    supplied.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

/// Whether `s` looks like a hash produced by this module.
pub fn is_hash(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
