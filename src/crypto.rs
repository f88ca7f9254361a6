//! Low-level symmetric primitives.
//!
//! This module and `keys` are the only places in the crate that import
//! `ring`. Everything else hashes, seals, and opens through the functions
//! exposed here.
//!
//! Primitive choices:
//! - **Digest**: SHA-256
//! - **Payload cipher**: AES-256-GCM, one fresh data key per blob
//! - **Nonce**: 96-bit, drawn from `SystemRandom` for every seal

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::IdvaultError;

const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the AEAD nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Size of a data key in bytes.
pub const KEY_LEN: usize = 32;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// SHA-256 of `input`.
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let d = digest::digest(&digest::SHA256, input);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

/// Fill a fixed-size buffer from the system RNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], IdvaultError> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; N];
    rng.fill(&mut buf).map_err(|_| IdvaultError::RandomnessFailure)?;
    Ok(buf)
}

/// Seal `plaintext` under a data key.
///
/// # Layout of returned bytes
/// ```text
/// [ nonce (12 bytes) ][ ciphertext + GCM tag ]
/// ```
pub fn seal(key_bytes: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, IdvaultError> {
    let key = LessSafeKey::new(
        UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| IdvaultError::InvalidKey)?,
    );
    let nonce_bytes = random_bytes::<NONCE_LEN>()?;

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        aead::Aad::empty(),
        &mut in_out,
    )
    .map_err(|_| IdvaultError::EncryptionFailure)?;

    let mut output = Vec::with_capacity(NONCE_LEN + in_out.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&in_out);
    Ok(output)
}

/// Open bytes produced by [`seal`].
///
/// Any failure (short input, wrong key, flipped bit) is reported as
/// `DecryptionFailure` without partial plaintext.
pub fn open(key_bytes: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>, IdvaultError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(IdvaultError::DecryptionFailure);
    }
    let (nonce_bytes, body) = sealed.split_at(NONCE_LEN);
    let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes
        .try_into()
        .map_err(|_| IdvaultError::DecryptionFailure)?;

    let key = LessSafeKey::new(
        UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| IdvaultError::InvalidKey)?,
    );
    let mut payload = body.to_vec();
    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            aead::Aad::empty(),
            &mut payload,
        )
        .map_err(|_| IdvaultError::DecryptionFailure)?;

    Ok(plaintext.to_vec())
}
