//! Single-use recovery codes for accounts that lost their authenticator.
//!
//! Codes are high-entropy, so a plain SHA-256 digest is enough to store them
//! and lets the store look a presented code up by hash.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

pub const RECOVERY_CODE_COUNT: usize = 10;
const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Plaintext codes for the user and the digests for the store.
#[derive(Debug)]
pub struct RecoveryCodeBatch {
    pub codes: Vec<String>,
    pub code_hashes: Vec<Vec<u8>>,
}

impl RecoveryCodeBatch {
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn generate() -> Result<Self, rand::Error> {
        Self::generate_with_rng(&mut OsRng)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self, rand::Error> {
        let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        while codes.len() < RECOVERY_CODE_COUNT {
            let normalized = random_code(rng)?;
            let hash = digest(&normalized);
            if code_hashes.contains(&hash) {
                continue;
            }
            codes.push(group(&normalized));
            code_hashes.push(hash);
        }
        Ok(Self { codes, code_hashes })
    }
}

/// Uppercase and strip separators. `None` if the input cannot be a recovery code.
#[must_use]
pub fn normalize_recovery_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    let valid = normalized.len() == RECOVERY_CODE_LEN
        && normalized
            .bytes()
            .all(|ch| RECOVERY_CODE_ALPHABET.contains(&ch));
    valid.then_some(normalized)
}

/// Digest of a presented code, or `None` when it is not shaped like one.
#[must_use]
pub fn hash_recovery_code(input: &str) -> Option<Vec<u8>> {
    normalize_recovery_code(input).map(|normalized| digest(&normalized))
}

fn digest(normalized: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.finalize().to_vec()
}

fn group(normalized: &str) -> String {
    let mut out = String::with_capacity(RECOVERY_CODE_LEN + 2);
    for (idx, ch) in normalized.chars().enumerate() {
        if idx > 0 && idx % RECOVERY_CODE_GROUP_SIZE == 0 {
            out.push('-');
        }
        out.push(ch);
    }
    out
}

fn random_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String, rand::Error> {
    let mut raw = [0u8; RECOVERY_CODE_LEN];
    rng.try_fill_bytes(&mut raw)?;
    // 256 is a multiple of the alphabet size, so the modulo is unbiased.
    Ok(raw
        .iter()
        .map(|byte| RECOVERY_CODE_ALPHABET[usize::from(*byte) % RECOVERY_CODE_ALPHABET.len()] as char)
        .collect())
}
