/// Password Hashing and Verification
///
/// Digests are PBKDF2-HMAC-SHA512 with a random per-password salt, stored
/// as `<saltHex>:<derivedKeyHex>:<iterations>`. The parameters travel with
/// the digest, so verification keeps working if the defaults change later.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha512;

use crate::error::{AppError, ValidationError};

type HmacSha512 = Hmac<Sha512>;

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;
const SALT_LENGTH: usize = 16;
const DERIVED_KEY_LENGTH: usize = 64;
const ITERATIONS: u32 = 120_000;

/// Passwords nobody should be allowed to keep, matched case-insensitively.
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "12345678",
    "123456789",
    "qwerty123",
    "letmein123",
    "iloveyou1",
    "admin123",
    "welcome1",
];

/// Result of a strength check; `errors` lists every unmet rule.
#[derive(Debug, Clone)]
pub struct StrengthReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// PBKDF2 with HMAC-SHA512 as the PRF. A 64-byte derived key is exactly
/// one SHA-512 block, so no block iteration is needed.
fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> Result<Vec<u8>, AppError> {
    let prf = |data: &[u8]| -> Result<Vec<u8>, AppError> {
        let mut mac = HmacSha512::new_from_slice(password)
            .map_err(|e| AppError::Internal(format!("HMAC init failed: {}", e)))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    };

    // U1 = PRF(P, S || INT_32_BE(1))
    let mut block = Vec::with_capacity(salt.len() + 4);
    block.extend_from_slice(salt);
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut u = prf(&block)?;
    let mut dk = u.clone();

    for _ in 1..iterations {
        u = prf(&u)?;
        for (d, b) in dk.iter_mut().zip(u.iter()) {
            *d ^= b;
        }
    }

    Ok(dk)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Hash a password for storage.
///
/// Only the length gate is applied here; full policy enforcement lives in
/// [`validate_strength`] so callers can surface every violation at once.
///
/// # Errors
/// Returns a weak-input validation error if the password is shorter than 8
/// or longer than 128 characters.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    // Bounds are in characters, not bytes; multibyte text counts the same.
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(ValidationError::WeakPassword(vec![
            format!("must be at least {} characters", MIN_PASSWORD_LENGTH),
        ])));
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(AppError::Validation(ValidationError::WeakPassword(vec![
            format!("must be at most {} characters", MAX_PASSWORD_LENGTH),
        ])));
    }

    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);

    let dk = derive_key(password.as_bytes(), &salt, ITERATIONS)?;

    Ok(format!(
        "{}:{}:{}",
        hex::encode(salt),
        hex::encode(dk),
        ITERATIONS
    ))
}

/// Verify a password against a stored digest.
///
/// The salt and iteration count are read back out of the digest itself.
/// Any parse failure of the stored value yields `false`, never an error:
/// a corrupt digest must behave like a wrong password.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split(':');
    let (salt_hex, dk_hex, iter_str) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(s), Some(d), Some(i), None) => (s, d, i),
        _ => return false,
    };

    let salt = match hex::decode(salt_hex) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let expected = match hex::decode(dk_hex) {
        Ok(d) => d,
        Err(_) => return false,
    };
    let iterations: u32 = match iter_str.parse() {
        Ok(i) if i > 0 => i,
        _ => return false,
    };

    match derive_key(password.as_bytes(), &salt, iterations) {
        Ok(dk) => constant_time_eq(&dk, &expected),
        Err(_) => false,
    }
}

/// Check a candidate password against the full policy.
///
/// Pure function; collects every violation rather than stopping at the
/// first so the client can show all of them.
pub fn validate_strength(password: &str) -> StrengthReport {
    let mut errors = Vec::new();

    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        errors.push(format!("must be at least {} characters", MIN_PASSWORD_LENGTH));
    }
    if length > MAX_PASSWORD_LENGTH {
        errors.push(format!("must be at most {} characters", MAX_PASSWORD_LENGTH));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        errors.push("must contain an uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        errors.push("must contain a lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_numeric()) {
        errors.push("must contain a digit".to_string());
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        errors.push("must contain a symbol".to_string());
    }
    if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        errors.push("is too common".to_string());
    }

    StrengthReport {
        valid: errors.is_empty(),
        errors,
    }
}
