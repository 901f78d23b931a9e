// Backup code verification for enrollment
// Codes are issued once by the primary application and stored only as salted
// SHA-256 digests; the device proves possession by re-entering all twelve.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

/// Number of backup codes issued per account
pub const CODE_COUNT: usize = 12;

/// A stored backup code: lowercase-hex SHA-256 of `plaintext + salt`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCode {
    pub hash: String,
    pub salt: String,
}

/// A freshly issued backup code, plaintext alongside its stored form.
/// The plaintext is shown to the user exactly once and never persisted.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub plaintext: String,
    pub stored: StoredCode,
}

/// Hash a code with its salt the way the primary application does at
/// registration time: SHA-256 over the concatenation, lowercase hex.
pub fn hash_with_salt(code: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify all entered codes against their stored counterparts.
///
/// Comparison is positional: `entered[i]` must hash to `stored[i].hash` under
/// `stored[i].salt`. Returns false on the first mismatch, on a wrong stored
/// count, or on any empty entry. Pure; retains no partial-success state.
pub fn verify_all(entered: &[String], stored: &[StoredCode]) -> bool {
    if stored.len() != CODE_COUNT || entered.len() != CODE_COUNT {
        debug!(
            entered = entered.len(),
            stored = stored.len(),
            "backup code set has wrong size"
        );
        return false;
    }

    for (i, (code, record)) in entered.iter().zip(stored.iter()).enumerate() {
        if code.is_empty() {
            debug!(position = i, "empty backup code entry");
            return false;
        }

        let digest = hash_with_salt(code, &record.salt);

        // Constant-time compare so verification timing leaks nothing about
        // how much of the digest matched.
        if digest.as_bytes().ct_eq(record.hash.as_bytes()).unwrap_u8() != 1 {
            debug!(position = i, "backup code mismatch");
            return false;
        }
    }

    true
}

/// Issue a fresh set of backup codes with per-code random salts.
///
/// Used by provisioning tooling and test fixtures; verification never calls
/// this. Codes are 8-character lowercase alphanumerics, salts 16 hex chars.
pub fn issue_codes(count: usize) -> Vec<IssuedCode> {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    (0..count)
        .map(|_| {
            let plaintext: String = (0..8)
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                .collect();
            let salt: String = hex::encode(rng.r#gen::<[u8; 8]>());
            let hash = hash_with_salt(&plaintext, &salt);

            IssuedCode {
                plaintext,
                stored: StoredCode { hash, salt },
            }
        })
        .collect()
}
