// Credential verification — one-way password hashing

use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Default PBKDF2 iteration count for newly hashed passwords
pub const DEFAULT_ROUNDS: u32 = 100_000;

/// Checks a plaintext credential against a stored hash
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, plaintext: &str, stored_hash: &str) -> bool;
}

/// PBKDF2-HMAC-SHA256 verifier.
///
/// Stored format: `pbkdf2-sha256$<rounds>$<salt hex>$<hash hex>`.
/// The round count travels with the hash, so raising `rounds` later does
/// not invalidate existing users.
#[derive(Debug, Clone)]
pub struct Pbkdf2Verifier {
    rounds: u32,
}

impl Pbkdf2Verifier {
    pub fn new() -> Self {
        Self::with_rounds(DEFAULT_ROUNDS)
    }

    pub fn with_rounds(rounds: u32) -> Self {
        Self {
            rounds: rounds.max(1),
        }
    }

    /// Hash a plaintext credential with a fresh random salt
    pub fn hash(&self, plaintext: &str) -> String {
        let salt: [u8; SALT_LEN] = rand::random();
        let mut out = derive(plaintext, &salt, self.rounds);
        let encoded = format!(
            "{}${}${}${}",
            SCHEME,
            self.rounds,
            hex::encode(salt),
            hex::encode(out)
        );
        out.zeroize();
        encoded
    }
}

impl Default for Pbkdf2Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialVerifier for Pbkdf2Verifier {
    fn verify(&self, plaintext: &str, stored_hash: &str) -> bool {
        let mut parts = stored_hash.split('$');
        let (Some(scheme), Some(rounds), Some(salt), Some(expected), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return false;
        };
        if scheme != SCHEME {
            return false;
        }
        let Ok(rounds) = rounds.parse::<u32>() else {
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
            return false;
        };
        if rounds == 0 || expected.len() != HASH_LEN {
            return false;
        }

        let mut actual = derive(plaintext, &salt, rounds);
        let matches: bool = actual[..].ct_eq(&expected[..]).into();
        actual.zeroize();
        matches
    }
}

fn derive(plaintext: &str, salt: &[u8], rounds: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(plaintext.as_bytes(), salt, rounds, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Pbkdf2Verifier {
        Pbkdf2Verifier::with_rounds(10)
    }

    #[test]
    fn test_hash_then_verify() {
        let verifier = fast();
        let hash = verifier.hash("correct horse");
        assert!(hash.starts_with("pbkdf2-sha256$10$"));
        assert!(verifier.verify("correct horse", &hash));
        assert!(!verifier.verify("wrong horse", &hash));
    }

    #[test]
    fn test_salts_differ() {
        let verifier = fast();
        assert_ne!(verifier.hash("pw"), verifier.hash("pw"));
    }

    #[test]
    fn test_rounds_read_from_hash() {
        let hash = Pbkdf2Verifier::with_rounds(7).hash("pw");
        assert!(fast().verify("pw", &hash));
    }

    #[test]
    fn test_malformed_hashes_rejected() {
        let verifier = fast();
        assert!(!verifier.verify("pw", ""));
        assert!(!verifier.verify("pw", "plaintext"));
        assert!(!verifier.verify("pw", "bcrypt$10$00$00"));
        assert!(!verifier.verify("pw", "pbkdf2-sha256$x$00$00"));
        assert!(!verifier.verify("pw", "pbkdf2-sha256$10$zz$00"));
        assert!(!verifier.verify("pw", "pbkdf2-sha256$10$00$00"));
        assert!(!verifier.verify("pw", "pbkdf2-sha256$0$00$00$extra"));
    }

    #[test]
    fn test_single_flipped_hash_byte_rejected() {
        let verifier = fast();
        let hash = verifier.hash("pw");
        let (prefix, digest) = hash.rsplit_once('$').unwrap();
        let mut bytes = hex::decode(digest).unwrap();
        bytes[HASH_LEN - 1] ^= 1;
        let tampered = format!("{}${}", prefix, hex::encode(bytes));
        assert!(!verifier.verify("pw", &tampered));
    }
}
