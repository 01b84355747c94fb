//! Password verifier stored in the clear vault header
//!
//! `verifier = BLAKE3-keyed(verifier_key, DOMAIN ‖ vault_id)`. Checking a
//! password costs one KDF pass and never touches the registry blob.

use crate::keys::DerivedKey;
use crate::ID_SIZE;

const DOMAIN: &[u8] = b"strata-vault-verifier-v1";

pub fn compute_verifier(verifier_key: &DerivedKey, vault_id: &[u8; ID_SIZE]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new_keyed(verifier_key.as_bytes());
    hasher.update(DOMAIN);
    hasher.update(vault_id);
    hasher.finalize()
}

/// Constant-time comparison against a hex verifier. Malformed hex never verifies.
pub fn verify(verifier_key: &DerivedKey, vault_id: &[u8; ID_SIZE], expected_hex: &str) -> bool {
    match blake3::Hash::from_hex(expected_hex) {
        // blake3::Hash equality is constant time
        Ok(expected) => compute_verifier(verifier_key, vault_id) == expected,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_matches_only_same_key_and_vault() {
        let key = DerivedKey::from_bytes([5u8; 32]);
        let vault = [1u8; ID_SIZE];
        let hex = compute_verifier(&key, &vault).to_hex().to_string();

        assert!(verify(&key, &vault, &hex));
        assert!(!verify(&DerivedKey::from_bytes([6u8; 32]), &vault, &hex));
        assert!(!verify(&key, &[2u8; ID_SIZE], &hex));
    }

    #[test]
    fn test_malformed_verifier() {
        let key = DerivedKey::from_bytes([5u8; 32]);
        assert!(!verify(&key, &[1u8; ID_SIZE], "not-hex"));
        assert!(!verify(&key, &[1u8; ID_SIZE], ""));
    }
}
