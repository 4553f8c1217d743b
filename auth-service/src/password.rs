use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand_core::{OsRng, RngCore};

use crate::error::AuthError;

/// One-way hash for storage.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Hashing(err.to_string()))
}

/// Constant-time verification against a stored digest. An unparsable digest
/// verifies as false rather than erroring.
pub fn verify_password(password: &str, digest: &str) -> bool {
    match PasswordHash::new(digest) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Random opaque password for identities provisioned from a federated
/// login; nobody is expected to ever type it.
pub fn random_opaque_password() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let digest = hash_password("secret1").unwrap();
        assert!(verify_password("secret1", &digest));
        assert!(!verify_password("secret2", &digest));
    }

    #[test]
    fn malformed_digest_never_verifies() {
        assert!(!verify_password("secret1", "not-a-phc-string"));
    }

    #[test]
    fn opaque_passwords_are_unique() {
        assert_ne!(random_opaque_password(), random_opaque_password());
    }
}
