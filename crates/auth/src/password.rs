//! Password hashing and verification (argon2id, PHC strings).

use std::sync::OnceLock;

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};

use warden_core::{DomainError, DomainResult};

use crate::config::PasswordCost;

/// Hash checked against when the account does not exist.
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

fn hasher(cost: PasswordCost) -> DomainResult<Argon2<'static>> {
    let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
        .map_err(|e| DomainError::internal(format!("invalid argon2 parameters: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password with a fresh random salt.
///
/// Returns the hash in PHC format: `$argon2id$v=19$m=...,t=...,p=...$salt$hash`.
pub fn hash_password(password: &str, cost: PasswordCost) -> DomainResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| DomainError::internal(format!("entropy source unavailable: {e}")))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| DomainError::internal(format!("salt encoding failed: {e}")))?;

    let hash = hasher(cost)?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| DomainError::internal(format!("password hash failed: {e}")))?;

    Ok(hash.to_string())
}

/// Verify a password against a stored hash.
///
/// Parameters are read from the PHC string, so hashes produced under an older
/// [`PasswordCost`] keep verifying.
pub fn verify_password(password: &str, hash: &str) -> DomainResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| DomainError::internal(format!("invalid password hash: {e}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(DomainError::internal(format!(
            "password verification failed: {e}"
        ))),
    }
}

/// Run one verification against a throwaway hash and discard the outcome.
///
/// Keeps a failed login for an unknown account as slow as one with a wrong
/// password. The hash is built once, with the cost of the first caller.
pub fn verify_dummy(password: &str, cost: PasswordCost) -> DomainResult<()> {
    let hash = match DUMMY_HASH.get() {
        Some(hash) => hash,
        None => {
            let fresh = hash_password("no such account", cost)?;
            DUMMY_HASH.get_or_init(|| fresh)
        }
    };
    verify_password(password, hash).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> PasswordCost {
        PasswordCost::minimal()
    }

    #[test]
    fn hash_is_phc_argon2id() {
        let hash = hash_password("my_password", cheap()).unwrap();
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn verify_correct_and_wrong_password() {
        let hash = hash_password("my_password", cheap()).unwrap();
        assert!(verify_password("my_password", &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("my_password", cheap()).unwrap();
        let b = hash_password("my_password", cheap()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_is_an_internal_error() {
        let err = verify_password("x", "not-a-hash").unwrap_err();
        assert!(matches!(err, DomainError::Internal(_)));
    }

    #[test]
    fn dummy_verification_builds_its_hash_once() {
        verify_dummy("guess", cheap()).unwrap();
        let first = DUMMY_HASH.get().cloned().unwrap();
        verify_dummy("another guess", cheap()).unwrap();
        assert_eq!(DUMMY_HASH.get(), Some(&first));
        assert!(first.starts_with("$argon2id$"));
    }

    #[test]
    fn unicode_password() {
        let hash = hash_password("pässwörd-密码", cheap()).unwrap();
        assert!(verify_password("pässwörd-密码", &hash).unwrap());
    }
}
