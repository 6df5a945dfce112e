//! Opaque credential generation.

use warden_core::{DomainError, DomainResult};

/// Bytes of OS entropy behind every session id and token value (256 bits).
pub const OPAQUE_BYTES: usize = 32;

/// Generate a non-guessable, hex-encoded opaque string from the OS RNG.
pub fn opaque_hex() -> DomainResult<String> {
    let mut buf = [0u8; OPAQUE_BYTES];
    getrandom::getrandom(&mut buf)
        .map_err(|e| DomainError::internal(format!("entropy source unavailable: {e}")))?;
    Ok(hex::encode(buf))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn opaque_values_are_hex_and_distinct() {
        let values: HashSet<String> = (0..64).map(|_| opaque_hex().unwrap()).collect();
        assert_eq!(values.len(), 64);
        for v in &values {
            assert_eq!(v.len(), OPAQUE_BYTES * 2);
            assert!(v.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
