//! SHA-256-based cache-key generation, mirroring the discovery cache's
//! `generate_key` idiom so every cache-backed component derives keys the
//! same way.

use sha2::{Digest, Sha256};

pub fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\x1f");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn cache_key(prefix: &str, parts: &[&str]) -> String {
    format!("{prefix}:{}", sha256_hex(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let a = cache_key("intent", &["prompt", "persona", "v1"]);
        let b = cache_key("intent", &["prompt", "persona", "v1"]);
        assert_eq!(a, b);
    }

    #[test]
    fn differs_on_field_boundary_not_just_concatenation() {
        let a = cache_key("intent", &["ab", "c"]);
        let b = cache_key("intent", &["a", "bc"]);
        assert_ne!(a, b);
    }
}
