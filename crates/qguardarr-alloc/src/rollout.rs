//! Deterministic hash-modulo rollout filter.

use md5::{Digest, Md5};

/// Decide whether `hash` is admitted under a rollout of `percentage` (1..=100).
///
/// Deterministic: the same `(hash, percentage)` pair always yields the same
/// decision, across calls and across process restarts.
#[must_use]
pub fn admit(hash: &str, percentage: u8) -> bool {
    let clamped = percentage.clamp(1, 100);
    u32::from(digest_mod_100(hash)) < u32::from(clamped)
}

fn digest_mod_100(hash: &str) -> u8 {
    let digest = Md5::digest(hash.as_bytes());
    #[expect(
        clippy::cast_possible_truncation,
        reason = "modulo 100 always fits in u8"
    )]
    let value = (u32::from(digest[0]) << 24
        | u32::from(digest[1]) << 16
        | u32::from(digest[2]) << 8
        | u32::from(digest[3])) as u64
        % 100;
    value as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_hash_and_percentage_is_stable_across_calls() {
        let first = admit("abcdef0123456789", 42);
        let second = admit("abcdef0123456789", 42);
        assert_eq!(first, second);
    }

    #[test]
    fn hundred_percent_admits_everything() {
        for hash in ["a", "b", "c", "deadbeef"] {
            assert!(admit(hash, 100));
        }
    }

    #[test]
    fn percentage_is_clamped_to_valid_range() {
        assert!(admit("any-hash", 0) == admit("any-hash", 1));
        assert!(admit("any-hash", 200) == admit("any-hash", 100));
    }
}
