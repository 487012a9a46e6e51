use std::time::Duration;

use rand::Rng;

/// Exponential back-off schedule: base → 2x base → 4x base …, bounded by
/// `cap`, with ±20% jitter.
pub(crate) fn backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u64 << (attempt.saturating_sub(1)).min(4);
    let delay_ms = (base.as_millis() as u64)
        .saturating_mul(factor)
        .min(cap.as_millis() as u64);
    let jitter = rand::rng().random_range(0.8..1.2);
    Duration::from_millis((delay_ms as f64 * jitter) as u64)
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn backoff_is_bounded_by_the_cap() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(10);
        for attempt in 1..8 {
            assert!(backoff(attempt, base, cap) <= Duration::from_millis(12_000));
        }
        assert!(backoff(1, base, cap) >= Duration::from_millis(800));
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
