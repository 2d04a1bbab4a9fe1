//! Differential update gate: decides whether a proposed limit change is
//! worth shipping to the client.

const KIB: i64 = 1_024;
const MIB: i64 = 1_024 * 1_024;

/// Decide whether a change from `current_bps` to `new_bps` is significant
/// enough to ship, given a relative threshold for the high-speed band.
///
/// Rules are evaluated in order; the first that applies decides the
/// outcome.
#[must_use]
pub fn needs_update(current_bps: i64, new_bps: i64, rel_threshold: f64) -> bool {
    let crosses_unlimited_boundary = (current_bps <= 0) != (new_bps <= 0);
    if crosses_unlimited_boundary {
        return true;
    }

    if current_bps <= 0 && new_bps <= 0 {
        return false;
    }

    let delta = (new_bps - current_bps).abs();
    let peak = current_bps.max(new_bps);

    if peak < 50 * KIB {
        return delta > 10 * KIB;
    }

    if peak < MIB {
        #[expect(
            clippy::cast_precision_loss,
            reason = "bytes/sec deltas fit comfortably in f64 mantissa precision"
        )]
        let relative = delta as f64 / current_bps.max(1) as f64;
        return delta > 50 * KIB || relative > 0.30;
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "bytes/sec deltas fit comfortably in f64 mantissa precision"
    )]
    let relative = delta as f64 / current_bps.max(1) as f64;
    delta > 100 * KIB && relative > rel_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_unlimited_boundary_always_triggers() {
        assert!(needs_update(1_000_000, -1, 0.2));
        assert!(needs_update(-1, 1_000_000, 0.2));
    }

    #[test]
    fn both_sides_unlimited_never_triggers() {
        assert!(!needs_update(-1, -1, 0.2));
    }

    #[test]
    fn low_band_is_absolute_only() {
        assert!(!needs_update(20 * KIB, 25 * KIB, 0.2));
        assert!(needs_update(20 * KIB, 35 * KIB, 0.2));
    }

    #[test]
    fn mid_band_requires_absolute_or_relative() {
        assert!(needs_update(500 * KIB, 560 * KIB, 0.2));
        assert!(!needs_update(500 * KIB, 520 * KIB, 0.2));
    }

    #[test]
    fn high_band_requires_absolute_and_relative() {
        assert!(!needs_update(1_000_000, 1_100_000, 0.2));
        assert!(needs_update(1_000_000, 1_300_000, 0.2));
    }

    #[test]
    fn equal_values_never_trigger() {
        assert!(!needs_update(1_000_000, 1_000_000, 0.2));
    }
}
