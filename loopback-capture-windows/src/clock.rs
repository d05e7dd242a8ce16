//! Performance-counter conversion to the 100 ns base used by packet timestamps.

/// Multiplier from performance-counter ticks to 100 ns units.
pub fn ticks_to_100ns_factor(frequency: i64) -> f64 {
    if frequency <= 0 {
        return 0.0;
    }
    10_000_000.0 / frequency as f64
}

pub fn ticks_to_100ns(ticks: i64, factor: f64) -> u64 {
    (ticks.max(0) as f64 * factor) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_mhz_counter_is_identity() {
        let factor = ticks_to_100ns_factor(10_000_000);
        assert_eq!(ticks_to_100ns(123_456_789, factor), 123_456_789);
    }

    #[test]
    fn slower_counter_scales_up() {
        // 3 MHz counter: one tick is 3.33.. units of 100 ns
        let factor = ticks_to_100ns_factor(3_000_000);
        assert_eq!(ticks_to_100ns(3_000_000, factor), 10_000_000);
    }

    #[test]
    fn invalid_frequency_yields_zero_clock() {
        let factor = ticks_to_100ns_factor(0);
        assert_eq!(ticks_to_100ns(42, factor), 0);
        assert_eq!(ticks_to_100ns(-5, ticks_to_100ns_factor(1000)), 0);
    }
}
