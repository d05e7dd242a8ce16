//! Capture-delay estimate used for echo alignment downstream.
//!
//! The estimate is taken once per packet from the clock-versus-timestamp gap
//! plus the buffered backlog, then lowered by one block duration for each
//! block delivered from that packet. The per-block decrement is not
//! re-anchored to the clock, so a long burst can drift from the true delay.

use crate::models::format::BLOCK_DURATION_MS;

/// Estimate in milliseconds for the oldest buffered frame.
///
/// `now_100ns` and `packet_timestamp_100ns` share the backend clock base.
/// Clamped at zero when the clock reads earlier than the packet stamp.
pub fn estimate_capture_delay_ms(
    now_100ns: u64,
    packet_timestamp_100ns: u64,
    buffered_frames: usize,
    block_frames: usize,
) -> u32 {
    let elapsed_ms = (now_100ns as f64 - packet_timestamp_100ns as f64) / 10_000.0;
    let backlog_ms = if block_frames == 0 {
        0
    } else {
        (BLOCK_DURATION_MS as usize * buffered_frames / block_frames) as i64
    };
    let delay = elapsed_ms as i64 + backlog_ms - BLOCK_DURATION_MS as i64;
    delay.clamp(0, u32::MAX as i64) as u32
}

/// Estimate to report for the next block after one has been delivered.
pub fn after_block_delivered(delay_ms: u32) -> u32 {
    delay_ms.saturating_sub(BLOCK_DURATION_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_gap_plus_backlog_minus_one_block() {
        // 25 ms since the stamp, 960 frames buffered at 480 frames/block → 20 ms backlog
        let delay = estimate_capture_delay_ms(250_000 + 1_000_000, 1_000_000, 960, 480);
        assert_eq!(delay, 35);
    }

    #[test]
    fn partial_backlog_rounds_down() {
        let delay = estimate_capture_delay_ms(100_000, 100_000, 719, 480);
        // 10 * 719 / 480 = 14
        assert_eq!(delay, 4);
    }

    #[test]
    fn clock_behind_stamp_clamps_to_zero() {
        assert_eq!(estimate_capture_delay_ms(0, 5_000_000, 0, 480), 0);
    }

    #[test]
    fn nominal_feed_never_needs_the_clamp() {
        // Clock at or ahead of the stamp with at least one block buffered: every
        // block of the burst still has headroom before the decrement saturates.
        for lag_100ns in [0u64, 5_000, 20_000, 150_000] {
            for buffered in 480..=2_400 {
                let mut delay = estimate_capture_delay_ms(10_000_000 + lag_100ns, 10_000_000, buffered, 480);
                let blocks = (buffered / 480) as u32;
                for delivered in 0..blocks {
                    assert!(delay >= BLOCK_DURATION_MS * (blocks - 1 - delivered));
                    delay = after_block_delivered(delay);
                }
            }
        }
    }

    #[test]
    fn decrement_is_fixed_per_block_regardless_of_clock() {
        // Five blocks at 48 kHz drained from one packet step down by 10 ms each,
        // even though the clock is never re-read during the burst.
        let mut delay = estimate_capture_delay_ms(5_000, 0, 2_400, 480);
        let mut reported = Vec::new();
        for _ in 0..5 {
            reported.push(delay);
            delay = after_block_delivered(delay);
        }
        assert_eq!(reported, vec![40, 30, 20, 10, 0]);
        assert_eq!(after_block_delivered(0), 0);
    }
}
