//! Playback position extrapolation between authoritative updates.
//!
//! The authority only reports the position from time to time, together with
//! the instant it was sampled. Everything here derives the value at an
//! arbitrary `now_ms` without reading a clock: callers pass the time in.

/// Instantaneous position at `now_ms`.
///
/// When the player is not advancing (paused, suppressed, buffering) the last
/// known position is returned unchanged. Otherwise the elapsed wall-clock
/// time is scaled by `speed` and the result is clamped to `[0, duration]`
/// (no upper bound when the duration is unknown).
pub fn current_position(
    last_known_position_ms: u64,
    last_known_timestamp_ms: u64,
    speed: f32,
    is_advancing: bool,
    duration_ms: Option<u64>,
    now_ms: u64,
) -> u64 {
    if !is_advancing {
        return last_known_position_ms;
    }

    let elapsed_ms = now_ms as i128 - last_known_timestamp_ms as i128;
    let advanced = (elapsed_ms as f64 * f64::from(speed)).round() as i128;
    let raw = (last_known_position_ms as i128 + advanced).max(0);

    let clamped = match duration_ms {
        Some(duration) => raw.min(duration as i128),
        None => raw,
    };
    clamped.min(u64::MAX as i128) as u64
}

/// Content position at `now_ms`.
///
/// While an ad plays the content position stays frozen at the value it had
/// when the ad started; otherwise it follows [`current_position`].
pub fn content_position(
    last_content_position_ms: u64,
    last_known_timestamp_ms: u64,
    speed: f32,
    is_advancing: bool,
    is_playing_ad: bool,
    duration_ms: Option<u64>,
    now_ms: u64,
) -> u64 {
    if is_playing_ad {
        return last_content_position_ms;
    }
    current_position(
        last_content_position_ms,
        last_known_timestamp_ms,
        speed,
        is_advancing,
        duration_ms,
        now_ms,
    )
}

/// Buffered position, taken verbatim from the last update and clamped to
/// `[current_position, duration]`.
pub fn buffered_position(
    reported_buffered_ms: u64,
    current_position_ms: u64,
    duration_ms: Option<u64>,
) -> u64 {
    let capped = match duration_ms {
        Some(duration) => reported_buffered_ms.min(duration),
        None => reported_buffered_ms,
    };
    capped.max(current_position_ms)
}

/// Amount of media buffered ahead of the playhead.
pub fn total_buffered_duration(buffered_position_ms: u64, current_position_ms: u64) -> u64 {
    buffered_position_ms.saturating_sub(current_position_ms)
}

/// Buffered percentage in `[0, 100]`; 0 when either value is unknown and 100
/// for a zero-length item.
pub fn buffered_percentage(buffered_position_ms: Option<u64>, duration_ms: Option<u64>) -> u8 {
    match (buffered_position_ms, duration_ms) {
        (Some(_), Some(0)) => 100,
        (Some(buffered), Some(duration)) => {
            (u128::from(buffered) * 100 / u128::from(duration)).min(100) as u8
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paused_does_not_advance() {
        // 10 s, paused, 100 ms later: still 10 s.
        assert_eq!(current_position(10_000, 1_000, 1.0, false, None, 1_100), 10_000);
    }

    #[test]
    fn test_playing_advances_with_speed() {
        // 2x speed during 50 ms.
        assert_eq!(current_position(10_000, 1_000, 2.0, true, None, 1_050), 10_100);
        assert_eq!(current_position(10_000, 1_000, 0.5, true, None, 1_100), 10_050);
    }

    #[test]
    fn test_clamped_to_duration_and_zero() {
        assert_eq!(
            current_position(9_900, 0, 1.0, true, Some(10_000), 1_000),
            10_000
        );
        // Clock going backwards never yields a negative position.
        assert_eq!(current_position(100, 5_000, 1.0, true, None, 1_000), 0);
    }

    #[test]
    fn test_monotonic_for_positive_speed() {
        let mut previous = 0;
        for now in (0..20_000).step_by(137) {
            let position = current_position(500, 0, 1.5, true, Some(25_000), now);
            assert!(position >= previous);
            previous = position;
        }
        assert_eq!(previous, 25_000);
    }

    #[test]
    fn test_content_position_frozen_during_ad() {
        assert_eq!(content_position(4_000, 0, 1.0, true, true, None, 3_000), 4_000);
        assert_eq!(content_position(4_000, 0, 1.0, true, false, None, 3_000), 7_000);
    }

    #[test]
    fn test_buffered_position_clamps() {
        assert_eq!(buffered_position(1_000, 3_000, None), 3_000);
        assert_eq!(buffered_position(50_000, 3_000, Some(40_000)), 40_000);
        assert_eq!(buffered_position(8_000, 3_000, Some(40_000)), 8_000);
        assert_eq!(total_buffered_duration(8_000, 3_000), 5_000);
        assert_eq!(total_buffered_duration(1_000, 3_000), 0);
    }

    #[test]
    fn test_buffered_percentage() {
        assert_eq!(buffered_percentage(None, Some(100)), 0);
        assert_eq!(buffered_percentage(Some(10), None), 0);
        assert_eq!(buffered_percentage(Some(10), Some(0)), 100);
        assert_eq!(buffered_percentage(Some(25), Some(100)), 25);
        assert_eq!(buffered_percentage(Some(250), Some(100)), 100);
    }
}
