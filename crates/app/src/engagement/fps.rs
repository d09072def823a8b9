use std::time::Instant;

/// Frames per second for a tick-to-tick interval in seconds.
///
/// Non-positive or non-finite intervals yield 0 instead of inf/NaN.
pub(crate) fn fps_from_interval(seconds: f64) -> f64 {
    if seconds > 0.0 && seconds.is_finite() {
        1.0 / seconds
    } else {
        0.0
    }
}

/// Instantaneous FPS from consecutive tick start times.
#[derive(Debug, Default)]
pub(crate) struct FpsMeter {
    previous: Option<Instant>,
}

impl FpsMeter {
    /// Record a tick starting at `now` and return the rate since the previous
    /// one. The first tick reports 0.
    pub(crate) fn tick(&mut self, now: Instant) -> f64 {
        let fps = match self.previous {
            Some(previous) => now
                .checked_duration_since(previous)
                .map(|elapsed| fps_from_interval(elapsed.as_secs_f64()))
                .unwrap_or(0.0),
            None => 0.0,
        };
        self.previous = Some(now);
        fps
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0.5, 2.0)]
    #[case(0.02, 50.0)]
    #[case(1.0 / 30.0, 30.0)]
    fn inverts_positive_intervals(#[case] seconds: f64, #[case] expected: f64) {
        assert_relative_eq!(fps_from_interval(seconds), expected, epsilon = 1e-9);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-0.016)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn degenerate_intervals_report_zero(#[case] seconds: f64) {
        let fps = fps_from_interval(seconds);
        assert_eq!(fps, 0.0);
    }

    #[test]
    fn ticks_33ms_apart_round_to_30() {
        let mut meter = FpsMeter::default();
        let start = Instant::now();
        assert_eq!(meter.tick(start), 0.0);
        let fps = meter.tick(start + Duration::from_millis(33));
        assert_eq!(fps.round() as u32, 30);
    }

    #[test]
    fn identical_or_backwards_ticks_report_zero() {
        let mut meter = FpsMeter::default();
        let start = Instant::now() + Duration::from_secs(1);
        meter.tick(start);
        assert_eq!(meter.tick(start), 0.0);
        assert_eq!(meter.tick(start - Duration::from_millis(10)), 0.0);
    }
}
