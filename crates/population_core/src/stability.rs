//! Post-processing of computed rows: stability detection, noise snapping and rounding.

use tracing::debug;

use crate::numeric::{Decimal, RoundingMode};

/// Tracks whether the rows of a run have stopped changing.
///
/// With `max_delay = d`, the task is stable at step `s >= d + 2` when row `s - d - 2` equals every
/// row in `s - d - 1 ..= s - 1`: every value any transition could read is then constant, so all
/// later rows repeat the last one.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    max_delay: usize,
    scale: u32,
    stable_from: Option<usize>,
}

impl StabilityTracker {
    pub fn new(max_delay: usize, scale: u32) -> Self {
        Self {
            max_delay,
            scale,
            stable_from: None,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.stable_from.is_some()
    }

    pub fn stable_from(&self) -> Option<usize> {
        self.stable_from
    }

    /// Checks the rows computed before `step`. Once stable, stays stable.
    pub fn detect(&mut self, rows: &[Vec<f64>], step: usize) -> bool {
        if self.is_stable() {
            return true;
        }
        let window = self.max_delay + 2;
        if step < window || rows.len() < step {
            return false;
        }
        let reference = &rows[step - window];
        let stable = rows[step - window + 1..step].iter().all(|row| row == reference);
        if stable {
            debug!(step, max_delay = self.max_delay, "Task became stable; copying rows forward.");
            self.stable_from = Some(step);
        }
        stable
    }

    /// Snaps values within `10^-scale` of zero to zero, rounds the rest half-up to `scale`
    /// digits, and clamps negatives unless they are allowed.
    pub fn round_row(&self, row: &mut [f64], allow_negative: bool) {
        let noise = noise_floor(self.scale);
        for value in row.iter_mut() {
            *value = if value.abs() <= noise {
                0.0
            } else {
                round_half_up(*value, self.scale)
            };
            if !allow_negative && *value < 0.0 {
                *value = 0.0;
            }
        }
    }

    /// Full-precision counterpart of [`round_row`](Self::round_row) for the decimal window:
    /// noise is snapped and negatives clamped, but digits are kept.
    pub fn snap_decimal_row(&self, row: &mut [Decimal], allow_negative: bool) {
        let noise = decimal_noise_floor(self.scale);
        for value in row.iter_mut() {
            if value.abs() <= noise || (!allow_negative && value.is_negative()) {
                *value = Decimal::zero();
            }
        }
    }

    /// Row projected to `f64` after rounding half-up to `scale` digits.
    pub fn project_decimal_row(&self, row: &[Decimal]) -> Vec<f64> {
        row.iter()
            .map(|value| value.with_scale(self.scale, RoundingMode::HalfUp).to_f64())
            .collect()
    }
}

fn noise_floor(scale: u32) -> f64 {
    10f64.powi(-(scale.min(i32::MAX as u32) as i32))
}

fn decimal_noise_floor(scale: u32) -> Decimal {
    Decimal::new(1.into(), scale)
}

/// Rounds half away from zero to `scale` fractional digits. Values whose scaled magnitude no
/// longer has a fractional part in `f64` are returned unchanged.
pub fn round_half_up(value: f64, scale: u32) -> f64 {
    let factor = 10f64.powi(scale.min(i32::MAX as u32) as i32);
    let scaled = value * factor;
    if !scaled.is_finite() || scaled.abs() >= 2f64.powi(52) {
        return value;
    }
    scaled.round() / factor
}

#[cfg(test)]
mod tests {
    use super::{round_half_up, StabilityTracker};
    use crate::numeric::Decimal;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_half_up(0.125, 2), 0.13);
        assert_eq!(round_half_up(-0.125, 2), -0.13);
        assert_eq!(round_half_up(2.5, 0), 3.0);
        assert_eq!(round_half_up(1e300, 16), 1e300);
    }

    #[test]
    fn snaps_noise_and_clamps() {
        let tracker = StabilityTracker::new(0, 6);
        let mut row = vec![1e-7, -1e-7, -0.5, 1.23456789];
        tracker.round_row(&mut row, false);
        assert_eq!(row, vec![0.0, 0.0, 0.0, 1.234568]);

        let mut row = vec![-0.5];
        tracker.round_row(&mut row, true);
        assert_eq!(row, vec![-0.5]);
    }

    #[test]
    fn decimal_rows_snap_without_rounding() {
        let tracker = StabilityTracker::new(0, 4);
        let mut row: Vec<Decimal> = ["0.00001", "-3", "1.234567"]
            .iter()
            .map(|text| text.parse().expect("literal"))
            .collect();
        tracker.snap_decimal_row(&mut row, false);
        assert!(row[0].is_zero());
        assert!(row[1].is_zero());
        assert_eq!(row[2], "1.234567".parse::<Decimal>().expect("literal"));
        assert_eq!(tracker.project_decimal_row(&row), vec![0.0, 0.0, 1.2346]);
    }

    #[test]
    fn detects_repeating_window() {
        let mut tracker = StabilityTracker::new(1, 16);
        let rows = vec![
            vec![4.0, 0.0],
            vec![2.0, 2.0],
            vec![2.0, 2.0],
            vec![2.0, 2.0],
        ];
        // window is max_delay + 2 = 3 rows ending before the step
        assert!(!tracker.detect(&rows, 2));
        assert!(!tracker.detect(&rows, 3));
        assert!(tracker.detect(&rows, 4));
        assert_eq!(tracker.stable_from(), Some(4));
        assert!(tracker.detect(&rows, 5));
    }

    #[test]
    fn zero_delay_needs_two_equal_rows() {
        let mut tracker = StabilityTracker::new(0, 16);
        let rows = vec![vec![1.0], vec![1.0]];
        assert!(!tracker.detect(&rows, 1));
        assert!(tracker.detect(&rows, 2));
    }
}
