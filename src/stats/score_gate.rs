use ndarray::arr1;

use crate::common::{to_float, FType};

use super::RunningStats;

/// |z| above which a raw score counts as an outlier of the score history.
pub const Z_THRESHOLD: f64 = 3.0;

/// Adaptive normalization shared by the detectors.
///
/// Every raw score is appended to a running history. The gate reports 0 unless the raw
/// score is more than [`Z_THRESHOLD`] standard deviations away from the history mean. An
/// outlier is rescaled against the most extreme score seen on its side of the mean, so
/// the result lies in `(0, 1]`.
///
/// # Example
///
/// ```
/// use light_outlier::stats::ScoreGate;
///
/// let mut gate: ScoreGate<f64> = ScoreGate::new();
/// for _ in 0..50 {
///     assert_eq!(gate.observe(1.0), 0.0);
/// }
/// // Far above everything seen so far: it is the new maximum, hence 1.
/// assert_eq!(gate.observe(10.0), 1.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScoreGate<F: FType> {
    history: RunningStats<F>,
}

impl<F: FType> ScoreGate<F> {
    pub fn new() -> Self {
        ScoreGate {
            history: RunningStats::new(),
        }
    }

    /// Running statistics of every raw score observed.
    pub fn history(&self) -> &RunningStats<F> {
        &self.history
    }

    /// Record `raw` and return the gated score.
    pub fn observe(&mut self, raw: F) -> F {
        self.history.accumulate(&arr1(&[raw]));

        let mean = self.history.mean()[0];
        let std = self.history.std()[0];
        let z = if std > F::zero() {
            (raw - mean) / std
        } else {
            F::zero()
        };

        let threshold: F = to_float(Z_THRESHOLD);
        if z > threshold {
            (raw - mean) / (self.history.max()[0] - mean)
        } else if z < -threshold {
            (raw - mean) / (self.history.min()[0] - mean)
        } else {
            F::zero()
        }
    }
}
