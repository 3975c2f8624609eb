use ndarray::{Array1, Zip};

use crate::common::{to_float, FType};
use crate::error::{DetectorError, Result};

/// Incremental per-feature statistics over every observation seen so far.
///
/// Mean and variance follow Welford's algorithm, so no history is kept. The first
/// observation fixes the number of features.
///
/// # Example
///
/// ```
/// use light_outlier::stats::RunningStats;
/// use ndarray::array;
///
/// let mut stats: RunningStats<f64> = RunningStats::new();
/// stats.update(&array![1.0, 10.0]).unwrap();
/// stats.update(&array![3.0, 10.0]).unwrap();
///
/// assert_eq!(stats.mean(), &array![2.0, 10.0]);
/// assert_eq!(stats.std(), array![1.0, 0.0]);
/// assert_eq!(stats.min(), &array![1.0, 10.0]);
/// assert_eq!(stats.max(), &array![3.0, 10.0]);
/// ```
#[derive(Debug, Clone)]
pub struct RunningStats<F: FType> {
    count: u64,
    mean: Array1<F>,
    m2: Array1<F>,
    min: Array1<F>,
    max: Array1<F>,
}

impl<F: FType> Default for RunningStats<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FType> RunningStats<F> {
    pub fn new() -> Self {
        RunningStats {
            count: 0,
            mean: Array1::zeros(0),
            m2: Array1::zeros(0),
            min: Array1::zeros(0),
            max: Array1::zeros(0),
        }
    }

    /// Number of observations seen.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of features, `None` until the first update.
    pub fn n_features(&self) -> Option<usize> {
        if self.count == 0 {
            None
        } else {
            Some(self.mean.len())
        }
    }

    /// Fails with `DimensionMismatch` if `x` does not have the established length, and
    /// with `EmptyObservation` if `x` has no feature at all.
    pub fn check(&self, x: &Array1<F>) -> Result<()> {
        if x.is_empty() {
            return Err(DetectorError::EmptyObservation);
        }
        match self.n_features() {
            Some(expected) if expected != x.len() => Err(DetectorError::DimensionMismatch {
                expected,
                got: x.len(),
            }),
            _ => Ok(()),
        }
    }

    pub fn update(&mut self, x: &Array1<F>) -> Result<()> {
        self.check(x)?;
        self.accumulate(x);
        Ok(())
    }

    // Caller guarantees the length matches.
    pub(super) fn accumulate(&mut self, x: &Array1<F>) {
        if self.count == 0 {
            self.mean = Array1::zeros(x.len());
            self.m2 = Array1::zeros(x.len());
            self.min = x.clone();
            self.max = x.clone();
        }
        self.count += 1;
        let n: F = to_float(self.count);

        let delta = x - &self.mean;
        self.mean += &(&delta / n);
        let delta2 = x - &self.mean;
        self.m2 += &(&delta * &delta2);

        self.min.zip_mut_with(x, |lo, &v| {
            if v < *lo {
                *lo = v;
            }
        });
        self.max.zip_mut_with(x, |hi, &v| {
            if v > *hi {
                *hi = v;
            }
        });
    }

    pub fn mean(&self) -> &Array1<F> {
        &self.mean
    }

    /// Population standard deviation. All zeros while fewer than two samples were seen.
    pub fn std(&self) -> Array1<F> {
        if self.count < 2 {
            return Array1::zeros(self.mean.len());
        }
        let n: F = to_float(self.count);
        self.m2.mapv(|m2| (m2 / n).max(F::zero()).sqrt())
    }

    pub fn min(&self) -> &Array1<F> {
        &self.min
    }

    pub fn max(&self) -> &Array1<F> {
        &self.max
    }

    /// Min-max scale `x` with the running extrema.
    ///
    /// A feature whose running range is zero maps to 0, as does any quotient that is not
    /// finite. Before the first update everything maps to 0.
    pub fn normalize(&self, x: &Array1<F>) -> Result<Array1<F>> {
        self.check(x)?;
        let mut scaled = Array1::zeros(x.len());
        if self.count == 0 {
            return Ok(scaled);
        }
        Zip::from(&mut scaled)
            .and(x)
            .and(&self.min)
            .and(&self.max)
            .for_each(|out, &v, &lo, &hi| {
                let range = hi - lo;
                if range > F::zero() {
                    let s = (v - lo) / range;
                    if s.is_finite() {
                        *out = s;
                    }
                }
            });
        Ok(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_empty_stats() {
        let stats: RunningStats<f64> = RunningStats::new();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.n_features(), None);
        assert_eq!(stats.std().len(), 0);
    }

    #[test]
    fn test_mean_and_std() {
        let mut stats: RunningStats<f64> = RunningStats::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.update(&array![v]).unwrap();
        }
        assert_eq!(stats.count(), 8);
        assert!((stats.mean()[0] - 5.0).abs() < 1e-12);
        assert!((stats.std()[0] - 2.0).abs() < 1e-12);
        assert_eq!(stats.min()[0], 2.0);
        assert_eq!(stats.max()[0], 9.0);
    }

    #[test]
    fn test_single_sample_has_zero_std() {
        let mut stats: RunningStats<f32> = RunningStats::new();
        stats.update(&array![3.0, -1.0]).unwrap();
        assert_eq!(stats.std(), array![0.0, 0.0]);
        assert_eq!(stats.mean(), &array![3.0, -1.0]);
    }

    #[test]
    fn test_dimension_mismatch_does_not_mutate() {
        let mut stats: RunningStats<f64> = RunningStats::new();
        stats.update(&array![1.0, 2.0]).unwrap();
        let err = stats.update(&array![1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            DetectorError::DimensionMismatch {
                expected: 2,
                got: 3
            }
        );
        assert_eq!(stats.count(), 1);
    }

    #[test]
    fn test_empty_observation() {
        let mut stats: RunningStats<f64> = RunningStats::new();
        let empty: Array1<f64> = Array1::zeros(0);
        assert_eq!(stats.update(&empty), Err(DetectorError::EmptyObservation));
        assert_eq!(stats.count(), 0);
    }

    #[test]
    fn test_normalize() {
        let mut stats: RunningStats<f64> = RunningStats::new();
        stats.update(&array![0.0, 5.0]).unwrap();
        stats.update(&array![10.0, 5.0]).unwrap();
        // Second feature has no range and maps to zero.
        let scaled = stats.normalize(&array![2.5, 5.0]).unwrap();
        assert_eq!(scaled, array![0.25, 0.0]);
    }

    #[test]
    fn test_normalize_before_update() {
        let stats: RunningStats<f64> = RunningStats::new();
        assert_eq!(stats.normalize(&array![4.0]).unwrap(), array![0.0]);
    }
}
