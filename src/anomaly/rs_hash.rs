use ndarray::Array1;
use rand::distributions::Uniform;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use std::collections::HashMap;
use std::mem;

use crate::common::{to_float, FType, Observation};
use crate::error::{DetectorError, Result};
use crate::stats::{RunningStats, ScoreGate};

use super::AnomalyDetector;

/// Parameters of an [`RsHash`] detector.
///
/// - `init_len`: number of observations buffered and hashed before scoring starts.
/// - `decay`: decay rate λ. A count loses half its weight every `1 / λ` observations.
/// - `n_components`: number of random grids the feature space is hashed with.
/// - `n_hashes`: number of count tables.
/// - `seed`: seed of the detector's generator, drawn from entropy when `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsHashConfig {
    pub init_len: usize,
    pub decay: f64,
    pub n_components: usize,
    pub n_hashes: usize,
    pub seed: Option<u64>,
}

impl Default for RsHashConfig {
    fn default() -> Self {
        RsHashConfig {
            init_len: 150,
            decay: 0.015,
            n_components: 100,
            n_hashes: 10,
            seed: None,
        }
    }
}

impl RsHashConfig {
    pub fn validate(&self) -> Result<()> {
        if self.init_len == 0 {
            return Err(DetectorError::invalid("init_len", "must be positive"));
        }
        if !self.decay.is_finite() || self.decay <= 0.0 {
            return Err(DetectorError::invalid(
                "decay",
                "must be a positive finite number",
            ));
        }
        if self.n_components == 0 {
            return Err(DetectorError::invalid("n_components", "must be positive"));
        }
        if self.n_hashes == 0 {
            return Err(DetectorError::invalid("n_hashes", "must be positive"));
        }
        Ok(())
    }

    /// Number of observations the decayed counts effectively cover, never below 1000.
    pub fn effective_horizon(&self) -> f64 {
        (1.0 / (1.0 - 2f64.powf(-self.decay))).max(1000.0)
    }
}

/// Grid cell of one component: the component index and the cell's integer coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub component: usize,
    pub coords: Vec<i64>,
}

/// Decayed count of a grid cell, last updated at observation `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketEntry<F> {
    pub timestamp: u64,
    pub weight: F,
}

#[derive(Debug, Clone)]
enum Lifecycle<F: FType> {
    /// The number of features is unknown, no grid shift exists yet.
    Uninitialized,
    Buffering(Vec<Observation<F>>),
    Active,
}

/// Observable phase of an [`RsHash`] detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsHashState {
    Uninitialized,
    Buffering,
    Active,
}

/// RS-Hash: randomized subspace hashing with time-decayed counts.
///
/// Each component lays a randomly shifted grid of random cell width over the min-max
/// scaled feature space. Observations are counted per cell in count tables whose
/// weights halve every `1 / decay` observations, so the tables track a sliding window
/// without storing it. An observation landing in a sparsely populated cell of most grids
/// gets a low raw score, `ln(1 + count)` averaged over components; the [`ScoreGate`]
/// turns raw scores into anomaly scores.
///
/// The first `init_len` observations are buffered and hashed in one pass once the buffer
/// is full (burn-in). Those counts carry timestamp 0. Scoring is unavailable before that.
///
/// # Example
///
/// ```
/// use light_outlier::anomaly::AnomalyDetector;
/// use light_outlier::anomaly::rs_hash::{RsHash, RsHashConfig};
/// use ndarray::array;
///
/// let config = RsHashConfig { init_len: 3, n_components: 8, n_hashes: 2, seed: Some(7), ..Default::default() };
/// let mut detector: RsHash<f64> = RsHash::new(config).unwrap();
///
/// assert_eq!(detector.fit_score(&array![0.1, 5.0]).unwrap(), None);
/// assert_eq!(detector.fit_score(&array![0.4, 4.0]).unwrap(), None);
/// let score = detector.fit_score(&array![0.2, 4.5]).unwrap();
/// assert!(score.unwrap().is_finite());
/// ```
#[derive(Debug, Clone)]
pub struct RsHash<F: FType> {
    config: RsHashConfig,
    rng: ChaCha8Rng,
    n_seen: u64,
    bins: Vec<F>,
    shifts: Vec<Array1<F>>,
    tables: Vec<HashMap<BucketKey, BucketEntry<F>>>,
    data_stats: RunningStats<F>,
    gate: ScoreGate<F>,
    lifecycle: Lifecycle<F>,
    last_raw_score: Option<F>,
}

impl<F: FType> RsHash<F> {
    pub fn new(config: RsHashConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let edge = 1.0 / config.effective_horizon().sqrt();
        let width = Uniform::new(edge, 1.0 - edge);
        let bins = (0..config.n_components)
            .map(|_| to_float(rng.sample(width)))
            .collect();
        let tables = vec![HashMap::new(); config.n_hashes];

        Ok(RsHash {
            config,
            rng,
            n_seen: 0,
            bins,
            shifts: Vec::new(),
            tables,
            data_stats: RunningStats::new(),
            gate: ScoreGate::new(),
            lifecycle: Lifecycle::Uninitialized,
            last_raw_score: None,
        })
    }

    pub fn config(&self) -> &RsHashConfig {
        &self.config
    }

    pub fn state(&self) -> RsHashState {
        match self.lifecycle {
            Lifecycle::Uninitialized => RsHashState::Uninitialized,
            Lifecycle::Buffering(_) => RsHashState::Buffering,
            Lifecycle::Active => RsHashState::Active,
        }
    }

    /// Grid cell width of every component.
    pub fn bin_widths(&self) -> &[F] {
        &self.bins
    }

    /// Grid shift of a component, available once the number of features is known.
    pub fn shift(&self, component: usize) -> Option<&Array1<F>> {
        self.shifts.get(component)
    }

    pub fn data_stats(&self) -> &RunningStats<F> {
        &self.data_stats
    }

    pub fn score_history(&self) -> &RunningStats<F> {
        self.gate.history()
    }

    /// Component average before gating, for the last scored observation.
    pub fn last_raw_score(&self) -> Option<F> {
        self.last_raw_score
    }

    /// Cell of `x` in the grid of `component`, scaled with the current statistics.
    pub fn bucket_key(&self, component: usize, x: &Observation<F>) -> Result<Option<BucketKey>> {
        if component >= self.shifts.len() {
            return Ok(None);
        }
        let normalized = self.data_stats.normalize(x)?;
        Ok(Some(self.key(component, &normalized)))
    }

    pub fn bucket(&self, table: usize, key: &BucketKey) -> Option<&BucketEntry<F>> {
        self.tables.get(table)?.get(key)
    }

    /// Number of cells stored in a table.
    pub fn n_buckets(&self, table: usize) -> usize {
        self.tables.get(table).map_or(0, HashMap::len)
    }

    fn key(&self, component: usize, normalized: &Observation<F>) -> BucketKey {
        let width = self.bins[component];
        let coords = normalized
            .iter()
            .zip(self.shifts[component].iter())
            .map(|(&v, &shift)| {
                let cell = ((v + shift) / width).floor();
                // Out of range cells saturate instead of aliasing a real one.
                cell.to_i64().unwrap_or(if cell > F::zero() {
                    i64::MAX
                } else {
                    i64::MIN
                })
            })
            .collect();
        BucketKey { component, coords }
    }

    fn draw_shifts(&mut self, n_features: usize) {
        let rng = &mut self.rng;
        self.shifts = self
            .bins
            .iter()
            .map(|&width| {
                Array1::from_iter(
                    (0..n_features).map(|_| to_float::<F, _>(rng.gen::<f64>()) * width),
                )
            })
            .collect();
        debug!(
            n_components = self.bins.len(),
            n_features, "drew RS-Hash grid shifts"
        );
    }

    /// Hash the buffered observations into every table with timestamp 0.
    fn burn_in(&mut self, buffer: &[Observation<F>]) -> Result<()> {
        let normalized = buffer
            .iter()
            .map(|x| self.data_stats.normalize(x))
            .collect::<Result<Vec<_>>>()?;

        for component in 0..self.config.n_components {
            for x in &normalized {
                let key = self.key(component, x);
                for table in self.tables.iter_mut() {
                    table
                        .entry(key.clone())
                        .and_modify(|entry| entry.weight += F::one())
                        .or_insert(BucketEntry {
                            timestamp: 0,
                            weight: F::one(),
                        });
                }
            }
        }
        debug!(
            n_samples = buffer.len(),
            n_buckets = self.n_buckets(0),
            "RS-Hash burn-in complete"
        );
        Ok(())
    }
}

impl<F: FType> AnomalyDetector<F> for RsHash<F> {
    fn fit(&mut self, x: &Observation<F>) -> Result<&mut Self> {
        self.data_stats.update(x)?;
        self.n_seen += 1;

        if let Lifecycle::Uninitialized = self.lifecycle {
            self.draw_shifts(x.len());
            self.lifecycle = Lifecycle::Buffering(Vec::with_capacity(self.config.init_len));
        }

        if let Lifecycle::Buffering(buffer) = &mut self.lifecycle {
            buffer.push(x.clone());
            if buffer.len() == self.config.init_len {
                let buffer = mem::take(buffer);
                self.lifecycle = Lifecycle::Active;
                self.burn_in(&buffer)?;
            }
        }
        Ok(self)
    }

    fn score(&mut self, x: &Observation<F>) -> Result<Option<F>> {
        self.data_stats.check(x)?;
        if !matches!(self.lifecycle, Lifecycle::Active) {
            return Ok(None);
        }
        let index = self.n_seen - 1;
        let normalized = self.data_stats.normalize(x)?;
        let decay: F = to_float(self.config.decay);
        let two: F = to_float(2);

        let mut score = F::zero();
        for component in 0..self.config.n_components {
            let key = self.key(component, &normalized);
            let mut min_count = F::infinity();
            for table in self.tables.iter_mut() {
                let entry = table.entry(key.clone()).or_insert(BucketEntry {
                    timestamp: index,
                    weight: F::zero(),
                });
                let elapsed: F = to_float(index.saturating_sub(entry.timestamp));
                let decayed = entry.weight * two.powf(-decay * elapsed);
                *entry = BucketEntry {
                    timestamp: index,
                    weight: decayed + F::one(),
                };
                min_count = min_count.min(decayed);
            }
            score += min_count.ln_1p();
        }
        let n_components: F = to_float(self.config.n_components);
        let raw = score / n_components;

        self.last_raw_score = Some(raw);
        Ok(Some(self.gate.observe(raw)))
    }

    fn n_seen(&self) -> u64 {
        self.n_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Z_THRESHOLD;
    use ndarray::array;
    use rand::{Rng, SeedableRng};

    fn config(init_len: usize, n_components: usize, n_hashes: usize) -> RsHashConfig {
        RsHashConfig {
            init_len,
            decay: 0.015,
            n_components,
            n_hashes,
            seed: Some(42),
        }
    }

    fn uniform_stream(seed: u64, n: usize, dims: usize, low: f64, high: f64) -> Vec<Array1<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let dist = Uniform::new(low, high);
        (0..n)
            .map(|_| Array1::from_iter((0..dims).map(|_| rng.sample(dist))))
            .collect()
    }

    #[test]
    fn test_invalid_config() {
        assert!(RsHash::<f64>::new(config(0, 4, 2)).is_err());
        assert!(RsHash::<f64>::new(config(5, 0, 2)).is_err());
        assert!(RsHash::<f64>::new(config(5, 4, 0)).is_err());
        let mut bad_decay = config(5, 4, 2);
        bad_decay.decay = 0.0;
        assert!(RsHash::<f64>::new(bad_decay.clone()).is_err());
        bad_decay.decay = f64::NAN;
        assert!(RsHash::<f64>::new(bad_decay).is_err());
        assert!(RsHash::<f64>::new(RsHashConfig::default()).is_ok());
    }

    #[test]
    fn test_effective_horizon() {
        assert_eq!(config(5, 4, 2).effective_horizon(), 1000.0);
        let slow = RsHashConfig {
            decay: 1e-4,
            ..config(5, 4, 2)
        };
        let expected = 1.0 / (1.0 - 2f64.powf(-1e-4));
        assert!((slow.effective_horizon() - expected).abs() < 1e-6);
        assert!(slow.effective_horizon() > 14_000.0);
    }

    #[test]
    fn test_grid_parameters() {
        let mut detector: RsHash<f64> = RsHash::new(config(5, 50, 2)).unwrap();
        let edge = 1.0 / 1000f64.sqrt();
        assert_eq!(detector.bin_widths().len(), 50);
        assert!(detector
            .bin_widths()
            .iter()
            .all(|&f| f >= edge && f < 1.0 - edge));
        assert!(detector.shift(0).is_none());

        detector.fit(&array![1.0, 2.0, 3.0]).unwrap();
        for component in 0..50 {
            let shift = detector.shift(component).unwrap();
            let width = detector.bin_widths()[component];
            assert_eq!(shift.len(), 3);
            assert!(shift.iter().all(|&a| (0.0..width).contains(&a)));
        }
    }

    #[test]
    fn test_unavailable_while_buffering() {
        let mut detector: RsHash<f64> = RsHash::new(config(5, 10, 3)).unwrap();
        assert_eq!(detector.state(), RsHashState::Uninitialized);
        assert_eq!(detector.score(&array![0.0, 0.0]).unwrap(), None);
        for (t, x) in uniform_stream(1, 20, 2, 0.0, 1.0).iter().enumerate() {
            let score = detector.fit_score(x).unwrap();
            if t < 4 {
                assert_eq!(score, None);
                assert_eq!(detector.state(), RsHashState::Buffering);
            } else {
                assert!(score.unwrap().is_finite());
                assert_eq!(detector.state(), RsHashState::Active);
            }
        }
    }

    #[test]
    fn test_burn_in_counts_collisions() {
        let mut detector: RsHash<f64> = RsHash::new(config(5, 20, 3)).unwrap();
        let samples = vec![
            array![0.0, 0.0],
            array![0.1, 0.05],
            array![0.5, 0.5],
            array![0.95, 1.0],
            array![1.0, 0.9],
        ];
        for x in &samples {
            assert_eq!(detector.n_buckets(0), 0);
            detector.fit(x).unwrap();
        }
        assert_eq!(detector.state(), RsHashState::Active);

        let mut distinct = std::collections::HashSet::new();
        for component in 0..20 {
            let keys: Vec<BucketKey> = samples
                .iter()
                .map(|x| detector.bucket_key(component, x).unwrap().unwrap())
                .collect();
            for key in &keys {
                let collisions = keys.iter().filter(|other| *other == key).count();
                for table in 0..3 {
                    let entry = detector.bucket(table, key).unwrap();
                    assert_eq!(entry.timestamp, 0);
                    assert_eq!(entry.weight, collisions as f64);
                }
                distinct.insert(key.clone());
            }
        }
        for table in 0..3 {
            assert_eq!(detector.n_buckets(table), distinct.len());
        }
    }

    #[test]
    fn test_buffer_stops_after_burn_in() {
        let mut detector: RsHash<f64> = RsHash::new(config(3, 4, 1)).unwrap();
        for x in uniform_stream(2, 10, 2, 0.0, 1.0) {
            detector.fit(&x).unwrap();
        }
        // Fitting past the burn-in only updates statistics.
        let total: f64 = detector.tables[0].values().map(|entry| entry.weight).sum();
        assert_eq!(total, 3.0 * 4.0);
        assert_eq!(detector.n_seen(), 10);
    }

    #[test]
    fn test_score_decays_and_reinforces() {
        let decay = 0.015;
        let mut detector: RsHash<f64> = RsHash::new(config(4, 6, 2)).unwrap();
        let samples = uniform_stream(3, 4, 2, 0.0, 1.0);
        for x in &samples {
            detector.fit(x).unwrap();
        }
        let probe = &samples[1];
        let keys: Vec<BucketKey> = (0..6)
            .map(|component| detector.bucket_key(component, probe).unwrap().unwrap())
            .collect();
        let before: Vec<f64> = keys
            .iter()
            .map(|key| detector.bucket(0, key).unwrap().weight)
            .collect();

        // Scored at index 3 against burn-in counts stamped 0.
        detector.score(probe).unwrap();
        let factor = 2f64.powf(-decay * 3.0);
        let mut expected_raw = 0.0;
        for (key, weight) in keys.iter().zip(&before) {
            let decayed = weight * factor;
            for table in 0..2 {
                let entry = detector.bucket(table, key).unwrap();
                assert_eq!(entry.timestamp, 3);
                assert!((entry.weight - (decayed + 1.0)).abs() < 1e-12);
            }
            expected_raw += decayed.ln_1p();
        }
        expected_raw /= 6.0;
        assert!((detector.last_raw_score().unwrap() - expected_raw).abs() < 1e-12);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut detector: RsHash<f64> = RsHash::new(config(3, 4, 2)).unwrap();
        detector.fit(&array![1.0, 2.0, 3.0]).unwrap();
        let err = detector.fit(&array![1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            DetectorError::DimensionMismatch {
                expected: 3,
                got: 2
            }
        );
        assert!(detector.score(&array![1.0]).is_err());
        assert!(detector.bucket_key(0, &array![1.0]).is_err());
    }

    #[test]
    fn test_deterministic_with_seed() {
        let stream = uniform_stream(4, 200, 3, -1.0, 1.0);
        let run = || {
            let mut detector: RsHash<f64> = RsHash::new(config(20, 16, 4)).unwrap();
            stream
                .iter()
                .map(|x| detector.fit_score(x).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_stationary_stream_is_quiet() {
        let mut detector: RsHash<f64> = RsHash::new(config(20, 25, 4)).unwrap();
        let mut scored = 0;
        let mut flagged = 0;
        for x in uniform_stream(5, 200, 1, 0.45, 0.55) {
            if let Some(score) = detector.fit_score(&x).unwrap() {
                assert!(score.is_finite());
                scored += 1;
                if score != 0.0 {
                    flagged += 1;
                }
            }
        }
        assert_eq!(scored, 181);
        assert!(flagged <= 18, "{} of {} scores flagged", flagged, scored);
    }

    #[test]
    fn test_far_cells_saturate() {
        let mut detector: RsHash<f64> = RsHash::new(config(2, 8, 1)).unwrap();
        detector.fit(&array![0.0]).unwrap();
        detector.fit(&array![1.0]).unwrap();
        for component in 0..8 {
            let near = detector.bucket_key(component, &array![0.0]).unwrap().unwrap();
            assert_eq!(near.coords, vec![0]);
            let high = detector.bucket_key(component, &array![1e30]).unwrap().unwrap();
            assert_eq!(high.coords, vec![i64::MAX]);
            let low = detector.bucket_key(component, &array![-1e30]).unwrap().unwrap();
            assert_eq!(low.coords, vec![i64::MIN]);
        }
    }

    #[test]
    fn test_flagged_scores_follow_gate() {
        // Two tight clusters at the ends of the range, then one point in the empty middle.
        let outlier = 300;
        let mut detector: RsHash<f64> = RsHash::new(RsHashConfig {
            init_len: 20,
            decay: 0.1,
            n_components: 50,
            n_hashes: 2,
            seed: Some(42),
        })
        .unwrap();
        let mut flagged = Vec::new();
        for t in 0..400 {
            let x = if t == outlier {
                array![0.5]
            } else {
                array![(t % 2) as f64]
            };
            let Some(score) = detector.fit_score(&x).unwrap() else {
                continue;
            };
            assert!(score.is_finite());
            if score == 0.0 {
                continue;
            }
            flagged.push(t);
            assert!(score > 0.0 && score <= 1.0);
            let raw = detector.last_raw_score().unwrap();
            let history = detector.score_history();
            let mean = history.mean()[0];
            let z = (raw - mean) / history.std()[0];
            assert!(z.abs() > Z_THRESHOLD);
            let extreme = if z > 0.0 {
                history.max()[0]
            } else {
                history.min()[0]
            };
            assert!((score - (raw - mean) / (extreme - mean)).abs() < 1e-12);
        }
        assert!(flagged.contains(&outlier), "flagged: {:?}", flagged);
    }
}
