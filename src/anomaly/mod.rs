use crate::common::{FType, Observation};
use crate::error::Result;

pub mod half_space_tree;
pub mod rs_hash;

/// Contract shared by the online anomaly detectors.
///
/// Observations are processed one at a time: `fit` updates the model, `score` reads it.
/// Scoring may itself update the model's window state, hence `&mut self`. A score of
/// `None` means the detector is still warming up.
pub trait AnomalyDetector<F: FType> {
    /// Learn from one observation. Returns the detector to allow chaining.
    fn fit(&mut self, x: &Observation<F>) -> Result<&mut Self>;

    /// Score one observation, `None` until the warm-up is over.
    fn score(&mut self, x: &Observation<F>) -> Result<Option<F>>;

    /// Number of observations fitted so far.
    fn n_seen(&self) -> u64;

    fn fit_score(&mut self, x: &Observation<F>) -> Result<Option<F>> {
        self.fit(x)?.score(x)
    }
}

#[cfg(test)]
mod tests {
    use super::half_space_tree::{HalfSpaceTree, HalfSpaceTreeConfig};
    use super::rs_hash::{RsHash, RsHashConfig};
    use super::*;
    use crate::error::DetectorError;
    use ndarray::array;

    fn warm_up_length<D: AnomalyDetector<f64>>(detector: &mut D) -> u64 {
        let mut t: f64 = 0.0;
        loop {
            t += 1.0;
            let x = array![t.sin(), (2.0 * t).cos()];
            if detector.fit_score(&x).unwrap().is_some() {
                return detector.n_seen();
            }
        }
    }

    #[test]
    fn test_fit_chains() {
        let mut hst: HalfSpaceTree<f32> = HalfSpaceTree::new(HalfSpaceTreeConfig {
            window_size: 2,
            height: 2,
            n_trees: 2,
            seed: Some(0),
        })
        .unwrap();
        let score = hst
            .fit(&array![0.0])
            .unwrap()
            .fit(&array![1.0])
            .unwrap()
            .fit(&array![0.5])
            .unwrap()
            .score(&array![0.5])
            .unwrap();
        assert_eq!(hst.n_seen(), 3);
        assert!(score.is_some());
    }

    #[test]
    fn test_warm_up_lengths() {
        let mut hst: HalfSpaceTree<f64> = HalfSpaceTree::new(HalfSpaceTreeConfig {
            window_size: 7,
            seed: Some(0),
            ..Default::default()
        })
        .unwrap();
        // Scoring starts with the observation following the first window.
        assert_eq!(warm_up_length(&mut hst), 8);

        let mut rs_hash: RsHash<f64> = RsHash::new(RsHashConfig {
            init_len: 7,
            n_components: 10,
            n_hashes: 2,
            seed: Some(0),
            ..Default::default()
        })
        .unwrap();
        // Scoring starts with the observation completing the burn-in.
        assert_eq!(warm_up_length(&mut rs_hash), 7);
    }

    #[test]
    fn test_failed_fit_leaves_detector_untouched() {
        let mut rs_hash: RsHash<f64> = RsHash::new(RsHashConfig {
            init_len: 2,
            n_components: 4,
            n_hashes: 2,
            seed: Some(0),
            ..Default::default()
        })
        .unwrap();
        rs_hash.fit(&array![1.0, 2.0]).unwrap();
        assert!(matches!(
            rs_hash.fit_score(&array![1.0, 2.0, 3.0]),
            Err(DetectorError::DimensionMismatch { .. })
        ));
        assert_eq!(rs_hash.n_seen(), 1);
        let score = rs_hash.fit_score(&array![3.0, 4.0]).unwrap();
        assert!(score.unwrap().is_finite());
    }
}
