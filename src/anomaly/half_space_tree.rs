use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use std::mem;

use crate::common::{to_float, FType, Observation};
use crate::error::{DetectorError, Result};
use crate::stats::{RunningStats, ScoreGate};

use super::AnomalyDetector;

/// Deepest tree the arena is allowed to hold.
pub const MAX_HEIGHT: u32 = 20;

/// Largest number of nodes the whole ensemble may hold.
pub const MAX_NODES: usize = 1 << 26;

// Return the index of a node's left child node.
#[inline]
fn left_child(node: usize) -> usize {
    node * 2 + 1
}

// Return the index of a node's right child node.
#[inline]
fn right_child(node: usize) -> usize {
    node * 2 + 2
}

/// Parameters of a [`HalfSpaceTree`] detector.
///
/// - `window_size`: number of observations in the reference and latest windows. Also the
///   warm-up length.
/// - `height`: depth of the leaves. A tree holds `2^(height + 1) - 1` nodes.
/// - `n_trees`: number of trees in the ensemble.
/// - `seed`: seed of the detector's generator, drawn from entropy when `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalfSpaceTreeConfig {
    pub window_size: u64,
    pub height: u32,
    pub n_trees: usize,
    pub seed: Option<u64>,
}

impl Default for HalfSpaceTreeConfig {
    fn default() -> Self {
        HalfSpaceTreeConfig {
            window_size: 250,
            height: 8,
            n_trees: 25,
            seed: None,
        }
    }
}

impl HalfSpaceTreeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(DetectorError::invalid("window_size", "must be positive"));
        }
        if self.height == 0 || self.height > MAX_HEIGHT {
            return Err(DetectorError::invalid(
                "height",
                &format!("must be between 1 and {}", MAX_HEIGHT),
            ));
        }
        if self.n_trees == 0 {
            return Err(DetectorError::invalid("n_trees", "must be positive"));
        }
        let n_nodes = (1usize << (self.height + 1)) - 1;
        match self.n_trees.checked_mul(n_nodes) {
            Some(total) if total <= MAX_NODES => Ok(()),
            _ => Err(DetectorError::invalid(
                "n_trees",
                &format!(
                    "n_trees * (2^(height + 1) - 1) must not exceed {}",
                    MAX_NODES
                ),
            )),
        }
    }
}

/// The whole ensemble, stored as flat arrays.
///
/// Nodes of a tree are laid out in heap order: the root is 0 and the children of `i` are
/// `2i + 1` and `2i + 2`, so the depth of a node is implied by its index. Tree `t` owns
/// the slice `t * n_nodes..(t + 1) * n_nodes` of the mass arrays and
/// `t * n_branches..(t + 1) * n_branches` of the split arrays.
#[derive(Debug, Clone)]
struct Trees<F: FType> {
    height: u32,
    n_trees: usize,
    n_nodes: usize,
    n_branches: usize,
    feature: Vec<usize>,
    threshold: Vec<F>,
    r_mass: Vec<u64>,
    l_mass: Vec<u64>,
}

impl<F: FType> Trees<F> {
    fn new(n_trees: usize, height: u32, n_features: usize, rng: &mut ChaCha8Rng) -> Self {
        // #nodes = 2 ^ (height + 1) - 1
        let n_nodes = (1usize << (height + 1)) - 1;
        // #branches = 2 ^ height - 1
        let n_branches = (1usize << height) - 1;

        let mut trees = Trees {
            height,
            n_trees,
            n_nodes,
            n_branches,
            feature: vec![0; n_trees * n_branches],
            threshold: vec![F::zero(); n_trees * n_branches],
            r_mass: vec![0; n_trees * n_nodes],
            l_mass: vec![0; n_trees * n_nodes],
        };
        for tree in 0..n_trees {
            trees.grow(tree, n_features, rng);
        }
        trees
    }

    /// Draw a bounding box and split it recursively at midpoints.
    ///
    /// Nodes are visited in pre-order with an explicit stack, each entry carrying its own
    /// copy of the box.
    fn grow(&mut self, tree: usize, n_features: usize, rng: &mut ChaCha8Rng) {
        let mut lower = Vec::with_capacity(n_features);
        let mut upper = Vec::with_capacity(n_features);
        for _ in 0..n_features {
            let s: f64 = rng.gen();
            let margin = s.max(1.0 - s);
            lower.push(s - 2.0 * margin);
            upper.push(s + 2.0 * margin);
        }

        let mut stack: Vec<(usize, u32, Vec<f64>, Vec<f64>)> = vec![(0, 0, lower, upper)];
        while let Some((node, depth, lower, upper)) = stack.pop() {
            if depth == self.height {
                continue;
            }
            let q = rng.gen_range(0..n_features);
            let p = (lower[q] + upper[q]) / 2.0;

            let branch = tree * self.n_branches + node;
            self.feature[branch] = q;
            self.threshold[branch] = to_float(p);

            let mut left_upper = upper.clone();
            left_upper[q] = p;
            let mut right_lower = lower.clone();
            right_lower[q] = p;

            stack.push((right_child(node), depth + 1, right_lower, upper));
            stack.push((left_child(node), depth + 1, lower, left_upper));
        }
    }

    #[inline]
    fn next(&self, tree: usize, node: usize, x: &Observation<F>) -> usize {
        let branch = tree * self.n_branches + node;
        if x[self.feature[branch]] > self.threshold[branch] {
            right_child(node)
        } else {
            left_child(node)
        }
    }

    /// Add `x` to the reference window of every tree.
    fn update_reference(&mut self, x: &Observation<F>) {
        for tree in 0..self.n_trees {
            let mut node = 0;
            for _ in 0..self.height {
                node = self.next(tree, node, x);
                self.r_mass[tree * self.n_nodes + node] += 1;
            }
        }
    }

    /// Average over the ensemble of the reference mass met along the path of `x`,
    /// weighted by `2^depth`. The path is added to the latest window.
    fn score_latest(&mut self, x: &Observation<F>) -> F {
        let two: F = to_float(2);
        let mut score = F::zero();
        for tree in 0..self.n_trees {
            let mut node = 0;
            for depth in 1..=self.height {
                node = self.next(tree, node, x);
                let idx = tree * self.n_nodes + node;
                score += to_float::<F, _>(self.r_mass[idx]) * two.powi(depth as i32);
                self.l_mass[idx] += 1;
            }
        }
        let n_trees: F = to_float(self.n_trees);
        score / n_trees
    }

    /// The latest window becomes the reference window.
    fn rotate(&mut self) {
        mem::swap(&mut self.r_mass, &mut self.l_mass);
        self.l_mass.fill(0);
    }
}

#[derive(Debug, Clone)]
enum Lifecycle<F: FType> {
    /// The number of features is unknown, no tree exists yet.
    Uninitialized,
    Ready(Trees<F>),
}

/// Observable phase of a [`HalfSpaceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfSpaceTreeState {
    Uninitialized,
    WarmUp,
    Active,
}

/// Half-space trees, an online variant of isolation forests.
///
/// Each tree partitions a randomly perturbed bounding box of the min-max scaled feature
/// space by halving it along random features. Nodes count how many observations fell in
/// their region during the reference window (`r`) and the latest window (`l`); every
/// `window_size` observations the latest window becomes the reference. The raw score of
/// an observation is the reference mass found along its path, deeper nodes weighing
/// more. Dense regions therefore give high raw scores, and the [`ScoreGate`] only lets
/// scores through when they stand out of the detector's own score history.
///
/// The trees are built on the first call to `fit`, once the number of features is known.
/// Scoring is unavailable during the first `window_size` observations.
///
/// # Example
///
/// ```
/// use light_outlier::anomaly::AnomalyDetector;
/// use light_outlier::anomaly::half_space_tree::{HalfSpaceTree, HalfSpaceTreeConfig};
/// use ndarray::array;
///
/// let config = HalfSpaceTreeConfig { window_size: 3, height: 4, n_trees: 5, seed: Some(7) };
/// let mut hst: HalfSpaceTree<f64> = HalfSpaceTree::new(config).unwrap();
///
/// for x in [0.1, 0.3, 0.2] {
///     assert_eq!(hst.fit_score(&array![x, 1.0 - x]).unwrap(), None);
/// }
/// let score = hst.fit_score(&array![0.25, 0.75]).unwrap();
/// assert!(score.unwrap().is_finite());
/// ```
#[derive(Debug, Clone)]
pub struct HalfSpaceTree<F: FType> {
    config: HalfSpaceTreeConfig,
    rng: ChaCha8Rng,
    n_seen: u64,
    data_stats: RunningStats<F>,
    gate: ScoreGate<F>,
    lifecycle: Lifecycle<F>,
    last_raw_score: Option<F>,
}

impl<F: FType> HalfSpaceTree<F> {
    pub fn new(config: HalfSpaceTreeConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(HalfSpaceTree {
            config,
            rng,
            n_seen: 0,
            data_stats: RunningStats::new(),
            gate: ScoreGate::new(),
            lifecycle: Lifecycle::Uninitialized,
            last_raw_score: None,
        })
    }

    pub fn config(&self) -> &HalfSpaceTreeConfig {
        &self.config
    }

    pub fn state(&self) -> HalfSpaceTreeState {
        match (&self.lifecycle, self.index()) {
            (Lifecycle::Ready(_), Some(index)) if index >= self.config.window_size => {
                HalfSpaceTreeState::Active
            }
            (Lifecycle::Ready(_), _) => HalfSpaceTreeState::WarmUp,
            (Lifecycle::Uninitialized, _) => HalfSpaceTreeState::Uninitialized,
        }
    }

    /// Statistics of the observations fitted so far.
    pub fn data_stats(&self) -> &RunningStats<F> {
        &self.data_stats
    }

    /// Statistics of the raw scores, as used for gating.
    pub fn score_history(&self) -> &RunningStats<F> {
        self.gate.history()
    }

    /// Ensemble average before gating, for the last scored observation.
    pub fn last_raw_score(&self) -> Option<F> {
        self.last_raw_score
    }

    /// Reference and latest masses of one tree, indexed in heap order.
    pub fn masses(&self, tree: usize) -> Option<(&[u64], &[u64])> {
        match &self.lifecycle {
            Lifecycle::Ready(trees) if tree < trees.n_trees => {
                let span = tree * trees.n_nodes..(tree + 1) * trees.n_nodes;
                Some((&trees.r_mass[span.clone()], &trees.l_mass[span]))
            }
            _ => None,
        }
    }

    /// Split feature and threshold of an internal node, `None` for leaves.
    pub fn split(&self, tree: usize, node: usize) -> Option<(usize, F)> {
        match &self.lifecycle {
            Lifecycle::Ready(trees) if tree < trees.n_trees && node < trees.n_branches => {
                let branch = tree * trees.n_branches + node;
                Some((trees.feature[branch], trees.threshold[branch]))
            }
            _ => None,
        }
    }

    // 0-based index of the last fitted observation.
    fn index(&self) -> Option<u64> {
        self.n_seen.checked_sub(1)
    }
}

impl<F: FType> AnomalyDetector<F> for HalfSpaceTree<F> {
    fn fit(&mut self, x: &Observation<F>) -> Result<&mut Self> {
        self.data_stats.update(x)?;
        self.n_seen += 1;
        let index = self.n_seen - 1;
        let window = self.config.window_size;

        if let Lifecycle::Uninitialized = self.lifecycle {
            let trees = Trees::new(self.config.n_trees, self.config.height, x.len(), &mut self.rng);
            debug!(
                n_trees = trees.n_trees,
                height = trees.height,
                n_features = x.len(),
                "built half-space trees"
            );
            self.lifecycle = Lifecycle::Ready(trees);
        }

        let normalized = self.data_stats.normalize(x)?;
        if let Lifecycle::Ready(trees) = &mut self.lifecycle {
            if index < window {
                trees.update_reference(&normalized);
            } else if index > window && index % window == 0 {
                trees.rotate();
                trace!(index, "rotated half-space tree windows");
            }
        }
        Ok(self)
    }

    fn score(&mut self, x: &Observation<F>) -> Result<Option<F>> {
        self.data_stats.check(x)?;
        match self.index() {
            Some(index) if index >= self.config.window_size => {}
            _ => return Ok(None),
        }

        let normalized = self.data_stats.normalize(x)?;
        let raw = match &mut self.lifecycle {
            Lifecycle::Ready(trees) => trees.score_latest(&normalized),
            Lifecycle::Uninitialized => return Ok(None),
        };
        self.last_raw_score = Some(raw);
        Ok(Some(self.gate.observe(raw)))
    }

    fn n_seen(&self) -> u64 {
        self.n_seen
    }
}
