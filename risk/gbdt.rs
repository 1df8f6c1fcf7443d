//! # Gradient-Boosted Decision Trees
//!
//! Binary classification by second-order gradient boosting of depth-limited
//! regression trees on the logistic loss.
//!
//! 1.  **Histograms:** every feature is cut once into at most `max_bins` bins
//!     (midpoints between distinct values, or quantiles for wide columns) and
//!     the training matrix is binned up front.
//! 2.  **Rounds:** each round samples rows and columns, computes gradients and
//!     hessians of the log-loss at the current margins, and grows one tree
//!     depth-first. Leaf weights are `-G / (H + lambda)` scaled by the learning
//!     rate.
//! 3.  **Split search:** candidate features are scanned in parallel with
//!     `rayon`, and candidates are reduced in feature order so the result is
//!     identical to a sequential scan.
//!
//! Every node keeps its cover (sum of hessians of the rows reaching it). The
//! covers are what makes exact tree attributions possible, see
//! [`crate::shap`].

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gains at or below this are treated as no improvement.
const MIN_GAIN: f64 = 1e-12;

/// Floor on per-row hessians so that covers stay strictly positive.
const MIN_HESSIAN: f64 = 1e-16;

/// Hyperparameters of the booster. Stored in the artifact for reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Fraction of rows sampled (without replacement) for each tree.
    pub subsample: f64,
    /// Fraction of columns sampled for each tree.
    pub colsample_bytree: f64,
    /// L2 regularisation on leaf weights.
    pub reg_lambda: f64,
    /// Minimum loss reduction required to split a node.
    pub min_split_loss: f64,
    /// Minimum hessian sum on each side of a split.
    pub min_child_weight: f64,
    pub max_bins: usize,
    pub seed: u64,
}

impl Default for BoosterConfig {
    fn default() -> Self {
        Self {
            n_estimators: 500,
            learning_rate: 0.02,
            max_depth: 4,
            subsample: 0.9,
            colsample_bytree: 0.9,
            reg_lambda: 1.0,
            min_split_loss: 0.0,
            min_child_weight: 1.0,
            max_bins: 256,
            seed: 42,
        }
    }
}

impl BoosterConfig {
    pub fn validate(&self) -> Result<(), BoosterError> {
        let invalid = |msg: String| Err(BoosterError::InvalidConfig(msg));
        if self.n_estimators == 0 {
            return invalid("n_estimators must be at least 1".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.max_depth == 0 {
            return invalid("max_depth must be at least 1".to_string());
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return invalid(format!("subsample must be in (0, 1], got {}", self.subsample));
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return invalid(format!(
                "colsample_bytree must be in (0, 1], got {}",
                self.colsample_bytree
            ));
        }
        if !(self.reg_lambda >= 0.0 && self.min_split_loss >= 0.0 && self.min_child_weight >= 0.0)
        {
            return invalid(
                "reg_lambda, min_split_loss and min_child_weight must be non-negative".to_string(),
            );
        }
        if !(2..=u16::MAX as usize).contains(&self.max_bins) {
            return invalid(format!(
                "max_bins must be between 2 and {}, got {}",
                u16::MAX,
                self.max_bins
            ));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum BoosterError {
    #[error("Cannot fit a classifier on an empty training matrix.")]
    EmptyTrainingSet,

    #[error("The training matrix has {rows} rows, but {labels} labels were supplied.")]
    LabelLengthMismatch { rows: usize, labels: usize },

    #[error("Training labels must be 0 or 1, found {0}.")]
    NonBinaryLabel(f64),

    #[error("All training labels are {0}; a classifier needs examples of both classes.")]
    SingleClass(f64),

    #[error("Invalid booster configuration: {0}")]
    InvalidConfig(String),
}

/// One node of a regression tree. Leaves are the nodes with `left == 0`; the
/// root is never anybody's child, so index 0 is free to act as the marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: usize,
    /// Rows with `x[feature] < threshold` go left.
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    /// Output in log-odds, already scaled by the learning rate.
    pub value: f64,
    /// Sum of the training hessians reaching this node.
    pub cover: f64,
}

impl TreeNode {
    fn leaf(value: f64, cover: f64) -> Self {
        Self {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
            cover,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    /// Index of the child `row` descends into from the internal node `node`.
    pub fn child_for(&self, node: usize, row: ArrayView1<f64>) -> usize {
        let n = &self.nodes[node];
        if row[n.feature] < n.threshold { n.left } else { n.right }
    }

    pub fn predict(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = 0;
        while !self.nodes[node].is_leaf() {
            node = self.child_for(node, row);
        }
        self.nodes[node].value
    }

    /// Cover-weighted mean output, i.e. the prediction when no feature is known.
    pub fn expected_value(&self) -> f64 {
        self.expected_value_from(0)
    }

    fn expected_value_from(&self, node: usize) -> f64 {
        let n = &self.nodes[node];
        if n.is_leaf() {
            return n.value;
        }
        let left = &self.nodes[n.left];
        let right = &self.nodes[n.right];
        (left.cover * self.expected_value_from(n.left)
            + right.cover * self.expected_value_from(n.right))
            / n.cover
    }

    /// Number of edges on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        fn walk(tree: &Tree, node: usize) -> usize {
            let n = &tree.nodes[node];
            if n.is_leaf() {
                0
            } else {
                1 + walk(tree, n.left).max(walk(tree, n.right))
            }
        }
        walk(self, 0)
    }
}

/// A fitted boosted ensemble for binary classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedClassifier {
    /// Initial margin: the log-odds of the training prevalence.
    pub base_score: f64,
    pub n_features: usize,
    pub trees: Vec<Tree>,
}

pub fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

impl GradientBoostedClassifier {
    /// Fits the ensemble on a dense feature matrix and 0/1 labels.
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        config: &BoosterConfig,
    ) -> Result<Self, BoosterError> {
        config.validate()?;
        let (n_rows, n_features) = x.dim();
        if n_rows == 0 || n_features == 0 {
            return Err(BoosterError::EmptyTrainingSet);
        }
        if y.len() != n_rows {
            return Err(BoosterError::LabelLengthMismatch {
                rows: n_rows,
                labels: y.len(),
            });
        }
        if let Some(&bad) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
            return Err(BoosterError::NonBinaryLabel(bad));
        }
        let positives = y.iter().filter(|&&v| v == 1.0).count();
        if positives == 0 || positives == n_rows {
            return Err(BoosterError::SingleClass(y[0]));
        }

        let cuts = FeatureCuts::from_matrix(x, config.max_bins);
        let binned = cuts.bin_matrix(x);
        let prevalence = positives as f64 / n_rows as f64;
        let base_score = (prevalence / (1.0 - prevalence)).ln();
        log::info!(
            "Boosting {} trees on {} rows x {} features (prevalence {:.3})",
            config.n_estimators,
            n_rows,
            n_features,
            prevalence
        );

        let mut margins = Array1::from_elem(n_rows, base_score);
        let mut grad = vec![0.0; n_rows];
        let mut hess = vec![0.0; n_rows];
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut trees = Vec::with_capacity(config.n_estimators);

        for round in 0..config.n_estimators {
            for i in 0..n_rows {
                let p = sigmoid(margins[i]);
                grad[i] = p - y[i];
                hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
            }

            let rows = sample_indices(&mut rng, n_rows, config.subsample);
            let features = sample_indices(&mut rng, n_features, config.colsample_bytree);
            let builder = TreeBuilder {
                binned: &binned,
                cuts: &cuts,
                grad: &grad,
                hess: &hess,
                features: &features,
                config,
                nodes: Vec::new(),
            };
            let tree = builder.build(rows);

            for (i, row) in x.rows().into_iter().enumerate() {
                margins[i] += tree.predict(row);
            }
            trees.push(tree);

            if (round + 1) % 100 == 0 {
                log::debug!(
                    "[round {}] training log-loss {:.5}",
                    round + 1,
                    log_loss(y, margins.view())
                );
            }
        }

        Ok(Self {
            base_score,
            n_features,
            trees,
        })
    }

    pub fn predict_margin(&self, row: ArrayView1<f64>) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    /// Positive-class probability for one transformed row.
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> f64 {
        sigmoid(self.predict_margin(row))
    }

    pub fn predict_proba_batch(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.rows().into_iter().map(|row| self.predict_proba(row)).collect()
    }

    /// Margin expected before any feature is observed: the attribution baseline.
    pub fn expected_margin(&self) -> f64 {
        self.base_score + self.trees.iter().map(Tree::expected_value).sum::<f64>()
    }
}

fn log_loss(y: ArrayView1<f64>, margins: ArrayView1<f64>) -> f64 {
    let total: f64 = y
        .iter()
        .zip(margins.iter())
        .map(|(&label, &m)| {
            let p = sigmoid(m).clamp(1e-15, 1.0 - 1e-15);
            -(label * p.ln() + (1.0 - label) * (1.0 - p).ln())
        })
        .sum();
    total / y.len() as f64
}

/// Samples `round(fraction * n)` (at least one) sorted indices without replacement.
fn sample_indices(rng: &mut StdRng, n: usize, fraction: f64) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n).collect();
    }
    let amount = ((n as f64 * fraction).round() as usize).clamp(1, n);
    let mut picked = index::sample(rng, n, amount).into_vec();
    picked.sort_unstable();
    picked
}

/// Per-feature split candidates. A value `v` falls into bin `k` when exactly
/// `k` cuts are `<= v`, so `bin <= k` is equivalent to `v < cuts[k]`.
#[derive(Debug, Clone)]
struct FeatureCuts {
    cuts: Vec<Vec<f64>>,
}

impl FeatureCuts {
    fn from_matrix(x: ArrayView2<f64>, max_bins: usize) -> Self {
        let cuts = x
            .columns()
            .into_iter()
            .map(|column| {
                let mut sorted = column.to_vec();
                sorted.sort_by(f64::total_cmp);
                candidate_cuts(&sorted, max_bins)
            })
            .collect();
        Self { cuts }
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }

    fn bin_matrix(&self, x: ArrayView2<f64>) -> Array2<u16> {
        Array2::from_shape_fn(x.dim(), |(i, j)| {
            self.cuts[j].partition_point(|&c| c <= x[[i, j]]) as u16
        })
    }
}

fn candidate_cuts(sorted: &[f64], max_bins: usize) -> Vec<f64> {
    let mut distinct = sorted.to_vec();
    distinct.dedup();
    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
    }
    let n = sorted.len();
    let mut cuts: Vec<f64> = (1..max_bins).map(|b| sorted[b * n / max_bins]).collect();
    cuts.dedup();
    // A cut at the minimum would only ever produce an empty left side.
    cuts.retain(|&c| c > sorted[0]);
    cuts
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    binned: &'a Array2<u16>,
    cuts: &'a FeatureCuts,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    config: &'a BoosterConfig,
    nodes: Vec<TreeNode>,
}

impl TreeBuilder<'_> {
    fn build(mut self, rows: Vec<usize>) -> Tree {
        self.grow(rows, 0);
        Tree { nodes: self.nodes }
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let index = self.nodes.len();
        let weight = -g / (h + self.config.reg_lambda) * self.config.learning_rate;
        self.nodes.push(TreeNode::leaf(weight, h));

        if depth >= self.config.max_depth {
            return index;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return index;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| (self.binned[[r, split.feature]] as usize) <= split.bin);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);

        let node = &mut self.nodes[index];
        node.feature = split.feature;
        node.threshold = split.threshold;
        node.left = left;
        node.right = right;
        index
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let parent_score = g * g / (h + self.config.reg_lambda);
        let candidates: Vec<Option<SplitCandidate>> = self
            .features
            .par_iter()
            .map(|&feature| self.best_split_for_feature(rows, feature, g, h, parent_score))
            .collect();

        candidates
            .into_iter()
            .flatten()
            .fold(None, |best: Option<SplitCandidate>, c| match best {
                Some(b) if b.gain >= c.gain => Some(b),
                _ => Some(c),
            })
            .filter(|c| c.gain > self.config.min_split_loss.max(MIN_GAIN))
    }

    fn best_split_for_feature(
        &self,
        rows: &[usize],
        feature: usize,
        g: f64,
        h: f64,
        parent_score: f64,
    ) -> Option<SplitCandidate> {
        let n_bins = self.cuts.n_bins(feature);
        if n_bins < 2 {
            return None;
        }
        let mut hist_g = vec![0.0; n_bins];
        let mut hist_h = vec![0.0; n_bins];
        let mut hist_n = vec![0usize; n_bins];
        for &r in rows {
            let bin = self.binned[[r, feature]] as usize;
            hist_g[bin] += self.grad[r];
            hist_h[bin] += self.hess[r];
            hist_n[bin] += 1;
        }

        let lambda = self.config.reg_lambda;
        let min_child = self.config.min_child_weight;
        let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
        let mut best: Option<SplitCandidate> = None;
        for bin in 0..n_bins - 1 {
            gl += hist_g[bin];
            hl += hist_h[bin];
            nl += hist_n[bin];
            let (gr, hr, nr) = (g - gl, h - hl, rows.len() - nl);
            if nl == 0 || nr == 0 || hl < min_child || hr < min_child {
                continue;
            }
            let gain = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent_score;
            if best.is_none_or(|b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    bin,
                    threshold: self.cuts.cuts[feature][bin],
                    gain,
                });
            }
        }
        best
    }
}
