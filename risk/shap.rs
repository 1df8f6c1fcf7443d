//! # Tree Attributions
//!
//! Exact Shapley values of a boosted ensemble under the path-dependent value
//! function: a feature that is "unknown" is integrated out by following both
//! children of every split on it, weighted by the training cover of each child.
//!
//! This is the polynomial-time algorithm of Lundberg et al. (Algorithm 2 in
//! "Consistent Individualized Feature Attribution for Tree Ensembles"). A walk
//! down a tree keeps the unique features seen on the current path together with
//! the fraction of "feature absent" (`zero_fraction`) and "feature present"
//! (`one_fraction`) flow, and the permutation weights of every subset size.
//!
//! Attributions live in margin (log-odds) space, so that
//! `baseline + sum(contributions)` equals the classifier margin exactly and
//! `sigmoid` of it equals the predicted probability.

use crate::gbdt::{GradientBoostedClassifier, Tree, sigmoid};
use ndarray::{Array1, ArrayView1};

/// Number of contributions shown when the caller does not ask for a count.
pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    /// Transformed feature name, e.g. `bmi` or `sex=F`.
    pub feature: String,
    /// Position in the transformed feature vector.
    pub index: usize,
    /// The transformed value the patient has for this feature.
    pub value: f64,
    /// Additive effect on the margin.
    pub contribution: f64,
}

/// Per-feature additive explanation of one prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    /// Expected margin before any feature is observed.
    pub baseline: f64,
    /// Sorted by descending absolute contribution; ties keep feature order.
    pub contributions: Vec<Contribution>,
}

impl Explanation {
    pub fn margin(&self) -> f64 {
        self.baseline + self.contributions.iter().map(|c| c.contribution).sum::<f64>()
    }

    pub fn probability(&self) -> f64 {
        sigmoid(self.margin())
    }

    /// The `k` strongest contributions (fewer if there are not that many features).
    pub fn top(&self, k: usize) -> &[Contribution] {
        &self.contributions[..k.min(self.contributions.len())]
    }
}

/// Explains one transformed row. `names` must follow the transformed layout.
pub fn explain_row(
    model: &GradientBoostedClassifier,
    names: &[String],
    row: ArrayView1<f64>,
) -> Explanation {
    let phi = tree_shap(model, row);
    let mut contributions: Vec<Contribution> = names
        .iter()
        .enumerate()
        .map(|(index, name)| Contribution {
            feature: name.clone(),
            index,
            value: row[index],
            contribution: phi[index],
        })
        .collect();
    contributions.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
    Explanation {
        baseline: model.expected_margin(),
        contributions,
    }
}

/// Shapley values of every feature for `row`, summed over all trees.
pub fn tree_shap(model: &GradientBoostedClassifier, row: ArrayView1<f64>) -> Array1<f64> {
    let mut phi = vec![0.0; model.n_features];
    for tree in &model.trees {
        let capacity = tree.depth() + 2;
        let mut walker = PathWalker {
            tree,
            row,
            phi: &mut phi,
        };
        walker.recurse(0, Vec::with_capacity(capacity), 1.0, 1.0, None);
    }
    Array1::from(phi)
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

struct PathWalker<'a, 'r, 'p> {
    tree: &'a Tree,
    row: ArrayView1<'r, f64>,
    phi: &'p mut [f64],
}

impl PathWalker<'_, '_, '_> {
    fn recurse(
        &mut self,
        node: usize,
        mut path: Vec<PathElement>,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        extend_path(&mut path, zero_fraction, one_fraction, feature);
        let tree = self.tree;
        let current = &tree.nodes[node];

        if current.is_leaf() {
            for i in 1..path.len() {
                let weight = unwound_path_sum(&path, i);
                let element = path[i];
                if let Some(f) = element.feature {
                    self.phi[f] +=
                        weight * (element.one_fraction - element.zero_fraction) * current.value;
                }
            }
            return;
        }

        let hot = tree.child_for(node, self.row);
        let cold = if hot == current.left { current.right } else { current.left };
        let hot_zero = tree.nodes[hot].cover / current.cover;
        let cold_zero = tree.nodes[cold].cover / current.cover;
        let split_feature = Some(current.feature);

        // A feature split on twice along one path counts once.
        let (mut incoming_zero, mut incoming_one) = (1.0, 1.0);
        if let Some(k) = path.iter().position(|e| e.feature == split_feature) {
            incoming_zero = path[k].zero_fraction;
            incoming_one = path[k].one_fraction;
            unwind_path(&mut path, k);
        }

        self.recurse(
            hot,
            path.clone(),
            hot_zero * incoming_zero,
            incoming_one,
            split_feature,
        );
        self.recurse(cold, path, cold_zero * incoming_zero, 0.0, split_feature);
    }
}

fn extend_path(path: &mut Vec<PathElement>, zero: f64, one: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction: zero,
        one_fraction: one,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero * path[i].weight * (depth - i) as f64 / denom;
    }
}

/// Removes element `k` from the path, undoing its `extend_path`.
fn unwind_path(path: &mut Vec<PathElement>, k: usize) {
    let depth = path.len() - 1;
    let one = path[k].one_fraction;
    let zero = path[k].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].weight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one_portion * denom / ((i + 1) as f64 * one);
            next_one_portion = tmp - path[i].weight * zero * (depth - i) as f64 / denom;
        } else {
            path[i].weight = path[i].weight * denom / (zero * (depth - i) as f64);
        }
    }
    for i in k..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total permutation weight of the path with element `k` unwound, without
/// modifying the path.
fn unwound_path_sum(path: &[PathElement], k: usize) -> f64 {
    let depth = path.len() - 1;
    let one = path[k].one_fraction;
    let zero = path[k].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].weight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = next_one_portion * denom / ((i + 1) as f64 * one);
            total += tmp;
            next_one_portion = path[i].weight - tmp * zero * (depth - i) as f64 / denom;
        } else if zero != 0.0 {
            total += path[i].weight / zero / ((depth - i) as f64 / denom);
        }
    }
    total
}
