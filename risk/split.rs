//! Stratified train/validation partitioning.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Row indices of each side of a split, in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratifiedSplit {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Holds out `ceil(validation_fraction * n)` rows while keeping the class
/// proportions of `labels` on both sides.
///
/// The validation quota is shared out between the classes in proportion to
/// their size, rounding down and handing the leftover rows to the classes with
/// the largest remainders. Rows are then drawn from a per-class shuffle driven
/// by `seed`, so the same labels and seed always give the same split.
pub fn stratified_split(labels: &[f64], validation_fraction: f64, seed: u64) -> StratifiedSplit {
    let n = labels.len();
    let n_validation = ((n as f64 * validation_fraction).ceil() as usize).min(n);

    let mut classes: Vec<Vec<usize>> = vec![Vec::new(), Vec::new()];
    for (i, &y) in labels.iter().enumerate() {
        classes[usize::from(y == 1.0)].push(i);
    }

    let quotas = allocate(&classes.iter().map(Vec::len).collect::<Vec<_>>(), n_validation);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n - n_validation);
    let mut validation = Vec::with_capacity(n_validation);
    for (mut rows, quota) in classes.into_iter().zip(quotas) {
        rows.shuffle(&mut rng);
        validation.extend_from_slice(&rows[..quota]);
        train.extend_from_slice(&rows[quota..]);
    }
    train.sort_unstable();
    validation.sort_unstable();

    log::debug!(
        "Stratified split: {} training rows, {} validation rows",
        train.len(),
        validation.len()
    );
    StratifiedSplit { train, validation }
}

/// Largest-remainder apportionment of `total` across groups of the given sizes.
fn allocate(sizes: &[usize], total: usize) -> Vec<usize> {
    let n: usize = sizes.iter().sum();
    if n == 0 {
        return vec![0; sizes.len()];
    }
    let exact: Vec<f64> = sizes
        .iter()
        .map(|&s| s as f64 * total as f64 / n as f64)
        .collect();
    let mut quotas: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let mut leftover = total - quotas.iter().sum::<usize>();

    let mut by_remainder: Vec<usize> = (0..sizes.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra)
    });
    for i in by_remainder {
        if leftover == 0 {
            break;
        }
        if quotas[i] < sizes[i] {
            quotas[i] += 1;
            leftover -= 1;
        }
    }
    quotas
}
