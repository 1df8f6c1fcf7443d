//! Shared helpers for the integration tests: synthetic patient tables written
//! to disk in the format the trainer reads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use std::fs;
use std::path::Path;

/// Writes `n` patients with columns `bmi,glucose[,sex],outcome`. Risk rises
/// monotonically with bmi and glucose. With `balanced`, exactly half the
/// patients are positive, assigned by rank of the underlying risk.
pub fn write_cohort(path: &Path, n: usize, seed: u64, with_sex: bool, balanced: bool) {
    let mut rng = StdRng::seed_from_u64(seed);
    let bmi_dist = Normal::new(28.0, 5.0).unwrap();
    let glucose_dist = Normal::new(110.0, 25.0).unwrap();
    let noise = Normal::new(0.0, 1.0).unwrap();

    let rows: Vec<(f64, f64, bool, f64)> = (0..n)
        .map(|_| {
            let bmi: f64 = rng.sample(bmi_dist);
            let glucose: f64 = rng.sample(glucose_dist);
            let female = rng.gen_bool(0.5);
            let risk = 0.2 * (bmi - 28.0) + 0.05 * (glucose - 110.0) + rng.sample(noise);
            (bmi, glucose, female, risk)
        })
        .collect();

    let labels: Vec<u8> = if balanced {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| rows[a].3.total_cmp(&rows[b].3));
        let mut labels = vec![0u8; n];
        for &i in &order[n / 2..] {
            labels[i] = 1;
        }
        labels
    } else {
        rows.iter()
            .map(|r| u8::from(rng.gen_bool(1.0 / (1.0 + (-r.3).exp()))))
            .collect()
    };

    let mut text = String::from(if with_sex {
        "bmi,glucose,sex,outcome\n"
    } else {
        "bmi,glucose,outcome\n"
    });
    for ((bmi, glucose, female, _), label) in rows.iter().zip(&labels) {
        let sex = if *female { "F" } else { "M" };
        if with_sex {
            text.push_str(&format!("{bmi:.2},{glucose:.1},{sex},{label}\n"));
        } else {
            text.push_str(&format!("{bmi:.2},{glucose:.1},{label}\n"));
        }
    }
    fs::write(path, text).expect("write cohort");
}
