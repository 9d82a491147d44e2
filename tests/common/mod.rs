#![allow(dead_code)]

use std::f64::consts::PI;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Deterministic gaussian-mixture test streams.
pub struct MixtureData {
    pub data: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
}

pub fn gaussian_mixture(
    num: usize,
    means: &[Vec<f32>],
    deviations: &[Vec<f32>],
    weights: &[f32],
    seed: u64,
) -> MixtureData {
    assert!(num > 0, "need at least one point");
    assert_eq!(means.len(), deviations.len(), "means and deviations must pair up");
    assert_eq!(means.len(), weights.len(), "weights and means must pair up");
    let dimensions = means[0].len();
    for (mean, deviation) in means.iter().zip(deviations) {
        assert_eq!(mean.len(), dimensions, "mixture components must agree on dimension");
        assert_eq!(deviation.len(), dimensions);
    }
    let total: f32 = weights.iter().sum();

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(num);
    let mut labels = Vec::with_capacity(num);
    for _ in 0..num {
        let mut pick: f32 = total * rng.gen::<f32>();
        let mut component = 0;
        while pick > weights[component] && component + 1 < weights.len() {
            pick -= weights[component];
            component += 1;
        }
        let point = (0..dimensions)
            .map(|d| gaussian(means[component][d], deviations[component][d], &mut rng))
            .collect();
        data.push(point);
        labels.push(component);
    }
    MixtureData { data, labels }
}

fn gaussian(mean: f32, deviation: f32, rng: &mut ChaCha20Rng) -> f32 {
    // Box-Muller, discarding the rare infinity from ln(0)
    let mut radius = f64::sqrt(-2.0 * f64::ln(rng.gen::<f64>()));
    while radius.is_infinite() {
        radius = f64::sqrt(-2.0 * f64::ln(rng.gen::<f64>()));
    }
    let angle = 2.0 * PI * rng.gen::<f64>();
    if rng.gen::<f32>() < 0.5 {
        mean + deviation * (radius * angle.cos()) as f32
    } else {
        mean + deviation * (radius * angle.sin()) as f32
    }
}

/// One tight cluster around `center`.
pub fn single_cluster(
    num: usize,
    center: &[f32],
    deviation: f32,
    seed: u64,
) -> Vec<Vec<f32>> {
    let deviations = vec![vec![deviation; center.len()]];
    gaussian_mixture(num, &[center.to_vec()], &deviations, &[1.0], seed).data
}
