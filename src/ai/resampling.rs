use log::warn;
use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};
use serde::Deserialize;

/// How a new generation's source particles are chosen from the old one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    /// Independent roulette-wheel draws
    #[default]
    Multinomial,
    /// One random offset and evenly spaced pointers (low variance)
    Systematic,
}

/// Whether `weights` carry no information: a zero or non-finite sum
pub fn is_degenerate(weights: &[f64]) -> bool {
    let total: f64 = weights.iter().sum();
    !(total > 0. && total.is_finite())
}

/// Turns weights into draw probabilities: `w / (Σw + ε)`.
///
/// Degenerate weights give every particle the same probability.
pub fn probabilities(weights: &[f64], epsilon: f64) -> Vec<f64> {
    if is_degenerate(weights) {
        return vec![1. / weights.len() as f64; weights.len()];
    }
    let total: f64 = weights.iter().sum();
    weights.iter().map(|w| w / (total + epsilon)).collect()
}

/// Categorical distribution over particle indices.
pub struct Categorical {
    distr: Option<WeightedIndex<f64>>,
    len: usize,
}

impl Categorical {
    pub fn new(probabilities: &[f64]) -> Self {
        let distr = match WeightedIndex::new(probabilities) {
            Ok(distr) => Some(distr),
            Err(e) => {
                warn!("Falling back to uniform draws: {}", e);
                None
            }
        };
        Self {
            distr,
            len: probabilities.len(),
        }
    }

    pub fn draw<R: Rng>(&self, rng: &mut R) -> usize {
        match &self.distr {
            Some(distr) => distr.sample(rng),
            None => rng.gen_range(0..self.len),
        }
    }
}

/// Picks `count` source indices according to `strategy`
pub fn draw_indices<R: Rng>(
    strategy: ResamplingStrategy,
    probabilities: &[f64],
    categorical: &Categorical,
    count: usize,
    rng: &mut R,
) -> Vec<usize> {
    match strategy {
        ResamplingStrategy::Multinomial => (0..count).map(|_| categorical.draw(rng)).collect(),
        ResamplingStrategy::Systematic => systematic_indices(probabilities, count, rng),
    }
}

fn systematic_indices<R: Rng>(probabilities: &[f64], count: usize, rng: &mut R) -> Vec<usize> {
    let total: f64 = probabilities.iter().sum();
    if probabilities.is_empty() || count == 0 || !(total > 0.) {
        return Vec::new();
    }
    let step = 1. / count as f64;
    let mut pointer = rng.gen_range(0.0..step);
    let mut idx = 0;
    let mut cumulative = probabilities[0] / total;
    let mut indices = Vec::with_capacity(count);
    for _ in 0..count {
        while pointer > cumulative && idx < probabilities.len() - 1 {
            idx += 1;
            cumulative += probabilities[idx] / total;
        }
        indices.push(idx);
        pointer += step;
    }
    indices
}
