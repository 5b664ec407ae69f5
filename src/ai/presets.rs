use crate::{
    ai::localization::WeightCalculator,
    error::{LocalizationError, Result},
    map::OccupancyMap,
    sensors::SensorReading,
    utility::{normalize_heading, Point, Pose},
};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Gaussian kernel over the distance between two readings: `exp(-d² / 2σ²)`.
///
/// Identical readings score 1 and the score decays smoothly with distance without
/// ever reaching 0 for finite inputs (barring underflow for very small `sigma`).
pub fn gaussian_likelihood(observed: &SensorReading, predicted: &SensorReading, sigma: f64) -> f64 {
    let distance = observed.distance(predicted);
    (-distance.powi(2) / (2. * sigma.powi(2))).exp()
}

/// Creates a `WeightCalculator` which scores readings with [`gaussian_likelihood`]
pub fn gaussian_weight(sigma: f64) -> impl WeightCalculator {
    move |observed: &SensorReading, predicted: &SensorReading| {
        gaussian_likelihood(observed, predicted, sigma)
    }
}

/// Creates a `JitterModel` whose standard deviations are fractions of a cell (position)
/// and of a full turn (heading)
pub fn normal_jitter(cell_size: f64, position_factor: f64, heading_factor: f64) -> Result<JitterModel> {
    JitterModel::new(cell_size * position_factor, 360. * heading_factor)
}

/// Gaussian noise applied to poses when seeding a new particle generation.
///
/// Range readings say nothing about heading, so a fraction of jittered poses can have
/// their heading redrawn uniformly to keep every heading represented.
#[derive(Debug, Clone, Copy)]
pub struct JitterModel {
    position: Normal<f64>,
    heading: Normal<f64>,
    heading_reset: f64,
}

impl JitterModel {
    /// Noise margins are inputted as standard deviations
    pub fn new(position_dev: f64, heading_dev: f64) -> Result<Self> {
        let normal = |dev: f64| {
            // Normal::new only rejects non-finite deviations
            if !(dev >= 0.) {
                return Err(LocalizationError::Configuration(format!(
                    "jitter standard deviation must not be negative, got {}",
                    dev
                )));
            }
            Normal::new(0., dev).map_err(|e| {
                LocalizationError::Configuration(format!(
                    "invalid jitter standard deviation {}: {}",
                    dev, e
                ))
            })
        };
        Ok(Self {
            position: normal(position_dev)?,
            heading: normal(heading_dev)?,
            heading_reset: 0.,
        })
    }

    /// Redraws the heading uniformly with the given probability instead of jittering it
    pub fn with_heading_reset(mut self, probability: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(LocalizationError::Configuration(format!(
                "heading reset probability must be within [0, 1], got {}",
                probability
            )));
        }
        self.heading_reset = probability;
        Ok(self)
    }

    /// A single noisy copy of `pose`, or `None` if it landed outside of free space
    pub fn try_perturb<R: Rng>(&self, pose: &Pose, map: &OccupancyMap, rng: &mut R) -> Option<Pose> {
        let heading = if self.heading_reset > 0. && rng.gen_bool(self.heading_reset) {
            rng.gen_range(0.0..360.)
        } else {
            normalize_heading(pose.heading + self.heading.sample(rng))
        };
        let candidate = Pose {
            heading,
            position: pose.position
                + Point::from((self.position.sample(rng), self.position.sample(rng))),
        };
        if map.is_free_pose(&candidate) {
            Some(candidate)
        } else {
            None
        }
    }

    /// Perturbs `pose` until the result is free, giving up after `max_retries` tries
    pub fn perturb<R: Rng>(
        &self,
        pose: &Pose,
        map: &OccupancyMap,
        rng: &mut R,
        max_retries: usize,
    ) -> Result<Pose> {
        for _ in 0..max_retries {
            if let Some(candidate) = self.try_perturb(pose, map, rng) {
                return Ok(candidate);
            }
        }
        Err(LocalizationError::FatalMap {
            operation: "noisy pose construction",
            attempts: max_retries,
        })
    }
}
