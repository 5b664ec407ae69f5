use serde::Deserialize;
use std::path::Path;

use crate::{
    ai::resampling::ResamplingStrategy,
    error::{LocalizationError, Result},
    map::DEFAULT_OBSTACLE_DENSITY,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub map: MapConfig,
    pub agent: AgentConfig,
    pub mcl: MCLConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub width: f64,
    pub height: f64,
    pub cell_size: f64,
    pub obstacle_density: f64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            width: 800.,
            height: 600.,
            cell_size: 20.,
            obstacle_density: DEFAULT_OBSTACLE_DENSITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub speed: f64,
    /// Relative standard deviation of range readings is `sensor_noise / 2`
    pub sensor_noise: f64,
    pub sensor_limit: Option<f64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            speed: 10.,
            sensor_noise: 0.05,
            sensor_limit: Some(500.),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MCLConfig {
    pub particle_count: usize,
    /// Scale of the gaussian likelihood kernel, in sensor units
    pub sigma: f64,
    /// Added to the weight sum before normalizing
    pub epsilon: f64,
    pub resampling: ResamplingStrategy,
    /// Position jitter standard deviation as a fraction of the cell size
    pub position_noise: f64,
    /// Heading jitter standard deviation as a fraction of a full turn
    pub heading_noise: f64,
    /// Probability that a resampled particle gets a uniformly random heading
    pub heading_reset: f64,
    /// Fraction of every new generation replaced by particles spread over free space
    pub random_injection: f64,
    /// Bound for every rejection-sampling loop
    pub max_retries: usize,
}

impl Default for MCLConfig {
    fn default() -> Self {
        Self {
            particle_count: 1000,
            sigma: 500.,
            epsilon: 1e-8,
            resampling: ResamplingStrategy::Multinomial,
            position_noise: 0.2,
            heading_noise: 0.05,
            heading_reset: 0.,
            random_injection: 0.,
            max_retries: 1000,
        }
    }
}

impl MCLConfig {
    /// Settings for finding an agent whose start is unknown on a cluttered map.
    ///
    /// A tight kernel separates look-alike places, while heading resets and injected
    /// particles recover from a swarm that collapsed onto the wrong place or heading.
    pub fn global_localization() -> Self {
        Self {
            sigma: 10.,
            heading_reset: 0.1,
            random_injection: 0.1,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub steps: u64,
    /// Seed for the pseudorandom source, drawn from entropy if absent
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            seed: None,
        }
    }
}

impl SimConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Checks the parameters that the map and filter cannot recover from.
    /// Map dimensions are checked when the map is built.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(LocalizationError::Configuration(message));
        if !(0.0..=1.0).contains(&self.map.obstacle_density) {
            return invalid(format!(
                "obstacle density must be within [0, 1], got {}",
                self.map.obstacle_density
            ));
        }
        if !(self.agent.speed.is_finite() && self.agent.speed > 0.) {
            return invalid(format!("agent speed must be positive, got {}", self.agent.speed));
        }
        if !(self.agent.sensor_noise >= 0.) {
            return invalid(format!(
                "sensor noise must not be negative, got {}",
                self.agent.sensor_noise
            ));
        }
        if let Some(limit) = self.agent.sensor_limit {
            if !(limit > 0.) {
                return invalid(format!("sensor limit must be positive, got {}", limit));
            }
        }
        if self.mcl.particle_count == 0 {
            return invalid("at least one particle is required".to_owned());
        }
        if !(self.mcl.sigma.is_finite() && self.mcl.sigma > 0.) {
            return invalid(format!("sigma must be positive, got {}", self.mcl.sigma));
        }
        if !(self.mcl.epsilon.is_finite() && self.mcl.epsilon > 0.) {
            return invalid(format!("epsilon must be positive, got {}", self.mcl.epsilon));
        }
        if !(self.mcl.position_noise >= 0. && self.mcl.heading_noise >= 0.) {
            return invalid(format!(
                "jitter factors must not be negative, got {} and {}",
                self.mcl.position_noise, self.mcl.heading_noise
            ));
        }
        for (name, value) in [
            ("heading_reset", self.mcl.heading_reset),
            ("random_injection", self.mcl.random_injection),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.mcl.max_retries == 0 {
            return invalid("max_retries must be at least 1".to_owned());
        }
        Ok(())
    }
}
