use crate::{
    config::AgentConfig,
    error::{LocalizationError, Result},
    map::OccupancyMap,
    sensors::{Sensor, SensorReading},
    utility::{normalize_heading, Pose},
};
use rand::Rng;

/// Degrees the agent turns after bumping into an obstacle
pub const TURN_INCREMENT: f64 = 15.;
/// Enough turns to try every heading reachable with `TURN_INCREMENT` once
pub const MAX_TURNS: usize = 24;

/// The simulated agent being localized.
///
/// Its true pose is hidden from the filter, which only sees its noisy range readings
/// and heading changes.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedAgent {
    pub pose: Pose,
    pub speed: f64,
    pub sensor_noise: f64,
}

impl TrackedAgent {
    pub fn new(pose: Pose, speed: f64, sensor_noise: f64) -> Self {
        Self {
            pose: pose.normalize(),
            speed,
            sensor_noise,
        }
    }

    /// Places an agent at a uniformly random free pose by rejection sampling
    pub fn random<R: Rng>(
        map: &OccupancyMap,
        config: &AgentConfig,
        rng: &mut R,
        max_retries: usize,
    ) -> Result<Self> {
        for _ in 0..max_retries {
            let pose = Pose::random(rng, 0.0..360., 0.0..map.width, 0.0..map.height);
            if map.is_free_pose(&pose) {
                return Ok(Self::new(pose, config.speed, config.sensor_noise));
            }
        }
        Err(LocalizationError::FatalMap {
            operation: "agent placement",
            attempts: max_retries,
        })
    }

    /// Reads `sensor` from the true pose and corrupts the reading with noise
    pub fn sense<S, R>(&self, map: &OccupancyMap, sensor: &S, rng: &mut R) -> SensorReading
    where
        S: Sensor<Output = SensorReading>,
        R: Rng,
    {
        sensor
            .sense(map, self.pose.position)
            .add_noise(self.sensor_noise, rng)
    }

    /// Moves `speed` units forward, turning by `TURN_INCREMENT` whenever the way is blocked.
    ///
    /// Returns the change in heading. An agent boxed in on every heading is a
    /// `FatalMap` error.
    pub fn advance(&mut self, map: &OccupancyMap, speed: f64) -> Result<f64> {
        let start_heading = self.pose.heading;
        for _ in 0..MAX_TURNS {
            let candidate = self.pose.advanced(speed);
            if map.is_free_pose(&candidate) {
                self.pose = candidate;
                return Ok(self.pose.heading - start_heading);
            }
            self.pose.heading = normalize_heading(self.pose.heading + TURN_INCREMENT);
        }
        self.pose.heading = start_heading;
        Err(LocalizationError::FatalMap {
            operation: "agent move",
            attempts: MAX_TURNS,
        })
    }
}
