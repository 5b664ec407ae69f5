use crate::{map::OccupancyMap, utility::Point};
use nalgebra::Vector4;
use rand::Rng;
use rand_distr::StandardNormal;
use std::fmt;

/// The generic trait for any sensor.
///
/// `Output` is the output of the sensor (percieved info from the environment).
pub trait Sensor {
    type Output;

    /// Senses `map` from `position`
    fn sense(&self, map: &OccupancyMap, position: Point) -> Self::Output;
}

/// General trait for sensors that can have limitations (e.g. a distance sensor has a maximum range)
pub trait LimitedSensor<T>: Sensor {
    /// Returns the maximum range of this sensor.
    /// Returns `None` by default if the sensor has no maximum.
    fn range(&self) -> Option<T> {
        None
    }
}

/// Distances to the nearest obstacle along the four grid axes.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub up: f64,
    pub down: f64,
    pub left: f64,
    pub right: f64,
}

impl SensorReading {
    pub fn new(up: f64, down: f64, left: f64, right: f64) -> Self {
        Self {
            up,
            down,
            left,
            right,
        }
    }

    /// Caps every distance at `limit`, if there is one
    pub fn apply_limit(self, limit: Option<f64>) -> Self {
        match limit {
            Some(limit) => Self {
                up: self.up.min(limit),
                down: self.down.min(limit),
                left: self.left.min(limit),
                right: self.right.min(limit),
            },
            None => self,
        }
    }

    /// Adds zero-mean gaussian noise to each distance with a standard deviation of
    /// `distance * level / 2`, so longer readings are less certain.
    pub fn add_noise<R: Rng>(self, level: f64, rng: &mut R) -> Self {
        let mut noisy = |distance: f64| -> f64 {
            let z: f64 = rng.sample(StandardNormal);
            (distance + z * distance * level / 2.).max(0.)
        };
        Self {
            up: noisy(self.up),
            down: noisy(self.down),
            left: noisy(self.left),
            right: noisy(self.right),
        }
    }

    pub fn to_vector(&self) -> Vector4<f64> {
        Vector4::new(self.up, self.down, self.left, self.right)
    }

    /// Euclidean distance between the readings as 4-d vectors
    pub fn distance(&self, other: &SensorReading) -> f64 {
        (self.to_vector() - other.to_vector()).norm()
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "up: {:.1}, down: {:.1}, left: {:.1}, right: {:.1}",
            self.up, self.down, self.left, self.right
        )
    }
}

/// Four axis-aligned range finders casting against an occupancy map.
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeFinder {
    limit: Option<f64>,
}

impl RangeFinder {
    pub fn new(limit: Option<f64>) -> Self {
        Self { limit }
    }
}

impl Sensor for RangeFinder {
    type Output = SensorReading;

    fn sense(&self, map: &OccupancyMap, position: Point) -> Self::Output {
        map.ray_cast(position.x, position.y).apply_limit(self.limit)
    }
}

impl LimitedSensor<f64> for RangeFinder {
    fn range(&self) -> Option<f64> {
        self.limit
    }
}
