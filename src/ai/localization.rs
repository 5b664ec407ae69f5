use crate::{
    ai::{
        presets::{self, JitterModel},
        resampling::{draw_indices, is_degenerate, probabilities, Categorical, ResamplingStrategy},
    },
    config::SimConfig,
    error::{LocalizationError, Result},
    map::OccupancyMap,
    sensors::{LimitedSensor, RangeFinder, Sensor, SensorReading},
    simulation::robot::TrackedAgent,
    utility::{normalize_heading, Point, Pose},
};
use log::{debug, info, warn};
use nalgebra::{Matrix2, Vector2};
use rand::{rngs::StdRng, seq::index, Rng};
use rayon::prelude::*;
use std::sync::Arc;

/// Scores a particle's predicted reading (second argument) against the observed one (first).
/// Higher is more likely.
pub trait WeightCalculator: Fn(&SensorReading, &SensorReading) -> f64 + Send + Sync {}

impl<F> WeightCalculator for F where F: Fn(&SensorReading, &SensorReading) -> f64 + Send + Sync {}

/// A weighted pose hypothesis
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Particle {
    pub pose: Pose,
    pub weight: f64,
}

impl Particle {
    pub fn new(pose: Pose, weight: f64) -> Self {
        Self { pose, weight }
    }

    /// Moves `speed` units along the heading if the destination is free.
    /// Returns whether the particle moved.
    pub fn attempt_move(&mut self, speed: f64, map: &OccupancyMap) -> bool {
        let candidate = self.pose.advanced(speed);
        if map.is_free_pose(&candidate) {
            self.pose = candidate;
            true
        } else {
            false
        }
    }

    /// What `sensor` would read if the agent were at this particle's pose
    pub fn read_sensor<S>(&self, sensor: &S, map: &OccupancyMap) -> SensorReading
    where
        S: Sensor<Output = SensorReading>,
    {
        sensor.sense(map, self.pose.position)
    }
}

/// Weighted mean pose of a swarm with the spread of its positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub pose: Pose,
    pub covariance: Matrix2<f64>,
}

/// The particle set of the filter. Owns the particles and shares the map with the engine.
#[derive(Debug, Clone)]
pub struct Swarm {
    particles: Vec<Particle>,
    map: Arc<OccupancyMap>,
}

impl Swarm {
    /// Spreads `count` particles uniformly over the free cells of `map` with random headings
    pub fn uniform<R: Rng>(map: Arc<OccupancyMap>, count: usize, rng: &mut R) -> Result<Self> {
        let free = free_cells_of(&map)?;
        let weight = 1. / count as f64;
        let particles = (0..count)
            .map(|_| Particle::new(random_free_pose(&map, &free, rng), weight))
            .collect();
        Ok(Self { particles, map })
    }

    /// Replaces a `fraction` of the particles, chosen at random, with particles spread
    /// uniformly over free space. Replacements take the mean weight.
    pub fn inject_uniform<R: Rng>(&mut self, fraction: f64, rng: &mut R) -> Result<()> {
        let count = (fraction * self.len() as f64).round() as usize;
        if count == 0 {
            return Ok(());
        }
        let free = free_cells_of(&self.map)?;
        let weight = self.particles.iter().map(|p| p.weight).sum::<f64>() / self.len() as f64;
        for idx in index::sample(rng, self.len(), count.min(self.len())) {
            self.particles[idx] = Particle::new(random_free_pose(&self.map, &free, rng), weight);
        }
        Ok(())
    }

    /// Builds a uniformly weighted swarm from known poses
    pub fn from_poses(map: Arc<OccupancyMap>, poses: &[Pose]) -> Self {
        let weight = 1. / poses.len() as f64;
        Self {
            particles: poses.iter().map(|pose| Particle::new(*pose, weight)).collect(),
            map,
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn poses(&self) -> Vec<Pose> {
        self.particles.iter().map(|p| p.pose).collect()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    pub fn map(&self) -> &Arc<OccupancyMap> {
        &self.map
    }

    /// Weighs every particle by comparing what it would sense against `observed`
    pub fn score<S, W>(&mut self, observed: &SensorReading, sensor: &S, weight: &W)
    where
        S: Sensor<Output = SensorReading> + Sync,
        W: WeightCalculator,
    {
        let map = &self.map;
        self.particles.par_iter_mut().for_each(|particle| {
            let predicted = particle.read_sensor(sensor, map);
            particle.weight = weight(observed, &predicted);
        });
    }

    /// Divides every weight by `Σw + epsilon`, or makes them uniform if they are degenerate
    pub fn normalize(&mut self, epsilon: f64) {
        let weights = self.weights();
        if is_degenerate(&weights) {
            warn!(
                "Degenerate particle weights (sum = {}), resetting to uniform",
                weights.iter().sum::<f64>()
            );
        }
        let normalized = probabilities(&weights, epsilon);
        for (particle, weight) in self.particles.iter_mut().zip(normalized) {
            particle.weight = weight;
        }
    }

    /// Draws a new generation of the same size with probability proportional to weight.
    ///
    /// Every drawn pose is jittered; draws whose jittered pose is not free are redrawn
    /// from the weights, with at most `max_retries` attempts per particle. New particles carry
    /// the normalized weight of their source.
    pub fn resample<R: Rng>(
        &self,
        rng: &mut R,
        strategy: ResamplingStrategy,
        jitter: &JitterModel,
        epsilon: f64,
        max_retries: usize,
    ) -> Result<Swarm> {
        let probabilities = probabilities(&self.weights(), epsilon);
        let categorical = Categorical::new(&probabilities);
        let sources = draw_indices(strategy, &probabilities, &categorical, self.len(), rng);
        let mut particles = Vec::with_capacity(self.len());
        for mut source in sources {
            let mut placed = None;
            for _ in 0..max_retries {
                placed = jitter.try_perturb(&self.particles[source].pose, &self.map, rng);
                if placed.is_some() {
                    break;
                }
                source = categorical.draw(rng);
            }
            match placed {
                Some(pose) => particles.push(Particle::new(pose, probabilities[source])),
                None => {
                    return Err(LocalizationError::FatalMap {
                        operation: "resample draw",
                        attempts: max_retries,
                    })
                }
            }
        }
        Ok(Swarm {
            particles,
            map: self.map.clone(),
        })
    }

    /// Applies the agent's motion to every particle: turn by `delta_heading`, then try to
    /// move `speed` units. Blocked particles stay where they are.
    pub fn propagate(&mut self, delta_heading: f64, speed: f64) {
        let map = &self.map;
        self.particles.par_iter_mut().for_each(|particle| {
            particle.pose.heading = normalize_heading(particle.pose.heading + delta_heading);
            particle.attempt_move(speed, map);
        });
    }

    /// Unweighted mean position
    pub fn centroid(&self) -> Point {
        if self.is_empty() {
            return Point::default();
        }
        let sum = self
            .particles
            .iter()
            .fold(Point::default(), |sum, p| sum + p.pose.position);
        sum * (1. / self.len() as f64)
    }

    /// Weighted mean pose and position covariance. Headings are averaged on the circle.
    pub fn estimate(&self) -> Estimate {
        let weights = self.relative_weights();
        let mut mean = Vector2::zeros();
        let (mut sin, mut cos) = (0., 0.);
        for (particle, weight) in self.particles.iter().zip(&weights) {
            mean += Vector2::new(particle.pose.position.x, particle.pose.position.y) * *weight;
            let radians = particle.pose.heading.to_radians();
            sin += radians.sin() * weight;
            cos += radians.cos() * weight;
        }
        let mut covariance = Matrix2::zeros();
        for (particle, weight) in self.particles.iter().zip(&weights) {
            let offset = Vector2::new(particle.pose.position.x, particle.pose.position.y) - mean;
            covariance += offset * offset.transpose() * *weight;
        }
        Estimate {
            pose: Pose::new(mean.x, mean.y, f64::atan2(sin, cos).to_degrees()),
            covariance,
        }
    }

    /// `1 / Σw²` over the weights scaled to sum to one.
    /// Ranges from 1 (one particle holds everything) to `len()` (uniform).
    pub fn effective_sample_size(&self) -> f64 {
        if self.is_empty() {
            return 0.;
        }
        1. / self.relative_weights().iter().map(|w| w * w).sum::<f64>()
    }

    /// Weights scaled to sum to one, uniform when they cannot be
    fn relative_weights(&self) -> Vec<f64> {
        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        if total > 0. && total.is_finite() {
            self.particles.iter().map(|p| p.weight / total).collect()
        } else {
            vec![1. / self.len() as f64; self.len()]
        }
    }
}

fn free_cells_of(map: &OccupancyMap) -> Result<Vec<(usize, usize)>> {
    let free = map.free_cells();
    if free.is_empty() {
        return Err(LocalizationError::Configuration(
            "the map has no free cells to place particles in".to_owned(),
        ));
    }
    Ok(free)
}

/// A uniformly random pose inside one of the `free` cells
fn random_free_pose<R: Rng>(map: &OccupancyMap, free: &[(usize, usize)], rng: &mut R) -> Pose {
    let (row, col) = free[rng.gen_range(0..free.len())];
    let pose = Pose::new(
        (col as f64 + rng.gen_range(0.0..1.)) * map.cell_size,
        (row as f64 + rng.gen_range(0.0..1.)) * map.cell_size,
        rng.gen_range(0.0..360.),
    );
    // Guard against the offset rounding onto the next cell
    if map.is_free_pose(&pose) {
        pose
    } else {
        pose.with_position(map.cell_center(row, col))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    Stepping,
    Done,
}

/// Everything observable about one filter cycle
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: u64,
    /// True agent pose after it moved
    pub agent: Pose,
    /// The noisy reading the particles were scored against
    pub observation: SensorReading,
    /// Particle poses after propagation
    pub poses: Vec<Pose>,
    /// Normalized weights inherited from each particle's source
    pub weights: Vec<f64>,
    pub effective_sample_size: f64,
}

/// Drives the localization loop: sense, score, normalize, resample, act, propagate.
pub struct MCLEngine<R: Rng = StdRng> {
    config: SimConfig,
    map: Arc<OccupancyMap>,
    sensor: RangeFinder,
    jitter: JitterModel,
    agent: TrackedAgent,
    swarm: Swarm,
    state: EngineState,
    steps: u64,
    rng: R,
}

impl<R: Rng> MCLEngine<R> {
    /// Generates a random map from `config.map` and sets up the agent and swarm on it
    pub fn new(config: SimConfig, mut rng: R) -> Result<Self> {
        config.validate()?;
        let map = OccupancyMap::random(
            config.map.width,
            config.map.height,
            config.map.cell_size,
            config.map.obstacle_density,
            &mut rng,
        )?;
        Self::with_map(config, map, rng)
    }

    /// Sets up the agent and swarm on a given map. `config.map` is only used again
    /// if the map is regenerated on reset.
    pub fn with_map(config: SimConfig, map: OccupancyMap, mut rng: R) -> Result<Self> {
        config.validate()?;
        let map = Arc::new(map);
        let jitter = jitter_for(&map, &config)?;
        let agent = TrackedAgent::random(&map, &config.agent, &mut rng, config.mcl.max_retries)?;
        let swarm = Swarm::uniform(map.clone(), config.mcl.particle_count, &mut rng)?;
        let sensor = RangeFinder::new(config.agent.sensor_limit);
        info!(
            "Localizing with {} particles on a {}x{} grid, sensor range {}",
            swarm.len(),
            map.cols(),
            map.rows(),
            sensor
                .range()
                .map_or_else(|| "unlimited".to_owned(), |range| range.to_string())
        );
        Ok(Self {
            sensor,
            config,
            map,
            jitter,
            agent,
            swarm,
            state: EngineState::Init,
            steps: 0,
            rng,
        })
    }

    /// Moves the agent to a known pose, which must be free
    pub fn place_agent(&mut self, pose: Pose) -> Result<()> {
        if !self.map.is_free_pose(&pose) {
            return Err(LocalizationError::Configuration(format!(
                "cannot place the agent in occupied space at ({}, {})",
                pose.position.x, pose.position.y
            )));
        }
        self.agent.pose = pose.normalize();
        Ok(())
    }

    /// Runs one filter cycle with the agent moving `speed` units
    pub fn step(&mut self, speed: f64) -> Result<StepReport> {
        if self.state == EngineState::Done {
            return Err(LocalizationError::Stopped);
        }
        let mcl = &self.config.mcl;
        let observation = self.agent.sense(&self.map, &self.sensor, &mut self.rng);
        self.swarm.score(
            &observation,
            &self.sensor,
            &presets::gaussian_weight(mcl.sigma),
        );
        self.swarm.normalize(mcl.epsilon);
        let effective_sample_size = self.swarm.effective_sample_size();
        let mut next = self.swarm.resample(
            &mut self.rng,
            mcl.resampling,
            &self.jitter,
            mcl.epsilon,
            mcl.max_retries,
        )?;
        next.inject_uniform(mcl.random_injection, &mut self.rng)?;
        let delta_heading = self.agent.advance(&self.map, speed)?;
        next.propagate(delta_heading, speed);
        self.swarm = next;
        self.steps += 1;
        self.state = EngineState::Stepping;

        let estimate = self.swarm.estimate();
        debug!(
            "Step {}: ESS {:.1}, estimate ({:.1}, {:.1}) heading {:.0}, agent ({:.1}, {:.1})",
            self.steps,
            effective_sample_size,
            estimate.pose.position.x,
            estimate.pose.position.y,
            estimate.pose.heading,
            self.agent.pose.position.x,
            self.agent.pose.position.y
        );
        Ok(StepReport {
            step: self.steps,
            agent: self.agent.pose,
            observation,
            poses: self.swarm.poses(),
            weights: self.swarm.weights(),
            effective_sample_size,
        })
    }

    pub fn stop(&mut self) {
        if self.state != EngineState::Done {
            info!("Stopping after {} steps", self.steps);
        }
        self.state = EngineState::Done;
    }

    /// Re-randomizes the agent and swarm, optionally on a freshly generated map
    pub fn reset(&mut self, regenerate_map: bool) -> Result<()> {
        if regenerate_map {
            let map = OccupancyMap::random(
                self.config.map.width,
                self.config.map.height,
                self.config.map.cell_size,
                self.config.map.obstacle_density,
                &mut self.rng,
            )?;
            self.jitter = jitter_for(&map, &self.config)?;
            self.map = Arc::new(map);
        }
        self.agent = TrackedAgent::random(
            &self.map,
            &self.config.agent,
            &mut self.rng,
            self.config.mcl.max_retries,
        )?;
        self.swarm = Swarm::uniform(
            self.map.clone(),
            self.config.mcl.particle_count,
            &mut self.rng,
        )?;
        self.steps = 0;
        self.state = EngineState::Init;
        info!("Reset (new map: {})", regenerate_map);
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn map(&self) -> &Arc<OccupancyMap> {
        &self.map
    }

    pub fn agent(&self) -> &TrackedAgent {
        &self.agent
    }

    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn estimate(&self) -> Estimate {
        self.swarm.estimate()
    }
}

fn jitter_for(map: &OccupancyMap, config: &SimConfig) -> Result<JitterModel> {
    presets::normal_jitter(
        map.cell_size,
        config.mcl.position_noise,
        config.mcl.heading_noise,
    )?
    .with_heading_reset(config.mcl.heading_reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const ROOM: &str = "##########
                        #........#
                        #..##....#
                        #........#
                        #....#...#
                        #........#
                        ##########";

    fn room() -> Arc<OccupancyMap> {
        Arc::new(OccupancyMap::parse(20., ROOM).unwrap())
    }

    fn small_config() -> SimConfig {
        let mut config = SimConfig::default();
        config.mcl.particle_count = 200;
        config.mcl.sigma = 20.;
        config
    }

    #[test]
    fn test_particle_move_is_blocked_by_walls() {
        let map = room();
        let mut particle = Particle::new(Pose::new(30., 30., 0.), 1.);
        assert!(particle.attempt_move(10., &map));
        assert_eq!(particle.pose.position, Point { x: 30., y: 40. });
        let mut blocked = Particle::new(Pose::new(30., 30., 180.), 1.);
        assert!(!blocked.attempt_move(15., &map));
        assert_eq!(blocked.pose, Pose::new(30., 30., 180.));
    }

    #[test]
    fn test_uniform_swarm_is_free() {
        let mut rng = StdRng::seed_from_u64(4);
        let swarm = Swarm::uniform(room(), 300, &mut rng).unwrap();
        assert_eq!(swarm.len(), 300);
        for particle in swarm.particles() {
            assert!(swarm.map().is_free_pose(&particle.pose));
            assert!(particle.pose.heading >= 0. && particle.pose.heading < 360.);
        }
        let full = Arc::new(OccupancyMap::parse(20., "###\n###\n###").unwrap());
        assert!(Swarm::uniform(full, 10, &mut rng).is_err());
    }

    #[test]
    fn test_score_prefers_matching_pose() {
        let map = room();
        let sensor = RangeFinder::new(None);
        let truth = Pose::new(150., 70., 0.);
        let observed = sensor.sense(&map, truth.position);
        let mut swarm = Swarm::from_poses(
            map,
            &[truth, Pose::new(30., 110., 0.), Pose::new(170., 30., 0.)],
        );
        swarm.score(&observed, &sensor, &presets::gaussian_weight(20.));
        let weights = swarm.weights();
        assert_eq!(weights[0], 1.);
        assert!(weights[1] < 1. && weights[2] < 1.);
    }

    #[test]
    fn test_estimate_and_ess() {
        let poses = [Pose::new(30., 30., 350.), Pose::new(50., 30., 10.)];
        let mut swarm = Swarm::from_poses(room(), &poses);
        assert!((swarm.effective_sample_size() - 2.).abs() < 1e-12);
        let estimate = swarm.estimate();
        assert!((estimate.pose.position.x - 40.).abs() < 1e-9);
        assert!(estimate.pose.heading < 1e-6 || estimate.pose.heading > 360. - 1e-6);
        assert!((estimate.covariance[(0, 0)] - 100.).abs() < 1e-9);
        assert!(estimate.covariance[(1, 1)].abs() < 1e-9);
        assert_eq!(swarm.centroid(), Point { x: 40., y: 30. });

        swarm.particles[0].weight = 1.;
        swarm.particles[1].weight = 0.;
        assert!((swarm.effective_sample_size() - 1.).abs() < 1e-12);
        assert!((swarm.estimate().pose.position.x - 30.).abs() < 1e-9);
    }

    #[test]
    fn test_resample_keeps_heavy_particles() {
        let map = room();
        let mut rng = StdRng::seed_from_u64(8);
        let jitter = JitterModel::new(0.5, 1.).unwrap();
        let mut swarm = Swarm::from_poses(
            map.clone(),
            &[Pose::new(30., 30., 0.), Pose::new(170., 110., 0.)],
        );
        swarm.particles[0].weight = 0.;
        swarm.particles[1].weight = 1.;
        let next = swarm
            .resample(&mut rng, ResamplingStrategy::Systematic, &jitter, 1e-8, 100)
            .unwrap();
        assert_eq!(next.len(), 2);
        for particle in next.particles() {
            assert!(particle.pose.position.dist((170., 110.).into()) < 10.);
            assert!((particle.weight - 1.).abs() < 1e-6);
        }
    }

    #[test]
    fn test_resample_gives_up_without_free_space() {
        let walls = Arc::new(OccupancyMap::parse(20., "###\n###\n###").unwrap());
        let swarm = Swarm::from_poses(walls, &[Pose::new(30., 30., 0.); 3]);
        let jitter = JitterModel::new(4., 18.).unwrap();
        let mut rng = StdRng::seed_from_u64(12);
        for strategy in [ResamplingStrategy::Multinomial, ResamplingStrategy::Systematic] {
            assert!(matches!(
                swarm.resample(&mut rng, strategy, &jitter, 1e-8, 7),
                Err(LocalizationError::FatalMap {
                    operation: "resample draw",
                    attempts: 7,
                })
            ));
        }
    }

    #[test]
    fn test_injection_replaces_a_fraction() {
        let origin = Pose::new(30., 30., 0.);
        let mut swarm = Swarm::from_poses(room(), &[origin; 100]);
        let mut rng = StdRng::seed_from_u64(23);
        swarm.inject_uniform(0., &mut rng).unwrap();
        assert!(swarm.poses().iter().all(|pose| *pose == origin));

        swarm.inject_uniform(0.25, &mut rng).unwrap();
        assert_eq!(swarm.len(), 100);
        let moved = swarm.poses().iter().filter(|pose| **pose != origin).count();
        assert_eq!(moved, 25);
        assert!(swarm.poses().iter().all(|pose| swarm.map().is_free_pose(pose)));
        assert!(swarm.weights().iter().all(|w| (w - 0.01).abs() < 1e-12));
    }

    #[test]
    fn test_propagate_turns_and_moves() {
        let mut swarm = Swarm::from_poses(
            room(),
            &[Pose::new(30., 30., 0.), Pose::new(30., 90., 270.)],
        );
        swarm.propagate(90., 10.);
        let poses = swarm.poses();
        assert_eq!(poses[0].heading, 90.);
        assert!((poses[0].position.x - 40.).abs() < 1e-9);
        // Heading wraps to 0 and the particle moves down
        assert_eq!(poses[1].heading, 0.);
        assert!((poses[1].position.y - 100.).abs() < 1e-9);
    }

    #[test]
    fn test_engine_lifecycle() {
        let map = OccupancyMap::parse(20., ROOM).unwrap();
        let mut engine =
            MCLEngine::with_map(small_config(), map, StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(engine.state(), EngineState::Init);
        assert!(engine.place_agent(Pose::new(70., 50., 0.)).is_err());
        engine.place_agent(Pose::new(30., 30., 90.)).unwrap();

        for step in 1..=5 {
            let report = engine.step(10.).unwrap();
            assert_eq!(report.step, step);
            assert_eq!(report.poses.len(), 200);
            assert_eq!(report.weights.len(), 200);
            assert!(report.effective_sample_size >= 1. && report.effective_sample_size <= 200.);
            assert!(report.poses.iter().all(|pose| engine.map().is_free_pose(pose)));
            assert!(engine.map().is_free_pose(&report.agent));
        }
        assert_eq!(engine.state(), EngineState::Stepping);

        engine.stop();
        assert!(matches!(engine.step(10.), Err(LocalizationError::Stopped)));

        engine.reset(false).unwrap();
        assert_eq!(engine.state(), EngineState::Init);
        assert_eq!(engine.steps(), 0);
        assert_eq!(engine.map().cols(), 10);
        assert!(engine.step(10.).is_ok());

        engine.reset(true).unwrap();
        assert_eq!((engine.map().rows(), engine.map().cols()), (30, 40));
        assert_eq!(engine.swarm().len(), 200);
    }

    #[test]
    fn test_engine_is_deterministic() {
        let run = || {
            let mut engine = MCLEngine::new(small_config(), StdRng::seed_from_u64(77)).unwrap();
            (0..10).map(|_| engine.step(10.).unwrap().poses).last()
        };
        assert_eq!(run(), run());
    }
}
