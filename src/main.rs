use grid_localization::{ai::localization::MCLEngine, config::SimConfig, error::Result};
use log::{error, info};
use rand::{rngs::StdRng, SeedableRng};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Localizes a simulated agent on a random map for `run.steps` steps.
/// The only argument is an optional path to a TOML config.
fn run() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading config from {}", path);
            SimConfig::from_file(path)?
        }
        None => SimConfig::default(),
    };
    let rng = match config.run.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let steps = config.run.steps;

    let mut engine = MCLEngine::new(config, rng)?;
    info!("Map:\n{}", engine.map());
    for _ in 0..steps {
        let speed = engine.agent().speed;
        let report = engine.step(speed)?;
        let estimate = engine.estimate();
        info!(
            "Step {:>4}: estimate error {:>6.1}, ESS {:>7.1}",
            report.step,
            estimate.pose.position.dist(report.agent.position),
            report.effective_sample_size
        );
    }
    engine.stop();
    Ok(())
}
