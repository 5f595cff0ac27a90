use anyhow::Result;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use tracing::{info, warn};
use verdant_core::{EcosystemConfig, EcosystemManager, Position};

/// Frames simulated by the headless shell (ten minutes at 60 fps).
const FRAME_BUDGET: u32 = 36_000;
const FRAME_SECONDS: f32 = 1.0 / 60.0;

fn main() -> Result<()> {
    init_tracing();
    let mut ecosystem = bootstrap_ecosystem()?;
    info!("Starting Verdant simulation shell");
    run_headless(&mut ecosystem);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap_ecosystem() -> Result<EcosystemManager> {
    let config = EcosystemConfig {
        history_capacity: 600,
        rng_seed: Some(0xFACA_DEAF_0123_4567),
        ..EcosystemConfig::default()
    };
    let seed = config.rng_seed.unwrap_or_default();
    let mut ecosystem = EcosystemManager::new(config)?;

    let mut rng = SmallRng::seed_from_u64(seed);
    for _ in 0..48 {
        let position = Position::new(
            rng.random_range(-40.0..40.0),
            0.0,
            rng.random_range(-40.0..40.0),
        );
        ecosystem.plant_seed(position);
    }
    for _ in 0..6 {
        let position = Position::new(
            rng.random_range(-20.0..20.0),
            0.0,
            rng.random_range(-20.0..20.0),
        );
        ecosystem.add_herbivore(position);
    }

    info!(
        plants = ecosystem.plant_count(),
        herbivores = ecosystem.herbivore_count(),
        "Seeded initial population",
    );
    Ok(ecosystem)
}

fn run_headless(ecosystem: &mut EcosystemManager) {
    for frame in 0..FRAME_BUDGET {
        let summary = ecosystem.tick(FRAME_SECONDS);
        if summary.plant_count + summary.herbivore_count == 0 {
            warn!(tick = summary.tick.0, "Population collapsed; stopping");
            return;
        }
        if frame % 600 == 599 {
            info!(
                tick = summary.tick.0,
                plants = summary.plant_count,
                herbivores = summary.herbivore_count,
                births = summary.births,
                deaths = summary.deaths,
                daytime = summary.is_day_time,
                light = summary.light_level,
                "Ecosystem summary",
            );
        }
    }
    if let Some(summary) = ecosystem.history().last() {
        info!(
            tick = summary.tick.0,
            plants = summary.plant_count,
            herbivores = summary.herbivore_count,
            "Frame budget exhausted",
        );
    }
}
