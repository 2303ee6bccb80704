//! Run a handful of simulated students with different behaviour patterns
//! through a generated sample course and print their final mastery.

use anyhow::Context;
use rand::rngs::StdRng;
use rand::SeedableRng;

use lyceum::sim::{
    generate_catalog, ExcessivePerfectionism, FallingBehind, GeneratorOptions, MotivationDecay,
    MotivationSpikes, OutcomeStream, Simulator,
};
use lyceum::{Engine, EngineConfig, TargetPoints};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lyceum::logging::init_logging();

    let config = EngineConfig::load_or_default("engine.toml");
    let mut rng = StdRng::seed_from_u64(42);
    let options = GeneratorOptions::default();
    let catalog = generate_catalog(&options, &config, &mut rng)
        .context("failed to generate the sample course")?;
    let semester_id = catalog.semesters[0].id.clone();
    let join_code = catalog.semesters[0].join_code.clone();
    let engine = Engine::new(catalog, config);

    let students: Vec<(&str, TargetPoints, Box<dyn OutcomeStream>)> = vec![
        ("decaying", TargetPoints::Medium, Box::new(MotivationDecay::new(1))),
        ("spiking", TargetPoints::Medium, Box::new(MotivationSpikes::new(2))),
        ("behind", TargetPoints::Low, Box::new(FallingBehind::new(3))),
        ("perfectionist", TargetPoints::High, Box::new(ExcessivePerfectionism::new(4))),
    ];

    for (user, target, pattern) in students {
        engine
            .enroll(user, &semester_id, &join_code)
            .await
            .with_context(|| format!("failed to enroll {user}"))?;
        let mut simulator = Simulator::new(user, &semester_id, target, pattern);
        let stats = simulator
            .run(&engine)
            .await
            .with_context(|| format!("simulation failed for {user}"))?;

        let mut progress = engine.progress_snapshot(user, &semester_id).await?;
        progress.sort_by(|a, b| a.topic.cmp(&b.topic));
        let total: f64 = progress.iter().map(|p| p.total_points()).sum();
        println!(
            "{user:>14}: {} answers, {} solved, {:.1} total points over {} topics",
            stats.submitted,
            stats.solved,
            total,
            progress.len()
        );
    }

    Ok(())
}
