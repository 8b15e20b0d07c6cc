//! Trains the VAE on synthetic sine windows with injected spikes and prints
//! the reconstruction scores of clean versus spiked windows.
//!
//! ```text
//! RUST_LOG=debug cargo run -p ruvector-vae --example train_synthetic [train_config.json]
//! ```

use std::f32::consts::TAU;

use candle_core::Device;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ruvector_vae::{TimeSeriesDataset, TrainConfig, VaeConfig, VaeTrainer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const WINDOW: usize = 33;

fn sine_windows(n: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| {
            let phase = rng.gen_range(0.0..TAU);
            let freq = rng.gen_range(0.15..0.3);
            (0..WINDOW)
                .map(|t| {
                    let noise = rng.gen_range(-0.02..0.02);
                    (0.5 + 0.35 * (phase + freq * t as f32).sin() + noise).clamp(0.0, 1.0)
                })
                .collect()
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let train_config = match std::env::args().nth(1) {
        Some(path) => TrainConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => TrainConfig {
            epochs: 20,
            shuffle: true,
            checkpoint_path: Some(std::env::temp_dir().join("ruvector-vae").join("best.safetensors")),
            ..Default::default()
        },
    };

    let mut rng = StdRng::seed_from_u64(train_config.seed);
    let n_train = 512;
    let train = TimeSeriesDataset::new(sine_windows(n_train, &mut rng), vec![0.0; n_train])?;
    let val = TimeSeriesDataset::new(sine_windows(64, &mut rng), vec![0.0; 64])?;

    let model_config = VaeConfig::new(WINDOW, 16, 4).with_sampler_seed(train_config.seed);
    let mut trainer = VaeTrainer::new(model_config, train_config, Device::Cpu)?;
    let report = trainer.fit(&train, &val)?;
    println!("{}", report.to_json()?);

    let mut scored = sine_windows(8, &mut rng);
    let mut labels = vec![0.0; 8];
    for (window, label) in scored.iter_mut().zip(labels.iter_mut()).skip(4) {
        let at = rng.gen_range(0..WINDOW);
        window[at] = if window[at] > 0.5 { 0.0 } else { 1.0 };
        *label = 1.0;
    }
    let scored = TimeSeriesDataset::new(scored, labels.clone())?;
    let batches = scored.batches(scored.len(), &Device::Cpu)?;
    let scores = trainer.model().reconstruction_scores(&batches[0].inputs)?;
    for (score, label) in scores.iter().zip(labels) {
        let kind = if label > 0.0 { "spiked" } else { "clean" };
        println!("{kind:>6}  score={score:.3}");
    }
    Ok(())
}
