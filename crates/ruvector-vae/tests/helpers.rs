//! Shared helpers for the ruvector-vae integration tests.
#![allow(dead_code)]

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ruvector_vae::{TimeSeriesDataset, VaeConfig, VariationalAutoencoder};

/// Builds a model over a fresh parameter store on the CPU. Unset seeds
/// default to 0 so every test starts from a fixed state.
pub fn build_model(config: VaeConfig) -> (VarMap, VariationalAutoencoder) {
    let varmap = VarMap::new();
    let model =
        VariationalAutoencoder::from_varmap(config.seeded_from(0), &varmap, &Device::Cpu).unwrap();
    (varmap, model)
}

/// `(batch, 1, len)` tensor of uniform values in `[0, 1)`.
pub fn random_windows(batch: usize, len: usize, seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f32> = (0..batch * len).map(|_| rng.gen::<f32>()).collect();
    Tensor::from_vec(values, (batch, 1, len), &Device::Cpu).unwrap()
}

/// Dataset of `n` phase-shifted sine windows scaled into `[0.1, 0.9]`.
pub fn sine_dataset(n: usize, len: usize, seed: u64) -> TimeSeriesDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let windows: Vec<Vec<f32>> = (0..n)
        .map(|_| {
            let phase = rng.gen_range(0.0..std::f32::consts::TAU);
            (0..len)
                .map(|t| 0.5 + 0.4 * (phase + t as f32 * 0.7).sin())
                .collect()
        })
        .collect();
    TimeSeriesDataset::new(windows, vec![0.0; n]).unwrap()
}

/// Row-major contents of any tensor.
pub fn flat(t: &Tensor) -> Vec<f32> {
    t.flatten_all().unwrap().to_vec1().unwrap()
}
