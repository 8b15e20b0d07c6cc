//! # RuVector VAE
//!
//! Convolutional variational autoencoder for fixed-length, univariate
//! time-series windows, built on Candle.
//!
//! - **Encoder**: two strided 1-D convolutions and two linear heads producing
//!   the posterior mean and log-variance.
//! - **Sampler**: reparameterized draws in [`Mode::Train`], the posterior mean
//!   in [`Mode::Eval`].
//! - **Decoder**: a linear projection and two transposed convolutions ending in
//!   a sigmoid, so reconstructions are Bernoulli probabilities.
//! - **Trainer**: Adam with L2 weight decay on summed BCE plus `beta`-weighted KL, with
//!   best-validation checkpointing to safetensors.
//!
//! Inputs are expected to be scaled into `[0, 1]`. Sequence lengths are
//! checked at construction: with the default architecture only `L ≡ 1 (mod 4)`,
//! `L ≥ 5`, reconstructs exactly.
//!
//! ### Usage Example
//!
//! ```rust,ignore
//! use candle_core::Device;
//! use ruvector_vae::{TimeSeriesDataset, TrainConfig, VaeConfig, VaeTrainer};
//!
//! let train = TimeSeriesDataset::from_flat(train_values, 9)?;
//! let val = TimeSeriesDataset::from_flat(val_values, 9)?;
//!
//! let mut trainer = VaeTrainer::new(
//!     VaeConfig::new(9, 32, 10),
//!     TrainConfig {
//!         checkpoint_path: Some("checkpoints/vae.safetensors".into()),
//!         ..Default::default()
//!     },
//!     Device::Cpu,
//! )?;
//! let report = trainer.fit(&train, &val)?;
//! println!("{}", report.to_json()?);
//! ```

#![warn(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod geometry;
pub mod layers;
pub mod loss;
pub mod model;
pub mod optim;
pub mod sampler;
pub mod trainer;

// Re-export commonly used types
pub use checkpoint::{
    load_checkpoint, CheckpointSink, MemorySink, ParameterSnapshot, SafetensorsSink,
};
pub use config::{CheckpointPolicy, TrainConfig, VaeConfig};
pub use data::{Batch, TimeSeriesDataset};
pub use error::{Result, VaeError};
pub use geometry::{Architecture, ConvGeometry, LatentGeometry};
pub use layers::TransposedConv1d;
pub use loss::{binary_cross_entropy_sum, kl_divergence, vae_loss, LossValues, VaeLoss};
pub use model::{VaeOutput, VariationalAutoencoder};
pub use optim::Adam;
pub use sampler::{LatentSampler, Mode};
pub use trainer::{EpochStats, EvaluationSummary, TrainingReport, VaeTrainer};
