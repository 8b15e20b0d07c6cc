//! Model and training configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaeError};
use crate::geometry::Architecture;

/// Construction-time configuration of a [`VariationalAutoencoder`](crate::VariationalAutoencoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaeConfig {
    /// Window length `L`. Fixed for the lifetime of the model.
    pub input_len: usize,
    /// Base channel width `c` of the convolutional stacks.
    pub capacity: usize,
    /// Latent dimensionality `D`.
    pub latent_dims: usize,
    /// Kernel/stride/padding of every convolution.
    #[serde(default)]
    pub architecture: Architecture,
    /// Seed for the reparameterization noise. `None` draws from OS entropy.
    #[serde(default)]
    pub sampler_seed: Option<u64>,
    /// Seed for the initial parameter values, applied by
    /// [`VariationalAutoencoder::from_varmap`](crate::VariationalAutoencoder::from_varmap).
    #[serde(default)]
    pub init_seed: Option<u64>,
}

impl Default for VaeConfig {
    fn default() -> Self {
        Self {
            input_len: 9,
            capacity: 32,
            latent_dims: 10,
            architecture: Architecture::default(),
            sampler_seed: None,
            init_seed: None,
        }
    }
}

impl VaeConfig {
    /// Creates a config with the default architecture.
    pub fn new(input_len: usize, capacity: usize, latent_dims: usize) -> Self {
        Self {
            input_len,
            capacity,
            latent_dims,
            ..Default::default()
        }
    }

    /// Fixes the sampler seed so training-mode draws are reproducible.
    pub fn with_sampler_seed(mut self, seed: u64) -> Self {
        self.sampler_seed = Some(seed);
        self
    }

    /// Fixes the parameter-initialisation seed.
    pub fn with_init_seed(mut self, seed: u64) -> Self {
        self.init_seed = Some(seed);
        self
    }

    /// Fills any unset seed from `seed`, leaving explicit seeds untouched.
    pub fn seeded_from(mut self, seed: u64) -> Self {
        self.init_seed = self.init_seed.or(Some(seed));
        self.sampler_seed = self.sampler_seed.or(Some(seed.wrapping_add(1)));
        self
    }

    /// Checks that every size is positive.
    pub fn validate(&self) -> Result<()> {
        if self.input_len == 0 {
            return Err(VaeError::Config("input_len must be positive".into()));
        }
        if self.capacity == 0 {
            return Err(VaeError::Config("capacity must be positive".into()));
        }
        if self.latent_dims == 0 {
            return Err(VaeError::Config("latent_dims must be positive".into()));
        }
        Ok(())
    }

    /// Parses a config from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the config to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// How the best validation loss is tracked across evaluation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// One tracker for the whole run; a checkpoint is only written when a
    /// batch beats every validation batch seen so far.
    #[default]
    RunBest,
    /// The tracker resets at the start of every evaluation pass, so each
    /// epoch writes at least one checkpoint.
    EpochBest,
}

/// Optimization and checkpointing hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Windows per batch. The last batch of an epoch may be smaller.
    pub batch_size: usize,
    /// Number of training epochs.
    pub epochs: usize,
    /// Learning rate for Adam.
    pub learning_rate: f64,
    /// L2 penalty added to every gradient.
    pub weight_decay: f64,
    /// Weight of the KL term in the composite loss.
    pub variational_beta: f64,
    /// Destination of the best-validation checkpoint. `None` disables checkpointing.
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
    /// Best-loss tracking policy.
    #[serde(default)]
    pub checkpoint_policy: CheckpointPolicy,
    /// Shuffle training windows every epoch.
    #[serde(default)]
    pub shuffle: bool,
    /// Seed for shuffling; also fills unset model seeds.
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            epochs: 10,
            learning_rate: 2e-3,
            weight_decay: 1e-5,
            variational_beta: 1.0,
            checkpoint_path: None,
            checkpoint_policy: CheckpointPolicy::RunBest,
            shuffle: false,
            seed: 42,
        }
    }
}

impl TrainConfig {
    /// Checks hyperparameter ranges.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(VaeError::Config("batch_size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(VaeError::Config(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(VaeError::Config(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if !(self.variational_beta.is_finite() && self.variational_beta >= 0.0) {
            return Err(VaeError::Config(format!(
                "variational_beta must be non-negative, got {}",
                self.variational_beta
            )));
        }
        Ok(())
    }

    /// Parses a config from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the config to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
