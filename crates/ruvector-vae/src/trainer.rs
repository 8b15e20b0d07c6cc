//! Training orchestrator: per-epoch training pass, evaluation pass and
//! best-validation checkpointing.
//!
//! ```text
//! Idle → (per epoch: TrainingPass → EvaluationPass)* → Done
//! ```
//!
//! The training pass runs the model in [`Mode::Train`] and applies one
//! [`Adam`] step per batch. The evaluation pass runs in [`Mode::Eval`], sums the
//! per-batch validation losses and, whenever a batch loss is strictly below
//! the best tracker, persists a [`ParameterSnapshot`] through the trainer's
//! [`CheckpointSink`]. Any error ends the run; there is no retry.

use std::path::PathBuf;
use std::time::Instant;

use candle_core::{DType, Device};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{lock_parameters, CheckpointSink, ParameterSnapshot, SafetensorsSink};
use crate::config::{CheckpointPolicy, TrainConfig, VaeConfig};
use crate::data::{Batch, TimeSeriesDataset};
use crate::error::{Result, VaeError};
use crate::loss::vae_loss;
use crate::model::VariationalAutoencoder;
use crate::optim::Adam;
use crate::sampler::Mode;

/// Statistics for one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch index.
    pub epoch: usize,
    /// Mean per-batch training loss.
    pub train_loss: f64,
    /// Sum of per-batch validation losses.
    pub val_loss: f64,
    /// Training batches seen.
    pub train_batches: usize,
    /// Validation batches seen.
    pub val_batches: usize,
    /// Checkpoints written during this epoch's evaluation pass.
    pub checkpoints_written: usize,
}

/// Outcome of [`VaeTrainer::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Number of epochs that ran to completion.
    pub epochs_completed: usize,
    /// Mean training loss of the last epoch.
    pub final_train_loss: f64,
    /// Lowest single-batch validation loss of the run, if any batch was evaluated.
    pub best_val_loss: Option<f64>,
    /// Epoch that produced `best_val_loss`.
    pub best_epoch: Option<usize>,
    /// Where checkpoints were written.
    pub checkpoint_path: Option<PathBuf>,
    /// Total checkpoint writes across the run.
    pub checkpoints_written: usize,
    /// Trainable scalars in the model.
    pub num_parameters: usize,
    /// Wall-clock duration of `fit`.
    pub training_time_secs: f64,
    /// Per-epoch history.
    pub history: Vec<EpochStats>,
}

impl TrainingReport {
    /// Serializes the report to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Summary of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationSummary {
    /// Sum of per-batch losses.
    pub total_loss: f64,
    /// Lowest per-batch loss in this pass.
    pub best_batch_loss: Option<f64>,
    /// Batches evaluated.
    pub batches: usize,
    /// Checkpoints written.
    pub checkpoints_written: usize,
}

/// Owns the parameters, the model, the optimizer, the best-loss tracker
/// and the checkpoint sink for one training run.
pub struct VaeTrainer<S: CheckpointSink = SafetensorsSink> {
    config: TrainConfig,
    varmap: VarMap,
    model: VariationalAutoencoder,
    optimizer: Adam,
    sink: S,
    device: Device,
    best_val_loss: f64,
}

impl VaeTrainer<SafetensorsSink> {
    /// Builds a trainer that writes safetensors checkpoints.
    pub fn new(model_config: VaeConfig, config: TrainConfig, device: Device) -> Result<Self> {
        Self::with_sink(model_config, config, device, SafetensorsSink)
    }
}

impl<S: CheckpointSink> VaeTrainer<S> {
    /// Builds a trainer around a caller-supplied checkpoint sink.
    ///
    /// Seeds left unset in `model_config` are derived from `config.seed`, so
    /// a run is reproducible from the training config alone.
    pub fn with_sink(
        model_config: VaeConfig,
        config: TrainConfig,
        device: Device,
        sink: S,
    ) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let model = VariationalAutoencoder::from_varmap(
            model_config.seeded_from(config.seed),
            &varmap,
            &device,
        )?;
        let optimizer = Adam::new(varmap.all_vars(), config.learning_rate, config.weight_decay)?;

        tracing::info!(
            num_parameters = model.num_parameters(),
            input_len = model.config().input_len,
            latent_dims = model.config().latent_dims,
            "Initialized VAE trainer"
        );

        Ok(Self {
            config,
            varmap,
            model,
            optimizer,
            sink,
            device,
            best_val_loss: f64::INFINITY,
        })
    }

    /// The model being trained.
    pub fn model(&self) -> &VariationalAutoencoder {
        &self.model
    }

    /// Parameter store backing the model.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Training hyperparameters.
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Device every batch is placed on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Checkpoint sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Current value of the best-loss tracker (`+inf` before any evaluation).
    pub fn best_val_loss(&self) -> f64 {
        self.best_val_loss
    }

    /// Consumes the trainer, returning the model and its parameters.
    pub fn into_parts(self) -> (VariationalAutoencoder, VarMap, S) {
        (self.model, self.varmap, self.sink)
    }

    /// Runs `epochs` rounds of training followed by evaluation over two
    /// in-memory datasets, reshuffling the training windows every epoch when
    /// `config.shuffle` is set.
    pub fn fit(
        &mut self,
        train: &TimeSeriesDataset,
        val: &TimeSeriesDataset,
    ) -> Result<TrainingReport> {
        if train.is_empty() {
            return Err(VaeError::EmptyDataset("training set has no windows".into()));
        }
        self.check_window_len("training data", train)?;
        let val_batches = if val.is_empty() {
            Vec::new()
        } else {
            self.check_window_len("validation data", val)?;
            val.batches(self.config.batch_size, &self.device)?
        };

        let (batch_size, shuffle, seed) =
            (self.config.batch_size, self.config.shuffle, self.config.seed);
        let device = self.device.clone();
        self.run(
            |epoch| {
                if shuffle {
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
                    train.shuffled_batches(batch_size, &device, &mut rng)
                } else {
                    train.batches(batch_size, &device)
                }
            },
            &val_batches,
        )
    }

    /// Same as [`fit`](Self::fit) for batches produced elsewhere. Every
    /// epoch visits `train` in the given order; `labels` are ignored.
    pub fn fit_batches(&mut self, train: &[Batch], val: &[Batch]) -> Result<TrainingReport> {
        if train.iter().all(Batch::is_empty) {
            return Err(VaeError::EmptyDataset("training batches hold no windows".into()));
        }
        self.run(|_| Ok(train.to_vec()), val)
    }

    fn run<F>(&mut self, mut train_batches: F, val: &[Batch]) -> Result<TrainingReport>
    where
        F: FnMut(usize) -> Result<Vec<Batch>>,
    {
        let start_time = Instant::now();
        if val.iter().all(Batch::is_empty) {
            tracing::warn!("Validation set is empty; no checkpoints will be written");
        }

        let mut history = Vec::with_capacity(self.config.epochs);
        let mut best: Option<(f64, usize)> = None;
        let mut checkpoints_written = 0;

        for epoch in 1..=self.config.epochs {
            let batches = train_batches(epoch)?;
            let train_loss = self.train_epoch(&batches, epoch)?;
            let summary = self.evaluate(val, epoch)?;

            if let Some(loss) = summary.best_batch_loss {
                if best.map_or(true, |(b, _)| loss < b) {
                    best = Some((loss, epoch));
                }
            }
            checkpoints_written += summary.checkpoints_written;

            tracing::info!(
                "Epoch [{} / {}] train_loss={:.6} val_loss={:.6}",
                epoch,
                self.config.epochs,
                train_loss,
                summary.total_loss
            );

            history.push(EpochStats {
                epoch,
                train_loss,
                val_loss: summary.total_loss,
                train_batches: batches.len(),
                val_batches: summary.batches,
                checkpoints_written: summary.checkpoints_written,
            });
        }

        Ok(TrainingReport {
            epochs_completed: history.len(),
            final_train_loss: history.last().map_or(0.0, |s| s.train_loss),
            best_val_loss: best.map(|(loss, _)| loss),
            best_epoch: best.map(|(_, epoch)| epoch),
            checkpoint_path: self.config.checkpoint_path.clone(),
            checkpoints_written,
            num_parameters: self.model.num_parameters(),
            training_time_secs: start_time.elapsed().as_secs_f64(),
            history,
        })
    }

    /// One training pass over `batches`; returns the mean per-batch loss.
    pub fn train_epoch(&mut self, batches: &[Batch], epoch: usize) -> Result<f64> {
        let batches: Vec<&Batch> = batches.iter().filter(|b| !b.is_empty()).collect();
        if batches.is_empty() {
            return Err(VaeError::EmptyDataset("training set has no windows".into()));
        }

        let mut total = 0.0;
        for (i, batch) in batches.iter().enumerate() {
            let out = self.model.forward(&batch.inputs, Mode::Train)?;
            let loss = vae_loss(
                &out.reconstruction,
                &batch.inputs,
                &out.mu,
                &out.logvar,
                self.config.variational_beta,
            )?;
            let value = loss.total_value()?;
            ensure_finite(value, "train", epoch, i)?;

            self.optimizer.backward_step(&loss.total)?;
            tracing::debug!(epoch, batch = i, loss = value, "train step");
            total += value;
        }
        check_parameters(&self.varmap, epoch, batches.len())?;

        Ok(total / batches.len() as f64)
    }

    /// One evaluation pass with checkpointing per [`CheckpointPolicy`].
    pub fn evaluate(&mut self, batches: &[Batch], epoch: usize) -> Result<EvaluationSummary> {
        if self.config.checkpoint_policy == CheckpointPolicy::EpochBest {
            self.best_val_loss = f64::INFINITY;
        }

        let mut summary = EvaluationSummary {
            total_loss: 0.0,
            best_batch_loss: None,
            batches: 0,
            checkpoints_written: 0,
        };
        for (i, batch) in batches.iter().filter(|b| !b.is_empty()).enumerate() {
            let out = self.model.forward(&batch.inputs, Mode::Eval)?;
            let loss = vae_loss(
                &out.reconstruction,
                &batch.inputs,
                &out.mu,
                &out.logvar,
                self.config.variational_beta,
            )?;
            let value = loss.total_value()?;
            ensure_finite(value, "eval", epoch, i)?;
            tracing::debug!(epoch, batch = i, loss = value, "eval step");

            summary.batches += 1;
            summary.total_loss += value;
            if summary.best_batch_loss.map_or(true, |b| value < b) {
                summary.best_batch_loss = Some(value);
            }
            if value < self.best_val_loss {
                self.best_val_loss = value;
                if self.save_checkpoint(epoch, value)? {
                    summary.checkpoints_written += 1;
                }
            }
        }
        Ok(summary)
    }

    fn save_checkpoint(&mut self, epoch: usize, loss: f64) -> Result<bool> {
        let Some(path) = self.config.checkpoint_path.as_deref() else {
            return Ok(false);
        };
        let snapshot = ParameterSnapshot::capture(&self.varmap)?;
        self.sink.persist(&snapshot, path)?;
        tracing::info!(epoch, val_loss = loss, path = %path.display(), "Saved checkpoint");
        Ok(true)
    }

    fn check_window_len(&self, context: &str, data: &TimeSeriesDataset) -> Result<()> {
        let expected = self.model.config().input_len;
        if data.window_len() != expected {
            return Err(VaeError::shape_mismatch(
                context,
                &[data.window_len()],
                &[expected],
            ));
        }
        Ok(())
    }
}

fn check_parameters(varmap: &VarMap, epoch: usize, batch: usize) -> Result<()> {
    let data = lock_parameters(varmap)?;
    for (name, var) in data.iter() {
        let sum = var
            .as_tensor()
            .sum_all()?
            .to_dtype(DType::F64)?
            .to_scalar::<f64>()?;
        if !sum.is_finite() {
            return Err(VaeError::NumericInstability {
                stage: "train",
                epoch,
                batch,
                detail: format!("parameter {name} became non-finite"),
            });
        }
    }
    Ok(())
}

fn ensure_finite(value: f64, stage: &'static str, epoch: usize, batch: usize) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(VaeError::NumericInstability {
            stage,
            epoch,
            batch,
            detail: format!("loss evaluated to {value}"),
        })
    }
}
