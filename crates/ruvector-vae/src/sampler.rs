//! Reparameterized sampling from the diagonal Gaussian posterior.

use candle_core::Tensor;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Execution mode of a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Stochastic latent draws; used while optimizing.
    Train,
    /// Deterministic latent (the posterior mean); used for validation and inference.
    Eval,
}

/// Draws `z = mu + exp(0.5 · logvar) ⊙ eps` with `eps ~ N(0, I)`.
///
/// Noise is generated on the host from a seeded [`StdRng`] so training-mode
/// draws are reproducible independently of the tensor backend.
#[derive(Debug)]
pub struct LatentSampler {
    rng: Mutex<StdRng>,
}

impl LatentSampler {
    /// Creates a sampler. `None` seeds from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Returns a latent batch for the given mode.
    ///
    /// In [`Mode::Eval`] this is `mu` itself. In [`Mode::Train`] a fresh
    /// `eps` is drawn on every call; it is a constant leaf, so gradients only
    /// flow through `mu` and `logvar`.
    pub fn sample(&self, mu: &Tensor, logvar: &Tensor, mode: Mode) -> candle_core::Result<Tensor> {
        match mode {
            Mode::Eval => Ok(mu.clone()),
            Mode::Train => {
                let std = (logvar * 0.5)?.exp()?;
                let eps = self.standard_normal(mu)?;
                mu + (std * eps)?
            }
        }
    }

    fn standard_normal(&self, like: &Tensor) -> candle_core::Result<Tensor> {
        let n = like.elem_count();
        let values: Vec<f32> = {
            let mut rng = self.rng.lock();
            (0..n).map(|_| rng.sample(StandardNormal)).collect()
        };
        Tensor::from_vec(values, like.dims(), like.device())?.to_dtype(like.dtype())
    }
}

impl Default for LatentSampler {
    fn default() -> Self {
        Self::new(None)
    }
}
