//! Adam with L2 weight decay folded into the gradient.
//!
//! `weight_decay · θ` is added to each gradient before the moment updates,
//! so the penalty is rescaled by Adam's per-parameter step size. This is the
//! classic `Adam(weight_decay = λ)` rule, not AdamW's decoupled shrinkage.

use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

use crate::error::Result;

/// Adam optimizer with coupled L2 regularization.
pub struct Adam {
    inner: AdamW,
    vars: Vec<Var>,
    weight_decay: f64,
}

impl Adam {
    /// Creates the optimizer over `vars` with the default betas and epsilon.
    pub fn new(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Result<Self> {
        let inner = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;
        Ok(Self {
            inner,
            vars,
            weight_decay,
        })
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    /// L2 coefficient.
    pub fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    /// Backpropagates `loss` and applies one update.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let mut grads = loss.backward()?;
        if self.weight_decay != 0.0 {
            for var in &self.vars {
                let theta = var.as_tensor();
                if let Some(grad) = grads.get(theta) {
                    let decayed = (grad + (theta.detach() * self.weight_decay)?)?;
                    grads.insert(theta, decayed);
                }
            }
        }
        self.inner.step(&grads)?;
        Ok(())
    }
}
