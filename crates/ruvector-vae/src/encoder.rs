//! Convolutional encoder producing the posterior `(mu, logvar)`.

use candle_core::{Module, Tensor};
use candle_nn::{Conv1d, Linear, VarBuilder};

use crate::geometry::{Architecture, LatentGeometry};
use crate::layers::{conv1d_layer, conv1d_parameters, linear_layer, linear_parameters};

/// Two strided convolutions followed by parallel mean / log-variance heads.
#[derive(Debug, Clone)]
pub struct Encoder {
    conv1: Conv1d,
    conv2: Conv1d,
    fc_mu: Linear,
    fc_logvar: Linear,
}

impl Encoder {
    /// Allocates the encoder for an already validated geometry.
    pub fn new(
        capacity: usize,
        latent_dims: usize,
        arch: &Architecture,
        geometry: &LatentGeometry,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let c = capacity;
        Ok(Self {
            conv1: conv1d_layer(1, c, arch.conv1, vb.pp("conv1"))?,
            conv2: conv1d_layer(c, 2 * c, arch.conv2, vb.pp("conv2"))?,
            fc_mu: linear_layer(geometry.encoder_width, latent_dims, vb.pp("fc_mu"))?,
            fc_logvar: linear_layer(geometry.encoder_width, latent_dims, vb.pp("fc_logvar"))?,
        })
    }

    /// Maps `(B, 1, L)` to `(mu, logvar)`, each `(B, D)`.
    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let h = self.conv1.forward(xs)?.relu()?;
        let h = self.conv2.forward(&h)?.relu()?;
        // (B, 2c, L2) -> (B, 2c·L2)
        let h = h.flatten_from(1)?;
        let mu = self.fc_mu.forward(&h)?;
        let logvar = self.fc_logvar.forward(&h)?;
        Ok((mu, logvar))
    }

    /// Number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        conv1d_parameters(&self.conv1)
            + conv1d_parameters(&self.conv2)
            + linear_parameters(&self.fc_mu)
            + linear_parameters(&self.fc_logvar)
    }
}
