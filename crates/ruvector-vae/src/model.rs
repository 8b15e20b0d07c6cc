//! The variational autoencoder: encoder → sampler → decoder.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::config::VaeConfig;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{Result, VaeError};
use crate::geometry::LatentGeometry;
use crate::layers::reset_parameters;
use crate::loss::binary_cross_entropy_sum;
use crate::sampler::{LatentSampler, Mode};

/// Tensors produced by one forward pass.
#[derive(Debug, Clone)]
pub struct VaeOutput {
    /// Bernoulli probabilities, same shape as the input.
    pub reconstruction: Tensor,
    /// Posterior mean, `(B, D)`.
    pub mu: Tensor,
    /// Posterior log-variance, `(B, D)`.
    pub logvar: Tensor,
    /// Latent vector fed to the decoder, `(B, D)`.
    pub latent: Tensor,
}

/// Convolutional VAE over `(B, 1, L)` windows.
///
/// Parameters live in the [`candle_nn::VarMap`] behind the `VarBuilder`
/// passed to [`VariationalAutoencoder::new`]; the model only keeps handles.
#[derive(Debug)]
pub struct VariationalAutoencoder {
    config: VaeConfig,
    geometry: LatentGeometry,
    encoder: Encoder,
    decoder: Decoder,
    sampler: LatentSampler,
}

impl VariationalAutoencoder {
    /// Validates the geometry for `config.input_len` and allocates both stacks.
    ///
    /// Fails with [`VaeError::Construction`] if the encoder's flattened width
    /// disagrees with the decoder's projection, or if the decoder would not
    /// reconstruct exactly `input_len` samples.
    pub fn new(config: VaeConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let geometry =
            LatentGeometry::derive(config.input_len, config.capacity, &config.architecture)?;
        let encoder = Encoder::new(
            config.capacity,
            config.latent_dims,
            &config.architecture,
            &geometry,
            vb.pp("encoder"),
        )?;
        let decoder = Decoder::new(
            config.capacity,
            config.latent_dims,
            &config.architecture,
            &geometry,
            vb.pp("decoder"),
        )?;
        let sampler = LatentSampler::new(config.sampler_seed);
        Ok(Self {
            config,
            geometry,
            encoder,
            decoder,
            sampler,
        })
    }

    /// Builds an `f32` model over `varmap` on `device`, then redraws every
    /// parameter from `config.init_seed` when one is set.
    pub fn from_varmap(config: VaeConfig, varmap: &VarMap, device: &Device) -> Result<Self> {
        let init_seed = config.init_seed;
        let model = Self::new(config, VarBuilder::from_varmap(varmap, DType::F32, device))?;
        if let Some(seed) = init_seed {
            reset_parameters(varmap, seed)?;
        }
        Ok(model)
    }

    /// Model configuration.
    pub fn config(&self) -> &VaeConfig {
        &self.config
    }

    /// Derived sequence lengths.
    pub fn geometry(&self) -> &LatentGeometry {
        &self.geometry
    }

    /// Full forward pass.
    pub fn forward(&self, xs: &Tensor, mode: Mode) -> Result<VaeOutput> {
        let (mu, logvar) = self.encode(xs)?;
        let latent = self.sampler.sample(&mu, &logvar, mode)?;
        let reconstruction = self.decode(&latent)?;
        Ok(VaeOutput {
            reconstruction,
            mu,
            logvar,
            latent,
        })
    }

    /// Posterior parameters `(mu, logvar)` for a `(B, 1, L)` batch.
    pub fn encode(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        self.check_input(xs)?;
        Ok(self.encoder.forward(xs)?)
    }

    /// Bernoulli probabilities for a `(B, D)` latent batch.
    pub fn decode(&self, zs: &Tensor) -> Result<Tensor> {
        match zs.dims() {
            [_, d] if *d == self.config.latent_dims => Ok(self.decoder.forward(zs)?),
            dims => Err(VaeError::shape_mismatch(
                "decoder input",
                dims,
                &[dims.first().copied().unwrap_or(0), self.config.latent_dims],
            )),
        }
    }

    /// Latent representation of a batch; the posterior mean in [`Mode::Eval`].
    pub fn transform(&self, xs: &Tensor, mode: Mode) -> Result<Tensor> {
        let (mu, logvar) = self.encode(xs)?;
        Ok(self.sampler.sample(&mu, &logvar, mode)?)
    }

    /// Per-window reconstruction NLL in evaluation mode; larger is more anomalous.
    pub fn reconstruction_scores(&self, xs: &Tensor) -> Result<Vec<f32>> {
        let out = self.forward(xs, Mode::Eval)?;
        let batch = xs.dim(0)?;
        (0..batch)
            .map(|i| -> Result<f32> {
                let recon = out.reconstruction.narrow(0, i, 1)?;
                let target = xs.narrow(0, i, 1)?;
                let score = binary_cross_entropy_sum(&recon, &target)?;
                Ok(score.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?)
            })
            .collect()
    }

    /// Number of trainable scalars.
    pub fn num_parameters(&self) -> usize {
        self.encoder.num_parameters() + self.decoder.num_parameters()
    }

    fn check_input(&self, xs: &Tensor) -> Result<()> {
        match xs.dims() {
            [_, 1, l] if *l == self.config.input_len => Ok(()),
            dims => Err(VaeError::shape_mismatch(
                "model input",
                dims,
                &[
                    dims.first().copied().unwrap_or(0),
                    1,
                    self.config.input_len,
                ],
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Architecture, ConvGeometry};

    fn build(config: VaeConfig) -> Result<(VarMap, VariationalAutoencoder)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = VariationalAutoencoder::new(config, vb)?;
        Ok((varmap, model))
    }

    #[test]
    fn test_forward_shapes() {
        let (_vm, model) = build(VaeConfig::new(9, 4, 3).with_sampler_seed(0)).unwrap();
        let xs = Tensor::rand(0f32, 1f32, (5, 1, 9), &Device::Cpu).unwrap();
        let out = model.forward(&xs, Mode::Train).unwrap();
        assert_eq!(out.reconstruction.dims(), xs.dims());
        assert_eq!(out.mu.dims(), &[5, 3]);
        assert_eq!(out.logvar.dims(), &[5, 3]);
        assert_eq!(out.latent.dims(), &[5, 3]);
    }

    #[test]
    fn test_parameter_count_matches_varmap() {
        let (varmap, model) = build(VaeConfig::new(13, 3, 4)).unwrap();
        let stored: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
        assert_eq!(model.num_parameters(), stored);
    }

    #[test]
    fn test_wrong_input_length_rejected() {
        let (_vm, model) = build(VaeConfig::new(9, 2, 2)).unwrap();
        let xs = Tensor::zeros((2, 1, 13), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            model.forward(&xs, Mode::Eval),
            Err(VaeError::ShapeMismatch { .. })
        ));
        let multi_channel = Tensor::zeros((2, 2, 9), DType::F32, &Device::Cpu).unwrap();
        assert!(model.encode(&multi_channel).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_latent_width() {
        let (_vm, model) = build(VaeConfig::new(9, 2, 2)).unwrap();
        let zs = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(model.decode(&zs).is_err());
    }

    #[test]
    fn test_construction_fails_for_mismatched_length() {
        assert!(matches!(
            build(VaeConfig::new(8, 4, 2)),
            Err(VaeError::Construction(_))
        ));
    }

    #[test]
    fn test_construction_fails_for_mismatched_stride() {
        let config = VaeConfig {
            architecture: Architecture {
                deconv1: ConvGeometry::new(3, 1, 1),
                ..Default::default()
            },
            ..VaeConfig::new(9, 4, 2)
        };
        assert!(matches!(build(config), Err(VaeError::Construction(_))));
    }

    #[test]
    fn test_reconstruction_scores_per_window() {
        let (_vm, model) = build(VaeConfig::new(5, 2, 2)).unwrap();
        let xs = Tensor::rand(0f32, 1f32, (3, 1, 5), &Device::Cpu).unwrap();
        let scores = model.reconstruction_scores(&xs).unwrap();
        assert_eq!(scores.len(), 3);
        assert!(scores.iter().all(|s| s.is_finite() && *s > 0.0));

        let out = model.forward(&xs, Mode::Eval).unwrap();
        let total = binary_cross_entropy_sum(&out.reconstruction, &xs)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let summed: f32 = scores.iter().sum();
        assert!((total - summed).abs() < 1e-3 * total.max(1.0));
    }

    #[test]
    fn test_init_seed_fixes_initial_output() {
        let config = VaeConfig::new(9, 4, 2).with_init_seed(3);
        let xs = Tensor::rand(0f32, 1f32, (2, 1, 9), &Device::Cpu).unwrap();
        let run = || {
            let varmap = VarMap::new();
            let model = VariationalAutoencoder::from_varmap(config.clone(), &varmap, &Device::Cpu)
                .unwrap();
            model
                .forward(&xs, Mode::Eval)
                .unwrap()
                .reconstruction
                .flatten_all()
                .unwrap()
                .to_vec1::<f32>()
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_transform_eval_equals_mu() {
        let (_vm, model) = build(VaeConfig::new(9, 2, 3)).unwrap();
        let xs = Tensor::rand(0f32, 1f32, (2, 1, 9), &Device::Cpu).unwrap();
        let z = model.transform(&xs, Mode::Eval).unwrap();
        let (mu, _) = model.encode(&xs).unwrap();
        assert_eq!(z.to_vec2::<f32>().unwrap(), mu.to_vec2::<f32>().unwrap());
    }
}
