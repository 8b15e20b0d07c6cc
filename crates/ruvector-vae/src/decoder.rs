//! Transposed-convolution decoder producing Bernoulli probabilities.

use candle_core::{Module, Tensor};
use candle_nn::{ops, Linear, VarBuilder};

use crate::geometry::{Architecture, LatentGeometry};
use crate::layers::{linear_layer, linear_parameters, TransposedConv1d};
use crate::loss::PROB_EPS;

/// Linear projection to `(B, c, L')` followed by two transposed convolutions.
#[derive(Debug, Clone)]
pub struct Decoder {
    fc: Linear,
    deconv2: TransposedConv1d,
    deconv1: TransposedConv1d,
    capacity: usize,
    scalable_len: usize,
}

impl Decoder {
    /// Allocates the decoder for an already validated geometry.
    pub fn new(
        capacity: usize,
        latent_dims: usize,
        arch: &Architecture,
        geometry: &LatentGeometry,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let c = capacity;
        Ok(Self {
            fc: linear_layer(latent_dims, geometry.decoder_width, vb.pp("fc"))?,
            deconv2: TransposedConv1d::new(c, c, arch.deconv2, vb.pp("deconv2"))?,
            deconv1: TransposedConv1d::new(c, 1, arch.deconv1, vb.pp("deconv1"))?,
            capacity,
            scalable_len: geometry.scalable_len,
        })
    }

    /// Maps `(B, D)` to `(B, 1, L)` with every value in `[PROB_EPS, 1 - PROB_EPS]`.
    pub fn forward(&self, zs: &Tensor) -> candle_core::Result<Tensor> {
        let batch = zs.dim(0)?;
        let h = self
            .fc
            .forward(zs)?
            .reshape((batch, self.capacity, self.scalable_len))?;
        let h = self.deconv2.forward(&h)?.relu()?;
        // f32 sigmoid saturates to exactly 0 or 1 for large logits
        ops::sigmoid(&self.deconv1.forward(&h)?)?.clamp(PROB_EPS, 1.0 - PROB_EPS)
    }

    /// Number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        linear_parameters(&self.fc) + self.deconv2.num_parameters() + self.deconv1.num_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_decoder_restores_input_length() {
        let arch = Architecture::default();
        for len in [5, 9, 21] {
            let geometry = LatentGeometry::derive(len, 4, &arch).unwrap();
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let decoder = Decoder::new(4, 2, &arch, &geometry, vb).unwrap();

            let zs = Tensor::randn(0f32, 1f32, (3, 2), &Device::Cpu).unwrap();
            let recon = decoder.forward(&zs).unwrap();
            assert_eq!(recon.dims(), &[3, 1, len]);
        }
    }

    #[test]
    fn test_decoder_output_is_bounded() {
        let arch = Architecture::default();
        let geometry = LatentGeometry::derive(9, 4, &arch).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let decoder = Decoder::new(4, 2, &arch, &geometry, vb).unwrap();

        let zs = Tensor::randn(0f32, 1f32, (8, 2), &Device::Cpu).unwrap();
        let values: Vec<f32> = decoder.forward(&zs).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn test_extreme_latents_stay_inside_open_interval() {
        let arch = Architecture::default();
        let geometry = LatentGeometry::derive(9, 4, &arch).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let decoder = Decoder::new(4, 2, &arch, &geometry, vb).unwrap();

        for scale in [1e3f32, -1e3] {
            let zs = Tensor::new(&[[scale, -scale], [scale, scale]], &Device::Cpu).unwrap();
            let values: Vec<f32> =
                decoder.forward(&zs).unwrap().flatten_all().unwrap().to_vec1().unwrap();
            assert!(
                values.iter().all(|&v| v > 0.0 && v < 1.0),
                "saturated output for scale {scale}: {values:?}"
            );
        }
    }
}
