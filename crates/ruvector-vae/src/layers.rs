//! Layers shared by the encoder and decoder, and their initialisation.
//!
//! Forward convolutions are candle's own [`Conv1d`]. Transposed convolutions
//! are lowered onto a stride-1 `conv1d` over a zero-dilated, zero-padded
//! input with a flipped kernel, which keeps every step on ops that candle
//! knows how to differentiate.
//!
//! Every weight and bias is drawn from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`,
//! where `fan_in` is the product of all weight dims after the first. For
//! transposed weights, laid out `(in, out, kernel)`, that is `out · kernel`.

use std::collections::HashMap;

use candle_core::{Module, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Init, Linear, VarBuilder, VarMap};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::checkpoint::lock_parameters;
use crate::error::{Result, VaeError};
use crate::geometry::ConvGeometry;

/// Half-width of the uniform init for a weight with the given `fan_in`.
pub fn init_bound(fan_in: usize) -> f64 {
    1.0 / (fan_in.max(1) as f64).sqrt()
}

fn uniform(fan_in: usize) -> Init {
    let bound = init_bound(fan_in);
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Builds a forward 1-D convolution with the given geometry.
pub fn conv1d_layer(
    in_channels: usize,
    out_channels: usize,
    geometry: ConvGeometry,
    vb: VarBuilder,
) -> candle_core::Result<Conv1d> {
    let cfg = Conv1dConfig {
        padding: geometry.padding,
        stride: geometry.stride,
        dilation: 1,
        groups: 1,
        ..Default::default()
    };
    let fan_in = in_channels * geometry.kernel;
    let weight = vb.get_with_hints(
        (out_channels, in_channels, geometry.kernel),
        "weight",
        uniform(fan_in),
    )?;
    let bias = vb.get_with_hints(out_channels, "bias", uniform(fan_in))?;
    Ok(Conv1d::new(weight, Some(bias), cfg))
}

/// Builds a fully connected layer.
pub fn linear_layer(in_dim: usize, out_dim: usize, vb: VarBuilder) -> candle_core::Result<Linear> {
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", uniform(in_dim))?;
    let bias = vb.get_with_hints(out_dim, "bias", uniform(in_dim))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Number of scalar parameters held by a [`Conv1d`].
pub fn conv1d_parameters(layer: &Conv1d) -> usize {
    layer.weight().elem_count() + layer.bias().map_or(0, Tensor::elem_count)
}

/// Number of scalar parameters held by a [`Linear`].
pub fn linear_parameters(layer: &Linear) -> usize {
    layer.weight().elem_count() + layer.bias().map_or(0, Tensor::elem_count)
}

/// Redraws every `*.weight` / `*.bias` in `varmap` from a [`StdRng`] seeded
/// with `seed`, using the same bounds as the layer constructors.
///
/// Names are visited in sorted order, so a seed fixes the initial state.
pub fn reset_parameters(varmap: &VarMap, seed: u64) -> Result<()> {
    let data = lock_parameters(varmap)?;
    let dims: HashMap<&str, Vec<usize>> = data
        .iter()
        .map(|(name, var)| (name.as_str(), var.dims().to_vec()))
        .collect();
    let mut names: Vec<&String> = data.keys().collect();
    names.sort_unstable();

    let mut rng = StdRng::seed_from_u64(seed);
    for name in names {
        let weight_dims = match name.strip_suffix("bias") {
            Some(prefix) => dims.get(format!("{prefix}weight").as_str()).ok_or_else(|| {
                VaeError::Construction(format!("bias {name} has no matching weight"))
            })?,
            None => &dims[name.as_str()],
        };
        let fan_in: usize = weight_dims.iter().skip(1).product();
        let bound = init_bound(fan_in) as f32;
        let dist = Uniform::new_inclusive(-bound, bound);

        let var = &data[name];
        let values: Vec<f32> = (0..var.elem_count()).map(|_| rng.sample(dist)).collect();
        let fresh = Tensor::from_vec(values, var.dims(), var.device())?.to_dtype(var.dtype())?;
        var.set(&fresh)?;
    }
    Ok(())
}

/// 1-D transposed convolution with `(in, out, kernel)` weight layout.
#[derive(Debug, Clone)]
pub struct TransposedConv1d {
    weight: Tensor,
    bias: Tensor,
    reversed_taps: Tensor,
    geometry: ConvGeometry,
}

impl TransposedConv1d {
    /// Allocates the layer's weight and bias under `vb`.
    ///
    /// Weights and bias are uniform within `1/sqrt(out_channels · kernel)`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        geometry: ConvGeometry,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        if geometry.padding >= geometry.kernel || geometry.output_padding >= geometry.stride.max(1) {
            candle_core::bail!(
                "unsupported transposed geometry {:?}: padding must be < kernel and output padding < stride",
                geometry
            );
        }
        let fan_in = out_channels * geometry.kernel;
        let weight = vb.get_with_hints(
            (in_channels, out_channels, geometry.kernel),
            "weight",
            uniform(fan_in),
        )?;
        let bias = vb.get_with_hints(out_channels, "bias", uniform(fan_in))?;
        let taps: Vec<u32> = (0..geometry.kernel as u32).rev().collect();
        let reversed_taps = Tensor::new(taps.as_slice(), vb.device())?;
        Ok(Self {
            weight,
            bias,
            reversed_taps,
            geometry,
        })
    }

    /// Kernel weights, `(in_channels, out_channels, kernel)`.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Per-output-channel bias.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Layer geometry.
    pub fn geometry(&self) -> ConvGeometry {
        self.geometry
    }

    /// Number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        self.weight.elem_count() + self.bias.elem_count()
    }

    /// Inserts `stride - 1` zeros between consecutive samples.
    fn dilate(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let stride = self.geometry.stride;
        if stride == 1 {
            return Ok(xs.clone());
        }
        let (b, c, l) = xs.dims3()?;
        let zeros = Tensor::zeros((b, c, l, stride - 1), xs.dtype(), xs.device())?;
        Tensor::cat(&[&xs.unsqueeze(3)?, &zeros], 3)?
            .reshape((b, c, l * stride))?
            .narrow(2, 0, (l - 1) * stride + 1)
    }

    /// `(out, in, kernel)` kernel with its taps reversed.
    fn flipped_kernel(&self) -> candle_core::Result<Tensor> {
        self.weight
            .index_select(&self.reversed_taps, 2)?
            .transpose(0, 1)?
            .contiguous()
    }
}

impl Module for TransposedConv1d {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let g = self.geometry;
        let edge = g.kernel - 1 - g.padding;
        let xs = self
            .dilate(xs)?
            .pad_with_zeros(2, edge, edge + g.output_padding)?;
        let ys = xs.conv1d(&self.flipped_kernel()?, 0, 1, 1, 1)?;
        ys.broadcast_add(&self.bias.reshape((1, (), 1))?)
    }
}
