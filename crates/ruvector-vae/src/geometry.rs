//! Closed-form length arithmetic for the convolutional stacks.
//!
//! The sequence length after each convolution depends only on the input
//! length and the layer's kernel/stride/padding, so the flattened widths of
//! the encoder and decoder are derived here once, at construction, instead of
//! probing a throwaway network with a zero tensor.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaeError};

/// Kernel, stride and padding of a 1-D (transposed) convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvGeometry {
    /// Kernel width.
    pub kernel: usize,
    /// Step between kernel applications.
    pub stride: usize,
    /// Implicit zero padding on both sides.
    pub padding: usize,
    /// Extra length appended to the output of a transposed convolution.
    #[serde(default)]
    pub output_padding: usize,
}

impl ConvGeometry {
    /// Creates a geometry without output padding.
    pub const fn new(kernel: usize, stride: usize, padding: usize) -> Self {
        Self {
            kernel,
            stride,
            padding,
            output_padding: 0,
        }
    }

    /// Sets the output padding used by transposed convolutions.
    pub const fn with_output_padding(mut self, output_padding: usize) -> Self {
        self.output_padding = output_padding;
        self
    }

    /// Output length of a forward convolution: `⌊(L + 2p − k) / s⌋ + 1`.
    ///
    /// Returns `None` when the padded input is shorter than the kernel.
    pub fn output_len(&self, len: usize) -> Option<usize> {
        let padded = len + 2 * self.padding;
        if self.stride == 0 || padded < self.kernel {
            return None;
        }
        Some((padded - self.kernel) / self.stride + 1)
    }

    /// Output length of a transposed convolution: `(L − 1)·s − 2p + k + output_padding`.
    ///
    /// Returns `None` for an empty input or when the padding eats the whole output.
    pub fn transposed_output_len(&self, len: usize) -> Option<usize> {
        if len == 0 || self.stride == 0 {
            return None;
        }
        let full = (len - 1) * self.stride + self.kernel + self.output_padding;
        full.checked_sub(2 * self.padding).filter(|&out| out > 0)
    }

    /// Rejects geometries that no convolution can realise.
    pub fn validate(&self, layer: &str) -> Result<()> {
        if self.kernel == 0 {
            return Err(VaeError::Construction(format!("{layer}: kernel must be positive")));
        }
        if self.stride == 0 {
            return Err(VaeError::Construction(format!("{layer}: stride must be positive")));
        }
        Ok(())
    }

    /// Extra checks for transposed layers, which are lowered onto a stride-1
    /// convolution over a zero-dilated input.
    pub fn validate_transposed(&self, layer: &str) -> Result<()> {
        self.validate(layer)?;
        if self.padding >= self.kernel {
            return Err(VaeError::Construction(format!(
                "{layer}: padding {} must be smaller than kernel {}",
                self.padding, self.kernel
            )));
        }
        if self.output_padding >= self.stride {
            return Err(VaeError::Construction(format!(
                "{layer}: output padding {} must be smaller than stride {}",
                self.output_padding, self.stride
            )));
        }
        Ok(())
    }
}

/// Layer geometries of the two-stage encoder and decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    /// First encoder convolution (1 → c channels).
    pub conv1: ConvGeometry,
    /// Second encoder convolution (c → 2c channels).
    pub conv2: ConvGeometry,
    /// First decoder transposed convolution (c → c channels).
    pub deconv2: ConvGeometry,
    /// Output transposed convolution (c → 1 channel).
    pub deconv1: ConvGeometry,
}

impl Default for Architecture {
    fn default() -> Self {
        Self {
            conv1: ConvGeometry::new(4, 2, 1),
            conv2: ConvGeometry::new(4, 2, 1),
            deconv2: ConvGeometry::new(4, 1, 1),
            deconv1: ConvGeometry::new(3, 2, 1),
        }
    }
}

/// Sequence lengths and flattened widths derived for one model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatentGeometry {
    /// Input length `L`.
    pub input_len: usize,
    /// Length after the first encoder convolution (`L'`). Seeds the decoder.
    pub scalable_len: usize,
    /// Length after the second encoder convolution.
    pub encoded_len: usize,
    /// Flattened encoder feature width, `2c · encoded_len`.
    pub encoder_width: usize,
    /// Width of the decoder's linear projection, `c · scalable_len`.
    pub decoder_width: usize,
    /// Length after the first decoder transposed convolution.
    pub decoder_hidden_len: usize,
    /// Reconstructed length. Always equal to `input_len` once derived.
    pub output_len: usize,
}

impl LatentGeometry {
    /// Derives every intermediate length and validates that the encoder and
    /// decoder agree with each other and with the input length.
    pub fn derive(input_len: usize, capacity: usize, arch: &Architecture) -> Result<Self> {
        arch.conv1.validate("conv1")?;
        arch.conv2.validate("conv2")?;
        arch.deconv2.validate_transposed("deconv2")?;
        arch.deconv1.validate_transposed("deconv1")?;

        let scalable_len = arch.conv1.output_len(input_len).ok_or_else(|| {
            VaeError::Construction(format!(
                "input length {input_len} is too short for conv1 (kernel {}, padding {})",
                arch.conv1.kernel, arch.conv1.padding
            ))
        })?;
        let encoded_len = arch.conv2.output_len(scalable_len).ok_or_else(|| {
            VaeError::Construction(format!(
                "conv1 output length {scalable_len} is too short for conv2 (kernel {}, padding {})",
                arch.conv2.kernel, arch.conv2.padding
            ))
        })?;

        let encoder_width = 2 * capacity * encoded_len;
        let decoder_width = capacity * scalable_len;
        if encoder_width != decoder_width {
            return Err(VaeError::Construction(format!(
                "encoder feature width {encoder_width} (2·{capacity}·{encoded_len}) does not match \
                 decoder projection width {decoder_width} ({capacity}·{scalable_len}) for input length {input_len}"
            )));
        }

        let decoder_hidden_len = arch
            .deconv2
            .transposed_output_len(scalable_len)
            .ok_or_else(|| {
                VaeError::Construction(format!(
                    "deconv2 produces an empty sequence from length {scalable_len}"
                ))
            })?;
        let output_len = arch
            .deconv1
            .transposed_output_len(decoder_hidden_len)
            .ok_or_else(|| {
                VaeError::Construction(format!(
                    "deconv1 produces an empty sequence from length {decoder_hidden_len}"
                ))
            })?;
        if output_len != input_len {
            return Err(VaeError::Construction(format!(
                "decoder reconstructs length {output_len} but the input length is {input_len}"
            )));
        }

        Ok(Self {
            input_len,
            scalable_len,
            encoded_len,
            encoder_width,
            decoder_width,
            decoder_hidden_len,
            output_len,
        })
    }
}
