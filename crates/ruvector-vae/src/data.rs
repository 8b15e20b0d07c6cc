//! In-memory window store that feeds batches to the trainer.

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{Result, VaeError};

/// One batch: `inputs` is `(B, 1, L)`, `labels` is `(B)` and is carried
/// along for interface compatibility only.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Window tensor, `(B, 1, L)`.
    pub inputs: Tensor,
    /// Per-window labels, `(B)`. Unused by the VAE objective.
    pub labels: Tensor,
}

impl Batch {
    /// Number of windows in the batch.
    pub fn len(&self) -> usize {
        self.inputs.dims().first().copied().unwrap_or(0)
    }

    /// Whether the batch holds no windows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-length univariate windows with one label each.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesDataset {
    values: Vec<f32>,
    labels: Vec<f32>,
    window_len: usize,
}

impl TimeSeriesDataset {
    /// Builds a dataset from equally long windows.
    pub fn new(windows: Vec<Vec<f32>>, labels: Vec<f32>) -> Result<Self> {
        if windows.len() != labels.len() {
            return Err(VaeError::Config(format!(
                "{} windows but {} labels",
                windows.len(),
                labels.len()
            )));
        }
        let window_len = windows.first().map_or(0, Vec::len);
        if let Some((i, w)) = windows
            .iter()
            .enumerate()
            .find(|(_, w)| w.len() != window_len)
        {
            return Err(VaeError::shape_mismatch(
                format!("dataset window {i}"),
                &[w.len()],
                &[window_len],
            ));
        }
        Ok(Self {
            values: windows.into_iter().flatten().collect(),
            labels,
            window_len,
        })
    }

    /// Builds a dataset from a row-major `(n, window_len)` buffer with zero labels.
    pub fn from_flat(values: Vec<f32>, window_len: usize) -> Result<Self> {
        if window_len == 0 || values.len() % window_len != 0 {
            return Err(VaeError::Config(format!(
                "buffer of {} values is not a whole number of windows of length {}",
                values.len(),
                window_len
            )));
        }
        let n = values.len() / window_len;
        Ok(Self {
            values,
            labels: vec![0.0; n],
            window_len,
        })
    }

    /// `n` all-zero windows of length `window_len`.
    pub fn zeros(n: usize, window_len: usize) -> Self {
        Self {
            values: vec![0.0; n * window_len],
            labels: vec![0.0; n],
            window_len,
        }
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the dataset holds no windows.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Window length `L`.
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Borrowed view of window `i`.
    pub fn window(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.window_len)?;
        self.values.get(start..start + self.window_len)
    }

    /// Batches in storage order. The last batch may be smaller.
    pub fn batches(&self, batch_size: usize, device: &Device) -> Result<Vec<Batch>> {
        let order: Vec<usize> = (0..self.len()).collect();
        self.batches_in_order(&order, batch_size, device)
    }

    /// Batches after a seeded shuffle of the window order.
    pub fn shuffled_batches(
        &self,
        batch_size: usize,
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<Vec<Batch>> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.batches_in_order(&order, batch_size, device)
    }

    fn batches_in_order(
        &self,
        order: &[usize],
        batch_size: usize,
        device: &Device,
    ) -> Result<Vec<Batch>> {
        if batch_size == 0 {
            return Err(VaeError::Config("batch_size must be positive".into()));
        }
        order
            .chunks(batch_size)
            .map(|chunk| {
                let mut values = Vec::with_capacity(chunk.len() * self.window_len);
                let mut labels = Vec::with_capacity(chunk.len());
                for &i in chunk {
                    let start = i * self.window_len;
                    values.extend_from_slice(&self.values[start..start + self.window_len]);
                    labels.push(self.labels[i]);
                }
                Ok(Batch {
                    inputs: Tensor::from_vec(values, (chunk.len(), 1, self.window_len), device)?,
                    labels: Tensor::from_vec(labels, chunk.len(), device)?,
                })
            })
            .collect()
    }
}
