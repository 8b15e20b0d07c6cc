//! Composite VAE objective: Bernoulli reconstruction NLL plus weighted KL.
//!
//! The reconstruction term is summed, not averaged, over every element of
//! the batch, so it stays a direct negative log-likelihood. The relative
//! weight of the KL term therefore scales with the window length, and
//! `beta` has to be retuned when `L` changes.

use candle_core::Tensor;

use crate::error::{Result, VaeError};

/// Probabilities are clamped into `[PROB_EPS, 1 - PROB_EPS]` before taking logs.
pub const PROB_EPS: f64 = 1e-7;

/// Loss tensors for one batch. All three are scalars attached to the graph.
#[derive(Debug, Clone)]
pub struct VaeLoss {
    /// `reconstruction + beta · kl_divergence`.
    pub total: Tensor,
    /// Summed binary cross-entropy.
    pub reconstruction: Tensor,
    /// Closed-form KL divergence from `N(0, I)`.
    pub kl_divergence: Tensor,
}

/// Host-side copy of a [`VaeLoss`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossValues {
    /// Total objective.
    pub total: f64,
    /// Reconstruction term.
    pub reconstruction: f64,
    /// KL term (unweighted).
    pub kl_divergence: f64,
}

impl VaeLoss {
    /// Reads the total objective back to the host.
    pub fn total_value(&self) -> Result<f64> {
        scalar(&self.total)
    }

    /// Reads every term back to the host.
    pub fn values(&self) -> Result<LossValues> {
        Ok(LossValues {
            total: scalar(&self.total)?,
            reconstruction: scalar(&self.reconstruction)?,
            kl_divergence: scalar(&self.kl_divergence)?,
        })
    }
}

fn scalar(t: &Tensor) -> Result<f64> {
    Ok(t.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?)
}

/// Computes `BCE_sum(recon_x, x) + beta · KL(N(mu, exp(logvar)) || N(0, I))`.
///
/// `recon_x` and `x` must hold the same number of elements; they are both
/// flattened to a single row before the cross-entropy is taken. A mismatch
/// is reported before any arithmetic.
pub fn vae_loss(
    recon_x: &Tensor,
    x: &Tensor,
    mu: &Tensor,
    logvar: &Tensor,
    beta: f64,
) -> Result<VaeLoss> {
    let reconstruction = binary_cross_entropy_sum(recon_x, x)?;
    let kl_divergence = kl_divergence(mu, logvar)?;
    let total = (&reconstruction + (&kl_divergence * beta)?)?;
    Ok(VaeLoss {
        total,
        reconstruction,
        kl_divergence,
    })
}

/// Binary cross-entropy summed over every element:
/// `-Σ [x·ln p + (1 − x)·ln(1 − p)]`.
pub fn binary_cross_entropy_sum(probs: &Tensor, target: &Tensor) -> Result<Tensor> {
    if probs.elem_count() != target.elem_count() {
        return Err(VaeError::shape_mismatch(
            "reconstruction loss",
            probs.dims(),
            target.dims(),
        ));
    }
    let n = target.elem_count();
    let p = probs
        .reshape((1, n))?
        .clamp(PROB_EPS, 1.0 - PROB_EPS)?;
    let t = target.reshape((1, n))?.to_dtype(p.dtype())?;

    let log_p = p.log()?;
    let log_not_p = (1.0 - &p)?.log()?;
    let likelihood = ((&t * log_p)? + ((1.0 - &t)? * log_not_p)?)?;
    Ok(likelihood.sum_all()?.neg()?)
}

/// Closed-form KL divergence of `N(mu, exp(logvar))` from the unit Gaussian,
/// `-0.5 · Σ(1 + logvar − mu² − exp(logvar))`, summed over latent dims and batch.
pub fn kl_divergence(mu: &Tensor, logvar: &Tensor) -> Result<Tensor> {
    if mu.dims() != logvar.dims() {
        return Err(VaeError::shape_mismatch(
            "KL divergence",
            mu.dims(),
            logvar.dims(),
        ));
    }
    let inner = ((logvar + 1.0)? - mu.sqr()?)?;
    let inner = (inner - logvar.exp()?)?;
    Ok((inner.sum_all()? * -0.5)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn t2(rows: &[&[f32]]) -> Tensor {
        let data: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(data, (rows.len(), rows[0].len()), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_kl_is_zero_for_unit_gaussian() {
        let mu = Tensor::zeros((1, 2), DType::F32, &Device::Cpu).unwrap();
        let logvar = Tensor::zeros((1, 2), DType::F32, &Device::Cpu).unwrap();
        let kl = kl_divergence(&mu, &logvar).unwrap().to_scalar::<f32>().unwrap();
        assert!(kl.abs() < 1e-7);
    }

    #[test]
    fn test_kl_hand_computed() {
        // dim 0: mu=1, logvar=0 -> 0.5 ; dim 1: mu=0, var=2 -> 0.5·(2 − 1 − ln 2)
        let mu = t2(&[&[1.0, 0.0]]);
        let logvar = t2(&[&[0.0, 2.0f32.ln()]]);
        let kl = kl_divergence(&mu, &logvar).unwrap().to_scalar::<f32>().unwrap();
        let expected = 0.5 + 0.5 * (1.0 - 2.0f32.ln());
        assert!((kl - expected).abs() < 1e-6, "{} vs {}", kl, expected);
    }

    #[test]
    fn test_bce_sum_hand_computed() {
        let recon = Tensor::full(0.5f32, (1, 1, 4), &Device::Cpu).unwrap();
        let x = Tensor::new(&[0f32, 1.0, 1.0, 0.0], &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 4))
            .unwrap();
        let bce = binary_cross_entropy_sum(&recon, &x).unwrap().to_scalar::<f32>().unwrap();
        assert!((bce - 4.0 * 2.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_bce_is_summed_over_batch() {
        let recon = Tensor::full(0.25f32, (3, 1, 4), &Device::Cpu).unwrap();
        let x = Tensor::zeros((3, 1, 4), DType::F32, &Device::Cpu).unwrap();
        let bce = binary_cross_entropy_sum(&recon, &x).unwrap().to_scalar::<f32>().unwrap();
        assert!((bce - 12.0 * (4.0f32 / 3.0).ln()).abs() < 1e-4);
    }

    #[test]
    fn test_saturated_probabilities_stay_finite() {
        let recon = Tensor::new(&[0f32, 1.0], &Device::Cpu).unwrap();
        let x = Tensor::new(&[1f32, 0.0], &Device::Cpu).unwrap();
        let bce = binary_cross_entropy_sum(&recon, &x).unwrap().to_scalar::<f32>().unwrap();
        assert!(bce.is_finite());
        assert!(bce > 20.0);
    }

    #[test]
    fn test_vae_loss_weights_kl_by_beta() {
        let recon = Tensor::full(0.5f32, (1, 1, 4), &Device::Cpu).unwrap();
        let x = Tensor::new(&[0f32, 1.0, 1.0, 0.0], &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 4))
            .unwrap();
        let mu = t2(&[&[1.0, 0.0]]);
        let logvar = t2(&[&[0.0, 2.0f32.ln()]]);

        let loss = vae_loss(&recon, &x, &mu, &logvar, 2.0).unwrap();
        let values = loss.values().unwrap();
        let kl = 0.5 + 0.5 * (1.0 - 2.0f64.ln());
        assert!((values.kl_divergence - kl).abs() < 1e-5);
        assert!((values.reconstruction - 4.0 * 2.0f64.ln()).abs() < 1e-5);
        assert!((values.total - (4.0 * 2.0f64.ln() + 2.0 * kl)).abs() < 1e-5);
    }

    #[test]
    fn test_element_count_mismatch_fails_fast() {
        let recon = Tensor::full(0.5f32, (2, 1, 9), &Device::Cpu).unwrap();
        let x = Tensor::zeros((2, 1, 8), DType::F32, &Device::Cpu).unwrap();
        let mu = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        let err = vae_loss(&recon, &x, &mu, &mu, 1.0).unwrap_err();
        match err {
            VaeError::ShapeMismatch { left, right, .. } => {
                assert_eq!(left, vec![2, 1, 9]);
                assert_eq!(right, vec![2, 1, 8]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_same_count_different_layout_is_accepted() {
        let recon = Tensor::full(0.5f32, (1, 1, 8), &Device::Cpu).unwrap();
        let x = Tensor::zeros((2, 1, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(binary_cross_entropy_sum(&recon, &x).is_ok());
    }

    #[test]
    fn test_bce_gradient_is_finite_at_saturation() {
        let p = candle_core::Var::new(&[0f32, 1.0, 0.5], &Device::Cpu).unwrap();
        let x = Tensor::new(&[1f32, 0.0, 1.0], &Device::Cpu).unwrap();
        let loss = binary_cross_entropy_sum(p.as_tensor(), &x).unwrap();
        let grads = loss.backward().unwrap();
        let g: Vec<f32> = grads.get(p.as_tensor()).unwrap().to_vec1().unwrap();
        assert!(g.iter().all(|v| v.is_finite()), "{:?}", g);
    }
}
