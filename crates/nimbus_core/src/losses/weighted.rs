//! NodeWeighting - Shared weighting for node-weighted losses
//!
//! Holds the per-node weights (usually proportional to grid-cell area), the
//! optional per-feature weights and the NaN policy. Losses compute an
//! elementwise error and hand it here for feature scaling and the weighted
//! reduction over nodes.

use candle_core::{bail, DType, Result, Tensor};

use super::reduce::NanPolicy;

#[derive(Clone, Debug)]
pub struct NodeWeighting {
    weights: Tensor,
    feature_weights: Option<Tensor>,
    nan_policy: NanPolicy,
}

impl NodeWeighting {
    /// `node_weights` must be 1-D, non-negative, with a positive sum.
    pub fn new(node_weights: Tensor, nan_policy: NanPolicy) -> Result<Self> {
        if node_weights.rank() != 1 {
            bail!(
                "node weights must be 1-D, got shape {:?}",
                node_weights.dims()
            );
        }
        let as_f32 = node_weights.to_dtype(DType::F32)?;
        let min = as_f32.min(0)?.to_scalar::<f32>()?;
        let total = as_f32.sum_all()?.to_scalar::<f32>()?;
        if min < 0.0 || min.is_nan() {
            bail!("node weights must be non-negative (min = {min})");
        }
        if total <= 0.0 {
            bail!("node weights must have a positive sum (sum = {total})");
        }
        tracing::debug!(
            "NodeWeighting: {} nodes, weight sum {:.4}, nan policy {:?}",
            node_weights.dim(0)?,
            total,
            nan_policy
        );
        Ok(Self {
            weights: node_weights,
            feature_weights: None,
            nan_policy,
        })
    }

    /// Per-feature weights over the full model output, shape `(V,)`.
    pub fn with_feature_weights(mut self, feature_weights: Tensor) -> Result<Self> {
        if feature_weights.rank() != 1 {
            bail!(
                "feature weights must be 1-D, got shape {:?}",
                feature_weights.dims()
            );
        }
        self.feature_weights = Some(feature_weights);
        Ok(self)
    }

    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    pub fn num_nodes(&self) -> usize {
        self.weights.dims()[0]
    }

    pub fn nan_policy(&self) -> NanPolicy {
        self.nan_policy
    }

    /// Multiply the variable axis by the feature weights.
    ///
    /// `feature_indices` selects which entries of the full feature-weight
    /// vector line up with the variables present in `out`.
    pub fn scale(&self, out: &Tensor, feature_indices: Option<&[u32]>) -> Result<Tensor> {
        let Some(feature_weights) = &self.feature_weights else {
            return Ok(out.clone());
        };
        let feature_weights = feature_weights
            .to_device(out.device())?
            .to_dtype(out.dtype())?;
        let feature_weights = match feature_indices {
            Some(indices) => {
                let ids = Tensor::new(indices, out.device())?;
                feature_weights.index_select(&ids, 0)?
            }
            None => feature_weights,
        };
        out.broadcast_mul(&feature_weights)
    }

    /// Normalised weighted sum over nodes: `sum(out * w) / sum(w)`.
    ///
    /// With `squash` the variable axis is averaged first and the result is a
    /// scalar; otherwise the result keeps the variable axis, shape `(V,)`.
    pub fn scale_by_node_weights(&self, out: &Tensor, squash: bool) -> Result<Tensor> {
        let policy = self.nan_policy;
        let weights = self
            .weights
            .to_device(out.device())?
            .to_dtype(out.dtype())?;

        if squash {
            let out = policy.mean(out, out.rank() - 1)?;
            let weights = weights.broadcast_as(out.shape())?;
            let weighted = out.mul(&weights)?;
            let total = policy.sum_all(&weights)?;
            return policy.sum_all(&weighted.broadcast_div(&total)?);
        }

        if out.rank() < 2 {
            bail!(
                "unsquashed loss needs (.., nodes, variables), got shape {:?}",
                out.dims()
            );
        }
        let weights = weights.unsqueeze(1)?.broadcast_as(out.shape())?;
        let weighted = out.mul(&weights)?;
        let total = policy.sum_leading(&weights)?;
        policy.sum_leading(&weighted.broadcast_div(&total)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_rejects_bad_weights() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let negative = Tensor::new(&[1.0f32, -0.5, 2.0], &device)?;
        assert!(NodeWeighting::new(negative, NanPolicy::Propagate).is_err());

        let zero = Tensor::zeros(4, DType::F32, &device)?;
        assert!(NodeWeighting::new(zero, NanPolicy::Propagate).is_err());

        let matrix = Tensor::ones((2, 2), DType::F32, &device)?;
        assert!(NodeWeighting::new(matrix, NanPolicy::Propagate).is_err());
        Ok(())
    }

    #[test]
    fn test_weighted_mean_over_nodes() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let weights = Tensor::new(&[1.0f32, 3.0], &device)?;
        let weighting = NodeWeighting::new(weights, NanPolicy::Propagate)?;

        // (batch = 1, nodes = 2, vars = 2)
        let out = Tensor::new(&[[[2.0f32, 4.0], [6.0, 10.0]]], &device)?;

        let squashed = weighting.scale_by_node_weights(&out, true)?;
        assert_eq!(squashed.rank(), 0);
        // node means 3 and 8 -> (3 * 1 + 8 * 3) / 4
        let value = squashed.to_scalar::<f32>()?;
        assert!((value - 6.75).abs() < 1e-6);

        let per_var = weighting.scale_by_node_weights(&out, false)?;
        assert_eq!(per_var.dims(), &[2]);
        let per_var = per_var.to_vec1::<f32>()?;
        assert!((per_var[0] - 5.0).abs() < 1e-6);
        assert!((per_var[1] - 8.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_feature_scale_with_indices() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let weighting = NodeWeighting::new(Tensor::ones(2, DType::F32, &device)?, NanPolicy::Propagate)?
            .with_feature_weights(Tensor::new(&[1.0f32, 2.0, 10.0], &device)?)?;

        let out = Tensor::ones((1, 2, 2), DType::F32, &device)?;
        let scaled = weighting.scale(&out, Some(&[0, 2]))?;
        assert_eq!(
            scaled.flatten_all()?.to_vec1::<f32>()?,
            vec![1.0, 10.0, 1.0, 10.0]
        );
        Ok(())
    }
}
