//! WeightedMaeLoss - Node-weighted MAE (weighted L1)

use candle_core::{Result, Tensor};

use super::reduce::NanPolicy;
use super::weighted::NodeWeighting;
use super::NodeWeightedLoss;

#[derive(Clone, Debug)]
pub struct WeightedMaeLoss {
    weighting: NodeWeighting,
}

impl WeightedMaeLoss {
    pub const NAME: &'static str = "wmae";

    pub fn new(node_weights: Tensor, ignore_nans: bool) -> Result<Self> {
        let weighting = NodeWeighting::new(node_weights, NanPolicy::from_ignore_nans(ignore_nans))?;
        Ok(Self { weighting })
    }

    /// Per-feature scaling applied when `feature_scale` is requested.
    pub fn with_feature_weights(mut self, feature_weights: Tensor) -> Result<Self> {
        self.weighting = self.weighting.with_feature_weights(feature_weights)?;
        Ok(self)
    }

    pub fn weighting(&self) -> &NodeWeighting {
        &self.weighting
    }

    /// pred / target: `(batch, [ensemble,] nodes, variables)`.
    ///
    /// `feature_indices` are the positions (in the full model output) of the
    /// variables present in `pred`; `feature_scale` applies the feature weights.
    pub fn forward_scaled(
        &self,
        pred: &Tensor,
        target: &Tensor,
        squash: bool,
        feature_indices: Option<&[u32]>,
        feature_scale: bool,
    ) -> Result<Tensor> {
        let mut out = pred.sub(target)?.abs()?;
        if feature_scale {
            out = self.weighting.scale(&out, feature_indices)?;
        }
        self.weighting.scale_by_node_weights(&out, squash)
    }
}

impl NodeWeightedLoss for WeightedMaeLoss {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn forward(&self, pred: &Tensor, target: &Tensor, squash: bool) -> Result<Tensor> {
        self.forward_scaled(pred, target, squash, None, true)
    }
}
