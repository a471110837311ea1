//! WeightedMseLoss - Node- and (inverse-)variance-weighted MSE

use candle_core::{bail, Result, Tensor};

use super::reduce::NanPolicy;
use super::weighted::NodeWeighting;
use super::NodeWeightedLoss;

#[derive(Clone, Debug)]
pub struct WeightedMseLoss {
    weighting: NodeWeighting,
    ivar: Option<Tensor>,
}

impl WeightedMseLoss {
    pub const NAME: &'static str = "wmse";

    /// `data_variances` is the precomputed per-variable inverse-variance
    /// buffer, aligned with the prediction's variable axis.
    pub fn new(node_weights: Tensor, data_variances: Option<Tensor>, ignore_nans: bool) -> Result<Self> {
        if let Some(ivar) = &data_variances {
            if ivar.rank() != 1 {
                bail!("data variances must be 1-D, got shape {:?}", ivar.dims());
            }
        }
        let weighting = NodeWeighting::new(node_weights, NanPolicy::from_ignore_nans(ignore_nans))?;
        Ok(Self {
            weighting,
            ivar: data_variances,
        })
    }

    pub fn weighting(&self) -> &NodeWeighting {
        &self.weighting
    }

    pub fn has_variances(&self) -> bool {
        self.ivar.is_some()
    }
}

impl NodeWeightedLoss for WeightedMseLoss {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn forward(&self, pred: &Tensor, target: &Tensor, squash: bool) -> Result<Tensor> {
        let mut out = pred.sub(target)?.sqr()?;

        if let Some(ivar) = &self.ivar {
            let ivar = ivar.to_device(out.device())?.to_dtype(out.dtype())?;
            out = out.broadcast_mul(&ivar)?;
        }

        self.weighting.scale_by_node_weights(&out, squash)
    }
}
