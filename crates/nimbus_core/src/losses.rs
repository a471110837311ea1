//! Losses Module - Node- and variable-weighted regression losses
//!
//! - NanPolicy: standard or NaN-ignoring reductions
//! - NodeWeighting: shared node/feature weighting used by every loss
//! - WeightedMaeLoss: area-weighted L1
//! - WeightedMseLoss: area- and inverse-variance-weighted L2

use candle_core::{Result, Tensor};

pub mod mae;
pub mod mse;
pub mod reduce;
pub mod weighted;

pub use mae::WeightedMaeLoss;
pub use mse::WeightedMseLoss;
pub use reduce::NanPolicy;
pub use weighted::NodeWeighting;

/// Loss over `(batch, [ensemble,] nodes, variables)` tensors.
pub trait NodeWeightedLoss: Send + Sync {
    fn name(&self) -> &'static str;

    /// `squash = true` returns a scalar, `false` keeps the variable axis.
    fn forward(&self, pred: &Tensor, target: &Tensor, squash: bool) -> Result<Tensor>;
}
