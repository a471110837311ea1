//! Nimbus Core
//!
//! Tensor-level building blocks for training a graph weather forecaster:
//! node-weighted losses, normalisers, data indices, lat/lon graph helpers
//! and the model collaborator contract used by the diagnostics crate.

pub mod graph;
pub mod indices;
pub mod losses;
pub mod model;
pub mod processors;
pub mod rollout;

pub use indices::DataIndices;
pub use losses::{NanPolicy, NodeWeightedLoss, NodeWeighting, WeightedMaeLoss, WeightedMseLoss};
pub use model::{EdgeFeatures, Forecaster, LinearForecaster, NodeFeatures};
pub use processors::{NormalizationMethod, Normalizer, VariableStats};
pub use rollout::rollout_predictions;
