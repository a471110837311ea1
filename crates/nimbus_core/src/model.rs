//! Model Module - Forecaster collaborator contract
//!
//! The diagnostics layer never sees a concrete architecture. It talks to a
//! `Forecaster`, which exposes the processors, index bookkeeping, a forward
//! pass and the learned graph features to plot.
//!
//! - Forecaster: the contract
//! - LinearForecaster: small reference model used by the demo and tests

use candle_core::{Result, Tensor, D};

use crate::indices::DataIndices;
use crate::losses::NodeWeightedLoss;
use crate::processors::Normalizer;

pub mod linear;

pub use linear::{LinearForecaster, LinearForecasterConfig};

/// Trainable features attached to the nodes of one graph.
#[derive(Clone, Debug)]
pub struct NodeFeatures {
    pub graph: String,
    /// `(N, 2)` lat/lon in radians.
    pub coords: Tensor,
    /// `(N, F)`
    pub values: Tensor,
}

/// Trainable features attached to the edges between two graphs.
#[derive(Clone, Debug)]
pub struct EdgeFeatures {
    pub name: String,
    pub src_coords: Tensor,
    pub dst_coords: Tensor,
    /// `(src, dst)` node pairs, one per row of `values`.
    pub edges: Vec<(u32, u32)>,
    /// `(E, F)`
    pub values: Tensor,
}

pub trait Forecaster {
    /// Number of input time steps.
    fn multi_step(&self) -> usize;

    /// Rollout length used during validation.
    fn rollout(&self) -> usize;

    fn data_indices(&self) -> &DataIndices;

    /// Normaliser over the full dataset variable axis.
    fn pre_processors(&self) -> &Normalizer;

    /// Normaliser over the model output variables.
    fn post_processors(&self) -> &Normalizer;

    /// `(N, 2)` lat/lon of the data nodes, radians.
    fn latlons(&self) -> &Tensor;

    fn loss(&self) -> &dyn NodeWeightedLoss;

    /// `(bs, multi_step, N, V_in) -> (bs, N, V_out)`, normalised space.
    fn forward(&self, x: &Tensor) -> Result<Tensor>;

    fn advance_input(
        &self,
        x: &Tensor,
        y_pred: &Tensor,
        batch: &Tensor,
        rollout_step: usize,
    ) -> Result<Tensor> {
        advance_input(self.data_indices(), self.multi_step(), x, y_pred, batch, rollout_step)
    }

    fn trainable_node_features(&self) -> Result<Vec<NodeFeatures>> {
        Ok(Vec::new())
    }

    fn trainable_edge_features(&self) -> Result<Vec<EdgeFeatures>> {
        Ok(Vec::new())
    }
}

/// Slide the input window one step forward.
///
/// The newest step takes prognostic variables from `y_pred` and forcings from
/// the batch at time `multi_step + rollout_step`.
pub fn advance_input(
    indices: &DataIndices,
    multi_step: usize,
    x: &Tensor,
    y_pred: &Tensor,
    batch: &Tensor,
    rollout_step: usize,
) -> Result<Tensor> {
    let device = x.device();
    let prognostic_in = &indices.model.input.prognostic;
    let forcing_in = &indices.model.input.forcing;

    let y_prog = y_pred.index_select(
        &Tensor::new(indices.model.output.prognostic.as_slice(), device)?,
        D::Minus1,
    )?;

    let combined = if forcing_in.is_empty() {
        y_prog
    } else {
        let t = multi_step + rollout_step;
        let forcing = batch.narrow(1, t, 1)?.squeeze(1)?.contiguous()?.index_select(
            &Tensor::new(indices.data.input.forcing.as_slice(), device)?,
            D::Minus1,
        )?;
        Tensor::cat(&[&y_prog, &forcing], D::Minus1)?
    };

    let n_in = prognostic_in.len() + forcing_in.len();
    let mut perm = vec![0u32; n_in];
    for (k, pos) in prognostic_in.iter().enumerate() {
        perm[*pos as usize] = k as u32;
    }
    for (k, pos) in forcing_in.iter().enumerate() {
        perm[*pos as usize] = (prognostic_in.len() + k) as u32;
    }
    let next = combined
        .index_select(&Tensor::new(perm, device)?, D::Minus1)?
        .unsqueeze(1)?;

    if multi_step == 1 {
        return Ok(next);
    }
    let kept = x.narrow(1, 1, multi_step - 1)?;
    Tensor::cat(&[&kept, &next], 1)
}
