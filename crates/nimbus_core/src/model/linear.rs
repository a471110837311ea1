//! LinearForecaster - Persistence plus a learned linear correction
//!
//! Each node sees its own input window concatenated with a trainable node
//! embedding; a single linear head predicts the output increment. The
//! hidden-graph embedding and the data->hidden edge features are trainable
//! parameters as well, so the learned-feature plots have something to show.

use candle_core::{bail, DType, Result, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};

use super::{EdgeFeatures, Forecaster, NodeFeatures};
use crate::graph;
use crate::indices::DataIndices;
use crate::losses::NodeWeightedLoss;
use crate::processors::Normalizer;

#[derive(Clone, Debug)]
pub struct LinearForecasterConfig {
    pub multi_step: usize,
    pub rollout: usize,
    pub node_feature_dim: usize,
    pub edge_feature_dim: usize,
    pub data_graph: String,
    pub hidden_graph: String,
    /// Data nodes connected to each hidden node.
    pub neighbours: usize,
}

impl Default for LinearForecasterConfig {
    fn default() -> Self {
        Self {
            multi_step: 2,
            rollout: 1,
            node_feature_dim: 4,
            edge_feature_dim: 2,
            data_graph: "data".to_string(),
            hidden_graph: "hidden".to_string(),
            neighbours: 4,
        }
    }
}

pub struct LinearForecaster {
    pub config: LinearForecasterConfig,
    indices: DataIndices,
    pre: Normalizer,
    post: Normalizer,
    latlons: Tensor,
    hidden_latlons: Tensor,
    edges: Vec<(u32, u32)>,
    head: Linear,
    data_features: Tensor,
    hidden_features: Tensor,
    edge_features: Tensor,
    loss: Box<dyn NodeWeightedLoss>,
}

impl LinearForecaster {
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        config: LinearForecasterConfig,
        indices: DataIndices,
        pre: Normalizer,
        data_coords: &[[f32; 2]],
        hidden_coords: &[[f32; 2]],
        loss: Box<dyn NodeWeightedLoss>,
        vb: VarBuilder,
    ) -> Result<Self> {
        if config.multi_step == 0 {
            bail!("multi_step must be at least 1");
        }
        if pre.len() != indices.variables().len() {
            bail!(
                "pre-processor covers {} variables, dataset has {}",
                pre.len(),
                indices.variables().len()
            );
        }
        let device = vb.device().clone();
        let post = pre.select(&indices.data.output.full)?;

        let n_in = indices.model.input.len();
        let n_out = indices.model.output.len();
        let in_dim = config.multi_step * n_in + config.node_feature_dim;
        let head = candle_nn::linear(in_dim, n_out, vb.pp("head"))?;

        let edges = graph::knn_edges(data_coords, hidden_coords, config.neighbours);
        let init = candle_nn::init::DEFAULT_KAIMING_NORMAL;
        let data_features = vb.get_with_hints(
            (data_coords.len(), config.node_feature_dim),
            "trainable.data",
            init,
        )?;
        let hidden_features = vb.get_with_hints(
            (hidden_coords.len(), config.node_feature_dim),
            "trainable.hidden",
            init,
        )?;
        let edge_features = vb.get_with_hints(
            (edges.len(), config.edge_feature_dim),
            "trainable.edges",
            init,
        )?;

        tracing::info!(
            "LinearForecaster: {} data nodes, {} hidden nodes, {} edges, {} -> {} features",
            data_coords.len(),
            hidden_coords.len(),
            edges.len(),
            in_dim,
            n_out
        );

        Ok(Self {
            latlons: graph::coords_tensor(data_coords, &device)?,
            hidden_latlons: graph::coords_tensor(hidden_coords, &device)?,
            config,
            indices,
            pre,
            post,
            edges,
            head,
            data_features,
            hidden_features,
            edge_features,
            loss,
        })
    }

    /// Last input step mapped onto the output layout; diagnostics start at zero.
    fn persistence(&self, x: &Tensor) -> Result<Tensor> {
        let ms = self.config.multi_step;
        let last = x.narrow(1, ms - 1, 1)?.squeeze(1)?.contiguous()?;
        let device = x.device();
        let prog = last.index_select(
            &Tensor::new(self.indices.model.input.prognostic.as_slice(), device)?,
            D::Minus1,
        )?;
        let diagnostic = &self.indices.model.output.diagnostic;
        if diagnostic.is_empty() {
            return Ok(prog);
        }
        let (bs, n, _) = prog.dims3()?;
        let zeros = Tensor::zeros((bs, n, diagnostic.len()), prog.dtype(), device)?;
        let combined = Tensor::cat(&[&prog, &zeros], D::Minus1)?;

        let prognostic = &self.indices.model.output.prognostic;
        let mut perm = vec![0u32; prognostic.len() + diagnostic.len()];
        for (k, pos) in prognostic.iter().enumerate() {
            perm[*pos as usize] = k as u32;
        }
        for (k, pos) in diagnostic.iter().enumerate() {
            perm[*pos as usize] = (prognostic.len() + k) as u32;
        }
        combined.index_select(&Tensor::new(perm, device)?, D::Minus1)
    }
}

impl Forecaster for LinearForecaster {
    fn multi_step(&self) -> usize {
        self.config.multi_step
    }

    fn rollout(&self) -> usize {
        self.config.rollout
    }

    fn data_indices(&self) -> &DataIndices {
        &self.indices
    }

    fn pre_processors(&self) -> &Normalizer {
        &self.pre
    }

    fn post_processors(&self) -> &Normalizer {
        &self.post
    }

    fn latlons(&self) -> &Tensor {
        &self.latlons
    }

    fn loss(&self) -> &dyn NodeWeightedLoss {
        self.loss.as_ref()
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (bs, ms, n, v_in) = x.dims4()?;
        if ms != self.config.multi_step {
            bail!("expected {} input steps, got {}", self.config.multi_step, ms);
        }
        let window = x
            .permute((0, 2, 1, 3))?
            .contiguous()?
            .reshape((bs, n, ms * v_in))?;
        let embedding = self
            .data_features
            .to_dtype(x.dtype())?
            .unsqueeze(0)?
            .broadcast_as((bs, n, self.config.node_feature_dim))?;
        let features = Tensor::cat(&[&window, &embedding], D::Minus1)?;
        let increment = self.head.forward(&features)?;
        increment.add(&self.persistence(x)?)
    }

    fn trainable_node_features(&self) -> Result<Vec<NodeFeatures>> {
        Ok(vec![
            NodeFeatures {
                graph: self.config.data_graph.clone(),
                coords: self.latlons.clone(),
                values: self.data_features.detach(),
            },
            NodeFeatures {
                graph: self.config.hidden_graph.clone(),
                coords: self.hidden_latlons.clone(),
                values: self.hidden_features.detach(),
            },
        ])
    }

    fn trainable_edge_features(&self) -> Result<Vec<EdgeFeatures>> {
        Ok(vec![EdgeFeatures {
            name: format!("{}->{}", self.config.data_graph, self.config.hidden_graph),
            src_coords: self.latlons.clone(),
            dst_coords: self.hidden_latlons.clone(),
            edges: self.edges.clone(),
            values: self.edge_features.to_dtype(DType::F32)?.detach(),
        }])
    }
}
