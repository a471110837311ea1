//! Learned graph features: node embeddings at epoch start, edge features every
//! fifth epoch end.

use nimbus_core::Forecaster;
use tracing::debug;

use super::{Callback, PlotBase, TrainerContext};
use crate::config::DiagConfig;
use crate::dispatch::PlotJob;
use crate::error::Result;
use crate::output::FigureTarget;
use crate::plots::graph::{EdgeFeatureMap, NodeFeatureMap};
use crate::plots::{plot_graph_edge_features, plot_graph_node_features};

const EDGE_PLOT_EVERY: usize = 5;

pub struct GraphNodeTrainableFeaturesPlot {
    base: PlotBase,
    graphs: [String; 2],
}

impl GraphNodeTrainableFeaturesPlot {
    pub fn new(base: PlotBase, config: &DiagConfig) -> Self {
        Self {
            base,
            graphs: [config.graph.data.clone(), config.graph.hidden.clone()],
        }
    }
}

impl Callback for GraphNodeTrainableFeaturesPlot {
    fn name(&self) -> &str {
        "GraphNodeTrainableFeaturesPlot"
    }

    fn on_validation_epoch_start(&mut self, trainer: &TrainerContext, model: &dyn Forecaster) -> Result<()> {
        if !trainer.is_primary {
            return Ok(());
        }
        let maps = model
            .trainable_node_features()?
            .iter()
            .filter(|f| self.graphs.contains(&f.graph))
            .map(NodeFeatureMap::from_features)
            .collect::<Result<Vec<_>>>()?;
        if maps.is_empty() {
            debug!("No trainable node features to plot");
            return Ok(());
        }
        let producer = move || plot_graph_node_features(&maps);
        let target = FigureTarget::new("node_trainable_params", "node_trainable_params", trainer.current_epoch);
        self.base.plot(trainer, PlotJob::new(producer, target))
    }

    fn teardown(&mut self) -> Result<()> {
        self.base.teardown();
        Ok(())
    }
}

pub struct GraphEdgeTrainableFeaturesPlot {
    base: PlotBase,
}

impl GraphEdgeTrainableFeaturesPlot {
    pub fn new(base: PlotBase) -> Self {
        Self { base }
    }
}

impl Callback for GraphEdgeTrainableFeaturesPlot {
    fn name(&self) -> &str {
        "GraphEdgeTrainableFeaturesPlot"
    }

    fn on_validation_epoch_end(&mut self, trainer: &TrainerContext, model: &dyn Forecaster) -> Result<()> {
        if !trainer.is_primary || trainer.current_epoch % EDGE_PLOT_EVERY != 0 {
            return Ok(());
        }
        let maps = model
            .trainable_edge_features()?
            .iter()
            .map(EdgeFeatureMap::from_features)
            .collect::<Result<Vec<_>>>()?;
        if maps.is_empty() {
            debug!("No trainable edge features to plot");
            return Ok(());
        }
        let producer = move || plot_graph_edge_features(&maps);
        let target = FigureTarget::new("edge_trainable_params", "edge_trainable_params", trainer.current_epoch);
        self.base.plot_inline(trainer, PlotJob::new(producer, target))
    }

    fn teardown(&mut self) -> Result<()> {
        self.base.teardown();
        Ok(())
    }
}
