//! PlotLoss - Per-variable loss of every rollout step as a grouped bar chart.

use candle_core::{DType, Device, Tensor};
use nimbus_core::rollout::target_at;
use nimbus_core::Forecaster;

use super::grouping::ParameterGrouping;
use super::{Callback, PlotBase, TrainerContext, ValidationOutput};
use crate::config::DiagConfig;
use crate::dispatch::PlotJob;
use crate::error::{DiagError, Result};
use crate::output::FigureTarget;
use crate::plots::plot_loss;

pub struct PlotLoss {
    base: PlotBase,
    config: DiagConfig,
    grouping: Option<ParameterGrouping>,
}

impl PlotLoss {
    pub fn new(base: PlotBase, config: &DiagConfig) -> Self {
        Self {
            base,
            config: config.clone(),
            grouping: None,
        }
    }

    fn grouping(&mut self, model: &dyn Forecaster) -> &ParameterGrouping {
        self.grouping.get_or_insert_with(|| {
            let names = model.data_indices().model.output.names();
            ParameterGrouping::new(&names, &self.config.diagnostics.plot.parameter_groups)
        })
    }

    fn plot_losses(
        &mut self,
        trainer: &TrainerContext,
        model: &dyn Forecaster,
        outputs: &ValidationOutput,
        batch: &Tensor,
    ) -> Result<()> {
        let normalized = model.pre_processors().normalize(batch)?;
        let multi_step = model.multi_step();
        let available = normalized.dim(1)?;
        let required = multi_step + outputs.predictions.len();
        if available < required {
            return Err(DiagError::InsufficientBatch { available, required });
        }

        let grouping = self.grouping(model).clone();
        for (rollout_step, y_pred) in outputs.predictions.iter().enumerate() {
            let y_true = target_at(model, &normalized, multi_step + rollout_step)?;
            let loss = model
                .loss()
                .forward(y_pred, &y_true, false)?
                .to_dtype(DType::F32)?
                .to_device(&Device::Cpu)?
                .flatten_all()?
                .to_vec1::<f32>()?;
            if loss.len() != grouping.sort_order.len() {
                return Err(DiagError::Draw(format!(
                    "loss has {} variables, model outputs {}",
                    loss.len(),
                    grouping.sort_order.len()
                )));
            }

            let losses = grouping.apply(&loss);
            let colors = grouping.colors.clone();
            let xticks = grouping.xticks.clone();
            let legend = grouping.legend.clone();
            let producer = move || plot_loss(&losses, &colors, &xticks, &legend);
            let target = FigureTarget::new(
                format!("loss_rstep_rstep{rollout_step:02}_rank{}", trainer.local_rank),
                format!("loss_sample_rstep{rollout_step:02}_rank{}", trainer.local_rank),
                trainer.current_epoch,
            );
            self.base.plot(trainer, PlotJob::new(producer, target))?;
        }
        Ok(())
    }
}

impl Callback for PlotLoss {
    fn name(&self) -> &str {
        "PlotLoss"
    }

    fn on_validation_batch_end(
        &mut self,
        trainer: &TrainerContext,
        model: &dyn Forecaster,
        outputs: &ValidationOutput,
        batch: &Tensor,
        batch_idx: usize,
    ) -> Result<()> {
        if !trainer.is_primary || !self.base.should_plot(batch_idx) {
            return Ok(());
        }
        self.plot_losses(trainer, model, outputs, batch)
    }

    fn teardown(&mut self) -> Result<()> {
        self.base.teardown();
        Ok(())
    }
}
