//! PlotAdditionalMetrics - Value histograms and zonal power spectra per rollout step.
//!
//! Either figure is skipped when its parameter list is not configured.

use std::sync::Arc;

use candle_core::Tensor;
use nimbus_core::Forecaster;

use super::{plot_parameters, sample_frames, Callback, PlotBase, TrainerContext, ValidationOutput};
use crate::config::DiagConfig;
use crate::dispatch::PlotJob;
use crate::error::Result;
use crate::output::FigureTarget;
use crate::plots::{plot_histogram, plot_power_spectrum};

pub struct PlotAdditionalMetrics {
    base: PlotBase,
    config: DiagConfig,
    sample_idx: usize,
}

impl PlotAdditionalMetrics {
    pub fn new(base: PlotBase, config: &DiagConfig) -> Self {
        Self {
            base,
            config: config.clone(),
            sample_idx: config.diagnostics.plot.sample_idx,
        }
    }

    fn plot_metrics(
        &mut self,
        trainer: &TrainerContext,
        model: &dyn Forecaster,
        outputs: &ValidationOutput,
        batch: &Tensor,
        batch_idx: usize,
    ) -> Result<()> {
        let plot = &self.config.diagnostics.plot;
        let histogram_parameters = match &plot.parameters_histogram {
            Some(names) => Some(Arc::new(plot_parameters(names, model, &self.config)?)),
            None => None,
        };
        let spectrum_parameters = match &plot.parameters_spectrum {
            Some(names) => Some(Arc::new(plot_parameters(names, model, &self.config)?)),
            None => None,
        };
        if histogram_parameters.is_none() && spectrum_parameters.is_none() {
            return Ok(());
        }
        let precip_fields = Arc::new(plot.precip_and_related_fields.clone());

        let latlons = self.base.latlons(model)?;
        let frames = sample_frames(
            &mut self.base,
            model,
            batch,
            &outputs.predictions,
            self.sample_idx,
        )?;
        let x = Arc::new(frames.data[0].clone());

        for (rollout_step, y_pred) in frames.predictions.into_iter().enumerate() {
            let y_true = Arc::new(frames.data[rollout_step + 1].clone());
            let y_pred = Arc::new(y_pred);

            if let Some(parameters) = &histogram_parameters {
                let (parameters, x, y_true, y_pred, precip) = (
                    Arc::clone(parameters),
                    Arc::clone(&x),
                    Arc::clone(&y_true),
                    Arc::clone(&y_pred),
                    Arc::clone(&precip_fields),
                );
                let producer = move || plot_histogram(&parameters, &x, &y_true, &y_pred, &precip);
                let target = FigureTarget::new(
                    format!("gnn_pred_val_histo_rstep_{rollout_step:02}_batch{batch_idx:04}_rank0"),
                    format!("val_pred_histo_rstep_{rollout_step:02}_rank{}", trainer.local_rank),
                    trainer.current_epoch,
                );
                self.base.plot(trainer, PlotJob::new(producer, target))?;
            }

            if let Some(parameters) = &spectrum_parameters {
                let (parameters, latlons, x) = (Arc::clone(parameters), Arc::clone(&latlons), Arc::clone(&x));
                let producer = move || plot_power_spectrum(&parameters, &latlons, &x, &y_true, &y_pred);
                let target = FigureTarget::new(
                    format!("gnn_pred_val_spec_rstep_{rollout_step:02}_batch{batch_idx:04}_rank0"),
                    format!("val_pred_spec_rstep_{rollout_step:02}_rank{}", trainer.local_rank),
                    trainer.current_epoch,
                );
                self.base.plot(trainer, PlotJob::new(producer, target))?;
            }
        }
        Ok(())
    }
}

impl Callback for PlotAdditionalMetrics {
    fn name(&self) -> &str {
        "PlotAdditionalMetrics"
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
        self.plot_metrics(trainer, model, outputs, batch, batch_idx)
    }

    fn teardown(&mut self) -> Result<()> {
        self.base.teardown();
        Ok(())
    }
}
