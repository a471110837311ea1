//! ValidationLoop - Drives a Forecaster over validation batches and fires the
//! diagnostics hooks.
//!
//! Per epoch: `on_validation_epoch_start`, then for every batch a rollout,
//! the rollout loss and `on_validation_batch_end`, then
//! `on_validation_epoch_end`. Callbacks are torn down (and their plot workers
//! drained) when the loop finishes, also after a failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use candle_core::{DType, Tensor};
use nimbus_core::rollout::{collect_predictions, target_at};
use nimbus_core::Forecaster;
use tracing::{info, warn};

use crate::callbacks::{CallbackList, TrainerContext, ValidationOutput};
use crate::error::Result;

pub struct ValidationLoop<'a> {
    model: &'a dyn Forecaster,
    callbacks: CallbackList,
    is_primary: bool,
    local_rank: usize,
    running: Option<Arc<AtomicBool>>,
}

impl<'a> ValidationLoop<'a> {
    pub fn new(model: &'a dyn Forecaster, callbacks: CallbackList) -> Self {
        Self {
            model,
            callbacks,
            is_primary: true,
            local_rank: 0,
            running: None,
        }
    }

    pub fn with_rank(mut self, local_rank: usize, is_primary: bool) -> Self {
        self.local_rank = local_rank;
        self.is_primary = is_primary;
        self
    }

    /// Stop after the current batch once `running` turns false.
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    fn keep_running(&self) -> bool {
        self.running
            .as_ref()
            .map_or(true, |r| r.load(Ordering::SeqCst))
    }

    /// Rollout of one raw batch and its mean loss over the rollout steps.
    pub fn validation_step(&self, batch: &Tensor) -> Result<ValidationOutput> {
        let model = self.model;
        let normalized = model.pre_processors().normalize(batch)?;
        let steps = model.rollout();
        let predictions = collect_predictions(model, &normalized, steps)?;

        let mut loss = Tensor::zeros((), DType::F32, batch.device())?;
        for (step, y_pred) in predictions.iter().enumerate() {
            let y_true = target_at(model, &normalized, model.multi_step() + step)?;
            let step_loss = model.loss().forward(y_pred, &y_true, true)?.to_dtype(DType::F32)?;
            loss = loss.add(&step_loss)?;
        }
        let loss = (loss / steps as f64)?;
        Ok(ValidationOutput { loss, predictions })
    }

    fn run_epoch(&mut self, epoch: usize, batches: &[Tensor]) -> Result<Option<f32>> {
        let trainer = TrainerContext {
            current_epoch: epoch,
            is_primary: self.is_primary,
            local_rank: self.local_rank,
        };
        self.callbacks.on_validation_epoch_start(&trainer, self.model)?;

        let mut total = 0.0f32;
        let mut seen = 0usize;
        for (batch_idx, batch) in batches.iter().enumerate() {
            if !self.keep_running() {
                warn!("Validation interrupted at epoch {} batch {}", epoch, batch_idx);
                break;
            }
            let outputs = self.validation_step(batch)?;
            total += outputs.loss.to_scalar::<f32>()?;
            seen += 1;
            self.callbacks
                .on_validation_batch_end(&trainer, self.model, &outputs, batch, batch_idx)?;
        }

        self.callbacks.on_validation_epoch_end(&trainer, self.model)?;
        Ok((seen > 0).then(|| total / seen as f32))
    }

    /// Run `epochs` passes over `batches`; returns the mean loss of each completed epoch.
    pub fn run(mut self, epochs: usize, batches: &[Tensor]) -> Result<Vec<f32>> {
        let mut losses = Vec::with_capacity(epochs);
        let mut outcome = Ok(());
        for epoch in 0..epochs {
            if !self.keep_running() {
                break;
            }
            match self.run_epoch(epoch, batches) {
                Ok(Some(loss)) => {
                    info!("Epoch {:>3} | val_loss {:.5}", epoch, loss);
                    losses.push(loss);
                }
                Ok(None) => {}
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        info!("Draining plot workers...");
        let teardown = self.callbacks.teardown();
        outcome?;
        teardown?;
        Ok(losses)
    }
}
