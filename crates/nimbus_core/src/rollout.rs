//! Rollout - Autoregressive application of a Forecaster
//!
//! Batches are `(bs, time, N, V_data)` in normalised space. The first
//! `multi_step` steps seed the input window; every prediction is fed back
//! through `Forecaster::advance_input`.

use candle_core::{bail, Result, Tensor, D};

use crate::model::Forecaster;

/// Input window `batch[:, 0..multi_step, :, data.input.full]`.
pub fn initial_input<M: Forecaster + ?Sized>(model: &M, batch: &Tensor) -> Result<Tensor> {
    let ids = model.data_indices().data.input.full_ids(batch.device())?;
    batch
        .narrow(1, 0, model.multi_step())?
        .contiguous()?
        .index_select(&ids, D::Minus1)
}

/// Model-output variables of the batch at time `t`, `(bs, N, V_out)`.
pub fn target_at<M: Forecaster + ?Sized>(model: &M, batch: &Tensor, t: usize) -> Result<Tensor> {
    let ids = model.data_indices().data.output.full_ids(batch.device())?;
    batch
        .narrow(1, t, 1)?
        .squeeze(1)?
        .contiguous()?
        .index_select(&ids, D::Minus1)
}

/// Run `steps` autoregressive steps, handing each prediction to `on_step`.
///
/// The batch must hold at least `multi_step + steps` time steps.
pub fn rollout_predictions<M, F, E>(model: &M, batch: &Tensor, steps: usize, mut on_step: F) -> std::result::Result<(), E>
where
    M: Forecaster + ?Sized,
    F: FnMut(usize, &Tensor) -> std::result::Result<(), E>,
    E: From<candle_core::Error>,
{
    let available = batch.dim(1)?;
    let required = model.multi_step() + steps;
    if available < required {
        return Err(E::from(candle_core::Error::Msg(format!(
            "batch length {available} not sufficient for rollout of {steps} steps (needs {required})"
        ))));
    }

    let mut x = initial_input(model, batch)?;
    for step in 0..steps {
        let y_pred = model.forward(&x)?.detach();
        x = model.advance_input(&x, &y_pred, batch, step)?;
        on_step(step, &y_pred)?;
    }
    Ok(())
}

/// All `steps` predictions of a rollout.
pub fn collect_predictions<M: Forecaster + ?Sized>(model: &M, batch: &Tensor, steps: usize) -> Result<Vec<Tensor>> {
    if steps == 0 {
        bail!("rollout needs at least one step");
    }
    let mut out = Vec::with_capacity(steps);
    rollout_predictions(model, batch, steps, |_, y| {
        out.push(y.clone());
        Ok::<(), candle_core::Error>(())
    })?;
    Ok(out)
}
