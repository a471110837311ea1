use std::path::Path;

use candle_core::{Device, Tensor};
use nimbus_core::model::LinearForecasterConfig;
use nimbus_core::{DataIndices, Forecaster, LinearForecaster, NodeWeightedLoss, Normalizer};
use nimbus_diag::callbacks;
use nimbus_diag::demo::SyntheticDataset;
use nimbus_diag::sinks::read_records;
use nimbus_diag::{CallbackList, DiagConfig, DiagError, FailurePolicy, TrainerContext, ValidationLoop};

fn config(plots: &Path) -> DiagConfig {
    let mut config = DiagConfig::default();
    config.hardware.paths.plots = Some(plots.to_path_buf());
    config.data.diagnostic = vec!["tp".to_string(), "cp".to_string()];
    config.data.forcing = vec!["insolation".to_string()];
    let plot = &mut config.diagnostics.plot;
    plot.frequency = 1;
    plot.parameters = vec!["z_500".to_string(), "2t".to_string(), "tp".to_string()];
    plot.learned_features = true;
    plot.longrollout.enabled = true;
    plot.longrollout.rollout = vec![3];
    plot.longrollout.frequency = 1;
    config
}

fn model_config() -> LinearForecasterConfig {
    LinearForecasterConfig {
        multi_step: 2,
        rollout: 2,
        ..Default::default()
    }
}

#[test]
fn test_validation_writes_every_figure() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path());
    config.diagnostics.log.wandb.enabled = true;
    config.diagnostics.log.wandb.dir = dir.path().join("wandb");

    let device = Device::Cpu;
    let dataset = SyntheticDataset::generate(4, 8, 12, 3)?;
    let (model, _varmap) = dataset.forecaster(model_config(), &device)?;
    let batches = dataset.batches(2, 2, 5, &device)?;

    let list = callbacks::from_config(&config, FailurePolicy::Propagate)?;
    assert_eq!(list.len(), 6);
    let losses = ValidationLoop::new(&model, list).run(1, &batches)?;
    assert_eq!(losses.len(), 1);
    assert!(losses[0].is_finite());

    let plots = dir.path().join("plots");
    let expected = [
        "gnn_pred_val_sample_rstep00_batch0000_rank0_epoch000.png",
        "gnn_pred_val_sample_rstep01_batch0001_rank0_epoch000.png",
        "loss_rstep_rstep00_rank0_epoch000.png",
        "loss_rstep_rstep01_rank0_epoch000.png",
        "gnn_pred_val_histo_rstep_00_batch0000_rank0_epoch000.png",
        "gnn_pred_val_spec_rstep_01_batch0001_rank0_epoch000.png",
        "node_trainable_params_epoch000.png",
        "edge_trainable_params_epoch000.png",
        "gnn_pred_val_sample_rstep002_batch0000_rank0_epoch000.png",
    ];
    for name in expected {
        assert!(plots.join(name).exists(), "missing {name}");
    }

    let history = read_records(&dir.path().join("wandb").join("history.jsonl"))?;
    assert!(history.iter().any(|r| r.key == "val_pred_sample_rstep00_rank0"));
    assert!(history.iter().any(|r| r.key == "loss_sample_rstep01_rank0"));
    assert!(history.iter().any(|r| r.key == "val_pred_spec_rstep_00_rank0"));
    Ok(())
}

#[test]
fn test_non_primary_rank_writes_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path());

    let device = Device::Cpu;
    let dataset = SyntheticDataset::generate(4, 8, 10, 5)?;
    let (model, _varmap) = dataset.forecaster(model_config(), &device)?;
    let batches = dataset.batches(2, 2, 5, &device)?;

    let list = callbacks::from_config(&config, FailurePolicy::Propagate)?;
    let losses = ValidationLoop::new(&model, list)
        .with_rank(1, false)
        .run(2, &batches)?;
    assert_eq!(losses.len(), 2);
    assert!(!dir.path().join("plots").exists());
    Ok(())
}

#[test]
fn test_unknown_parameter_is_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path());
    config.diagnostics.plot.asynchronous = false;
    config.diagnostics.plot.learned_features = false;
    config.diagnostics.plot.longrollout.enabled = false;
    config.diagnostics.plot.parameters = vec!["q_50".to_string()];

    let device = Device::Cpu;
    let dataset = SyntheticDataset::generate(4, 8, 8, 9)?;
    let (model, _varmap) = dataset.forecaster(model_config(), &device)?;
    let batches = dataset.batches(1, 1, 4, &device)?;

    let list = callbacks::from_config(&config, FailurePolicy::Propagate)?;
    match ValidationLoop::new(&model, list).run(1, &batches) {
        Err(DiagError::UnknownParameter(name)) => assert_eq!(name, "q_50"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("unknown parameter was accepted"),
    }
    Ok(())
}

#[test]
fn test_short_batch_fails_long_rollout() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path());
    config.diagnostics.plot.enabled = false;
    config.diagnostics.plot.learned_features = false;
    config.diagnostics.plot.longrollout.rollout = vec![6];

    let device = Device::Cpu;
    let dataset = SyntheticDataset::generate(4, 8, 8, 2)?;
    let (model, _varmap) = dataset.forecaster(model_config(), &device)?;
    let batches = dataset.batches(1, 1, 5, &device)?;

    let list = callbacks::from_config(&config, FailurePolicy::Propagate)?;
    let err = ValidationLoop::new(&model, list).run(1, &batches).err();
    assert!(matches!(
        err,
        Some(DiagError::InsufficientBatch { available: 5, required: 8 })
    ));
    Ok(())
}

/// Delegates to a real model but reports an empty input window.
struct NoInputWindow<'a>(&'a LinearForecaster);

impl Forecaster for NoInputWindow<'_> {
    fn multi_step(&self) -> usize {
        0
    }

    fn rollout(&self) -> usize {
        self.0.rollout()
    }

    fn data_indices(&self) -> &DataIndices {
        self.0.data_indices()
    }

    fn pre_processors(&self) -> &Normalizer {
        self.0.pre_processors()
    }

    fn post_processors(&self) -> &Normalizer {
        self.0.post_processors()
    }

    fn latlons(&self) -> &Tensor {
        self.0.latlons()
    }

    fn loss(&self) -> &dyn NodeWeightedLoss {
        self.0.loss()
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        self.0.forward(x)
    }
}

#[test]
fn test_empty_input_window_is_a_config_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path());
    config.diagnostics.plot.asynchronous = false;
    config.diagnostics.plot.learned_features = false;
    config.diagnostics.plot.longrollout.enabled = false;

    let device = Device::Cpu;
    let dataset = SyntheticDataset::generate(4, 8, 8, 4)?;
    let (model, _varmap) = dataset.forecaster(model_config(), &device)?;
    let batch = dataset.batches(1, 1, 5, &device)?.remove(0);
    let outputs = ValidationLoop::new(&model, CallbackList::default()).validation_step(&batch)?;
    let trainer = TrainerContext::single_process(0);
    let broken = NoInputWindow(&model);

    let mut sample_plots = callbacks::from_config(&config, FailurePolicy::Propagate)?;
    let err = sample_plots
        .on_validation_batch_end(&trainer, &broken, &outputs, &batch, 0)
        .err();
    assert!(matches!(err, Some(DiagError::Config(_))), "got {err:?}");

    config.diagnostics.plot.enabled = false;
    config.diagnostics.plot.longrollout.enabled = true;
    config.diagnostics.plot.longrollout.rollout = vec![1];
    let mut long_rollout = callbacks::from_config(&config, FailurePolicy::Propagate)?;
    let err = long_rollout
        .on_validation_batch_end(&trainer, &broken, &outputs, &batch, 0)
        .err();
    assert!(matches!(err, Some(DiagError::Config(_))), "got {err:?}");

    sample_plots.teardown()?;
    long_rollout.teardown()?;
    Ok(())
}
