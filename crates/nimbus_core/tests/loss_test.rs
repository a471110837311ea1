use candle_core::{DType, Device, Tensor};
use nimbus_core::{NodeWeightedLoss, WeightedMaeLoss, WeightedMseLoss};

fn sample(device: &Device) -> candle_core::Result<(Tensor, Tensor)> {
    // (batch = 2, nodes = 3, vars = 2)
    let pred = Tensor::new(
        &[
            [[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]],
            [[0.5, 0.0], [1.0, -1.0], [2.0, 2.0]],
        ],
        device,
    )?;
    let target = Tensor::new(
        &[
            [[0.0f32, 2.0], [1.0, 4.0], [5.0, 3.0]],
            [[0.5, 1.0], [0.0, -1.0], [0.0, 2.0]],
        ],
        device,
    )?;
    Ok((pred, target))
}

#[test]
fn test_identical_prediction_gives_zero_loss() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let (pred, _) = sample(&device)?;
    let weights = Tensor::new(&[0.2f32, 1.0, 3.5], &device)?;

    let mse = WeightedMseLoss::new(weights.clone(), None, false)?;
    let mae = WeightedMaeLoss::new(weights, false)?;

    for loss in [&mse as &dyn NodeWeightedLoss, &mae as &dyn NodeWeightedLoss] {
        let squashed = loss.forward(&pred, &pred, true)?.to_scalar::<f32>()?;
        assert_eq!(squashed, 0.0, "{} squashed", loss.name());
        let per_var = loss.forward(&pred, &pred, false)?.to_vec1::<f32>()?;
        assert_eq!(per_var, vec![0.0, 0.0], "{} per variable", loss.name());
    }
    Ok(())
}

#[test]
fn test_squash_drops_variable_axis() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let (pred, target) = sample(&device)?;
    let loss = WeightedMseLoss::new(Tensor::ones(3, DType::F32, &device)?, None, false)?;

    assert_eq!(loss.forward(&pred, &target, true)?.rank(), 0);
    assert_eq!(loss.forward(&pred, &target, false)?.dims(), &[2]);
    Ok(())
}

#[test]
fn test_mse_matches_hand_computation() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let (pred, target) = sample(&device)?;
    let weights = Tensor::new(&[1.0f32, 2.0, 1.0], &device)?;
    let loss = WeightedMseLoss::new(weights, None, false)?;

    // squared errors per (batch, node, var):
    // b0: [1, 0], [4, 0], [0, 9]   b1: [0, 1], [1, 0], [4, 0]
    // per var: (1*1 + 4*2 + 0*1 + 0*1 + 1*2 + 4*1) / (2 * 4) = 15 / 8
    //          (0 + 0 + 9 + 1 + 0 + 0) / 8 = 10 / 8
    let per_var = loss.forward(&pred, &target, false)?.to_vec1::<f32>()?;
    assert!((per_var[0] - 15.0 / 8.0).abs() < 1e-6);
    assert!((per_var[1] - 10.0 / 8.0).abs() < 1e-6);

    // squash: node means b0 [0.5, 2, 4.5], b1 [0.5, 0.5, 2]
    // (0.5 + 4 + 4.5 + 0.5 + 1 + 2) / 8
    let squashed = loss.forward(&pred, &target, true)?.to_scalar::<f32>()?;
    assert!((squashed - 12.5 / 8.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_mse_inverse_variance_scales_each_variable() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let (pred, target) = sample(&device)?;
    let weights = Tensor::new(&[1.0f32, 2.0, 1.0], &device)?;
    let ivar = Tensor::new(&[2.0f32, 0.5], &device)?;
    let loss = WeightedMseLoss::new(weights, Some(ivar), false)?;
    assert!(loss.has_variances());

    let per_var = loss.forward(&pred, &target, false)?.to_vec1::<f32>()?;
    assert!((per_var[0] - 2.0 * 15.0 / 8.0).abs() < 1e-6);
    assert!((per_var[1] - 0.5 * 10.0 / 8.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_mae_feature_scaling() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let (pred, target) = sample(&device)?;
    let weights = Tensor::ones(3, DType::F32, &device)?;
    let loss = WeightedMaeLoss::new(weights, false)?
        .with_feature_weights(Tensor::new(&[3.0f32, 1.0, 0.0], &device)?)?;

    // absolute errors per var: var0 sums to 1+2+0+0+1+2 = 6, var1 to 0+0+3+1+0+0 = 4
    let unscaled = loss.forward_scaled(&pred, &target, false, None, false)?;
    let unscaled = unscaled.to_vec1::<f32>()?;
    assert!((unscaled[0] - 1.0).abs() < 1e-6);
    assert!((unscaled[1] - 4.0 / 6.0).abs() < 1e-6);

    let scaled = loss.forward_scaled(&pred, &target, false, Some(&[0, 2]), true)?;
    let scaled = scaled.to_vec1::<f32>()?;
    assert!((scaled[0] - 3.0).abs() < 1e-6);
    assert_eq!(scaled[1], 0.0);
    Ok(())
}

#[test]
fn test_nans_at_zero_weight_nodes_are_ignored() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let (pred, target) = sample(&device)?;
    let weights = Tensor::new(&[1.0f32, 2.0, 0.0], &device)?;

    // node 2 carries NaNs in the target of both samples
    let mut values = target.flatten_all()?.to_vec1::<f32>()?;
    for b in 0..2 {
        values[b * 6 + 4] = f32::NAN;
        values[b * 6 + 5] = f32::NAN;
    }
    let target_nan = Tensor::from_vec(values, (2, 3, 2), &device)?;

    let baseline_mse = WeightedMseLoss::new(weights.clone(), None, false)?;
    let tolerant_mse = WeightedMseLoss::new(weights.clone(), None, true)?;
    let baseline_mae = WeightedMaeLoss::new(weights.clone(), false)?;
    let tolerant_mae = WeightedMaeLoss::new(weights, true)?;

    for (baseline, tolerant) in [
        (&baseline_mse as &dyn NodeWeightedLoss, &tolerant_mse as &dyn NodeWeightedLoss),
        (&baseline_mae as &dyn NodeWeightedLoss, &tolerant_mae as &dyn NodeWeightedLoss),
    ] {
        for squash in [true, false] {
            let expected = baseline.forward(&pred, &target, squash)?.flatten_all()?.to_vec1::<f32>()?;
            let got = tolerant.forward(&pred, &target_nan, squash)?.flatten_all()?.to_vec1::<f32>()?;
            assert_eq!(expected.len(), got.len());
            for (e, g) in expected.iter().zip(&got) {
                assert!((e - g).abs() < 1e-6, "{}: {e} vs {g} (squash {squash})", tolerant.name());
            }

            let poisoned = baseline.forward(&pred, &target_nan, squash)?.flatten_all()?.to_vec1::<f32>()?;
            assert!(poisoned.iter().any(|v| v.is_nan()));
        }
    }
    Ok(())
}

#[test]
fn test_shape_mismatch_is_an_error() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let (pred, target) = sample(&device)?;
    let loss = WeightedMseLoss::new(Tensor::ones(4, DType::F32, &device)?, None, false)?;
    assert!(loss.forward(&pred, &target, true).is_err());

    let other = Tensor::zeros((2, 3, 3), DType::F32, &device)?;
    assert!(loss.forward(&pred, &other, false).is_err());
    Ok(())
}
