//! Processors - Invertible per-variable normalisation
//!
//! `Normalizer` is an affine map on the trailing variable axis:
//! `normalize(x) = (x - offset) / scale`, `denormalize(y) = y * scale + offset`.
//! Both return new tensors; inputs are never modified.

use candle_core::{bail, DType, Device, Result, Tensor};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalizationMethod {
    #[default]
    MeanStd,
    MinMax,
    Max,
    None,
}

/// Dataset statistics for a single variable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableStats {
    pub mean: f64,
    pub stdev: f64,
    pub minimum: f64,
    pub maximum: f64,
}

impl VariableStats {
    /// Statistics over the finite values of `values`.
    pub fn from_values(values: &[f32]) -> Self {
        let finite: Vec<f64> = values
            .iter()
            .filter(|v| v.is_finite())
            .map(|v| *v as f64)
            .collect();
        if finite.is_empty() {
            return Self {
                mean: 0.0,
                stdev: 1.0,
                minimum: 0.0,
                maximum: 1.0,
            };
        }
        let n = finite.len() as f64;
        let mean = finite.iter().sum::<f64>() / n;
        let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let minimum = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let maximum = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            mean,
            stdev: var.sqrt(),
            minimum,
            maximum,
        }
    }

    fn offset_and_scale(&self, method: NormalizationMethod) -> (f64, f64) {
        match method {
            NormalizationMethod::MeanStd => (self.mean, self.stdev),
            NormalizationMethod::MinMax => (self.minimum, self.maximum - self.minimum),
            NormalizationMethod::Max => (0.0, self.maximum),
            NormalizationMethod::None => (0.0, 1.0),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Normalizer {
    names: Vec<String>,
    offset: Tensor,
    scale: Tensor,
}

impl Normalizer {
    pub fn new(
        names: &[String],
        stats: &[VariableStats],
        methods: &[NormalizationMethod],
        device: &Device,
    ) -> Result<Self> {
        if names.len() != stats.len() || names.len() != methods.len() {
            bail!(
                "normalizer needs one statistic and method per variable ({} names, {} stats, {} methods)",
                names.len(),
                stats.len(),
                methods.len()
            );
        }

        let mut offsets = Vec::with_capacity(names.len());
        let mut scales = Vec::with_capacity(names.len());
        for ((name, stat), method) in names.iter().zip(stats).zip(methods) {
            let (offset, mut scale) = stat.offset_and_scale(*method);
            if scale.abs() < f64::EPSILON || !scale.is_finite() {
                tracing::warn!(
                    "Normalizer: degenerate scale {} for '{}' ({:?}), using 1.0",
                    scale,
                    name,
                    method
                );
                scale = 1.0;
            }
            offsets.push(offset as f32);
            scales.push(scale as f32);
        }

        Ok(Self {
            names: names.to_vec(),
            offset: Tensor::from_vec(offsets, names.len(), device)?,
            scale: Tensor::from_vec(scales, names.len(), device)?,
        })
    }

    pub fn identity(names: &[String], device: &Device) -> Result<Self> {
        let n = names.len();
        Ok(Self {
            names: names.to_vec(),
            offset: Tensor::zeros(n, DType::F32, device)?,
            scale: Tensor::ones(n, DType::F32, device)?,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn device(&self) -> &Device {
        self.offset.device()
    }

    pub fn normalize(&self, x: &Tensor) -> Result<Tensor> {
        let (offset, scale) = self.params_like(x)?;
        x.broadcast_sub(&offset)?.broadcast_div(&scale)
    }

    pub fn denormalize(&self, x: &Tensor) -> Result<Tensor> {
        let (offset, scale) = self.params_like(x)?;
        x.broadcast_mul(&scale)?.broadcast_add(&offset)
    }

    /// Normaliser restricted to the variables at `indices`.
    pub fn select(&self, indices: &[u32]) -> Result<Self> {
        let ids = Tensor::new(indices, self.device())?;
        let mut names = Vec::with_capacity(indices.len());
        for idx in indices {
            match self.names.get(*idx as usize) {
                Some(name) => names.push(name.clone()),
                None => bail!("normalizer has no variable at index {idx}"),
            }
        }
        Ok(Self {
            names,
            offset: self.offset.index_select(&ids, 0)?,
            scale: self.scale.index_select(&ids, 0)?,
        })
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            names: self.names.clone(),
            offset: self.offset.to_device(device)?,
            scale: self.scale.to_device(device)?,
        })
    }

    fn params_like(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let vars = x.dims().last().copied().unwrap_or(0);
        if vars != self.len() {
            bail!(
                "normalizer covers {} variables but tensor has {} (shape {:?})",
                self.len(),
                vars,
                x.dims()
            );
        }
        let offset = self.offset.to_device(x.device())?.to_dtype(x.dtype())?;
        let scale = self.scale.to_device(x.device())?.to_dtype(x.dtype())?;
        Ok((offset, scale))
    }
}
