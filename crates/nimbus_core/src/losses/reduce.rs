//! NanPolicy - Standard or NaN-ignoring reductions
//!
//! `Ignore` mirrors `nansum` / `nanmean`: NaNs count as zero in sums and are
//! excluded from the denominator of means. A slice that is entirely NaN
//! therefore reduces to NaN under `mean`, and to zero under `sum`.

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NanPolicy {
    #[default]
    Propagate,
    Ignore,
}

impl NanPolicy {
    pub fn from_ignore_nans(ignore_nans: bool) -> Self {
        if ignore_nans {
            Self::Ignore
        } else {
            Self::Propagate
        }
    }

    pub fn sum(self, x: &Tensor, dim: usize) -> Result<Tensor> {
        match self {
            Self::Propagate => x.sum(dim),
            Self::Ignore => zero_nans(x)?.sum(dim),
        }
    }

    pub fn sum_all(self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Propagate => x.sum_all(),
            Self::Ignore => zero_nans(x)?.sum_all(),
        }
    }

    pub fn mean(self, x: &Tensor, dim: usize) -> Result<Tensor> {
        match self {
            Self::Propagate => x.mean(dim),
            Self::Ignore => {
                let total = zero_nans(x)?.sum(dim)?;
                let count = x.eq(x)?.to_dtype(x.dtype())?.sum(dim)?;
                total.div(&count)
            }
        }
    }

    /// Sum over every axis except the last one, `(.., V) -> (V,)`.
    pub fn sum_leading(self, x: &Tensor) -> Result<Tensor> {
        let rank = x.rank();
        if rank < 2 {
            return match self {
                Self::Propagate => Ok(x.clone()),
                Self::Ignore => zero_nans(x),
            };
        }
        let flat = x.flatten_to(rank - 2)?;
        self.sum(&flat, 0)
    }
}

/// NaN entries replaced by zero. NaN is the only value unequal to itself.
pub fn zero_nans(x: &Tensor) -> Result<Tensor> {
    let is_nan = x.ne(x)?;
    is_nan.where_cond(&x.zeros_like()?, x)
}
