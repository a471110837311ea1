//! Plots Module - Figure renderers for validation diagnostics
//!
//! All renderers take owned host data (`Frame`s and degree lat/lons) so they
//! can run on the plot worker without touching model state.
//!
//! - sample: map panels of input, truth, prediction, error and increments
//! - loss: per-variable loss bars coloured by parameter group
//! - graph: trainable node and edge features
//! - histogram: value/increment distributions
//! - spectrum: zonal power spectra
//! - colors: colour maps and palettes

pub mod colors;
pub mod graph;
pub mod histogram;
pub mod loss;
pub mod sample;
pub mod spectrum;

use candle_core::{DType, Tensor};
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::error::{DiagError, Result};
use colors::AccumulationScale;

pub use graph::{plot_graph_edge_features, plot_graph_node_features};
pub use histogram::plot_histogram;
pub use loss::plot_loss;
pub use sample::plot_predicted_flat_sample;
pub use spectrum::plot_power_spectrum;

pub(crate) type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;

/// Glyphs need a font backend. Without `ttf` plotters panics on any text, so
/// captions, tick labels and legends are left out and only geometry is drawn.
pub(crate) const DRAW_TEXT: bool = cfg!(feature = "ttf");

/// One model output variable selected for plotting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlotParameter {
    /// Position in the model output vector.
    pub index: usize,
    pub name: String,
    /// Prognostic fields plot increments, diagnostic fields plot values.
    pub prognostic: bool,
}

/// Host copy of a `(nodes, vars)` field.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    nodes: usize,
    vars: usize,
    data: Vec<f32>,
}

impl Frame {
    pub fn new(nodes: usize, vars: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != nodes * vars {
            return Err(DiagError::Draw(format!(
                "frame of {nodes}x{vars} got {} values",
                data.len()
            )));
        }
        Ok(Self { nodes, vars, data })
    }

    /// Copy a `(nodes, vars)` tensor to the host as f32.
    pub fn from_tensor(t: &Tensor) -> Result<Self> {
        let (nodes, vars) = t.dims2()?;
        let data = t.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        Self::new(nodes, vars, data)
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn vars(&self) -> usize {
        self.vars
    }

    pub fn column(&self, var: usize) -> Result<Vec<f32>> {
        if var >= self.vars {
            return Err(DiagError::Draw(format!(
                "variable {var} out of range for frame with {} variables",
                self.vars
            )));
        }
        Ok(self.data.iter().skip(var).step_by(self.vars).copied().collect())
    }
}

/// How a scalar field is mapped to colours.
#[derive(Clone, Debug)]
pub(crate) enum ColorScale {
    Sequential { min: f32, max: f32 },
    Diverging { limit: f32 },
    Accumulation(AccumulationScale),
}

impl ColorScale {
    /// Sequential scale spanning the finite values of all `fields`.
    pub fn spanning(fields: &[&[f32]]) -> Self {
        let (min, max) = finite_range(fields.iter().flat_map(|f| f.iter()));
        ColorScale::Sequential { min, max }
    }

    /// Symmetric diverging scale around zero.
    pub fn symmetric(fields: &[&[f32]]) -> Self {
        let limit = fields
            .iter()
            .flat_map(|f| f.iter())
            .filter(|v| v.is_finite())
            .fold(0.0f32, |acc, v| acc.max(v.abs()));
        ColorScale::Diverging {
            limit: if limit > 0.0 { limit } else { 1.0 },
        }
    }

    pub fn color(&self, value: f32) -> RGBColor {
        match self {
            ColorScale::Sequential { min, max } => {
                let span = (max - min).max(f32::EPSILON);
                colors::viridis(((value - min) / span) as f64)
            }
            ColorScale::Diverging { limit } => colors::rdbu(0.5 - (value / limit) as f64 * 0.5),
            ColorScale::Accumulation(scale) => scale.color(value),
        }
    }
}

/// `(min, max)` of the finite values, `(0, 1)` when there are none.
pub(crate) fn finite_range<'a>(values: impl Iterator<Item = &'a f32>) -> (f32, f32) {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    if min > max {
        (0.0, 1.0)
    } else if min == max {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    }
}

/// Longitude in `[-180, 180)`.
pub(crate) fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

pub(crate) fn difference(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b).map(|(x, y)| x - y).collect()
}

/// Scatter a node field onto a lat/lon map panel.
pub(crate) fn scatter_map(
    area: &Area<'_>,
    title: &str,
    latlons: &[[f64; 2]],
    values: &[f32],
    scale: &ColorScale,
) -> Result<()> {
    let mut builder = ChartBuilder::on(area);
    builder.margin(4).x_label_area_size(18).y_label_area_size(28);
    if DRAW_TEXT {
        builder.caption(title, ("sans-serif", 14).into_font());
    }
    let mut chart = builder.build_cartesian_2d(-180f64..180f64, -90f64..90f64)?;
    if DRAW_TEXT {
        chart
            .configure_mesh()
            .disable_mesh()
            .x_labels(5)
            .y_labels(5)
            .draw()?;
    }
    chart.draw_series(
        latlons
            .iter()
            .zip(values)
            .filter(|(_, v)| v.is_finite())
            .map(|(ll, v)| Circle::new((wrap_lon(ll[1]), ll[0]), 2, scale.color(*v).filled())),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::figure::Figure;
    use candle_core::Device;

    #[test]
    fn test_frame_columns() -> anyhow::Result<()> {
        let t = Tensor::new(&[[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]], &Device::Cpu)?;
        let frame = Frame::from_tensor(&t)?;
        assert_eq!((frame.nodes(), frame.vars()), (3, 2));
        assert_eq!(frame.column(1)?, vec![2.0, 4.0, 6.0]);
        assert!(frame.column(2).is_err());
        assert!(Frame::new(2, 2, vec![0.0; 3]).is_err());
        Ok(())
    }

    #[test]
    fn test_scales_and_ranges() {
        assert_eq!(finite_range([1.0f32, f32::NAN, -2.0].iter()), (-2.0, 1.0));
        assert_eq!(finite_range([f32::NAN].iter()), (0.0, 1.0));
        assert_eq!(finite_range([3.0f32].iter()), (2.5, 3.5));

        let diverging = ColorScale::symmetric(&[&[-2.0, 1.0]]);
        assert_eq!(diverging.color(0.0), colors::rdbu(0.5));
        assert!((wrap_lon(270.0) + 90.0).abs() < 1e-9);
        assert!((wrap_lon(-180.0) + 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_scatter_map_renders_with_default_features() -> anyhow::Result<()> {
        let latlons = [[0.0, 0.0], [45.0, 90.0], [-45.0, -90.0]];
        let values = [0.0f32, 1.0, 2.0];
        let scale = ColorScale::spanning(&[&values[..]]);
        let fig = Figure::render(160, 120, "map", |area| {
            scatter_map(area, "z_500", &latlons, &values, &scale)
        })?;
        let white = image::Rgb([255u8, 255, 255]);
        assert!(fig.image.pixels().any(|p| *p != white));
        Ok(())
    }
}
