//! Histograms of target and predicted fields.
//!
//! Prognostic fields show increments over the last input step; diagnostic
//! fields show values. Precipitation-like fields drop dry points (`<= 0`) so
//! the tail stays visible.

use plotters::prelude::*;

use super::{difference, finite_range, Frame, PlotParameter, DRAW_TEXT};
use crate::error::{DiagError, Result};
use crate::figure::{grid_size, Figure};

const BINS: usize = 50;
const MAX_COLS: usize = 4;

/// Density-normalised counts of the finite values in `[lo, hi]`.
pub fn histogram(values: &[f32], lo: f32, hi: f32, bins: usize) -> Vec<f64> {
    let mut counts = vec![0f64; bins];
    if bins == 0 || hi <= lo {
        return counts;
    }
    let width = (hi - lo) / bins as f32;
    let mut total = 0usize;
    for v in values.iter().filter(|v| v.is_finite() && **v >= lo && **v <= hi) {
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1.0;
        total += 1;
    }
    if total > 0 {
        let norm = total as f64 * width as f64;
        counts.iter_mut().for_each(|c| *c /= norm);
    }
    counts
}

fn series_for(parameter: &PlotParameter, precip: bool, x: &[f32], truth: &[f32], pred: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let (truth, pred) = if parameter.prognostic {
        (difference(truth, x), difference(pred, x))
    } else {
        (truth.to_vec(), pred.to_vec())
    };
    if precip {
        let wet = |v: Vec<f32>| v.into_iter().filter(|x| *x > 0.0).collect::<Vec<_>>();
        (wet(truth), wet(pred))
    } else {
        (truth, pred)
    }
}

pub fn plot_histogram(
    parameters: &[PlotParameter],
    x: &Frame,
    y_true: &Frame,
    y_pred: &Frame,
    precip_fields: &[String],
) -> Result<Figure> {
    if parameters.is_empty() {
        return Err(DiagError::Config("no parameters selected for histogram".into()));
    }
    let mut panels = Vec::with_capacity(parameters.len());
    for parameter in parameters {
        let precip = precip_fields.iter().any(|f| f == &parameter.name);
        let (truth, pred) = series_for(
            parameter,
            precip,
            &x.column(parameter.index)?,
            &y_true.column(parameter.index)?,
            &y_pred.column(parameter.index)?,
        );
        let (lo, hi) = finite_range(truth.iter().chain(pred.iter()));
        let h_truth = histogram(&truth, lo, hi, BINS);
        let h_pred = histogram(&pred, lo, hi, BINS);
        panels.push((parameter, lo, hi, h_truth, h_pred));
    }

    let cols = panels.len().min(MAX_COLS);
    let rows = panels.len().div_ceil(cols);
    let (width, height) = grid_size(rows, cols);

    Figure::render(width, height, "histogram", |root| {
        let cells = root.split_evenly((rows, cols));
        for (cell, (parameter, lo, hi, h_truth, h_pred)) in cells.iter().zip(&panels) {
            let (lo, hi) = (*lo as f64, *hi as f64);
            let step = (hi - lo) / BINS as f64;
            let top = h_truth
                .iter()
                .chain(h_pred.iter())
                .fold(0.0f64, |acc, v| acc.max(*v));
            let top = if top > 0.0 { top * 1.1 } else { 1.0 };
            let caption = if parameter.prognostic {
                format!("{} increment", parameter.name)
            } else {
                parameter.name.clone()
            };

            let mut builder = ChartBuilder::on(cell);
            builder.margin(6).x_label_area_size(20).y_label_area_size(36);
            if DRAW_TEXT {
                builder.caption(caption, ("sans-serif", 14).into_font());
            }
            let mut chart = builder.build_cartesian_2d(lo..hi, 0f64..top)?;
            if DRAW_TEXT {
                chart.configure_mesh().x_labels(4).y_labels(4).draw()?;
            }

            chart.draw_series(h_truth.iter().enumerate().map(|(i, c)| {
                let x0 = lo + step * i as f64;
                Rectangle::new([(x0, 0.0), (x0 + step, *c)], BLUE.mix(0.4).filled())
            }))?;
            chart.draw_series(LineSeries::new(
                h_pred
                    .iter()
                    .enumerate()
                    .flat_map(|(i, c)| {
                        let x0 = lo + step * i as f64;
                        [(x0, *c), (x0 + step, *c)]
                    }),
                RED.stroke_width(2),
            ))?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_is_a_density() {
        let values = [0.0f32, 0.1, 0.2, 0.9, 1.0, f32::NAN, 5.0];
        let h = histogram(&values, 0.0, 1.0, 4);
        let area: f64 = h.iter().map(|c| c * 0.25).sum();
        assert!((area - 1.0).abs() < 1e-9);
        assert_eq!(h[0], 3.0 / (5.0 * 0.25));
        assert!(histogram(&values, 1.0, 1.0, 4).iter().all(|c| *c == 0.0));
    }

    #[test]
    fn test_increments_and_dry_points() {
        let parameter = PlotParameter {
            index: 0,
            name: "tp".to_string(),
            prognostic: false,
        };
        let (truth, pred) = series_for(&parameter, true, &[9.0, 9.0], &[0.0, 2.0], &[0.5, 0.0]);
        assert_eq!(truth, vec![2.0]);
        assert_eq!(pred, vec![0.5]);

        let prognostic = PlotParameter {
            prognostic: true,
            ..parameter
        };
        let (truth, _) = series_for(&prognostic, false, &[1.0, 1.0], &[3.0, 0.0], &[0.0, 0.0]);
        assert_eq!(truth, vec![2.0, -1.0]);
    }

    #[test]
    fn test_plot_histogram_grid() -> anyhow::Result<()> {
        let frame = Frame::new(4, 1, vec![0.0, 1.0, 2.0, 3.0])?;
        let pred = Frame::new(4, 1, vec![0.5, 1.5, 2.5, 3.5])?;
        let params: Vec<PlotParameter> = (0..5)
            .map(|i| PlotParameter {
                index: 0,
                name: format!("p{i}"),
                prognostic: i % 2 == 0,
            })
            .collect();
        let fig = plot_histogram(&params, &frame, &frame, &pred, &[])?;
        assert_eq!((fig.width(), fig.height()), grid_size(2, 4));
        Ok(())
    }
}
