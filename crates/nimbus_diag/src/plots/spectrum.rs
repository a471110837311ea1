//! Zonal power spectra.
//!
//! Node fields are binned onto a regular lat/lon grid, every latitude row is
//! transformed with a DFT along longitude and the power is averaged over rows.
//! Rows are independent, so they are transformed in parallel with rayon.

use plotters::prelude::*;
use rayon::prelude::*;

use super::{difference, wrap_lon, Frame, PlotParameter, DRAW_TEXT};
use crate::error::{DiagError, Result};
use crate::figure::{grid_size, Figure};

const MAX_COLS: usize = 4;

/// Grid with `nlat` rows and `2 * nlat` columns sized for `nodes` points.
pub fn grid_shape(nodes: usize) -> (usize, usize) {
    let nlat = ((nodes as f64 / 2.0).sqrt().round() as usize).clamp(4, 180);
    (nlat, 2 * nlat)
}

/// Average node values into grid cells. Empty cells take their row mean,
/// or zero for rows without any node.
pub fn regrid(latlons: &[[f64; 2]], values: &[f32], nlat: usize, nlon: usize) -> Vec<Vec<f64>> {
    let mut sums = vec![vec![0f64; nlon]; nlat];
    let mut counts = vec![vec![0usize; nlon]; nlat];
    for (ll, v) in latlons.iter().zip(values).filter(|(_, v)| v.is_finite()) {
        let row = (((ll[0] + 90.0) / 180.0 * nlat as f64).floor().max(0.0) as usize).min(nlat - 1);
        let col = (((wrap_lon(ll[1]) + 180.0) / 360.0 * nlon as f64).floor().max(0.0) as usize)
            .min(nlon - 1);
        sums[row][col] += *v as f64;
        counts[row][col] += 1;
    }
    sums.into_iter()
        .zip(counts)
        .map(|(row, count)| {
            let filled: Vec<f64> = row
                .iter()
                .zip(&count)
                .filter(|(_, c)| **c > 0)
                .map(|(s, c)| s / *c as f64)
                .collect();
            let mean = if filled.is_empty() {
                0.0
            } else {
                filled.iter().sum::<f64>() / filled.len() as f64
            };
            row.iter()
                .zip(&count)
                .map(|(s, c)| if *c > 0 { s / *c as f64 } else { mean })
                .collect()
        })
        .collect()
}

/// Power at zonal wavenumbers `0..=nlon/2`, averaged over latitude rows.
pub fn zonal_power(grid: &[Vec<f64>]) -> Vec<f64> {
    let Some(nlon) = grid.first().map(|r| r.len()) else {
        return Vec::new();
    };
    if nlon == 0 {
        return Vec::new();
    }
    let kmax = nlon / 2;
    let rows: Vec<Vec<f64>> = grid
        .par_iter()
        .map(|row| {
            (0..=kmax)
                .map(|k| {
                    let (mut re, mut im) = (0f64, 0f64);
                    for (j, v) in row.iter().enumerate() {
                        let phase = -2.0 * std::f64::consts::PI * (k * j) as f64 / nlon as f64;
                        re += v * phase.cos();
                        im += v * phase.sin();
                    }
                    (re * re + im * im) / (nlon * nlon) as f64
                })
                .collect()
        })
        .collect();
    let mut mean = vec![0f64; kmax + 1];
    for row in &rows {
        for (m, p) in mean.iter_mut().zip(row) {
            *m += p / rows.len() as f64;
        }
    }
    mean
}

pub fn power_spectrum(latlons: &[[f64; 2]], values: &[f32]) -> Vec<f64> {
    let (nlat, nlon) = grid_shape(latlons.len());
    zonal_power(&regrid(latlons, values, nlat, nlon))
}

/// Spectra of target and prediction per parameter (increments for prognostic fields).
pub fn plot_power_spectrum(
    parameters: &[PlotParameter],
    latlons: &[[f64; 2]],
    x: &Frame,
    y_true: &Frame,
    y_pred: &Frame,
) -> Result<Figure> {
    if parameters.is_empty() {
        return Err(DiagError::Config("no parameters selected for power spectrum".into()));
    }
    if latlons.len() != y_true.nodes() {
        return Err(DiagError::Draw(format!(
            "{} coordinates for {} nodes",
            latlons.len(),
            y_true.nodes()
        )));
    }

    let mut panels = Vec::with_capacity(parameters.len());
    for parameter in parameters {
        let xs = x.column(parameter.index)?;
        let mut truth = y_true.column(parameter.index)?;
        let mut pred = y_pred.column(parameter.index)?;
        if parameter.prognostic {
            truth = difference(&truth, &xs);
            pred = difference(&pred, &xs);
        }
        panels.push((
            parameter,
            power_spectrum(latlons, &truth),
            power_spectrum(latlons, &pred),
        ));
    }

    let cols = panels.len().min(MAX_COLS);
    let rows = panels.len().div_ceil(cols);
    let (width, height) = grid_size(rows, cols);

    Figure::render(width, height, "power_spectrum", |root| {
        let cells = root.split_evenly((rows, cols));
        for (cell, (parameter, p_truth, p_pred)) in cells.iter().zip(&panels) {
            let log = |p: &[f64]| -> Vec<(f64, f64)> {
                p.iter()
                    .enumerate()
                    .skip(1)
                    .map(|(k, v)| (k as f64, v.max(1e-20).log10()))
                    .collect()
            };
            let truth = log(p_truth.as_slice());
            let pred = log(p_pred.as_slice());
            let kmax = truth.len().max(1) as f64;
            let (lo, hi) = truth
                .iter()
                .chain(pred.iter())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, v)| {
                    (lo.min(*v), hi.max(*v))
                });
            let (lo, hi) = if lo < hi { (lo, hi) } else { (lo - 1.0, lo + 1.0) };
            let (lo, hi) = if lo.is_finite() { (lo, hi) } else { (-1.0, 1.0) };

            let mut builder = ChartBuilder::on(cell);
            builder.margin(6).x_label_area_size(20).y_label_area_size(36);
            if DRAW_TEXT {
                builder.caption(
                    format!("{} log10 power", parameter.name),
                    ("sans-serif", 14).into_font(),
                );
            }
            let mut chart = builder.build_cartesian_2d(1f64..kmax.max(2.0), lo..hi)?;
            if DRAW_TEXT {
                chart.configure_mesh().x_desc("zonal wavenumber").draw()?;
            }
            chart.draw_series(LineSeries::new(truth, BLACK.stroke_width(2)))?;
            chart.draw_series(LineSeries::new(pred, RED.stroke_width(2)))?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_wave_peaks_at_its_wavenumber() {
        let nlon = 32;
        let grid: Vec<Vec<f64>> = (0..4)
            .map(|_| {
                (0..nlon)
                    .map(|j| (2.0 * std::f64::consts::PI * 3.0 * j as f64 / nlon as f64).cos())
                    .collect()
            })
            .collect();
        let power = zonal_power(&grid);
        assert_eq!(power.len(), nlon / 2 + 1);
        let peak = power
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |best, (k, p)| if *p > best.1 { (k, *p) } else { best });
        assert_eq!(peak.0, 3);
        assert!((power[3] - 0.25).abs() < 1e-9);
        assert!(power[0].abs() < 1e-12);
    }

    #[test]
    fn test_regrid_fills_empty_cells_with_row_mean() {
        let latlons = [[-60.0, -170.0], [-60.0, 10.0], [60.0, 0.0]];
        let grid = regrid(&latlons, &[1.0, 3.0, f32::NAN], 2, 4);
        assert_eq!(grid[0], vec![1.0, 2.0, 3.0, 2.0]);
        assert_eq!(grid[1], vec![0.0; 4]);
        assert_eq!(grid_shape(32 * 64), (32, 64));
        assert_eq!(grid_shape(3), (4, 8));
    }

    #[test]
    fn test_plot_power_spectrum() -> anyhow::Result<()> {
        let latlons: Vec<[f64; 2]> = (0..8)
            .flat_map(|i| (0..16).map(move |j| [-78.75 + 22.5 * i as f64, 11.25 + 22.5 * j as f64]))
            .collect();
        let n = latlons.len();
        let truth: Vec<f32> = latlons.iter().map(|ll| (ll[1].to_radians() * 2.0).sin() as f32).collect();
        let x = Frame::new(n, 1, vec![0.0; n])?;
        let y_true = Frame::new(n, 1, truth.clone())?;
        let y_pred = Frame::new(n, 1, truth.iter().map(|v| v * 0.5).collect())?;
        let params = vec![PlotParameter {
            index: 0,
            name: "z_500".to_string(),
            prognostic: true,
        }];
        let fig = plot_power_spectrum(&params, &latlons, &x, &y_true, &y_pred)?;
        assert_eq!((fig.width(), fig.height()), grid_size(1, 1));
        Ok(())
    }
}
