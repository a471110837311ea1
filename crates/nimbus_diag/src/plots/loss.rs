//! Per-variable loss bars.

use plotters::prelude::*;

use super::DRAW_TEXT;
use crate::error::{DiagError, Result};
use crate::figure::Figure;

/// A legend entry: label (may contain line breaks) and its bar colour.
#[derive(Clone, Debug, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub color: RGBColor,
}

/// Bars of `losses` (already in plotting order), one colour per bar.
/// `xticks` places group names at bar positions.
pub fn plot_loss(
    losses: &[f32],
    colors: &[RGBColor],
    xticks: &[(String, f64)],
    legend: &[LegendEntry],
) -> Result<Figure> {
    if losses.len() != colors.len() {
        return Err(DiagError::Draw(format!(
            "{} loss values but {} colours",
            losses.len(),
            colors.len()
        )));
    }
    let n = losses.len().max(1) as f64;
    let top = losses
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0f32, |acc, v| acc.max(*v)) as f64;
    let top = if top > 0.0 { top * 1.1 } else { 1.0 };
    let legend_lines: usize = legend.iter().map(|e| e.label.lines().count().max(1)).sum();
    let height = 420u32.max(40 + 16 * legend_lines as u32);

    Figure::render(1100, height, "loss", |root| {
        let (plot_area, legend_area) = root.split_horizontally(720);
        let mut builder = ChartBuilder::on(&plot_area);
        builder.margin(10).x_label_area_size(40).y_label_area_size(50);
        if DRAW_TEXT {
            builder.caption("Loss per variable", ("sans-serif", 18).into_font());
        }
        let mut chart = builder.build_cartesian_2d(-0.5f64..(n - 0.5), 0f64..top)?;
        if DRAW_TEXT {
            chart
                .configure_mesh()
                .disable_x_mesh()
                .disable_x_axis()
                .y_desc("loss")
                .draw()?;
        }
        chart.draw_series(losses.iter().zip(colors).enumerate().map(|(i, (v, c))| {
            let x = i as f64;
            let v = if v.is_finite() { *v as f64 } else { 0.0 };
            Rectangle::new([(x - 0.4, 0.0), (x + 0.4, v)], c.filled())
        }))?;

        if DRAW_TEXT {
            for (name, pos) in xticks {
                let (px, py) = chart.backend_coord(&(*pos, 0.0));
                root.draw(&Text::new(
                    name.clone(),
                    (px, py + 6),
                    ("sans-serif", 11).into_font().color(&BLACK),
                ))?;
            }
        }

        let mut y = 20;
        for entry in legend {
            legend_area.draw(&Rectangle::new([(10, y), (24, y + 12)], entry.color.filled()))?;
            for line in entry.label.lines() {
                if DRAW_TEXT {
                    legend_area.draw(&Text::new(
                        line.to_string(),
                        (30, y),
                        ("sans-serif", 12).into_font(),
                    ))?;
                }
                y += 16;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plots::colors::TAB10;

    #[test]
    fn test_plot_loss_renders_bars() -> anyhow::Result<()> {
        let losses = [0.5f32, 1.0, f32::NAN];
        let colors = [TAB10[0], TAB10[0], TAB10[1]];
        let xticks = vec![("q".to_string(), 0.5), ("t".to_string(), 2.0)];
        let legend = vec![
            LegendEntry {
                label: "q: q_50, q_850".to_string(),
                color: TAB10[0],
            },
            LegendEntry {
                label: "t: t_850".to_string(),
                color: TAB10[1],
            },
        ];
        let fig = plot_loss(&losses, &colors, &xticks, &legend)?;
        assert_eq!(fig.width(), 1100);
        let blue = [TAB10[0].0, TAB10[0].1, TAB10[0].2];
        assert!(fig.image.pixels().any(|p| p.0 == blue));
        Ok(())
    }

    #[test]
    fn test_plot_loss_rejects_colour_mismatch() {
        assert!(plot_loss(&[1.0, 2.0], &[BLACK], &[], &[]).is_err());
    }
}
