//! Sample maps: input, truth, prediction, error and increments per parameter.

use super::colors::AccumulationScale;
use super::{difference, scatter_map, ColorScale, Frame, PlotParameter};
use crate::error::{DiagError, Result};
use crate::figure::{grid_size, Figure};

/// Panel layout shared by the sample renderers.
#[derive(Clone, Debug)]
pub struct SampleStyle {
    /// Panels per parameter row, at most six.
    pub per_sample: usize,
    pub accumulation: Option<AccumulationScale>,
    pub precip_fields: Vec<String>,
}

impl SampleStyle {
    fn is_precip(&self, name: &str) -> bool {
        self.precip_fields.iter().any(|f| f == name)
    }
}

struct Panel {
    title: String,
    values: Vec<f32>,
    scale: ColorScale,
}

fn panels_for(
    parameter: &PlotParameter,
    style: &SampleStyle,
    x: &[f32],
    truth: &[f32],
    pred: &[f32],
) -> Vec<Panel> {
    let name = &parameter.name;
    let field_scale = match (&style.accumulation, style.is_precip(name)) {
        (Some(acc), true) => ColorScale::Accumulation(acc.clone()),
        _ => ColorScale::spanning(&[x, truth]),
    };
    let error = difference(pred, truth);
    let error_scale = ColorScale::symmetric(&[&error]);

    let mut panels = Vec::with_capacity(6);
    if parameter.prognostic {
        panels.push(Panel {
            title: format!("{name} input"),
            values: x.to_vec(),
            scale: field_scale.clone(),
        });
    }
    panels.push(Panel {
        title: format!("{name} target"),
        values: truth.to_vec(),
        scale: field_scale.clone(),
    });
    panels.push(Panel {
        title: format!("{name} pred"),
        values: pred.to_vec(),
        scale: field_scale,
    });
    panels.push(Panel {
        title: format!("{name} pred err"),
        values: error,
        scale: error_scale,
    });
    if parameter.prognostic {
        let truth_inc = difference(truth, x);
        let pred_inc = difference(pred, x);
        let inc_scale = ColorScale::symmetric(&[&truth_inc, &pred_inc]);
        panels.push(Panel {
            title: format!("{name} target increment"),
            values: truth_inc,
            scale: inc_scale.clone(),
        });
        panels.push(Panel {
            title: format!("{name} pred increment"),
            values: pred_inc,
            scale: inc_scale,
        });
    }
    panels.truncate(style.per_sample);
    panels
}

/// One row per parameter. `x` is the last input step, `y_true` and `y_pred`
/// the target and prediction at the plotted rollout step, all physical units.
pub fn plot_predicted_flat_sample(
    parameters: &[PlotParameter],
    style: &SampleStyle,
    latlons: &[[f64; 2]],
    x: &Frame,
    y_true: &Frame,
    y_pred: &Frame,
) -> Result<Figure> {
    if parameters.is_empty() {
        return Err(DiagError::Config("no parameters selected for sample plot".into()));
    }
    if latlons.len() != y_true.nodes() {
        return Err(DiagError::Draw(format!(
            "{} coordinates for {} nodes",
            latlons.len(),
            y_true.nodes()
        )));
    }

    let mut rows = Vec::with_capacity(parameters.len());
    for parameter in parameters {
        let xs = x.column(parameter.index)?;
        let truth = y_true.column(parameter.index)?;
        let pred = y_pred.column(parameter.index)?;
        rows.push(panels_for(parameter, style, &xs, &truth, &pred));
    }
    let cols = style.per_sample.clamp(1, 6);
    let (width, height) = grid_size(rows.len(), cols);

    Figure::render(width, height, "sample", |root| {
        let cells = root.split_evenly((rows.len(), cols));
        for (r, panels) in rows.iter().enumerate() {
            for (c, panel) in panels.iter().enumerate() {
                scatter_map(
                    &cells[r * cols + c],
                    &panel.title,
                    latlons,
                    &panel.values,
                    &panel.scale,
                )?;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameter(index: usize, name: &str, prognostic: bool) -> PlotParameter {
        PlotParameter {
            index,
            name: name.to_string(),
            prognostic,
        }
    }

    #[test]
    fn test_panel_layout_depends_on_variable_kind() {
        let style = SampleStyle {
            per_sample: 6,
            accumulation: None,
            precip_fields: vec![],
        };
        let x = [1.0, 2.0];
        let truth = [2.0, 2.0];
        let pred = [3.0, 1.0];

        let prognostic = panels_for(&parameter(0, "t_850", true), &style, &x, &truth, &pred);
        assert_eq!(prognostic.len(), 6);
        assert_eq!(prognostic[3].values, vec![1.0, -1.0]);
        assert_eq!(prognostic[5].values, vec![2.0, -1.0]);

        let diagnostic = panels_for(&parameter(1, "tp", false), &style, &x, &truth, &pred);
        assert_eq!(diagnostic.len(), 3);
        assert_eq!(diagnostic[0].title, "tp target");

        let narrow = SampleStyle {
            per_sample: 2,
            ..style
        };
        assert_eq!(panels_for(&parameter(0, "t_850", true), &narrow, &x, &truth, &pred).len(), 2);
    }

    #[test]
    fn test_render_sample_figure() -> anyhow::Result<()> {
        let latlons = vec![[-45.0, 10.0], [45.0, 200.0], [0.0, 90.0]];
        let x = Frame::new(3, 2, vec![1.0, 0.0, 2.0, 0.1, 3.0, 0.2])?;
        let truth = Frame::new(3, 2, vec![1.5, 0.0, 2.5, 0.3, 3.5, 0.0])?;
        let pred = Frame::new(3, 2, vec![1.2, 0.1, 2.2, 0.2, 3.1, 0.0])?;
        let style = SampleStyle {
            per_sample: 6,
            accumulation: Some(AccumulationScale::new(
                &[0.0, 0.1, 1.0],
                &["#ffffff".to_string(), "#0000ff".to_string()],
            )?),
            precip_fields: vec!["tp".to_string()],
        };
        let params = vec![parameter(0, "z_500", true), parameter(1, "tp", false)];
        let fig = plot_predicted_flat_sample(&params, &style, &latlons, &x, &truth, &pred)?;
        assert_eq!((fig.width(), fig.height()), grid_size(2, 6));

        assert!(plot_predicted_flat_sample(&[], &style, &latlons, &x, &truth, &pred).is_err());
        assert!(plot_predicted_flat_sample(&params, &style, &latlons[..2], &x, &truth, &pred).is_err());
        Ok(())
    }
}
