//! Trainable graph feature maps.

use nimbus_core::graph::to_degrees;
use nimbus_core::{EdgeFeatures, NodeFeatures};
use plotters::prelude::*;

use super::{scatter_map, wrap_lon, Area, ColorScale, Frame, DRAW_TEXT};
use crate::error::{DiagError, Result};
use crate::figure::{grid_size, Figure};

/// Panels per graph are capped; wide feature sets show their leading columns.
const MAX_FEATURE_PANELS: usize = 6;

/// Host copy of one graph's trainable node features.
#[derive(Clone, Debug)]
pub struct NodeFeatureMap {
    pub graph: String,
    pub latlons: Vec<[f64; 2]>,
    pub values: Frame,
}

impl NodeFeatureMap {
    pub fn from_features(features: &NodeFeatures) -> Result<Self> {
        let latlons = to_degrees(&features.coords)?;
        let values = Frame::from_tensor(&features.values)?;
        if values.nodes() != latlons.len() {
            return Err(DiagError::Draw(format!(
                "graph '{}' has {} nodes but {} feature rows",
                features.graph,
                latlons.len(),
                values.nodes()
            )));
        }
        Ok(Self {
            graph: features.graph.clone(),
            latlons,
            values,
        })
    }
}

/// Host copy of one edge set: `(src, dst)` endpoints in degrees plus features.
#[derive(Clone, Debug)]
pub struct EdgeFeatureMap {
    pub name: String,
    pub segments: Vec<([f64; 2], [f64; 2])>,
    pub values: Frame,
}

impl EdgeFeatureMap {
    pub fn from_features(features: &EdgeFeatures) -> Result<Self> {
        let src = to_degrees(&features.src_coords)?;
        let dst = to_degrees(&features.dst_coords)?;
        let segments = features
            .edges
            .iter()
            .map(|(s, d)| match (src.get(*s as usize), dst.get(*d as usize)) {
                (Some(a), Some(b)) => Ok((*a, *b)),
                _ => Err(DiagError::Draw(format!(
                    "edge ({s}, {d}) of '{}' points outside its graphs",
                    features.name
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        let values = Frame::from_tensor(&features.values)?;
        if values.nodes() != segments.len() {
            return Err(DiagError::Draw(format!(
                "'{}' has {} edges but {} feature rows",
                features.name,
                segments.len(),
                values.nodes()
            )));
        }
        Ok(Self {
            name: features.name.clone(),
            segments,
            values,
        })
    }
}

/// One row per graph, one map per feature column.
pub fn plot_graph_node_features(maps: &[NodeFeatureMap]) -> Result<Figure> {
    if maps.is_empty() {
        return Err(DiagError::Draw("no trainable node features to plot".into()));
    }
    let cols = maps
        .iter()
        .map(|m| m.values.vars().min(MAX_FEATURE_PANELS))
        .max()
        .unwrap_or(1)
        .max(1);
    let (width, height) = grid_size(maps.len(), cols);

    Figure::render(width, height, "node_trainable_params", |root| {
        let cells = root.split_evenly((maps.len(), cols));
        for (r, map) in maps.iter().enumerate() {
            for f in 0..map.values.vars().min(cols) {
                let values = map.values.column(f)?;
                let scale = ColorScale::spanning(&[&values]);
                scatter_map(
                    &cells[r * cols + f],
                    &format!("{} feature {f}", map.graph),
                    &map.latlons,
                    &values,
                    &scale,
                )?;
            }
        }
        Ok(())
    })
}

fn edge_panel(area: &Area<'_>, title: &str, map: &EdgeFeatureMap, values: &[f32]) -> Result<()> {
    let scale = ColorScale::spanning(&[values]);
    let mut builder = ChartBuilder::on(area);
    builder.margin(4).x_label_area_size(18).y_label_area_size(28);
    if DRAW_TEXT {
        builder.caption(title, ("sans-serif", 14).into_font());
    }
    let mut chart = builder.build_cartesian_2d(-180f64..180f64, -90f64..90f64)?;
    if DRAW_TEXT {
        chart.configure_mesh().disable_mesh().draw()?;
    }
    chart.draw_series(
        map.segments
            .iter()
            .zip(values)
            .filter(|((a, b), v)| v.is_finite() && (wrap_lon(a[1]) - wrap_lon(b[1])).abs() <= 180.0)
            .map(|((a, b), v)| {
                PathElement::new(
                    vec![(wrap_lon(a[1]), a[0]), (wrap_lon(b[1]), b[0])],
                    scale.color(*v).stroke_width(1),
                )
            }),
    )?;
    Ok(())
}

/// One row per edge set, one panel per feature column.
pub fn plot_graph_edge_features(maps: &[EdgeFeatureMap]) -> Result<Figure> {
    if maps.is_empty() {
        return Err(DiagError::Draw("no trainable edge features to plot".into()));
    }
    let cols = maps
        .iter()
        .map(|m| m.values.vars().min(MAX_FEATURE_PANELS))
        .max()
        .unwrap_or(1)
        .max(1);
    let (width, height) = grid_size(maps.len(), cols);

    Figure::render(width, height, "edge_trainable_params", |root| {
        let cells = root.split_evenly((maps.len(), cols));
        for (r, map) in maps.iter().enumerate() {
            for f in 0..map.values.vars().min(cols) {
                let values = map.values.column(f)?;
                edge_panel(
                    &cells[r * cols + f],
                    &format!("{} feature {f}", map.name),
                    map,
                    &values,
                )?;
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    #[test]
    fn test_edge_map_rejects_dangling_edges() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let coords = Tensor::new(&[[0.0f32, 0.0], [0.5, 1.0]], &device)?;
        let features = EdgeFeatures {
            name: "data->hidden".to_string(),
            src_coords: coords.clone(),
            dst_coords: coords.clone(),
            edges: vec![(0, 1), (1, 5)],
            values: Tensor::zeros((2, 3), candle_core::DType::F32, &device)?,
        };
        assert!(EdgeFeatureMap::from_features(&features).is_err());

        let ok = EdgeFeatures {
            edges: vec![(0, 1), (1, 0)],
            ..features
        };
        let map = EdgeFeatureMap::from_features(&ok)?;
        assert_eq!(map.segments.len(), 2);
        assert!((map.segments[0].1[0] - 0.5f64.to_degrees()).abs() < 1e-4);

        let fig = plot_graph_edge_features(&[map])?;
        assert_eq!((fig.width(), fig.height()), grid_size(1, 3));
        Ok(())
    }

    #[test]
    fn test_node_feature_figure() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let features = NodeFeatures {
            graph: "hidden".to_string(),
            coords: Tensor::new(&[[0.1f32, 0.2], [-0.3, 2.0], [1.0, 4.0]], &device)?,
            values: Tensor::randn(0.0f32, 1.0, (3, 8), &device)?,
        };
        let map = NodeFeatureMap::from_features(&features)?;
        let fig = plot_graph_node_features(&[map])?;
        assert_eq!((fig.width(), fig.height()), grid_size(1, MAX_FEATURE_PANELS));
        assert!(plot_graph_node_features(&[]).is_err());
        Ok(())
    }
}
