//! Graph helpers - Lat/lon grids and nearest-neighbour edge sets
//!
//! Coordinates are `(lat, lon)` pairs in radians.

use candle_core::{Device, Result, Tensor};

/// Cell-centred regular grid, row-major from south to north.
pub fn regular_grid(nlat: usize, nlon: usize) -> Vec<[f32; 2]> {
    let dlat = std::f64::consts::PI / nlat as f64;
    let dlon = 2.0 * std::f64::consts::PI / nlon as f64;
    let mut coords = Vec::with_capacity(nlat * nlon);
    for i in 0..nlat {
        let lat = -std::f64::consts::FRAC_PI_2 + (i as f64 + 0.5) * dlat;
        for j in 0..nlon {
            let lon = (j as f64 + 0.5) * dlon;
            coords.push([lat as f32, lon as f32]);
        }
    }
    coords
}

/// Relative cell areas, proportional to `cos(lat)`.
pub fn area_weights(coords: &[[f32; 2]]) -> Vec<f32> {
    coords.iter().map(|c| c[0].cos().max(0.0)).collect()
}

pub fn coords_tensor(coords: &[[f32; 2]], device: &Device) -> Result<Tensor> {
    let flat: Vec<f32> = coords.iter().flat_map(|c| [c[0], c[1]]).collect();
    Tensor::from_vec(flat, (coords.len(), 2), device)
}

/// `(N, 2)` radian tensor to `(lat, lon)` degree pairs.
pub fn to_degrees(latlons: &Tensor) -> Result<Vec<[f64; 2]>> {
    let rows = latlons.to_dtype(candle_core::DType::F32)?.to_vec2::<f32>()?;
    Ok(rows
        .into_iter()
        .map(|r| [(r[0] as f64).to_degrees(), (r[1] as f64).to_degrees()])
        .collect())
}

/// Great-circle angle between two points.
pub fn haversine(a: [f32; 2], b: [f32; 2]) -> f32 {
    let dlat = b[0] - a[0];
    let dlon = b[1] - a[1];
    let h = (dlat / 2.0).sin().powi(2) + a[0].cos() * b[0].cos() * (dlon / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// For every destination node, edges from its `k` nearest source nodes.
pub fn knn_edges(src: &[[f32; 2]], dst: &[[f32; 2]], k: usize) -> Vec<(u32, u32)> {
    let k = k.min(src.len());
    let mut edges = Vec::with_capacity(dst.len() * k);
    for (d, dst_coord) in dst.iter().enumerate() {
        let mut dists: Vec<(f32, usize)> = src
            .iter()
            .enumerate()
            .map(|(s, src_coord)| (haversine(*src_coord, *dst_coord), s))
            .collect();
        dists.sort_by(|a, b| a.0.total_cmp(&b.0));
        edges.extend(dists.iter().take(k).map(|(_, s)| (*s as u32, d as u32)));
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_grid_spans_globe() {
        let grid = regular_grid(4, 8);
        assert_eq!(grid.len(), 32);
        assert!(grid.iter().all(|c| c[0].abs() < std::f32::consts::FRAC_PI_2));
        assert!(grid.iter().all(|c| c[1] > 0.0 && c[1] < 2.0 * std::f32::consts::PI));
    }

    #[test]
    fn test_knn_picks_closest() {
        let src = vec![[0.0, 0.0], [0.0, 1.0], [0.0, 2.0]];
        let dst = vec![[0.0, 1.9]];
        let edges = knn_edges(&src, &dst, 2);
        assert_eq!(edges, vec![(2, 0), (1, 0)]);
    }
}
