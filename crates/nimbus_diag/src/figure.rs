//! Figure - Offscreen rendered chart
//!
//! Renderers draw into an in-memory RGB buffer through the plotters bitmap
//! backend; the result is kept as an `image::RgbImage` until it is written or
//! handed to an experiment logger. A `Figure` owns its pixels, so dropping it
//! releases everything.

use std::path::Path;

use image::RgbImage;
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::error::{DiagError, Result};

pub const DEFAULT_PANEL: (u32, u32) = (320, 240);

#[derive(Clone, Debug)]
pub struct Figure {
    pub title: String,
    pub image: RgbImage,
}

impl Figure {
    /// Render a `width x height` figure with a white background.
    pub fn render<F>(width: u32, height: u32, title: impl Into<String>, draw: F) -> Result<Self>
    where
        F: for<'b> FnOnce(&DrawingArea<BitMapBackend<'b>, Shift>) -> Result<()>,
    {
        if width == 0 || height == 0 {
            return Err(DiagError::Draw(format!(
                "figure size must be positive, got {width}x{height}"
            )));
        }
        let title = title.into();
        let mut buffer = vec![255u8; width as usize * height as usize * 3];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
            root.fill(&WHITE)?;
            draw(&root)?;
            root.present()?;
        }
        let image = RgbImage::from_raw(width, height, buffer)
            .ok_or_else(|| DiagError::Draw("pixel buffer does not match figure size".into()))?;
        Ok(Self { title, image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Write as PNG, creating parent directories.
    pub fn save_png(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.image
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

/// Figure size for a `rows x cols` grid of panels.
pub fn grid_size(rows: usize, cols: usize) -> (u32, u32) {
    let rows = rows.max(1) as u32;
    let cols = cols.max(1) as u32;
    (DEFAULT_PANEL.0 * cols, DEFAULT_PANEL.1 * rows + 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_save() -> anyhow::Result<()> {
        let fig = Figure::render(64, 48, "box", |area| {
            area.draw(&Rectangle::new([(8, 8), (40, 30)], RED.filled()))?;
            Ok(())
        })?;
        assert_eq!((fig.width(), fig.height()), (64, 48));
        assert_eq!(fig.image.get_pixel(20, 20).0, [255, 0, 0]);
        assert_eq!(fig.image.get_pixel(60, 40).0, [255, 255, 255]);

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("box.png");
        fig.save_png(&path)?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_draw_error_surfaces() {
        let result = Figure::render(10, 10, "fails", |_| Err(DiagError::Draw("boom".into())));
        assert!(matches!(result, Err(DiagError::Draw(msg)) if msg == "boom"));
        assert!(Figure::render(0, 10, "empty", |_| Ok(())).is_err());
    }
}
