use image::error::{ParameterError, ParameterErrorKind};
use image::{GrayImage, ImageError, Luma};
use metrics::LabelMap;
use std::fs;
use std::path::{Path, PathBuf};

const GRID_COLUMNS: usize = 8;
const GRID_PADDING: usize = 2;

pub fn prediction_path(folder: &Path, timestamp: &str, epoch: usize, batch_idx: usize) -> PathBuf {
    folder.join(format!("{}_pred_e{}_i{}.png", timestamp, epoch, batch_idx))
}

pub fn validation_path(folder: &Path, timestamp: &str, batch_idx: usize) -> PathBuf {
    folder.join(format!("{}_val_i{}.png", timestamp, batch_idx))
}

pub fn submission_path(folder: &Path, timestamp: &str, batch_idx: usize) -> PathBuf {
    folder.join(format!("{}_submission_i{}.png", timestamp, batch_idx))
}

/// Writes a batch of label maps (`[N, H, W]` or `[H, W]`) as one grayscale grid.
///
/// Labels are drawn as `label / (num_classes - 1)` intensities. Images are
/// tiled eight per row with a two pixel border; a single map is written as is.
pub fn save_label_grid(maps: &LabelMap, num_classes: usize, path: &Path) -> Result<(), ImageError> {
    let (count, height, width) = match *maps.shape() {
        [n, h, w] if n > 0 => (n, h, w),
        [h, w] => (1, h, w),
        // Empty batches and other ranks have nothing to tile
        _ => {
            return Err(ImageError::Parameter(ParameterError::from_kind(
                ParameterErrorKind::DimensionMismatch,
            )))
        }
    };

    let pixels: Vec<u8> = maps.to_scaled(num_classes).into_iter().map(to_byte).collect();
    let grid = tile(&pixels, count, height, width);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    grid.save(path)
}

fn to_byte(v: f32) -> u8 {
    (v * 255.0 + 0.5).clamp(0.0, 255.0) as u8
}

fn tile(pixels: &[u8], count: usize, height: usize, width: usize) -> GrayImage {
    if count == 1 {
        return GrayImage::from_fn(width as u32, height as u32, |x, y| {
            Luma([pixels[y as usize * width + x as usize]])
        });
    }

    let columns = count.min(GRID_COLUMNS);
    let rows = count.div_ceil(columns);
    let cell_h = height + GRID_PADDING;
    let cell_w = width + GRID_PADDING;

    let mut grid = GrayImage::new(
        (columns * cell_w + GRID_PADDING) as u32,
        (rows * cell_h + GRID_PADDING) as u32,
    );

    let plane = height * width;
    for n in 0..count {
        let top = (n / columns) * cell_h + GRID_PADDING;
        let left = (n % columns) * cell_w + GRID_PADDING;
        let image = &pixels[n * plane..(n + 1) * plane];

        for y in 0..height {
            for x in 0..width {
                grid.put_pixel((left + x) as u32, (top + y) as u32, Luma([image[y * width + x]]));
            }
        }
    }
    grid
}
