mod loader;
mod weights;

pub use loader::{Batch, DataLoader};
pub use weights::{class_weights, weights_from_counts};

use image::DynamicImage;
use metrics::{LabelMap, MetricsError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ImageInfo;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode image {path:?}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("no mask found for image {0:?}")]
    MissingMask(PathBuf),

    #[error("{path:?} is {actual:?} pixels, expected {expected:?}")]
    Dimensions {
        path: PathBuf,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("no PNG images found in {0:?}")]
    Empty(PathBuf),

    #[error("unsupported channel count {0}, expected 1 or 3")]
    Channels(usize),

    #[error(transparent)]
    Labels(#[from] MetricsError),
}

/// An image file and the mask with the same file name.
#[derive(Debug, Clone)]
pub struct SamplePair {
    pub image: PathBuf,
    pub mask: PathBuf,
}

/// Geometry shared by every sample of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub num_classes: usize,
}

impl SampleShape {
    pub fn from_info(info: &ImageInfo) -> Self {
        Self {
            channels: info.image_channels,
            height: info.image_height,
            width: info.image_width,
            num_classes: info.mask_labels,
        }
    }

    pub fn pixels(&self) -> usize {
        self.height * self.width
    }
}

/// Phantom images and their segmentation masks.
pub struct PhantomDataset {
    samples: Vec<SamplePair>,
    shape: SampleShape,
}

impl PhantomDataset {
    pub fn new(
        image_dir: &Path,
        mask_dir: &Path,
        shape: SampleShape,
    ) -> Result<Self, DatasetError> {
        if shape.channels != 1 && shape.channels != 3 {
            return Err(DatasetError::Channels(shape.channels));
        }

        let images = png_files(image_dir)?;
        if images.is_empty() {
            return Err(DatasetError::Empty(image_dir.to_path_buf()));
        }

        let samples = images
            .into_iter()
            .map(|image| -> Result<SamplePair, DatasetError> {
                let mask = image
                    .file_name()
                    .map(|name| mask_dir.join(name))
                    .filter(|mask| mask.exists())
                    .ok_or_else(|| DatasetError::MissingMask(image.clone()))?;
                Ok(SamplePair { image, mask })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("Found {} samples in {:?}", samples.len(), image_dir);

        Ok(Self { samples, shape })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn shape(&self) -> SampleShape {
        self.shape
    }

    pub fn samples(&self) -> &[SamplePair] {
        &self.samples
    }

    /// Batches in file order.
    pub fn loader(&self, batch_size: usize, workers: usize) -> DataLoader {
        DataLoader::new(&self.samples, self.shape, batch_size, workers)
    }

    /// Batches in a freshly shuffled order.
    pub fn shuffled_loader(
        &mut self,
        batch_size: usize,
        workers: usize,
        rng: &mut StdRng,
    ) -> DataLoader {
        self.samples.shuffle(rng);
        DataLoader::new(&self.samples, self.shape, batch_size, workers)
    }
}

pub fn png_files(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let entries = fs::read_dir(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
        .collect();
    files.sort();

    Ok(files)
}

fn open(path: &Path, shape: &SampleShape) -> Result<DynamicImage, DatasetError> {
    let img = image::open(path).map_err(|source| DatasetError::Image {
        path: path.to_path_buf(),
        source,
    })?;

    let expected = (shape.width as u32, shape.height as u32);
    let actual = (img.width(), img.height());
    if actual != expected {
        return Err(DatasetError::Dimensions {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(img)
}

/// Loads an image as CHW floats in `[0, 1]`.
pub fn load_image(path: &Path, shape: &SampleShape) -> Result<Vec<f32>, DatasetError> {
    let img = open(path, shape)?;

    if shape.channels == 1 {
        return Ok(img
            .to_luma8()
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect());
    }

    let rgb = img.to_rgb8();
    let plane = shape.pixels();
    let mut chw = vec![0.0f32; plane * 3];
    for (i, pixel) in rgb.pixels().enumerate() {
        chw[i] = pixel[0] as f32 / 255.0;
        chw[plane + i] = pixel[1] as f32 / 255.0;
        chw[2 * plane + i] = pixel[2] as f32 / 255.0;
    }
    Ok(chw)
}

/// Loads a mask as class indices.
///
/// Masks storing raw indices are used as is. Masks whose values exceed the
/// label range are read as intensities `label / (num_classes - 1)`, the
/// format the prediction images are written in.
pub fn load_mask(path: &Path, shape: &SampleShape) -> Result<Vec<u32>, DatasetError> {
    let raw = open(path, shape)?.to_luma8().into_raw();

    let max_label = shape.num_classes.saturating_sub(1) as u32;
    if raw.iter().all(|&v| (v as u32) <= max_label) {
        return Ok(raw.into_iter().map(u32::from).collect());
    }

    let intensities: Vec<f32> = raw.into_iter().map(|v| v as f32 / 255.0).collect();
    let labels = LabelMap::from_scaled(
        vec![shape.height, shape.width],
        &intensities,
        shape.num_classes,
    )?;
    Ok(labels.into_vec())
}
