use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Run configuration, loaded once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub training: Training,
    pub paths: Paths,
    pub image: ImageInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Hyperparameters {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    #[serde(default = "default_max_layer_size")]
    pub max_layer_size: usize,
    #[serde(default = "default_min_layer_size")]
    pub min_layer_size: usize,
    /// Use class-balanced cross entropy weights.
    #[serde(default = "default_true")]
    pub weights: bool,
    /// Per-class factor applied to the inverse class frequency.
    pub multiplier: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Training {
    #[serde(default = "default_true")]
    pub scheduler: bool,
    #[serde(default = "default_true")]
    pub early_stop: bool,
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_wait")]
    pub wait: usize,
}

impl Default for Training {
    fn default() -> Self {
        Self {
            scheduler: true,
            early_stop: true,
            patience: default_patience(),
            wait: default_wait(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Paths {
    pub train_img_dir: PathBuf,
    pub train_mask_dir: PathBuf,
    pub val_img_dir: PathBuf,
    pub val_mask_dir: PathBuf,
    #[serde(default)]
    pub test_img_dir: Option<PathBuf>,
    #[serde(default)]
    pub test_mask_dir: Option<PathBuf>,
    #[serde(default = "default_predictions_dir")]
    pub predictions_dir: PathBuf,
    #[serde(default = "default_submissions_dir")]
    pub submissions_dir: PathBuf,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

impl Paths {
    /// Image and mask directories of the test split, when both are configured.
    pub fn test_dirs(&self) -> Option<(&Path, &Path)> {
        match (&self.test_img_dir, &self.test_mask_dir) {
            (Some(img), Some(mask)) => Some((img.as_path(), mask.as_path())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ImageInfo {
    pub image_height: usize,
    pub image_width: usize,
    #[serde(default = "default_channels")]
    pub image_channels: usize,
    pub mask_labels: usize,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn num_classes(&self) -> usize {
        self.image.mask_labels
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let hp = &self.hyperparameters;

        if self.image.mask_labels < 2 {
            return Err(ConfigError::Invalid(format!(
                "MASK_LABELS must be at least 2, got {}",
                self.image.mask_labels
            )));
        }
        if hp.multiplier.len() != self.image.mask_labels {
            return Err(ConfigError::Invalid(format!(
                "MULTIPLIER has {} entries but MASK_LABELS is {}",
                hp.multiplier.len(),
                self.image.mask_labels
            )));
        }
        if hp.batch_size == 0 {
            return Err(ConfigError::Invalid("BATCH_SIZE must be positive".into()));
        }
        if hp.min_layer_size == 0 || hp.min_layer_size > hp.max_layer_size {
            return Err(ConfigError::Invalid(format!(
                "layer sizes must satisfy 0 < MIN_LAYER_SIZE ({}) <= MAX_LAYER_SIZE ({})",
                hp.min_layer_size, hp.max_layer_size
            )));
        }
        if self.image.image_height == 0 || self.image.image_width == 0 {
            return Err(ConfigError::Invalid("image dimensions must be positive".into()));
        }
        if self.image.image_channels == 0 {
            return Err(ConfigError::Invalid("IMAGE_CHANNELS must be positive".into()));
        }
        Ok(())
    }
}

fn default_learning_rate() -> f64 {
    1e-2
}

fn default_batch_size() -> usize {
    20
}

fn default_num_epochs() -> usize {
    1000
}

fn default_optimizer() -> String {
    "adam".to_string()
}

fn default_max_layer_size() -> usize {
    1024
}

fn default_min_layer_size() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_patience() -> usize {
    15
}

fn default_wait() -> usize {
    20
}

fn default_channels() -> usize {
    1
}

fn default_predictions_dir() -> PathBuf {
    PathBuf::from("data/predictions/")
}

fn default_submissions_dir() -> PathBuf {
    PathBuf::from("data/submissions/")
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints/")
}
