use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(f64),
    Image(PathBuf),
}

/// Named values logged together for one step.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub step: usize,
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new(step: usize) -> Self {
        Self {
            step,
            entries: Vec::new(),
        }
    }

    pub fn scalar(mut self, key: &str, value: f64) -> Self {
        self.push_scalar(key, value);
        self
    }

    pub fn push_scalar(&mut self, key: &str, value: f64) {
        self.entries.push((key.to_string(), Value::Scalar(value)));
    }

    pub fn push_image(&mut self, key: &str, path: &Path) {
        self.entries
            .push((key.to_string(), Value::Image(path.to_path_buf())));
    }

    /// Adds one image per batch, keyed `{prefix}_i{batch_idx}`.
    pub fn push_images(&mut self, prefix: &str, paths: &[PathBuf]) {
        for (i, path) in paths.iter().enumerate() {
            self.push_image(&format!("{}_i{}", prefix, i), path);
        }
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }
}

/// Destination for per-epoch training metrics.
pub trait Tracker {
    fn log(&mut self, record: &Record) -> io::Result<()>;

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct LogTracker;

impl Tracker for LogTracker {
    fn log(&mut self, record: &Record) -> io::Result<()> {
        for (key, value) in record.entries() {
            match value {
                Value::Scalar(v) => log::info!("[{}] {}: {:.5}", record.step, key, v),
                Value::Image(p) => log::info!("[{}] {}: {}", record.step, key, p.display()),
            }
        }
        Ok(())
    }
}

/// Appends one JSON object per record to a local file.
pub struct JsonlTracker {
    writer: BufWriter<File>,
}

impl JsonlTracker {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("Tracking metrics in {}", path.display());

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl Tracker for JsonlTracker {
    fn log(&mut self, record: &Record) -> io::Result<()> {
        let mut object = serde_json::Map::new();
        object.insert("_step".to_string(), record.step.into());
        for (key, value) in record.entries() {
            object.insert(key.clone(), serde_json::to_value(value)?);
        }

        serde_json::to_writer(&mut self.writer, &object)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
