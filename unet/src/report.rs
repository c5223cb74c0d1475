use metrics::EvaluationResult;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// `<folder>/<run>_<kind>.csv`, e.g. `data/predictions/20240101_120000_preds.csv`.
pub fn csv_path(folder: &Path, run: &str, kind: &str) -> PathBuf {
    folder.join(format!("{}_{}.csv", run, kind))
}

pub fn print_results(result: &EvaluationResult) {
    log::info!("Got {} of {} pixels;", result.num_correct, result.num_pixels);
    for (key, value) in result.entries() {
        log::info!("{}: {:.5}", key, value);
    }
}

/// Appends one row of scores; the header is only written to an empty file.
pub fn append_csv(path: &Path, result: &EvaluationResult) -> csv::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_empty = file.metadata()?.len() == 0;
    let entries = result.entries();

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if is_empty {
        writer.write_record(entries.iter().map(|(k, _)| k.as_str()))?;
    }
    writer.write_record(entries.iter().map(|(_, v)| v.to_string()))?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{Evaluator, LabelMap};

    fn result() -> EvaluationResult {
        let mut evaluator = Evaluator::new(2);
        evaluator
            .push(&LabelMap::from_vec(vec![0, 1, 1]), &LabelMap::from_vec(vec![0, 1, 0]))
            .unwrap();
        let mut result = evaluator.result();
        result.insert("train_loss", 0.5);
        result
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = csv_path(&dir.path().join("preds"), "run", "preds");

        append_csv(&path, &result()).unwrap();
        append_csv(&path, &result()).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("accuracy,accuracy_label_0,recall_label_0"));
        assert!(lines[0].ends_with("train_loss"));
        assert_eq!(lines[1], lines[2]);
        assert_eq!(lines[1].split(',').count(), lines[0].split(',').count());
    }

    #[test]
    fn test_keys_with_separators_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quoted.csv");

        let mut result = result();
        result.insert("loss, weighted", 0.125);
        append_csv(&path, &result).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(header.iter().last(), Some("loss, weighted"));

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), header.len());
        assert_eq!(rows[0].iter().last(), Some("0.125"));
    }

    #[test]
    fn test_csv_path() {
        assert_eq!(
            csv_path(Path::new("data"), "20240101_000000", "submission"),
            Path::new("data/20240101_000000_submission.csv")
        );
    }
}
