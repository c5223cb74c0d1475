use crate::counts::{ratio, ClassCounts};
use crate::error::MetricsError;
use crate::label_map::LabelMap;
use crate::scores::DICE_SMOOTH;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClassScores {
    pub accuracy: f64,
    pub recall: f64,
    pub iou: f64,
    pub dice: f64,
}

/// Scores of one evaluation pass, flattened into named scalars on demand.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluationResult {
    pub num_correct: u64,
    pub num_pixels: u64,
    pub accuracy: f64,
    pub classes: Vec<ClassScores>,
    extras: Vec<(String, f64)>,
}

impl EvaluationResult {
    pub fn from_counts(counts: &ClassCounts) -> Self {
        let precision = counts.precision();
        let recall = counts.recall();
        let dice = counts.dice(DICE_SMOOTH);

        let classes = (0..counts.num_classes())
            .map(|c| ClassScores {
                accuracy: precision[c],
                recall: recall[c],
                iou: counts.iou_of(c),
                dice: dice[c],
            })
            .collect();

        Self {
            num_correct: counts.correct(),
            num_pixels: counts.total(),
            accuracy: ratio(counts.correct(), counts.total()),
            classes,
            extras: Vec::new(),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Sets an additional named scalar such as a loss, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: f64) {
        match self.extras.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.extras.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// All scalars in a stable order: global accuracy, the per-label block, then extras.
    pub fn entries(&self) -> Vec<(String, f64)> {
        let mut entries = Vec::with_capacity(1 + self.classes.len() * 4 + self.extras.len());
        entries.push(("accuracy".to_string(), self.accuracy));

        for (i, scores) in self.classes.iter().enumerate() {
            entries.push((format!("accuracy_label_{}", i), scores.accuracy));
            entries.push((format!("recall_label_{}", i), scores.recall));
            entries.push((format!("iou_label_{}", i), scores.iou));
            entries.push((format!("dice_label_{}", i), scores.dice));
        }

        entries.extend(self.extras.iter().cloned());
        entries
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries().into_iter().map(|(k, _)| k).collect()
    }

    pub fn label_accuracies(&self) -> Vec<f64> {
        self.classes.iter().map(|s| s.accuracy).collect()
    }

    pub fn label_recalls(&self) -> Vec<f64> {
        self.classes.iter().map(|s| s.recall).collect()
    }
}

/// Accumulates class tallies over every batch of an evaluation pass.
///
/// Scores are computed from the sum of all batches, so the result
/// describes the whole dataset rather than its final batch.
pub struct Evaluator {
    counts: ClassCounts,
}

impl Evaluator {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: ClassCounts::new(num_classes),
        }
    }

    pub fn push(&mut self, pred: &LabelMap, label: &LabelMap) -> Result<(), MetricsError> {
        let batch = ClassCounts::from_maps(pred, label, self.counts.num_classes())?;
        self.counts.merge(&batch);
        Ok(())
    }

    pub fn num_correct(&self) -> u64 {
        self.counts.correct()
    }

    pub fn num_pixels(&self) -> u64 {
        self.counts.total()
    }

    pub fn result(&self) -> EvaluationResult {
        EvaluationResult::from_counts(&self.counts)
    }
}
