pub mod counts;
pub mod error;
pub mod evaluation;
pub mod label_map;
pub mod scores;

pub use counts::ClassCounts;
pub use error::MetricsError;
pub use evaluation::{EvaluationResult, Evaluator};
pub use label_map::LabelMap;
pub use scores::{
    class_accuracies, dice, dice_coefficient, global_accuracy, intersection_over_union,
    precision, recall, DICE_SMOOTH,
};
