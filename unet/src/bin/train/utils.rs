pub mod device;
pub mod loss;

use chrono::Local;

/// Local time formatted for run and artifact names, e.g. `20240131_142501`.
pub fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}
