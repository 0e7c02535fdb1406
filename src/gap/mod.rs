pub mod classifier;
pub mod expectation;
pub mod scanner;
pub mod structs;

pub use classifier::{classify, ClassifierConfig};
pub use scanner::scan_series;
pub use structs::{Gap, GapKind, GapLogEntry, GapStatus, Scenario};
