pub mod actor;
pub mod errors;
pub mod pipeline;
pub mod scheduler;
pub mod throttle;

pub use actor::{BackfillActor, BackfillConfig, BackfillReport, BackfillTell, GetReport};
pub use errors::FillError;
pub use pipeline::{fill_gap, FillOutcome, PipelineConfig};
pub use scheduler::{GapScheduler, RetryDecision, SchedulerConfig};
pub use throttle::RequestThrottle;
