pub mod batch;
pub mod location;
pub mod progress;

pub use batch::{BatchTask, BlockSignal, RunOutcome};
pub use location::{LocationPool, LocationRecord};
pub use progress::{OutcomeRecord, ProgressState};
