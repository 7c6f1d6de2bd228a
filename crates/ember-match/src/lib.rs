pub mod engine;
pub mod error;

pub use engine::{MatchEngine, SwipeOutcome, UnmatchOutcome};
pub use error::MatchError;
