// Stream stages between the raw snapshot reader and the aggregator
pub mod continuation;

pub use continuation::{ContinuationMerger, MergeStats};
