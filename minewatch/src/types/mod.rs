//! Small shared value types.

mod elapsed;

pub use elapsed::Elapsed;
