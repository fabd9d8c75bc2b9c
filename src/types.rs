pub mod missing;
pub mod time_value;

// Re-export types for convenience.
pub use crate::types::missing::Missing;
pub use crate::types::time_value::{TimeType, TimeValue};
