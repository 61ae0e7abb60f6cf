pub mod record;

pub use record::{normalize_record, Normalized, SkipReason};
