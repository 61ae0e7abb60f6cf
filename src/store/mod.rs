pub mod observations;
pub mod schema_gen;
pub mod sqlite;
pub mod value;

pub use sqlite::Store;
pub use value::{ParsedRow, SqlValue};
