//! Read side: filtered, paginated observation search and discovery counts.

pub mod aggregate;
pub mod cone;
pub mod engine;
pub mod filter;
pub mod params;

pub use aggregate::{Aggregator, CountEntry, Dimension, Statistics};
pub use cone::{angular_separation, ConeSearch};
pub use engine::{ObservationQuery, ResultPage, SortOrder};
pub use filter::{ObservationFilter, ProductScope};
pub use params::{Page, PageBounds, QueryParams};
