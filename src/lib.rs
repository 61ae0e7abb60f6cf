pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod query;
pub mod schema;
pub mod store;
pub mod ui;

pub use cli::{Cli, Commands};
pub use error::{Error, Result};
pub use store::Store;
pub use ui::{LogUi, Phase, SilentUi, Ui, UiApp};
