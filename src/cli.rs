use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::model::Month;
use crate::query::QueryParams;

#[derive(Parser, Debug)]
#[command(name = "jwst-archive")]
#[command(version, about = "Backfill and query public JWST observations in SQLite")]
pub struct Cli {
    /// SQLite database path (overrides DATABASE_URL)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database schema
    Init {
        /// Drop every table first
        #[arg(long)]
        reset: bool,
    },

    /// Ingest archive months into the database
    Ingest {
        /// Month to ingest (YYYY-MM); defaults to the next incomplete month
        #[arg(short, long)]
        month: Option<Month>,

        /// Replace the month's stored observations with a fresh fetch
        #[arg(short, long, requires = "month")]
        force: bool,

        /// Number of incomplete months to process in one run
        #[arg(short = 'n', long, default_value_t = 1, conflicts_with = "month")]
        months: u32,

        /// MAST page size
        #[arg(long, default_value_t = 500)]
        page_size: u32,

        /// Skip per-observation product lookups
        #[arg(long)]
        no_products: bool,

        /// Read YYYY-MM.jsonl exports from this directory instead of MAST
        #[arg(long)]
        from_dir: Option<PathBuf>,

        /// Show the full-screen progress display
        #[arg(long)]
        tui: bool,
    },

    /// Show the backfill ledger
    Progress {
        /// Print JSON instead of the text summary
        #[arg(long)]
        json: bool,
    },

    /// Run an API request and print the JSON response
    Query {
        /// Request path, optionally with a query string, e.g.
        /// "/observations/search?q=carina&limit=5"
        path: String,

        /// Query parameters as key=value
        #[arg(value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

impl Commands {
    /// Split a `query` command into its route and parameters. Trailing
    /// `key=value` arguments override the same names in the query string.
    pub fn query_request(
        path: &str,
        params: &[(String, String)],
    ) -> crate::error::Result<(String, QueryParams)> {
        let (route, mut query) = match path.split_once('?') {
            Some((route, query)) => (route, query.parse::<QueryParams>()?),
            None => (path, QueryParams::new()),
        };
        query.extend(params.iter().cloned());
        Ok((route.to_string(), query))
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
