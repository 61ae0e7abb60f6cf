use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::Month;

/// One raw observation row as delivered by the archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub fields: Map<String, Value>,
    /// Product listing, when the source resolved it. `None` means the
    /// products were never looked up; `Some(vec![])` means there were none.
    pub products: Option<Vec<Map<String, Value>>>,
}

impl RawRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            products: None,
        }
    }

    /// Build from a JSON object; anything else yields an empty record.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self::new(fields),
            _ => Self::default(),
        }
    }

    pub fn with_products(mut self, products: Vec<Map<String, Value>>) -> Self {
        self.products = Some(products);
        self
    }
}

/// Lazy, finite sequence of raw records for one month.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<RawRecord>> + 'a>;

/// Anything that can produce a month of archive records: the live MAST
/// client, a local JSONL export, or an in-memory fake.
pub trait ArchiveSource {
    fn fetch_month(&self, month: Month) -> Result<RecordStream<'_>>;
}

/// Local export laid out as one `YYYY-MM.jsonl` file per month, one archive
/// row per line. A row may carry its product listing under `products`.
///
/// A month without a file is a fetch error, not an empty month: an empty
/// month is exported as an empty file.
#[derive(Debug, Clone)]
pub struct JsonlSource {
    input_dir: PathBuf,
}

impl JsonlSource {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
        }
    }

    pub fn month_path(&self, month: Month) -> PathBuf {
        self.input_dir.join(format!("{}.jsonl", month))
    }
}

impl ArchiveSource for JsonlSource {
    fn fetch_month(&self, month: Month) -> Result<RecordStream<'_>> {
        let path = self.month_path(month);
        if !path.exists() {
            warn!(month = %month, path = ?path, "no export file for month");
            return Err(Error::ArchiveFetch(format!(
                "no export file for {} at {}",
                month,
                path.display()
            )));
        }

        let file = File::open(&path)?;
        let lines = BufReader::new(file)
            .lines()
            .enumerate()
            .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty()));

        Ok(Box::new(lines.map(move |(idx, line)| {
            let line = line?;
            let value: Value = serde_json::from_str(&line).map_err(|e| {
                Error::ArchiveFetch(format!("{}:{}: {}", path.display(), idx + 1, e))
            })?;
            Ok(parse_export_row(value))
        })))
    }
}

fn parse_export_row(value: Value) -> RawRecord {
    let mut record = RawRecord::from_json(value);
    if let Some(Value::Array(products)) = record.fields.remove("products") {
        let products = products
            .into_iter()
            .filter_map(|p| match p {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        record.products = Some(products);
    }
    record
}
