use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::schema_gen::{generate_create_table, generate_drop_table, generate_indexes};
use crate::error::Result;
use crate::query::cone::angular_separation;
use crate::schema::{TableSchema, ALL_TABLES};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle on the SQLite observation store.
///
/// Every operation opens its own connection, so readers never share state
/// with each other or with the ingestion writer.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the database and make sure the schema exists.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            db_path: db_path.as_ref().to_path_buf(),
        };
        store.create_tables(ALL_TABLES)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Open a connection with pragmas and the `ang_sep` function installed.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;",
        )?;
        register_functions(&conn)?;
        Ok(conn)
    }

    /// Create all tables and indexes for the given schemas
    pub fn create_tables(&self, schemas: &[&TableSchema]) -> Result<()> {
        let conn = self.connect()?;
        for schema in schemas {
            debug!(table = schema.name, "creating table");
            conn.execute(&generate_create_table(schema), [])?;
            for index_sql in generate_indexes(schema) {
                conn.execute(&index_sql, [])?;
            }
        }
        Ok(())
    }

    /// Drop and recreate every table.
    pub fn reset(&self) -> Result<()> {
        let conn = self.connect()?;
        for schema in ALL_TABLES {
            info!(table = schema.name, "dropping table");
            conn.execute(&generate_drop_table(schema), [])?;
        }
        drop(conn);
        self.create_tables(ALL_TABLES)
    }

    /// Connectivity check.
    pub fn health(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "ang_sep",
        4,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let ra1 = ctx.get::<Option<f64>>(0)?;
            let dec1 = ctx.get::<Option<f64>>(1)?;
            let ra2 = ctx.get::<Option<f64>>(2)?;
            let dec2 = ctx.get::<Option<f64>>(3)?;
            Ok(match (ra1, dec1, ra2, dec2) {
                (Some(ra1), Some(dec1), Some(ra2), Some(dec2)) => {
                    Some(angular_separation(ra1, dec1, ra2, dec2))
                }
                _ => None,
            })
        },
    )
}
