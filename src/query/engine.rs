use rusqlite::{params_from_iter, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use super::filter::ObservationFilter;
use super::params::Page;
use crate::error::{Error, Result};
use crate::model::Observation;
use crate::schema::OBSERVATIONS;
use crate::store::observations::{find_by_obs_id, observation_from_row};
use crate::store::{SqlValue, Store};

/// Result ordering. Ties on timestamp fall back to the surrogate id so pages
/// never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Newest,
    Random,
}

impl SortOrder {
    fn sql(&self) -> &'static str {
        match self {
            SortOrder::Newest => "observation_date DESC, id DESC",
            SortOrder::Random => "random()",
        }
    }
}

/// One bounded page of matching observations.
#[derive(Debug, Clone, Serialize)]
pub struct ResultPage {
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
    pub results: Vec<Observation>,
}

/// Read-only query engine over the observation table.
pub struct ObservationQuery<'a> {
    store: &'a Store,
}

impl<'a> ObservationQuery<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Count and fetch one page inside a single read transaction.
    pub fn search(&self, filter: &ObservationFilter, page: Page, order: SortOrder) -> Result<ResultPage> {
        let sql_filter = filter.to_sql();
        let where_clause = sql_filter.where_clause();

        let mut conn = self.store.connect()?;
        let tx = conn.transaction()?;

        let total: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM observations{}", where_clause),
            params_from_iter(sql_filter.params().iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM observations{} ORDER BY {} LIMIT ? OFFSET ?",
            OBSERVATIONS.select_list(),
            where_clause,
            order.sql()
        );
        debug!(sql = %sql, "observation search");

        let mut binds: Vec<SqlValue> = sql_filter.params().to_vec();
        binds.push(SqlValue::Integer(i64::from(page.limit)));
        binds.push(SqlValue::Integer(page.offset.min(i64::MAX as u64) as i64));

        let results = {
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(binds.iter()), observation_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;

        Ok(ResultPage {
            total: total as u64,
            limit: page.limit,
            offset: page.offset,
            results,
        })
    }

    /// Exact lookup by the archive's natural key.
    pub fn get(&self, obs_id: &str) -> Result<Observation> {
        let conn = self.store.connect()?;
        find_by_obs_id(&conn, obs_id)?
            .ok_or_else(|| Error::NotFound(format!("observation '{}'", obs_id)))
    }

    /// All observations of one proposal, newest first.
    pub fn by_proposal(&self, proposal_id: &str, page: Page) -> Result<ResultPage> {
        let filter = ObservationFilter {
            proposal_id: Some(proposal_id.to_string()),
            ..Default::default()
        };
        let result = self.search(&filter, page, SortOrder::Newest)?;
        if result.total == 0 {
            return Err(Error::NotFound(format!("proposal '{}'", proposal_id)));
        }
        Ok(result)
    }

    /// Whether the collection holds anything at all.
    pub fn is_empty(&self) -> Result<bool> {
        let conn = self.store.connect()?;
        let any: Option<i64> = conn
            .query_row("SELECT 1 FROM observations LIMIT 1", [], |row| row.get(0))
            .optional()?;
        Ok(any.is_none())
    }
}
