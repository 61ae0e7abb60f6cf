//! Grouped counts and collection-wide statistics, computed in SQL.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::parse_timestamp;
use crate::store::Store;

/// Top-N size used inside the statistics object.
pub const STATISTICS_TOP_N: u32 = 10;

/// A groupable observation attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Instrument,
    Filter,
    Grating,
    Target,
    Proposal,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Instrument,
        Dimension::Filter,
        Dimension::Grating,
        Dimension::Target,
        Dimension::Proposal,
    ];

    fn column(&self) -> &'static str {
        match self {
            Dimension::Instrument => "instrument",
            Dimension::Filter => "filter_name",
            Dimension::Grating => "grating",
            Dimension::Target => "target_name",
            Dimension::Proposal => "proposal_id",
        }
    }

    /// Plural name used as the listing key and route segment.
    pub fn plural(&self) -> &'static str {
        match self {
            Dimension::Instrument => "instruments",
            Dimension::Filter => "filters",
            Dimension::Grating => "gratings",
            Dimension::Target => "targets",
            Dimension::Proposal => "proposals",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl FromStr for Dimension {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Dimension::ALL
            .into_iter()
            .find(|d| d.plural() == s || d.plural().trim_end_matches('s') == s)
            .ok_or_else(|| Error::validation("dimension", format!("unknown dimension '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountEntry {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_observations: u64,
    pub by_dataproduct_type: BTreeMap<String, u64>,
    /// Seconds; NULL exposure counts as zero
    pub total_exposure_time: f64,
    pub earliest_observation: Option<String>,
    pub latest_observation: Option<String>,
    pub top_instruments: Vec<CountEntry>,
    pub top_filters: Vec<CountEntry>,
    pub top_gratings: Vec<CountEntry>,
    pub top_targets: Vec<CountEntry>,
    pub top_proposals: Vec<CountEntry>,
}

/// Discovery and statistics over the observation table. Nothing is cached;
/// every call reads the current store state.
pub struct Aggregator<'a> {
    store: &'a Store,
}

impl<'a> Aggregator<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Distinct values of `dimension` with their row counts, most frequent
    /// first. NULL and empty values are left out.
    pub fn counts(&self, dimension: Dimension, limit: Option<u32>) -> Result<Vec<CountEntry>> {
        let conn = self.store.connect()?;
        counts_on(&conn, dimension, limit)
    }

    pub fn statistics(&self) -> Result<Statistics> {
        let mut conn = self.store.connect()?;
        let tx = conn.transaction()?;

        let (total, exposure, earliest, latest): (i64, f64, Option<String>, Option<String>) = tx
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(COALESCE(exposure_time, 0.0)), 0.0),
                        MIN(observation_date), MAX(observation_date)
                 FROM observations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let mut by_type = BTreeMap::new();
        {
            let mut stmt = tx.prepare(
                "SELECT dataproduct_type, COUNT(*) FROM observations GROUP BY dataproduct_type",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (kind, count) = row?;
                by_type.insert(kind, count as u64);
            }
        }

        let top = |dimension| counts_on(&tx, dimension, Some(STATISTICS_TOP_N));
        let stats = Statistics {
            total_observations: total as u64,
            by_dataproduct_type: by_type,
            total_exposure_time: exposure,
            earliest_observation: normalize_timestamp(earliest),
            latest_observation: normalize_timestamp(latest),
            top_instruments: top(Dimension::Instrument)?,
            top_filters: top(Dimension::Filter)?,
            top_gratings: top(Dimension::Grating)?,
            top_targets: top(Dimension::Target)?,
            top_proposals: top(Dimension::Proposal)?,
        };
        tx.commit()?;
        Ok(stats)
    }
}

fn counts_on(conn: &Connection, dimension: Dimension, limit: Option<u32>) -> Result<Vec<CountEntry>> {
    let column = dimension.column();
    let sql = format!(
        "SELECT {col}, COUNT(*) AS n FROM observations
         WHERE {col} IS NOT NULL AND {col} <> ''
         GROUP BY {col} ORDER BY n DESC, {col} ASC LIMIT ?1",
        col = column
    );
    // SQLite treats a negative LIMIT as unbounded
    let limit = limit.map(i64::from).unwrap_or(-1);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(CountEntry {
            name: row.get(0)?,
            count: row.get::<_, i64>(1)? as u64,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn normalize_timestamp(raw: Option<String>) -> Option<String> {
    raw.as_deref()
        .and_then(parse_timestamp)
        .map(|dt| crate::model::format_timestamp(&dt))
}
