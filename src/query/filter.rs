//! Translation of validated filter dimensions into one SQL predicate set.

use chrono::{DateTime, Duration, Utc};

use super::cone::{ConeSearch, ANGLE_EPSILON_DEG};
use super::params::{parse_date, DateInput, QueryParams};
use crate::error::{Error, Result};
use crate::model::{format_timestamp, DataProductType};
use crate::store::SqlValue;

/// Upper bound of a date range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateUpper {
    Inclusive(DateTime<Utc>),
    Exclusive(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateUpper>,
}

/// Closed numeric interval with either side optional.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bounds {
    fn from_params(params: &QueryParams, min_name: &str, max_name: &str) -> Result<Option<Self>> {
        let min = params.float(&[min_name])?;
        let max = params.float(&[max_name])?;
        for (name, value) in [(min_name, min), (max_name, max)] {
            if matches!(value, Some(v) if v < 0.0) {
                return Err(Error::validation(name, "must not be negative"));
            }
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(Error::validation(
                    min_name,
                    format!("{} is greater than {} {}", lo, max_name, hi),
                ));
            }
        }
        Ok((min.is_some() || max.is_some()).then_some(Bounds { min, max }))
    }
}

/// Which product types an endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductScope {
    /// The caller may restrict with `dataproduct_type`.
    Any,
    /// Fixed by the endpoint; `dataproduct_type` is not read.
    Only(DataProductType),
}

/// Every optional filter dimension, already validated. Dimensions combine
/// with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationFilter {
    pub instrument: Option<String>,
    pub filter_name: Option<String>,
    pub grating: Option<String>,
    pub target: Option<String>,
    pub text: Option<String>,
    pub calib_level: Option<i64>,
    pub target_classification: Option<String>,
    pub proposal_id: Option<String>,
    pub date_range: Option<DateRange>,
    pub cone: Option<ConeSearch>,
    pub wavelength: Option<Bounds>,
    pub resolution: Option<Bounds>,
    pub product_type: Option<DataProductType>,
}

impl ObservationFilter {
    /// Validate request parameters, failing on the first bad one.
    pub fn from_params(params: &QueryParams, scope: ProductScope, now: DateTime<Utc>) -> Result<Self> {
        let mut filter = ObservationFilter {
            instrument: params.string(&["instrument"]),
            filter_name: params.string(&["filter_name", "filter"]),
            grating: params.string(&["grating"]),
            target: params.string(&["target"]),
            text: params.string(&["q"]),
            target_classification: params.string(&["target_classification"]),
            proposal_id: params.string(&["proposal_id"]),
            ..Default::default()
        };

        filter.calib_level = params.integer(&["calib_level"])?;
        filter.date_range = date_range(params, now)?;
        filter.cone = cone(params)?;
        filter.wavelength = Bounds::from_params(params, "min_wavelength", "max_wavelength")?;
        filter.resolution = Bounds::from_params(params, "min_resolution", "max_resolution")?;
        filter.product_type = match scope {
            ProductScope::Only(kind) => Some(kind),
            ProductScope::Any => params
                .get(&["dataproduct_type"])
                .map(|(_, v)| v.parse::<DataProductType>())
                .transpose()?,
        };

        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        *self == ObservationFilter::default()
    }

    pub fn to_sql(&self) -> SqlFilter {
        let mut sql = SqlFilter::default();

        if let Some(instrument) = &self.instrument {
            // "NIRCAM" also selects the archive's mode-qualified "NIRCAM/IMAGE"
            sql.push(
                "(instrument = ? COLLATE NOCASE OR instrument LIKE ? ESCAPE '\\')",
                [
                    SqlValue::from(instrument.as_str()),
                    SqlValue::Text(format!("{}/%", escape_like(instrument))),
                ],
            );
        }
        if let Some(filter_name) = &self.filter_name {
            sql.push("filter_name = ? COLLATE NOCASE", [filter_name.as_str().into()]);
        }
        if let Some(grating) = &self.grating {
            sql.push("grating = ? COLLATE NOCASE", [grating.as_str().into()]);
        }
        if let Some(target) = &self.target {
            sql.push("target_name LIKE ? ESCAPE '\\'", [contains_pattern(target)]);
        }
        if let Some(text) = &self.text {
            let pattern = contains_pattern(text);
            sql.push(
                "(target_name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')",
                [pattern.clone(), pattern],
            );
        }
        if let Some(level) = self.calib_level {
            sql.push("calib_level = ?", [level.into()]);
        }
        if let Some(class) = &self.target_classification {
            sql.push("target_classification = ? COLLATE NOCASE", [class.as_str().into()]);
        }
        if let Some(proposal) = &self.proposal_id {
            sql.push("proposal_id = ?", [proposal.as_str().into()]);
        }
        if let Some(range) = &self.date_range {
            if let Some(start) = &range.start {
                sql.push("observation_date >= ?", [format_timestamp(start).into()]);
            }
            match &range.end {
                Some(DateUpper::Inclusive(end)) => {
                    sql.push("observation_date <= ?", [format_timestamp(end).into()])
                }
                Some(DateUpper::Exclusive(end)) => {
                    sql.push("observation_date < ?", [format_timestamp(end).into()])
                }
                None => {}
            }
        }
        if let Some(cone) = &self.cone {
            let (dec_lo, dec_hi) = cone.dec_band();
            sql.push(
                "dec BETWEEN ? AND ? AND ang_sep(ra, dec, ?, ?) <= ?",
                [
                    dec_lo.into(),
                    dec_hi.into(),
                    cone.ra.into(),
                    cone.dec.into(),
                    (cone.radius + ANGLE_EPSILON_DEG).into(),
                ],
            );
        }
        if let Some(bounds) = &self.wavelength {
            // Interval overlap, not containment
            if let Some(min) = bounds.min {
                sql.push("wavelength_max >= ?", [min.into()]);
            }
            if let Some(max) = bounds.max {
                sql.push("wavelength_min <= ?", [max.into()]);
            }
        }
        if let Some(bounds) = &self.resolution {
            if let Some(min) = bounds.min {
                sql.push("spectral_resolution >= ?", [min.into()]);
            }
            if let Some(max) = bounds.max {
                sql.push("spectral_resolution <= ?", [max.into()]);
            }
        }
        if let Some(kind) = self.product_type {
            sql.push("dataproduct_type = ?", [kind.as_str().into()]);
        }

        sql
    }
}

fn date_range(params: &QueryParams, now: DateTime<Utc>) -> Result<Option<DateRange>> {
    let days_ago = params.integer(&["days_ago"])?;
    let start = params.get(&["start_date"]);
    let end = params.get(&["end_date"]);

    if let Some(days) = days_ago {
        if start.is_some() || end.is_some() {
            return Err(Error::validation(
                "days_ago",
                "cannot be combined with start_date or end_date",
            ));
        }
        if days < 0 {
            return Err(Error::validation("days_ago", "must not be negative"));
        }
        let start = Duration::try_days(days)
            .and_then(|d| now.checked_sub_signed(d))
            .ok_or_else(|| Error::validation("days_ago", "is too large"))?;
        return Ok(Some(DateRange {
            start: Some(start),
            end: None,
        }));
    }

    let start = start
        .map(|(name, value)| {
            parse_date(name, value).map(|input| match input {
                DateInput::Day(day) => day.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
                DateInput::Instant(dt) => Some(dt),
            })
        })
        .transpose()?
        .flatten();
    let end = end
        .map(|(name, value)| {
            parse_date(name, value).map(|input| match input {
                // Whole days are inclusive: everything before the next midnight
                DateInput::Day(day) => day
                    .succ_opt()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| DateUpper::Exclusive(dt.and_utc())),
                DateInput::Instant(dt) => Some(DateUpper::Inclusive(dt)),
            })
        })
        .transpose()?
        .flatten();

    if let (Some(start), Some(end)) = (start, end) {
        let empty = match end {
            DateUpper::Inclusive(e) => e < start,
            DateUpper::Exclusive(e) => e <= start,
        };
        if empty {
            return Err(Error::validation("start_date", "is after end_date"));
        }
    }

    Ok((start.is_some() || end.is_some()).then_some(DateRange { start, end }))
}

fn cone(params: &QueryParams) -> Result<Option<ConeSearch>> {
    let ra = params.float(&["ra"])?;
    let dec = params.float(&["dec"])?;
    let radius = params.float(&["radius"])?;
    match (ra, dec, radius) {
        (None, None, None) => Ok(None),
        (Some(ra), Some(dec), Some(radius)) => ConeSearch::new(ra, dec, radius).map(Some),
        _ => {
            let missing = [("ra", ra), ("dec", dec), ("radius", radius)]
                .into_iter()
                .find(|(_, v)| v.is_none())
                .map(|(name, _)| name)
                .unwrap_or("radius");
            Err(Error::validation(missing, "ra, dec and radius must be given together"))
        }
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn contains_pattern(s: &str) -> SqlValue {
    SqlValue::Text(format!("%{}%", escape_like(s)))
}

/// Accumulated WHERE clauses with their positional bind values.
#[derive(Debug, Default, Clone)]
pub struct SqlFilter {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl SqlFilter {
    pub fn push<const N: usize>(&mut self, clause: &str, values: [SqlValue; N]) {
        self.clauses.push(clause.to_string());
        self.params.extend(values);
    }

    /// ` WHERE ...` or an empty string.
    pub fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}
