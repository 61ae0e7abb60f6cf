//! Loosely typed request parameters and their validated forms.

use chrono::{DateTime, NaiveDate, Utc};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::parse_timestamp;

/// Raw `key=value` request parameters, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    /// Last non-blank value for the first matching name.
    pub fn get(&self, names: &[&str]) -> Option<(&str, &str)> {
        names.iter().find_map(|name| {
            self.pairs
                .iter()
                .rev()
                .find(|(k, v)| k == name && !v.trim().is_empty())
                .map(|(k, v)| (k.as_str(), v.trim()))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(&[name]).is_some()
    }

    pub fn string(&self, names: &[&str]) -> Option<String> {
        self.get(names).map(|(_, v)| v.to_string())
    }

    pub fn parsed<T: FromStr>(&self, names: &[&str], expected: &str) -> Result<Option<T>> {
        match self.get(names) {
            None => Ok(None),
            Some((name, value)) => value
                .parse::<T>()
                .map(Some)
                .map_err(|_| Error::validation(name, format!("expected {}, got '{}'", expected, value))),
        }
    }

    pub fn float(&self, names: &[&str]) -> Result<Option<f64>> {
        match self.parsed::<f64>(names, "a number")? {
            Some(v) if !v.is_finite() => Err(Error::validation(names[0], "must be a finite number")),
            other => Ok(other),
        }
    }

    pub fn integer(&self, names: &[&str]) -> Result<Option<i64>> {
        self.parsed::<i64>(names, "an integer")
    }
}

/// Parse a `&`-joined query string such as `ra=10&dec=-3&radius=1`.
impl FromStr for QueryParams {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut params = QueryParams::new();
        for part in s.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| Error::validation(part, "expected key=value"))?;
            params.pairs.push((k.to_string(), v.to_string()));
        }
        Ok(params)
    }
}

impl Extend<(String, String)> for QueryParams {
    fn extend<I: IntoIterator<Item = (String, String)>>(&mut self, iter: I) {
        self.pairs.extend(iter);
    }
}

/// Paging limits for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBounds {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl PageBounds {
    pub const OBSERVATIONS: PageBounds = PageBounds { default_limit: 10, max_limit: 100 };
    pub const LATEST: PageBounds = PageBounds { default_limit: 10, max_limit: 50 };
    pub const RANDOM: PageBounds = PageBounds { default_limit: 1, max_limit: 50 };
    pub const DISCOVERY: PageBounds = PageBounds { default_limit: 100, max_limit: 500 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u64,
}

impl Page {
    pub fn new(limit: u32, offset: u64) -> Self {
        Self { limit, offset }
    }

    /// `limit` below 1 is rejected, above the endpoint maximum it is clamped.
    pub fn from_params(params: &QueryParams, bounds: PageBounds) -> Result<Self> {
        let limit = match params.integer(&["limit"])? {
            None => bounds.default_limit,
            Some(l) if l < 1 => return Err(Error::validation("limit", "must be at least 1")),
            Some(l) => l.min(i64::from(bounds.max_limit)) as u32,
        };
        let offset = match params.integer(&["offset", "skip"])? {
            None => 0,
            Some(o) if o < 0 => return Err(Error::validation("offset", "must not be negative")),
            Some(o) => o as u64,
        };
        Ok(Self { limit, offset })
    }
}

/// Parse a date bound: `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub enum DateInput {
    Day(NaiveDate),
    Instant(DateTime<Utc>),
}

pub fn parse_date(param: &str, value: &str) -> Result<DateInput> {
    if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(DateInput::Day(day));
    }
    parse_timestamp(value).map(DateInput::Instant).ok_or_else(|| {
        Error::validation(param, format!("expected YYYY-MM-DD or RFC 3339, got '{}'", value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_pairs() {
        let params: QueryParams = "ra=10.5&dec=-3&limit=5".parse().unwrap();
        assert_eq!(params.float(&["ra"]).unwrap(), Some(10.5));
        assert_eq!(params.integer(&["limit"]).unwrap(), Some(5));
        assert!(params.get(&["radius"]).is_none());

        let err = "ra=10&north".parse::<QueryParams>().unwrap_err();
        assert!(matches!(err, Error::Validation { ref param, .. } if param == "north"));
    }

    #[test]
    fn test_extend_later_pairs_win() {
        let mut params: QueryParams = "limit=5".parse().unwrap();
        params.extend([("limit".to_string(), "7".to_string())]);
        assert_eq!(params.integer(&["limit"]).unwrap(), Some(7));
    }

    #[test]
    fn test_non_numeric_names_parameter() {
        let params = QueryParams::new().with("ra", "north");
        let err = params.float(&["ra"]).unwrap_err();
        assert!(matches!(err, Error::Validation { ref param, .. } if param == "ra"));
    }

    #[test]
    fn test_aliases_and_blank_values() {
        let params = QueryParams::new().with("skip", "20").with("filter", " ");
        assert_eq!(params.integer(&["offset", "skip"]).unwrap(), Some(20));
        assert!(params.get(&["filter_name", "filter"]).is_none());
    }

    #[test]
    fn test_page_defaults_and_clamp() {
        let page = Page::from_params(&QueryParams::new(), PageBounds::OBSERVATIONS).unwrap();
        assert_eq!(page, Page::new(10, 0));

        let params = QueryParams::new().with("limit", "1000").with("offset", "10");
        let page = Page::from_params(&params, PageBounds::OBSERVATIONS).unwrap();
        assert_eq!(page, Page::new(100, 10));
    }

    #[test]
    fn test_page_rejects_zero_limit_and_negative_offset() {
        let params = QueryParams::new().with("limit", "0");
        assert!(Page::from_params(&params, PageBounds::OBSERVATIONS).is_err());
        let params = QueryParams::new().with("offset", "-1");
        assert!(Page::from_params(&params, PageBounds::OBSERVATIONS).is_err());
    }

    #[test]
    fn test_parse_date_forms() {
        assert!(matches!(parse_date("start_date", "2023-05-01").unwrap(), DateInput::Day(_)));
        assert!(matches!(
            parse_date("start_date", "2023-05-01T12:00:00Z").unwrap(),
            DateInput::Instant(_)
        ));
        assert!(parse_date("start_date", "May 1st").is_err());
    }
}
