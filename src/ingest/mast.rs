//! Live archive client for the MAST `invoke` API.

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::source::{ArchiveSource, RawRecord, RecordStream};
use crate::error::{Error, Result};
use crate::model::Month;

const INVOKE_URL: &str = "https://mast.stsci.edu/api/v0/invoke";
const DEFAULT_PAGE_SIZE: u32 = 500;
/// Total attempts per request, the first included.
const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY_MS: u64 = 1000;
const BACKOFF_FACTOR: u64 = 2;

#[derive(Debug, Deserialize)]
struct MastResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Value>,
    paging: Option<MastPaging>,
}

#[derive(Debug, Deserialize)]
struct MastPaging {
    #[serde(rename = "pagesFiltered", default)]
    pages_filtered: u32,
}

/// MAST client configuration.
#[derive(Debug, Clone)]
pub struct MastConfig {
    pub page_size: u32,
    /// Look up each observation's product list to pick public preview and
    /// FITS files. One extra request per observation.
    pub resolve_products: bool,
}

impl Default for MastConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            resolve_products: true,
        }
    }
}

pub struct MastClient {
    client: Client,
    config: MastConfig,
}

impl MastClient {
    pub fn new(config: MastConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("jwst-archive/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::ArchiveFetch(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Public JWST images and spectra whose exposure starts inside `month`.
    fn observation_request(&self, month: Month, page: u32) -> Value {
        let (mjd_start, mjd_end) = month.mjd_range();
        json!({
            "service": "Mast.Caom.Filtered",
            "format": "json",
            "pagesize": self.config.page_size,
            "page": page,
            "params": {
                "columns": "*",
                "filters": [
                    {"paramName": "obs_collection", "values": ["JWST"]},
                    {"paramName": "dataproduct_type", "values": ["image", "spectrum"]},
                    {"paramName": "dataRights", "values": ["PUBLIC"]},
                    {"paramName": "calib_level", "values": [2, 3]},
                    {"paramName": "t_min", "values": [{"min": mjd_start, "max": mjd_end}]}
                ]
            }
        })
    }

    fn products_request(obsid: &str) -> Value {
        json!({
            "service": "Mast.Caom.Products",
            "format": "json",
            "params": {"obsid": obsid}
        })
    }

    fn invoke(&self, request: &Value) -> Result<MastResponse> {
        let body = request.to_string();
        let response = self.send_with_retries(|| {
            self.client
                .post(INVOKE_URL)
                .form(&[("request", body.as_str())])
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(Error::ArchiveFetch(format!("MAST returned {}: {}", status, message)));
        }

        let parsed: MastResponse = response
            .json()
            .map_err(|e| Error::ArchiveFetch(format!("malformed MAST response: {}", e)))?;
        if parsed.status.eq_ignore_ascii_case("ERROR") {
            return Err(Error::ArchiveFetch(format!("MAST error: {}", parsed.msg)));
        }
        Ok(parsed)
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 1u32;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_ATTEMPTS && is_retryable_status(status) {
                        let delay = retry_delay(attempt);
                        warn!(status, attempt, delay_ms = delay.as_millis() as u64, "MAST request failed, retrying");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_ATTEMPTS && is_retryable_error(&err) {
                        let delay = retry_delay(attempt);
                        warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "MAST request failed, retrying");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(Error::ArchiveFetch(err.to_string()));
                }
            }
        }
    }

    fn fetch_products(&self, fields: &Map<String, Value>) -> Result<Vec<Map<String, Value>>> {
        let Some(obsid) = fields.get("obsid").and_then(value_as_string) else {
            return Ok(Vec::new());
        };
        let response = self.invoke(&Self::products_request(&obsid))?;
        Ok(response
            .data
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }
}

impl ArchiveSource for MastClient {
    fn fetch_month(&self, month: Month) -> Result<RecordStream<'_>> {
        // Fetch the first page eagerly so an unreachable archive fails the
        // month before any record is processed.
        let first = self.invoke(&self.observation_request(month, 1))?;
        let pages = first.paging.as_ref().map(|p| p.pages_filtered).unwrap_or(1).max(1);
        debug!(month = %month, pages, "MAST month query");

        Ok(Box::new(MastPages {
            client: self,
            month,
            next_page: 2,
            pages,
            buffer: first.data.into(),
        }))
    }
}

/// Walks the result pages of one month lazily.
struct MastPages<'a> {
    client: &'a MastClient,
    month: Month,
    next_page: u32,
    pages: u32,
    buffer: VecDeque<Value>,
}

impl Iterator for MastPages<'_> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() {
            if self.next_page > self.pages {
                return None;
            }
            let request = self.client.observation_request(self.month, self.next_page);
            self.next_page += 1;
            match self.client.invoke(&request) {
                Ok(page) => self.buffer = page.data.into(),
                Err(e) => {
                    // Stop after reporting the failure
                    self.next_page = self.pages + 1;
                    return Some(Err(e));
                }
            }
        }

        let record = RawRecord::from_json(self.buffer.pop_front()?);
        if !self.client.config.resolve_products {
            return Some(Ok(record));
        }
        Some(
            self.client
                .fetch_products(&record.fields)
                .map(|products| record.with_products(products)),
        )
    }
}

fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Wait before retry number `attempt` (1-based): 1s, 2s, 4s, 8s.
fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_DELAY_MS * BACKOFF_FACTOR.pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_request_filters_month() {
        let client = MastClient::new(MastConfig::default()).unwrap();
        let month: Month = "2022-07".parse().unwrap();
        let request = client.observation_request(month, 3);

        assert_eq!(request["service"], "Mast.Caom.Filtered");
        assert_eq!(request["page"], 3);
        let filters = request["params"]["filters"].as_array().unwrap();
        let t_min = filters.iter().find(|f| f["paramName"] == "t_min").unwrap();
        let (start, end) = month.mjd_range();
        assert_eq!(t_min["values"][0]["min"].as_f64().unwrap(), start);
        assert_eq!(t_min["values"][0]["max"].as_f64().unwrap(), end);
    }

    #[test]
    fn test_products_request_uses_obsid() {
        let request = MastClient::products_request("87602312");
        assert_eq!(request["params"]["obsid"], "87602312");
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"status": "COMPLETE", "msg": "", "data": [{"obs_id": "jw1"}],
                       "paging": {"page": 1, "pageSize": 500, "pagesFiltered": 4, "rows": 1}}"#;
        let parsed: MastResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.paging.unwrap().pages_filtered, 4);
    }

    #[test]
    fn test_value_as_string() {
        assert_eq!(value_as_string(&json!(123)), Some("123".to_string()));
        assert_eq!(value_as_string(&json!("abc")), Some("abc".to_string()));
        assert_eq!(value_as_string(&json!("")), None);
    }

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn test_retry_delay_doubles() {
        let delays: Vec<u64> = (1..MAX_ATTEMPTS).map(|a| retry_delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }
}
