//! Request routing for the read-only observation API.
//!
//! Transport is left to the caller: a path plus query parameters go in, a
//! JSON body or an [`Error`] with [`Error::status_code`] comes out.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::DataProductType;
use crate::query::{
    Aggregator, Dimension, ObservationFilter, ObservationQuery, Page, PageBounds, ProductScope,
    QueryParams, SortOrder,
};
use crate::store::Store;

pub const API_NAME: &str = "JWST Archive API";

/// A resolved endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Index,
    Health,
    Observations,
    Images,
    Spectra,
    Latest,
    Random,
    Search,
    SearchCoordinates,
    SearchDate,
    Observation(String),
    Discovery(Dimension),
    Proposal(String),
    Statistics,
}

impl Route {
    /// Match a request path. Fixed `/observations/...` routes win over the
    /// `{obs_id}` lookup.
    pub fn parse(path: &str) -> Result<Self> {
        let path = path.split('?').next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let route = match segments.as_slice() {
            [] => Route::Index,
            ["health"] => Route::Health,
            ["statistics"] => Route::Statistics,
            ["observations"] => Route::Observations,
            ["observations", "images"] => Route::Images,
            ["observations", "spectra"] => Route::Spectra,
            ["observations", "latest"] => Route::Latest,
            ["observations", "random"] => Route::Random,
            ["observations", "search"] => Route::Search,
            ["observations", "search", "coordinates"] => Route::SearchCoordinates,
            ["observations", "search", "date"] => Route::SearchDate,
            ["observations", obs_id] => Route::Observation(obs_id.to_string()),
            ["proposals", proposal_id] => Route::Proposal(proposal_id.to_string()),
            [name] => match name.parse::<Dimension>() {
                Ok(dimension) if dimension.plural() == *name => Route::Discovery(dimension),
                _ => return Err(Error::NotFound(format!("route '{}'", path))),
            },
            _ => return Err(Error::NotFound(format!("route '{}'", path))),
        };
        Ok(route)
    }
}

/// Serve one request against `store`.
pub fn handle(store: &Store, path: &str, params: &QueryParams) -> Result<Value> {
    let route = Route::parse(path)?;
    debug!(?route, "api request");
    dispatch(store, route, params)
}

fn dispatch(store: &Store, route: Route, params: &QueryParams) -> Result<Value> {
    let query = ObservationQuery::new(store);
    let now = Utc::now();

    let page_of = |scope, bounds, order| -> Result<Value> {
        let filter = ObservationFilter::from_params(params, scope, now)?;
        let page = Page::from_params(params, bounds)?;
        Ok(serde_json::to_value(query.search(&filter, page, order)?)?)
    };

    match route {
        Route::Index => Ok(index()),
        Route::Health => {
            store.health()?;
            Ok(json!({"status": "healthy", "database": "connected"}))
        }
        Route::Observations | Route::Search => {
            page_of(ProductScope::Any, PageBounds::OBSERVATIONS, SortOrder::Newest)
        }
        Route::Images => page_of(
            ProductScope::Only(DataProductType::Image),
            PageBounds::OBSERVATIONS,
            SortOrder::Newest,
        ),
        Route::Spectra => page_of(
            ProductScope::Only(DataProductType::Spectrum),
            PageBounds::OBSERVATIONS,
            SortOrder::Newest,
        ),
        Route::Latest => page_of(ProductScope::Any, PageBounds::LATEST, SortOrder::Newest),
        Route::Random => {
            let filter = ObservationFilter::from_params(params, ProductScope::Any, now)?;
            if filter.is_empty() && query.is_empty()? {
                return Err(Error::NotFound("observations".into()));
            }
            let page = Page::from_params(params, PageBounds::RANDOM)?;
            // A random sample has no stable offset
            let page = Page::new(page.limit, 0);
            Ok(serde_json::to_value(query.search(&filter, page, SortOrder::Random)?)?)
        }
        Route::SearchCoordinates => {
            for name in ["ra", "dec", "radius"] {
                if !params.contains(name) {
                    return Err(Error::validation(name, "is required"));
                }
            }
            page_of(ProductScope::Any, PageBounds::OBSERVATIONS, SortOrder::Newest)
        }
        Route::SearchDate => {
            if !["start_date", "end_date", "days_ago"].iter().any(|n| params.contains(n)) {
                return Err(Error::validation(
                    "start_date",
                    "one of start_date, end_date or days_ago is required",
                ));
            }
            page_of(ProductScope::Any, PageBounds::OBSERVATIONS, SortOrder::Newest)
        }
        Route::Observation(obs_id) => Ok(serde_json::to_value(query.get(&obs_id)?)?),
        Route::Proposal(proposal_id) => {
            let page = Page::from_params(params, PageBounds::OBSERVATIONS)?;
            let result = query.by_proposal(&proposal_id, page)?;
            let mut body = serde_json::to_value(result)?;
            body["proposal_id"] = Value::String(proposal_id);
            Ok(body)
        }
        Route::Discovery(dimension) => {
            let page = Page::from_params(params, PageBounds::DISCOVERY)?;
            let counts = Aggregator::new(store).counts(dimension, Some(page.limit))?;
            let mut body = json!({"total": counts.len()});
            body[dimension.plural()] = serde_json::to_value(counts)?;
            Ok(body)
        }
        Route::Statistics => Ok(serde_json::to_value(Aggregator::new(store).statistics()?)?),
    }
}

fn index() -> Value {
    json!({
        "name": API_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Read-only access to public JWST image and spectrum observations",
        "endpoints": {
            "observations": "/observations",
            "images": "/observations/images",
            "spectra": "/observations/spectra",
            "latest": "/observations/latest",
            "random": "/observations/random",
            "search": "/observations/search",
            "coordinates": "/observations/search/coordinates",
            "date": "/observations/search/date",
            "instruments": "/instruments",
            "filters": "/filters",
            "gratings": "/gratings",
            "targets": "/targets",
            "proposals": "/proposals",
            "statistics": "/statistics",
            "health": "/health"
        }
    })
}

/// JSON body for a failed request.
pub fn error_body(err: &Error) -> Value {
    let mut body = json!({
        "status": err.status_code(),
        "detail": err.to_string(),
    });
    if let Error::Validation { param, .. } = err {
        body["param"] = Value::String(param.clone());
    }
    body
}
