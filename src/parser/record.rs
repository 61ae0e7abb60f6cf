//! Normalization of raw archive rows into observation records.

use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

use crate::ingest::source::RawRecord;
use crate::model::{
    mjd_to_datetime, parse_timestamp, DataProductType, ObservationRecord, ProductKind,
    SpectrumMetadata,
};

const MAST_DOWNLOAD_URL: &str = "https://mast.stsci.edu/api/v0.1/Download/file?uri=";
const NM_PER_MICRON: f64 = 1000.0;

/// Outcome of normalizing one raw row
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Record(Box<ObservationRecord>),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingObsId,
    UnsupportedProductType(String),
    NoPublicProducts,
    Invalid(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingObsId => write!(f, "missing obs_id"),
            SkipReason::UnsupportedProductType(t) => write!(f, "unsupported product type '{}'", t),
            SkipReason::NoPublicProducts => write!(f, "no public products"),
            SkipReason::Invalid(msg) => write!(f, "invalid record: {}", msg),
        }
    }
}

/// Map an archive row onto the observation schema.
pub fn normalize_record(raw: &RawRecord) -> Normalized {
    let Some(obs_id) = text(&raw.fields, &["obs_id", "obsid"]) else {
        return Normalized::Skipped(SkipReason::MissingObsId);
    };

    let product_type = match text(&raw.fields, &["dataproduct_type"]) {
        Some(t) => match t.parse::<DataProductType>() {
            Ok(kind) => kind,
            Err(_) => return Normalized::Skipped(SkipReason::UnsupportedProductType(t)),
        },
        None => return Normalized::Skipped(SkipReason::UnsupportedProductType(String::new())),
    };

    let public = match &raw.products {
        Some(products) => {
            let public = public_products(products);
            if public.is_empty() {
                return Normalized::Skipped(SkipReason::NoPublicProducts);
            }
            public
        }
        None => Vec::new(),
    };

    let filters = text(&raw.fields, &["filters", "filter_name"]);
    let (filter_name, product) = match product_type {
        DataProductType::Image => (filters, ProductKind::Image),
        DataProductType::Spectrum => {
            let (filter_name, disperser) = split_filters(filters.as_deref());
            let meta = spectrum_metadata(&obs_id, &raw.fields, disperser);
            (filter_name, ProductKind::Spectrum(meta))
        }
    };

    let mut record = ObservationRecord::new(obs_id, product);
    record.target_name = text(&raw.fields, &["target_name"]);
    record.target_classification = text(&raw.fields, &["target_classification"]);
    record.proposal_id = text(&raw.fields, &["proposal_id"]);
    record.pi_name = text(&raw.fields, &["proposal_pi", "pi_name"]);
    record.description = text(&raw.fields, &["obs_title", "description"]);
    record.wavelength_region = text(&raw.fields, &["wavelength_region"]);
    record.ra = number(&raw.fields, &["s_ra", "ra"]);
    record.dec = number(&raw.fields, &["s_dec", "dec"]);
    record.instrument = text(&raw.fields, &["instrument_name", "instrument"]);
    record.filter_name = filter_name;
    record.observation_date = number(&raw.fields, &["t_min"])
        .and_then(mjd_to_datetime)
        .or_else(|| text(&raw.fields, &["observation_date"]).and_then(|s| parse_timestamp(&s)));
    record.exposure_time = number(&raw.fields, &["t_exptime", "exposure_time"]).filter(|t| {
        let ok = *t >= 0.0;
        if !ok {
            warn!(obs_id = %record.obs_id, exposure = t, "negative exposure time dropped");
        }
        ok
    });
    record.calib_level = number(&raw.fields, &["calib_level"]).map(|v| v as i64);
    record.preview_url = pick_preview(&public).or_else(|| text(&raw.fields, &["jpegURL"]).map(to_http_url));
    record.fits_url = pick_fits(&public).or_else(|| text(&raw.fields, &["dataURL"]).map(to_http_url));

    match record.validate() {
        Ok(()) => Normalized::Record(Box::new(record)),
        Err(e) => Normalized::Skipped(SkipReason::Invalid(e.to_string())),
    }
}

fn spectrum_metadata(obs_id: &str, fields: &Map<String, Value>, disperser: Option<String>) -> SpectrumMetadata {
    let mut meta = SpectrumMetadata {
        spectral_resolution: number(fields, &["spectral_resolution", "em_res_power"]),
        wavelength_min: number(fields, &["wavelength_min"])
            .or_else(|| number(fields, &["em_min"]).map(|nm| nm / NM_PER_MICRON)),
        wavelength_max: number(fields, &["wavelength_max"])
            .or_else(|| number(fields, &["em_max"]).map(|nm| nm / NM_PER_MICRON)),
        dispersion_axis: number(fields, &["dispersion_axis"]).map(|v| v as i64),
        grating: text(fields, &["grating"]).or(disperser),
        slit_width: number(fields, &["slit_width"]),
    };

    if matches!(meta.spectral_resolution, Some(r) if r <= 0.0) {
        warn!(obs_id, resolution = ?meta.spectral_resolution, "non-positive spectral resolution dropped");
        meta.spectral_resolution = None;
    }
    if let (Some(min), Some(max)) = (meta.wavelength_min, meta.wavelength_max) {
        if min > max {
            warn!(obs_id, min, max, "inverted wavelength range dropped");
            meta.wavelength_min = None;
            meta.wavelength_max = None;
        }
    }
    meta
}

/// Split a `;`-joined optical element list into (filters, disperser).
fn split_filters(filters: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(filters) = filters else {
        return (None, None);
    };
    let (dispersers, rest): (Vec<&str>, Vec<&str>) = filters
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .partition(|t| is_disperser(t));

    let join = |tokens: Vec<&str>| (!tokens.is_empty()).then(|| tokens.join(";"));
    (join(rest), join(dispersers))
}

fn is_disperser(token: &str) -> bool {
    let upper = token.to_ascii_uppercase();
    if upper == "PRISM" || upper == "P750L" {
        return true;
    }
    upper
        .strip_prefix('G')
        .and_then(|r| r.chars().next())
        .is_some_and(|c| c.is_ascii_digit() || c == 'R')
}

fn public_products(products: &[Map<String, Value>]) -> Vec<&Map<String, Value>> {
    products
        .iter()
        .filter(|p| {
            text(p, &["dataRights"]).is_some_and(|r| r.eq_ignore_ascii_case("PUBLIC"))
        })
        .collect()
}

/// Preview image: explicit PREVIEW product, then a jpg/png, then anything
/// image-like.
fn pick_preview(products: &[&Map<String, Value>]) -> Option<String> {
    let filename = |p: &Map<String, Value>| {
        text(p, &["productFilename"]).map(|f| f.to_ascii_lowercase()).unwrap_or_default()
    };

    first_uri(products, |p| {
        text(p, &["productType"]).is_some_and(|t| t.eq_ignore_ascii_case("PREVIEW"))
    })
    .or_else(|| {
        first_uri(products, |p| {
            let name = filename(p);
            [".jpg", ".jpeg", ".png"].iter().any(|ext| name.ends_with(ext))
        })
    })
    .or_else(|| {
        first_uri(products, |p| {
            let name = filename(p);
            [".jpg", ".jpeg", ".png", ".tif"].iter().any(|ext| name.contains(ext))
        })
    })
}

fn pick_fits(products: &[&Map<String, Value>]) -> Option<String> {
    first_uri(products, |p| {
        text(p, &["productFilename"]).is_some_and(|f| f.to_ascii_lowercase().ends_with(".fits"))
    })
}

fn first_uri<F>(products: &[&Map<String, Value>], pred: F) -> Option<String>
where
    F: Fn(&Map<String, Value>) -> bool,
{
    products
        .iter()
        .copied()
        .find(|p| pred(*p))
        .and_then(|p| text(p, &["dataURI"]))
        .map(to_http_url)
}

/// `mast:` URIs become download URLs; anything else passes through.
pub fn to_http_url(uri: String) -> String {
    if uri.starts_with("mast:") {
        format!("{}{}", MAST_DOWNLOAD_URL, uri)
    } else {
        uri
    }
}

/// First non-empty string for any of `keys`. Numbers are stringified.
fn text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match fields.get(*key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First finite number for any of `keys`; numeric strings are accepted.
fn number(fields: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| {
        let v = match fields.get(*key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        v.is_finite().then_some(v)
    })
}
