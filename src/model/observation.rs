use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::month::format_timestamp;

/// Archive data product classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataProductType {
    Image,
    Spectrum,
}

impl DataProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataProductType::Image => "image",
            DataProductType::Spectrum => "spectrum",
        }
    }
}

impl fmt::Display for DataProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataProductType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(DataProductType::Image),
            "spectrum" => Ok(DataProductType::Spectrum),
            other => Err(Error::validation(
                "dataproduct_type",
                format!("unknown value '{}', expected 'image' or 'spectrum'", other),
            )),
        }
    }
}

/// Fields only meaningful for spectra.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumMetadata {
    /// R = λ/Δλ
    pub spectral_resolution: Option<f64>,
    /// Microns
    pub wavelength_min: Option<f64>,
    /// Microns
    pub wavelength_max: Option<f64>,
    pub dispersion_axis: Option<i64>,
    pub grating: Option<String>,
    /// Arcseconds
    pub slit_width: Option<f64>,
}

impl SpectrumMetadata {
    pub fn is_empty(&self) -> bool {
        *self == SpectrumMetadata::default()
    }
}

/// Image and spectrum rows share one table; the variant carries the
/// spectrum-only columns so an image can never hold them.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductKind {
    Image,
    Spectrum(SpectrumMetadata),
}

impl ProductKind {
    pub fn product_type(&self) -> DataProductType {
        match self {
            ProductKind::Image => DataProductType::Image,
            ProductKind::Spectrum(_) => DataProductType::Spectrum,
        }
    }

    pub fn spectrum(&self) -> Option<&SpectrumMetadata> {
        match self {
            ProductKind::Image => None,
            ProductKind::Spectrum(meta) => Some(meta),
        }
    }
}

/// A normalized observation ready for insertion (no surrogate id yet).
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub obs_id: String,
    pub target_name: Option<String>,
    pub target_classification: Option<String>,
    pub proposal_id: Option<String>,
    pub pi_name: Option<String>,
    pub description: Option<String>,
    pub wavelength_region: Option<String>,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub instrument: Option<String>,
    pub filter_name: Option<String>,
    pub observation_date: Option<DateTime<Utc>>,
    /// Seconds
    pub exposure_time: Option<f64>,
    pub calib_level: Option<i64>,
    pub preview_url: Option<String>,
    pub fits_url: Option<String>,
    pub product: ProductKind,
}

impl ObservationRecord {
    pub fn new(obs_id: impl Into<String>, product: ProductKind) -> Self {
        Self {
            obs_id: obs_id.into(),
            target_name: None,
            target_classification: None,
            proposal_id: None,
            pi_name: None,
            description: None,
            wavelength_region: None,
            ra: None,
            dec: None,
            instrument: None,
            filter_name: None,
            observation_date: None,
            exposure_time: None,
            calib_level: None,
            preview_url: None,
            fits_url: None,
            product,
        }
    }

    /// Check the write-side invariants, rejecting records that cannot be
    /// placed on the sky.
    pub fn validate(&self) -> Result<()> {
        if self.obs_id.trim().is_empty() {
            return Err(Error::validation("obs_id", "must not be empty"));
        }
        if let Some(ra) = self.ra {
            if !(0.0..=360.0).contains(&ra) {
                return Err(Error::validation("ra", format!("{} is outside [0, 360]", ra)));
            }
        }
        if let Some(dec) = self.dec {
            if !(-90.0..=90.0).contains(&dec) {
                return Err(Error::validation("dec", format!("{} is outside [-90, 90]", dec)));
            }
        }
        if let ProductKind::Spectrum(meta) = &self.product {
            if let (Some(min), Some(max)) = (meta.wavelength_min, meta.wavelength_max) {
                if min > max {
                    return Err(Error::validation(
                        "wavelength_min",
                        format!("{} is greater than wavelength_max {}", min, max),
                    ));
                }
            }
            if matches!(meta.spectral_resolution, Some(r) if r <= 0.0) {
                return Err(Error::validation("spectral_resolution", "must be positive"));
            }
        }
        if matches!(self.exposure_time, Some(t) if t < 0.0) {
            return Err(Error::validation("exposure_time", "must not be negative"));
        }
        Ok(())
    }
}

/// A stored observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub record: ObservationRecord,
}

impl std::ops::Deref for Observation {
    type Target = ObservationRecord;

    fn deref(&self) -> &ObservationRecord {
        &self.record
    }
}

#[derive(Serialize)]
struct CoordinatesJson {
    ra: Option<f64>,
    dec: Option<f64>,
}

#[derive(Serialize)]
struct WavelengthRangeJson {
    min: Option<f64>,
    max: Option<f64>,
    unit: &'static str,
}

#[derive(Serialize)]
struct SpectrumJson<'a> {
    spectral_resolution: Option<f64>,
    wavelength_range: Option<WavelengthRangeJson>,
    dispersion_axis: Option<i64>,
    grating: Option<&'a str>,
    slit_width: Option<f64>,
}

#[derive(Serialize)]
struct ObservationJson<'a> {
    id: i64,
    obs_id: &'a str,
    target_name: Option<&'a str>,
    coordinates: CoordinatesJson,
    instrument: Option<&'a str>,
    filter: Option<&'a str>,
    observation_date: Option<String>,
    preview_url: Option<&'a str>,
    fits_url: Option<&'a str>,
    description: Option<&'a str>,
    proposal_id: Option<&'a str>,
    exposure_time: Option<f64>,
    dataproduct_type: DataProductType,
    calib_level: Option<i64>,
    wavelength_region: Option<&'a str>,
    pi_name: Option<&'a str>,
    target_classification: Option<&'a str>,
    created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spectrum_metadata: Option<SpectrumJson<'a>>,
}

impl Serialize for Observation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let r = &self.record;
        let spectrum_metadata = r.product.spectrum().map(|meta| SpectrumJson {
            spectral_resolution: meta.spectral_resolution,
            wavelength_range: (meta.wavelength_min.is_some() || meta.wavelength_max.is_some())
                .then(|| WavelengthRangeJson {
                    min: meta.wavelength_min,
                    max: meta.wavelength_max,
                    unit: "microns",
                }),
            dispersion_axis: meta.dispersion_axis,
            grating: meta.grating.as_deref(),
            slit_width: meta.slit_width,
        });

        ObservationJson {
            id: self.id,
            obs_id: &r.obs_id,
            target_name: r.target_name.as_deref(),
            coordinates: CoordinatesJson { ra: r.ra, dec: r.dec },
            instrument: r.instrument.as_deref(),
            filter: r.filter_name.as_deref(),
            observation_date: r.observation_date.as_ref().map(format_timestamp),
            preview_url: r.preview_url.as_deref(),
            fits_url: r.fits_url.as_deref(),
            description: r.description.as_deref(),
            proposal_id: r.proposal_id.as_deref(),
            exposure_time: r.exposure_time,
            dataproduct_type: r.product.product_type(),
            calib_level: r.calib_level,
            wavelength_region: r.wavelength_region.as_deref(),
            pi_name: r.pi_name.as_deref(),
            target_classification: r.target_classification.as_deref(),
            created_at: self.created_at.as_ref().map(format_timestamp),
            spectrum_metadata,
        }
        .serialize(serializer)
    }
}
