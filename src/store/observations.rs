//! Row mapping and write helpers for the `observations` table.

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::warn;

use super::schema_gen::generate_insert_or_skip;
use super::value::ParsedRow;
use crate::error::Result;
use crate::model::{
    format_timestamp, parse_timestamp, DataProductType, Month, Observation, ObservationRecord,
    ProductKind, SpectrumMetadata,
};
use crate::schema::OBSERVATIONS;

/// Flatten a record into column values.
pub fn to_parsed_row(record: &ObservationRecord) -> ParsedRow {
    let mut row = ParsedRow::default();
    row.set("obs_id", record.obs_id.as_str());
    row.set("target_name", record.target_name.clone());
    row.set("target_classification", record.target_classification.clone());
    row.set("proposal_id", record.proposal_id.clone());
    row.set("pi_name", record.pi_name.clone());
    row.set("description", record.description.clone());
    row.set("wavelength_region", record.wavelength_region.clone());
    row.set("ra", record.ra);
    row.set("dec", record.dec);
    row.set("instrument", record.instrument.clone());
    row.set("filter_name", record.filter_name.clone());
    row.set(
        "observation_date",
        record.observation_date.as_ref().map(format_timestamp),
    );
    row.set("exposure_time", record.exposure_time);
    row.set("dataproduct_type", record.product.product_type().as_str());
    row.set("calib_level", record.calib_level);
    row.set("preview_url", record.preview_url.clone());
    row.set("fits_url", record.fits_url.clone());

    if let ProductKind::Spectrum(meta) = &record.product {
        row.set("spectral_resolution", meta.spectral_resolution);
        row.set("wavelength_min", meta.wavelength_min);
        row.set("wavelength_max", meta.wavelength_max);
        row.set("dispersion_axis", meta.dispersion_axis);
        row.set("grating", meta.grating.clone());
        row.set("slit_width", meta.slit_width);
    }

    row.set("created_at", format_timestamp(&Utc::now()));
    row
}

/// Insert the record unless its `obs_id` is already stored.
/// Returns `true` when a row was written.
pub fn insert_or_skip(conn: &Connection, record: &ObservationRecord) -> Result<bool> {
    let columns = OBSERVATIONS.insert_columns();
    let sql = generate_insert_or_skip(&OBSERVATIONS);
    let mut stmt = conn.prepare_cached(&sql)?;
    let values = to_parsed_row(record).ordered(&columns);
    let changed = stmt.execute(params_from_iter(values.iter()))?;
    Ok(changed == 1)
}

/// Delete every observation whose timestamp falls inside `month`.
pub fn delete_month(conn: &Connection, month: Month) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM observations WHERE observation_date >= ?1 AND observation_date < ?2",
        params![format_timestamp(&month.start()), format_timestamp(&month.end())],
    )?;
    Ok(deleted)
}

pub fn count_month(conn: &Connection, month: Month) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM observations WHERE observation_date >= ?1 AND observation_date < ?2",
        params![format_timestamp(&month.start()), format_timestamp(&month.end())],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

pub fn find_by_obs_id(conn: &Connection, obs_id: &str) -> Result<Option<Observation>> {
    let sql = format!(
        "SELECT {} FROM observations WHERE obs_id = ?1",
        OBSERVATIONS.select_list()
    );
    let obs = conn
        .query_row(&sql, params![obs_id], observation_from_row)
        .optional()?;
    Ok(obs)
}

/// Map a row selected with `OBSERVATIONS.select_list()`.
pub fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<Observation> {
    let obs_id: String = row.get("obs_id")?;
    let product_type: String = row.get("dataproduct_type")?;
    let meta = SpectrumMetadata {
        spectral_resolution: row.get("spectral_resolution")?,
        wavelength_min: row.get("wavelength_min")?,
        wavelength_max: row.get("wavelength_max")?,
        dispersion_axis: row.get("dispersion_axis")?,
        grating: row.get("grating")?,
        slit_width: row.get("slit_width")?,
    };

    let product = match product_type.parse::<DataProductType>() {
        Ok(DataProductType::Spectrum) => ProductKind::Spectrum(meta),
        Ok(DataProductType::Image) => {
            if !meta.is_empty() {
                warn!(obs_id = %obs_id, "image row carries spectrum columns, ignoring them");
            }
            ProductKind::Image
        }
        Err(_) => {
            warn!(obs_id = %obs_id, product_type = %product_type, "unknown product type, reading as image");
            ProductKind::Image
        }
    };

    let observation_date: Option<String> = row.get("observation_date")?;
    let created_at: Option<String> = row.get("created_at")?;

    Ok(Observation {
        id: row.get("id")?,
        created_at: created_at.as_deref().and_then(parse_timestamp),
        record: ObservationRecord {
            obs_id,
            target_name: row.get("target_name")?,
            target_classification: row.get("target_classification")?,
            proposal_id: row.get("proposal_id")?,
            pi_name: row.get("pi_name")?,
            description: row.get("description")?,
            wavelength_region: row.get("wavelength_region")?,
            ra: row.get("ra")?,
            dec: row.get("dec")?,
            instrument: row.get("instrument")?,
            filter_name: row.get("filter_name")?,
            observation_date: observation_date.as_deref().and_then(parse_timestamp),
            exposure_time: row.get("exposure_time")?,
            calib_level: row.get("calib_level")?,
            preview_url: row.get("preview_url")?,
            fits_url: row.get("fits_url")?,
            product,
        },
    })
}
