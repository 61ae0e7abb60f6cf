//! Table schema definitions for the observation store

use super::types::*;

// =============================================================================
// Observations
// =============================================================================

/// One row per archive data product. Image and spectrum rows share the table;
/// spectrum-only columns stay NULL for images.
pub static OBSERVATIONS: TableSchema = TableSchema {
    name: "observations",
    columns: &[
        Column::key("id", ColumnType::Integer),
        Column::required("obs_id", ColumnType::Text),
        Column::new("target_name", ColumnType::Text),
        Column::new("target_classification", ColumnType::Text),
        Column::new("proposal_id", ColumnType::Text),
        Column::new("pi_name", ColumnType::Text),
        Column::new("description", ColumnType::Text),
        Column::new("wavelength_region", ColumnType::Text),
        Column::new("ra", ColumnType::Real),
        Column::new("dec", ColumnType::Real),
        Column::new("instrument", ColumnType::Text),
        Column::new("filter_name", ColumnType::Text),
        Column::new("observation_date", ColumnType::Timestamp),
        Column::new("exposure_time", ColumnType::Real),
        Column::required("dataproduct_type", ColumnType::Text),
        Column::new("calib_level", ColumnType::Integer),
        Column::new("preview_url", ColumnType::Text),
        Column::new("fits_url", ColumnType::Text),
        // Spectrum-only
        Column::new("spectral_resolution", ColumnType::Real),
        Column::new("wavelength_min", ColumnType::Real),
        Column::new("wavelength_max", ColumnType::Real),
        Column::new("dispersion_axis", ColumnType::Integer),
        Column::new("grating", ColumnType::Text),
        Column::new("slit_width", ColumnType::Real),
        Column::required("created_at", ColumnType::Timestamp),
    ],
    indexes: &[
        Index::unique(&["obs_id"]),
        Index::on(&["target_name"]),
        Index::on(&["instrument"]),
        Index::on(&["filter_name"]),
        Index::on(&["observation_date"]),
        Index::on(&["proposal_id"]),
        Index::on(&["dataproduct_type"]),
        Index::on(&["grating"]),
        Index::on(&["dec"]),
    ],
};

// =============================================================================
// Ingestion ledger
// =============================================================================

/// One row per calendar month attempted by the backfill job.
pub static INGESTION_PROGRESS: TableSchema = TableSchema {
    name: "ingestion_progress",
    columns: &[
        Column::key("month", ColumnType::Text),
        Column::required("status", ColumnType::Text),
        Column::required("records_fetched", ColumnType::Integer),
        Column::required("records_inserted", ColumnType::Integer),
        Column::required("records_skipped", ColumnType::Integer),
        Column::new("error", ColumnType::Text),
        Column::new("started_at", ColumnType::Timestamp),
        Column::new("completed_at", ColumnType::Timestamp),
        Column::required("updated_at", ColumnType::Timestamp),
    ],
    indexes: &[Index::on(&["status"])],
};

// =============================================================================
// Schema Registry
// =============================================================================

pub static ALL_TABLES: &[&TableSchema] = &[&OBSERVATIONS, &INGESTION_PROGRESS];

/// Get all table names
pub fn table_names() -> Vec<&'static str> {
    ALL_TABLES.iter().map(|t| t.name).collect()
}
