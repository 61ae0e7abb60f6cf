//! End-to-end tests: archive exports are ingested into a temporary SQLite
//! store, then queried through the API layer.
//!
//! The read-only checks share one fixture database built from JSONL exports.
//! Tests that mutate the store build their own.

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tempfile::{NamedTempFile, TempDir};

use jwst_archive::api::handle;
use jwst_archive::error::{Error, Result};
use jwst_archive::ingest::{
    ArchiveSource, IngestionJob, JobOutcome, JsonlSource, NextMonth, RawRecord, RecordStream, Tracker,
};
use jwst_archive::model::{IngestionStatus, Month};
use jwst_archive::query::{ConeSearch, QueryParams};
use jwst_archive::store::observations::count_month;
use jwst_archive::store::Store;
use jwst_archive::ui::SilentUi;

// =============================================================================
// Test Configuration
// =============================================================================

/// Random seed for reproducible coordinates and cone centers
const RANDOM_SEED: u64 = 42;

const IMAGE_COUNT: usize = 25;
const SPECTRUM_COUNT: usize = 3;

fn month(s: &str) -> Month {
    s.parse().unwrap()
}

fn params(pairs: &[(&str, &str)]) -> QueryParams {
    QueryParams::from_pairs(pairs.iter().copied())
}

fn write_export(dir: &Path, month: &str, rows: &[Value]) {
    let body: String = rows.iter().map(|r| format!("{}\n", r)).collect();
    fs::write(dir.join(format!("{}.jsonl", month)), body).unwrap();
}

fn image_row(i: usize, ra: f64, dec: f64) -> Value {
    let instrument = ["NIRCAM/IMAGE", "MIRI/IMAGE", "NIRISS/IMAGE"][i % 3];
    json!({
        "obs_id": format!("img-{:02}", i),
        "dataproduct_type": "image",
        "target_name": if i % 2 == 0 { "NGC 3132" } else { "Carina Nebula" },
        "instrument_name": instrument,
        "filters": "F200W",
        "s_ra": ra,
        "s_dec": dec,
        "observation_date": format!("2022-07-{:02}T12:00:00Z", i + 1),
        "t_exptime": 100.0,
        "calib_level": 3,
        "proposal_id": if i % 5 == 0 { "2736" } else { "1345" },
    })
}

fn spectrum_rows() -> Vec<Value> {
    vec![
        json!({
            "obs_id": "spec-a",
            "dataproduct_type": "spectrum",
            "instrument_name": "NIRSPEC/SLIT",
            "filters": "F170LP;G235M",
            "s_ra": 359.9,
            "s_dec": 0.0,
            "wavelength_min": 1.0,
            "wavelength_max": 3.0,
            "spectral_resolution": 1000.0,
            "observation_date": "2022-08-05T00:00:00Z",
            "t_exptime": 50.0,
        }),
        json!({
            "obs_id": "spec-b",
            "dataproduct_type": "spectrum",
            "instrument_name": "NIRSPEC/MSA",
            "filters": "CLEAR;PRISM",
            "s_ra": 0.0,
            "s_dec": 0.0,
            "em_min": 600.0,
            "em_max": 5300.0,
            "em_res_power": 100.0,
            "observation_date": "2022-08-06T00:00:00Z",
        }),
        json!({
            "obs_id": "spec-c",
            "dataproduct_type": "spectrum",
            "instrument_name": "MIRI/IFU",
            "wavelength_min": 10.0,
            "wavelength_max": 12.0,
            "spectral_resolution": 3000.0,
            "observation_date": "2022-08-07T00:00:00Z",
        }),
    ]
}

// =============================================================================
// Shared Test Database
// =============================================================================

/// Shared fixture database - created once and reused for all read-only tests
static TEST_DB: Lazy<Mutex<TestDatabase>> = Lazy::new(|| Mutex::new(TestDatabase::new()));

struct TestDatabase {
    _temp_file: NamedTempFile,
    _export_dir: TempDir,
    store: Store,
    /// (obs_id, ra, dec) of every positioned observation
    positions: Vec<(String, f64, f64)>,
}

impl TestDatabase {
    fn new() -> Self {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let store = Store::open(temp_file.path()).expect("Failed to open store");
        let export_dir = tempfile::tempdir().expect("Failed to create export dir");

        let mut rng = StdRng::seed_from_u64(RANDOM_SEED);
        let mut positions = Vec::new();
        let images: Vec<Value> = (0..IMAGE_COUNT)
            .map(|i| {
                let ra = rng.gen_range(0.0..360.0);
                let dec = rng.gen_range(-90.0..=90.0);
                positions.push((format!("img-{:02}", i), ra, dec));
                image_row(i, ra, dec)
            })
            .collect();
        positions.push(("spec-a".into(), 359.9, 0.0));
        positions.push(("spec-b".into(), 0.0, 0.0));

        write_export(export_dir.path(), "2022-07", &images);
        write_export(export_dir.path(), "2022-08", &spectrum_rows());

        let source = JsonlSource::new(export_dir.path());
        let job = IngestionJob::new(&store, &source);
        for m in ["2022-07", "2022-08"] {
            let outcome = job
                .run_month(month(m), false, &mut SilentUi::new())
                .expect("Failed to ingest fixture month");
            assert!(matches!(outcome, JobOutcome::Completed { .. }), "{}", outcome);
        }

        Self {
            _temp_file: temp_file,
            _export_dir: export_dir,
            store,
            positions,
        }
    }
}

fn get(path: &str, pairs: &[(&str, &str)]) -> Result<Value> {
    let db = TEST_DB.lock().unwrap();
    handle(&db.store, path, &params(pairs))
}

fn obs_ids(body: &Value) -> Vec<String> {
    body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["obs_id"].as_str().unwrap().to_string())
        .collect()
}

fn fresh_store() -> (NamedTempFile, Store) {
    let file = NamedTempFile::new().unwrap();
    let store = Store::open(file.path()).unwrap();
    (file, store)
}

// =============================================================================
// Query Engine
// =============================================================================

#[test]
fn test_pagination_second_page() {
    let all = get("/observations/images", &[("limit", "100")]).unwrap();
    assert_eq!(all["total"], IMAGE_COUNT);
    let all = obs_ids(&all);

    let first = obs_ids(&get("/observations/images", &[("limit", "10"), ("offset", "0")]).unwrap());
    let second = obs_ids(&get("/observations/images", &[("limit", "10"), ("offset", "10")]).unwrap());

    assert_eq!(second.len(), 10);
    assert_eq!(second, all[10..20].to_vec());
    assert!(first.iter().all(|id| !second.contains(id)));
    // Newest first
    assert_eq!(all[0], "img-24");
}

#[test]
fn test_skip_alias_and_limit_clamp() {
    let body = get("/observations", &[("skip", "5"), ("limit", "1000")]).unwrap();
    assert_eq!(body["offset"], 5);
    assert_eq!(body["limit"], 100);

    let err = get("/observations", &[("limit", "0")]).unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[test]
fn test_cone_radius_zero_matches_exact_position() {
    let (obs_id, ra, dec) = TEST_DB.lock().unwrap().positions[5].clone();
    let body = get(
        "/observations/search/coordinates",
        &[("ra", &ra.to_string()), ("dec", &dec.to_string()), ("radius", "0")],
    )
    .unwrap();
    assert_eq!(obs_ids(&body), vec![obs_id]);
}

#[test]
fn test_cone_across_ra_seam() {
    let body = get(
        "/observations/search/coordinates",
        &[("ra", "0.1"), ("dec", "0"), ("radius", "1")],
    )
    .unwrap();
    let ids = obs_ids(&body);
    assert!(ids.contains(&"spec-a".to_string()));
    assert!(ids.contains(&"spec-b".to_string()));
}

#[test]
fn test_sampled_cones_match_brute_force() {
    let positions = TEST_DB.lock().unwrap().positions.clone();
    let mut rng = StdRng::seed_from_u64(RANDOM_SEED + 1);

    for _ in 0..10 {
        let cone = ConeSearch::new(
            rng.gen_range(0.0..360.0),
            rng.gen_range(-90.0..=90.0),
            rng.gen_range(5.0..60.0),
        )
        .unwrap();
        let expected: BTreeSet<String> = positions
            .iter()
            .filter(|(_, ra, dec)| cone.contains(*ra, *dec))
            .map(|(id, _, _)| id.clone())
            .collect();

        let body = get(
            "/observations/search/coordinates",
            &[
                ("ra", &cone.ra.to_string()),
                ("dec", &cone.dec.to_string()),
                ("radius", &cone.radius.to_string()),
                ("limit", "100"),
            ],
        )
        .unwrap();
        let actual: BTreeSet<String> = obs_ids(&body).into_iter().collect();
        assert_eq!(actual, expected, "cone {:?}", cone);
    }
}

#[test]
fn test_wavelength_overlap() {
    let overlap = get("/observations/spectra", &[("min_wavelength", "2.5"), ("max_wavelength", "5.0")]).unwrap();
    let ids = obs_ids(&overlap);
    assert!(ids.contains(&"spec-a".to_string()));
    assert!(ids.contains(&"spec-b".to_string()));
    assert!(!ids.contains(&"spec-c".to_string()));

    let disjoint = get("/observations/spectra", &[("min_wavelength", "5.0"), ("max_wavelength", "6.0")]).unwrap();
    let ids = obs_ids(&disjoint);
    assert!(!ids.contains(&"spec-a".to_string()));
    assert!(ids.contains(&"spec-b".to_string()));
}

#[test]
fn test_resolution_and_grating_filters() {
    let body = get("/observations/spectra", &[("min_resolution", "500")]).unwrap();
    assert_eq!(body["total"], 2);

    let body = get("/observations/spectra", &[("grating", "prism")]).unwrap();
    assert_eq!(obs_ids(&body), vec!["spec-b"]);
}

#[test]
fn test_instrument_matches_mode_qualified_names() {
    let body = get("/observations", &[("instrument", "nircam"), ("limit", "100")]).unwrap();
    assert_eq!(body["total"], 9);
    assert!(obs_ids(&body).iter().all(|id| id.starts_with("img-")));
}

#[test]
fn test_date_range_is_inclusive_of_whole_days() {
    let body = get(
        "/observations/search/date",
        &[("start_date", "2022-07-01"), ("end_date", "2022-07-10"), ("limit", "100")],
    )
    .unwrap();
    assert_eq!(body["total"], 10);

    let err = get("/observations/search/date", &[]).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test]
fn test_text_search_on_target() {
    let body = get("/observations/search", &[("q", "carina"), ("limit", "100")]).unwrap();
    assert_eq!(body["total"], 12);
}

#[test]
fn test_images_endpoint_ignores_product_type_param() {
    let body = get("/observations/images", &[("dataproduct_type", "spectrum")]).unwrap();
    assert_eq!(body["total"], IMAGE_COUNT);
}

#[test]
fn test_validation_errors() {
    let err = get("/observations", &[("ra", "400"), ("dec", "0"), ("radius", "1")]).unwrap_err();
    assert!(matches!(err, Error::Validation { ref param, .. } if param == "ra"));
    assert_eq!(err.status_code(), 400);

    let err = get("/observations", &[("dataproduct_type", "galaxy")]).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    let err = get("/observations/search/coordinates", &[("ra", "10"), ("dec", "5")]).unwrap_err();
    assert!(matches!(err, Error::Validation { ref param, .. } if param == "radius"));
}

#[test]
fn test_lookup_by_obs_id() {
    let body = get("/observations/spec-a", &[]).unwrap();
    assert_eq!(body["dataproduct_type"], "spectrum");
    assert_eq!(body["filter"], "F170LP");
    assert_eq!(body["spectrum_metadata"]["grating"], "G235M");
    assert_eq!(body["spectrum_metadata"]["wavelength_range"]["unit"], "microns");

    let body = get("/observations/img-03", &[]).unwrap();
    assert!(body.get("spectrum_metadata").is_none());

    let err = get("/observations/jw99999", &[]).unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[test]
fn test_proposal_lookup() {
    let body = get("/proposals/2736", &[]).unwrap();
    assert_eq!(body["total"], 5);
    assert_eq!(body["proposal_id"], "2736");

    let err = get("/proposals/9999", &[]).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_random_returns_requested_sample() {
    let body = get("/observations/random", &[]).unwrap();
    assert_eq!(obs_ids(&body).len(), 1);

    let body = get("/observations/random", &[("limit", "5"), ("dataproduct_type", "spectrum")]).unwrap();
    let ids = obs_ids(&body);
    assert_eq!(ids.len(), SPECTRUM_COUNT);
    assert!(ids.iter().all(|id| id.starts_with("spec-")));
}

// =============================================================================
// Aggregation
// =============================================================================

#[test]
fn test_instrument_counts_sum_to_total() {
    let instruments = get("/instruments", &[]).unwrap();
    let sum: u64 = instruments["instruments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["count"].as_u64().unwrap())
        .sum();

    let stats = get("/statistics", &[]).unwrap();
    assert_eq!(stats["total_observations"], sum);
    assert_eq!(sum as usize, IMAGE_COUNT + SPECTRUM_COUNT);
}

#[test]
fn test_statistics_object() {
    let stats = get("/statistics", &[]).unwrap();
    assert_eq!(stats["by_dataproduct_type"]["image"], IMAGE_COUNT);
    assert_eq!(stats["by_dataproduct_type"]["spectrum"], SPECTRUM_COUNT);
    assert_eq!(stats["total_exposure_time"], 25.0 * 100.0 + 50.0);
    assert_eq!(stats["earliest_observation"], "2022-07-01T12:00:00.000000Z");
    assert_eq!(stats["latest_observation"], "2022-08-07T00:00:00.000000Z");
    assert!(stats["top_gratings"].as_array().unwrap().len() <= 10);
}

#[test]
fn test_discovery_excludes_nulls_and_orders_by_count() {
    let gratings = get("/gratings", &[]).unwrap();
    let names: Vec<&str> = gratings["gratings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["G235M", "PRISM"]);

    let targets = get("/targets", &[("limit", "1")]).unwrap();
    assert_eq!(targets["targets"][0]["name"], "NGC 3132");
    assert_eq!(targets["targets"][0]["count"], 13);
}

#[test]
fn test_health_and_index() {
    assert_eq!(get("/health", &[]).unwrap()["status"], "healthy");
    assert!(get("/", &[]).unwrap()["endpoints"]["statistics"].is_string());
}

// =============================================================================
// Ingestion
// =============================================================================

#[test]
fn test_rerun_on_complete_month_is_idempotent() {
    let (_f, store) = fresh_store();
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), "2022-07", &[image_row(0, 10.0, 10.0), image_row(1, 20.0, 20.0)]);
    let source = JsonlSource::new(dir.path());
    let job = IngestionJob::new(&store, &source);
    let m = month("2022-07");

    job.run_month(m, false, &mut SilentUi::new()).unwrap();
    let before = count_month(&store.connect().unwrap(), m).unwrap();
    let again = job.run_month(m, false, &mut SilentUi::new()).unwrap();

    assert_eq!(again, JobOutcome::AlreadyComplete(m));
    assert_eq!(count_month(&store.connect().unwrap(), m).unwrap(), before);
    assert_eq!(before, 2);
}

#[test]
fn test_forced_refetch_replaces_month() {
    let (_f, store) = fresh_store();
    let dir = tempfile::tempdir().unwrap();
    let source = JsonlSource::new(dir.path());
    let job = IngestionJob::new(&store, &source);
    let m = month("2022-07");

    write_export(dir.path(), "2022-07", &[image_row(0, 10.0, 10.0), image_row(1, 20.0, 20.0)]);
    job.run_month(m, false, &mut SilentUi::new()).unwrap();

    write_export(dir.path(), "2022-07", &[image_row(2, 30.0, 30.0)]);
    job.run_month(m, true, &mut SilentUi::new()).unwrap();

    let conn = store.connect().unwrap();
    assert_eq!(Tracker::get(&conn, m).unwrap().status, IngestionStatus::Complete);
    assert_eq!(count_month(&conn, m).unwrap(), 1);
    assert!(matches!(
        handle(&store, "/observations/img-00", &QueryParams::new()),
        Err(Error::NotFound(_))
    ));
    assert!(handle(&store, "/observations/img-02", &QueryParams::new()).is_ok());
}

#[test]
fn test_next_incomplete_month_is_increasing_and_skips_complete() {
    let (_f, store) = fresh_store();
    let dir = tempfile::tempdir().unwrap();
    let source = JsonlSource::new(dir.path());
    let job = IngestionJob::new(&store, &source);
    let current = month("2022-06");
    for m in month("2022-01").until(current) {
        write_export(dir.path(), &m.to_string(), &[]);
    }

    // Complete a month out of order first
    job.run_month(month("2022-03"), false, &mut SilentUi::new()).unwrap();

    let mut seen = Vec::new();
    loop {
        let next = Tracker::next_incomplete_month(&store.connect().unwrap(), current).unwrap();
        let NextMonth::Month(m) = next else { break };
        assert!(seen.last().map_or(true, |prev| *prev < m));
        seen.push(m);
        job.run_month(m, false, &mut SilentUi::new()).unwrap();
    }
    let seen: Vec<String> = seen.iter().map(Month::to_string).collect();
    assert_eq!(seen, vec!["2022-01", "2022-02", "2022-04", "2022-05"]);
}

#[test]
fn test_missing_export_file_leaves_month_resumable() {
    let (_f, store) = fresh_store();
    let dir = tempfile::tempdir().unwrap();
    let source = JsonlSource::new(dir.path());
    let job = IngestionJob::new(&store, &source);
    let m = month("2023-05");

    let outcome = job.run_month(m, false, &mut SilentUi::new()).unwrap();
    assert!(outcome.is_failure(), "{}", outcome);
    let progress = Tracker::get(&store.connect().unwrap(), m).unwrap();
    assert_eq!(progress.status, IngestionStatus::Failed);
    assert!(progress.error.unwrap().contains("no export file"));

    // Once the export shows up the month is ingested, not reported complete
    write_export(
        dir.path(),
        "2023-05",
        &[placed_row("late", 10.0, 10.0, json!({"observation_date": "2023-05-10T00:00:00Z"}))],
    );
    let outcome = job.run_month(m, false, &mut SilentUi::new()).unwrap();
    assert!(matches!(outcome, JobOutcome::Completed { .. }), "{}", outcome);
    assert_eq!(count_month(&store.connect().unwrap(), m).unwrap(), 1);
}

/// Store with a handful of hand-placed observations for filters the shared
/// fixture leaves uniform.
fn ingest_rows(rows: &[Value]) -> (NamedTempFile, TempDir, Store) {
    let (file, store) = fresh_store();
    let dir = tempfile::tempdir().unwrap();
    write_export(dir.path(), "2022-09", rows);
    let source = JsonlSource::new(dir.path());
    let outcome = IngestionJob::new(&store, &source)
        .run_month(month("2022-09"), false, &mut SilentUi::new())
        .unwrap();
    assert!(matches!(outcome, JobOutcome::Completed { .. }), "{}", outcome);
    (file, dir, store)
}

fn placed_row(obs_id: &str, ra: f64, dec: f64, extra: Value) -> Value {
    let mut row = json!({
        "obs_id": obs_id,
        "dataproduct_type": "image",
        "instrument_name": "NIRCAM/IMAGE",
        "s_ra": ra,
        "s_dec": dec,
        "observation_date": "2022-09-10T00:00:00Z",
    });
    if let (Some(row), Value::Object(extra)) = (row.as_object_mut(), extra) {
        row.extend(extra);
    }
    row
}

#[test]
fn test_cone_at_pole_uses_angular_distance() {
    let (_f, _d, store) = ingest_rows(&[
        placed_row("near-pole", 200.0, 89.5, json!({})),
        placed_row("off-pole", 20.0, 88.0, json!({})),
        placed_row("equator", 0.0, 0.0, json!({})),
    ]);
    let body = handle(
        &store,
        "/observations/search/coordinates",
        &params(&[("ra", "0"), ("dec", "90"), ("radius", "1")]),
    )
    .unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(obs_ids(&body), vec!["near-pole"]);

    // RA is meaningless at the pole: any center RA finds the same match
    let body = handle(
        &store,
        "/observations/search/coordinates",
        &params(&[("ra", "123.4"), ("dec", "90"), ("radius", "2.5")]),
    )
    .unwrap();
    let ids: BTreeSet<String> = obs_ids(&body).into_iter().collect();
    assert_eq!(ids, BTreeSet::from(["near-pole".to_string(), "off-pole".to_string()]));
}

#[test]
fn test_calib_level_and_classification_filters() {
    let (_f, _d, store) = ingest_rows(&[
        placed_row("l2-star", 10.0, 10.0, json!({"calib_level": 2, "target_classification": "Star"})),
        placed_row("l3-star", 11.0, 10.0, json!({"calib_level": 3, "target_classification": "Star"})),
        placed_row("l3-galaxy", 12.0, 10.0, json!({"calib_level": 3, "target_classification": "Galaxy"})),
        placed_row("unclassified", 13.0, 10.0, json!({})),
    ]);
    let search = |pairs: &[(&str, &str)]| -> BTreeSet<String> {
        let body = handle(&store, "/observations", &params(pairs)).unwrap();
        obs_ids(&body).into_iter().collect()
    };
    let set = |ids: &[&str]| -> BTreeSet<String> { ids.iter().map(|s| s.to_string()).collect() };

    assert_eq!(search(&[("calib_level", "3")]), set(&["l3-star", "l3-galaxy"]));
    assert_eq!(search(&[("target_classification", "star")]), set(&["l2-star", "l3-star"]));
    assert_eq!(
        search(&[("calib_level", "3"), ("target_classification", "Star")]),
        set(&["l3-star"])
    );
    assert!(search(&[("calib_level", "1")]).is_empty());

    let err = handle(&store, "/observations", &params(&[("calib_level", "high")])).unwrap_err();
    assert!(matches!(err, Error::Validation { ref param, .. } if param == "calib_level"));
}

/// Fails every month listed in `failing`, serves nothing otherwise.
struct FlakySource {
    failing: Vec<Month>,
}

impl ArchiveSource for FlakySource {
    fn fetch_month(&self, month: Month) -> Result<RecordStream<'_>> {
        if self.failing.contains(&month) {
            return Err(Error::ArchiveFetch("503 Service Unavailable".into()));
        }
        let row = RawRecord::from_json(json!({
            "obs_id": format!("obs-{}", month),
            "dataproduct_type": "image",
            "observation_date": format!("{}-15T00:00:00Z", month),
        }));
        Ok(Box::new(std::iter::once(Ok(row))))
    }
}

#[test]
fn test_failed_month_does_not_touch_others() {
    let (_f, store) = fresh_store();
    let source = FlakySource {
        failing: vec![month("2022-02")],
    };
    let job = IngestionJob::new(&store, &source);

    job.run_month(month("2022-01"), false, &mut SilentUi::new()).unwrap();
    let outcome = job.run_month(month("2022-02"), false, &mut SilentUi::new()).unwrap();
    assert!(outcome.is_failure());

    let conn = store.connect().unwrap();
    assert_eq!(Tracker::get(&conn, month("2022-01")).unwrap().status, IngestionStatus::Complete);
    let failed = Tracker::get(&conn, month("2022-02")).unwrap();
    assert_eq!(failed.status, IngestionStatus::Failed);
    assert!(failed.error.unwrap().contains("503"));
    assert_eq!(
        Tracker::next_incomplete_month(&conn, month("2022-04")).unwrap(),
        NextMonth::Month(month("2022-02"))
    );
}

#[test]
fn test_random_on_empty_store_is_not_found() {
    let (_f, store) = fresh_store();
    let err = handle(&store, "/observations/random", &QueryParams::new()).unwrap_err();
    assert_eq!(err.status_code(), 404);
}
