//! End-to-end tests of the merge job against GeoTIFFs in a scratch directory.

use s2lu_merge::{
    LocalStore, MemoryStore, MergeConfig, MergeError, MergeJob, RuleConfig, Stage,
    NODATA_SENTINEL,
};
use s2lu_raster::{encode_geotiff, GeoRaster, GeoTransform, SampleFormat};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const NODATA: f32 = NODATA_SENTINEL as f32;

/// A 2x2 grid of 20 m pixels in UTM 30N.
fn utm_grid(values: Vec<f32>, origin_x: f64) -> GeoRaster {
    GeoRaster::new(values, 2, 2, GeoTransform::new(origin_x, 4_700_040.0, 20.0, -20.0))
        .unwrap()
        .with_epsg(Some(32630))
}

fn write_tif(path: &Path, raster: &GeoRaster) {
    fs::write(path, encode_geotiff(raster, SampleFormat::U16).unwrap()).unwrap();
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(source: &[f32], reference: &[f32]) -> Self {
        let dir = TempDir::new().unwrap();
        write_tif(&dir.path().join("SCL.tif"), &utm_grid(source.to_vec(), 699_960.0));
        write_tif(
            &dir.path().join("landuse.tif"),
            &utm_grid(reference.to_vec(), 699_960.0),
        );
        Self { dir }
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    fn out_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("out")
    }

    fn config(&self, rule: RuleConfig) -> MergeConfig {
        MergeConfig {
            reference: self.path("landuse.tif"),
            output_root: self.out_dir(),
            output_prefix: "output".into(),
            rule,
            ..MergeConfig::default()
        }
    }

    fn job(&self, rule: RuleConfig) -> MergeJob {
        let config = self.config(rule);
        let store = Box::new(LocalStore::new(&config.output_root));
        MergeJob::new(config, store).unwrap()
    }

    fn item(&self, scl: &str) -> Value {
        json!({
            "type": "Feature",
            "id": "S2B_30TXM_20240101_0_L2A",
            "properties": {
                "datetime": "2024-01-01T11:07:55Z",
                "sentinel:utm_zone": 30,
                "sentinel:latitude_band": "T",
                "sentinel:grid_square": "XM"
            },
            "assets": { "SCL": { "href": self.path(scl) } }
        })
    }

    fn written(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.out_dir().join("output"))
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[test]
fn test_mask_scenario_end_to_end() {
    let fixture = Fixture::new(&[0.0, 0.0, 1.0, 0.0], &[5.0, 6.0, 7.0, 8.0]);
    let job = fixture.job(RuleConfig::default());

    let output = job
        .handle_event(&fixture.item("SCL.tif").to_string())
        .expect("merge failed");
    assert_eq!(output.raster_key, "output/T30TXM_20240101.tif");
    assert_eq!(
        output.summary_key.as_deref(),
        Some("output/T30TXM_20240101.json")
    );
    assert_eq!(
        fixture.written(),
        vec!["T30TXM_20240101.json", "T30TXM_20240101.tif"]
    );

    let derived =
        GeoRaster::from_file(fixture.out_dir().join("output/T30TXM_20240101.tif")).unwrap();
    assert_eq!(derived.data(), &[5.0, 6.0, NODATA, 8.0]);
    assert_eq!(derived.epsg(), Some(32630));
    assert_eq!(derived.no_data(), Some(NODATA));
    assert_eq!(derived.envelope(), utm_grid(vec![0.0; 4], 699_960.0).envelope());

    let sidecar: Value = serde_json::from_slice(
        &fs::read(fixture.out_dir().join("output/T30TXM_20240101.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(sidecar["id"], "S2B_30TXM_20240101_0_L2A");
    assert_eq!(sidecar["land_use"]["rule"], "mask");
    assert_eq!(sidecar["land_use"]["overlap_pixels"], 4);
    assert_eq!(sidecar["land_use"]["nodata_pixels"], 1);
}

#[test]
fn test_repeated_notification_is_idempotent() {
    let fixture = Fixture::new(&[4.0, 8.0, 9.0, 5.0], &[0.0, 5.0, 1.0, 5.0]);
    let job = fixture.job(RuleConfig::UrbanCover {
        clear_classes: vec![2, 4, 5, 6, 7, 11],
        urban_classes: vec![0, 5],
    });
    let payload = fixture.item("SCL.tif").to_string();
    let raster_path = fixture.out_dir().join("output/T30TXM_20240101.tif");
    let sidecar_path = fixture.out_dir().join("output/T30TXM_20240101.json");

    job.handle_event(&payload).unwrap();
    let first = (fs::read(&raster_path).unwrap(), fs::read(&sidecar_path).unwrap());

    job.handle_event(&payload).unwrap();
    let second = (fs::read(&raster_path).unwrap(), fs::read(&sidecar_path).unwrap());

    assert_eq!(first, second);
    assert_eq!(fixture.written().len(), 2);

    let derived = GeoRaster::from_file(&raster_path).unwrap();
    assert_eq!(derived.data(), &[2.0, 1.0, 0.0, 2.0]);

    let sidecar: Value = serde_json::from_slice(&second.1).unwrap();
    assert_eq!(sidecar["land_use"]["urban_pixels"], 3);
    assert_eq!(sidecar["land_use"]["valid_urban_pixels"], 2);
}

#[test]
fn test_disjoint_extents_write_nothing() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0; 4]);
    // Move the reference 10 km east
    write_tif(
        &fixture.dir.path().join("landuse.tif"),
        &utm_grid(vec![5.0; 4], 709_960.0),
    );
    let job = fixture.job(RuleConfig::default());

    let err = job
        .handle_event(&fixture.item("SCL.tif").to_string())
        .unwrap_err();
    assert_eq!(err.stage, Stage::Align);
    assert!(matches!(err.source, MergeError::GeometryMismatch { .. }));
    assert!(fixture.written().is_empty());
}

#[test]
fn test_missing_source_writes_nothing() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0; 4]);
    let job = fixture.job(RuleConfig::default());

    let err = job
        .handle_event(&fixture.item("missing/SCL.tif").to_string())
        .unwrap_err();
    assert_eq!(err.stage, Stage::FetchSource);
    assert!(matches!(err.source, MergeError::NotFound(_)));
    assert!(fixture.written().is_empty());
}

#[test]
fn test_missing_reference() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0; 4]);
    fs::remove_file(fixture.dir.path().join("landuse.tif")).unwrap();
    let job = fixture.job(RuleConfig::default());

    let err = job
        .handle_event(&fixture.item("SCL.tif").to_string())
        .unwrap_err();
    assert_eq!(err.stage, Stage::LoadReference);
    assert!(matches!(err.source, MergeError::NotFound(_)));
}

#[test]
fn test_reference_loaded_once() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0; 4]);
    let job = fixture.job(RuleConfig::default());
    assert!(!job.reference().is_loaded());

    job.handle_event(&fixture.item("SCL.tif").to_string())
        .unwrap();
    assert!(job.reference().is_loaded());

    // The cached copy keeps serving after the file is gone
    fs::remove_file(fixture.dir.path().join("landuse.tif")).unwrap();
    job.handle_event(&fixture.item("SCL.tif").to_string())
        .unwrap();
}

#[test]
fn test_sidecar_failure_writes_nothing() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0; 4]);
    let store = Arc::new(MemoryStore::rejecting(".json"));
    let job = MergeJob::new(fixture.config(RuleConfig::default()), Box::new(Arc::clone(&store)))
        .unwrap();

    let err = job
        .handle_event(&fixture.item("SCL.tif").to_string())
        .unwrap_err();
    assert_eq!(err.stage, Stage::Write);
    assert!(matches!(err.source, MergeError::Write { ref key, .. } if key == "output/T30TXM_20240101.json"));
    assert!(store.keys().is_empty());
}

#[test]
fn test_summary_disabled() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0; 4]);
    let store = Arc::new(MemoryStore::new());
    let config = MergeConfig {
        write_summary: false,
        ..fixture.config(RuleConfig::default())
    };
    let job = MergeJob::new(config, Box::new(Arc::clone(&store))).unwrap();

    let output = job
        .handle_event(&fixture.item("SCL.tif").to_string())
        .unwrap();
    assert_eq!(output.summary_key, None);
    assert_eq!(store.keys(), vec!["output/T30TXM_20240101.tif".to_string()]);
}

#[test]
fn test_sns_envelope_with_footprint() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0, 6.0, 7.0, 8.0]);
    let job = fixture.job(RuleConfig::default());

    // The grid sits just west of 699 960 E / 4 700 040 N in zone 30; a
    // footprint far away clips every pixel
    let mut item = fixture.item("SCL.tif");
    item["geometry"] = json!({
        "type": "Polygon",
        "coordinates": [[[10.0, 10.0], [11.0, 10.0], [11.0, 11.0], [10.0, 11.0], [10.0, 10.0]]]
    });
    let envelope = json!({ "Records": [{ "Sns": { "Message": item.to_string() } }] });

    job.handle_event(&envelope.to_string()).unwrap();
    let derived =
        GeoRaster::from_file(fixture.out_dir().join("output/T30TXM_20240101.tif")).unwrap();
    assert!(derived.data().iter().all(|v| *v == NODATA));
}

#[test]
fn test_failed_rerun_keeps_previous_output() {
    let fixture = Fixture::new(&[0.0, 0.0, 1.0, 0.0], &[5.0, 6.0, 7.0, 8.0]);
    let store = Arc::new(MemoryStore::new());
    let job = MergeJob::new(fixture.config(RuleConfig::default()), Box::new(Arc::clone(&store)))
        .unwrap();
    let payload = fixture.item("SCL.tif").to_string();

    job.handle_event(&payload).unwrap();
    let keys = store.keys();
    assert_eq!(
        keys,
        vec!["output/T30TXM_20240101.json", "output/T30TXM_20240101.tif"]
    );
    let previous: Vec<_> = keys.iter().map(|k| store.get(k).unwrap()).collect();

    // Storage starts refusing the sidecar
    store.reject(Some(".json".into()));
    let err = job.handle_event(&payload).unwrap_err();
    assert_eq!(err.stage, Stage::Write);

    assert_eq!(store.keys(), keys);
    let current: Vec<_> = keys.iter().map(|k| store.get(k).unwrap()).collect();
    assert_eq!(current, previous);
}

#[test]
fn test_raster_write_rejected() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0; 4]);
    let store = Arc::new(MemoryStore::rejecting(".tif"));
    let job = MergeJob::new(fixture.config(RuleConfig::default()), Box::new(Arc::clone(&store)))
        .unwrap();

    let err = job
        .handle_event(&fixture.item("SCL.tif").to_string())
        .unwrap_err();
    assert_eq!(err.stage, Stage::Write);
    assert!(matches!(err.source, MergeError::Write { ref key, .. } if key == "output/T30TXM_20240101.tif"));
    assert!(store.keys().is_empty());
}

#[test]
fn test_unwritable_output_root() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0; 4]);
    // A plain file where the output directory should be
    fs::write(fixture.out_dir(), b"not a directory").unwrap();
    let job = fixture.job(RuleConfig::default());

    let err = job
        .handle_event(&fixture.item("SCL.tif").to_string())
        .unwrap_err();
    assert_eq!(err.stage, Stage::Write);
    assert!(matches!(err.source, MergeError::Write { .. }));
    assert_eq!(fs::read(fixture.out_dir()).unwrap(), b"not a directory");
}

#[test]
fn test_undecodable_source_is_format_error() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0; 4]);
    fs::write(fixture.dir.path().join("SCL.tif"), b"not a tiff at all").unwrap();
    let job = fixture.job(RuleConfig::default());

    let err = job
        .handle_event(&fixture.item("SCL.tif").to_string())
        .unwrap_err();
    assert_eq!(err.stage, Stage::FetchSource);
    assert!(matches!(err.source, MergeError::Format(_)), "got {:?}", err.source);
    assert!(fixture.written().is_empty());
}

#[test]
fn test_source_without_georeferencing_is_format_error() {
    let fixture = Fixture::new(&[0.0; 4], &[5.0; 4]);
    let mut plain = std::io::Cursor::new(Vec::new());
    {
        let mut encoder = tiff::encoder::TiffEncoder::new(&mut plain).unwrap();
        encoder
            .write_image::<tiff::encoder::colortype::Gray16>(2, 2, &[0u16, 0, 1, 0])
            .unwrap();
    }
    fs::write(fixture.dir.path().join("SCL.tif"), plain.into_inner()).unwrap();
    let job = fixture.job(RuleConfig::default());

    let err = job
        .handle_event(&fixture.item("SCL.tif").to_string())
        .unwrap_err();
    assert_eq!(err.stage, Stage::FetchSource);
    assert!(matches!(err.source, MergeError::Format(_)), "got {:?}", err.source);
    assert!(fixture.written().is_empty());
}
