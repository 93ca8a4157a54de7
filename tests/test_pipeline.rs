use ndarray::Array2;
use serde_json::json;
use sprat::config::PipelineConfig;
use sprat::core::clip::ClipOptions;
use sprat::core::quality::{FlagTest, QualityMask, QualityRule};
use sprat::io::auth::StaticToken;
use sprat::io::catalog::{CatalogConfig, TimePadding};
use sprat::io::geotiff;
use sprat::io::swath::{SwathLayout, VariableRef};
use sprat::io::transfer::TransferOptions;
use sprat::pipeline::{Pipeline, ProductOutcome, RunReport, Stage};
use sprat::types::{
    AreaOfInterest, GeoTransform, SpratError, SpratResult, TimeWindow, TransferReason, TransferTicket, CLIP_NODATA,
    TARGET_EPSG,
};
use std::io::{Cursor, Write};
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Products in these tests ship their swath arrays as GeoTIFFs
fn tif_layout() -> SwathLayout {
    SwathLayout {
        measurement: VariableRef::new("LST.tif", "LST"),
        latitude: VariableRef::new("latitude.tif", "latitude_in"),
        longitude: VariableRef::new("longitude.tif", "longitude_in"),
        quality: vec![VariableRef::new("bayes.tif", "bayes_in")],
    }
}

/// A zipped `<name>/` product folder holding a 5 x 5 swath over lon/lat 0..4
fn product_zip(name: &str) -> Vec<u8> {
    product_zip_without(name, None)
}

/// Same product with one of its files left out
fn product_zip_without(name: &str, left_out: Option<&str>) -> Vec<u8> {
    let scratch = TempDir::new().expect("scratch");
    let lat = Array2::from_shape_fn((5, 5), |(r, _)| 4.0 - r as f64);
    let lon = Array2::from_shape_fn((5, 5), |(_, c)| c as f64);
    let lst = Array2::from_elem((5, 5), 300.0);
    // one cloudy sample at lon 2, lat 2
    let bayes = Array2::from_shape_fn((5, 5), |(r, c)| if r == 2 && c == 2 { 2.0 } else { 0.0 });

    let transform = GeoTransform::north_up(0.0, 5.0, 1.0);
    let files = [("latitude.tif", lat), ("longitude.tif", lon), ("LST.tif", lst), ("bayes.tif", bayes)];
    for (file, data) in &files {
        geotiff::write_bands(scratch.path().join(file), &[data], &transform, TARGET_EPSG, None).expect("write tif");
    }

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (file, _) in files.iter().filter(|(file, _)| Some(*file) != left_out) {
        let bytes = std::fs::read(scratch.path().join(file)).expect("read tif");
        zip.start_file(format!("{}/{}", name, file), zip::write::FileOptions::default())
            .expect("zip entry");
        zip.write_all(&bytes).expect("zip write");
    }
    zip.finish().expect("zip finish").into_inner()
}

fn config(base_url: String, root: &Path) -> PipelineConfig {
    PipelineConfig {
        collection: "SENTINEL-3".to_string(),
        product_type: "SL_2_LST___".to_string(),
        aoi: AreaOfInterest::new(vec![(0.0, 4.0), (4.0, 4.0), (4.0, 0.0), (0.0, 0.0)]).expect("aoi"),
        time_window: TimeWindow::from_dates(
            chrono::NaiveDate::from_ymd_opt(2024, 5, 24).expect("date"),
            chrono::NaiveDate::from_ymd_opt(2024, 5, 28).expect("date"),
        )
        .expect("window"),
        max_results: 5,
        pixel_size: 0.5,
        output_dir: root.join("out"),
        working_dir: root.join("work"),
        boundary_path: None,
        catalog: CatalogConfig::new(base_url, TimePadding::FullDay),
        transfer: TransferOptions::default(),
        swath: tif_layout(),
        quality: QualityMask {
            rules: vec![QualityRule { layer: "bayes_in".to_string(), test: FlagTest::Equals(2) }],
        },
        unit_correction: None,
        clip: ClipOptions::default(),
    }
}

async fn run(config: PipelineConfig) -> SpratResult<RunReport> {
    tokio::task::spawn_blocking(move || {
        let pipeline = Pipeline::new(config)?;
        pipeline.run(&StaticToken(TransferTicket::bearer("run-token")))
    })
    .await
    .expect("blocking task panicked")
}

async fn mount_catalog(server: &MockServer, ids: &[&str]) {
    let value: Vec<_> = ids
        .iter()
        .map(|id| json!({ "Id": id, "Name": format!("S3A_{}.SEN3", id) }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/odata/v1/Products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": value })))
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_survives_per_product_failures() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = MockServer::start().await;
    mount_catalog(&server, &["good", "missing", "garbage", "noflags"]).await;

    Mock::given(method("GET"))
        .and(path("/odata/v1/Products(good)/$value"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/download/good"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download/good"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(product_zip("S3A_good.SEN3")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/odata/v1/Products(missing)/$value"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/odata/v1/Products(garbage)/$value"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/odata/v1/Products(noflags)/$value"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(product_zip_without("S3A_noflags.SEN3", Some("bayes.tif"))),
        )
        .mount(&server)
        .await;

    let root = TempDir::new().expect("temp dir");
    let config = config(format!("{}/odata/v1", server.uri()), root.path());
    let clipped_path = config.clipped_path();
    let report = run(config).await.expect("run");

    assert_eq!(report.summary.requested, 4);
    assert_eq!(report.summary.downloaded, 3);
    assert_eq!(report.summary.rasterized, 1);
    assert_eq!(report.summary.mosaicked, 1);
    assert!(report.composite_failure.is_none());

    match &report.products[0].outcome {
        ProductOutcome::Rasterized { rasters } => {
            assert_eq!(rasters.len(), 1);
            assert!(rasters[0].ends_with("out/rasters/S3A_good.SEN3.tif"));
            assert!(rasters[0].exists());
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(matches!(report.products[1].outcome, ProductOutcome::Failed { stage: Stage::Transfer, .. }));
    assert!(matches!(report.products[2].outcome, ProductOutcome::Failed { stage: Stage::Extract, .. }));
    match &report.products[3].outcome {
        ProductOutcome::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::Rasterize);
            assert!(reason.contains("missing_input"), "{}", reason);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!root.path().join("out/rasters/S3A_noflags.SEN3.tif").exists());
    assert_eq!(report.failed_products().count(), 3);

    // archives are removed once extracted
    assert!(!root.path().join("work/downloads/S3A_good.SEN3.zip").exists());

    assert_eq!(report.clipped.as_deref(), Some(clipped_path.as_path()));
    let clipped = geotiff::read_raster(&clipped_path).expect("clipped raster");
    assert_eq!((clipped.width(), clipped.height()), (8, 8));
    // sample at lon 0, lat 4 burned the top-left cell, in Celsius
    assert!((clipped.data[[0, 0]] - 26.85).abs() < 1e-9);
    // the cloudy sample's cell and untouched cells read 0, never NaN or -999
    assert_eq!(clipped.data[[4, 4]], 0.0);
    assert!(clipped.data.iter().all(|v| v.is_finite() && *v != CLIP_NODATA));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_boundary_file_masks_outside() {
    let server = MockServer::start().await;
    mount_catalog(&server, &["only"]).await;
    Mock::given(method("GET"))
        .and(path("/odata/v1/Products(only)/$value"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(product_zip("S3A_only.SEN3")))
        .mount(&server)
        .await;

    let root = TempDir::new().expect("temp dir");
    let boundary = root.path().join("triangle.geojson");
    std::fs::write(
        &boundary,
        json!({
            "type": "Feature",
            "properties": {},
            "geometry": { "type": "Polygon", "coordinates": [[[0, 0], [4, 0], [0, 4], [0, 0]]] }
        })
        .to_string(),
    )
    .expect("boundary");

    let mut config = config(format!("{}/odata/v1", server.uri()), root.path());
    config.boundary_path = Some(boundary);
    config.clip = ClipOptions { validity_band: true };
    let clipped_path = config.clipped_path();
    let report = run(config).await.expect("run");
    assert!(report.composite_failure.is_none());

    let values = geotiff::read_band(&clipped_path, 1).expect("band 1");
    let mask = geotiff::read_band(&clipped_path, 2).expect("band 2");
    // top-right cell center (3.75, 3.75) is outside the triangle
    assert_eq!(values.data[[0, 7]], CLIP_NODATA);
    assert_eq!(mask.data[[0, 7]], 0.0);
    // bottom-left cell center (0.25, 0.25) is inside
    assert_ne!(values.data[[7, 0]], CLIP_NODATA);
    assert_ne!(mask.data[[7, 0]], 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unauthorized_aborts_run() {
    let server = MockServer::start().await;
    mount_catalog(&server, &["first", "second"]).await;
    Mock::given(method("GET"))
        .and(path("/odata/v1/Products(first)/$value"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let root = TempDir::new().expect("temp dir");
    let err = run(config(format!("{}/odata/v1", server.uri()), root.path()))
        .await
        .expect_err("401 is fatal");
    assert!(matches!(err, SpratError::Transfer { reason: TransferReason::Unauthorized(401), .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_products_records_mosaic_failure() {
    let server = MockServer::start().await;
    mount_catalog(&server, &[]).await;

    let root = TempDir::new().expect("temp dir");
    let report = run(config(format!("{}/odata/v1", server.uri()), root.path()))
        .await
        .expect("empty run still reports");

    assert_eq!(report.summary.requested, 0);
    assert!(report.mosaic.is_none());
    let failure = report.composite_failure.expect("mosaic failure recorded");
    assert_eq!(failure.stage, Stage::Mosaic);
    assert!(failure.reason.contains("no_inputs"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_catalog_error_aborts_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/odata/v1/Products"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let root = TempDir::new().expect("temp dir");
    let err = run(config(format!("{}/odata/v1", server.uri()), root.path()))
        .await
        .expect_err("malformed catalog");
    assert!(matches!(err, SpratError::Catalog(_)));
}
