use chrono::{DateTime, NaiveDate, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG code of the geographic target CRS every rasterized product is written in
pub const TARGET_EPSG: u32 = 4326;

/// Sentinel written outside the clip boundary
pub const CLIP_NODATA: f64 = -999.0;

/// Marker for a missing measurement (masked, fill value, or untouched pixel)
pub const MISSING: f64 = f64::NAN;

/// Area of interest as a closed lon/lat ring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct AreaOfInterest {
    ring: Vec<(f64, f64)>,
}

impl AreaOfInterest {
    /// Build an AOI from lon/lat vertices, closing the ring if needed
    pub fn new(mut vertices: Vec<(f64, f64)>) -> SpratResult<Self> {
        if let (Some(&first), Some(&last)) = (vertices.first(), vertices.last()) {
            if first != last {
                vertices.push(first);
            }
        }

        // closed ring: at least 3 distinct vertices plus the closing one
        if vertices.len() < 4 {
            return Err(SpratError::Config(format!(
                "area of interest needs at least 3 vertices, got {}",
                vertices.len().saturating_sub(1)
            )));
        }

        if vertices.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(SpratError::Config(
                "area of interest contains non-finite coordinates".to_string(),
            ));
        }

        Ok(Self { ring: vertices })
    }

    /// Axis-aligned AOI from bounds
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self {
            ring: vec![
                (bbox.min_lon, bbox.max_lat),
                (bbox.max_lon, bbox.max_lat),
                (bbox.max_lon, bbox.min_lat),
                (bbox.min_lon, bbox.min_lat),
                (bbox.min_lon, bbox.max_lat),
            ],
        }
    }

    pub fn ring(&self) -> &[(f64, f64)] {
        &self.ring
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(self.ring.iter().copied())
            .unwrap_or(BoundingBox { min_lon: 0.0, max_lon: 0.0, min_lat: 0.0, max_lat: 0.0 })
    }

    /// WKT polygon used in catalog filters, e.g. `POLYGON((6.34 47.41, ...))`
    pub fn to_wkt(&self) -> String {
        let coords: Vec<String> = self
            .ring
            .iter()
            .map(|(lon, lat)| format!("{} {}", lon, lat))
            .collect();
        format!("POLYGON(({}))", coords.join(", "))
    }

    /// The AOI as a geographic clip boundary
    pub fn to_clip_boundary(&self) -> ClipBoundary {
        ClipBoundary {
            epsg: TARGET_EPSG,
            polygons: vec![Polygon { exterior: self.ring.clone(), holes: Vec::new() }],
        }
    }
}

impl TryFrom<Vec<(f64, f64)>> for AreaOfInterest {
    type Error = SpratError;

    fn try_from(vertices: Vec<(f64, f64)>) -> SpratResult<Self> {
        Self::new(vertices)
    }
}

impl From<AreaOfInterest> for Vec<(f64, f64)> {
    fn from(aoi: AreaOfInterest) -> Self {
        aoi.ring
    }
}

/// Sensing time range, `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeWindow")]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawTimeWindow> for TimeWindow {
    type Error = SpratError;

    fn try_from(raw: RawTimeWindow) -> SpratResult<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> SpratResult<Self> {
        if start > end {
            return Err(SpratError::Config(format!(
                "time window start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Whole days `[start 00:00, end 00:00]`
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> SpratResult<Self> {
        let to_utc = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        match (to_utc(start), to_utc(end)) {
            (Some(s), Some(e)) => Self::new(s, e),
            _ => Err(SpratError::Config("invalid calendar date".to_string())),
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end.date_naive()
    }
}

/// A product as listed by the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDescriptor {
    /// Catalog identifier; the product identity
    pub id: String,
    pub name: String,
    pub collection: String,
    pub product_type: String,
}

impl PartialEq for ProductDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProductDescriptor {}

impl ProductDescriptor {
    /// Filesystem-safe stem derived from the product name
    pub fn file_stem(&self) -> String {
        sanitize_file_name(&self.name)
    }
}

/// Replace anything that is not safe in a file name
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let cleaned = out.trim_matches(|c| c == '.' || c == '_');
    if cleaned.is_empty() {
        "product".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Bearer credential for authenticated transfers
#[derive(Clone, Serialize, Deserialize)]
pub struct TransferTicket {
    pub access_token: String,
    pub token_type: String,
    /// Informational only; expiry is never checked locally
    pub expires_at: Option<DateTime<Utc>>,
}

impl TransferTicket {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            expires_at: None,
        }
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for TransferTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferTicket")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One quality/flag array co-registered with the measurement
#[derive(Debug, Clone)]
pub struct QualityLayer {
    pub name: String,
    pub values: Vec<i64>,
}

/// Curvilinear swath: per-sample geolocation plus measurement and flags
#[derive(Debug, Clone)]
pub struct SwathDataset {
    pub latitude: Array2<f64>,
    pub longitude: Array2<f64>,
    pub measurement: Array2<f64>,
    pub quality: Vec<QualityLayer>,
    /// Unit string reported by the provider, e.g. `K`
    pub units: Option<String>,
}

impl SwathDataset {
    pub fn new(
        latitude: Array2<f64>,
        longitude: Array2<f64>,
        measurement: Array2<f64>,
        quality: Vec<QualityLayer>,
    ) -> SpratResult<Self> {
        let dataset = Self { latitude, longitude, measurement, quality, units: None };
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn sample_count(&self) -> usize {
        self.measurement.len()
    }

    /// All arrays must share the geolocation shape and element count
    pub fn validate(&self) -> SpratResult<()> {
        let shape = self.latitude.dim();
        if self.longitude.dim() != shape || self.measurement.dim() != shape {
            return Err(SpratError::Rasterize {
                reason: RasterizeReason::ShapeMismatch,
                detail: format!(
                    "latitude {:?}, longitude {:?}, measurement {:?}",
                    shape,
                    self.longitude.dim(),
                    self.measurement.dim()
                ),
            });
        }

        for layer in &self.quality {
            if layer.values.len() != self.latitude.len() {
                return Err(SpratError::Rasterize {
                    reason: RasterizeReason::ShapeMismatch,
                    detail: format!(
                        "quality layer '{}' has {} elements, expected {}",
                        layer.name,
                        layer.values.len(),
                        self.latitude.len()
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Bounds of the finite points, `None` if there are none
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        let mut bbox: Option<Self> = None;
        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            bbox = Some(match bbox {
                None => Self { min_lon: x, max_lon: x, min_lat: y, max_lat: y },
                Some(b) => Self {
                    min_lon: b.min_lon.min(x),
                    max_lon: b.max_lon.max(x),
                    min_lat: b.min_lat.min(y),
                    max_lat: b.max_lat.max(y),
                },
            });
        }
        bbox
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    /// Overlap with positive area, if any
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let b = BoundingBox {
            min_lon: self.min_lon.max(other.min_lon),
            max_lon: self.max_lon.min(other.max_lon),
            min_lat: self.min_lat.max(other.min_lat),
            max_lat: self.max_lat.min(other.max_lat),
        };
        if b.min_lon < b.max_lon && b.min_lat < b.max_lat {
            Some(b)
        } else {
            None
        }
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    /// Negative for north-up rasters
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self::north_up_xy(top_left_x, top_left_y, pixel_size, pixel_size)
    }

    pub fn north_up_xy(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Geographic coordinates of a pixel center
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Extent of a `width` x `height` raster on this transform
    pub fn extent(&self, width: usize, height: usize) -> BoundingBox {
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + width as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + height as f64 * self.pixel_height;
        BoundingBox {
            min_lon: x0.min(x1),
            max_lon: x0.max(x1),
            min_lat: y0.min(y1),
            max_lat: y0.max(y1),
        }
    }
}

/// Single-band raster with its georeferencing
#[derive(Debug, Clone)]
pub struct RasterGrid {
    /// (rows, cols) = (height, width)
    pub data: Array2<f64>,
    pub transform: GeoTransform,
    pub epsg: u32,
    pub nodata: Option<f64>,
}

impl RasterGrid {
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn extent(&self) -> BoundingBox {
        self.transform.extent(self.width(), self.height())
    }

    /// True when `value` holds a measurement under this grid's nodata convention
    pub fn is_valid(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self.nodata {
            Some(nd) if nd.is_finite() => value != nd,
            _ => true,
        }
    }
}

/// Polygon with an exterior ring and optional holes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<(f64, f64)>,
    pub holes: Vec<Vec<(f64, f64)>>,
}

impl Polygon {
    /// Even-odd test, holes excluded
    pub fn contains(&self, x: f64, y: f64) -> bool {
        ring_contains(&self.exterior, x, y) && !self.holes.iter().any(|h| ring_contains(h, x, y))
    }
}

fn ring_contains(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Clip geometry in its source CRS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipBoundary {
    pub epsg: u32,
    pub polygons: Vec<Polygon>,
}

impl ClipBoundary {
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.polygons.iter().flat_map(|p| p.exterior.iter().copied()))
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.polygons.iter().any(|p| p.contains(x, y))
    }
}

/// Why a transfer failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferReason {
    RedirectLoop,
    BadRedirect,
    HttpStatus(u16),
    Unauthorized(u16),
    Timeout,
    Network,
    Io,
}

impl fmt::Display for TransferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferReason::RedirectLoop => write!(f, "redirect_loop"),
            TransferReason::BadRedirect => write!(f, "bad_redirect"),
            TransferReason::HttpStatus(code) => write!(f, "http_status {}", code),
            TransferReason::Unauthorized(code) => write!(f, "unauthorized {}", code),
            TransferReason::Timeout => write!(f, "timeout"),
            TransferReason::Network => write!(f, "network"),
            TransferReason::Io => write!(f, "io"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractReason {
    EmptyOrCorrupt,
    Io,
}

impl fmt::Display for ExtractReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractReason::EmptyOrCorrupt => write!(f, "empty_or_corrupt"),
            ExtractReason::Io => write!(f, "io"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterizeReason {
    MissingInput,
    ShapeMismatch,
    DegenerateGrid,
    InvalidPixelSize,
    WriteFailed,
}

impl fmt::Display for RasterizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterizeReason::MissingInput => write!(f, "missing_input"),
            RasterizeReason::ShapeMismatch => write!(f, "shape_mismatch"),
            RasterizeReason::DegenerateGrid => write!(f, "degenerate_grid"),
            RasterizeReason::InvalidPixelSize => write!(f, "invalid_pixel_size"),
            RasterizeReason::WriteFailed => write!(f, "write_failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MosaicReason {
    NoInputs,
    CrsMismatch,
    ReadFailed,
    WriteFailed,
}

impl fmt::Display for MosaicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MosaicReason::NoInputs => write!(f, "no_inputs"),
            MosaicReason::CrsMismatch => write!(f, "crs_mismatch"),
            MosaicReason::ReadFailed => write!(f, "read_failed"),
            MosaicReason::WriteFailed => write!(f, "write_failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipReason {
    UnsupportedCrs,
    EmptyIntersection,
    ReadFailed,
    WriteFailed,
}

impl fmt::Display for ClipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipReason::UnsupportedCrs => write!(f, "unsupported_crs"),
            ClipReason::EmptyIntersection => write!(f, "empty_intersection"),
            ClipReason::ReadFailed => write!(f, "read_failed"),
            ClipReason::WriteFailed => write!(f, "write_failed"),
        }
    }
}

/// Error types for the acquisition and raster pipeline
#[derive(Debug, thiserror::Error)]
pub enum SpratError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Catalog query failed: {0}")]
    Catalog(String),

    #[error("Transfer failed ({reason}): {detail}")]
    Transfer { reason: TransferReason, detail: String },

    #[error("Extraction failed ({reason}): {detail}")]
    Extract { reason: ExtractReason, detail: String },

    #[error("Rasterization failed ({reason}): {detail}")]
    Rasterize { reason: RasterizeReason, detail: String },

    #[error("Mosaic failed ({reason}): {detail}")]
    Mosaic { reason: MosaicReason, detail: String },

    #[error("Clip failed ({reason}): {detail}")]
    Clip { reason: ClipReason, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl SpratError {
    /// Errors that abort the whole run rather than a single product
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SpratError::Auth(_)
                | SpratError::Catalog(_)
                | SpratError::Config(_)
                | SpratError::Transfer {
                    reason: TransferReason::RedirectLoop | TransferReason::Unauthorized(_),
                    ..
                }
        )
    }

    pub(crate) fn transfer(reason: TransferReason, detail: impl Into<String>) -> Self {
        SpratError::Transfer { reason, detail: detail.into() }
    }

    pub(crate) fn extract(reason: ExtractReason, detail: impl Into<String>) -> Self {
        SpratError::Extract { reason, detail: detail.into() }
    }

    pub(crate) fn rasterize(reason: RasterizeReason, detail: impl Into<String>) -> Self {
        SpratError::Rasterize { reason, detail: detail.into() }
    }

    pub(crate) fn mosaic(reason: MosaicReason, detail: impl Into<String>) -> Self {
        SpratError::Mosaic { reason, detail: detail.into() }
    }

    pub(crate) fn clip(reason: ClipReason, detail: impl Into<String>) -> Self {
        SpratError::Clip { reason, detail: detail.into() }
    }
}

/// Result type for pipeline operations
pub type SpratResult<T> = Result<T, SpratError>;
