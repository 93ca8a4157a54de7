//! Reading curvilinear swath products from an extracted product directory.
//!
//! Each array lives in its own file. netCDF variables are opened through
//! GDAL's `NETCDF:"file":variable` subdataset syntax; any other file is
//! opened directly and its first band is used.

use crate::types::{QualityLayer, RasterizeReason, SpratError, SpratResult, SwathDataset, MISSING};
use gdal::{Dataset, Metadata};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One array in a product directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRef {
    /// File name relative to the product directory
    pub file: String,
    /// Variable name inside a netCDF file, also the quality layer name
    pub variable: String,
}

impl VariableRef {
    pub fn new(file: impl Into<String>, variable: impl Into<String>) -> Self {
        Self { file: file.into(), variable: variable.into() }
    }

    fn is_netcdf(&self) -> bool {
        let lower = self.file.to_ascii_lowercase();
        lower.ends_with(".nc") || lower.ends_with(".nc4")
    }

    /// GDAL open string for this array inside `product_dir`
    pub fn dataset_name(&self, product_dir: &Path) -> String {
        let path = product_dir.join(&self.file);
        if self.is_netcdf() {
            format!("NETCDF:\"{}\":{}", path.display(), self.variable)
        } else {
            path.display().to_string()
        }
    }
}

/// Where a product family keeps its geolocation, measurement and flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwathLayout {
    pub measurement: VariableRef,
    pub latitude: VariableRef,
    pub longitude: VariableRef,
    #[serde(default)]
    pub quality: Vec<VariableRef>,
}

impl SwathLayout {
    /// Sentinel-3 SLSTR level-2 land surface temperature, nadir view
    pub fn slstr_lst() -> Self {
        Self {
            measurement: VariableRef::new("LST_in.nc", "LST"),
            latitude: VariableRef::new("geodetic_in.nc", "latitude_in"),
            longitude: VariableRef::new("geodetic_in.nc", "longitude_in"),
            quality: vec![
                VariableRef::new("flags_in.nc", "bayes_in"),
                VariableRef::new("flags_in.nc", "confidence_in"),
            ],
        }
    }
}

impl Default for SwathLayout {
    fn default() -> Self {
        Self::slstr_lst()
    }
}

/// A decoded array plus the unit string its file declared
struct DecodedArray {
    values: Array2<f64>,
    units: Option<String>,
}

fn missing_input(detail: impl Into<String>) -> SpratError {
    SpratError::rasterize(RasterizeReason::MissingInput, detail)
}

fn metadata_f64(band: &gdal::raster::RasterBand, key: &str) -> Option<f64> {
    band.metadata_item(key, "").and_then(|v| v.trim().parse::<f64>().ok())
}

/// Read one array, applying `scale_factor`/`add_offset` and turning the fill
/// value into the missing marker unless `raw` is set
fn read_variable(product_dir: &Path, var: &VariableRef, raw: bool) -> SpratResult<DecodedArray> {
    let file = product_dir.join(&var.file);
    if !file.is_file() {
        return Err(missing_input(format!("{} not found", file.display())));
    }

    let name = var.dataset_name(product_dir);
    log::debug!("Opening {}", name);
    let dataset = Dataset::open(Path::new(&name))
        .map_err(|e| missing_input(format!("variable '{}' in {}: {}", var.variable, var.file, e)))?;

    let (width, height) = dataset.raster_size();
    let unreadable = |e: gdal::errors::GdalError| {
        missing_input(format!("unreadable variable '{}' in {}: {}", var.variable, var.file, e))
    };
    let band = dataset.rasterband(1).map_err(unreadable)?;
    let buffer = band
        .read_as::<f64>((0, 0), (width, height), (width, height), None)
        .map_err(unreadable)?;

    let fill = metadata_f64(&band, "_FillValue").or_else(|| band.no_data_value());
    let scale = metadata_f64(&band, "scale_factor").unwrap_or(1.0);
    let offset = metadata_f64(&band, "add_offset").unwrap_or(0.0);
    let units = band.metadata_item("units", "");

    let decoded: Vec<f64> = buffer
        .data
        .into_iter()
        .map(|v| match fill {
            Some(f) if !raw && (v == f || (f.is_nan() && v.is_nan())) => MISSING,
            _ if raw => v,
            _ => v * scale + offset,
        })
        .collect();

    let values = Array2::from_shape_vec((height, width), decoded)
        .map_err(|e| SpratError::rasterize(RasterizeReason::ShapeMismatch, e.to_string()))?;

    Ok(DecodedArray { values, units })
}

/// Load a swath dataset from `product_dir` according to `layout`
pub fn read_product_dir<P: AsRef<Path>>(product_dir: P, layout: &SwathLayout) -> SpratResult<SwathDataset> {
    let product_dir = product_dir.as_ref();
    if !product_dir.is_dir() {
        return Err(missing_input(format!("{} is not a directory", product_dir.display())));
    }
    log::info!("Reading swath from {}", product_dir.display());

    let measurement = read_variable(product_dir, &layout.measurement, false)?;
    let latitude = read_variable(product_dir, &layout.latitude, false)?;
    let longitude = read_variable(product_dir, &layout.longitude, false)?;

    let mut quality = Vec::with_capacity(layout.quality.len());
    for var in &layout.quality {
        let flags = read_variable(product_dir, var, true)?;
        quality.push(QualityLayer {
            name: var.variable.clone(),
            values: flags
                .values
                .iter()
                .map(|v| if v.is_finite() { *v as i64 } else { 0 })
                .collect(),
        });
    }

    let mut dataset = SwathDataset::new(latitude.values, longitude.values, measurement.values, quality)?;
    if let Some(units) = measurement.units {
        dataset = dataset.with_units(units);
    }

    log::info!(
        "Swath {} x {} loaded ({} quality layers)",
        dataset.measurement.nrows(),
        dataset.measurement.ncols(),
        dataset.quality.len()
    );
    Ok(dataset)
}
