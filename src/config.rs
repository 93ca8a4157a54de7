use crate::core::clip::ClipOptions;
use crate::core::quality::{QualityMask, UnitCorrection};
use crate::io::catalog::CatalogConfig;
use crate::io::swath::SwathLayout;
use crate::io::transfer::TransferOptions;
use crate::types::{AreaOfInterest, SpratError, SpratResult, TimeWindow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything one pipeline run needs apart from credentials.
///
/// The query and output fields have no defaults and must be supplied; only
/// the tuning sections (`transfer`, `swath`, `quality`, `clip`) fall back to
/// defaults when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub collection: String,
    pub product_type: String,
    pub aoi: AreaOfInterest,
    pub time_window: TimeWindow,
    pub max_results: usize,
    /// Output pixel size in degrees
    pub pixel_size: f64,
    /// Rasters, mosaic and clip output
    pub output_dir: PathBuf,
    /// Downloads and extracted products
    pub working_dir: PathBuf,
    /// GeoJSON clip boundary; the AOI is used when absent
    #[serde(default)]
    pub boundary_path: Option<PathBuf>,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub transfer: TransferOptions,
    #[serde(default)]
    pub swath: SwathLayout,
    #[serde(default = "QualityMask::slstr_lst")]
    pub quality: QualityMask,
    /// Overrides the correction derived from `product_type`
    #[serde(default)]
    pub unit_correction: Option<UnitCorrection>,
    #[serde(default)]
    pub clip: ClipOptions,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> SpratResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SpratError::Config(format!("malformed configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SpratResult<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| SpratError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> SpratResult<()> {
        if self.collection.trim().is_empty() {
            return Err(SpratError::Config("collection must not be empty".to_string()));
        }
        if self.product_type.trim().is_empty() {
            return Err(SpratError::Config("product_type must not be empty".to_string()));
        }
        if self.max_results == 0 {
            return Err(SpratError::Config("max_results must be at least 1".to_string()));
        }
        if !self.pixel_size.is_finite() || self.pixel_size <= 0.0 {
            return Err(SpratError::Config(format!("pixel_size must be positive, got {}", self.pixel_size)));
        }
        if self.catalog.base_url.trim().is_empty() {
            return Err(SpratError::Config("catalog.base_url must not be empty".to_string()));
        }
        if self.catalog.page_cap == 0 {
            return Err(SpratError::Config("catalog.page_cap must be at least 1".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() || self.working_dir.as_os_str().is_empty() {
            return Err(SpratError::Config("output_dir and working_dir are required".to_string()));
        }
        Ok(())
    }

    /// The configured correction, or the one the product type declares
    pub fn correction(&self) -> UnitCorrection {
        self.unit_correction
            .unwrap_or_else(|| UnitCorrection::for_product_type(&self.product_type))
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.working_dir.join("downloads")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.working_dir.join("extracted")
    }

    pub fn rasters_dir(&self) -> PathBuf {
        self.output_dir.join("rasters")
    }

    pub fn mosaic_path(&self) -> PathBuf {
        self.output_dir.join("mosaic.tif")
    }

    pub fn clipped_path(&self) -> PathBuf {
        self.output_dir.join("clipped.tif")
    }
}
