//! End-to-end run: resolve, download, extract, rasterize, mosaic, clip.
//!
//! Products fail independently. Authentication, catalog, redirect-loop and
//! unauthorized failures abort the run. Mosaic and clip failures are recorded
//! on the report and leave the per-product results intact.

use crate::config::PipelineConfig;
use crate::core::clip::{clip_file, ClipOutput, Validity};
use crate::core::mosaic::mosaic_to_file;
use crate::core::rasterize::SwathRasterizer;
use crate::io::archive::{extract, list_product_dirs};
use crate::io::auth::Authenticator;
use crate::io::boundary::read_boundary;
use crate::io::catalog::CatalogResolver;
use crate::io::swath::read_product_dir;
use crate::io::transfer::TransferClient;
use crate::types::{
    ClipReason, ExtractReason, MosaicReason, ProductDescriptor, RasterizeReason, SpratError, SpratResult,
    TransferReason, TransferTicket,
};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transfer,
    Extract,
    Rasterize,
    Mosaic,
    Clip,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Transfer => "transfer",
            Stage::Extract => "extract",
            Stage::Rasterize => "rasterize",
            Stage::Mosaic => "mosaic",
            Stage::Clip => "clip",
        };
        f.write_str(name)
    }
}

/// Stage a typed error belongs to; `None` for run-level and untyped errors
fn stage_of(error: &SpratError) -> Option<Stage> {
    match error {
        SpratError::Transfer { .. } => Some(Stage::Transfer),
        SpratError::Extract { .. } => Some(Stage::Extract),
        SpratError::Rasterize { .. } => Some(Stage::Rasterize),
        SpratError::Mosaic { .. } => Some(Stage::Mosaic),
        SpratError::Clip { .. } => Some(Stage::Clip),
        SpratError::Auth(_)
        | SpratError::Catalog(_)
        | SpratError::Config(_)
        | SpratError::Io(_)
        | SpratError::Gdal(_) => None,
    }
}

/// Converts an untyped error raised inside `stage` into that stage's typed error
fn at_stage(stage: Stage, error: SpratError) -> SpratError {
    if error.is_fatal() || stage_of(&error).is_some() {
        return error;
    }
    let detail = error.to_string();
    match stage {
        Stage::Transfer => SpratError::transfer(TransferReason::Io, detail),
        Stage::Extract => SpratError::extract(ExtractReason::Io, detail),
        Stage::Rasterize => SpratError::rasterize(RasterizeReason::MissingInput, detail),
        Stage::Mosaic => SpratError::mosaic(MosaicReason::ReadFailed, detail),
        Stage::Clip => SpratError::clip(ClipReason::ReadFailed, detail),
    }
}

fn tag(stage: Stage) -> impl FnOnce(SpratError) -> (Stage, SpratError) {
    move |e| (stage, at_stage(stage, e))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProductOutcome {
    Rasterized { rasters: Vec<PathBuf> },
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Clone)]
pub struct ProductReport {
    pub product: ProductDescriptor,
    pub outcome: ProductOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub requested: usize,
    pub downloaded: usize,
    pub rasterized: usize,
    /// Rasters that went into the mosaic
    pub mosaicked: usize,
}

/// A mosaic or clip failure; products are unaffected
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeFailure {
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub products: Vec<ProductReport>,
    pub summary: RunSummary,
    pub mosaic: Option<PathBuf>,
    pub clipped: Option<PathBuf>,
    pub composite_failure: Option<CompositeFailure>,
}

impl RunReport {
    pub fn failed_products(&self) -> impl Iterator<Item = &ProductReport> {
        self.products
            .iter()
            .filter(|p| matches!(p.outcome, ProductOutcome::Failed { .. }))
    }
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> SpratResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run with a ticket obtained once from `authenticator`
    pub fn run(&self, authenticator: &dyn Authenticator) -> SpratResult<RunReport> {
        let config = &self.config;
        let ticket = authenticator.token()?;

        let resolver = CatalogResolver::new(config.catalog.clone())?;
        let products = resolver.resolve(
            &config.aoi,
            &config.time_window,
            &config.collection,
            &config.product_type,
            config.max_results,
        )?;

        let mut report = RunReport {
            summary: RunSummary { requested: products.len(), ..Default::default() },
            ..Default::default()
        };
        if products.is_empty() {
            log::warn!("Catalog query matched no products");
        }

        let transfer = TransferClient::new(&config.catalog.base_url, config.downloads_dir(), config.transfer.clone())?;
        let rasterizer = SwathRasterizer::new(config.quality.clone(), config.correction());
        let mut rasters = Vec::new();

        for (i, product) in products.into_iter().enumerate() {
            log::info!("[{}/{}] {}", i + 1, report.summary.requested, product.name);

            let outcome = match self.process_product(&transfer, &rasterizer, &ticket, &product, &mut report.summary) {
                Ok(paths) => {
                    report.summary.rasterized += 1;
                    rasters.extend(paths.iter().cloned());
                    ProductOutcome::Rasterized { rasters: paths }
                }
                Err((_, e)) if e.is_fatal() => {
                    log::error!("Aborting run on {}: {}", product.name, e);
                    return Err(e);
                }
                Err((stage, e)) => {
                    log::warn!("Skipping {} at {}: {}", product.name, stage, e);
                    ProductOutcome::Failed { stage, reason: e.to_string() }
                }
            };
            report.products.push(ProductReport { product, outcome });
        }

        self.composite(&rasters, &mut report);

        let s = &report.summary;
        log::info!(
            "Run finished: {} requested, {} downloaded, {} rasterized, {} mosaicked",
            s.requested,
            s.downloaded,
            s.rasterized,
            s.mosaicked
        );
        Ok(report)
    }

    fn process_product(
        &self,
        transfer: &TransferClient,
        rasterizer: &SwathRasterizer,
        ticket: &TransferTicket,
        product: &ProductDescriptor,
        summary: &mut RunSummary,
    ) -> Result<Vec<PathBuf>, (Stage, SpratError)> {
        let archive = transfer.fetch(ticket, product).map_err(tag(Stage::Transfer))?;
        summary.downloaded += 1;

        let unpacked = extract(&archive, self.config.extracted_dir().join(product.file_stem()))
            .map_err(tag(Stage::Extract))?;

        // archives usually wrap the product in one folder; loose files are the product itself
        let mut product_dirs = list_product_dirs(&unpacked).map_err(tag(Stage::Extract))?;
        if product_dirs.is_empty() {
            product_dirs.push(unpacked);
        }

        let mut outputs = Vec::with_capacity(product_dirs.len());
        for dir in product_dirs {
            let dataset = read_product_dir(&dir, &self.config.swath).map_err(tag(Stage::Rasterize))?;
            let output = self.raster_path(&dir);
            rasterizer
                .rasterize_to_file(&dataset, self.config.pixel_size, &output)
                .map_err(tag(Stage::Rasterize))?;
            outputs.push(output);
        }
        Ok(outputs)
    }

    fn raster_path(&self, product_dir: &Path) -> PathBuf {
        let name = product_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "product".to_string());
        self.config.rasters_dir().join(format!("{}.tif", name))
    }

    fn composite(&self, rasters: &[PathBuf], report: &mut RunReport) {
        let mosaic_path = self.config.mosaic_path();
        if let Err(e) = mosaic_to_file(rasters, &mosaic_path).map_err(|e| at_stage(Stage::Mosaic, e)) {
            log::error!("Mosaic failed: {}", e);
            report.composite_failure = Some(CompositeFailure { stage: Stage::Mosaic, reason: e.to_string() });
            return;
        }
        report.summary.mosaicked = rasters.len();
        report.mosaic = Some(mosaic_path.clone());

        let clipped_path = self.config.clipped_path();
        match self.clip_mosaic(&mosaic_path, &clipped_path).map_err(|e| at_stage(Stage::Clip, e)) {
            Ok(output) => {
                log::info!(
                    "{} pixels inside the boundary had no measurement",
                    output.count(Validity::Substituted)
                );
                report.clipped = Some(clipped_path);
            }
            Err(e) => {
                log::error!("Clip failed: {}", e);
                report.composite_failure = Some(CompositeFailure { stage: Stage::Clip, reason: e.to_string() });
            }
        }
    }

    fn clip_mosaic(&self, mosaic_path: &Path, clipped_path: &Path) -> SpratResult<ClipOutput> {
        let boundary = match &self.config.boundary_path {
            Some(path) => read_boundary(path)?,
            None => self.config.aoi.to_clip_boundary(),
        };
        clip_file(mosaic_path, &boundary, clipped_path, &self.config.clip)
    }
}
