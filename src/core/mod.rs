//! Raster processing stages

pub mod quality;
pub mod rasterize;
pub mod mosaic;
pub mod clip;

// Re-export main types
pub use quality::{FlagTest, QualityMask, QualityRule, UnitCorrection};
pub use rasterize::{grid_dimensions, SwathRasterizer};
pub use mosaic::{mosaic, mosaic_folder, mosaic_grids, mosaic_to_file};
pub use clip::{clip, clip_file, reproject_boundary, ClipOptions, ClipOutput, Validity};
