//! sprat: Sentinel product retrieval and swath rasterization
//!
//! Resolves catalog queries into products, downloads them through bearer-token
//! redirect chains, and turns curvilinear swath measurements into georeferenced
//! grids that are mosaicked and clipped to an area of interest.

pub mod types;
pub mod config;
pub mod io;
pub mod core;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    AreaOfInterest, TimeWindow, ProductDescriptor, TransferTicket, SwathDataset, QualityLayer,
    BoundingBox, GeoTransform, RasterGrid, ClipBoundary, Polygon, SpratError, SpratResult,
    TARGET_EPSG, CLIP_NODATA, MISSING,
};

pub use config::PipelineConfig;
pub use io::{Authenticator, CatalogResolver, TransferClient, TransferOptions};
pub use pipeline::{Pipeline, ProductOutcome, RunReport, RunSummary};
