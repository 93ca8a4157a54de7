//! Clipping a raster to a polygon boundary.
//!
//! The boundary is reprojected into the raster's CRS and the raster is cropped
//! to the boundary's bounding box. A pixel is inside when its center is inside
//! the boundary (even-odd rule, holes excluded). Inside pixels keep their value
//! with missing ones replaced by 0. Outside pixels become -999.

use crate::io::geotiff;
use crate::types::{
    BoundingBox, ClipBoundary, ClipReason, GeoTransform, Polygon, RasterGrid, SpratError, SpratResult, CLIP_NODATA,
};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

const WINDOW_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipOptions {
    /// Also write the validity mask as band 2
    #[serde(default)]
    pub validity_band: bool,
}

/// What a clipped pixel holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Validity {
    Outside = 0,
    Measured = 1,
    /// Inside the boundary but missing, written as 0
    Substituted = 2,
}

#[derive(Debug, Clone)]
pub struct ClipOutput {
    pub grid: RasterGrid,
    pub validity: Array2<Validity>,
}

impl ClipOutput {
    pub fn count(&self, kind: Validity) -> usize {
        self.validity.iter().filter(|v| **v == kind).count()
    }
}

fn geographic_ref(epsg: u32) -> SpratResult<SpatialRef> {
    let mut srs = SpatialRef::from_epsg(epsg)
        .map_err(|e| SpratError::clip(ClipReason::UnsupportedCrs, format!("EPSG:{}: {}", epsg, e)))?;
    // lon/lat order regardless of the authority's axis definition
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

fn transform_ring(transform: &CoordTransform, ring: &[(f64, f64)]) -> SpratResult<Vec<(f64, f64)>> {
    let mut xs: Vec<f64> = ring.iter().map(|p| p.0).collect();
    let mut ys: Vec<f64> = ring.iter().map(|p| p.1).collect();
    let mut zs = vec![0.0; ring.len()];
    transform
        .transform_coords(&mut xs, &mut ys, &mut zs)
        .map_err(|e| SpratError::clip(ClipReason::UnsupportedCrs, format!("coordinate transform failed: {}", e)))?;
    Ok(xs.into_iter().zip(ys).collect())
}

/// Boundary expressed in `epsg`
pub fn reproject_boundary(boundary: &ClipBoundary, epsg: u32) -> SpratResult<ClipBoundary> {
    if boundary.epsg == epsg {
        return Ok(boundary.clone());
    }
    log::info!("Reprojecting boundary from EPSG:{} to EPSG:{}", boundary.epsg, epsg);

    let source = geographic_ref(boundary.epsg)?;
    let target = geographic_ref(epsg)?;
    let transform = CoordTransform::new(&source, &target).map_err(|e| {
        SpratError::clip(
            ClipReason::UnsupportedCrs,
            format!("no transform from EPSG:{} to EPSG:{}: {}", boundary.epsg, epsg, e),
        )
    })?;

    let polygons = boundary
        .polygons
        .iter()
        .map(|polygon| {
            Ok(Polygon {
                exterior: transform_ring(&transform, &polygon.exterior)?,
                holes: polygon
                    .holes
                    .iter()
                    .map(|hole| transform_ring(&transform, hole))
                    .collect::<SpratResult<Vec<_>>>()?,
            })
        })
        .collect::<SpratResult<Vec<_>>>()?;

    Ok(ClipBoundary { epsg, polygons })
}

/// Pixel window `(row0, row1, col0, col1)`, half-open, covering `window`
fn pixel_window(raster: &RasterGrid, window: &BoundingBox) -> Option<(usize, usize, usize, usize)> {
    let gt = &raster.transform;
    let px = gt.pixel_width.abs();
    let py = gt.pixel_height.abs();

    let col0 = ((window.min_lon - gt.top_left_x) / px + WINDOW_EPSILON).floor().max(0.0) as usize;
    let col1 = ((window.max_lon - gt.top_left_x) / px - WINDOW_EPSILON).ceil().max(0.0) as usize;
    let row0 = ((gt.top_left_y - window.max_lat) / py + WINDOW_EPSILON).floor().max(0.0) as usize;
    let row1 = ((gt.top_left_y - window.min_lat) / py - WINDOW_EPSILON).ceil().max(0.0) as usize;

    let col1 = col1.min(raster.width());
    let row1 = row1.min(raster.height());
    if col0 >= col1 || row0 >= row1 {
        None
    } else {
        Some((row0, row1, col0, col1))
    }
}

/// Clip `raster` to `boundary`, reprojecting the boundary when needed
pub fn clip(raster: &RasterGrid, boundary: &ClipBoundary) -> SpratResult<ClipOutput> {
    if raster.transform.rotation_x != 0.0 || raster.transform.rotation_y != 0.0 {
        return Err(SpratError::clip(ClipReason::ReadFailed, "rotated rasters are not supported"));
    }

    let boundary = reproject_boundary(boundary, raster.epsg)?;
    let empty = |detail: String| SpratError::clip(ClipReason::EmptyIntersection, detail);

    let boundary_box = boundary
        .bounding_box()
        .ok_or_else(|| empty("boundary has no coordinates".to_string()))?;
    let window = boundary_box
        .intersection(&raster.extent())
        .ok_or_else(|| empty(format!("boundary {:?} does not overlap raster {:?}", boundary_box, raster.extent())))?;
    let (row0, row1, col0, col1) =
        pixel_window(raster, &window).ok_or_else(|| empty(format!("window {:?} holds no pixels", window)))?;

    let gt = &raster.transform;
    let transform = GeoTransform {
        top_left_x: gt.top_left_x + col0 as f64 * gt.pixel_width,
        top_left_y: gt.top_left_y + row0 as f64 * gt.pixel_height,
        ..*gt
    };

    let (height, width) = (row1 - row0, col1 - col0);
    let mut data = Array2::from_elem((height, width), CLIP_NODATA);
    let mut validity = Array2::from_elem((height, width), Validity::Outside);

    for row in 0..height {
        for col in 0..width {
            let (x, y) = transform.pixel_center(row, col);
            if !boundary.contains(x, y) {
                continue;
            }
            let value = raster.data[[row0 + row, col0 + col]];
            if raster.is_valid(value) {
                data[[row, col]] = value;
                validity[[row, col]] = Validity::Measured;
            } else {
                data[[row, col]] = 0.0;
                validity[[row, col]] = Validity::Substituted;
            }
        }
    }

    let output = ClipOutput {
        grid: RasterGrid { data, transform, epsg: raster.epsg, nodata: Some(CLIP_NODATA) },
        validity,
    };
    log::info!(
        "Clipped to {} x {}: {} measured, {} substituted, {} outside",
        width,
        height,
        output.count(Validity::Measured),
        output.count(Validity::Substituted),
        output.count(Validity::Outside)
    );
    Ok(output)
}

/// Read `raster_path`, clip it and write the result
pub fn clip_file<P: AsRef<Path>, Q: AsRef<Path>>(
    raster_path: P,
    boundary: &ClipBoundary,
    output_path: Q,
    options: &ClipOptions,
) -> SpratResult<ClipOutput> {
    let raster_path = raster_path.as_ref();
    let output_path = output_path.as_ref();

    let raster = geotiff::read_raster(raster_path)
        .map_err(|e| SpratError::clip(ClipReason::ReadFailed, format!("{}: {}", raster_path.display(), e)))?;
    let output = clip(&raster, boundary)?;

    let write_failed = |e: SpratError| SpratError::clip(ClipReason::WriteFailed, format!("{}: {}", output_path.display(), e));
    if options.validity_band {
        let mask = output.validity.mapv(|v| v as u8 as f64);
        geotiff::write_bands(
            output_path,
            &[&output.grid.data, &mask],
            &output.grid.transform,
            output.grid.epsg,
            output.grid.nodata,
        )
        .map_err(write_failed)?;
    } else {
        geotiff::write_raster(output_path, &output.grid).map_err(write_failed)?;
    }

    log::info!("Clipped raster written to {}", output_path.display());
    Ok(output)
}
