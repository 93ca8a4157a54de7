//! Merging georeferenced grids into one raster covering their union extent.
//!
//! Resolution is the finest input resolution on each axis. Output pixels take
//! the value of the source pixel containing their center. Inputs are applied in
//! order and a later input only overwrites where it holds a valid value, so
//! gaps in one product never punch holes in another.

use crate::io::geotiff;
use crate::types::{GeoTransform, MosaicReason, RasterGrid, SpratError, SpratResult, MISSING};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Output pixel index range `[start, end)` overlapping `[lo, hi)` on one axis
fn overlapping_range(lo: f64, hi: f64, origin: f64, step: f64, cells: usize) -> (usize, usize) {
    let start = ((lo - origin) / step).floor().max(0.0) as usize;
    let end = ((hi - origin) / step).ceil().max(0.0) as usize;
    (start.min(cells), end.min(cells))
}

/// Merge in-memory grids; later grids win where valid
pub fn mosaic_grids(grids: &[RasterGrid]) -> SpratResult<RasterGrid> {
    let first = grids
        .first()
        .ok_or_else(|| SpratError::mosaic(MosaicReason::NoInputs, "no rasters to merge"))?;

    if let Some(other) = grids.iter().find(|g| g.epsg != first.epsg) {
        return Err(SpratError::mosaic(
            MosaicReason::CrsMismatch,
            format!("EPSG:{} and EPSG:{} in the same mosaic", first.epsg, other.epsg),
        ));
    }

    if grids
        .iter()
        .any(|g| g.transform.rotation_x != 0.0 || g.transform.rotation_y != 0.0)
    {
        return Err(SpratError::mosaic(MosaicReason::ReadFailed, "rotated rasters are not supported"));
    }

    let mut extent = first.extent();
    let mut res_x = first.transform.pixel_width.abs();
    let mut res_y = first.transform.pixel_height.abs();
    for grid in &grids[1..] {
        extent = extent.union(&grid.extent());
        res_x = res_x.min(grid.transform.pixel_width.abs());
        res_y = res_y.min(grid.transform.pixel_height.abs());
    }

    let width = ((extent.width() / res_x).round() as usize).max(1);
    let height = ((extent.height() / res_y).round() as usize).max(1);
    let transform = GeoTransform::north_up_xy(extent.min_lon, extent.max_lat, res_x, res_y);

    log::info!(
        "Merging {} rasters into {} x {} mosaic at {} x {} resolution",
        grids.len(),
        width,
        height,
        res_x,
        res_y
    );

    let mut data = Array2::from_elem((height, width), MISSING);

    for grid in grids {
        let src = &grid.transform;
        let src_extent = grid.extent();
        let (c0, c1) = overlapping_range(src_extent.min_lon, src_extent.max_lon, extent.min_lon, res_x, width);
        let (r0, r1) = overlapping_range(extent.max_lat - src_extent.max_lat, extent.max_lat - src_extent.min_lat, 0.0, res_y, height);

        for row in r0..r1 {
            for col in c0..c1 {
                let (x, y) = transform.pixel_center(row, col);
                let sc = ((x - src.top_left_x) / src.pixel_width).floor();
                let sr = ((y - src.top_left_y) / src.pixel_height).floor();
                if sc < 0.0 || sr < 0.0 || sc >= grid.width() as f64 || sr >= grid.height() as f64 {
                    continue;
                }

                let value = grid.data[[sr as usize, sc as usize]];
                if grid.is_valid(value) {
                    data[[row, col]] = value;
                }
            }
        }
    }

    Ok(RasterGrid { data, transform, epsg: first.epsg, nodata: Some(MISSING) })
}

/// Merge GeoTIFFs in the given order
pub fn mosaic<P: AsRef<Path>>(paths: &[P]) -> SpratResult<RasterGrid> {
    if paths.is_empty() {
        return Err(SpratError::mosaic(MosaicReason::NoInputs, "no rasters to merge"));
    }

    let grids = paths
        .iter()
        .map(|p| {
            geotiff::read_raster(p.as_ref()).map_err(|e| {
                SpratError::mosaic(MosaicReason::ReadFailed, format!("{}: {}", p.as_ref().display(), e))
            })
        })
        .collect::<SpratResult<Vec<_>>>()?;

    mosaic_grids(&grids)
}

/// Merge and write the mosaic as a GeoTIFF
pub fn mosaic_to_file<P: AsRef<Path>, Q: AsRef<Path>>(paths: &[P], output_path: Q) -> SpratResult<RasterGrid> {
    let grid = mosaic(paths)?;
    let output_path = output_path.as_ref();
    geotiff::write_raster(output_path, &grid).map_err(|e| {
        SpratError::mosaic(MosaicReason::WriteFailed, format!("{}: {}", output_path.display(), e))
    })?;
    log::info!("Mosaic written to {}", output_path.display());
    Ok(grid)
}

/// `.tif`/`.tiff` files directly inside `dir`, sorted by name
pub fn collect_rasters<P: AsRef<Path>>(dir: P) -> SpratResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| SpratError::mosaic(MosaicReason::ReadFailed, format!("{}: {}", dir.display(), e)))?;

    let mut rasters: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map(|ext| {
                        let ext = ext.to_string_lossy().to_ascii_lowercase();
                        ext == "tif" || ext == "tiff"
                    })
                    .unwrap_or(false)
        })
        .collect();
    rasters.sort();
    Ok(rasters)
}

/// Merge every raster in `dir` into `output_path`
pub fn mosaic_folder<P: AsRef<Path>, Q: AsRef<Path>>(dir: P, output_path: Q) -> SpratResult<RasterGrid> {
    let rasters = collect_rasters(&dir)?;
    log::info!("Found {} rasters in {}", rasters.len(), dir.as_ref().display());
    mosaic_to_file(&rasters, output_path)
}
