//! Swath-to-grid rasterization.
//!
//! Every swath sample becomes a `pixel_size` square whose top-left corner sits
//! on the sample's geolocation. Each square is burned into all grid cells it
//! touches. There is no averaging or interpolation: samples are written in
//! row-major swath order and the last write to a cell wins. Masked samples are
//! never burned, so they cannot erase a valid neighbour.

use crate::core::quality::{QualityMask, UnitCorrection};
use crate::io::geotiff;
use crate::types::{
    BoundingBox, GeoTransform, RasterGrid, RasterizeReason, SpratError, SpratResult, SwathDataset, MISSING,
    TARGET_EPSG,
};
use ndarray::Array2;
use std::path::Path;

/// Tolerance, in pixels, for samples sitting on a cell edge
const EDGE_EPSILON: f64 = 1e-9;

/// Output grid shape for an extent: `round(extent / pixel_size)` per axis
pub fn grid_dimensions(bbox: &BoundingBox, pixel_size: f64) -> SpratResult<(usize, usize)> {
    if !pixel_size.is_finite() || pixel_size <= 0.0 {
        return Err(SpratError::rasterize(
            RasterizeReason::InvalidPixelSize,
            format!("pixel size must be positive, got {}", pixel_size),
        ));
    }

    let width = (bbox.width() / pixel_size).round() as usize;
    let height = (bbox.height() / pixel_size).round() as usize;

    if width == 0 || height == 0 {
        return Err(SpratError::rasterize(
            RasterizeReason::DegenerateGrid,
            format!(
                "extent {:.6} x {:.6} at pixel size {} gives a {} x {} grid",
                bbox.width(),
                bbox.height(),
                pixel_size,
                width,
                height
            ),
        ));
    }

    Ok((width, height))
}

/// Inclusive range of cells touched by `[offset, offset + 1)` in pixel units
fn touched_cells(offset: f64, cells: usize) -> Option<(usize, usize)> {
    let first = (offset + EDGE_EPSILON).floor();
    let last = (offset + 1.0 - EDGE_EPSILON).ceil() - 1.0;

    if last < 0.0 || first >= cells as f64 {
        return None;
    }

    let first = first.max(0.0) as usize;
    let last = (last as usize).min(cells - 1);
    Some((first, last))
}

/// Converts swath datasets into north-up grids in the target CRS
#[derive(Debug, Clone)]
pub struct SwathRasterizer {
    pub mask: QualityMask,
    pub correction: UnitCorrection,
}

impl SwathRasterizer {
    pub fn new(mask: QualityMask, correction: UnitCorrection) -> Self {
        Self { mask, correction }
    }

    /// Rasterize a swath at `pixel_size` degrees
    pub fn rasterize(&self, dataset: &SwathDataset, pixel_size: f64) -> SpratResult<RasterGrid> {
        dataset.validate()?;

        let bbox = BoundingBox::from_points(
            dataset.longitude.iter().copied().zip(dataset.latitude.iter().copied()),
        )
        .ok_or_else(|| SpratError::rasterize(RasterizeReason::DegenerateGrid, "no finite geolocation"))?;
        let (width, height) = grid_dimensions(&bbox, pixel_size)?;

        log::info!(
            "Rasterizing {} samples onto {} x {} grid (lon {:.4}..{:.4}, lat {:.4}..{:.4})",
            dataset.sample_count(),
            width,
            height,
            bbox.min_lon,
            bbox.max_lon,
            bbox.min_lat,
            bbox.max_lat
        );

        let mut values = self.mask.apply(dataset)?;
        self.correction.apply_array(&mut values, dataset.units.as_deref());

        let transform = GeoTransform::north_up(bbox.min_lon, bbox.max_lat, pixel_size);
        let mut grid = Array2::from_elem((height, width), MISSING);
        let mut burned = 0usize;

        for ((&lon, &lat), &value) in dataset
            .longitude
            .iter()
            .zip(dataset.latitude.iter())
            .zip(values.iter())
        {
            if !lon.is_finite() || !lat.is_finite() || !value.is_finite() {
                continue;
            }

            let cols = touched_cells((lon - bbox.min_lon) / pixel_size, width);
            let rows = touched_cells((bbox.max_lat - lat) / pixel_size, height);
            let ((c0, c1), (r0, r1)) = match (cols, rows) {
                (Some(c), Some(r)) => (c, r),
                _ => continue,
            };

            for row in r0..=r1 {
                for col in c0..=c1 {
                    grid[[row, col]] = value;
                }
            }
            burned += 1;
        }

        log::debug!("Burned {} of {} samples", burned, dataset.sample_count());

        Ok(RasterGrid {
            data: grid,
            transform,
            epsg: TARGET_EPSG,
            nodata: Some(MISSING),
        })
    }

    /// Rasterize and persist as a single-band GeoTIFF
    pub fn rasterize_to_file<P: AsRef<Path>>(
        &self,
        dataset: &SwathDataset,
        pixel_size: f64,
        output_path: P,
    ) -> SpratResult<RasterGrid> {
        let grid = self.rasterize(dataset, pixel_size)?;
        geotiff::write_raster(output_path.as_ref(), &grid).map_err(|e| {
            SpratError::rasterize(
                RasterizeReason::WriteFailed,
                format!("{}: {}", output_path.as_ref().display(), e),
            )
        })?;
        log::info!("Raster written to {}", output_path.as_ref().display());
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QualityLayer;

    fn swath(lons: &[f64], lats: &[f64], values: &[f64]) -> SwathDataset {
        let n = values.len();
        SwathDataset::new(
            Array2::from_shape_vec((1, n), lats.to_vec()).unwrap(),
            Array2::from_shape_vec((1, n), lons.to_vec()).unwrap(),
            Array2::from_shape_vec((1, n), values.to_vec()).unwrap(),
            Vec::new(),
        )
        .unwrap()
    }

    fn plain() -> SwathRasterizer {
        SwathRasterizer::new(QualityMask::default(), UnitCorrection::Identity)
    }

    #[test]
    fn test_grid_dimensions_follow_rounding_formula() {
        let bbox = BoundingBox { min_lon: 6.34, max_lon: 20.34, min_lat: 36.07, max_lat: 47.41 };
        let (w, h) = grid_dimensions(&bbox, 0.01113158).unwrap();
        assert_eq!(w, 1258);
        assert_eq!(h, (11.34f64 / 0.01113158).round() as usize);
    }

    #[test]
    fn test_degenerate_extent_is_an_error() {
        let line = BoundingBox { min_lon: 0.0, max_lon: 10.0, min_lat: 5.0, max_lat: 5.0 };
        let err = grid_dimensions(&line, 0.1).unwrap_err();
        assert!(matches!(err, SpratError::Rasterize { reason: RasterizeReason::DegenerateGrid, .. }));

        let small = BoundingBox { min_lon: 0.0, max_lon: 0.1, min_lat: 0.0, max_lat: 0.1 };
        assert!(grid_dimensions(&small, 1.0).is_err());
        assert!(grid_dimensions(&small, 0.0).is_err());
    }

    #[test]
    fn test_touched_cells() {
        assert_eq!(touched_cells(2.0, 10), Some((2, 2)));
        assert_eq!(touched_cells(2.3, 10), Some((2, 3)));
        assert_eq!(touched_cells(9.5, 10), Some((9, 9)));
        assert_eq!(touched_cells(10.0, 10), None);
        assert_eq!(touched_cells(-0.5, 10), Some((0, 0)));
        assert_eq!(touched_cells(-1.0, 10), None);
    }

    #[test]
    fn test_transform_origin_and_footprints() {
        // 4 x 2 degree extent at 1 degree pixels
        let ds = swath(&[0.0, 4.0, 1.5], &[2.0, 0.0, 1.0], &[1.0, 2.0, 3.0]);
        let grid = plain().rasterize(&ds, 1.0).unwrap();

        assert_eq!((grid.width(), grid.height()), (4, 2));
        assert_eq!(grid.transform.top_left_x, 0.0);
        assert_eq!(grid.transform.top_left_y, 2.0);
        assert_eq!(grid.transform.pixel_height, -1.0);
        assert_eq!(grid.epsg, TARGET_EPSG);

        // first sample covers exactly cell (0, 0)
        assert_eq!(grid.data[[0, 0]], 1.0);
        // third sample at (1.5, 1.0) straddles columns 1 and 2 of row 1
        assert_eq!(grid.data[[1, 1]], 3.0);
        assert_eq!(grid.data[[1, 2]], 3.0);
        // second sample sits on the far corner and falls off the grid
        assert!(grid.data.iter().all(|v| *v != 2.0));
        assert!(grid.data[[0, 3]].is_nan());
    }

    #[test]
    fn test_last_write_wins() {
        let ds = swath(&[0.0, 0.0, 2.0], &[2.0, 2.0, 0.0], &[5.0, 7.0, 0.0]);
        let grid = plain().rasterize(&ds, 1.0).unwrap();
        assert_eq!(grid.data[[0, 0]], 7.0);

        let reversed = swath(&[0.0, 0.0, 2.0], &[2.0, 2.0, 0.0], &[7.0, 5.0, 0.0]);
        let grid = plain().rasterize(&reversed, 1.0).unwrap();
        assert_eq!(grid.data[[0, 0]], 5.0);
    }

    #[test]
    fn test_masked_sample_does_not_erase_valid_one() {
        let mut ds = swath(&[0.0, 0.0, 2.0], &[2.0, 2.0, 0.0], &[5.0, 7.0, 1.0]);
        ds.quality.push(QualityLayer { name: "bayes_in".into(), values: vec![0, 2, 0] });
        ds.quality.push(QualityLayer { name: "confidence_in".into(), values: vec![0, 0, 0] });

        let rasterizer = SwathRasterizer::new(QualityMask::slstr_lst(), UnitCorrection::Identity);
        let grid = rasterizer.rasterize(&ds, 1.0).unwrap();
        assert_eq!(grid.data[[0, 0]], 5.0);
    }

    #[test]
    fn test_all_bad_yields_only_missing() {
        let mut ds = swath(&[0.0, 1.0, 2.0], &[2.0, 1.0, 0.0], &[0.0, 0.0, 0.0]);
        ds.quality.push(QualityLayer { name: "bayes_in".into(), values: vec![2, 2, 2] });
        ds.quality.push(QualityLayer { name: "confidence_in".into(), values: vec![0, 0, 0] });

        let rasterizer = SwathRasterizer::new(QualityMask::slstr_lst(), UnitCorrection::Identity);
        let grid = rasterizer.rasterize(&ds, 1.0).unwrap();
        assert!(grid.data.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_kelvin_correction_applied() {
        let ds = swath(&[0.0, 2.0], &[2.0, 0.0], &[300.0, 300.0]).with_units("K");
        let rasterizer = SwathRasterizer::new(QualityMask::default(), UnitCorrection::KelvinToCelsius);
        let grid = rasterizer.rasterize(&ds, 1.0).unwrap();
        assert!((grid.data[[0, 0]] - 26.85).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_geolocation_skipped() {
        let ds = swath(&[0.0, f64::NAN, 2.0], &[2.0, 1.0, 0.0], &[1.0, 9.0, 1.0]);
        let grid = plain().rasterize(&ds, 1.0).unwrap();
        assert_eq!((grid.width(), grid.height()), (2, 2));
        assert!(grid.data.iter().all(|v| *v != 9.0));
    }
}
