//! GeoTIFF persistence for raster grids.
//!
//! Every stage writes its result through here and re-reads its inputs from
//! disk, so the transform, EPSG tag and nodata value must survive a round trip.

use crate::types::{GeoTransform, RasterGrid, SpratError, SpratResult};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Write a single-band Float64 GeoTIFF
pub fn write_raster<P: AsRef<Path>>(path: P, grid: &RasterGrid) -> SpratResult<()> {
    write_bands(path, &[&grid.data], &grid.transform, grid.epsg, grid.nodata)
}

/// Write one or more same-shaped Float64 bands sharing georeferencing
pub fn write_bands<P: AsRef<Path>>(
    path: P,
    bands: &[&Array2<f64>],
    transform: &GeoTransform,
    epsg: u32,
    nodata: Option<f64>,
) -> SpratResult<()> {
    let path = path.as_ref();
    log::debug!("Writing {} band(s) to {}", bands.len(), path.display());

    let first = bands
        .first()
        .ok_or_else(|| SpratError::Config("no bands to write".to_string()))?;
    let (height, width) = first.dim();
    if bands.iter().any(|b| b.dim() != (height, width)) {
        return Err(SpratError::Config("bands differ in shape".to_string()));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<f64, _>(
        path,
        width as isize,
        height as isize,
        bands.len() as isize,
    )?;

    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;

    for (i, band) in bands.iter().enumerate() {
        let mut rasterband = dataset.rasterband(i as isize + 1)?;
        let flat_data: Vec<f64> = band.iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(nodata)?;
    }

    Ok(())
}

/// Read band 1 with its transform, EPSG code and nodata value
pub fn read_raster<P: AsRef<Path>>(path: P) -> SpratResult<RasterGrid> {
    read_band(path, 1)
}

/// Read a 1-based band
pub fn read_band<P: AsRef<Path>>(path: P, band: isize) -> SpratResult<RasterGrid> {
    let path = path.as_ref();
    log::debug!("Reading band {} from {}", band, path.display());

    let dataset = Dataset::open(path)?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();

    let srs = dataset.spatial_ref()?;
    let epsg = srs.auth_code().map_err(|e| {
        SpratError::Config(format!("{} has no EPSG code: {}", path.display(), e))
    })?;

    let rasterband = dataset.rasterband(band)?;
    let nodata = rasterband.no_data_value();
    let band_data = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;

    let data = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| SpratError::Config(format!("failed to reshape raster data: {}", e)))?;

    Ok(RasterGrid { data, transform, epsg: epsg as u32, nodata })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TARGET_EPSG;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_preserves_georeferencing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("grid.tif");

        let mut data = Array2::from_elem((3, 4), 1.5);
        data[[1, 2]] = f64::NAN;
        data[[2, 3]] = 0.0;
        let grid = RasterGrid {
            data,
            transform: GeoTransform::north_up(6.34, 47.41, 0.25),
            epsg: TARGET_EPSG,
            nodata: Some(f64::NAN),
        };

        write_raster(&path, &grid).unwrap();
        let back = read_raster(&path).unwrap();

        assert_eq!(back.width(), 4);
        assert_eq!(back.height(), 3);
        assert_eq!(back.epsg, TARGET_EPSG);
        assert_eq!(back.transform, grid.transform);
        assert!(back.nodata.unwrap().is_nan());
        assert!(back.data[[1, 2]].is_nan());
        assert_eq!(back.data[[2, 3]], 0.0);
        assert_eq!(back.data[[0, 0]], 1.5);
    }

    #[test]
    fn test_multi_band_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("two.tif");
        let a = Array2::from_elem((2, 2), 7.0);
        let b = Array2::from_elem((2, 2), 1.0);
        let transform = GeoTransform::north_up(0.0, 2.0, 1.0);

        write_bands(&path, &[&a, &b], &transform, TARGET_EPSG, Some(-999.0)).unwrap();

        let band2 = read_band(&path, 2).unwrap();
        assert_eq!(band2.data[[1, 1]], 1.0);
        assert_eq!(band2.nodata, Some(-999.0));
    }

    #[test]
    fn test_write_rejects_mismatched_bands() {
        let dir = TempDir::new().unwrap();
        let a = Array2::<f64>::zeros((2, 2));
        let b = Array2::<f64>::zeros((3, 2));
        let transform = GeoTransform::north_up(0.0, 0.0, 1.0);
        assert!(write_bands(dir.path().join("x.tif"), &[&a, &b], &transform, TARGET_EPSG, None).is_err());
    }
}
