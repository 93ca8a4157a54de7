//! Vector boundaries for the clip stage.
//!
//! Any OGR-readable source works (shapefile, GeoJSON, GeoPackage). Every
//! layer is read; polygons and multipolygons are kept, other geometries are
//! skipped. The source CRS is the layer's spatial reference.

use crate::types::{ClipBoundary, ClipReason, Polygon, SpratError, SpratResult, TARGET_EPSG};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{Geometry, LayerAccess};
use gdal::Dataset;
use gdal_sys::OGRwkbGeometryType;
use std::path::Path;

fn invalid(detail: impl Into<String>) -> SpratError {
    SpratError::Config(format!("invalid boundary: {}", detail.into()))
}

/// EPSG code of a layer CRS; `.prj` files without an authority are identified first
fn epsg_code(mut srs: SpatialRef) -> SpratResult<u32> {
    if srs.auth_code().is_err() {
        if let Ok(name) = srs.auth_name() {
            if name.eq_ignore_ascii_case("OGC") {
                // OGC:CRS84 is EPSG:4326 in lon/lat order
                return Ok(TARGET_EPSG);
            }
        }
        let _ = srs.auto_identify_epsg();
    }

    match (srs.auth_name(), srs.auth_code()) {
        (Ok(name), Ok(code)) if name.eq_ignore_ascii_case("EPSG") && code > 0 => Ok(code as u32),
        _ => Err(SpratError::clip(
            ClipReason::UnsupportedCrs,
            format!("boundary CRS has no EPSG code: {}", srs.to_wkt().unwrap_or_default()),
        )),
    }
}

fn flat_type(geometry: &Geometry) -> OGRwkbGeometryType::Type {
    // strips the Z/M variants down to the 2D type code
    unsafe { gdal_sys::OGR_GT_Flatten(geometry.geometry_type()) }
}

fn ring_points(ring: &Geometry) -> SpratResult<Vec<(f64, f64)>> {
    let points: Vec<(f64, f64)> = ring.get_point_vec().into_iter().map(|(x, y, _)| (x, y)).collect();
    if points.len() < 4 {
        return Err(invalid(format!("ring has {} positions, need at least 4", points.len())));
    }
    Ok(points)
}

fn polygon_from(geometry: &Geometry) -> SpratResult<Option<Polygon>> {
    let rings = geometry.geometry_count();
    if rings == 0 {
        return Ok(None);
    }
    let exterior = ring_points(&geometry.get_geometry(0))?;
    let holes = (1..rings)
        .map(|i| ring_points(&geometry.get_geometry(i)))
        .collect::<SpratResult<Vec<_>>>()?;
    Ok(Some(Polygon { exterior, holes }))
}

fn collect_polygons(geometry: &Geometry, out: &mut Vec<Polygon>) -> SpratResult<()> {
    match flat_type(geometry) {
        OGRwkbGeometryType::wkbPolygon => out.extend(polygon_from(geometry)?),
        OGRwkbGeometryType::wkbMultiPolygon | OGRwkbGeometryType::wkbGeometryCollection => {
            for i in 0..geometry.geometry_count() {
                collect_polygons(&geometry.get_geometry(i), out)?;
            }
        }
        _ => log::debug!("Skipping non-areal geometry {}", geometry.geometry_name()),
    }
    Ok(())
}

/// Read every polygon in a vector file as one clip boundary
pub fn read_boundary<P: AsRef<Path>>(path: P) -> SpratResult<ClipBoundary> {
    let path = path.as_ref();
    log::info!("Reading boundary from {}", path.display());
    if !path.exists() {
        return Err(SpratError::Config(format!("boundary {} not found", path.display())));
    }
    let dataset = Dataset::open(path)
        .map_err(|e| SpratError::Config(format!("cannot open boundary {}: {}", path.display(), e)))?;

    let mut epsg = None;
    let mut polygons = Vec::new();
    for mut layer in dataset.layers() {
        let layer_epsg = match layer.spatial_ref() {
            Some(srs) => epsg_code(srs)?,
            None => TARGET_EPSG,
        };
        match epsg {
            Some(code) if code != layer_epsg => {
                return Err(invalid(format!("layers mix EPSG:{} and EPSG:{}", code, layer_epsg)));
            }
            _ => epsg = Some(layer_epsg),
        }

        for feature in layer.features() {
            if let Some(geometry) = feature.geometry() {
                collect_polygons(geometry, &mut polygons)?;
            }
        }
    }

    if polygons.is_empty() {
        return Err(invalid(format!("no polygon geometries in {}", path.display())));
    }
    let epsg = epsg.unwrap_or(TARGET_EPSG);
    log::debug!("Boundary holds {} polygon(s) in EPSG:{}", polygons.len(), epsg);
    Ok(ClipBoundary { epsg, polygons })
}
