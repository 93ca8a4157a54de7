use crate::types::{ExtractReason, SpratError, SpratResult};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Compressed formats recognised by their magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Gzip,
}

impl ArchiveFormat {
    pub fn sniff(header: &[u8]) -> Option<Self> {
        // local file header, or the end record of an entry-less archive
        if header.len() >= 4
            && (header[0..4] == [0x50, 0x4B, 0x03, 0x04] || header[0..4] == [0x50, 0x4B, 0x05, 0x06])
        {
            Some(ArchiveFormat::Zip)
        } else if header.len() >= 2 && header[0] == 0x1F && header[1] == 0x8B {
            Some(ArchiveFormat::Gzip)
        } else {
            None
        }
    }
}

fn corrupt(archive: &Path, detail: impl std::fmt::Display) -> SpratError {
    SpratError::extract(
        ExtractReason::EmptyOrCorrupt,
        format!("{}: {}", archive.display(), detail),
    )
}

fn io_failure(path: &Path, e: std::io::Error) -> SpratError {
    SpratError::extract(ExtractReason::Io, format!("{}: {}", path.display(), e))
}

/// Unpack `archive_path` into `dest_dir`, then delete the archive
pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(archive_path: P, dest_dir: Q) -> SpratResult<PathBuf> {
    let archive_path = archive_path.as_ref();
    let dest_dir = dest_dir.as_ref();
    log::info!("Extracting {} into {}", archive_path.display(), dest_dir.display());

    let mut header = [0u8; 4];
    let read = File::open(archive_path)
        .and_then(|mut f| f.read(&mut header))
        .map_err(|e| corrupt(archive_path, e))?;

    std::fs::create_dir_all(dest_dir).map_err(|e| io_failure(dest_dir, e))?;

    let entries = match ArchiveFormat::sniff(&header[..read]) {
        Some(ArchiveFormat::Zip) => extract_zip(archive_path, dest_dir)?,
        Some(ArchiveFormat::Gzip) => extract_gzip(archive_path, dest_dir)?,
        None => return Err(corrupt(archive_path, "not a zip or gzip archive")),
    };

    if entries == 0 {
        return Err(corrupt(archive_path, "archive holds no entries"));
    }
    log::debug!("Extracted {} entries", entries);

    if let Err(e) = std::fs::remove_file(archive_path) {
        log::warn!("Could not remove {}: {}", archive_path.display(), e);
    }

    Ok(dest_dir.to_path_buf())
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> SpratResult<usize> {
    let file = File::open(archive_path).map_err(|e| corrupt(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| corrupt(archive_path, e))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| corrupt(archive_path, e))?;

        // rejects absolute paths and `..` components
        let relative = entry
            .enclosed_name()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| corrupt(archive_path, format!("unsafe entry name '{}'", entry.name())))?;
        let out_path = dest_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| io_failure(&out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_failure(parent, e))?;
        }
        let mut out = File::create(&out_path).map_err(|e| io_failure(&out_path, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| corrupt(archive_path, e))?;
        written += 1;
    }

    Ok(written)
}

fn extract_gzip(archive_path: &Path, dest_dir: &Path) -> SpratResult<usize> {
    let file = File::open(archive_path).map_err(|e| corrupt(archive_path, e))?;
    let mut decoder = GzDecoder::new(file);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| corrupt(archive_path, format!("failed to decompress gzip data: {}", e)))?;

    if decompressed.is_empty() {
        return Ok(0);
    }

    let stem = archive_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "product".to_string());
    let out_path = dest_dir.join(stem);
    std::fs::write(&out_path, decompressed).map_err(|e| io_failure(&out_path, e))?;
    Ok(1)
}

/// Immediate subdirectories of `dir`, sorted by name
pub fn list_product_dirs<P: AsRef<Path>>(dir: P) -> SpratResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| io_failure(dir, e))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_extract_zip_and_remove_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("S3A_TEST.zip");
        write_zip(
            &archive,
            &[("S3A_TEST.SEN3/LST_in.nc", b"lst"), ("S3A_TEST.SEN3/flags_in.nc", b"flags")],
        );

        let dest = dir.path().join("unzipped");
        let out = extract(&archive, &dest).unwrap();

        assert_eq!(out, dest);
        assert!(!archive.exists());
        assert_eq!(std::fs::read(dest.join("S3A_TEST.SEN3/LST_in.nc")).unwrap(), b"lst");
        assert_eq!(list_product_dirs(&dest).unwrap(), vec![dest.join("S3A_TEST.SEN3")]);
    }

    #[test]
    fn test_empty_zip_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("empty.zip");
        write_zip(&archive, &[]);

        let err = extract(&archive, dir.path().join("out")).unwrap_err();
        assert!(matches!(err, SpratError::Extract { reason: ExtractReason::EmptyOrCorrupt, .. }));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("bad.zip");
        std::fs::write(&archive, b"<html>error page</html>").unwrap();

        let err = extract(&archive, dir.path().join("out")).unwrap_err();
        assert!(matches!(err, SpratError::Extract { reason: ExtractReason::EmptyOrCorrupt, .. }));
        assert!(archive.exists());
    }

    #[test]
    fn test_missing_archive_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let err = extract(dir.path().join("nope.zip"), dir.path().join("out")).unwrap_err();
        assert!(matches!(err, SpratError::Extract { reason: ExtractReason::EmptyOrCorrupt, .. }));
    }

    #[test]
    fn test_extract_gzip() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("tile.tif.gz");
        let mut enc = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
        enc.write_all(b"raster bytes").unwrap();
        enc.finish().unwrap();

        let dest = dir.path().join("out");
        extract(&archive, &dest).unwrap();
        assert_eq!(std::fs::read(dest.join("tile.tif")).unwrap(), b"raster bytes");
        assert!(!archive.exists());
    }

    #[test]
    fn test_sniff() {
        assert_eq!(ArchiveFormat::sniff(&[0x50, 0x4B, 0x03, 0x04]), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::sniff(&[0x1F, 0x8B, 0x08]), Some(ArchiveFormat::Gzip));
        assert_eq!(ArchiveFormat::sniff(b"<h"), None);
    }
}
