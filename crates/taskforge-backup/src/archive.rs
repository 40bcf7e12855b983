use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Write every file under `staging` into a deflate zip at `dest`.
/// The archive is fsynced before this returns so a rename afterwards
/// is durable.
pub(crate) fn write_archive(staging: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)
        .with_context(|| format!("create archive {}", dest.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(staging).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(staging)
            .context("archive entry outside staging dir")?;
        zip.start_file(rel.to_string_lossy(), options)?;
        let data = std::fs::read(entry.path())
            .with_context(|| format!("read {}", entry.path().display()))?;
        zip.write_all(&data)?;
    }

    let file = zip.finish()?;
    file.sync_all()
        .with_context(|| format!("sync archive {}", dest.display()))?;
    Ok(())
}

/// Extract an archive into a directory.
pub(crate) fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("open archive {}", archive.display()))?;
    let mut zip = ZipArchive::new(file)?;
    zip.extract(dest)
        .with_context(|| format!("extract into {}", dest.display()))?;
    Ok(())
}

/// Copy a directory tree, creating `dest`.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).into_iter().flatten() {
        let rel = entry.path().strip_prefix(src)?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
