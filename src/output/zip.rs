//! Bundles the per-kind output files of one pass into a flat ZIP archive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, info};
use zip::unstable::write::FileOptionsExt;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Create a flat archive of `files` at `destination`, optionally protected
/// with the legacy ZIP password scheme the downstream tooling understands.
/// The source files are removed after the archive is finalized.
pub fn zip_output_files(
    files: &[PathBuf],
    destination: &Path,
    password: Option<&str>,
) -> Result<PathBuf> {
    if destination.exists() {
        bail!("archive {} already exists", destination.display());
    }

    let archive = fs::File::create(destination)
        .context(format!("Failed to create {}", destination.display()))?;
    let mut zip = ZipWriter::new(archive);

    let mut options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    if let Some(password) = password {
        options = options.with_deprecated_encryption(password.as_bytes());
    }

    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context(format!("{} has no file name", file.display()))?;
        zip.start_file(name.as_str(), options)
            .context(format!("Failed to start archive entry {}", name))?;
        let mut reader = fs::File::open(file)
            .context(format!("Failed to open {}", file.display()))?;
        io::copy(&mut reader, &mut zip)
            .context(format!("Failed to compress {}", name))?;
        debug!("Added {} to archive", name);
    }

    zip.finish().context("Failed to finalize archive")?;

    for file in files {
        if let Err(e) = fs::remove_file(file) {
            log::warn!("Could not remove {} after zipping: {}", file.display(), e);
        }
    }

    info!(
        "Compressed {} file(s) into {}",
        files.len(),
        destination.display()
    );
    Ok(destination.to_path_buf())
}
