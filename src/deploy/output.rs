//! Build output handed to Pages.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::config::LaunchConfig;
use crate::error::{LaunchError, LaunchResult};

/// The source directory must exist and contain `index.html`.
pub fn validate_source(dir: &Path) -> LaunchResult<()> {
    if !dir.is_dir() {
        return Err(LaunchError::FileNotFound(format!(
            "source directory {}",
            dir.display()
        )));
    }
    if !dir.join("index.html").is_file() {
        return Err(LaunchError::FileNotFound(format!(
            "index.html in {}",
            dir.display()
        )));
    }
    Ok(())
}

/// Validate the source directory and, when a separate output
/// directory is configured, replace its contents with a copy of the
/// source.
///
/// Returns `true` when files were copied.
pub fn prepare(config: &LaunchConfig) -> LaunchResult<bool> {
    let source = &config.project.source_dir;
    validate_source(source)?;

    let output = config.output_dir_path();
    if output == source.as_path() {
        return Ok(false);
    }
    if output.starts_with(source) {
        return Err(LaunchError::Config(format!(
            "output directory {} is inside source directory {}",
            output.display(),
            source.display()
        )));
    }

    if output.exists() {
        fs::remove_dir_all(output)?;
    }
    copy_dir_all(source, output)?;
    info!(from = %source.display(), to = %output.display(), "build output prepared");
    Ok(true)
}

fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
