//! `navlayer pack` - build an offline archive from a directory.

use std::path::{Path, PathBuf};

use clap::Args;
use navlayer::archive::ArchiveWriter;

use crate::error::CliError;

/// Arguments for the pack command.
#[derive(Debug, Args)]
pub struct PackArgs {
    /// Directory whose files become archive entries, keyed by relative path
    pub input: PathBuf,
    /// Path of the archive to create
    pub output: PathBuf,
}

/// Packs every file under `input` into a new archive at `output`.
///
/// Entry keys are the '/'-separated paths relative to `input`, matching the
/// cache key layout (`tile/<zoom>/<x>/<y>`, `raster/<id>`).
pub fn run(args: PackArgs) -> Result<(), CliError> {
    if !args.input.is_dir() {
        return Err(CliError::InvalidArgument(format!(
            "{} is not a directory",
            args.input.display()
        )));
    }

    let mut files = Vec::new();
    collect_files(&args.input, &mut files)?;
    files.sort();

    let mut writer = ArchiveWriter::create(&args.output)?;
    for path in &files {
        let key = relative_key(&args.input, path)?;
        let payload = std::fs::read(path)?;
        writer.append(&key, &payload)?;
    }
    let count = writer.entry_count();
    writer.finish()?;
    println!("Packed {count} entries into {}", args.output.display());
    Ok(())
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), CliError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn relative_key(root: &Path, path: &Path) -> Result<String, CliError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| CliError::InvalidArgument(format!("{} outside input", path.display())))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
