//! `navlayer inspect` - list and verify archive entries.

use std::path::PathBuf;

use clap::Args;
use navlayer::archive::{ArchiveError, ArchiveReader};

use crate::error::CliError;

/// Arguments for the inspect command.
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Archive to inspect
    pub archive: PathBuf,
    /// Read and checksum every entry instead of only listing the index
    #[arg(long)]
    pub verify: bool,
}

/// Lists archive entries; with `--verify`, reads each payload and reports
/// corrupt entries without aborting the rest.
pub fn run(args: InspectArgs) -> Result<(), CliError> {
    let reader = ArchiveReader::open(&args.archive)?;
    let mut keys: Vec<&str> = reader.keys().collect();
    keys.sort_unstable();

    let mut corrupt = 0usize;
    for key in &keys {
        if args.verify {
            match reader.get(key) {
                Ok(payload) => println!("{key}  {} bytes  ok", payload.len()),
                Err(ArchiveError::ChecksumMismatch { .. }) => {
                    corrupt += 1;
                    println!("{key}  CORRUPT");
                }
                Err(error) => return Err(error.into()),
            }
        } else {
            println!("{key}");
        }
    }
    println!(
        "{} entries{}",
        keys.len(),
        if args.verify {
            format!(", {corrupt} corrupt")
        } else {
            String::new()
        }
    );
    if corrupt > 0 {
        return Err(CliError::Archive(format!("{corrupt} corrupt entries")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use navlayer::archive::ArchiveWriter;
    use tempfile::TempDir;

    #[test]
    fn test_inspect_valid_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("maps.nlar");
        let mut writer = ArchiveWriter::create(&path).unwrap();
        writer.append("tile/10/1/2", b"payload").unwrap();
        writer.finish().unwrap();

        run(InspectArgs {
            archive: path,
            verify: true,
        })
        .unwrap();
    }

    #[test]
    fn test_inspect_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = run(InspectArgs {
            archive: dir.path().join("nope.nlar"),
            verify: false,
        });
        assert!(result.is_err());
    }
}
