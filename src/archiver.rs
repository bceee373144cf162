//! Archiver (`spec.md` §4.6 step 4, §4.7 "thin wrappers").
//!
//! Recursively zips a finalised study directory with entries relative to the
//! directory root. Grounded in
//! `examples/original_source/pixieveil/storage/zip_manager.py::create_zip`
//! (`rglob("*")` + `relative_to`); the `zip` crate is not used anywhere in the
//! example pack, but is the one dependency this transformation adds outright
//! (see `DESIGN.md`) since no example repo writes ZIP archives.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use snafu::{ResultExt, Snafu};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("could not create archive at {}: {source}", path.display()))]
    Create {
        path: std::path::PathBuf,
        source: io::Error,
    },
    #[snafu(display("could not read {}: {source}", path.display()))]
    ReadEntry {
        path: std::path::PathBuf,
        source: io::Error,
    },
    #[snafu(display("could not write zip entry for {}: {source}", path.display()))]
    WriteEntry {
        path: std::path::PathBuf,
        source: zip::result::ZipError,
    },
    #[snafu(display("could not finalise archive: {source}"))]
    Finish { source: zip::result::ZipError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Zips every regular file under `study_dir` into `zip_path`, with archive
/// entries relative to `study_dir` (`spec.md` §4.6 step 4: "entries relative
/// to that root").
pub fn create_archive(study_dir: &Path, zip_path: &Path) -> Result<()> {
    let file = File::create(zip_path).context(CreateSnafu { path: zip_path.to_path_buf() })?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(study_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let arcname = path
            .strip_prefix(study_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        writer
            .start_file(arcname, options)
            .context(WriteEntrySnafu { path: path.to_path_buf() })?;
        let bytes = std::fs::read(path).context(ReadEntrySnafu { path: path.to_path_buf() })?;
        writer
            .write_all(&bytes)
            .context(ReadEntrySnafu { path: path.to_path_buf() })?;
    }

    writer.finish().context(FinishSnafu)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn archive_contains_every_file_with_relative_names() {
        let study = tempdir().unwrap();
        std::fs::create_dir_all(study.path().join("0001")).unwrap();
        std::fs::write(study.path().join("0001/0001.dcm"), b"abc").unwrap();
        std::fs::write(study.path().join("0001/0002.dcm"), b"def").unwrap();

        let zip_path = study.path().with_extension("zip");
        create_archive(study.path(), &zip_path).unwrap();

        let file = File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        assert_eq!(archive.len(), 2);
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"0001/0001.dcm".to_string()));
        assert!(names.contains(&"0001/0002.dcm".to_string()));
    }
}
