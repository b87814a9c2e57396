use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use color_eyre::eyre::{self, Context};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::Failure;
use crate::vm::ClassPath;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive {} not found", .0.display())]
    NotFound(PathBuf),
    #[error("failed to open archive {}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
}

/// A JAR file used as the class path of one run.
pub struct Archive {
    path: PathBuf,
    zip: ZipArchive<BufReader<File>>,
}

impl Archive {
    pub fn open(path: &Path) -> Result<Archive, ArchiveError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ArchiveError::NotFound(path.to_owned()),
            _ => ArchiveError::Unreadable {
                path: path.to_owned(),
                source: ZipError::Io(e),
            },
        })?;

        let zip = ZipArchive::new(BufReader::new(file)).map_err(|source| {
            ArchiveError::Unreadable {
                path: path.to_owned(),
                source,
            }
        })?;

        debug!(path = %path.display(), entries = zip.len(), "opened archive");

        Ok(Archive {
            path: path.to_owned(),
            zip,
        })
    }
}

impl ClassPath for Archive {
    fn read_class(&mut self, name: &str) -> eyre::Result<Option<Vec<u8>>> {
        let entry_name = format!("{name}.class");
        let mut entry = match self.zip.by_name(&entry_name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(e).wrap_err_with(|| {
                    format!("failed to read {entry_name} from {}", self.path.display())
                })
            }
        };

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .wrap_err_with(|| format!("failed to decompress {entry_name}"))?;

        Ok(Some(bytes))
    }
}

impl From<ArchiveError> for Failure {
    fn from(error: ArchiveError) -> Failure {
        match error {
            ArchiveError::NotFound(path) => Failure::ArchiveNotFound(path),
            ArchiveError::Unreadable { path, source } => Failure::ArchiveUnreadable {
                path,
                reason: source.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::FileOptions;
    use zip::ZipWriter;

    use super::*;

    #[test]
    fn reads_class_entries_by_internal_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.jar");

        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        writer
            .start_file("demo/Thing.class", FileOptions::default())
            .unwrap();
        writer.write_all(&[0xca, 0xfe, 0xba, 0xbe]).unwrap();
        writer.finish().unwrap();

        let mut archive = Archive::open(&path).unwrap();
        assert_eq!(
            archive.read_class("demo/Thing").unwrap(),
            Some(vec![0xca, 0xfe, 0xba, 0xbe])
        );
        assert_eq!(archive.read_class("demo/Other").unwrap(), None);
    }

    #[test]
    fn distinguishes_missing_and_corrupt_archives() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.jar");
        assert!(matches!(
            Archive::open(&missing),
            Err(ArchiveError::NotFound(_))
        ));

        let corrupt = dir.path().join("corrupt.jar");
        std::fs::write(&corrupt, b"not a zip file").unwrap();
        assert!(matches!(
            Archive::open(&corrupt),
            Err(ArchiveError::Unreadable { .. })
        ));
    }
}
