//! Input transports: raw CSV files, zip archives, and character decoding.
//!
//! Inputs are exposed only through [`InputFile::with_reader`], so the
//! underlying file or archive handle is closed on every exit path of the
//! caller's closure, including parse failures.

mod archive;
mod decode;

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::errors::IngestError;

pub use archive::is_csv_name;
pub use decode::{DecodingReader, resolve_encoding};

/// Container format of an input, decided by file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// Delimited text read as-is.
    Csv,
    /// Zip archive whose first `.csv` entry is read.
    Zip,
}

impl InputKind {
    /// Classify an input name by extension (case-insensitive).
    pub fn detect(name: &str) -> Result<Self, IngestError> {
        if is_csv_name(name) {
            return Ok(Self::Csv);
        }
        let is_zip = name
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case("zip"));
        if is_zip {
            return Ok(Self::Zip);
        }
        Err(IngestError::UnsupportedInput {
            name: name.to_string(),
        })
    }
}

#[derive(Clone, Debug)]
enum InputData {
    Path(PathBuf),
    Memory(Arc<[u8]>),
}

/// A re-openable ingestion input (on disk or in memory).
#[derive(Clone, Debug)]
pub struct InputFile {
    name: String,
    kind: InputKind,
    data: InputData,
}

impl InputFile {
    /// Reference a file on disk. Only `.csv` and `.zip` names are accepted.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let kind = InputKind::detect(&name)?;
        Ok(Self {
            name,
            kind,
            data: InputData::Path(path.to_path_buf()),
        })
    }

    /// Wrap uploaded bytes under a display `name` (its extension picks the kind).
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Result<Self, IngestError> {
        let name = name.into();
        let kind = InputKind::detect(&name)?;
        Ok(Self {
            name,
            kind,
            data: InputData::Memory(bytes.into()),
        })
    }

    /// Display name of the input (file name, not the full path).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container format.
    pub fn kind(&self) -> InputKind {
        self.kind
    }

    /// Open the raw CSV byte stream and hand it to `f`.
    ///
    /// For archives this is the first `.csv` entry; the handle is dropped
    /// when `f` returns, whatever its result.
    pub fn with_reader<T, F>(&self, f: F) -> Result<T, IngestError>
    where
        F: FnOnce(&mut dyn Read) -> Result<T, IngestError>,
    {
        debug!(input = %self.name, kind = ?self.kind, "opening input");
        match (&self.data, self.kind) {
            (InputData::Path(path), InputKind::Csv) => {
                let mut reader = BufReader::new(File::open(path)?);
                f(&mut reader)
            }
            (InputData::Path(path), InputKind::Zip) => {
                let reader = BufReader::new(File::open(path)?);
                archive::with_first_csv_entry(reader, &self.name, |_, entry| f(entry))
            }
            (InputData::Memory(bytes), InputKind::Csv) => {
                let mut reader = Cursor::new(Arc::clone(bytes));
                f(&mut reader)
            }
            (InputData::Memory(bytes), InputKind::Zip) => {
                let reader = Cursor::new(Arc::clone(bytes));
                archive::with_first_csv_entry(reader, &self.name, |_, entry| f(entry))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn kind_detection_uses_extension_only() {
        assert_eq!(InputKind::detect("a.CSV").unwrap(), InputKind::Csv);
        assert_eq!(InputKind::detect("a.Zip").unwrap(), InputKind::Zip);
        assert!(matches!(
            InputKind::detect("a.xlsx"),
            Err(IngestError::UnsupportedInput { .. })
        ));
        assert!(InputKind::detect("csv").is_err());
    }

    #[test]
    fn path_inputs_are_reopenable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("devices.csv");
        fs::write(&path, "IMEI\n1\n").unwrap();
        let input = InputFile::from_path(&path).unwrap();
        assert_eq!(input.name(), "devices.csv");
        for _ in 0..2 {
            let body = input
                .with_reader(|reader| {
                    let mut body = String::new();
                    reader.read_to_string(&mut body)?;
                    Ok(body)
                })
                .unwrap();
            assert_eq!(body, "IMEI\n1\n");
        }
    }

    #[test]
    fn missing_file_surfaces_io_error() {
        let input = InputFile::from_path("/definitely/not/here.csv").unwrap();
        let err = input.with_reader(|_| Ok(())).unwrap_err();
        assert!(matches!(err, IngestError::Io(_)));
    }

    #[test]
    fn memory_inputs_reject_unknown_extensions() {
        let err = InputFile::from_bytes("upload.txt", b"IMEI\n".to_vec()).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedInput { ref name } if name == "upload.txt"));
    }
}
