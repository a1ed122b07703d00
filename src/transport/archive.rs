use std::io::{Read, Seek};

use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::errors::IngestError;

/// Returns `true` when `name` carries a `.csv` extension (any case).
pub fn is_csv_name(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case("csv"))
}

/// Open the first `.csv` entry of a zip archive and hand it to `f`.
///
/// Entries are scanned in archive order; directories are skipped. An archive
/// without any `.csv` entry fails before `f` is invoked.
pub fn with_first_csv_entry<S, T, F>(
    source: S,
    archive_name: &str,
    f: F,
) -> Result<T, IngestError>
where
    S: Read + Seek,
    F: FnOnce(&str, &mut dyn Read) -> Result<T, IngestError>,
{
    let mut archive = ZipArchive::new(source).map_err(map_zip_err)?;
    let mut selected = None;
    for idx in 0..archive.len() {
        let entry = archive.by_index(idx).map_err(map_zip_err)?;
        if !entry.is_dir() && is_csv_name(entry.name()) {
            selected = Some(idx);
            break;
        }
    }
    let Some(idx) = selected else {
        return Err(IngestError::ArchiveWithoutCsv {
            name: archive_name.to_string(),
        });
    };
    let mut entry = archive.by_index(idx).map_err(map_zip_err)?;
    let entry_name = entry.name().to_string();
    debug!(
        archive = archive_name,
        entry = %entry_name,
        index = idx,
        "selected csv entry from archive"
    );
    f(&entry_name, &mut entry)
}

fn map_zip_err(err: ZipError) -> IngestError {
    match err {
        ZipError::Io(err) => IngestError::Io(err),
        other => IngestError::Archive(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(body).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn csv_extension_check_is_case_insensitive() {
        assert!(is_csv_name("inventory.CSV"));
        assert!(is_csv_name("dir/inventory.csv"));
        assert!(!is_csv_name("inventory.csv.txt"));
        assert!(!is_csv_name(".csv"));
    }

    #[test]
    fn first_csv_entry_is_selected() {
        let bytes = archive(&[
            ("readme.txt", b"ignore"),
            ("data.csv/", b""),
            ("first.Csv", b"IMEI\n1\n"),
            ("second.csv", b"IMEI\n2\n"),
        ]);
        let (name, body) = with_first_csv_entry(Cursor::new(bytes), "bundle.zip", |name, reader| {
            let mut body = String::new();
            reader.read_to_string(&mut body)?;
            Ok((name.to_string(), body))
        })
        .unwrap();
        assert_eq!(name, "first.Csv");
        assert_eq!(body, "IMEI\n1\n");
    }

    #[test]
    fn archive_without_csv_fails_before_reading() {
        let bytes = archive(&[("notes.txt", b"IMEI\n1\n")]);
        let mut called = false;
        let err = with_first_csv_entry(Cursor::new(bytes), "bundle.zip", |_, _| {
            called = true;
            Ok(())
        })
        .unwrap_err();
        assert!(!called);
        assert!(matches!(err, IngestError::ArchiveWithoutCsv { ref name } if name == "bundle.zip"));
    }

    #[test]
    fn corrupt_archive_is_reported() {
        let err = with_first_csv_entry(Cursor::new(b"not a zip".to_vec()), "x.zip", |_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(err, IngestError::Archive(_) | IngestError::Io(_)));
    }
}
