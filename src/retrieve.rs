use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::Endpoints;
use crate::error::{Error, Result, Stage};
use crate::order::OrderId;
use crate::transport::{Retry, Transport, expect_success};
use crate::util::urljoin;

/// Downloads finished order archives and unpacks them.
pub struct ResultRetriever<'a> {
    transport: &'a dyn Transport,
    endpoints: &'a Endpoints,
}

impl<'a> ResultRetriever<'a> {
    pub fn new(transport: &'a dyn Transport, endpoints: &'a Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn archive_url(&self, order_id: &OrderId) -> String {
        urljoin(
            &self.endpoints.download_base,
            &format!("{}.zip", order_id.as_str()),
        )
    }

    /// Downloads `<order_id>.zip` and extracts it into `destination`, returning
    /// the extracted file paths.
    pub fn retrieve(&self, order_id: &OrderId, destination: &Path) -> Result<Vec<PathBuf>> {
        let url = self.archive_url(order_id);
        info!(%order_id, %url, "downloading order archive");
        let resp = expect_success(
            Stage::Download,
            &url,
            self.transport.get(&url, &[], &[], Retry::Transient),
        )?;
        debug!(%order_id, bytes = resp.body.len(), "archive downloaded");

        let files = extract_archive(&resp.body, destination)?;
        info!(
            %order_id,
            files = files.len(),
            destination = %destination.display(),
            "archive extracted"
        );
        Ok(files)
    }
}

/// Extracts every entry of the zip in `bytes` under `destination`.
pub fn extract_archive(bytes: &[u8], destination: &Path) -> Result<Vec<PathBuf>> {
    let fail = |reason: String| Error::Extraction {
        path: destination.to_path_buf(),
        reason,
    };

    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| fail(format!("invalid zip archive: {}", e)))?;

    fs::create_dir_all(destination)
        .map_err(|e| fail(format!("cannot create destination: {}", e)))?;

    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| fail(format!("failed to read zip entry {}: {}", index, e)))?;

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(entry = entry.name(), "skipping entry with unsafe path");
            continue;
        };
        let out_path = destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| fail(format!("failed to create {}: {}", out_path.display(), e)))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| fail(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        let mut out = fs::File::create(&out_path)
            .map_err(|e| fail(format!("failed to create {}: {}", out_path.display(), e)))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| fail(format!("failed to write {}: {}", out_path.display(), e)))?;

        extracted.push(out_path);
    }

    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = zip_with(&[
            ("5000/processed_ATL06_01.h5", "h5-one"),
            ("5000/processed_ATL06_02.h5", "h5-two"),
        ]);
        let dest = dir.path().join("out");
        let files = extract_archive(&bytes, &dest).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(
            fs::read(dest.join("5000/processed_ATL06_02.h5")).unwrap(),
            b"h5-two"
        );
    }

    #[test]
    fn corrupt_archive_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive(b"this is not a zip", dir.path()).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }

    #[test]
    fn unwritable_destination_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let bytes = zip_with(&[("a.h5", "a")]);
        let err = extract_archive(&bytes, &blocker.join("sub")).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }
}
