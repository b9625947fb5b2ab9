//! Tarball download and extraction.
//!
//! Both steps cache on presence alone: an existing tarball is never
//! re-downloaded and an existing source directory is never re-extracted. A
//! truncated file left behind by an external tool is therefore trusted.

use crate::RuntimeError;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Cached,
    Downloaded { bytes: u64 },
}

pub struct SourceAcquirer {
    agent: ureq::Agent,
}

impl Default for SourceAcquirer {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceAcquirer {
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    /// Download `url` to `destination` unless something already exists there.
    ///
    /// The body is streamed into a temporary file beside `destination` and
    /// renamed into place once complete.
    pub fn fetch(&self, url: &str, destination: &Path) -> Result<FetchOutcome, RuntimeError> {
        if destination.exists() {
            debug!("{} already present, skipping download", destination.display());
            return Ok(FetchOutcome::Cached);
        }
        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        info!("downloading {url}");
        let download_err = |reason: String| RuntimeError::Download {
            url: url.to_owned(),
            reason,
        };
        let resp = match self.agent.get(url).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(download_err(format!("HTTP {code}")));
            }
            Err(e) => return Err(download_err(e.to_string())),
        };
        let code = resp.status().as_u16();
        if !(200..300).contains(&code) {
            return Err(download_err(format!("HTTP {code}")));
        }
        let expected = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let mut reader = resp.into_body().into_reader();
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        let written =
            io::copy(&mut reader, tmp.as_file_mut()).map_err(|e| download_err(e.to_string()))?;
        check_length(url, expected, written);
        tmp.persist(destination).map_err(|e| e.error)?;

        info!("saved {} ({written} bytes)", destination.display());
        Ok(FetchOutcome::Downloaded { bytes: written })
    }

    /// Unpack `tar_path` into `extract_to` and return the source directory.
    ///
    /// Extraction is skipped when the directory predicted from the archive
    /// name already exists. Otherwise the returned directory is the top-level
    /// directory the archive actually contains, which may differ from the
    /// prediction.
    pub fn extract(&self, tar_path: &Path, extract_to: &Path) -> Result<PathBuf, RuntimeError> {
        let compression = Compression::for_path(tar_path)?;
        let predicted = extract_to.join(predicted_dir_name(tar_path));
        if predicted.is_dir() {
            debug!("{} already extracted", predicted.display());
            return Ok(predicted);
        }

        info!("extracting {}", tar_path.display());
        fs::create_dir_all(extract_to)?;
        let file = BufReader::new(File::open(tar_path)?);
        let decoder: Box<dyn Read> = match compression {
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(file)),
        };
        let mut archive = tar::Archive::new(decoder);
        archive.set_preserve_permissions(true);

        let mut top_level: Option<PathBuf> = None;
        for entry in archive.entries()? {
            let mut entry = entry?;
            if top_level.is_none() && entry.header().entry_type().is_dir() {
                let path = entry.path()?;
                top_level = path.components().next().map(|c| PathBuf::from(c.as_os_str()));
            }
            entry.unpack_in(extract_to)?;
        }

        let top_level = top_level.ok_or_else(|| {
            RuntimeError::MissingDirectory(format!(
                "{} contains no directory entries",
                tar_path.display()
            ))
        })?;
        let actual = extract_to.join(top_level);
        if actual != predicted {
            debug!(
                "archive top-level {} differs from predicted {}",
                actual.display(),
                predicted.display()
            );
        }
        Ok(actual)
    }

    /// Fetch then extract.
    pub fn acquire(
        &self,
        url: &str,
        tarball: &Path,
        extract_to: &Path,
    ) -> Result<PathBuf, RuntimeError> {
        self.fetch(url, tarball)?;
        self.extract(tarball, extract_to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Gzip,
    Xz,
}

impl Compression {
    fn for_path(path: &Path) -> Result<Self, RuntimeError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Ok(Self::Gzip),
            Some("xz") => Ok(Self::Xz),
            _ => Err(RuntimeError::UnsupportedArchive(path.display().to_string())),
        }
    }
}

/// Directory name an archive is expected to unpack to: its file name up to
/// the first `.tar`, or the whole file name when there is none.
pub fn predicted_dir_name(tar_path: &Path) -> String {
    let name = tar_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find(".tar") {
        Some(idx) => name[..idx].to_owned(),
        None => name,
    }
}

fn check_length(url: &str, expected: Option<u64>, written: u64) -> bool {
    match expected {
        Some(expected) if expected != written => {
            warn!("size mismatch for {url}: expected {expected} bytes, got {written}");
            false
        }
        _ => true,
    }
}
