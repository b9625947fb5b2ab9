use crate::rootfs::DeviceFailure;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Summary written next to the artifacts after a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub name: String,
    pub image_name: String,
    pub target_arch: String,
    pub kernel_version: String,
    pub application: String,
    pub network: bool,
    pub kernel_image: PathBuf,
    pub kernel_blake3: String,
    pub archive: PathBuf,
    pub archive_blake3: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_applications: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_failures: Vec<DeviceFailure>,
    pub built_at: String,
}

impl BuildReport {
    pub fn path_in(output_dir: &Path, image_name: &str) -> PathBuf {
        output_dir.join(format!("{image_name}.json"))
    }

    pub fn write(&self, path: &Path) -> Result<(), CoreError> {
        let content = serde_json::to_string_pretty(self)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| CoreError::Io(e.error))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Hex blake3 digest of a file's contents.
pub fn digest_file(path: &Path) -> Result<String, CoreError> {
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dir: &Path) -> BuildReport {
        BuildReport {
            name: "demo".to_owned(),
            image_name: "microvm".to_owned(),
            target_arch: "x86_64".to_owned(),
            kernel_version: "6.6".to_owned(),
            application: "hello".to_owned(),
            network: false,
            kernel_image: dir.join("bzImage"),
            kernel_blake3: "00".repeat(32),
            archive: dir.join("rootfs.cpio"),
            archive_blake3: "11".repeat(32),
            ignored_applications: Vec::new(),
            device_failures: vec![DeviceFailure {
                name: "ram0".to_owned(),
                reason: "permission denied".to_owned(),
            }],
            built_at: timestamp(),
        }
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample(dir.path());
        let path = BuildReport::path_in(dir.path(), &report.image_name);
        assert_eq!(path, dir.path().join("microvm.json"));
        report.write(&path).unwrap();
        assert_eq!(BuildReport::load(&path).unwrap(), report);
    }

    #[test]
    fn empty_lists_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = sample(dir.path());
        report.device_failures.clear();
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("device_failures"));
        assert!(!json.contains("ignored_applications"));
    }

    #[test]
    fn digest_matches_blake3_of_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, b"kernel bytes").unwrap();
        assert_eq!(
            digest_file(&path).unwrap(),
            blake3::hash(b"kernel bytes").to_hex().to_string()
        );
    }

    #[test]
    fn timestamp_is_rfc3339() {
        assert!(chrono::DateTime::parse_from_rfc3339(&timestamp()).is_ok());
    }
}
