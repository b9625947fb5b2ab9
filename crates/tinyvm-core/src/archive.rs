use crate::CoreError;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tinyvm_runtime::{CommandSpec, Executor};
use tracing::info;

pub const ARCHIVE_NAME: &str = "rootfs.cpio";

/// Pack `rootfs` into `output_dir/rootfs.cpio` (newc, uncompressed).
///
/// Entries are listed relative to the rootfs because both `find` and `cpio`
/// run with it as their working directory. The archive is first written to a
/// temporary file in `output_dir`, so a failed run leaves any previous archive
/// in place.
pub fn write_archive(
    executor: &dyn Executor,
    rootfs: &Path,
    output_dir: &Path,
) -> Result<PathBuf, CoreError> {
    if !rootfs.is_dir() {
        return Err(CoreError::MissingArtifact(rootfs.display().to_string()));
    }
    fs::create_dir_all(output_dir)?;

    let tmp = tempfile::Builder::new()
        .prefix(".rootfs-")
        .suffix(".cpio.partial")
        .tempfile_in(output_dir)?;
    let spec = CommandSpec::new(["find", ".", "-print0"], rootfs)
        .pipe_to(["cpio", "--null", "-o", "--format=newc"])
        .stdout_to(tmp.path());
    executor
        .run(&spec)
        .map_err(|e| CoreError::Archive(e.to_string()))?;
    // tempfile creates 0600.
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))?;

    let dest = output_dir.join(ARCHIVE_NAME);
    tmp.persist(&dest)
        .map_err(|e| CoreError::Archive(e.error.to_string()))?;
    info!("rootfs archive written to {}", dest.display());
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinyvm_runtime::{MockExecutor, ProcessOutput};

    #[test]
    fn pipeline_runs_in_rootfs_and_lands_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        let out = dir.path().join("out");
        fs::create_dir_all(&rootfs).unwrap();
        let mock = MockExecutor::new().with_hook(|spec| {
            let target = spec.stdout_file.as_ref()?;
            Some(
                fs::write(target, b"070701")
                    .map(|()| ProcessOutput::default())
                    .map_err(Into::into),
            )
        });

        let archive = write_archive(&mock, &rootfs, &out).unwrap();
        assert_eq!(archive, out.join("rootfs.cpio"));
        assert_eq!(fs::read(&archive).unwrap(), b"070701");
        let mode = fs::metadata(&archive).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);

        let call = &mock.calls()[0];
        assert_eq!(
            call.command_line(),
            "find . -print0 | cpio --null -o --format=newc"
        );
        assert_eq!(call.cwd, rootfs);
        assert_eq!(call.stdout_file.as_ref().unwrap().parent(), Some(out.as_path()));
        // only the final archive remains
        assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
    }

    #[test]
    fn failure_keeps_previous_archive() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        let out = dir.path().join("out");
        fs::create_dir_all(&rootfs).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join(ARCHIVE_NAME), b"previous").unwrap();

        let mock = MockExecutor::new().fail_when("cpio");
        let err = write_archive(&mock, &rootfs, &out).unwrap_err();
        assert!(matches!(err, CoreError::Archive(_)));
        assert_eq!(fs::read(out.join(ARCHIVE_NAME)).unwrap(), b"previous");
        assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
    }

    #[test]
    fn missing_rootfs_is_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockExecutor::new();
        let err = write_archive(&mock, &dir.path().join("none"), dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::MissingArtifact(_)));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn real_cpio_archive_has_relative_paths() {
        if !tinyvm_runtime::prereq::command_exists("cpio") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        fs::create_dir_all(rootfs.join("bin")).unwrap();
        fs::write(rootfs.join("bin/app"), b"app").unwrap();
        let out = dir.path().join("out");

        let archive =
            write_archive(&tinyvm_runtime::HostExecutor, &rootfs, &out).unwrap();
        let bytes = fs::read(archive).unwrap();
        assert!(bytes.starts_with(b"070701"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("bin/app"));
        assert!(!text.contains(&rootfs.display().to_string()));
    }
}
