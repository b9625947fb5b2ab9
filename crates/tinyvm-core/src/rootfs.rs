use crate::initgen::{init_source, netsetup_source, NETSETUP_PATH};
use crate::settings::BuildSettings;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tinyvm_runtime::{CommandSpec, Executor};
use tinyvm_schema::NetworkConfig;
use tracing::{debug, info, warn};

const SKELETON: &[&str] = &["tmp", "proc", "sys", "bin", "dev", "usr/bin"];
const RESOLV_CONF: &str = "nameserver 8.8.8.8\n";
const TERMINFO_ENTRY: &str = "vt100";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Char,
    Block,
}

impl NodeKind {
    fn flag(self) -> &'static str {
        match self {
            Self::Char => "c",
            Self::Block => "b",
        }
    }

    fn matches(self, ft: fs::FileType) -> bool {
        match self {
            Self::Char => ft.is_char_device(),
            Self::Block => ft.is_block_device(),
        }
    }
}

struct DeviceNode {
    name: &'static str,
    kind: NodeKind,
    major: u32,
    minor: u32,
}

const DEVICE_NODES: &[DeviceNode] = &[
    DeviceNode {
        name: "console",
        kind: NodeKind::Char,
        major: 5,
        minor: 1,
    },
    DeviceNode {
        name: "ttyS0",
        kind: NodeKind::Char,
        major: 4,
        minor: 64,
    },
    DeviceNode {
        name: "tty",
        kind: NodeKind::Char,
        major: 5,
        minor: 0,
    },
    DeviceNode {
        name: "ram0",
        kind: NodeKind::Block,
        major: 1,
        minor: 0,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFailure {
    pub name: String,
    pub reason: String,
}

/// Outcome of device node creation. Failures never stop the build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
    pub failures: Vec<DeviceFailure>,
}

impl DeviceReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Populates the rootfs staging tree around the installed application.
pub struct RootfsAssembler<'a> {
    executor: &'a dyn Executor,
    settings: &'a BuildSettings,
    rootfs: PathBuf,
    generated: PathBuf,
}

impl<'a> RootfsAssembler<'a> {
    /// `generated` receives C sources; it must not be inside `rootfs`.
    pub fn new(
        executor: &'a dyn Executor,
        settings: &'a BuildSettings,
        rootfs: impl Into<PathBuf>,
        generated: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executor,
            settings,
            rootfs: rootfs.into(),
            generated: generated.into(),
        }
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }

    pub fn create_skeleton(&self) -> Result<(), CoreError> {
        for dir in SKELETON {
            fs::create_dir_all(self.rootfs.join(dir))?;
        }
        debug!("rootfs skeleton ready at {}", self.rootfs.display());
        Ok(())
    }

    pub fn create_device_nodes(&self) -> DeviceReport {
        let mut report = DeviceReport::default();
        for node in DEVICE_NODES {
            let rel = format!("dev/{}", node.name);
            let existing = fs::symlink_metadata(self.rootfs.join(&rel)).ok();
            if existing.is_some_and(|m| node.kind.matches(m.file_type())) {
                debug!("device node {rel} already present");
                report.existing.push(node.name.to_owned());
                continue;
            }

            let major = node.major.to_string();
            let minor = node.minor.to_string();
            let argv = self.settings.privileged(&[
                "mknod",
                "-m",
                "666",
                rel.as_str(),
                node.kind.flag(),
                major.as_str(),
                minor.as_str(),
            ]);
            match self.executor.run(&CommandSpec::new(argv, &self.rootfs)) {
                Ok(_) => report.created.push(node.name.to_owned()),
                Err(e) => {
                    warn!("could not create device node {rel}: {e}");
                    report.failures.push(DeviceFailure {
                        name: node.name.to_owned(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(
            "device nodes: {} created, {} existing, {} failed",
            report.created.len(),
            report.existing.len(),
            report.failures.len()
        );
        report
    }

    /// Generate, compile and install `/init`.
    pub fn install_init(&self, argv: &[String], include_net: bool) -> Result<PathBuf, CoreError> {
        info!("compiling init for {}", argv.join(" "));
        self.compile("init", &init_source(argv, include_net))
    }

    /// Compile the network bootstrap and write `/etc/resolv.conf`.
    pub fn install_network(&self, net: &NetworkConfig) -> Result<PathBuf, CoreError> {
        info!(
            "compiling network setup ({} / {} via {})",
            net.ip_address, net.netmask, net.gateway
        );
        let name = NETSETUP_PATH.trim_start_matches('/');
        let binary = self.compile(name, &netsetup_source(net))?;
        let etc = self.rootfs.join("etc");
        fs::create_dir_all(&etc)?;
        fs::write(etc.join("resolv.conf"), RESOLV_CONF)?;
        Ok(binary)
    }

    /// Copy the host's `vt100` terminfo entry into the rootfs. Returns `None`
    /// (with a warning) when the host has none.
    pub fn install_terminfo(&self) -> Result<Option<PathBuf>, CoreError> {
        let Some(source) = find_terminfo(&self.settings.terminfo_root) else {
            warn!(
                "no {TERMINFO_ENTRY} terminfo entry under {}",
                self.settings.terminfo_root.display()
            );
            return Ok(None);
        };
        let dest_dir = self.rootfs.join("usr/share/terminfo/v");
        fs::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join(TERMINFO_ENTRY);
        fs::copy(&source, &dest)?;
        debug!("copied {} to {}", source.display(), dest.display());
        Ok(Some(dest))
    }

    fn compile(&self, name: &str, source: &str) -> Result<PathBuf, CoreError> {
        fs::create_dir_all(&self.generated)?;
        let src_path = self.generated.join(format!("{name}.c"));
        fs::write(&src_path, source)?;

        let output = self.rootfs.join(name);
        let argv = vec![
            self.settings.toolchain.cc.clone(),
            src_path.display().to_string(),
            "-o".to_owned(),
            output.display().to_string(),
            "-static".to_owned(),
        ];
        self.executor
            .run(&CommandSpec::new(argv, &self.generated))?;

        if !output.is_file() {
            return Err(CoreError::MissingArtifact(output.display().to_string()));
        }
        fs::set_permissions(&output, fs::Permissions::from_mode(0o755))?;
        Ok(output)
    }
}

fn find_terminfo(root: &Path) -> Option<PathBuf> {
    // Hosts often ship `vt100` as a symlink to another entry.
    walkdir::WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| e.file_type().is_file() && e.file_name() == std::ffi::OsStr::new(TERMINFO_ENTRY))
        .map(walkdir::DirEntry::into_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinyvm_runtime::{MockExecutor, ProcessOutput};

    /// Mock compiler: writes whatever follows `-o`.
    fn compiling_mock() -> MockExecutor {
        MockExecutor::new().with_hook(|spec| {
            let pos = spec.argv.iter().position(|a| a == "-o")?;
            let out = spec.argv.get(pos + 1)?;
            Some(
                fs::write(out, b"\x7fELF")
                    .map(|()| ProcessOutput::default())
                    .map_err(Into::into),
            )
        })
    }

    fn settings(terminfo: &Path) -> BuildSettings {
        let mut s = BuildSettings::default();
        s.terminfo_root = terminfo.to_path_buf();
        s
    }

    #[test]
    fn skeleton_creates_all_dirs_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockExecutor::new();
        let s = settings(dir.path());
        let asm = RootfsAssembler::new(&mock, &s, dir.path().join("rootfs"), dir.path().join("gen"));
        asm.create_skeleton().unwrap();
        asm.create_skeleton().unwrap();
        for d in SKELETON {
            assert!(asm.rootfs().join(d).is_dir(), "{d} missing");
        }
    }

    #[test]
    fn device_nodes_use_mknod_with_mode_in_rootfs() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockExecutor::new();
        let s = settings(dir.path());
        let rootfs = dir.path().join("rootfs");
        let asm = RootfsAssembler::new(&mock, &s, &rootfs, dir.path().join("gen"));
        let report = asm.create_device_nodes();

        assert!(report.is_complete());
        assert_eq!(report.created, vec!["console", "ttyS0", "tty", "ram0"]);
        assert_eq!(
            mock.command_lines(),
            vec![
                "sudo -n mknod -m 666 dev/console c 5 1",
                "sudo -n mknod -m 666 dev/ttyS0 c 4 64",
                "sudo -n mknod -m 666 dev/tty c 5 0",
                "sudo -n mknod -m 666 dev/ram0 b 1 0",
            ]
        );
        assert!(mock.calls().iter().all(|c| c.cwd == rootfs));
    }

    #[test]
    fn device_failures_are_collected_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockExecutor::new().fail_when("ttyS0");
        let s = settings(dir.path());
        let asm = RootfsAssembler::new(&mock, &s, dir.path(), dir.path().join("gen"));
        let report = asm.create_device_nodes();

        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "ttyS0");
        assert_eq!(report.created, vec!["console", "tty", "ram0"]);
    }

    #[test]
    fn regular_file_in_place_of_node_is_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("dev")).unwrap();
        fs::write(dir.path().join("dev/console"), b"").unwrap();
        let mock = MockExecutor::new();
        let s = settings(dir.path());
        let asm = RootfsAssembler::new(&mock, &s, dir.path(), dir.path().join("gen"));
        let report = asm.create_device_nodes();
        assert!(report.existing.is_empty());
        assert!(mock.position("dev/console").is_some());
    }

    #[test]
    fn real_device_nodes_are_skipped_on_rerun() {
        use std::os::unix::fs::MetadataExt;
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("owner");
        fs::write(&marker, b"").unwrap();
        if fs::metadata(&marker).unwrap().uid() != 0 {
            eprintln!("skipping: mknod needs root");
            return;
        }

        let mut s = settings(dir.path());
        s.privilege_command = Vec::new();
        let rootfs = dir.path().join("rootfs");
        let host = tinyvm_runtime::HostExecutor;
        let asm = RootfsAssembler::new(&host, &s, &rootfs, dir.path().join("gen"));
        asm.create_skeleton().unwrap();
        let first = asm.create_device_nodes();
        if !first.is_complete() {
            eprintln!("skipping: mknod not permitted here");
            return;
        }
        assert_eq!(first.created, vec!["console", "ttyS0", "tty", "ram0"]);

        let mock = MockExecutor::new();
        let asm = RootfsAssembler::new(&mock, &s, &rootfs, dir.path().join("gen"));
        let second = asm.create_device_nodes();
        assert_eq!(second.existing, vec!["console", "ttyS0", "tty", "ram0"]);
        assert!(second.created.is_empty());
        assert!(second.failures.is_empty());
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn node_kind_checks_file_type() {
        // /dev/null is a character device on every Linux host.
        let meta = fs::symlink_metadata("/dev/null").unwrap();
        assert!(NodeKind::Char.matches(meta.file_type()));
        assert!(!NodeKind::Block.matches(meta.file_type()));
    }

    #[test]
    fn init_is_compiled_statically_outside_rootfs() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        let gen = dir.path().join("gen");
        fs::create_dir_all(&rootfs).unwrap();
        let mock = compiling_mock();
        let s = settings(dir.path());
        let asm = RootfsAssembler::new(&mock, &s, &rootfs, &gen);

        let init = asm
            .install_init(&["/bin/app".to_owned(), "-v".to_owned()], false)
            .unwrap();
        assert_eq!(init, rootfs.join("init"));
        let mode = fs::metadata(&init).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        let src = fs::read_to_string(gen.join("init.c")).unwrap();
        assert!(src.contains("\"/bin/app\", \"-v\""));
        assert!(!rootfs.join("init.c").exists());

        let call = &mock.calls()[0];
        assert_eq!(call.argv[0], "cc");
        assert_eq!(call.argv.last().unwrap(), "-static");
        assert_eq!(call.cwd, gen);
    }

    #[test]
    fn missing_compiler_output_is_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockExecutor::new();
        let s = settings(dir.path());
        let asm = RootfsAssembler::new(&mock, &s, dir.path().join("rootfs"), dir.path().join("gen"));
        assert!(matches!(
            asm.install_init(&["/bin/sh".to_owned()], false),
            Err(CoreError::MissingArtifact(_))
        ));
    }

    #[test]
    fn network_writes_binary_and_resolv_conf() {
        let dir = tempfile::tempdir().unwrap();
        let rootfs = dir.path().join("rootfs");
        fs::create_dir_all(&rootfs).unwrap();
        let mock = compiling_mock();
        let s = settings(dir.path());
        let asm = RootfsAssembler::new(&mock, &s, &rootfs, dir.path().join("gen"));
        let net = NetworkConfig {
            ip_address: "192.168.0.100".to_owned(),
            netmask: "255.255.255.0".to_owned(),
            gateway: "192.168.0.1".to_owned(),
        };

        let bin = asm.install_network(&net).unwrap();
        assert_eq!(bin, rootfs.join("netsetup"));
        assert_eq!(
            fs::read_to_string(rootfs.join("etc/resolv.conf")).unwrap(),
            "nameserver 8.8.8.8\n"
        );
    }

    #[test]
    fn terminfo_found_in_nested_dir_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let terminfo = dir.path().join("terminfo");
        fs::create_dir_all(terminfo.join("v")).unwrap();
        fs::write(terminfo.join("v/vt100"), b"compiled-entry").unwrap();
        let rootfs = dir.path().join("rootfs");
        let mock = MockExecutor::new();
        let s = settings(&terminfo);
        let asm = RootfsAssembler::new(&mock, &s, &rootfs, dir.path().join("gen"));

        let copied = asm.install_terminfo().unwrap().unwrap();
        assert_eq!(copied, rootfs.join("usr/share/terminfo/v/vt100"));
        assert_eq!(fs::read(copied).unwrap(), b"compiled-entry");
    }

    #[test]
    fn symlinked_terminfo_entry_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real-entries");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("vt100-am"), b"linked-entry").unwrap();
        let terminfo = dir.path().join("terminfo");
        fs::create_dir_all(terminfo.join("v")).unwrap();
        std::os::unix::fs::symlink(real.join("vt100-am"), terminfo.join("v/vt100")).unwrap();
        let mock = MockExecutor::new();
        let s = settings(&terminfo);
        let asm = RootfsAssembler::new(&mock, &s, dir.path().join("rootfs"), dir.path().join("gen"));

        let copied = asm.install_terminfo().unwrap().unwrap();
        assert_eq!(fs::read(copied).unwrap(), b"linked-entry");
    }

    #[test]
    fn missing_terminfo_is_only_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockExecutor::new();
        let s = settings(&dir.path().join("no-terminfo"));
        let asm = RootfsAssembler::new(&mock, &s, dir.path().join("rootfs"), dir.path().join("gen"));
        assert!(asm.install_terminfo().unwrap().is_none());
    }
}
