//! End-to-end pipeline tests.
//!
//! Sources are pre-seeded in the workspace so no network access happens, and
//! every external tool is replaced by `MockExecutor` hooks that produce the
//! files the real tools would.

use std::fs;
use std::path::{Path, PathBuf};
use tinyvm_core::{BuildReport, BuildSettings, CoreError, Engine, Stage};
use tinyvm_runtime::{CommandSpec, MockExecutor, ProcessOutput, RuntimeError};
use tinyvm_schema::{parse_config_str, BuildConfig};

const BASE_CONFIG: &str = r#"
[general]
name = "demo"
target_arch = "x86_64"

[kernel]
version = "6.1"

[kernel.options]
CONFIG_PRINTK = "y"
CONFIG_TTY = "'y'"

[applications.hello]
url = "https://example.com/src/hello-1.0.tar.gz"
config_script = "./configure --prefix=/"
output_executable_path = "/bin/hello --greet world"
"#;

const NET_CONFIG: &str = r#"
[general]
name = "netdemo"

[kernel]
version = "6.1"

[applications.server]
url = "https://example.com/src/server-2.0.tar.gz"
output_executable_path = "/bin/server"
include_net = true

[applications.unused]
url = "https://example.com/src/other.tar.gz"
output_executable_path = "/bin/other"

[boot.network]
ip_address = "10.0.2.15"
netmask = "255.255.255.0"
gateway = "10.0.2.2"
"#;

fn ok() -> Option<Result<ProcessOutput, RuntimeError>> {
    Some(Ok(ProcessOutput::default()))
}

fn write(path: &Path, contents: &[u8]) -> Option<Result<ProcessOutput, RuntimeError>> {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            return Some(Err(e.into()));
        }
    }
    Some(fs::write(path, contents).map(|()| ProcessOutput::default()).map_err(Into::into))
}

fn toolchain_mock(install_executable: bool) -> MockExecutor {
    with_toolchain(MockExecutor::new(), install_executable)
}

/// Behaves like the real toolchain for the parts the pipeline checks.
fn with_toolchain(base: MockExecutor, install_executable: bool) -> MockExecutor {
    base.with_hook(move |spec: &CommandSpec| {
        let last = spec.argv.last()?;
        if last == "bzImage" {
            return write(&spec.cwd.join("arch/x86/boot/bzImage"), b"kernel-image");
        }
        if let Some(destdir) = last.strip_prefix("DESTDIR=") {
            if !install_executable {
                return ok();
            }
            let root = PathBuf::from(destdir);
            let exe = if spec.cwd.ends_with("server-2.0") { "bin/server" } else { "bin/hello" };
            return write(&root.join(exe), b"#!app");
        }
        if let Some(pos) = spec.argv.iter().position(|a| a == "-o") {
            return write(Path::new(&spec.argv[pos + 1]), b"\x7fELF");
        }
        if let Some(out) = &spec.stdout_file {
            return write(out, b"070701archive");
        }
        None
    })
}

fn settings(root: &Path) -> BuildSettings {
    let terminfo = root.join("host-terminfo");
    fs::create_dir_all(terminfo.join("v")).unwrap();
    fs::write(terminfo.join("v/vt100"), b"vt100-entry").unwrap();

    let mut s = BuildSettings::default();
    s.toolchain.make_command = vec!["make".to_owned(), "-j2".to_owned()];
    s.privilege_command = Vec::new();
    s.terminfo_root = terminfo;
    s
}

/// Place cached tarballs and already-extracted trees so the acquirer never
/// touches the network.
fn seed_sources(build_dir: &Path, config: &BuildConfig) {
    let ws = Engine::workspace(config, build_dir).unwrap();
    let kernel_dir = ws.kernel_dir();
    fs::create_dir_all(kernel_dir.join(format!("linux-{}", config.kernel.version))).unwrap();
    fs::write(kernel_dir.join(config.kernel_tarball_name()), b"cached").unwrap();

    let apps_dir = ws.apps_dir();
    for (_, app) in config.applications.iter() {
        let tarball = app.tarball_name();
        let dir = tinyvm_runtime::predicted_dir_name(Path::new(&tarball));
        fs::create_dir_all(apps_dir.join(dir)).unwrap();
        fs::write(apps_dir.join(&tarball), b"cached").unwrap();
    }
}

fn setup(config_src: &str) -> (tempfile::TempDir, BuildConfig, BuildSettings) {
    let dir = tempfile::tempdir().unwrap();
    let config = parse_config_str(config_src).unwrap();
    seed_sources(dir.path(), &config);
    let settings = settings(dir.path());
    (dir, config, settings)
}

#[test]
fn full_build_produces_kernel_archive_and_report() {
    let (dir, config, settings) = setup(BASE_CONFIG);
    let mock = toolchain_mock(true);
    let engine = Engine::new(&mock, settings);

    let result = engine.build(&config, dir.path()).unwrap();
    let out = dir.path().join("demo-build/output_vms");

    assert_eq!(result.kernel_image, out.join("bzImage"));
    assert_eq!(fs::read(&result.kernel_image).unwrap(), b"kernel-image");
    assert_eq!(result.archive, out.join("rootfs.cpio"));
    assert_eq!(fs::read(&result.archive).unwrap(), b"070701archive");
    assert_eq!(result.report_path, out.join("microvm.json"));

    let report = BuildReport::load(&result.report_path).unwrap();
    assert_eq!(report.application, "hello");
    assert_eq!(report.kernel_version, "6.1");
    assert!(!report.network);
    assert_eq!(
        report.archive_blake3,
        blake3::hash(b"070701archive").to_hex().to_string()
    );

    let rootfs = dir.path().join("demo-build/rootfs");
    for d in ["tmp", "proc", "sys", "bin", "dev", "usr/bin"] {
        assert!(rootfs.join(d).is_dir(), "missing {d}");
    }
    assert!(rootfs.join("init").is_file());
    assert!(rootfs.join("bin/hello").is_file());
    assert_eq!(
        fs::read(rootfs.join("usr/share/terminfo/v/vt100")).unwrap(),
        b"vt100-entry"
    );
    assert!(!rootfs.join("netsetup").exists());
    assert!(!rootfs.join("etc/resolv.conf").exists());

    let init_src = fs::read_to_string(dir.path().join("demo-build/generated/init.c")).unwrap();
    assert!(init_src.contains(r#"{"/bin/hello", "--greet", "world", NULL}"#));
    assert!(!init_src.contains("SIOCGIFFLAGS"));
}

#[test]
fn stages_run_in_fixed_order() {
    let (dir, config, settings) = setup(BASE_CONFIG);
    let mock = toolchain_mock(true);
    let engine = Engine::new(&mock, settings);
    let stages = std::sync::Mutex::new(Vec::new());
    engine
        .build_with_progress(&config, dir.path(), &|s: Stage| stages.lock().unwrap().push(s))
        .unwrap();

    assert_eq!(
        stages.into_inner().unwrap(),
        vec![
            Stage::Workspace,
            Stage::Kernel,
            Stage::Application,
            Stage::Rootfs,
            Stage::Archive,
            Stage::Report
        ]
    );

    let order = [
        "make -j2 tinyconfig",
        "scripts/config --set-val CONFIG_PRINTK y",
        "scripts/config --set-val CONFIG_TTY y",
        "make -j2 olddefconfig",
        "make -j2 bzImage",
        "./configure --prefix=/",
        "make install DESTDIR=",
        "mknod -m 666 dev/console c 5 1",
        "init.c -o",
        "find . -print0 | cpio",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|needle| {
            mock.position(needle)
                .unwrap_or_else(|| panic!("no command matching {needle}"))
        })
        .collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "unexpected order: {:?}",
        mock.command_lines()
    );
}

#[test]
fn networking_adds_bootstrap_and_resolver() {
    let (dir, config, settings) = setup(NET_CONFIG);
    let mock = toolchain_mock(true);
    let engine = Engine::new(&mock, settings);

    let result = engine.build(&config, dir.path()).unwrap();
    let rootfs = dir.path().join("netdemo-build/rootfs");

    assert!(rootfs.join("netsetup").is_file());
    assert_eq!(
        fs::read_to_string(rootfs.join("etc/resolv.conf")).unwrap(),
        "nameserver 8.8.8.8\n"
    );
    let generated = dir.path().join("netdemo-build/generated");
    assert!(fs::read_to_string(generated.join("init.c"))
        .unwrap()
        .contains("/netsetup"));
    assert!(fs::read_to_string(generated.join("netsetup.c"))
        .unwrap()
        .contains("\"10.0.2.2\""));

    assert!(result.report.network);
    assert_eq!(result.report.application, "server");
    assert_eq!(result.report.ignored_applications, vec!["unused"]);
    assert!(mock.position("other").is_none());
}

#[test]
fn include_net_without_boot_network_generates_nothing() {
    let src = NET_CONFIG.split("[boot.network]").next().unwrap();
    let (dir, config, settings) = setup(src);
    let mock = toolchain_mock(true);
    Engine::new(&mock, settings).build(&config, dir.path()).unwrap();

    let rootfs = dir.path().join("netdemo-build/rootfs");
    assert!(!rootfs.join("netsetup").exists());
    assert!(!rootfs.join("etc/resolv.conf").exists());
    assert!(mock.position("netsetup.c").is_none());
}

#[test]
fn missing_executable_fails_before_rootfs_and_archive() {
    let (dir, config, settings) = setup(BASE_CONFIG);
    let mock = toolchain_mock(false);
    let engine = Engine::new(&mock, settings);

    let err = engine.build(&config, dir.path()).unwrap_err();
    match err {
        CoreError::Verification { app, executable } => {
            assert_eq!(app, "hello");
            assert_eq!(executable, "/bin/hello");
        }
        other => panic!("unexpected error: {other}"),
    }
    let out = dir.path().join("demo-build/output_vms");
    assert!(!out.join("rootfs.cpio").exists());
    assert!(!dir.path().join("demo-build/rootfs/init").exists());
    assert!(mock.position("mknod").is_none());
    assert!(mock.position("cpio").is_none());
}

#[test]
fn kernel_failure_stops_before_application() {
    let (dir, config, settings) = setup(BASE_CONFIG);
    let mock = MockExecutor::new().fail_when("olddefconfig");
    let engine = Engine::new(&mock, settings);

    let err = engine.build(&config, dir.path()).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Runtime(RuntimeError::ProcessFailed { .. })
    ));
    assert!(mock.position("bzImage").is_none());
    assert!(mock.position("configure").is_none());
}

#[test]
fn device_node_failures_do_not_fail_the_build() {
    let (dir, config, settings) = setup(BASE_CONFIG);
    let mock = with_toolchain(MockExecutor::new().fail_when("mknod"), true);

    let result = Engine::new(&mock, settings)
        .build(&config, dir.path())
        .unwrap();
    assert_eq!(result.devices.failures.len(), 4);
    assert_eq!(result.report.device_failures.len(), 4);
    assert!(result.archive.exists());
}

#[test]
fn rebuild_reuses_workspace_and_replaces_archive() {
    let (dir, config, settings) = setup(BASE_CONFIG);
    let mock = toolchain_mock(true);
    let engine = Engine::new(&mock, settings);

    let first = engine.build(&config, dir.path()).unwrap();
    let second = engine.build(&config, dir.path()).unwrap();
    assert_eq!(first.archive, second.archive);
    assert!(second.archive.exists());

    let leftovers: Vec<_> = fs::read_dir(dir.path().join("demo-build/output_vms"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
}
