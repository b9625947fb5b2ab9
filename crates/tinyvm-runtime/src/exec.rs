use crate::RuntimeError;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One external invocation, optionally feeding its stdout into a second
/// program (`argv | pipe_to`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// Applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub pipe_to: Option<Vec<String>>,
    /// Stdout of the last process in the pipeline is written here instead of
    /// being captured.
    pub stdout_file: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I, cwd: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            timeout: None,
            pipe_to: None,
            stdout_file: None,
        }
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn pipe_to<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipe_to = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_file = Some(path.into());
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }

    /// Human-readable command line, e.g. `find . -print0 | cpio --null -o`.
    pub fn command_line(&self) -> String {
        let mut line = self.argv.join(" ");
        if let Some(second) = &self.pipe_to {
            line.push_str(" | ");
            line.push_str(&second.join(" "));
        }
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs external programs to completion.
///
/// A non-zero exit or an expired timeout is returned as an error; callers
/// propagate it and the build stops.
pub trait Executor: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput, RuntimeError>;
}

/// Executes commands on the build host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostExecutor;

impl HostExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for HostExecutor {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput, RuntimeError> {
        if spec.argv.is_empty() || spec.pipe_to.as_ref().is_some_and(Vec::is_empty) {
            return Err(RuntimeError::EmptyCommand);
        }
        let command_line = spec.command_line();
        debug!("running `{command_line}` in {}", spec.cwd.display());
        let deadline = spec.timeout.map(|t| Instant::now() + t);

        let mut first_cmd = prepare(&spec.argv, spec);
        first_cmd.stdin(Stdio::null());
        match (&spec.pipe_to, &spec.stdout_file) {
            (None, Some(path)) => {
                first_cmd.stdout(Stdio::from(create_output(path)?));
            }
            _ => {
                first_cmd.stdout(Stdio::piped());
            }
        }
        let mut first = spawn(&mut first_cmd, spec.program())?;
        let first_stderr = drain(first.stderr.take());

        let Some(second_argv) = &spec.pipe_to else {
            let stdout = capture_lines(first.stdout.take());
            let status = wait_or_kill(&mut first, deadline, spec)?;
            let output = ProcessOutput {
                code: 0,
                stdout: join_bytes(stdout),
                stderr: join_string(first_stderr),
            };
            return check_status(&command_line, status, output);
        };

        let upstream = first.stdout.take().map_or_else(Stdio::null, Stdio::from);
        let mut second_cmd = prepare(second_argv, spec);
        second_cmd.stdin(upstream);
        if let Some(path) = &spec.stdout_file {
            second_cmd.stdout(Stdio::from(create_output(path)?));
        } else {
            second_cmd.stdout(Stdio::piped());
        }
        let mut second = match spawn(&mut second_cmd, &second_argv[0]) {
            Ok(child) => child,
            Err(e) => {
                kill_tree(&mut first, spec.timeout.is_some());
                return Err(e);
            }
        };
        drop(second_cmd);
        let second_stderr = drain(second.stderr.take());
        let stdout = capture_lines(second.stdout.take());

        let second_status = match wait_or_kill(&mut second, deadline, spec) {
            Ok(status) => status,
            Err(e) => {
                kill_tree(&mut first, spec.timeout.is_some());
                return Err(e);
            }
        };
        let first_status = wait_or_kill(&mut first, deadline, spec)?;

        check_status(
            &spec.argv.join(" "),
            first_status,
            ProcessOutput {
                code: 0,
                stdout: Vec::new(),
                stderr: join_string(first_stderr),
            },
        )?;
        let output = ProcessOutput {
            code: 0,
            stdout: join_bytes(stdout),
            stderr: join_string(second_stderr),
        };
        check_status(&second_argv.join(" "), second_status, output)
    }
}

fn prepare(argv: &[String], spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .current_dir(&spec.cwd)
        .envs(&spec.env)
        .stderr(Stdio::piped());
    // Only timed commands get their own process group; untimed ones stay in
    // the caller's group and keep access to the controlling terminal.
    if spec.timeout.is_some() {
        cmd.process_group(0);
    }
    cmd
}

fn spawn(cmd: &mut Command, program: &str) -> Result<Child, RuntimeError> {
    cmd.spawn().map_err(|source| RuntimeError::Spawn {
        program: program.to_owned(),
        source,
    })
}

fn create_output(path: &Path) -> Result<File, RuntimeError> {
    Ok(File::create(path)?)
}

fn capture_lines<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    let stream = stream?;
    Some(thread::spawn(move || {
        let mut captured = Vec::new();
        for line in BufReader::new(stream).split(b'\n') {
            let Ok(line) = line else { break };
            debug!("| {}", String::from_utf8_lossy(&line));
            captured.extend_from_slice(&line);
            captured.push(b'\n');
        }
        captured
    }))
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    let mut stream = stream?;
    Some(thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        buf
    }))
}

fn join_bytes(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn join_string(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&join_bytes(handle)).trim().to_owned()
}

fn wait_or_kill(
    child: &mut Child,
    deadline: Option<Instant>,
    spec: &CommandSpec,
) -> Result<ExitStatus, RuntimeError> {
    let Some(deadline) = deadline else {
        return Ok(child.wait()?);
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            warn!("`{}` exceeded its timeout, killing it", spec.command_line());
            kill_tree(child, true);
            return Err(RuntimeError::Timeout {
                command: spec.command_line(),
                seconds: spec.timeout.map_or(0, |t| t.as_secs()),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[allow(unsafe_code)]
fn kill_tree(child: &mut Child, grouped: bool) {
    let pid = i32::try_from(child.id()).ok().filter(|_| grouped);
    if let Some(pid) = pid {
        // SAFETY: kill() on the child's own process group; ESRCH if it already exited.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn check_status(
    command: &str,
    status: ExitStatus,
    mut output: ProcessOutput,
) -> Result<ProcessOutput, RuntimeError> {
    if status.success() {
        output.code = status.code().unwrap_or_default();
        return Ok(output);
    }
    Err(RuntimeError::ProcessFailed {
        command: command.to_owned(),
        status: describe_status(status),
        stderr: output.stderr,
    })
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => format!("killed by signal {sig}"),
        None => "unknown status".to_owned(),
    }
}
