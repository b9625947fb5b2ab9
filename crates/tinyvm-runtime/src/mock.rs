use crate::exec::{CommandSpec, Executor, ProcessOutput};
use crate::RuntimeError;
use std::sync::Mutex;

type Hook = Box<dyn Fn(&CommandSpec) -> Option<Result<ProcessOutput, RuntimeError>> + Send + Sync>;

/// Records every command instead of running it.
///
/// Hooks are consulted in registration order; the first one returning `Some`
/// decides the outcome. Without a matching hook the command succeeds, and an
/// empty `stdout_file` is created when one was requested so archive steps
/// leave a file behind.
#[derive(Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<CommandSpec>>,
    hooks: Vec<Hook>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CommandSpec) -> Option<Result<ProcessOutput, RuntimeError>> + Send + Sync + 'static,
    {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Fail every command whose command line contains `needle`.
    #[must_use]
    pub fn fail_when(self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        self.with_hook(move |spec| {
            let line = spec.command_line();
            line.contains(&needle).then(|| {
                Err(RuntimeError::ProcessFailed {
                    command: line,
                    status: "exit code 1".to_owned(),
                    stderr: "mock failure".to_owned(),
                })
            })
        })
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::command_line).collect()
    }

    /// Index of the first recorded command whose line contains `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.command_lines().iter().position(|l| l.contains(needle))
    }
}

impl Executor for MockExecutor {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput, RuntimeError> {
        if spec.argv.is_empty() {
            return Err(RuntimeError::EmptyCommand);
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        for hook in &self.hooks {
            if let Some(result) = hook(spec) {
                return result;
            }
        }
        if let Some(path) = &spec.stdout_file {
            std::fs::write(path, b"")?;
        }
        Ok(ProcessOutput::default())
    }
}
