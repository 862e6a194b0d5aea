//! External command execution
//!
//! Every call to the tunnel tooling, the firewall shell and the resolver
//! flush goes through [`CommandRunner`], so tests can script the outside
//! world and production runs are time-bounded.

use super::PlatformError;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Output returned for a successful command that printed nothing
pub const EMPTY_OUTPUT: &str = "ok";

pub trait CommandRunner: Send + Sync {
    /// Resolve `program` to an executable path, or `None` if it is missing.
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Run `program` to completion and return its stdout.
    fn run(
        &self,
        program: &Path,
        args: &[String],
    ) -> impl Future<Output = Result<String, PlatformError>> + Send;
}

/// Runs real processes with `tokio::process`, bounded by a timeout.
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        locate_program(program)
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<String, PlatformError> {
        let command = describe(program, args);
        debug!("Running: {}", command);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW
            cmd.creation_flags(0x0800_0000);
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(PlatformError::NotInstalled {
                    program: program.display().to_string(),
                });
            }
            Ok(Err(source)) => return Err(PlatformError::SpawnError { command, source }),
            Err(_) => {
                return Err(PlatformError::TimedOut {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = failure_message(&stderr, &stdout, &output.status.to_string());
            debug!("{} failed: {}", command, message);
            return Err(PlatformError::CommandFailed { command, message });
        }

        Ok(success_output(&stdout))
    }
}

/// Human-readable diagnostic for a failed command: stderr, else stdout,
/// else the exit status.
pub fn failure_message(stderr: &str, stdout: &str, status: &str) -> String {
    [stderr, stdout]
        .into_iter()
        .map(str::trim)
        .find(|text| !text.is_empty())
        .unwrap_or(status)
        .to_string()
}

pub fn success_output(stdout: &str) -> String {
    if stdout.trim().is_empty() {
        EMPTY_OUTPUT.to_string()
    } else {
        stdout.to_string()
    }
}

/// Command line as shown in logs and error payloads
pub fn describe(program: &Path, args: &[String]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Find an executable: explicit paths must exist, bare names are looked up
/// on `PATH`.
pub fn locate_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
