use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::thread;

use tracing::debug;

use crate::error::{LaunchError, LaunchResult};

/// Output captured from a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    /// Stdout followed by stderr, for text scraping.
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Run a command with `env` merged over the inherited process
/// environment, minus the variables named in `remove`, and capture
/// its output. Fails if the command returns a non-zero exit code.
///
/// With `verbose`, every output line is also echoed to stderr as it
/// arrives.
pub fn run_with_env(
    program: &str,
    args: &[&str],
    env: &[(&str, &str)],
    remove: &[&str],
    verbose: bool,
) -> LaunchResult<Captured> {
    let command = format_command(program, args);
    debug!(%command, "running");

    let mut process = Command::new(program);
    for name in remove {
        process.env_remove(name);
    }
    let mut child = process
        .args(args)
        .envs(env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| not_found_or_io(program, e))?;

    let stderr = child.stderr.take();
    let stderr_reader = thread::spawn(move || stderr.map_or_else(String::new, |s| collect(s, verbose)));

    let stdout = child
        .stdout
        .take()
        .map_or_else(String::new, |s| collect(s, verbose));

    let status = child.wait()?;
    let stderr = stderr_reader.join().unwrap_or_default();

    let captured = Captured {
        stdout: stdout.trim().to_string(),
        stderr: stderr.trim().to_string(),
    };

    if status.success() {
        Ok(captured)
    } else {
        if !verbose && !captured.stderr.is_empty() {
            eprintln!("stderr: {}", captured.stderr);
        }
        Err(LaunchError::CommandFailed {
            command,
            status,
            output: captured.combined(),
        })
    }
}

/// Run a command and capture its stdout.
pub fn run(program: &str, args: &[&str]) -> LaunchResult<String> {
    run_with_env(program, args, &[], &[], false).map(|c| c.stdout)
}

fn collect(stream: impl Read, echo: bool) -> String {
    let mut out = String::new();
    for chunk in BufReader::new(stream).split(b'\n').map_while(Result::ok) {
        let line = String::from_utf8_lossy(&chunk);
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if echo {
            eprintln!("{line}");
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn not_found_or_io(program: &str, e: std::io::Error) -> LaunchError {
    if e.kind() == std::io::ErrorKind::NotFound {
        LaunchError::CommandNotFound(program.to_string())
    } else {
        LaunchError::Io(e)
    }
}

/// Render a command line for logs and errors.
#[must_use]
pub fn format_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|a| (*a).to_string()));
    parts.join(" ")
}
