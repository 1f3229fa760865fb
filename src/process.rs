use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

/// Lines of stderr kept for error reporting.
const STDERR_TAIL_LINES: usize = 40;

/// One external program run: executable, ordered arguments and working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|arg| arg == needle)
    }

    /// Command line rendered for logs, quoting arguments that contain whitespace.
    pub fn command_line(&self) -> String {
        let mut rendered = quote(&self.program.to_string_lossy());
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&quote(arg));
        }
        rendered
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external programs to completion. Substituted with fakes in tests.
pub trait ProcessLauncher {
    fn launch(&self, invocation: &ToolInvocation) -> io::Result<ProcessOutput>;
}

/// Spawns real child processes, forwarding their output line by line to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, invocation: &ToolInvocation) -> io::Result<ProcessOutput> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        debug!(command = %invocation, "Spawning process");
        let mut child = command.spawn()?;

        let stderr = child.stderr.take();
        let label = invocation.label.clone();
        let stderr_reader = thread::spawn(move || {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            if let Some(stream) = stderr {
                let result = forward_lines(stream, |line| {
                    info!(tool = label.as_str(), "{line}");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_string());
                });
                if let Err(err) = result {
                    warn!(tool = label.as_str(), error = %err, "Failed to read stderr");
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let forwarded = match child.stdout.take() {
            Some(mut stdout) => {
                let label = invocation.label.as_str();
                let result = forward_lines(&mut stdout, |line| info!(tool = label, "{line}"));
                // A child writing into a full, unread pipe never exits.
                if result.is_err() && drain(&mut stdout).is_err() {
                    let _ = child.kill();
                }
                result
            }
            None => Ok(()),
        };

        let status = child.wait()?;
        let stderr = stderr_reader.join().unwrap_or_default();
        forwarded?;

        Ok(ProcessOutput {
            exit_code: status.code(),
            stderr,
        })
    }
}

/// Reads `reader` to the end, calling `sink` for every non-empty line. Both `\n` and
/// `\r` end a line, so carriage-return progress meters come through one update at a time.
pub fn forward_lines<R: Read>(reader: R, mut sink: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buffer = [0u8; 4096];
    let mut line = Vec::new();

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        for &byte in &buffer[..read] {
            if byte == b'\n' || byte == b'\r' {
                emit(&mut line, &mut sink);
            } else {
                line.push(byte);
            }
        }
    }
    emit(&mut line, &mut sink);
    Ok(())
}

fn drain(reader: &mut impl Read) -> io::Result<u64> {
    io::copy(reader, &mut io::sink())
}

fn emit(line: &mut Vec<u8>, sink: &mut impl FnMut(&str)) {
    if line.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim_end();
    if !trimmed.is_empty() {
        sink(trimmed);
    }
    line.clear();
}

/// Whether `program` names a file path rather than a bare command looked up on `PATH`.
pub fn is_explicit_path(program: &Path) -> bool {
    program.components().count() > 1 || program.is_absolute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn forward_lines_splits_progress_updates() {
        let input: &[u8] = b"Cloning into 'Xsolla'...\n\
            Receiving objects:  10%\rReceiving objects: 100%\r\ndone\n";
        let mut lines = Vec::new();
        forward_lines(Cursor::new(input), |line| lines.push(line.to_string())).unwrap();
        assert_eq!(
            lines,
            vec![
                "Cloning into 'Xsolla'...",
                "Receiving objects:  10%",
                "Receiving objects: 100%",
                "done"
            ]
        );
    }

    #[test]
    fn forward_lines_flushes_trailing_text() {
        let mut lines = Vec::new();
        forward_lines(Cursor::new(&b"no newline"[..]), |line| {
            lines.push(line.to_string())
        })
        .unwrap();
        assert_eq!(lines, vec!["no newline"]);
    }

    /// Yields `head`, fails once, then yields `rest`.
    struct FailingOnce {
        head: Cursor<Vec<u8>>,
        failed: bool,
        rest: Cursor<Vec<u8>>,
    }

    impl Read for FailingOnce {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let read = self.head.read(buf)?;
            if read > 0 {
                return Ok(read);
            }
            if !self.failed {
                self.failed = true;
                return Err(io::Error::other("pipe broke"));
            }
            self.rest.read(buf)
        }
    }

    #[test]
    fn stdout_is_drained_after_a_read_error() {
        let mut stdout = FailingOnce {
            head: Cursor::new(b"Parsing command line\n".to_vec()),
            failed: false,
            rest: Cursor::new(vec![b'x'; 256 * 1024]),
        };
        let mut lines = Vec::new();

        let err = forward_lines(&mut stdout, |line| lines.push(line.to_string())).unwrap_err();

        assert_eq!(err.to_string(), "pipe broke");
        assert_eq!(lines, vec!["Parsing command line"]);
        assert_eq!(drain(&mut stdout).unwrap(), 256 * 1024);
        assert_eq!(stdout.rest.position(), 256 * 1024);
    }

    #[test]
    fn command_line_quotes_whitespace() {
        let invocation = ToolInvocation::new("editor", "/engine/UE4Editor.exe")
            .arg("-ExecCmds=Automation RunTests Xsolla")
            .arg("-nullRHI");
        assert_eq!(
            invocation.command_line(),
            "/engine/UE4Editor.exe \"-ExecCmds=Automation RunTests Xsolla\" -nullRHI"
        );
        assert!(invocation.has_arg("-nullRHI"));
    }

    #[test]
    fn explicit_paths_are_detected() {
        assert!(!is_explicit_path(Path::new("git")));
        assert!(is_explicit_path(Path::new("/usr/bin/git")));
        assert!(is_explicit_path(Path::new("tools/inspectcode.exe")));
    }

    #[cfg(unix)]
    #[test]
    fn system_launcher_reports_exit_code_and_stderr() {
        let invocation = ToolInvocation::new("sh", "sh")
            .arg("-c")
            .arg("echo building; echo broken >&2; exit 3");
        let output = SystemLauncher.launch(&invocation).unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stderr, "broken");
    }

    #[cfg(unix)]
    #[test]
    fn system_launcher_honours_working_dir() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("marker"), "").unwrap();
        let invocation = ToolInvocation::new("sh", "sh")
            .args(["-c", "test -f marker"])
            .current_dir(temp.path());
        assert!(SystemLauncher.launch(&invocation).unwrap().success());
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let invocation = ToolInvocation::new("missing", "/definitely/not/here/tool.exe");
        assert!(SystemLauncher.launch(&invocation).is_err());
    }
}
