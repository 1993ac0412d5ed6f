//! External process execution with captured output.
//!
//! Used for pipeline segments that are neither registry commands nor
//! builtins, for `shell`, and for the optional translator. Output is
//! decoded lossily. A wall-clock limit kills processes that run too long,
//! together with everything they started.

use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command as ProcessCommand, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tether_types::error::{Result, TetherError};

/// How often a running child is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// After a kill, how long to wait for the output pipes to close.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Captured result of one external process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was killed for exceeding its time limit.
    pub status: Option<ExitStatus>,
}

impl ProcessOutput {
    /// Whether the process exited on its own with status zero.
    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }

    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }
}

/// Spawn `argv` in `cwd`, optionally feeding `stdin`, and wait for it.
///
/// A program that cannot be found yields `TetherError::Command` with the
/// shell's usual "command not found" message; other spawn failures are
/// `TetherError::Process`.
pub fn run_process(
    argv: &[String],
    cwd: &Path,
    stdin: Option<&str>,
    timeout: Option<Duration>,
) -> Result<ProcessOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| TetherError::Command("empty command".to_string()))?;

    let mut child = ProcessCommand::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                TetherError::Command(format!("{program}: command not found"))
            },
            _ => TetherError::Process(format!("{program}: {e}")),
        })?;
    log::debug!("spawned {program} (pid {})", child.id());

    let writer = match (stdin, child.stdin.take()) {
        (Some(text), Some(mut pipe)) => {
            let data = text.as_bytes().to_vec();
            Some(thread::spawn(move || {
                // A child that exits without reading closes the pipe; that is not an error.
                let _ = pipe.write_all(&data);
            }))
        },
        _ => None,
    };
    let stdout_reader = child.stdout.take().map(spawn_reader::<ChildStdout>);
    let stderr_reader = child.stderr.take().map(spawn_reader::<ChildStderr>);

    let status = wait_with_deadline(&mut child, program, timeout)?;

    // A killed process may leave survivors holding the pipes; only wait
    // for them briefly and keep what was read so far.
    let drain_deadline = status.is_none().then(|| Instant::now() + DRAIN_GRACE);
    if let Some(handle) = writer
        && drain_deadline.is_none()
    {
        let _ = handle.join();
    }
    let stdout = collect_reader(stdout_reader, drain_deadline);
    let stderr = collect_reader(stderr_reader, drain_deadline);

    Ok(ProcessOutput {
        stdout,
        stderr,
        status,
    })
}

/// Output collected by a reader thread, visible before the thread ends.
type SharedBuf = Arc<Mutex<Vec<u8>>>;

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> (JoinHandle<()>, SharedBuf) {
    let buf = SharedBuf::default();
    let sink = Arc::clone(&buf);
    let handle = thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    log::warn!("reading child output: {e}");
                    break;
                },
            }
        }
    });
    (handle, buf)
}

/// Wait for a reader to hit end of file, but not past `deadline`.
fn collect_reader(
    reader: Option<(JoinHandle<()>, SharedBuf)>,
    deadline: Option<Instant>,
) -> String {
    let Some((handle, buf)) = reader else {
        return String::new();
    };
    match deadline {
        None => {
            let _ = handle.join();
        },
        Some(deadline) => {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(POLL_INTERVAL);
            }
            if !handle.is_finished() {
                log::warn!("output pipe still open after kill, abandoning reader");
            }
        },
    }
    let bytes = buf.lock().unwrap_or_else(PoisonError::into_inner);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Kill every process descended from `root`, leaving `root` itself.
fn kill_descendants(root: u32) {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    let mut family = vec![Pid::from_u32(root)];
    let mut next = 0;
    while next < family.len() {
        let parent = family[next];
        family.extend(
            sys.processes()
                .iter()
                .filter(|(_, p)| p.parent() == Some(parent))
                .map(|(pid, _)| *pid),
        );
        next += 1;
    }
    for pid in &family[1..] {
        if let Some(process) = sys.process(*pid)
            && !process.kill()
        {
            log::warn!("could not kill descendant {pid}");
        }
    }
}

/// Wait for `child`, killing it once `timeout` has elapsed.
fn wait_with_deadline(
    child: &mut Child,
    program: &str,
    timeout: Option<Duration>,
) -> Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return Ok(Some(child.wait()?));
    };
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            log::warn!("{program} exceeded {}s, killing", timeout.as_secs());
            kill_descendants(child.id());
            if let Err(e) = child.kill() {
                log::warn!("kill {program}: {e}");
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Build the argv that runs `line` through the host shell.
pub fn host_shell_argv(line: &str) -> Vec<String> {
    if cfg!(windows) {
        vec!["cmd".to_string(), "/C".to_string(), line.to_string()]
    } else {
        vec!["sh".to_string(), "-c".to_string(), line.to_string()]
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn captures_stdout() {
        let out = run_process(&argv(&["echo", "hello"]), Path::new("/"), None, None).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
    }

    #[test]
    fn feeds_stdin() {
        let out = run_process(
            &argv(&["cat"]),
            Path::new("/"),
            Some("a\nb\n"),
            Some(Duration::from_secs(10)),
        )
        .unwrap();
        assert_eq!(out.stdout, "a\nb\n");
    }

    #[test]
    fn captures_stderr_and_status() {
        let out = run_process(
            &host_shell_argv("echo oops >&2; exit 3"),
            Path::new("/"),
            None,
            None,
        )
        .unwrap();
        assert!(!out.success());
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.status.and_then(|s| s.code()), Some(3));
    }

    #[test]
    fn runs_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_process(&argv(&["pwd"]), dir.path(), None, None).unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn missing_program_is_command_not_found() {
        let err = run_process(
            &argv(&["definitely-not-a-real-program-xyz"]),
            Path::new("/"),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(
            format!("{err}"),
            "definitely-not-a-real-program-xyz: command not found"
        );
    }

    #[test]
    fn timeout_kills_child() {
        let start = Instant::now();
        let out = run_process(
            &argv(&["sleep", "5"]),
            Path::new("/"),
            None,
            Some(Duration::from_millis(100)),
        )
        .unwrap();
        assert!(out.timed_out());
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn timeout_bounds_host_shell_lines() {
        let start = Instant::now();
        let out = run_process(
            &host_shell_argv("sleep 4; echo done"),
            Path::new("/"),
            None,
            Some(Duration::from_millis(200)),
        )
        .unwrap();
        assert!(out.timed_out());
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "took {:?}",
            start.elapsed()
        );
        assert!(!out.stdout.contains("done"));
    }

    #[test]
    fn timeout_keeps_output_read_so_far() {
        let out = run_process(
            &host_shell_argv("echo early; sleep 4"),
            Path::new("/"),
            None,
            Some(Duration::from_millis(500)),
        )
        .unwrap();
        assert!(out.timed_out());
        assert_eq!(out.stdout, "early\n");
    }

    #[test]
    fn empty_argv_rejected() {
        assert!(run_process(&[], Path::new("/"), None, None).is_err());
    }
}
