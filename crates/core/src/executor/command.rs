//! `std::process` backed executor

use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{diagnostic_text, ExecutionError, ExecutionRequest, ProcessExecutor};

const POLL_INTERVAL_START: Duration = Duration::from_millis(1);
const POLL_INTERVAL_MAX: Duration = Duration::from_millis(25);

/// Spawns one renderer process per call
///
/// stdin is written while stdout and stderr are drained on separate scoped
/// threads, so neither side can stall on a full pipe buffer. On Unix the
/// renderer gets its own process group; the whole group is killed once the
/// renderer exits or misses its deadline, which closes every inherited pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessExecutor for CommandExecutor {
    fn execute(&self, request: &ExecutionRequest) -> Result<Vec<u8>, ExecutionError> {
        let started = Instant::now();
        // A deadline past the clock's range never expires
        let deadline = started.checked_add(request.timeout);

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|source| ExecutionError::Launch {
            program: request.program.clone(),
            source,
        })?;
        let mut guard = ChildGuard::new(child);

        tracing::debug!(
            program = %request.program.display(),
            pid = guard.id(),
            input_bytes = request.input.len(),
            "Spawned renderer"
        );

        let stdin = guard.child.stdin.take();
        let stdout = guard.child.stdout.take();
        let stderr = guard.child.stderr.take();

        let (waited, written, stdout, stderr) = thread::scope(|scope| {
            let writer = scope.spawn(move || write_input(stdin, &request.input));
            let stdout_reader = scope.spawn(move || drain(stdout));
            let stderr_reader = scope.spawn(move || drain(stderr));

            let waited = match wait_until(&mut guard, deadline) {
                Ok(true) => guard.sweep_and_reap().map(Some),
                Ok(false) => {
                    guard.terminate();
                    Ok(None)
                }
                Err(e) => {
                    guard.terminate();
                    Err(e)
                }
            };

            // Every pipe writer is gone by now, so the joins cannot block
            (
                waited,
                join(writer),
                join(stdout_reader),
                join(stderr_reader),
            )
        });

        let status = match waited? {
            Some(status) => status,
            None => {
                tracing::warn!(
                    program = %request.program.display(),
                    timeout_ms = request.timeout.as_millis() as u64,
                    "Renderer timed out and was killed"
                );
                return Err(ExecutionError::Timeout {
                    program: request.program.clone(),
                    timeout: request.timeout,
                });
            }
        };

        if !status.success() {
            let stderr = stderr.unwrap_or_default();
            let stdout = stdout.unwrap_or_default();
            return Err(ExecutionError::NonZeroExit {
                code: status.code(),
                diagnostic: diagnostic_text(&stderr, &stdout),
            });
        }

        written?;
        stderr?;
        let output = stdout?;

        tracing::debug!(
            program = %request.program.display(),
            output_bytes = output.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Renderer finished"
        );

        Ok(output)
    }
}

/// Owns the child so it is killed and reaped on every exit path
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn id(&self) -> u32 {
        self.child.id()
    }

    /// Whether the renderer has exited, leaving it unreaped
    ///
    /// An unreaped leader keeps its PID, so the group sweep that follows
    /// cannot hit a process group created by a later spawn.
    #[cfg(all(any(target_os = "linux", target_os = "android"), not(target_env = "uclibc")))]
    fn exited(&mut self) -> io::Result<bool> {
        use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
        use nix::unistd::Pid;

        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
        match waitid(Id::Pid(Pid::from_raw(self.child.id() as i32)), flags) {
            Ok(WaitStatus::StillAlive) => Ok(false),
            Ok(_) => Ok(true),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    /// Whether the renderer has exited
    ///
    /// Without `WNOWAIT` the leader is reaped here, before the sweep.
    #[cfg(not(all(
        any(target_os = "linux", target_os = "android"),
        not(target_env = "uclibc")
    )))]
    fn exited(&mut self) -> io::Result<bool> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status.is_some())
    }

    /// Kill leftover group members, then collect the renderer's status
    fn sweep_and_reap(&mut self) -> io::Result<ExitStatus> {
        self.kill_group();
        // Returns the cached status when the child was already reaped
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }

    /// Kill whatever is left of the renderer's process group
    fn kill_group(&self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            // ESRCH just means the group is already empty
            let _ = killpg(Pid::from_raw(self.child.id() as i32), Signal::SIGKILL);
        }
    }

    /// Kill the group and the child itself, then reap the child
    fn terminate(&mut self) {
        self.kill_group();
        if self.reaped {
            return;
        }
        let _ = self.child.kill();
        match self.child.wait() {
            Ok(_) => self.reaped = true,
            Err(e) => tracing::error!(pid = self.child.id(), "Failed to reap renderer: {}", e),
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.terminate();
        }
    }
}

/// Poll until the renderer exits (`true`) or the deadline passes (`false`)
fn wait_until(guard: &mut ChildGuard, deadline: Option<Instant>) -> io::Result<bool> {
    let mut interval = POLL_INTERVAL_START;
    loop {
        if guard.exited()? {
            return Ok(true);
        }
        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        thread::sleep(pause);
        interval = (interval * 2).min(POLL_INTERVAL_MAX);
    }
}

fn write_input(stdin: Option<ChildStdin>, input: &[u8]) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(input) {
        // The renderer may legitimately stop reading early
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        result => result,
    }
    // stdin dropped here, closing the pipe
}

fn drain(pipe: Option<impl Read>) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buffer)?;
    }
    Ok(buffer)
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, io::Result<T>>) -> io::Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("renderer pipe thread panicked")))
}
