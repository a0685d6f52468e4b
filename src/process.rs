//! Types for launching, attaching to, and controlling a single traced process.

use std::ffi::CString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::{
    errno::Errno,
    sys::{
        ptrace,
        signal,
        wait::{self, WaitPidFlag, WaitStatus},
    },
    unistd::{fork, ForkResult},
};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub use nix::unistd::Pid;

/// POSIX signal.
pub use nix::sys::signal::Signal;

/// Run state of a traced process.
///
/// `Running` and `Stopped` may alternate any number of times; `Exited` and
/// `Terminated` are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    Running,
    Stopped,
    Exited,
    Terminated,
}

/// Decoded `wait(2)` status for a traced process.
///
/// The meaning of `info` depends on `state`: the exit code for `Exited`, the
/// signal number for `Stopped` and `Terminated`. A failed status query is
/// reported as `Terminated` with `info` set to the OS error code, or `-1`
/// when the query was made against an unbound [`Tracee`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StopReason {
    pub state: RunState,
    pub info: i32,
}

impl From<WaitStatus> for StopReason {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => Self {
                state: RunState::Exited,
                info: code,
            },
            WaitStatus::Signaled(_, signal, _core_dumped) => Self {
                state: RunState::Terminated,
                info: signal as i32,
            },
            WaitStatus::Stopped(_, signal) => Self {
                state: RunState::Stopped,
                info: signal as i32,
            },
            // Ptrace stops are stops; without trace options set, only the
            // plain signal-delivery form is ever reported.
            WaitStatus::PtraceEvent(_, signal, _) => Self {
                state: RunState::Stopped,
                info: signal as i32,
            },
            WaitStatus::PtraceSyscall(_) => Self {
                state: RunState::Stopped,
                info: Signal::SIGTRAP as i32,
            },
            // `WNOHANG` and `WCONTINUED` are never requested, so any other
            // status is malformed.
            _ => Self {
                state: RunState::Terminated,
                info: 0,
            },
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.state, Signal::try_from(self.info)) {
            (RunState::Running, _) => write!(f, "is running"),
            (RunState::Exited, _) => write!(f, "exited with status {}", self.info),
            (RunState::Stopped, Ok(signal)) => {
                write!(f, "stopped with signal {}", signal.as_str())
            }
            (RunState::Stopped, Err(_)) => write!(f, "stopped with signal {}", self.info),
            (RunState::Terminated, Ok(signal)) => {
                write!(f, "terminated with signal {}", signal.as_str())
            }
            (RunState::Terminated, Err(_)) => {
                write!(f, "terminated abnormally (code {})", self.info)
            }
        }
    }
}

/// A process under ptrace control, owned end-to-end by this value.
///
/// A `Tracee` is bound to its process by [`Tracee::launch()`] or
/// [`Tracee::attach()`] and stays bound until [`Tracee::teardown()`], which
/// also runs on drop. The kernel permits one tracer per tracee, so the bound
/// pid must never be shared with another `Tracee`.
///
/// **Warning:** the underlying process is not guaranteed to exist between
/// calls to [`Tracee::wait()`]; operations on it may fail at any time.
#[derive(Debug)]
pub struct Tracee {
    pid: Option<Pid>,
    owns_lifetime: bool,
    state: RunState,
}

impl Tracee {
    /// Spawn `path` as a child process primed for tracing.
    ///
    /// The child requests `PTRACE_TRACEME` and then execs `path` (resolved
    /// against `PATH`, with no arguments), so the parent observes the exec
    /// trap before the new image runs a single instruction. On return the
    /// tracee is bound and stopped at that trap.
    ///
    /// An exec failure in the child is not reported here: the child exits
    /// carrying the OS error code as its exit status, and the first
    /// [`Tracee::wait()`] reports it as `Exited`. Callers should treat an
    /// immediate post-launch `Exited` or `Terminated` status as a failure to
    /// start. Only process creation itself fails this call.
    pub fn launch(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.as_os_str().is_empty() {
            return Err(Error::Launch {
                path: path.into(),
                source: Errno::ENOENT,
            });
        }

        // Own a NUL-terminated copy of the path for the foreign exec call.
        // Heap-allocates, so must happen before forking.
        let prog = CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::Launch {
            path: path.into(),
            source: Errno::EINVAL,
        })?;
        let argv = [prog.as_ptr(), std::ptr::null()];

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                // Only async-signal-safe calls from here until exec. Exit
                // with the raw errno on failure so the parent can decode it
                // from the wait status.
                if ptrace::traceme().is_err() {
                    unsafe { libc::_exit(Errno::last() as i32) };
                }

                unsafe {
                    libc::execvp(prog.as_ptr(), argv.as_ptr());

                    // Exec only returns on failure.
                    libc::_exit(Errno::last() as i32)
                }
            }
            Ok(ForkResult::Parent { child }) => {
                info!(pid = child.as_raw(), ?path, "launched tracee");

                let mut tracee = Self {
                    pid: Some(child),
                    owns_lifetime: true,
                    state: RunState::Stopped,
                };
                tracee.observe_initial_status();

                Ok(tracee)
            }
            Err(errno) => Err(Error::Launch {
                path: path.into(),
                source: errno,
            }),
        }
    }

    /// Attach to a running process. This will deliver a `SIGSTOP`.
    ///
    /// On return the tracee is bound and stopped. An attached tracee is
    /// released, never killed, by [`Tracee::teardown()`].
    pub fn attach(pid: Pid) -> Result<Self> {
        if pid.as_raw() <= 0 {
            return Err(Error::Attach {
                pid,
                source: Errno::ESRCH,
            });
        }

        ptrace::attach(pid).map_err(|source| Error::Attach { pid, source })?;

        info!(pid = pid.as_raw(), "attached to tracee");

        let mut tracee = Self {
            pid: Some(pid),
            owns_lifetime: false,
            state: RunState::Stopped,
        };
        tracee.observe_initial_status();

        Ok(tracee)
    }

    /// Pid of the bound process, or `None` after teardown.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Last known run state.
    ///
    /// Advisory between calls to [`Tracee::wait()`]: `resume()` sets it
    /// optimistically, and only a wait makes it authoritative again.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Whether teardown must kill the process because this value spawned it.
    pub fn owns_lifetime(&self) -> bool {
        self.owns_lifetime
    }

    // Block until the initial stop (or early death) of a newly bound tracee,
    // peeking the wait status without consuming it. The status stays queued
    // for the caller's first `wait()`, which is how an exec failure inside a
    // launched child stays observable as an exit status.
    fn observe_initial_status(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };

        use nix::sys::wait::Id;

        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WSTOPPED | WaitPidFlag::WNOWAIT;

        match wait::waitid(Id::Pid(pid), flags) {
            Ok(status) => {
                let reason = StopReason::from(status);
                self.state = reason.state;

                debug!(pid = pid.as_raw(), ?reason, "synchronized with initial status");
            }
            Err(errno) => {
                warn!(pid = pid.as_raw(), %errno, "could not observe initial status");
            }
        }
    }

    /// Block until the tracee changes status, and decode the result.
    ///
    /// This is the only path by which the controller learns of state
    /// changes. `state` is updated to match the report, except when the
    /// status query itself fails, in which case the report carries the OS
    /// error code and the last known state is left alone. On an unbound
    /// tracee, returns `Terminated` with `info` of `-1` without touching
    /// the OS.
    pub fn wait(&mut self) -> StopReason {
        let Some(pid) = self.pid else {
            return StopReason {
                state: RunState::Terminated,
                info: -1,
            };
        };

        match wait::waitpid(pid, None) {
            Ok(status) => {
                let reason = StopReason::from(status);
                self.state = reason.state;

                debug!(pid = pid.as_raw(), ?reason, "tracee changed status");

                reason
            }
            Err(errno) => StopReason {
                state: RunState::Terminated,
                info: errno as i32,
            },
        }
    }

    /// Resume the stopped tracee.
    ///
    /// Sets `state` to `Running` optimistically; the authoritative state is
    /// whatever the next [`Tracee::wait()`] reports. On failure the state is
    /// left unchanged, and the caller may retry after re-checking status.
    pub fn resume(&mut self) -> Result<()> {
        let pid = self.pid.ok_or(Error::Unbound)?;

        ptrace::cont(pid, None).map_err(|source| Error::Resume { pid, source })?;

        self.state = RunState::Running;

        debug!(pid = pid.as_raw(), "resumed tracee");

        Ok(())
    }

    /// Release the tracee, leaving this value unbound.
    ///
    /// Every step is attempted regardless of the outcome of the previous
    /// ones, and failures are swallowed: teardown tends to run on cleanup
    /// paths where the caller has no recourse. In order:
    ///
    /// 1. If running, stop the tracee and wait for the stop, since detach
    ///    requires a stopped tracee.
    /// 2. Detach.
    /// 3. Send `SIGCONT` unconditionally; the trace stop can survive detach.
    /// 4. If the process was launched by this value, kill it and reap it.
    ///
    /// Idempotent: a second call performs no OS calls. Also runs on drop.
    pub fn teardown(&mut self) {
        let Some(pid) = self.pid.take() else {
            return;
        };

        debug!(pid = pid.as_raw(), state = ?self.state, "tearing down tracee");

        if self.state == RunState::Running {
            best_effort(pid, "stop", signal::kill(pid, Signal::SIGSTOP));
            best_effort(pid, "await stop", wait::waitpid(pid, None).map(|_| ()));
        }

        best_effort(pid, "detach", ptrace::detach(pid, None));
        best_effort(pid, "continue", signal::kill(pid, Signal::SIGCONT));

        if self.owns_lifetime {
            best_effort(pid, "kill", signal::kill(pid, Signal::SIGKILL));
            best_effort(pid, "reap", wait::waitpid(pid, None).map(|_| ()));
        }

        self.state = RunState::Terminated;
    }
}

impl Drop for Tracee {
    fn drop(&mut self) {
        self.teardown();
    }
}

// Log and otherwise ignore a failed teardown step.
fn best_effort(pid: Pid, step: &str, res: nix::Result<()>) {
    if let Err(errno) = res {
        debug!(pid = pid.as_raw(), %errno, step, "ignoring failed teardown step");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid() -> Pid {
        Pid::from_raw(1234)
    }

    #[test]
    fn decode_exit() {
        let reason = StopReason::from(WaitStatus::Exited(pid(), 7));

        assert_eq!(reason.state, RunState::Exited);
        assert_eq!(reason.info, 7);
    }

    #[test]
    fn decode_signaled() {
        let reason = StopReason::from(WaitStatus::Signaled(pid(), Signal::SIGKILL, false));

        assert_eq!(reason.state, RunState::Terminated);
        assert_eq!(reason.info, Signal::SIGKILL as i32);
    }

    #[test]
    fn decode_stop() {
        let reason = StopReason::from(WaitStatus::Stopped(pid(), Signal::SIGTRAP));

        assert_eq!(reason.state, RunState::Stopped);
        assert_eq!(reason.info, Signal::SIGTRAP as i32);
    }

    #[test]
    fn decode_fallback() {
        let reason = StopReason::from(WaitStatus::StillAlive);

        assert_eq!(reason.state, RunState::Terminated);
        assert_eq!(reason.info, 0);
    }

    #[test]
    fn display_reports() {
        let exited = StopReason {
            state: RunState::Exited,
            info: 0,
        };
        assert_eq!(exited.to_string(), "exited with status 0");

        let stopped = StopReason {
            state: RunState::Stopped,
            info: Signal::SIGTRAP as i32,
        };
        assert_eq!(stopped.to_string(), "stopped with signal SIGTRAP");

        let killed = StopReason {
            state: RunState::Terminated,
            info: Signal::SIGKILL as i32,
        };
        assert_eq!(killed.to_string(), "terminated with signal SIGKILL");

        let failed = StopReason {
            state: RunState::Terminated,
            info: -1,
        };
        assert_eq!(failed.to_string(), "terminated abnormally (code -1)");
    }
}
