use anyhow::Result;
use nix::errno::Errno;
use ntest::timeout;
use sdb::{Error, RunState, Signal, Tracee};

#[test]
#[timeout(5000)]
fn test_launch_stops_at_exec_trap() -> Result<()> {
    let mut tracee = Tracee::launch("true")?;

    assert!(tracee.pid().is_some());
    assert!(tracee.owns_lifetime());
    assert_eq!(tracee.state(), RunState::Stopped);

    // The stop observed during launch is still there for the first wait.
    let reason = tracee.wait();

    assert_eq!(reason.state, RunState::Stopped);
    assert_eq!(reason.info, Signal::SIGTRAP as i32);

    Ok(())
}

#[test]
#[timeout(5000)]
fn test_launch_run_to_exit() -> Result<()> {
    let mut tracee = Tracee::launch("true")?;

    let reason = tracee.wait();
    assert_eq!(reason.state, RunState::Stopped);

    tracee.resume()?;
    assert_eq!(tracee.state(), RunState::Running);

    // A resumed tracee may re-stop before exiting; keep resuming.
    let mut reason = tracee.wait();
    while reason.state == RunState::Stopped {
        eprintln!("re-stopped: {reason}");

        tracee.resume()?;
        reason = tracee.wait();
    }

    assert_eq!(reason.state, RunState::Exited);
    assert_eq!(reason.info, 0);

    tracee.teardown();
    assert!(tracee.pid().is_none());
    assert_eq!(tracee.state(), RunState::Terminated);

    Ok(())
}

#[test]
#[timeout(5000)]
fn test_launch_exec_failure_is_deferred() -> Result<()> {
    let mut tracee = Tracee::launch("/nonexistent/binary")?;

    // Launch itself succeeds; the child died before reaching its new image.
    assert_eq!(tracee.state(), RunState::Exited);

    let reason = tracee.wait();

    assert_eq!(reason.state, RunState::Exited);
    assert_eq!(reason.info, Errno::ENOENT as i32);

    Ok(())
}

#[test]
fn test_launch_empty_path() {
    let err = Tracee::launch("").unwrap_err();

    assert!(matches!(err, Error::Launch { .. }));
}
