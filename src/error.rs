use std::path::PathBuf;

use crate::process::Pid;


pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Could not launch tracee = {path:?}")]
    Launch {
        path: PathBuf,
        source: nix::Error,
    },

    #[error("Could not attach to tracee = {pid}")]
    Attach { pid: Pid, source: nix::Error },

    #[error("Could not resume tracee = {pid}")]
    Resume { pid: Pid, source: nix::Error },

    #[error("Tracee is not bound to a process")]
    Unbound,
}
