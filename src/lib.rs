pub mod error;
pub mod history;
pub mod process;

pub use error::{Error, Result};
pub use history::History;
pub use process::{Pid, RunState, Signal, StopReason, Tracee};
