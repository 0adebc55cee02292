//! Spawning and supervising the external test framework.

mod command;
mod runner;

pub use command::{CommandBuilder, DebugOverlay, Invocation, Target};
pub use runner::{
    classify_line, CancelHandle, CapturedOutput, DebuggerReady, ProcessOutput, ProcessRunner,
    RunningProcess,
};
