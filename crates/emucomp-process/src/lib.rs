//! # emucomp-process
//!
//! Subprocess supervision for emulator and network-helper processes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use emucomp_process::ProcessRunner;
//!
//! # async fn example() -> emucomp_process::Result<()> {
//! // Run to completion and collect output
//! let result = ProcessRunner::new("head")
//!     .args(["-c", "65537", "/dev/zero"])
//!     .execute_with_result(true)
//!     .await?;
//! assert_eq!(result.stdout.len(), 65537);
//!
//! // Pipe one process into another
//! let mut pipe = ProcessRunner::pipe(
//!     ProcessRunner::new("echo").arg("info status"),
//!     ProcessRunner::new("socat").args(["-", "UNIX-CONNECT:/tmp/monitor.sock"]),
//! );
//! pipe.execute().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Streaming capture**: stdout/stderr are drained while the process runs,
//!   so output larger than the pipe capacity never blocks the child
//! - **Bounded buffers**: captured output is capped, excess is discarded
//! - **Graceful stop**: SIGTERM, bounded wait, then SIGKILL
//! - **Pipes**: `producer | consumer` managed as one unit
//! - **Idempotent cleanup**: no leaked children or pipes

mod config;
mod error;
mod output;
mod pipe;
mod runner;

pub use config::{RunnerConfig, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_STOP_TIMEOUT};
pub use error::{ProcessError, Result};
pub use output::CapturedOutput;
pub use pipe::PipedRunner;
pub use runner::{ExecResult, ProcessRunner};
