//! Checks whether a GPU render node is held open by any process.
//!
//! Ambiguous results count as occupied.

use std::process::Command;

use tracing::debug;
use tracing::warn;

/// Default inspection tool.
pub const FUSER: &str = "fuser";

/// Render node of the device at `address`.
pub fn render_node_path(address: &str) -> String {
    format!("/dev/dri/by-path/pci-{address}-render")
}

/// Decides whether a device may be detached.
pub trait OccupancyChecker {
    fn is_free(&self, address: &str) -> bool;
}

/// What the inspection tool did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The tool could not be run at all
    SpawnFailed(String),
    /// The tool exited successfully
    Success { stdout: Vec<u8> },
    /// The tool exited with a non-zero status (or was killed)
    Failure { code: Option<i32>, stderr: Vec<u8> },
}

impl ProbeOutcome {
    /// `fuser` exits with 1 and prints nothing on stderr when no process
    /// holds the file. A successful run with empty output is also free.
    pub fn is_free(&self) -> bool {
        match self {
            Self::SpawnFailed(_) => false,
            Self::Success { stdout } => stdout.is_empty(),
            Self::Failure { code, stderr } => *code == Some(1) && stderr.is_empty(),
        }
    }
}

/// [`OccupancyChecker`] running `fuser -v` against the render node.
#[derive(Debug, Clone)]
pub struct FuserChecker {
    program: String,
}

impl FuserChecker {
    pub fn new() -> Self {
        Self::with_program(FUSER)
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn probe(&self, address: &str) -> ProbeOutcome {
        let node = render_node_path(address);
        match Command::new(&self.program).arg("-v").arg(&node).output() {
            Err(e) => ProbeOutcome::SpawnFailed(e.to_string()),
            Ok(output) if output.status.success() => ProbeOutcome::Success {
                stdout: output.stdout,
            },
            Ok(output) => ProbeOutcome::Failure {
                code: output.status.code(),
                stderr: output.stderr,
            },
        }
    }
}

impl Default for FuserChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl OccupancyChecker for FuserChecker {
    fn is_free(&self, address: &str) -> bool {
        let outcome = self.probe(address);
        let free = outcome.is_free();

        match &outcome {
            ProbeOutcome::SpawnFailed(error) => {
                warn!(address, program = %self.program, error = %error, "failed to run occupancy check");
            }
            ProbeOutcome::Failure { code, stderr } if !free => {
                warn!(
                    address,
                    code = ?code,
                    stderr = %String::from_utf8_lossy(stderr).trim(),
                    "occupancy check inconclusive, treating GPU as busy"
                );
            }
            ProbeOutcome::Success { stdout } if !free => {
                debug!(address, holders = %String::from_utf8_lossy(stdout).trim(), "GPU is in use");
            }
            _ => debug!(address, "GPU render node is free"),
        }

        free
    }
}
