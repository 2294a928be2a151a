//! Error types shared by every hot-plug operation.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for hot-plug operations.
pub type HotplugResult<T> = Result<T, Report<HotplugError>>;

/// Errors that can occur while attaching or detaching the eGPU.
#[derive(Debug, Display)]
pub enum HotplugError {
    /// The dock could not be resolved through the authorization broker
    #[display("Dock resolution failed: {message}")]
    Resolution { message: String },

    /// The dock is known to the broker but not authorized
    #[display("Dock is not authorized (status: {status})")]
    NotAuthorized { status: String },

    /// No GPU matched after the enumeration poll was exhausted
    #[display("GPU '{pattern}' not found after {attempts} attempt(s)")]
    NotFound { pattern: String, attempts: u32 },

    /// Querying the graphics device inventory failed
    #[display("Inventory query failed: {message}")]
    Inventory { message: String },

    /// A pseudo-file write failed or was short
    #[display("Write to {path} failed")]
    Io { path: String },

    /// The device is in use and no force override was given
    #[display("GPU '{pattern}' at {address} is not free")]
    Safety { pattern: String, address: String },
}

impl Error for HotplugError {}

impl HotplugError {
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    pub fn inventory(message: impl Into<String>) -> Self {
        Self::Inventory {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<String>) -> Self {
        Self::Io { path: path.into() }
    }
}
