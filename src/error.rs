//! Unified error types for mooring

use crate::network::MacAddr;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for mooring operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("Refusing config '{}': {reason}", path.display())]
    UntrustedConfig { path: PathBuf, reason: String },

    // Slot errors
    #[error("No free instance slot: all {max} slots are bound in the environment")]
    NoFreeSlot { max: usize },

    // Lease errors
    #[error(
        "All addresses in {range} are leased in {}; orphaned leases may need manual cleanup",
        store.display()
    )]
    AddressSpaceExhausted { range: String, store: PathBuf },

    #[error("MAC address {0} is already leased; rerun the command")]
    MacCollision(MacAddr),

    #[error("Lease store {action} failed for '{}': {source}", path.display())]
    LeaseStoreIo {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    // Identity marker errors
    #[error("Identity file '{}' {action} failed: {message}", path.display())]
    IdentityFile {
        action: &'static str,
        path: PathBuf,
        message: String,
    },

    // Network helper errors
    #[error("Helper command '{command}' failed: {message}")]
    HelperFailed { command: String, message: String },

    #[error("Helper command '{command}' produced unexpected output: {output:?}")]
    HelperOutput { command: String, output: String },

    // Child errors
    #[error("Failed to launch '{program}': {source}")]
    ChildLaunch { program: String, source: io::Error },

    // Lifecycle errors
    #[error("Invalid lifecycle transition: {0}")]
    Transition(String),
}

impl Error {
    /// Process exit status for a failure that happened before the child ran
    ///
    /// Each stage gets its own status so callers can tell "no addresses left"
    /// from "helper unavailable" from a failing child.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigRead { .. }
            | Error::ConfigParse(_)
            | Error::ConfigValidation(_)
            | Error::UntrustedConfig { .. } => 78,
            Error::NoFreeSlot { .. } => 70,
            Error::AddressSpaceExhausted { .. } => 71,
            Error::MacCollision(_) => 72,
            Error::LeaseStoreIo { .. } => 73,
            Error::IdentityFile { .. } => 74,
            Error::HelperFailed { .. } | Error::HelperOutput { .. } => 75,
            Error::ChildLaunch { .. } => 127,
            Error::Io(_) | Error::Transition(_) => 1,
        }
    }

    /// Whether rerunning the same command from scratch may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::MacCollision(_) => true,
            Error::LeaseStoreIo { source, .. } => source.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }
}

/// Result type alias for mooring operations
pub type Result<T> = std::result::Result<T, Error>;
