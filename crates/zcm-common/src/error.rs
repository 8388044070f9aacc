//! Common error types for the ZCM ecosystem.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`ZcmError`].
pub type ZcmResult<T> = Result<T, ZcmError>;

/// Errors raised by chain lifecycle operations.
///
/// Every variant is terminal for the operation that raised it; nothing is
/// retried automatically. The CLI layer is the single place that catches,
/// prints and maps these to an exit code.
#[derive(Error, Diagnostic, Debug)]
pub enum ZcmError {
    /// The managed path has no discoverable backing filesystem.
    #[error("Path {path} is invalid or uninitialized")]
    #[diagnostic(
        code(zcm::not_initialized),
        help("Run `zcm init <filesystem> <path>` first")
    )]
    NotInitialized {
        /// The managed path that was probed.
        path: String,
    },

    /// Initialization target (path or filesystem) already exists.
    #[error("{target} already exists, can not use it")]
    #[diagnostic(code(zcm::already_exists))]
    AlreadyExists {
        /// The colliding path or filesystem name.
        target: String,
    },

    /// A mutating operation requires an active instance and found none.
    #[error("There is no active instance, activate one first")]
    #[diagnostic(code(zcm::no_active_instance))]
    NoActiveInstance,

    /// A configured ceiling blocks the requested operation.
    #[error("{message}")]
    #[diagnostic(
        code(zcm::limit_exceeded),
        help("Remove instances or pass --auto-remove")
    )]
    LimitExceeded {
        /// Which ceiling was hit and by how much.
        message: String,
    },

    /// Referenced instance id does not exist in the chain.
    #[error("There is no instance with id {id}")]
    #[diagnostic(code(zcm::not_found))]
    NotFound {
        /// The missing instance id.
        id: String,
    },

    /// Activation target is already the active instance.
    #[error("Instance {id} is already active")]
    #[diagnostic(code(zcm::already_active))]
    AlreadyActive {
        /// The already-active id.
        id: String,
    },

    /// Removal target is the active instance.
    #[error("Instance {id} is active, can not remove")]
    #[diagnostic(
        code(zcm::cannot_remove_active),
        help("Activate another instance first")
    )]
    CannotRemoveActive {
        /// The active id that removal was attempted on.
        id: String,
    },

    /// One or more filesystems could not be unmounted; a best-effort
    /// remount was attempted before surfacing this error.
    #[error("Failed to unmount {}, device(s) in use", failed.join(" and "))]
    #[diagnostic(code(zcm::device_busy))]
    DeviceBusy {
        /// The filesystems that failed to unmount.
        failed: Vec<String>,
    },

    /// An underlying storage call reported failure.
    #[error("ZFS error: {message}")]
    #[diagnostic(code(zcm::backend))]
    Backend {
        /// What the backend reported.
        message: String,
    },

    /// An eviction ceiling can not be satisfied because there is nothing
    /// left to remove.
    #[error("There are no more instances to remove in order to satisfy max limit of {limit}")]
    #[diagnostic(code(zcm::no_eviction_candidate))]
    NoEvictionCandidate {
        /// The unsatisfiable ceiling.
        limit: usize,
    },

    /// Backend listing yielded an unparseable name or id.
    #[error("Invalid backend state: {message}")]
    #[diagnostic(
        code(zcm::invalid_state),
        help("The backing filesystems were modified outside of zcm")
    )]
    InvalidState {
        /// What failed to parse.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(zcm::io))]
    Io(#[from] std::io::Error),
}

impl ZcmError {
    /// Shorthand for a [`ZcmError::Backend`] with a formatted message.
    pub fn backend(message: impl Into<String>) -> Self {
        ZcmError::Backend {
            message: message.into(),
        }
    }

    /// Shorthand for a [`ZcmError::InvalidState`] with a formatted message.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        ZcmError::InvalidState {
            message: message.into(),
        }
    }
}
