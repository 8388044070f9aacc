//! # zcm-common
//!
//! Shared utilities and types for the ZCM clone chain manager:
//! - Instance ID parsing and formatting
//! - Byte-size formatting for reports
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod resource;

pub use error::{ZcmError, ZcmResult};
pub use id::InstanceId;
pub use resource::format_bytes;
