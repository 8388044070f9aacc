//! Instance ID parsing and formatting.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{ZcmError, ZcmResult};

/// A chain instance id: a fixed-width, zero-padded hexadecimal sequence
/// number.
///
/// Ids are assigned monotonically and never reused, even after an instance
/// is removed. The on-disk encoding is always 8 lowercase hex digits
/// (`00000000`, `00000001`, ...), which is also the trailing path segment of
/// the instance's backing filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(u32);

impl InstanceId {
    /// Width of the hex encoding.
    pub const WIDTH: usize = 8;

    /// The genesis id every chain starts with.
    pub const GENESIS: InstanceId = InstanceId(0);

    /// Create an id from its numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Numeric value of the id.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// The id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Parse an id from its 8-digit hex encoding.
    ///
    /// # Errors
    ///
    /// Returns [`ZcmError::InvalidState`] if the string is not fixed-width
    /// hexadecimal; a malformed id means the backing filesystems were
    /// tampered with.
    pub fn parse(s: &str) -> ZcmResult<Self> {
        if s.len() != Self::WIDTH {
            return Err(ZcmError::invalid_state(format!(
                "instance id {s:?} is not {} hex digits",
                Self::WIDTH
            )));
        }
        let value = u32::from_str_radix(s, 16).map_err(|_| {
            ZcmError::invalid_state(format!("instance id {s:?} is not hexadecimal"))
        })?;
        Ok(Self(value))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = ZcmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for InstanceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
