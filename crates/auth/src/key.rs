//! Permission key grammar.
//!
//! A key is an ASCII, colon-delimited string of at most three segments:
//! `module[:submodule][:action]` (e.g. `sales:leads:view`, `store:manage`).
//! Requested keys never carry wildcards; wildcarding only exists in role maps.

use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const SEPARATOR: char = ':';
pub const MAX_SEGMENTS: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("permission key is empty")]
    Empty,

    #[error("permission key '{0}' has more than {MAX_SEGMENTS} segments")]
    TooManySegments(String),

    #[error("permission key '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("permission key '{0}' contains a wildcard")]
    Wildcard(String),

    #[error("permission key '{0}' contains non-ASCII or whitespace characters")]
    NonAscii(String),
}

/// A validated permission key.
///
/// The original string is kept verbatim so `as_str()` is byte-identical to
/// what the caller passed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionKey {
    raw: String,
    module_end: usize,
    segments: u8,
}

impl PermissionKey {
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        if key.chars().any(|c| !c.is_ascii() || c.is_ascii_whitespace() || c.is_ascii_control()) {
            return Err(KeyError::NonAscii(key.to_string()));
        }
        if key.contains('*') {
            return Err(KeyError::Wildcard(key.to_string()));
        }

        let segments: Vec<&str> = key.split(SEPARATOR).collect();
        if segments.len() > MAX_SEGMENTS {
            return Err(KeyError::TooManySegments(key.to_string()));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(KeyError::EmptySegment(key.to_string()));
        }

        Ok(Self {
            raw: key.to_string(),
            module_end: segments[0].len(),
            segments: segments.len() as u8,
        })
    }

    /// Build a key from the guard's call shape: `(module, submodule_or_action, action?)`.
    pub fn from_parts(
        module: &str,
        submodule_or_action: &str,
        action: Option<&str>,
    ) -> Result<Self, KeyError> {
        let raw = match action {
            Some(action) => format!("{module}{SEPARATOR}{submodule_or_action}{SEPARATOR}{action}"),
            None => format!("{module}{SEPARATOR}{submodule_or_action}"),
        };
        Self::parse(&raw)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn module(&self) -> &str {
        &self.raw[..self.module_end]
    }

    /// Middle segment of a three-segment key.
    pub fn submodule(&self) -> Option<&str> {
        if self.segments == 3 {
            self.raw.split(SEPARATOR).nth(1)
        } else {
            None
        }
    }

    /// Last segment of a two- or three-segment key.
    pub fn action(&self) -> Option<&str> {
        if self.segments >= 2 {
            self.raw.rsplit(SEPARATOR).next()
        } else {
            None
        }
    }

    /// The key with its leading `module:` removed (`sales:leads:view` -> `leads:view`).
    pub fn module_relative(&self) -> Option<&str> {
        if self.segments >= 2 {
            Some(&self.raw[self.module_end + 1..])
        } else {
            None
        }
    }

    /// Everything but the last segment (`sales:leads:view` -> `sales:leads`).
    pub fn object(&self) -> &str {
        match self.raw.rfind(SEPARATOR) {
            Some(idx) if self.segments >= 2 => &self.raw[..idx],
            _ => &self.raw,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments as usize
    }
}

impl core::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PermissionKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PermissionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for PermissionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
