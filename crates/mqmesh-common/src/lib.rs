//! mqmesh Common - Shared types for broker cluster topology synthesis
//!
//! This crate provides:
//! - Resource identifiers shared by the synthesizer and the provisioning seam
//! - Error taxonomy (configuration, invariant, provisioning)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical resource name.
///
/// Names are deterministic functions of the deployment settings, so the same
/// configuration always yields the same identifiers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Wrap a resource name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ResourceId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// 1-based region ordinal, as used in resource names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ordinal(usize);

impl Ordinal {
    /// Ordinal for a 0-based region index
    pub const fn from_index(index: usize) -> Self {
        Self(index + 1)
    }

    /// The 0-based index
    pub const fn index(self) -> usize {
        self.0 - 1
    }

    /// The 1-based value
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
