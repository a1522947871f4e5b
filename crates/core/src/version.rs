//! Document versions for optimistic concurrency.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Monotonically increasing revision of a stored document.
///
/// `Version::ABSENT` (0) means "the document does not exist"; the first write
/// produces version 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub const ABSENT: Version = Version(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_absent(self) -> bool {
        self.0 == 0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl core::fmt::Display for Version {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Optimistic concurrency expectation for a document write.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Skip version checking (blind overwrite).
    Any,
    /// The document must not exist yet.
    Absent,
    /// Require the document to be at an exact version.
    Exact(Version),
}

impl ExpectedVersion {
    /// Expectation derived from a version observed during a read.
    pub fn observed(version: Version) -> Self {
        if version.is_absent() {
            ExpectedVersion::Absent
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    pub fn matches(self, actual: Version) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Absent => actual.is_absent(),
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: Version) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}
