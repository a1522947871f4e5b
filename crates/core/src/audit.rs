//! Audit stamps attached to every mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// Who changed a record, when, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub actor: UserId,
    pub at: DateTime<Utc>,
    /// Human-readable cause ("sale S-1#0", "transfer to lot ...", ...).
    pub note: String,
}

impl AuditStamp {
    pub fn new(actor: UserId, at: DateTime<Utc>, note: impl Into<String>) -> Self {
        Self {
            actor,
            at,
            note: note.into(),
        }
    }

    /// Stamp with the current wall-clock time.
    pub fn now(actor: UserId, note: impl Into<String>) -> Self {
        Self::new(actor, Utc::now(), note)
    }
}
