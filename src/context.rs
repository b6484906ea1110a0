//! Call context carried through one caller-facing request.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::tiers::Caller;

/// Context for one hub call.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Unique call ID, shared by every dispatch the call makes.
    pub call_id: Uuid,
    /// Who is calling.
    pub caller: Caller,
    /// When the call started.
    pub created_at: DateTime<Utc>,
}

impl CallContext {
    /// Create a new call context.
    pub fn new(caller: Caller) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            caller,
            created_at: Utc::now(),
        }
    }

    /// Time since the call started.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}
