use serde::{Deserialize, Serialize};

use crate::{AppResult, NonEmptyString};

/// Identity recorded on every audit entry written by a retirement run.
///
/// The value differs per deployment environment and is injected at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorIdentity {
    actor_id: NonEmptyString,
}

impl ActorIdentity {
    /// Creates an actor identity from a configured identifier.
    pub fn new(actor_id: impl Into<String>) -> AppResult<Self> {
        let actor_id = NonEmptyString::new(actor_id.into().trim())?;
        Ok(Self { actor_id })
    }

    /// Returns the stable actor identifier.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        self.actor_id.as_str()
    }
}
