//! Causality context attached to every event and write

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies who initiated an action and lets consumers trace the chain
/// of writes and events that followed from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this context (ULID)
    pub id: String,

    /// User that initiated the action, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Parent context id, set on derived actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    /// A fresh root context.
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: None,
            parent_id: None,
        }
    }

    /// A root context attributed to a user.
    pub fn with_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new()
        }
    }

    /// A derived context carrying this one as parent.
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: self.user_id.clone(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
