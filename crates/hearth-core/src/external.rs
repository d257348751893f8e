//! Traits for collaborators injected into the core
//!
//! The service registry, the expression evaluator, and the recorder are
//! implemented outside this runtime (or swapped out entirely in tests).
//! The core only ever sees them through these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::events::StateChangedData;
use crate::Event;

/// Error returned by a failed service invocation.
#[derive(Debug, Clone, Error)]
pub enum ServiceCallError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    Failed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),
}

/// Error from rendering an expression template.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("template render failed: {0}")]
    Render(String),

    #[error("template render timed out")]
    Timeout,
}

/// Entities (and, in richer registries, devices or areas) a service call
/// is aimed at.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ServiceTarget {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_id: Vec<String>,
}

impl ServiceTarget {
    pub fn entity(id: impl Into<String>) -> Self {
        Self {
            entity_id: vec![id.into()],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entity_id.is_empty()
    }
}

/// The registry of callable services, implemented outside this core.
#[async_trait]
pub trait ServiceRegistry: Send + Sync + 'static {
    async fn call(
        &self,
        domain: &str,
        service: &str,
        target: ServiceTarget,
        data: Value,
    ) -> Result<(), ServiceCallError>;
}

/// The expression evaluator, implemented outside this core.
///
/// Callers that need a deadline wrap `render` in `tokio::time::timeout`;
/// evaluators that enforce their own may return [`RenderError::Timeout`].
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync + 'static {
    async fn render(&self, template: &str, context: &Value) -> Result<String, RenderError>;
}

/// History/metadata sink, notified fire-and-forget.
pub trait Recorder: Send + Sync + 'static {
    /// Called on every state change the store emits.
    fn state_changed(&self, event: &Event<StateChangedData>);

    /// Called whenever an automation's conditions pass and a run starts.
    fn automation_triggered(&self, automation_id: &str, when: DateTime<Utc>);
}
