//! [`ExpressionEvaluator`] implementation backed by the template engine

use crate::engine::TemplateEngine;
use async_trait::async_trait;
use hearth_core::{ExpressionEvaluator, RenderError};
use serde_json::Value;
use std::sync::Arc;

/// Adapter handing the engine to consumers that only know the core trait.
pub struct TemplateEvaluator {
    engine: Arc<TemplateEngine>,
}

impl TemplateEvaluator {
    pub fn new(engine: Arc<TemplateEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ExpressionEvaluator for TemplateEvaluator {
    async fn render(&self, template: &str, context: &Value) -> Result<String, RenderError> {
        self.engine
            .render_with_context(template, context)
            .map_err(|e| RenderError::Render(e.to_string()))
    }
}
