//! Namespaced tool registry.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rmcp::model::{JsonObject, Tool};
use tracing::debug;

use crate::backend::{BackendKind, BackendSession};
use crate::error::{AggregatorError, AggregatorResult};
use crate::native::NativeTool;

/// Namespace prefix of the built-in tools.
pub const NATIVE_NAMESPACE: &str = "mcper/native";

/// Build `{kind}/{instance}/{tool}`.
#[must_use]
pub fn namespaced_name(kind: BackendKind, instance: &str, tool: &str) -> String {
    format!("{kind}/{instance}/{tool}")
}

/// Where calls to a registered tool go.
#[derive(Debug, Clone)]
pub enum BackendHandle {
    /// Forward to a backend session under the backend's own tool name.
    Remote {
        /// Open session.
        session: Arc<BackendSession>,
        /// Tool name as the backend knows it.
        tool: String,
    },
    /// Answer in-process.
    Native(NativeTool),
}

/// A published tool.
#[derive(Debug, Clone)]
pub struct ToolRegistration {
    /// Namespaced name.
    pub name: String,
    /// Description shown to the client.
    pub description: String,
    /// JSON Schema of the arguments.
    pub input_schema: Arc<JsonObject>,
    /// Call target.
    pub handle: BackendHandle,
}

impl ToolRegistration {
    /// Registration forwarding to `tool` on `session`.
    #[must_use]
    pub fn remote(session: &Arc<BackendSession>, tool: &Tool) -> Self {
        Self {
            name: namespaced_name(session.kind(), session.instance(), &tool.name),
            description: tool.description.as_deref().unwrap_or_default().to_string(),
            input_schema: normalize_schema(&tool.input_schema),
            handle: BackendHandle::Remote {
                session: Arc::clone(session),
                tool: tool.name.to_string(),
            },
        }
    }

    /// Registration for a built-in tool.
    #[must_use]
    pub fn native(tool: NativeTool) -> Self {
        Self {
            name: format!("{NATIVE_NAMESPACE}/{}", tool.name()),
            description: tool.description().to_string(),
            input_schema: Arc::new(tool.input_schema()),
            handle: BackendHandle::Native(tool),
        }
    }

    /// Convert to the MCP tool definition.
    #[must_use]
    pub fn to_tool(&self) -> Tool {
        Tool::new(
            self.name.clone(),
            self.description.clone(),
            Arc::clone(&self.input_schema),
        )
    }
}

/// Replace a schema without a `type` by an empty object schema.
fn normalize_schema(schema: &Arc<JsonObject>) -> Arc<JsonObject> {
    if schema.get("type").is_some() {
        return Arc::clone(schema);
    }
    let mut object = JsonObject::new();
    object.insert("type".into(), "object".into());
    object.insert("properties".into(), serde_json::Value::Object(JsonObject::new()));
    Arc::new(object)
}

/// Concurrent registry keyed by namespaced name. Registration never
/// overwrites.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<ToolRegistration>>,
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one tool.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::NamespaceCollision`] if the name is taken.
    pub fn register(&self, registration: ToolRegistration) -> AggregatorResult<()> {
        match self.tools.entry(registration.name.clone()) {
            Entry::Occupied(_) => Err(AggregatorError::NamespaceCollision(registration.name)),
            Entry::Vacant(slot) => {
                debug!(tool = %registration.name, "registered tool");
                slot.insert(Arc::new(registration));
                Ok(())
            },
        }
    }

    /// Add a batch of tools; on a collision, none of the batch remains.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::NamespaceCollision`] for the first taken
    /// name.
    pub fn register_all(&self, registrations: Vec<ToolRegistration>) -> AggregatorResult<usize> {
        let mut added: Vec<String> = Vec::with_capacity(registrations.len());
        for registration in registrations {
            let name = registration.name.clone();
            if let Err(e) = self.register(registration) {
                for name in &added {
                    self.tools.remove(name);
                }
                return Err(e);
            }
            added.push(name);
        }
        Ok(added.len())
    }

    /// Look up a tool.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ToolRegistration>> {
        self.tools.get(name).map(|r| Arc::clone(r.value()))
    }

    /// All tools sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<ToolRegistration>> {
        let mut tools: Vec<_> = self.tools.iter().map(|r| Arc::clone(r.value())).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Number of tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
