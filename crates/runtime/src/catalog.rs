//! Tool catalog discovered from a session.

use crate::SessionError;
use crate::session::ToolSession;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// A tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Snapshot of the tools a session offers, keyed by unique name.
///
/// Keeps the order the endpoint listed them in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from descriptors. A repeated name replaces the
    /// earlier descriptor in its original position.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        let mut catalog = Self::new();
        for descriptor in descriptors {
            catalog.insert(descriptor);
        }
        catalog
    }

    /// Query `session` for its current tools.
    pub async fn refresh<S: ToolSession>(session: &S) -> Result<Self, SessionError> {
        let descriptors = session.list_tools().await?;
        let catalog = Self::from_descriptors(descriptors);
        debug!(tools = ?catalog.names().collect::<Vec<_>>(), "refreshed tool catalog");
        Ok(catalog)
    }

    pub fn insert(&mut self, descriptor: ToolDescriptor) {
        match self.tools.iter_mut().find(|t| t.name == descriptor.name) {
            Some(existing) => {
                warn!(tool = %descriptor.name, "duplicate tool name, keeping the later definition");
                *existing = descriptor;
            }
            None => self.tools.push(descriptor),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
