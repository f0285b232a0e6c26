//! Execution context for agents
//!
//! The `Context` struct is a small key-value store carried next to each agent
//! request. The consensus pipeline uses it to tell an agent which role it is
//! playing, which instrument is under discussion and who asked.

use std::collections::HashMap;

/// Well-known context keys
pub mod keys {
    /// Role label of the agent being asked (e.g. "technical")
    pub const ROLE: &str = "role";
    /// Instrument identifier under analysis
    pub const IDENTIFIER: &str = "identifier";
    /// Caller identity that triggered the request
    pub const CALLER: &str = "caller";
    /// Correlation id for one pipeline run
    pub const REQUEST_ID: &str = "request_id";
}

/// Context passed to agents during execution
///
/// # Example
///
/// ```
/// use agent_core::Context;
///
/// let ctx = Context::new()
///     .with_role("technical")
///     .with_identifier("7203");
///
/// assert_eq!(ctx.role(), Some("technical"));
/// assert_eq!(ctx.identifier(), Some("7203"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    data: HashMap<String, serde_json::Value>,
}

impl Context {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    // =========== Builder Methods ===========

    /// Set the role label
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.insert(keys::ROLE, serde_json::json!(role.into()));
        self
    }

    /// Set the instrument identifier
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.insert(keys::IDENTIFIER, serde_json::json!(identifier.into()));
        self
    }

    /// Set the caller identity
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.insert(keys::CALLER, serde_json::json!(caller.into()));
        self
    }

    /// Set the request correlation id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.insert(keys::REQUEST_ID, serde_json::json!(request_id.into()));
        self
    }

    // =========== Common Accessors ===========

    pub fn role(&self) -> Option<&str> {
        self.get(keys::ROLE).and_then(|v| v.as_str())
    }

    pub fn identifier(&self) -> Option<&str> {
        self.get(keys::IDENTIFIER).and_then(|v| v.as_str())
    }

    pub fn caller(&self) -> Option<&str> {
        self.get(keys::CALLER).and_then(|v| v.as_str())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.get(keys::REQUEST_ID).and_then(|v| v.as_str())
    }

    // =========== Generic Key-Value Operations ===========

    /// Insert a value into the context
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Get a value from the context
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
