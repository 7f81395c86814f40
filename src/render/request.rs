//! Render request and response types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A request to render one named view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Identifier of the view to render
    pub name: String,

    /// Input data for the view
    #[serde(default)]
    pub props: serde_json::Value,

    /// Render deadline; zero means the runtime default
    #[serde(skip)]
    pub timeout: Duration,
}

impl Request {
    /// Create a request for the given view with no props
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            props: serde_json::Value::Null,
            timeout: Duration::ZERO,
        }
    }

    /// Set the props
    pub fn with_props(mut self, props: serde_json::Value) -> Self {
        self.props = props;
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Outcome of a render as reported by the script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Rendered markup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    /// Error reported by the script itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Host-side time spent marshalling and executing the render
    #[serde(skip)]
    pub elapsed: Duration,
}

impl Response {
    /// Whether the script reported an error
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}
