//! Messages crossing the isolation boundary.
//!
//! The wire payload is a single JSON value, mirroring what the host page
//! posts: a bare string for the handshake and the document, a
//! `[tag, args...]` array for everything the instrumented program reports
//! back. Parsing is total: anything that does not match the table is
//! `None`, and the session drops it.

use serde_json::Value;

/// Editor-to-host messages.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Full markup/script text to render or execute.
    Document(String),
    /// Handshake ping, resent until the host answers.
    Wakeup,
}

impl OutboundMessage {
    pub fn encode(&self) -> Value {
        match self {
            OutboundMessage::Document(text) => Value::String(text.clone()),
            OutboundMessage::Wakeup => Value::String("wakeup".to_string()),
        }
    }
}

/// Host-to-editor messages.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Handshake acknowledgment.
    Awake,
    /// A forwarded console call with its argument list.
    Console(Vec<Value>),
    /// An uncaught runtime error description.
    Catch(String),
    /// One tracked identifier or call's observed value.
    Rule { needle: String, value: Value },
    /// The run finished, successfully or not.
    Completed,
}

impl InboundMessage {
    /// Decode a wire payload. `None` means a malformed envelope, which
    /// callers treat as dropped, never as an error.
    pub fn parse(data: &Value) -> Option<Self> {
        if let Some(text) = data.as_str() {
            return (text == "awake").then_some(InboundMessage::Awake);
        }
        let items = data.as_array()?;
        let tag = items.first()?.as_str()?;
        match tag {
            "console" => Some(InboundMessage::Console(items[1..].to_vec())),
            "catch" => {
                let description = match items.get(1)? {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                Some(InboundMessage::Catch(description))
            }
            "rule" => {
                let needle = items.get(1)?.as_str()?.to_string();
                // A missing value slot is an undefined report.
                let value = items.get(2).cloned().unwrap_or(Value::Null);
                Some(InboundMessage::Rule { needle, value })
            }
            "completed" => Some(InboundMessage::Completed),
            _ => None,
        }
    }
}

/// Classify a console argument for display purposes; like JS `typeof`,
/// except arrays are called out separately.
pub fn console_value_kind(value: &Value) -> &'static str {
    match value {
        Value::Array(_) => "array",
        other => crate::core::runtime_match::js_typeof(other),
    }
}
