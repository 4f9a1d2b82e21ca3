use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message addressed either to an exchange (broker side) or to a client id
/// (notification side).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub target: String,
    pub body: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub routing_key: String,
}

impl Message {
    pub fn new(target: impl Into<String>, body: Value) -> Self {
        Message {
            target: target.into(),
            body,
            routing_key: String::new(),
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    /// Builds a message whose body is the JSON form of `payload`.
    pub fn json<T: Serialize>(target: impl Into<String>, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Message::new(target, serde_json::to_value(payload)?))
    }
}

/// Asks the matching worker to look for patients matching a client's symptoms.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SearchRequest {
    pub client_id: String,
    pub symptoms: u32,
}

/// What the matching worker found, on its way to the client.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SearchResult {
    pub client_id: String,
    pub found_patients: u32,
}
