//! Message envelope
//!
//! Every message on the wire is a single JSON object:
//!
//! ```text
//! {"src": "n1", "dest": "n2", "body": {"type": "sync", "msg_id": 7, "messages": [1, 2]}}
//! ```
//!
//! The body keeps its type tag and correlation ids as typed fields and every
//! other key in `fields`, so the runtime can route on `type` without knowing
//! the payload, and handlers decode the payload they expect.

use crate::error::{Error, Result};
use crate::types::{MsgId, NodeId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A routed message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: Body,
}

/// Message body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Message type tag (`broadcast`, `read_ok`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<MsgId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MsgId>,
    /// Payload fields
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl Body {
    /// Build a body from an internally tagged payload (`#[serde(tag = "type")]`)
    pub fn encode<T: Serialize>(payload: &T) -> Result<Self> {
        match serde_json::to_value(payload)? {
            JsonValue::Object(mut fields) => {
                let kind = match fields.remove("type") {
                    Some(JsonValue::String(kind)) => kind,
                    _ => return Err(Error::Malformed("payload has no `type` tag".into())),
                };
                // Correlation ids are owned by the runtime
                fields.remove("msg_id");
                fields.remove("in_reply_to");
                Ok(Self {
                    kind,
                    msg_id: None,
                    in_reply_to: None,
                    fields,
                })
            }
            other => Err(Error::Malformed(format!(
                "payload is not a JSON object: {}",
                other
            ))),
        }
    }

    /// Decode the payload; failures surface as `Error::Malformed`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut map = self.fields.clone();
        map.insert("type".to_owned(), JsonValue::String(self.kind.clone()));
        serde_json::from_value(JsonValue::Object(map)).map_err(|e| Error::Malformed(e.to_string()))
    }

    pub fn with_msg_id(mut self, msg_id: MsgId) -> Self {
        self.msg_id = Some(msg_id);
        self
    }

    pub fn with_in_reply_to(mut self, in_reply_to: Option<MsgId>) -> Self {
        self.in_reply_to = in_reply_to;
        self
    }

    /// Whether this is an `error` body
    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }
}

impl Envelope {
    pub fn new(src: NodeId, dest: NodeId, body: Body) -> Self {
        Self { src, dest, body }
    }
}
