//! Anthropic `/v1/messages` wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	#[serde(default)]
	pub max_tokens: u64,
	#[serde(default)]
	pub messages: Vec<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub anthropic_version: Option<String>,
	#[serde(flatten)]
	pub rest: serde_json::Map<String, Value>,
}

impl Request {
	pub fn streaming(&self) -> bool {
		self.stream.unwrap_or_default()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub model: String,
	#[serde(default)]
	pub usage: Usage,
	#[serde(flatten)]
	pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
	#[serde(default)]
	pub input_tokens: u64,
	#[serde(default)]
	pub output_tokens: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cache_read_input_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cache_creation_input_tokens: Option<u64>,
}

/// A streamed event frame. The event kind is in `kind`; only the fields the
/// gateway consumes are typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<Response>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub usage: Option<Usage>,
	#[serde(flatten)]
	pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	#[serde(rename = "type")]
	pub kind: String,
	pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
	#[serde(rename = "type")]
	pub kind: String,
	pub message: String,
}
