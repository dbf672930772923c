//! OpenAI `/v1/embeddings` wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	pub input: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub encoding_format: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub dimensions: Option<u64>,
	#[serde(flatten)]
	pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub object: String,
	#[serde(default)]
	pub data: Vec<Value>,
	pub model: String,
	#[serde(default)]
	pub usage: Usage,
	#[serde(flatten)]
	pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
	#[serde(default)]
	pub prompt_tokens: u64,
	#[serde(default)]
	pub total_tokens: u64,
}
