//! Cohere `/v2/rerank` wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	pub query: String,
	#[serde(default)]
	pub documents: Vec<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_n: Option<u64>,
	#[serde(flatten)]
	pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default)]
	pub results: Vec<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub meta: Option<Meta>,
	#[serde(flatten)]
	pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub billed_units: Option<BilledUnits>,
	#[serde(flatten)]
	pub rest: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BilledUnits {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub input_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub output_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub search_units: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub message: String,
}
