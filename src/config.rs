//! Gateway configuration. One `Config` is immutable for its generation; the
//! control-plane watcher (not part of this crate) publishes replacements
//! through `ConfigStore`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cel;
use crate::llm::RouteType;

pub const DEFAULT_MODEL_NAME_HEADER: &str = "x-ai-eg-model";
pub const DEFAULT_METADATA_NAMESPACE: &str = "ai_gateway_llm_ns";
/// Header carrying the original request path across the route rewrite.
pub const ORIGINAL_PATH_HEADER: &str = "x-ai-eg-original-path";
/// Header carrying the selected route rule name back to the front proxy.
pub const SELECTED_ROUTE_HEADER: &str = "x-ai-eg-selected-route";
/// Header keying MCP multiplexer routes, injected by the front proxy.
pub const MCP_ROUTE_HEADER: &str = "x-ai-eg-mcp-route";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
	#[serde(default)]
	pub routes: Vec<Route>,
	#[serde(default)]
	pub backends: Vec<Backend>,
	#[serde(default)]
	pub mcp_routes: Vec<McpRoute>,
	/// Hex-encoded 32 byte key for MCP session and event id encryption. A
	/// random per-instance key is generated when unset.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_secret: Option<String>,
}

impl Config {
	pub fn backend(&self, name: &str) -> Option<&Backend> {
		self.backends.iter().find(|b| b.name == name)
	}

	pub fn mcp_route(&self, name: &str) -> Option<&McpRoute> {
		self.mcp_routes.iter().find(|r| r.name == name)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Route {
	pub name: String,
	/// Endpoint kind served by this route; also fixes the client-facing schema.
	pub route_type: RouteType,
	#[serde(default)]
	pub rules: Vec<RouteRule>,
	#[serde(default = "default_model_name_header")]
	pub model_name_header_key: String,
	#[serde(default)]
	pub request_costs: Vec<LLMRequestCost>,
	#[serde(default = "default_metadata_namespace")]
	pub metadata_namespace: String,
}

fn default_model_name_header() -> String {
	DEFAULT_MODEL_NAME_HEADER.to_string()
}

fn default_metadata_namespace() -> String {
	DEFAULT_METADATA_NAMESPACE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteRule {
	pub name: String,
	/// All matchers must hold for the rule to match. An empty list matches
	/// every request, so a catch-all rule goes last.
	#[serde(default)]
	pub headers: Vec<HeaderMatch>,
	#[serde(default)]
	pub backend_refs: Vec<WeightedBackend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeaderMatch {
	pub name: String,
	pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WeightedBackend {
	pub name: String,
	#[serde(default = "default_weight")]
	pub weight: u32,
}

fn default_weight() -> u32 {
	1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Backend {
	pub name: String,
	pub schema: ApiSchema,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model_name_override: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub header_mutation: Option<HeaderMutationSpec>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body_mutation: Option<BodyMutationSpec>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub auth: Option<AuthConfig>,
	/// Required for `gcpAnthropic` backends; ignored elsewhere.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gcp: Option<GcpVertexParams>,
}

/// Uniquely identifies the translator for a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApiSchema {
	pub vendor: ApiVendor,
	/// Vendor-specific version string: the Azure `api-version` query value,
	/// the `anthropic_version` for GCP, unused elsewhere.
	#[serde(default)]
	pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiVendor {
	#[serde(rename = "openAI")]
	OpenAI,
	#[serde(rename = "azureOpenAI")]
	AzureOpenAI,
	#[serde(rename = "awsBedrock")]
	AwsBedrock,
	Anthropic,
	#[serde(rename = "gcpAnthropic")]
	GcpAnthropic,
	Cohere,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GcpVertexParams {
	pub project: String,
	pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LLMRequestCost {
	/// Key under which the cost lands in the dynamic metadata namespace.
	pub metadata_key: String,
	#[serde(rename = "type")]
	pub kind: CostKind,
	/// Required when `kind` is `cel`; compiled at config load.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cel: Option<cel::Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CostKind {
	InputToken,
	OutputToken,
	CachedInputToken,
	TotalToken,
	Cel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeaderMutationSpec {
	#[serde(default)]
	pub set: Vec<HeaderValue>,
	#[serde(default)]
	pub remove: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeaderValue {
	pub name: String,
	pub value: String,
}

/// Config-driven edits to JSON request bodies, scoped by dotted paths
/// (`metadata.user`, `messages.0.role`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BodyMutationSpec {
	#[serde(default)]
	pub set: Vec<FieldValue>,
	#[serde(default)]
	pub remove: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldValue {
	pub path: String,
	pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub enum AuthConfig {
	/// Static key sent on a configurable header.
	ApiKey { header: String, key: String },
	/// Static bearer token on `authorization`.
	Bearer { token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct McpRoute {
	pub name: String,
	#[serde(default)]
	pub backends: Vec<McpBackend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct McpBackend {
	pub name: String,
	/// Full URL of the backend's MCP endpoint.
	pub url: String,
	/// When set, only these tools are visible and callable.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub allowed_tools: Option<Vec<String>>,
	#[serde(default)]
	pub blocked_tools: Vec<String>,
}

impl McpBackend {
	pub fn allows_tool(&self, tool: &str) -> bool {
		if self.blocked_tools.iter().any(|t| t == tool) {
			return false;
		}
		match &self.allowed_tools {
			Some(allowed) => allowed.iter().any(|t| t == tool),
			None => true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_full_config() {
		let cfg: Config = serde_json::from_value(serde_json::json!({
			"routes": [{
				"name": "chat",
				"routeType": "completions",
				"rules": [{
					"name": "default",
					"headers": [{"name": "x-ai-eg-model", "value": "gpt-5-nano"}],
					"backendRefs": [{"name": "openai", "weight": 2}]
				}],
				"requestCosts": [
					{"metadataKey": "cel_int", "type": "cel", "cel": "54321"},
					{"metadataKey": "input_token_usage", "type": "inputToken"}
				]
			}],
			"backends": [{
				"name": "openai",
				"schema": {"vendor": "openAI"},
				"auth": {"bearer": {"token": "sk-test"}}
			}],
			"mcpRoutes": [{
				"name": "tools",
				"backends": [
					{"name": "a", "url": "http://a/mcp", "allowedTools": ["x"]},
					{"name": "b", "url": "http://b/mcp"}
				]
			}]
		}))
		.unwrap();

		assert_eq!(cfg.routes[0].model_name_header_key, DEFAULT_MODEL_NAME_HEADER);
		assert_eq!(cfg.routes[0].metadata_namespace, DEFAULT_METADATA_NAMESPACE);
		assert_eq!(cfg.routes[0].request_costs[0].kind, CostKind::Cel);
		assert!(cfg.routes[0].request_costs[0].cel.is_some());
		assert_eq!(cfg.backend("openai").unwrap().schema.vendor, ApiVendor::OpenAI);
		let mcp = cfg.mcp_route("tools").unwrap();
		assert!(mcp.backends[0].allows_tool("x"));
		assert!(!mcp.backends[0].allows_tool("y"));
		assert!(mcp.backends[1].allows_tool("y"));
	}

	#[test]
	fn rejects_unknown_fields() {
		let err = serde_json::from_value::<Config>(serde_json::json!({"bogus": true}));
		assert!(err.is_err());
	}

	#[test]
	fn rejects_invalid_cel() {
		let err = serde_json::from_value::<Config>(serde_json::json!({
			"routes": [{
				"name": "chat",
				"routeType": "completions",
				"requestCosts": [{"metadataKey": "k", "type": "cel", "cel": "+++"}]
			}]
		}));
		assert!(err.is_err());
	}
}
