use serde::{Deserialize, Serialize};

pub mod translator;
pub mod types;

#[cfg(test)]
mod tests;

/// The endpoint kind a route serves. Together with the backend schema this
/// selects the translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteType {
	/// OpenAI /v1/chat/completions
	Completions,
	/// OpenAI /v1/embeddings
	Embeddings,
	/// OpenAI /v1/images/generations
	Images,
	/// Anthropic /v1/messages
	Messages,
	/// Cohere /v2/rerank
	Rerank,
}

impl RouteType {
	pub fn from_path(path: &str) -> Option<RouteType> {
		let path = path.split('?').next().unwrap_or(path);
		match path {
			"/v1/chat/completions" => Some(RouteType::Completions),
			"/v1/embeddings" => Some(RouteType::Embeddings),
			"/v1/images/generations" => Some(RouteType::Images),
			"/v1/messages" => Some(RouteType::Messages),
			"/v1/rerank" | "/v2/rerank" => Some(RouteType::Rerank),
			_ => None,
		}
	}
}

/// Token usage for one transaction, accumulated monotonically across streamed
/// chunks. Translators report deltas; the processor owns the running total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LLMTokenUsage {
	pub input: u64,
	pub cached_input: u64,
	pub output: u64,
	pub total: u64,
}

impl LLMTokenUsage {
	pub fn accumulate(&mut self, delta: LLMTokenUsage) {
		self.input += delta.input;
		self.cached_input += delta.cached_input;
		self.output += delta.output;
		self.total += delta.total;
	}

	pub fn is_zero(&self) -> bool {
		*self == LLMTokenUsage::default()
	}
}

/// The parsed request body, tagged by endpoint kind. The router stage parses
/// once; every retry re-reads this instead of the mutated bytes.
#[derive(Debug, Clone)]
pub enum ParsedRequest {
	Completions(types::completions::Request),
	Embeddings(types::embeddings::Request),
	Images(types::images::Request),
	Messages(types::messages::Request),
	Rerank(types::rerank::Request),
}

impl ParsedRequest {
	pub fn parse(route_type: RouteType, raw: &[u8]) -> Result<ParsedRequest, AIError> {
		let parsed = match route_type {
			RouteType::Completions => {
				ParsedRequest::Completions(serde_json::from_slice(raw).map_err(AIError::RequestParsing)?)
			},
			RouteType::Embeddings => {
				ParsedRequest::Embeddings(serde_json::from_slice(raw).map_err(AIError::RequestParsing)?)
			},
			RouteType::Images => {
				ParsedRequest::Images(serde_json::from_slice(raw).map_err(AIError::RequestParsing)?)
			},
			RouteType::Messages => {
				ParsedRequest::Messages(serde_json::from_slice(raw).map_err(AIError::RequestParsing)?)
			},
			RouteType::Rerank => {
				ParsedRequest::Rerank(serde_json::from_slice(raw).map_err(AIError::RequestParsing)?)
			},
		};
		Ok(parsed)
	}

	pub fn route_type(&self) -> RouteType {
		match self {
			ParsedRequest::Completions(_) => RouteType::Completions,
			ParsedRequest::Embeddings(_) => RouteType::Embeddings,
			ParsedRequest::Images(_) => RouteType::Images,
			ParsedRequest::Messages(_) => RouteType::Messages,
			ParsedRequest::Rerank(_) => RouteType::Rerank,
		}
	}

	pub fn model(&self) -> Option<&str> {
		match self {
			ParsedRequest::Completions(r) => r.model.as_deref(),
			ParsedRequest::Embeddings(r) => r.model.as_deref(),
			ParsedRequest::Images(r) => r.model.as_deref(),
			ParsedRequest::Messages(r) => r.model.as_deref(),
			ParsedRequest::Rerank(r) => r.model.as_deref(),
		}
	}

	pub fn streaming(&self) -> bool {
		match self {
			ParsedRequest::Completions(r) => r.streaming(),
			ParsedRequest::Messages(r) => r.streaming(),
			// Image generation has no streaming surface; everything else is
			// request/response.
			_ => false,
		}
	}
}

#[derive(thiserror::Error, Debug)]
pub enum AIError {
	#[error("missing field: {0}")]
	MissingField(&'static str),
	#[error("unsupported schema: {0}")]
	UnsupportedSchema(String),
	#[error("failed to parse request: {0}")]
	RequestParsing(serde_json::Error),
	#[error("failed to marshal request: {0}")]
	RequestMarshal(serde_json::Error),
	#[error("failed to parse response: {0}")]
	ResponseParsing(serde_json::Error),
	#[error("failed to marshal response: {0}")]
	ResponseMarshal(serde_json::Error),
	#[error("failed to decode event stream: {0}")]
	EventStream(anyhow::Error),
}
