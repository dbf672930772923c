//! Per-`(input schema, output schema, endpoint)` body rewriting. One
//! translator instance lives for exactly one transaction: streaming state
//! (partial SSE lines, cumulative token counts) is per-instance.

use serde_json::Value;

use crate::config::{ApiVendor, Backend};
use crate::http::{HeaderMap, HeaderMutation};
use crate::llm::{AIError, LLMTokenUsage, ParsedRequest, RouteType};

pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod openai;
pub mod rerank;

#[derive(Debug, Default)]
pub struct RequestTransform {
	pub header_mutation: Option<HeaderMutation>,
	/// `None` forwards the original bytes untouched.
	pub body: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct ResponseTransform {
	pub header_mutation: Option<HeaderMutation>,
	pub body: Option<Vec<u8>>,
	/// Usage *delta* observed in this call; the processor accumulates.
	pub usage: LLMTokenUsage,
	/// Model as reported by the upstream, when a chunk carries it.
	pub response_model: Option<String>,
}

pub trait Translator: Send {
	/// Called once per attempt with the canonical original bytes and parsed
	/// body. When `force_body_mutation` is false and nothing changes, the
	/// translator may skip the body to signal pass-through.
	fn request_body(
		&mut self,
		raw: &[u8],
		parsed: &ParsedRequest,
		force_body_mutation: bool,
	) -> Result<RequestTransform, AIError>;

	fn response_headers(&mut self, headers: &HeaderMap) -> Result<Option<HeaderMutation>, AIError>;

	/// Called once per body chunk for streamed responses, once total
	/// otherwise. `end_of_stream` marks the final call.
	fn response_body(
		&mut self,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, AIError>;

	/// Only invoked for non-2xx upstream responses.
	fn response_error(
		&mut self,
		headers: &HeaderMap,
		body: &[u8],
	) -> Result<(Option<HeaderMutation>, Option<Vec<u8>>), AIError>;

	/// True once the translator knows the response will be streamed; drives
	/// the proxy's response-body mode override.
	fn streaming(&self) -> bool;

	/// True when this translator rewrites response bodies. The processor only
	/// decompresses (and drops the `content-encoding` header) when the bytes
	/// will actually change.
	fn mutates_response_body(&self) -> bool {
		false
	}
}

/// Instantiate the translator for a backend's schema. The schema uniquely
/// identifies the implementation; an unknown pairing is a config error
/// surfaced at backend-selection time.
pub fn new_translator(
	backend: &Backend,
	route_type: RouteType,
) -> Result<Box<dyn Translator>, AIError> {
	let model_override = backend.model_name_override.clone();
	match (backend.schema.vendor, route_type) {
		(
			ApiVendor::OpenAI,
			RouteType::Completions | RouteType::Embeddings | RouteType::Images,
		) => Ok(Box::new(openai::OpenAITranslator::new(
			route_type,
			model_override,
		))),
		(
			ApiVendor::AzureOpenAI,
			RouteType::Completions | RouteType::Embeddings | RouteType::Images,
		) => Ok(Box::new(azure::AzureTranslator::new(
			route_type,
			model_override,
			backend.schema.version.clone(),
		))),
		(ApiVendor::AwsBedrock, RouteType::Completions) => {
			Ok(Box::new(bedrock::BedrockTranslator::new(model_override)))
		},
		(ApiVendor::Anthropic, RouteType::Messages) => Ok(Box::new(
			anthropic::AnthropicTranslator::new(model_override, None),
		)),
		(ApiVendor::GcpAnthropic, RouteType::Messages) => {
			let gcp = backend
				.gcp
				.clone()
				.ok_or(AIError::MissingField("gcp project/region"))?;
			Ok(Box::new(anthropic::AnthropicTranslator::new(
				model_override,
				Some(anthropic::VertexTarget {
					project: gcp.project,
					region: gcp.region,
					anthropic_version: backend.schema.version.clone(),
				}),
			)))
		},
		(ApiVendor::Cohere, RouteType::Rerank) => {
			Ok(Box::new(rerank::RerankTranslator::new(model_override)))
		},
		(vendor, rt) => Err(AIError::UnsupportedSchema(format!(
			"{vendor:?} does not serve {rt:?}"
		))),
	}
}

/// Rewrite only the `"model"` member of a JSON body, leaving member order
/// untouched so pass-through diffs stay minimal.
pub(crate) fn set_model_field(raw: &[u8], model: &str) -> Result<Vec<u8>, AIError> {
	let mut value: Value = serde_json::from_slice(raw).map_err(AIError::RequestParsing)?;
	if let Some(obj) = value.as_object_mut() {
		obj.insert("model".to_string(), Value::String(model.to_string()));
	}
	serde_json::to_vec(&value).map_err(AIError::RequestMarshal)
}

#[cfg(test)]
mod tests;
