//! Azure OpenAI: identical bodies to OpenAI, but the request is addressed to
//! a deployment-scoped path with an `api-version` query parameter. The
//! deployment name is the (possibly overridden) model.

use crate::http::{HeaderMap, HeaderMutation};
use crate::llm::{AIError, ParsedRequest, RouteType};

use super::openai::OpenAITranslator;
use super::{RequestTransform, ResponseTransform, Translator};

pub struct AzureTranslator {
	inner: OpenAITranslator,
	route_type: RouteType,
	model_override: Option<String>,
	api_version: String,
}

impl AzureTranslator {
	pub fn new(route_type: RouteType, model_override: Option<String>, api_version: String) -> Self {
		Self {
			inner: OpenAITranslator::new(route_type, model_override.clone()),
			route_type,
			model_override,
			api_version,
		}
	}

	fn endpoint_suffix(&self) -> &'static str {
		match self.route_type {
			RouteType::Completions => "chat/completions",
			RouteType::Embeddings => "embeddings",
			_ => "images/generations",
		}
	}
}

impl Translator for AzureTranslator {
	fn request_body(
		&mut self,
		raw: &[u8],
		parsed: &ParsedRequest,
		force_body_mutation: bool,
	) -> Result<RequestTransform, AIError> {
		let mut out = self.inner.request_body(raw, parsed, force_body_mutation)?;
		let deployment = self
			.model_override
			.as_deref()
			.or(parsed.model())
			.ok_or(AIError::MissingField("model"))?;
		let path = format!(
			"/openai/deployments/{deployment}/{}?api-version={}",
			self.endpoint_suffix(),
			self.api_version
		);
		let mut headers = out.header_mutation.take().unwrap_or_default();
		headers.set(":path", path);
		out.header_mutation = Some(headers);
		Ok(out)
	}

	fn response_headers(&mut self, headers: &HeaderMap) -> Result<Option<HeaderMutation>, AIError> {
		self.inner.response_headers(headers)
	}

	fn response_body(
		&mut self,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, AIError> {
		self.inner.response_body(body, end_of_stream)
	}

	fn response_error(
		&mut self,
		headers: &HeaderMap,
		body: &[u8],
	) -> Result<(Option<HeaderMutation>, Option<Vec<u8>>), AIError> {
		self.inner.response_error(headers, body)
	}

	fn streaming(&self) -> bool {
		self.inner.streaming()
	}
}
