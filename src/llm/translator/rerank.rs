//! Cohere rerank pass-through. Billing counts come from
//! `meta.billed_units.input_tokens`.

use crate::http::{HeaderMap, HeaderMutation};
use crate::llm::types::rerank;
use crate::llm::{AIError, LLMTokenUsage, ParsedRequest};

use super::{RequestTransform, ResponseTransform, Translator, set_model_field};

pub struct RerankTranslator {
	model_override: Option<String>,
}

impl RerankTranslator {
	pub fn new(model_override: Option<String>) -> Self {
		Self { model_override }
	}
}

impl Translator for RerankTranslator {
	fn request_body(
		&mut self,
		raw: &[u8],
		parsed: &ParsedRequest,
		force_body_mutation: bool,
	) -> Result<RequestTransform, AIError> {
		let ParsedRequest::Rerank(_) = parsed else {
			return Err(AIError::UnsupportedSchema(
				"cohere translator only serves rerank".to_string(),
			));
		};
		let body = match &self.model_override {
			Some(model) => Some(set_model_field(raw, model)?),
			None if force_body_mutation => Some(raw.to_vec()),
			None => None,
		};
		Ok(RequestTransform {
			header_mutation: None,
			body,
		})
	}

	fn response_headers(&mut self, _headers: &HeaderMap) -> Result<Option<HeaderMutation>, AIError> {
		Ok(None)
	}

	fn response_body(
		&mut self,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, AIError> {
		let mut out = ResponseTransform::default();
		if !end_of_stream {
			return Ok(out);
		}
		let resp: rerank::Response =
			serde_json::from_slice(body).map_err(AIError::ResponseParsing)?;
		if let Some(billed) = resp.meta.as_ref().and_then(|m| m.billed_units.as_ref()) {
			let input = billed.input_tokens.unwrap_or_default();
			let output = billed.output_tokens.unwrap_or_default();
			out.usage = LLMTokenUsage {
				input,
				cached_input: 0,
				output,
				total: input + output,
			};
		}
		Ok(out)
	}

	fn response_error(
		&mut self,
		_headers: &HeaderMap,
		_body: &[u8],
	) -> Result<(Option<HeaderMutation>, Option<Vec<u8>>), AIError> {
		Ok((None, None))
	}

	fn streaming(&self) -> bool {
		false
	}
}
