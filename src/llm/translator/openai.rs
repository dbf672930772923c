//! OpenAI-schema pass-through translator for chat completions, embeddings,
//! and image generation. The body is forwarded untouched unless a model
//! override or a forced mutation applies; token usage is read out of the
//! response (including per-chunk `usage` frames on streams).

use crate::http::{HeaderMap, HeaderMutation};
use crate::llm::types::{completions, embeddings, images};
use crate::llm::{AIError, LLMTokenUsage, ParsedRequest, RouteType};
use crate::parse::sse;

use super::{RequestTransform, ResponseTransform, Translator, set_model_field};

pub struct OpenAITranslator {
	route_type: RouteType,
	model_override: Option<String>,
	stream: bool,
	sse: sse::Parser,
}

impl OpenAITranslator {
	pub fn new(route_type: RouteType, model_override: Option<String>) -> Self {
		Self {
			route_type,
			model_override,
			stream: false,
			sse: sse::Parser::new(),
		}
	}

	fn completions_usage(u: &completions::Usage) -> LLMTokenUsage {
		LLMTokenUsage {
			input: u.prompt_tokens,
			cached_input: u
				.prompt_tokens_details
				.as_ref()
				.map(|d| d.cached_tokens)
				.unwrap_or_default(),
			output: u.completion_tokens,
			total: u.total_tokens,
		}
	}

	fn stream_chunk(
		&mut self,
		out: &mut ResponseTransform,
		data: &str,
	) -> Result<(), AIError> {
		if data.trim() == "[DONE]" {
			return Ok(());
		}
		let chunk: completions::StreamResponse =
			serde_json::from_str(data).map_err(AIError::ResponseParsing)?;
		out.response_model = Some(chunk.model);
		if let Some(u) = &chunk.usage {
			out.usage.accumulate(Self::completions_usage(u));
		}
		Ok(())
	}
}

impl Translator for OpenAITranslator {
	fn request_body(
		&mut self,
		raw: &[u8],
		parsed: &ParsedRequest,
		force_body_mutation: bool,
	) -> Result<RequestTransform, AIError> {
		self.stream = parsed.streaming();
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
		if self.stream {
			let mut events = self.sse.push(body);
			if end_of_stream && let Some(ev) = self.sse.finish() {
				events.push(ev);
			}
			for ev in events {
				for line in &ev.data {
					self.stream_chunk(&mut out, line)?;
				}
			}
			return Ok(out);
		}
		if !end_of_stream {
			// buffered mode delivers everything in the final call
			return Ok(out);
		}
		match self.route_type {
			RouteType::Completions => {
				let resp: completions::Response =
					serde_json::from_slice(body).map_err(AIError::ResponseParsing)?;
				out.response_model = Some(resp.model);
				if let Some(u) = &resp.usage {
					out.usage = Self::completions_usage(u);
				}
			},
			RouteType::Embeddings => {
				let resp: embeddings::Response =
					serde_json::from_slice(body).map_err(AIError::ResponseParsing)?;
				out.response_model = Some(resp.model);
				out.usage = LLMTokenUsage {
					input: resp.usage.prompt_tokens,
					total: resp.usage.total_tokens,
					..Default::default()
				};
			},
			RouteType::Images => {
				let resp: images::Response =
					serde_json::from_slice(body).map_err(AIError::ResponseParsing)?;
				if let Some(u) = &resp.usage {
					out.usage = LLMTokenUsage {
						input: u.input_tokens,
						output: u.output_tokens,
						total: u.total_tokens,
						..Default::default()
					};
				}
			},
			other => {
				return Err(AIError::UnsupportedSchema(format!(
					"openAI translator does not serve {other:?}"
				)));
			},
		}
		Ok(out)
	}

	fn response_error(
		&mut self,
		_headers: &HeaderMap,
		_body: &[u8],
	) -> Result<(Option<HeaderMutation>, Option<Vec<u8>>), AIError> {
		// Same schema on both sides: the upstream error is already what the
		// client expects.
		Ok((None, None))
	}

	fn streaming(&self) -> bool {
		self.stream
	}
}
