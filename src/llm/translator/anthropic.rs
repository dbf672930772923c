//! Anthropic `/v1/messages`, natively or fronting Anthropic-on-Vertex. The
//! body format is identical either way; Vertex additionally moves the model
//! into the URL and pins `anthropic_version` in the body.

use serde_json::Value;

use crate::http::{HeaderMap, HeaderMutation};
use crate::llm::types::messages;
use crate::llm::{AIError, LLMTokenUsage, ParsedRequest};
use crate::parse::sse;

use super::{RequestTransform, ResponseTransform, Translator, set_model_field};

pub struct VertexTarget {
	pub project: String,
	pub region: String,
	pub anthropic_version: String,
}

pub struct AnthropicTranslator {
	model_override: Option<String>,
	vertex: Option<VertexTarget>,
	stream: bool,
	sse: sse::Parser,
	/// `message_delta.usage.output_tokens` is cumulative; track the last seen
	/// value so each call reports a delta.
	seen_output_tokens: u64,
}

impl AnthropicTranslator {
	pub fn new(model_override: Option<String>, vertex: Option<VertexTarget>) -> Self {
		Self {
			model_override,
			vertex,
			stream: false,
			sse: sse::Parser::new(),
			seen_output_tokens: 0,
		}
	}

	fn usage_from(u: &messages::Usage) -> LLMTokenUsage {
		let cached = u.cache_read_input_tokens.unwrap_or_default();
		LLMTokenUsage {
			input: u.input_tokens,
			cached_input: cached,
			output: u.output_tokens,
			total: u.input_tokens + cached + u.output_tokens,
		}
	}

	fn stream_event(&mut self, out: &mut ResponseTransform, data: &str) -> Result<(), AIError> {
		let event: messages::StreamEvent =
			serde_json::from_str(data).map_err(AIError::ResponseParsing)?;
		match event.kind.as_str() {
			"message_start" => {
				if let Some(message) = &event.message {
					out.response_model = Some(message.model.clone());
					let cached = message.usage.cache_read_input_tokens.unwrap_or_default();
					out.usage.accumulate(LLMTokenUsage {
						input: message.usage.input_tokens,
						cached_input: cached,
						output: 0,
						total: message.usage.input_tokens + cached,
					});
				}
			},
			"message_delta" => {
				if let Some(usage) = &event.usage {
					let delta = usage.output_tokens.saturating_sub(self.seen_output_tokens);
					self.seen_output_tokens = usage.output_tokens;
					out.usage.accumulate(LLMTokenUsage {
						output: delta,
						total: delta,
						..Default::default()
					});
				}
			},
			_ => {},
		}
		Ok(())
	}
}

impl Translator for AnthropicTranslator {
	fn request_body(
		&mut self,
		raw: &[u8],
		parsed: &ParsedRequest,
		force_body_mutation: bool,
	) -> Result<RequestTransform, AIError> {
		let ParsedRequest::Messages(req) = parsed else {
			return Err(AIError::UnsupportedSchema(
				"anthropic translator only serves /v1/messages".to_string(),
			));
		};
		self.stream = req.streaming();
		let model = self
			.model_override
			.as_deref()
			.or(req.model.as_deref())
			.ok_or(AIError::MissingField("model"))?
			.to_string();

		let Some(vertex) = &self.vertex else {
			let body = match &self.model_override {
				Some(model) => Some(set_model_field(raw, model)?),
				None if force_body_mutation => Some(raw.to_vec()),
				None => None,
			};
			return Ok(RequestTransform {
				header_mutation: None,
				body,
			});
		};

		// Vertex carries the model in the URL and requires anthropic_version
		// in the body.
		let mut value: Value = serde_json::from_slice(raw).map_err(AIError::RequestParsing)?;
		if let Some(obj) = value.as_object_mut() {
			obj.remove("model");
			obj.insert(
				"anthropic_version".to_string(),
				Value::String(vertex.anthropic_version.clone()),
			);
		}
		let body = serde_json::to_vec(&value).map_err(AIError::RequestMarshal)?;

		let specifier = if self.stream {
			"streamRawPredict"
		} else {
			"rawPredict"
		};
		let path = format!(
			"/v1/projects/{}/locations/{}/publishers/anthropic/models/{model}:{specifier}",
			vertex.project, vertex.region
		);
		let mut headers = HeaderMutation::default();
		headers.set(":path", path);
		Ok(RequestTransform {
			header_mutation: Some(headers),
			body: Some(body),
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
					self.stream_event(&mut out, line)?;
				}
			}
			return Ok(out);
		}
		if !end_of_stream {
			return Ok(out);
		}
		let resp: messages::Response =
			serde_json::from_slice(body).map_err(AIError::ResponseParsing)?;
		out.response_model = Some(resp.model.clone());
		out.usage = Self::usage_from(&resp.usage);
		Ok(out)
	}

	fn response_error(
		&mut self,
		_headers: &HeaderMap,
		_body: &[u8],
	) -> Result<(Option<HeaderMutation>, Option<Vec<u8>>), AIError> {
		// Vertex surfaces Anthropic's native error schema unchanged.
		Ok((None, None))
	}

	fn streaming(&self) -> bool {
		self.stream
	}
}
