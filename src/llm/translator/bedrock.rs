//! OpenAI chat completions ↔ AWS Bedrock. Requests are reshaped into
//! Bedrock's content-array form and addressed to
//! `/model/{id}/invoke(-with-response-stream)`; streamed EventStream frames
//! are re-emitted as OpenAI SSE chunks with a synthesized final usage chunk.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::http::{HeaderMap, HeaderMutation};
use crate::llm::types::{bedrock, completions};
use crate::llm::{AIError, LLMTokenUsage, ParsedRequest};
use crate::parse::aws_sse::EventStreamDecoder;

use super::{RequestTransform, ResponseTransform, Translator};

pub struct BedrockTranslator {
	model_override: Option<String>,
	model: String,
	stream: bool,
	decoder: EventStreamDecoder,
	chat_id: String,
}

impl BedrockTranslator {
	pub fn new(model_override: Option<String>) -> Self {
		Self {
			model_override,
			model: String::new(),
			stream: false,
			decoder: EventStreamDecoder::new(),
			chat_id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
		}
	}

	fn now() -> u64 {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_secs())
			.unwrap_or_default()
	}

	fn usage_from(u: &bedrock::TokenUsage) -> LLMTokenUsage {
		LLMTokenUsage {
			input: u.input_tokens,
			cached_input: u.cache_read_input_tokens.unwrap_or_default(),
			output: u.output_tokens,
			total: u.total_tokens,
		}
	}

	fn chunk(&self) -> completions::StreamResponse {
		completions::StreamResponse {
			id: self.chat_id.clone(),
			object: "chat.completion.chunk".to_string(),
			created: Self::now(),
			model: self.model.clone(),
			choices: vec![],
			usage: None,
			rest: Default::default(),
		}
	}

	fn delta_chunk(
		&self,
		delta: completions::StreamDelta,
		finish_reason: Option<String>,
	) -> completions::StreamResponse {
		let mut c = self.chunk();
		c.choices = vec![completions::StreamChoice {
			index: 0,
			delta,
			finish_reason,
		}];
		c
	}

	fn write_chunk(
		out: &mut Vec<u8>,
		chunk: &completions::StreamResponse,
	) -> Result<(), AIError> {
		let json = serde_json::to_string(chunk).map_err(AIError::ResponseMarshal)?;
		out.extend_from_slice(b"data: ");
		out.extend_from_slice(json.as_bytes());
		out.extend_from_slice(b"\n\n");
		Ok(())
	}

	fn convert_request(req: &completions::Request) -> Result<bedrock::ConverseInput, AIError> {
		let mut system = Vec::new();
		let mut messages: Vec<bedrock::Message> = Vec::new();
		for m in &req.messages {
			let text = m.content.as_ref().map(|c| c.text()).unwrap_or_default();
			match m.role.as_str() {
				"system" | "developer" => {
					system.push(bedrock::SystemContentBlock::Text { text });
				},
				"user" | "tool" => messages.push(bedrock::Message {
					role: bedrock::Role::User,
					content: vec![bedrock::ContentBlock::Text(text)],
				}),
				"assistant" => messages.push(bedrock::Message {
					role: bedrock::Role::Assistant,
					content: vec![bedrock::ContentBlock::Text(text)],
				}),
				other => {
					tracing::debug!("dropping message with unmapped role {other}");
				},
			}
		}
		let inference_config = bedrock::InferenceConfiguration {
			max_tokens: req.max_completion_tokens.or(req.max_tokens),
			temperature: req.temperature,
			top_p: req.top_p,
			stop_sequences: stop_sequences(req.stop.as_ref()),
		};
		Ok(bedrock::ConverseInput {
			messages,
			system: (!system.is_empty()).then_some(system),
			inference_config: (!inference_config.is_empty()).then_some(inference_config),
		})
	}

	fn stream_events(
		&mut self,
		body: &[u8],
		out: &mut ResponseTransform,
		buf: &mut Vec<u8>,
	) -> Result<(), AIError> {
		let frames = self
			.decoder
			.push(body)
			.map_err(|e| AIError::EventStream(e.into()))?;
		for frame in frames {
			let event =
				bedrock::ConverseStreamOutput::deserialize(&frame).map_err(AIError::EventStream)?;
			match event {
				bedrock::ConverseStreamOutput::MessageStart(_) => {
					let chunk = self.delta_chunk(
						completions::StreamDelta {
							role: Some("assistant".to_string()),
							content: Some(String::new()),
							rest: Default::default(),
						},
						None,
					);
					Self::write_chunk(buf, &chunk)?;
				},
				bedrock::ConverseStreamOutput::ContentBlockDelta(e) => {
					if let Some(text) = e.text() {
						let chunk = self.delta_chunk(
							completions::StreamDelta {
								role: None,
								content: Some(text.to_string()),
								rest: Default::default(),
							},
							None,
						);
						Self::write_chunk(buf, &chunk)?;
					}
				},
				bedrock::ConverseStreamOutput::ContentBlockStop(_) => {},
				bedrock::ConverseStreamOutput::MessageStop(e) => {
					let chunk = self.delta_chunk(
						completions::StreamDelta::default(),
						Some(e.stop_reason.as_openai().to_string()),
					);
					Self::write_chunk(buf, &chunk)?;
				},
				bedrock::ConverseStreamOutput::Metadata(e) => {
					if let Some(u) = e.usage {
						let usage = Self::usage_from(&u);
						out.usage.accumulate(usage);
						// the synthesized final usage-only chunk
						let mut chunk = self.chunk();
						chunk.usage = Some(completions::Usage {
							prompt_tokens: usage.input,
							completion_tokens: usage.output,
							total_tokens: usage.total,
							prompt_tokens_details: (usage.cached_input > 0).then(|| {
								completions::PromptTokensDetails {
									cached_tokens: usage.cached_input,
									rest: Default::default(),
								}
							}),
						});
						Self::write_chunk(buf, &chunk)?;
					}
				},
			}
		}
		Ok(())
	}
}

fn stop_sequences(stop: Option<&Value>) -> Vec<String> {
	match stop {
		Some(Value::String(s)) => vec![s.clone()],
		Some(Value::Array(items)) => items
			.iter()
			.filter_map(|v| v.as_str().map(|s| s.to_string()))
			.collect(),
		_ => vec![],
	}
}

impl Translator for BedrockTranslator {
	fn request_body(
		&mut self,
		_raw: &[u8],
		parsed: &ParsedRequest,
		_force_body_mutation: bool,
	) -> Result<RequestTransform, AIError> {
		let ParsedRequest::Completions(req) = parsed else {
			return Err(AIError::UnsupportedSchema(
				"awsBedrock translator only serves chat completions".to_string(),
			));
		};
		self.stream = req.streaming();
		self.model = self
			.model_override
			.clone()
			.or_else(|| req.model.clone())
			.ok_or(AIError::MissingField("model"))?;

		let body = Self::convert_request(req)?;
		let body = serde_json::to_vec(&body).map_err(AIError::RequestMarshal)?;

		let suffix = if self.stream {
			"invoke-with-response-stream"
		} else {
			"invoke"
		};
		let mut headers = HeaderMutation::default();
		headers.set(":path", format!("/model/{}/{suffix}", self.model));
		Ok(RequestTransform {
			header_mutation: Some(headers),
			body: Some(body),
		})
	}

	fn response_headers(&mut self, headers: &HeaderMap) -> Result<Option<HeaderMutation>, AIError> {
		if !self.stream || headers.status() != Some(200) {
			return Ok(None);
		}
		// the EventStream body is re-emitted as SSE
		let mut m = HeaderMutation::default();
		m.set("content-type", "text/event-stream");
		m.remove("content-length");
		Ok(Some(m))
	}

	fn response_body(
		&mut self,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, AIError> {
		let mut out = ResponseTransform::default();
		if self.stream {
			let mut buf = Vec::new();
			self.stream_events(body, &mut out, &mut buf)?;
			if end_of_stream {
				buf.extend_from_slice(b"data: [DONE]\n\n");
			}
			out.body = Some(buf);
			return Ok(out);
		}
		if !end_of_stream {
			return Ok(out);
		}
		let resp: bedrock::ConverseResponse =
			serde_json::from_slice(body).map_err(AIError::ResponseParsing)?;
		let content = match &resp.output {
			Some(bedrock::ConverseOutput::Message(m)) => m
				.content
				.iter()
				.map(|bedrock::ContentBlock::Text(t)| t.as_str())
				.collect::<Vec<_>>()
				.join(""),
			_ => String::new(),
		};
		let usage = resp.usage.as_ref().map(Self::usage_from).unwrap_or_default();
		out.usage = usage;
		let openai_resp = completions::Response {
			id: self.chat_id.clone(),
			object: "chat.completion".to_string(),
			created: Self::now(),
			model: self.model.clone(),
			choices: vec![completions::Choice {
				index: 0,
				message: completions::ResponseMessage {
					role: "assistant".to_string(),
					content: Some(content),
					rest: Default::default(),
				},
				finish_reason: Some(resp.stop_reason.as_openai().to_string()),
			}],
			usage: Some(completions::Usage {
				prompt_tokens: usage.input,
				completion_tokens: usage.output,
				total_tokens: usage.total,
				prompt_tokens_details: (usage.cached_input > 0).then(|| {
					completions::PromptTokensDetails {
						cached_tokens: usage.cached_input,
						rest: Default::default(),
					}
				}),
			}),
			rest: Default::default(),
		};
		out.body = Some(serde_json::to_vec(&openai_resp).map_err(AIError::ResponseMarshal)?);
		Ok(out)
	}

	fn response_error(
		&mut self,
		headers: &HeaderMap,
		body: &[u8],
	) -> Result<(Option<HeaderMutation>, Option<Vec<u8>>), AIError> {
		let message = serde_json::from_slice::<bedrock::ConverseErrorResponse>(body)
			.map(|e| e.message)
			.unwrap_or_else(|_| String::from_utf8_lossy(body).to_string());
		let kind = match headers.status() {
			Some(429) => "rate_limit_error",
			Some(s) if s >= 500 => "api_error",
			_ => "invalid_request_error",
		};
		let err = completions::ErrorResponse::new(kind, message);
		let body = serde_json::to_vec(&err).map_err(AIError::ResponseMarshal)?;
		let mut m = HeaderMutation::default();
		m.set("content-type", "application/json");
		Ok((Some(m), Some(body)))
	}

	fn streaming(&self) -> bool {
		self.stream
	}

	fn mutates_response_body(&self) -> bool {
		true
	}
}
