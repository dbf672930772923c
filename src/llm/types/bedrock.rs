//! AWS Bedrock wire types for the invoke / invoke-with-response-stream path.
//! Content is carried in Bedrock's content-array form; streamed responses use
//! the AWS EventStream binary framing decoded in `parse::aws_sse`.

use serde::{Deserialize, Serialize};

use crate::parse::aws_sse;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Role {
	#[default]
	User,
	Assistant,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlock {
	Text(String),
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(untagged)]
pub enum SystemContentBlock {
	Text { text: String },
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	pub role: Role,
	pub content: Vec<ContentBlock>,
}

#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(skip_serializing_if = "Vec::is_empty", default)]
	pub stop_sequences: Vec<String>,
}

impl InferenceConfiguration {
	pub fn is_empty(&self) -> bool {
		self.max_tokens.is_none()
			&& self.temperature.is_none()
			&& self.top_p.is_none()
			&& self.stop_sequences.is_empty()
	}
}

/// The request body; the model id travels in the URL, not the body.
#[derive(Clone, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConverseInput {
	pub messages: Vec<Message>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system: Option<Vec<SystemContentBlock>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub inference_config: Option<InferenceConfiguration>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConverseResponse {
	pub output: Option<ConverseOutput>,
	pub stop_reason: StopReason,
	pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ConverseOutput {
	Message(Message),
	#[serde(other)]
	Unknown,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConverseErrorResponse {
	// Sometimes its capitalized, sometimes it is not... yikes.
	#[serde(alias = "Message")]
	pub message: String,
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
	#[serde(default)]
	pub input_tokens: u64,
	#[serde(default)]
	pub output_tokens: u64,
	#[serde(default)]
	pub total_tokens: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cache_read_input_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cache_write_input_tokens: Option<u64>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
	ContentFiltered,
	EndTurn,
	GuardrailIntervened,
	MaxTokens,
	ModelContextWindowExceeded,
	StopSequence,
	ToolUse,
}

impl StopReason {
	/// Map to the OpenAI `finish_reason` vocabulary.
	pub fn as_openai(&self) -> &'static str {
		match self {
			StopReason::EndTurn | StopReason::StopSequence => "stop",
			StopReason::MaxTokens | StopReason::ModelContextWindowExceeded => "length",
			StopReason::ToolUse => "tool_calls",
			StopReason::ContentFiltered | StopReason::GuardrailIntervened => "content_filter",
		}
	}
}

// This is NOT deserialized directly, see the associated method.
#[derive(Clone, Debug)]
pub enum ConverseStreamOutput {
	MessageStart(MessageStartEvent),
	ContentBlockDelta(ContentBlockDeltaEvent),
	ContentBlockStop(ContentBlockStopEvent),
	MessageStop(MessageStopEvent),
	Metadata(ConverseStreamMetadataEvent),
}

impl ConverseStreamOutput {
	pub fn deserialize(m: &aws_sse::Message) -> anyhow::Result<Self> {
		// AWS EventStream uses :message-type to distinguish events from exceptions
		let message_type = aws_sse::string_header(m, ":message-type");
		if message_type.as_deref() == Some("exception") {
			let exception_type =
				aws_sse::string_header(m, ":exception-type").unwrap_or_else(|| "unknown".to_owned());
			let error_message = String::from_utf8_lossy(m.payload()).to_string();
			anyhow::bail!("{exception_type}: {error_message}");
		}

		let Some(event_type) = aws_sse::string_header(m, ":event-type") else {
			anyhow::bail!("no event type header")
		};

		let payload = m.payload();
		Ok(match event_type.as_str() {
			"messageStart" => {
				ConverseStreamOutput::MessageStart(serde_json::from_slice::<MessageStartEvent>(payload)?)
			},
			"contentBlockDelta" => ConverseStreamOutput::ContentBlockDelta(serde_json::from_slice::<
				ContentBlockDeltaEvent,
			>(payload)?),
			"contentBlockStop" => ConverseStreamOutput::ContentBlockStop(serde_json::from_slice::<
				ContentBlockStopEvent,
			>(payload)?),
			"messageStop" => {
				ConverseStreamOutput::MessageStop(serde_json::from_slice::<MessageStopEvent>(payload)?)
			},
			"metadata" => ConverseStreamOutput::Metadata(serde_json::from_slice::<
				ConverseStreamMetadataEvent,
			>(payload)?),
			other => anyhow::bail!("unexpected event type: {other}"),
		})
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStartEvent {
	pub role: Role,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockDeltaEvent {
	/// Kept loose: only `text` deltas are re-emitted, but tool-use and
	/// reasoning deltas must not fail the stream.
	pub delta: Option<serde_json::Value>,
	#[serde(default)]
	pub content_block_index: i32,
}

impl ContentBlockDeltaEvent {
	pub fn text(&self) -> Option<&str> {
		self.delta.as_ref()?.get("text")?.as_str()
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStopEvent {
	#[serde(default)]
	pub content_block_index: i32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStopEvent {
	pub stop_reason: StopReason,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseStreamMetadataEvent {
	pub usage: Option<TokenUsage>,
}
