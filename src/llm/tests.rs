use serde_json::json;

use super::*;
use crate::llm::types::completions;

#[test]
fn route_type_from_path() {
	assert_eq!(
		RouteType::from_path("/v1/chat/completions"),
		Some(RouteType::Completions)
	);
	assert_eq!(
		RouteType::from_path("/v1/chat/completions?beta=true"),
		Some(RouteType::Completions)
	);
	assert_eq!(RouteType::from_path("/v1/messages"), Some(RouteType::Messages));
	assert_eq!(RouteType::from_path("/v2/rerank"), Some(RouteType::Rerank));
	assert_eq!(RouteType::from_path("/v1/unknown"), None);
}

#[test]
fn token_usage_accumulates() {
	let mut u = LLMTokenUsage::default();
	assert!(u.is_zero());
	u.accumulate(LLMTokenUsage {
		input: 1,
		cached_input: 0,
		output: 2,
		total: 3,
	});
	u.accumulate(LLMTokenUsage {
		input: 0,
		cached_input: 5,
		output: 1,
		total: 6,
	});
	assert_eq!(
		u,
		LLMTokenUsage {
			input: 1,
			cached_input: 5,
			output: 3,
			total: 9
		}
	);
}

#[test]
fn parse_dispatches_on_route_type() {
	let body = json!({"model": "gpt-5-nano", "stream": true}).to_string();
	let parsed = ParsedRequest::parse(RouteType::Completions, body.as_bytes()).unwrap();
	assert_eq!(parsed.model(), Some("gpt-5-nano"));
	assert!(parsed.streaming());

	let body = json!({"model": "claude-3-opus", "max_tokens": 5, "messages": []}).to_string();
	let parsed = ParsedRequest::parse(RouteType::Messages, body.as_bytes()).unwrap();
	assert_eq!(parsed.route_type(), RouteType::Messages);
	assert!(!parsed.streaming());

	assert!(matches!(
		ParsedRequest::parse(RouteType::Completions, b"not json"),
		Err(AIError::RequestParsing(_))
	));
	// rerank requires a query field
	assert!(ParsedRequest::parse(RouteType::Rerank, br#"{"model":"m"}"#).is_err());
}

#[test]
fn images_never_stream() {
	let body = json!({"model": "gpt-image-1", "prompt": "cat", "stream": true}).to_string();
	let parsed = ParsedRequest::parse(RouteType::Images, body.as_bytes()).unwrap();
	// the request said stream; the endpoint kind has no streaming surface
	assert!(!parsed.streaming());
}

#[test]
fn unknown_request_fields_survive_round_trip() {
	let body = json!({
		"model": "gpt-5-nano",
		"messages": [{"role": "user", "content": "hi", "name": "alice"}],
		"response_format": {"type": "json_object"},
		"seed": 7
	});
	let req: completions::Request = serde_json::from_value(body.clone()).unwrap();
	assert_eq!(req.rest["seed"], 7);
	let back = serde_json::to_value(&req).unwrap();
	assert_eq!(back, body);
}

#[test]
fn message_content_text_join() {
	let content: completions::MessageContent = serde_json::from_value(json!([
		{"type": "text", "text": "a"},
		{"type": "image_url", "image_url": {"url": "http://x"}},
		{"type": "text", "text": "b"}
	]))
	.unwrap();
	assert_eq!(content.text(), "a\nb");
}
