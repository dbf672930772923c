//! JSON-RPC 2.0 framing for MCP, plus the multiplexer's identity rewriting:
//! request ids and tool/resource/prompt names are tagged with their origin
//! backend so responses can be routed back.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Separator for `<backend>__<name>` and `<id>__<tag>__<backend>` encodings.
/// Names validated by [`valid_component`] can never contain it.
pub const SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq)]
pub enum RequestId {
	Integer(i64),
	Float(f64),
	String(String),
	Null,
}

impl RequestId {
	pub fn to_value(&self) -> Value {
		match self {
			RequestId::Integer(i) => Value::from(*i),
			RequestId::Float(f) => Value::from(*f),
			RequestId::String(s) => Value::String(s.clone()),
			RequestId::Null => Value::Null,
		}
	}

	pub fn from_value(value: &Value) -> Option<RequestId> {
		match value {
			Value::Null => Some(RequestId::Null),
			Value::String(s) => Some(RequestId::String(s.clone())),
			Value::Number(n) => {
				if let Some(i) = n.as_i64() {
					Some(RequestId::Integer(i))
				} else {
					n.as_f64().map(RequestId::Float)
				}
			},
			_ => None,
		}
	}
}

impl Serialize for RequestId {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			RequestId::Integer(i) => i.serialize(serializer),
			RequestId::Float(f) => f.serialize(serializer),
			RequestId::String(s) => s.serialize(serializer),
			RequestId::Null => serializer.serialize_none(),
		}
	}
}

impl<'de> Deserialize<'de> for RequestId {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = Value::deserialize(deserializer)?;
		match value {
			Value::Null => Ok(RequestId::Null),
			Value::String(s) => Ok(RequestId::String(s)),
			Value::Number(n) => {
				if let Some(i) = n.as_i64() {
					Ok(RequestId::Integer(i))
				} else if let Some(f) = n.as_f64() {
					Ok(RequestId::Float(f))
				} else {
					Err(serde::de::Error::custom("unrepresentable request id"))
				}
			},
			_ => Err(serde::de::Error::custom("id must be a number, string, or null")),
		}
	}
}

fn jsonrpc_version() -> String {
	JSONRPC_VERSION.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	#[serde(default = "jsonrpc_version")]
	pub jsonrpc: String,
	pub id: RequestId,
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
	#[serde(default = "jsonrpc_version")]
	pub jsonrpc: String,
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	#[serde(default = "jsonrpc_version")]
	pub jsonrpc: String,
	pub id: RequestId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl Response {
	pub fn success(id: RequestId, result: Value) -> Self {
		Response {
			jsonrpc: jsonrpc_version(),
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn failure(id: RequestId, code: i64, message: impl Into<String>) -> Self {
		Response {
			jsonrpc: jsonrpc_version(),
			id,
			result: None,
			error: Some(ErrorObject {
				code,
				message: message.into(),
				data: None,
			}),
		}
	}
}

/// Any frame on the wire. Ordering matters for untagged deserialization:
/// requests carry both `method` and `id`, notifications only `method`,
/// responses only `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	Request(Request),
	Notification(Notification),
	Response(Response),
}

impl Message {
	pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Message {
		Message::Request(Request {
			jsonrpc: jsonrpc_version(),
			id,
			method: method.into(),
			params,
		})
	}

	pub fn notification(method: impl Into<String>, params: Option<Value>) -> Message {
		Message::Notification(Notification {
			jsonrpc: jsonrpc_version(),
			method: method.into(),
			params,
		})
	}
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum IdCodecError {
	#[error("id is not in <original>__<tag>__<backend> form")]
	Malformed,
	#[error("unknown id type tag {0:?}")]
	UnknownTag(String),
	#[error("id payload does not decode as its tag")]
	BadPayload,
}

/// Encode a server-to-client request id as `<original>__<tag>__<backend>`.
/// `i` is decimal, `f` is the little-endian hex of the f64 bits, `s` is
/// url-safe base64. Null ids are never rewritten.
pub fn encode_id(id: &RequestId, backend: &str) -> Option<String> {
	match id {
		RequestId::Integer(i) => Some(format!("{i}__i__{backend}")),
		RequestId::Float(f) => Some(format!("{}__f__{backend}", hex::encode(f.to_le_bytes()))),
		RequestId::String(s) => Some(format!("{}__s__{backend}", URL_SAFE_NO_PAD.encode(s))),
		RequestId::Null => None,
	}
}

/// Invert [`encode_id`]. Splits on the *last* two separators so a backend
/// that embeds `__` in its own string ids still round-trips.
pub fn decode_id(encoded: &str) -> Result<(RequestId, String), IdCodecError> {
	let (rest, backend) = encoded.rsplit_once(SEPARATOR).ok_or(IdCodecError::Malformed)?;
	let (payload, tag) = rest.rsplit_once(SEPARATOR).ok_or(IdCodecError::Malformed)?;
	if backend.is_empty() {
		return Err(IdCodecError::Malformed);
	}
	let id = match tag {
		"i" => RequestId::Integer(payload.parse().map_err(|_| IdCodecError::BadPayload)?),
		"f" => {
			let bytes = hex::decode(payload).map_err(|_| IdCodecError::BadPayload)?;
			let bytes: [u8; 8] = bytes.try_into().map_err(|_| IdCodecError::BadPayload)?;
			RequestId::Float(f64::from_le_bytes(bytes))
		},
		"s" => {
			let bytes = URL_SAFE_NO_PAD
				.decode(payload)
				.map_err(|_| IdCodecError::BadPayload)?;
			RequestId::String(String::from_utf8(bytes).map_err(|_| IdCodecError::BadPayload)?)
		},
		other => return Err(IdCodecError::UnknownTag(other.to_string())),
	};
	Ok((id, backend.to_string()))
}

static NAME_PATTERN: Lazy<Regex> =
	Lazy::new(|| Regex::new("^[a-zA-Z0-9._-]+$").expect("static pattern"));

/// Tool/resource/prompt names and backend names share one alphabet, with the
/// separator reserved for the multiplexer.
pub fn valid_component(name: &str) -> bool {
	NAME_PATTERN.is_match(name) && !name.contains(SEPARATOR)
}

pub fn prefix_name(backend: &str, name: &str) -> String {
	format!("{backend}{SEPARATOR}{name}")
}

/// Split `<backend>__<name>`; the backend component cannot contain the
/// separator, so the first occurrence is authoritative.
pub fn split_prefixed(name: &str) -> Option<(&str, &str)> {
	let (backend, bare) = name.split_once(SEPARATOR)?;
	if backend.is_empty() || bare.is_empty() {
		return None;
	}
	Some((backend, bare))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn message_untagged_parse() {
		let m: Message =
			serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
		assert!(matches!(m, Message::Request(_)));
		let m: Message =
			serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
		assert!(matches!(m, Message::Notification(_)));
		let m: Message = serde_json::from_str(r#"{"jsonrpc":"2.0","id":"x","result":{}}"#).unwrap();
		assert!(matches!(m, Message::Response(_)));
		let m: Message = serde_json::from_str(
			r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"nope"}}"#,
		)
		.unwrap();
		let Message::Response(r) = m else {
			panic!("expected response")
		};
		assert_eq!(r.error.unwrap().code, METHOD_NOT_FOUND);
	}

	#[test]
	fn id_codec_bijection() {
		let cases = [
			RequestId::Integer(42),
			RequestId::Integer(-7),
			RequestId::Float(2.5),
			RequestId::Float(-0.125),
			RequestId::String("abc".to_string()),
			RequestId::String("with__separator".to_string()),
		];
		for id in cases {
			let encoded = encode_id(&id, "b1").unwrap();
			let (decoded, backend) = decode_id(&encoded).unwrap();
			assert_eq!(decoded, id, "{encoded}");
			assert_eq!(backend, "b1");
		}
		// null is never encoded
		assert_eq!(encode_id(&RequestId::Null, "b1"), None);
	}

	#[test]
	fn id_codec_int_wire_format() {
		assert_eq!(encode_id(&RequestId::Integer(42), "b1").unwrap(), "42__i__b1");
		let (id, backend) = decode_id("42__i__b1").unwrap();
		assert_eq!(id, RequestId::Integer(42));
		assert_eq!(backend, "b1");
	}

	#[test]
	fn id_codec_rejects_garbage() {
		assert_eq!(decode_id("plain"), Err(IdCodecError::Malformed));
		assert_eq!(decode_id("42__i"), Err(IdCodecError::Malformed));
		assert_eq!(
			decode_id("42__x__b1"),
			Err(IdCodecError::UnknownTag("x".to_string()))
		);
		assert_eq!(decode_id("notanint__i__b1"), Err(IdCodecError::BadPayload));
		assert_eq!(decode_id("zz__f__b1"), Err(IdCodecError::BadPayload));
		assert_eq!(decode_id("%%%__s__b1"), Err(IdCodecError::BadPayload));
	}

	#[test]
	fn name_prefixing() {
		assert_eq!(prefix_name("a", "x"), "a__x");
		assert_eq!(split_prefixed("a__x"), Some(("a", "x")));
		assert_eq!(split_prefixed("bare"), None);
		assert!(valid_component("weather.lookup-v2"));
		assert!(!valid_component("has space"));
		assert!(!valid_component("a__b"));
		assert!(!valid_component(""));
	}
}
