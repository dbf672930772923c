//! In-crate mirror of the external-processing phase messages exchanged with
//! the front proxy. The host owns the protobuf/transport binding; the
//! processor operates on these shapes.

use serde_json::Value;

use crate::http::{BodyMutation, HeaderMap, HeaderMutation};

/// The five phases arrive as four message kinds; response-body repeats per
/// chunk until `end_of_stream`.
#[derive(Debug, Clone)]
pub enum ProcessingRequest {
	RequestHeaders {
		headers: HeaderMap,
		end_of_stream: bool,
	},
	RequestBody {
		body: Vec<u8>,
		end_of_stream: bool,
	},
	ResponseHeaders {
		headers: HeaderMap,
	},
	ResponseBody {
		body: Vec<u8>,
		end_of_stream: bool,
	},
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseStatus {
	#[default]
	Continue,
	/// Replace headers and body outright; the proxy skips the corresponding
	/// body phase on this filter.
	ContinueAndReplace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseBodyMode {
	Buffered,
	/// Deliver response-body chunks as they arrive.
	Streamed,
}

/// Structured metadata handed back to the front proxy for access logging and
/// rate limiting; one namespace per route.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicMetadata {
	pub namespace: String,
	pub fields: serde_json::Map<String, Value>,
}

impl DynamicMetadata {
	pub fn new(namespace: impl Into<String>) -> Self {
		Self {
			namespace: namespace.into(),
			fields: Default::default(),
		}
	}

	pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
		self.fields.insert(key.into(), value.into());
		self
	}
}

#[derive(Debug, Default)]
pub struct ProcessingResponse {
	pub status: ResponseStatus,
	pub header_mutation: Option<HeaderMutation>,
	pub body_mutation: Option<BodyMutation>,
	pub clear_route_cache: bool,
	pub mode_override: Option<ResponseBodyMode>,
	pub dynamic_metadata: Option<DynamicMetadata>,
}

/// A locally generated response that short-circuits the transaction (e.g.
/// routing miss), delivered to the client without involving an upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateResponse {
	pub status: u16,
	pub body: Vec<u8>,
}
