//! Incremental decoder for the AWS EventStream binary framing used by
//! Bedrock `invoke-with-response-stream` responses.

use aws_smithy_eventstream::frame::{DecodedFrame, MessageFrameDecoder};
pub use aws_smithy_types::event_stream::Message;
use bytes::BytesMut;

#[derive(Debug, thiserror::Error)]
pub enum EventStreamError {
	#[error("event stream protocol error: {0}")]
	Protocol(#[from] aws_smithy_eventstream::error::Error),
}

/// Stateful frame decoder; feed it raw body chunks, get complete messages.
/// Partial frames are buffered until the rest arrives.
#[derive(Default)]
pub struct EventStreamDecoder {
	inner: MessageFrameDecoder,
	buf: BytesMut,
}

impl EventStreamDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Message>, EventStreamError> {
		self.buf.extend_from_slice(chunk);
		let mut out = Vec::new();
		loop {
			match self.inner.decode_frame(&mut self.buf)? {
				DecodedFrame::Complete(message) => out.push(message),
				DecodedFrame::Incomplete => return Ok(out),
			}
		}
	}
}

/// Extract a string header from an EventStream message by name.
pub fn string_header(m: &Message, name: &str) -> Option<String> {
	m.headers()
		.iter()
		.find(|h| h.name().as_str() == name)
		.and_then(|h| h.value().as_string().ok())
		.map(|s| s.as_str().to_owned())
}
