//! Tracing seam. Concrete span exporters live in the host; the processor only
//! needs to open a span per transaction, inject propagation headers into the
//! router-stage mutation, and close the span with the outcome.

use crate::http::{HeaderMap, HeaderMutation};
use crate::llm::ParsedRequest;

pub trait Tracer: Send + Sync {
	/// Open the transaction span. Implementations write their propagation
	/// headers into `header_mutation` so the upstream request carries them.
	fn start_span(
		&self,
		headers: &HeaderMap,
		header_mutation: &mut HeaderMutation,
		body: &ParsedRequest,
		body_raw: &[u8],
	) -> Box<dyn Span>;
}

pub trait Span: Send {
	fn record_route_to_backend(&mut self, backend: &str, retry: bool);
	fn end(self: Box<Self>);
	fn end_on_error(self: Box<Self>, status: u16, body: &[u8]);
}

/// Used when the host wires no tracer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
	fn start_span(
		&self,
		_headers: &HeaderMap,
		_header_mutation: &mut HeaderMutation,
		_body: &ParsedRequest,
		_body_raw: &[u8],
	) -> Box<dyn Span> {
		Box::new(NoopSpan)
	}
}

pub struct NoopSpan;

impl Span for NoopSpan {
	fn record_route_to_backend(&mut self, _backend: &str, _retry: bool) {}
	fn end(self: Box<Self>) {}
	fn end_on_error(self: Box<Self>, _status: u16, _body: &[u8]) {}
}
