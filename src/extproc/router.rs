//! The router role: parse the body before a backend exists, advertise the
//! selected rule and model back to the proxy, and hold the canonical original
//! request that every upstream attempt restarts from.

use std::sync::Arc;

use crate::config::{Config, ORIGINAL_PATH_HEADER, Route, SELECTED_ROUTE_HEADER};
use crate::http::{HeaderMap, HeaderMutation};
use crate::llm::{AIError, ParsedRequest};
use crate::router as route_rules;
use crate::telemetry::metrics::Metrics;
use crate::telemetry::trc::{Span, Tracer};

use super::ProcessorError;
use super::protocol::{ProcessingResponse, ResponseStatus};

pub struct RouterStage {
	pub(crate) config: Arc<Config>,
	route_index: usize,
	pub(crate) metrics: Arc<Metrics>,
	tracer: Arc<dyn Tracer>,
	/// Live request headers, tracking every mutation the proxy will observe.
	pub(crate) request_headers: HeaderMap,
	/// Snapshot from the first phase, used for retry restoration.
	pub(crate) original_headers: HeaderMap,
	pub(crate) original_body: Option<ParsedRequest>,
	pub(crate) original_body_raw: Vec<u8>,
	/// True when the router edited the canonical bytes (forced usage
	/// reporting, forced non-streaming); upstream attempts must then always
	/// re-emit the body.
	pub(crate) force_body_mutation: bool,
	pub(crate) forced_stream_usage: bool,
	pub(crate) selected_rule: Option<String>,
	pub(crate) upstream_filter_count: u32,
	pub(crate) span: Option<Box<dyn Span>>,
}

impl RouterStage {
	pub fn new(
		config: Arc<Config>,
		route_index: usize,
		metrics: Arc<Metrics>,
		tracer: Arc<dyn Tracer>,
	) -> Self {
		Self {
			config,
			route_index,
			metrics,
			tracer,
			request_headers: HeaderMap::new(),
			original_headers: HeaderMap::new(),
			original_body: None,
			original_body_raw: Vec::new(),
			force_body_mutation: false,
			forced_stream_usage: false,
			selected_rule: None,
			upstream_filter_count: 0,
			span: None,
		}
	}

	pub fn route(&self) -> &Route {
		&self.config.routes[self.route_index]
	}

	pub fn request_headers(&mut self, headers: HeaderMap) -> Result<ProcessingResponse, ProcessorError> {
		self.original_headers = headers.clone();
		self.request_headers = headers;
		Ok(ProcessingResponse::default())
	}

	pub fn request_body(&mut self, body: &[u8]) -> Result<ProcessingResponse, ProcessorError> {
		// hold the generation locally so route data stays borrowable while
		// headers and flags on self change below
		let config = self.config.clone();
		let route = &config.routes[self.route_index];
		let model_header = route.model_name_header_key.clone();
		let metadata_costs = !route.request_costs.is_empty();
		let mut parsed =
			ParsedRequest::parse(route.route_type, body).map_err(ProcessorError::InvalidBody)?;
		let mut raw = body.to_vec();

		match &mut parsed {
			ParsedRequest::Completions(req) if req.streaming() && metadata_costs => {
				// Without usage frames the stream carries no token counts, and
				// the cost accounting below would run blind. Force them on and
				// remember we did, in case the response path wants to strip
				// the extra usage-only chunk.
				let already = req
					.stream_options
					.as_ref()
					.is_some_and(|o| o.include_usage);
				if !already {
					req.stream_options.get_or_insert_default().include_usage = true;
					raw = serde_json::to_vec(req)
						.map_err(|e| ProcessorError::InvalidBody(AIError::RequestMarshal(e)))?;
					self.forced_stream_usage = true;
					self.force_body_mutation = true;
				}
			},
			ParsedRequest::Images(req) if req.stream == Some(true) => {
				// No streaming surface for image generation.
				req.stream = Some(false);
				raw = serde_json::to_vec(req)
					.map_err(|e| ProcessorError::InvalidBody(AIError::RequestMarshal(e)))?;
				self.force_body_mutation = true;
			},
			_ => {},
		}

		let model = parsed
			.model()
			.ok_or(ProcessorError::InvalidBody(AIError::MissingField("model")))?
			.to_string();
		self.request_headers.set(model_header.clone(), model.clone());

		let rule = route_rules::calculate(route, &self.request_headers).map_err(|e| match e {
			route_rules::RouterError::NoMatch => ProcessorError::RoutingUnmatched,
			other => ProcessorError::RoutingInternal(other.to_string()),
		})?;
		let rule_name = rule.name.clone();

		let mut mutation = HeaderMutation::default();
		mutation.set(model_header, model);
		if let Some(path) = self.original_headers.path() {
			mutation.set(ORIGINAL_PATH_HEADER, path.to_string());
		}
		mutation.set(SELECTED_ROUTE_HEADER, rule_name.clone());

		// The span covers the whole transaction; propagation headers ride on
		// this mutation so the upstream request carries them.
		let span = self
			.tracer
			.start_span(&self.request_headers, &mut mutation, &parsed, &raw);
		self.span = Some(span);

		mutation.apply(&mut self.request_headers);
		self.selected_rule = Some(rule_name);
		self.original_body = Some(parsed);
		self.original_body_raw = raw;

		Ok(ProcessingResponse {
			status: ResponseStatus::Continue,
			header_mutation: Some(mutation),
			clear_route_cache: true,
			..Default::default()
		})
	}
}
