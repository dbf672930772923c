//! The upstream role: one instance per attempt. Reads the canonical request
//! from the router role, applies translator + mutators + auth on the replayed
//! request-headers phase, and re-translates the response stream while
//! accounting tokens, latency, and request costs.

use serde_json::Value;

use crate::config::{Backend, CostKind};
use crate::http::auth::Authenticator;
use crate::http::compression::{self, ResponseEncoding};
use crate::http::mutation::{BodyMutator, HeaderMutator};
use crate::http::{BodyMutation, HeaderMap};
use crate::llm::translator::{self, Translator};
use crate::llm::{AIError, LLMTokenUsage};
use crate::telemetry::metrics::LLMMetrics;

use super::protocol::{
	DynamicMetadata, ProcessingResponse, ResponseBodyMode, ResponseStatus,
};
use super::router::RouterStage;
use super::ProcessorError;

pub struct UpstreamStage {
	backend_name: String,
	model_name_override: Option<String>,
	translator: Box<dyn Translator>,
	header_mutator: HeaderMutator,
	body_mutator: BodyMutator,
	auth: Option<Box<dyn Authenticator>>,
	on_retry: bool,
	stream: bool,
	response_headers: Option<HeaderMap>,
	response_encoding: ResponseEncoding,
	decode_response: bool,
	costs: LLMTokenUsage,
	error_body: Vec<u8>,
	pub(crate) metrics: LLMMetrics,
}

impl UpstreamStage {
	/// Build the upstream role for a freshly selected backend. Repeated calls
	/// (retries) start from scratch: translator and counters are new, and the
	/// canonical request in the router role is untouched by earlier attempts.
	pub fn new(
		router: &mut RouterStage,
		backend: &Backend,
		auth: Option<Box<dyn Authenticator>>,
	) -> Result<Self, ProcessorError> {
		router.upstream_filter_count += 1;
		let on_retry = router.upstream_filter_count > 1;

		let mut metrics = LLMMetrics::new(router.metrics.clone(), &backend.name);
		let original_model = router
			.original_body
			.as_ref()
			.and_then(|b| b.model())
			.unwrap_or_default()
			.to_string();
		metrics.original_model = original_model.clone();
		metrics.request_model = backend
			.model_name_override
			.clone()
			.unwrap_or(original_model);

		let route_type = router.route().route_type;
		let translator = match translator::new_translator(backend, route_type) {
			Ok(t) => t,
			Err(e) => {
				metrics.record_completion(false);
				return Err(ProcessorError::UnsupportedSchema(e.to_string()));
			},
		};

		if let Some(model) = &backend.model_name_override {
			let key = router.route().model_name_header_key.clone();
			router.request_headers.set(key, model.clone());
		}
		if let Some(span) = &mut router.span {
			span.record_route_to_backend(&backend.name, on_retry);
		}

		let auth = auth.or_else(|| backend.auth.as_ref().map(crate::http::auth::from_config));
		let stream = router
			.original_body
			.as_ref()
			.map(|b| b.streaming())
			.unwrap_or_default();

		Ok(Self {
			backend_name: backend.name.clone(),
			model_name_override: backend.model_name_override.clone(),
			header_mutator: HeaderMutator::new(
				backend.header_mutation.as_ref(),
				router.original_headers.clone(),
			),
			body_mutator: BodyMutator::new(backend.body_mutation.as_ref()),
			translator,
			auth,
			on_retry,
			stream,
			response_headers: None,
			response_encoding: ResponseEncoding::Identity,
			decode_response: false,
			costs: LLMTokenUsage::default(),
			error_body: Vec::new(),
			metrics,
		})
	}

	pub fn on_retry(&self) -> bool {
		self.on_retry
	}

	/// The replayed request-headers phase. Produces the complete outbound
	/// request (headers and body) in one response, so the proxy skips the
	/// upstream body phase.
	pub async fn request_headers(
		&mut self,
		router: &mut RouterStage,
	) -> Result<ProcessingResponse, ProcessorError> {
		self.metrics.start_request();
		let parsed = router
			.original_body
			.as_ref()
			.ok_or(ProcessorError::ProtocolViolation(
				"request headers replayed before the body phase",
			))?;

		let force = self.on_retry || router.force_body_mutation;
		let transform = match self
			.translator
			.request_body(&router.original_body_raw, parsed, force)
		{
			Ok(t) => t,
			Err(e) => {
				self.metrics.record_completion(false);
				return Err(ProcessorError::TranslatorFailed(e));
			},
		};
		let mut mutation = transform.header_mutation.unwrap_or_default();
		let mut body = transform.body;
		self.stream = self.translator.streaming();

		mutation.merge(
			self
				.header_mutator
				.mutate(&mut router.request_headers, self.on_retry),
		);

		if !self.body_mutator.is_empty() {
			let current = body.as_deref().unwrap_or(&router.original_body_raw);
			let mut value: Value = serde_json::from_slice(current)
				.map_err(|e| ProcessorError::TranslatorFailed(AIError::RequestParsing(e)))?;
			if self.body_mutator.mutate(&mut value) {
				body = Some(
					serde_json::to_vec(&value)
						.map_err(|e| ProcessorError::TranslatorFailed(AIError::RequestMarshal(e)))?,
				);
			}
		}

		if body.is_some() {
			mutation.remove("content-length");
		}
		mutation.apply(&mut router.request_headers);

		let final_body: &[u8] = body.as_deref().unwrap_or(&router.original_body_raw);
		if let Some(auth) = &self.auth {
			match auth.authenticate(&router.request_headers, final_body).await {
				Ok(m) => {
					m.apply(&mut router.request_headers);
					mutation.merge(m);
				},
				Err(e) => {
					self.metrics.record_completion(false);
					return Err(ProcessorError::AuthFailed(e));
				},
			}
		}

		let mut resp = ProcessingResponse {
			status: ResponseStatus::ContinueAndReplace,
			header_mutation: Some(mutation),
			..Default::default()
		};
		if let Some(body) = body {
			let mut md = DynamicMetadata::new(router.route().metadata_namespace.clone());
			md.set("content_length", body.len() as u64);
			resp.dynamic_metadata = Some(md);
			resp.body_mutation = Some(BodyMutation::replace(body));
		}
		Ok(resp)
	}

	pub fn response_headers(
		&mut self,
		_router: &mut RouterStage,
		headers: HeaderMap,
	) -> Result<ProcessingResponse, ProcessorError> {
		self.response_encoding = ResponseEncoding::parse(headers.get("content-encoding"));
		let mut mutation = self
			.translator
			.response_headers(&headers)
			.map_err(ProcessorError::TranslatorFailed)?
			.unwrap_or_default();

		if self.translator.mutates_response_body() && self.response_encoding.is_compressed() {
			// the re-emitted body is plaintext
			mutation.remove("content-encoding");
			self.decode_response = true;
		}

		let mut resp = ProcessingResponse::default();
		if self.stream && headers.status() == Some(200) {
			resp.mode_override = Some(ResponseBodyMode::Streamed);
		}
		if !mutation.is_empty() {
			resp.header_mutation = Some(mutation);
		}
		self.response_headers = Some(headers);
		Ok(resp)
	}

	pub async fn response_body(
		&mut self,
		router: &mut RouterStage,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ProcessingResponse, ProcessorError> {
		let status = self
			.response_headers
			.as_ref()
			.and_then(|h| h.status())
			.unwrap_or(200);
		if !(200..300).contains(&status) {
			return self.response_error(router, status, body, end_of_stream).await;
		}

		let decoded;
		let chunk: &[u8] = if self.decode_response {
			decoded = compression::decode(self.response_encoding, body).await?;
			&decoded
		} else {
			body
		};

		let transform = self
			.translator
			.response_body(chunk, end_of_stream)
			.map_err(ProcessorError::TranslatorFailed)?;
		self.costs.accumulate(transform.usage);
		self.metrics.record_token_timing(transform.usage.output);
		if let Some(model) = transform.response_model {
			self.metrics.response_model = model;
		}

		let mut resp = ProcessingResponse {
			header_mutation: transform.header_mutation,
			body_mutation: transform.body.map(BodyMutation::replace),
			..Default::default()
		};
		if end_of_stream {
			resp.dynamic_metadata = Some(self.final_metadata(router)?);
			self.metrics.record_token_usage(&self.costs);
			// success is recorded exactly here, once
			self.metrics.record_completion(true);
			if let Some(span) = router.span.take() {
				span.end();
			}
		}
		Ok(resp)
	}

	/// Non-2xx bodies buffer until end-of-stream, then go through the
	/// translator's error path. This is not an extproc failure: the translated
	/// body flows to the client.
	async fn response_error(
		&mut self,
		router: &mut RouterStage,
		status: u16,
		body: &[u8],
		end_of_stream: bool,
	) -> Result<ProcessingResponse, ProcessorError> {
		self.error_body.extend_from_slice(body);
		if !end_of_stream {
			return Ok(ProcessingResponse::default());
		}
		let decoded;
		let full: &[u8] = if self.decode_response {
			decoded = compression::decode(self.response_encoding, &self.error_body).await?;
			&decoded
		} else {
			&self.error_body
		};
		let (header_mutation, body) = self
			.translator
			.response_error(
				self.response_headers.as_ref().unwrap_or(&HeaderMap::new()),
				full,
			)
			.map_err(ProcessorError::TranslatorFailed)?;
		self.metrics.record_completion(false);
		if let Some(span) = router.span.take() {
			span.end_on_error(status, full);
		}
		Ok(ProcessingResponse {
			header_mutation,
			body_mutation: body.map(BodyMutation::replace),
			..Default::default()
		})
	}

	fn final_metadata(&self, router: &RouterStage) -> Result<DynamicMetadata, ProcessorError> {
		let route = router.route();
		let mut md = DynamicMetadata::new(route.metadata_namespace.clone());
		for cost in &route.request_costs {
			let value = match cost.kind {
				CostKind::InputToken => self.costs.input,
				CostKind::OutputToken => self.costs.output,
				CostKind::CachedInputToken => self.costs.cached_input,
				CostKind::TotalToken => self.costs.total,
				CostKind::Cel => {
					let expr = cost.cel.as_ref().ok_or_else(|| {
						ProcessorError::RoutingInternal(format!(
							"cost {} has no CEL expression",
							cost.metadata_key
						))
					})?;
					expr.eval_cost(&self.costs, &self.metrics.request_model, &self.backend_name)?
				},
			};
			md.set(cost.metadata_key.clone(), value);
		}
		md.set("backend_name", self.backend_name.clone());
		if let Some(model) = &self.model_name_override {
			md.set("model_name_override", model.clone());
		}
		if let Some(ttft) = self.metrics.time_to_first_token() {
			md.set("token_latency_ttft", ttft.as_secs_f64() * 1000.0);
		}
		if let Some(itl) = self.metrics.inter_token_latency() {
			md.set("token_latency_itl", itl.as_secs_f64() * 1000.0);
		}
		Ok(md)
	}
}
