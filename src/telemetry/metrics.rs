//! GenAI request metrics. Counters are lock-free atomics; histograms take the
//! registry's internal lock only on observe. One `LLMMetrics` recorder lives
//! per transaction and guarantees the completion counters fire exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::llm::LLMTokenUsage;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ModelLabels {
	pub backend: String,
	/// Model in the client's request body.
	pub original_model: String,
	/// Model actually sent upstream (after override).
	pub request_model: String,
	/// Model the upstream reported back.
	pub response_model: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TokenLabels {
	pub backend: String,
	pub request_model: String,
	pub token_type: TokenType,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum TokenType {
	Input,
	CachedInput,
	Output,
	Total,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
	pub backend: String,
	pub request_model: String,
	pub success: bool,
}

#[derive(Clone)]
pub struct Metrics {
	token_usage: Family<TokenLabels, Counter>,
	requests: Family<OutcomeLabels, Counter>,
	request_duration: Family<ModelLabels, Histogram>,
	time_to_first_token: Family<ModelLabels, Histogram>,
	inter_token_latency: Family<ModelLabels, Histogram>,
}

fn seconds_histogram() -> Histogram {
	Histogram::new(
		[
			0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
		]
		.into_iter(),
	)
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let token_usage = Family::<TokenLabels, Counter>::default();
		registry.register(
			"gen_ai_client_token_usage",
			"Number of tokens processed, by type",
			token_usage.clone(),
		);
		let requests = Family::<OutcomeLabels, Counter>::default();
		registry.register(
			"gen_ai_requests",
			"Completed requests, by outcome",
			requests.clone(),
		);
		let request_duration =
			Family::<ModelLabels, Histogram>::new_with_constructor(seconds_histogram);
		registry.register(
			"gen_ai_server_request_duration_seconds",
			"End to end request latency",
			request_duration.clone(),
		);
		let time_to_first_token =
			Family::<ModelLabels, Histogram>::new_with_constructor(seconds_histogram);
		registry.register(
			"gen_ai_server_time_to_first_token_seconds",
			"Latency to the first streamed token",
			time_to_first_token.clone(),
		);
		let inter_token_latency =
			Family::<ModelLabels, Histogram>::new_with_constructor(seconds_histogram);
		registry.register(
			"gen_ai_server_time_per_output_token_seconds",
			"Mean latency between streamed tokens",
			inter_token_latency.clone(),
		);
		Self {
			token_usage,
			requests,
			request_duration,
			time_to_first_token,
			inter_token_latency,
		}
	}
}

/// Per-transaction recorder. Success and failure are mutually exclusive and
/// recorded at most once, at end-of-stream.
pub struct LLMMetrics {
	metrics: Arc<Metrics>,
	start: Instant,
	first_token: Option<Instant>,
	last_token: Option<Instant>,
	output_tokens: u64,
	completed: bool,
	pub backend: String,
	pub original_model: String,
	pub request_model: String,
	pub response_model: String,
}

impl LLMMetrics {
	pub fn new(metrics: Arc<Metrics>, backend: impl Into<String>) -> Self {
		Self {
			metrics,
			start: Instant::now(),
			first_token: None,
			last_token: None,
			output_tokens: 0,
			completed: false,
			backend: backend.into(),
			original_model: String::new(),
			request_model: String::new(),
			response_model: String::new(),
		}
	}

	pub fn start_request(&mut self) {
		self.start = Instant::now();
	}

	fn model_labels(&self) -> ModelLabels {
		ModelLabels {
			backend: self.backend.clone(),
			original_model: self.original_model.clone(),
			request_model: self.request_model.clone(),
			response_model: self.response_model.clone(),
		}
	}

	fn token_labels(&self, token_type: TokenType) -> TokenLabels {
		TokenLabels {
			backend: self.backend.clone(),
			request_model: self.request_model.clone(),
			token_type,
		}
	}

	/// Observe one response chunk. `output_delta` is the number of new output
	/// tokens the chunk carried.
	pub fn record_token_timing(&mut self, output_delta: u64) {
		let now = Instant::now();
		if self.first_token.is_none() {
			self.first_token = Some(now);
			self
				.metrics
				.time_to_first_token
				.get_or_create(&self.model_labels())
				.observe((now - self.start).as_secs_f64());
		}
		self.last_token = Some(now);
		self.output_tokens += output_delta;
	}

	pub fn record_token_usage(&self, usage: &LLMTokenUsage) {
		let pairs = [
			(TokenType::Input, usage.input),
			(TokenType::CachedInput, usage.cached_input),
			(TokenType::Output, usage.output),
			(TokenType::Total, usage.total),
		];
		for (token_type, count) in pairs {
			self
				.metrics
				.token_usage
				.get_or_create(&self.token_labels(token_type))
				.inc_by(count);
		}
	}

	pub fn record_completion(&mut self, success: bool) {
		if self.completed {
			return;
		}
		self.completed = true;
		self
			.metrics
			.requests
			.get_or_create(&OutcomeLabels {
				backend: self.backend.clone(),
				request_model: self.request_model.clone(),
				success,
			})
			.inc();
		self
			.metrics
			.request_duration
			.get_or_create(&self.model_labels())
			.observe(self.start.elapsed().as_secs_f64());
		if success && let Some(itl) = self.inter_token_latency() {
			self
				.metrics
				.inter_token_latency
				.get_or_create(&self.model_labels())
				.observe(itl.as_secs_f64());
		}
	}

	pub fn completed(&self) -> bool {
		self.completed
	}

	pub fn time_to_first_token(&self) -> Option<Duration> {
		self.first_token.map(|t| t - self.start)
	}

	/// Mean latency between tokens across the stream.
	pub fn inter_token_latency(&self) -> Option<Duration> {
		let (first, last) = (self.first_token?, self.last_token?);
		let span = last - first;
		let gaps = self.output_tokens.saturating_sub(1).max(1);
		Some(span / gaps as u32)
	}
}
