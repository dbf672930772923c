//! The per-transaction external-processing state machine. Each HTTP
//! transaction traverses RequestHeaders → RequestBody → ResponseHeaders →
//! ResponseBody* exactly once, first in the router role and, after backend
//! selection, replayed through the upstream role. Both roles live on one
//! `Transaction`; every retry rebuilds the upstream role from the router
//! role's canonical original request.

use std::sync::Arc;

use crate::config::{Backend, Config};
use crate::http::auth::{AuthError, Authenticator};
use crate::llm::AIError;
use crate::telemetry::metrics::Metrics;
use crate::telemetry::trc::Tracer;

pub mod protocol;
mod router;
pub mod server;
mod upstream;

pub use router::RouterStage;
pub use upstream::UpstreamStage;

use protocol::{ImmediateResponse, ProcessingRequest, ProcessingResponse};


#[derive(thiserror::Error, Debug)]
pub enum ProcessorError {
	#[error("invalid request body: {0}")]
	InvalidBody(AIError),
	#[error("unsupported schema: {0}")]
	UnsupportedSchema(String),
	#[error("no matching rule")]
	RoutingUnmatched,
	#[error("routing failed: {0}")]
	RoutingInternal(String),
	#[error("translation failed: {0}")]
	TranslatorFailed(AIError),
	#[error("authentication failed: {0}")]
	AuthFailed(#[from] AuthError),
	#[error("failed to evaluate request cost: {0}")]
	CostFailed(#[from] crate::cel::Error),
	#[error(transparent)]
	Compression(#[from] crate::http::compression::Error),
	#[error("protocol violation: {0}")]
	ProtocolViolation(&'static str),
	#[error("context cancelled")]
	Cancelled,
}

impl ProcessorError {
	/// Routing misses short-circuit in-band instead of failing the stream.
	pub fn to_immediate(&self) -> Option<ImmediateResponse> {
		match self {
			ProcessorError::RoutingUnmatched => Some(ImmediateResponse {
				status: 404,
				body: b"no matching rule".to_vec(),
			}),
			_ => None,
		}
	}
}

pub struct Transaction {
	pub router: RouterStage,
	pub upstream: Option<UpstreamStage>,
}

impl Transaction {
	pub fn new(
		config: Arc<Config>,
		route_name: &str,
		metrics: Arc<Metrics>,
		tracer: Arc<dyn Tracer>,
	) -> Result<Self, ProcessorError> {
		let route_index = config
			.routes
			.iter()
			.position(|r| r.name == route_name)
			.ok_or_else(|| ProcessorError::RoutingInternal(format!("unknown route {route_name}")))?;
		Ok(Self {
			router: RouterStage::new(config, route_index, metrics, tracer),
			upstream: None,
		})
	}

	/// Install (or reinstall, on retry) the upstream role for the selected
	/// backend. The previous upstream state is discarded wholesale.
	pub fn set_backend(
		&mut self,
		backend: &Backend,
		auth: Option<Box<dyn Authenticator>>,
	) -> Result<(), ProcessorError> {
		let upstream = UpstreamStage::new(&mut self.router, backend, auth)?;
		self.upstream = Some(upstream);
		Ok(())
	}

	pub async fn process(
		&mut self,
		req: ProcessingRequest,
	) -> Result<ProcessingResponse, ProcessorError> {
		let Transaction { router, upstream } = self;
		match req {
			ProcessingRequest::RequestHeaders { headers, .. } => match upstream {
				Some(u) => u.request_headers(router).await,
				None => router.request_headers(headers),
			},
			ProcessingRequest::RequestBody { body, .. } => match upstream {
				// CONTINUE_AND_REPLACE on the upstream request-headers phase
				// makes the proxy skip this phase there; seeing it is a bug.
				Some(_) => Err(ProcessorError::ProtocolViolation(
					"request body must not reach the upstream filter",
				)),
				None => router.request_body(&body),
			},
			ProcessingRequest::ResponseHeaders { headers } => match upstream {
				Some(u) => u.response_headers(router, headers),
				None => Ok(ProcessingResponse::default()),
			},
			ProcessingRequest::ResponseBody {
				body,
				end_of_stream,
			} => match upstream {
				Some(u) => u.response_body(router, &body, end_of_stream).await,
				None => Ok(ProcessingResponse::default()),
			},
		}
	}
}
