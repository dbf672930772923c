//! Drives one transaction's phase stream. The host owns the transport
//! framing; this loop owns phase ordering, the router→upstream hand-off the
//! proxy performs after a route-cache clear, and retry-tolerant backend
//! re-selection.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::ConfigStore;
use crate::router as route_rules;
use crate::telemetry::metrics::Metrics;
use crate::telemetry::trc::Tracer;

use super::protocol::{ImmediateResponse, ProcessingRequest, ProcessingResponse};
use super::{ProcessorError, Transaction};

#[derive(Debug)]
pub enum StreamMessage {
	Response(ProcessingResponse),
	Immediate(ImmediateResponse),
}

pub struct ExtProcServer {
	config: ConfigStore,
	metrics: Arc<Metrics>,
	tracer: Arc<dyn Tracer>,
}

impl ExtProcServer {
	pub fn new(config: ConfigStore, metrics: Arc<Metrics>, tracer: Arc<dyn Tracer>) -> Self {
		Self {
			config,
			metrics,
			tracer,
		}
	}

	/// Process one transaction. Emits exactly one message per phase message
	/// read, except after an immediate response, which ends the transaction.
	///
	/// Dropping the returned future cancels the transaction; per-phase state
	/// lives on the transaction and goes with it.
	pub async fn process_transaction<I>(
		&self,
		route_name: &str,
		mut input: I,
		output: mpsc::Sender<StreamMessage>,
	) -> Result<(), ProcessorError>
	where
		I: Stream<Item = ProcessingRequest> + Unpin + Send,
	{
		// pin the generation for the whole transaction
		let config = self.config.load();
		let mut txn = Transaction::new(
			config.clone(),
			route_name,
			self.metrics.clone(),
			self.tracer.clone(),
		)?;

		while let Some(msg) = input.next().await {
			// Request headers arriving after the body phase are the proxy's
			// replay through the upstream filter: the route cache was cleared,
			// a rule matched, and (on retries) the previous attempt is dead.
			// Select a backend within the rule and rebuild the upstream role.
			if matches!(msg, ProcessingRequest::RequestHeaders { .. })
				&& txn.router.original_body.is_some()
			{
				let backend_name = {
					let rule_name = txn.router.selected_rule.clone().ok_or(
						ProcessorError::ProtocolViolation("headers replayed before routing"),
					)?;
					let route = txn.router.route();
					let rule = route
						.rules
						.iter()
						.find(|r| r.name == rule_name)
						.ok_or_else(|| {
							ProcessorError::RoutingInternal(format!("selected rule {rule_name} vanished"))
						})?;
					route_rules::pick_backend(rule)
						.map_err(|e| ProcessorError::RoutingInternal(e.to_string()))?
						.to_string()
				};
				let backend = config.backend(&backend_name).ok_or_else(|| {
					ProcessorError::RoutingInternal(format!("unknown backend {backend_name}"))
				})?;
				txn.set_backend(&backend.clone(), None)?;
			}

			match txn.process(msg).await {
				Ok(resp) => {
					if output.send(StreamMessage::Response(resp)).await.is_err() {
						return Err(ProcessorError::Cancelled);
					}
				},
				Err(e) => {
					let Some(immediate) = e.to_immediate() else {
						return Err(e);
					};
					// in-band short circuit; the stream is done
					let _ = output.send(StreamMessage::Immediate(immediate)).await;
					return Ok(());
				},
			}
		}
		Ok(())
	}
}
