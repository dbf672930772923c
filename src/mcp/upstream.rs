//! HTTP client for upstream MCP servers: POST for requests/notifications,
//! long-poll GET for the server-to-client stream, DELETE for teardown.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::mcp::jsonrpc;
use crate::parse::sse;

pub const MCP_SESSION_HEADER: &str = "mcp-session-id";
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";
/// Default per-backend deadline for fan-out calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
	#[error("transport: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("backend returned status {0}")]
	Status(u16),
	#[error("invalid payload: {0}")]
	Payload(String),
}

/// One message observed on a backend connection, with the backend-issued SSE
/// event id when it arrived on a stream.
#[derive(Debug)]
pub struct EventMessage {
	pub event_id: Option<String>,
	pub message: jsonrpc::Message,
}

#[derive(Debug)]
pub struct PostOutcome {
	/// `Mcp-Session-Id` issued or echoed by the backend.
	pub session_id: Option<String>,
	/// Empty for 202-accepted notifications.
	pub messages: Vec<EventMessage>,
}

#[derive(Clone, Debug, Default)]
pub struct UpstreamClient {
	http: reqwest::Client,
}

impl UpstreamClient {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn post(
		&self,
		url: &str,
		session_id: Option<&str>,
		message: &jsonrpc::Message,
		timeout: Duration,
	) -> Result<PostOutcome, UpstreamError> {
		let mut req = self
			.http
			.post(url)
			.json(message)
			.header(ACCEPT, "application/json, text/event-stream")
			.timeout(timeout);
		if let Some(sid) = session_id {
			req = req.header(MCP_SESSION_HEADER, sid);
		}
		let resp = req.send().await?;
		let status = resp.status();
		let session_id = resp
			.headers()
			.get(MCP_SESSION_HEADER)
			.and_then(|v| v.to_str().ok())
			.map(String::from);
		if status.as_u16() == 202 {
			return Ok(PostOutcome {
				session_id,
				messages: vec![],
			});
		}
		if !status.is_success() {
			return Err(UpstreamError::Status(status.as_u16()));
		}
		let content_type = resp
			.headers()
			.get(CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.unwrap_or_default()
			.to_string();

		let mut messages = Vec::new();
		if content_type.starts_with("text/event-stream") {
			// short stream: notifications plus the final response
			let mut parser = sse::Parser::new();
			let mut stream = resp.bytes_stream();
			while let Some(chunk) = stream.next().await {
				let chunk = chunk?;
				for event in parser.push(&chunk) {
					collect_event(&mut messages, event);
				}
			}
			if let Some(event) = parser.finish() {
				collect_event(&mut messages, event);
			}
		} else if content_type.starts_with("application/json") {
			let message: jsonrpc::Message = resp.json().await?;
			messages.push(EventMessage {
				event_id: None,
				message,
			});
		} else {
			return Err(UpstreamError::Payload(format!(
				"unexpected content type {content_type}"
			)));
		}
		Ok(PostOutcome {
			session_id,
			messages,
		})
	}

	pub async fn delete_session(&self, url: &str, session_id: &str) -> Result<(), UpstreamError> {
		self
			.http
			.delete(url)
			.header(MCP_SESSION_HEADER, session_id)
			.timeout(DEFAULT_TIMEOUT)
			.send()
			.await?;
		Ok(())
	}

	/// Long-poll GET stream. Runs until cancelled or the backend hangs up;
	/// events land on the returned channel in arrival order.
	pub fn get_stream(
		&self,
		url: String,
		session_id: String,
		last_event_id: Option<String>,
		cancel: CancellationToken,
	) -> mpsc::Receiver<EventMessage> {
		let (tx, rx) = mpsc::channel(64);
		let http = self.http.clone();
		tokio::spawn(async move {
			let mut req = http
				.get(&url)
				.header(ACCEPT, "text/event-stream")
				.header(MCP_SESSION_HEADER, &session_id);
			if let Some(id) = &last_event_id {
				req = req.header(LAST_EVENT_ID_HEADER, id);
			}
			let resp = match req.send().await {
				Ok(r) if r.status().is_success() => r,
				Ok(r) => {
					debug!("GET stream refused with status {}", r.status());
					return;
				},
				Err(e) => {
					warn!("GET stream failed: {e}");
					return;
				},
			};
			let mut parser = sse::Parser::new();
			let mut stream = resp.bytes_stream();
			loop {
				let chunk = tokio::select! {
					_ = cancel.cancelled() => return,
					chunk = stream.next() => chunk,
				};
				let Some(Ok(chunk)) = chunk else {
					return;
				};
				for event in parser.push(&chunk) {
					let mut batch = Vec::new();
					collect_event(&mut batch, event);
					for msg in batch {
						if tx.send(msg).await.is_err() {
							return;
						}
					}
				}
			}
		});
		rx
	}
}

fn collect_event(out: &mut Vec<EventMessage>, event: sse::Event) {
	for line in &event.data {
		match serde_json::from_str::<jsonrpc::Message>(line) {
			Ok(message) => out.push(EventMessage {
				event_id: event.id.clone(),
				message,
			}),
			Err(e) => debug!("dropping undecodable SSE data line: {e}"),
		}
	}
}
