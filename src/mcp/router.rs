//! The multiplexer's HTTP surface: POST / GET / DELETE at a host-chosen path,
//! routed by the `x-ai-eg-mcp-route` header the front proxy injects.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap as HttpHeaderMap, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::any;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::ConfigStore;
use crate::config::{MCP_ROUTE_HEADER, McpRoute};
use crate::mcp::jsonrpc::{self, Message};
use crate::mcp::relay::Relay;
use crate::mcp::session::{Crypter, ServerEvent, Session, SessionManager};
use crate::mcp::upstream::{LAST_EVENT_ID_HEADER, MCP_SESSION_HEADER, UpstreamClient};
use crate::mcp::Error;
use crate::parse::sse;

#[derive(Clone)]
pub struct App {
	state: Arc<AppState>,
}

pub struct AppState {
	config: ConfigStore,
	sessions: Arc<SessionManager>,
	client: UpstreamClient,
}

impl App {
	pub fn new(config: ConfigStore) -> anyhow::Result<Self> {
		let secret = config.load().session_secret.clone();
		let crypter = Arc::new(Crypter::from_secret(secret.as_deref())?);
		let sessions = Arc::new(SessionManager::new(crypter));
		sessions.spawn_sweeper();
		Ok(Self {
			state: Arc::new(AppState {
				config,
				sessions,
				client: UpstreamClient::new(),
			}),
		})
	}

	pub fn sessions(&self) -> &Arc<SessionManager> {
		&self.state.sessions
	}

	/// Mount the MCP endpoint at `path`; the host picks the path.
	pub fn router_at(&self, path: &str) -> axum::Router {
		axum::Router::new()
			.route(path, any(dispatch))
			.with_state(self.clone())
	}

	pub fn router(&self) -> axum::Router {
		self.router_at("/mcp")
	}

	fn route_for(&self, headers: &HttpHeaderMap) -> Result<McpRoute, Error> {
		let name = headers
			.get(MCP_ROUTE_HEADER)
			.and_then(|v| v.to_str().ok())
			.ok_or(Error::UnknownRoute)?;
		self
			.state
			.config
			.load()
			.mcp_route(name)
			.cloned()
			.ok_or(Error::UnknownRoute)
	}

	fn session_for(&self, headers: &HttpHeaderMap) -> Result<Arc<Session>, Error> {
		let id = headers
			.get(MCP_SESSION_HEADER)
			.and_then(|v| v.to_str().ok())
			.ok_or(Error::MissingSessionHeader)?;
		self.state.sessions.get(id)
	}
}

async fn dispatch(
	State(app): State<App>,
	req: axum::http::Request<Body>,
) -> Result<AxumResponse, Error> {
	let (parts, body) = req.into_parts();
	match parts.method.as_str() {
		"POST" => {
			let bytes = axum::body::to_bytes(body, 4 * 1024 * 1024)
				.await
				.map_err(|e| Error::Internal(e.to_string()))?;
			handle_post(app, parts.headers, bytes).await
		},
		"GET" => handle_get(app, parts.headers).await,
		"DELETE" => handle_delete(app, parts.headers).await,
		_ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
	}
}

async fn handle_post(
	app: App,
	headers: HttpHeaderMap,
	body: Bytes,
) -> Result<AxumResponse, Error> {
	let content_type = headers
		.get(CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.unwrap_or_default();
	if !content_type.starts_with("application/json") {
		return Err(Error::InvalidContentType);
	}
	let accept = headers
		.get(ACCEPT)
		.and_then(|v| v.to_str().ok())
		.unwrap_or("*/*");
	let wildcard = accept.contains("*/*");
	if !wildcard && !(accept.contains("application/json") && accept.contains("text/event-stream")) {
		return Err(Error::InvalidAccept);
	}

	let route = app.route_for(&headers)?;
	let relay = Relay::new(route, app.state.client.clone());
	let message: Message = serde_json::from_slice(&body).map_err(Error::Deserialize)?;

	match message {
		Message::Request(req) if req.method == "initialize" => {
			let route_name = headers
				.get(MCP_ROUTE_HEADER)
				.and_then(|v| v.to_str().ok())
				.unwrap_or_default();
			let session = app
				.state
				.sessions
				.create(route_name)
				.map_err(|e| Error::Internal(e.to_string()))?;
			let response = relay.initialize(&session, req).await?;
			relay.spawn_drains(&session);
			json_response(StatusCode::OK, &response, Some(&session.id))
		},
		Message::Request(req) => {
			let session = app.session_for(&headers)?;
			let response = match req.method.as_str() {
				"ping" => jsonrpc::Response::success(req.id, serde_json::json!({})),
				"tools/list"
				| "prompts/list"
				| "resources/list"
				| "resources/templates/list"
				| "logging/setLevel" => relay.fanout_list(&session, req).await?,
				"tools/call"
				| "prompts/get"
				| "resources/read"
				| "resources/subscribe"
				| "resources/unsubscribe"
				| "completion/complete" => relay.route_single(&session, req).await?,
				other => return Err(Error::UnsupportedMethod(other.to_string())),
			};
			json_response(StatusCode::OK, &response, None)
		},
		Message::Notification(n) => {
			match n.method.as_str() {
				"notifications/initialized" | "notifications/cancelled" => {
					// accepted, intentionally not forwarded
				},
				"notifications/progress" => {
					let session = app.session_for(&headers)?;
					relay.forward_progress(&session, n).await?;
				},
				other => {
					debug!("accepting unforwarded notification {other}");
				},
			}
			Ok(StatusCode::ACCEPTED.into_response())
		},
		Message::Response(r) => {
			let session = app.session_for(&headers)?;
			relay.forward_response(&session, r).await?;
			Ok(StatusCode::ACCEPTED.into_response())
		},
	}
}

async fn handle_get(app: App, headers: HttpHeaderMap) -> Result<AxumResponse, Error> {
	let route = app.route_for(&headers)?;
	let session = app.session_for(&headers)?;
	let relay = Relay::new(route, app.state.client.clone());

	if let Some(last) = headers
		.get(LAST_EVENT_ID_HEADER)
		.and_then(|v| v.to_str().ok())
	{
		session
			.resume_from_event_id(app.state.sessions.crypter(), last)
			.map_err(|_| Error::InvalidParam("Last-Event-ID".into()))?;
	}

	let rx = match session.take_notifications() {
		Some(rx) => rx,
		None => {
			// reconnect: the previous consumer is gone, start fresh drains
			// resuming from the recorded per-backend event ids
			let rx = session.reset_notifications();
			relay.spawn_drains(&session);
			rx
		},
	};

	let crypter = app.state.sessions.crypter().clone();
	let stream_session = session.clone();
	let stream = ReceiverStream::new(rx).map(move |event: ServerEvent| {
		let data = serde_json::to_string(&event.message).unwrap_or_default();
		// every event carries the session's current composite resume point
		let id = stream_session.composite_event_id(&crypter).ok();
		let sse_event = sse::Event {
			event: "message".to_string(),
			id,
			data: vec![data],
			retry: None,
		};
		Ok::<Bytes, Infallible>(Bytes::from(sse_event.to_bytes()))
	});

	axum::http::Response::builder()
		.status(StatusCode::OK)
		.header(CONTENT_TYPE, "text/event-stream")
		.header(CACHE_CONTROL, "no-cache")
		.body(Body::from_stream(stream))
		.map_err(|e| Error::Internal(e.to_string()))
}

async fn handle_delete(app: App, headers: HttpHeaderMap) -> Result<AxumResponse, Error> {
	let route = app.route_for(&headers)?;
	let session = app.session_for(&headers)?;
	let relay = Relay::new(route, app.state.client.clone());
	app.state.sessions.remove(&session.id);
	relay.delete(&session).await;
	Ok(StatusCode::NO_CONTENT.into_response())
}

fn json_response(
	status: StatusCode,
	message: &jsonrpc::Response,
	session_id: Option<&str>,
) -> Result<AxumResponse, Error> {
	let body = serde_json::to_vec(message).map_err(|e| Error::Internal(e.to_string()))?;
	let mut builder = axum::http::Response::builder()
		.status(status)
		.header(CONTENT_TYPE, "application/json");
	if let Some(id) = session_id {
		builder = builder.header(MCP_SESSION_HEADER, id);
	}
	builder
		.body(Body::from(body))
		.map_err(|e| Error::Internal(e.to_string()))
}
