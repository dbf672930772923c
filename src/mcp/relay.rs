//! The fan-out dispatcher: sends one client message to one or all backends of
//! an MCP route, rewrites identities in both directions, and aggregates
//! `list`-style results in backend config order.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{McpBackend, McpRoute};
use crate::mcp::jsonrpc::{
	self, INVALID_PARAMS, Message, Notification, Request, RequestId, Response,
};
use crate::mcp::session::{ServerEvent, Session};
use crate::mcp::upstream::{DEFAULT_TIMEOUT, EventMessage, PostOutcome, UpstreamClient};
use crate::mcp::{Error, upstream};

pub struct Relay {
	route: McpRoute,
	client: UpstreamClient,
	timeout: Duration,
}

impl Relay {
	pub fn new(route: McpRoute, client: UpstreamClient) -> Self {
		Self {
			route,
			client,
			timeout: DEFAULT_TIMEOUT,
		}
	}

	/// Caller deadline for fan-out calls; the 30s default still applies as a
	/// floor for backends that never answer.
	pub fn with_deadline(mut self, deadline: Duration) -> Self {
		self.timeout = deadline + DEFAULT_TIMEOUT;
		self
	}

	fn backend(&self, name: &str) -> Result<&McpBackend, Error> {
		self
			.route
			.backends
			.iter()
			.find(|b| b.name == name)
			.ok_or_else(|| Error::InvalidParam(format!("unknown backend {name}")))
	}

	/// Send one message to every backend in parallel. Each call runs on its
	/// own task with its own deadline; results funnel through a bounded
	/// channel and are reordered to backend config order. Dropping the future
	/// (cancellation) abandons the tasks, whose late sends then fail.
	async fn fanout(
		&self,
		session: &Arc<Session>,
		message: &Message,
	) -> Vec<(String, Result<PostOutcome, upstream::UpstreamError>)> {
		let (tx, mut rx) = mpsc::channel(self.route.backends.len().max(1));
		let mut expected = 0usize;
		for backend in &self.route.backends {
			expected += 1;
			let tx = tx.clone();
			let client = self.client.clone();
			let url = backend.url.clone();
			let name = backend.name.clone();
			let backend_session = session.backend_session(&backend.name);
			let message = message.clone();
			let timeout = self.timeout;
			tokio::spawn(async move {
				let result = client
					.post(&url, backend_session.as_deref(), &message, timeout)
					.await;
				let _ = tx.send((name, result)).await;
			});
		}
		drop(tx);

		let mut unordered = Vec::with_capacity(expected);
		while let Some(entry) = rx.recv().await {
			unordered.push(entry);
			if unordered.len() == expected {
				break;
			}
		}
		// config order, not completion order
		let mut ordered = Vec::with_capacity(unordered.len());
		for backend in &self.route.backends {
			if let Some(pos) = unordered.iter().position(|(n, _)| *n == backend.name) {
				ordered.push(unordered.swap_remove(pos));
			}
		}
		ordered
	}

	/// Create the per-backend sessions and merge capabilities. The gateway
	/// reports its own `serverInfo`.
	pub async fn initialize(
		&self,
		session: &Arc<Session>,
		req: Request,
	) -> Result<Response, Error> {
		let protocol_version = req
			.params
			.as_ref()
			.and_then(|p| p.get("protocolVersion"))
			.cloned()
			.unwrap_or_else(|| json!("2025-06-18"));
		let message = Message::Request(req.clone());
		let results = self.fanout(session, &message).await;

		let mut capabilities = serde_json::Map::new();
		let mut successes = 0usize;
		let mut first_error: Option<Error> = None;
		for (backend, result) in results {
			let outcome = match result {
				Ok(o) => o,
				Err(e) => {
					warn!("initialize failed for backend {backend}: {e}");
					first_error.get_or_insert(Error::Upstream(backend, e.to_string()));
					continue;
				},
			};
			if let Some(sid) = &outcome.session_id {
				session.set_backend_session(&backend, sid.clone());
			}
			let (extras, response) = sift(outcome.messages);
			self.forward_extras(session, &backend, extras).await;
			let Some(response) = response else {
				warn!("backend {backend} returned no initialize result");
				continue;
			};
			successes += 1;
			if let Some(caps) = response
				.result
				.as_ref()
				.and_then(|r| r.get("capabilities"))
				.and_then(|c| c.as_object())
			{
				for (k, v) in caps {
					capabilities.insert(k.clone(), v.clone());
				}
			}
		}
		if successes == 0 {
			return Err(first_error.unwrap_or(Error::Internal("no backends configured".into())));
		}
		Ok(Response::success(
			req.id,
			json!({
				"protocolVersion": protocol_version,
				"capabilities": Value::Object(capabilities),
				"serverInfo": {"name": crate::NAME, "version": crate::VERSION},
			}),
		))
	}

	/// `tools/list`, `prompts/list`, `resources/list`,
	/// `resources/templates/list`, `logging/setLevel`: fan out, prefix each
	/// item's identity with its backend, filter tool allow-lists, merge.
	pub async fn fanout_list(
		&self,
		session: &Arc<Session>,
		req: Request,
	) -> Result<Response, Error> {
		let merge = MergeKind::for_method(&req.method)
			.ok_or_else(|| Error::UnsupportedMethod(req.method.clone()))?;
		let message = Message::Request(req.clone());
		let results = self.fanout(session, &message).await;

		let mut merged = Vec::new();
		for (backend_name, result) in results {
			let outcome = match result {
				Ok(o) => o,
				Err(e) => {
					warn!("{} failed for backend {backend_name}: {e}", req.method);
					continue;
				},
			};
			let (extras, response) = sift(outcome.messages);
			self.forward_extras(session, &backend_name, extras).await;
			let Some(response) = response else { continue };
			let MergeKind::Aggregate { key, is_tools } = merge else {
				continue;
			};
			let Ok(backend) = self.backend(&backend_name) else {
				continue;
			};
			let items = response
				.result
				.as_ref()
				.and_then(|r| r.get(key))
				.and_then(|v| v.as_array())
				.cloned()
				.unwrap_or_default();
			for mut item in items {
				let Some(name) = item.get("name").and_then(|n| n.as_str()).map(String::from) else {
					continue;
				};
				if !jsonrpc::valid_component(&name) {
					debug!("dropping {key} entry with invalid name {name:?} from {backend_name}");
					continue;
				}
				if is_tools && !backend.allows_tool(&name) {
					continue;
				}
				let obj = item.as_object_mut().expect("array of objects");
				obj.insert(
					"name".to_string(),
					Value::String(jsonrpc::prefix_name(&backend_name, &name)),
				);
				for uri_key in ["uri", "uriTemplate"] {
					if let Some(uri) = obj.get(uri_key).and_then(|u| u.as_str()).map(String::from) {
						obj.insert(
							uri_key.to_string(),
							Value::String(jsonrpc::prefix_name(&backend_name, &uri)),
						);
					}
				}
				merged.push(item);
			}
		}
		let result = match merge {
			MergeKind::Aggregate { key, .. } => json!({ key: merged }),
			MergeKind::Empty => json!({}),
		};
		Ok(Response::success(req.id, result))
	}

	/// Single-backend methods: parse the prefixed identity, strip the prefix,
	/// forward to the owning backend.
	pub async fn route_single(
		&self,
		session: &Arc<Session>,
		mut req: Request,
	) -> Result<Response, Error> {
		let field = IdentityField::for_method(&req.method)
			.ok_or_else(|| Error::UnsupportedMethod(req.method.clone()))?;
		let prefixed = field
			.get(req.params.as_ref())
			.ok_or_else(|| Error::InvalidParam(format!("{} is required", field.path())))?;
		let Some((backend_name, bare)) = jsonrpc::split_prefixed(&prefixed) else {
			return Err(Error::InvalidParam(format!(
				"{} is not backend-qualified",
				field.path()
			)));
		};
		let backend = self.backend(backend_name)?;
		if matches!(field, IdentityField::Name | IdentityField::Ref)
			&& !jsonrpc::valid_component(bare)
		{
			return Err(Error::InvalidParam(format!("invalid name {bare:?}")));
		}
		if req.method == "tools/call" && !backend.allows_tool(bare) {
			// do not reveal whether the tool exists behind the allow-list
			return Ok(Response::failure(
				req.id,
				INVALID_PARAMS,
				format!("unknown tool: {prefixed}"),
			));
		}
		let (backend_name, bare) = (backend_name.to_string(), bare.to_string());
		field.set(&mut req.params, &bare);

		let outcome = self
			.client
			.post(
				&backend.url,
				session.backend_session(&backend_name).as_deref(),
				&Message::Request(req.clone()),
				self.timeout,
			)
			.await
			.map_err(|e| Error::Upstream(backend_name.clone(), e.to_string()))?;
		let (extras, response) = sift(outcome.messages);
		self.forward_extras(session, &backend_name, extras).await;
		response.ok_or_else(|| Error::Upstream(backend_name, "no response message".into()))
	}

	/// Client-to-server progress: the token was rewritten on the way out;
	/// decode it to find the origin backend and restore the original token.
	pub async fn forward_progress(
		&self,
		session: &Arc<Session>,
		mut notification: Notification,
	) -> Result<(), Error> {
		let token = notification
			.params
			.as_ref()
			.and_then(|p| p.get("progressToken"))
			.and_then(|t| t.as_str())
			.ok_or_else(|| Error::InvalidParam("progressToken is required".into()))?;
		let (original, backend_name) =
			jsonrpc::decode_id(token).map_err(|e| Error::InvalidParam(e.to_string()))?;
		let backend = self.backend(&backend_name)?;
		if let Some(params) = notification.params.as_mut().and_then(|p| p.as_object_mut()) {
			params.insert("progressToken".to_string(), original.to_value());
		}
		self
			.client
			.post(
				&backend.url,
				session.backend_session(&backend_name).as_deref(),
				&Message::Notification(notification),
				self.timeout,
			)
			.await
			.map_err(|e| Error::Upstream(backend_name, e.to_string()))?;
		Ok(())
	}

	/// Client response to a server-to-client request: the `__`-encoded id
	/// names the backend composite session to dispatch into.
	pub async fn forward_response(
		&self,
		session: &Arc<Session>,
		mut response: Response,
	) -> Result<(), Error> {
		let RequestId::String(encoded) = &response.id else {
			return Err(Error::InvalidParam(
				"response id is not backend-qualified".into(),
			));
		};
		let (original, backend_name) =
			jsonrpc::decode_id(encoded).map_err(|e| Error::InvalidParam(e.to_string()))?;
		let backend = self.backend(&backend_name)?;
		response.id = original;
		self
			.client
			.post(
				&backend.url,
				session.backend_session(&backend_name).as_deref(),
				&Message::Response(response),
				self.timeout,
			)
			.await
			.map_err(|e| Error::Upstream(backend_name, e.to_string()))?;
		Ok(())
	}

	/// Tear down every backend half of the composite session.
	pub async fn delete(&self, session: &Arc<Session>) {
		for backend in &self.route.backends {
			if let Some(sid) = session.backend_session(&backend.name)
				&& let Err(e) = self.client.delete_session(&backend.url, &sid).await
			{
				debug!("failed to delete session on {}: {e}", backend.name);
			}
		}
	}

	/// One drain per backend GET stream, feeding the session's notification
	/// channel until the session is cancelled.
	pub fn spawn_drains(&self, session: &Arc<Session>) {
		for backend in &self.route.backends {
			let Some(backend_session) = session.backend_session(&backend.name) else {
				continue;
			};
			let last_event_id = session
				.snapshot()
				.get(&backend.name)
				.and_then(|e| e.last_event_id.clone());
			let mut rx = self.client.get_stream(
				backend.url.clone(),
				backend_session,
				last_event_id,
				session.cancel.child_token(),
			);
			let session = session.clone();
			let backend_name = backend.name.clone();
			tokio::spawn(async move {
				while let Some(event) = rx.recv().await {
					if let Some(id) = &event.event_id {
						session.set_last_event_id(&backend_name, id.clone());
					}
					let message = rewrite_server_message(&backend_name, event.message);
					if session
						.event_sender()
						.send(ServerEvent {
							backend: backend_name.clone(),
							message,
						})
						.await
						.is_err()
					{
						return;
					}
				}
			});
		}
	}

	/// Non-response messages that arrive on a POST stream (notifications,
	/// server-to-client requests) go to the client's notification stream,
	/// rewritten like GET-stream traffic.
	async fn forward_extras(
		&self,
		session: &Arc<Session>,
		backend: &str,
		extras: Vec<EventMessage>,
	) {
		for event in extras {
			if let Some(id) = &event.event_id {
				session.set_last_event_id(backend, id.clone());
			}
			let message = rewrite_server_message(backend, event.message);
			let _ = session
				.event_sender()
				.send(ServerEvent {
					backend: backend.to_string(),
					message,
				})
				.await;
		}
	}
}

#[derive(Clone, Copy)]
enum MergeKind {
	Aggregate {
		key: &'static str,
		is_tools: bool,
	},
	Empty,
}

impl MergeKind {
	fn for_method(method: &str) -> Option<MergeKind> {
		match method {
			"tools/list" => Some(MergeKind::Aggregate {
				key: "tools",
				is_tools: true,
			}),
			"prompts/list" => Some(MergeKind::Aggregate {
				key: "prompts",
				is_tools: false,
			}),
			"resources/list" => Some(MergeKind::Aggregate {
				key: "resources",
				is_tools: false,
			}),
			"resources/templates/list" => Some(MergeKind::Aggregate {
				key: "resourceTemplates",
				is_tools: false,
			}),
			"logging/setLevel" => Some(MergeKind::Empty),
			_ => None,
		}
	}
}

/// Where the backend-qualified identity lives for single-backend methods.
enum IdentityField {
	Name,
	Uri,
	Ref,
}

impl IdentityField {
	fn for_method(method: &str) -> Option<IdentityField> {
		match method {
			"tools/call" | "prompts/get" => Some(IdentityField::Name),
			"resources/read" | "resources/subscribe" | "resources/unsubscribe" => {
				Some(IdentityField::Uri)
			},
			"completion/complete" => Some(IdentityField::Ref),
			_ => None,
		}
	}

	fn path(&self) -> &'static str {
		match self {
			IdentityField::Name => "params.name",
			IdentityField::Uri => "params.uri",
			IdentityField::Ref => "params.ref.name",
		}
	}

	fn get(&self, params: Option<&Value>) -> Option<String> {
		let params = params?;
		let v = match self {
			IdentityField::Name => params.get("name")?,
			IdentityField::Uri => params.get("uri")?,
			IdentityField::Ref => params.get("ref")?.get("name")?,
		};
		v.as_str().map(String::from)
	}

	fn set(&self, params: &mut Option<Value>, value: &str) {
		let Some(params) = params.as_mut() else { return };
		let target = match self {
			IdentityField::Name | IdentityField::Uri => params.as_object_mut(),
			IdentityField::Ref => params
				.get_mut("ref")
				.and_then(|r| r.as_object_mut()),
		};
		let Some(obj) = target else { return };
		let key = match self {
			IdentityField::Name | IdentityField::Ref => "name",
			IdentityField::Uri => "uri",
		};
		obj.insert(key.to_string(), Value::String(value.to_string()));
	}
}

/// Split a POST response stream into (extras, final response).
pub(crate) fn sift(messages: Vec<EventMessage>) -> (Vec<EventMessage>, Option<Response>) {
	let mut extras = Vec::new();
	let mut response = None;
	for m in messages {
		match m.message {
			Message::Response(r) => response = Some(r),
			_ => extras.push(m),
		}
	}
	(extras, response)
}

/// Rewrite a server-to-client message so the eventual client response can be
/// demultiplexed: request ids and `_meta.progressToken` get backend-tagged.
pub(crate) fn rewrite_server_message(backend: &str, mut message: Message) -> Message {
	if let Message::Request(r) = &mut message {
		if let Some(encoded) = jsonrpc::encode_id(&r.id, backend) {
			r.id = RequestId::String(encoded);
		}
		if let Some(meta) = r
			.params
			.as_mut()
			.and_then(|p| p.get_mut("_meta"))
			.and_then(|m| m.as_object_mut())
			&& let Some(token) = meta.get("progressToken")
			&& let Some(id) = RequestId::from_value(token)
			&& let Some(encoded) = jsonrpc::encode_id(&id, backend)
		{
			meta.insert("progressToken".to_string(), Value::String(encoded));
		}
	}
	message
}
