//! MCP multiplexing proxy: one client session fans out to several upstream
//! MCP servers over streamable HTTP + SSE, with identity rewriting so
//! responses route back to their origin backend.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use thiserror::Error;

pub mod jsonrpc;
pub mod relay;
pub mod router;
pub mod session;
pub mod upstream;


#[derive(Error, Debug)]
pub enum Error {
	#[error("client must accept both application/json and text/event-stream")]
	InvalidAccept,
	#[error("client must send application/json")]
	InvalidContentType,
	#[error("unknown MCP route")]
	UnknownRoute,
	#[error("session header is required for non-initialize requests")]
	MissingSessionHeader,
	#[error("invalid or expired session ID")]
	InvalidSessionId,
	#[error("session not found")]
	UnknownSession,
	#[error("fail to deserialize request body: {0}")]
	Deserialize(serde_json::Error),
	#[error("invalid parameter: {0}")]
	InvalidParam(String),
	#[error("unsupported method: {0}")]
	UnsupportedMethod(String),
	#[error("upstream {0} failed: {1}")]
	Upstream(String, String),
	#[error("internal error: {0}")]
	Internal(String),
}

impl Error {
	fn status(&self) -> StatusCode {
		match self {
			Error::InvalidAccept | Error::InvalidContentType => StatusCode::NOT_ACCEPTABLE,
			Error::UnknownRoute => StatusCode::NOT_FOUND,
			Error::MissingSessionHeader
			| Error::InvalidSessionId
			| Error::UnknownSession
			| Error::Deserialize(_)
			| Error::InvalidParam(_) => StatusCode::BAD_REQUEST,
			Error::UnsupportedMethod(_) => StatusCode::NOT_IMPLEMENTED,
			Error::Upstream(_, _) => StatusCode::BAD_GATEWAY,
			Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> AxumResponse {
		(self.status(), self.to_string()).into_response()
	}
}
