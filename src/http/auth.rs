//! Upstream credential injection. Cloud credential sources (SigV4 signers,
//! GCP token sources) live behind this trait in the host; the static schemes
//! config can express are provided here.

use async_trait::async_trait;

use crate::config::AuthConfig;
use crate::http::{HeaderMap, HeaderMutation};

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
	#[error("credential refresh failed: {0}")]
	Refresh(String),
	#[error("invalid credential material: {0}")]
	Invalid(String),
}

/// Applies upstream credentials to a prepared outbound request. May suspend
/// for a network refresh; the call receives the final header map and the
/// outbound body (signature schemes need both).
#[async_trait]
pub trait Authenticator: Send + Sync {
	async fn authenticate(
		&self,
		headers: &HeaderMap,
		body: &[u8],
	) -> Result<HeaderMutation, AuthError>;
}

pub fn from_config(cfg: &AuthConfig) -> Box<dyn Authenticator> {
	match cfg {
		AuthConfig::ApiKey { header, key } => Box::new(ApiKeyAuth {
			header: header.clone(),
			key: key.clone(),
		}),
		AuthConfig::Bearer { token } => Box::new(BearerAuth {
			token: token.clone(),
		}),
	}
}

/// Static key on a configurable header (`x-api-key` and friends).
pub struct ApiKeyAuth {
	pub header: String,
	pub key: String,
}

#[async_trait]
impl Authenticator for ApiKeyAuth {
	async fn authenticate(
		&self,
		_headers: &HeaderMap,
		_body: &[u8],
	) -> Result<HeaderMutation, AuthError> {
		let mut m = HeaderMutation::default();
		m.set(self.header.clone(), self.key.clone());
		Ok(m)
	}
}

/// Static bearer token on `authorization`.
pub struct BearerAuth {
	pub token: String,
}

#[async_trait]
impl Authenticator for BearerAuth {
	async fn authenticate(
		&self,
		_headers: &HeaderMap,
		_body: &[u8],
	) -> Result<HeaderMutation, AuthError> {
		let mut m = HeaderMutation::default();
		m.set("authorization", format!("Bearer {}", self.token));
		Ok(m)
	}
}
