//! Composite sessions: one client-facing session maps to one session per
//! upstream backend. Client-visible session and event ids are AEAD-encrypted
//! so they can be neither forged nor enumerated, and carry a creation
//! timestamp for expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use aws_lc_rs::aead::{AES_256_GCM, Aad, Nonce, RandomizedNonceKey};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::mcp::jsonrpc;

/// Idle sessions are evicted after this long without traffic.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const NONCE_LEN: usize = 12;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
	#[error("invalid key")]
	InvalidKey,
	#[error("encryption failed")]
	EncryptionFailed,
	#[error("decryption failed")]
	DecryptionFailed,
	#[error("invalid format")]
	InvalidFormat,
}

/// AES-256-GCM with a random nonce per seal; tokens are
/// url-safe-base64(`nonce || ciphertext+tag`), safe for header values.
#[derive(Debug)]
pub struct Crypter {
	key: RandomizedNonceKey,
}

impl Crypter {
	pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
		if key.len() != 32 {
			return Err(CryptoError::InvalidKey);
		}
		let key = RandomizedNonceKey::new(&AES_256_GCM, key).map_err(|_| CryptoError::InvalidKey)?;
		Ok(Self { key })
	}

	/// Hex-decoded operator secret, or a fresh per-instance key. Sessions are
	/// instance-local either way; the configured secret only keeps ids stable
	/// across restarts.
	pub fn from_secret(secret: Option<&str>) -> Result<Self, CryptoError> {
		match secret {
			Some(s) => {
				let key = hex::decode(s).map_err(|_| CryptoError::InvalidKey)?;
				Self::new(&key)
			},
			None => {
				let mut key = [0u8; 32];
				rand::rng().fill_bytes(&mut key);
				Self::new(&key)
			},
		}
	}

	pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
		let mut in_out = plaintext.to_vec();
		let nonce = self
			.key
			.seal_in_place_append_tag(Aad::empty(), &mut in_out)
			.map_err(|_| CryptoError::EncryptionFailed)?;
		let mut result = nonce.as_ref().to_vec();
		result.extend_from_slice(&in_out);
		Ok(URL_SAFE_NO_PAD.encode(&result))
	}

	pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, CryptoError> {
		let data = URL_SAFE_NO_PAD
			.decode(token)
			.map_err(|_| CryptoError::InvalidFormat)?;
		if data.len() <= NONCE_LEN {
			return Err(CryptoError::InvalidFormat);
		}
		let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
		let nonce =
			Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::InvalidFormat)?;
		let mut in_out = ciphertext.to_vec();
		let plaintext = self
			.key
			.open_in_place(nonce, Aad::empty(), &mut in_out)
			.map_err(|_| CryptoError::DecryptionFailed)?;
		Ok(plaintext.to_vec())
	}
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionToken {
	#[serde(rename = "u")]
	uuid: String,
	#[serde(rename = "t")]
	created_unix: u64,
}

/// Per-backend half of a composite session.
#[derive(Debug, Clone, Default)]
pub struct CompositeSessionEntry {
	/// Issued by the backend during its `initialize` handshake.
	pub backend_session_id: Option<String>,
	/// Most recent SSE `id:` seen from that backend; used to resume GET
	/// streams after a reconnect.
	pub last_event_id: Option<String>,
}

/// A message drained from one backend's GET stream, headed for the client.
#[derive(Debug)]
pub struct ServerEvent {
	pub backend: String,
	pub message: jsonrpc::Message,
}

pub struct Session {
	pub id: Arc<str>,
	pub route: String,
	last_seen: Mutex<Instant>,
	per_backend: Mutex<HashMap<String, CompositeSessionEntry>>,
	notifications_tx: Mutex<mpsc::Sender<ServerEvent>>,
	notifications_rx: Mutex<Option<mpsc::Receiver<ServerEvent>>>,
	/// Cancels the per-backend GET drains when the session dies.
	pub cancel: CancellationToken,
}

impl Session {
	fn new(id: Arc<str>, route: String) -> Self {
		let (tx, rx) = mpsc::channel(64);
		Self {
			id,
			route,
			last_seen: Mutex::new(Instant::now()),
			per_backend: Mutex::new(HashMap::new()),
			notifications_tx: Mutex::new(tx),
			notifications_rx: Mutex::new(Some(rx)),
			cancel: CancellationToken::new(),
		}
	}

	pub fn touch(&self) {
		*self.last_seen.lock() = Instant::now();
	}

	pub fn idle_for(&self) -> Duration {
		self.last_seen.lock().elapsed()
	}

	pub fn set_backend_session(&self, backend: &str, session_id: String) {
		self
			.per_backend
			.lock()
			.entry(backend.to_string())
			.or_default()
			.backend_session_id = Some(session_id);
	}

	pub fn backend_session(&self, backend: &str) -> Option<String> {
		self
			.per_backend
			.lock()
			.get(backend)
			.and_then(|e| e.backend_session_id.clone())
	}

	pub fn set_last_event_id(&self, backend: &str, event_id: String) {
		self
			.per_backend
			.lock()
			.entry(backend.to_string())
			.or_default()
			.last_event_id = Some(event_id);
	}

	pub fn snapshot(&self) -> HashMap<String, CompositeSessionEntry> {
		self.per_backend.lock().clone()
	}

	pub fn event_sender(&self) -> mpsc::Sender<ServerEvent> {
		self.notifications_tx.lock().clone()
	}

	/// The single consumer of server-to-client traffic (the GET stream).
	pub fn take_notifications(&self) -> Option<mpsc::Receiver<ServerEvent>> {
		self.notifications_rx.lock().take()
	}

	/// After a client reconnect the old receiver is gone; swap in a fresh
	/// channel so drains can be respawned against it.
	pub fn reset_notifications(&self) -> mpsc::Receiver<ServerEvent> {
		let (tx, rx) = mpsc::channel(64);
		*self.notifications_tx.lock() = tx;
		rx
	}

	/// Encrypted snapshot of every backend's last event id; reissued as the
	/// SSE `id:` on each event so a client reconnect can resume all backends.
	pub fn composite_event_id(&self, crypter: &Crypter) -> Result<String, CryptoError> {
		let map: HashMap<String, String> = self
			.per_backend
			.lock()
			.iter()
			.filter_map(|(k, v)| v.last_event_id.clone().map(|id| (k.clone(), id)))
			.collect();
		let json = serde_json::to_vec(&map).map_err(|_| CryptoError::EncryptionFailed)?;
		crypter.encrypt(&json)
	}

	/// Restore per-backend resume points from a client's `Last-Event-ID`.
	pub fn resume_from_event_id(&self, crypter: &Crypter, token: &str) -> Result<(), CryptoError> {
		let plain = crypter.decrypt(token)?;
		let map: HashMap<String, String> =
			serde_json::from_slice(&plain).map_err(|_| CryptoError::InvalidFormat)?;
		let mut sessions = self.per_backend.lock();
		for (backend, id) in map {
			sessions.entry(backend).or_default().last_event_id = Some(id);
		}
		Ok(())
	}
}

pub struct SessionManager {
	crypter: Arc<Crypter>,
	sessions: RwLock<HashMap<String, Arc<Session>>>,
	idle_timeout: Duration,
}

impl SessionManager {
	pub fn new(crypter: Arc<Crypter>) -> Self {
		Self {
			crypter,
			sessions: RwLock::new(HashMap::new()),
			idle_timeout: IDLE_TIMEOUT,
		}
	}

	#[cfg(test)]
	pub fn with_idle_timeout(crypter: Arc<Crypter>, idle_timeout: Duration) -> Self {
		Self {
			crypter,
			sessions: RwLock::new(HashMap::new()),
			idle_timeout,
		}
	}

	pub fn crypter(&self) -> &Arc<Crypter> {
		&self.crypter
	}

	pub fn create(&self, route: &str) -> Result<Arc<Session>, CryptoError> {
		let token = SessionToken {
			uuid: uuid::Uuid::new_v4().to_string(),
			created_unix: SystemTime::now()
				.duration_since(UNIX_EPOCH)
				.map(|d| d.as_secs())
				.unwrap_or_default(),
		};
		let json = serde_json::to_vec(&token).map_err(|_| CryptoError::EncryptionFailed)?;
		let id: Arc<str> = self.crypter.encrypt(&json)?.into();
		let session = Arc::new(Session::new(id.clone(), route.to_string()));
		self.sessions.write().insert(id.to_string(), session.clone());
		Ok(session)
	}

	/// Validates the token cryptographically before the map lookup, so a
	/// forged or foreign id is indistinguishable from an expired one.
	pub fn get(&self, id: &str) -> Result<Arc<Session>, crate::mcp::Error> {
		let plain = self
			.crypter
			.decrypt(id)
			.map_err(|_| crate::mcp::Error::InvalidSessionId)?;
		serde_json::from_slice::<SessionToken>(&plain)
			.map_err(|_| crate::mcp::Error::InvalidSessionId)?;
		let session = self
			.sessions
			.read()
			.get(id)
			.cloned()
			.ok_or(crate::mcp::Error::UnknownSession)?;
		session.touch();
		Ok(session)
	}

	pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
		let session = self.sessions.write().remove(id)?;
		session.cancel.cancel();
		Some(session)
	}

	pub fn sweep(&self) {
		let expired: Vec<String> = self
			.sessions
			.read()
			.iter()
			.filter(|(_, s)| s.idle_for() > self.idle_timeout)
			.map(|(id, _)| id.clone())
			.collect();
		for id in expired {
			debug!("evicting idle MCP session");
			self.remove(&id);
		}
	}

	pub fn len(&self) -> usize {
		self.sessions.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.read().is_empty()
	}

	/// Background sweeper; lives until the returned handle is aborted or the
	/// manager is dropped by the host.
	pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let manager = Arc::downgrade(self);
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(SWEEP_INTERVAL);
			loop {
				interval.tick().await;
				let Some(manager) = manager.upgrade() else {
					return;
				};
				manager.sweep();
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn crypter() -> Arc<Crypter> {
		Arc::new(Crypter::from_secret(None).unwrap())
	}

	#[test]
	fn crypt_round_trip() {
		let c = crypter();
		let token = c.encrypt(b"payload").unwrap();
		assert_eq!(c.decrypt(&token).unwrap(), b"payload");
		// every seal uses a fresh nonce
		assert_ne!(token, c.encrypt(b"payload").unwrap());
	}

	#[test]
	fn forged_tokens_are_rejected() {
		let c = crypter();
		assert!(c.decrypt("not-base64!!").is_err());
		assert!(c.decrypt("YWJjZA").is_err());
		// valid ciphertext under a different key
		let other = crypter();
		let token = other.encrypt(b"payload").unwrap();
		assert!(c.decrypt(&token).is_err());
	}

	#[test]
	fn session_lifecycle() {
		let m = SessionManager::new(crypter());
		let s = m.create("route").unwrap();
		assert_eq!(m.len(), 1);
		let got = m.get(&s.id).unwrap();
		assert_eq!(got.route, "route");
		assert!(matches!(
			m.get("bogus"),
			Err(crate::mcp::Error::InvalidSessionId)
		));
		m.remove(&s.id).unwrap();
		assert!(m.is_empty());
		assert!(s.cancel.is_cancelled());
	}

	#[test]
	fn composite_entries() {
		let m = SessionManager::new(crypter());
		let s = m.create("route").unwrap();
		s.set_backend_session("a", "sess-a".into());
		s.set_last_event_id("a", "5".into());
		s.set_last_event_id("b", "9".into());
		assert_eq!(s.backend_session("a").as_deref(), Some("sess-a"));

		let token = s.composite_event_id(m.crypter()).unwrap();
		let m2 = SessionManager::new(m.crypter().clone());
		let s2 = m2.create("route").unwrap();
		s2.resume_from_event_id(m2.crypter(), &token).unwrap();
		let snap = s2.snapshot();
		assert_eq!(snap["a"].last_event_id.as_deref(), Some("5"));
		assert_eq!(snap["b"].last_event_id.as_deref(), Some("9"));
	}

	#[test]
	fn sweep_evicts_idle_sessions() {
		let m = SessionManager::with_idle_timeout(crypter(), Duration::ZERO);
		let s = m.create("route").unwrap();
		std::thread::sleep(Duration::from_millis(5));
		m.sweep();
		assert!(m.is_empty());
		assert!(s.cancel.is_cancelled());
	}
}
