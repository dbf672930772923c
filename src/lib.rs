use std::sync::Arc;

pub mod cel;
pub mod config;
pub mod extproc;
pub mod http;
pub mod llm;
pub mod mcp;
pub mod parse;
pub mod router;
pub mod telemetry;

/// Version reported in the MCP `serverInfo` and in diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// A read handle on the current configuration generation. Hot reload swaps the
/// inner pointer; in-flight transactions keep the generation they started with.
#[derive(Clone)]
pub struct ConfigStore {
	inner: Arc<arc_swap::ArcSwap<config::Config>>,
}

impl ConfigStore {
	pub fn new(cfg: config::Config) -> Self {
		Self {
			inner: Arc::new(arc_swap::ArcSwap::from_pointee(cfg)),
		}
	}

	pub fn load(&self) -> Arc<config::Config> {
		self.inner.load_full()
	}

	pub fn publish(&self, cfg: config::Config) {
		self.inner.store(Arc::new(cfg));
	}
}
