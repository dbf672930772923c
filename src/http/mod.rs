//! HTTP plumbing shared by the processor and the translators: the
//! pseudo-header-capable header map the external-processing protocol carries,
//! and the mutation types translators and mutators produce.

pub mod auth;
pub mod compression;
pub mod mutation;

/// Ordered, case-insensitive header map. Unlike `http::HeaderMap` this admits
/// the `:path`/`:method` pseudo-headers the front proxy streams to us.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
	entries: Vec<(String, String)>,
}

impl HeaderMap {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self
			.entries
			.iter()
			.find(|(n, _)| n.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}

	pub fn contains(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	/// Replace-or-append.
	pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
		let name = name.into();
		let value = value.into();
		match self
			.entries
			.iter_mut()
			.find(|(n, _)| n.eq_ignore_ascii_case(&name))
		{
			Some((_, v)) => *v = value,
			None => self.entries.push((name, value)),
		}
	}

	pub fn remove(&mut self, name: &str) {
		self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn path(&self) -> Option<&str> {
		self.get(":path")
	}

	pub fn method(&self) -> Option<&str> {
		self.get(":method")
	}

	pub fn status(&self) -> Option<u16> {
		self.get(":status").and_then(|s| s.parse().ok())
	}
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
	fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
		let mut map = HeaderMap::new();
		for (n, v) in iter {
			map.set(n, v);
		}
		map
	}
}

/// Header edits to hand back to the front proxy. Order matters: removals
/// apply before sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMutation {
	pub remove: Vec<String>,
	pub set: Vec<(String, String)>,
}

impl HeaderMutation {
	pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
		self.set.push((name.into(), value.into()));
		self
	}

	pub fn remove(&mut self, name: impl Into<String>) -> &mut Self {
		self.remove.push(name.into());
		self
	}

	pub fn is_empty(&self) -> bool {
		self.set.is_empty() && self.remove.is_empty()
	}

	pub fn merge(&mut self, other: HeaderMutation) {
		self.remove.extend(other.remove);
		self.set.extend(other.set);
	}

	/// Mirror the mutation into a live header map so later stages observe the
	/// same view the proxy will.
	pub fn apply(&self, headers: &mut HeaderMap) {
		for name in &self.remove {
			headers.remove(name);
		}
		for (name, value) in &self.set {
			headers.set(name.clone(), value.clone());
		}
	}
}

/// Body replacement. `None` means "forward the original bytes".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyMutation {
	pub body: Option<Vec<u8>>,
}

impl BodyMutation {
	pub fn replace(body: Vec<u8>) -> Self {
		BodyMutation { body: Some(body) }
	}
}
