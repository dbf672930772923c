//! Config-driven request mutation: header add/remove/overwrite and
//! dotted-path JSON body edits, applied per backend after translation.

use serde_json::Value;

use crate::config::{BodyMutationSpec, HeaderMutationSpec};
use crate::http::{HeaderMap, HeaderMutation};

/// Applies a backend's header mutation spec. Keeps a copy of the original
/// request headers so a retry can restore values an earlier attempt removed.
#[derive(Debug, Clone)]
pub struct HeaderMutator {
	spec: HeaderMutationSpec,
	original: HeaderMap,
}

impl HeaderMutator {
	pub fn new(spec: Option<&HeaderMutationSpec>, original: HeaderMap) -> Self {
		Self {
			spec: spec.cloned().unwrap_or_default(),
			original,
		}
	}

	pub fn mutate(&self, headers: &mut HeaderMap, on_retry: bool) -> HeaderMutation {
		let mut mutation = HeaderMutation::default();
		for name in &self.spec.remove {
			mutation.remove(name.clone());
		}
		for hv in &self.spec.set {
			mutation.set(hv.name.clone(), hv.value.clone());
		}
		if on_retry {
			// A previous attempt may have dropped headers this attempt needs;
			// restore any original value that is gone and not being set here.
			for (name, value) in self.original.iter() {
				let overwritten = self
					.spec
					.set
					.iter()
					.any(|hv| hv.name.eq_ignore_ascii_case(name));
				let removed = self
					.spec
					.remove
					.iter()
					.any(|r| r.eq_ignore_ascii_case(name));
				if !overwritten && !removed && !headers.contains(name) {
					mutation.set(name.to_string(), value.to_string());
				}
			}
		}
		mutation.apply(headers);
		mutation
	}
}

/// Applies a backend's dotted-path body edits. Numeric path segments index
/// arrays; intermediate objects are created on set.
#[derive(Debug, Clone, Default)]
pub struct BodyMutator {
	spec: BodyMutationSpec,
}

impl BodyMutator {
	pub fn new(spec: Option<&BodyMutationSpec>) -> Self {
		Self {
			spec: spec.cloned().unwrap_or_default(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.spec.set.is_empty() && self.spec.remove.is_empty()
	}

	/// Returns true when the body changed.
	pub fn mutate(&self, body: &mut Value) -> bool {
		let mut changed = false;
		for path in &self.spec.remove {
			changed |= remove_path(body, path);
		}
		for fv in &self.spec.set {
			changed |= set_path(body, &fv.path, fv.value.clone());
		}
		changed
	}
}

fn set_path(root: &mut Value, path: &str, value: Value) -> bool {
	let Some((parent_path, leaf)) = split_last(path) else {
		return false;
	};
	let parent = match parent_path {
		Some(p) => match lookup_or_create_mut(root, p) {
			Some(v) => v,
			None => return false,
		},
		None => root,
	};
	if let Ok(idx) = leaf.parse::<usize>()
		&& parent.is_array()
	{
		let Some(slot) = parent.get_mut(idx) else {
			return false;
		};
		*slot = value;
		return true;
	}
	match parent.as_object_mut() {
		Some(obj) => {
			obj.insert(leaf.to_string(), value);
			true
		},
		None => false,
	}
}

/// Walk a dotted path, creating intermediate objects; arrays are indexed but
/// never grown.
fn lookup_or_create_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
	let mut current = root;
	for seg in path.split('.') {
		if let Ok(idx) = seg.parse::<usize>()
			&& current.is_array()
		{
			current = current.get_mut(idx)?;
			continue;
		}
		if !current.is_object() {
			return None;
		}
		current = current
			.as_object_mut()?
			.entry(seg.to_string())
			.or_insert_with(|| Value::Object(Default::default()));
	}
	Some(current)
}

fn remove_path(root: &mut Value, path: &str) -> bool {
	let Some((parent_path, leaf)) = split_last(path) else {
		return false;
	};
	let parent = match parent_path {
		Some(p) => match lookup_mut(root, p) {
			Some(v) => v,
			None => return false,
		},
		None => root,
	};
	if let Ok(idx) = leaf.parse::<usize>()
		&& let Some(arr) = parent.as_array_mut()
	{
		if idx < arr.len() {
			arr.remove(idx);
			return true;
		}
		return false;
	}
	match parent.as_object_mut() {
		Some(obj) => obj.remove(leaf).is_some(),
		None => false,
	}
}

fn split_last(path: &str) -> Option<(Option<&str>, &str)> {
	if path.is_empty() {
		return None;
	}
	match path.rsplit_once('.') {
		Some((parent, leaf)) => Some((Some(parent), leaf)),
		None => Some((None, path)),
	}
}

fn lookup_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
	let mut current = root;
	for seg in path.split('.') {
		if let Ok(idx) = seg.parse::<usize>()
			&& current.is_array()
		{
			current = current.get_mut(idx)?;
			continue;
		}
		current = current.as_object_mut()?.get_mut(seg)?;
	}
	Some(current)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::config::{FieldValue, HeaderValue};

	#[test]
	fn header_mutator_basics() {
		let spec = HeaderMutationSpec {
			set: vec![HeaderValue {
				name: "x-extra".into(),
				value: "1".into(),
			}],
			remove: vec!["x-strip".into()],
		};
		let original: HeaderMap = [("x-strip", "s"), ("x-keep", "k")].into_iter().collect();
		let m = HeaderMutator::new(Some(&spec), original.clone());

		let mut headers = original.clone();
		let mutation = m.mutate(&mut headers, false);
		assert!(!headers.contains("x-strip"));
		assert_eq!(headers.get("x-extra"), Some("1"));
		assert_eq!(mutation.remove, vec!["x-strip".to_string()]);
	}

	#[test]
	fn header_mutator_restores_on_retry() {
		let m = HeaderMutator::new(
			None,
			[("x-original", "v"), ("x-kept", "k")].into_iter().collect(),
		);
		// simulate a prior attempt that dropped x-original
		let mut headers: HeaderMap = [("x-kept", "k")].into_iter().collect();
		m.mutate(&mut headers, true);
		assert_eq!(headers.get("x-original"), Some("v"));

		// not restored when this backend's spec removes it
		let spec = HeaderMutationSpec {
			set: vec![],
			remove: vec!["x-original".into()],
		};
		let m = HeaderMutator::new(Some(&spec), [("x-original", "v")].into_iter().collect());
		let mut headers = HeaderMap::new();
		m.mutate(&mut headers, true);
		assert!(!headers.contains("x-original"));
	}

	#[test]
	fn body_mutator_set_and_remove() {
		let spec = BodyMutationSpec {
			set: vec![
				FieldValue {
					path: "metadata.user".into(),
					value: json!("alice"),
				},
				FieldValue {
					path: "messages.0.name".into(),
					value: json!("sys"),
				},
			],
			remove: vec!["temperature".into()],
		};
		let m = BodyMutator::new(Some(&spec));
		let mut body = json!({
			"model": "m",
			"temperature": 0.5,
			"messages": [{"role": "system"}]
		});
		assert!(m.mutate(&mut body));
		assert_eq!(
			body,
			json!({
				"model": "m",
				"messages": [{"role": "system", "name": "sys"}],
				"metadata": {"user": "alice"}
			})
		);
	}

	#[test]
	fn body_mutator_missing_paths_are_noops() {
		let spec = BodyMutationSpec {
			set: vec![FieldValue {
				path: "messages.9.name".into(),
				value: json!("x"),
			}],
			remove: vec!["a.b.c".into()],
		};
		let m = BodyMutator::new(Some(&spec));
		let mut body = json!({"messages": []});
		assert!(!m.mutate(&mut body));
	}
}
