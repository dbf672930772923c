//! Route-rule matching. The front proxy owns final backend placement; this
//! picks the rule (and a weighted backend within it) that the router stage
//! advertises back via the selected-route header.

use rand::Rng;

use crate::config::{Route, RouteRule};
use crate::http::HeaderMap;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RouterError {
	#[error("no matching rule")]
	NoMatch,
	#[error("rule {0} has no backends")]
	NoBackends(String),
}

/// First rule whose matchers all hold wins. Matching is exact and
/// case-insensitive on header names, exact on values.
pub fn calculate<'a>(route: &'a Route, headers: &HeaderMap) -> Result<&'a RouteRule, RouterError> {
	route
		.rules
		.iter()
		.find(|rule| {
			rule
				.headers
				.iter()
				.all(|m| headers.get(&m.name) == Some(m.value.as_str()))
		})
		.ok_or(RouterError::NoMatch)
}

/// Weighted-random backend pick within a matched rule.
pub fn pick_backend(rule: &RouteRule) -> Result<&str, RouterError> {
	let total: u64 = rule.backend_refs.iter().map(|b| b.weight as u64).sum();
	if total == 0 {
		return Err(RouterError::NoBackends(rule.name.clone()));
	}
	let mut point = rand::rng().random_range(0..total);
	for b in &rule.backend_refs {
		if point < b.weight as u64 {
			return Ok(&b.name);
		}
		point -= b.weight as u64;
	}
	unreachable!("point is bounded by the weight sum");
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{HeaderMatch, WeightedBackend};
	use crate::llm::RouteType;

	fn route() -> Route {
		Route {
			name: "chat".into(),
			route_type: RouteType::Completions,
			rules: vec![
				RouteRule {
					name: "gpt".into(),
					headers: vec![HeaderMatch {
						name: "x-ai-eg-model".into(),
						value: "gpt-5-nano".into(),
					}],
					backend_refs: vec![WeightedBackend {
						name: "openai".into(),
						weight: 1,
					}],
				},
				RouteRule {
					name: "fallback".into(),
					headers: vec![],
					backend_refs: vec![
						WeightedBackend {
							name: "a".into(),
							weight: 1,
						},
						WeightedBackend {
							name: "b".into(),
							weight: 3,
						},
					],
				},
			],
			model_name_header_key: "x-ai-eg-model".into(),
			request_costs: vec![],
			metadata_namespace: "ai_gateway_llm_ns".into(),
		}
	}

	#[test]
	fn matches_in_order() {
		let r = route();
		let mut headers = HeaderMap::default();
		headers.set("X-AI-EG-Model", "gpt-5-nano");
		assert_eq!(calculate(&r, &headers).unwrap().name, "gpt");

		headers.set("x-ai-eg-model", "other");
		assert_eq!(calculate(&r, &headers).unwrap().name, "fallback");
	}

	#[test]
	fn no_rules_is_no_match() {
		let mut r = route();
		r.rules.clear();
		assert!(matches!(
			calculate(&r, &HeaderMap::default()),
			Err(RouterError::NoMatch)
		));
	}

	#[test]
	fn weighted_pick_respects_weights() {
		let r = route();
		let rule = &r.rules[1];
		let mut saw_a = false;
		let mut saw_b = false;
		for _ in 0..200 {
			match pick_backend(rule).unwrap() {
				"a" => saw_a = true,
				"b" => saw_b = true,
				other => panic!("unexpected backend {other}"),
			}
		}
		assert!(saw_a && saw_b);
	}

	#[test]
	fn zero_weight_rule_errors() {
		let rule = RouteRule {
			name: "empty".into(),
			headers: vec![],
			backend_refs: vec![],
		};
		assert!(matches!(
			pick_backend(&rule),
			Err(RouterError::NoBackends(_))
		));
	}
}
