//! Request-cost expressions. Each configured CEL cost compiles once at config
//! load and evaluates against the transaction's final token counts.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ::cel::{Context, Program, Value};
use serde::{Deserialize, Serialize, Serializer};

use crate::llm::LLMTokenUsage;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("parse: {0}")]
	Parse(String),
	#[error("execution: {0}")]
	Resolve(String),
	#[error("expression must evaluate to an integer, got {0}")]
	NotAnInteger(String),
}

pub struct Expression {
	program: Arc<Program>,
	original_expression: String,
}

impl Clone for Expression {
	fn clone(&self) -> Self {
		Self {
			program: self.program.clone(),
			original_expression: self.original_expression.clone(),
		}
	}
}

impl Debug for Expression {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Expression")
			.field("expression", &self.original_expression)
			.finish()
	}
}

impl Serialize for Expression {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.original_expression)
	}
}

impl<'de> Deserialize<'de> for Expression {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let e = String::deserialize(deserializer)?;
		// Config parsing is strict; a bad expression fails the whole config.
		Expression::new(&e).map_err(|e| serde::de::Error::custom(e.to_string()))
	}
}

impl Expression {
	pub fn new(expression: &str) -> Result<Self, Error> {
		let program = Program::compile(expression).map_err(|e| Error::Parse(e.to_string()))?;
		Ok(Self {
			program: Arc::new(program),
			original_expression: expression.to_string(),
		})
	}

	pub fn source(&self) -> &str {
		&self.original_expression
	}

	/// Evaluate against the final token counts of one transaction. The result
	/// must be a non-negative integer.
	pub fn eval_cost(
		&self,
		usage: &LLMTokenUsage,
		request_model: &str,
		backend: &str,
	) -> Result<u64, Error> {
		let mut ctx = Context::default();
		ctx.add_variable_from_value("input_tokens", Value::UInt(usage.input));
		ctx.add_variable_from_value("cached_input_tokens", Value::UInt(usage.cached_input));
		ctx.add_variable_from_value("output_tokens", Value::UInt(usage.output));
		ctx.add_variable_from_value("total_tokens", Value::UInt(usage.total));
		ctx.add_variable_from_value("request_model", request_model.to_string());
		ctx.add_variable_from_value("backend", backend.to_string());

		let out = self
			.program
			.execute(&ctx)
			.map_err(|e| Error::Resolve(e.to_string()))?;
		match out {
			Value::UInt(v) => Ok(v),
			Value::Int(v) if v >= 0 => Ok(v as u64),
			other => Err(Error::NotAnInteger(format!("{other:?}"))),
		}
	}
}
