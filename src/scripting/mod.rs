//! Rhai expressions evaluated against rows.
//!
//! The `script` step compiles one expression and evaluates it once per row.
//! Every field of the row is in scope twice:
//!
//! - as a variable named after the field (`amount`, `customer`), when the
//!   name is a valid identifier
//! - in the `row` map, for any name (`row["unit price"]`)
//!
//! Field values map to Rhai types as follows: `Integer` → `i64`,
//! `Number` → `f64`, `String` → string, `Boolean` → `bool`,
//! `Binary` → blob, `BigNumber` → `f64` when it parses (string otherwise),
//! `Date` → RFC 3339 string, `Null` → `()`.
//!
//! ## Helper Functions
//!
//! - `is_null(x)` - true when `x` is a null field
//! - `coalesce(x, fallback)` - `x` unless it is null
//!
//! ## Example Expressions
//!
//! Derived field:
//! ```rhai
//! amount * 1.21
//! ```
//!
//! Predicate (a `script` step without a target field keeps matching rows):
//! ```rhai
//! coalesce(country, "") == "BE" && amount > 100
//! ```

mod engine;

pub use engine::{dynamic_to_value, value_to_dynamic, ScriptEngine};

use crate::error::{Result, RowflowError};
use rhai::{Engine, AST};
use std::collections::HashMap;

/// A compiled expression that can be evaluated repeatedly.
#[derive(Clone)]
pub struct CompiledExpression {
    ast: AST,
    source: String,
    name: String,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name of the step that owns the expression.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }
}

impl std::fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

/// Compiled expressions keyed by source text.
#[derive(Default)]
pub struct ScriptCache {
    cache: HashMap<String, CompiledExpression>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached expression or compile and cache it
    pub fn get_or_compile(
        &mut self,
        engine: &Engine,
        name: &str,
        source: &str,
    ) -> Result<CompiledExpression> {
        if let Some(expression) = self.cache.get(source) {
            return Ok(expression.clone());
        }

        let ast = engine
            .compile_expression(source)
            .map_err(|e| RowflowError::Script(format!("Compilation error in '{}': {}", name, e)))?;

        let expression = CompiledExpression {
            ast,
            source: source.to_string(),
            name: name.to_string(),
        };
        self.cache.insert(source.to_string(), expression.clone());
        Ok(expression)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
