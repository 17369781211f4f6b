//! Rhai script engine for row expressions.

use crate::error::{Result, RowflowError};
use crate::pipeline::error::ValueError;
use crate::pipeline::row::{Row, Value, ValueType};
use crate::scripting::{CompiledExpression, ScriptCache};
use rhai::{Blob, Dynamic, Engine, Map, Scope};
use std::sync::Mutex;

/// Expression engine with safety limits and row helpers registered.
pub struct ScriptEngine {
    engine: Engine,
    cache: Mutex<ScriptCache>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self {
            engine,
            cache: Mutex::new(ScriptCache::new()),
        }
    }

    fn configure_engine(engine: &mut Engine) {
        // Set safety limits
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(1_000);

        engine.register_fn("is_null", |value: Dynamic| value.is_unit());
        engine.register_fn("coalesce", |value: Dynamic, fallback: Dynamic| {
            if value.is_unit() {
                fallback
            } else {
                value
            }
        });
    }

    /// Compile an expression, reusing the cached AST for identical source.
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledExpression> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|e| RowflowError::Script(format!("Failed to acquire cache lock: {}", e)))?;
        cache.get_or_compile(&self.engine, name, source)
    }

    /// Evaluate `expression` with the fields of `row` in scope.
    pub fn eval_row(&self, expression: &CompiledExpression, row: &Row) -> Result<Dynamic> {
        let mut scope = Scope::new();
        let mut fields = Map::new();
        for (field, value) in row.schema().fields().iter().zip(row.values()) {
            let dynamic = value_to_dynamic(value);
            fields.insert(field.name.as_str().into(), dynamic.clone());
            scope.push_dynamic(field.name.as_str(), dynamic);
        }
        scope.push_constant("row", fields);

        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, expression.ast())
            .map_err(|e| RowflowError::Script(format!("Execution error: {}", e)))
    }

    /// Evaluate a predicate; anything other than a boolean is an error.
    pub fn eval_predicate(&self, expression: &CompiledExpression, row: &Row) -> Result<bool> {
        let result = self.eval_row(expression, row)?;
        result.as_bool().map_err(|type_name| {
            RowflowError::Script(format!("Predicate returned {} instead of a boolean", type_name))
        })
    }

    /// Validate an expression without caching it
    pub fn validate(&self, source: &str) -> Result<()> {
        self.engine
            .compile_expression(source)
            .map(|_| ())
            .map_err(|e| RowflowError::Script(format!("Validation error: {}", e)))
    }

    /// Number of distinct expressions compiled so far.
    pub fn cached_expressions(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("cache_size", &self.cached_expressions())
            .finish()
    }
}

/// Field value as seen by scripts.
pub fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Number(v) => Dynamic::from(*v),
        Value::Integer(v) => Dynamic::from(*v),
        Value::BigNumber(s) => match s.trim().parse::<f64>() {
            Ok(v) => Dynamic::from(v),
            Err(_) => Dynamic::from(s.clone()),
        },
        Value::Date(d) => Dynamic::from(d.to_rfc3339()),
        Value::Boolean(b) => Dynamic::from(*b),
        Value::Binary(b) => Dynamic::from_blob(b.clone()),
    }
}

/// Script result as a field value, converted to `target` when given.
pub fn dynamic_to_value(value: Dynamic, target: Option<ValueType>) -> std::result::Result<Value, ValueError> {
    let natural = if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Boolean(b)
    } else if let Ok(i) = value.as_int() {
        Value::Integer(i)
    } else if let Ok(f) = value.as_float() {
        Value::Number(f)
    } else if value.is_string() {
        Value::String(value.into_string().unwrap_or_default())
    } else if value.is_blob() {
        value.try_cast::<Blob>().map(Value::Binary).unwrap_or_default()
    } else {
        Value::String(value.to_string())
    };
    match target {
        Some(target) => natural.convert(target),
        None => Ok(natural),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::{FieldMeta, Schema};
    use std::sync::Arc;

    fn order_row() -> Row {
        let schema = Schema::new(vec![
            FieldMeta::new("customer", ValueType::String),
            FieldMeta::new("amount", ValueType::Number),
            FieldMeta::new("qty", ValueType::Integer),
            FieldMeta::new("unit price", ValueType::Number),
            FieldMeta::new("note", ValueType::String),
        ])
        .unwrap();
        Row::new(
            Arc::new(schema),
            vec![
                Value::from("acme"),
                Value::Number(120.5),
                Value::Integer(3),
                Value::Number(2.5),
                Value::Null,
            ],
        )
    }

    #[test]
    fn test_fields_in_scope() {
        let engine = ScriptEngine::new();
        let expr = engine.compile("t", "qty * 2").unwrap();
        let result = engine.eval_row(&expr, &order_row()).unwrap();
        assert_eq!(result.as_int().unwrap(), 6);
    }

    #[test]
    fn test_row_map_access() {
        let engine = ScriptEngine::new();
        let expr = engine.compile("t", r#"row["unit price"] * 2.0"#).unwrap();
        let result = engine.eval_row(&expr, &order_row()).unwrap();
        assert_eq!(result.as_float().unwrap(), 5.0);
    }

    #[test]
    fn test_null_helpers() {
        let engine = ScriptEngine::new();
        let expr = engine.compile("t", r#"is_null(note) && coalesce(note, "none") == "none""#).unwrap();
        assert!(engine.eval_predicate(&expr, &order_row()).unwrap());
    }

    #[test]
    fn test_predicate_must_be_boolean() {
        let engine = ScriptEngine::new();
        let expr = engine.compile("t", "amount").unwrap();
        assert!(matches!(
            engine.eval_predicate(&expr, &order_row()),
            Err(RowflowError::Script(_))
        ));
    }

    #[test]
    fn test_deep_expression_is_rejected() {
        let engine = ScriptEngine::new();
        let source = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(engine.compile("t", &source).is_err());
    }

    #[test]
    fn test_dynamic_to_value_conversion() {
        assert_eq!(dynamic_to_value(Dynamic::from(7_i64), None).unwrap(), Value::Integer(7));
        assert_eq!(
            dynamic_to_value(Dynamic::from(7_i64), Some(ValueType::String)).unwrap(),
            Value::from("7")
        );
        assert_eq!(dynamic_to_value(Dynamic::UNIT, Some(ValueType::Integer)).unwrap(), Value::Null);
        assert!(dynamic_to_value(Dynamic::from("x".to_string()), Some(ValueType::Integer)).is_err());
    }

    #[test]
    fn test_identical_source_compiles_once() {
        let engine = ScriptEngine::new();
        let first = engine.compile("a", "qty * 2").unwrap();
        let second = engine.compile("b", "qty * 2").unwrap();
        engine.compile("c", "qty * 3").unwrap();
        assert_eq!(first.source(), second.source());
        assert_eq!(engine.cached_expressions(), 2);
    }

    #[test]
    fn test_validate() {
        let engine = ScriptEngine::new();
        assert!(engine.validate("a + b").is_ok());
        assert!(engine.validate("a +").is_err());
    }
}
