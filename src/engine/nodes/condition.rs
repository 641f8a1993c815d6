use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::node::{
    ExecutionContext, NodeConfig, NodeError, NodeOutput, ValidationError, WorkflowNode,
};
use crate::engine::templating::{lookup_path, parse_flexible_value, render};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConditionConfig {
    pub field: Option<String>,
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Value,
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
}

impl ConditionOperator {
    /// Accepts both the symbolic and the worded form used by the editor.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        Some(match normalized.as_str() {
            "==" | "=" | "equals" | "eq" => ConditionOperator::Equals,
            "!=" | "not equals" | "neq" => ConditionOperator::NotEquals,
            ">" | "greater than" | "gt" => ConditionOperator::GreaterThan,
            "<" | "less than" | "lt" => ConditionOperator::LessThan,
            ">=" | "greater than or equal" | "gte" => ConditionOperator::GreaterThanOrEqual,
            "<=" | "less than or equal" | "lte" => ConditionOperator::LessThanOrEqual,
            "contains" => ConditionOperator::Contains,
            _ => return None,
        })
    }

    pub fn apply(&self, left: &Value, right: &Value) -> bool {
        match self {
            ConditionOperator::Equals => values_equal(left, right),
            ConditionOperator::NotEquals => !values_equal(left, right),
            ConditionOperator::GreaterThan => compare_order(left, right, ValueOrdering::Greater),
            ConditionOperator::LessThan => compare_order(left, right, ValueOrdering::Less),
            ConditionOperator::GreaterThanOrEqual => {
                compare_order(left, right, ValueOrdering::Equal)
                    || compare_order(left, right, ValueOrdering::Greater)
            }
            ConditionOperator::LessThanOrEqual => {
                compare_order(left, right, ValueOrdering::Equal)
                    || compare_order(left, right, ValueOrdering::Less)
            }
            ConditionOperator::Contains => match (left, value_as_string(right)) {
                (Value::Array(items), _) => items.iter().any(|item| values_equal(item, right)),
                (_, Some(needle)) => value_as_string(left)
                    .map(|haystack| haystack.contains(&needle))
                    .unwrap_or(false),
                _ => false,
            },
        }
    }
}

fn parse_expression(expr: &str) -> Option<(ConditionOperator, String, String)> {
    const OPERATORS: &[(&str, ConditionOperator)] = &[
        (" contains ", ConditionOperator::Contains),
        (">=", ConditionOperator::GreaterThanOrEqual),
        ("<=", ConditionOperator::LessThanOrEqual),
        ("==", ConditionOperator::Equals),
        ("!=", ConditionOperator::NotEquals),
        (">", ConditionOperator::GreaterThan),
        ("<", ConditionOperator::LessThan),
    ];

    for (pattern, op) in OPERATORS {
        if let Some((left, right)) = expr.split_once(pattern) {
            return Some((*op, left.trim().to_string(), right.trim().to_string()));
        }
    }
    None
}

/// A path into the context when it resolves, otherwise a literal.
fn resolve_operand(raw: &str, context: &Value) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Some(val) = lookup_path(context, trimmed) {
        return val;
    }
    parse_flexible_value(&render(trimmed, context))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => left == right || value_as_string(left) == value_as_string(right),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ValueOrdering {
    Greater,
    Less,
    Equal,
}

fn compare_order(left: &Value, right: &Value, ordering: ValueOrdering) -> bool {
    if let (Some(a), Some(b)) = (value_as_f64(left), value_as_f64(right)) {
        return match ordering {
            ValueOrdering::Greater => a > b,
            ValueOrdering::Less => a < b,
            ValueOrdering::Equal => (a - b).abs() < f64::EPSILON,
        };
    }
    if let (Some(a), Some(b)) = (value_as_string(left), value_as_string(right)) {
        return match ordering {
            ValueOrdering::Greater => a > b,
            ValueOrdering::Less => a < b,
            ValueOrdering::Equal => a == b,
        };
    }
    false
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Evaluates either a free-form `expression` or a `field`/`operator`/`value`
/// triple against the outputs gathered so far.
#[derive(Default)]
pub struct ConditionNode {
    config: NodeConfig<ConditionConfig>,
}

impl ConditionNode {
    fn expression(config: &ConditionConfig) -> Option<&str> {
        config
            .expression
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

#[async_trait]
impl WorkflowNode for ConditionNode {
    fn node_type(&self) -> &str {
        "condition"
    }

    fn configure(&mut self, config: &Value) {
        self.config.merge(config);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let config = self.config.get()?;
        if let Some(expression) = Self::expression(config) {
            return parse_expression(expression).map(|_| ()).ok_or_else(|| {
                ValidationError::new("expression", "Unsupported condition expression")
            });
        }

        let field = config.field.as_deref().map(str::trim).unwrap_or("");
        if field.is_empty() {
            return Err(ValidationError::required("field", "Condition field"));
        }
        let operator = config.operator.as_deref().map(str::trim).unwrap_or("");
        if operator.is_empty() {
            return Err(ValidationError::required("operator", "Condition operator"));
        }
        ConditionOperator::parse(operator).map(|_| ()).ok_or_else(|| {
            ValidationError::new("operator", format!("Unsupported condition operator {operator}"))
        })
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<NodeOutput, NodeError> {
        self.validate()?;
        let config = self.config.get()?;
        let context = ctx.template_context();

        let (op, left, right) = match Self::expression(config) {
            Some(expression) => {
                let (op, left_raw, right_raw) = parse_expression(expression).ok_or_else(|| {
                    ValidationError::new("expression", "Unsupported condition expression")
                })?;
                (
                    op,
                    resolve_operand(&left_raw, &context),
                    resolve_operand(&right_raw, &context),
                )
            }
            None => {
                let field = config.field.as_deref().unwrap_or_default();
                let op = config
                    .operator
                    .as_deref()
                    .and_then(ConditionOperator::parse)
                    .ok_or_else(|| ValidationError::required("operator", "Condition operator"))?;
                let expected = match &config.value {
                    Value::String(raw) => resolve_operand(raw, &context),
                    other => other.clone(),
                };
                (op, resolve_operand(field, &context), expected)
            }
        };

        Ok(NodeOutput::executed(json!({"result": op.apply(&left, &right)})))
    }
}
