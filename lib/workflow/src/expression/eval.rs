//! Expression evaluation against an item context.

use super::ast::{BinaryOp, Expr, Root, UnaryOp};
use crate::error::ExpressionError;
use crate::item::{Item, ItemList};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Number, Value as JsonValue, json};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Upstream node outputs visible to `$node`, keyed by node name.
///
/// Each entry holds the node's first non-empty output port.
pub type NodeOutputs = HashMap<String, ItemList>;

/// Everything an expression can see while it is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// The current item, if there is one.
    pub item: Option<&'a Item>,
    /// Position of the current item in `items`.
    pub index: usize,
    /// All items on the node's primary input.
    pub items: &'a [Item],
    /// Outputs of nodes that already ran.
    pub nodes: &'a NodeOutputs,
    /// Evaluation clock.
    pub now: DateTime<Utc>,
}

impl<'a> EvalContext<'a> {
    /// Context for the item at `index`.
    #[must_use]
    pub fn for_item(items: &'a [Item], index: usize, nodes: &'a NodeOutputs, now: DateTime<Utc>) -> Self {
        Self {
            item: items.get(index),
            index,
            items,
            nodes,
            now,
        }
    }
}

/// JavaScript-style truthiness.
#[must_use]
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// Renders a value for text interpolation: strings verbatim, null as empty.
#[must_use]
pub fn to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &JsonValue) -> Option<Self> {
        let n = value.as_number()?;
        n.as_i64()
            .map(Self::Int)
            .or_else(|| n.as_f64().map(Self::Float))
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    fn into_json(self) -> JsonValue {
        match self {
            Self::Int(i) => JsonValue::from(i),
            Self::Float(f) => Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number),
        }
    }
}

fn num_cmp(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

/// Evaluates an expression.
///
/// # Errors
///
/// Returns `TypeMismatch` when an operator meets operands it cannot handle,
/// including member access on null outside an optional chain.
pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>) -> Result<JsonValue, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Array(elements) => elements
            .iter()
            .map(|e| evaluate(e, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        Expr::Root(root) => Ok(root_value(*root, ctx)),
        Expr::NodeRef(name) => Ok(match ctx.nodes.get(name) {
            Some(items) if !items.is_empty() => json!({
                "json": items[0].json(),
                "items": items.iter().map(Item::json).collect::<Vec<_>>(),
            }),
            _ => JsonValue::Null,
        }),
        Expr::Member {
            object,
            field,
            optional,
        } => member(evaluate(object, ctx)?, field, *optional),
        Expr::Index {
            object,
            index,
            optional,
        } => {
            let object = evaluate(object, ctx)?;
            if object.is_null() && *optional {
                return Ok(JsonValue::Null);
            }
            let index = evaluate(index, ctx)?;
            index_value(object, &index)
        }
        Expr::Unary(op, operand) => {
            let value = evaluate(operand, ctx)?;
            match op {
                UnaryOp::Not => Ok(JsonValue::Bool(!is_truthy(&value))),
                UnaryOp::Negate => match Num::of(&value) {
                    Some(Num::Int(i)) => Ok(i
                        .checked_neg()
                        .map_or_else(|| Num::Float(-(i as f64)).into_json(), JsonValue::from)),
                    Some(Num::Float(f)) => Ok(Num::Float(-f).into_json()),
                    None => Err(ExpressionError::mismatch(format!(
                        "cannot negate {}",
                        type_name(&value)
                    ))),
                },
            }
        }
        Expr::And(left, right) => {
            let left = evaluate(left, ctx)?;
            if is_truthy(&left) {
                evaluate(right, ctx)
            } else {
                Ok(left)
            }
        }
        Expr::Or(left, right) => {
            let left = evaluate(left, ctx)?;
            if is_truthy(&left) {
                Ok(left)
            } else {
                evaluate(right, ctx)
            }
        }
        Expr::Coalesce(left, right) => {
            let left = evaluate(left, ctx)?;
            if left.is_null() {
                evaluate(right, ctx)
            } else {
                Ok(left)
            }
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if is_truthy(&evaluate(condition, ctx)?) {
                evaluate(then, ctx)
            } else {
                evaluate(otherwise, ctx)
            }
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            binary(*op, &left, &right)
        }
    }
}

fn root_value(root: Root, ctx: &EvalContext<'_>) -> JsonValue {
    match root {
        Root::Json => ctx.item.map_or(JsonValue::Null, |item| item.json().clone()),
        Root::Index => JsonValue::from(ctx.index),
        Root::Items => JsonValue::Array(ctx.items.iter().map(|i| i.json().clone()).collect()),
        Root::Now => JsonValue::String(ctx.now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Root::Today => JsonValue::String(ctx.now.date_naive().to_string()),
    }
}

fn member(object: JsonValue, field: &str, optional: bool) -> Result<JsonValue, ExpressionError> {
    match object {
        JsonValue::Null if optional => Ok(JsonValue::Null),
        JsonValue::Null => Err(ExpressionError::mismatch(format!(
            "cannot read '{field}' of null"
        ))),
        JsonValue::Object(mut map) => Ok(map.remove(field).unwrap_or(JsonValue::Null)),
        JsonValue::Array(values) if field == "length" => Ok(JsonValue::from(values.len())),
        JsonValue::String(s) if field == "length" => Ok(JsonValue::from(s.chars().count())),
        _ => Ok(JsonValue::Null),
    }
}

fn index_value(object: JsonValue, index: &JsonValue) -> Result<JsonValue, ExpressionError> {
    match (object, index) {
        (JsonValue::Object(mut map), JsonValue::String(key)) => {
            Ok(map.remove(key).unwrap_or(JsonValue::Null))
        }
        (JsonValue::Array(mut values), JsonValue::Number(n)) => Ok(n
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .filter(|i| *i < values.len())
            .map_or(JsonValue::Null, |i| values.swap_remove(i))),
        (JsonValue::String(s), JsonValue::Number(n)) => Ok(n
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| s.chars().nth(i))
            .map_or(JsonValue::Null, |c| JsonValue::String(c.to_string()))),
        (object, index) => Err(ExpressionError::mismatch(format!(
            "cannot index {} with {}",
            type_name(&object),
            type_name(index)
        ))),
    }
}

fn binary(op: BinaryOp, left: &JsonValue, right: &JsonValue) -> Result<JsonValue, ExpressionError> {
    match op {
        BinaryOp::Equal => Ok(JsonValue::Bool(loose_eq(left, right))),
        BinaryOp::NotEqual => Ok(JsonValue::Bool(!loose_eq(left, right))),
        BinaryOp::StrictEqual => Ok(JsonValue::Bool(strict_eq(left, right))),
        BinaryOp::StrictNotEqual => Ok(JsonValue::Bool(!strict_eq(left, right))),
        BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual => compare(op, left, right),
        BinaryOp::Add if left.is_string() || right.is_string() => {
            Ok(JsonValue::String(to_text(left) + &to_text(right)))
        }
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Remainder => arithmetic(op, left, right),
    }
}

fn loose_eq(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(_), JsonValue::Number(_)) => strict_eq(left, right),
        (JsonValue::Number(n), JsonValue::String(s)) | (JsonValue::String(s), JsonValue::Number(n)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        _ => left == right,
    }
}

fn strict_eq(left: &JsonValue, right: &JsonValue) -> bool {
    match (Num::of(left), Num::of(right)) {
        (Some(a), Some(b)) => num_cmp(a, b) == Some(Ordering::Equal),
        _ => left == right,
    }
}

fn compare(op: BinaryOp, left: &JsonValue, right: &JsonValue) -> Result<JsonValue, ExpressionError> {
    // A missing operand makes the comparison undecidable rather than false.
    if left.is_null() || right.is_null() {
        return Ok(JsonValue::Null);
    }
    let ordering = match (left, right) {
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        _ => match (Num::of(left), Num::of(right)) {
            (Some(a), Some(b)) => num_cmp(a, b),
            _ => {
                return Err(ExpressionError::mismatch(format!(
                    "cannot compare {} with {}",
                    type_name(left),
                    type_name(right)
                )));
            }
        },
    };
    let Some(ordering) = ordering else {
        return Ok(JsonValue::Bool(false));
    };
    let result = match op {
        BinaryOp::LessThan => ordering == Ordering::Less,
        BinaryOp::LessThanOrEqual => ordering != Ordering::Greater,
        BinaryOp::GreaterThan => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    };
    Ok(JsonValue::Bool(result))
}

fn arithmetic(op: BinaryOp, left: &JsonValue, right: &JsonValue) -> Result<JsonValue, ExpressionError> {
    let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
        return Err(ExpressionError::mismatch(format!(
            "cannot apply {op:?} to {} and {}",
            type_name(left),
            type_name(right)
        )));
    };
    if matches!(op, BinaryOp::Divide | BinaryOp::Remainder) && b.as_f64() == 0.0 {
        return Err(ExpressionError::mismatch("division by zero"));
    }

    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Subtract => x.checked_sub(y),
            BinaryOp::Multiply => x.checked_mul(y),
            BinaryOp::Divide => x.checked_rem(y).filter(|r| *r == 0).and_then(|_| x.checked_div(y)),
            _ => x.checked_rem(y),
        };
        if let Some(value) = exact {
            return Ok(JsonValue::from(value));
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let value = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply => x * y,
        BinaryOp::Divide => x / y,
        _ => x % y,
    };
    Ok(Num::Float(value).into_json())
}
