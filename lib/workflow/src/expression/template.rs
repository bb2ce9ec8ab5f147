//! Parameter templates: JSON values whose strings may embed `{{ }}` expressions.

use super::ast::Expr;
use super::eval::{EvalContext, evaluate, to_text};
use super::parser::parse;
use crate::error::ExpressionError;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Expr(Expr),
}

/// A node's raw parameters compiled once, ready to resolve per item.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterTemplate {
    /// Contains no placeholders.
    Literal(JsonValue),
    /// A string that is exactly one placeholder; resolves to the raw value.
    Expression(Expr),
    /// A string mixing text and placeholders; resolves to a string.
    Interpolated(Vec<Segment>),
    Array(Vec<ParameterTemplate>),
    Object(Vec<(String, ParameterTemplate)>),
}

impl ParameterTemplate {
    /// Compiles raw parameters.
    ///
    /// # Errors
    ///
    /// Returns the first syntax error or unknown reference found.
    pub fn compile(raw: &JsonValue) -> Result<Self, ExpressionError> {
        let template = match raw {
            JsonValue::String(s) if s.contains("{{") => {
                let mut segments = split_segments(s)?;
                if segments.len() == 1 && matches!(segments[0], Segment::Expr(_)) {
                    match segments.pop() {
                        Some(Segment::Expr(expr)) => Self::Expression(expr),
                        _ => Self::Interpolated(segments),
                    }
                } else {
                    Self::Interpolated(segments)
                }
            }
            JsonValue::Array(values) => {
                let elements = values
                    .iter()
                    .map(Self::compile)
                    .collect::<Result<Vec<_>, _>>()?;
                if elements.iter().all(Self::is_static) {
                    Self::Literal(raw.clone())
                } else {
                    Self::Array(elements)
                }
            }
            JsonValue::Object(map) => {
                let fields = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::compile(v)?)))
                    .collect::<Result<Vec<_>, ExpressionError>>()?;
                if fields.iter().all(|(_, t)| t.is_static()) {
                    Self::Literal(raw.clone())
                } else {
                    Self::Object(fields)
                }
            }
            other => Self::Literal(other.clone()),
        };
        Ok(template)
    }

    /// Returns true if resolving never evaluates an expression.
    #[must_use]
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Resolves the template against one item context.
    ///
    /// # Errors
    ///
    /// Returns the first evaluation error.
    pub fn resolve(&self, ctx: &EvalContext<'_>) -> Result<JsonValue, ExpressionError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Expression(expr) => evaluate(expr, ctx),
            Self::Interpolated(segments) => {
                let mut text = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => text.push_str(t),
                        Segment::Expr(expr) => text.push_str(&to_text(&evaluate(expr, ctx)?)),
                    }
                }
                Ok(JsonValue::String(text))
            }
            Self::Array(elements) => elements
                .iter()
                .map(|e| e.resolve(ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            Self::Object(fields) => {
                let mut map = Map::new();
                for (key, template) in fields {
                    map.insert(key.clone(), template.resolve(ctx)?);
                }
                Ok(JsonValue::Object(map))
            }
        }
    }

    /// Node names referenced through `$node`.
    #[must_use]
    pub fn node_references(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_node_refs(&mut names);
        names
    }

    fn collect_node_refs(&self, names: &mut BTreeSet<String>) {
        match self {
            Self::Literal(_) => {}
            Self::Expression(expr) => expr.collect_node_refs(names),
            Self::Interpolated(segments) => {
                for segment in segments {
                    if let Segment::Expr(expr) = segment {
                        expr.collect_node_refs(names);
                    }
                }
            }
            Self::Array(elements) => {
                for element in elements {
                    element.collect_node_refs(names);
                }
            }
            Self::Object(fields) => {
                for (_, template) in fields {
                    template.collect_node_refs(names);
                }
            }
        }
    }
}

fn split_segments(source: &str) -> Result<Vec<Segment>, ExpressionError> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut offset = 0;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_string()));
        }
        let body_start = open + 2;
        let body_len = closing_brace(&rest[body_start..])
            .ok_or_else(|| ExpressionError::syntax(offset + open, "unterminated '{{'"))?;
        let body = &rest[body_start..body_start + body_len];
        let expr = parse(body).map_err(|e| match e {
            ExpressionError::SyntaxError { position, message } => ExpressionError::SyntaxError {
                position: position + offset + body_start,
                message,
            },
            other => other,
        })?;
        segments.push(Segment::Expr(expr));

        let consumed = body_start + body_len + 2;
        rest = &rest[consumed..];
        offset += consumed;
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

/// Finds the `}}` closing a placeholder, skipping quoted strings.
fn closing_brace(body: &str) -> Option<usize> {
    let mut quote = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => quote = Some(c),
            None if body[i..].starts_with("}}") => return Some(i),
            None => {}
        }
    }
    None
}
