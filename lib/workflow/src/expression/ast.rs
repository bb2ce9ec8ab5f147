//! Expression syntax tree.

use serde_json::Value as JsonValue;
use std::collections::BTreeSet;

/// Context roots reachable through `$` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    /// `$json`: the current item.
    Json,
    /// `$index`: position of the current item.
    Index,
    /// `$items`: all primary input items.
    Items,
    /// `$now`: RFC 3339 timestamp.
    Now,
    /// `$today`: ISO date.
    Today,
}

impl Root {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Self::Json),
            "index" => Some(Self::Index),
            "items" => Some(Self::Items),
            "now" => Some(Self::Now),
            "today" => Some(Self::Today),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(JsonValue),
    Array(Vec<Expr>),
    Root(Root),
    /// `$node["Name"]`
    NodeRef(String),
    Member {
        object: Box<Expr>,
        field: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Coalesce(Box<Expr>, Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// Collects the node names referenced through `$node`.
    pub fn collect_node_refs(&self, names: &mut BTreeSet<String>) {
        match self {
            Self::NodeRef(name) => {
                names.insert(name.clone());
            }
            Self::Array(elements) => {
                for element in elements {
                    element.collect_node_refs(names);
                }
            }
            Self::Member { object, .. } | Self::Unary(_, object) => object.collect_node_refs(names),
            Self::Index { object, index, .. } => {
                object.collect_node_refs(names);
                index.collect_node_refs(names);
            }
            Self::Binary(_, l, r) | Self::And(l, r) | Self::Or(l, r) | Self::Coalesce(l, r) => {
                l.collect_node_refs(names);
                r.collect_node_refs(names);
            }
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_node_refs(names);
                then.collect_node_refs(names);
                otherwise.collect_node_refs(names);
            }
            Self::Literal(_) | Self::Root(_) => {}
        }
    }
}
