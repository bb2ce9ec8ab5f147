//! Template expressions.
//!
//! Parameters are compiled into [`ParameterTemplate`]s once, when the graph is
//! built, and resolved per item while the run executes. Inside `{{ }}` the
//! grammar supports field access, indexing, arithmetic, comparisons, logical
//! operators, `??` defaults, the ternary operator, and the `$json`, `$index`,
//! `$items`, `$now`, `$today`, and `$node` accessors.

pub mod ast;
pub mod eval;
mod lexer;
pub mod parser;
pub mod template;

pub use ast::Expr;
pub use eval::{EvalContext, NodeOutputs, evaluate, is_truthy, to_text};
pub use parser::parse;
pub use template::ParameterTemplate;
