//! carbonq Expression Engine
//!
//! The target mini-language: a parser producing a small expression tree and
//! an evaluator with the Graphite-compatible function library.
//!
//! # Pipeline position
//!
//! The HTTP layer parses each `target` parameter with [`parser::parse`],
//! asks the tree for its required fetches via [`parser::Expr::metrics`],
//! resolves and fetches them, and finally calls [`eval::eval_expr`] with the
//! assembled metric map.
//!
//! # Main Components
//!
//! - [`parser::Expr`] - tagged expression node (constant, string, metric
//!   name, function call)
//! - [`parser::parse`] - recursive-descent parser returning the expression
//!   and the unconsumed remainder
//! - [`eval::eval_expr`] - pure evaluation against a fetched metric map
//! - [`functions`] - the function implementations, dispatched by name

pub mod eval;
pub mod functions;
pub mod parser;

pub use eval::eval_expr;
pub use parser::{parse, CallExpr, Expr, ParseError};
