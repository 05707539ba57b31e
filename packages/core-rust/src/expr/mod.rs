//! Expression language for query fragments.
//!
//! Text is parsed with `nom` into an untyped tree, then resolved against an
//! [`EntityScope`]: every field path is looked up in the schema (following
//! relations) and every operator is type-checked. A fragment that fails
//! either step never reaches the query composer.

mod ast;
mod error;
mod resolve;
mod syntax;

pub use ast::{
    AggregateFunc, ArithOp, CompareOp, Direction, Expr, ExprType, FieldPath, GroupSpec, Literal,
    OrderItem, OrderSpec, Predicate, Projection, ProjectionItem,
};
pub use error::ExpressionError;
pub use syntax::MAX_DEPTH;

use crate::registry::EntityScope;
use resolve::Resolver;

/// Shape a fragment is parsed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    /// `select`: comma-separated expressions with optional aliases.
    Projection,
    /// `where` and `having`: a single boolean expression.
    Predicate,
    /// `orderBy`: comma-separated expressions with optional direction.
    OrderSpec,
    /// `groupBy`: comma-separated expressions.
    GroupSpec,
}

/// Result of [`parse`], tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedExpression {
    Projection(Projection),
    Predicate(Predicate),
    OrderSpec(OrderSpec),
    GroupSpec(GroupSpec),
}

/// Parses `text` as an expression of the given kind, scoped to one entity.
///
/// # Errors
///
/// Returns [`ExpressionError`] if the text is malformed, references a path
/// that does not resolve in `scope`, or is not well-typed.
pub fn parse(
    kind: ExpressionKind,
    text: &str,
    scope: &EntityScope<'_>,
) -> Result<ParsedExpression, ExpressionError> {
    match kind {
        ExpressionKind::Projection => parse_projection(text, scope).map(ParsedExpression::Projection),
        ExpressionKind::Predicate => parse_predicate(text, scope).map(ParsedExpression::Predicate),
        ExpressionKind::OrderSpec => parse_ordering(text, scope).map(ParsedExpression::OrderSpec),
        ExpressionKind::GroupSpec => parse_grouping(text, scope).map(ParsedExpression::GroupSpec),
    }
}

/// Parses a `select` fragment.
///
/// # Errors
///
/// See [`parse`].
pub fn parse_projection(text: &str, scope: &EntityScope<'_>) -> Result<Projection, ExpressionError> {
    Resolver::new(scope).projection(syntax::projection(text)?)
}

/// Parses a `where` or `having` fragment.
///
/// # Errors
///
/// See [`parse`].
pub fn parse_predicate(text: &str, scope: &EntityScope<'_>) -> Result<Predicate, ExpressionError> {
    Resolver::new(scope).predicate(syntax::predicate(text)?)
}

/// Parses an `orderBy` fragment.
///
/// # Errors
///
/// See [`parse`].
pub fn parse_ordering(text: &str, scope: &EntityScope<'_>) -> Result<OrderSpec, ExpressionError> {
    Resolver::new(scope).ordering(syntax::ordering(text)?)
}

/// Parses a `groupBy` fragment.
///
/// # Errors
///
/// See [`parse`].
pub fn parse_grouping(text: &str, scope: &EntityScope<'_>) -> Result<GroupSpec, ExpressionError> {
    Resolver::new(scope).grouping(syntax::grouping(text)?)
}
