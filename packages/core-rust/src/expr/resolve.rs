//! Name resolution and type checking of [`Raw`] trees.

use std::collections::HashSet;

use super::ast::{
    AggregateFunc, Expr, ExprType, GroupSpec, Literal, OrderItem, OrderSpec, Predicate,
    Projection, ProjectionItem,
};
use super::error::ExpressionError;
use super::syntax::{Raw, RawItem, RawOrderItem};
use crate::registry::EntityScope;

pub(crate) struct Resolver<'s, 'a> {
    scope: &'s EntityScope<'a>,
}

fn mismatch(expr: &Expr, detail: impl Into<String>) -> ExpressionError {
    ExpressionError::TypeMismatch {
        expression: expr.to_string(),
        detail: detail.into(),
    }
}

impl<'s, 'a> Resolver<'s, 'a> {
    pub(crate) fn new(scope: &'s EntityScope<'a>) -> Self {
        Self { scope }
    }

    pub(crate) fn predicate(&self, raw: Raw) -> Result<Predicate, ExpressionError> {
        let expr = self.expr(raw)?;
        let ty = expr.ty();
        if ty != ExprType::Boolean {
            return Err(mismatch(&expr, format!("condition must be boolean, found {ty}")));
        }
        Ok(Predicate(expr))
    }

    pub(crate) fn projection(&self, items: Vec<RawItem>) -> Result<Projection, ExpressionError> {
        let items = items
            .into_iter()
            .map(|item| {
                Ok(ProjectionItem {
                    expr: self.expr(item.expr)?,
                    alias: item.alias,
                })
            })
            .collect::<Result<Vec<_>, ExpressionError>>()?;

        let mut labels = HashSet::new();
        for item in &items {
            let label = item.label();
            if !labels.insert(label.clone()) {
                return Err(ExpressionError::DuplicateLabel { label });
            }
        }
        Ok(Projection { items })
    }

    pub(crate) fn ordering(&self, items: Vec<RawOrderItem>) -> Result<OrderSpec, ExpressionError> {
        let items = items
            .into_iter()
            .map(|item| {
                Ok(OrderItem {
                    expr: self.expr(item.expr)?,
                    direction: item.direction,
                })
            })
            .collect::<Result<_, ExpressionError>>()?;
        Ok(OrderSpec { items })
    }

    pub(crate) fn grouping(&self, items: Vec<Raw>) -> Result<GroupSpec, ExpressionError> {
        let items = items
            .into_iter()
            .map(|raw| self.expr(raw))
            .collect::<Result<_, _>>()?;
        Ok(GroupSpec { items })
    }

    fn boxed(&self, raw: Raw) -> Result<Box<Expr>, ExpressionError> {
        self.expr(raw).map(Box::new)
    }

    fn expr(&self, raw: Raw) -> Result<Expr, ExpressionError> {
        let expr = match raw {
            Raw::Path(segments) => Expr::Path(self.scope.resolve_path(&segments)?),
            Raw::Literal(lit) => Expr::Literal(lit),
            Raw::Call { name, arg } => {
                let func = AggregateFunc::from_name(&name)
                    .ok_or(ExpressionError::UnknownFunction { name })?;
                let arg = arg.map(|a| self.boxed(*a)).transpose()?;
                Expr::Aggregate { func, arg }
            }
            Raw::Compare { op, left, right } => Expr::Compare {
                op,
                left: self.boxed(*left)?,
                right: self.boxed(*right)?,
            },
            Raw::In {
                expr,
                list,
                negated,
            } => Expr::In {
                expr: self.boxed(*expr)?,
                list: list
                    .into_iter()
                    .map(|r| self.expr(r))
                    .collect::<Result<_, _>>()?,
                negated,
            },
            Raw::Like {
                expr,
                pattern,
                negated,
            } => Expr::Like {
                expr: self.boxed(*expr)?,
                pattern: self.boxed(*pattern)?,
                negated,
            },
            Raw::IsNull { expr, negated } => Expr::IsNull {
                expr: self.boxed(*expr)?,
                negated,
            },
            Raw::And(items) => Expr::And(
                items
                    .into_iter()
                    .map(|r| self.expr(r))
                    .collect::<Result<_, _>>()?,
            ),
            Raw::Or(items) => Expr::Or(
                items
                    .into_iter()
                    .map(|r| self.expr(r))
                    .collect::<Result<_, _>>()?,
            ),
            Raw::Not(inner) => Expr::Not(self.boxed(*inner)?),
            Raw::Neg(inner) => match self.expr(*inner)? {
                Expr::Literal(Literal::Integer(i)) if i.checked_neg().is_some() => {
                    Expr::Literal(Literal::Integer(-i))
                }
                Expr::Literal(Literal::Decimal(d)) => Expr::Literal(Literal::Decimal(-d)),
                other => Expr::Neg(Box::new(other)),
            },
            Raw::Arith { op, left, right } => Expr::Arith {
                op,
                left: self.boxed(*left)?,
                right: self.boxed(*right)?,
            },
        };
        check(&expr)?;
        Ok(expr)
    }
}

/// Type-checks one node; children were checked when they were built.
fn check(expr: &Expr) -> Result<(), ExpressionError> {
    match expr {
        Expr::Path(_) | Expr::Literal(_) | Expr::IsNull { .. } => Ok(()),
        Expr::Compare { op, left, right } => {
            let (lt, rt) = (left.ty(), right.ty());
            if !lt.is_comparable_with(&rt) {
                return Err(mismatch(expr, format!("cannot compare {lt} with {rt}")));
            }
            if op.is_ordering() && !lt.is_ordered() {
                return Err(mismatch(
                    expr,
                    format!("'{}' does not apply to {lt}", op.as_str()),
                ));
            }
            Ok(())
        }
        Expr::In { expr: tested, list, .. } => {
            let ty = tested.ty();
            match list.iter().find(|item| !ty.is_comparable_with(&item.ty())) {
                Some(item) => Err(mismatch(
                    expr,
                    format!("cannot compare {ty} with {}", item.ty()),
                )),
                None => Ok(()),
            }
        }
        Expr::Like {
            expr: tested,
            pattern,
            ..
        } => {
            let (lt, rt) = (tested.ty(), pattern.ty());
            if lt == ExprType::Text && rt == ExprType::Text {
                Ok(())
            } else {
                Err(mismatch(expr, format!("like requires text, found {lt} and {rt}")))
            }
        }
        Expr::And(items) | Expr::Or(items) => {
            match items.iter().map(Expr::ty).find(|ty| *ty != ExprType::Boolean) {
                Some(ty) => Err(mismatch(expr, format!("expected boolean operands, found {ty}"))),
                None => Ok(()),
            }
        }
        Expr::Not(inner) => match inner.ty() {
            ExprType::Boolean => Ok(()),
            ty => Err(mismatch(expr, format!("expected boolean operand, found {ty}"))),
        },
        Expr::Neg(inner) => match inner.ty() {
            ty if ty.is_numeric() => Ok(()),
            ty => Err(mismatch(expr, format!("expected numeric operand, found {ty}"))),
        },
        Expr::Arith { op, left, right } => {
            let (lt, rt) = (left.ty(), right.ty());
            if lt.is_numeric() && rt.is_numeric() {
                Ok(())
            } else {
                Err(mismatch(
                    expr,
                    format!("'{}' requires numeric operands, found {lt} and {rt}", op.as_str()),
                ))
            }
        }
        Expr::Aggregate { func, arg } => check_aggregate(expr, *func, arg.as_deref()),
    }
}

fn check_aggregate(
    expr: &Expr,
    func: AggregateFunc,
    arg: Option<&Expr>,
) -> Result<(), ExpressionError> {
    let Some(arg) = arg else {
        return match func {
            AggregateFunc::Count => Ok(()),
            _ => Err(mismatch(expr, "'*' is only valid in count(*)")),
        };
    };
    if arg.contains_aggregate() {
        return Err(ExpressionError::NestedAggregate {
            expression: expr.to_string(),
        });
    }
    let ty = arg.ty();
    let ok = match func {
        AggregateFunc::Count => true,
        AggregateFunc::Sum | AggregateFunc::Avg => ty.is_numeric(),
        AggregateFunc::Min | AggregateFunc::Max => ty.is_ordered(),
    };
    if ok {
        Ok(())
    } else {
        Err(mismatch(
            expr,
            format!("{}() does not apply to {ty}", func.as_str()),
        ))
    }
}
