//! Evaluation of typed expressions over stored records, with SQL null
//! semantics: any comparison involving null is unknown, and unknown rows
//! are filtered out.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;

use rapq_core::expr::{AggregateFunc, ArithOp, CompareOp, Expr, Literal};
use rapq_core::{EntityDescriptor, Row, Value};
use regex::{Regex, RegexBuilder};

use super::table::Snapshot;

/// What an expression is evaluated against: one record, or the records of
/// one group. Plain paths in a group take the value of its first record.
#[derive(Clone, Copy)]
pub(crate) enum Scope<'r> {
    Row(&'r Row),
    Group(&'r [&'r Row]),
}

pub(crate) struct Evaluator<'s> {
    snapshot: &'s Snapshot,
    root: &'s EntityDescriptor,
    patterns: RefCell<HashMap<String, Regex>>,
}

impl<'s> Evaluator<'s> {
    pub(crate) fn new(snapshot: &'s Snapshot, root: &'s EntityDescriptor) -> Self {
        Self {
            snapshot,
            root,
            patterns: RefCell::new(HashMap::new()),
        }
    }

    /// Whether a condition holds; unknown counts as false.
    pub(crate) fn holds(&self, expr: &Expr, scope: Scope<'_>) -> bool {
        matches!(self.eval(expr, scope), Value::Bool(true))
    }

    pub(crate) fn eval(&self, expr: &Expr, scope: Scope<'_>) -> Value {
        match expr {
            Expr::Path(path) => match scope {
                Scope::Row(row) => self.snapshot.path_value(self.root, row, &path.segments),
                Scope::Group(rows) => rows.first().map_or(Value::Null, |row| {
                    self.snapshot.path_value(self.root, row, &path.segments)
                }),
            },
            Expr::Literal(lit) => literal(lit),
            Expr::Compare { op, left, right } => {
                let l = self.eval(left, scope);
                let r = self.eval(right, scope);
                l.sql_cmp(&r)
                    .map_or(Value::Null, |ord| Value::Bool(compare(*op, ord)))
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                let value = self.eval(expr, scope);
                if value.is_null() {
                    return Value::Null;
                }
                let mut unknown = false;
                for item in list {
                    match value.sql_cmp(&self.eval(item, scope)) {
                        Some(Ordering::Equal) => return Value::Bool(!negated),
                        None => unknown = true,
                        Some(_) => {}
                    }
                }
                if unknown {
                    Value::Null
                } else {
                    Value::Bool(*negated)
                }
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => match (self.eval(expr, scope), self.eval(pattern, scope)) {
                (Value::String(text), Value::String(pattern)) => self
                    .like(&text, &pattern)
                    .map_or(Value::Null, |matched| Value::Bool(matched != *negated)),
                _ => Value::Null,
            },
            Expr::IsNull { expr, negated } => Value::Bool(self.eval(expr, scope).is_null() != *negated),
            Expr::And(items) => {
                let mut unknown = false;
                for item in items {
                    match self.eval(item, scope) {
                        Value::Bool(false) => return Value::Bool(false),
                        Value::Bool(true) => {}
                        _ => unknown = true,
                    }
                }
                if unknown {
                    Value::Null
                } else {
                    Value::Bool(true)
                }
            }
            Expr::Or(items) => {
                let mut unknown = false;
                for item in items {
                    match self.eval(item, scope) {
                        Value::Bool(true) => return Value::Bool(true),
                        Value::Bool(false) => {}
                        _ => unknown = true,
                    }
                }
                if unknown {
                    Value::Null
                } else {
                    Value::Bool(false)
                }
            }
            Expr::Not(inner) => match self.eval(inner, scope) {
                Value::Bool(b) => Value::Bool(!b),
                _ => Value::Null,
            },
            Expr::Neg(inner) => match self.eval(inner, scope) {
                Value::Int(i) => i.checked_neg().map_or(Value::Null, Value::Int),
                Value::Float(f) => Value::Float(-f),
                _ => Value::Null,
            },
            Expr::Arith { op, left, right } => {
                arith(*op, &self.eval(left, scope), &self.eval(right, scope))
            }
            Expr::Aggregate { func, arg } => match scope {
                Scope::Group(rows) => self.aggregate(*func, arg.as_deref(), rows),
                Scope::Row(row) => self.aggregate(*func, arg.as_deref(), &[row]),
            },
        }
    }

    fn aggregate(&self, func: AggregateFunc, arg: Option<&Expr>, rows: &[&Row]) -> Value {
        let Some(arg) = arg else {
            return Value::Int(i64::try_from(rows.len()).unwrap_or(i64::MAX));
        };
        let values: Vec<Value> = rows
            .iter()
            .map(|row| self.eval(arg, Scope::Row(*row)))
            .filter(|v| !v.is_null())
            .collect();

        match func {
            AggregateFunc::Count => Value::Int(i64::try_from(values.len()).unwrap_or(i64::MAX)),
            AggregateFunc::Sum => sum(&values),
            AggregateFunc::Avg => {
                let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                if nums.is_empty() {
                    Value::Null
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    let len = nums.len() as f64;
                    Value::Float(nums.iter().sum::<f64>() / len)
                }
            }
            AggregateFunc::Min => values
                .into_iter()
                .min_by(Value::total_cmp)
                .unwrap_or(Value::Null),
            AggregateFunc::Max => values
                .into_iter()
                .max_by(Value::total_cmp)
                .unwrap_or(Value::Null),
        }
    }

    /// SQL `LIKE`: `%` matches any run of characters, `_` exactly one.
    /// `None` (unknown) when the pattern is too large to compile.
    fn like(&self, text: &str, pattern: &str) -> Option<bool> {
        let mut cache = self.patterns.borrow_mut();
        if let Some(regex) = cache.get(pattern) {
            return Some(regex.is_match(text));
        }
        let regex = RegexBuilder::new(&like_regex(pattern))
            .size_limit(LIKE_SIZE_LIMIT)
            .build()
            .ok()?;
        let matched = regex.is_match(text);
        cache.insert(pattern.to_string(), regex);
        Some(matched)
    }
}

/// Compiled size bound for one `LIKE` pattern.
const LIKE_SIZE_LIMIT: usize = 1 << 20;

fn like_regex(pattern: &str) -> String {
    let mut out = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Text(s) => Value::String(s.clone()),
        Literal::Integer(i) => Value::Int(*i),
        Literal::Decimal(d) => Value::Float(*d),
        Literal::Boolean(b) => Value::Bool(*b),
    }
}

fn compare(op: CompareOp, ord: Ordering) -> bool {
    match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
    }
}

/// Integer arithmetic stays integral except for division; overflow and
/// division by zero yield null.
fn arith(op: ArithOp, left: &Value, right: &Value) -> Value {
    if let (Value::Int(a), Value::Int(b), false) = (left, right, op == ArithOp::Div) {
        let result = match op {
            ArithOp::Add => a.checked_add(*b),
            ArithOp::Sub => a.checked_sub(*b),
            ArithOp::Mul => a.checked_mul(*b),
            ArithOp::Div => None,
        };
        return result.map_or(Value::Null, Value::Int);
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Value::Null;
    };
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div if b == 0.0 => return Value::Null,
        ArithOp::Div => a / b,
    };
    Value::Float(result)
}

fn sum(values: &[Value]) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    let ints: Option<Vec<i64>> = values
        .iter()
        .map(|v| match v {
            Value::Int(i) => Some(*i),
            _ => None,
        })
        .collect();
    match ints {
        Some(ints) => ints
            .into_iter()
            .try_fold(0i64, i64::checked_add)
            .map_or(Value::Null, Value::Int),
        None => Value::Float(values.iter().filter_map(Value::as_f64).sum()),
    }
}
