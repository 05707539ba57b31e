use std::fmt;

use crate::schema::FieldType;

/// Static type of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprType {
    Text,
    Integer,
    Decimal,
    Boolean,
    /// A path ending on a relation; carries the target entity name.
    Entity(String),
}

impl ExprType {
    /// Whether the type belongs to the numeric family.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, ExprType::Integer | ExprType::Decimal)
    }

    /// Whether `=`/`!=`/`IN` may relate values of the two types.
    #[must_use]
    pub fn is_comparable_with(&self, other: &ExprType) -> bool {
        match (self, other) {
            (ExprType::Entity(_), _) | (_, ExprType::Entity(_)) => false,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (a, b) => a == b,
        }
    }

    /// Whether `<`, `<=`, `>`, `>=` and `min`/`max` apply to the type.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.is_numeric() || *self == ExprType::Text
    }
}

impl From<FieldType> for ExprType {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text => ExprType::Text,
            FieldType::Integer => ExprType::Integer,
            FieldType::Decimal => ExprType::Decimal,
            FieldType::Boolean => ExprType::Boolean,
        }
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprType::Text => f.write_str("text"),
            ExprType::Integer => f.write_str("integer"),
            ExprType::Decimal => f.write_str("decimal"),
            ExprType::Boolean => f.write_str("boolean"),
            ExprType::Entity(name) => write!(f, "entity '{name}'"),
        }
    }
}

/// A field reference resolved against the schema.
///
/// `segments` are relative to the root entity: every segment but the last
/// names a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    pub segments: Vec<String>,
    pub ty: ExprType,
}

impl FieldPath {
    /// Dotted form, e.g. `author.lastName`.
    #[must_use]
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
}

impl Literal {
    #[must_use]
    pub fn ty(&self) -> ExprType {
        match self {
            Literal::Text(_) => ExprType::Text,
            Literal::Integer(_) => ExprType::Integer,
            Literal::Decimal(_) => ExprType::Decimal,
            Literal::Boolean(_) => ExprType::Boolean,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Integer(i) => write!(f, "{i}"),
            Literal::Decimal(d) => write!(f, "{d:?}"),
            Literal::Boolean(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Ordering comparisons, as opposed to (in)equality.
    #[must_use]
    pub fn is_ordering(self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    /// Case-insensitive lookup by function name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateFunc::Count),
            "sum" => Some(AggregateFunc::Sum),
            "avg" => Some(AggregateFunc::Avg),
            "min" => Some(AggregateFunc::Min),
            "max" => Some(AggregateFunc::Max),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
        }
    }
}

/// Typed expression over one entity's schema.
///
/// Every [`Expr::Path`] has been resolved and every operator type-checked,
/// so evaluation never meets an unknown field.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Path(FieldPath),
    Literal(Literal),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `arg` is `None` for `count(*)`.
    Aggregate {
        func: AggregateFunc,
        arg: Option<Box<Expr>>,
    },
}

impl Expr {
    /// Static type of the expression.
    #[must_use]
    pub fn ty(&self) -> ExprType {
        match self {
            Expr::Path(path) => path.ty.clone(),
            Expr::Literal(lit) => lit.ty(),
            Expr::Compare { .. }
            | Expr::In { .. }
            | Expr::Like { .. }
            | Expr::IsNull { .. }
            | Expr::And(_)
            | Expr::Or(_)
            | Expr::Not(_) => ExprType::Boolean,
            Expr::Neg(inner) => inner.ty(),
            Expr::Arith { op, left, right } => {
                if *op != ArithOp::Div
                    && left.ty() == ExprType::Integer
                    && right.ty() == ExprType::Integer
                {
                    ExprType::Integer
                } else {
                    ExprType::Decimal
                }
            }
            Expr::Aggregate { func, arg } => match (func, arg) {
                (AggregateFunc::Count, _) => ExprType::Integer,
                (AggregateFunc::Avg, _) => ExprType::Decimal,
                (_, Some(arg)) => arg.ty(),
                (_, None) => ExprType::Integer,
            },
        }
    }

    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Aggregate { .. })
    }

    /// Whether an aggregate call appears anywhere in the expression.
    #[must_use]
    pub fn contains_aggregate(&self) -> bool {
        self.is_aggregate() || self.children().iter().any(|c| c.contains_aggregate())
    }

    /// Direct sub-expressions, left to right.
    #[must_use]
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Path(_) | Expr::Literal(_) => Vec::new(),
            Expr::Compare { left, right, .. } | Expr::Arith { left, right, .. } => {
                vec![&**left, &**right]
            }
            Expr::In { expr, list, .. } => std::iter::once(&**expr).chain(list).collect(),
            Expr::Like { expr, pattern, .. } => vec![&**expr, &**pattern],
            Expr::IsNull { expr, .. } | Expr::Not(expr) | Expr::Neg(expr) => vec![&**expr],
            Expr::And(items) | Expr::Or(items) => items.iter().collect(),
            Expr::Aggregate { arg, .. } => arg.iter().map(|a| &**a).collect(),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Or(_) => 1,
            Expr::And(_) => 2,
            Expr::Not(_) => 3,
            Expr::Compare { .. } | Expr::In { .. } | Expr::Like { .. } | Expr::IsNull { .. } => 4,
            Expr::Arith {
                op: ArithOp::Add | ArithOp::Sub,
                ..
            } => 5,
            Expr::Arith { .. } => 6,
            Expr::Neg(_) => 7,
            Expr::Path(_) | Expr::Literal(_) | Expr::Aggregate { .. } => 8,
        }
    }
}

struct Operand<'a>(&'a Expr, u8);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.precedence() < self.1 {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str, min: u8) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", Operand(item, min))?;
    }
    Ok(())
}

/// Canonical rendering; the output parses back to the same expression.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let not = |negated: bool| if negated { "not " } else { "" };
        match self {
            Expr::Path(path) => f.write_str(&path.dotted()),
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Compare { op, left, right } => write!(
                f,
                "{} {} {}",
                Operand(left, 5),
                op.as_str(),
                Operand(right, 5)
            ),
            Expr::In {
                expr,
                list,
                negated,
            } => {
                write!(f, "{} {}in (", Operand(expr, 5), not(*negated))?;
                join(f, list, ", ", 5)?;
                f.write_str(")")
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => write!(
                f,
                "{} {}like {}",
                Operand(expr, 5),
                not(*negated),
                Operand(pattern, 5)
            ),
            Expr::IsNull { expr, negated } => {
                write!(f, "{} is {}null", Operand(expr, 5), not(*negated))
            }
            Expr::And(items) => join(f, items, " and ", 3),
            Expr::Or(items) => join(f, items, " or ", 2),
            Expr::Not(inner) => write!(f, "not {}", Operand(inner, 3)),
            Expr::Neg(inner) => write!(f, "-{}", Operand(inner, 7)),
            Expr::Arith { op, left, right } => {
                let prec = self.precedence();
                write!(
                    f,
                    "{} {} {}",
                    Operand(left, prec),
                    op.as_str(),
                    Operand(right, prec + 1)
                )
            }
            Expr::Aggregate { func, arg } => match arg {
                Some(arg) => write!(f, "{}({arg})", func.as_str()),
                None => write!(f, "{}(*)", func.as_str()),
            },
        }
    }
}

/// One `select` item.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl ProjectionItem {
    /// Output column name: the alias, else the dotted path of a plain path,
    /// else the canonical rendering of the expression.
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.alias, &self.expr) {
            (Some(alias), _) => alias.clone(),
            (None, Expr::Path(path)) => path.dotted(),
            (None, expr) => expr.to_string(),
        }
    }
}

/// Parsed `select` fragment: ordered, labels unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub items: Vec<ProjectionItem>,
}

impl Projection {
    #[must_use]
    pub fn has_aggregate(&self) -> bool {
        self.items.iter().any(|i| i.expr.contains_aggregate())
    }
}

/// Parsed `where` or `having` fragment; always of boolean type.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate(pub Expr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub direction: Direction,
}

/// Parsed `orderBy` fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub items: Vec<OrderItem>,
}

/// Parsed `groupBy` fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub items: Vec<Expr>,
}
