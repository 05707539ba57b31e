//! Untyped grammar for expression fragments.
//!
//! Parses text into [`Raw`] trees; names are resolved and types checked
//! afterwards by the resolver.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify},
    error::ErrorKind,
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::ast::{ArithOp, CompareOp, Direction, Literal};
use super::error::ExpressionError;

type Res<'a, T> = IResult<&'a str, T>;

/// Deepest accepted nesting of brackets, call arguments, prefix operators
/// and arithmetic chains.
pub const MAX_DEPTH: usize = 64;

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "null", "like", "true", "false", "as", "asc", "desc",
];

/// Expression as written, before name resolution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Raw {
    Path(Vec<String>),
    Literal(Literal),
    /// `arg` is `None` for a `*` argument.
    Call {
        name: String,
        arg: Option<Box<Raw>>,
    },
    Compare {
        op: CompareOp,
        left: Box<Raw>,
        right: Box<Raw>,
    },
    In {
        expr: Box<Raw>,
        list: Vec<Raw>,
        negated: bool,
    },
    Like {
        expr: Box<Raw>,
        pattern: Box<Raw>,
        negated: bool,
    },
    IsNull {
        expr: Box<Raw>,
        negated: bool,
    },
    And(Vec<Raw>),
    Or(Vec<Raw>),
    Not(Box<Raw>),
    Neg(Box<Raw>),
    Arith {
        op: ArithOp,
        left: Box<Raw>,
        right: Box<Raw>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawItem {
    pub expr: Raw,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawOrderItem {
    pub expr: Raw,
    pub direction: Direction,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

pub(crate) fn predicate(text: &str) -> Result<Raw, ExpressionError> {
    run(text, |i| or_expr(i, 0))
}

pub(crate) fn projection(text: &str) -> Result<Vec<RawItem>, ExpressionError> {
    run(text, separated_list1(ws(char(',')), projection_item))
}

pub(crate) fn ordering(text: &str) -> Result<Vec<RawOrderItem>, ExpressionError> {
    run(text, separated_list1(ws(char(',')), order_item))
}

pub(crate) fn grouping(text: &str) -> Result<Vec<Raw>, ExpressionError> {
    run(text, separated_list1(ws(char(',')), |i| or_expr(i, 0)))
}

fn run<'a, O>(
    text: &'a str,
    parser: impl FnMut(&'a str) -> Res<'a, O>,
) -> Result<O, ExpressionError> {
    match all_consuming(ws(parser))(text) {
        Ok((_, out)) => Ok(out),
        Err(nom::Err::Failure(e)) if e.code == ErrorKind::TooLarge => Err(ExpressionError::TooDeep {
            position: text.len() - e.input.len(),
            limit: MAX_DEPTH,
        }),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(syntax_error(text, e.input)),
        Err(nom::Err::Incomplete(_)) => Err(syntax_error(text, "")),
    }
}

fn syntax_error(text: &str, rest: &str) -> ExpressionError {
    let position = text.len() - rest.len();
    let message = match rest.split_whitespace().next() {
        None => "unexpected end of input".to_string(),
        Some(token) => {
            let snippet: String = token.chars().take(16).collect();
            format!("unexpected input '{snippet}'")
        }
    };
    ExpressionError::Syntax { position, message }
}

// ---------------------------------------------------------------------------
// Lexical helpers
// ---------------------------------------------------------------------------

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> Res<'a, O>
where
    F: FnMut(&'a str) -> Res<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Case-insensitive keyword that is not the prefix of a longer identifier.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    ws(terminated(tag_no_case(word), not(satisfy(is_ident_char))))
}

fn identifier(input: &str) -> Res<'_, String> {
    let word = recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ));
    ws(map(verify(word, |w: &str| !is_keyword(w)), str::to_string))(input)
}

/// Quoted string; the quote character is escaped by doubling it.
fn quoted<'a>(quote: char) -> impl FnMut(&'a str) -> Res<'a, String> {
    move |input: &'a str| {
        let (mut rest, _) = char::<_, nom::error::Error<&'a str>>(quote)(input)?;
        let mut out = String::new();
        loop {
            let Some(idx) = rest.find(quote) else {
                // Unterminated: report at end of input.
                let end = &rest[rest.len()..];
                return Err(nom::Err::Failure(nom::error::Error::new(
                    end,
                    nom::error::ErrorKind::Char,
                )));
            };
            out.push_str(&rest[..idx]);
            let after = &rest[idx + quote.len_utf8()..];
            match after.strip_prefix(quote) {
                Some(escaped) => {
                    out.push(quote);
                    rest = escaped;
                }
                None => return Ok((after, out)),
            }
        }
    }
}

fn number(input: &str) -> Res<'_, Literal> {
    map_res(
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        |text: &str| {
            if text.contains('.') {
                text.parse().map(Literal::Decimal).map_err(|_| ())
            } else {
                text.parse().map(Literal::Integer).map_err(|_| ())
            }
        },
    )(input)
}

fn literal(input: &str) -> Res<'_, Literal> {
    ws(alt((
        map(quoted('\''), Literal::Text),
        map(quoted('"'), Literal::Text),
        number,
        value(Literal::Boolean(true), keyword("true")),
        value(Literal::Boolean(false), keyword("false")),
    )))(input)
}

fn negation(input: &str) -> Res<'_, bool> {
    map(opt(keyword("not")), |n| n.is_some())(input)
}

// ---------------------------------------------------------------------------
// Expressions, lowest precedence first
// ---------------------------------------------------------------------------

/// Fails once `depth` exceeds [`MAX_DEPTH`]; a failure stops all backtracking.
fn nested(input: &str, depth: usize) -> Res<'_, ()> {
    if depth > MAX_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    Ok((input, ()))
}

fn or_expr(input: &str, depth: usize) -> Res<'_, Raw> {
    nested(input, depth)?;
    map(
        separated_list1(keyword("or"), |i| and_expr(i, depth)),
        |mut items| {
            if items.len() == 1 {
                items.remove(0)
            } else {
                Raw::Or(items)
            }
        },
    )(input)
}

fn and_expr(input: &str, depth: usize) -> Res<'_, Raw> {
    map(
        separated_list1(keyword("and"), |i| not_expr(i, depth)),
        |mut items| {
            if items.len() == 1 {
                items.remove(0)
            } else {
                Raw::And(items)
            }
        },
    )(input)
}

fn not_expr(input: &str, depth: usize) -> Res<'_, Raw> {
    nested(input, depth)?;
    alt((
        map(preceded(keyword("not"), |i| not_expr(i, depth + 1)), |e| {
            Raw::Not(Box::new(e))
        }),
        |i| condition(i, depth),
    ))(input)
}

enum Tail {
    Compare(CompareOp, Raw),
    In(bool, Vec<Raw>),
    Like(bool, Raw),
    IsNull(bool),
}

fn condition(input: &str, depth: usize) -> Res<'_, Raw> {
    let (input, left) = additive(input, depth)?;
    let (input, tail) = opt(|i| test_tail(i, depth))(input)?;
    let expr = match tail {
        None => left,
        Some(Tail::Compare(op, right)) => Raw::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        Some(Tail::In(negated, list)) => Raw::In {
            expr: Box::new(left),
            list,
            negated,
        },
        Some(Tail::Like(negated, pattern)) => Raw::Like {
            expr: Box::new(left),
            pattern: Box::new(pattern),
            negated,
        },
        Some(Tail::IsNull(negated)) => Raw::IsNull {
            expr: Box::new(left),
            negated,
        },
    };
    Ok((input, expr))
}

fn test_tail(input: &str, depth: usize) -> Res<'_, Tail> {
    alt((
        map(pair(compare_op, |i| additive(i, depth)), |(op, right)| {
            Tail::Compare(op, right)
        }),
        map(
            tuple((
                negation,
                keyword("in"),
                delimited(
                    ws(char('(')),
                    separated_list1(ws(char(',')), |i| additive(i, depth)),
                    ws(char(')')),
                ),
            )),
            |(negated, _, list)| Tail::In(negated, list),
        ),
        map(
            tuple((negation, keyword("like"), |i| additive(i, depth))),
            |(negated, _, p)| Tail::Like(negated, p),
        ),
        map(
            tuple((keyword("is"), negation, keyword("null"))),
            |(_, negated, _)| Tail::IsNull(negated),
        ),
    ))(input)
}

fn compare_op(input: &str) -> Res<'_, CompareOp> {
    ws(alt((
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Ne, tag("<>")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Eq, tag("=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    )))(input)
}

/// Folds a left-associative chain; each operator adds one level of depth.
fn fold_arith<'a>(
    start: &'a str,
    depth: usize,
    first: Raw,
    rest: Vec<(ArithOp, Raw)>,
) -> Result<Raw, nom::Err<nom::error::Error<&'a str>>> {
    nested(start, depth + rest.len())?;
    Ok(rest.into_iter().fold(first, |left, (op, right)| Raw::Arith {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }))
}

fn additive(input: &str, depth: usize) -> Res<'_, Raw> {
    let op = ws(alt((
        value(ArithOp::Add, char('+')),
        value(ArithOp::Sub, char('-')),
    )));
    let (rest_input, first) = term(input, depth)?;
    let (rest_input, rest) = many0(pair(op, |i| term(i, depth)))(rest_input)?;
    Ok((rest_input, fold_arith(input, depth, first, rest)?))
}

fn term(input: &str, depth: usize) -> Res<'_, Raw> {
    let op = ws(alt((
        value(ArithOp::Mul, char('*')),
        value(ArithOp::Div, char('/')),
    )));
    let (rest_input, first) = unary(input, depth)?;
    let (rest_input, rest) = many0(pair(op, |i| unary(i, depth)))(rest_input)?;
    Ok((rest_input, fold_arith(input, depth, first, rest)?))
}

fn unary(input: &str, depth: usize) -> Res<'_, Raw> {
    nested(input, depth)?;
    alt((
        map(preceded(ws(char('-')), |i| unary(i, depth + 1)), |e| {
            Raw::Neg(Box::new(e))
        }),
        |i| primary(i, depth),
    ))(input)
}

fn primary(input: &str, depth: usize) -> Res<'_, Raw> {
    alt((
        delimited(ws(char('(')), |i| or_expr(i, depth + 1), ws(char(')'))),
        map(literal, Raw::Literal),
        |i| call(i, depth),
        map(separated_list1(char('.'), identifier), Raw::Path),
    ))(input)
}

fn call(input: &str, depth: usize) -> Res<'_, Raw> {
    let (input, name) = identifier(input)?;
    let (input, arg) = delimited(
        ws(char('(')),
        alt((
            value(None, ws(char('*'))),
            map(|i| or_expr(i, depth + 1), |e| Some(Box::new(e))),
        )),
        ws(char(')')),
    )(input)?;
    Ok((input, Raw::Call { name, arg }))
}

fn projection_item(input: &str) -> Res<'_, RawItem> {
    let alias = preceded(opt(keyword("as")), identifier);
    map(pair(|i| or_expr(i, 0), opt(alias)), |(expr, alias)| RawItem {
        expr,
        alias,
    })(input)
}

fn order_item(input: &str) -> Res<'_, RawOrderItem> {
    let direction = alt((
        value(Direction::Asc, keyword("asc")),
        value(Direction::Desc, keyword("desc")),
    ));
    map(pair(|i| or_expr(i, 0), opt(direction)), |(expr, direction)| {
        RawOrderItem {
            expr,
            direction: direction.unwrap_or_default(),
        }
    })(input)
}
