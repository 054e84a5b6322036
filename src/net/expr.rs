//! Arithmetic/boolean expressions over place tokens.
//!
//! Used for transition guards, arc thresholds and continuous rate functions.
//! Source text is parsed with `nom` into a [`Node`] tree; identifiers are
//! bound to [`PlaceId`]s when the owning net is built, so evaluation is a
//! plain tree walk over a [`Marking`].
//!
//! Booleans are numbers: comparisons and logic operators yield `1.0`/`0.0`,
//! and any finite non-zero value counts as true.
use std::fmt;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, char, multispace0, one_of};
use nom::combinator::{all_consuming, map, map_opt, opt, peek, recognize, value};
use nom::multi::{many0, many0_count, separated_list0};
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded};
use nom::{IResult, Parser};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::net::ids::PlaceId;
use crate::net::structure::Marking;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("unable to parse expression `{source_text}` near `{near}`")]
    Parse { source_text: String, near: String },
    #[error("expression `{expression}` references unknown place `{name}`")]
    UnknownPlace { expression: String, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Min,
    Max,
    Abs,
    Sqrt,
    Exp,
    Ln,
    Pow,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "min" => Function::Min,
            "max" => Function::Max,
            "abs" => Function::Abs,
            "sqrt" => Function::Sqrt,
            "exp" => Function::Exp,
            "ln" | "log" => Function::Ln,
            "pow" => Function::Pow,
            _ => return None,
        })
    }

    fn accepts(self, arity: usize) -> bool {
        match self {
            Function::Min | Function::Max => arity >= 1,
            Function::Pow => arity == 2,
            _ => arity == 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(f64),
    /// Identifier not yet bound to a place.
    Name(String),
    Place(PlaceId),
    Time,
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(Function, Vec<Node>),
}

/// A parsed expression together with its source text. Equality compares the
/// source only, so a bound and an unbound copy of the same text are equal.
#[derive(Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        match all_consuming(ws(expr)).parse(source) {
            Ok((_, root)) => Ok(Self {
                source: source.trim().to_string(),
                root,
            }),
            Err(err) => {
                let near = match err {
                    nom::Err::Error(e) | nom::Err::Failure(e) => e.input.to_string(),
                    nom::Err::Incomplete(_) => String::new(),
                };
                Err(ExprError::Parse {
                    source_text: source.to_string(),
                    near,
                })
            }
        }
    }

    pub fn constant(value: f64) -> Self {
        Self {
            source: format_number(value),
            root: Node::Number(value),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Returns the value when the expression does not depend on marking or time.
    pub fn as_constant(&self) -> Option<f64> {
        match self.root {
            Node::Number(value) => Some(value),
            Node::Unary(UnaryOp::Neg, ref inner) => match **inner {
                Node::Number(value) => Some(-value),
                _ => None,
            },
            _ => None,
        }
    }

    /// Binds every identifier through `lookup`. `t` and `time` fall back to
    /// the simulation clock when no place carries that name.
    pub fn resolve<F>(&mut self, lookup: F) -> Result<(), ExprError>
    where
        F: Fn(&str) -> Option<PlaceId>,
    {
        let source = self.source.clone();
        resolve_node(&mut self.root, &lookup, &source)
    }

    pub fn is_resolved(&self) -> bool {
        fn walk(node: &Node) -> bool {
            match node {
                Node::Name(_) => false,
                Node::Unary(_, inner) => walk(inner),
                Node::Binary(_, lhs, rhs) => walk(lhs) && walk(rhs),
                Node::Call(_, args) => args.iter().all(walk),
                _ => true,
            }
        }
        walk(&self.root)
    }

    /// Places read by this expression.
    pub fn places(&self) -> Vec<PlaceId> {
        fn walk(node: &Node, out: &mut Vec<PlaceId>) {
            match node {
                Node::Place(place) => {
                    if !out.contains(place) {
                        out.push(*place);
                    }
                }
                Node::Unary(_, inner) => walk(inner, out),
                Node::Binary(_, lhs, rhs) => {
                    walk(lhs, out);
                    walk(rhs, out);
                }
                Node::Call(_, args) => args.iter().for_each(|arg| walk(arg, out)),
                _ => {}
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    /// Unbound identifiers evaluate to NaN, which every caller treats as
    /// "condition does not hold".
    pub fn eval(&self, marking: &Marking, time: f64) -> f64 {
        eval_node(&self.root, marking, time)
    }

    pub fn holds(&self, marking: &Marking, time: f64) -> bool {
        truthy(self.eval(marking, time))
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.source).finish()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Expression {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::parse(s)
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(Expression::constant(value)),
            Raw::Text(text) => Expression::parse(&text).map_err(serde::de::Error::custom),
        }
    }
}

pub fn truthy(value: f64) -> bool {
    value.is_finite() && value != 0.0
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn resolve_node<F>(node: &mut Node, lookup: &F, source: &str) -> Result<(), ExprError>
where
    F: Fn(&str) -> Option<PlaceId>,
{
    match node {
        Node::Name(name) => {
            *node = match lookup(name) {
                Some(place) => Node::Place(place),
                None if name == "t" || name == "time" => Node::Time,
                None => {
                    return Err(ExprError::UnknownPlace {
                        expression: source.to_string(),
                        name: name.clone(),
                    });
                }
            };
            Ok(())
        }
        Node::Unary(_, inner) => resolve_node(inner, lookup, source),
        Node::Binary(_, lhs, rhs) => {
            resolve_node(lhs, lookup, source)?;
            resolve_node(rhs, lookup, source)
        }
        Node::Call(_, args) => args
            .iter_mut()
            .try_for_each(|arg| resolve_node(arg, lookup, source)),
        Node::Number(_) | Node::Place(_) | Node::Time => Ok(()),
    }
}

fn bool_value(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

fn eval_node(node: &Node, marking: &Marking, time: f64) -> f64 {
    match node {
        Node::Number(value) => *value,
        Node::Name(_) => f64::NAN,
        Node::Place(place) => marking.tokens(*place),
        Node::Time => time,
        Node::Unary(op, inner) => {
            let value = eval_node(inner, marking, time);
            match op {
                UnaryOp::Neg => -value,
                UnaryOp::Not => bool_value(!truthy(value)),
            }
        }
        Node::Binary(BinaryOp::And, lhs, rhs) => bool_value(
            truthy(eval_node(lhs, marking, time)) && truthy(eval_node(rhs, marking, time)),
        ),
        Node::Binary(BinaryOp::Or, lhs, rhs) => bool_value(
            truthy(eval_node(lhs, marking, time)) || truthy(eval_node(rhs, marking, time)),
        ),
        Node::Binary(op, lhs, rhs) => {
            let a = eval_node(lhs, marking, time);
            let b = eval_node(rhs, marking, time);
            match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                BinaryOp::Pow => a.powf(b),
                BinaryOp::Lt => bool_value(a < b),
                BinaryOp::Le => bool_value(a <= b),
                BinaryOp::Gt => bool_value(a > b),
                BinaryOp::Ge => bool_value(a >= b),
                BinaryOp::Eq => bool_value(a == b),
                BinaryOp::Ne => bool_value(a != b),
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            }
        }
        Node::Call(func, args) => {
            let mut values = args.iter().map(|arg| eval_node(arg, marking, time));
            match func {
                Function::Min => values.fold(f64::INFINITY, f64::min),
                Function::Max => values.fold(f64::NEG_INFINITY, f64::max),
                Function::Abs => values.next().map_or(f64::NAN, f64::abs),
                Function::Sqrt => values.next().map_or(f64::NAN, f64::sqrt),
                Function::Exp => values.next().map_or(f64::NAN, f64::exp),
                Function::Ln => values.next().map_or(f64::NAN, f64::ln),
                Function::Pow => match (values.next(), values.next()) {
                    (Some(a), Some(b)) => a.powf(b),
                    _ => f64::NAN,
                },
            }
        }
    }
}

type ParseError<'a> = nom::error::Error<&'a str>;

fn ws<'a, O, P>(inner: P) -> impl Parser<&'a str, Output = O, Error = ParseError<'a>>
where
    P: Parser<&'a str, Output = O, Error = ParseError<'a>>,
{
    delimited(multispace0, inner, multispace0)
}

fn fold_left(first: Node, rest: Vec<(BinaryOp, Node)>) -> Node {
    rest.into_iter().fold(first, |lhs, (op, rhs)| {
        Node::Binary(op, Box::new(lhs), Box::new(rhs))
    })
}

fn expr(input: &str) -> IResult<&str, Node> {
    or_expr(input)
}

fn or_expr(input: &str) -> IResult<&str, Node> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0((value(BinaryOp::Or, ws(tag("||"))), and_expr)).parse(input)?;
    Ok((input, fold_left(first, rest)))
}

fn and_expr(input: &str) -> IResult<&str, Node> {
    let (input, first) = comparison(input)?;
    let (input, rest) = many0((value(BinaryOp::And, ws(tag("&&"))), comparison)).parse(input)?;
    Ok((input, fold_left(first, rest)))
}

fn comparison(input: &str) -> IResult<&str, Node> {
    let cmp_op = alt((
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
    ));
    let (input, lhs) = sum(input)?;
    let (input, rhs) = opt((ws(cmp_op), sum)).parse(input)?;
    Ok((
        input,
        match rhs {
            Some((op, rhs)) => Node::Binary(op, Box::new(lhs), Box::new(rhs)),
            None => lhs,
        },
    ))
}

fn sum(input: &str) -> IResult<&str, Node> {
    let add_op = alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    ));
    let (input, first) = product(input)?;
    let (input, rest) = many0((ws(add_op), product)).parse(input)?;
    Ok((input, fold_left(first, rest)))
}

fn product(input: &str) -> IResult<&str, Node> {
    let mul_op = alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
        value(BinaryOp::Rem, char('%')),
    ));
    let (input, first) = unary(input)?;
    let (input, rest) = many0((ws(mul_op), unary)).parse(input)?;
    Ok((input, fold_left(first, rest)))
}

fn unary(input: &str) -> IResult<&str, Node> {
    alt((
        map(preceded(ws(char('-')), unary), |node| {
            Node::Unary(UnaryOp::Neg, Box::new(node))
        }),
        map(preceded(ws(char('!')), unary), |node| {
            Node::Unary(UnaryOp::Not, Box::new(node))
        }),
        power,
    ))
    .parse(input)
}

/// `^` binds tighter than unary minus on its left and is right associative.
fn power(input: &str) -> IResult<&str, Node> {
    let (input, base) = atom(input)?;
    let (input, exponent) = opt(preceded(ws(char('^')), unary)).parse(input)?;
    Ok((
        input,
        match exponent {
            Some(exponent) => Node::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)),
            None => base,
        },
    ))
}

fn atom(input: &str) -> IResult<&str, Node> {
    ws(alt((
        delimited(char('('), ws(expr), char(')')),
        map(preceded(peek(one_of("0123456789.")), double), Node::Number),
        call,
        map(identifier, |name: &str| Node::Name(name.to_string())),
    )))
    .parse(input)
}

fn call(input: &str) -> IResult<&str, Node> {
    map_opt(
        (
            identifier,
            ws(char('(')),
            separated_list0(ws(char(',')), expr),
            ws(char(')')),
        ),
        |(name, _, args, _)| {
            let func = Function::from_name(name)?;
            func.accepts(args.len()).then_some(Node::Call(func, args))
        },
    )
    .parse(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}
