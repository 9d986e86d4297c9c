mod build;
pub mod directive;
mod lex;
mod parse;
mod syntax;
mod template;

pub use crate::compile::{
    build::{BuildContext, Built},
    parse::{tree, Parser},
    template::Template,
};

use crate::{log::Error, Engine};
use std::fmt::Display;

/// Compile a [`Template`] from the given text.
///
/// Provides a shortcut to quickly compile a `Template` with a default
/// [`Engine`] that is discarded afterwards.
///
/// # Examples
///
/// ```
/// use macrame::compile;
///
/// let template = compile("Hello, $name!");
/// assert!(template.is_ok())
/// ```
pub fn compile(text: &str) -> Result<Template, Error> {
    Engine::default().compile(text)
}

/// Operators recognized by the Lexer and Parser.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Operator {
    /// +
    Add,
    /// -
    Subtract,
    /// *
    Multiply,
    /// /
    Divide,
    /// >
    Greater,
    /// <
    Lesser,
    /// ==
    Equal,
    /// !=
    NotEqual,
    /// >=
    GreaterOrEqual,
    /// <=
    LesserOrEqual,
    /// &&, AND, and
    And,
    /// ||, OR, or
    Or,
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::Add => write!(f, "+"),
            Operator::Subtract => write!(f, "-"),
            Operator::Multiply => write!(f, "*"),
            Operator::Divide => write!(f, "/"),
            Operator::Greater => write!(f, ">"),
            Operator::Lesser => write!(f, "<"),
            Operator::Equal => write!(f, "=="),
            Operator::NotEqual => write!(f, "!="),
            Operator::GreaterOrEqual => write!(f, ">="),
            Operator::LesserOrEqual => write!(f, "<="),
            Operator::And => write!(f, "&&"),
            Operator::Or => write!(f, "||"),
        }
    }
}

/// Operators applied to a single operand.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Unary {
    /// !
    Not,
    /// -
    Negate,
}

impl Display for Unary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unary::Not => write!(f, "!"),
            Unary::Negate => write!(f, "-"),
        }
    }
}
