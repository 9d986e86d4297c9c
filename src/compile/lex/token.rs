use crate::compile::{syntax::Marker, Operator};
use std::fmt::Display;

/// Types emitted by the Lexer.
///
/// An abstraction over raw text to make construction of Builder trees easier.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Token {
    /// Raw text.
    Raw,
    /// A backslash and the character it escapes.
    Escape,
    /// $
    Dollar,
    /// #
    Hash,
    /// {
    OpenBrace,
    /// }
    CloseBrace,
    /// An opening or closing quote, either `"` or `'`.
    Quote(char),
    /// Integer literal, optionally suffixed with `l` or `L`.
    Number,
    /// Unquoted name, such as a keyword or the name of a directive.
    Word,
    /// (
    OpenParen,
    /// )
    CloseParen,
    /// [
    OpenBracket,
    /// ]
    CloseBracket,
    /// .
    Period,
    /// ,
    Comma,
    /// :
    Colon,
    /// ;
    Semicolon,
    /// =
    Assign,
    /// !
    Exclamation,
    /// Describes an action taken on two values.
    Operator(Operator),
}

impl From<Marker> for Token {
    fn from(marker: Marker) -> Self {
        match marker {
            Marker::Dollar => Self::Dollar,
            Marker::Hash => Self::Hash,
            Marker::Escape => Self::Escape,
            Marker::OpenBrace => Self::OpenBrace,
            Marker::CloseBrace => Self::CloseBrace,
        }
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Raw => write!(f, "raw"),
            Token::Escape => write!(f, "escape (\\)"),
            Token::Dollar => write!(f, "dollar ($)"),
            Token::Hash => write!(f, "hash (#)"),
            Token::OpenBrace => write!(f, "open brace ({{)"),
            Token::CloseBrace => write!(f, "close brace (}})"),
            Token::Quote(quote) => write!(f, "quote ({quote})"),
            Token::Number => write!(f, "number"),
            Token::Word => write!(f, "word"),
            Token::OpenParen => write!(f, "open paren (()"),
            Token::CloseParen => write!(f, "close paren ())"),
            Token::OpenBracket => write!(f, "open bracket ([)"),
            Token::CloseBracket => write!(f, "close bracket (])"),
            Token::Period => write!(f, "period (.)"),
            Token::Comma => write!(f, "comma (,)"),
            Token::Colon => write!(f, "colon (:)"),
            Token::Semicolon => write!(f, "semicolon (;)"),
            Token::Assign => write!(f, "assign (=)"),
            Token::Exclamation => write!(f, "exclamation (!)"),
            Token::Operator(operator) => write!(f, "operator {operator}"),
        }
    }
}
