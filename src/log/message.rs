use super::{Error, Kind};
use std::fmt::Display;

pub const UNEXPECTED_TOKEN: &str = "unexpected token";
pub const UNEXPECTED_EOF: &str = "unexpected eof";
pub const INVALID_SYNTAX: &str = "invalid syntax";
pub const INVALID_FILTER: &str = "invalid filter";
pub const INVALID_DIRECTIVE: &str = "invalid directive";
pub const INCOMPATIBLE_TYPES: &str = "incompatible types";
pub const UNKNOWN_DIRECTIVE: &str = "unknown directive";
pub const TOO_MANY_MARKS: &str = "too many marks";

/// Return an [`Error`] explaining that the end of source was not expected.
pub fn error_eof(source: &str) -> Error {
    let source_len = source.len();
    Error::build(UNEXPECTED_EOF)
        .with_kind(Kind::Parse)
        .with_pointer(source, source_len..source_len)
        .with_help("expected additional tokens, did you close all blocks and expressions?")
}

/// Return an [`Error`] explaining that the write operation failed.
pub fn error_write(cause: impl Display) -> Error {
    Error::build("write failure")
        .with_kind(Kind::Io)
        .with_help(format!("failed to write result of render: {cause}"))
}

/// Return an [`Error`] describing a missing template.
pub fn error_missing_template(name: &str) -> Error {
    Error::build("missing template").with_help(format!(
        "template `{}` not found in engine, add it with `.add_template`",
        name
    ))
}

/// Return an [`Error`] describing a build failure inside of a directive.
pub fn error_build<T>(reason: T) -> Error
where
    T: Into<String>,
{
    Error::build(reason).with_kind(Kind::Build)
}

/// Return a string describing an unexpected operator.
pub fn expected_operator<T>(received: T) -> String
where
    T: Display,
{
    format!(
        "expected operator like `+`, `-`, `*`, `/`, `==`, `!=`, `>=`, `<=`, `&&`, `||`, found `{}`",
        received
    )
}

/// Return a string describing an unexpected word where a directive keyword belongs.
pub fn expected_keyword<T>(expected: &str, received: T) -> String
where
    T: Display,
{
    format!("expected keyword `{expected}`, found `{received}`")
}
