mod pointer;

pub use pointer::Pointer;

use std::fmt::{Debug, Formatter, Result};
use unicode_width::UnicodeWidthStr;

const GUTTER: &str = "|";
const NOTE: &str = "=";
const UNDERLINE: &str = "^";

/// Visualization attached to an [`Error`][`super::Error`], printed by its
/// alternate `Display` form.
pub trait Visual: Debug + Send + Sync {
    /// Write the visualization for the named template, followed by the help
    /// text when there is one.
    fn display(
        &self,
        formatter: &mut Formatter<'_>,
        template: Option<&str>,
        help: Option<&str>,
    ) -> Result;
}

/// Return the line holding the byte `offset`, and the byte offset where
/// that line begins.
fn line_at(source: &str, offset: usize) -> (&str, usize) {
    let offset = offset.min(source.len());
    let start = source
        .get(..offset)
        .and_then(|before| before.rfind('\n'))
        .map_or(0, |newline| newline + 1);
    let end = source
        .get(start..)
        .and_then(|rest| rest.find('\n'))
        .map_or(source.len(), |newline| start + newline);

    (source.get(start..end).unwrap_or_default(), start)
}

/// Terminal columns taken by the text.
fn width(text: &str) -> usize {
    UnicodeWidthStr::width(text)
}
