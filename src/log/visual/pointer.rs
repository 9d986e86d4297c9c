use super::{line_at, width, Visual, GUTTER, NOTE, UNDERLINE};
use crate::{
    log::{RESET, YELLOW},
    region::Region,
};
use std::{
    cmp::max,
    fmt::{Formatter, Result},
};

/// A [`Visual`] that underlines a [`Region`] on the line holding it.
#[derive(Debug, PartialEq)]
pub struct Pointer {
    /// One-based line and column, as printed after `-->`.
    position: (usize, usize),
    /// Display width of the line before the region.
    indent: usize,
    /// Display width of the underline, at least one.
    length: usize,
    /// The line holding the region.
    text: String,
}

impl Pointer {
    /// Create a new [`Pointer`] over the given source text and [`Region`].
    pub fn new(source: &str, region: Region) -> Self {
        let (text, start) = line_at(source, region.begin);
        let text = text.trim_end_matches('\r');
        let indent = width(source.get(start..region.begin).unwrap_or_default());
        // A region spanning lines is underlined to the end of its first line.
        let end = region.end.min(start + text.len());
        let length = max(1, width(source.get(region.begin..end).unwrap_or_default()));

        Self {
            position: region.position(source),
            indent,
            length,
            text: text.to_string(),
        }
    }
}

impl Visual for Pointer {
    fn display(
        &self,
        formatter: &mut Formatter<'_>,
        template: Option<&str>,
        help: Option<&str>,
    ) -> Result {
        let (line, column) = self.position;
        let number = line.to_string();
        let pad = number.len();
        let indent = self.indent;
        let name = template.unwrap_or("?");
        let text = &self.text;
        let underline = UNDERLINE.repeat(self.length);

        writeln!(formatter)?;
        writeln!(formatter, " {:pad$}--> {name}:{line}:{column}", "")?;
        writeln!(formatter, " {:pad$} {GUTTER}", "")?;
        writeln!(formatter, " {number} {GUTTER} {text}")?;
        writeln!(
            formatter,
            " {:pad$} {GUTTER} {:indent$}{YELLOW}{underline}{RESET}",
            "", ""
        )?;
        writeln!(formatter, " {:pad$} {GUTTER}", "")?;

        if let Some(help) = help {
            writeln!(formatter, "{:pad$} {NOTE} help: {help}", "")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Pointer;

    #[test]
    fn test_pointer_second_line() {
        let pointer = Pointer::new("first\n#if ($a) {", (9..11).into());

        assert_eq!(pointer.position, (2, 4));
        assert_eq!(pointer.indent, 3);
        assert_eq!(pointer.length, 2);
        assert_eq!(pointer.text, "#if ($a) {");
    }

    #[test]
    fn test_pointer_wide_characters() {
        let pointer = Pointer::new("日本 $x", (7..9).into());

        assert_eq!(pointer.position, (1, 4));
        assert_eq!(pointer.indent, 5);
        assert_eq!(pointer.length, 2);
    }

    #[test]
    fn test_pointer_spanning_lines() {
        let pointer = Pointer::new("#if {\r\nbody", (4..11).into());

        assert_eq!(pointer.text, "#if {");
        assert_eq!(pointer.length, 1);
    }

    #[test]
    fn test_pointer_empty_source() {
        let pointer = Pointer::new("", (0..0).into());

        assert_eq!(pointer.text, "");
        assert_eq!(pointer.length, 1);
    }
}
