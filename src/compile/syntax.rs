use morel::Syntax;

/// Markers that interrupt literal text.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Marker {
    /// Beginning of a variable reference, such as `$name.first`.
    Dollar = 0,
    /// Beginning of a directive, a macro invocation or a `##` comment.
    Hash = 1,
    /// Escapes the following reserved character.
    Escape = 2,
    /// Literal opening brace, tracked so nested braces stay balanced.
    OpenBrace = 3,
    /// End of a brace delimited block.
    CloseBrace = 4,
}

impl From<usize> for Marker {
    fn from(value: usize) -> Self {
        match value {
            0 => Self::Dollar,
            1 => Self::Hash,
            2 => Self::Escape,
            3 => Self::OpenBrace,
            _ => Self::CloseBrace,
        }
    }
}

impl From<Marker> for usize {
    fn from(k: Marker) -> Self {
        k as usize
    }
}

/// Return the [`Syntax`] used to search literal text for markers.
pub fn to_syntax() -> Syntax {
    let markers = vec![
        (Marker::Dollar.into(), "$".to_string()),
        (Marker::Hash.into(), "#".to_string()),
        (Marker::Escape.into(), "\\".to_string()),
        (Marker::OpenBrace.into(), "{".to_string()),
        (Marker::CloseBrace.into(), "}".to_string()),
    ];

    Syntax::new(markers)
}

/// Return true if the given character is reserved in literal text and may
/// be escaped with a backslash.
pub fn is_reserved(c: char) -> bool {
    matches!(c, '$' | '#' | '\\' | '{' | '}')
}
