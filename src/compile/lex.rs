pub mod token;

use crate::{
    compile::{
        syntax::{self, Marker},
        Operator,
    },
    log::{expected_operator, Error, Kind, INVALID_SYNTAX, TOO_MANY_MARKS, UNEXPECTED_TOKEN},
    region::Region,
};
use morel::Finder;
use token::Token;

/// Result of asking the [`Lexer`] for the next [`Token`].
pub type TokenResult = Result<Option<(Token, Region)>, Error>;

/// Maximum number of marks that may be held at the same time.
pub const MAX_MARKS: usize = 4;

/// A saved cursor position, returned by [`Lexer::mark`].
///
/// A `Mark` must be handed back to the `Lexer` through [`Lexer::rewind`] or
/// [`Lexer::clear_mark`], which releases the slot it occupies.
#[derive(Debug)]
#[must_use = "a mark occupies a slot until it is rewound or cleared"]
pub struct Mark {
    slot: usize,
}

/// Provides methods to read a source string as [`Token`] instances.
///
/// The `Lexer` has no internal state beyond its cursor, so the caller decides
/// how the text ahead is read: literal text with [`Lexer::next_text`], the
/// inside of a quoted string with [`Lexer::next_quoted`], or an expression
/// with [`Lexer::next_token`].
pub struct Lexer<'source> {
    /// Reference to the source text.
    pub source: &'source str,
    /// Position within source.
    pub cursor: usize,
    /// Compiled [`Finder`] instance used to search for markers
    /// in literal text.
    finder: Finder,
    /// Saved cursor positions, one per held [`Mark`].
    marks: [Option<usize>; MAX_MARKS],
    /// Characters accepted in names in addition to identifier characters.
    name_chars: Vec<char>,
}

impl<'source> Lexer<'source> {
    /// Create a new [`Lexer`] over the given source.
    ///
    /// Any character in `name_chars` is accepted inside of names, in addition
    /// to the usual identifier characters.
    pub fn new(source: &'source str, name_chars: &str) -> Self {
        Self {
            source,
            cursor: 0,
            finder: Finder::new(syntax::to_syntax()),
            marks: [None; MAX_MARKS],
            name_chars: name_chars.chars().collect(),
        }
    }

    /// Save the current cursor position.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when [`MAX_MARKS`] marks are already held.
    pub fn mark(&mut self) -> Result<Mark, Error> {
        match self.marks.iter().position(Option::is_none) {
            Some(slot) => {
                self.marks[slot] = Some(self.cursor);

                Ok(Mark { slot })
            }
            None => Err(Error::build(TOO_MANY_MARKS)
                .with_kind(Kind::Parse)
                .with_pointer(self.source, self.cursor..self.cursor)
                .with_help(format!(
                    "no more than {MAX_MARKS} marks may be held at once"
                ))),
        }
    }

    /// Move the cursor back to the position saved in the given [`Mark`] and
    /// release it.
    pub fn rewind(&mut self, mark: Mark) {
        if let Some(position) = self.marks[mark.slot].take() {
            self.cursor = position;
        }
    }

    /// Release the given [`Mark`] without moving the cursor.
    pub fn clear_mark(&mut self, mark: Mark) {
        self.marks[mark.slot] = None;
    }

    /// Return the next [`Token`] and [`Region`] of literal text.
    ///
    /// Text between markers is returned as [`Token::Raw`]. An escape covers
    /// the backslash and the character that follows it.
    pub fn next_text(&mut self) -> TokenResult {
        let from = self.cursor;
        if from >= self.source.len() {
            return Ok(None);
        }

        match self.finder.next(self.source, from) {
            Some((id, begin, end)) if begin == from => {
                let token = Token::from(Marker::from(id));
                let end = match (token, self.char_at(end)) {
                    (Token::Escape, Some(escaped)) => end + escaped.len_utf8(),
                    _ => end,
                };
                self.cursor = end;

                Ok(Some((token, (begin..end).into())))
            }
            Some((_, begin, _)) => {
                self.cursor = begin;

                Ok(Some((Token::Raw, (from..begin).into())))
            }
            None => {
                self.cursor = self.source.len();

                Ok(Some((Token::Raw, (from..self.cursor).into())))
            }
        }
    }

    /// Return the next [`Token`] and [`Region`] inside of a string delimited
    /// by `quote`.
    ///
    /// Produces [`Token::Raw`], [`Token::Escape`], [`Token::Dollar`], or
    /// [`Token::Quote`] when the closing quote is reached.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the source ends before the closing quote.
    pub fn next_quoted(&mut self, quote: char) -> TokenResult {
        let from = self.cursor;
        let unterminated = || {
            Error::build(INVALID_SYNTAX)
                .with_kind(Kind::Parse)
                .with_pointer(self.source, from..self.source.len())
                .with_help(format!(
                    "this might be an undelimited string, try closing it with `{quote}`"
                ))
        };

        let (token, end) = match self.char_at(from) {
            None => return Err(unterminated()),
            Some(c) if c == quote => (Token::Quote(quote), from + 1),
            Some('\\') => match self.char_at(from + 1) {
                Some(escaped) => (Token::Escape, from + 1 + escaped.len_utf8()),
                None => return Err(unterminated()),
            },
            Some('$') => (Token::Dollar, from + 1),
            Some(_) => {
                let end = self.source[from..]
                    .char_indices()
                    .find(|(_, c)| *c == quote || *c == '\\' || *c == '$')
                    .map(|(index, _)| from + index)
                    .unwrap_or(self.source.len());

                (Token::Raw, end)
            }
        };
        self.cursor = end;

        Ok(Some((token, (from..end).into())))
    }

    /// Return the next [`Token`] and [`Region`] of an expression.
    ///
    /// Any whitespace before the token is skipped.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when an unexpected character is found.
    pub fn next_token(&mut self) -> TokenResult {
        self.skip_whitespace();
        let from = self.cursor;
        let Some(current) = self.char_at(from) else {
            return Ok(None);
        };
        let following = self.char_at(from + current.len_utf8());

        let (token, length) = match (current, following) {
            ('(', _) => (Token::OpenParen, 1),
            (')', _) => (Token::CloseParen, 1),
            ('[', _) => (Token::OpenBracket, 1),
            (']', _) => (Token::CloseBracket, 1),
            ('{', _) => (Token::OpenBrace, 1),
            ('}', _) => (Token::CloseBrace, 1),
            ('.', _) => (Token::Period, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            (';', _) => (Token::Semicolon, 1),
            ('$', _) => (Token::Dollar, 1),
            ('#', _) => (Token::Hash, 1),
            ('"' | '\'', _) => (Token::Quote(current), 1),
            ('+', _) => (Token::Operator(Operator::Add), 1),
            ('-', _) => (Token::Operator(Operator::Subtract), 1),
            ('*', _) => (Token::Operator(Operator::Multiply), 1),
            ('/', _) => (Token::Operator(Operator::Divide), 1),
            ('=', Some('=')) => (Token::Operator(Operator::Equal), 2),
            ('!', Some('=')) => (Token::Operator(Operator::NotEqual), 2),
            ('>', Some('=')) => (Token::Operator(Operator::GreaterOrEqual), 2),
            ('<', Some('=')) => (Token::Operator(Operator::LesserOrEqual), 2),
            ('&', Some('&')) => (Token::Operator(Operator::And), 2),
            ('|', Some('|')) => (Token::Operator(Operator::Or), 2),
            ('=', _) => (Token::Assign, 1),
            ('!', _) => (Token::Exclamation, 1),
            ('>', _) => (Token::Operator(Operator::Greater), 1),
            ('<', _) => (Token::Operator(Operator::Lesser), 1),
            ('&' | '|', _) => {
                return Err(Error::build(UNEXPECTED_TOKEN)
                    .with_kind(Kind::Parse)
                    .with_pointer(self.source, from..from + 1)
                    .with_help(expected_operator(current)));
            }
            (c, _) if c.is_ascii_digit() => return Ok(Some((Token::Number, self.lex_number()))),
            (c, _) if self.is_name_start(c) => {
                let region = self.lex_name().unwrap_or_default();

                return Ok(Some((Token::Word, region)));
            }
            (c, _) => {
                return Err(Error::build(UNEXPECTED_TOKEN)
                    .with_kind(Kind::Parse)
                    .with_pointer(self.source, from..from + c.len_utf8())
                    .with_help(
                        "expected a variable, a number, a string, a word, \
                        an operator or one of `(`, `)`, `[`, `]`, `,`",
                    ));
            }
        };
        self.cursor = from + length;

        Ok(Some((token, (from..self.cursor).into())))
    }

    /// Return the next expression [`Token`] without consuming it.
    ///
    /// When `multiline` is false, a newline ahead of the token ends the
    /// lookahead and `None` is returned. Lexer errors are also reported
    /// as `None`, leaving the caller to fail with better context.
    pub fn peek_token(&mut self, multiline: bool) -> Option<(Token, Region)> {
        let saved = self.cursor;
        let token = if multiline {
            self.next_token().ok().flatten()
        } else {
            self.skip_spaces();
            match self.peek_char() {
                Some('\n' | '\r') | None => None,
                Some(_) => self.next_token().ok().flatten(),
            }
        };
        self.cursor = saved;

        token
    }

    /// Return the character at the cursor.
    pub fn peek_char(&self) -> Option<char> {
        self.char_at(self.cursor)
    }

    /// Return the character `offset` bytes past the cursor.
    pub fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.char_at(self.cursor + offset)
    }

    /// Consume the character at the cursor if it is `expect`.
    ///
    /// Returns true when the character was consumed.
    pub fn eat_char(&mut self, expect: char) -> bool {
        if self.peek_char() == Some(expect) {
            self.cursor += expect.len_utf8();
            true
        } else {
            false
        }
    }

    /// Return true if the source at the cursor starts with `text`.
    pub fn starts_with(&self, text: &str) -> bool {
        self.source
            .get(self.cursor..)
            .is_some_and(|rest| rest.starts_with(text))
    }

    /// Return true if the given character may begin a name.
    pub fn is_name_start(&self, c: char) -> bool {
        c == '_' || unicode_ident::is_xid_start(c) || self.name_chars.contains(&c)
    }

    /// Return true if the given character may continue a name.
    pub fn is_name_continue(&self, c: char) -> bool {
        unicode_ident::is_xid_continue(c) || self.name_chars.contains(&c)
    }

    /// Consume a name at the cursor and return its [`Region`].
    ///
    /// Returns `None` without moving the cursor when no name begins here.
    pub fn lex_name(&mut self) -> Option<Region> {
        let from = self.cursor;
        let mut chars = self.source.get(from..)?.char_indices();
        match chars.next() {
            Some((_, c)) if self.is_name_start(c) => (),
            _ => return None,
        }
        let end = chars
            .find(|(_, c)| !self.is_name_continue(*c))
            .map(|(index, _)| from + index)
            .unwrap_or(self.source.len());
        self.cursor = end;

        Some((from..end).into())
    }

    /// Consume a run of ascii digits at the cursor, with an optional `l` or
    /// `L` suffix, and return its [`Region`].
    pub fn lex_number(&mut self) -> Region {
        let from = self.cursor;
        let rest = &self.source[from..];
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        self.cursor = from + digits;
        if matches!(self.peek_char(), Some('l' | 'L')) {
            self.cursor += 1;
        }

        (from..self.cursor).into()
    }

    /// Skip spaces and tabs.
    pub fn skip_spaces(&mut self) {
        while matches!(self.peek_char(), Some(' ' | '\t')) {
            self.cursor += 1;
        }
    }

    /// Skip any whitespace, newlines included.
    pub fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.cursor += c.len_utf8();
        }
    }

    /// Skip a single `\n` or `\r\n`.
    ///
    /// Returns true when a newline was skipped.
    pub fn skip_newline(&mut self) -> bool {
        if self.starts_with("\r\n") {
            self.cursor += 2;
            true
        } else {
            self.eat_char('\n')
        }
    }

    /// Skip everything up to and including the next newline.
    pub fn skip_to_eol(&mut self) {
        let rest = &self.source[self.cursor..];
        self.cursor += rest.find('\n').map(|n| n + 1).unwrap_or(rest.len());
    }

    /// Consume raw text up to the `}` that balances an already consumed `{`,
    /// and return the [`Region`] of the text between them.
    ///
    /// Escaped braces do not count towards the balance.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the source ends before the block is closed.
    pub fn lex_raw_braced(&mut self) -> Result<Region, Error> {
        let from = self.cursor;
        let mut depth = 0_usize;
        let mut escaped = false;

        for (index, c) in self.source[from..].char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '{' => depth += 1,
                '}' if depth == 0 => {
                    self.cursor = from + index + 1;

                    return Ok((from..from + index).into());
                }
                '}' => depth -= 1,
                _ => (),
            }
        }

        Err(self.error_until("}", from))
    }

    /// Consume raw text up to the next occurrence of `marker`, and return the
    /// [`Region`] of the text before it.
    ///
    /// The cursor is left after the marker.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the marker is never found.
    pub fn lex_until(&mut self, marker: &str) -> Result<Region, Error> {
        let from = self.cursor;
        match self.source[from..].find(marker) {
            Some(index) => {
                self.cursor = from + index + marker.len();

                Ok((from..from + index).into())
            }
            None => Err(self.error_until(marker, from)),
        }
    }

    /// Return the one-based line and column of the cursor.
    pub fn position(&self) -> (usize, usize) {
        Region::new(self.cursor..self.cursor).position(self.source)
    }

    fn char_at(&self, index: usize) -> Option<char> {
        self.source.get(index..)?.chars().next()
    }

    fn error_until(&self, marker: &str, from: usize) -> Error {
        let (line, column) = Region::new(from..from).position(self.source);

        Error::build(format!("expected `{marker}` but reached end of file"))
            .with_kind(Kind::Parse)
            .with_pointer(self.source, from..self.source.len())
            .with_help(format!("raw text starting at {line}:{column} was never closed"))
    }
}
