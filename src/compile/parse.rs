//! Recursive descent parser.
//!
//! Reads literal text with the [`Lexer`], and switches to expression tokens
//! whenever a directive asks for a condition, a value or a target. Which
//! arguments follow a directive name is decided by the [`Prototype`] that
//! the directive registered with the [`Engine`].
pub mod tree;

use crate::{
    compile::{
        directive::{Argument, Arguments, Call, Prototype, Slot, Subdirective},
        lex::{token::Token, Lexer, TokenResult},
        syntax, Operator, Unary,
    },
    log::{error_eof, expected_keyword, Error, Kind, INVALID_SYNTAX, UNEXPECTED_TOKEN, UNKNOWN_DIRECTIVE},
    region::Region,
    Engine,
};
use serde_json::Value;
use std::collections::HashSet;
use tree::{Block, Element, Expression, Invoke, Part, Reference, Step};

/// Decides what ends a block.
#[derive(Debug, PartialEq, Clone, Copy)]
enum Mode {
    /// The template itself, which ends with the source.
    Top,
    /// A block opened with `{`, which ends with the balancing `}`.
    Brace,
    /// A block opened with `#begin` or a bare block, which ends with `#end`
    /// or a subdirective such as `#else`.
    End,
}

pub struct Parser<'source, 'engine> {
    /// Lexer used to pull from source as tokens instead of raw text.
    lexer: Lexer<'source>,
    engine: &'engine Engine,
    /// Names of the macros that may be invoked.
    macros: HashSet<String>,
    /// Depth of open parentheses and brackets. Expressions may only span
    /// lines while this is above zero.
    nesting: usize,
}

impl<'source, 'engine> Parser<'source, 'engine> {
    /// Create a new [`Parser`] for the given source.
    pub fn new(source: &'source str, engine: &'engine Engine) -> Self {
        Self {
            lexer: Lexer::new(source, &engine.settings().name_chars),
            engine,
            macros: engine.macros().keys().cloned().collect(),
            nesting: 0,
        }
    }

    /// Parse the whole source into a [`Block`].
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] pointing at the first malformed construct.
    pub fn parse(mut self) -> Result<Block, Error> {
        self.parse_block(Mode::Top)
    }

    /// Parse literal text, variables and directives until the [`Mode`]
    /// says the block is over.
    fn parse_block(&mut self, mode: Mode) -> Result<Block, Error> {
        let source = self.lexer.source;
        let begin = self.lexer.cursor;
        let mut block = Block::new(begin);
        let mut depth = 0_usize;

        loop {
            let Some((token, region)) = self.lexer.next_text()? else {
                match mode {
                    Mode::Top => break,
                    Mode::Brace => {
                        return Err(self.error_unclosed("}", begin));
                    }
                    Mode::End => {
                        return Err(self.error_unclosed("#end", begin));
                    }
                }
            };

            match token {
                Token::Escape => {
                    let literal = region.literal(source);
                    let escaped = &literal[1..];
                    match escaped.chars().next() {
                        Some(c) if syntax::is_reserved(c) => block.push_text(escaped, region),
                        _ => block.push_text(literal, region),
                    }
                }
                Token::OpenBrace => {
                    if mode == Mode::Brace {
                        depth += 1;
                    }
                    block.push_text("{", region);
                }
                Token::CloseBrace => {
                    if mode == Mode::Brace {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    }
                    block.push_text("}", region);
                }
                Token::Dollar => match self.parse_reference(region.begin)? {
                    Some(reference) => block.push(Element::Variable(reference)),
                    None => block.push_text("$", region),
                },
                Token::Hash => {
                    if self.parse_hash(&mut block, region, mode)? {
                        break;
                    }
                }
                _ => block.push_text(region.literal(source), region),
            }
        }

        block.region = Region::new(begin..self.lexer.cursor);

        Ok(block)
    }

    /// Handle a `#` found in literal text.
    ///
    /// Returns true when the current block is over.
    fn parse_hash(&mut self, block: &mut Block, hash: Region, mode: Mode) -> Result<bool, Error> {
        let source = self.lexer.source;

        if self.lexer.eat_char('#') {
            self.lexer.skip_to_eol();
            return Ok(false);
        }
        if !block.directive_ok() {
            block.push_text("#", hash);
            return Ok(false);
        }
        let Some(name_region) = self.lexer.lex_name() else {
            block.push_text("#", hash);
            return Ok(false);
        };
        let name = name_region.literal(source);
        let head = hash.combine(name_region);
        let directives = self.engine.directives();

        if name == "end" {
            if mode != Mode::End {
                return Err(Error::build(UNEXPECTED_TOKEN)
                    .with_kind(Kind::Parse)
                    .with_pointer(source, head)
                    .with_help("`#end` closes a `#begin` or bare block, but none is open"));
            }
            block.eat_trailing_ws_nl_ws();
            self.lexer.skip_spaces();
            self.lexer.skip_newline();

            return Ok(true);
        }

        if name == "begin" {
            return Err(Error::build(UNEXPECTED_TOKEN)
                .with_kind(Kind::Parse)
                .with_pointer(source, head)
                .with_help("`#begin` opens the block of a directive, and must follow one"));
        }

        if let Some(entry) = directives.get(name) {
            block.eat_trailing_ws_nl_ws();
            let prototype = entry.prototype.clone();
            let call = self.parse_directive(&prototype, hash.begin)?;
            block.push(Element::Directive(call));

            return Ok(false);
        }

        if directives.is_subdirective(name) {
            if mode != Mode::End {
                return Err(Error::build(UNEXPECTED_TOKEN)
                    .with_kind(Kind::Parse)
                    .with_pointer(source, head)
                    .with_help(format!("`#{name}` must follow the block of its directive")));
            }
            block.eat_trailing_ws_nl_ws();
            self.lexer.cursor = hash.begin;

            return Ok(true);
        }

        if self.macros.contains(name) {
            block.eat_trailing_ws_nl_ws();
            let invoke = self.parse_invoke(name, hash.begin)?;
            block.push(Element::Invoke(invoke));

            return Ok(false);
        }

        if self.engine.settings().relaxed {
            block.push_text(head.literal(source), head);
            return Ok(false);
        }

        Err(Error::build(UNKNOWN_DIRECTIVE)
            .with_kind(Kind::Parse)
            .with_pointer(source, head)
            .with_help(format!(
                "`#{name}` is not a directive or macro, escape the hash with `\\#` to write it literally"
            )))
    }

    /// Parse the arguments of a directive, in the order its slots declare.
    fn parse_directive(&mut self, prototype: &Prototype, begin: usize) -> Result<Call, Error> {
        let mut call = prototype.instantiate(Region::new(begin..begin));
        let ended_with_block = self.parse_slots(&prototype.descriptor.slots, &mut call.arguments)?;
        call.region = Region::new(begin..self.lexer.cursor);
        if !ended_with_block {
            self.lexer.skip_spaces();
        }

        Ok(call)
    }

    /// Parse a sequence of slots.
    ///
    /// Adjacent optional groups may appear in any order. Returns true when
    /// the last thing read was a block.
    fn parse_slots(&mut self, slots: &[Slot], arguments: &mut Arguments) -> Result<bool, Error> {
        let mut ended_with_block = false;
        let mut index = 0;

        while index < slots.len() {
            if let Slot::Optional(_) = &slots[index] {
                let mut groups = slots[index..]
                    .iter()
                    .map_while(|slot| match slot {
                        Slot::Optional(group) => Some(group),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                index += groups.len();

                while let Some(found) = groups.iter().position(|group| self.next_is_group(group)) {
                    let group = groups.remove(found);
                    ended_with_block = self.parse_slots(group, arguments)?;
                }
                continue;
            }

            ended_with_block = match &slots[index] {
                Slot::Subdirective(subdirective) => {
                    self.parse_subdirective(subdirective, arguments)?
                        .unwrap_or(ended_with_block)
                }
                slot => self.parse_slot(slot, arguments)?,
            };
            index += 1;
        }

        Ok(ended_with_block)
    }

    /// Parse a single slot. Returns true when the slot was a block.
    fn parse_slot(&mut self, slot: &Slot, arguments: &mut Arguments) -> Result<bool, Error> {
        let source = self.lexer.source;

        match slot {
            Slot::Condition(key) => {
                self.next_must(Token::OpenParen)?;
                self.nesting += 1;
                let condition = self.parse_expression()?;
                self.next_must(Token::CloseParen)?;
                self.nesting -= 1;
                arguments.push(*key, Argument::Expression(condition));
            }
            Slot::Target(key) => {
                let (_, region) = self.next_must(Token::Dollar)?;
                let target = self.parse_reference(region.begin)?.ok_or_else(|| {
                    Error::build(UNEXPECTED_TOKEN)
                        .with_kind(Kind::Parse)
                        .with_pointer(source, region)
                        .with_help("expected a variable name after `$`")
                })?;
                arguments.push(*key, Argument::Target(target));
            }
            Slot::Value(key) => {
                let value = self.parse_expression()?;
                arguments.push(*key, Argument::Expression(value));
            }
            Slot::Quoted(key) => {
                let (token, region) = self.next_any_must()?;
                let Token::Quote(quote) = token else {
                    return Err(self.error_unexpected(region, "expected a quoted string"));
                };
                let quoted = self.parse_quoted(quote, region.begin)?;
                arguments.push(*key, Argument::Expression(quoted));
            }
            Slot::Define(key) => {
                let (_, region) = self.next_must(Token::Word)?;
                let name = region.literal(source).to_string();
                self.macros.insert(name.clone());
                arguments.push(*key, Argument::Word(name));
            }
            Slot::Params(key) => {
                let params = if self.next_is(Token::OpenParen) {
                    self.next_any_must()?;
                    self.parse_params()?
                } else {
                    Vec::new()
                };
                arguments.push(*key, Argument::Params(params));
            }
            Slot::Keyword(word) => {
                let (token, region) = self.next_any_must()?;
                let literal = region.literal(source);
                if token != Token::Word || literal != *word {
                    return Err(self.error_unexpected(region, &expected_keyword(word, literal)));
                }
                arguments.push_keyword(*word);
            }
            Slot::Assign => {
                self.next_must(Token::Assign)?;
            }
            Slot::Block(key) => {
                let block = self.parse_block_argument()?;
                arguments.push(*key, Argument::Block(block));

                return Ok(true);
            }
            Slot::Text(key, marker) => {
                let text = self.parse_text_argument(marker)?;
                arguments.push(*key, Argument::Text(text));

                return Ok(true);
            }
            Slot::Optional(group) => {
                if self.next_is_group(group) {
                    return self.parse_slots(group, arguments);
                }
            }
            Slot::Subdirective(subdirective) => {
                return Ok(self
                    .parse_subdirective(subdirective, arguments)?
                    .unwrap_or(false));
            }
        }

        Ok(false)
    }

    /// Parse every occurrence of a subdirective that follows.
    ///
    /// Returns `None` when there was none, otherwise whether the last one
    /// ended with a block.
    fn parse_subdirective(
        &mut self,
        subdirective: &Subdirective,
        arguments: &mut Arguments,
    ) -> Result<Option<bool>, Error> {
        let mut ended_with_block = None;

        while self.at_subdirective(subdirective.name)? {
            let mut nested = Arguments::default();
            ended_with_block = Some(self.parse_slots(&subdirective.slots, &mut nested)?);
            arguments.push_subdirective(subdirective.name, nested);

            if !subdirective.repeating {
                break;
            }
        }

        Ok(ended_with_block)
    }

    /// Consume `#name` if it follows, possibly after whitespace.
    fn at_subdirective(&mut self, name: &str) -> Result<bool, Error> {
        let mark = self.lexer.mark()?;
        self.lexer.skip_whitespace();

        if self.lexer.eat_char('#') {
            if let Some(region) = self.lexer.lex_name() {
                if region.literal(self.lexer.source) == name {
                    self.lexer.clear_mark(mark);
                    return Ok(true);
                }
            }
        }
        self.lexer.rewind(mark);

        Ok(false)
    }

    /// Parse the block handed to a directive, in any of its three forms:
    /// `{ ... }`, `#begin ... #end`, or a bare block ending with `#end`.
    fn parse_block_argument(&mut self) -> Result<Block, Error> {
        let mark = self.lexer.mark()?;
        self.lexer.skip_whitespace();

        if self.lexer.eat_char('{') {
            self.lexer.clear_mark(mark);
            self.skip_line_break();
            let block = self.parse_block(Mode::Brace)?;
            self.skip_line_break();

            return Ok(block);
        }

        if self.at_begin() {
            self.lexer.clear_mark(mark);
            self.skip_line_break();

            return self.parse_block(Mode::End);
        }

        self.lexer.rewind(mark);
        self.skip_line_break();

        self.parse_block(Mode::End)
    }

    /// Read raw text for a directive, up to the balancing `}` or the marker.
    fn parse_text_argument(&mut self, marker: &str) -> Result<String, Error> {
        let source = self.lexer.source;
        let mark = self.lexer.mark()?;
        self.lexer.skip_whitespace();

        let region = if self.lexer.eat_char('{') {
            self.lexer.clear_mark(mark);
            self.lexer.lex_raw_braced()?
        } else if self.at_begin() {
            self.lexer.clear_mark(mark);
            self.skip_line_break();
            self.lexer.lex_until(marker)?
        } else {
            self.lexer.rewind(mark);
            self.skip_line_break();
            self.lexer.lex_until(marker)?
        };
        self.skip_line_break();

        Ok(region.literal(source).to_string())
    }

    /// Consume `#begin` if it is at the cursor.
    fn at_begin(&mut self) -> bool {
        let length = "#begin".len();
        let follows_name = self
            .lexer
            .peek_char_at(length)
            .is_some_and(|c| self.lexer.is_name_continue(c));

        if self.lexer.starts_with("#begin") && !follows_name {
            self.lexer.cursor += length;
            true
        } else {
            false
        }
    }

    /// Parse a macro invocation, with arguments when a `(` follows directly.
    fn parse_invoke(&mut self, name: &str, begin: usize) -> Result<Invoke, Error> {
        let parenthesized = self.lexer.eat_char('(');
        let arguments = if parenthesized {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        let region = Region::new(begin..self.lexer.cursor);
        if !parenthesized {
            self.lexer.skip_spaces();
        }

        Ok(Invoke {
            name: name.to_string(),
            arguments,
            region,
        })
    }

    /// Parse comma separated expressions up to `)`, with the `(` already
    /// consumed.
    fn parse_arguments(&mut self) -> Result<Vec<Expression>, Error> {
        self.parse_list(Token::CloseParen)
    }

    /// Parse comma separated expressions up to the given closing token.
    fn parse_list(&mut self, close: Token) -> Result<Vec<Expression>, Error> {
        self.nesting += 1;
        let mut items = Vec::new();

        if self.next_is(close) {
            self.next_any_must()?;
            self.nesting -= 1;
            return Ok(items);
        }

        loop {
            items.push(self.parse_expression()?);
            let (token, region) = self.next_any_must()?;
            match token {
                Token::Comma => continue,
                t if t == close => break,
                _ => {
                    return Err(self.error_unexpected(region, &format!("expected `,` or {close}")))
                }
            }
        }
        self.nesting -= 1;

        Ok(items)
    }

    /// Parse `'key': value, ... }` with the `{` already consumed.
    ///
    /// A key is a word or a quoted string without references.
    fn parse_map(&mut self) -> Result<Vec<(String, Expression)>, Error> {
        let source = self.lexer.source;
        self.nesting += 1;
        let mut entries = Vec::new();

        if self.next_is(Token::CloseBrace) {
            self.next_any_must()?;
            self.nesting -= 1;
            return Ok(entries);
        }

        loop {
            let (token, region) = self.next_any_must()?;
            let key = match token {
                Token::Word => region.literal(source).to_string(),
                Token::Quote(quote) => match self.parse_quoted(quote, region.begin)? {
                    Expression::Literal(Value::String(key), _) => key,
                    other => {
                        return Err(self.error_unexpected(
                            other.get_region(),
                            "a map key cannot contain variables",
                        ))
                    }
                },
                _ => return Err(self.error_unexpected(region, "expected a map key")),
            };
            self.next_must(Token::Colon)?;
            entries.push((key, self.parse_expression()?));

            let (token, region) = self.next_any_must()?;
            match token {
                Token::Comma => continue,
                Token::CloseBrace => break,
                _ => return Err(self.error_unexpected(region, "expected `,` or `}`")),
            }
        }
        self.nesting -= 1;

        Ok(entries)
    }

    /// Parse `$a, $b)` with the `(` already consumed.
    fn parse_params(&mut self) -> Result<Vec<String>, Error> {
        let source = self.lexer.source;
        let mut params = Vec::new();

        if self.next_is(Token::CloseParen) {
            self.next_any_must()?;
            return Ok(params);
        }

        loop {
            let (_, dollar) = self.next_must(Token::Dollar)?;
            let Some(name) = self.lexer.lex_name() else {
                return Err(self.error_unexpected(dollar, "expected a parameter name after `$`"));
            };
            params.push(name.literal(source).to_string());

            let (token, region) = self.next_any_must()?;
            match token {
                Token::Comma => continue,
                Token::CloseParen => break,
                _ => return Err(self.error_unexpected(region, "expected `,` or `)`")),
            }
        }

        Ok(params)
    }

    /// Parse the path of a variable, with the `$` at `begin` already
    /// consumed.
    ///
    /// Returns `None` without consuming anything when no name follows,
    /// meaning the `$` is literal.
    fn parse_reference(&mut self, begin: usize) -> Result<Option<Reference>, Error> {
        if self.lexer.peek_char() == Some('(') {
            let mark = self.lexer.mark()?;
            self.lexer.eat_char('(');
            self.lexer.skip_whitespace();

            let path = self.parse_path()?;
            if path.is_empty() {
                self.lexer.rewind(mark);
                return Ok(None);
            }
            self.lexer.clear_mark(mark);
            self.lexer.skip_whitespace();
            if !self.lexer.eat_char(')') {
                let cursor = self.lexer.cursor;
                return Err(self.error_unexpected(
                    Region::new(begin..cursor),
                    "expected `)` to close the variable opened with `$(`",
                ));
            }

            return Ok(Some(Reference {
                path,
                region: Region::new(begin..self.lexer.cursor),
            }));
        }

        let path = self.parse_path()?;
        if path.is_empty() {
            return Ok(None);
        }

        Ok(Some(Reference {
            path,
            region: Region::new(begin..self.lexer.cursor),
        }))
    }

    /// Parse `name(.name | .digits | .name(args))*`.
    ///
    /// A `.` that is not followed by a name or digit is left in place.
    fn parse_path(&mut self) -> Result<Vec<Step>, Error> {
        let mut path = Vec::new();
        let Some(first) = self.parse_step()? else {
            return Ok(path);
        };
        path.push(first);

        while self.lexer.peek_char() == Some('.') {
            match self.lexer.peek_char_at(1) {
                Some(c) if c.is_ascii_digit() => {
                    self.lexer.eat_char('.');
                    let begin = self.lexer.cursor;
                    while self.lexer.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                        self.lexer.cursor += 1;
                    }
                    let digits = &self.lexer.source[begin..self.lexer.cursor];
                    path.push(Step::Name(digits.to_string()));
                }
                Some(c) if self.lexer.is_name_start(c) => {
                    self.lexer.eat_char('.');
                    if let Some(step) = self.parse_step()? {
                        path.push(step);
                    }
                }
                _ => break,
            }
        }

        Ok(path)
    }

    /// Parse a name, followed by arguments when a `(` follows directly.
    fn parse_step(&mut self) -> Result<Option<Step>, Error> {
        let Some(region) = self.lexer.lex_name() else {
            return Ok(None);
        };
        let name = region.literal(self.lexer.source).to_string();

        if self.lexer.eat_char('(') {
            let arguments = self.parse_arguments()?;
            return Ok(Some(Step::Call(name, arguments)));
        }

        Ok(Some(Step::Name(name)))
    }

    /// Parse the inside of a quoted string, with the opening quote at
    /// `begin` already consumed.
    fn parse_quoted(&mut self, quote: char, begin: usize) -> Result<Expression, Error> {
        let source = self.lexer.source;
        let mut parts = Vec::new();
        let mut text = String::new();

        loop {
            let Some((token, region)) = self.lexer.next_quoted(quote)? else {
                return Err(error_eof(source).with_kind(Kind::Parse));
            };

            match token {
                Token::Quote(_) => break,
                Token::Escape => {
                    let literal = region.literal(source);
                    match &literal[1..] {
                        "n" => text.push('\n'),
                        "t" => text.push('\t'),
                        "r" => text.push('\r'),
                        "\\" | "\"" | "'" | "$" => text.push_str(&literal[1..]),
                        _ => text.push_str(literal),
                    }
                }
                Token::Dollar => match self.parse_reference(region.begin)? {
                    Some(reference) => {
                        if !text.is_empty() {
                            parts.push(Part::Text(std::mem::take(&mut text)));
                        }
                        parts.push(Part::Reference(reference));
                    }
                    None => text.push('$'),
                },
                _ => text.push_str(region.literal(source)),
            }
        }

        let region = Region::new(begin..self.lexer.cursor);
        if parts.is_empty() {
            return Ok(Expression::Literal(Value::String(text), region));
        }
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }

        Ok(Expression::Quoted(parts, region))
    }

    /// Parse an expression.
    ///
    /// From lowest to highest precedence: `||`, `&&`, `!`, equality,
    /// relational, additive, multiplicative, unary `-`.
    fn parse_expression(&mut self) -> Result<Expression, Error> {
        let mut left = self.parse_and()?;
        while self.next_is_operator(Operator::Or, &["OR", "or"]) {
            self.next_any_must()?;
            let right = self.parse_and()?;
            left = binary(Operator::Or, left, right);
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, Error> {
        let mut left = self.parse_not()?;
        while self.next_is_operator(Operator::And, &["AND", "and"]) {
            self.next_any_must()?;
            let right = self.parse_not()?;
            left = binary(Operator::And, left, right);
        }

        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression, Error> {
        if self.next_is(Token::Exclamation) {
            let (_, region) = self.next_any_must()?;
            let operand = self.parse_not()?;
            let region = region.combine(operand.get_region());

            return Ok(Expression::Unary(Unary::Not, Box::new(operand), region));
        }

        self.parse_binary(0)
    }

    /// Parse the binary operators from equality upwards, one precedence
    /// level per step.
    fn parse_binary(&mut self, level: usize) -> Result<Expression, Error> {
        const LEVELS: [&[Operator]; 4] = [
            &[Operator::Equal, Operator::NotEqual],
            &[
                Operator::Lesser,
                Operator::LesserOrEqual,
                Operator::Greater,
                Operator::GreaterOrEqual,
            ],
            &[Operator::Add, Operator::Subtract],
            &[Operator::Multiply, Operator::Divide],
        ];

        let Some(operators) = LEVELS.get(level) else {
            return self.parse_unary();
        };

        let mut left = self.parse_binary(level + 1)?;
        while let Some((Token::Operator(operator), _)) = self.peek() {
            if !operators.contains(&operator) {
                break;
            }
            self.next_any_must()?;
            let right = self.parse_binary(level + 1)?;
            left = binary(operator, left, right);
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, Error> {
        if self.next_is(Token::Operator(Operator::Subtract)) {
            let (_, region) = self.next_any_must()?;
            if self.next_is(Token::Number) {
                let (_, number) = self.next_any_must()?;
                return self.parse_number(number, Some(region));
            }
            let operand = self.parse_unary()?;
            let region = region.combine(operand.get_region());

            return Ok(Expression::Unary(Unary::Negate, Box::new(operand), region));
        }

        self.parse_primary()
    }

    /// Parse an integer literal, with the region of a leading minus sign
    /// when the literal is negated.
    ///
    /// The sign is applied before the range check, so `i64::MIN` can be
    /// written.
    fn parse_number(&self, region: Region, minus: Option<Region>) -> Result<Expression, Error> {
        let source = self.lexer.source;
        let digits = region.literal(source).trim_end_matches(['l', 'L']);
        let (literal, region) = match minus {
            Some(minus) => (format!("-{digits}"), minus.combine(region)),
            None => (digits.to_string(), region),
        };
        let number = literal.parse::<i64>().map_err(|_| {
            Error::build(INVALID_SYNTAX)
                .with_kind(Kind::Parse)
                .with_pointer(source, region)
                .with_help("integer literal does not fit in 64 bits")
        })?;

        Ok(Expression::Literal(Value::from(number), region))
    }

    fn parse_primary(&mut self) -> Result<Expression, Error> {
        let source = self.lexer.source;
        let (token, region) = self.next_any_must()?;

        match token {
            Token::Number => self.parse_number(region, None),
            Token::Quote(quote) => self.parse_quoted(quote, region.begin),
            Token::Word => match region.literal(source) {
                "true" => Ok(Expression::Literal(Value::Bool(true), region)),
                "false" => Ok(Expression::Literal(Value::Bool(false), region)),
                "null" | "undefined" => Ok(Expression::Literal(Value::Null, region)),
                word => Err(self.error_unexpected(
                    region,
                    &format!("a bare word is not a value, did you mean `${word}` or `\"{word}\"`?"),
                )),
            },
            Token::OpenParen => {
                self.nesting += 1;
                let inner = self.parse_expression()?;
                self.next_must(Token::CloseParen)?;
                self.nesting -= 1;

                Ok(inner)
            }
            Token::OpenBracket => {
                let items = self.parse_list(Token::CloseBracket)?;
                let region = Region::new(region.begin..self.lexer.cursor);

                Ok(Expression::List(items, region))
            }
            Token::OpenBrace => {
                let entries = self.parse_map()?;
                let region = Region::new(region.begin..self.lexer.cursor);

                Ok(Expression::Map(entries, region))
            }
            Token::Dollar => match self.parse_reference(region.begin)? {
                Some(reference) => Ok(Expression::Reference(reference)),
                None => Err(self.error_unexpected(region, "expected a variable name after `$`")),
            },
            _ => Err(self.error_unexpected(
                region,
                "expected a variable, a number, a string, a list, a map, `true`, `false` or `null`",
            )),
        }
    }

    /// Skip spaces and tabs, then one newline.
    fn skip_line_break(&mut self) {
        self.lexer.skip_spaces();
        self.lexer.skip_newline();
    }

    /// Return true if the next token is the given operator, or one of the
    /// words that spell it.
    fn next_is_operator(&mut self, operator: Operator, words: &[&str]) -> bool {
        match self.peek() {
            Some((Token::Operator(next), _)) => next == operator,
            Some((Token::Word, region)) => words.contains(&region.literal(self.lexer.source)),
            _ => false,
        }
    }

    /// Return true if the next token is the keyword that opens the group.
    fn next_is_group(&mut self, group: &[Slot]) -> bool {
        let Some(Slot::Keyword(word)) = group.first() else {
            return false;
        };

        matches!(
            self.peek(),
            Some((Token::Word, region)) if region.literal(self.lexer.source) == *word
        )
    }

    /// Peek the next expression token.
    fn peek(&mut self) -> Option<(Token, Region)> {
        self.lexer.peek_token(self.nesting > 0)
    }

    /// Get the next expression token.
    fn next(&mut self) -> TokenResult {
        self.lexer.next_token()
    }

    /// Returns true if the given token matches the upcoming token.
    fn next_is(&mut self, expect: Token) -> bool {
        self.peek().is_some_and(|(token, _)| token == expect)
    }

    /// Get the next token, and compare it to the given token.
    ///
    /// # Errors
    ///
    /// An error is returned if the next token does not match the given token,
    /// or when the source is exhausted.
    fn next_must(&mut self, expect: Token) -> Result<(Token, Region), Error> {
        let (token, region) = self.next_any_must()?;
        if token != expect {
            return Err(self.error_unexpected(region, &format!("expected {expect}")));
        }

        Ok((token, region))
    }

    /// Get the next token, requiring that one is left.
    fn next_any_must(&mut self) -> Result<(Token, Region), Error> {
        match self.next()? {
            Some(next) => Ok(next),
            None => Err(error_eof(self.lexer.source).with_kind(Kind::Parse)),
        }
    }

    fn error_unexpected(&self, region: Region, help: &str) -> Error {
        Error::build(UNEXPECTED_TOKEN)
            .with_kind(Kind::Parse)
            .with_pointer(self.lexer.source, region)
            .with_help(help)
    }

    fn error_unclosed(&self, close: &str, begin: usize) -> Error {
        let (line, column) = Region::new(begin..begin).position(self.lexer.source);

        error_eof(self.lexer.source)
            .with_kind(Kind::Parse)
            .with_help(format!(
                "expected `{close}` to close the block opened at {line}:{column}"
            ))
    }
}

fn binary(operator: Operator, left: Expression, right: Expression) -> Expression {
    let region = left.get_region().combine(right.get_region());

    Expression::Binary(operator, Box::new(left), Box::new(right), region)
}

#[cfg(test)]
mod tests {
    use super::{
        tree::{Element, Expression, Part, Step},
        Parser,
    };
    use crate::{compile::Operator, log::Error, Engine, Kind};
    use serde_json::json;

    fn parse(source: &str) -> Result<Vec<Element>, Error> {
        let engine = Engine::new();
        Parser::new(source, &engine).parse().map(|block| block.elements)
    }

    fn text(elements: &[Element]) -> String {
        elements
            .iter()
            .map(|element| match element {
                Element::Text(text, _) => text.as_str(),
                _ => "?",
            })
            .collect()
    }

    #[test]
    fn test_plain_text() -> Result<(), Error> {
        let elements = parse("hello { world }")?;

        assert_eq!(elements.len(), 1);
        assert_eq!(text(&elements), "hello { world }");

        Ok(())
    }

    #[test]
    fn test_escapes() -> Result<(), Error> {
        let elements = parse("\\$a \\#if \\{\\} \\\\ \\n")?;

        assert_eq!(text(&elements), "$a #if {} \\ \\n");

        Ok(())
    }

    #[test]
    fn test_literal_hash_and_dollar() -> Result<(), Error> {
        let elements = parse("a#b color:#fff $ 5 #1 cost $.")?;

        assert_eq!(text(&elements), "a#b color:#fff $ 5 #1 cost $.");

        Ok(())
    }

    #[test]
    fn test_comment() -> Result<(), Error> {
        let elements = parse("one ## dropped\ntwo")?;

        assert_eq!(text(&elements), "one two");

        Ok(())
    }

    #[test]
    fn test_reference_path() -> Result<(), Error> {
        let elements = parse("$user.name.0.upper($a, 1). end")?;
        let Some(Element::Variable(reference)) = elements.first() else {
            panic!("expected a variable, found {elements:?}");
        };

        assert_eq!(reference.path.len(), 4);
        assert_eq!(reference.path[0], Step::Name("user".to_string()));
        assert_eq!(reference.path[2], Step::Name("0".to_string()));
        assert!(matches!(&reference.path[3], Step::Call(name, args) if name == "upper" && args.len() == 2));
        assert_eq!(text(&elements[1..]), ". end");

        Ok(())
    }

    #[test]
    fn test_delimited_reference() -> Result<(), Error> {
        let elements = parse("$(user.name)s")?;
        let Some(Element::Variable(reference)) = elements.first() else {
            panic!("expected a variable, found {elements:?}");
        };

        assert_eq!(reference.dotted(), "user.name");
        assert_eq!(text(&elements[1..]), "s");

        Ok(())
    }

    #[test]
    fn test_directive_arguments() -> Result<(), Error> {
        let elements = parse("#foreach $x in $list limit 2 indexing $i from 0 {$x}")?;
        let Some(Element::Directive(call)) = elements.first() else {
            panic!("expected a directive, found {elements:?}");
        };

        assert_eq!(call.name, "foreach");
        assert_eq!(call.arguments.target("target").map(|r| r.dotted()), Some("x".to_string()));
        assert!(call.arguments.has("limit"));
        assert!(call.arguments.has("index"));
        assert!(call.arguments.has("from"));
        assert_eq!(call.arguments.block("body").map(|b| b.elements.len()), Some(1));

        Ok(())
    }

    #[test]
    fn test_subdirectives() -> Result<(), Error> {
        let elements = parse("#if ($a) a #elseif ($b) b #elseif ($c) c #else d #end")?;
        let Some(Element::Directive(call)) = elements.first() else {
            panic!("expected a directive, found {elements:?}");
        };

        assert_eq!(call.arguments.subdirectives("elseif").count(), 2);
        assert!(call.arguments.subdirective("else").is_some());
        assert_eq!(elements.len(), 1);

        Ok(())
    }

    #[test]
    fn test_expression_precedence() -> Result<(), Error> {
        let elements = parse("#set $a = 1 + 2 * 3 == 7 && !false")?;
        let Some(Element::Directive(call)) = elements.first() else {
            panic!("expected a directive, found {elements:?}");
        };
        let Some(Expression::Binary(Operator::And, left, _, _)) = call.arguments.expression("value")
        else {
            panic!("expected `&&` at the root");
        };

        assert!(matches!(**left, Expression::Binary(Operator::Equal, ..)));

        Ok(())
    }

    #[test]
    fn test_negative_literal() -> Result<(), Error> {
        let elements = parse("#set $a = -9223372036854775808")?;
        let Some(Element::Directive(call)) = elements.first() else {
            panic!("expected a directive, found {elements:?}");
        };

        assert!(matches!(
            call.arguments.expression("value"),
            Some(Expression::Literal(value, _)) if *value == json!(i64::MIN)
        ));
        assert!(parse("#set $a = 9223372036854775808").is_err());

        let elements = parse("#set $a = -$b")?;
        let Some(Element::Directive(call)) = elements.first() else {
            panic!("expected a directive, found {elements:?}");
        };
        assert!(matches!(call.arguments.expression("value"), Some(Expression::Unary(..))));

        Ok(())
    }

    #[test]
    fn test_expression_stops_at_newline() -> Result<(), Error> {
        let elements = parse("#set $a = 1\n- item")?;

        assert_eq!(elements.len(), 2);
        assert_eq!(text(&elements[1..]), "\n- item");

        Ok(())
    }

    #[test]
    fn test_quoted_parts() -> Result<(), Error> {
        let elements = parse("#set $a = \"Hi $name!\\n\" #set $b = 'plain'")?;
        let Some(Element::Directive(first)) = elements.first() else {
            panic!("expected a directive");
        };
        let Some(Element::Directive(second)) = elements.get(1) else {
            panic!("expected a directive");
        };

        let Some(Expression::Quoted(parts, _)) = first.arguments.expression("value") else {
            panic!("expected a quoted string");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], Part::Text("!\n".to_string()));
        assert!(matches!(
            second.arguments.expression("value"),
            Some(Expression::Literal(value, _)) if *value == json!("plain")
        ));

        Ok(())
    }

    #[test]
    fn test_unknown_directive() {
        let error = parse("text #nothing here").unwrap_err();

        assert_eq!(error.get_reason(), "unknown directive");
        assert_eq!(error.get_kind(), Kind::Parse);
    }

    #[test]
    fn test_relaxed_unknown_directive() -> Result<(), Error> {
        let engine = Engine::new().with_relaxed(true);
        let elements = Parser::new("text #nothing here", &engine).parse()?.elements;

        assert_eq!(text(&elements), "text #nothing here");

        Ok(())
    }

    #[test]
    fn test_stray_end_and_else() {
        assert!(parse("text #end").is_err());
        assert!(parse("{ #else }").is_err());
        assert!(parse("#begin").is_err());
    }

    #[test]
    fn test_unclosed_blocks() {
        assert!(parse("#if (true) { never closed").is_err());
        assert!(parse("#if (true) never ended").is_err());
        assert!(parse("#set $a = \"open").is_err());
        assert!(parse("#if (true {x}").is_err());
    }

    #[test]
    fn test_macro_names_known_after_definition() -> Result<(), Error> {
        assert!(parse("#greet #macro greet {hi}").is_err());

        let elements = parse("#macro greet {hi} #greet(1, 2)")?;
        assert!(matches!(&elements[1], Element::Invoke(invoke) if invoke.arguments.len() == 2));

        Ok(())
    }

    #[test]
    fn test_text_directive_is_raw() -> Result<(), Error> {
        let elements = parse("#text { $a #if { } }")?;
        let Some(Element::Directive(call)) = elements.first() else {
            panic!("expected a directive");
        };

        assert_eq!(call.arguments.text("text"), Some(" $a #if { } "));

        Ok(())
    }
}
