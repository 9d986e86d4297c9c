use crate::{
    compile::{directive::Call, Operator, Unary},
    region::Region,
};
use serde_json::Value;

/// Sequence of [`Element`] instances, produced for the template itself and
/// for every block handed to a directive.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub elements: Vec<Element>,
    pub region: Region,
}

impl Block {
    /// Create an empty [`Block`] beginning at the given position.
    pub fn new(begin: usize) -> Self {
        Self {
            elements: Vec::new(),
            region: Region::new(begin..begin),
        }
    }

    /// Append literal text, merging it into the previous [`Element`] when that
    /// is also text.
    pub fn push_text(&mut self, text: &str, region: Region) {
        if text.is_empty() {
            return;
        }
        if let Some(Element::Text(previous, previous_region)) = self.elements.last_mut() {
            previous.push_str(text);
            *previous_region = previous_region.combine(region);
            return;
        }

        self.elements.push(Element::Text(text.to_string(), region));
    }

    /// Append an [`Element`].
    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    /// Remove trailing spaces and tabs, one newline, and the spaces and tabs
    /// before that newline from the last text [`Element`].
    pub fn eat_trailing_ws_nl_ws(&mut self) {
        let Some(Element::Text(text, _)) = self.elements.last_mut() else {
            return;
        };

        let trimmed = text.trim_end_matches([' ', '\t']);
        let trimmed = trimmed
            .strip_suffix("\r\n")
            .or_else(|| trimmed.strip_suffix('\n'))
            .map(|rest| rest.trim_end_matches([' ', '\t']))
            .unwrap_or(trimmed);
        let keep = trimmed.len();
        text.truncate(keep);

        if text.is_empty() {
            self.elements.pop();
        }
    }

    /// Remove trailing spaces and tabs from the last text [`Element`].
    pub fn eat_trailing_spaces(&mut self) {
        let Some(Element::Text(text, _)) = self.elements.last_mut() else {
            return;
        };
        let keep = text.trim_end_matches([' ', '\t']).len();
        text.truncate(keep);

        if text.is_empty() {
            self.elements.pop();
        }
    }

    /// Return false when a `#` at this point must be literal, because the
    /// text before it ends in a letter, digit, `=`, a quote or `:`.
    ///
    /// This keeps things like `a#b`, `href="#top"` and `color:#fff` intact.
    pub fn directive_ok(&self) -> bool {
        match self.elements.last() {
            Some(Element::Text(text, _)) => !text
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || matches!(c, '=' | '\'' | '"' | ':')),
            _ => true,
        }
    }

    /// Return true when the [`Block`] has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// One piece of a [`Block`].
#[derive(Debug, Clone)]
pub enum Element {
    /// Literal text, with escapes already resolved.
    Text(String, Region),
    /// A variable reference in output position, such as `$user.name`.
    Variable(Reference),
    /// A directive, such as `#if`, with its parsed arguments.
    Directive(Call),
    /// Invocation of a user defined macro.
    Invoke(Invoke),
}

/// Invocation of a macro defined with `#macro`, such as `#greet("Bob")`.
#[derive(Debug, Clone)]
pub struct Invoke {
    pub name: String,
    pub arguments: Vec<Expression>,
    pub region: Region,
}

/// A dotted path into the context, such as `$a.b.method($c)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub path: Vec<Step>,
    pub region: Region,
}

impl Reference {
    /// Return the name of the first [`Step`].
    pub fn first(&self) -> &str {
        self.path.first().map(Step::name).unwrap_or_default()
    }

    /// Return every name in the path, or `None` when any [`Step`] is a call.
    pub fn names(&self) -> Option<Vec<&str>> {
        self.path
            .iter()
            .map(|step| match step {
                Step::Name(name) => Some(name.as_str()),
                Step::Call(..) => None,
            })
            .collect()
    }

    /// Return the path as text, such as `a.b.method`.
    pub fn dotted(&self) -> String {
        self.path
            .iter()
            .map(Step::name)
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Segment in a [`Reference`] path.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Property name or array index.
    Name(String),
    /// Method call with arguments.
    Call(String, Vec<Expression>),
}

impl Step {
    /// Return the name of the property or method.
    pub fn name(&self) -> &str {
        match self {
            Step::Name(name) | Step::Call(name, _) => name,
        }
    }
}

/// Unresolved expression, found in directive arguments, macro arguments
/// and method arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A number, boolean, null, or a string without references.
    Literal(Value, Region),
    /// A variable reference.
    Reference(Reference),
    /// A quoted string containing at least one reference.
    Quoted(Vec<Part>, Region),
    /// A list, such as `[1, $a]`.
    List(Vec<Expression>, Region),
    /// A map, such as `{'name': $a}`, keeping the order of its keys.
    Map(Vec<(String, Expression)>, Region),
    /// A unary operator applied to an operand.
    Unary(Unary, Box<Expression>, Region),
    /// A binary operator applied to two operands.
    Binary(Operator, Box<Expression>, Box<Expression>, Region),
}

impl Expression {
    /// Return the [`Region`] covered by the [`Expression`].
    pub fn get_region(&self) -> Region {
        match self {
            Expression::Literal(_, region)
            | Expression::Quoted(_, region)
            | Expression::List(_, region)
            | Expression::Map(_, region)
            | Expression::Unary(_, _, region)
            | Expression::Binary(_, _, _, region) => *region,
            Expression::Reference(reference) => reference.region,
        }
    }
}

/// Piece of a quoted string.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Reference(Reference),
}

#[cfg(test)]
mod tests {
    use super::{Block, Element};
    use crate::region::Region;

    fn text_block(text: &str) -> Block {
        let mut block = Block::new(0);
        block.push_text(text, Region::new(0..text.len()));
        block
    }

    fn last_text(block: &Block) -> Option<&str> {
        match block.elements.last() {
            Some(Element::Text(text, _)) => Some(text),
            _ => None,
        }
    }

    #[test]
    fn test_push_text_merges() {
        let mut block = text_block("one ");
        block.push_text("two", Region::new(4..7));

        assert_eq!(block.elements.len(), 1);
        assert_eq!(last_text(&block), Some("one two"));
    }

    #[test]
    fn test_eat_trailing_ws_nl_ws() {
        let mut block = text_block("keep\n  \n\t ");
        block.eat_trailing_ws_nl_ws();
        assert_eq!(last_text(&block), Some("keep\n"));

        let mut block = text_block("  \n");
        block.eat_trailing_ws_nl_ws();
        assert!(block.is_empty());

        let mut block = text_block("word ");
        block.eat_trailing_ws_nl_ws();
        assert_eq!(last_text(&block), Some("word"));
    }

    #[test]
    fn test_directive_ok() {
        assert!(Block::new(0).directive_ok());
        assert!(text_block("text ").directive_ok());
        assert!(!text_block("a").directive_ok());
        assert!(!text_block("href=\"").directive_ok());
        assert!(!text_block("color:").directive_ok());
    }
}
