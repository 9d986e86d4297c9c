mod assign;
mod control;
mod define;
mod escape;
mod text;

pub use assign::{ConstDirective, ParamDirective, SetDirective, SetblockDirective, TempletDirective};
pub use control::{
    AlternateDirective, CountDirective, EvalDirective, ForeachDirective, IfDirective,
    IncludeDirective, WhileDirective,
};
pub use define::{Definition, MacroDirective};
pub use escape::{FilterDirective, HtmlEscapeDirective, SilenceDirective};
pub use text::{CommentDirective, TextDirective};

use crate::{
    compile::{
        build::{BuildContext, Built},
        tree::{Block, Expression, Reference},
    },
    log::{error_build, Error, Kind, INVALID_DIRECTIVE},
    region::Region,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// A template command, such as `#if` or `#foreach`.
///
/// The [`Descriptor`] tells the parser which arguments to read after the
/// directive name. Once they are read, `build` turns them into either a
/// constant or an evaluation node.
///
/// # Examples
///
/// A directive that upper cases a constant string at build time:
///
/// ```
/// use macrame::{
///     directive::{Call, Descriptor, Directive, Slot},
///     BuildContext, Built, Engine, Error,
/// };
/// use serde_json::Value;
///
/// struct Shout;
///
/// impl Directive for Shout {
///     fn descriptor(&self) -> Descriptor {
///         Descriptor::new("shout").with(Slot::Value("value"))
///     }
///
///     fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
///         let Some(expression) = call.arguments.expression("value") else {
///             return Ok(Built::Constant(Value::Null));
///         };
///
///         match context.build_expression(expression)? {
///             Built::Constant(Value::String(text)) => {
///                 Ok(Built::Constant(Value::String(text.to_uppercase())))
///             }
///             other => Ok(other),
///         }
///     }
/// }
///
/// let engine = Engine::new().with_directive_must(Shout).unwrap();
/// let template = engine.compile("#shout \"hello\"").unwrap();
/// let result = template.evaluate(&mut engine.context()).unwrap();
///
/// assert_eq!(result, "HELLO");
/// ```
pub trait Directive: Send + Sync {
    /// Return the [`Descriptor`] describing the arguments of this directive.
    fn descriptor(&self) -> Descriptor;

    /// Build an occurrence of this directive.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the arguments cannot be assembled.
    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error>;

    /// Return a name identifying the implementation.
    ///
    /// Registering two implementations under one directive name is rejected.
    fn implementation(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Kind of argument expected by a directive, in the order it is read.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// A parenthesized expression, such as `($a == 1)`.
    Condition(&'static str),
    /// A variable that will be assigned to, such as `$item`.
    Target(&'static str),
    /// Any expression.
    Value(&'static str),
    /// A quoted string.
    Quoted(&'static str),
    /// A bare name, such as the name of a macro.
    Define(&'static str),
    /// An optional parenthesized list of variables, such as `($a, $b)`.
    Params(&'static str),
    /// A fixed word, such as `in`.
    Keyword(&'static str),
    /// `=`
    Assign,
    /// A block of template text.
    Block(&'static str),
    /// A block of raw text that is not parsed, and the marker that ends the
    /// `#begin` form of it.
    Text(&'static str, &'static str),
    /// A group of slots that is only read when the first keyword is present.
    Optional(Vec<Slot>),
    /// A dependent directive, such as `#else` after `#if`.
    Subdirective(Subdirective),
}

/// A directive that may only follow its parent, such as `#elseif`.
#[derive(Debug, Clone, PartialEq)]
pub struct Subdirective {
    pub name: &'static str,
    pub slots: Vec<Slot>,
    /// True when the subdirective may appear more than once.
    pub repeating: bool,
}

impl Subdirective {
    /// Create a new [`Subdirective`] that may appear at most once.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Vec::new(),
            repeating: false,
        }
    }

    /// Add a [`Slot`].
    pub fn with(mut self, slot: Slot) -> Self {
        self.slots.push(slot);
        self
    }

    /// Allow the subdirective to appear more than once.
    pub fn repeating(mut self) -> Self {
        self.repeating = true;
        self
    }
}

/// Declares the name of a directive and the arguments it accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub name: &'static str,
    pub slots: Vec<Slot>,
}

impl Descriptor {
    /// Create a new [`Descriptor`] with no slots.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Vec::new(),
        }
    }

    /// Add a [`Slot`].
    pub fn with(mut self, slot: Slot) -> Self {
        self.slots.push(slot);
        self
    }
}

/// A validated [`Descriptor`] with a summary of its shape, consulted by the
/// parser for every occurrence of the directive.
#[derive(Debug, Clone)]
pub struct Prototype {
    pub descriptor: Descriptor,
    /// Every keyword accepted by the directive.
    pub verbs: Vec<&'static str>,
    /// True when the directive contains a parsed block.
    pub container: bool,
    /// True when the directive contains raw text.
    pub parser: bool,
    pub condition: bool,
    pub target: bool,
    pub subdirectives: Vec<&'static str>,
}

impl Prototype {
    /// Validate a [`Descriptor`] and create a [`Prototype`] from it.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the shape is ambiguous, or a keyword or text
    /// marker is missing.
    pub fn analyze(descriptor: Descriptor) -> Result<Self, Error> {
        let mut prototype = Self {
            descriptor: Descriptor::new(descriptor.name),
            verbs: Vec::new(),
            container: false,
            parser: false,
            condition: false,
            target: false,
            subdirectives: Vec::new(),
        };
        prototype.visit(descriptor.name, &descriptor.slots)?;
        if prototype.container && prototype.parser {
            return Err(error_registration(
                descriptor.name,
                "a directive may contain a block or raw text, but not both",
            ));
        }
        prototype.descriptor = descriptor;

        Ok(prototype)
    }

    /// Create an empty [`Call`] for an occurrence of the directive.
    pub fn instantiate(&self, region: Region) -> Call {
        Call {
            name: self.descriptor.name,
            region,
            arguments: Arguments::default(),
        }
    }

    fn visit(&mut self, name: &'static str, slots: &[Slot]) -> Result<(), Error> {
        let mut after_block = false;

        for slot in slots {
            if after_block && !matches!(slot, Slot::Subdirective(_)) {
                return Err(error_registration(
                    name,
                    "only subdirectives may follow a block",
                ));
            }

            match slot {
                Slot::Condition(_) => self.condition = true,
                Slot::Target(_) => self.target = true,
                Slot::Keyword(word) => {
                    if word.is_empty() {
                        return Err(error_registration(name, "keyword is missing its verb"));
                    }
                    if !self.verbs.contains(word) {
                        self.verbs.push(*word);
                    }
                }
                Slot::Block(_) => {
                    self.container = true;
                    after_block = true;
                }
                Slot::Text(_, marker) => {
                    if marker.is_empty() {
                        return Err(error_registration(name, "raw text is missing its marker"));
                    }
                    self.parser = true;
                    after_block = true;
                }
                Slot::Optional(group) => {
                    if !matches!(group.first(), Some(Slot::Keyword(_))) {
                        return Err(error_registration(
                            name,
                            "an optional group must begin with a keyword",
                        ));
                    }
                    self.visit(name, group)?;
                }
                Slot::Subdirective(subdirective) => {
                    self.subdirectives.push(subdirective.name);
                    self.visit(subdirective.name, &subdirective.slots)?;
                }
                Slot::Value(_)
                | Slot::Quoted(_)
                | Slot::Define(_)
                | Slot::Params(_)
                | Slot::Assign => (),
            }
        }

        Ok(())
    }
}

fn error_registration(name: &str, help: &str) -> Error {
    Error::build(INVALID_DIRECTIVE)
        .with_kind(Kind::Registration)
        .with_help(format!("directive `{name}`: {help}"))
}

/// Registered directive, with the [`Prototype`] computed for it.
#[derive(Clone)]
pub struct Entry {
    pub directive: Arc<dyn Directive>,
    pub prototype: Arc<Prototype>,
}

/// Directives known to an [`Engine`][`crate::Engine`], by name.
#[derive(Clone, Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
    subdirectives: HashSet<&'static str>,
}

impl Registry {
    /// Validate and register a [`Directive`].
    ///
    /// Registering the same implementation twice is allowed.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the [`Descriptor`] is invalid, or the name
    /// is already bound to a different implementation.
    pub fn register<T>(&mut self, directive: T) -> Result<(), Error>
    where
        T: Directive + 'static,
    {
        let name = directive.descriptor().name;
        if let Some(existing) = self.entries.get(name) {
            if existing.directive.implementation() != directive.implementation() {
                return Err(error_registration(
                    name,
                    &format!(
                        "name is already bound to `{}`, replace it with `.add_directive_must`",
                        existing.directive.implementation()
                    ),
                ));
            }
        }

        self.register_must(directive)
    }

    /// Validate and register a [`Directive`], replacing any directive with
    /// the same name.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the [`Descriptor`] is invalid.
    pub fn register_must<T>(&mut self, directive: T) -> Result<(), Error>
    where
        T: Directive + 'static,
    {
        let prototype = Prototype::analyze(directive.descriptor())?;
        let name = prototype.descriptor.name;
        tracing::debug!(
            directive = name,
            implementation = directive.implementation(),
            "registered directive"
        );

        self.entries.insert(
            name.to_string(),
            Entry {
                directive: Arc::new(directive),
                prototype: Arc::new(prototype),
            },
        );
        self.subdirectives = self
            .entries
            .values()
            .flat_map(|entry| entry.prototype.subdirectives.iter().copied())
            .collect();

        Ok(())
    }

    /// Return the [`Entry`] registered under the given name.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Return true if the given name belongs to a subdirective of any
    /// registered directive.
    pub fn is_subdirective(&self, name: &str) -> bool {
        self.subdirectives.contains(name)
    }
}

/// An occurrence of a directive within a template, with its parsed arguments.
#[derive(Debug, Clone)]
pub struct Call {
    pub name: &'static str,
    pub region: Region,
    pub arguments: Arguments,
}

impl Call {
    /// Check that every required slot of the [`Descriptor`] was filled.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] naming the first missing argument.
    pub fn check(&self, descriptor: &Descriptor) -> Result<(), Error> {
        check_slots(self.name, &descriptor.slots, &self.arguments)
    }
}

/// Return the [`Error`] for a required argument that is absent.
pub(crate) fn missing(call: &Call, key: &str) -> Error {
    error_build(format!("missing `{key}` for `#{}`", call.name))
}

fn check_slots(name: &str, slots: &[Slot], arguments: &Arguments) -> Result<(), Error> {
    for slot in slots {
        let (key, what) = match slot {
            Slot::Condition(key) => (key, "condition"),
            Slot::Target(key) => (key, "target"),
            Slot::Value(key) => (key, "value"),
            Slot::Quoted(key) => (key, "string"),
            Slot::Define(key) => (key, "name"),
            Slot::Block(key) => (key, "block"),
            Slot::Text(key, _) => (key, "text"),
            Slot::Subdirective(subdirective) => {
                for nested in arguments.subdirectives(subdirective.name) {
                    check_slots(subdirective.name, &subdirective.slots, nested)?;
                }
                continue;
            }
            Slot::Params(_) | Slot::Keyword(_) | Slot::Assign | Slot::Optional(_) => continue,
        };
        if !arguments.has(key) {
            return Err(error_build(format!("missing {what} for `#{name}`")));
        }
    }

    Ok(())
}

/// Value parsed for one [`Slot`].
#[derive(Debug, Clone)]
pub enum Argument {
    Expression(Expression),
    Target(Reference),
    Word(String),
    Params(Vec<String>),
    Block(Block),
    Text(String),
}

/// Arguments parsed for one occurrence of a directive, by slot key.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: Vec<(&'static str, Argument)>,
    keywords: Vec<&'static str>,
    subdirectives: Vec<(&'static str, Arguments)>,
}

impl Arguments {
    /// Store the [`Argument`] for a slot key.
    pub fn push(&mut self, key: &'static str, argument: Argument) {
        self.values.push((key, argument));
    }

    /// Record that a keyword was written.
    pub fn push_keyword(&mut self, word: &'static str) {
        self.keywords.push(word);
    }

    /// Return true if the keyword was written, which is how an optional
    /// group made only of keywords, such as `as macro`, is told apart.
    pub fn has_keyword(&self, word: &str) -> bool {
        self.keywords.contains(&word)
    }

    /// Store the arguments of a subdirective.
    pub fn push_subdirective(&mut self, name: &'static str, arguments: Arguments) {
        self.subdirectives.push((name, arguments));
    }

    /// Return the [`Argument`] stored for a slot key.
    pub fn get(&self, key: &str) -> Option<&Argument> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, argument)| argument)
    }

    /// Return true if an [`Argument`] was stored for a slot key.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn expression(&self, key: &str) -> Option<&Expression> {
        match self.get(key)? {
            Argument::Expression(expression) => Some(expression),
            _ => None,
        }
    }

    pub fn target(&self, key: &str) -> Option<&Reference> {
        match self.get(key)? {
            Argument::Target(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn block(&self, key: &str) -> Option<&Block> {
        match self.get(key)? {
            Argument::Block(block) => Some(block),
            _ => None,
        }
    }

    pub fn word(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Argument::Word(word) => Some(word),
            _ => None,
        }
    }

    pub fn params(&self, key: &str) -> Option<&[String]> {
        match self.get(key)? {
            Argument::Params(params) => Some(params),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Argument::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Return the arguments of the first occurrence of a subdirective.
    pub fn subdirective<'a>(&'a self, name: &'a str) -> Option<&'a Arguments> {
        self.subdirectives(name).next()
    }

    /// Return the arguments of every occurrence of a subdirective, in order.
    pub fn subdirectives<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Arguments> {
        self.subdirectives
            .iter()
            .filter(move |(n, _)| *n == name)
            .map(|(_, arguments)| arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty(Descriptor);

    impl Directive for Empty {
        fn descriptor(&self) -> Descriptor {
            self.0.clone()
        }

        fn build(&self, _: &Call, _: &mut BuildContext) -> Result<Built, Error> {
            Ok(Built::Constant(serde_json::Value::Null))
        }
    }

    struct Other;

    impl Directive for Other {
        fn descriptor(&self) -> Descriptor {
            Descriptor::new("empty")
        }

        fn build(&self, _: &Call, _: &mut BuildContext) -> Result<Built, Error> {
            Ok(Built::Constant(serde_json::Value::Null))
        }
    }

    #[test]
    fn test_analyze_shape() -> Result<(), Error> {
        let descriptor = Descriptor::new("loop")
            .with(Slot::Target("target"))
            .with(Slot::Keyword("in"))
            .with(Slot::Value("list"))
            .with(Slot::Optional(vec![
                Slot::Keyword("limit"),
                Slot::Value("limit"),
            ]))
            .with(Slot::Block("body"))
            .with(Slot::Subdirective(
                Subdirective::new("otherwise").with(Slot::Block("otherwise")),
            ));
        let prototype = Prototype::analyze(descriptor)?;

        assert!(prototype.target);
        assert!(prototype.container);
        assert!(!prototype.condition);
        assert_eq!(prototype.verbs, vec!["in", "limit"]);
        assert_eq!(prototype.subdirectives, vec!["otherwise"]);

        Ok(())
    }

    #[test]
    fn test_analyze_rejects_ambiguous() {
        let missing_verb = Descriptor::new("a").with(Slot::Keyword(""));
        let missing_marker = Descriptor::new("b").with(Slot::Text("text", ""));
        let optional = Descriptor::new("c").with(Slot::Optional(vec![Slot::Value("v")]));
        let after_block = Descriptor::new("d")
            .with(Slot::Block("body"))
            .with(Slot::Value("v"));
        let both = Descriptor::new("e")
            .with(Slot::Optional(vec![Slot::Keyword("k"), Slot::Block("body")]))
            .with(Slot::Text("text", "#end"));

        for descriptor in [missing_verb, missing_marker, optional, after_block, both] {
            let error = Prototype::analyze(descriptor).unwrap_err();
            assert_eq!(error.get_kind(), Kind::Registration);
        }
    }

    #[test]
    fn test_register_collision() -> Result<(), Error> {
        let mut registry = Registry::default();
        registry.register(Empty(Descriptor::new("empty")))?;
        registry.register(Empty(Descriptor::new("empty")))?;

        assert!(registry.register(Other).is_err());
        assert!(registry.register_must(Other).is_ok());
        assert_eq!(
            registry.get("empty").map(|e| e.directive.implementation()),
            Some(Other.implementation())
        );

        Ok(())
    }

    #[test]
    fn test_replace_releases_subdirectives() -> Result<(), Error> {
        let mut registry = Registry::default();
        registry.register(Empty(Descriptor::new("empty").with(Slot::Block("body")).with(
            Slot::Subdirective(Subdirective::new("otherwise").with(Slot::Block("otherwise"))),
        )))?;
        assert!(registry.is_subdirective("otherwise"));

        registry.register_must(Other)?;
        assert!(!registry.is_subdirective("otherwise"));

        Ok(())
    }

    #[test]
    fn test_subdirective_arguments() {
        let mut arguments = Arguments::default();
        let mut first = Arguments::default();
        first.push("word", Argument::Word("a".to_string()));
        let mut second = Arguments::default();
        second.push("word", Argument::Word("b".to_string()));
        arguments.push_subdirective("elseif", first);
        arguments.push_subdirective("elseif", second);

        let found = arguments
            .subdirective("elseif")
            .and_then(|nested| nested.word("word"));
        assert_eq!(found, Some("a"));
        assert_eq!(arguments.subdirectives("elseif").count(), 2);
        assert!(arguments.subdirective("else").is_none());
    }

    #[test]
    fn test_check_missing() {
        let descriptor = Descriptor::new("set")
            .with(Slot::Target("target"))
            .with(Slot::Assign)
            .with(Slot::Value("value"));
        let prototype = Prototype::analyze(descriptor.clone()).unwrap();
        let mut call = prototype.instantiate(Region::new(0..4));

        assert!(call.check(&descriptor).is_err());

        call.arguments.push(
            "target",
            Argument::Target(Reference {
                path: Vec::new(),
                region: Region::default(),
            }),
        );
        call.arguments.push(
            "value",
            Argument::Expression(Expression::Literal(
                serde_json::Value::Null,
                Region::default(),
            )),
        );
        assert!(call.check(&descriptor).is_ok());
    }
}
