use crate::{
    compile::{
        directive::{
            AlternateDirective, CommentDirective, ConstDirective, CountDirective, Definition,
            Directive, EvalDirective, FilterDirective, ForeachDirective, HtmlEscapeDirective,
            IfDirective, IncludeDirective, MacroDirective, ParamDirective, Registry, SetDirective,
            SetblockDirective, SilenceDirective, TempletDirective, TextDirective, WhileDirective,
        },
        Template,
    },
    filter::{self, Filter},
    function::{self, Function},
    log::{error_missing_template, Error, Kind},
    render::{
        handler::{DefaultHandler, Handler},
        Context,
    },
};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use serde_json::{to_value, Map, Value};
use std::{
    collections::HashMap,
    fmt::{self, Debug},
    sync::Arc,
};

/// Options that change how templates are parsed and evaluated.
#[derive(Clone)]
pub struct Settings {
    /// Write an unknown `#name` literally instead of failing.
    pub relaxed: bool,
    /// [`Handler`] every new [`Context`] starts with.
    pub handler: Arc<dyn Handler>,
    /// Characters accepted in names, in addition to identifier characters.
    pub name_chars: String,
    /// Maximum number of nested `#include` directives.
    pub include_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relaxed: false,
            handler: Arc::new(DefaultHandler),
            name_chars: String::new(),
            include_depth: 16,
        }
    }
}

impl Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("relaxed", &self.relaxed)
            .field("name_chars", &self.name_chars)
            .field("include_depth", &self.include_depth)
            .finish_non_exhaustive()
    }
}

/// Facilitates compiling and evaluating templates, and provides storage for
/// directives, filters, functions, tools, macros and named templates.
///
/// Registration happens through `&mut self`, so an `Engine` is configured
/// before it is shared. Named templates are the exception, they may be added
/// through a shared reference while other threads are rendering.
pub struct Engine {
    directives: Registry,
    filters: HashMap<String, Arc<dyn Filter>>,
    functions: HashMap<String, Arc<dyn Function>>,
    /// Values visible to every template, without being set in the context.
    tools: Map<String, Value>,
    /// Macros defined by libraries, visible to every template.
    macros: HashMap<String, Arc<Definition>>,
    templates: DashMap<String, Arc<Template>>,
    settings: Settings,
}

impl Engine {
    /// Create a new [`Engine`] with the built in directives, filters and
    /// functions.
    pub fn new() -> Self {
        let mut engine = Self {
            directives: Registry::default(),
            filters: HashMap::new(),
            functions: HashMap::new(),
            tools: Map::new(),
            macros: HashMap::new(),
            templates: DashMap::new(),
            settings: Settings::default(),
        };

        if let Err(error) = engine.register_builtins() {
            tracing::error!(%error, "failed to register built in directive");
        }
        engine.filters.insert("html".to_string(), Arc::new(filter::html));
        engine.filters.insert("url".to_string(), Arc::new(filter::url));
        for (name, function) in function::builtins() {
            engine.functions.insert(name.to_string(), function);
        }

        engine
    }

    fn register_builtins(&mut self) -> Result<(), Error> {
        let directives = &mut self.directives;
        directives.register(IfDirective)?;
        directives.register(ForeachDirective)?;
        directives.register(CountDirective)?;
        directives.register(WhileDirective)?;
        directives.register(AlternateDirective)?;
        directives.register(SetDirective)?;
        directives.register(SetblockDirective)?;
        directives.register(TempletDirective)?;
        directives.register(ConstDirective)?;
        directives.register(ParamDirective)?;
        directives.register(MacroDirective)?;
        directives.register(IncludeDirective)?;
        directives.register(EvalDirective)?;
        directives.register(FilterDirective)?;
        directives.register(HtmlEscapeDirective::new("htmlescape"))?;
        directives.register(HtmlEscapeDirective::new("escape"))?;
        directives.register(SilenceDirective)?;
        directives.register(TextDirective)?;
        directives.register(CommentDirective)?;

        Ok(())
    }

    /// Compile a new [`Template`].
    ///
    /// The template is named `?` in diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when compilation fails, which most likely means the source
    /// contains invalid syntax.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Engine;
    ///
    /// let engine = Engine::default();
    /// let template = engine.compile("hello, $name!");
    /// assert!(template.is_ok());
    /// ```
    pub fn compile(&self, text: &str) -> Result<Template, Error> {
        let template = Template::new("?", text);
        template.parse(self)?;

        Ok(template)
    }

    /// Create a new [`Context`] for this [`Engine`].
    pub fn context(&self) -> Context<'_> {
        Context::new(self)
    }

    /// Add a [`Directive`].
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the [`Descriptor`][`crate::directive::Descriptor`]
    /// is invalid, or a different directive with the same name exists.
    pub fn add_directive<T>(&mut self, directive: T) -> Result<(), Error>
    where
        T: Directive + 'static,
    {
        self.directives.register(directive)
    }

    /// Add a [`Directive`], replacing a directive with the same name.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the [`Descriptor`][`crate::directive::Descriptor`]
    /// is invalid.
    pub fn add_directive_must<T>(&mut self, directive: T) -> Result<(), Error>
    where
        T: Directive + 'static,
    {
        self.directives.register_must(directive)
    }

    /// Add a [`Directive`].
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the [`Descriptor`][`crate::directive::Descriptor`]
    /// is invalid, or a different directive with the same name exists.
    pub fn with_directive<T>(mut self, directive: T) -> Result<Self, Error>
    where
        T: Directive + 'static,
    {
        self.add_directive(directive)?;

        Ok(self)
    }

    /// Add a [`Directive`], replacing a directive with the same name.
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the [`Descriptor`][`crate::directive::Descriptor`]
    /// is invalid.
    pub fn with_directive_must<T>(mut self, directive: T) -> Result<Self, Error>
    where
        T: Directive + 'static,
    {
        self.add_directive_must(directive)?;

        Ok(self)
    }

    /// Add a [`Filter`].
    ///
    /// # Errors
    ///
    /// If a `Filter` with the given name already exists in the engine, an [`Error`] is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::{
    ///     filter::{
    ///         serde::{json, Value},
    ///         Error,
    ///     },
    ///     Engine,
    /// };
    ///
    /// fn to_lowercase(value: &Value) -> Result<Value, Error> {
    ///     match value {
    ///         Value::String(string) => Ok(json!(string.to_lowercase())),
    ///         _ => Err(Error::build("filter `to_lowercase` requires string input")
    ///            .with_help("use quotes to coerce data to string")
    ///         ),
    ///     }
    /// }
    ///
    /// let mut engine = Engine::default();
    /// assert!(engine.add_filter("to_lowercase", to_lowercase).is_ok());
    /// assert!(engine.add_filter("html", to_lowercase).is_err());
    /// ```
    pub fn add_filter<T>(&mut self, name: &str, filter: T) -> Result<(), Error>
    where
        T: Filter + 'static,
    {
        if self.filters.contains_key(name) {
            return Err(error_duplicate("filter", name, "add_filter_must"));
        }
        self.add_filter_must(name, filter);

        Ok(())
    }

    /// Add a [`Filter`].
    ///
    /// If a `Filter` with the given name already exists in the [`Engine`], it is overwritten.
    pub fn add_filter_must<T>(&mut self, name: &str, filter: T)
    where
        T: Filter + 'static,
    {
        self.filters.insert(name.to_string(), Arc::new(filter));
    }

    /// Add a [`Filter`].
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    ///
    /// # Errors
    ///
    /// If a `Filter` with the given name already exists in the engine, an [`Error`] is returned.
    pub fn with_filter<T>(mut self, name: &str, filter: T) -> Result<Self, Error>
    where
        T: Filter + 'static,
    {
        self.add_filter(name, filter)?;

        Ok(self)
    }

    /// Add a [`Filter`].
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    ///
    /// If a `Filter` with the given name already exists in the engine, it is overwritten.
    pub fn with_filter_must<T>(mut self, name: &str, filter: T) -> Self
    where
        T: Filter + 'static,
    {
        self.add_filter_must(name, filter);

        self
    }

    /// Add a [`Function`], callable as `$name(...)` or as a method.
    ///
    /// # Errors
    ///
    /// If a `Function` with the given name already exists in the engine, an [`Error`] is
    /// returned.
    pub fn add_function<T>(&mut self, name: &str, function: T) -> Result<(), Error>
    where
        T: Function + 'static,
    {
        if self.functions.contains_key(name) {
            return Err(error_duplicate("function", name, "add_function_must"));
        }
        self.add_function_must(name, function);

        Ok(())
    }

    /// Add a [`Function`].
    ///
    /// If a `Function` with the given name already exists in the [`Engine`], it is
    /// overwritten, which allows replacing a built in function.
    pub fn add_function_must<T>(&mut self, name: &str, function: T)
    where
        T: Function + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
    }

    /// Add a [`Function`].
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    ///
    /// # Errors
    ///
    /// If a `Function` with the given name already exists in the engine, an [`Error`] is
    /// returned.
    pub fn with_function<T>(mut self, name: &str, function: T) -> Result<Self, Error>
    where
        T: Function + 'static,
    {
        self.add_function(name, function)?;

        Ok(self)
    }

    /// Add a [`Function`].
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    pub fn with_function_must<T>(mut self, name: &str, function: T) -> Self
    where
        T: Function + 'static,
    {
        self.add_function_must(name, function);

        self
    }

    /// Serialize a value and add it as a tool, visible to every template as
    /// if it were set in the context.
    ///
    /// A variable in the context with the same name hides the tool, unless
    /// the tool existed when the template was compiled.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when a tool with the given name exists, or the
    /// serialization fails.
    pub fn add_tool<T>(&mut self, name: &str, value: T) -> Result<(), Error>
    where
        T: Serialize,
    {
        if self.tools.contains_key(name) {
            return Err(error_duplicate("tool", name, "add_tool_must"));
        }
        let value = serialize(name, value)?;
        self.tools.insert(name.to_string(), value);

        Ok(())
    }

    /// Serialize a value and add it as a tool, replacing a tool with the
    /// same name.
    ///
    /// # Panics
    ///
    /// Panics if the serialization fails.
    pub fn add_tool_must<T>(&mut self, name: &str, value: T)
    where
        T: Serialize,
    {
        match serialize(name, value) {
            Ok(value) => {
                self.tools.insert(name.to_string(), value);
            }
            Err(error) => panic!("{error}"),
        }
    }

    /// Serialize a value and add it as a tool.
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when a tool with the given name exists, or the
    /// serialization fails.
    pub fn with_tool<T>(mut self, name: &str, value: T) -> Result<Self, Error>
    where
        T: Serialize,
    {
        self.add_tool(name, value)?;

        Ok(self)
    }

    /// Serialize a value and add it as a tool, replacing a tool with the
    /// same name.
    ///
    /// Returns the [`Engine`], so additional methods may be chained.
    ///
    /// # Panics
    ///
    /// Panics if the serialization fails.
    pub fn with_tool_must<T>(mut self, name: &str, value: T) -> Self
    where
        T: Serialize,
    {
        self.add_tool_must(name, value);

        self
    }

    /// Compile and store a new [`Template`] with the given name.
    ///
    /// Only needs a shared reference, so templates can be added while the
    /// [`Engine`] is in use.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when a `Template` with the given name already exists,
    /// or when compilation fails, which most likely means the source contains invalid
    /// syntax.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Engine;
    ///
    /// let engine = Engine::default();
    /// let result = engine.add_template("template_name", "hello, $name!");
    /// assert!(result.is_ok());
    ///
    /// let second = engine.add_template("template_name", "hello again");
    /// assert!(second.is_err());
    /// ```
    pub fn add_template(&self, name: &str, text: &str) -> Result<(), Error> {
        if self.templates.contains_key(name) {
            return Err(error_duplicate("template", name, "add_template_must"));
        }
        let template = Template::new(name, text);
        template.parse(self)?;

        match self.templates.entry(name.to_string()) {
            Entry::Occupied(_) => Err(error_duplicate("template", name, "add_template_must")),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(template));
                tracing::debug!(template = name, "added template");

                Ok(())
            }
        }
    }

    /// Compile and store a new [`Template`] with the given name.
    ///
    /// If a `Template` with the given name already exists in the [`Engine`],
    /// it is overwritten. Renders already holding the old template finish
    /// with it.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when compilation fails, which most likely means the source
    /// contains invalid syntax.
    pub fn add_template_must(&self, name: &str, text: &str) -> Result<(), Error> {
        let template = Template::new(name, text);
        template.parse(self)?;
        self.templates.insert(name.to_string(), Arc::new(template));
        tracing::debug!(template = name, "replaced template");

        Ok(())
    }

    /// Return the named [`Template`].
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Engine;
    ///
    /// let engine = Engine::default();
    /// engine.add_template_must("template_name", "hello, $name!").unwrap();
    ///
    /// let template = engine.get_template("template_name");
    /// assert!(template.is_some());
    /// ```
    pub fn get_template(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.get(name).map(|entry| entry.value().clone())
    }

    /// Evaluate the named [`Template`] with the given [`Context`].
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when no template has the given name, or the
    /// evaluation fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Engine;
    ///
    /// let engine = Engine::default();
    /// engine.add_template("greeting", "hello, $name!").unwrap();
    ///
    /// let mut context = engine.context().with_must("name", "taylor");
    /// assert_eq!(engine.render_named("greeting", &mut context).unwrap(), "hello, taylor!");
    /// ```
    pub fn render_named(&self, name: &str, context: &mut Context) -> Result<String, Error> {
        let Some(template) = self.get_template(name) else {
            return Err(error_missing_template(name));
        };

        template.evaluate(context)
    }

    /// Compile a library of macros, and make every macro it defines visible
    /// to templates compiled afterwards.
    ///
    /// The output of the library is discarded.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when compilation fails.
    pub fn add_library(&mut self, text: &str) -> Result<(), Error> {
        let library = Template::new("library", text);
        library.parse(self)?;

        if let Some(macros) = library.macros() {
            tracing::debug!(macros = macros.len(), "added library");
            self.macros = macros.clone();
        }

        Ok(())
    }

    /// Return the registered directives.
    pub fn directives(&self) -> &Registry {
        &self.directives
    }

    /// Return the [`Settings`].
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Return the macros defined by libraries.
    pub fn macros(&self) -> &HashMap<String, Arc<Definition>> {
        &self.macros
    }

    /// Return the filter with the given name, if it exists in the engine.
    pub fn get_filter(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.filters.get(name).cloned()
    }

    /// Return the function with the given name, if it exists in the engine.
    pub fn get_function(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.get(name).cloned()
    }

    /// Return true if a tool with the given name exists.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Return the tool with the given name.
    pub fn get_tool(&self, name: &str) -> Option<&Value> {
        self.tools.get(name)
    }

    /// Write an unknown `#name` literally instead of failing.
    pub fn with_relaxed(mut self, relaxed: bool) -> Self {
        self.settings.relaxed = relaxed;
        self
    }

    /// Set the [`Handler`] every new [`Context`] starts with.
    pub fn with_handler<T>(mut self, handler: T) -> Self
    where
        T: Handler + 'static,
    {
        self.settings.handler = Arc::new(handler);
        self
    }

    /// Accept the given characters in names, in addition to identifier
    /// characters.
    pub fn with_name_chars(mut self, chars: &str) -> Self {
        self.settings.name_chars = chars.to_string();
        self
    }

    /// Set the maximum number of nested `#include` directives.
    pub fn with_include_depth(mut self, depth: usize) -> Self {
        self.settings.include_depth = depth;
        self
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn error_duplicate(what: &str, name: &str, replace: &str) -> Error {
    Error::build(format!("duplicate {what}"))
        .with_kind(Kind::Registration)
        .with_help(format!(
            "{what} with name `{name}` already exists in engine, overwrite it with `.{replace}`"
        ))
}

fn serialize<T>(name: &str, value: T) -> Result<Value, Error>
where
    T: Serialize,
{
    to_value(value).map_err(|error| {
        Error::build(format!("value for `{name}` is unserializable"))
            .with_kind(Kind::Registration)
            .with_help(error.to_string())
    })
}

#[cfg(test)]
mod tests {
    use crate::{handler::ComplacentHandler, log::Error, Engine, Kind};
    use serde_json::{json, Value};

    #[test]
    fn test_add() {
        let mut engine = Engine::default();
        engine.add_filter_must("faux", faux_filter_a);

        assert!(engine.get_filter("faux").is_some());
        assert!(engine.get_filter("ghost").is_none());
        assert!(engine.get_filter("html").is_some());
    }

    #[test]
    fn test_add_fluent() {
        assert!(Engine::default()
            .with_filter("faux", faux_filter_a)
            .unwrap()
            .get_filter("faux")
            .is_some());
        assert!(Engine::default().get_filter("ghost").is_none());
    }

    #[test]
    fn test_add_duplicate() {
        let error = Engine::default()
            .with_filter_must("faux", faux_filter_a)
            .with_filter("faux", faux_filter_a)
            .err()
            .unwrap();

        assert_eq!(error.get_kind(), Kind::Registration);
        assert!(Engine::default().with_function("trim", faux_function).is_err());
        assert!(Engine::default()
            .with_tool_must("t", 1)
            .with_tool("t", 2)
            .is_err());
    }

    #[test]
    fn test_add_overwrite() {
        let value = Value::Null;

        let mut engine = Engine::default().with_filter_must("faux", faux_filter_a);
        assert!(engine
            .get_filter("faux")
            .is_some_and(|f| f.apply(&value).is_ok_and(|v| v == json!("a"))));

        engine.add_filter_must("faux", faux_filter_b);
        assert!(engine
            .get_filter("faux")
            .is_some_and(|f| f.apply(&value).is_ok_and(|v| v == json!("b"))));
    }

    #[test]
    fn test_replace_builtin_function() -> Result<(), Error> {
        let engine = Engine::default().with_function_must("trim", faux_function);
        let template = engine.compile("$a.trim")?;
        let mut context = engine.context().with_must("a", " x ");

        assert_eq!(template.evaluate(&mut context)?, "f");

        Ok(())
    }

    #[test]
    fn test_templates() -> Result<(), Error> {
        let engine = Engine::default();
        engine.add_template("page", "one")?;

        let first = engine.get_template("page");
        assert!(engine.add_template("page", "two").is_err());
        assert!(engine.add_template("broken", "#if").is_err());
        assert!(engine.get_template("broken").is_none());

        engine.add_template_must("page", "two")?;
        let mut context = engine.context();
        assert_eq!(engine.render_named("page", &mut context)?, "two");
        assert_eq!(first.map(|t| t.evaluate(&mut context)).transpose()?, Some("one".to_string()));

        let error = engine.render_named("nothing", &mut context).unwrap_err();
        assert_eq!(error.get_reason(), "missing template");

        Ok(())
    }

    #[test]
    fn test_templates_added_while_shared() -> Result<(), Error> {
        let engine = Engine::default();

        std::thread::scope(|scope| {
            for n in 0..4 {
                let engine = &engine;
                scope.spawn(move || engine.add_template(&format!("t{n}"), &format!("{n}")));
            }
        });

        let mut context = engine.context();
        for n in 0..4 {
            assert_eq!(engine.render_named(&format!("t{n}"), &mut context)?, n.to_string());
        }

        Ok(())
    }

    #[test]
    fn test_tools() -> Result<(), Error> {
        let engine = Engine::default().with_tool_must("site", json!({"name": "home"}));
        let template = engine.compile("$site.name")?;

        assert!(engine.has_tool("site"));
        assert_eq!(template.evaluate(&mut engine.context())?, "home");

        let mut context = engine.context().with_must("site", json!({"name": "mine"}));
        assert_eq!(template.evaluate(&mut context)?, "home");

        Ok(())
    }

    #[test]
    fn test_library() -> Result<(), Error> {
        let mut engine = Engine::default();
        engine.add_library("#macro one {1}")?;
        engine.add_library("#macro two {2}")?;

        assert_eq!(engine.macros().len(), 2);
        assert_eq!(engine.compile("#one#two")?.evaluate(&mut engine.context())?, "12");

        Ok(())
    }

    #[test]
    fn test_settings() -> Result<(), Error> {
        let engine = Engine::default()
            .with_relaxed(true)
            .with_handler(ComplacentHandler)
            .with_name_chars("-")
            .with_include_depth(2);

        assert!(engine.settings().relaxed);
        assert_eq!(engine.settings().include_depth, 2);

        let template = engine.compile("#later $first-name|")?;
        let mut context = engine.context().with_must("first-name", "taylor");
        assert_eq!(template.evaluate(&mut context)?, "#later taylor|");

        Ok(())
    }

    #[test]
    fn test_replaced_directive_releases_else() -> Result<(), Error> {
        use crate::{
            directive::{Call, Descriptor, Directive, Slot},
            BuildContext, Built,
        };

        struct When;

        impl Directive for When {
            fn descriptor(&self) -> Descriptor {
                Descriptor::new("if").with(Slot::Block("body"))
            }

            fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
                match call.arguments.block("body") {
                    Some(body) => context.build_block(body),
                    None => Ok(Built::Constant(Value::Null)),
                }
            }
        }

        let engine = Engine::default()
            .with_relaxed(true)
            .with_directive_must(When)?;
        let template = engine.compile("x #else y")?;

        assert_eq!(template.evaluate(&mut engine.context())?, "x #else y");

        Ok(())
    }

    /// A Filter used to test Engine.
    fn faux_filter_a(_: &Value) -> Result<Value, Error> {
        Ok(Value::String("a".into()))
    }

    /// A Filter used to test Engine.
    fn faux_filter_b(_: &Value) -> Result<Value, Error> {
        Ok(Value::String("b".into()))
    }

    /// A Function used to test Engine.
    fn faux_function(_: &[Value]) -> Result<Value, Error> {
        Ok(Value::String("f".into()))
    }
}
