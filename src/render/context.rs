use crate::{
    compile::Template,
    log::Error,
    render::{handler::Handler, property, Macro},
    Engine,
};
use serde::Serialize;
use serde_json::{to_value, Map, Value};
use std::{collections::HashMap, sync::Arc};

/// A variable bound to something that is not a [`Value`].
///
/// A binding and a plain variable never share a name: setting either one
/// removes the other.
#[derive(Debug, Clone)]
pub(crate) enum Binding {
    /// A node evaluated again at every reference.
    Node(Arc<Macro>),
    /// A template compiled at runtime, evaluated at every reference.
    Template(Arc<Template>),
    /// Yields the next item at every reference, starting over at the end.
    Alternate { items: Vec<Value>, next: usize },
}

/// Per-render data that a [`Template`][`crate::Template`] is evaluated with.
///
/// Holds the variables, the [`Handler`] deciding what happens to variables
/// that cannot be evaluated, and the current location for diagnostics.
/// A `Context` belongs to one render at a time. It may be reused after
/// [`Context::clear`].
pub struct Context<'engine> {
    engine: &'engine Engine,
    variables: Map<String, Value>,
    bindings: HashMap<String, Binding>,
    handler: Arc<dyn Handler>,
    /// Name of the template being evaluated.
    template: Arc<str>,
    line: usize,
    column: usize,
    /// Number of `#include` directives being evaluated.
    depth: usize,
}

impl<'engine> Context<'engine> {
    /// Create a new [`Context`] using the default [`Handler`] of the given
    /// [`Engine`].
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::{Context, Engine};
    ///
    /// let engine = Engine::new();
    /// let context = Context::new(&engine);
    /// ```
    pub fn new(engine: &'engine Engine) -> Self {
        Self {
            engine,
            variables: Map::new(),
            bindings: HashMap::new(),
            handler: engine.settings().handler.clone(),
            template: Arc::from("?"),
            line: 0,
            column: 0,
            depth: 0,
        }
    }

    /// Return the [`Engine`] this context was created for.
    pub fn engine(&self) -> &'engine Engine {
        self.engine
    }

    /// Return the variable with the given name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Return the variable with the given name, to modify it in place.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.variables.get_mut(name)
    }

    /// Set a variable to a [`Value`], returning the previous value.
    pub fn put<S>(&mut self, name: S, value: Value) -> Option<Value>
    where
        S: Into<String>,
    {
        let name = name.into();
        self.bindings.remove(&name);
        self.variables.insert(name, value)
    }

    /// Serialize a value and set a variable to it.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the serialization fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Engine;
    ///
    /// let engine = Engine::new();
    /// let mut context = engine.context();
    /// let result = context.insert("name", "taylor");
    ///
    /// assert!(result.is_ok());
    /// ```
    pub fn insert<S, T>(&mut self, name: S, value: T) -> Result<(), Error>
    where
        S: Into<String>,
        T: Serialize,
    {
        let name = name.into();
        let value = to_value(value).map_err(|error| {
            Error::build(format!("value for `{name}` is unserializable"))
                .with_help(error.to_string())
        })?;
        self.put(name, value);

        Ok(())
    }

    /// Serialize a value and set a variable to it.
    ///
    /// # Panics
    ///
    /// Panics if the serialization fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Engine;
    ///
    /// let engine = Engine::new();
    /// let mut context = engine.context();
    /// context.insert_must("name", "taylor");
    /// ```
    pub fn insert_must<S, T>(&mut self, name: S, value: T)
    where
        S: Into<String>,
        T: Serialize,
    {
        if let Err(error) = self.insert(name, value) {
            panic!("{error}");
        }
    }

    /// Serialize a value and set a variable to it.
    ///
    /// Returns the [`Context`], so additional methods may be chained.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the serialization fails.
    pub fn with<S, T>(mut self, name: S, value: T) -> Result<Self, Error>
    where
        S: Into<String>,
        T: Serialize,
    {
        self.insert(name, value)?;

        Ok(self)
    }

    /// Serialize a value and set a variable to it.
    ///
    /// Returns the [`Context`], so additional methods may be chained.
    ///
    /// # Panics
    ///
    /// Panics if the serialization fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Engine;
    ///
    /// let engine = Engine::new();
    /// let context = engine.context().with_must("name", "taylor");
    ///
    /// assert!(context.contains("name"));
    /// ```
    pub fn with_must<S, T>(mut self, name: S, value: T) -> Self
    where
        S: Into<String>,
        T: Serialize,
    {
        self.insert_must(name, value);

        self
    }

    /// Return true if a variable with the given name is set, including one
    /// bound by `#templet`, `#alternate` or `#setblock as macro`.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name) || self.bindings.contains_key(name)
    }

    /// Remove a variable, returning its value.
    ///
    /// A variable bound by a directive is removed too, but has no value to
    /// return.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name);
        self.variables.remove(name)
    }

    /// Remove every variable and restore the default [`Handler`].
    ///
    /// The engine stays the same, so the context can be reused for another
    /// render.
    pub fn clear(&mut self) {
        self.variables.clear();
        self.bindings.clear();
        self.handler = self.engine.settings().handler.clone();
        self.template = Arc::from("?");
        self.line = 0;
        self.column = 0;
        self.depth = 0;
    }

    /// Follow a path of property names, starting at a variable or a tool of
    /// the engine.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Engine;
    /// use serde_json::json;
    ///
    /// let engine = Engine::new();
    /// let context = engine
    ///     .context()
    ///     .with_must("user", json!({"names": ["taylor", "jordan"]}));
    ///
    /// assert_eq!(
    ///     context.get_property(&["user", "names", "1"]),
    ///     Some(json!("jordan"))
    /// );
    /// assert_eq!(context.get_property(&["user", "names", "length"]), Some(json!(2)));
    /// ```
    pub fn get_property(&self, names: &[&str]) -> Option<Value> {
        let (first, rest) = names.split_first()?;
        let mut current = self
            .variables
            .get(*first)
            .or_else(|| self.engine.get_tool(first))?
            .clone();

        for name in rest {
            current = property::get(&current, name)?.into_owned();
        }

        Some(current)
    }

    /// Set the value at the end of a path of property names.
    ///
    /// Every name but the last must already lead to an object or array.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the path is empty, or cannot be followed.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Engine;
    /// use serde_json::json;
    ///
    /// let engine = Engine::new();
    /// let mut context = engine.context().with_must("user", json!({}));
    ///
    /// assert!(context.set_property(&["user", "name"], json!("taylor")).is_ok());
    /// assert!(context.set_property(&["user", "name", "first"], json!("t")).is_err());
    /// assert_eq!(context.get("user"), Some(&json!({"name": "taylor"})));
    /// ```
    pub fn set_property(&mut self, names: &[&str], value: Value) -> Result<(), Error> {
        let unable = || Error::build(format!("Unable to set value: ${}", names.join(".")));
        let Some((first, rest)) = names.split_first() else {
            return Err(unable());
        };
        let Some((last, middle)) = rest.split_last() else {
            self.put(*first, value);
            return Ok(());
        };

        let mut current = self.variables.get_mut(*first).ok_or_else(unable)?;
        for name in middle {
            current = property::get_mut(current, name).ok_or_else(unable)?;
        }

        match current {
            Value::Object(object) => {
                object.insert(last.to_string(), value);
            }
            Value::Array(_) => {
                let slot = property::get_mut(current, last).ok_or_else(unable)?;
                *slot = value;
            }
            _ => return Err(unable()),
        }

        Ok(())
    }

    /// Bind a name to something evaluated at every reference, replacing any
    /// variable of that name.
    pub(crate) fn bind<S>(&mut self, name: S, binding: Binding)
    where
        S: Into<String>,
    {
        let name = name.into();
        self.variables.remove(&name);
        self.bindings.insert(name, binding);
    }

    pub(crate) fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub(crate) fn binding_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.bindings.get_mut(name)
    }

    /// Return every plain variable.
    pub(crate) fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Return the active [`Handler`].
    pub fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }

    pub(crate) fn share_handler(&mut self, handler: Arc<dyn Handler>) {
        self.handler = handler;
    }

    /// Replace the active [`Handler`] for the rest of the render.
    pub fn set_handler<T>(&mut self, handler: T)
    where
        T: Handler + 'static,
    {
        self.handler = Arc::new(handler);
    }

    /// Return the current location as `name:line.column`.
    pub fn location(&self) -> String {
        format!("{}:{}.{}", self.template, self.line, self.column)
    }

    /// Record the position of the node being evaluated.
    pub(crate) fn set_position(&mut self, line: usize, column: usize) {
        self.line = line;
        self.column = column;
    }

    /// Switch to the named template, returning the previous name and
    /// position.
    pub(crate) fn enter_template(&mut self, name: Arc<str>) -> (Arc<str>, usize, usize) {
        let previous = std::mem::replace(&mut self.template, name);

        (previous, self.line, self.column)
    }

    /// Restore what [`Context::enter_template`] returned.
    pub(crate) fn leave_template(&mut self, (name, line, column): (Arc<str>, usize, usize)) {
        self.template = name;
        self.line = line;
        self.column = column;
    }

    /// Return the name of the template being evaluated.
    pub(crate) fn template(&self) -> Arc<str> {
        self.template.clone()
    }

    /// Return the number of includes being evaluated.
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
    }

    /// Return a [`tracing::Span`] for the given target, carrying the current
    /// location.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Engine;
    ///
    /// let engine = Engine::new();
    /// let context = engine.context();
    /// let span = context.log("directive");
    /// let _entered = span.enter();
    /// tracing::debug!("inside the span");
    /// ```
    pub fn log(&self, target: &str) -> tracing::Span {
        tracing::debug_span!("context", target, location = %self.location())
    }
}
