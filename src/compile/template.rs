use crate::{
    compile::{build::BuildContext, directive::Definition, Parser},
    log::Error,
    render::{Context, Macro},
    writer::FastWriter,
    Engine,
};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

/// Everything a [`Template`] keeps once it is parsed.
#[derive(Debug)]
struct Compiled {
    root: Macro,
    params: Map<String, Value>,
    macros: HashMap<String, Arc<Definition>>,
}

/// A named document, parsed at most once and then evaluated any number of
/// times.
///
/// After [`Template::parse`] the evaluation tree never changes, so a
/// `Template` may be shared between threads and evaluated by all of them at
/// once, each with its own [`Context`].
///
/// # Examples
///
/// ```
/// use macrame::{Engine, Template};
///
/// let engine = Engine::new();
/// let template = Template::new("greeting", "#param $title = \"Hi\" $title, $name!");
/// template.parse(&engine).unwrap();
///
/// let mut context = engine.context().with_must("name", "taylor");
/// assert_eq!(template.evaluate(&mut context).unwrap(), "Hi, taylor!");
/// assert_eq!(template.param("title"), Some(&serde_json::json!("Hi")));
/// ```
#[derive(Debug)]
pub struct Template {
    name: Arc<str>,
    source: Arc<str>,
    compiled: OnceLock<Compiled>,
}

impl Template {
    /// Create a new unparsed [`Template`].
    pub fn new<N, S>(name: N, source: S) -> Self
    where
        N: Into<Arc<str>>,
        S: Into<Arc<str>>,
    {
        Self {
            name: name.into(),
            source: source.into(),
            compiled: OnceLock::new(),
        }
    }

    /// Return the name of the [`Template`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the source text of the [`Template`].
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parse and build the [`Template`] with the directives, macros and
    /// settings of the given [`Engine`].
    ///
    /// Only the first successful call does any work.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] of kind [`Parse`][`crate::Kind::Parse`] or
    /// [`Build`][`crate::Kind::Build`] when the source is invalid. Nothing is
    /// kept from a failed attempt.
    pub fn parse(&self, engine: &Engine) -> Result<(), Error> {
        if self.compiled.get().is_some() {
            tracing::debug!(template = %self.name, "template is already parsed");
            return Ok(());
        }
        tracing::debug!(template = %self.name, "parsing template");

        let block = Parser::new(&self.source, engine)
            .parse()
            .map_err(|error| error.with_name(&*self.name))?;

        let mut context = BuildContext::new(engine, self.name.clone(), self.source.clone());
        let root = context
            .build_block(&block)
            .map_err(|error| {
                tracing::error!(template = %self.name, %error, "failed to build template");
                error
            })?
            .into_macro();
        let (params, macros) = context.finish();

        if self.compiled.set(Compiled { root, params, macros }).is_err() {
            tracing::debug!(template = %self.name, "template was parsed by another caller");
        }
        tracing::debug!(template = %self.name, "parsed template");

        Ok(())
    }

    /// Return true if [`Template::parse`] succeeded.
    pub fn is_parsed(&self) -> bool {
        self.compiled.get().is_some()
    }

    /// Return true if the [`Template`] is parsed, and produces the same
    /// output with every [`Context`].
    pub fn is_constant(&self) -> bool {
        self.compiled
            .get()
            .is_some_and(|compiled| matches!(compiled.root, Macro::Constant(_)))
    }

    /// Evaluate the [`Template`] and return the output as a `String`.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the `Template` is not parsed, or the
    /// evaluation fails.
    pub fn evaluate(&self, context: &mut Context) -> Result<String, Error> {
        let mut writer = FastWriter::new();
        self.write(context, &mut writer)?;

        Ok(writer.to_string())
    }

    /// Evaluate the [`Template`] and return the output as UTF-8 bytes.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the `Template` is not parsed, or the
    /// evaluation fails.
    pub fn evaluate_as_bytes(&self, context: &mut Context) -> Result<Vec<u8>, Error> {
        let mut writer = FastWriter::new();
        self.write(context, &mut writer)?;

        Ok(writer.into_bytes())
    }

    /// Evaluate the [`Template`] into a [`FastWriter`].
    ///
    /// Output written before a failure stays in the writer.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the `Template` is not parsed, or the
    /// evaluation fails.
    pub fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        let Some(compiled) = self.compiled.get() else {
            return Err(Error::build("template is not parsed")
                .with_name(&*self.name)
                .with_help("call `.parse` with an engine before evaluating the template"));
        };

        let previous = context.enter_template(self.name.clone());
        let result = compiled.root.write(context, writer);
        context.leave_template(previous);

        result
    }

    /// Return the value of a parameter defined with `#param`.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.compiled.get()?.params.get(name)
    }

    /// Return every parameter defined with `#param`.
    pub fn params(&self) -> Option<&Map<String, Value>> {
        self.compiled.get().map(|compiled| &compiled.params)
    }

    /// Return the macros visible at the end of the [`Template`], including
    /// those of the engine library.
    pub fn macros(&self) -> Option<&HashMap<String, Arc<Definition>>> {
        self.compiled.get().map(|compiled| &compiled.macros)
    }
}

#[cfg(test)]
mod tests {
    use super::Template;
    use crate::{Engine, Error, Kind};
    use serde_json::json;

    #[test]
    fn test_parse_is_idempotent() -> Result<(), Error> {
        let engine = Engine::new();
        let template = Template::new("t", "#escape $a #macro m {[$a]} #m");
        template.parse(&engine)?;
        template.parse(&engine)?;

        let mut context = engine.context().with_must("a", "<");
        assert_eq!(template.evaluate(&mut context)?, "[&lt;]");
        assert_eq!(template.evaluate(&mut context)?, "[&lt;]");
        assert_eq!(template.macros().map(|m| m.len()), Some(1));

        Ok(())
    }

    #[test]
    fn test_unparsed() {
        let engine = Engine::new();
        let template = Template::new("t", "text");

        assert!(!template.is_parsed());
        assert!(template.evaluate(&mut engine.context()).is_err());
    }

    #[test]
    fn test_failed_parse_keeps_nothing() {
        let engine = Engine::new();
        let template = Template::new("broken", "#if ($a) {");
        let error = template.parse(&engine).unwrap_err();

        assert_eq!(error.get_kind(), Kind::Parse);
        assert_eq!(error.get_name(), Some("broken"));
        assert!(!template.is_parsed());
    }

    #[test]
    fn test_param_is_set_at_runtime() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#param $size = 3 #set $n = $size + 1 $n")?;

        assert_eq!(template.param("size"), Some(&json!(3)));
        assert!(template.param("n").is_none());

        let mut context = engine.context();
        assert_eq!(template.evaluate(&mut context)?, "4");
        assert_eq!(context.get("size"), Some(&json!(3)));

        Ok(())
    }

    #[test]
    fn test_shared_between_threads() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#foreach $x in $list {$x}")?;

        std::thread::scope(|scope| -> Result<(), Error> {
            let handles = (0..4)
                .map(|n| {
                    let engine = &engine;
                    let template = &template;
                    scope.spawn(move || {
                        let mut context = engine.context().with_must("list", json!([n, n]));
                        template.evaluate(&mut context)
                    })
                })
                .collect::<Vec<_>>();

            for (n, handle) in handles.into_iter().enumerate() {
                let result = handle.join().map_err(|_| Error::build("thread panicked"))?;
                assert_eq!(result?, format!("{n}{n}"));
            }

            Ok(())
        })
    }

    #[test]
    fn test_bytes() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("héllo $a")?;
        let mut context = engine.context().with_must("a", 1);

        assert_eq!(template.evaluate_as_bytes(&mut context)?, "héllo 1".as_bytes());

        Ok(())
    }
}
