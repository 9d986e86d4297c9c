use crate::{
    compile::{
        build::{BuildContext, Built},
        directive::{missing, Call, Descriptor, Directive, Slot},
        tree::Reference,
    },
    filter::{self, Filter},
    log::{Error, INVALID_FILTER},
};
use serde_json::Value;
use std::sync::Arc;

/// `#filter $x through E`
///
/// Attaches a filter registered with the engine to every later reference
/// to `$x` and its properties.
pub struct FilterDirective;

impl Directive for FilterDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("filter")
            .with(Slot::Target("target"))
            .with(Slot::Keyword("through"))
            .with(Slot::Value("filter"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let reference = call
            .arguments
            .target("target")
            .ok_or_else(|| missing(call, "target"))?;
        let expression = call
            .arguments
            .expression("filter")
            .ok_or_else(|| missing(call, "filter"))?;

        let path = filter_path(reference, context)?;
        let name = match context.build_expression(expression)? {
            Built::Constant(Value::String(name)) => name,
            _ => {
                return Err(context
                    .error(INVALID_FILTER, expression.get_region())
                    .with_help("the filter must be named by a constant string, such as \"html\""))
            }
        };
        let Some(filter) = context.engine().get_filter(&name) else {
            return Err(context
                .error(INVALID_FILTER, expression.get_region())
                .with_help(format!("no filter named `{name}` is registered with the engine")));
        };

        tracing::debug!(path = %path.join("."), filter = %name, "attached filter");
        context.filters_mut().add_filter(path, name, filter);

        Ok(Built::Constant(Value::String(String::new())))
    }
}

/// `#htmlescape $x`, also registered as `#escape $x`.
pub struct HtmlEscapeDirective {
    name: &'static str,
}

impl HtmlEscapeDirective {
    /// Create a new [`HtmlEscapeDirective`] registered under the given name.
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Directive for HtmlEscapeDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.name).with(Slot::Target("target"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let reference = call
            .arguments
            .target("target")
            .ok_or_else(|| missing(call, "target"))?;

        let path = filter_path(reference, context)?;
        let escape: Arc<dyn Filter> = context
            .engine()
            .get_filter("html")
            .unwrap_or_else(|| Arc::new(filter::html));
        context.filters_mut().add_filter(path, "html", escape);

        Ok(Built::Constant(Value::String(String::new())))
    }
}

/// `#silence $x`
///
/// Every later reference to `$x` and its properties writes nothing.
pub struct SilenceDirective;

impl Directive for SilenceDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("silence").with(Slot::Target("target"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let reference = call
            .arguments
            .target("target")
            .ok_or_else(|| missing(call, "target"))?;

        let path = filter_path(reference, context)?;
        context.filters_mut().add_drop(path);

        Ok(Built::Constant(Value::String(String::new())))
    }
}

/// Return the names a filter rule is registered for.
fn filter_path(reference: &Reference, context: &BuildContext) -> Result<Vec<String>, Error> {
    match reference.names() {
        Some(names) => Ok(names.into_iter().map(String::from).collect()),
        None => Err(context
            .error(INVALID_FILTER, reference.region)
            .with_help("a filter is attached to a variable or property, not a method call")),
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, Error};
    use serde_json::{json, Value};

    #[test]
    fn test_engine_html_filter_is_used() -> Result<(), Error> {
        let engine = Engine::new()
            .with_filter_must("html", |_: &Value| -> Result<Value, Error> { Ok(json!("x")) });
        let template = engine.compile("#htmlescape $a $a")?;
        let mut context = engine.context().with_must("a", "<");

        assert_eq!(template.evaluate(&mut context)?, "x");

        Ok(())
    }

    #[test]
    fn test_filter_name_must_be_constant() {
        let engine = Engine::new();
        let error = engine.compile("#filter $a through $name").unwrap_err();

        assert_eq!(error.get_reason(), "invalid filter");
    }

    #[test]
    fn test_method_path_is_rejected() {
        let engine = Engine::new();

        assert!(engine.compile("#silence $a.b()").is_err());
    }
}
