use crate::{
    compile::{
        build::{BuildContext, Built},
        directive::{missing, Call, Descriptor, Directive, Slot},
        tree::Block,
    },
    log::Error,
};
use serde_json::Value;
use std::{collections::HashSet, sync::Arc};

/// A macro recorded by `#macro`, expanded wherever it is invoked.
///
/// The body is kept unbuilt, since every invocation builds it again with its
/// own arguments and the filters in effect where it is invoked.
#[derive(Debug, Clone)]
pub struct Definition {
    /// Names of the formal parameters, without the `$`.
    pub params: Vec<String>,
    pub body: Block,
    /// Source the body was parsed from, which regions of the body point into.
    pub source: Arc<str>,
}

/// `#macro name[($a, $b)] B`
pub struct MacroDirective;

impl Directive for MacroDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("macro")
            .with(Slot::Define("name"))
            .with(Slot::Params("params"))
            .with(Slot::Block("body"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let name = call.arguments.word("name").ok_or_else(|| missing(call, "name"))?;
        let body = call.arguments.block("body").ok_or_else(|| missing(call, "body"))?;
        let params = call.arguments.params("params").unwrap_or_default();

        let mut seen = HashSet::with_capacity(params.len());
        if let Some(duplicate) = params.iter().find(|param| !seen.insert(param.as_str())) {
            return Err(context
                .error(format!("duplicate parameter `${duplicate}`"), call.region)
                .with_help(format!("every parameter of macro `{name}` needs its own name")));
        }

        context.define_macro(
            name,
            Definition {
                params: params.to_vec(),
                body: body.clone(),
                source: context.source().clone(),
            },
        );
        tracing::debug!(name, params = params.len(), "defined macro");

        Ok(Built::Constant(Value::String(String::new())))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, Error, Kind};
    use serde_json::json;

    #[test]
    fn test_duplicate_params() {
        let engine = Engine::new();
        let error = engine.compile("#macro pair($a, $a) {$a}").unwrap_err();

        assert_eq!(error.get_kind(), Kind::Build);
        assert!(error.get_reason().contains("duplicate"));
    }

    #[test]
    fn test_argument_is_an_expression() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#macro twice($n) {$n $n} #twice($a + 1)")?;
        let mut context = engine.context().with_must("a", 1);

        assert_eq!(template.evaluate(&mut context)?, "2 2");

        Ok(())
    }

    #[test]
    fn test_redefine() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#macro m {1}#m #macro m {2}#m")?;

        assert_eq!(template.evaluate(&mut engine.context())?, "12");
        assert!(template.is_constant());

        Ok(())
    }

    #[test]
    fn test_macro_from_library() -> Result<(), Error> {
        let mut engine = Engine::new();
        engine.add_library("#macro bold($t) {<b>$t</b>}")?;
        let template = engine.compile("#bold($name)")?;
        let mut context = engine.context().with_must("name", json!("taylor"));

        assert_eq!(template.evaluate(&mut context)?, "<b>taylor</b>");

        Ok(())
    }
}
