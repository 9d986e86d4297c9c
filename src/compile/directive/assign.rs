use crate::{
    compile::{
        build::{BuildContext, Built},
        directive::{missing, Call, Descriptor, Directive, Slot},
        tree::Reference,
    },
    log::Error,
    render::{Bind, Macro, Set},
};
use serde_json::Value;
use std::sync::Arc;

fn shape(name: &'static str) -> Descriptor {
    Descriptor::new(name)
        .with(Slot::Target("target"))
        .with(Slot::Assign)
        .with(Slot::Value("value"))
}

/// `#set $x.y = E`
pub struct SetDirective;

impl Directive for SetDirective {
    fn descriptor(&self) -> Descriptor {
        shape("set")
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let reference = call
            .arguments
            .target("target")
            .ok_or_else(|| missing(call, "target"))?;
        let expression = call
            .arguments
            .expression("value")
            .ok_or_else(|| missing(call, "value"))?;

        let target = context.build_target(reference)?;
        let value = context.build_expression(expression)?.into_macro();

        Ok(Built::Dynamic(Macro::Set(Set {
            target,
            value: Box::new(value),
        })))
    }
}

/// `#const $x = E`
///
/// The value must be known at build time, and every later reference to the
/// name is replaced by it.
pub struct ConstDirective;

impl Directive for ConstDirective {
    fn descriptor(&self) -> Descriptor {
        shape("const")
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let (name, value) = constant(call, context)?;
        context.define_constant(&name, value);

        Ok(Built::Constant(Value::String(String::new())))
    }
}

/// `#param $x = E`
///
/// Same as `#const`, but the value is also recorded on the template and set
/// in the context whenever the template is evaluated.
pub struct ParamDirective;

impl Directive for ParamDirective {
    fn descriptor(&self) -> Descriptor {
        shape("param")
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let (name, value) = constant(call, context)?;
        context.define_param(&name, value.clone());

        Ok(Built::Dynamic(Macro::Set(Set {
            target: vec![name],
            value: Box::new(Macro::Constant(value)),
        })))
    }
}

/// `#setblock [as macro] $x B`
///
/// Sets the output of the block. With `as macro` the block itself is bound,
/// and written again at every reference.
pub struct SetblockDirective;

impl Directive for SetblockDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("setblock")
            .with(Slot::Optional(vec![Slot::Keyword("as"), Slot::Keyword("macro")]))
            .with(Slot::Target("target"))
            .with(Slot::Block("body"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        if call.arguments.has_keyword("macro") {
            return bind(call, context);
        }

        let reference = call
            .arguments
            .target("target")
            .ok_or_else(|| missing(call, "target"))?;
        let body = call
            .arguments
            .block("body")
            .ok_or_else(|| missing(call, "body"))?;

        let target = context.build_target(reference)?;
        let value = context.build_block(body)?.into_macro();

        Ok(Built::Dynamic(Macro::Set(Set {
            target,
            value: Box::new(value),
        })))
    }
}

/// `#templet $x B`
///
/// Binds the block unevaluated, for `#eval` or for writing at every
/// reference.
pub struct TempletDirective;

impl Directive for TempletDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("templet")
            .with(Slot::Target("target"))
            .with(Slot::Block("body"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        bind(call, context)
    }
}

fn bind(call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
    let reference = call
        .arguments
        .target("target")
        .ok_or_else(|| missing(call, "target"))?;
    let body = call
        .arguments
        .block("body")
        .ok_or_else(|| missing(call, "body"))?;

    let names = reference.names();
    let Some([target]) = names.as_deref() else {
        return Err(context
            .error(
                format!("cannot bind `${}`", reference.dotted()),
                reference.region,
            )
            .with_help(format!("`#{}` binds a top-level variable, such as `$row`", call.name)));
    };
    let target = target.to_string();
    let body = context.build_block(body)?.into_macro();

    Ok(Built::Dynamic(Macro::Bind(Bind {
        target,
        body: Arc::new(body),
    })))
}

/// Read the single name and constant value of `#const` or `#param`.
fn constant(call: &Call, context: &mut BuildContext) -> Result<(String, Value), Error> {
    let reference = call
        .arguments
        .target("target")
        .ok_or_else(|| missing(call, "target"))?;
    let expression = call
        .arguments
        .expression("value")
        .ok_or_else(|| missing(call, "value"))?;

    let name = single_name(reference, context)?;
    match context.build_expression(expression)? {
        Built::Constant(value) => Ok((name, value)),
        Built::Dynamic(_) => Err(context
            .error(
                format!("value of `#{}` is not constant", call.name),
                expression.get_region(),
            )
            .with_help(format!(
                "`${name}` may only be bound to literals and other constants, use `#set` for values from the context"
            ))),
    }
}

fn single_name(reference: &Reference, context: &BuildContext) -> Result<String, Error> {
    match reference.names().as_deref() {
        Some([name]) => Ok(name.to_string()),
        _ => Err(context
            .error(
                format!("cannot bind `${}` as a constant", reference.dotted()),
                reference.region,
            )
            .with_help("a constant is a single name, such as `$size`")),
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, Error, Kind};
    use serde_json::json;

    #[test]
    fn test_set_path() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#set $user.name = \"taylor\" $user.name")?;
        let mut context = engine.context().with_must("user", json!({}));

        assert_eq!(template.evaluate(&mut context)?, "taylor");
        assert_eq!(context.get("user"), Some(&json!({"name": "taylor"})));

        Ok(())
    }

    #[test]
    fn test_const_must_be_constant() {
        let engine = Engine::new();

        let error = engine.compile("#const $a = $b + 1").unwrap_err();
        assert_eq!(error.get_kind(), Kind::Build);
        assert!(error.get_reason().contains("not constant"));

        assert!(engine.compile("#const $a.b = 1").is_err());
    }

    #[test]
    fn test_const_is_not_in_context() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#const $a = [1, 2] $a.length")?;
        let mut context = engine.context();

        assert_eq!(template.evaluate(&mut context)?, "2");
        assert!(!context.contains("a"));
        assert!(template.param("a").is_none());

        Ok(())
    }

    #[test]
    fn test_setblock() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#setblock $x {[$n]}#set $n = 2 $x")?;
        let mut context = engine.context().with_must("n", 1);

        assert_eq!(template.evaluate(&mut context)?, "[1]");
        assert_eq!(context.get("x"), Some(&json!("[1]")));

        let template = engine.compile("#setblock as macro $x {[$n]}#set $n = 2 $x")?;
        let mut context = engine.context().with_must("n", 1);

        assert_eq!(template.evaluate(&mut context)?, "[2]");
        assert!(context.get("x").is_none());

        Ok(())
    }

    #[test]
    fn test_templet() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#templet $t {$x$x}$t")?;
        let mut context = engine.context().with_must("x", 99);

        assert_eq!(template.evaluate(&mut context)?, "9999");

        Ok(())
    }

    #[test]
    fn test_set_replaces_binding() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#templet $t {a}[$t]#set $t = \"b\" [$t]")?;
        let mut context = engine.context();

        assert_eq!(template.evaluate(&mut context)?, "[a][b]");

        Ok(())
    }

    #[test]
    fn test_bind_needs_single_name() {
        let engine = Engine::new();

        let error = engine.compile("#templet $a.b {x}").unwrap_err();
        assert_eq!(error.get_kind(), Kind::Build);
        assert!(error.get_help().is_some_and(|help| help.contains("top-level")));
    }

    #[test]
    fn test_param() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#param $title = \"Home\"\n<h1>$title</h1>")?;
        let mut context = engine.context();

        assert_eq!(template.evaluate(&mut context)?, "\n<h1>Home</h1>");
        assert_eq!(template.param("title"), Some(&json!("Home")));
        assert_eq!(context.get("title"), Some(&json!("Home")));

        Ok(())
    }
}
