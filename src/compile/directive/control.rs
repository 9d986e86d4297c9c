use crate::{
    compile::{
        build::{BuildContext, Built},
        directive::{missing, Arguments, Call, Descriptor, Directive, Slot, Subdirective},
        tree::{Block, Expression},
    },
    log::Error,
    render::{compare, Alternate, Count, Eval, Foreach, If, Macro, While},
};
use serde_json::Value;

/// `#if (c) B [#elseif (c) B]* [#else B]`
///
/// Branches with a constant condition are decided at build time. When no
/// condition is left to evaluate, the selected block replaces the directive.
pub struct IfDirective;

impl Directive for IfDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("if")
            .with(Slot::Condition("condition"))
            .with(Slot::Block("body"))
            .with(Slot::Subdirective(
                Subdirective::new("elseif")
                    .with(Slot::Condition("condition"))
                    .with(Slot::Block("body"))
                    .repeating(),
            ))
            .with(Slot::Subdirective(
                Subdirective::new("else").with(Slot::Block("body")),
            ))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let mut arms = vec![arm(call, &call.arguments)?];
        for arguments in call.arguments.subdirectives("elseif") {
            arms.push(arm(call, arguments)?);
        }

        let mut branches = Vec::new();
        let mut otherwise = None;
        let mut decided = false;

        for (condition, body) in arms {
            warn_empty(call, body);
            match context.build_expression(condition)? {
                Built::Constant(value) if !compare::is_truthy(&value) => continue,
                Built::Constant(_) => {
                    otherwise = Some(context.build_block(body)?);
                    decided = true;
                    break;
                }
                Built::Dynamic(node) => {
                    let body = context.build_block(body)?.into_macro();
                    branches.push((node, body));
                }
            }
        }

        if !decided {
            if let Some(arguments) = call.arguments.subdirective("else") {
                let body = arguments.block("body").ok_or_else(|| missing(call, "body"))?;
                warn_empty(call, body);
                otherwise = Some(context.build_block(body)?);
            }
        }

        if branches.is_empty() {
            return Ok(otherwise.unwrap_or(Built::Constant(Value::String(String::new()))));
        }

        Ok(Built::Dynamic(Macro::If(If {
            branches,
            otherwise: otherwise.map(|built| Box::new(built.into_macro())),
        })))
    }
}

fn arm<'a>(call: &Call, arguments: &'a Arguments) -> Result<(&'a Expression, &'a Block), Error> {
    let condition = arguments
        .expression("condition")
        .ok_or_else(|| missing(call, "condition"))?;
    let body = arguments.block("body").ok_or_else(|| missing(call, "body"))?;

    Ok((condition, body))
}

fn warn_empty(call: &Call, body: &Block) {
    if body.is_empty() {
        tracing::warn!(directive = call.name, "directive has an empty block");
    }
}

/// `#foreach $x in E [indexing $i [from E]] [limit E] B`
pub struct ForeachDirective;

impl Directive for ForeachDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("foreach")
            .with(Slot::Target("target"))
            .with(Slot::Keyword("in"))
            .with(Slot::Value("list"))
            .with(Slot::Optional(vec![
                Slot::Keyword("indexing"),
                Slot::Target("index"),
                Slot::Optional(vec![Slot::Keyword("from"), Slot::Value("from")]),
            ]))
            .with(Slot::Optional(vec![Slot::Keyword("limit"), Slot::Value("limit")]))
            .with(Slot::Block("body"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let arguments = &call.arguments;
        let target = arguments
            .target("target")
            .ok_or_else(|| missing(call, "target"))?;
        let list = arguments
            .expression("list")
            .ok_or_else(|| missing(call, "list"))?;
        let body = arguments.block("body").ok_or_else(|| missing(call, "body"))?;

        let label = list.get_region().literal(context.source()).to_string();
        let target = context.build_target(target)?;
        let list = context.build_expression(list)?.into_macro();
        let index = arguments
            .target("index")
            .map(|index| context.build_target(index))
            .transpose()?;
        let from = optional(arguments, "from", context)?;
        let limit = optional(arguments, "limit", context)?;
        let body = context.build_block(body)?.into_macro();

        Ok(Built::Dynamic(Macro::Foreach(Foreach {
            target,
            list: Box::new(list),
            label,
            index,
            from,
            limit,
            body: Box::new(body),
        })))
    }
}

/// `#count $i from E to E [step E] B`
///
/// Both bounds are inclusive.
pub struct CountDirective;

impl Directive for CountDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("count")
            .with(Slot::Target("target"))
            .with(Slot::Keyword("from"))
            .with(Slot::Value("start"))
            .with(Slot::Keyword("to"))
            .with(Slot::Value("end"))
            .with(Slot::Optional(vec![Slot::Keyword("step"), Slot::Value("step")]))
            .with(Slot::Block("body"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let arguments = &call.arguments;
        let target = arguments
            .target("target")
            .ok_or_else(|| missing(call, "target"))?;
        let body = arguments.block("body").ok_or_else(|| missing(call, "body"))?;

        let target = context.build_target(target)?;
        let start = optional(arguments, "start", context)?.ok_or_else(|| missing(call, "start"))?;
        let end = optional(arguments, "end", context)?.ok_or_else(|| missing(call, "end"))?;
        let step = optional(arguments, "step", context)?;
        let body = context.build_block(body)?.into_macro();

        Ok(Built::Dynamic(Macro::Count(Count {
            target,
            start,
            end,
            step,
            body: Box::new(body),
        })))
    }
}

/// `#while (c) [limit E] B`
///
/// Stops after a million iterations unless a limit is given. A negative
/// limit never stops.
pub struct WhileDirective;

impl Directive for WhileDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("while")
            .with(Slot::Condition("condition"))
            .with(Slot::Optional(vec![Slot::Keyword("limit"), Slot::Value("limit")]))
            .with(Slot::Block("body"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let arguments = &call.arguments;
        let (condition, body) = arm(call, arguments)?;
        warn_empty(call, body);

        let condition = match context.build_expression(condition)? {
            Built::Constant(value) if !compare::is_truthy(&value) => {
                return Ok(Built::Constant(Value::String(String::new())))
            }
            built => built.into_macro(),
        };
        let limit = optional(arguments, "limit", context)?;
        let body = context.build_block(body)?.into_macro();

        Ok(Built::Dynamic(Macro::While(While {
            condition: Box::new(condition),
            limit,
            body: Box::new(body),
        })))
    }
}

/// `#alternate $x through E`
///
/// Each reference to the variable yields the next item of the list.
pub struct AlternateDirective;

impl Directive for AlternateDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("alternate")
            .with(Slot::Target("target"))
            .with(Slot::Keyword("through"))
            .with(Slot::Value("list"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let arguments = &call.arguments;
        let reference = arguments
            .target("target")
            .ok_or_else(|| missing(call, "target"))?;
        let list = arguments
            .expression("list")
            .ok_or_else(|| missing(call, "list"))?;

        let names = reference.names();
        let Some([target]) = names.as_deref() else {
            return Err(context
                .error(format!("cannot alternate `${}`", reference.dotted()), reference.region)
                .with_help("`#alternate` binds a top-level variable, such as `$color`"));
        };
        let target = target.to_string();
        let label = list.get_region().literal(context.source()).to_string();
        let list = context.build_expression(list)?.into_macro();

        Ok(Built::Dynamic(Macro::Alternate(Alternate {
            target,
            list: Box::new(list),
            label,
        })))
    }
}

/// `#eval E [using E]`
///
/// Writes a bound block, or a string compiled as a template. With `using`,
/// the output is rendered with a context made from the map.
pub struct EvalDirective;

impl Directive for EvalDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("eval")
            .with(Slot::Value("macro"))
            .with(Slot::Optional(vec![Slot::Keyword("using"), Slot::Value("using")]))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let arguments = &call.arguments;
        let target = optional(arguments, "macro", context)?.ok_or_else(|| missing(call, "macro"))?;
        let using = optional(arguments, "using", context)?;

        Ok(Built::Dynamic(Macro::Eval(Eval { target, using })))
    }
}

/// Build the expression stored under a key, if there is one.
fn optional(
    arguments: &Arguments,
    key: &str,
    context: &mut BuildContext,
) -> Result<Option<Box<Macro>>, Error> {
    arguments
        .expression(key)
        .map(|expression| {
            context
                .build_expression(expression)
                .map(|built| Box::new(built.into_macro()))
        })
        .transpose()
}

/// `#include E`
///
/// The name is evaluated at runtime, and the template is looked up in the
/// engine when the directive is evaluated.
pub struct IncludeDirective;

impl Directive for IncludeDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("include").with(Slot::Value("template"))
    }

    fn build(&self, call: &Call, context: &mut BuildContext) -> Result<Built, Error> {
        let name = call
            .arguments
            .expression("template")
            .ok_or_else(|| missing(call, "template"))?;
        let name = context.build_expression(name)?.into_macro();

        Ok(Built::Dynamic(Macro::Include(Box::new(name))))
    }
}

#[cfg(test)]
mod tests {
    use crate::{handler::CrankyHandler, Engine, Error, Kind};
    use serde_json::json;

    #[test]
    fn test_constant_branch_selected_at_build() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#if ($a) {a} #elseif (true) {b} #else {c}")?;
        let mut context = engine.context().with_must("a", false);

        assert_eq!(template.evaluate(&mut context)?, "b");

        let template = engine.compile("#if (false) {a} #elseif (1 > 2) {b} #else {$c}")?;
        let mut context = engine.context().with_must("c", "c");
        assert_eq!(template.evaluate(&mut context)?, "c");

        let template = engine.compile("#if (false) {a} #elseif (1 > 2) {b}")?;
        assert!(template.is_constant());

        Ok(())
    }

    #[test]
    fn test_dropped_branch_is_not_built() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#if (false) {#const $a = 1} $a")?;
        let mut context = engine.context().with_must("a", 2);

        assert_eq!(template.evaluate(&mut context)?, "2");

        Ok(())
    }

    #[test]
    fn test_begin_end_forms() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile(
            "#if ($a)\n#begin\nyes\n#end\n#else\nno\n#end\n#foreach $x in $list $x #end",
        )?;
        let mut context = engine
            .context()
            .with_must("a", true)
            .with_must("list", json!([1, 2]));

        assert_eq!(template.evaluate(&mut context)?, "yes12");

        Ok(())
    }

    #[test]
    fn test_count_bounds_may_be_dynamic() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#count $i from $a to $a + 2 {$i}")?;
        let mut context = engine.context().with_must("a", 4);

        assert_eq!(template.evaluate(&mut context)?, "456");

        Ok(())
    }

    #[test]
    fn test_missing_keyword() {
        let engine = Engine::new();
        let error = engine.compile("#foreach $x of $list {$x}").unwrap_err();

        assert_eq!(error.get_kind(), Kind::Parse);
    }

    #[test]
    fn test_include_dynamic_name() -> Result<(), Error> {
        let engine = Engine::new();
        engine.add_template("a", "A")?;
        engine.add_template("b", "B")?;
        let template = engine.compile("#foreach $t in $names {#include $t}")?;
        let mut context = engine.context().with_must("names", json!(["a", "b", "a"]));

        assert_eq!(template.evaluate(&mut context)?, "ABA");

        Ok(())
    }

    #[test]
    fn test_while() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#while ($i < 3) {[$i]#set $i = $i + 1}")?;
        let mut context = engine.context().with_must("i", 0);

        assert_eq!(template.evaluate(&mut context)?, "[0][1][2]");
        assert_eq!(context.get("i"), Some(&json!(3)));

        let template = engine.compile("#while ($i < 3) limit -1 {#set $i = $i + 1}$i")?;
        let mut context = engine.context().with_must("i", 0);
        assert_eq!(template.evaluate(&mut context)?, "3");

        assert!(engine.compile("#while (false) {x}")?.is_constant());

        Ok(())
    }

    #[test]
    fn test_while_limit() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#while (true) limit 2 {x}")?;

        let output = template.evaluate(&mut engine.context())?;
        assert!(output.starts_with("xx"));
        assert!(output.contains("exceeded the limit of 2"));

        let mut context = engine.context();
        context.set_handler(CrankyHandler);
        assert!(template.evaluate(&mut context).is_err());

        let template = engine.compile("#while (true) limit \"many\" {x}")?;
        let output = template.evaluate(&mut engine.context())?;
        assert!(output.contains("Cannot evaluate limit"));
        assert!(!output.contains('x'));

        Ok(())
    }

    #[test]
    fn test_alternate() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile(
            "#alternate $color through [\"odd\", \"even\"]#foreach $n in [1, 2, 3] {<$color>}",
        )?;

        assert_eq!(template.evaluate(&mut engine.context())?, "<odd><even><odd>");

        let template = engine.compile("#alternate $color through $colors")?;
        let mut context = engine.context().with_must("colors", 5);
        let output = template.evaluate(&mut context)?;
        assert!(output.contains("list argument is not a list: $colors"));

        Ok(())
    }

    #[test]
    fn test_eval_using() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#templet $t {$A $B $C}#eval $t using {A: 1, B: 2, C: 3}")?;

        assert_eq!(template.evaluate(&mut engine.context())?, "1 2 3");

        let template = engine.compile("#templet $t {$OuterVars.user/$EvalDepth}#eval $t using {}")?;
        let mut context = engine.context().with_must("user", "taylor");
        assert_eq!(template.evaluate(&mut context)?, "taylor/0");

        Ok(())
    }

    #[test]
    fn test_eval_self() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile(
            "#templet $down {#if ($n > 0) {$n#eval $Self using {n: $n - 1}}}#eval $down using {n: 3}",
        )?;

        assert_eq!(template.evaluate(&mut engine.context())?, "321");

        Ok(())
    }

    #[test]
    fn test_eval_string() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#eval $source")?;
        let mut context = engine
            .context()
            .with_must("source", "[$n]")
            .with_must("n", 4);

        assert_eq!(template.evaluate(&mut context)?, "[4]");

        let mut context = engine.context().with_must("source", 4);
        assert!(template.evaluate(&mut context).is_err());

        Ok(())
    }

    #[test]
    fn test_eval_itself_is_bounded() {
        let engine = Engine::new();
        let template = engine.compile("#templet $t {#eval $t}#eval $t");

        let error = template.and_then(|template| template.evaluate(&mut engine.context()));
        assert!(error.is_err_and(|error| error.get_reason().contains("depth")));
    }
}
