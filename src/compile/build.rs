mod context;

pub use context::BuildContext;

use crate::{
    compile::{
        directive::Call,
        tree::{self, Element, Expression, Invoke, Part, Reference, Step},
        Operator,
    },
    log::{Error, Kind},
    region::Region,
    render::{compare, property, Base, Block, Filtered, Lookup, Macro, Piece, Segment, Variable},
    writer::to_text,
};
use serde_json::Value;
use std::collections::HashMap;

/// Result of building any part of a template.
#[derive(Debug, Clone)]
pub enum Built {
    /// The value is known at build time.
    Constant(Value),
    /// The value depends on the context, and must be evaluated on every
    /// render.
    Dynamic(Macro),
}

impl Built {
    /// Convert into a [`Macro`], wrapping a constant if necessary.
    pub fn into_macro(self) -> Macro {
        match self {
            Built::Constant(value) => Macro::Constant(value),
            Built::Dynamic(node) => node,
        }
    }

    /// Return the constant value, if this is one.
    pub fn constant(&self) -> Option<&Value> {
        match self {
            Built::Constant(value) => Some(value),
            Built::Dynamic(_) => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Built::Constant(_))
    }
}

impl<'engine> BuildContext<'engine> {
    /// Build a parsed [`Block`][`tree::Block`].
    ///
    /// The result is a constant string when the block contains no dynamic
    /// content. Otherwise it is a flat [`Block`] of pre-encoded text and
    /// nodes, with nested blocks spliced in.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when any element fails to build.
    pub fn build_block(&mut self, block: &tree::Block) -> Result<Built, Error> {
        let mut pieces = Pieces::default();

        for element in &block.elements {
            match element {
                Element::Text(text, _) => pieces.push_text(text),
                Element::Variable(reference) => {
                    if let Some(built) = self.build_output(reference)? {
                        pieces.push(built, self.position(reference.region));
                    }
                }
                Element::Directive(call) => {
                    let built = self.build_call(call)?;
                    pieces.push(built, self.position(call.region));
                }
                Element::Invoke(invoke) => {
                    let built = self.build_invoke(invoke)?;
                    pieces.push(built, self.position(invoke.region));
                }
            }
        }

        Ok(pieces.finish())
    }

    /// Build an [`Expression`], folding it into a constant when every
    /// operand is constant.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when constant operands cannot be combined, such
    /// as a division by zero.
    pub fn build_expression(&mut self, expression: &Expression) -> Result<Built, Error> {
        match expression {
            Expression::Literal(value, _) => Ok(Built::Constant(value.clone())),
            Expression::Reference(reference) => self.build_reference(reference),
            Expression::Quoted(parts, _) => {
                let mut built = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        Part::Text(text) => built.push(Built::Constant(Value::String(text.clone()))),
                        Part::Reference(reference) => {
                            if let Some(output) = self.build_output(reference)? {
                                built.push(output);
                            }
                        }
                    }
                }

                if built.iter().all(Built::is_constant) {
                    let text = built
                        .iter()
                        .filter_map(Built::constant)
                        .map(to_text)
                        .collect::<String>();

                    return Ok(Built::Constant(Value::String(text)));
                }

                Ok(Built::Dynamic(Macro::Quoted(
                    built.into_iter().map(Built::into_macro).collect(),
                )))
            }
            Expression::List(items, _) => {
                let built = items
                    .iter()
                    .map(|item| self.build_expression(item))
                    .collect::<Result<Vec<_>, _>>()?;

                if built.iter().all(Built::is_constant) {
                    let values = built.into_iter().filter_map(|b| match b {
                        Built::Constant(value) => Some(value),
                        Built::Dynamic(_) => None,
                    });

                    return Ok(Built::Constant(Value::Array(values.collect())));
                }

                Ok(Built::Dynamic(Macro::List(
                    built.into_iter().map(Built::into_macro).collect(),
                )))
            }
            Expression::Map(entries, _) => {
                let mut built = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    built.push((key.clone(), self.build_expression(value)?));
                }

                if built.iter().all(|(_, value)| value.is_constant()) {
                    let object = built.into_iter().filter_map(|(key, value)| match value {
                        Built::Constant(value) => Some((key, value)),
                        Built::Dynamic(_) => None,
                    });

                    return Ok(Built::Constant(Value::Object(object.collect())));
                }

                Ok(Built::Dynamic(Macro::Map(
                    built
                        .into_iter()
                        .map(|(key, value)| (key, value.into_macro()))
                        .collect(),
                )))
            }
            Expression::Unary(unary, operand, region) => match self.build_expression(operand)? {
                Built::Constant(value) => compare::apply_unary(*unary, &value)
                    .map(Built::Constant)
                    .map_err(|error| self.attach(error, *region)),
                Built::Dynamic(node) => Ok(Built::Dynamic(Macro::Unary(*unary, Box::new(node)))),
            },
            Expression::Binary(operator, left, right, region) => {
                let left = self.build_expression(left)?;
                if let Some(value) = left.constant() {
                    match operator {
                        Operator::And if !compare::is_truthy(value) => {
                            return Ok(Built::Constant(Value::Bool(false)));
                        }
                        Operator::Or if compare::is_truthy(value) => {
                            return Ok(Built::Constant(Value::Bool(true)));
                        }
                        _ => (),
                    }
                }

                let right = self.build_expression(right)?;
                match (left, right) {
                    (Built::Constant(left), Built::Constant(right)) => {
                        compare::apply(*operator, &left, &right)
                            .map(Built::Constant)
                            .map_err(|error| self.attach(error, *region))
                    }
                    (left, right) => Ok(Built::Dynamic(Macro::Binary(
                        *operator,
                        Box::new(left.into_macro()),
                        Box::new(right.into_macro()),
                    ))),
                }
            }
        }
    }

    /// Build a [`Reference`] that is not in output position, so no filter
    /// applies to it.
    ///
    /// A name bound by `#const`, `#param` or a macro argument is replaced
    /// by the bound value.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when a method argument fails to build.
    pub fn build_reference(&mut self, reference: &Reference) -> Result<Built, Error> {
        let name = reference.dotted();

        if let Some(bound) = self.lookup(reference.first()) {
            let rest = &reference.path[1..];
            if rest.is_empty() {
                return Ok(bound);
            }

            return match bound {
                Built::Constant(value) => {
                    let names = rest
                        .iter()
                        .map(|step| match step {
                            Step::Name(name) => Some(name.as_str()),
                            Step::Call(..) => None,
                        })
                        .collect::<Option<Vec<_>>>();
                    if let Some(folded) = names.and_then(|names| fold_property(&value, &names)) {
                        return Ok(Built::Constant(folded));
                    }

                    Ok(Built::Dynamic(Macro::Variable(Variable {
                        base: Base::Node(Box::new(Macro::Constant(value))),
                        lookup: Lookup::Property,
                        path: self.build_segments(rest)?,
                        name,
                    })))
                }
                Built::Dynamic(Macro::Variable(mut variable))
                    if matches!(variable.base, Base::Context) =>
                {
                    variable.path.extend(self.build_segments(rest)?);
                    variable.name = format!("{}.{}", variable.name, dotted(rest));

                    Ok(Built::Dynamic(Macro::Variable(variable)))
                }
                Built::Dynamic(node) => Ok(Built::Dynamic(Macro::Variable(Variable {
                    base: Base::Node(Box::new(node)),
                    lookup: Lookup::Property,
                    path: self.build_segments(rest)?,
                    name,
                }))),
            };
        }

        let lookup = match reference.path.first() {
            Some(Step::Call(..)) => Lookup::Function,
            _ if self.engine().has_tool(reference.first()) => Lookup::Tool,
            _ => Lookup::Property,
        };

        Ok(Built::Dynamic(Macro::Variable(Variable {
            base: Base::Context,
            lookup,
            path: self.build_segments(&reference.path)?,
            name,
        })))
    }

    /// Build a [`Reference`] in output position, applying the filters
    /// registered for its path.
    ///
    /// Returns `None` when a drop rule silences the reference.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when a filter rejects a constant value.
    pub fn build_output(&mut self, reference: &Reference) -> Result<Option<Built>, Error> {
        let path = self.output_path(reference);
        let names = path.iter().map(String::as_str).collect::<Vec<_>>();
        let Some(filters) = self.filters().filters_for(&names) else {
            return Ok(None);
        };

        let built = self.build_reference(reference)?;
        if filters.is_empty() {
            return Ok(Some(built));
        }

        match built {
            Built::Constant(mut value) => {
                for (_, filter) in &filters {
                    value = filter
                        .apply(&value)
                        .map_err(|error| self.attach(error, reference.region))?;
                }

                Ok(Some(Built::Constant(value)))
            }
            Built::Dynamic(node) => Ok(Some(Built::Dynamic(Macro::Filtered(Filtered {
                inner: Box::new(node),
                filters,
            })))),
        }
    }

    /// Return the path filters are looked up by.
    ///
    /// A macro argument bound to a variable is filtered as that variable.
    fn output_path(&self, reference: &Reference) -> Vec<String> {
        let names = |steps: &[Step]| {
            steps
                .iter()
                .map(|step| step.name().to_string())
                .collect::<Vec<_>>()
        };

        let bound = match self.lookup(reference.first()) {
            Some(Built::Dynamic(Macro::Variable(variable))) => variable.names(),
            _ => None,
        };
        match bound {
            Some(mut path) => {
                path.extend(names(reference.path.get(1..).unwrap_or_default()));
                path
            }
            None => names(&reference.path),
        }
    }

    /// Resolve the target of an assignment into a path of names within the
    /// context.
    ///
    /// A macro argument bound to a variable resolves to that variable.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the target is a constant, an expression or
    /// contains a method call.
    pub fn build_target(&mut self, reference: &Reference) -> Result<Vec<String>, Error> {
        let Some(names) = reference.names() else {
            return Err(self.error(
                format!("cannot assign to method call `${}`", reference.dotted()),
                reference.region,
            ));
        };
        let rest = names[1..].iter().map(|name| name.to_string());

        match self.lookup(reference.first()) {
            None => Ok(names.iter().map(|name| name.to_string()).collect()),
            Some(Built::Dynamic(Macro::Variable(variable)))
                if matches!(variable.base, Base::Context) =>
            {
                match variable.names() {
                    Some(mut path) => {
                        path.extend(rest);
                        Ok(path)
                    }
                    None => Err(self.error(
                        format!("cannot assign to `${}`", reference.dotted()),
                        reference.region,
                    )
                    .with_help(format!("`${}` is bound to a method call", reference.first()))),
                }
            }
            Some(Built::Constant(_)) => Err(self.error(
                format!("cannot assign to constant `${}`", reference.first()),
                reference.region,
            )),
            Some(Built::Dynamic(_)) => Err(self.error(
                format!("cannot assign to `${}`", reference.dotted()),
                reference.region,
            )
            .with_help(format!("`${}` is bound to an expression", reference.first()))),
        }
    }

    /// Build a directive [`Call`] with the directive registered under its
    /// name.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the directive is unknown, an argument is
    /// missing or the directive fails to build.
    pub fn build_call(&mut self, call: &Call) -> Result<Built, Error> {
        let engine = self.engine();
        let Some(entry) = engine.directives().get(call.name) else {
            return Err(self.error(format!("unknown directive `#{}`", call.name), call.region));
        };

        call.check(&entry.prototype.descriptor)
            .map_err(|error| self.attach(error, call.region))?;

        entry
            .directive
            .build(call, self)
            .map_err(|error| self.attach(error, call.region))
    }

    /// Expand an invocation of a macro defined with `#macro`.
    ///
    /// Arguments are built in the calling scope, then bound to the formal
    /// parameters while the body is built.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the macro is unknown, the number of
    /// arguments does not match, or the macro expands itself.
    pub fn build_invoke(&mut self, invoke: &Invoke) -> Result<Built, Error> {
        let Some(definition) = self.get_macro(&invoke.name) else {
            if self.engine().settings().relaxed {
                let literal = invoke.region.literal(self.source()).to_string();
                return Ok(Built::Constant(Value::String(literal)));
            }

            return Err(self.error(format!("unknown macro `#{}`", invoke.name), invoke.region));
        };

        if invoke.arguments.len() != definition.params.len() {
            return Err(self.error(
                format!(
                    "macro `{}` invoked with {} arguments, expects {}",
                    invoke.name,
                    invoke.arguments.len(),
                    definition.params.len()
                ),
                invoke.region,
            ));
        }

        let mut frame = HashMap::with_capacity(definition.params.len());
        for (param, argument) in definition.params.iter().zip(&invoke.arguments) {
            frame.insert(param.clone(), self.build_expression(argument)?);
        }

        let previous = self
            .enter_macro(&invoke.name, frame, definition.source.clone())
            .map_err(|error| self.attach(error, invoke.region))?;
        let result = self.build_block(&definition.body);
        self.leave_macro(previous);

        result
    }

    /// Attach the current source and a pointer to an [`Error`] that has no
    /// visual yet.
    pub fn attach(&self, error: Error, region: Region) -> Error {
        let error = if error.get_kind() == Kind::Evaluation {
            error.with_kind(Kind::Build)
        } else {
            error
        };
        let error = if error.has_visual() {
            error
        } else {
            error.with_pointer(self.source(), region)
        };

        error.with_name(&**self.name())
    }

    fn build_segments(&mut self, steps: &[Step]) -> Result<Vec<Segment>, Error> {
        steps
            .iter()
            .map(|step| match step {
                Step::Name(name) => Ok(Segment::Name(name.clone())),
                Step::Call(name, arguments) => {
                    let arguments = arguments
                        .iter()
                        .map(|argument| self.build_expression(argument).map(Built::into_macro))
                        .collect::<Result<Vec<_>, _>>()?;

                    Ok(Segment::Call(name.clone(), arguments))
                }
            })
            .collect()
    }

    fn position(&self, region: Region) -> (usize, usize) {
        region.position(self.source())
    }
}

fn fold_property(value: &Value, names: &[&str]) -> Option<Value> {
    let mut current = value.clone();
    for name in names {
        current = property::get(&current, name)?.into_owned();
    }

    Some(current)
}

fn dotted(steps: &[Step]) -> String {
    steps.iter().map(Step::name).collect::<Vec<_>>().join(".")
}

/// Collects the pieces of a flat [`Block`], merging adjacent text.
#[derive(Default)]
struct Pieces {
    pieces: Vec<Piece>,
    text: Vec<u8>,
}

impl Pieces {
    fn push_text(&mut self, text: &str) {
        self.text.extend_from_slice(text.as_bytes());
    }

    fn push(&mut self, built: Built, (line, column): (usize, usize)) {
        match built {
            Built::Constant(value) => self.push_text(&to_text(&value)),
            Built::Dynamic(Macro::Block(block)) => {
                for piece in block.pieces {
                    match piece {
                        Piece::Text(bytes) => self.text.extend_from_slice(&bytes),
                        node => {
                            self.flush();
                            self.pieces.push(node);
                        }
                    }
                }
            }
            Built::Dynamic(node) => {
                self.flush();
                self.pieces.push(Piece::Node { node, line, column });
            }
        }
    }

    fn flush(&mut self) {
        if !self.text.is_empty() {
            let bytes = std::mem::take(&mut self.text);
            self.pieces.push(Piece::Text(bytes.into_boxed_slice()));
        }
    }

    fn finish(mut self) -> Built {
        if self.pieces.is_empty() {
            let text = String::from_utf8_lossy(&self.text).into_owned();
            return Built::Constant(Value::String(text));
        }
        self.flush();

        Built::Dynamic(Macro::Block(Block {
            pieces: self.pieces,
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Context, Engine, Error, Kind};
    use serde_json::json;

    fn render(engine: &Engine, source: &str) -> Result<String, Error> {
        let template = engine.compile(source)?;
        template.evaluate(&mut engine.context())
    }

    #[test]
    fn test_constant_block_folds() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#if (1 + 2 == 3) {yes} #else {no}")?;

        assert_eq!(template.evaluate(&mut engine.context())?, "yes");
        assert!(template.is_constant());

        Ok(())
    }

    #[test]
    fn test_arithmetic() -> Result<(), Error> {
        let engine = Engine::new();
        let result = render(&engine, "#set $a = 1 + 2 + 3 - 2 -1 + -4 - -4\n$a")?;

        assert_eq!(result, "\n3");

        Ok(())
    }

    #[test]
    fn test_divide_by_zero_is_build_error() {
        let engine = Engine::new();
        let error = engine.compile("#set $a = 1 / 0").unwrap_err();

        assert_eq!(error.get_kind(), Kind::Build);
    }

    #[test]
    fn test_const_inlines() -> Result<(), Error> {
        assert_eq!(render(&Engine::new(), "#const $a=3 $a")?, "3");

        Ok(())
    }

    #[test]
    fn test_const_property_folds() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#const $a = [\"x\", \"y\"] $a.1 $a.length")?;

        assert_eq!(template.evaluate(&mut engine.context())?, "y 2");
        assert!(template.is_constant());

        Ok(())
    }

    #[test]
    fn test_macro_no_args() -> Result<(), Error> {
        let engine = Engine::new();
        assert_eq!(render(&engine, "#macro foo {1} #foo")?, "1");
        assert_eq!(render(&engine, "#macro foo {crap} #foo")?, "crap");

        Ok(())
    }

    #[test]
    fn test_macro_bad_args() {
        let engine = Engine::new();
        for source in [
            "#macro foo() {} #foo(1)",
            "#macro foo {} #foo(1)",
            "#macro foo($a) {} #foo(1, 2)",
            "#macro foo($a) {} #foo()",
            "#macro foo($a) {} #foo",
        ] {
            let error = engine.compile(source).unwrap_err();
            assert_eq!(error.get_kind(), Kind::Build);
            assert!(error.get_reason().contains("invoked"));
        }
    }

    #[test]
    fn test_macro_set_var() -> Result<(), Error> {
        let engine = Engine::new();
        assert_eq!(render(&engine, "#macro foo {#set $b=1} #foo $b")?, "1");
        assert_eq!(render(&engine, "#macro foo($a) {#set $b=$a} #foo(1) $b")?, " 1");
        assert_eq!(
            render(&engine, "#macro foo($a) {#set $b=$a} #set $c=1 #foo($c) $b")?,
            " 1"
        );
        assert_eq!(
            render(&engine, "#macro foo($a) {#set $b=$a} #set $b=3 #foo(1) $b")?,
            " 1"
        );
        assert_eq!(
            render(&engine, "#macro foo($b) {#set $b=3} #set $c=1 #foo($c) $c")?,
            " 3"
        );

        Ok(())
    }

    #[test]
    fn test_macro_no_capture() -> Result<(), Error> {
        let engine = Engine::new();
        assert_eq!(
            render(&engine, "#macro goo {$a} #macro foo($a) {#goo} #set $a=1 #foo(2)")?,
            "1"
        );
        assert_eq!(
            render(&engine, "#macro goo($a) {#set $c=3 $a} #set $c=1 #goo(\"$c\")")?,
            "3"
        );

        Ok(())
    }

    #[test]
    fn test_macro_greet() -> Result<(), Error> {
        let engine = Engine::new();
        let result = render(&engine, "#macro greet($name) {Hi $name} #greet(\"Bob\")")?;

        assert_eq!(result, "Hi Bob");

        Ok(())
    }

    #[test]
    fn test_macro_recursion() {
        let engine = Engine::new();
        let error = engine.compile("#macro foo {#foo} #foo").unwrap_err();

        assert!(error.get_reason().contains("expands itself"));
    }

    #[test]
    fn test_assign_to_constant() {
        let engine = Engine::new();

        assert!(engine.compile("#const $a = 1 #set $a = 2").is_err());
    }

    #[test]
    fn test_short_circuit_folds() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#if (false && $missing) {a} #else {b}")?;

        assert!(template.is_constant());
        assert_eq!(template.evaluate(&mut engine.context())?, "b");

        Ok(())
    }

    #[test]
    fn test_dynamic_output_is_invariant_of_context_for_constants() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#set $x = 1 #const $y = \"two\" $y")?;
        let first = template.evaluate(&mut engine.context())?;
        let second = template.evaluate(&mut Context::new(&engine).with_must("y", json!(9)))?;

        assert_eq!(first, "two");
        assert_eq!(first, second);

        Ok(())
    }
}
