pub(crate) mod compare;
mod context;
pub mod handler;
mod node;
pub(crate) mod property;

pub use context::Context;
pub use node::{
    Alternate, Base, Bind, Block, Count, Eval, Filtered, Foreach, If, Lookup, Macro, Piece, Render,
    Segment, Set, Variable, While,
};

use crate::{
    compile::{Operator, Template},
    log::{error_missing_template, Error},
    writer::{to_text, FastWriter},
};
use compare::{integer, is_truthy};
use context::Binding;
use handler::Fault;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Iterations of `#while` when no limit is given.
const WHILE_LIMIT: i64 = 1_000_000;

/// Nesting of `#eval ... using` at which a render is aborted.
const EVAL_DEPTH: i64 = 100;

/// Render a [`Template`] with the given [`Context`].
///
/// Provides a shortcut when the output is only needed as a `String`.
///
/// # Examples
///
/// ```
/// use macrame::{render, Engine};
///
/// let engine = Engine::new();
/// let template = engine.compile("hello, $name!").unwrap();
/// let mut context = engine.context().with_must("name", "taylor");
///
/// assert_eq!(render(&template, &mut context).unwrap(), "hello, taylor!");
/// ```
pub fn render(template: &Template, context: &mut Context) -> Result<String, Error> {
    template.evaluate(context)
}

impl Macro {
    /// Evaluate the node to a [`Value`].
    ///
    /// Nodes that produce output, such as a [`Block`], evaluate to the text
    /// they would write.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when an operator is applied to incompatible
    /// values, a function fails, or the [`Handler`][`handler::Handler`]
    /// escalates a fault.
    pub fn evaluate(&self, context: &mut Context) -> Result<Value, Error> {
        match self {
            Macro::Constant(value) => Ok(value.clone()),
            Macro::Variable(variable) => variable.evaluate(context),
            Macro::Unary(unary, operand) => {
                let operand = operand.evaluate(context)?;
                compare::apply_unary(*unary, &operand)
            }
            Macro::Binary(operator, left, right) => {
                let left = left.evaluate(context)?;
                match operator {
                    Operator::And if !is_truthy(&left) => return Ok(Value::Bool(false)),
                    Operator::Or if is_truthy(&left) => return Ok(Value::Bool(true)),
                    _ => (),
                }
                let right = right.evaluate(context)?;

                compare::apply(*operator, &left, &right)
            }
            Macro::List(items) => items
                .iter()
                .map(|item| item.evaluate(context))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Macro::Map(entries) => {
                let mut object = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    object.insert(key.clone(), value.evaluate(context)?);
                }

                Ok(Value::Object(object))
            }
            Macro::Filtered(filtered) => filtered.evaluate(context),
            Macro::Directive(node) => node.evaluate(context),
            _ => {
                let mut writer = FastWriter::new();
                self.write(context, &mut writer)?;

                Ok(Value::String(writer.to_string()))
            }
        }
    }

    /// Write the output of the node.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when evaluation fails, see [`Macro::evaluate`].
    pub fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        match self {
            Macro::Constant(value) => writer.write_value(value),
            Macro::Variable(variable) => variable.write(context, writer)?,
            Macro::Quoted(parts) => {
                for part in parts {
                    part.write(context, writer)?;
                }
            }
            Macro::Filtered(filtered) => filtered.write(context, writer)?,
            Macro::Block(block) => block.write(context, writer)?,
            Macro::If(node) => node.write(context, writer)?,
            Macro::Foreach(node) => node.write(context, writer)?,
            Macro::Count(node) => node.write(context, writer)?,
            Macro::Set(node) => node.write(context, writer)?,
            Macro::While(node) => node.write(context, writer)?,
            Macro::Bind(node) => {
                context.bind(node.target.as_str(), Binding::Node(node.body.clone()));
            }
            Macro::Alternate(node) => node.write(context, writer)?,
            Macro::Eval(node) => node.write(context, writer)?,
            Macro::Include(name) => include(name, context, writer)?,
            Macro::Directive(node) => node.write(context, writer)?,
            Macro::Unary(..) | Macro::Binary(..) | Macro::List(..) | Macro::Map(..) => {
                let value = self.evaluate(context)?;
                writer.write_value(&value);
            }
        }

        Ok(())
    }
}

impl Block {
    /// Write every piece in order, recording the position of each node in
    /// the [`Context`] before it is written.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when a node fails. The location of the node is
    /// attached if the `Error` has none.
    pub fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        for piece in &self.pieces {
            match piece {
                Piece::Text(bytes) => writer.write_bytes(bytes),
                Piece::Node { node, line, column } => {
                    context.set_position(*line, *column);
                    node.write(context, writer).map_err(|error| {
                        if error.get_location().is_some() {
                            error
                        } else {
                            error.with_location(context.location())
                        }
                    })?;
                }
            }
        }

        Ok(())
    }
}

impl Variable {
    /// Evaluate the variable, handing any [`Fault`] to the active handler.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the handler escalates the fault.
    pub fn evaluate(&self, context: &mut Context) -> Result<Value, Error> {
        match self.resolve(context) {
            Ok(value) => Ok(value),
            Err(fault) => {
                let handler = context.handler();
                handler.evaluate(&self.name, fault, context)
            }
        }
    }

    /// Write the variable, or the text the active handler chooses in its
    /// place.
    ///
    /// A variable that resolves to null is a fault here, so it is never
    /// silently written as nothing.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the handler escalates the fault.
    pub fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        match self.resolve_output(context) {
            Ok(value) => writer.write_value(&value),
            Err(fault) => {
                let handler = context.handler();
                let text = handler.expand(&self.name, fault, context)?;
                writer.write_str(&text);
            }
        }

        Ok(())
    }

    fn resolve_output(&self, context: &mut Context) -> Result<Value, Fault> {
        match self.resolve(context)? {
            Value::Null => Err(Fault::NullValue),
            value => Ok(value),
        }
    }

    /// Follow the path of the variable.
    ///
    /// A null value before the last segment stops the walk with
    /// [`Fault::NullValue`].
    pub fn resolve(&self, context: &mut Context) -> Result<Value, Fault> {
        let (mut current, rest) = match &self.base {
            Base::Node(node) => (node.evaluate(context).map_err(Fault::Failed)?, &self.path[..]),
            Base::Context => {
                let Some((first, rest)) = self.path.split_first() else {
                    return Err(Fault::NoSuchVariable);
                };
                (self.resolve_first(first, context)?, rest)
            }
        };

        for segment in rest {
            if current.is_null() {
                return Err(Fault::NullValue);
            }
            current = resolve_segment(current, segment, context)?;
        }

        Ok(current)
    }

    fn resolve_first(&self, first: &Segment, context: &mut Context) -> Result<Value, Fault> {
        let engine = context.engine();

        match first {
            Segment::Call(name, arguments) => {
                let function = engine
                    .get_function(name)
                    .ok_or_else(|| Fault::NoSuchMethod(name.clone()))?;
                let arguments = evaluate_all(arguments, context, Vec::new())?;

                function.call(&arguments).map_err(Fault::Failed)
            }
            Segment::Name(name) => {
                if self.lookup != Lookup::Tool || engine.get_tool(name).is_none() {
                    if let Some(bound) = resolve_binding(name, context) {
                        return bound;
                    }
                }

                let found = match self.lookup {
                    Lookup::Tool => engine.get_tool(name).or_else(|| context.get(name)),
                    Lookup::Property | Lookup::Function => {
                        context.get(name).or_else(|| engine.get_tool(name))
                    }
                };

                found.cloned().ok_or(Fault::NoSuchVariable)
            }
        }
    }
}

/// Evaluate the name if a directive bound it, rather than set it.
fn resolve_binding(name: &str, context: &mut Context) -> Option<Result<Value, Fault>> {
    let node = match context.binding_mut(name)? {
        Binding::Alternate { items, next } => {
            let item = items.get(*next).cloned().unwrap_or(Value::Null);
            *next = (*next + 1) % items.len().max(1);

            return Some(Ok(item));
        }
        Binding::Template(template) => {
            let template = template.clone();
            return Some(template.evaluate(context).map(Value::String).map_err(Fault::Failed));
        }
        Binding::Node(node) => node.clone(),
    };

    Some(node.evaluate(context).map_err(Fault::Failed))
}

/// Resolve one segment after the first against the current value.
///
/// A name is a property of the value, or else a function of the engine
/// called with the value as its only argument.
fn resolve_segment(current: Value, segment: &Segment, context: &mut Context) -> Result<Value, Fault> {
    let engine = context.engine();

    match segment {
        Segment::Name(name) => {
            if let Some(found) = property::get(&current, name) {
                return Ok(found.into_owned());
            }
            if let Some(function) = engine.get_function(name) {
                return function.call(&[current]).map_err(Fault::Failed);
            }

            match current {
                Value::Object(_) => Ok(Value::Null),
                _ => Err(Fault::NoSuchProperty(name.clone())),
            }
        }
        Segment::Call(name, arguments) => {
            let function = engine
                .get_function(name)
                .ok_or_else(|| Fault::NoSuchMethod(name.clone()))?;
            let mut receiver = Vec::with_capacity(arguments.len() + 1);
            receiver.push(current);
            let arguments = evaluate_all(arguments, context, receiver)?;

            function.call(&arguments).map_err(Fault::Failed)
        }
    }
}

fn evaluate_all(
    arguments: &[Macro],
    context: &mut Context,
    mut values: Vec<Value>,
) -> Result<Vec<Value>, Fault> {
    for argument in arguments {
        values.push(argument.evaluate(context).map_err(Fault::Failed)?);
    }

    Ok(values)
}

impl Filtered {
    /// Evaluate the inner node and pass the value through every filter.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the inner node or a filter fails.
    pub fn evaluate(&self, context: &mut Context) -> Result<Value, Error> {
        let value = self.inner.evaluate(context)?;

        self.apply(value)
    }

    /// Write the filtered value.
    ///
    /// When the inner variable cannot be resolved, the text of the handler
    /// is written unfiltered.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when a filter fails, or the handler escalates a
    /// fault.
    pub fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        let value = match &*self.inner {
            Macro::Variable(variable) => match variable.resolve_output(context) {
                Ok(value) => value,
                Err(fault) => {
                    let handler = context.handler();
                    let text = handler.expand(&variable.name, fault, context)?;
                    writer.write_str(&text);
                    return Ok(());
                }
            },
            node => node.evaluate(context)?,
        };
        writer.write_value(&self.apply(value)?);

        Ok(())
    }

    fn apply(&self, mut value: Value) -> Result<Value, Error> {
        for (name, filter) in &self.filters {
            value = filter.apply(&value).map_err(|error| {
                if error.get_help().is_some() {
                    error
                } else {
                    error.with_help(format!("raised by filter `{name}`"))
                }
            })?;
        }

        Ok(value)
    }
}

impl If {
    fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        for (condition, body) in &self.branches {
            if is_truthy(&condition.evaluate(context)?) {
                return body.write(context, writer);
            }
        }

        match &self.otherwise {
            Some(otherwise) => otherwise.write(context, writer),
            None => Ok(()),
        }
    }
}

impl Foreach {
    fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        let items = match self.list.evaluate(context)? {
            Value::Array(items) => items,
            Value::Object(object) => object.into_iter().map(|(_, value)| value).collect(),
            _ => {
                let message = format!("Unable to resolve list {}", self.label);
                return warning(&message, context, writer);
            }
        };

        let mut index = match &self.from {
            Some(from) => integer(&from.evaluate(context)?, "from")?,
            None => 1,
        };
        let limit = match &self.limit {
            Some(limit) => Some(integer(&limit.evaluate(context)?, "limit")?),
            None => None,
        };
        let target = path(&self.target);
        let index_target = self.index.as_deref().map(path);

        for (n, item) in items.into_iter().enumerate() {
            if limit.is_some_and(|limit| i64::try_from(n).map_or(true, |n| n >= limit)) {
                break;
            }

            context.set_property(&target, item)?;
            if let Some(index_target) = &index_target {
                context.set_property(index_target, Value::from(index))?;
            }
            self.body.write(context, writer)?;
            index = index.saturating_add(1);
        }

        Ok(())
    }
}

impl Count {
    fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        let start = integer(&self.start.evaluate(context)?, "from")?;
        let end = integer(&self.end.evaluate(context)?, "to")?;
        let step = match &self.step {
            Some(step) => integer(&step.evaluate(context)?, "step")?,
            None => 1,
        };
        if step == 0 {
            return Err(Error::build("invalid step")
                .with_help("`#count` requires a step other than zero"));
        }

        let target = path(&self.target);
        let mut current = start;
        while (step > 0 && current <= end) || (step < 0 && current >= end) {
            context.set_property(&target, Value::from(current))?;
            self.body.write(context, writer)?;

            match current.checked_add(step) {
                Some(next) => current = next,
                None => break,
            }
        }

        Ok(())
    }
}

impl Set {
    fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        let value = self.value.evaluate(context)?;

        match context.set_property(&path(&self.target), value) {
            Ok(()) => Ok(()),
            Err(error) => warning(error.get_reason(), context, writer),
        }
    }
}

impl While {
    fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        let limit = match &self.limit {
            None => Some(WHILE_LIMIT),
            Some(limit) => match limit.evaluate(context)?.as_i64() {
                Some(limit) if limit < 0 => None,
                Some(limit) => Some(limit),
                None => return warning("#while: Cannot evaluate limit", context, writer),
            },
        };

        let mut count = 0_i64;
        while is_truthy(&self.condition.evaluate(context)?) {
            if limit.is_some_and(|limit| count >= limit) {
                let message = format!("#while: exceeded the limit of {count}");
                return warning(&message, context, writer);
            }
            self.body.write(context, writer)?;
            count = count.saturating_add(1);
        }

        Ok(())
    }
}

impl Alternate {
    fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        let items = match self.list.evaluate(context)? {
            Value::Array(items) => items,
            Value::Object(object) => object.into_iter().map(|(_, value)| value).collect(),
            _ => {
                let message = format!("#alternate: list argument is not a list: {}", self.label);
                return warning(&message, context, writer);
            }
        };
        context.bind(self.target.as_str(), Binding::Alternate { items, next: 0 });

        Ok(())
    }
}

/// What `#eval` renders.
enum Evaluable {
    Node(Arc<Macro>),
    Template(Arc<Template>),
}

impl Evaluable {
    fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        match self {
            Evaluable::Node(node) => node.write(context, writer),
            Evaluable::Template(template) => template.write(context, writer),
        }
    }

    fn binding(&self) -> Binding {
        match self {
            Evaluable::Node(node) => Binding::Node(node.clone()),
            Evaluable::Template(template) => Binding::Template(template.clone()),
        }
    }
}

impl Eval {
    /// Render the target, in a context of its own when `using` is given.
    ///
    /// The nested context holds the variables of the map, `EvalDepth`,
    /// `OuterVars` with the variables of the outermost render, and `Self`
    /// bound to the target so it may evaluate itself again.
    fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
        let target = self.target(context)?;
        let limit = context.engine().settings().include_depth;
        let nesting = context.depth();
        if nesting >= limit {
            return Err(Error::build("eval depth exceeded").with_help(format!(
                "`#eval` would nest more than {limit} templates, does a macro evaluate itself?"
            )));
        }
        let Some(using) = &self.using else {
            context.set_depth(nesting + 1);
            let result = target.write(context, writer);
            context.set_depth(nesting);

            return result;
        };

        let variables = match using.evaluate(context)? {
            Value::Object(variables) => variables,
            Value::Null => Map::new(),
            other => {
                return Err(Error::build("invalid variables")
                    .with_help(format!("`#eval ... using` requires a map, found `{}`", to_text(&other))))
            }
        };
        let depth = match context.get("EvalDepth").and_then(Value::as_i64) {
            Some(depth) => depth.saturating_add(1),
            None => 0,
        };
        if depth > EVAL_DEPTH {
            return Err(Error::build("eval depth exceeded").with_help(format!(
                "`#eval` nested more than {EVAL_DEPTH} times, does a macro evaluate itself without end?"
            )));
        }
        let outer = match context.get("OuterVars") {
            Some(outer) => outer.clone(),
            None => Value::Object(context.variables().clone()),
        };

        let mut inner = Context::new(context.engine());
        inner.share_handler(context.handler());
        inner.set_depth(nesting + 1);
        inner.enter_template(context.template());
        for (name, value) in variables {
            inner.put(name, value);
        }
        inner.put("EvalDepth", Value::from(depth));
        inner.put("OuterVars", outer);
        inner.bind("Self", target.binding());

        target.write(&mut inner, writer)
    }

    /// A variable bound by `#templet` or `#setblock as macro` is the target
    /// itself, anything else must evaluate to the source of a template.
    fn target(&self, context: &mut Context) -> Result<Evaluable, Error> {
        if let Macro::Variable(variable) = &*self.target {
            if let Some([name]) = variable.names().as_deref() {
                match context.binding(name) {
                    Some(Binding::Node(node)) => return Ok(Evaluable::Node(node.clone())),
                    Some(Binding::Template(template)) => {
                        return Ok(Evaluable::Template(template.clone()))
                    }
                    _ => (),
                }
            }
        }

        match self.target.evaluate(context)? {
            Value::String(source) => {
                let template = Template::new(context.template(), source);
                template.parse(context.engine())?;

                Ok(Evaluable::Template(Arc::new(template)))
            }
            Value::Null => Err(Error::build("nothing to evaluate")
                .with_help("`#eval` requires a macro or a string, the value is null")),
            other => Err(Error::build("nothing to evaluate").with_help(format!(
                "`#eval` requires a macro or a string, found `{}`",
                to_text(&other)
            ))),
        }
    }
}

/// Write the text the active handler chooses for a warning.
fn warning(message: &str, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
    tracing::warn!(location = %context.location(), "{message}");
    let handler = context.handler();
    writer.write_str(&handler.warning(message, context)?);

    Ok(())
}

/// Write the template named by the value of the node.
fn include(name: &Macro, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error> {
    let name = name.evaluate(context)?;
    let name = to_text(&name);
    let engine = context.engine();
    let Some(template) = engine.get_template(&name) else {
        return Err(error_missing_template(&name));
    };

    let limit = engine.settings().include_depth;
    let depth = context.depth();
    if depth >= limit {
        return Err(Error::build("include depth exceeded").with_help(format!(
            "including `{name}` would nest more than {limit} templates, is a template including itself?"
        )));
    }

    context.set_depth(depth + 1);
    let result = template.write(context, writer);
    context.set_depth(depth);

    result
}

fn path(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}
