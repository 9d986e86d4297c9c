//! Policies deciding what happens when a variable cannot be evaluated.
//!
//! A missing variable is not fatal by itself. When a [`Variable`] fails to
//! resolve, the [`Handler`] active in the [`Context`] is given the [`Fault`]
//! and decides to recover with a value or some text, or to abort the render
//! with an [`Error`].
//!
//! # Examples
//!
//! ```
//! use macrame::{handler::CrankyHandler, Engine};
//!
//! let engine = Engine::new();
//! let template = engine.compile("Hello, $name!").unwrap();
//!
//! let mut context = engine.context();
//! assert_eq!(
//!     template.evaluate(&mut context).unwrap(),
//!     "Hello, <!-- Cannot expand $name at ?:1.8: No such variable -->!"
//! );
//!
//! context.set_handler(CrankyHandler);
//! assert!(template.evaluate(&mut context).is_err());
//! ```
//!
//! [`Variable`]: crate::Variable
use crate::{
    log::{Error, Kind},
    render::Context,
};
use serde_json::Value;
use std::fmt::{self, Display};

/// Name of the context variable [`DebugHandler`] collects messages into.
pub const ERROR_VARIABLE: &str = "WMERROR";

/// Reason a variable could not be evaluated.
#[derive(Debug)]
pub enum Fault {
    NoSuchVariable,
    /// The variable, or a segment before the last one, is null.
    NullValue,
    NoSuchProperty(String),
    NoSuchMethod(String),
    /// A value along the path has the wrong type for the next segment.
    InvalidType(String),
    /// A function or filter returned an [`Error`].
    Failed(Error),
}

impl Fault {
    /// Return true for the faults that are expected in normal use, a
    /// missing variable or a null value.
    pub fn is_benign(&self) -> bool {
        matches!(self, Fault::NoSuchVariable | Fault::NullValue)
    }

    /// Convert the fault into an [`Error`] that aborts the render.
    pub fn into_error(self, variable: &str, location: &str) -> Error {
        match self {
            Fault::Failed(error) if error.get_location().is_some() => error,
            Fault::Failed(error) => error.with_location(location),
            fault => Error::build(format!("cannot evaluate `${variable}`"))
                .with_kind(Kind::Evaluation)
                .with_location(location)
                .with_help(fault.to_string()),
        }
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::NoSuchVariable => write!(f, "No such variable"),
            Fault::NullValue => write!(f, "Value is null"),
            Fault::NoSuchProperty(name) => write!(f, "No such property `{name}`"),
            Fault::NoSuchMethod(name) => write!(f, "No such method `{name}`"),
            Fault::InvalidType(description) => write!(f, "{description}"),
            Fault::Failed(error) => write!(f, "{}", error.get_reason()),
        }
    }
}

/// Decides how a render recovers from a [`Fault`].
pub trait Handler: Send + Sync {
    /// Return the value to use for a variable that failed to resolve where
    /// a value is needed, such as in a condition.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] to abort the render.
    fn evaluate(&self, variable: &str, fault: Fault, context: &mut Context) -> Result<Value, Error>;

    /// Return the text to write in place of a variable that failed to
    /// resolve in the output.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] to abort the render.
    fn expand(&self, variable: &str, fault: Fault, context: &mut Context)
        -> Result<String, Error>;

    /// Return the text to write for a recoverable problem of a directive,
    /// such as a `#foreach` over something that is not a list.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] to abort the render.
    fn warning(&self, message: &str, context: &mut Context) -> Result<String, Error>;
}

/// Recovers from missing and null variables, and aborts on anything else.
///
/// Missing values evaluate to null, and expand to an HTML comment describing
/// the problem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

impl Handler for DefaultHandler {
    fn evaluate(&self, variable: &str, fault: Fault, context: &mut Context) -> Result<Value, Error> {
        let location = context.location();
        if fault.is_benign() {
            tracing::error!(%location, "cannot evaluate ${variable}: {fault}");
            return Ok(Value::Null);
        }

        Err(fault.into_error(variable, &location))
    }

    fn expand(
        &self,
        variable: &str,
        fault: Fault,
        context: &mut Context,
    ) -> Result<String, Error> {
        let location = context.location();
        if fault.is_benign() {
            let message = format!("Cannot expand ${variable} at {location}: {fault}");
            tracing::error!("{message}");
            return Ok(comment(&message));
        }

        Err(fault.into_error(variable, &location))
    }

    fn warning(&self, message: &str, _: &mut Context) -> Result<String, Error> {
        Ok(comment(message))
    }
}

/// Recovers from every property problem, and only aborts when a function
/// or filter fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplacentHandler;

impl Handler for ComplacentHandler {
    fn evaluate(&self, variable: &str, fault: Fault, context: &mut Context) -> Result<Value, Error> {
        match fault {
            Fault::InvalidType(_) | Fault::Failed(_) => {
                Err(fault.into_error(variable, &context.location()))
            }
            _ => Ok(Value::Null),
        }
    }

    fn expand(
        &self,
        variable: &str,
        fault: Fault,
        context: &mut Context,
    ) -> Result<String, Error> {
        let location = context.location();

        Ok(comment(&format!("Cannot expand ${variable} at {location}: {fault}")))
    }

    fn warning(&self, message: &str, _: &mut Context) -> Result<String, Error> {
        Ok(comment(message))
    }
}

/// Aborts the render on every fault and warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrankyHandler;

impl Handler for CrankyHandler {
    fn evaluate(&self, variable: &str, fault: Fault, context: &mut Context) -> Result<Value, Error> {
        Err(fault.into_error(variable, &context.location()))
    }

    fn expand(
        &self,
        variable: &str,
        fault: Fault,
        context: &mut Context,
    ) -> Result<String, Error> {
        Err(fault.into_error(variable, &context.location()))
    }

    fn warning(&self, message: &str, context: &mut Context) -> Result<String, Error> {
        Err(Error::build(format!("evaluation warning: {message}"))
            .with_location(context.location()))
    }
}

/// Collects every problem into the context variable `WMERROR`, so a
/// template can list them at the end of the page.
///
/// Nothing is written in place of the failed variable.
///
/// # Examples
///
/// ```
/// use macrame::{handler::DebugHandler, Engine};
///
/// let engine = Engine::new();
/// let template = engine
///     .compile("$a$b#foreach $e in $WMERROR {\n[$e]}")
///     .unwrap();
///
/// let mut context = engine.context();
/// context.set_handler(DebugHandler);
///
/// assert_eq!(
///     template.evaluate(&mut context).unwrap(),
///     "[Cannot expand $a at ?:1.1: No such variable]\
///      [Cannot expand $b at ?:1.3: No such variable]"
/// );
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugHandler;

impl DebugHandler {
    fn record(&self, message: String, context: &mut Context) {
        tracing::warn!("{message}");

        let message = Value::String(message);
        match context.get_mut(ERROR_VARIABLE) {
            Some(Value::Array(errors)) => {
                if !errors.contains(&message) {
                    errors.push(message);
                }
            }
            _ => {
                context.put(ERROR_VARIABLE, Value::Array(vec![message]));
            }
        }
    }
}

impl Handler for DebugHandler {
    fn evaluate(&self, variable: &str, fault: Fault, context: &mut Context) -> Result<Value, Error> {
        let message = format!("Cannot evaluate ${variable} at {}: {fault}", context.location());
        self.record(message, context);

        Ok(Value::Null)
    }

    fn expand(
        &self,
        variable: &str,
        fault: Fault,
        context: &mut Context,
    ) -> Result<String, Error> {
        let message = format!("Cannot expand ${variable} at {}: {fault}", context.location());
        self.record(message, context);

        Ok(String::new())
    }

    fn warning(&self, message: &str, context: &mut Context) -> Result<String, Error> {
        self.record(message.to_string(), context);

        Ok(String::new())
    }
}

fn comment(text: &str) -> String {
    format!("<!-- {text} -->")
}
