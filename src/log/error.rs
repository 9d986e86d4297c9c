use super::{Pointer, RED, RESET};
use crate::{log::Visual, region::Region};
use std::fmt::{Debug, Display, Formatter, Result};

/// Describes an error, and allows adding a contextual help text and visualization.
///
/// # Examples
///
/// Creating an [`Error`] that includes a [`Visual`] of type [`Pointer`]:
///
/// ```
/// use macrame::{Error, Kind};
///
/// let error = Error::build("unknown directive")
///     .with_kind(Kind::Parse)
///     .with_pointer("#forech $x in $list {}", 0..7)
///     .with_name("index.wm")
///     .with_help("did you mean `#foreach`?");
///
/// assert_eq!(error.get_kind(), Kind::Parse);
/// ```
///
/// When printed with `println!("{:#}", error)` the [`Error`] produces this output:
///
/// ```text
/// error: unknown directive
///   --> index.wm:1:1
///    |
///  1 | #forech $x in $list {}
///    | ^^^^^^^
///    |
///   = help: did you mean `#foreach`?
/// ```
pub struct Error {
    /// Describes the cause of the [`Error`].
    reason: String,
    /// The phase that produced the [`Error`].
    kind: Kind,
    /// A visualization to help illustrate the [`Error`].
    visual: Option<Box<dyn Visual>>,
    /// Additional information to display with the [`Error`].
    help: Option<String>,
    /// The name of the Template that the [`Error`] comes from.
    name: Option<String>,
    /// Evaluation location, formatted as `name:line.column`.
    location: Option<String>,
}

/// The phase in which an [`Error`] was raised.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Kind {
    /// Malformed template text.
    Parse,
    /// A directive or macro could not be assembled from its arguments.
    Build,
    /// A render was aborted while walking the evaluation tree.
    Evaluation,
    /// The output sink refused a write or flush.
    Io,
    /// The engine rejected a directive, filter or template registration.
    Registration,
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Kind::Parse => write!(f, "parse"),
            Kind::Build => write!(f, "build"),
            Kind::Evaluation => write!(f, "evaluation"),
            Kind::Io => write!(f, "io"),
            Kind::Registration => write!(f, "registration"),
        }
    }
}

impl Error {
    /// Create a new [`Error`] with the given reason text.
    ///
    /// The [`Kind`] defaults to [`Kind::Evaluation`], which is what a
    /// [`Filter`][`crate::filter::Filter`] or [`Function`][`crate::function::Function`]
    /// usually wants. The additional fields may be populated using the
    /// various methods defined on `Error`.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::Error;
    ///
    /// Error::build("filter `upper` requires string input")
    ///     .with_help("use quotes to coerce data to string");
    /// ```
    pub fn build<T>(reason: T) -> Self
    where
        T: Into<String>,
    {
        Error {
            reason: reason.into(),
            kind: Kind::Evaluation,
            name: None,
            visual: None,
            help: None,
            location: None,
        }
    }

    /// Set the reason text, which is a short summary of the [`Error`].
    pub fn with_reason<T>(mut self, text: T) -> Self
    where
        T: Into<String>,
    {
        self.reason = text.into();

        self
    }

    /// Set the [`Kind`] of the [`Error`].
    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;

        self
    }

    /// Set the name text, which is the name of the [`Template`][`crate::Template`]
    /// that the [`Error`] is related to.
    ///
    /// A name that was already set is kept, so the innermost template wins
    /// when an error travels through an `#include`.
    pub fn with_name<T>(mut self, text: T) -> Self
    where
        T: Into<String>,
    {
        if self.name.is_none() {
            self.name = Some(text.into());
        }

        self
    }

    /// Set the evaluation location, formatted as `name:line.column`.
    pub fn with_location<T>(mut self, text: T) -> Self
    where
        T: Into<String>,
    {
        self.location = Some(text.into());

        self
    }

    /// Set the [`Visual`], which is a visualization that helps illustrate the
    /// cause of the error.
    pub fn with_visual(mut self, visual: impl Visual + 'static) -> Self {
        self.visual = Some(Box::new(visual));

        self
    }

    /// Set the visualization to a new [`Pointer`] with the given source text and
    /// [`Region`].
    ///
    /// This is a shortcut method for creating a `Pointer` yourself and then
    /// passing it to `with_visual`.
    pub fn with_pointer<T>(mut self, source: &str, region: T) -> Self
    where
        T: Into<Region>,
    {
        self.visual = Some(Box::new(Pointer::new(source, region.into())));

        self
    }

    /// Set the help text, which is contextual information to accompany the
    /// reason text.
    pub fn with_help<T>(mut self, text: T) -> Self
    where
        T: Into<String>,
    {
        self.help = Some(text.into());

        self
    }

    /// Return the reason text.
    pub fn get_reason(&self) -> &str {
        &self.reason
    }

    /// Return the [`Kind`] of the error.
    pub fn get_kind(&self) -> Kind {
        self.kind
    }

    /// Return the help text, if any.
    pub fn get_help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Return the name of the `Template` that the error is related to.
    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Return the evaluation location, if the error was raised during a render.
    pub fn get_location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Return true if a [`Visual`] is attached.
    pub fn has_visual(&self) -> bool {
        self.visual.is_some()
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if !f.alternate() {
            writeln!(f, "{self:#}")?;
        }
        f.debug_struct("Error")
            .field("reason", &self.reason)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("location", &self.location)
            .field("visual", &self.visual)
            .field("help", &self.help)
            .finish()?;

        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let header = format!("{RED}error{RESET}");
        write!(f, "{header}: {}", self.reason)?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }

        if let (Some(visual), true) = (&self.visual, f.alternate()) {
            return visual.display(f, self.name.as_deref(), self.help.as_deref());
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.reason == other.reason
            && self.kind == other.kind
            && self.help == other.help
            && self.name == other.name
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, Kind};

    #[test]
    fn test_display_plain() {
        let error = Error::build("no such variable").with_location("index.wm:2.5");
        let display = format!("{error}");

        assert!(display.contains("no such variable"));
        assert!(display.ends_with("at index.wm:2.5"));
    }

    #[test]
    fn test_display_alternate_includes_pointer() {
        let error = Error::build("unexpected token")
            .with_kind(Kind::Parse)
            .with_pointer("#set $a == 1", 8..10)
            .with_name("set.wm")
            .with_help("expected `=`");
        let display = format!("{error:#}");

        assert!(display.contains("--> set.wm:1:9"));
        assert!(display.contains("= help: expected `=`"));
    }

    #[test]
    fn test_name_keeps_innermost() {
        let error = Error::build("oops").with_name("inner").with_name("outer");

        assert_eq!(error.get_name(), Some("inner"));
    }

    #[test]
    fn test_default_kind() {
        assert_eq!(Error::build("x").get_kind(), Kind::Evaluation);
    }
}
