use crate::{
    compile::{Operator, Unary},
    filter::Filter,
    log::Error,
    render::Context,
    writer::FastWriter,
};
use serde_json::Value;
use std::{
    fmt::{self, Debug},
    sync::Arc,
};

/// A resolved, immutable node of the evaluation tree.
///
/// Every node is stateless with respect to a render. Whatever changes
/// between renders lives in the [`Context`], so one tree may be shared by
/// many threads at once.
#[derive(Debug, Clone)]
pub enum Macro {
    /// A value known when the template was built.
    Constant(Value),
    Variable(Variable),
    Unary(Unary, Box<Macro>),
    Binary(Operator, Box<Macro>, Box<Macro>),
    /// A list literal with at least one dynamic item.
    List(Vec<Macro>),
    /// A map literal with at least one dynamic value.
    Map(Vec<(String, Macro)>),
    /// A quoted string with embedded variables, as the pieces to concatenate.
    Quoted(Vec<Macro>),
    Filtered(Filtered),
    Block(Block),
    If(If),
    Foreach(Foreach),
    Count(Count),
    Set(Set),
    While(While),
    Bind(Bind),
    Alternate(Alternate),
    Eval(Eval),
    /// Render the template named by the inner node into the output.
    Include(Box<Macro>),
    /// A node contributed by a user defined directive.
    Directive(Arc<dyn Render>),
}

/// Runtime behaviour of a user defined directive.
///
/// A [`Directive`][`crate::directive::Directive`] that needs to do work on
/// every render returns a `Render` implementation wrapped in
/// [`Macro::Directive`].
pub trait Render: Send + Sync + Debug {
    /// Write the output of the node.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] to abort the render.
    fn write(&self, context: &mut Context, writer: &mut FastWriter) -> Result<(), Error>;

    /// Return the value of the node.
    ///
    /// The default collects the output of [`Render::write`].
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] to abort the render.
    fn evaluate(&self, context: &mut Context) -> Result<Value, Error> {
        let mut writer = FastWriter::new();
        self.write(context, &mut writer)?;

        Ok(Value::String(writer.to_string()))
    }
}

/// A flat sequence of pre-encoded text and nodes.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub pieces: Vec<Piece>,
}

#[derive(Debug, Clone)]
pub enum Piece {
    /// Literal text, encoded as UTF-8.
    Text(Box<[u8]>),
    /// A node, with the position it was found at.
    Node {
        node: Macro,
        line: usize,
        column: usize,
    },
}

/// A reference to a value, such as `$user.name` or `$list.join(", ")`.
///
/// The path is fixed when the template is built, only the values found
/// along it change from one render to the next.
#[derive(Debug, Clone)]
pub struct Variable {
    pub base: Base,
    pub lookup: Lookup,
    pub path: Vec<Segment>,
    /// Dotted name used in diagnostics.
    pub name: String,
}

impl Variable {
    /// Return the path as plain names, or `None` when a segment is a method
    /// call or the variable does not start at the context.
    pub fn names(&self) -> Option<Vec<String>> {
        if !matches!(self.base, Base::Context) {
            return None;
        }

        self.path
            .iter()
            .map(|segment| match segment {
                Segment::Name(name) => Some(name.clone()),
                Segment::Call(..) => None,
            })
            .collect()
    }
}

/// Where a [`Variable`] starts.
#[derive(Debug, Clone)]
pub enum Base {
    /// The first segment is looked up in the context.
    Context,
    /// Every segment applies to the value of a node, such as a macro
    /// argument.
    Node(Box<Macro>),
}

/// How the first segment of a [`Variable`] is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The context first, then the tools of the engine.
    Property,
    /// The tools of the engine first, then the context.
    Tool,
    /// The first segment calls a function of the engine.
    Function,
}

#[derive(Debug, Clone)]
pub enum Segment {
    Name(String),
    Call(String, Vec<Macro>),
}

/// A node wrapped by filters, the first one innermost.
#[derive(Clone)]
pub struct Filtered {
    pub inner: Box<Macro>,
    pub filters: Vec<(String, Arc<dyn Filter>)>,
}

impl Debug for Filtered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filtered")
            .field("inner", &self.inner)
            .field(
                "filters",
                &self.filters.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Branches of `#if` and `#elseif` whose conditions are dynamic, and what
/// to render when none holds.
#[derive(Debug, Clone)]
pub struct If {
    pub branches: Vec<(Macro, Macro)>,
    pub otherwise: Option<Box<Macro>>,
}

#[derive(Debug, Clone)]
pub struct Foreach {
    pub target: Vec<String>,
    pub list: Box<Macro>,
    /// Source text of the list, for warnings.
    pub label: String,
    pub index: Option<Vec<String>>,
    pub from: Option<Box<Macro>>,
    pub limit: Option<Box<Macro>>,
    pub body: Box<Macro>,
}

#[derive(Debug, Clone)]
pub struct Count {
    pub target: Vec<String>,
    pub start: Box<Macro>,
    pub end: Box<Macro>,
    pub step: Option<Box<Macro>>,
    pub body: Box<Macro>,
}

#[derive(Debug, Clone)]
pub struct Set {
    pub target: Vec<String>,
    pub value: Box<Macro>,
}

#[derive(Debug, Clone)]
pub struct While {
    pub condition: Box<Macro>,
    pub limit: Option<Box<Macro>>,
    pub body: Box<Macro>,
}

/// Binds a variable to a node that is evaluated again at every reference,
/// as `#templet` and `#setblock as macro` do.
#[derive(Debug, Clone)]
pub struct Bind {
    pub target: String,
    pub body: Arc<Macro>,
}

/// Binds a variable that yields the items of a list in turn, one per
/// reference.
#[derive(Debug, Clone)]
pub struct Alternate {
    pub target: String,
    pub list: Box<Macro>,
    /// Source text of the list, for warnings.
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Eval {
    pub target: Box<Macro>,
    /// Variables of the nested render, when it gets a context of its own.
    pub using: Option<Box<Macro>>,
}
