//! Contains the `Filter` trait and the rules deciding which filters wrap a
//! variable.
//!
//! A filter is any type which implements the [`Filter`][`crate::filter::Filter`] trait.
//! Register one with an [`Engine`][`crate::Engine`] by name, using
//! [`add_filter`][`crate::Engine::add_filter()`], and a template can then attach it to a
//! variable with the `#filter` directive:
//!
//! ```text
//! #filter $user through "shout"
//! ```
//!
//! From that point in the template on, every reference to `$user` in the output is
//! passed through the filter. So is every reference to a property of it, such as
//! `$user.name`, because rules match on the start of the dotted path.
//!
//! The `#htmlescape $x` and `#escape $x` directives attach the built in `html` filter,
//! and `#silence $x` drops the variable from the output entirely.
//!
//! # Examples
//!
//! You can either create a struct and implement the trait on that, or just create
//! a function matching the signature of [`Filter::apply`]. Both are accepted.
//!
//! Here we use a function:
//!
//! ```rust
//! use macrame::{
//!     filter::{
//!         serde::{json, Value},
//!         Error,
//!     },
//!     Engine,
//! };
//!
//! fn shout(value: &Value) -> Result<Value, Error> {
//!     match value {
//!         Value::String(string) => Ok(json!(string.to_uppercase())),
//!         _ => Err(Error::build("filter `shout` requires string input")
//!                 .with_help("use quotes to coerce data to string")
//!              ),
//!     }
//! }
//!
//! let engine = Engine::new().with_filter_must("shout", shout);
//! let template = engine
//!     .compile("$name #filter $name through \"shout\" $name.first")
//!     .unwrap();
//!
//! let mut context = engine
//!     .context()
//!     .with_must("name", json!({"first": "taylor"}));
//!
//! assert_eq!(
//!     template.evaluate(&mut context).unwrap(),
//!     "{first: taylor}TAYLOR"
//! );
//! ```
//!
//! An [`Error`][`crate::filter::Error`] returned from a filter aborts the render,
//! with the location of the variable attached.

pub mod serde {
    //! Contains types from `serde_json`.
    pub use serde_json::*;
}
pub mod visual {
    //! Contains the `Visual` trait and different types which implement `Visual`.
    pub use crate::log::{Pointer, Visual};
}

pub use crate::{log::Error, region::Region};

use crate::writer::to_text;
use serde_json::Value;
use std::{
    fmt::{self, Debug},
    sync::Arc,
};

/// Describes a type which can be used to transform a variable on its way to
/// the output.
pub trait Filter: Sync + Send {
    /// Execute the filter with the given input and return a new Value as output.
    fn apply(&self, input: &Value) -> Result<Value, Error>;

    /// Return false to leave a property of the filtered variable alone.
    ///
    /// A filter attached to `$a` is offered every extra segment of a
    /// reference such as `$a.b.c`, and applies only if it accepts all of
    /// them.
    fn narrow(&self, _name: &str) -> bool {
        true
    }
}

/// Allows assignment of any function matching the signature of `apply` as a `Filter`
/// to `Engine`, instead of requiring a struct be created.
impl<F> Filter for F
where
    F: Fn(&Value) -> Result<Value, Error> + Sync + Send,
{
    fn apply(&self, value: &Value) -> Result<Value, Error> {
        self(value)
    }
}

#[derive(Clone)]
enum Action {
    Apply(String, Arc<dyn Filter>),
    Drop,
}

#[derive(Clone)]
struct Rule {
    path: Vec<String>,
    action: Action,
}

/// Ordered rules attaching filters to variable paths, built while a template
/// is built.
///
/// Rules are kept in registration order. For a given reference, every rule
/// whose path is a prefix of the reference contributes its filter, and the
/// first registered filter is applied first.
#[derive(Clone, Default)]
pub struct FilterManager {
    rules: Vec<Rule>,
}

impl FilterManager {
    /// Create a new [`FilterManager`] with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a [`Filter`] to every reference starting with `path`.
    pub fn add_filter<S>(&mut self, path: Vec<String>, name: S, filter: Arc<dyn Filter>)
    where
        S: Into<String>,
    {
        self.rules.push(Rule {
            path,
            action: Action::Apply(name.into(), filter),
        });
    }

    /// Drop every reference starting with `path` from the output.
    pub fn add_drop(&mut self, path: Vec<String>) {
        self.rules.push(Rule {
            path,
            action: Action::Drop,
        });
    }

    /// Return the filters that apply to a reference, in the order they are
    /// applied.
    ///
    /// Returns `None` when a drop rule matches the reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use macrame::filter::{html, FilterManager};
    /// use std::sync::Arc;
    ///
    /// let mut manager = FilterManager::new();
    /// manager.add_filter(vec!["a".to_string()], "html", Arc::new(html));
    /// manager.add_drop(vec!["a".to_string(), "secret".to_string()]);
    ///
    /// assert_eq!(manager.filters_for(&["a", "b"]).map(|f| f.len()), Some(1));
    /// assert_eq!(manager.filters_for(&["ab"]).map(|f| f.len()), Some(0));
    /// assert!(manager.filters_for(&["a", "secret", "key"]).is_none());
    /// ```
    pub fn filters_for(&self, names: &[&str]) -> Option<Vec<(String, Arc<dyn Filter>)>> {
        let mut chain = Vec::new();

        for rule in &self.rules {
            if rule.path.len() > names.len()
                || !rule.path.iter().zip(names).all(|(expect, name)| expect == name)
            {
                continue;
            }

            match &rule.action {
                Action::Drop => return None,
                Action::Apply(name, filter) => {
                    let extra = &names[rule.path.len()..];
                    if extra.iter().all(|segment| filter.narrow(segment)) {
                        chain.push((name.clone(), filter.clone()));
                    }
                }
            }
        }

        Some(chain)
    }

    /// Return true when no rule has been registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Debug for FilterManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|rule| match &rule.action {
                Action::Apply(name, _) => format!("{} -> {name}", rule.path.join(".")),
                Action::Drop => format!("{} -> drop", rule.path.join(".")),
            }))
            .finish()
    }
}

/// Escape the text of a value for use in HTML.
///
/// Replaces `&`, `<`, `>`, `"` and `'` with character references.
///
/// # Examples
///
/// ```
/// use macrame::filter::html;
/// use serde_json::json;
///
/// assert_eq!(html(&json!("<b>\"hi\"</b>")).unwrap(), json!("&lt;b&gt;&quot;hi&quot;&lt;/b&gt;"));
/// ```
pub fn html(value: &Value) -> Result<Value, Error> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let text = to_text(value);
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }

    Ok(Value::String(escaped))
}

/// Encode the text of a value for use in a URL query.
///
/// Letters, digits and `.-*_` are kept, a space becomes `+`, and every
/// other byte of the UTF-8 encoding becomes `%XX`.
///
/// # Examples
///
/// ```
/// use macrame::filter::url;
/// use serde_json::json;
///
/// assert_eq!(url(&json!("a b&c=é")).unwrap(), json!("a+b%26c%3D%C3%A9"));
/// ```
pub fn url(value: &Value) -> Result<Value, Error> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let text = to_text(value);
    let mut encoded = String::with_capacity(text.len());

    for byte in text.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'*' | b'_' => {
                encoded.push(char::from(byte));
            }
            b' ' => encoded.push('+'),
            byte => encoded.push_str(&format!("%{byte:02X}")),
        }
    }

    Ok(Value::String(encoded))
}

#[cfg(test)]
mod tests {
    use super::{html, url, Filter, FilterManager};
    use crate::{log::Error, Engine};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn names(path: &str) -> Vec<String> {
        path.split('.').map(String::from).collect()
    }

    fn suffix(text: &'static str) -> Arc<dyn Filter> {
        Arc::new(move |value: &Value| -> Result<Value, Error> {
            Ok(json!(format!("{}{text}", value.as_str().unwrap_or_default())))
        })
    }

    struct TopOnly;

    impl Filter for TopOnly {
        fn apply(&self, _: &Value) -> Result<Value, Error> {
            Ok(json!("top"))
        }

        fn narrow(&self, name: &str) -> bool {
            name == "visible"
        }
    }

    #[test]
    fn test_prefix_and_order() {
        let mut manager = FilterManager::new();
        manager.add_filter(names("a"), "one", suffix("1"));
        manager.add_filter(names("a.b"), "two", suffix("2"));
        manager.add_filter(names("c"), "three", suffix("3"));

        let chain = manager.filters_for(&["a", "b", "c"]).unwrap_or_default();
        let applied = chain.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
        assert_eq!(applied, vec!["one", "two"]);

        let chain = manager.filters_for(&["a"]).unwrap_or_default();
        assert_eq!(chain.len(), 1);
        assert!(manager.filters_for(&["b"]).is_some_and(|chain| chain.is_empty()));
    }

    #[test]
    fn test_drop_wins() {
        let mut manager = FilterManager::new();
        manager.add_drop(names("a"));
        manager.add_filter(names("a.b"), "one", suffix("1"));

        assert!(manager.filters_for(&["a", "b"]).is_none());
        assert!(manager.filters_for(&["ab"]).is_some());
    }

    #[test]
    fn test_narrow() {
        let mut manager = FilterManager::new();
        manager.add_filter(names("a"), "top", Arc::new(TopOnly));

        assert_eq!(manager.filters_for(&["a"]).map(|c| c.len()), Some(1));
        assert_eq!(manager.filters_for(&["a", "visible"]).map(|c| c.len()), Some(1));
        assert_eq!(manager.filters_for(&["a", "hidden"]).map(|c| c.len()), Some(0));
    }

    #[test]
    fn test_html() -> Result<(), Error> {
        assert_eq!(html(&json!("Tom & 'Jerry'"))?, json!("Tom &amp; &#39;Jerry&#39;"));
        assert_eq!(html(&json!(5))?, json!("5"));
        assert_eq!(html(&Value::Null)?, Value::Null);

        Ok(())
    }

    #[test]
    fn test_url() -> Result<(), Error> {
        assert_eq!(url(&json!("safe-text_1.0*"))?, json!("safe-text_1.0*"));
        assert_eq!(url(&json!("a/b?c"))?, json!("a%2Fb%3Fc"));

        Ok(())
    }

    #[test]
    fn test_htmlescape_applies_to_properties() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#htmlescape $a $a.b|$c.b")?;
        let mut context = engine
            .context()
            .with_must("a", json!({"b": "<tag>"}))
            .with_must("c", json!({"b": "<tag>"}));

        assert_eq!(template.evaluate(&mut context)?, "&lt;tag&gt;|<tag>");

        Ok(())
    }

    #[test]
    fn test_macro_argument_is_filtered_as_its_variable() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#htmlescape $u #macro show($x) {[$x]} #show($u) [$u]")?;
        let mut context = engine.context().with_must("u", "<b>");

        assert_eq!(template.evaluate(&mut context)?, "[&lt;b&gt;] [&lt;b&gt;]");

        let template = engine.compile("#htmlescape $u #macro name($p) {$p.name}#name($u)")?;
        let mut context = engine.context().with_must("u", json!({"name": "<i>"}));

        assert_eq!(template.evaluate(&mut context)?, "&lt;i&gt;");

        Ok(())
    }

    #[test]
    fn test_filter_only_applies_after_directive() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("$a #escape $a $a")?;
        let mut context = engine.context().with_must("a", "<");

        assert_eq!(template.evaluate(&mut context)?, "<&lt;");

        Ok(())
    }

    #[test]
    fn test_filter_through() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#filter $q through \"url\" ?q=$q")?;
        let mut context = engine.context().with_must("q", "a b");

        assert_eq!(template.evaluate(&mut context)?, "?q=a+b");
        assert!(engine.compile("#filter $q through \"nothing\"").is_err());

        Ok(())
    }

    #[test]
    fn test_filters_stack() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#escape $a #filter $a through \"url\" $a")?;
        let mut context = engine.context().with_must("a", "<x y>");

        assert_eq!(template.evaluate(&mut context)?, "%26lt%3Bx+y%26gt%3B");

        Ok(())
    }

    #[test]
    fn test_silence() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("[$a] #silence $a [$a][$a.b][\"$a\"]")?;
        let mut context = engine.context().with_must("a", "x");

        assert_eq!(template.evaluate(&mut context)?, "[x][][][\"\"]");

        Ok(())
    }

    #[test]
    fn test_constant_is_filtered_at_build_time() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#const $a = \"<b>\" #escape $a $a")?;

        assert!(template.is_constant());
        assert_eq!(template.evaluate(&mut engine.context())?, "&lt;b&gt;");

        Ok(())
    }
}
