//! Contains the `Function` trait and the functions every
//! [`Engine`][`crate::Engine`] starts with.
//!
//! Functions serve two purposes in a template. Called directly, as in
//! `$now()`, a function produces a value from its arguments alone. Used as
//! a method, as in `$name.toUpperCase()` or `$list.join(", ")`, the value
//! before the dot is passed as the first argument.
//!
//! A property that is not found on a value is also tried as a function with
//! no other arguments, so `$list.isEmpty` works the same as
//! `$list.isEmpty()`.
//!
//! # Examples
//!
//! ```
//! use macrame::{Engine, Error};
//! use serde_json::{json, Value};
//!
//! fn repeat(arguments: &[Value]) -> Result<Value, Error> {
//!     match arguments {
//!         [Value::String(text), count] => {
//!             let count = count.as_u64().unwrap_or_default() as usize;
//!             Ok(json!(text.repeat(count)))
//!         }
//!         _ => Err(Error::build("function `repeat` expects a string and a count")),
//!     }
//! }
//!
//! let engine = Engine::new().with_function_must("repeat", repeat);
//! let template = engine.compile("$word.repeat(3)").unwrap();
//! let mut context = engine.context().with_must("word", "ab");
//!
//! assert_eq!(template.evaluate(&mut context).unwrap(), "ababab");
//! ```
use crate::{log::Error, render::property, writer::to_text};
use serde_json::Value;
use std::sync::Arc;

/// Describes a type which can be called from a template.
pub trait Function: Send + Sync {
    /// Call the function.
    ///
    /// When called as a method, the receiver is the first argument.
    fn call(&self, arguments: &[Value]) -> Result<Value, Error>;
}

impl<F> Function for F
where
    F: Fn(&[Value]) -> Result<Value, Error> + Send + Sync,
{
    fn call(&self, arguments: &[Value]) -> Result<Value, Error> {
        self(arguments)
    }
}

/// Return the functions registered with every new [`Engine`][`crate::Engine`].
pub(crate) fn builtins() -> Vec<(&'static str, Arc<dyn Function>)> {
    vec![
        entry("length", length),
        entry("size", length),
        entry("isEmpty", is_empty),
        entry("get", get),
        entry("keys", keys),
        entry("values", values),
        entry("contains", contains),
        entry("toUpperCase", to_upper_case),
        entry("toLowerCase", to_lower_case),
        entry("trim", trim),
        entry("toString", to_string),
        entry("join", join),
    ]
}

fn entry<T>(name: &'static str, function: T) -> (&'static str, Arc<dyn Function>)
where
    T: Function + 'static,
{
    (name, Arc::new(function))
}

/// Check the number of arguments and return them.
fn expect<'a, const N: usize>(name: &str, arguments: &'a [Value]) -> Result<&'a [Value; N], Error> {
    arguments.try_into().map_err(|_| {
        Error::build(format!("invalid arguments for `{name}`")).with_help(format!(
            "`{name}` expects {} argument(s) after the receiver, found {}",
            N.saturating_sub(1),
            arguments.len().saturating_sub(1)
        ))
    })
}

fn length(arguments: &[Value]) -> Result<Value, Error> {
    let [receiver] = expect::<1>("length", arguments)?;

    match receiver {
        Value::Array(array) => Ok(Value::from(array.len())),
        Value::Object(object) => Ok(Value::from(object.len())),
        Value::String(string) => Ok(Value::from(string.chars().count())),
        other => Err(Error::build("invalid receiver")
            .with_help(format!("`length` requires a list, map or string, found `{other}`"))),
    }
}

fn is_empty(arguments: &[Value]) -> Result<Value, Error> {
    let [receiver] = expect::<1>("isEmpty", arguments)?;
    let empty = match receiver {
        Value::Null => true,
        Value::Array(array) => array.is_empty(),
        Value::Object(object) => object.is_empty(),
        Value::String(string) => string.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    };

    Ok(Value::Bool(empty))
}

fn get(arguments: &[Value]) -> Result<Value, Error> {
    let [receiver, key] = expect::<2>("get", arguments)?;
    let found = property::get(receiver, &to_text(key)).map(|found| found.into_owned());

    Ok(found.unwrap_or(Value::Null))
}

fn keys(arguments: &[Value]) -> Result<Value, Error> {
    match expect::<1>("keys", arguments)? {
        [Value::Object(object)] => Ok(object.keys().cloned().map(Value::String).collect()),
        [other] => Err(Error::build("invalid receiver")
            .with_help(format!("`keys` requires a map, found `{other}`"))),
    }
}

fn values(arguments: &[Value]) -> Result<Value, Error> {
    match expect::<1>("values", arguments)? {
        [Value::Object(object)] => Ok(object.values().cloned().collect()),
        [Value::Array(array)] => Ok(Value::Array(array.clone())),
        [other] => Err(Error::build("invalid receiver")
            .with_help(format!("`values` requires a map, found `{other}`"))),
    }
}

fn contains(arguments: &[Value]) -> Result<Value, Error> {
    let [receiver, item] = expect::<2>("contains", arguments)?;
    let found = match receiver {
        Value::String(string) => string.contains(&*to_text(item)),
        Value::Array(array) => array.contains(item),
        Value::Object(object) => object.contains_key(&*to_text(item)),
        _ => false,
    };

    Ok(Value::Bool(found))
}

fn to_upper_case(arguments: &[Value]) -> Result<Value, Error> {
    let [receiver] = expect::<1>("toUpperCase", arguments)?;

    Ok(Value::String(to_text(receiver).to_uppercase()))
}

fn to_lower_case(arguments: &[Value]) -> Result<Value, Error> {
    let [receiver] = expect::<1>("toLowerCase", arguments)?;

    Ok(Value::String(to_text(receiver).to_lowercase()))
}

fn trim(arguments: &[Value]) -> Result<Value, Error> {
    let [receiver] = expect::<1>("trim", arguments)?;

    Ok(Value::String(to_text(receiver).trim().to_string()))
}

fn to_string(arguments: &[Value]) -> Result<Value, Error> {
    let [receiver] = expect::<1>("toString", arguments)?;

    Ok(Value::String(to_text(receiver).into_owned()))
}

fn join(arguments: &[Value]) -> Result<Value, Error> {
    let (receiver, separator) = match arguments {
        [receiver] => (receiver, ""),
        [receiver, Value::String(separator)] => (receiver, separator.as_str()),
        _ => {
            return Err(Error::build("invalid arguments for `join`")
                .with_help("`join` expects an optional string separator"))
        }
    };
    let Value::Array(items) = receiver else {
        return Err(Error::build("invalid receiver")
            .with_help(format!("`join` requires a list, found `{receiver}`")));
    };

    let joined = items.iter().map(to_text).collect::<Vec<_>>().join(separator);

    Ok(Value::String(joined))
}

#[cfg(test)]
mod tests {
    use super::{contains, get, is_empty, join, keys, length};
    use crate::{Engine, Error};
    use serde_json::{json, Value};

    #[test]
    fn test_length() -> Result<(), Error> {
        assert_eq!(length(&[json!([1, 2, 3])])?, json!(3));
        assert_eq!(length(&[json!("héllo")])?, json!(5));
        assert!(length(&[json!(5)]).is_err());
        assert!(length(&[json!([]), json!(1)]).is_err());

        Ok(())
    }

    #[test]
    fn test_collections() -> Result<(), Error> {
        let map = json!({"a": 1, "b": 2});

        assert_eq!(keys(&[map.clone()])?, json!(["a", "b"]));
        assert_eq!(get(&[map.clone(), json!("b")])?, json!(2));
        assert_eq!(get(&[json!(["x", "y"]), json!(1)])?, json!("y"));
        assert_eq!(get(&[map.clone(), json!("z")])?, Value::Null);
        assert_eq!(contains(&[map, json!("a")])?, json!(true));
        assert_eq!(contains(&[json!([1, 2]), json!(3)])?, json!(false));
        assert_eq!(is_empty(&[json!("")])?, json!(true));
        assert_eq!(is_empty(&[Value::Null])?, json!(true));

        Ok(())
    }

    #[test]
    fn test_join() -> Result<(), Error> {
        assert_eq!(join(&[json!(["a", 1, true])])?, json!("a1true"));
        assert_eq!(join(&[json!(["a", "b"]), json!(", ")])?, json!("a, b"));
        assert!(join(&[json!("a")]).is_err());
        assert!(join(&[json!([]), json!(1)]).is_err());

        Ok(())
    }

    #[test]
    fn test_property_falls_back_to_function() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("$list.isEmpty $name.trim.toUpperCase()|")?;
        let mut context = engine
            .context()
            .with_must("list", json!([]))
            .with_must("name", " taylor ");

        assert_eq!(template.evaluate(&mut context)?, "true TAYLOR|");

        Ok(())
    }

    #[test]
    fn test_failing_function_escalates() {
        let engine = Engine::new();
        let template = engine.compile("$n.length()");
        let mut context = engine.context().with_must("n", 4);

        let error = template.and_then(|t| t.evaluate(&mut context)).unwrap_err();
        assert_eq!(error.get_reason(), "invalid receiver");
    }
}
