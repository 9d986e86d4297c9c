use serde_json::Value;
use std::borrow::Cow;

/// Return the named property of a [`Value`].
///
/// Objects are searched by key and arrays by index. Arrays, strings and
/// objects also answer to `length` and `size`, unless an object has a key
/// of that name.
pub fn get<'value>(value: &'value Value, name: &str) -> Option<Cow<'value, Value>> {
    match value {
        Value::Object(object) => match object.get(name) {
            Some(property) => Some(Cow::Borrowed(property)),
            None => length(name, object.len()),
        },
        Value::Array(array) => match name.parse::<usize>() {
            Ok(index) => array.get(index).map(Cow::Borrowed),
            Err(_) => length(name, array.len()),
        },
        Value::String(string) => length(name, string.chars().count()),
        _ => None,
    }
}

/// Return a mutable reference to the named property of a [`Value`].
pub fn get_mut<'value>(value: &'value mut Value, name: &str) -> Option<&'value mut Value> {
    match value {
        Value::Object(object) => object.get_mut(name),
        Value::Array(array) => array.get_mut(name.parse::<usize>().ok()?),
        _ => None,
    }
}

fn length(name: &str, length: usize) -> Option<Cow<'static, Value>> {
    match name {
        "length" | "size" => Some(Cow::Owned(Value::from(length))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{get, get_mut};
    use serde_json::json;

    #[test]
    fn test_object_key() {
        let value = json!({"name": "taylor", "size": "large"});

        assert_eq!(get(&value, "name").as_deref(), Some(&json!("taylor")));
        assert_eq!(get(&value, "size").as_deref(), Some(&json!("large")));
        assert_eq!(get(&value, "length").as_deref(), Some(&json!(2)));
        assert!(get(&value, "missing").is_none());
    }

    #[test]
    fn test_array_index() {
        let value = json!(["a", "b"]);

        assert_eq!(get(&value, "1").as_deref(), Some(&json!("b")));
        assert!(get(&value, "2").is_none());
        assert_eq!(get(&value, "size").as_deref(), Some(&json!(2)));
    }

    #[test]
    fn test_string_length() {
        assert_eq!(get(&json!("héllo"), "length").as_deref(), Some(&json!(5)));
        assert!(get(&json!(5), "length").is_none());
    }

    #[test]
    fn test_get_mut() {
        let mut value = json!({"list": [1, 2]});
        if let Some(list) = get_mut(&mut value, "list") {
            if let Some(item) = get_mut(list, "0") {
                *item = json!(9);
            }
        }

        assert_eq!(value, json!({"list": [9, 2]}));
    }
}
