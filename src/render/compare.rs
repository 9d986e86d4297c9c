use crate::{
    compile::{Operator, Unary},
    log::{Error, INCOMPATIBLE_TYPES},
};
use serde_json::Value;
use std::{cmp::Ordering, fmt::Display};

/// Return true if the given [`Value`] is truthy.
///
/// Null, false and numeric zero are false. Everything else is true,
/// including empty strings and empty lists.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(boolean) => *boolean,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(_) | Value::Array(_) | Value::Object(_) => true,
    }
}

/// Apply the [`Operator`] to two [`Value`] instances.
///
/// # Errors
///
/// Returns an [`Error`] when the operands have types the `Operator` cannot be
/// applied to, on division by zero and on integer overflow.
pub fn apply(operator: Operator, left: &Value, right: &Value) -> Result<Value, Error> {
    let result = match operator {
        Operator::And => Value::Bool(is_truthy(left) && is_truthy(right)),
        Operator::Or => Value::Bool(is_truthy(left) || is_truthy(right)),
        Operator::Equal => Value::Bool(equals(left, right)),
        Operator::NotEqual => Value::Bool(!equals(left, right)),
        Operator::Greater => Value::Bool(order(operator, left, right)?.is_gt()),
        Operator::Lesser => Value::Bool(order(operator, left, right)?.is_lt()),
        Operator::GreaterOrEqual => Value::Bool(order(operator, left, right)?.is_ge()),
        Operator::LesserOrEqual => Value::Bool(order(operator, left, right)?.is_le()),
        Operator::Add | Operator::Subtract | Operator::Multiply | Operator::Divide => {
            let left = integer(left, operator)?;
            let right = integer(right, operator)?;
            let result = match operator {
                Operator::Add => left.checked_add(right),
                Operator::Subtract => left.checked_sub(right),
                Operator::Multiply => left.checked_mul(right),
                _ => {
                    if right == 0 {
                        return Err(Error::build("division by zero")
                            .with_help(format!("`{left} / {right}` has no integer result")));
                    }
                    left.checked_div(right)
                }
            };

            result.map(Value::from).ok_or_else(|| {
                Error::build("integer overflow")
                    .with_help(format!("`{left} {operator} {right}` does not fit in 64 bits"))
            })?
        }
    };

    Ok(result)
}

/// Apply the [`Unary`] operator to a [`Value`].
///
/// # Errors
///
/// Returns an [`Error`] when negating something other than an integer.
pub fn apply_unary(unary: Unary, value: &Value) -> Result<Value, Error> {
    match unary {
        Unary::Not => Ok(Value::Bool(!is_truthy(value))),
        Unary::Negate => integer(value, unary)?
            .checked_neg()
            .map(Value::from)
            .ok_or_else(|| Error::build("integer overflow")),
    }
}

/// Return the [`Value`] as an integer.
///
/// # Errors
///
/// Returns an [`Error`] naming `operation` when the `Value` is not an
/// integer.
pub fn integer(value: &Value, operation: impl Display) -> Result<i64, Error> {
    value.as_i64().ok_or_else(|| {
        Error::build(INCOMPATIBLE_TYPES).with_help(format!(
            "`{operation}` requires integers, found `{value}`"
        ))
    })
}

/// Return true if the two [`Value`] instances are equal.
///
/// Null is only equal to null. A string compared to a number is compared
/// by its text.
fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => l == r,
            _ => l.as_f64() == r.as_f64(),
        },
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            *s == n.to_string()
        }
        (left, right) => left == right,
    }
}

fn order(operator: Operator, left: &Value, right: &Value) -> Result<Ordering, Error> {
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => l.as_f64().zip(r.as_f64()).and_then(|(l, r)| l.partial_cmp(&r)),
        },
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    };

    ordering.ok_or_else(|| {
        Error::build(INCOMPATIBLE_TYPES).with_help(format!(
            "`{left}` and `{right}` cannot be compared with `{operator}`"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::{apply, apply_unary, is_truthy};
    use crate::{
        compile::{Operator, Unary},
        Engine, Error,
    };
    use serde_json::{json, Value};

    #[test]
    fn test_truthy() {
        for value in [json!("lorem"), json!(""), json!(-12), json!(true), json!([]), json!({})] {
            assert!(is_truthy(&value), "{value} should be truthy");
        }
        for value in [json!(null), json!(0), json!(0.0), json!(false)] {
            assert!(!is_truthy(&value), "{value} should not be truthy");
        }
    }

    #[test]
    fn test_truthy_in_template() -> Result<(), Error> {
        let engine = Engine::new();
        let template = engine.compile("#if ($value) {a} #else {b}")?;

        for (value, expect) in [(json!(1), "a"), (json!(""), "a"), (json!(0), "b"), (json!(null), "b")] {
            let mut context = engine.context().with_must("value", value);
            assert_eq!(template.evaluate(&mut context)?, expect);
        }

        Ok(())
    }

    #[test]
    fn test_arithmetic() -> Result<(), Error> {
        assert_eq!(apply(Operator::Add, &json!(2), &json!(3))?, json!(5));
        assert_eq!(apply(Operator::Subtract, &json!(2), &json!(3))?, json!(-1));
        assert_eq!(apply(Operator::Multiply, &json!(4), &json!(3))?, json!(12));
        assert_eq!(apply(Operator::Divide, &json!(7), &json!(2))?, json!(3));

        assert!(apply(Operator::Divide, &json!(7), &json!(0)).is_err());
        assert!(apply(Operator::Add, &json!(i64::MAX), &json!(1)).is_err());
        assert!(apply(Operator::Add, &json!("a"), &json!(1)).is_err());

        Ok(())
    }

    #[test]
    fn test_equality() -> Result<(), Error> {
        let cases = [
            (json!(null), json!(null), true),
            (json!(null), json!(0), false),
            (json!(1), json!(1.0), true),
            (json!("10"), json!(10), true),
            (json!(["one"]), json!(["one"]), true),
            (json!("a"), json!("b"), false),
        ];
        for (left, right, expect) in cases {
            assert_eq!(apply(Operator::Equal, &left, &right)?, Value::Bool(expect));
            assert_eq!(apply(Operator::NotEqual, &left, &right)?, Value::Bool(!expect));
        }

        Ok(())
    }

    #[test]
    fn test_ordering() -> Result<(), Error> {
        assert_eq!(apply(Operator::Greater, &json!(100), &json!(50))?, json!(true));
        assert_eq!(apply(Operator::Lesser, &json!("a"), &json!("b"))?, json!(true));
        assert_eq!(apply(Operator::GreaterOrEqual, &json!(1), &json!(1))?, json!(true));
        assert_eq!(apply(Operator::LesserOrEqual, &json!(2), &json!(1))?, json!(false));

        let error = apply(Operator::Greater, &json!("hello"), &json!(true)).unwrap_err();
        assert_eq!(error.get_reason(), "incompatible types");

        Ok(())
    }

    #[test]
    fn test_logic() -> Result<(), Error> {
        assert_eq!(apply(Operator::And, &json!(1), &json!("x"))?, json!(true));
        assert_eq!(apply(Operator::Or, &json!(0), &json!(null))?, json!(false));
        assert_eq!(apply_unary(Unary::Not, &json!(null))?, json!(true));
        assert_eq!(apply_unary(Unary::Negate, &json!(4))?, json!(-4));
        assert!(apply_unary(Unary::Negate, &json!("4")).is_err());

        Ok(())
    }
}
