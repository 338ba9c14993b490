//! Canonical message construction
//!
//! Client and server sign the same string, so its shape is part of the wire
//! contract:
//!
//! - `method=<method>` when there is no payload or the payload has no content
//! - `request=<json>;method=<method>` otherwise
//!
//! `<json>` is compact JSON with object keys sorted lexicographically at
//! every level. The payload is lowered into a [`serde_json::Value`] and every
//! object is rebuilt in key order, so neither struct field declaration order
//! nor the `preserve_order` feature of `serde_json` leaks into the signature.
//! NaN and infinite floats are rejected.

use crate::error::MessageError;
use crate::finite::ensure_finite;
use crate::logging::diag;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

const METHOD_PREFIX: &str = "method=";
const REQUEST_PREFIX: &str = "request=";

/// Canonical message for calls whose payload is unknown (streams, tower layers)
pub fn method_message(method: &str) -> String {
    format!("{METHOD_PREFIX}{method}")
}

/// Build the canonical message for `method` and an optional request payload
///
/// ## Errors
///
/// Returns [`MessageError::Serialization`] when the payload cannot be
/// represented as JSON (a failing `Serialize` impl, a map with non-string
/// keys, a NaN or infinite float).
pub fn canonical_message<T>(payload: Option<&T>, method: &str) -> Result<String, MessageError>
where
    T: Serialize + ?Sized,
{
    let Some(payload) = payload else {
        diag!(method = %method, "no request, using only method name as message");
        return Ok(method_message(method));
    };

    ensure_finite(payload)?;
    let value = sort_keys(serde_json::to_value(payload)?);
    if is_empty(&value) {
        diag!(method = %method, "no fields in request, using only method name as message");
        return Ok(method_message(method));
    }

    let json = serde_json::to_string(&value)?;
    Ok(format!("{REQUEST_PREFIX}{json};{METHOD_PREFIX}{method}"))
}

/// Rebuild every object with its keys in lexicographic order
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, sort_keys(value)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde::Serializer;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Field1 {
        field1: i32,
    }

    #[derive(Serialize)]
    struct Unit;

    #[derive(Serialize)]
    struct Hidden {
        #[serde(skip)]
        _field: i32,
    }

    #[derive(Serialize)]
    struct Unordered {
        zeta: &'static str,
        alpha: u8,
        nested: Nested,
    }

    #[derive(Serialize)]
    struct Nested {
        y: bool,
        b: bool,
    }

    struct Broken;

    impl Serialize for Broken {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("unsupported type"))
        }
    }

    #[test]
    fn test_no_request() {
        let message = canonical_message::<Field1>(None, "method1").unwrap();
        assert_eq!(message, "method=method1");
    }

    #[test]
    fn test_empty_request() {
        assert_eq!(canonical_message(Some(&Unit), "method2").unwrap(), "method=method2");
        assert_eq!(
            canonical_message(Some(&Hidden { _field: 7 }), "method2").unwrap(),
            "method=method2"
        );
        assert_eq!(canonical_message(Some(&()), "method2").unwrap(), "method=method2");
        assert_eq!(
            canonical_message(Some(&Vec::<u8>::new()), "method2").unwrap(),
            "method=method2"
        );
    }

    #[test]
    fn test_request_with_fields() {
        let message = canonical_message(Some(&Field1 { field1: 1 }), "method3").unwrap();
        assert_eq!(message, r#"request={"field1":1};method=method3"#);
    }

    #[test]
    fn test_keys_sorted_regardless_of_declaration_order() {
        let payload = Unordered {
            zeta: "z",
            alpha: 1,
            nested: Nested { y: true, b: false },
        };

        let message = canonical_message(Some(&payload), "/pkg.Svc/Call").unwrap();
        assert_eq!(
            message,
            r#"request={"alpha":1,"nested":{"b":false,"y":true},"zeta":"z"};method=/pkg.Svc/Call"#
        );
    }

    #[test]
    fn test_hash_map_is_deterministic() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("c", 3), ("a", 1), ("b", 2)] {
            first.insert(k, v);
        }
        for (k, v) in [("b", 2), ("c", 3), ("a", 1)] {
            second.insert(k, v);
        }

        let a = canonical_message(Some(&first), "m").unwrap();
        let b = canonical_message(Some(&second), "m").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"request={"a":1,"b":2,"c":3};method=m"#);
    }

    #[test]
    fn test_scalar_payload_is_signed() {
        assert_eq!(
            canonical_message(Some(&0u8), "m").unwrap(),
            "request=0;method=m"
        );
    }

    #[test]
    fn test_sort_keys_ignores_insertion_order() {
        let mut inner = serde_json::Map::new();
        inner.insert("y".to_string(), Value::Bool(true));
        inner.insert("b".to_string(), Value::Bool(false));

        let mut outer = serde_json::Map::new();
        outer.insert("zeta".to_string(), Value::from("z"));
        outer.insert("nested".to_string(), Value::Object(inner));
        outer.insert("alpha".to_string(), Value::from(1));

        let sorted = sort_keys(Value::Array(vec![Value::Object(outer)]));
        assert_eq!(
            serde_json::to_string(&sorted).unwrap(),
            r#"[{"alpha":1,"nested":{"b":false,"y":true},"zeta":"z"}]"#
        );
    }

    #[derive(Serialize)]
    struct Measurement {
        x: Option<f64>,
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        for x in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = canonical_message(Some(&Measurement { x: Some(x) }), "m");
            assert!(matches!(result, Err(MessageError::Serialization(_))));
        }

        assert_eq!(
            canonical_message(Some(&Measurement { x: None }), "m").unwrap(),
            r#"request={"x":null};method=m"#
        );
        assert_eq!(
            canonical_message(Some(&Measurement { x: Some(1.5) }), "m").unwrap(),
            r#"request={"x":1.5};method=m"#
        );
    }

    #[test]
    fn test_serialization_error() {
        let result = canonical_message(Some(&Broken), "method4");
        assert!(matches!(result, Err(MessageError::Serialization(_))));

        let mut map = HashMap::new();
        map.insert((1, 2), "tuple keys are not JSON");
        let result = canonical_message(Some(&map), "method4");
        assert!(matches!(result, Err(MessageError::Serialization(_))));
    }
}
