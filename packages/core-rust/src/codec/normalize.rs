//! Integer normalization for values decoded from text encodings.
//!
//! JSON has a single number type, so an integer that passed through a float
//! representation (`1234.0`) would otherwise reach a typed or binary encoding
//! as a float. Any float with zero fractional part that fits in an `i64` is
//! coerced to `Value::Int`, at every nesting level.

use crate::value::Value;

/// -2^63, exactly representable as `f64`.
const I64_MIN_F: f64 = -9_223_372_036_854_775_808.0;
/// 2^63, the first float above `i64::MAX`.
const I64_END_F: f64 = 9_223_372_036_854_775_808.0;

/// Returns `value` with integral floats coerced to integers. Idempotent.
#[must_use]
pub fn normalize_integers(mut value: Value) -> Value {
    normalize_integers_in_place(&mut value);
    value
}

/// In-place form of [`normalize_integers`].
pub fn normalize_integers_in_place(value: &mut Value) {
    match value {
        Value::Float(f) => {
            let f = *f;
            if f.is_finite() && f.fract() == 0.0 && (I64_MIN_F..I64_END_F).contains(&f) {
                #[allow(clippy::cast_possible_truncation)]
                let i = f as i64;
                *value = Value::Int(i);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_integers_in_place),
        Value::Map(entries) => entries.values_mut().for_each(normalize_integers_in_place),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn coerces_integral_floats_recursively() {
        let input = Value::from(serde_json::json!({
            "id": 1234.0,
            "price": 9.99,
            "nested": {"qty": 3.0, "deeper": {"n": -2.0}},
            "list": [1.0, 1.5]
        }));
        let out = normalize_integers(input);

        assert_eq!(out.get("id"), Some(&Value::Int(1234)));
        assert_eq!(out.get("price"), Some(&Value::Float(9.99)));
        assert_eq!(
            out.pointer(["nested", "qty"].iter()),
            Some(&Value::Int(3))
        );
        assert_eq!(
            out.pointer(["nested", "deeper", "n"].iter()),
            Some(&Value::Int(-2))
        );
        assert_eq!(
            out.get("list"),
            Some(&Value::Array(vec![Value::Int(1), Value::Float(1.5)]))
        );
    }

    #[test]
    fn leaves_out_of_range_and_non_finite_floats() {
        assert_eq!(normalize_integers(Value::Float(1e300)), Value::Float(1e300));
        assert!(matches!(
            normalize_integers(Value::Float(f64::INFINITY)),
            Value::Float(_)
        ));
        assert!(matches!(normalize_integers(Value::Float(f64::NAN)), Value::Float(_)));
        assert_eq!(
            normalize_integers(Value::Float(I64_MIN_F)),
            Value::Int(i64::MIN)
        );
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1.0e6f64..1.0e6).prop_map(Value::Float),
            (-1000i64..1000).prop_map(|i| Value::Float(i as f64)),
            "[a-z]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..6)
                    .prop_map(|m: BTreeMap<String, Value>| Value::Map(m)),
            ]
        })
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(v in arb_value()) {
            let once = normalize_integers(v);
            let twice = normalize_integers(once.clone());
            prop_assert_eq!(once, twice);
        }
    }
}
