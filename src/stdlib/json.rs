// ABOUTME: JSON codec used by the read/write format table and the json stdlib module

use crate::env::Environment;
use crate::error::EvalError;
use crate::value::{Dictionary, Value};
use std::rc::Rc;

pub fn value_to_json(value: &Value) -> Result<serde_json::Value, EvalError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Integer(n) => Ok(serde_json::Value::Number((*n).into())),
        Value::Float(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .ok_or_else(|| EvalError::format_error("json", "cannot encode NaN or infinite float")),
        Value::String(s) => Ok(serde_json::Value::String(s.to_string())),
        Value::Array(items) => {
            let out: Result<Vec<_>, _> = items.borrow().iter().map(value_to_json).collect();
            Ok(serde_json::Value::Array(out?))
        }
        Value::Dictionary(d) => {
            let mut map = serde_json::Map::new();
            for key in d.keys() {
                let v = d.get(&key)?;
                map.insert(key, value_to_json(&v)?);
            }
            Ok(serde_json::Value::Object(map))
        }
        other => Err(EvalError::type_error("json encode", "value representable as JSON", other)),
    }
}

pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::str(s.clone()),
        serde_json::Value::Array(arr) => Value::array(arr.iter().map(json_to_value).collect()),
        serde_json::Value::Object(obj) => {
            let env = Environment::new();
            let pairs: Vec<(String, Value)> = obj.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect();
            Value::Dictionary(Rc::new(Dictionary::from_values(pairs, env)))
        }
    }
}

fn json_encode(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_exact("json.encode", 1, args.len()));
    }
    let json = value_to_json(&args[0])?;
    let s = serde_json::to_string(&json).map_err(|e| EvalError::format_error("json", &e.to_string()))?;
    Ok(Value::str(s))
}

fn json_pretty(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_exact("json.pretty", 1, args.len()));
    }
    let json = value_to_json(&args[0])?;
    let s = serde_json::to_string_pretty(&json).map_err(|e| EvalError::format_error("json", &e.to_string()))?;
    Ok(Value::str(s))
}

fn json_decode(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_exact("json.decode", 1, args.len()));
    }
    let text = match &args[0] {
        Value::String(s) => s.as_ref(),
        other => return Err(EvalError::type_error_nth("json.decode", 1, "string", other)),
    };
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| EvalError::format_error("json", &e.to_string()))?;
    Ok(json_to_value(&json))
}

/// Builds the `std/json` module export dictionary: `encode`, `decode`, `pretty`.
pub fn module(env: &Rc<Environment>) -> Dictionary {
    Dictionary::from_values(
        vec![
            ("encode".to_string(), Value::BuiltIn(crate::value::BuiltinFn::Plain(json_encode))),
            ("decode".to_string(), Value::BuiltIn(crate::value::BuiltinFn::Plain(json_decode))),
            ("pretty".to_string(), Value::BuiltIn(crate::value::BuiltinFn::Plain(json_pretty))),
        ],
        env.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_structures() {
        let env = Environment::new();
        let v = Value::Dictionary(Rc::new(Dictionary::from_values(
            vec![
                ("name".to_string(), Value::str("Ada")),
                ("tags".to_string(), Value::array(vec![Value::Integer(1), Value::Integer(2)])),
            ],
            env,
        )));
        let json = value_to_json(&v).unwrap();
        let back = json_to_value(&json);
        assert!(v.equals(&back));
    }

    #[test]
    fn decode_rejects_non_string_argument() {
        let err = json_decode(&[Value::Integer(1)]).unwrap_err();
        assert_eq!(err.code(), "TYPE-0002");
    }
}
