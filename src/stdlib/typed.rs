// ABOUTME: String-to-typed-dict constructors exposed as the std/typed module

use crate::env::Environment;
use crate::error::EvalError;
use crate::typed_dict;
use crate::value::{BuiltinFn, Dictionary, Value};
use std::rc::Rc;

fn require_string<'a>(name: &str, args: &'a [Value]) -> Result<&'a str, EvalError> {
    match args.first() {
        Some(Value::String(s)) => Ok(s.as_ref()),
        Some(other) => Err(EvalError::type_error(name, "string", other)),
        None => Err(EvalError::arity_exact(name, 1, 0)),
    }
}

fn typed_path(args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let s = require_string("path", args)?;
    Ok(Value::Dictionary(Rc::new(typed_dict::parse_path(s, env))))
}

fn typed_url(args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let s = require_string("url", args)?;
    Ok(Value::Dictionary(Rc::new(typed_dict::parse_url(s, env)?)))
}

fn typed_regex(args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let s = require_string("regex", args)?;
    Ok(Value::Dictionary(Rc::new(typed_dict::parse_regex(s, env)?)))
}

fn typed_datetime(args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let s = require_string("datetime", args)?;
    Ok(Value::Dictionary(Rc::new(typed_dict::parse_datetime(s, env)?)))
}

fn typed_duration(args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let s = require_string("duration", args)?;
    Ok(Value::Dictionary(Rc::new(typed_dict::parse_duration(s, env)?)))
}

pub fn module(env: &Rc<Environment>) -> Dictionary {
    Dictionary::from_values(
        vec![
            ("path".to_string(), Value::BuiltIn(BuiltinFn::EnvAware(typed_path))),
            ("url".to_string(), Value::BuiltIn(BuiltinFn::EnvAware(typed_url))),
            ("regex".to_string(), Value::BuiltIn(BuiltinFn::EnvAware(typed_regex))),
            ("datetime".to_string(), Value::BuiltIn(BuiltinFn::EnvAware(typed_datetime))),
            ("duration".to_string(), Value::BuiltIn(BuiltinFn::EnvAware(typed_duration))),
        ],
        env.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_constructor_parses_a_string_into_a_path_dict() {
        let env = Environment::new();
        let v = typed_path(&[Value::str("/a/b.txt")], &env).unwrap();
        match v {
            Value::Dictionary(d) => assert!(typed_dict::is_path_dict(&d)),
            _ => panic!("expected dictionary"),
        }
    }

    #[test]
    fn regex_constructor_rejects_non_string_argument() {
        let env = Environment::new();
        assert!(typed_regex(&[Value::Integer(1)], &env).is_err());
    }

    #[test]
    fn duration_constructor_round_trips_with_to_string() {
        let env = Environment::new();
        let v = typed_duration(&[Value::str("1mo 3d 02:00:05")], &env).unwrap();
        match v {
            Value::Dictionary(d) => assert_eq!(typed_dict::duration_to_string(&d), "1mo 3d 02:00:05"),
            _ => panic!("expected dictionary"),
        }
    }
}
