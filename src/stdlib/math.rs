// ABOUTME: Scalar math builtins exposed as the std/math module

use crate::env::Environment;
use crate::error::EvalError;
use crate::value::{BuiltinFn, Dictionary, Value};
use std::rc::Rc;

fn as_f64(v: &Value, function: &str) -> Result<f64, EvalError> {
    match v {
        Value::Integer(n) => Ok(*n as f64),
        Value::Float(n) => Ok(*n),
        other => Err(EvalError::type_error(function, "integer or float", other)),
    }
}

fn require_arity(name: &str, args: &[Value], n: usize) -> Result<(), EvalError> {
    if args.len() != n {
        return Err(EvalError::arity_exact(name, n, args.len()));
    }
    Ok(())
}

fn math_abs(args: &[Value]) -> Result<Value, EvalError> {
    require_arity("abs", args, 1)?;
    match &args[0] {
        Value::Integer(n) => n.checked_abs().map(Value::Integer).ok_or_else(|| EvalError::overflow("abs")),
        Value::Float(n) => Ok(Value::Float(n.abs())),
        other => Err(EvalError::type_error("abs", "integer or float", other)),
    }
}

fn math_floor(args: &[Value]) -> Result<Value, EvalError> {
    require_arity("floor", args, 1)?;
    Ok(Value::Integer(as_f64(&args[0], "floor")?.floor() as i64))
}

fn math_ceil(args: &[Value]) -> Result<Value, EvalError> {
    require_arity("ceil", args, 1)?;
    Ok(Value::Integer(as_f64(&args[0], "ceil")?.ceil() as i64))
}

fn math_round(args: &[Value]) -> Result<Value, EvalError> {
    require_arity("round", args, 1)?;
    Ok(Value::Integer(as_f64(&args[0], "round")?.round() as i64))
}

fn math_sqrt(args: &[Value]) -> Result<Value, EvalError> {
    require_arity("sqrt", args, 1)?;
    let n = as_f64(&args[0], "sqrt")?;
    if n < 0.0 {
        return Err(EvalError::validation_error("sqrt: argument must be non-negative"));
    }
    Ok(Value::Float(n.sqrt()))
}

fn math_pow(args: &[Value]) -> Result<Value, EvalError> {
    require_arity("pow", args, 2)?;
    let base = as_f64(&args[0], "pow")?;
    let exp = as_f64(&args[1], "pow")?;
    Ok(Value::Float(base.powf(exp)))
}

fn math_min(args: &[Value]) -> Result<Value, EvalError> {
    reduce_extreme(args, "min", f64::min)
}

fn math_max(args: &[Value]) -> Result<Value, EvalError> {
    reduce_extreme(args, "max", f64::max)
}

fn reduce_extreme(args: &[Value], name: &str, pick: fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    if args.is_empty() {
        return Err(EvalError::arity_min(name, 1, 0));
    }
    let all_int = args.iter().all(|v| matches!(v, Value::Integer(_)));
    let mut acc = as_f64(&args[0], name)?;
    for v in &args[1..] {
        acc = pick(acc, as_f64(v, name)?);
    }
    if all_int {
        Ok(Value::Integer(acc as i64))
    } else {
        Ok(Value::Float(acc))
    }
}

fn math_clamp(args: &[Value]) -> Result<Value, EvalError> {
    require_arity("clamp", args, 3)?;
    let v = as_f64(&args[0], "clamp")?;
    let lo = as_f64(&args[1], "clamp")?;
    let hi = as_f64(&args[2], "clamp")?;
    let clamped = v.clamp(lo, hi);
    if matches!(&args[0], Value::Integer(_)) && matches!(&args[1], Value::Integer(_)) && matches!(&args[2], Value::Integer(_)) {
        Ok(Value::Integer(clamped as i64))
    } else {
        Ok(Value::Float(clamped))
    }
}

pub fn module(env: &Rc<Environment>) -> Dictionary {
    Dictionary::from_values(
        vec![
            ("abs".to_string(), Value::BuiltIn(BuiltinFn::Plain(math_abs))),
            ("floor".to_string(), Value::BuiltIn(BuiltinFn::Plain(math_floor))),
            ("ceil".to_string(), Value::BuiltIn(BuiltinFn::Plain(math_ceil))),
            ("round".to_string(), Value::BuiltIn(BuiltinFn::Plain(math_round))),
            ("sqrt".to_string(), Value::BuiltIn(BuiltinFn::Plain(math_sqrt))),
            ("pow".to_string(), Value::BuiltIn(BuiltinFn::Plain(math_pow))),
            ("min".to_string(), Value::BuiltIn(BuiltinFn::Plain(math_min))),
            ("max".to_string(), Value::BuiltIn(BuiltinFn::Plain(math_max))),
            ("clamp".to_string(), Value::BuiltIn(BuiltinFn::Plain(math_clamp))),
        ],
        env.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_preserves_integer_type() {
        assert!(math_abs(&[Value::Integer(-5)]).unwrap().equals(&Value::Integer(5)));
    }

    #[test]
    fn min_max_stay_integer_when_all_inputs_are() {
        let v = math_min(&[Value::Integer(3), Value::Integer(1), Value::Integer(2)]).unwrap();
        assert!(v.equals(&Value::Integer(1)));
    }

    #[test]
    fn sqrt_rejects_negative_input() {
        assert!(math_sqrt(&[Value::Integer(-1)]).is_err());
    }

    #[test]
    fn clamp_bounds_value_into_range() {
        let v = math_clamp(&[Value::Integer(15), Value::Integer(0), Value::Integer(10)]).unwrap();
        assert!(v.equals(&Value::Integer(10)));
    }
}
