// ABOUTME: The recursive AST-walking evaluator: name resolution, dispatch, control flow, I/O operators

use crate::ast::{self, AssignTarget, BinaryOp, Pattern, UnaryOp};
use crate::env::Environment;
use crate::error::EvalError;
use crate::registry;
use crate::sandbox;
use crate::typed_dict;
use crate::value::{Dictionary, Field, FunctionValue, Signal, SignalKind, Value};
use std::rc::Rc;

/// Evaluates a whole program. A top-level `Return`/`Stop`/`Skip` signal that
/// escapes every frame is treated the same as a function boundary: `Return`
/// unwraps its value, `Stop`/`Skip` become loop-leak errors.
pub fn eval_program(stmts: &[ast::SStmt], env: &Rc<Environment>) -> Value {
    match eval_block(stmts, env) {
        Ok(Value::Signal(Signal { kind: SignalKind::Return, value })) => {
            value.map(|b| *b).unwrap_or(Value::Null)
        }
        Ok(Value::Signal(Signal { kind: SignalKind::Stop, .. })) => {
            EvalError::stop_outside_loop().into_value()
        }
        Ok(Value::Signal(Signal { kind: SignalKind::Skip, .. })) => {
            EvalError::skip_outside_loop().into_value()
        }
        Ok(v) => v,
        Err(e) => e.into_value(),
    }
}

/// Evaluates a statement list. The result is the concatenation of non-null
/// statement values (supporting template-style blocks); a `Signal` produced
/// by any statement stops the block immediately and is returned as-is.
pub fn eval_block(stmts: &[ast::SStmt], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let mut parts: Vec<Value> = Vec::new();
    for stmt in stmts {
        let v = eval_stmt(stmt, env)?;
        if matches!(v, Value::Signal(_)) {
            return Ok(v);
        }
        if !v.is_null() {
            parts.push(v);
        }
    }
    match parts.len() {
        0 => Ok(Value::Null),
        1 => Ok(parts.remove(0)),
        _ => Ok(Value::str(
            parts.iter().map(typed_dict::to_template_string).collect::<Vec<_>>().join(""),
        )),
    }
}

fn eval_stmt(stmt: &ast::SStmt, env: &Rc<Environment>) -> Result<Value, EvalError> {
    eval_stmt_inner(&stmt.node, env).map_err(|e| e.with_pos(stmt.pos.clone()))
}

fn eval_stmt_inner(stmt: &ast::Stmt, env: &Rc<Environment>) -> Result<Value, EvalError> {
    match stmt {
        ast::Stmt::Expr(expr) => eval_expr(expr, env),
        ast::Stmt::Let { pattern, value, exported } => {
            let v = eval_expr(value, env)?;
            bind_pattern(pattern, v, env, *exported)?;
            Ok(Value::Null)
        }
        ast::Stmt::Assign { target, value } => {
            let v = eval_expr(value, env)?;
            assign_to_target(target, v, env)?;
            Ok(Value::Null)
        }
        ast::Stmt::Return(expr) => {
            let v = match expr {
                Some(e) => eval_expr(e, env)?,
                None => Value::Null,
            };
            Ok(Value::Signal(Signal { kind: SignalKind::Return, value: Some(Box::new(v)) }))
        }
        ast::Stmt::Stop => Ok(Value::Signal(Signal { kind: SignalKind::Stop, value: None })),
        ast::Stmt::Skip => Ok(Value::Signal(Signal { kind: SignalKind::Skip, value: None })),
        ast::Stmt::Write { value, target, append, network } => {
            eval_write(value, target, *append, *network, env)
        }
    }
}

// ===== Name resolution, destructuring, assignment (§4.1.1 / §4.1.2) =====

fn bind_pattern(pattern: &Pattern, value: Value, env: &Rc<Environment>, exported: bool) -> Result<(), EvalError> {
    match pattern {
        Pattern::Discard => Ok(()),
        Pattern::Name(name) => {
            if name == "_" {
                return Ok(());
            }
            env.set_let(name.clone(), value, exported)
        }
        Pattern::Array { elements, rest } => {
            let items: Vec<Value> = match value {
                Value::Array(a) => a.borrow().clone(),
                other => vec![other],
            };
            for (i, el) in elements.iter().enumerate() {
                let v = items.get(i).cloned().unwrap_or(Value::Null);
                bind_pattern(el, v, env, exported)?;
            }
            if let Some(rest_name) = rest {
                let remainder: Vec<Value> = items.into_iter().skip(elements.len()).collect();
                env.set_let(rest_name.clone(), Value::array(remainder), exported)?;
            }
            Ok(())
        }
        Pattern::Dict { fields, rest } => {
            let dict = match &value {
                Value::Dictionary(d) => d.clone(),
                other => return Err(EvalError::destructure_not_dict(other)),
            };
            let mut consumed: Vec<String> = Vec::new();
            for field in fields {
                let v = dict.get(&field.key)?;
                consumed.push(field.key.clone());
                match &field.nested {
                    Some(nested) => bind_pattern(nested, v, env, exported)?,
                    None => {
                        let name = field.alias.clone().unwrap_or_else(|| field.key.clone());
                        env.set_let(name, v, exported)?;
                    }
                }
            }
            if let Some(rest_name) = rest {
                let mut remaining: Vec<(String, Value)> = Vec::new();
                for key in dict.keys() {
                    if consumed.contains(&key) {
                        continue;
                    }
                    let v = dict.get(&key)?;
                    remaining.push((key, v));
                }
                let rest_dict = Dictionary::from_values(remaining, env.clone());
                env.set_let(rest_name.clone(), Value::Dictionary(Rc::new(rest_dict)), exported)?;
            }
            Ok(())
        }
    }
}

fn assign_to_target(target: &AssignTarget, value: Value, env: &Rc<Environment>) -> Result<(), EvalError> {
    match target {
        AssignTarget::Name(name) => env.update(name, value),
        AssignTarget::Index { receiver, index } => {
            let recv = eval_expr(receiver, env)?;
            let idx = eval_expr(index, env)?;
            match (&recv, &idx) {
                (Value::Array(items), Value::Integer(i)) => {
                    let mut b = items.borrow_mut();
                    let len = b.len() as i64;
                    let pos = if *i < 0 { len + i } else { *i };
                    if pos < 0 || pos >= len {
                        return Err(EvalError::validation_error(format!("index {i} out of bounds")));
                    }
                    b[pos as usize] = value;
                    Ok(())
                }
                (Value::Dictionary(d), Value::String(k)) => {
                    d.set(k, value);
                    Ok(())
                }
                (other, _) => Err(EvalError::type_error("index assignment", "array or dictionary", other)),
            }
        }
        AssignTarget::Property { receiver, name } => {
            let recv = eval_expr(receiver, env)?;
            match &recv {
                Value::Dictionary(d) => {
                    d.set(name, value);
                    Ok(())
                }
                other => Err(EvalError::type_error("property assignment", "dictionary", other)),
            }
        }
    }
}

// ===== Expression evaluation =====

pub fn eval_expr(expr: &ast::Expr, env: &Rc<Environment>) -> Result<Value, EvalError> {
    match expr {
        ast::Expr::Null => Ok(Value::Null),
        ast::Expr::Bool(b) => Ok(Value::Boolean(*b)),
        ast::Expr::Int(n) => Ok(Value::Integer(*n)),
        ast::Expr::Float(n) => Ok(Value::Float(*n)),
        ast::Expr::Str(s) => Ok(Value::str(s.clone())),
        ast::Expr::TemplateStr(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    ast::TemplatePart::Literal(s) => out.push_str(s),
                    ast::TemplatePart::Expr(e) => {
                        let v = eval_expr(e, env)?;
                        if v.is_error() {
                            return Ok(v);
                        }
                        out.push_str(&typed_dict::to_template_string(&v));
                    }
                }
            }
            Ok(Value::str(out))
        }
        ast::Expr::Ident(name) => {
            let (v, found) = env.get(name);
            if found {
                Ok(v)
            } else {
                Err(EvalError::undefined_name(name))
            }
        }
        ast::Expr::ArrayLit(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let v = eval_expr(item, env)?;
                if v.is_error() {
                    return Ok(v);
                }
                values.push(v);
            }
            Ok(Value::array(values))
        }
        ast::Expr::DictLit(pairs, _key_order) => {
            let mut fields = crate::value::OrderedFields::new();
            for (k, v) in pairs {
                fields.insert(k.clone(), Field::Thunk(Rc::new(v.clone()), env.clone()));
            }
            Ok(Value::Dictionary(Rc::new(Dictionary {
                fields: std::cell::RefCell::new(fields),
                env: env.clone(),
            })))
        }
        ast::Expr::FunctionLit { params, body } => Ok(Value::Function(Rc::new(FunctionValue {
            name: None,
            params: params.clone(),
            body: body.clone(),
            env: env.clone(),
        }))),
        ast::Expr::Call { callee, args } => {
            let callee_val = eval_expr(callee, env)?;
            if callee_val.is_error() {
                return Ok(callee_val);
            }
            let mut arg_vals = Vec::with_capacity(args.len());
            for a in args {
                let v = eval_expr(a, env)?;
                if v.is_error() {
                    return Ok(v);
                }
                arg_vals.push(v);
            }
            apply_function(callee_val, arg_vals, None, env)
        }
        ast::Expr::MethodCall { receiver, name, args } => {
            let recv = eval_expr(receiver, env)?;
            if recv.is_error() {
                return Ok(recv);
            }
            let mut arg_vals = Vec::with_capacity(args.len());
            for a in args {
                let v = eval_expr(a, env)?;
                if v.is_error() {
                    return Ok(v);
                }
                arg_vals.push(v);
            }
            dispatch_member(&recv, name, Some(&arg_vals), env)
        }
        ast::Expr::PropertyAccess { receiver, name } => {
            let recv = eval_expr(receiver, env)?;
            if recv.is_error() {
                return Ok(recv);
            }
            dispatch_member(&recv, name, None, env)
        }
        ast::Expr::Index { receiver, index } => {
            let recv = eval_expr(receiver, env)?;
            if recv.is_error() {
                return Ok(recv);
            }
            let idx = eval_expr(index, env)?;
            if idx.is_error() {
                return Ok(idx);
            }
            index_value(&recv, &idx)
        }
        ast::Expr::Unary { op, expr } => {
            let v = eval_expr(expr, env)?;
            eval_unary(*op, v)
        }
        ast::Expr::Binary { op, left, right } => eval_binary(*op, left, right, env),
        ast::Expr::Is { expr, schema, negate } => {
            let v = eval_expr(expr, env)?;
            if v.is_error() {
                return Ok(v);
            }
            let schema_v = eval_expr(schema, env)?;
            let schema_name = match &schema_v {
                Value::String(s) => s.to_string(),
                other => typed_dict::to_template_string(other),
            };
            let matches = match &v {
                Value::Record(r) => r.schema == schema_name,
                Value::Table(t) => t.schema.as_deref() == Some(schema_name.as_str()),
                _ => false,
            };
            Ok(Value::Boolean(matches != *negate))
        }
        ast::Expr::If { cond, then_branch, else_branch } => {
            let c = eval_expr(cond, env)?;
            if c.is_error() {
                return Ok(c);
            }
            if c.is_truthy() {
                let child = Environment::with_parent(env.clone());
                eval_block(then_branch, &child)
            } else if let Some(else_stmts) = else_branch {
                let child = Environment::with_parent(env.clone());
                eval_block(else_stmts, &child)
            } else {
                Ok(Value::Null)
            }
        }
        ast::Expr::ForIn { pattern, iterable, body } => eval_for_in(pattern, iterable, body, env),
        ast::Expr::Check(inner) => match eval_expr(inner, env) {
            Ok(v) if v.is_error() => {
                Ok(Value::Signal(Signal { kind: SignalKind::Return, value: Some(Box::new(v)) }))
            }
            Ok(v) => Ok(v),
            Err(e) => Ok(Value::Signal(Signal {
                kind: SignalKind::Return,
                value: Some(Box::new(e.into_value())),
            })),
        },
        ast::Expr::Import(path_expr) => {
            let path_v = eval_expr(path_expr, env)?;
            if path_v.is_error() {
                return Ok(path_v);
            }
            let path_str = match &path_v {
                Value::String(s) => s.to_string(),
                other => return Err(EvalError::type_error("import", "string", other)),
            };
            crate::modules::import(&path_str, env)
        }
        ast::Expr::ReadExpr { pattern, source, format_hint } => {
            eval_read(pattern.as_ref(), source, format_hint.as_deref(), env)
        }
        ast::Expr::Range { start, end, inclusive } => {
            let s = eval_expr(start, env)?;
            let e = eval_expr(end, env)?;
            match (s, e) {
                (Value::Integer(a), Value::Integer(b)) => {
                    let upper = if *inclusive { b + 1 } else { b };
                    Ok(Value::array((a..upper).map(Value::Integer).collect()))
                }
                (other, _) => Err(EvalError::type_error("range", "integer", &other)),
            }
        }
    }
}

fn index_value(recv: &Value, idx: &Value) -> Result<Value, EvalError> {
    match (recv, idx) {
        (Value::Array(items), Value::Integer(i)) => {
            let b = items.borrow();
            let len = b.len() as i64;
            let pos = if *i < 0 { len + i } else { *i };
            if pos < 0 || pos >= len {
                return Ok(Value::Null);
            }
            Ok(b[pos as usize].clone())
        }
        (Value::Dictionary(d), Value::String(k)) => d.get(k),
        (Value::String(s), Value::Integer(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let pos = if *i < 0 { len + i } else { *i };
            if pos < 0 || pos >= len {
                return Ok(Value::Null);
            }
            Ok(Value::str(chars[pos as usize].to_string()))
        }
        (other, _) => Err(EvalError::type_error("index", "array, dictionary, or string", other)),
    }
}

// ===== Function application (§4.1.3) =====

pub fn apply_function(
    callee: Value,
    args: Vec<Value>,
    this: Option<Value>,
    caller_env: &Rc<Environment>,
) -> Result<Value, EvalError> {
    match callee {
        Value::Function(func) => {
            let call_env = Environment::with_parent(func.env.clone());
            {
                let ctx = caller_env.context.borrow().clone();
                *call_env.context.borrow_mut() = ctx;
            }
            if let Some(t) = this {
                call_env.define("this", t);
            }
            for (i, param) in func.params.iter().enumerate() {
                let v = args.get(i).cloned().unwrap_or(Value::Null);
                bind_pattern(param, v, &call_env, false)?;
            }
            let result = eval_block(&func.body, &call_env)?;
            match result {
                Value::Signal(Signal { kind: SignalKind::Return, value }) => {
                    Ok(value.map(|b| *b).unwrap_or(Value::Null))
                }
                Value::Signal(Signal { kind: SignalKind::Stop, .. }) => Err(EvalError::stop_outside_loop()),
                Value::Signal(Signal { kind: SignalKind::Skip, .. }) => Err(EvalError::skip_outside_loop()),
                other => Ok(other),
            }
        }
        Value::BuiltIn(crate::value::BuiltinFn::Plain(f)) => f(&args),
        Value::BuiltIn(crate::value::BuiltinFn::EnvAware(f)) => f(&args, caller_env),
        Value::Null => Err(EvalError::null_call()),
        other => Err(EvalError::not_callable(&other)),
    }
}

// ===== Method and property dispatch (§4.1.4) =====

fn dispatch_member(
    receiver: &Value,
    name: &str,
    args: Option<&[Value]>,
    env: &Rc<Environment>,
) -> Result<Value, EvalError> {
    let type_name = receiver.type_name();

    if let Some(reg) = registry::registry_for(type_name) {
        if let Some(entry) = reg.get(name) {
            return match args {
                Some(args) => {
                    registry::check_arity(name, entry.arity, args.len())?;
                    (entry.func)(receiver, args, env)
                }
                None => Err(EvalError::method_as_property(type_name, name)),
            };
        }
    }

    if let Value::Dictionary(d) = receiver {
        if name == "parent" && args.is_none() {
            let tag = d.type_tag();
            match tag.as_deref() {
                Some("path") => return Ok(typed_dict::path_parent(d, env)),
                Some("file") | Some("dir") => return Ok(typed_dict::file_parent(d, env)),
                _ => {}
            }
        }
        if args.is_none() {
            if let Some(v) = typed_dict::computed_property(d, name) {
                return Ok(v);
            }
            if d.has(name) {
                return d.get(name);
            }
        } else if d.has(name) {
            let field = d.get(name)?;
            if matches!(field, Value::Function(_) | Value::BuiltIn(_)) {
                return apply_function(field, args.unwrap().to_vec(), Some(receiver.clone()), env);
            }
        }
    }

    if let Some(v) = legacy_property(receiver, name)? {
        if args.is_some() {
            return Err(EvalError::method_as_property(type_name, name));
        }
        return Ok(v);
    }

    Err(EvalError::undefined_method(type_name, name, &known_names(type_name)))
}

fn known_names(type_name: &str) -> Vec<String> {
    match registry::registry_for(type_name) {
        Some(reg) => reg.names(),
        None => Vec::new(),
    }
}

/// Handles the handful of properties not migrated to a per-type registry
/// (array/string length, Money/Unit field access, table columns).
fn legacy_property(receiver: &Value, name: &str) -> Result<Option<Value>, EvalError> {
    match (receiver, name) {
        (Value::Array(items), "length") => Ok(Some(Value::Integer(items.borrow().len() as i64))),
        (Value::String(s), "length") => Ok(Some(Value::Integer(s.chars().count() as i64))),
        (Value::Money { amount, .. }, "amount") => Ok(Some(Value::Integer(*amount))),
        (Value::Money { currency, .. }, "currency") => Ok(Some(Value::str(currency.to_string()))),
        (Value::Unit { amount, .. }, "amount") => Ok(Some(Value::Integer(*amount))),
        (Value::Unit { family, .. }, "family") => Ok(Some(Value::str(family.to_string()))),
        (Value::Table(t), "columns") => {
            Ok(Some(Value::array(t.columns.borrow().iter().map(|c| Value::str(c.clone())).collect())))
        }
        (Value::Record(r), "schema") => Ok(Some(Value::str(r.schema.clone()))),
        _ => Ok(None),
    }
}

// ===== Operators (§4.1.5) =====

fn eval_unary(op: UnaryOp, v: Value) -> Result<Value, EvalError> {
    if v.is_error() {
        return Ok(v);
    }
    match (op, &v) {
        (UnaryOp::Not, _) => Ok(Value::Boolean(!v.is_truthy())),
        (UnaryOp::Neg, Value::Integer(n)) => {
            n.checked_neg().map(Value::Integer).ok_or_else(|| EvalError::overflow("unary -"))
        }
        (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        (UnaryOp::Neg, other) => Err(EvalError::type_error("unary -", "integer or float", other)),
    }
}

fn eval_binary(op: BinaryOp, left: &ast::Expr, right: &ast::Expr, env: &Rc<Environment>) -> Result<Value, EvalError> {
    if op == BinaryOp::And {
        let l = eval_expr(left, env)?;
        if l.is_error() || !l.is_truthy() {
            return Ok(l);
        }
        return eval_expr(right, env);
    }
    if op == BinaryOp::Or {
        let l = eval_expr(left, env)?;
        if l.is_error() || l.is_truthy() {
            return Ok(l);
        }
        return eval_expr(right, env);
    }

    let l = eval_expr(left, env)?;
    if l.is_error() {
        return Ok(l);
    }
    let r = eval_expr(right, env)?;
    if r.is_error() {
        return Ok(r);
    }

    match op {
        BinaryOp::Eq => Ok(Value::Boolean(l.equals(&r))),
        BinaryOp::NotEq => Ok(Value::Boolean(!l.equals(&r))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => compare(op, &l, &r),
        BinaryOp::Add => arith_add(&l, &r),
        BinaryOp::Sub => arith_sub(&l, &r),
        BinaryOp::Mul => arith_mul(&l, &r),
        BinaryOp::Div => arith_div(&l, &r),
        BinaryOp::Mod => arith_mod(&l, &r),
        BinaryOp::Match => regex_match(&l, &r),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let ordering = match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.as_ref().cmp(b.as_ref())),
        _ => return Err(EvalError::type_error("comparison", "comparable operands", l)),
    };
    let Some(ord) = ordering else {
        return Ok(Value::Boolean(false));
    };
    let result = match op {
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::LtEq => ord.is_le(),
        BinaryOp::Gt => ord.is_gt(),
        BinaryOp::GtEq => ord.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Boolean(result))
}

fn arith_add(l: &Value, r: &Value) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => {
            a.checked_add(*b).map(Value::Integer).ok_or_else(|| EvalError::overflow("+"))
        }
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a + *b as f64)),
        (Value::String(a), Value::String(b)) => Ok(Value::str(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.borrow().clone();
            out.extend(b.borrow().iter().cloned());
            Ok(Value::array(out))
        }
        (
            Value::Money { amount: a1, currency: c1, scale: s1 },
            Value::Money { amount: a2, currency: c2, scale: s2 },
        ) => {
            if c1 != c2 || s1 != s2 {
                return Err(EvalError::operator_misuse("cannot add Money values of different currency/scale"));
            }
            let sum = a1.checked_add(*a2).ok_or_else(|| EvalError::overflow("+"))?;
            Ok(Value::Money { amount: sum, currency: c1.clone(), scale: *s1 })
        }
        _ => Err(EvalError::type_error("+", "matching numeric, string, or array operands", l)),
    }
}

fn arith_sub(l: &Value, r: &Value) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => {
            a.checked_sub(*b).map(Value::Integer).ok_or_else(|| EvalError::overflow("-"))
        }
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(*a as f64 - b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a - *b as f64)),
        (
            Value::Money { amount: a1, currency: c1, scale: s1 },
            Value::Money { amount: a2, currency: c2, scale: s2 },
        ) => {
            if c1 != c2 || s1 != s2 {
                return Err(EvalError::operator_misuse("cannot subtract Money values of different currency/scale"));
            }
            let diff = a1.checked_sub(*a2).ok_or_else(|| EvalError::overflow("-"))?;
            Ok(Value::Money { amount: diff, currency: c1.clone(), scale: *s1 })
        }
        _ => Err(EvalError::type_error("-", "matching numeric or Money operands", l)),
    }
}

fn arith_mul(l: &Value, r: &Value) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => {
            a.checked_mul(*b).map(Value::Integer).ok_or_else(|| EvalError::overflow("*"))
        }
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(*a as f64 * b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a * *b as f64)),
        (Value::Money { amount, currency, scale }, Value::Integer(n)) => {
            let product = amount.checked_mul(*n).ok_or_else(|| EvalError::overflow("*"))?;
            Ok(Value::Money { amount: product, currency: currency.clone(), scale: *scale })
        }
        _ => Err(EvalError::type_error("*", "matching numeric operands", l)),
    }
}

fn arith_div(l: &Value, r: &Value) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Integer(_), Value::Integer(0)) => Err(EvalError::validation_error("division by zero")),
        (Value::Integer(a), Value::Integer(b)) => {
            if a % b == 0 {
                Ok(Value::Integer(a / b))
            } else {
                Ok(Value::Float(*a as f64 / *b as f64))
            }
        }
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(*a as f64 / b)),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a / *b as f64)),
        _ => Err(EvalError::type_error("/", "matching numeric operands", l)),
    }
}

fn arith_mod(l: &Value, r: &Value) -> Result<Value, EvalError> {
    match (l, r) {
        (Value::Integer(_), Value::Integer(0)) => Err(EvalError::validation_error("modulo by zero")),
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a % b)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a % b)),
        _ => Err(EvalError::type_error("%", "integer or float operands", l)),
    }
}

fn regex_match(l: &Value, r: &Value) -> Result<Value, EvalError> {
    let s = match l {
        Value::String(s) => s.as_ref(),
        other => return Err(EvalError::type_error("~", "string", other)),
    };
    let dict = match r {
        Value::Dictionary(d) if typed_dict::is_regex_dict(d) => d,
        other => return Err(EvalError::type_error("~", "regex", other)),
    };
    let re = typed_dict::compile_regex(dict)?;
    match re.captures(s) {
        None => Ok(Value::Null),
        Some(caps) => {
            let groups: Vec<Value> = caps
                .iter()
                .map(|g| match g {
                    Some(m) => Value::str(m.as_str().to_string()),
                    None => Value::Null,
                })
                .collect();
            Ok(Value::array(groups))
        }
    }
}

// ===== Control flow (§4.1.6) =====

fn eval_for_in(
    pattern: &Pattern,
    iterable: &ast::Expr,
    body: &[ast::SStmt],
    env: &Rc<Environment>,
) -> Result<Value, EvalError> {
    if let ast::Expr::Range { start, end, inclusive } = iterable {
        let s = eval_expr(start, env)?;
        let e = eval_expr(end, env)?;
        let (a, b) = match (s, e) {
            (Value::Integer(a), Value::Integer(b)) => (a, b),
            (other, _) => return Err(EvalError::type_error("range", "integer", &other)),
        };
        let upper = if *inclusive { b + 1 } else { b };
        for i in a..upper {
            if let Some(signal) = run_loop_body(pattern, Value::Integer(i), body, env)? {
                return handle_loop_signal(signal);
            }
        }
        return Ok(Value::Null);
    }

    let seq = eval_expr(iterable, env)?;
    if seq.is_error() {
        return Ok(seq);
    }
    match seq {
        Value::Array(items) => {
            let snapshot = items.borrow().clone();
            for item in snapshot {
                if let Some(signal) = run_loop_body(pattern, item, body, env)? {
                    return handle_loop_signal(signal);
                }
            }
            Ok(Value::Null)
        }
        Value::Dictionary(d) => {
            for key in d.keys() {
                let v = d.get(&key)?;
                let pair = Value::array(vec![Value::str(key), v]);
                if let Some(signal) = run_loop_body(pattern, pair, body, env)? {
                    return handle_loop_signal(signal);
                }
            }
            Ok(Value::Null)
        }
        Value::String(s) => {
            for ch in s.chars() {
                if let Some(signal) = run_loop_body(pattern, Value::str(ch.to_string()), body, env)? {
                    return handle_loop_signal(signal);
                }
            }
            Ok(Value::Null)
        }
        other => Err(EvalError::type_error("for..in", "array, dictionary, string, or range", &other)),
    }
}

fn run_loop_body(
    pattern: &Pattern,
    item: Value,
    body: &[ast::SStmt],
    env: &Rc<Environment>,
) -> Result<Option<Signal>, EvalError> {
    let child = Environment::with_parent(env.clone());
    bind_pattern(pattern, item, &child, false)?;
    match eval_block(body, &child)? {
        Value::Signal(Signal { kind: SignalKind::Skip, .. }) => Ok(None),
        Value::Signal(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn handle_loop_signal(signal: Signal) -> Result<Value, EvalError> {
    match signal.kind {
        SignalKind::Stop => Ok(Value::Null),
        SignalKind::Return => Ok(Value::Signal(signal)),
        SignalKind::Skip => Ok(Value::Null),
    }
}

// ===== File I/O operators (§4.1.7) =====

fn eval_read(
    pattern: Option<&Pattern>,
    source: &ast::Expr,
    format_hint: Option<&str>,
    env: &Rc<Environment>,
) -> Result<Value, EvalError> {
    let source_v = eval_expr(source, env)?;
    if source_v.is_error() {
        return Ok(source_v);
    }
    let capture = pattern.map(wants_capture).unwrap_or(false);

    match read_from_source(&source_v, format_hint, env) {
        Ok(v) => match pattern {
            Some(p) if capture => {
                bind_capture(p, v, None, env)?;
                Ok(Value::Null)
            }
            Some(p) => {
                bind_pattern(p, v, env, false)?;
                Ok(Value::Null)
            }
            None => Ok(v),
        },
        Err(e) => {
            if capture {
                bind_capture(pattern.unwrap(), Value::Null, Some(e.into_value()), env)?;
                Ok(Value::Null)
            } else {
                Err(e)
            }
        }
    }
}

fn wants_capture(pattern: &Pattern) -> bool {
    matches!(pattern, Pattern::Dict { fields, .. } if fields.iter().any(|f| f.key == "data" || f.key == "error"))
}

fn bind_capture(pattern: &Pattern, data: Value, error: Option<Value>, env: &Rc<Environment>) -> Result<(), EvalError> {
    let pairs = vec![("data".to_string(), data), ("error".to_string(), error.unwrap_or(Value::Null))];
    let dict = Value::Dictionary(Rc::new(Dictionary::from_values(pairs, env.clone())));
    bind_pattern(pattern, dict, env, false)
}

fn read_from_source(source: &Value, format_hint: Option<&str>, env: &Rc<Environment>) -> Result<Value, EvalError> {
    let dict = match source {
        Value::Dictionary(d) => d.clone(),
        other => return Err(EvalError::type_error("<==", "file or dir dictionary", other)),
    };
    let path = sandbox::dict_to_abs_path(&dict)?;
    let checked = sandbox::check_path_access(env, &path, sandbox::Operation::Read)?;
    let bytes = std::fs::read(&checked).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EvalError::io_not_found(&checked.display().to_string())
        } else {
            EvalError::io_unreadable(&checked.display().to_string(), &e.to_string())
        }
    })?;
    let format = resolve_format(&dict, format_hint);
    crate::formats::decode(&format, &bytes)
}

fn resolve_format(dict: &Dictionary, format_hint: Option<&str>) -> String {
    if let Some(f) = format_hint {
        return f.to_string();
    }
    match dict.get("format") {
        Ok(Value::String(s)) if !s.is_empty() => s.to_string(),
        _ => {
            let name = typed_dict::try_to_string(dict).unwrap_or_default();
            let ext = name.rsplit_once('.').map(|(_, e)| e.to_string()).unwrap_or_default();
            crate::formats::detect_format(&ext).to_string()
        }
    }
}

fn eval_write(
    value: &ast::Expr,
    target: &ast::Expr,
    append: bool,
    network: bool,
    env: &Rc<Environment>,
) -> Result<Value, EvalError> {
    let v = eval_expr(value, env)?;
    if v.is_error() {
        return Ok(v);
    }
    let target_v = eval_expr(target, env)?;
    if target_v.is_error() {
        return Ok(target_v);
    }

    if network {
        return write_network(&v, &target_v);
    }

    let dict = match &target_v {
        Value::Dictionary(d) => d.clone(),
        other => return Err(EvalError::type_error("write target", "file dictionary", other)),
    };
    let path = sandbox::dict_to_abs_path(&dict)?;
    let checked = sandbox::check_path_access(env, &path, sandbox::Operation::Write)?;
    let format = resolve_format(&dict, None);
    let bytes = crate::formats::encode(&format, &v)?;
    let result = if append {
        use std::io::Write;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&checked)
            .and_then(|mut f| f.write_all(&bytes))
    } else {
        std::fs::write(&checked, &bytes)
    };
    result.map_err(|e| EvalError::io_write_failed(&checked.display().to_string(), &e.to_string()))?;
    Ok(Value::Null)
}

fn write_network(value: &Value, target: &Value) -> Result<Value, EvalError> {
    match target {
        Value::Handle(h) => {
            if !matches!(&*h.borrow(), crate::shims::Handle::Sftp(_) | crate::shims::Handle::SftpFile(_)) {
                return Err(EvalError::operator_misuse("network write operator requires an SFTP handle"));
            }
            let _ = value;
            Err(EvalError::internal("SFTP transport is not implemented in this evaluator core"))
        }
        other => Err(EvalError::operator_misuse(format!(
            "network write operator requires a network handle, got {}",
            other.type_name()
        ))),
    }
}

pub mod builtins {
    use super::*;
    use crate::registry::{MethodEntry, Registry};

    fn array_items(v: &Value) -> Rc<std::cell::RefCell<Vec<Value>>> {
        match v {
            Value::Array(a) => a.clone(),
            _ => unreachable!("registry only dispatches to matching receiver type"),
        }
    }

    fn array_push(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        items.borrow_mut().extend_from_slice(args);
        Ok(recv.clone())
    }

    fn array_pop(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let popped = items.borrow_mut().pop().unwrap_or(Value::Null);
        Ok(popped)
    }

    fn array_first(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let first = items.borrow().first().cloned().unwrap_or(Value::Null);
        Ok(first)
    }

    fn array_last(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let last = items.borrow().last().cloned().unwrap_or(Value::Null);
        Ok(last)
    }

    fn array_join(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let sep = match args.first() {
            Some(Value::String(s)) => s.to_string(),
            _ => String::new(),
        };
        let parts: Vec<String> = items.borrow().iter().map(typed_dict::to_template_string).collect();
        Ok(Value::str(parts.join(&sep)))
    }

    fn array_reverse(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let mut v = items.borrow().clone();
        v.reverse();
        Ok(Value::array(v))
    }

    fn array_slice(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let v = items.borrow();
        let len = v.len() as i64;
        let norm = |i: i64| -> usize { i.clamp(0, len).try_into().unwrap_or(0) };
        let start = match args.first() {
            Some(Value::Integer(n)) => norm(if *n < 0 { len + n } else { *n }),
            _ => 0,
        };
        let end = match args.get(1) {
            Some(Value::Integer(n)) => norm(if *n < 0 { len + n } else { *n }),
            _ => v.len(),
        };
        if start >= end {
            return Ok(Value::array(vec![]));
        }
        Ok(Value::array(v[start..end].to_vec()))
    }

    fn array_includes(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let needle = args.first().cloned().unwrap_or(Value::Null);
        let found = items.borrow().iter().any(|v| v.equals(&needle));
        Ok(Value::Boolean(found))
    }

    fn array_index_of(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let needle = args.first().cloned().unwrap_or(Value::Null);
        let position = items.borrow().iter().position(|v| v.equals(&needle));
        match position {
            Some(i) => Ok(Value::Integer(i as i64)),
            None => Ok(Value::Integer(-1)),
        }
    }

    fn array_concat(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let mut out = items.borrow().clone();
        for a in args {
            match a {
                Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                other => out.push(other.clone()),
            }
        }
        Ok(Value::array(out))
    }

    fn array_map(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let f = args.first().cloned().unwrap_or(Value::Null);
        let snapshot = items.borrow().clone();
        let mut out = Vec::with_capacity(snapshot.len());
        for item in snapshot {
            out.push(super::apply_function(f.clone(), vec![item], None, env)?);
        }
        Ok(Value::array(out))
    }

    fn array_filter(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let f = args.first().cloned().unwrap_or(Value::Null);
        let snapshot = items.borrow().clone();
        let mut out = Vec::new();
        for item in snapshot {
            let keep = super::apply_function(f.clone(), vec![item.clone()], None, env)?;
            if keep.is_truthy() {
                out.push(item);
            }
        }
        Ok(Value::array(out))
    }

    fn array_for_each(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let f = args.first().cloned().unwrap_or(Value::Null);
        let snapshot = items.borrow().clone();
        for item in snapshot {
            super::apply_function(f.clone(), vec![item], None, env)?;
        }
        Ok(Value::Null)
    }

    fn array_reduce(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let f = args.first().cloned().unwrap_or(Value::Null);
        let snapshot = items.borrow().clone();
        let mut acc = args.get(1).cloned().unwrap_or(Value::Null);
        for item in snapshot {
            acc = super::apply_function(f.clone(), vec![acc, item], None, env)?;
        }
        Ok(acc)
    }

    fn array_sort(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let mut v = items.borrow().clone();
        if let Some(cmp_fn) = args.first().cloned() {
            let mut err = None;
            v.sort_by(|a, b| {
                if err.is_some() {
                    return std::cmp::Ordering::Equal;
                }
                match super::apply_function(cmp_fn.clone(), vec![a.clone(), b.clone()], None, env) {
                    Ok(Value::Integer(n)) => n.cmp(&0),
                    Ok(_) => std::cmp::Ordering::Equal,
                    Err(e) => {
                        err = Some(e);
                        std::cmp::Ordering::Equal
                    }
                }
            });
            if let Some(e) = err {
                return Err(e);
            }
        } else {
            v.sort_by(|a, b| match (a, b) {
                (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
                (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
                (Value::String(x), Value::String(y)) => x.cmp(y),
                _ => std::cmp::Ordering::Equal,
            });
        }
        Ok(Value::array(v))
    }

    fn array_flatten(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let items = array_items(recv);
        let mut out = Vec::new();
        for v in items.borrow().iter() {
            match v {
                Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                other => out.push(other.clone()),
            }
        }
        Ok(Value::array(out))
    }

    pub fn register_array_methods(r: &mut Registry) {
        let entries: &[MethodEntry] = &[
            MethodEntry { name: "push", arity: "1+", description: "append values", func: array_push },
            MethodEntry { name: "pop", arity: "0", description: "remove and return the last element", func: array_pop },
            MethodEntry { name: "first", arity: "0", description: "first element or Null", func: array_first },
            MethodEntry { name: "last", arity: "0", description: "last element or Null", func: array_last },
            MethodEntry { name: "join", arity: "0-1", description: "join elements with a separator", func: array_join },
            MethodEntry { name: "reverse", arity: "0", description: "reversed copy", func: array_reverse },
            MethodEntry { name: "slice", arity: "0-2", description: "sub-array by index range", func: array_slice },
            MethodEntry { name: "includes", arity: "1", description: "membership test", func: array_includes },
            MethodEntry { name: "indexOf", arity: "1", description: "first matching index or -1", func: array_index_of },
            MethodEntry { name: "concat", arity: "1+", description: "concatenate arrays/values", func: array_concat },
            MethodEntry { name: "map", arity: "1", description: "transform each element", func: array_map },
            MethodEntry { name: "filter", arity: "1", description: "keep elements matching a predicate", func: array_filter },
            MethodEntry { name: "forEach", arity: "1", description: "call a function per element", func: array_for_each },
            MethodEntry { name: "reduce", arity: "1-2", description: "fold elements into an accumulator", func: array_reduce },
            MethodEntry { name: "sort", arity: "0-1", description: "sort, optional comparator", func: array_sort },
            MethodEntry { name: "flatten", arity: "0", description: "flatten one level of nested arrays", func: array_flatten },
        ];
        for e in entries {
            r.register(*e);
        }
    }

    fn as_str(v: &Value) -> &str {
        match v {
            Value::String(s) => s,
            _ => unreachable!("registry only dispatches to matching receiver type"),
        }
    }

    fn string_upper(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        Ok(Value::str(as_str(recv).to_uppercase()))
    }

    fn string_lower(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        Ok(Value::str(as_str(recv).to_lowercase()))
    }

    fn string_trim(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        Ok(Value::str(as_str(recv).trim().to_string()))
    }

    fn string_split(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let sep = match args.first() {
            Some(Value::String(s)) => s.to_string(),
            other => return Err(EvalError::type_error_nth("split", 1, "string", other.unwrap_or(&Value::Null))),
        };
        Ok(Value::array(as_str(recv).split(&sep).map(Value::str).collect()))
    }

    fn string_replace(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let from = match args.first() {
            Some(Value::String(s)) => s.to_string(),
            other => return Err(EvalError::type_error_nth("replace", 1, "string", other.unwrap_or(&Value::Null))),
        };
        let to = match args.get(1) {
            Some(Value::String(s)) => s.to_string(),
            other => return Err(EvalError::type_error_nth("replace", 2, "string", other.unwrap_or(&Value::Null))),
        };
        Ok(Value::str(as_str(recv).replace(&from, &to)))
    }

    fn string_contains(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let needle = match args.first() {
            Some(Value::String(s)) => s.as_ref(),
            _ => "",
        };
        Ok(Value::Boolean(as_str(recv).contains(needle)))
    }

    fn string_starts_with(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let needle = match args.first() {
            Some(Value::String(s)) => s.as_ref(),
            _ => "",
        };
        Ok(Value::Boolean(as_str(recv).starts_with(needle)))
    }

    fn string_ends_with(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let needle = match args.first() {
            Some(Value::String(s)) => s.as_ref(),
            _ => "",
        };
        Ok(Value::Boolean(as_str(recv).ends_with(needle)))
    }

    fn string_slice(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let chars: Vec<char> = as_str(recv).chars().collect();
        let len = chars.len() as i64;
        let norm = |i: i64| -> usize { i.clamp(0, len).try_into().unwrap_or(0) };
        let start = match args.first() {
            Some(Value::Integer(n)) => norm(if *n < 0 { len + n } else { *n }),
            _ => 0,
        };
        let end = match args.get(1) {
            Some(Value::Integer(n)) => norm(if *n < 0 { len + n } else { *n }),
            _ => chars.len(),
        };
        if start >= end {
            return Ok(Value::str(""));
        }
        Ok(Value::str(chars[start..end].iter().collect::<String>()))
    }

    fn string_repeat(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let n = match args.first() {
            Some(Value::Integer(n)) if *n >= 0 => *n as usize,
            other => {
                return Err(EvalError::type_error_nth("repeat", 1, "non-negative integer", other.unwrap_or(&Value::Null)))
            }
        };
        Ok(Value::str(as_str(recv).repeat(n)))
    }

    fn string_pad_start(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        pad(as_str(recv), args, true)
    }

    fn string_pad_end(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        pad(as_str(recv), args, false)
    }

    fn pad(s: &str, args: &[Value], start: bool) -> Result<Value, EvalError> {
        let target = match args.first() {
            Some(Value::Integer(n)) if *n >= 0 => *n as usize,
            other => {
                return Err(EvalError::type_error_nth("pad", 1, "non-negative integer", other.unwrap_or(&Value::Null)))
            }
        };
        let fill = match args.get(1) {
            Some(Value::String(s)) if !s.is_empty() => s.to_string(),
            _ => " ".to_string(),
        };
        let len = s.chars().count();
        if len >= target {
            return Ok(Value::str(s.to_string()));
        }
        let fill_chars: Vec<char> = fill.chars().collect();
        let needed = target - len;
        let padding: String = (0..needed).map(|i| fill_chars[i % fill_chars.len()]).collect();
        Ok(Value::str(if start { format!("{padding}{s}") } else { format!("{s}{padding}") }))
    }

    pub fn register_string_methods(r: &mut Registry) {
        let entries: &[MethodEntry] = &[
            MethodEntry { name: "toUpperCase", arity: "0", description: "uppercase copy", func: string_upper },
            MethodEntry { name: "toLowerCase", arity: "0", description: "lowercase copy", func: string_lower },
            MethodEntry { name: "trim", arity: "0", description: "trim leading/trailing whitespace", func: string_trim },
            MethodEntry { name: "split", arity: "1", description: "split on a separator", func: string_split },
            MethodEntry { name: "replace", arity: "2", description: "replace all occurrences", func: string_replace },
            MethodEntry { name: "contains", arity: "1", description: "substring test", func: string_contains },
            MethodEntry { name: "startsWith", arity: "1", description: "prefix test", func: string_starts_with },
            MethodEntry { name: "endsWith", arity: "1", description: "suffix test", func: string_ends_with },
            MethodEntry { name: "slice", arity: "0-2", description: "substring by code-point range", func: string_slice },
            MethodEntry { name: "repeat", arity: "1", description: "repeat n times", func: string_repeat },
            MethodEntry { name: "padStart", arity: "1-2", description: "left-pad to a target length", func: string_pad_start },
            MethodEntry { name: "padEnd", arity: "1-2", description: "right-pad to a target length", func: string_pad_end },
        ];
        for e in entries {
            r.register(*e);
        }
    }

    fn as_dict(v: &Value) -> &Rc<Dictionary> {
        match v {
            Value::Dictionary(d) => d,
            _ => unreachable!("registry only dispatches to matching receiver type"),
        }
    }

    fn dict_keys(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        Ok(Value::array(as_dict(recv).keys().into_iter().map(Value::str).collect()))
    }

    fn dict_values(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let d = as_dict(recv);
        let mut out = Vec::new();
        for k in d.keys() {
            out.push(d.get(&k)?);
        }
        Ok(Value::array(out))
    }

    fn dict_entries(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let d = as_dict(recv);
        let mut out = Vec::new();
        for k in d.keys() {
            let v = d.get(&k)?;
            out.push(Value::array(vec![Value::str(k), v]));
        }
        Ok(Value::array(out))
    }

    fn dict_has(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
        let key = match args.first() {
            Some(Value::String(s)) => s.as_ref(),
            _ => return Ok(Value::Boolean(false)),
        };
        Ok(Value::Boolean(as_dict(recv).has(key)))
    }

    fn dict_remove(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
        let d = as_dict(recv);
        let key = match args.first() {
            Some(Value::String(s)) => s.to_string(),
            _ => return Ok(Value::Dictionary(d.clone())),
        };
        let mut remaining: Vec<(String, Value)> = Vec::new();
        for k in d.keys() {
            if k == key {
                continue;
            }
            let v = d.get(&k)?;
            remaining.push((k, v));
        }
        Ok(Value::Dictionary(Rc::new(Dictionary::from_values(remaining, env.clone()))))
    }

    fn dict_merge(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
        let d = as_dict(recv);
        let mut pairs: Vec<(String, Value)> = Vec::new();
        for k in d.keys() {
            let v = d.get(&k)?;
            pairs.push((k, v));
        }
        for arg in args {
            if let Value::Dictionary(other) = arg {
                for k in other.keys() {
                    let v = other.get(&k)?;
                    if let Some(slot) = pairs.iter_mut().find(|(ek, _)| *ek == k) {
                        slot.1 = v;
                    } else {
                        pairs.push((k, v));
                    }
                }
            }
        }
        Ok(Value::Dictionary(Rc::new(Dictionary::from_values(pairs, env.clone()))))
    }

    pub fn register_dict_methods(r: &mut Registry) {
        let entries: &[MethodEntry] = &[
            MethodEntry { name: "keys", arity: "0", description: "ordered list of keys", func: dict_keys },
            MethodEntry { name: "values", arity: "0", description: "ordered list of values", func: dict_values },
            MethodEntry { name: "entries", arity: "0", description: "ordered [key, value] pairs", func: dict_entries },
            MethodEntry { name: "has", arity: "1", description: "key membership test", func: dict_has },
            MethodEntry { name: "remove", arity: "1", description: "copy without a key", func: dict_remove },
            MethodEntry { name: "merge", arity: "1+", description: "shallow-merge other dictionaries in", func: dict_merge },
        ];
        for e in entries {
            r.register(*e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(s: ast::Stmt) -> ast::SStmt {
        ast::Spanned::new(s, ast::Pos::unknown())
    }

    // ----- eval_unary / eval_binary -----

    #[test]
    fn not_negates_truthiness() {
        assert!(eval_unary(UnaryOp::Not, Value::Boolean(false)).unwrap().equals(&Value::Boolean(true)));
        assert!(eval_unary(UnaryOp::Not, Value::Integer(0)).unwrap().equals(&Value::Boolean(false)));
    }

    #[test]
    fn neg_on_integer_overflows_at_i64_min() {
        assert!(eval_unary(UnaryOp::Neg, Value::Integer(i64::MIN)).is_err());
    }

    #[test]
    fn neg_on_float_negates() {
        let v = eval_unary(UnaryOp::Neg, Value::Float(2.5)).unwrap();
        assert!(v.equals(&Value::Float(-2.5)));
    }

    #[test]
    fn neg_on_string_is_a_type_error() {
        assert!(eval_unary(UnaryOp::Neg, Value::str("x")).is_err());
    }

    #[test]
    fn integer_addition_overflow_surfaces_as_error() {
        let env = Environment::new();
        let err = eval_binary(BinaryOp::Add, &ast::Expr::Int(i64::MAX), &ast::Expr::Int(1), &env).unwrap_err();
        assert_eq!(err.code(), "TYPE-0006");
    }

    #[test]
    fn mixed_integer_float_addition_promotes_to_float() {
        let env = Environment::new();
        let v = eval_binary(BinaryOp::Add, &ast::Expr::Int(1), &ast::Expr::Float(0.5), &env).unwrap();
        assert!(v.equals(&Value::Float(1.5)));
    }

    #[test]
    fn string_operands_concatenate_on_add() {
        let env = Environment::new();
        let v = eval_binary(
            BinaryOp::Add,
            &ast::Expr::Str("foo".to_string()),
            &ast::Expr::Str("bar".to_string()),
            &env,
        )
        .unwrap();
        assert!(matches!(v, Value::String(s) if &*s == "foobar"));
    }

    #[test]
    fn array_operands_concatenate_on_add() {
        let env = Environment::new();
        let v = eval_binary(
            BinaryOp::Add,
            &ast::Expr::ArrayLit(vec![ast::Expr::Int(1)]),
            &ast::Expr::ArrayLit(vec![ast::Expr::Int(2)]),
            &env,
        )
        .unwrap();
        assert!(v.equals(&Value::array(vec![Value::Integer(1), Value::Integer(2)])));
    }

    #[test]
    fn comparison_orders_integers() {
        let env = Environment::new();
        let v = eval_binary(BinaryOp::Lt, &ast::Expr::Int(1), &ast::Expr::Int(2), &env).unwrap();
        assert!(v.equals(&Value::Boolean(true)));
    }

    #[test]
    fn and_short_circuits_without_evaluating_the_right_side() {
        let env = Environment::new();
        let v = eval_binary(BinaryOp::And, &ast::Expr::Bool(false), &ast::Expr::Ident("nope".to_string()), &env).unwrap();
        assert!(v.equals(&Value::Boolean(false)));
    }

    #[test]
    fn or_short_circuits_without_evaluating_the_right_side() {
        let env = Environment::new();
        let v = eval_binary(BinaryOp::Or, &ast::Expr::Bool(true), &ast::Expr::Ident("nope".to_string()), &env).unwrap();
        assert!(v.equals(&Value::Boolean(true)));
    }

    // ----- bind_pattern destructuring -----

    #[test]
    fn array_pattern_binds_elements_and_rest() {
        let env = Environment::new();
        let pattern = Pattern::Array { elements: vec![Pattern::Name("a".to_string())], rest: Some("rest".to_string()) };
        let value = Value::array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        bind_pattern(&pattern, value, &env, false).unwrap();
        assert!(env.get("a").0.equals(&Value::Integer(1)));
        assert!(env.get("rest").0.equals(&Value::array(vec![Value::Integer(2), Value::Integer(3)])));
    }

    #[test]
    fn dict_pattern_binds_alias_nested_and_rest() {
        let env = Environment::new();
        let inner = Dictionary::from_values(vec![("c".to_string(), Value::Integer(2))], env.clone());
        let outer = Dictionary::from_values(
            vec![
                ("a".to_string(), Value::Integer(1)),
                ("b".to_string(), Value::Dictionary(Rc::new(inner))),
                ("d".to_string(), Value::Integer(3)),
            ],
            env.clone(),
        );
        let pattern = Pattern::Dict {
            fields: vec![
                ast::DictPatternField { key: "a".to_string(), alias: Some("x".to_string()), nested: None },
                ast::DictPatternField {
                    key: "b".to_string(),
                    alias: None,
                    nested: Some(Pattern::Dict {
                        fields: vec![ast::DictPatternField { key: "c".to_string(), alias: None, nested: None }],
                        rest: None,
                    }),
                },
            ],
            rest: Some("rest".to_string()),
        };
        bind_pattern(&pattern, Value::Dictionary(Rc::new(outer)), &env, false).unwrap();
        assert!(env.get("x").0.equals(&Value::Integer(1)));
        assert!(env.get("c").0.equals(&Value::Integer(2)));
        match env.get("rest").0 {
            Value::Dictionary(d) => {
                assert!(d.has("d"));
                assert!(!d.has("a"));
                assert!(!d.has("b"));
            }
            other => panic!("expected dictionary, got {other:?}"),
        }
    }

    // ----- dispatch_member fallthrough cascade -----

    #[test]
    fn registry_hit_dispatches_array_push() {
        let env = Environment::new();
        let recv = Value::array(vec![Value::Integer(1)]);
        let result = dispatch_member(&recv, "push", Some(&[Value::Integer(2)]), &env).unwrap();
        assert!(result.equals(&Value::array(vec![Value::Integer(1), Value::Integer(2)])));
    }

    #[test]
    fn computed_property_hit_returns_path_basename() {
        let env = Environment::new();
        let d = typed_dict::path_dict(vec!["a".to_string(), "b.txt".to_string()], true, &env);
        let recv = Value::Dictionary(Rc::new(d));
        let v = dispatch_member(&recv, "basename", None, &env).unwrap();
        assert!(matches!(v, Value::String(s) if &*s == "b.txt"));
    }

    #[test]
    fn legacy_fallback_returns_array_length() {
        let env = Environment::new();
        let recv = Value::array(vec![Value::Integer(1), Value::Integer(2)]);
        let v = dispatch_member(&recv, "length", None, &env).unwrap();
        assert!(v.equals(&Value::Integer(2)));
    }

    #[test]
    fn unknown_method_name_surfaces_undefined_method_error() {
        let env = Environment::new();
        let recv = Value::array(vec![]);
        let err = dispatch_member(&recv, "pussh", None, &env).unwrap_err();
        assert_eq!(err.code(), "UNDEF-0002");
    }

    #[test]
    fn dict_stored_function_called_with_parens_binds_this() {
        let env = Environment::new();
        let greet_body = vec![stmt(ast::Stmt::Return(Some(ast::Expr::PropertyAccess {
            receiver: Box::new(ast::Expr::Ident("this".to_string())),
            name: "name".to_string(),
        })))];
        let greet = Value::Function(Rc::new(FunctionValue { name: None, params: vec![], body: greet_body, env: env.clone() }));
        let dict = Dictionary::from_values(
            vec![("name".to_string(), Value::str("Ada")), ("greet".to_string(), greet)],
            env.clone(),
        );
        let recv = Value::Dictionary(Rc::new(dict));
        let result = dispatch_member(&recv, "greet", Some(&[]), &env).unwrap();
        assert!(matches!(result, Value::String(s) if &*s == "Ada"));
    }

    #[test]
    fn dict_stored_non_callable_field_called_with_parens_falls_through_to_undefined() {
        let env = Environment::new();
        let dict = Dictionary::from_values(vec![("count".to_string(), Value::Integer(5))], env.clone());
        let recv = Value::Dictionary(Rc::new(dict));
        assert!(dispatch_member(&recv, "count", Some(&[]), &env).is_err());
    }

    // ----- eval_for_in / loop-signal handling -----

    #[test]
    fn range_for_in_sums_into_an_accumulator() {
        let env = Environment::new();
        env.define("total", Value::Integer(0));
        let body = vec![stmt(ast::Stmt::Assign {
            target: AssignTarget::Name("total".to_string()),
            value: ast::Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(ast::Expr::Ident("total".to_string())),
                right: Box::new(ast::Expr::Ident("i".to_string())),
            },
        })];
        let iterable = ast::Expr::Range { start: Box::new(ast::Expr::Int(1)), end: Box::new(ast::Expr::Int(4)), inclusive: false };
        eval_for_in(&Pattern::Name("i".to_string()), &iterable, &body, &env).unwrap();
        assert!(env.get("total").0.equals(&Value::Integer(6)));
    }

    #[test]
    fn stop_signal_breaks_array_iteration_early() {
        let env = Environment::new();
        env.define("total", Value::Integer(0));
        let body = vec![
            stmt(ast::Stmt::Assign {
                target: AssignTarget::Name("total".to_string()),
                value: ast::Expr::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(ast::Expr::Ident("total".to_string())),
                    right: Box::new(ast::Expr::Ident("i".to_string())),
                },
            }),
            stmt(ast::Stmt::Expr(ast::Expr::If {
                cond: Box::new(ast::Expr::Binary {
                    op: BinaryOp::Eq,
                    left: Box::new(ast::Expr::Ident("i".to_string())),
                    right: Box::new(ast::Expr::Int(2)),
                }),
                then_branch: vec![stmt(ast::Stmt::Stop)],
                else_branch: None,
            })),
        ];
        let iterable = ast::Expr::ArrayLit(vec![ast::Expr::Int(1), ast::Expr::Int(2), ast::Expr::Int(3), ast::Expr::Int(4)]);
        eval_for_in(&Pattern::Name("i".to_string()), &iterable, &body, &env).unwrap();
        assert!(env.get("total").0.equals(&Value::Integer(3)));
    }

    #[test]
    fn skip_signal_continues_without_running_the_rest_of_the_body() {
        let env = Environment::new();
        env.define("total", Value::Integer(0));
        let body = vec![stmt(ast::Stmt::Expr(ast::Expr::If {
            cond: Box::new(ast::Expr::Binary {
                op: BinaryOp::Eq,
                left: Box::new(ast::Expr::Ident("i".to_string())),
                right: Box::new(ast::Expr::Int(2)),
            }),
            then_branch: vec![stmt(ast::Stmt::Skip)],
            else_branch: Some(vec![stmt(ast::Stmt::Assign {
                target: AssignTarget::Name("total".to_string()),
                value: ast::Expr::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(ast::Expr::Ident("total".to_string())),
                    right: Box::new(ast::Expr::Ident("i".to_string())),
                },
            })]),
        }))];
        let iterable = ast::Expr::ArrayLit(vec![ast::Expr::Int(1), ast::Expr::Int(2), ast::Expr::Int(3)]);
        eval_for_in(&Pattern::Name("i".to_string()), &iterable, &body, &env).unwrap();
        assert!(env.get("total").0.equals(&Value::Integer(4)));
    }

    #[test]
    fn return_signal_propagates_out_of_a_loop() {
        let env = Environment::new();
        let body = vec![stmt(ast::Stmt::Return(Some(ast::Expr::Int(42))))];
        let iterable = ast::Expr::ArrayLit(vec![ast::Expr::Int(1)]);
        let result = eval_for_in(&Pattern::Name("i".to_string()), &iterable, &body, &env).unwrap();
        match result {
            Value::Signal(Signal { kind: SignalKind::Return, value: Some(v) }) => assert!(v.equals(&Value::Integer(42))),
            other => panic!("expected a return signal, got {other:?}"),
        }
    }

    #[test]
    fn dictionary_for_in_yields_key_value_pairs_in_insertion_order() {
        let env = Environment::new();
        env.define("lastKey", Value::Null);
        env.define("lastVal", Value::Null);
        let dict = Dictionary::from_values(
            vec![("a".to_string(), Value::Integer(1)), ("b".to_string(), Value::Integer(2))],
            env.clone(),
        );
        let body = vec![
            stmt(ast::Stmt::Assign { target: AssignTarget::Name("lastKey".to_string()), value: ast::Expr::Ident("k".to_string()) }),
            stmt(ast::Stmt::Assign { target: AssignTarget::Name("lastVal".to_string()), value: ast::Expr::Ident("v".to_string()) }),
        ];
        let iterable = ast::Expr::Ident("d".to_string());
        env.define("d", Value::Dictionary(Rc::new(dict)));
        let pattern = Pattern::Array { elements: vec![Pattern::Name("k".to_string()), Pattern::Name("v".to_string())], rest: None };
        eval_for_in(&pattern, &iterable, &body, &env).unwrap();
        assert!(matches!(env.get("lastKey").0, Value::String(s) if &*s == "b"));
        assert!(env.get("lastVal").0.equals(&Value::Integer(2)));
    }

    #[test]
    fn string_for_in_iterates_by_character() {
        let env = Environment::new();
        env.define("out", Value::str(""));
        let body = vec![stmt(ast::Stmt::Assign {
            target: AssignTarget::Name("out".to_string()),
            value: ast::Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(ast::Expr::Ident("out".to_string())),
                right: Box::new(ast::Expr::Ident("ch".to_string())),
            },
        })];
        let iterable = ast::Expr::Str("ab".to_string());
        eval_for_in(&Pattern::Name("ch".to_string()), &iterable, &body, &env).unwrap();
        assert!(matches!(env.get("out").0, Value::String(s) if &*s == "ab"));
    }
}
