// ABOUTME: Value types representing the runtime values of the evaluated language

use crate::ast;
use crate::env::Environment;
use crate::error::EvalError;
use crate::shims::Handle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A dictionary field: either an already-evaluated value, or an unevaluated
/// expression plus the environment it was captured in. Reading a thunked
/// field evaluates it against the captured environment; evaluation is
/// idempotent for the typed-dictionary payloads that rely on this (the
/// result is memoised in place so repeated reads are cheap and stable).
#[derive(Debug, Clone)]
pub enum Field {
    Evaluated(Value),
    Thunk(Rc<ast::Expr>, Rc<Environment>),
}

/// Insertion-order-preserving string-keyed map. Dictionaries in this
/// language are small in practice, so a linear scan beats pulling in an
/// extra map crate purely for ordering.
#[derive(Debug, Default)]
pub struct OrderedFields {
    entries: Vec<(String, Field)>,
}

impl OrderedFields {
    pub fn new() -> Self {
        OrderedFields { entries: Vec::new() }
    }

    pub fn insert(&mut self, key: String, field: Field) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = field;
        } else {
            self.entries.push((key, field));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set_evaluated(&mut self, key: &str, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k == key) {
            slot.1 = Field::Evaluated(value);
        } else {
            self.entries.push((key.to_string(), Field::Evaluated(value)));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Field> {
        if let Some(idx) = self.entries.iter().position(|(k, _)| k == key) {
            Some(self.entries.remove(idx).1)
        } else {
            None
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

/// A dictionary: string keys mapped to possibly-unevaluated expressions,
/// plus the environment those expressions close over. `__type` (when
/// present) promotes a dictionary to one of the typed-dictionary shapes
/// in `typed_dict`.
#[derive(Debug)]
pub struct Dictionary {
    pub fields: RefCell<OrderedFields>,
    pub env: Rc<Environment>,
}

impl Dictionary {
    pub fn new(env: Rc<Environment>) -> Self {
        Dictionary {
            fields: RefCell::new(OrderedFields::new()),
            env,
        }
    }

    pub fn from_values(pairs: Vec<(String, Value)>, env: Rc<Environment>) -> Self {
        let mut fields = OrderedFields::new();
        for (k, v) in pairs {
            fields.insert(k, Field::Evaluated(v));
        }
        Dictionary {
            fields: RefCell::new(fields),
            env,
        }
    }

    /// Evaluate (and memoise) the field named `key`, returning `Value::Null`
    /// if absent.
    pub fn get(&self, key: &str) -> Result<Value, EvalError> {
        let field = self.fields.borrow().get(key).cloned();
        match field {
            None => Ok(Value::Null),
            Some(Field::Evaluated(v)) => Ok(v),
            Some(Field::Thunk(expr, env)) => {
                let v = crate::eval::eval_expr(&expr, &env)?;
                if v.is_error() {
                    return Ok(v);
                }
                self.fields.borrow_mut().set_evaluated(key, v.clone());
                Ok(v)
            }
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        self.fields.borrow_mut().set_evaluated(key, value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.fields.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.fields.borrow().keys().cloned().collect()
    }

    pub fn type_tag(&self) -> Option<String> {
        match self.fields.borrow().get("__type") {
            Some(Field::Evaluated(Value::String(s))) => Some(s.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Return,
    Stop,
    Skip,
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub kind: SignalKind,
    pub value: Option<Box<Value>>,
}

#[derive(Debug, Clone)]
pub struct FunctionValue {
    pub name: Option<String>,
    pub params: Vec<ast::Pattern>,
    pub body: Vec<ast::SStmt>,
    pub env: Rc<Environment>,
}

pub type BuiltinPlain = fn(&[Value]) -> Result<Value, EvalError>;
pub type BuiltinEnvAware = fn(&[Value], &Rc<Environment>) -> Result<Value, EvalError>;

#[derive(Clone, Copy)]
pub enum BuiltinFn {
    Plain(BuiltinPlain),
    EnvAware(BuiltinEnvAware),
}

impl fmt::Debug for BuiltinFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin>")
    }
}

#[derive(Debug)]
pub struct TableValue {
    pub rows: RefCell<Vec<Rc<Dictionary>>>,
    pub columns: RefCell<Vec<String>>,
    pub schema: Option<String>,
}

#[derive(Debug)]
pub struct RecordValue {
    pub schema: String,
    pub fields: RefCell<HashMap<String, Value>>,
}

#[derive(Debug)]
pub struct MdDocValue {
    pub doc: Rc<Dictionary>,
    pub env: Rc<Environment>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Dictionary(Rc<Dictionary>),
    Function(Rc<FunctionValue>),
    BuiltIn(BuiltinFn),
    Error(Rc<crate::error::ErrorValue>),
    Signal(Signal),
    Money {
        amount: i64,
        currency: Rc<str>,
        scale: u8,
    },
    Unit {
        amount: i64,
        family: Rc<str>,
        system: Rc<str>,
        display_hint: Rc<str>,
    },
    Table(Rc<TableValue>),
    Record(Rc<RecordValue>),
    MdDoc(Rc<MdDocValue>),
    Handle(Rc<RefCell<Handle>>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::String(Rc::from(s.into()))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Dictionary(d) => match d.type_tag().as_deref() {
                Some("path") => "path",
                Some("url") => "url",
                Some("regex") => "regex",
                Some("datetime") => "datetime",
                Some("duration") => "duration",
                Some("file") => "file",
                Some("dir") => "dir",
                Some("request") => "request",
                Some("tag") => "tag",
                Some("part") => "part",
                _ => "dictionary",
            },
            Value::Function(_) => "function",
            Value::BuiltIn(_) => "builtin",
            Value::Error(_) => "error",
            Value::Signal(_) => "signal",
            Value::Money { .. } => "money",
            Value::Unit { .. } => "unit",
            Value::Table(_) => "table",
            Value::Record(_) => "record",
            Value::MdDoc(_) => "mdDoc",
            Value::Handle(_) => "handle",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness per the control-flow rule: everything is truthy except
    /// Null, `false`, integer/float zero, and empty string/array/dictionary.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.borrow().is_empty(),
            Value::Dictionary(d) => !d.fields.borrow().is_empty(),
            _ => true,
        }
    }

    /// Structural equality with a seen-pointer-pair guard against cycles.
    /// Reflexive for everything except Float NaN.
    pub fn equals(&self, other: &Value) -> bool {
        let mut seen = Vec::new();
        values_equal(self, other, &mut seen)
    }
}

fn ptr_pair(a: usize, b: usize) -> (usize, usize) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn values_equal(a: &Value, b: &Value, seen: &mut Vec<(usize, usize)>) -> bool {
    use Value::*;
    match (a, b) {
        (Null, Null) => true,
        (Boolean(x), Boolean(y)) => x == y,
        (Integer(x), Integer(y)) => x == y,
        (Float(x), Float(y)) => x == y, // NaN != NaN falls out of PartialEq
        (Integer(x), Float(y)) | (Float(y), Integer(x)) => (*x as f64) == *y,
        (String(x), String(y)) => x == y,
        (Array(x), Array(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let key = ptr_pair(Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if seen.contains(&key) {
                return true;
            }
            seen.push(key);
            let xb = x.borrow();
            let yb = y.borrow();
            xb.len() == yb.len()
                && xb.iter().zip(yb.iter()).all(|(a, b)| values_equal(a, b, seen))
        }
        (Dictionary(x), Dictionary(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let key = ptr_pair(Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize);
            if seen.contains(&key) {
                return true;
            }
            seen.push(key);
            let xkeys = x.keys();
            let ykeys = y.keys();
            if xkeys.len() != ykeys.len() {
                return false;
            }
            xkeys.iter().all(|k| {
                y.has(k)
                    && match (x.get(k), y.get(k)) {
                        (Ok(xv), Ok(yv)) => values_equal(&xv, &yv, seen),
                        _ => false,
                    }
            })
        }
        (Money { amount: a1, currency: c1, scale: s1 }, Money { amount: a2, currency: c2, scale: s2 }) => {
            a1 == a2 && c1 == c2 && s1 == s2
        }
        (Unit { amount: a1, family: f1, .. }, Unit { amount: a2, family: f2, .. }) => {
            a1 == a2 && f1 == f2
        }
        (Signal(x), Signal(y)) => x.kind == y.kind,
        (Function(x), Function(y)) => Rc::ptr_eq(x, y),
        (Table(x), Table(y)) => Rc::ptr_eq(x, y),
        (Record(x), Record(y)) => Rc::ptr_eq(x, y),
        (MdDoc(x), MdDoc(y)) => Rc::ptr_eq(&x.doc, &y.doc),
        (Handle(x), Handle(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{n}")
                }
            }
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", repr(item))?;
                }
                write!(f, "]")
            }
            Value::Dictionary(d) => {
                if let Some(s) = crate::typed_dict::try_to_string(d) {
                    return write!(f, "{s}");
                }
                write!(f, "{{")?;
                for (i, key) in d.keys().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    let v = d.get(key).unwrap_or(Value::Null);
                    write!(f, "{}: {}", key, repr(&v))?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => match &func.name {
                Some(n) => write!(f, "<function {n}>"),
                None => write!(f, "<function>"),
            },
            Value::BuiltIn(_) => write!(f, "<builtin>"),
            Value::Error(e) => write!(f, "[{}] {}", e.code, e.message),
            Value::Signal(s) => write!(f, "<signal {:?}>", s.kind),
            Value::Money { amount, currency, scale } => {
                let divisor = 10i64.pow(*scale as u32);
                let whole = amount / divisor;
                let frac = (amount % divisor).abs();
                write!(f, "{whole}.{frac:0width$} {currency}", width = *scale as usize)
            }
            Value::Unit { amount, display_hint, .. } => write!(f, "{amount} {display_hint}"),
            Value::Table(t) => write!(f, "<table {} rows>", t.rows.borrow().len()),
            Value::Record(r) => write!(f, "<record {}>", r.schema),
            Value::MdDoc(_) => write!(f, "<mdDoc>"),
            Value::Handle(h) => write!(f, "<handle {}>", h.borrow().kind_name()),
        }
    }
}

/// String-literal form used inside array/dictionary printing.
fn repr(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{s}\"", s = s.replace('"', "\\\"")),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;

    #[test]
    fn integer_and_float_display() {
        assert_eq!(format!("{}", Value::Integer(42)), "42");
        assert_eq!(format!("{}", Value::Float(1.5)), "1.5");
        assert_eq!(format!("{}", Value::Float(2.0)), "2.0");
    }

    #[test]
    fn null_is_falsy_and_self_equal() {
        assert!(!Value::Null.is_truthy());
        assert!(Value::Null.equals(&Value::Null));
    }

    #[test]
    fn nan_not_equal_to_itself() {
        let nan = Value::Float(f64::NAN);
        assert!(!nan.equals(&nan));
    }

    #[test]
    fn empty_containers_are_falsy() {
        assert!(!Value::array(vec![]).is_truthy());
        let env = Environment::new();
        let dict = Rc::new(Dictionary::new(env));
        assert!(!Value::Dictionary(dict).is_truthy());
    }

    #[test]
    fn dictionaries_compare_structurally() {
        let env = Environment::new();
        let a = Dictionary::from_values(
            vec![("a".into(), Value::Integer(1)), ("b".into(), Value::Integer(2))],
            env.clone(),
        );
        let b = Dictionary::from_values(
            vec![("b".into(), Value::Integer(2)), ("a".into(), Value::Integer(1))],
            env,
        );
        assert!(Value::Dictionary(Rc::new(a)).equals(&Value::Dictionary(Rc::new(b))));
    }

    #[test]
    fn arrays_handle_self_referential_cycles_without_overflow() {
        let arr = Rc::new(RefCell::new(vec![Value::Integer(1)]));
        arr.borrow_mut().push(Value::Array(arr.clone()));
        let v = Value::Array(arr);
        assert!(v.equals(&v));
    }
}
