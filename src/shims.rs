// ABOUTME: External-interface value shims: HTTP request/response dicts, DB and SFTP handles

use crate::env::Environment;
use crate::error::EvalError;
use crate::registry::{MethodEntry, Registry};
use crate::value::{Dictionary, Value};
use rusqlite::Connection;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

/// A SQLite connection handle. Mirrors the spec's requirement that DB/SFTP
/// resources expose a boolean `Connected` state and raise `STATE-0002` when
/// used after close.
pub struct DbHandle {
    pub conn: Option<Connection>,
    pub path: String,
}

impl DbHandle {
    pub fn connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn close(&mut self) {
        self.conn = None;
    }
}

impl std::fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DbHandle({})", self.path)
    }
}

/// SFTP transport is an out-of-scope collaborator; this stub carries the
/// handle shape (`Connected`, close-after-use error) the spec requires
/// without any real network transport.
#[derive(Debug)]
pub struct SftpHandle {
    pub host: String,
    pub connected: bool,
}

#[derive(Debug)]
pub struct SftpFileHandle {
    pub path: String,
    pub connected: bool,
}

/// Opaque handle to a loaded stdlib module, for `Value::Handle(Module(..))`
/// shaped values returned by e.g. `import("std/table")`.
#[derive(Debug)]
pub struct ModuleHandle {
    pub name: String,
}

/// In-memory session store. Cookie machinery is out of scope; only the
/// get/set/delete/flash contract and dirty bit are implemented.
#[derive(Debug, Default)]
pub struct SessionHandle {
    pub data: HashMap<String, Value>,
    pub flash: HashMap<String, Value>,
    pub dirty: bool,
}

impl SessionHandle {
    pub fn get(&self, key: &str) -> Value {
        self.data.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
        self.dirty = true;
    }

    pub fn delete(&mut self, key: &str) {
        self.data.remove(key);
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.dirty = true;
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn all(&self, env: &Rc<Environment>) -> Dictionary {
        let pairs: Vec<(String, Value)> = self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Dictionary::from_values(pairs, env.clone())
    }

    pub fn set_flash(&mut self, key: &str, value: Value) {
        self.flash.insert(key.to_string(), value);
        self.dirty = true;
    }

    /// Flash reads are consumed: the value is removed on read so it survives
    /// exactly one request.
    pub fn get_flash(&mut self, key: &str) -> Value {
        self.dirty = true;
        self.flash.remove(key).unwrap_or(Value::Null)
    }

    pub fn get_all_flash(&mut self, env: &Rc<Environment>) -> Dictionary {
        self.dirty = true;
        let pairs: Vec<(String, Value)> = self.flash.drain().collect();
        Dictionary::from_values(pairs, env.clone())
    }

    pub fn has_flash(&self, key: &str) -> bool {
        self.flash.contains_key(key)
    }

    /// Resets session data for the current identity. Identity (cookie/ID)
    /// rotation is handled by the out-of-scope cookie machinery; this only
    /// clears the in-memory store and marks it dirty.
    pub fn regenerate(&mut self) {
        self.data.clear();
        self.flash.clear();
        self.dirty = true;
    }
}

#[derive(Debug)]
pub enum Handle {
    Db(DbHandle),
    Sftp(SftpHandle),
    SftpFile(SftpFileHandle),
    Module(ModuleHandle),
    Session(SessionHandle),
}

impl Handle {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Handle::Db(_) => "db",
            Handle::Sftp(_) => "sftp",
            Handle::SftpFile(_) => "sftp-file",
            Handle::Module(_) => "module",
            Handle::Session(_) => "session",
        }
    }
}

/// Builds the request dictionary shape consumed/produced at the HTTP
/// boundary (`__type="request"`), per the typed-dictionary table.
pub fn request_dict(
    url: &str,
    method: &str,
    format: &str,
    headers: Option<HashMap<String, String>>,
    env: &Rc<Environment>,
) -> Dictionary {
    let mut pairs = vec![
        ("__type".to_string(), Value::str("request")),
        ("_url_raw".to_string(), Value::str(url)),
        ("method".to_string(), Value::str(method)),
        ("format".to_string(), Value::str(format)),
    ];
    if let Some(h) = headers {
        let header_pairs: Vec<(String, Value)> = h.into_iter().map(|(k, v)| (k, Value::str(v))).collect();
        pairs.push((
            "headers".to_string(),
            Value::Dictionary(Rc::new(Dictionary::from_values(header_pairs, env.clone()))),
        ));
    }
    Dictionary::from_values(pairs, env.clone())
}

/// Performs the actual HTTP call behind a `request` dict's `.send()` method,
/// returning a response dictionary `{status, headers, body}`.
pub fn http_send(
    url: &str,
    method: &str,
    headers: &HashMap<String, String>,
    body: Option<&str>,
    timeout_ms: Option<u64>,
    env: &Rc<Environment>,
) -> Result<Dictionary, EvalError> {
    let mut req = match method.to_ascii_uppercase().as_str() {
        "GET" => ureq::get(url),
        "POST" => ureq::post(url),
        "PUT" => ureq::put(url),
        "DELETE" => ureq::delete(url),
        "PATCH" => ureq::patch(url),
        other => return Err(EvalError::validation_error(format!("unsupported HTTP method: {other}"))),
    };
    for (k, v) in headers {
        req = req.set(k, v);
    }
    if let Some(ms) = timeout_ms {
        req = req.timeout(Duration::from_millis(ms));
    }
    let response = if let Some(b) = body {
        req.send_string(b)
    } else {
        req.call()
    };
    match response {
        Ok(resp) => {
            let status = resp.status() as i64;
            let body_text = resp.into_string().unwrap_or_default();
            Ok(Dictionary::from_values(
                vec![
                    ("status".to_string(), Value::Integer(status)),
                    ("body".to_string(), Value::str(body_text)),
                ],
                env.clone(),
            ))
        }
        Err(ureq::Error::Status(code, resp)) => {
            let body_text = resp.into_string().unwrap_or_default();
            Ok(Dictionary::from_values(
                vec![
                    ("status".to_string(), Value::Integer(code as i64)),
                    ("body".to_string(), Value::str(body_text)),
                ],
                env.clone(),
            ))
        }
        Err(e) => Err(EvalError::io_unreadable(url, &e.to_string())),
    }
}

pub fn new_handle(handle: Handle) -> Value {
    Value::Handle(Rc::new(RefCell::new(handle)))
}

fn as_handle(v: &Value) -> &Rc<RefCell<Handle>> {
    match v {
        Value::Handle(h) => h,
        _ => unreachable!("registry only dispatches to matching receiver type"),
    }
}

fn require_string_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a str, EvalError> {
    match args.first() {
        Some(Value::String(s)) => Ok(s.as_ref()),
        Some(other) => Err(EvalError::type_error(name, "string", other)),
        None => Err(EvalError::arity_exact(name, 1, 0)),
    }
}

fn with_session<T>(receiver: &Value, name: &str, f: impl FnOnce(&mut SessionHandle) -> T) -> Result<T, EvalError> {
    let handle = as_handle(receiver);
    let mut h = handle.borrow_mut();
    match &mut *h {
        Handle::Session(s) => Ok(f(s)),
        other => Err(EvalError::type_error(name, "session handle", &Value::str(other.kind_name()))),
    }
}

fn handle_get(receiver: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let key = require_string_arg("get", args)?;
    with_session(receiver, "get", |s| s.get(key))
}

fn handle_set(receiver: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let key = require_string_arg("set", args)?.to_string();
    let value = args.get(1).cloned().unwrap_or(Value::Null);
    with_session(receiver, "set", |s| s.set(&key, value))?;
    Ok(Value::Null)
}

fn handle_delete(receiver: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let key = require_string_arg("delete", args)?.to_string();
    with_session(receiver, "delete", |s| s.delete(&key))?;
    Ok(Value::Null)
}

fn handle_clear(receiver: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    with_session(receiver, "clear", |s| s.clear())?;
    Ok(Value::Null)
}

fn handle_has(receiver: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let key = require_string_arg("has", args)?;
    with_session(receiver, "has", |s| Value::Boolean(s.has(key)))
}

fn handle_all(receiver: &Value, _args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    with_session(receiver, "all", |s| Value::Dictionary(Rc::new(s.all(env))))
}

fn handle_get_flash(receiver: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let key = require_string_arg("getFlash", args)?.to_string();
    with_session(receiver, "getFlash", |s| s.get_flash(&key))
}

fn handle_get_all_flash(receiver: &Value, _args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    with_session(receiver, "getAllFlash", |s| Value::Dictionary(Rc::new(s.get_all_flash(env))))
}

fn handle_has_flash(receiver: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let key = require_string_arg("hasFlash", args)?;
    with_session(receiver, "hasFlash", |s| Value::Boolean(s.has_flash(key)))
}

fn handle_set_flash(receiver: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let key = require_string_arg("setFlash", args)?.to_string();
    let value = args.get(1).cloned().unwrap_or(Value::Null);
    with_session(receiver, "setFlash", |s| s.set_flash(&key, value))?;
    Ok(Value::Null)
}

fn handle_regenerate(receiver: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    with_session(receiver, "regenerate", |s| s.regenerate())?;
    Ok(Value::Null)
}

pub fn register_handle_methods(r: &mut Registry) {
    let entries: &[MethodEntry] = &[
        MethodEntry { name: "get", arity: "1", description: "read a session value", func: handle_get },
        MethodEntry { name: "set", arity: "2", description: "write a session value", func: handle_set },
        MethodEntry { name: "delete", arity: "1", description: "remove a session value", func: handle_delete },
        MethodEntry { name: "clear", arity: "0", description: "remove all session values", func: handle_clear },
        MethodEntry { name: "has", arity: "1", description: "test session key presence", func: handle_has },
        MethodEntry { name: "all", arity: "0", description: "snapshot all session values", func: handle_all },
        MethodEntry { name: "setFlash", arity: "2", description: "write a one-request flash value", func: handle_set_flash },
        MethodEntry { name: "getFlash", arity: "1", description: "consume a flash value", func: handle_get_flash },
        MethodEntry {
            name: "getAllFlash",
            arity: "0",
            description: "consume all flash values",
            func: handle_get_all_flash,
        },
        MethodEntry { name: "hasFlash", arity: "1", description: "test flash key presence", func: handle_has_flash },
        MethodEntry {
            name: "regenerate",
            arity: "0",
            description: "reset session data for the current identity",
            func: handle_regenerate,
        },
    ];
    for e in entries {
        r.register(*e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;

    fn session_handle() -> Value {
        new_handle(Handle::Session(SessionHandle::default()))
    }

    #[test]
    fn get_set_delete_clear_round_trip() {
        let env = Environment::new();
        let h = session_handle();
        assert!(handle_get(&h, &[Value::str("a")], &env).unwrap().is_null());
        handle_set(&h, &[Value::str("a"), Value::Integer(1)], &env).unwrap();
        assert!(handle_get(&h, &[Value::str("a")], &env).unwrap().equals(&Value::Integer(1)));
        assert!(handle_has(&h, &[Value::str("a")], &env).unwrap().is_truthy());
        handle_delete(&h, &[Value::str("a")], &env).unwrap();
        assert!(!handle_has(&h, &[Value::str("a")], &env).unwrap().is_truthy());
        handle_set(&h, &[Value::str("b"), Value::Integer(2)], &env).unwrap();
        handle_clear(&h, &[], &env).unwrap();
        match handle_all(&h, &[], &env).unwrap() {
            Value::Dictionary(d) => assert!(d.keys().is_empty()),
            _ => panic!("expected dictionary"),
        }
    }

    #[test]
    fn flash_values_are_consumed_on_read() {
        let env = Environment::new();
        let h = session_handle();
        handle_set_flash(&h, &[Value::str("msg"), Value::str("hi")], &env).unwrap();
        assert!(handle_has_flash(&h, &[Value::str("msg")], &env).unwrap().is_truthy());
        let v = handle_get_flash(&h, &[Value::str("msg")], &env).unwrap();
        assert!(matches!(v, Value::String(s) if &*s == "hi"));
        assert!(!handle_has_flash(&h, &[Value::str("msg")], &env).unwrap().is_truthy());
    }

    #[test]
    fn regenerate_clears_data_and_flash() {
        let env = Environment::new();
        let h = session_handle();
        handle_set(&h, &[Value::str("a"), Value::Integer(1)], &env).unwrap();
        handle_set_flash(&h, &[Value::str("f"), Value::Integer(1)], &env).unwrap();
        handle_regenerate(&h, &[], &env).unwrap();
        assert!(!handle_has(&h, &[Value::str("a")], &env).unwrap().is_truthy());
        assert!(!handle_has_flash(&h, &[Value::str("f")], &env).unwrap().is_truthy());
    }

    #[test]
    fn non_session_handle_rejects_session_methods() {
        let env = Environment::new();
        let h = new_handle(Handle::Module(ModuleHandle { name: "math".to_string() }));
        assert!(handle_get(&h, &[Value::str("a")], &env).is_err());
    }
}
