// ABOUTME: Module loader: path resolution, cycle detection, process-wide cache, context inheritance

use crate::ast;
use crate::env::Environment;
use crate::error::EvalError;
use crate::value::{Dictionary, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::OnceLock;

/// Parses a module's source text into a program. The evaluator core never
/// ships a lexer/parser; the host installs one via [`install_parser`] before
/// the first filesystem import is attempted.
pub type ParseFn = fn(&str) -> Result<Vec<ast::SStmt>, EvalError>;

static PARSER: OnceLock<ParseFn> = OnceLock::new();

pub fn install_parser(f: ParseFn) {
    let _ = PARSER.set(f);
}

// Module cache, keyed by normalised path. Append-only for the thread's
// lifetime; invalidation on file change is out of scope. Thread-local
// because `Value` holds `Rc` internals and is not `Sync`.
thread_local! {
    static MODULE_CACHE: RefCell<HashMap<String, Value>> = RefCell::new(HashMap::new());
}

enum Resolved {
    Stdlib(String),
    Filesystem(PathBuf),
}

fn resolve_path(raw: &str, env: &Rc<Environment>) -> Result<Resolved, EvalError> {
    if let Some(rest) = raw.strip_prefix("std/").or(if raw == "std" { Some("") } else { None }) {
        return Ok(Resolved::Stdlib(rest.to_string()));
    }
    if raw.starts_with("basil/") || raw == "basil" {
        return Err(EvalError::import_resolve_failed(raw, "framework modules are a host-provided prelude"));
    }
    let candidate = if let Some(rest) = raw.strip_prefix("~/") {
        let root = env.context.borrow().root_path.clone();
        match root {
            Some(r) => Path::new(r.as_ref()).join(rest),
            None => return Err(EvalError::import_resolve_failed(raw, "no root path configured for ~/ import")),
        }
    } else {
        let base = env
            .context
            .borrow()
            .filename
            .as_ref()
            .and_then(|f| Path::new(f.as_ref()).parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join(raw)
    };
    Ok(Resolved::Filesystem(candidate))
}

fn stdlib_module(name: &str, env: &Rc<Environment>) -> Result<Value, EvalError> {
    let dict = match name {
        "json" => crate::stdlib::json::module(env),
        "id" => crate::stdlib::id::module(env),
        "math" => crate::stdlib::math::module(env),
        "table" => crate::stdlib::table::module(env),
        "markdown" => crate::stdlib::markdown::module(env),
        "typed" => crate::stdlib::typed::module(env),
        "session" => crate::stdlib::session::module(env),
        "html" => crate::stdlib::html::module(env),
        other => return Err(EvalError::import_resolve_failed(other, "no such stdlib module")),
    };
    Ok(Value::Dictionary(Rc::new(dict)))
}

fn is_part_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("part")
}

fn import_stack(env: &Rc<Environment>) -> Rc<std::cell::RefCell<std::collections::HashSet<String>>> {
    let existing = env.context.borrow().import_stack.clone();
    if let Some(stack) = existing {
        return stack;
    }
    let stack = Rc::new(std::cell::RefCell::new(std::collections::HashSet::new()));
    env.context.borrow_mut().import_stack = Some(stack.clone());
    stack
}

/// Implements §4.1.8: normalise, cycle-check, cache-check, evaluate, cache.
pub fn import(raw_path: &str, env: &Rc<Environment>) -> Result<Value, EvalError> {
    let resolved = resolve_path(raw_path, env)?;
    let (cache_key, fs_path) = match resolved {
        Resolved::Stdlib(name) => (format!("std/{name}"), None),
        Resolved::Filesystem(path) => {
            let canonical = crate::sandbox::check_path_access(env, &path, crate::sandbox::Operation::Execute)?;
            (canonical.display().to_string(), Some(canonical))
        }
    };

    if let Some(hit) = MODULE_CACHE.with(|c| c.borrow().get(&cache_key).cloned()) {
        log::debug!("module cache hit: {cache_key}");
        return Ok(hit);
    }
    log::debug!("module cache miss: {cache_key}");

    let stack = import_stack(env);
    if !stack.borrow_mut().insert(cache_key.clone()) {
        return Err(EvalError::circular_import(&cache_key));
    }
    let result = load_module(&cache_key, fs_path.as_deref(), env);
    stack.borrow_mut().remove(&cache_key);

    let module = result?;
    MODULE_CACHE.with(|c| c.borrow_mut().insert(cache_key, module.clone()));
    Ok(module)
}

fn load_module(cache_key: &str, fs_path: Option<&Path>, env: &Rc<Environment>) -> Result<Value, EvalError> {
    let Some(path) = fs_path else {
        let name = cache_key.strip_prefix("std/").unwrap_or(cache_key);
        return stdlib_module(name, env);
    };

    let source = std::fs::read_to_string(path)
        .map_err(|_| EvalError::import_resolve_failed(&path.display().to_string(), "could not read module source"))?;
    let parser = PARSER
        .get()
        .ok_or_else(|| EvalError::internal("no parser installed for filesystem imports"))?;
    let program = parser(&source)?;

    let module_env = Environment::with_parent(env.clone());
    module_env.context.borrow_mut().filename = Some(Rc::from(path.display().to_string()));

    let basil = env.get("basil").0;
    module_env.define_protected("basil", basil);

    let outcome = crate::eval::eval_program(&program, &module_env);
    if outcome.is_error() {
        return Ok(outcome);
    }

    let exports = module_env.exported_names();
    let dict = Dictionary::from_values(exports, module_env.clone());

    if is_part_file(path) {
        dict.set("__type", Value::str("part"));
        for key in dict.keys() {
            if key == "__type" {
                continue;
            }
            let v = dict.get(&key)?;
            if !matches!(v, Value::Function(_) | Value::BuiltIn(_)) {
                return Err(EvalError::part_export_not_function(&key));
            }
        }
    }

    Ok(Value::Dictionary(Rc::new(dict)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdlib_import_resolves_to_module_dictionary() {
        let env = Environment::new();
        let v = import("std/math", &env).unwrap();
        match v {
            Value::Dictionary(d) => assert!(d.has("abs")),
            _ => panic!("expected dictionary"),
        }
    }

    #[test]
    fn repeated_stdlib_import_returns_cached_dictionary() {
        let env = Environment::new();
        let a = import("std/json", &env).unwrap();
        let b = import("std/json", &env).unwrap();
        match (a, b) {
            (Value::Dictionary(a), Value::Dictionary(b)) => assert!(Rc::ptr_eq(&a, &b)),
            _ => panic!("expected dictionaries"),
        }
    }

    #[test]
    fn basil_framework_path_is_rejected() {
        let env = Environment::new();
        assert!(import("basil/http", &env).is_err());
    }
}
