// ABOUTME: Declarative per-type method registry: sole source of truth for dispatch, arity, introspection

use crate::env::Environment;
use crate::error::EvalError;
use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;

pub type MethodFn = fn(&Value, &[Value], &Rc<Environment>) -> Result<Value, EvalError>;

#[derive(Clone, Copy)]
pub struct MethodEntry {
    pub name: &'static str,
    pub arity: &'static str,
    pub description: &'static str,
    pub func: MethodFn,
}

pub struct Registry {
    entries: HashMap<&'static str, MethodEntry>,
}

impl Registry {
    fn new() -> Self {
        Registry { entries: HashMap::new() }
    }

    pub(crate) fn register(&mut self, entry: MethodEntry) {
        self.entries.insert(entry.name, entry);
    }

    pub fn get(&self, name: &str) -> Option<&MethodEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().map(|s| s.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    Min(usize),
}

/// Parses an arity spec string: exact (`"0"`), range (`"0-1"`), or open
/// minimum (`"1+"`).
pub fn parse_arity(spec: &str) -> Arity {
    if let Some(stripped) = spec.strip_suffix('+') {
        return Arity::Min(stripped.parse().unwrap_or(0));
    }
    if let Some((lo, hi)) = spec.split_once('-') {
        return Arity::Range(lo.parse().unwrap_or(0), hi.parse().unwrap_or(0));
    }
    Arity::Exact(spec.parse().unwrap_or(0))
}

pub fn check_arity(function: &str, spec: &str, actual: usize) -> Result<(), EvalError> {
    match parse_arity(spec) {
        Arity::Exact(n) => {
            if actual != n {
                return Err(EvalError::arity_exact(function, n, actual));
            }
        }
        Arity::Range(lo, hi) => {
            if actual < lo || actual > hi {
                return Err(EvalError::arity_range(function, lo, hi, actual));
            }
        }
        Arity::Min(n) => {
            if actual < n {
                return Err(EvalError::arity_min(function, n, actual));
            }
        }
    }
    Ok(())
}

macro_rules! registry_table {
    ($name:ident, $builder:expr) => {
        pub fn $name() -> &'static Registry {
            static CELL: OnceLock<Registry> = OnceLock::new();
            CELL.get_or_init(|| {
                let mut r = Registry::new();
                $builder(&mut r);
                r
            })
        }
    };
}

registry_table!(array_registry, crate::eval::builtins::register_array_methods);
registry_table!(string_registry, crate::eval::builtins::register_string_methods);
registry_table!(dict_registry, crate::eval::builtins::register_dict_methods);
registry_table!(table_registry, crate::stdlib::table::register_table_methods);
registry_table!(mddoc_registry, crate::stdlib::markdown::register_mddoc_methods);
registry_table!(handle_registry, crate::shims::register_handle_methods);

/// Looks up the registry for a value's type tag; types without a migrated
/// registry (money, unit, record, …) fall back to the evaluator's legacy
/// per-type switch, per §9 "Method dispatch table".
pub fn registry_for(type_name: &str) -> Option<&'static Registry> {
    match type_name {
        "array" => Some(array_registry()),
        "string" => Some(string_registry()),
        "dictionary" | "path" | "url" | "regex" | "datetime" | "duration" | "file" | "dir" | "request" | "tag" | "part" => {
            Some(dict_registry())
        }
        "table" => Some(table_registry()),
        "mdDoc" => Some(mddoc_registry()),
        "handle" => Some(handle_registry()),
        _ => None,
    }
}

/// Dispatches `receiver.name(args)` through the registry for its type.
/// Returns `None` when the type has no matching entry (caller falls back
/// to computed-property / legacy dispatch per §4.1.4).
pub fn dispatch(
    receiver: &Value,
    name: &str,
    args: &[Value],
    env: &Rc<Environment>,
) -> Option<Result<Value, EvalError>> {
    let reg = registry_for(receiver.type_name())?;
    let entry = reg.get(name)?;
    if let Err(e) = check_arity(name, entry.arity, args.len()) {
        return Some(Err(e));
    }
    Some((entry.func)(receiver, args, env))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_range_and_open_arity() {
        assert_eq!(parse_arity("0"), Arity::Exact(0));
        assert_eq!(parse_arity("0-1"), Arity::Range(0, 1));
        assert_eq!(parse_arity("1+"), Arity::Min(1));
    }

    #[test]
    fn arity_check_passes_at_minimum_and_fails_below() {
        assert!(check_arity("f", "1+", 1).is_ok());
        assert!(check_arity("f", "1+", 0).is_err());
        assert!(check_arity("f", "2-3", 2).is_ok());
        assert!(check_arity("f", "2-3", 4).is_err());
    }
}
