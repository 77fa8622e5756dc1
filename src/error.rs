// ABOUTME: Structured error model: class/code taxonomy, hints, position, and data map

use crate::ast::Pos;
use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

// ===== Arity spec strings =====
pub const ARITY_ZERO: &str = "0";
pub const ARITY_ONE: &str = "1";
pub const ARITY_TWO: &str = "2";
pub const ARITY_ZERO_OR_ONE: &str = "0-1";
pub const ARITY_ONE_OR_MORE: &str = "1+";
pub const ARITY_TWO_OR_MORE: &str = "2+";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Type,
    Arity,
    Call,
    Undef,
    Loop,
    Import,
    Io,
    Security,
    State,
    Format,
    Validation,
    Operator,
    Internal,
    Part,
    Destructure,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Type => "TYPE",
            ErrorClass::Arity => "ARITY",
            ErrorClass::Call => "CALL",
            ErrorClass::Undef => "UNDEF",
            ErrorClass::Loop => "LOOP",
            ErrorClass::Import => "IMPORT",
            ErrorClass::Io => "IO",
            ErrorClass::Security => "SEC",
            ErrorClass::State => "STATE",
            ErrorClass::Format => "FMT",
            ErrorClass::Validation => "VAL",
            ErrorClass::Operator => "OP",
            ErrorClass::Internal => "INTERNAL",
            ErrorClass::Part => "PART",
            ErrorClass::Destructure => "DEST",
        }
    }
}

/// A first-class error value: stored, inspected, and propagated like any
/// other `Value`. Any evaluator step that receives one in an operand
/// position returns it immediately (§4.4).
#[derive(Debug, Clone)]
pub struct ErrorValue {
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
    pub hints: Vec<String>,
    pub pos: Pos,
    pub data: HashMap<String, Value>,
}

impl ErrorValue {
    pub fn new(class: ErrorClass, code: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorValue {
            class,
            code: code.into(),
            message: message.into(),
            hints: Vec::new(),
            pos: Pos::unknown(),
            data: HashMap::new(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn with_pos(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Printed form: `[<CODE>] <message>` with optional location suffix.
    pub fn printed(&self) -> String {
        let mut s = format!("[{}] {}", self.code, self.message);
        if self.pos.line != 0 {
            if let Some(file) = &self.pos.file {
                s.push_str(&format!(" ({file}:{}:{})", self.pos.line, self.pos.col));
            } else {
                s.push_str(&format!(" (:{}:{})", self.pos.line, self.pos.col));
            }
        }
        s
    }
}

/// Internal Rust-level error type used by fallible evaluator operations.
/// Converts to `ErrorValue`/`Value::Error` at the evaluator boundary so the
/// language's own error-as-value semantics are preserved.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct EvalError(pub ErrorValue);

impl std::fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.printed())
    }
}

impl EvalError {
    pub fn into_value(self) -> Value {
        Value::Error(Rc::new(self.0))
    }

    pub fn with_pos(mut self, pos: Pos) -> Self {
        if self.0.pos.line == 0 {
            self.0.pos = pos;
        }
        self
    }

    pub fn code(&self) -> &str {
        &self.0.code
    }

    // ===== Type errors =====
    pub fn type_error(function: &str, expected: &str, actual: &Value) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Type,
            "TYPE-0001",
            format!("{function}: expected {expected}, got {}", actual.type_name()),
        ))
    }

    pub fn type_error_nth(function: &str, nth: usize, expected: &str, actual: &Value) -> Self {
        let code = match nth {
            0 => "TYPE-0001",
            1 => "TYPE-0002",
            _ => "TYPE-0003",
        };
        EvalError(ErrorValue::new(
            ErrorClass::Type,
            code,
            format!(
                "{function}: argument {nth} expected {expected}, got {}",
                actual.type_name()
            ),
        ))
    }

    pub fn overflow(function: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Type,
            "TYPE-0006",
            format!("{function}: integer overflow"),
        ))
    }

    // ===== Arity errors =====
    pub fn arity_exact(function: &str, expected: usize, actual: usize) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Arity,
            "ARITY-0001",
            format!("{function}: expected {expected} argument(s), got {actual}"),
        ))
    }

    pub fn arity_range(function: &str, min: usize, max: usize, actual: usize) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Arity,
            "ARITY-0004",
            format!("{function}: expected {min}-{max} arguments, got {actual}"),
        ))
    }

    pub fn arity_min(function: &str, min: usize, actual: usize) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Arity,
            "ARITY-0005",
            format!("{function}: expected at least {min} arguments, got {actual}"),
        ))
    }

    pub fn arity_choice(function: &str, a: usize, b: usize, actual: usize) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Arity,
            "ARITY-0006",
            format!("{function}: expected {a} or {b} arguments, got {actual}"),
        ))
    }

    // ===== Call errors =====
    pub fn not_callable(actual: &Value) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Call,
            "CALL-0001",
            format!("value of type {} is not callable", actual.type_name()),
        ))
    }

    pub fn wrong_kind_callable(actual: &Value) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Call,
            "CALL-0002",
            format!("{} cannot be called this way", actual.type_name()),
        ))
    }

    pub fn null_call() -> Self {
        EvalError(ErrorValue::new(ErrorClass::Call, "CALL-0003", "cannot call null"))
    }

    // ===== Undef errors =====
    pub fn undefined_name(name: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Undef,
            "UNDEF-0001",
            format!("undefined name: {name}"),
        ))
    }

    pub fn undefined_method(type_name: &str, method: &str, known: &[String]) -> Self {
        let mut err = ErrorValue::new(
            ErrorClass::Undef,
            "UNDEF-0002",
            format!("{type_name} has no method or property `{method}`"),
        );
        if let Some(suggestion) = fuzzy_suggest(method, known) {
            err = err.with_hint(format!("did you mean `{suggestion}`?"));
        }
        EvalError(err)
    }

    pub fn undefined_component(name: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Undef,
            "UNDEF-0003",
            format!("unknown component: {name}"),
        ))
    }

    pub fn method_as_property(type_name: &str, method: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Undef,
            "UNDEF-0002",
            format!(
                "`{method}` is a method of {type_name}; call it with parentheses, e.g. `.{method}()`"
            ),
        ))
    }

    // ===== Loop errors =====
    pub fn stop_outside_loop() -> Self {
        EvalError(ErrorValue::new(ErrorClass::Loop, "LOOP-0008", "`stop` used outside a loop"))
    }

    pub fn skip_outside_loop() -> Self {
        EvalError(ErrorValue::new(ErrorClass::Loop, "LOOP-0009", "`skip` used outside a loop"))
    }

    // ===== Import errors =====
    pub fn circular_import(path: &str) -> Self {
        EvalError(
            ErrorValue::new(ErrorClass::Import, "IMPORT-0002", format!("circular import: {path}"))
                .with_data("path", Value::str(path)),
        )
    }

    pub fn import_resolve_failed(path: &str, reason: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Import,
            "IMPORT-0004",
            format!("could not resolve import `{path}`: {reason}"),
        ))
    }

    // ===== IO errors =====
    pub fn io_not_found(path: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Io,
            "IO-0002",
            format!("file not found: {path}"),
        ))
    }

    pub fn io_unreadable(path: &str, reason: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Io,
            "IO-0003",
            format!("could not read {path}: {reason}"),
        ))
    }

    pub fn io_write_failed(path: &str, reason: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Io,
            "IO-0004",
            format!("could not write {path}: {reason}"),
        ))
    }

    pub fn io_delete_failed(path: &str, reason: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Io,
            "IO-0005",
            format!("could not delete {path}: {reason}"),
        ))
    }

    pub fn io_path_resolution_failed(path: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Io,
            "IO-0007",
            format!("could not resolve path: {path}"),
        ))
    }

    // ===== Security errors =====
    pub fn security_generic(reason: &str) -> Self {
        EvalError(ErrorValue::new(ErrorClass::Security, "SEC-0001", reason.to_string()))
    }

    pub fn security_read_denied(path: &str) -> Self {
        EvalError(
            ErrorValue::new(ErrorClass::Security, "SEC-0002", format!("read denied: {path}"))
                .with_data("path", Value::str(path)),
        )
    }

    pub fn security_write_denied(path: &str) -> Self {
        EvalError(
            ErrorValue::new(ErrorClass::Security, "SEC-0003", format!("write denied: {path}"))
                .with_data("path", Value::str(path)),
        )
    }

    pub fn security_execute_denied(path: &str) -> Self {
        EvalError(
            ErrorValue::new(ErrorClass::Security, "SEC-0004", format!("execute denied: {path}"))
                .with_data("path", Value::str(path)),
        )
    }

    // ===== State errors =====
    pub fn used_after_close(kind: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::State,
            "STATE-0002",
            format!("{kind} used after close"),
        ))
    }

    // ===== Format / Validation / Operator / Internal / Part / Destructure =====
    pub fn format_error(what: &str, reason: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Format,
            "FMT-0001",
            format!("could not decode {what}: {reason}"),
        ))
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        EvalError(ErrorValue::new(ErrorClass::Validation, "VAL-0001", message.into()))
    }

    pub fn operator_misuse(message: impl Into<String>) -> Self {
        EvalError(ErrorValue::new(ErrorClass::Operator, "OP-0001", message.into()))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        EvalError(ErrorValue::new(ErrorClass::Internal, "INTERNAL-0001", message.into()))
    }

    pub fn part_export_not_function(name: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Part,
            "PART-0001",
            format!("part module export `{name}` is not a function"),
        ))
    }

    pub fn destructure_not_dict(actual: &Value) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Destructure,
            "DEST-0001",
            format!("cannot destructure {} as a dictionary pattern", actual.type_name()),
        ))
    }

    pub fn protected_binding(name: &str) -> Self {
        EvalError(ErrorValue::new(
            ErrorClass::Internal,
            "INTERNAL-0001",
            format!("`{name}` is a protected binding and cannot be reassigned"),
        ))
    }
}

/// Smallest-edit-distance suggestion among known names, used to enrich
/// `UNDEF-0002` with a "did you mean" hint.
fn fuzzy_suggest(name: &str, known: &[String]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(name, k)))
        .filter(|(_, d)| *d <= 2)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| k.clone())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printed_form_includes_code_and_message() {
        let e = EvalError::undefined_name("foo");
        assert_eq!(e.0.printed(), "[UNDEF-0001] undefined name: foo");
    }

    #[test]
    fn printed_form_includes_position_when_set() {
        let e = EvalError::undefined_name("foo").with_pos(Pos {
            file: Some(Rc::from("main.pars")),
            line: 3,
            col: 5,
        });
        assert_eq!(e.0.printed(), "[UNDEF-0001] undefined name: foo (main.pars:3:5)");
    }

    #[test]
    fn fuzzy_suggest_finds_close_match() {
        let known = vec!["length".to_string(), "keys".to_string()];
        assert_eq!(fuzzy_suggest("lenght", &known), Some("length".to_string()));
    }

    #[test]
    fn undefined_method_hints_suggestion() {
        let known = vec!["basename".to_string()];
        let e = EvalError::undefined_method("path", "basenam", &known);
        assert_eq!(e.0.hints.len(), 1);
    }
}
