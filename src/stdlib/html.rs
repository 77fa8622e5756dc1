// ABOUTME: Prelude component rendering, exposed as the std/html module; the component library itself is a host callback

use crate::env::Environment;
use crate::error::EvalError;
use crate::value::{BuiltinFn, Dictionary, Value};
use std::rc::Rc;
use std::sync::OnceLock;

/// A host-supplied component renderer: given a component name and a props
/// dictionary, returns rendered HTML text. The prelude component library
/// itself is an out-of-scope collaborator; this crate only defines the seam.
pub type RenderFn = fn(&str, &Dictionary) -> Result<String, EvalError>;

static RENDERER: OnceLock<RenderFn> = OnceLock::new();

pub fn install_renderer(f: RenderFn) {
    let _ = RENDERER.set(f);
}

fn html_render(args: &[Value]) -> Result<Value, EvalError> {
    let name = match args.first() {
        Some(Value::String(s)) => s.as_ref(),
        Some(other) => return Err(EvalError::type_error("render", "string", other)),
        None => return Err(EvalError::arity_exact("render", 2, args.len())),
    };
    let props = match args.get(1) {
        Some(Value::Dictionary(d)) => d.clone(),
        Some(other) => return Err(EvalError::type_error_nth("render", 2, "dictionary", other)),
        None => return Err(EvalError::arity_exact("render", 2, args.len())),
    };
    let renderer = RENDERER
        .get()
        .ok_or_else(|| EvalError::internal("no html renderer installed for std/html"))?;
    Ok(Value::str(renderer(name, &props)?))
}

fn html_escape(args: &[Value]) -> Result<Value, EvalError> {
    let s = match args.first() {
        Some(Value::String(s)) => s.as_ref(),
        Some(other) => return Err(EvalError::type_error("escape", "string", other)),
        None => return Err(EvalError::arity_exact("escape", 1, 0)),
    };
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    Ok(Value::str(out))
}

pub fn module(env: &Rc<Environment>) -> Dictionary {
    Dictionary::from_values(
        vec![
            ("render".to_string(), Value::BuiltIn(BuiltinFn::Plain(html_render))),
            ("escape".to_string(), Value::BuiltIn(BuiltinFn::Plain(html_escape))),
        ],
        env.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_replaces_the_five_reserved_characters() {
        let v = html_escape(&[Value::str("<a href=\"x\">M&M's</a>")]).unwrap();
        assert!(matches!(v, Value::String(s) if &*s == "&lt;a href=&quot;x&quot;&gt;M&amp;M&#39;s&lt;/a&gt;"));
    }

    #[test]
    fn render_errors_when_no_renderer_is_installed() {
        let d = Dictionary::from_values(vec![], Environment::new());
        assert!(html_render(&[Value::str("Button"), Value::Dictionary(Rc::new(d))]).is_err());
    }
}
