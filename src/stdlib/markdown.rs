// ABOUTME: markdown parser to an AST dictionary tree, plus query/render/transform methods

use crate::env::Environment;
use crate::error::EvalError;
use crate::registry::{MethodEntry, Registry};
use crate::value::{BuiltinFn, Dictionary, MdDocValue, Value};
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser, Tag};
use std::rc::Rc;

fn node(kind: &str, fields: Vec<(String, Value)>, children: Vec<Value>, env: &Rc<Environment>) -> Value {
    let mut pairs = vec![("type".to_string(), Value::str(kind))];
    pairs.extend(fields);
    pairs.push(("children".to_string(), Value::array(children)));
    Value::Dictionary(Rc::new(Dictionary::from_values(pairs, env.clone())))
}

fn heading_level_num(level: HeadingLevel) -> i64 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

struct Frame {
    kind: String,
    fields: Vec<(String, Value)>,
    children: Vec<Value>,
}

/// Builds the dictionary AST tree for a markdown source string.
fn parse_tree(source: &str, env: &Rc<Environment>) -> Value {
    let mut stack = vec![Frame { kind: "document".to_string(), fields: Vec::new(), children: Vec::new() }];
    for event in Parser::new(source) {
        match event {
            Event::Start(tag) => {
                let (kind, fields) = match tag {
                    Tag::Paragraph => ("paragraph".to_string(), vec![]),
                    Tag::Heading { level, .. } => {
                        ("heading".to_string(), vec![("level".to_string(), Value::Integer(heading_level_num(level)))])
                    }
                    Tag::BlockQuote(_) => ("blockquote".to_string(), vec![]),
                    Tag::CodeBlock(kind) => {
                        let lang = match kind {
                            CodeBlockKind::Fenced(lang) => lang.to_string(),
                            CodeBlockKind::Indented => String::new(),
                        };
                        ("codeBlock".to_string(), vec![("lang".to_string(), Value::str(lang))])
                    }
                    Tag::HtmlBlock => ("htmlBlock".to_string(), vec![]),
                    Tag::List(start) => (
                        "list".to_string(),
                        vec![("ordered".to_string(), Value::Boolean(start.is_some())), ("start".to_string(), start.map(|n| Value::Integer(n as i64)).unwrap_or(Value::Null))],
                    ),
                    Tag::Item => ("listItem".to_string(), vec![]),
                    Tag::Table(_) => ("table".to_string(), vec![]),
                    Tag::TableHead => ("tableHead".to_string(), vec![]),
                    Tag::TableRow => ("tableRow".to_string(), vec![]),
                    Tag::TableCell => ("tableCell".to_string(), vec![]),
                    Tag::Emphasis => ("emphasis".to_string(), vec![]),
                    Tag::Strong => ("strong".to_string(), vec![]),
                    Tag::Strikethrough => ("strikethrough".to_string(), vec![]),
                    Tag::Link { dest_url, title, .. } => (
                        "link".to_string(),
                        vec![("url".to_string(), Value::str(dest_url.to_string())), ("title".to_string(), Value::str(title.to_string()))],
                    ),
                    Tag::Image { dest_url, title, .. } => (
                        "image".to_string(),
                        vec![("url".to_string(), Value::str(dest_url.to_string())), ("title".to_string(), Value::str(title.to_string()))],
                    ),
                    _ => ("block".to_string(), vec![]),
                };
                stack.push(Frame { kind, fields, children: Vec::new() });
            }
            Event::End(_) => {
                if let Some(frame) = stack.pop() {
                    let built = node(&frame.kind, frame.fields, frame.children, env);
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(built);
                    } else {
                        stack.push(Frame { kind: "document".to_string(), fields: Vec::new(), children: vec![built] });
                    }
                }
            }
            Event::Text(text) => {
                let leaf = node("text", vec![("value".to_string(), Value::str(text.to_string()))], vec![], env);
                stack.last_mut().unwrap().children.push(leaf);
            }
            Event::Code(text) => {
                let leaf = node("code", vec![("value".to_string(), Value::str(text.to_string()))], vec![], env);
                stack.last_mut().unwrap().children.push(leaf);
            }
            Event::SoftBreak | Event::HardBreak => {
                let leaf = node("break", vec![], vec![], env);
                stack.last_mut().unwrap().children.push(leaf);
            }
            Event::Rule => {
                let leaf = node("rule", vec![], vec![], env);
                stack.last_mut().unwrap().children.push(leaf);
            }
            _ => {}
        }
    }
    let root = stack.pop().unwrap_or(Frame { kind: "document".to_string(), fields: Vec::new(), children: Vec::new() });
    node(&root.kind, root.fields, root.children, env)
}

fn md_parse(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_exact("markdown.parse", 1, args.len()));
    }
    let text = match &args[0] {
        Value::String(s) => s.to_string(),
        other => return Err(EvalError::type_error_nth("markdown.parse", 1, "string", other)),
    };
    let env = Environment::new();
    let tree = parse_tree(&text, &env);
    let tree_dict = match tree {
        Value::Dictionary(d) => d,
        _ => unreachable!("parse_tree always returns a Dictionary"),
    };
    let doc = Dictionary::from_values(
        vec![("type".to_string(), Value::str("document")), ("children".to_string(), tree_dict.get("children")?), ("source".to_string(), Value::str(text))],
        env.clone(),
    );
    Ok(Value::MdDoc(Rc::new(MdDocValue { doc: Rc::new(doc), env })))
}

fn node_type(v: &Value) -> Option<String> {
    match v {
        Value::Dictionary(d) => match d.get("type").ok()? {
            Value::String(s) => Some(s.to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn node_children(v: &Value) -> Vec<Value> {
    match v {
        Value::Dictionary(d) => match d.get("children") {
            Ok(Value::Array(items)) => items.borrow().clone(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

enum Selector<'a> {
    TypeName(String),
    Predicate(&'a Value, &'a Rc<Environment>),
}

fn matches_selector(node: &Value, selector: &Selector) -> Result<bool, EvalError> {
    match selector {
        Selector::TypeName(name) => Ok(node_type(node).as_deref() == Some(name.as_str())),
        Selector::Predicate(f, env) => {
            let r = crate::eval::apply_function((*f).clone(), vec![node.clone()], None, env)?;
            Ok(r.is_truthy())
        }
    }
}

fn collect_matches(node: &Value, selector: &Selector, out: &mut Vec<Value>) -> Result<(), EvalError> {
    if matches_selector(node, selector)? {
        out.push(node.clone());
    }
    for child in node_children(node) {
        collect_matches(&child, selector, out)?;
    }
    Ok(())
}

fn find_first_match(node: &Value, selector: &Selector) -> Result<Option<Value>, EvalError> {
    if matches_selector(node, selector)? {
        return Ok(Some(node.clone()));
    }
    for child in node_children(node) {
        if let Some(found) = find_first_match(&child, selector)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn root_node(recv: &Value) -> Value {
    match recv {
        Value::MdDoc(m) => Value::Dictionary(m.doc.clone()),
        other => other.clone(),
    }
}

fn selector_from_arg<'a>(arg: &'a Value, env: &'a Rc<Environment>) -> Selector<'a> {
    match arg {
        Value::String(s) => Selector::TypeName(s.to_string()),
        f => Selector::Predicate(f, env),
    }
}

fn md_find_all(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let selector = selector_from_arg(&args[0], env);
    let mut out = Vec::new();
    for child in node_children(&root_node(recv)) {
        collect_matches(&child, &selector, &mut out)?;
    }
    Ok(Value::array(out))
}

fn md_find_first(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let selector = selector_from_arg(&args[0], env);
    for child in node_children(&root_node(recv)) {
        if let Some(found) = find_first_match(&child, &selector)? {
            return Ok(found);
        }
    }
    Ok(Value::Null)
}

fn by_type(recv: &Value, type_name: &str) -> Result<Value, EvalError> {
    let selector = Selector::TypeName(type_name.to_string());
    let mut out = Vec::new();
    for child in node_children(&root_node(recv)) {
        collect_matches(&child, &selector, &mut out)?;
    }
    Ok(Value::array(out))
}

fn md_headings(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    by_type(recv, "heading")
}

fn md_links(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    by_type(recv, "link")
}

fn md_images(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    by_type(recv, "image")
}

fn md_code_blocks(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    by_type(recv, "codeBlock")
}

fn text_of(node: &Value) -> String {
    match node_type(node).as_deref() {
        Some("text") | Some("code") => match node {
            Value::Dictionary(d) => d.get("value").ok().map(|v| v.to_string()).unwrap_or_default(),
            _ => String::new(),
        },
        _ => node_children(node).iter().map(text_of).collect::<Vec<_>>().join(""),
    }
}

fn slugify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else if c.is_whitespace() { '-' } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn md_toc(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let min_level = match args.first() {
        Some(Value::Integer(n)) => *n,
        Some(Value::Null) | None => 1,
        Some(other) => return Err(EvalError::type_error_nth("toc", 1, "integer", other)),
    };
    let max_level = match args.get(1) {
        Some(Value::Integer(n)) => *n,
        Some(Value::Null) | None => 6,
        Some(other) => return Err(EvalError::type_error_nth("toc", 2, "integer", other)),
    };
    let headings = md_headings(recv, &[], env)?;
    let items = match headings {
        Value::Array(items) => items.borrow().clone(),
        _ => Vec::new(),
    };
    let mut out = Vec::new();
    for h in items {
        let level = match &h {
            Value::Dictionary(d) => match d.get("level")? {
                Value::Integer(n) => n,
                _ => 0,
            },
            _ => 0,
        };
        if level < min_level || level > max_level {
            continue;
        }
        let text = text_of(&h);
        let entry = Dictionary::from_values(
            vec![("level".to_string(), Value::Integer(level)), ("text".to_string(), Value::str(text.clone())), ("id".to_string(), Value::str(slugify(&text)))],
            env.clone(),
        );
        out.push(Value::Dictionary(Rc::new(entry)));
    }
    Ok(Value::array(out))
}

fn md_to_html(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let source = match recv {
        Value::MdDoc(m) => m.doc.get("source").unwrap_or(Value::str("")).to_string(),
        other => return Err(EvalError::type_error("toHTML", "markdown document", other)),
    };
    let mut out = String::new();
    pulldown_cmark::html::push_html(&mut out, Parser::new(&source));
    Ok(Value::str(out))
}

fn render_markdown(n: &Value) -> String {
    match node_type(n).as_deref() {
        Some("document") => node_children(n).iter().map(render_markdown).collect::<Vec<_>>().join("\n\n"),
        Some("paragraph") => node_children(n).iter().map(render_markdown).collect::<Vec<_>>().join(""),
        Some("heading") => {
            let level = match n {
                Value::Dictionary(d) => d.get("level").ok().map(|v| v.to_string()).unwrap_or_default(),
                _ => String::new(),
            };
            let hashes = "#".repeat(level.parse::<usize>().unwrap_or(1));
            format!("{hashes} {}", node_children(n).iter().map(render_markdown).collect::<Vec<_>>().join(""))
        }
        Some("text") => text_of(n),
        Some("code") => format!("`{}`", text_of(n)),
        Some("emphasis") => format!("*{}*", node_children(n).iter().map(render_markdown).collect::<Vec<_>>().join("")),
        Some("strong") => format!("**{}**", node_children(n).iter().map(render_markdown).collect::<Vec<_>>().join("")),
        Some("link") => {
            let url = match n {
                Value::Dictionary(d) => d.get("url").ok().map(|v| v.to_string()).unwrap_or_default(),
                _ => String::new(),
            };
            format!("[{}]({url})", node_children(n).iter().map(render_markdown).collect::<Vec<_>>().join(""))
        }
        Some("codeBlock") => {
            let lang = match n {
                Value::Dictionary(d) => d.get("lang").ok().map(|v| v.to_string()).unwrap_or_default(),
                _ => String::new(),
            };
            format!("```{lang}\n{}```", node_children(n).iter().map(render_markdown).collect::<Vec<_>>().join(""))
        }
        Some("break") => "\n".to_string(),
        Some("rule") => "---".to_string(),
        _ => node_children(n).iter().map(render_markdown).collect::<Vec<_>>().join(""),
    }
}

fn md_to_markdown(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    Ok(Value::str(render_markdown(&root_node(recv))))
}

fn walk_visit(n: &Value, f: &Value, env: &Rc<Environment>) -> Result<(), EvalError> {
    crate::eval::apply_function(f.clone(), vec![n.clone()], None, env)?;
    for child in node_children(n) {
        walk_visit(&child, f, env)?;
    }
    Ok(())
}

fn md_walk(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    walk_visit(&root_node(recv), &args[0], env)?;
    Ok(Value::Null)
}

fn map_node(n: &Value, f: &Value, env: &Rc<Environment>) -> Result<Value, EvalError> {
    let mapped = crate::eval::apply_function(f.clone(), vec![n.clone()], None, env)?;
    let base = if mapped.is_null() { n.clone() } else { mapped };
    let kind = node_type(&base).unwrap_or_default();
    let children = node_children(&base)
        .iter()
        .map(|c| map_node(c, f, env))
        .collect::<Result<Vec<_>, _>>()?;
    let fields = match &base {
        Value::Dictionary(d) => d
            .keys()
            .into_iter()
            .filter(|k| k != "type" && k != "children")
            .map(|k| Ok((k.clone(), d.get(&k)?)))
            .collect::<Result<Vec<_>, EvalError>>()?,
        _ => Vec::new(),
    };
    Ok(node(&kind, fields, children, env))
}

fn md_map(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let mapped = map_node(&root_node(recv), &args[0], env)?;
    let doc = match mapped {
        Value::Dictionary(d) => d,
        _ => unreachable!(),
    };
    Ok(Value::MdDoc(Rc::new(MdDocValue { doc, env: env.clone() })))
}

fn filter_node(n: &Value, f: &Value, env: &Rc<Environment>) -> Result<Option<Value>, EvalError> {
    let keep = crate::eval::apply_function(f.clone(), vec![n.clone()], None, env)?;
    if !keep.is_truthy() {
        return Ok(None);
    }
    let kind = node_type(n).unwrap_or_default();
    let mut children = Vec::new();
    for c in node_children(n) {
        if let Some(kept) = filter_node(&c, f, env)? {
            children.push(kept);
        }
    }
    let fields = match n {
        Value::Dictionary(d) => d
            .keys()
            .into_iter()
            .filter(|k| k != "type" && k != "children")
            .map(|k| Ok((k.clone(), d.get(&k)?)))
            .collect::<Result<Vec<_>, EvalError>>()?,
        _ => Vec::new(),
    };
    Ok(Some(node(&kind, fields, children, env)))
}

fn md_filter(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let filtered = filter_node(&root_node(recv), &args[0], env)?.unwrap_or_else(|| node("document", vec![], vec![], env));
    let doc = match filtered {
        Value::Dictionary(d) => d,
        _ => unreachable!(),
    };
    Ok(Value::MdDoc(Rc::new(MdDocValue { doc, env: env.clone() })))
}

pub fn register_mddoc_methods(r: &mut Registry) {
    let entries: &[MethodEntry] = &[
        MethodEntry { name: "findAll", arity: "1", description: "find every node matching a type name or predicate", func: md_find_all },
        MethodEntry { name: "findFirst", arity: "1", description: "find the first matching node", func: md_find_first },
        MethodEntry { name: "headings", arity: "0", description: "all heading nodes", func: md_headings },
        MethodEntry { name: "links", arity: "0", description: "all link nodes", func: md_links },
        MethodEntry { name: "images", arity: "0", description: "all image nodes", func: md_images },
        MethodEntry { name: "codeBlocks", arity: "0", description: "all fenced/indented code block nodes", func: md_code_blocks },
        MethodEntry { name: "toc", arity: "0-2", description: "table of contents within a heading-level range", func: md_toc },
        MethodEntry { name: "toHTML", arity: "0", description: "render to HTML", func: md_to_html },
        MethodEntry { name: "toMarkdown", arity: "0", description: "render back to canonical markdown", func: md_to_markdown },
        MethodEntry { name: "walk", arity: "1", description: "visit every node depth-first", func: md_walk },
        MethodEntry { name: "map", arity: "1", description: "transform every node, rebuilding the tree", func: md_map },
        MethodEntry { name: "filter", arity: "1", description: "keep only nodes matching a predicate", func: md_filter },
    ];
    for e in entries {
        r.register(*e);
    }
}

pub fn module(env: &Rc<Environment>) -> Dictionary {
    Dictionary::from_values(vec![("parse".to_string(), Value::BuiltIn(BuiltinFn::Plain(md_parse)))], env.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Value {
        md_parse(&[Value::str(src)]).unwrap()
    }

    #[test]
    fn parses_headings_and_links() {
        let env = Environment::new();
        let doc = parse("# Title\n\nSee [here](https://example.com).");
        let headings = md_headings(&doc, &[], &env).unwrap();
        assert_eq!(headings.to_string().is_empty(), false);
        let links = md_links(&doc, &[], &env).unwrap();
        match links {
            Value::Array(items) => assert_eq!(items.borrow().len(), 1),
            _ => panic!(),
        }
    }

    #[test]
    fn toc_respects_level_bounds() {
        let env = Environment::new();
        let doc = parse("# One\n## Two\n### Three");
        let toc = md_toc(&doc, &[Value::Integer(1), Value::Integer(2)], &env).unwrap();
        match toc {
            Value::Array(items) => assert_eq!(items.borrow().len(), 2),
            _ => panic!(),
        }
    }

    #[test]
    fn to_html_renders_basic_markup() {
        let doc = parse("# Hi");
        let html = md_to_html(&doc, &[], &Environment::new()).unwrap();
        assert!(html.to_string().contains("<h1>"));
    }
}
