// ABOUTME: table() constructor and its where/orderBy/select/limit/aggregate pipeline methods

use crate::env::Environment;
use crate::error::EvalError;
use crate::registry::{MethodEntry, Registry};
use crate::value::{BuiltinFn, Dictionary, TableValue, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn columns_of(rows: &[Rc<Dictionary>]) -> Vec<String> {
    rows.first().map(|d| d.keys()).unwrap_or_default()
}

fn table_ctor(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_exact("table", 1, args.len()));
    }
    let rows = match &args[0] {
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(|v| match v {
                Value::Dictionary(d) => Ok(d.clone()),
                other => Err(EvalError::type_error("table", "array of dictionaries", other)),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => return Err(EvalError::type_error_nth("table", 1, "array of dictionaries", other)),
    };
    let columns = columns_of(&rows);
    Ok(Value::Table(Rc::new(TableValue {
        rows: RefCell::new(rows),
        columns: RefCell::new(columns),
        schema: None,
    })))
}

fn as_table(v: &Value) -> &Rc<TableValue> {
    match v {
        Value::Table(t) => t,
        _ => unreachable!("registry only dispatches to matching receiver type"),
    }
}

fn rows_to_table(rows: Vec<Rc<Dictionary>>, schema: Option<String>) -> Value {
    let columns = columns_of(&rows);
    Value::Table(Rc::new(TableValue { rows: RefCell::new(rows), columns: RefCell::new(columns), schema }))
}

fn table_where(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let t = as_table(recv);
    let pred = args[0].clone();
    let mut kept = Vec::new();
    for row in t.rows.borrow().iter() {
        let keep = crate::eval::apply_function(pred.clone(), vec![Value::Dictionary(row.clone())], None, env)?;
        if keep.is_truthy() {
            kept.push(row.clone());
        }
    }
    Ok(rows_to_table(kept, t.schema.clone()))
}

fn table_order_by(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let t = as_table(recv);
    let key = match &args[0] {
        Value::String(s) => s.to_string(),
        other => return Err(EvalError::type_error_nth("orderBy", 1, "string", other)),
    };
    let descending = matches!(args.get(1), Some(Value::Boolean(true)));
    let mut rows = t.rows.borrow().clone();
    let mut err = None;
    rows.sort_by(|a, b| {
        if err.is_some() {
            return std::cmp::Ordering::Equal;
        }
        let (av, bv) = match (a.get(&key), b.get(&key)) {
            (Ok(av), Ok(bv)) => (av, bv),
            _ => {
                err = Some(EvalError::validation_error(format!("orderBy: missing column `{key}`")));
                (Value::Null, Value::Null)
            }
        };
        let ord = compare_values(&av, &bv);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(rows_to_table(rows, t.schema.clone()))
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
        (Value::Integer(x), Value::Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
        (Value::Float(x), Value::Integer(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(std::cmp::Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    }
}

fn table_select(recv: &Value, args: &[Value], env: &Rc<Environment>) -> Result<Value, EvalError> {
    let t = as_table(recv);
    let cols: Vec<String> = match &args[0] {
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.to_string()),
                other => Err(EvalError::type_error("select", "array of strings", other)),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => return Err(EvalError::type_error_nth("select", 1, "array of strings", other)),
    };
    let mut out_rows = Vec::new();
    for row in t.rows.borrow().iter() {
        let mut pairs = Vec::new();
        for c in &cols {
            pairs.push((c.clone(), row.get(c)?));
        }
        out_rows.push(Rc::new(Dictionary::from_values(pairs, env.clone())));
    }
    Ok(rows_to_table(out_rows, t.schema.clone()))
}

fn table_limit(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let t = as_table(recv);
    let n = match &args[0] {
        Value::Integer(n) if *n >= 0 => *n as usize,
        other => return Err(EvalError::type_error_nth("limit", 1, "non-negative integer", other)),
    };
    let rows: Vec<_> = t.rows.borrow().iter().take(n).cloned().collect();
    Ok(rows_to_table(rows, t.schema.clone()))
}

fn table_count(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    Ok(Value::Integer(as_table(recv).rows.borrow().len() as i64))
}

fn numeric_column(t: &TableValue, column: &str, function: &str) -> Result<Vec<f64>, EvalError> {
    t.rows
        .borrow()
        .iter()
        .map(|row| {
            let v = row.get(column)?;
            match v {
                Value::Integer(n) => Ok(n as f64),
                Value::Float(n) => Ok(n),
                other => Err(EvalError::type_error(function, "numeric column", &other)),
            }
        })
        .collect()
}

fn table_sum(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let col = column_arg(args, "sum")?;
    let values = numeric_column(as_table(recv), &col, "sum")?;
    Ok(Value::Float(values.iter().sum()))
}

fn table_avg(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let col = column_arg(args, "avg")?;
    let values = numeric_column(as_table(recv), &col, "avg")?;
    if values.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::Float(values.iter().sum::<f64>() / values.len() as f64))
}

fn table_min(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let col = column_arg(args, "min")?;
    let values = numeric_column(as_table(recv), &col, "min")?;
    values.into_iter().fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
        .map(Value::Float)
        .map(Ok)
        .unwrap_or(Ok(Value::Null))
}

fn table_max(recv: &Value, args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let col = column_arg(args, "max")?;
    let values = numeric_column(as_table(recv), &col, "max")?;
    values.into_iter().fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
        .map(Value::Float)
        .map(Ok)
        .unwrap_or(Ok(Value::Null))
}

fn column_arg(args: &[Value], function: &str) -> Result<String, EvalError> {
    match args.first() {
        Some(Value::String(s)) => Ok(s.to_string()),
        Some(other) => Err(EvalError::type_error_nth(function, 1, "string", other)),
        None => Err(EvalError::arity_exact(function, 1, 0)),
    }
}

fn table_to_csv(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let t = as_table(recv);
    let cols = t.columns.borrow().clone();
    let mut out = cols.join(",");
    out.push('\n');
    for row in t.rows.borrow().iter() {
        let fields: Vec<String> = cols
            .iter()
            .map(|c| crate::typed_dict::to_template_string(&row.get(c).unwrap_or(Value::Null)))
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    Ok(Value::str(out))
}

fn table_to_html(recv: &Value, _args: &[Value], _env: &Rc<Environment>) -> Result<Value, EvalError> {
    let t = as_table(recv);
    let cols = t.columns.borrow().clone();
    let mut out = String::from("<table>\n<thead><tr>");
    for c in &cols {
        out.push_str(&format!("<th>{c}</th>"));
    }
    out.push_str("</tr></thead>\n<tbody>\n");
    for row in t.rows.borrow().iter() {
        out.push_str("<tr>");
        for c in &cols {
            let v = row.get(c).unwrap_or(Value::Null);
            out.push_str(&format!("<td>{}</td>", crate::typed_dict::to_template_string(&v)));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>");
    Ok(Value::str(out))
}

pub fn register_table_methods(r: &mut Registry) {
    let entries: &[MethodEntry] = &[
        MethodEntry { name: "where", arity: "1", description: "keep rows matching a predicate", func: table_where },
        MethodEntry { name: "orderBy", arity: "1-2", description: "sort rows by a column", func: table_order_by },
        MethodEntry { name: "select", arity: "1", description: "project a column subset", func: table_select },
        MethodEntry { name: "limit", arity: "1", description: "keep the first n rows", func: table_limit },
        MethodEntry { name: "count", arity: "0", description: "number of rows", func: table_count },
        MethodEntry { name: "sum", arity: "1", description: "sum a numeric column", func: table_sum },
        MethodEntry { name: "avg", arity: "1", description: "average a numeric column", func: table_avg },
        MethodEntry { name: "min", arity: "1", description: "minimum of a numeric column", func: table_min },
        MethodEntry { name: "max", arity: "1", description: "maximum of a numeric column", func: table_max },
        MethodEntry { name: "toCSV", arity: "0", description: "render as CSV text", func: table_to_csv },
        MethodEntry { name: "toHTML", arity: "0", description: "render as an HTML table", func: table_to_html },
    ];
    for e in entries {
        r.register(*e);
    }
}

pub fn module(env: &Rc<Environment>) -> Dictionary {
    Dictionary::from_values(vec![("table".to_string(), Value::BuiltIn(BuiltinFn::Plain(table_ctor)))], env.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table(env: &Rc<Environment>) -> Value {
        let rows = vec![
            Dictionary::from_values(vec![("name".into(), Value::str("a")), ("score".into(), Value::Integer(3))], env.clone()),
            Dictionary::from_values(vec![("name".into(), Value::str("b")), ("score".into(), Value::Integer(1))], env.clone()),
        ];
        let arr = Value::array(rows.into_iter().map(|d| Value::Dictionary(Rc::new(d))).collect());
        table_ctor(&[arr]).unwrap()
    }

    #[test]
    fn column_order_derives_from_first_row() {
        let env = Environment::new();
        let t = sample_table(&env);
        match t {
            Value::Table(t) => assert_eq!(t.columns.borrow().clone(), vec!["name".to_string(), "score".to_string()]),
            _ => panic!(),
        }
    }

    #[test]
    fn order_by_sorts_rows_by_column() {
        let env = Environment::new();
        let t = sample_table(&env);
        let sorted = table_order_by(&t, &[Value::str("score")], &env).unwrap();
        match sorted {
            Value::Table(t) => {
                let rows = t.rows.borrow();
                assert_eq!(rows[0].get("score").unwrap().to_string(), "1");
            }
            _ => panic!(),
        }
    }

    #[test]
    fn sum_and_avg_over_numeric_column() {
        let env = Environment::new();
        let t = sample_table(&env);
        assert_eq!(table_sum(&t, &[Value::str("score")], &env).unwrap().to_string(), "4");
        assert_eq!(table_avg(&t, &[Value::str("score")], &env).unwrap().to_string(), "2");
    }
}
