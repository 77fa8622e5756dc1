// ABOUTME: Encode/decode helpers for the read/write operator formats (§6.4)

use crate::error::EvalError;
use crate::value::Value;
use std::rc::Rc;

/// Picks a format from a file dict's extension when no explicit format was
/// requested (`file` auto-detect mode).
pub fn detect_format(extension: &str) -> &'static str {
    match extension {
        "json" => "json",
        "csv" => "csv",
        "yaml" | "yml" => "yaml",
        "svg" => "svg",
        _ => "text",
    }
}

pub fn decode(format: &str, bytes: &[u8]) -> Result<Value, EvalError> {
    match format {
        "text" | "svg" | "yaml" => {
            let s = String::from_utf8_lossy(bytes).to_string();
            Ok(Value::str(s))
        }
        "bytes" => Ok(Value::array(bytes.iter().map(|b| Value::Integer(*b as i64)).collect())),
        "lines" => {
            let s = String::from_utf8_lossy(bytes);
            Ok(Value::array(s.lines().map(Value::str).collect()))
        }
        "json" => {
            let s = String::from_utf8_lossy(bytes);
            let json: serde_json::Value =
                serde_json::from_str(&s).map_err(|e| EvalError::format_error("json", &e.to_string()))?;
            Ok(crate::stdlib::json::json_to_value(&json))
        }
        "csv" => decode_csv(bytes, true),
        "csv-noheader" => decode_csv(bytes, false),
        other => Err(EvalError::format_error(other, "unsupported format")),
    }
}

fn decode_csv(bytes: &[u8], has_header: bool) -> Result<Value, EvalError> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.lines();
    let header: Vec<String> = if has_header {
        lines
            .next()
            .map(|l| l.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    let mut rows = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if has_header {
            let env = crate::env::Environment::new();
            let pairs: Vec<(String, Value)> = header
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), Value::str(fields.get(i).copied().unwrap_or("").trim())))
                .collect();
            rows.push(Value::Dictionary(Rc::new(crate::value::Dictionary::from_values(pairs, env))));
        } else {
            rows.push(Value::array(fields.iter().map(|f| Value::str(f.trim())).collect()));
        }
    }
    Ok(Value::array(rows))
}

pub fn encode(format: &str, value: &Value) -> Result<Vec<u8>, EvalError> {
    match format {
        "text" | "svg" | "yaml" => Ok(crate::typed_dict::to_template_string(value).into_bytes()),
        "bytes" => match value {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.borrow().len());
                for v in items.borrow().iter() {
                    match v {
                        Value::Integer(n) if (0..=255).contains(n) => out.push(*n as u8),
                        other => return Err(EvalError::type_error("bytes encode", "integer in 0..255", other)),
                    }
                }
                Ok(out)
            }
            other => Err(EvalError::type_error("bytes encode", "array", other)),
        },
        "lines" => match value {
            Value::Array(items) => {
                let mut out = String::new();
                for v in items.borrow().iter() {
                    out.push_str(&crate::typed_dict::to_template_string(v));
                    out.push('\n');
                }
                Ok(out.into_bytes())
            }
            other => Err(EvalError::type_error("lines encode", "array", other)),
        },
        "json" => {
            let json = crate::stdlib::json::value_to_json(value)?;
            Ok(serde_json::to_vec(&json).map_err(|e| EvalError::format_error("json", &e.to_string()))?)
        }
        "csv" | "csv-noheader" => encode_csv(value, format == "csv"),
        other => Err(EvalError::format_error(other, "unsupported format")),
    }
}

fn encode_csv(value: &Value, with_header: bool) -> Result<Vec<u8>, EvalError> {
    let rows = match value {
        Value::Array(items) => items.borrow().clone(),
        other => return Err(EvalError::type_error("csv encode", "array of dictionaries", other)),
    };
    let mut out = String::new();
    if with_header {
        if let Some(Value::Dictionary(d)) = rows.first() {
            out.push_str(&d.keys().join(","));
            out.push('\n');
        }
    }
    for row in &rows {
        if let Value::Dictionary(d) = row {
            let fields: Vec<String> = d
                .keys()
                .iter()
                .map(|k| crate::typed_dict::to_template_string(&d.get(k).unwrap_or(Value::Null)))
                .collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
    }
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_format_by_extension() {
        assert_eq!(detect_format("json"), "json");
        assert_eq!(detect_format("txt"), "text");
    }

    #[test]
    fn lines_format_splits_and_joins_with_newline() {
        let decoded = decode("lines", b"a\nb\nc").unwrap();
        match decoded {
            Value::Array(items) => assert_eq!(items.borrow().len(), 3),
            _ => panic!("expected array"),
        }
        let encoded = encode("lines", &Value::array(vec![Value::str("a"), Value::str("b")])).unwrap();
        assert_eq!(encoded, b"a\nb\n");
    }

    #[test]
    fn bytes_format_round_trips() {
        let v = Value::array(vec![Value::Integer(104), Value::Integer(105)]);
        let encoded = encode("bytes", &v).unwrap();
        assert_eq!(encoded, b"hi");
        let decoded = decode("bytes", &encoded).unwrap();
        assert!(decoded.equals(&v));
    }

    #[test]
    fn csv_with_header_round_trips_rows() {
        let decoded = decode_csv(b"a,b\n1,2\n3,4", true).unwrap();
        match decoded {
            Value::Array(rows) => assert_eq!(rows.borrow().len(), 2),
            _ => panic!(),
        }
    }
}
