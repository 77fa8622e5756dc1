// ABOUTME: Unique-identifier generators: ULID-like, UUID v4/v7, NanoID, CUID2-style

use crate::env::Environment;
use crate::error::EvalError;
use crate::value::{BuiltinFn, Dictionary, Value};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const NANOID_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const CUID2_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// 16 bytes of fresh randomness, borrowed from a UUID v4 draw so the crate
/// doesn't need a separate `rand` dependency purely for ID generation.
fn random_bytes() -> [u8; 16] {
    *uuid::Uuid::new_v4().as_bytes()
}

/// ULID-like sortable identifier: 48-bit millisecond timestamp + 80 bits of
/// randomness, rendered as 26 Crockford Base32 characters.
fn gen_ulid(_args: &[Value]) -> Result<Value, EvalError> {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    let rand = random_bytes();
    let mut bits: u128 = (millis as u128) << 80;
    for (i, b) in rand[..10].iter().enumerate() {
        bits |= (*b as u128) << (72 - i * 8);
    }
    let mut out = [0u8; 26];
    for (i, slot) in out.iter_mut().enumerate() {
        let shift = 125 - i * 5;
        let idx = ((bits >> shift) & 0x1f) as usize;
        *slot = CROCKFORD[idx];
    }
    Ok(Value::str(String::from_utf8(out.to_vec()).unwrap()))
}

fn gen_uuid_v4(_args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::str(uuid::Uuid::new_v4().to_string()))
}

fn gen_uuid_v7(_args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::str(uuid::Uuid::now_v7().to_string()))
}

fn gen_nanoid(args: &[Value]) -> Result<Value, EvalError> {
    let len = match args.first() {
        Some(Value::Integer(n)) if *n > 0 => *n as usize,
        Some(other) => return Err(EvalError::type_error_nth("nanoid", 1, "positive integer", other)),
        None => 21,
    };
    Ok(Value::str(random_string(len, NANOID_ALPHABET)))
}

fn gen_cuid2(_args: &[Value]) -> Result<Value, EvalError> {
    let mut s = String::with_capacity(24);
    s.push(CUID2_ALPHABET[(random_bytes()[0] as usize) % 26] as char);
    s.push_str(&random_string(23, CUID2_ALPHABET));
    Ok(Value::str(s))
}

fn random_string(len: usize, alphabet: &[u8]) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        for b in random_bytes() {
            if out.len() == len {
                break;
            }
            out.push(alphabet[(b as usize) % alphabet.len()] as char);
        }
    }
    out
}

pub fn module(env: &Rc<Environment>) -> Dictionary {
    Dictionary::from_values(
        vec![
            ("ulid".to_string(), Value::BuiltIn(BuiltinFn::Plain(gen_ulid))),
            ("uuidv4".to_string(), Value::BuiltIn(BuiltinFn::Plain(gen_uuid_v4))),
            ("uuidv7".to_string(), Value::BuiltIn(BuiltinFn::Plain(gen_uuid_v7))),
            ("nanoid".to_string(), Value::BuiltIn(BuiltinFn::Plain(gen_nanoid))),
            ("cuid2".to_string(), Value::BuiltIn(BuiltinFn::Plain(gen_cuid2))),
        ],
        env.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulid_is_26_crockford_chars() {
        let v = gen_ulid(&[]).unwrap();
        match v {
            Value::String(s) => {
                assert_eq!(s.len(), 26);
                assert!(s.bytes().all(|b| CROCKFORD.contains(&b)));
            }
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn ulid_timestamps_sort_lexicographically() {
        let a = gen_ulid(&[]).unwrap().to_string();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = gen_ulid(&[]).unwrap().to_string();
        assert!(a < b);
    }

    #[test]
    fn nanoid_respects_requested_length() {
        let v = gen_nanoid(&[Value::Integer(10)]).unwrap();
        assert_eq!(v.to_string().len(), 10);
    }

    #[test]
    fn uuid_v4_parses_as_valid_uuid() {
        let v = gen_uuid_v4(&[]).unwrap();
        assert!(uuid::Uuid::parse_str(&v.to_string()).is_ok());
    }
}
