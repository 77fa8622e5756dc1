// ABOUTME: In-memory session store, exposed as the std/session module (cookie machinery is out of scope)

use crate::env::Environment;
use crate::error::EvalError;
use crate::shims::{Handle, SessionHandle};
use crate::value::{BuiltinFn, Dictionary, Value};
use std::rc::Rc;

fn session_create(_args: &[Value]) -> Result<Value, EvalError> {
    Ok(crate::shims::new_handle(Handle::Session(SessionHandle::default())))
}

pub fn module(env: &Rc<Environment>) -> Dictionary {
    Dictionary::from_values(vec![("create".to_string(), Value::BuiltIn(BuiltinFn::Plain(session_create)))], env.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_returns_a_session_handle() {
        let v = session_create(&[]).unwrap();
        match v {
            Value::Handle(h) => assert!(matches!(&*h.borrow(), Handle::Session(_))),
            _ => panic!("expected handle"),
        }
    }
}
