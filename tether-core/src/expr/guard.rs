//! Evaluation Guards
//!
//! Expressions come from templates, which are not trusted. These checks run
//! at every point where evaluation dereferences or invokes a value, and turn
//! an attempt to reach the host's reflective machinery into
//! [`Error::Security`].

use crate::error::{Error, Result};
use crate::value::{FunctionKind, Value};

const UNSAFE_MEMBERS: &[&str] = &[
    "constructor",
    "__proto__",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

pub(crate) fn ensure_safe_member_name(name: &str, source: &str) -> Result<()> {
    if UNSAFE_MEMBERS.contains(&name) {
        return Err(Error::security(format!(
            "referencing `{name}` is disallowed in expression `{source}`"
        )));
    }
    Ok(())
}

pub(crate) fn ensure_safe_object(value: &Value, source: &str) -> Result<()> {
    match value {
        Value::Object(object) => {
            if object.get("window").same(value) {
                return Err(Error::security(format!(
                    "referencing the window is disallowed in expression `{source}`"
                )));
            }
            if object.get("children").truthy()
                && (object.get("nodeName").truthy()
                    || (object.get("prop").truthy()
                        && object.get("attr").truthy()
                        && object.get("find").truthy()))
            {
                return Err(Error::security(format!(
                    "referencing DOM nodes is disallowed in expression `{source}`"
                )));
            }
            if object.get("constructor").same(value) {
                return Err(Error::security(format!(
                    "referencing a constructor is disallowed in expression `{source}`"
                )));
            }
        }
        Value::Function(function) => match function.kind() {
            FunctionKind::FunctionConstructor | FunctionKind::ObjectConstructor => {
                return Err(Error::security(format!(
                    "referencing the {} constructor is disallowed in expression `{source}`",
                    function.name()
                )));
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
}

pub(crate) fn ensure_safe_function(value: &Value, source: &str) -> Result<()> {
    if let Value::Function(function) = value {
        match function.kind() {
            FunctionKind::FunctionConstructor => {
                return Err(Error::security(format!(
                    "referencing the Function constructor is disallowed in expression `{source}`"
                )));
            }
            FunctionKind::Call | FunctionKind::Apply | FunctionKind::Bind => {
                return Err(Error::security(format!(
                    "referencing `{}` is disallowed in expression `{source}`",
                    function.name()
                )));
            }
            FunctionKind::Native | FunctionKind::ObjectConstructor => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Function, Object};

    #[test]
    fn rejects_reflective_member_names() {
        for name in UNSAFE_MEMBERS {
            assert!(ensure_safe_member_name(name, "x").is_err(), "{name}");
        }
        assert!(ensure_safe_member_name("proto", "x").is_ok());
    }

    #[test]
    fn rejects_window_shaped_objects() {
        let window = Object::new();
        window.set("window", Value::Object(window.clone()));
        assert!(ensure_safe_object(&Value::Object(window), "w").is_err());
    }

    #[test]
    fn rejects_dom_shaped_objects() {
        let node = Value::object(vec![
            ("children", Value::array(vec![])),
            ("nodeName", Value::from("DIV")),
        ]);
        assert!(ensure_safe_object(&node, "n").is_err());

        let wrapped = Value::object(vec![
            ("children", Value::array(vec![])),
            ("prop", Value::from(1)),
            ("attr", Value::from(1)),
            ("find", Value::from(1)),
        ]);
        assert!(ensure_safe_object(&wrapped, "n").is_err());

        let plain = Value::object(vec![("children", Value::array(vec![]))]);
        assert!(ensure_safe_object(&plain, "n").is_ok());
    }

    #[test]
    fn rejects_self_constructing_objects() {
        let ctor = Object::new();
        ctor.set("constructor", Value::Object(ctor.clone()));
        assert!(ensure_safe_object(&Value::Object(ctor), "c").is_err());
    }

    #[test]
    fn rejects_constructor_intrinsics() {
        let function = Value::Function(Function::function_constructor());
        assert!(ensure_safe_object(&function, "f").is_err());
        assert!(ensure_safe_function(&function, "f").is_err());
        let object = Value::Function(Function::object_constructor());
        assert!(ensure_safe_object(&object, "o").is_err());
    }

    #[test]
    fn rejects_call_apply_bind_as_callees() {
        for intrinsic in [
            Function::call_intrinsic(),
            Function::apply_intrinsic(),
            Function::bind_intrinsic(),
        ] {
            let value = Value::Function(intrinsic);
            assert!(ensure_safe_function(&value, "f").is_err());
            assert!(ensure_safe_object(&value, "f").is_ok());
        }
        let plain = Value::function("plain", |_, _| Ok(Value::Null));
        assert!(ensure_safe_function(&plain, "f").is_ok());
    }
}
