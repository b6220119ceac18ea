//! Dynamic Values
//!
//! Expressions and scopes operate on [`Value`], a small dynamic value model:
//! primitives (`undefined`, `null`, booleans, numbers, strings) plus shared
//! containers ([`Object`], [`Array`]) and native [`Function`]s.
//!
//! # Equality
//!
//! Several notions of equality are in play, and the digest engine picks
//! between them per watcher:
//!
//! - [`Value::same`]: reference identity for containers, value identity for
//!   primitives, with `NaN` equal to `NaN`. Used by ordinary watchers.
//! - [`Value::deep_eq`]: structural comparison, also `NaN`-stable. Used by
//!   `value_eq` watchers and by `PartialEq`.
//! - [`Value::strict_equals`] / [`Value::loose_equals`]: the `===` and `==`
//!   operators of the expression language.

mod function;
mod object;

use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

pub use function::{Function, FunctionKind, NativeFn};
pub use object::{Array, Object, MAX_ARRAY_GROWTH};

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Array),
    Object(Object),
    Function(Function),
}

impl Value {
    /// Build an object value from key/value pairs.
    pub fn object<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(Object::from_entries(entries))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Array::from_vec(items))
    }

    pub fn function<F>(name: &str, body: F) -> Value
    where
        F: Fn(&Value, &[Value]) -> crate::Result<Value> + Send + Sync + 'static,
    {
        Value::Function(Function::new(name, body))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_defined(&self) -> bool {
        !self.is_undefined()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Containers and functions, the values that can carry members.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_) | Value::Function(_))
    }

    /// JavaScript truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    /// Numeric conversion with JavaScript rules.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Array(_) => parse_number(&self.to_string()),
            Value::Object(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// `undefined` becomes `fallback`, everything else is kept.
    pub fn if_defined(self, fallback: Value) -> Value {
        if self.is_undefined() {
            fallback
        } else {
            self
        }
    }

    /// Identity comparison used by reference watchers. `NaN` equals `NaN`.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self.strict_equals(other),
        }
    }

    /// The `===` operator.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// The `==` operator.
    pub fn loose_equals(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Undefined | Null, Undefined | Null) => true,
            (Undefined | Null, _) | (_, Undefined | Null) => false,
            (Number(a), String(_)) => *a == other.to_number(),
            (String(_), Number(b)) => self.to_number() == *b,
            (Bool(_), _) => Number(self.to_number()).loose_equals(other),
            (_, Bool(_)) => self.loose_equals(&Number(other.to_number())),
            (Array(_) | Object(_) | Function(_), Number(_) | String(_)) => {
                String(self.to_string()).loose_equals(other)
            }
            (Number(_) | String(_), Array(_) | Object(_) | Function(_)) => {
                self.loose_equals(&String(other.to_string()))
            }
            _ => self.strict_equals(other),
        }
    }

    /// Structural equality. Containers compare by contents, `NaN` equals
    /// `NaN`, functions compare by identity.
    pub fn deep_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(_), Value::Number(_)) => self.same(other),
            (Value::Array(a), Value::Array(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.to_vec(), b.to_vec());
                a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x.deep_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.entries(), b.entries());
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.iter()
                            .find(|(other_key, _)| other_key == key)
                            .is_some_and(|(_, other)| value.deep_eq(other))
                    })
            }
            _ => self.strict_equals(other),
        }
    }

    /// Recursive copy of containers. Functions are shared.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Array(a) => {
                Value::array(a.to_vec().iter().map(Value::deep_clone).collect())
            }
            Value::Object(o) => Value::object(
                o.entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.deep_clone())),
            ),
            other => other.clone(),
        }
    }

    /// One-level copy: a new container holding the same element handles.
    pub fn shallow_clone(&self) -> Value {
        match self {
            Value::Array(a) => Value::array(a.to_vec()),
            Value::Object(o) => Value::object(o.entries()),
            other => other.clone(),
        }
    }

    /// Read a member the way `value.key` / `value[key]` does.
    pub fn get_member(&self, key: &str) -> Value {
        match self {
            Value::Object(o) => o.get(key),
            Value::Array(a) => {
                if key == "length" {
                    Value::from(a.len())
                } else {
                    parse_index(key).map(|i| a.get(i)).unwrap_or_default()
                }
            }
            Value::String(s) => {
                if key == "length" {
                    Value::from(s.chars().count())
                } else {
                    parse_index(key)
                        .and_then(|i| s.chars().nth(i))
                        .map(|c| Value::String(c.to_string()))
                        .unwrap_or_default()
                }
            }
            Value::Function(f) => f.member(key),
            _ => Value::Undefined,
        }
    }

    /// Whether `key in value` holds.
    pub fn has_member(&self, key: &str) -> bool {
        match self {
            Value::Object(o) => o.has(key),
            Value::Array(a) => key == "length" || parse_index(key).is_some_and(|i| i < a.len()),
            Value::Function(f) => f.member(key).is_defined(),
            _ => false,
        }
    }

    /// Write a member. Writes on `undefined`/`null` fail; writes on other
    /// primitives are ignored.
    pub fn set_member(&self, key: &str, value: Value) -> crate::Result<()> {
        match self {
            Value::Object(o) => o.set(key, value),
            Value::Array(a) => {
                if key == "length" {
                    let len = value.to_number();
                    if len >= 0.0 && len.fract() == 0.0 {
                        a.set_len(len as usize)?;
                    }
                } else if let Some(index) = parse_index(key) {
                    a.set(index, value)?;
                }
            }
            Value::Undefined | Value::Null => {
                return Err(crate::Error::Eval(format!(
                    "cannot set property '{key}' of {}",
                    self.type_name()
                )));
            }
            _ => {}
        }
        Ok(())
    }

    /// Arrays, and objects carrying a non-negative integer `length` no
    /// larger than their own key count.
    pub fn is_array_like(&self) -> bool {
        match self {
            Value::Array(_) => true,
            Value::Object(o) => object_like_len(o).is_some(),
            _ => false,
        }
    }

    /// Element snapshot of an array-like value.
    pub fn array_like_items(&self) -> Vec<Value> {
        match self {
            Value::Array(a) => a.to_vec(),
            Value::Object(o) => match object_like_len(o) {
                Some(len) => (0..len).map(|i| o.get(&i.to_string())).collect(),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// JSON view of the value. `undefined`, functions and non-finite
    /// numbers become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// The `length` of an array-like object. Bounded by the key count so an
/// untrusted `length` never sizes an allocation on its own.
fn object_like_len(object: &Object) -> Option<usize> {
    match object.get("length") {
        Value::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= object.len() as f64 => {
            Some(n as usize)
        }
        _ => None,
    }
}

fn parse_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse().ok()
}

fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Rust accepts "inf" and "nan"; JavaScript does not.
    if trimmed
        .chars()
        .any(|c| matches!(c, 'i' | 'I' | 'n' | 'N'))
    {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        (if n > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

/// JavaScript string conversion.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Array(a) => {
                let parts: Vec<String> = a
                    .to_vec()
                    .iter()
                    .map(|item| match item {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect();
                f.write_str(&parts.join(","))
            }
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Function(func) => write!(f, "function {}() {{ [native code] }}", func.name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(a) => fmt::Debug::fmt(a, f),
            Value::Object(o) => fmt::Debug::fmt(o, f),
            Value::Function(func) => fmt::Debug::fmt(func, f),
        }
    }
}

/// Structural equality, see [`Value::deep_eq`].
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.deep_eq(other)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serializer.serialize_i64(*n as i64)
            }
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(_) => serializer.serialize_unit(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(a) => {
                let items = a.to_vec();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in &items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(o) => {
                let entries = o.entries();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in &entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::object(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}
