//! Runtime values shared by build scripts, template expressions, component
//! props and exports.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::interpreter::Frame;
use crate::script_ir::{ClassDef, FunctionDef};

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Function>),
    Special(Special),
}

/// Objects whose members are backed by compiler state rather than a map.
#[derive(Clone)]
pub enum Special {
    /// The binding environment of the running scope.
    LocalThis,
    BuildStore(BuildStore),
}

pub enum Function {
    Closure(Closure),
    Class(ClassValue),
    /// A builtin, optionally bound to a receiver (`"abc".toUpperCase`).
    Native { name: Rc<str>, this: Value },
}

pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub frame: Rc<Frame>,
    /// Arrow functions capture `this` lexically.
    pub this: Option<Value>,
}

pub struct ClassValue {
    pub def: Rc<ClassDef>,
    pub frame: Rc<Frame>,
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Value {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: IndexMap<String, Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn empty_object() -> Value {
        Value::object(IndexMap::new())
    }

    pub fn native(name: &str, this: Value) -> Value {
        Value::Function(Rc::new(Function::Native {
            name: Rc::from(name),
            this,
        }))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            _ => "object",
        }
    }

    /// JavaScript `String(value)`.
    pub fn to_js_string(&self) -> String {
        self.to_js_string_depth(0)
    }

    fn to_js_string_depth(&self, depth: usize) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Array(items) => {
                if depth > 32 {
                    return String::new();
                }
                items
                    .borrow()
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            v.to_js_string_depth(depth + 1)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Value::Object(_) | Value::Special(_) => "[object Object]".to_string(),
            Value::Function(f) => match f.as_ref() {
                Function::Class(c) => format!("class {}", c.def.name.as_deref().unwrap_or("")),
                Function::Closure(c) => {
                    format!("function {}() {{ [code] }}", c.def.name.as_deref().unwrap_or(""))
                }
                Function::Native { name, .. } => format!("function {}() {{ [native code] }}", name),
            },
        }
    }

    /// JavaScript `Number(value)`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Array(_) => string_to_number(&self.to_js_string()),
            _ => f64::NAN,
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Special(Special::LocalThis), Value::Special(Special::LocalThis)) => true,
            (Value::Special(Special::BuildStore(a)), Value::Special(Special::BuildStore(b))) => {
                a.ptr_eq(b)
            }
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Value::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            (Value::Array(_), Value::String(_) | Value::Number(_)) => {
                Value::string(self.to_js_string()).loose_equals(other)
            }
            (Value::String(_) | Value::Number(_), Value::Array(_)) => {
                self.loose_equals(&Value::string(other.to_js_string()))
            }
            _ => self.strict_equals(other),
        }
    }

    /// Copies arrays and objects recursively; functions stay shared.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Array(items) => {
                Value::array(items.borrow().iter().map(Value::deep_clone).collect())
            }
            Value::Object(map) => Value::object(
                map.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::string(s),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON view of the value. `None` where `JSON.stringify` would omit the
    /// value (undefined, functions); cycles deeper than the nesting limit
    /// are an error.
    pub fn to_json(&self) -> Result<Option<serde_json::Value>, String> {
        self.to_json_depth(0)
    }

    fn to_json_depth(&self, depth: usize) -> Result<Option<serde_json::Value>, String> {
        if depth > 256 {
            return Err("Converting circular structure to JSON".to_string());
        }
        Ok(match self {
            Value::Undefined | Value::Function(_) => None,
            Value::Null => Some(serde_json::Value::Null),
            Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Value::Number(n) => Some(
                serde_json::Number::from_f64(*n)
                    .map(|num| {
                        if n.fract() == 0.0 && n.abs() < 9.0e15 {
                            serde_json::Value::Number((*n as i64).into())
                        } else {
                            serde_json::Value::Number(num)
                        }
                    })
                    .unwrap_or(serde_json::Value::Null),
            ),
            Value::String(s) => Some(serde_json::Value::String(s.to_string())),
            Value::Array(items) => {
                let mut out = Vec::new();
                for item in items.borrow().iter() {
                    out.push(item.to_json_depth(depth + 1)?.unwrap_or(serde_json::Value::Null));
                }
                Some(serde_json::Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map.borrow().iter() {
                    if let Some(json) = v.to_json_depth(depth + 1)? {
                        out.insert(k.clone(), json);
                    }
                }
                Some(serde_json::Value::Object(out))
            }
            Value::Special(Special::BuildStore(store)) => {
                Value::Object(store.entries()).to_json_depth(depth + 1)?
            }
            Value::Special(Special::LocalThis) => Some(serde_json::Value::Object(Default::default())),
        })
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(_) | Value::Object(_) => match self.to_json() {
                Ok(Some(json)) => write!(f, "{}", json),
                _ => write!(f, "{}", self.to_js_string()),
            },
            other => write!(f, "{}", other.to_js_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NUMBER FORMATTING
// ═══════════════════════════════════════════════════════════════════════════════

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if abs >= 1e21 || abs < 1e-6 {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        };
    }
    if n.fract() == 0.0 {
        return format!("{}", n as i128);
    }
    format!("{}", n)
}

pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => {
            if trimmed
                .chars()
                .any(|c| !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')))
            {
                return f64::NAN;
            }
            trimmed.parse::<f64>().unwrap_or(f64::NAN)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILD STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Key-value cache shared by every build script of a compile.
///
/// Cloning the handle shares the store. Concurrent top-level compiles must
/// each receive an [`BuildStore::isolated_copy`].
#[derive(Clone, Default)]
pub struct BuildStore(ObjectRef);

impl BuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(seed: &serde_json::Value) -> Self {
        let store = Self::new();
        if let serde_json::Value::Object(map) = seed {
            for (k, v) in map {
                store.set(k, Value::from_json(v));
            }
        }
        store
    }

    pub fn get(&self, key: &str) -> Value {
        self.0.borrow().get(key).cloned().unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.0.borrow_mut().insert(key.to_string(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.0.borrow_mut().shift_remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn ptr_eq(&self, other: &BuildStore) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// A detached store holding deep copies of every entry.
    pub fn isolated_copy(&self) -> BuildStore {
        let copy = BuildStore::new();
        for (k, v) in self.0.borrow().iter() {
            copy.set(k, v.deep_clone());
        }
        copy
    }

    pub(crate) fn entries(&self) -> ObjectRef {
        self.0.clone()
    }
}

impl fmt::Debug for BuildStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.borrow().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting_matches_js() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(-3.0), "-3");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(-0.0), "0");
    }

    #[test]
    fn test_string_conversion() {
        let arr = Value::array(vec![1.0.into(), Value::Null, "x".into()]);
        assert_eq!(arr.to_js_string(), "1,,x");
        assert_eq!(Value::empty_object().to_js_string(), "[object Object]");
        assert_eq!(Value::Undefined.to_js_string(), "undefined");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("0").is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn test_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::string("1").loose_equals(&Value::Number(1.0)));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        let a = Value::array(vec![]);
        assert!(a.strict_equals(&a.clone()));
        assert!(!a.strict_equals(&Value::array(vec![])));
    }

    #[test]
    fn test_json_omits_undefined_and_keeps_order() {
        let mut map = IndexMap::new();
        map.insert("z".to_string(), Value::Number(1.0));
        map.insert("a".to_string(), Value::Undefined);
        map.insert("m".to_string(), Value::array(vec![Value::Undefined]));
        let json = Value::object(map).to_json().unwrap().unwrap();
        assert_eq!(json.to_string(), r#"{"z":1,"m":[null]}"#);
    }

    #[test]
    fn test_isolated_copy_does_not_share() {
        let store = BuildStore::new();
        store.set("list", Value::array(vec![1.0.into()]));
        let copy = store.isolated_copy();
        if let Value::Array(items) = copy.get("list") {
            items.borrow_mut().push(2.0.into());
        }
        assert_eq!(store.get("list").to_js_string(), "1");
        assert_eq!(copy.get("list").to_js_string(), "1,2");
        assert!(!store.ptr_eq(&copy));
        assert!(store.ptr_eq(&store.clone()));
    }
}
