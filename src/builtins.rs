//! Builtin globals and methods available to build scripts and template
//! expressions.
//!
//! Every builtin is a [`Function::Native`] identified by a dotted name
//! (`Math.floor`, `Array.prototype.map`, `buildStore.get`); [`call`]
//! dispatches on that name.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::cell::RefCell;
use std::cmp::Ordering;

use crate::interpreter::{describe_thrown, throw_error, to_uint32, Abort, Exec, Interpreter};
use crate::value::{number_to_string, Function, Special, Value};

lazy_static! {
    static ref FLOAT_PREFIX: Regex =
        Regex::new(r"^[+-]?(Infinity|(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?)").unwrap();
}

const GLOBAL_FUNCTIONS: &[&str] = &[
    "Math",
    "JSON",
    "Object",
    "Array",
    "String",
    "Number",
    "Boolean",
    "Promise",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "Error",
    "TypeError",
    "RangeError",
    "SyntaxError",
    "ReferenceError",
    "console",
];

const STATIC_METHODS: &[(&str, &[&str])] = &[
    (
        "Math",
        &[
            "floor", "ceil", "round", "trunc", "abs", "sign", "min", "max", "pow", "sqrt", "cbrt",
            "log", "log2", "log10", "exp", "sin", "cos", "tan", "atan2", "hypot",
        ],
    ),
    ("JSON", &["stringify", "parse"]),
    (
        "Object",
        &["keys", "values", "entries", "assign", "fromEntries", "freeze"],
    ),
    ("Array", &["isArray", "from", "of"]),
    (
        "Number",
        &["isInteger", "isFinite", "isNaN", "isSafeInteger", "parseFloat", "parseInt"],
    ),
    ("String", &["fromCharCode"]),
    ("Promise", &["all", "resolve", "reject"]),
    ("console", &["log", "info", "warn", "error", "debug"]),
];

const STRING_METHODS: &[&str] = &[
    "toUpperCase",
    "toLowerCase",
    "trim",
    "trimStart",
    "trimEnd",
    "split",
    "includes",
    "startsWith",
    "endsWith",
    "indexOf",
    "lastIndexOf",
    "slice",
    "substring",
    "replace",
    "replaceAll",
    "repeat",
    "padStart",
    "padEnd",
    "charAt",
    "charCodeAt",
    "at",
    "concat",
    "toString",
    "valueOf",
    "localeCompare",
];

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "map", "filter", "forEach", "reduce", "find", "findIndex",
    "some", "every", "includes", "indexOf", "join", "slice", "concat", "reverse", "sort", "flat",
    "flatMap", "at", "fill", "splice", "entries", "keys", "toString",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString", "valueOf"];
const BOOLEAN_METHODS: &[&str] = &["toString", "valueOf"];
const OBJECT_METHODS: &[&str] = &["hasOwnProperty", "toString"];
const FUNCTION_METHODS: &[&str] = &["call", "apply"];
const STORE_METHODS: &[&str] = &["get", "set", "has", "delete", "keys"];

// ═══════════════════════════════════════════════════════════════════════════════
// LOOKUP
// ═══════════════════════════════════════════════════════════════════════════════

pub fn global(name: &str) -> Option<Value> {
    match name {
        "NaN" => Some(Value::Number(f64::NAN)),
        "Infinity" => Some(Value::Number(f64::INFINITY)),
        _ if GLOBAL_FUNCTIONS.contains(&name) => Some(Value::native(name, Value::Undefined)),
        _ => None,
    }
}

/// `Namespace.key` for a builtin namespace or constructor.
pub fn static_member(namespace: &str, key: &str) -> Option<Value> {
    let constant = match (namespace, key) {
        ("Math", "PI") => Some(std::f64::consts::PI),
        ("Math", "E") => Some(std::f64::consts::E),
        ("Math", "LN2") => Some(std::f64::consts::LN_2),
        ("Math", "LN10") => Some(std::f64::consts::LN_10),
        ("Math", "SQRT2") => Some(std::f64::consts::SQRT_2),
        ("Number", "MAX_SAFE_INTEGER") => Some(9_007_199_254_740_991.0),
        ("Number", "MIN_SAFE_INTEGER") => Some(-9_007_199_254_740_991.0),
        ("Number", "EPSILON") => Some(f64::EPSILON),
        ("Number", "POSITIVE_INFINITY") => Some(f64::INFINITY),
        ("Number", "NEGATIVE_INFINITY") => Some(f64::NEG_INFINITY),
        ("Number", "NaN") => Some(f64::NAN),
        _ => None,
    };
    if let Some(n) = constant {
        return Some(Value::Number(n));
    }
    STATIC_METHODS
        .iter()
        .find(|(ns, _)| *ns == namespace)
        .filter(|(_, methods)| methods.contains(&key))
        .map(|_| Value::native(&format!("{}.{}", namespace, key), Value::Undefined))
}

/// A method looked up on a receiver, bound to it.
pub fn prototype_method(receiver: &Value, key: &str) -> Option<Value> {
    let (prefix, methods) = match receiver {
        Value::String(_) => ("String.prototype", STRING_METHODS),
        Value::Array(_) => ("Array.prototype", ARRAY_METHODS),
        Value::Number(_) => ("Number.prototype", NUMBER_METHODS),
        Value::Bool(_) => ("Boolean.prototype", BOOLEAN_METHODS),
        Value::Object(_) => ("Object.prototype", OBJECT_METHODS),
        Value::Function(_) => ("Function.prototype", FUNCTION_METHODS),
        Value::Special(Special::BuildStore(_)) => ("buildStore", STORE_METHODS),
        _ => return None,
    };
    methods
        .contains(&key)
        .then(|| Value::native(&format!("{}.{}", prefix, key), receiver.clone()))
}

pub fn make_error(kind: &str, message: &str) -> Value {
    let mut map = IndexMap::new();
    map.insert("name".to_string(), Value::string(kind));
    map.insert("message".to_string(), Value::string(message));
    Value::object(map)
}

pub fn instance_of(value: &Value, constructor: &Value) -> bool {
    let Value::Function(func) = constructor else {
        return false;
    };
    let Function::Native { name, .. } = func.as_ref() else {
        return false;
    };
    match (name.as_ref(), value) {
        ("Array", Value::Array(_)) => true,
        ("Object", Value::Array(_) | Value::Object(_) | Value::Function(_)) => true,
        ("Error", Value::Object(map)) => map
            .borrow()
            .get("name")
            .and_then(|n| n.as_str().map(|s| s.ends_with("Error")))
            .unwrap_or(false),
        (kind, Value::Object(map)) if kind.ends_with("Error") => map
            .borrow()
            .get("name")
            .map(|n| n.as_str() == Some(kind))
            .unwrap_or(false),
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISPATCH
// ═══════════════════════════════════════════════════════════════════════════════

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn type_error(message: String) -> Abort {
    throw_error("TypeError", &message)
}

pub(crate) fn construct(
    interp: &Interpreter<'_>,
    name: &str,
    args: Vec<Value>,
) -> Exec<Option<Value>> {
    Ok(Some(match name {
        "Error" | "TypeError" | "RangeError" | "SyntaxError" | "ReferenceError" => {
            error_value(name, &args)
        }
        "Array" => match args.as_slice() {
            [Value::Number(n)] => {
                if *n < 0.0 || n.fract() != 0.0 {
                    return Err(throw_error("RangeError", "Invalid array length"));
                }
                Value::array(vec![Value::Undefined; *n as usize])
            }
            _ => Value::array(args.clone()),
        },
        "Object" => Value::empty_object(),
        "String" | "Number" | "Boolean" => call(interp, name, Value::Undefined, args)?,
        _ => return Ok(None),
    }))
}

fn error_value(kind: &str, args: &[Value]) -> Value {
    let message = match args.first() {
        Some(v) if !v.is_undefined() => v.to_js_string(),
        _ => String::new(),
    };
    make_error(kind, &message)
}

pub(crate) fn call(
    interp: &Interpreter<'_>,
    name: &str,
    this: Value,
    args: Vec<Value>,
) -> Exec<Value> {
    if let Some(method) = name.strip_prefix("String.prototype.") {
        let s = this.to_js_string();
        return string_method(interp, method, &s, args);
    }
    if let Some(method) = name.strip_prefix("Array.prototype.") {
        return array_method(interp, method, &this, args);
    }
    if let Some(method) = name.strip_prefix("Math.") {
        return Ok(Value::Number(math(method, &args)));
    }
    if let Some(level) = name.strip_prefix("console.") {
        console(level, &args);
        return Ok(Value::Undefined);
    }
    if let Some(method) = name.strip_prefix("buildStore.") {
        return store_method(method, &this, &args);
    }

    match name {
        "String" => Ok(Value::from(match args.first() {
            Some(v) => v.to_js_string(),
            None => String::new(),
        })),
        "Number" => Ok(Value::Number(args.first().map(Value::to_number).unwrap_or(0.0))),
        "Boolean" => Ok(Value::Bool(arg(&args, 0).is_truthy())),
        "Object" => Ok(match arg(&args, 0) {
            v if v.is_nullish() => Value::empty_object(),
            v => v,
        }),
        "Array" | "Array.of" => Ok(Value::array(args)),
        "Error" | "TypeError" | "RangeError" | "SyntaxError" | "ReferenceError" => {
            Ok(error_value(name, &args))
        }
        "parseInt" | "Number.parseInt" => Ok(Value::Number(parse_int(
            &arg(&args, 0).to_js_string(),
            args.get(1).map(Value::to_number),
        ))),
        "parseFloat" | "Number.parseFloat" => {
            Ok(Value::Number(parse_float(&arg(&args, 0).to_js_string())))
        }
        "isNaN" => Ok(Value::Bool(arg(&args, 0).to_number().is_nan())),
        "isFinite" => Ok(Value::Bool(arg(&args, 0).to_number().is_finite())),
        "Number.isNaN" => Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_nan()))),
        "Number.isFinite" => Ok(Value::Bool(
            matches!(arg(&args, 0), Value::Number(n) if n.is_finite()),
        )),
        "Number.isInteger" => Ok(Value::Bool(
            matches!(arg(&args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0),
        )),
        "Number.isSafeInteger" => Ok(Value::Bool(matches!(
            arg(&args, 0),
            Value::Number(n) if n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_991.0
        ))),
        "Number.prototype.toFixed" => {
            let digits = arg(&args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits as usize };
            if digits > 100 {
                return Err(throw_error(
                    "RangeError",
                    "toFixed() digits argument must be between 0 and 100",
                ));
            }
            Ok(Value::from(format!("{:.*}", digits, this.to_number())))
        }
        "Number.prototype.toString" => {
            let radix = match arg(&args, 0) {
                Value::Undefined => 10,
                r => r.to_number() as u32,
            };
            if !(2..=36).contains(&radix) {
                return Err(throw_error(
                    "RangeError",
                    "toString() radix must be between 2 and 36",
                ));
            }
            Ok(Value::from(to_radix_string(this.to_number(), radix)))
        }
        "Number.prototype.valueOf" | "Boolean.prototype.valueOf" => Ok(this),
        "Boolean.prototype.toString" | "Object.prototype.toString" => {
            Ok(Value::from(this.to_js_string()))
        }
        "Object.prototype.hasOwnProperty" => {
            let key = arg(&args, 0).to_js_string();
            Ok(Value::Bool(match &this {
                Value::Object(map) => map.borrow().contains_key(&key),
                _ => false,
            }))
        }
        "Function.prototype.call" => {
            let mut args = args.into_iter();
            let this_arg = args.next().unwrap_or_default();
            interp.call_value(&this, this_arg, args.collect())
        }
        "Function.prototype.apply" => {
            let list = match arg(&args, 1) {
                Value::Undefined | Value::Null => Vec::new(),
                other => interp.iterate(&other)?,
            };
            interp.call_value(&this, arg(&args, 0), list)
        }
        "Object.keys" => Ok(Value::array(
            interp
                .own_entries(&arg(&args, 0))
                .into_iter()
                .map(|(k, _)| Value::from(k))
                .collect(),
        )),
        "Object.values" => Ok(Value::array(
            interp
                .own_entries(&arg(&args, 0))
                .into_iter()
                .map(|(_, v)| v)
                .collect(),
        )),
        "Object.entries" => Ok(Value::array(
            interp
                .own_entries(&arg(&args, 0))
                .into_iter()
                .map(|(k, v)| Value::array(vec![Value::from(k), v]))
                .collect(),
        )),
        "Object.assign" => {
            let target = arg(&args, 0);
            for source in args.iter().skip(1) {
                for (k, v) in interp.own_entries(source) {
                    interp.set_member(&target, &k, v)?;
                }
            }
            Ok(target)
        }
        "Object.fromEntries" => {
            let mut map = IndexMap::new();
            for entry in interp.iterate(&arg(&args, 0))? {
                let key = interp.get_member(&entry, "0")?.to_js_string();
                let value = interp.get_member(&entry, "1")?;
                map.insert(key, value);
            }
            Ok(Value::object(map))
        }
        "Object.freeze" => Ok(arg(&args, 0)),
        "Array.isArray" => Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_)))),
        "Array.from" => {
            let source = arg(&args, 0);
            let items = match &source {
                Value::Array(_) | Value::String(_) => interp.iterate(&source)?,
                Value::Object(map) => {
                    let len = map
                        .borrow()
                        .get("length")
                        .map(Value::to_number)
                        .unwrap_or(0.0);
                    vec![Value::Undefined; if len > 0.0 { len as usize } else { 0 }]
                }
                _ => Vec::new(),
            };
            match args.get(1) {
                Some(f @ Value::Function(_)) => {
                    let mut out = Vec::with_capacity(items.len());
                    for (i, item) in items.into_iter().enumerate() {
                        out.push(interp.call_value(
                            f,
                            Value::Undefined,
                            vec![item, Value::Number(i as f64)],
                        )?);
                    }
                    Ok(Value::array(out))
                }
                _ => Ok(Value::array(items)),
            }
        }
        "String.fromCharCode" => Ok(Value::from(
            args.iter()
                .filter_map(|v| char::from_u32(v.to_number() as u32))
                .collect::<String>(),
        )),
        "JSON.stringify" => json_stringify(&arg(&args, 0), &arg(&args, 2)),
        "JSON.parse" => {
            let text = arg(&args, 0).to_js_string();
            serde_json::from_str::<serde_json::Value>(&text)
                .map(|json| Value::from_json(&json))
                .map_err(|e| throw_error("SyntaxError", &format!("JSON.parse: {}", e)))
        }
        "Promise.all" => Ok(Value::array(interp.iterate(&arg(&args, 0))?)),
        "Promise.resolve" => Ok(arg(&args, 0)),
        "Promise.reject" => Err(Abort::Throw(arg(&args, 0))),
        "resolveUrl" => {
            let relative = arg(&args, 0).to_js_string();
            Ok(Value::from(
                interp
                    .realm
                    .host
                    .resolve_url(&interp.realm.file_url, &relative),
            ))
        }
        other => Err(type_error(format!("{} is not a function", other))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NUMBERS
// ═══════════════════════════════════════════════════════════════════════════════

fn math(method: &str, args: &[Value]) -> f64 {
    let x = arg(args, 0).to_number();
    let y = arg(args, 1).to_number();
    match method {
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => (x + 0.5).floor(),
        "trunc" => x.trunc(),
        "abs" => x.abs(),
        "sign" => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        "min" => args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else {
                acc.min(n)
            }
        }),
        "max" => args
            .iter()
            .map(Value::to_number)
            .fold(f64::NEG_INFINITY, |acc, n| {
                if acc.is_nan() || n.is_nan() {
                    f64::NAN
                } else {
                    acc.max(n)
                }
            }),
        "pow" => x.powf(y),
        "sqrt" => x.sqrt(),
        "cbrt" => x.cbrt(),
        "log" => x.ln(),
        "log2" => x.log2(),
        "log10" => x.log10(),
        "exp" => x.exp(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "atan2" => x.atan2(y),
        "hypot" => args
            .iter()
            .map(|v| v.to_number().powi(2))
            .sum::<f64>()
            .sqrt(),
        _ => f64::NAN,
    }
}

fn parse_int(text: &str, radix: Option<f64>) -> f64 {
    let mut s = text.trim();
    let mut sign = 1.0;
    if let Some(rest) = s.strip_prefix('-') {
        sign = -1.0;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    let mut radix = match radix {
        Some(r) if !r.is_nan() && r != 0.0 => r as u32,
        _ => 10,
    };
    if radix == 16 || radix == 10 {
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            if radix == 10 && !text.contains(['x', 'X']) {
                return f64::NAN;
            }
            s = hex;
            radix = 16;
        }
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: String = s.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits.chars().fold(0.0, |acc, c| {
        acc * f64::from(radix) + f64::from(c.to_digit(radix).unwrap_or(0))
    });
    sign * value
}

fn parse_float(text: &str) -> f64 {
    FLOAT_PREFIX
        .find(text.trim_start())
        .map(|m| match m.as_str().trim_start_matches('+') {
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            num => num.parse::<f64>().unwrap_or(f64::NAN),
        })
        .unwrap_or(f64::NAN)
}

fn to_radix_string(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() || n.fract() != 0.0 {
        return number_to_string(n);
    }
    let negative = n < 0.0;
    let mut value = n.abs() as u64;
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let digit = (value % u64::from(radix)) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        value /= u64::from(radix);
    }
    if negative {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

fn json_stringify(value: &Value, space: &Value) -> Exec<Value> {
    let json = value
        .to_json()
        .map_err(|message| throw_error("TypeError", &message))?;
    let Some(json) = json else {
        return Ok(Value::Undefined);
    };
    let indent = match space {
        Value::Number(n) if *n >= 1.0 => " ".repeat((*n as usize).min(10)),
        Value::String(s) => s.chars().take(10).collect(),
        _ => String::new(),
    };
    if indent.is_empty() {
        return Ok(Value::from(json.to_string()));
    }
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    serde::Serialize::serialize(&json, &mut serializer)
        .map_err(|e| throw_error("TypeError", &e.to_string()))?;
    Ok(Value::from(String::from_utf8_lossy(&out).into_owned()))
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves a relative index the way `slice` does.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if value.is_undefined() {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

/// The UTF-16 index of a byte offset.
fn unit_index(s: &str, byte_index: usize) -> usize {
    s[..byte_index].encode_utf16().count()
}

/// The byte offset of a UTF-16 index, rounded up to a char boundary.
fn byte_offset(s: &str, unit: usize) -> usize {
    let mut seen = 0;
    for (i, c) in s.char_indices() {
        if seen >= unit {
            return i;
        }
        seen += c.len_utf16();
    }
    s.len()
}

/// One UTF-16 unit as a string. An unpaired surrogate becomes U+FFFD.
pub(crate) fn unit_string(unit: u16) -> String {
    String::from_utf16_lossy(&[unit])
}

fn string_method(
    interp: &Interpreter<'_>,
    method: &str,
    s: &str,
    args: Vec<Value>,
) -> Exec<Value> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = units.len();
    let span = |start: usize, end: usize| String::from_utf16_lossy(&units[start..end]);
    let text = |i: usize| arg(&args, i).to_js_string();
    Ok(match method {
        "toUpperCase" => Value::from(s.to_uppercase()),
        "toLowerCase" => Value::from(s.to_lowercase()),
        "trim" => Value::string(s.trim()),
        "trimStart" => Value::string(s.trim_start()),
        "trimEnd" => Value::string(s.trim_end()),
        "toString" | "valueOf" => Value::string(s),
        "split" => {
            let limit = match arg(&args, 1) {
                Value::Undefined => usize::MAX,
                v => to_uint32(v.to_number()) as usize,
            };
            let parts: Vec<Value> = match arg(&args, 0) {
                Value::Undefined => vec![Value::string(s)],
                sep => {
                    let sep = sep.to_js_string();
                    if sep.is_empty() {
                        units.iter().map(|u| Value::from(unit_string(*u))).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::string).collect()
                    }
                }
            };
            Value::array(parts.into_iter().take(limit).collect())
        }
        "includes" => {
            let from = byte_offset(s, relative_index(&arg(&args, 1), len, 0));
            Value::Bool(s[from..].contains(text(0).as_str()))
        }
        "startsWith" => {
            let from = byte_offset(s, relative_index(&arg(&args, 1), len, 0));
            Value::Bool(s[from..].starts_with(text(0).as_str()))
        }
        "endsWith" => {
            let end = byte_offset(s, relative_index(&arg(&args, 1), len, len));
            Value::Bool(s[..end].ends_with(text(0).as_str()))
        }
        "indexOf" => {
            let from = byte_offset(s, relative_index(&arg(&args, 1), len, 0));
            Value::Number(
                s[from..]
                    .find(text(0).as_str())
                    .map(|i| unit_index(s, from + i) as f64)
                    .unwrap_or(-1.0),
            )
        }
        "lastIndexOf" => Value::Number(
            s.rfind(text(0).as_str())
                .map(|i| unit_index(s, i) as f64)
                .unwrap_or(-1.0),
        ),
        "slice" => {
            let start = relative_index(&arg(&args, 0), len, 0);
            let end = relative_index(&arg(&args, 1), len, len);
            Value::from(if start < end {
                span(start, end)
            } else {
                String::new()
            })
        }
        "substring" => {
            let clamp = |v: Value, default: usize| {
                if v.is_undefined() {
                    return default;
                }
                let n = v.to_number();
                if n.is_nan() || n < 0.0 {
                    0
                } else {
                    (n as usize).min(len)
                }
            };
            let a = clamp(arg(&args, 0), 0);
            let b = clamp(arg(&args, 1), len);
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            Value::from(span(start, end))
        }
        "replace" | "replaceAll" => {
            let pattern = text(0);
            let replacement = arg(&args, 1);
            let mut out = String::new();
            let mut rest = s;
            let mut offset = 0;
            while let Some(found) = rest.find(pattern.as_str()) {
                out.push_str(&rest[..found]);
                let matched_at = offset + found;
                let substitute = match &replacement {
                    f @ Value::Function(_) => interp
                        .call_value(
                            f,
                            Value::Undefined,
                            vec![
                                Value::string(&pattern),
                                Value::Number(unit_index(s, matched_at) as f64),
                                Value::string(s),
                            ],
                        )?
                        .to_js_string(),
                    other => other.to_js_string().replace("$&", &pattern),
                };
                out.push_str(&substitute);
                let advance = found + pattern.len();
                if pattern.is_empty() {
                    // Empty patterns match between every character.
                    match rest[advance..].chars().next() {
                        Some(c) => {
                            out.push(c);
                            offset += advance + c.len_utf8();
                            rest = &rest[advance + c.len_utf8()..];
                        }
                        None => {
                            rest = "";
                            break;
                        }
                    }
                } else {
                    offset += advance;
                    rest = &rest[advance..];
                }
                if method == "replace" {
                    break;
                }
            }
            out.push_str(rest);
            Value::from(out)
        }
        "repeat" => {
            let n = arg(&args, 0).to_number();
            if n < 0.0 || n.is_infinite() {
                return Err(throw_error("RangeError", &format!("Invalid count value: {}", n)));
            }
            let count = if n.is_nan() { 0 } else { n as usize };
            interp.check_string_length(len.saturating_mul(count))?;
            Value::from(s.repeat(count))
        }
        "padStart" | "padEnd" => {
            let target = arg(&args, 0).to_number();
            let target = if target.is_nan() { 0 } else { target as usize };
            let fill: Vec<u16> = match arg(&args, 1) {
                Value::Undefined => vec![u16::from(b' ')],
                v => v.to_js_string().encode_utf16().collect(),
            };
            if target <= len || fill.is_empty() {
                return Ok(Value::string(s));
            }
            interp.check_string_length(target)?;
            let pad: Vec<u16> = fill.iter().copied().cycle().take(target - len).collect();
            let pad = String::from_utf16_lossy(&pad);
            Value::from(if method == "padStart" {
                format!("{}{}", pad, s)
            } else {
                format!("{}{}", s, pad)
            })
        }
        "charAt" => {
            let i = arg(&args, 0).to_number();
            let i = if i.is_nan() { 0.0 } else { i };
            Value::from(
                if i >= 0.0 {
                    units.get(i as usize).map(|u| unit_string(*u))
                } else {
                    None
                }
                .unwrap_or_default(),
            )
        }
        "charCodeAt" => {
            let i = arg(&args, 0).to_number();
            let i = if i.is_nan() { 0.0 } else { i };
            Value::Number(
                if i >= 0.0 {
                    units.get(i as usize).map(|u| f64::from(*u))
                } else {
                    None
                }
                .unwrap_or(f64::NAN),
            )
        }
        "at" => {
            let i = arg(&args, 0).to_number().trunc();
            let index = if i < 0.0 { len as f64 + i } else { i };
            if index < 0.0 {
                Value::Undefined
            } else {
                units
                    .get(index as usize)
                    .map(|u| Value::from(unit_string(*u)))
                    .unwrap_or_default()
            }
        }
        "concat" => {
            let parts: Vec<String> = args.iter().map(Value::to_js_string).collect();
            let mut all: Vec<&str> = vec![s];
            all.extend(parts.iter().map(String::as_str));
            interp.check_concat(&all)?;
            Value::from(all.concat())
        }
        "localeCompare" => Value::Number(match s.cmp(text(0).as_str()) {
            Ordering::Less => -1.0,
            Ordering::Equal => 0.0,
            Ordering::Greater => 1.0,
        }),
        other => return Err(type_error(format!("String.prototype.{} is not a function", other))),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARRAYS
// ═══════════════════════════════════════════════════════════════════════════════

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

fn flatten_into(items: Vec<Value>, depth: f64, out: &mut Vec<Value>) {
    for item in items {
        match &item {
            Value::Array(inner) if depth >= 1.0 => {
                let inner = inner.borrow().clone();
                flatten_into(inner, depth - 1.0, out);
            }
            _ => out.push(item),
        }
    }
}

fn array_method(
    interp: &Interpreter<'_>,
    method: &str,
    this: &Value,
    args: Vec<Value>,
) -> Exec<Value> {
    let Value::Array(items) = this else {
        return Err(type_error(format!(
            "Array.prototype.{} called on a non-array",
            method
        )));
    };
    // Callbacks may mutate the array; iterate over a snapshot.
    let snapshot = || items.borrow().clone();
    let callback = |i: usize| -> Exec<Value> {
        match args.get(i) {
            Some(f @ Value::Function(_)) => Ok(f.clone()),
            other => Err(type_error(format!(
                "{} is not a function",
                other.cloned().unwrap_or_default().to_js_string()
            ))),
        }
    };
    let visit = |f: &Value, item: &Value, index: usize| -> Exec<Value> {
        interp.call_value(
            f,
            Value::Undefined,
            vec![item.clone(), Value::Number(index as f64), this.clone()],
        )
    };

    Ok(match method {
        "push" => {
            let mut items = items.borrow_mut();
            items.extend(args.iter().cloned());
            Value::Number(items.len() as f64)
        }
        "pop" => items.borrow_mut().pop().unwrap_or_default(),
        "shift" => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            }
        }
        "unshift" => {
            let mut items = items.borrow_mut();
            for (i, v) in args.iter().enumerate() {
                items.insert(i, v.clone());
            }
            Value::Number(items.len() as f64)
        }
        "map" => {
            let f = callback(0)?;
            let mut out = Vec::new();
            for (i, item) in snapshot().iter().enumerate() {
                out.push(visit(&f, item, i)?);
            }
            Value::array(out)
        }
        "filter" => {
            let f = callback(0)?;
            let mut out = Vec::new();
            for (i, item) in snapshot().iter().enumerate() {
                if visit(&f, item, i)?.is_truthy() {
                    out.push(item.clone());
                }
            }
            Value::array(out)
        }
        "forEach" => {
            let f = callback(0)?;
            for (i, item) in snapshot().iter().enumerate() {
                visit(&f, item, i)?;
            }
            Value::Undefined
        }
        "reduce" => {
            let f = callback(0)?;
            let list = snapshot();
            let mut iter = list.iter().enumerate();
            let mut acc = match args.get(1) {
                Some(init) => init.clone(),
                None => match iter.next() {
                    Some((_, first)) => first.clone(),
                    None => {
                        return Err(type_error(
                            "Reduce of empty array with no initial value".to_string(),
                        ))
                    }
                },
            };
            for (i, item) in iter {
                acc = interp.call_value(
                    &f,
                    Value::Undefined,
                    vec![acc, item.clone(), Value::Number(i as f64), this.clone()],
                )?;
            }
            acc
        }
        "find" | "findIndex" => {
            let f = callback(0)?;
            for (i, item) in snapshot().iter().enumerate() {
                if visit(&f, item, i)?.is_truthy() {
                    return Ok(if method == "find" {
                        item.clone()
                    } else {
                        Value::Number(i as f64)
                    });
                }
            }
            if method == "find" {
                Value::Undefined
            } else {
                Value::Number(-1.0)
            }
        }
        "some" => {
            let f = callback(0)?;
            for (i, item) in snapshot().iter().enumerate() {
                if visit(&f, item, i)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Value::Bool(false)
        }
        "every" => {
            let f = callback(0)?;
            for (i, item) in snapshot().iter().enumerate() {
                if !visit(&f, item, i)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Value::Bool(true)
        }
        "includes" => {
            let needle = arg(&args, 0);
            Value::Bool(items.borrow().iter().any(|v| same_value_zero(v, &needle)))
        }
        "indexOf" => {
            let needle = arg(&args, 0);
            Value::Number(
                items
                    .borrow()
                    .iter()
                    .position(|v| v.strict_equals(&needle))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            )
        }
        "join" | "toString" => {
            let sep = match arg(&args, 0) {
                Value::Undefined => ",".to_string(),
                v if method == "join" => v.to_js_string(),
                _ => ",".to_string(),
            };
            Value::from(
                items
                    .borrow()
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            v.to_js_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(&sep),
            )
        }
        "slice" => {
            let list = snapshot();
            let start = relative_index(&arg(&args, 0), list.len(), 0);
            let end = relative_index(&arg(&args, 1), list.len(), list.len());
            Value::array(if start < end {
                list[start..end].to_vec()
            } else {
                Vec::new()
            })
        }
        "concat" => {
            let mut out = snapshot();
            for a in &args {
                match a {
                    Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                    _ => out.push(a.clone()),
                }
            }
            Value::array(out)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            this.clone()
        }
        "sort" => {
            let comparator = args.first().filter(|f| matches!(f, Value::Function(_)));
            let mut list = snapshot();
            let failure: RefCell<Option<Abort>> = RefCell::new(None);
            list.sort_by(|a, b| {
                if failure.borrow().is_some() {
                    return Ordering::Equal;
                }
                match (a.is_undefined(), b.is_undefined()) {
                    (true, true) => return Ordering::Equal,
                    (true, false) => return Ordering::Greater,
                    (false, true) => return Ordering::Less,
                    _ => {}
                }
                match comparator {
                    Some(f) => {
                        match interp.call_value(f, Value::Undefined, vec![a.clone(), b.clone()]) {
                            Ok(v) => v.to_number().partial_cmp(&0.0).unwrap_or(Ordering::Equal),
                            Err(abort) => {
                                *failure.borrow_mut() = Some(abort);
                                Ordering::Equal
                            }
                        }
                    }
                    None => a.to_js_string().cmp(&b.to_js_string()),
                }
            });
            if let Some(abort) = failure.into_inner() {
                return Err(abort);
            }
            *items.borrow_mut() = list;
            this.clone()
        }
        "flat" => {
            let depth = match arg(&args, 0) {
                Value::Undefined => 1.0,
                v => v.to_number(),
            };
            let mut out = Vec::new();
            flatten_into(snapshot(), depth, &mut out);
            Value::array(out)
        }
        "flatMap" => {
            let f = callback(0)?;
            let mut mapped = Vec::new();
            for (i, item) in snapshot().iter().enumerate() {
                mapped.push(visit(&f, item, i)?);
            }
            let mut out = Vec::new();
            flatten_into(mapped, 1.0, &mut out);
            Value::array(out)
        }
        "at" => {
            let list = items.borrow();
            let i = arg(&args, 0).to_number().trunc();
            let index = if i < 0.0 { list.len() as f64 + i } else { i };
            if index < 0.0 {
                Value::Undefined
            } else {
                list.get(index as usize).cloned().unwrap_or_default()
            }
        }
        "fill" => {
            let mut list = items.borrow_mut();
            let len = list.len();
            let start = relative_index(&arg(&args, 1), len, 0);
            let end = relative_index(&arg(&args, 2), len, len);
            let value = arg(&args, 0);
            for slot in list.iter_mut().take(end).skip(start) {
                *slot = value.clone();
            }
            drop(list);
            this.clone()
        }
        "splice" => {
            let mut list = items.borrow_mut();
            let len = list.len();
            let start = relative_index(&arg(&args, 0), len, 0);
            let count = match args.get(1) {
                None => len - start,
                Some(v) => {
                    let n = v.to_number();
                    if n.is_nan() || n < 0.0 {
                        0
                    } else {
                        (n as usize).min(len - start)
                    }
                }
            };
            let inserted: Vec<Value> = args.iter().skip(2).cloned().collect();
            let removed: Vec<Value> = list.splice(start..start + count, inserted).collect();
            Value::array(removed)
        }
        "entries" => Value::array(
            snapshot()
                .into_iter()
                .enumerate()
                .map(|(i, v)| Value::array(vec![Value::Number(i as f64), v]))
                .collect(),
        ),
        "keys" => Value::array(
            (0..items.borrow().len())
                .map(|i| Value::Number(i as f64))
                .collect(),
        ),
        other => return Err(type_error(format!("Array.prototype.{} is not a function", other))),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILD STORE AND CONSOLE
// ═══════════════════════════════════════════════════════════════════════════════

fn store_method(
    method: &str,
    this: &Value,
    args: &[Value],
) -> Exec<Value> {
    let Value::Special(Special::BuildStore(store)) = this else {
        return Err(type_error(format!("buildStore.{} called on a non-store", method)));
    };
    let key = arg(args, 0).to_js_string();
    Ok(match method {
        "get" => store.get(&key),
        "set" => {
            store.set(&key, arg(args, 1));
            this.clone()
        }
        "has" => Value::Bool(store.has(&key)),
        "delete" => Value::Bool(store.delete(&key)),
        "keys" => Value::array(store.keys().into_iter().map(Value::from).collect()),
        other => return Err(type_error(format!("buildStore.{} is not a function", other))),
    })
}

fn console(level: &str, args: &[Value]) {
    let line = args
        .iter()
        .map(|v| match v {
            Value::String(s) => s.to_string(),
            Value::Object(map) if map.borrow().contains_key("message") => describe_thrown(v),
            other => format!("{:?}", other),
        })
        .collect::<Vec<_>>()
        .join(" ");
    match level {
        "error" => tracing::error!(target: "markup_compiler::console", "{}", line),
        "warn" => tracing::warn!(target: "markup_compiler::console", "{}", line),
        "debug" => tracing::debug!(target: "markup_compiler::console", "{}", line),
        _ => tracing::info!(target: "markup_compiler::console", "{}", line),
    }
}
