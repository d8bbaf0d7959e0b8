//! Tree-walking interpreter for lowered build scripts and template
//! expressions.
//!
//! Module records are loaded before a script starts, so evaluation itself
//! never suspends: `await v` yields `v`.

use indexmap::IndexMap;
use oxc_syntax::operator::{
    AssignmentOperator, BinaryOperator, LogicalOperator, UnaryOperator, UpdateOperator,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::bindings::{Binding, Bindings};
use crate::builtins;
use crate::config::CompilerConfig;
use crate::error::{BindingError, ScriptError};
use crate::host::CompilerHost;
use crate::script_ir::{self as ir, Name};
use crate::value::{BuildStore, ClassValue, Closure, Function, Special, Value};

// ═══════════════════════════════════════════════════════════════════════════════
// FRAMES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Top level of a script or expression: declarations land in the
    /// unit's [`Bindings`].
    Global,
    Function,
    Block,
}

/// A lexical scope of running script code.
pub struct Frame {
    kind: FrameKind,
    vars: RefCell<HashMap<Name, Binding>>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    pub fn global() -> Rc<Frame> {
        Rc::new(Frame {
            kind: FrameKind::Global,
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    fn child(parent: &Rc<Frame>, kind: FrameKind) -> Rc<Frame> {
        Rc::new(Frame {
            kind,
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REALM
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a script can reach besides its own locals.
pub struct Realm<'a> {
    pub bindings: &'a Bindings,
    pub props: Value,
    pub store: BuildStore,
    pub host: &'a dyn CompilerHost,
    pub file_url: String,
    /// Pre-loaded module records keyed by resolved URL.
    pub modules: HashMap<String, Value>,
    pub config: &'a CompilerConfig,
}

pub(crate) enum Abort {
    Throw(Value),
    /// An optional chain hit a nullish link; caught at the chain boundary.
    ShortCircuit,
    Fatal(ScriptError),
}

pub(crate) type Exec<T> = Result<T, Abort>;

enum Flow {
    Normal,
    Return(Value),
    Break(Option<Name>),
    Continue(Option<Name>),
}

#[derive(Clone)]
struct Ctx {
    frame: Rc<Frame>,
    this: Value,
}

enum Reference {
    Name(Name),
    Member(Value, String),
}

#[derive(Clone, Copy)]
enum BindMode {
    Declare { mutable: bool, var: bool },
    Assign,
}

pub struct Interpreter<'a> {
    pub(crate) realm: Realm<'a>,
    steps: Cell<u64>,
    depth: Cell<usize>,
    global: Rc<Frame>,
}

impl<'a> Interpreter<'a> {
    pub fn new(realm: Realm<'a>) -> Self {
        Self {
            realm,
            steps: Cell::new(0),
            depth: Cell::new(0),
            global: Frame::global(),
        }
    }

    fn global_ctx(&self) -> Ctx {
        Ctx {
            frame: self.global.clone(),
            this: Value::Undefined,
        }
    }

    /// Evaluates a template expression against the unit's bindings.
    pub fn eval_expression(&self, expr: &ir::Expr) -> Result<Value, ScriptError> {
        self.eval(expr, &self.global_ctx())
            .map_err(|abort| self.to_script_error(abort))
    }

    /// Runs a lowered script body. Top-level declarations are written into
    /// the unit's bindings.
    pub fn run_script(&self, body: &[ir::Stmt]) -> Result<(), ScriptError> {
        self.exec_block(body, &self.global_ctx())
            .map(|_| ())
            .map_err(|abort| self.to_script_error(abort))
    }

    fn to_script_error(&self, abort: Abort) -> ScriptError {
        match abort {
            Abort::Throw(value) => ScriptError::Thrown(describe_thrown(&value)),
            Abort::ShortCircuit => ScriptError::Thrown("unterminated optional chain".to_string()),
            Abort::Fatal(err) => err,
        }
    }

    fn tick(&self) -> Exec<()> {
        let steps = self.steps.get() + 1;
        self.steps.set(steps);
        if steps > self.realm.config.max_steps {
            return Err(Abort::Fatal(ScriptError::Limit(format!(
                "more than {} evaluation steps",
                self.realm.config.max_steps
            ))));
        }
        Ok(())
    }

    pub(crate) fn check_string_length(&self, units: usize) -> Exec<()> {
        if units > self.realm.config.max_string_length {
            return Err(throw_error("RangeError", "Invalid string length"));
        }
        Ok(())
    }

    /// [`check_string_length`](Self::check_string_length) for the
    /// concatenation of `parts`. The byte length bounds the unit count.
    pub(crate) fn check_concat(&self, parts: &[&str]) -> Exec<()> {
        let bytes: usize = parts.iter().map(|p| p.len()).sum();
        if bytes <= self.realm.config.max_string_length {
            return Ok(());
        }
        self.check_string_length(parts.iter().map(|p| p.encode_utf16().count()).sum())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // NAMES
    // ═══════════════════════════════════════════════════════════════════════════

    fn declare(&self, frame: &Rc<Frame>, name: &str, value: Value, mutable: bool) -> Exec<()> {
        if frame.kind == FrameKind::Global {
            return self
                .realm
                .bindings
                .declare(name, value, mutable)
                .map_err(binding_abort);
        }
        let mut vars = frame.vars.borrow_mut();
        if let Some(existing) = vars.get(name) {
            if !existing.mutable {
                return Err(binding_abort(BindingError::Redeclared(name.to_string())));
            }
        }
        vars.insert(Rc::from(name), Binding { value, mutable });
        Ok(())
    }

    /// `var` declarations bind in the nearest function or global frame.
    fn declare_var(&self, frame: &Rc<Frame>, name: &str, value: Value) -> Exec<()> {
        let mut target = frame.clone();
        while target.kind == FrameKind::Block {
            match &target.parent {
                Some(parent) => target = parent.clone(),
                None => break,
            }
        }
        self.declare(&target, name, value, true)
    }

    fn try_lookup(&self, frame: &Rc<Frame>, name: &str) -> Option<Value> {
        let mut current = Some(frame.clone());
        while let Some(f) = current {
            if let Some(binding) = f.vars.borrow().get(name) {
                return Some(binding.value.clone());
            }
            current = f.parent.clone();
        }
        if let Some(value) = self.realm.bindings.get(name) {
            return Some(value);
        }
        match name {
            "props" => Some(self.realm.props.clone()),
            "localThis" => Some(Value::Special(Special::LocalThis)),
            "buildStore" => Some(Value::Special(Special::BuildStore(self.realm.store.clone()))),
            "resolveUrl" => Some(Value::native("resolveUrl", Value::Undefined)),
            _ => builtins::global(name),
        }
    }

    fn lookup(&self, frame: &Rc<Frame>, name: &str) -> Exec<Value> {
        self.try_lookup(frame, name)
            .ok_or_else(|| throw_error("ReferenceError", &format!("{} is not defined", name)))
    }

    fn assign_name(&self, frame: &Rc<Frame>, name: &str, value: Value) -> Exec<()> {
        let mut current = Some(frame.clone());
        while let Some(f) = current {
            if let Some(binding) = f.vars.borrow_mut().get_mut(name) {
                if !binding.mutable {
                    return Err(binding_abort(BindingError::ConstAssignment(name.to_string())));
                }
                binding.value = value;
                return Ok(());
            }
            current = f.parent.clone();
        }
        self.realm
            .bindings
            .assign(name, value)
            .map_err(binding_abort)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════════════════

    fn eval(&self, expr: &ir::Expr, ctx: &Ctx) -> Exec<Value> {
        self.tick()?;
        match expr {
            ir::Expr::Literal(v) => Ok(v.clone()),
            ir::Expr::Template { quasis, exprs } => {
                let mut out = String::new();
                for (i, quasi) in quasis.iter().enumerate() {
                    out.push_str(quasi);
                    if let Some(e) = exprs.get(i) {
                        out.push_str(&self.eval(e, ctx)?.to_js_string());
                    }
                }
                Ok(Value::from(out))
            }
            ir::Expr::Ident(name) => self.lookup(&ctx.frame, name),
            ir::Expr::This => Ok(ctx.this.clone()),
            ir::Expr::Array(items) => Ok(Value::array(self.eval_items(items, ctx)?)),
            ir::Expr::Object(items) => {
                let mut map = IndexMap::new();
                for item in items {
                    match item {
                        ir::ObjectItem::Property { key, value } => {
                            let key = self.property_key(key, ctx)?;
                            let value = self.eval(value, ctx)?;
                            map.insert(key, value);
                        }
                        ir::ObjectItem::Spread(e) => {
                            let value = self.eval(e, ctx)?;
                            for (k, v) in self.own_entries(&value) {
                                map.insert(k, v);
                            }
                        }
                    }
                }
                Ok(Value::object(map))
            }
            ir::Expr::Function(def) => Ok(Value::Function(Rc::new(Function::Closure(Closure {
                def: def.clone(),
                frame: ctx.frame.clone(),
                this: if def.is_arrow {
                    Some(ctx.this.clone())
                } else {
                    None
                },
            })))),
            ir::Expr::Class(def) => Ok(Value::Function(Rc::new(Function::Class(ClassValue {
                def: def.clone(),
                frame: ctx.frame.clone(),
            })))),
            ir::Expr::Unary(op, arg) => self.unary(*op, arg, ctx),
            ir::Expr::Update { op, prefix, target } => {
                let reference = self.reference(target, ctx)?;
                let old = self.get_reference(&reference, ctx)?.to_number();
                let new = match op {
                    UpdateOperator::Increment => old + 1.0,
                    UpdateOperator::Decrement => old - 1.0,
                };
                self.put_reference(&reference, Value::Number(new), ctx)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            ir::Expr::Binary(op, left, right) => {
                let l = self.eval(left, ctx)?;
                let r = self.eval(right, ctx)?;
                self.binary(*op, &l, &r)
            }
            ir::Expr::Logical(op, left, right) => {
                let l = self.eval(left, ctx)?;
                let take_left = match op {
                    LogicalOperator::Or => l.is_truthy(),
                    LogicalOperator::And => !l.is_truthy(),
                    LogicalOperator::Coalesce => !l.is_nullish(),
                };
                if take_left {
                    Ok(l)
                } else {
                    self.eval(right, ctx)
                }
            }
            ir::Expr::Assign { op, target, value } => self.assign(*op, target, value, ctx),
            ir::Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, ctx)?.is_truthy() {
                    self.eval(consequent, ctx)
                } else {
                    self.eval(alternate, ctx)
                }
            }
            ir::Expr::Member {
                object,
                property,
                optional,
            } => {
                let object = self.eval(object, ctx)?;
                if *optional && object.is_nullish() {
                    return Err(Abort::ShortCircuit);
                }
                let key = self.member_key(property, ctx)?;
                self.get_member(&object, &key)
            }
            ir::Expr::Call {
                callee,
                args,
                optional,
            } => {
                let (func, this) = match callee.as_ref() {
                    ir::Expr::Member {
                        object,
                        property,
                        optional: member_optional,
                    } => {
                        let object = self.eval(object, ctx)?;
                        if *member_optional && object.is_nullish() {
                            return Err(Abort::ShortCircuit);
                        }
                        let key = self.member_key(property, ctx)?;
                        (self.get_member(&object, &key)?, object)
                    }
                    other => (self.eval(other, ctx)?, Value::Undefined),
                };
                if *optional && func.is_nullish() {
                    return Err(Abort::ShortCircuit);
                }
                let args = self.eval_items(args, ctx)?;
                if !matches!(func, Value::Function(_)) {
                    return Err(throw_error(
                        "TypeError",
                        &format!("{} is not a function", describe_callee(callee)),
                    ));
                }
                self.call_value(&func, this, args)
            }
            ir::Expr::New { callee, args } => {
                let func = self.eval(callee, ctx)?;
                let args = self.eval_items(args, ctx)?;
                self.construct(&func, args, callee)
            }
            ir::Expr::Chain(inner) => match self.eval(inner, ctx) {
                Err(Abort::ShortCircuit) => Ok(Value::Undefined),
                other => other,
            },
            ir::Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for e in exprs {
                    last = self.eval(e, ctx)?;
                }
                Ok(last)
            }
            ir::Expr::Await(inner) => self.eval(inner, ctx),
            ir::Expr::LoadModule(url) => match self.realm.modules.get(url.as_ref()) {
                Some(record) => Ok(record.clone()),
                None => Err(throw_error(
                    "Error",
                    &format!("module '{}' was not loaded", url),
                )),
            },
            ir::Expr::DynamicImport(spec) => {
                let spec = self.eval(spec, ctx)?;
                Err(throw_error(
                    "TypeError",
                    &format!(
                        "import('{}') needs a string literal specifier",
                        spec.to_js_string()
                    ),
                ))
            }
        }
    }

    fn eval_items(&self, items: &[ir::ArrayItem], ctx: &Ctx) -> Exec<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                ir::ArrayItem::Item(e) => out.push(self.eval(e, ctx)?),
                ir::ArrayItem::Spread(e) => {
                    let value = self.eval(e, ctx)?;
                    out.extend(self.iterate(&value)?);
                }
                ir::ArrayItem::Hole => out.push(Value::Undefined),
            }
        }
        Ok(out)
    }

    fn property_key(&self, key: &ir::PropertyKey, ctx: &Ctx) -> Exec<String> {
        match key {
            ir::PropertyKey::Static(name) => Ok(name.to_string()),
            ir::PropertyKey::Computed(e) => Ok(self.eval(e, ctx)?.to_js_string()),
        }
    }

    fn member_key(&self, property: &ir::Property, ctx: &Ctx) -> Exec<String> {
        match property {
            ir::Property::Static(name) => Ok(name.to_string()),
            ir::Property::Computed(e) => Ok(self.eval(e, ctx)?.to_js_string()),
        }
    }

    fn unary(&self, op: UnaryOperator, arg: &ir::Expr, ctx: &Ctx) -> Exec<Value> {
        match op {
            UnaryOperator::Typeof => {
                if let ir::Expr::Ident(name) = arg {
                    return Ok(Value::string(
                        self.try_lookup(&ctx.frame, name)
                            .map(|v| v.type_of())
                            .unwrap_or("undefined"),
                    ));
                }
                Ok(Value::string(self.eval(arg, ctx)?.type_of()))
            }
            UnaryOperator::Delete => {
                if let ir::Expr::Member {
                    object, property, ..
                } = arg
                {
                    let object = self.eval(object, ctx)?;
                    let key = self.member_key(property, ctx)?;
                    return Ok(Value::Bool(self.delete_member(&object, &key)));
                }
                Ok(Value::Bool(true))
            }
            _ => {
                let value = self.eval(arg, ctx)?;
                Ok(match op {
                    UnaryOperator::UnaryPlus => Value::Number(value.to_number()),
                    UnaryOperator::UnaryNegation => Value::Number(-value.to_number()),
                    UnaryOperator::LogicalNot => Value::Bool(!value.is_truthy()),
                    UnaryOperator::BitwiseNot => Value::Number(f64::from(!to_int32(value.to_number()))),
                    _ => Value::Undefined,
                })
            }
        }
    }

    pub(crate) fn binary(&self, op: BinaryOperator, l: &Value, r: &Value) -> Exec<Value> {
        let num = |f: fn(f64, f64) -> f64| Value::Number(f(l.to_number(), r.to_number()));
        Ok(match op {
            BinaryOperator::Equality => Value::Bool(l.loose_equals(r)),
            BinaryOperator::Inequality => Value::Bool(!l.loose_equals(r)),
            BinaryOperator::StrictEquality => Value::Bool(l.strict_equals(r)),
            BinaryOperator::StrictInequality => Value::Bool(!l.strict_equals(r)),
            BinaryOperator::LessThan => Value::Bool(compare(l, r, |o| o.is_lt())),
            BinaryOperator::LessEqualThan => Value::Bool(compare(l, r, |o| o.is_le())),
            BinaryOperator::GreaterThan => Value::Bool(compare(l, r, |o| o.is_gt())),
            BinaryOperator::GreaterEqualThan => Value::Bool(compare(l, r, |o| o.is_ge())),
            BinaryOperator::Addition => {
                if is_string_like(l) || is_string_like(r) {
                    let (mut s, tail) = (l.to_js_string(), r.to_js_string());
                    self.check_concat(&[s.as_str(), tail.as_str()])?;
                    s.push_str(&tail);
                    Value::from(s)
                } else {
                    num(|a, b| a + b)
                }
            }
            BinaryOperator::Subtraction => num(|a, b| a - b),
            BinaryOperator::Multiplication => num(|a, b| a * b),
            BinaryOperator::Division => num(|a, b| a / b),
            BinaryOperator::Remainder => num(|a, b| a % b),
            BinaryOperator::Exponential => num(f64::powf),
            BinaryOperator::ShiftLeft => Value::Number(f64::from(
                to_int32(l.to_number()).wrapping_shl(to_uint32(r.to_number()) & 31),
            )),
            BinaryOperator::ShiftRight => Value::Number(f64::from(
                to_int32(l.to_number()).wrapping_shr(to_uint32(r.to_number()) & 31),
            )),
            BinaryOperator::ShiftRightZeroFill => Value::Number(f64::from(
                to_uint32(l.to_number()).wrapping_shr(to_uint32(r.to_number()) & 31),
            )),
            BinaryOperator::BitwiseOR => {
                Value::Number(f64::from(to_int32(l.to_number()) | to_int32(r.to_number())))
            }
            BinaryOperator::BitwiseXOR => {
                Value::Number(f64::from(to_int32(l.to_number()) ^ to_int32(r.to_number())))
            }
            BinaryOperator::BitwiseAnd => {
                Value::Number(f64::from(to_int32(l.to_number()) & to_int32(r.to_number())))
            }
            BinaryOperator::In => {
                let key = l.to_js_string();
                Value::Bool(match r {
                    Value::Object(map) => map.borrow().contains_key(&key),
                    Value::Array(items) => {
                        key == "length"
                            || key
                                .parse::<usize>()
                                .map(|i| i < items.borrow().len())
                                .unwrap_or(false)
                    }
                    Value::Special(Special::LocalThis) => self.realm.bindings.contains(&key),
                    Value::Special(Special::BuildStore(store)) => store.has(&key),
                    other => {
                        return Err(throw_error(
                            "TypeError",
                            &format!(
                                "Cannot use 'in' operator to search for '{}' in {}",
                                key,
                                other.to_js_string()
                            ),
                        ))
                    }
                })
            }
            BinaryOperator::Instanceof => Value::Bool(builtins::instance_of(l, r)),
        })
    }

    fn assign(
        &self,
        op: AssignmentOperator,
        target: &ir::Target,
        value: &ir::Expr,
        ctx: &Ctx,
    ) -> Exec<Value> {
        if let ir::Target::Pattern(pattern) = target {
            let value = self.eval(value, ctx)?;
            self.bind_pattern(pattern, value.clone(), BindMode::Assign, ctx)?;
            return Ok(value);
        }
        let reference = self.reference(target, ctx)?;
        let result = match op {
            AssignmentOperator::Assign => self.eval(value, ctx)?,
            AssignmentOperator::LogicalOr
            | AssignmentOperator::LogicalAnd
            | AssignmentOperator::LogicalNullish => {
                let current = self.get_reference(&reference, ctx)?;
                let keep = match op {
                    AssignmentOperator::LogicalOr => current.is_truthy(),
                    AssignmentOperator::LogicalAnd => !current.is_truthy(),
                    _ => !current.is_nullish(),
                };
                if keep {
                    return Ok(current);
                }
                self.eval(value, ctx)?
            }
            compound => {
                let current = self.get_reference(&reference, ctx)?;
                let rhs = self.eval(value, ctx)?;
                self.binary(compound_operator(compound), &current, &rhs)?
            }
        };
        self.put_reference(&reference, result.clone(), ctx)?;
        Ok(result)
    }

    fn reference(&self, target: &ir::Target, ctx: &Ctx) -> Exec<Reference> {
        match target {
            ir::Target::Ident(name) => Ok(Reference::Name(name.clone())),
            ir::Target::Member { object, property } => {
                let object = self.eval(object, ctx)?;
                let key = self.member_key(property, ctx)?;
                Ok(Reference::Member(object, key))
            }
            ir::Target::Pattern(_) => Err(throw_error(
                "SyntaxError",
                "Invalid left-hand side in assignment",
            )),
        }
    }

    fn get_reference(&self, reference: &Reference, ctx: &Ctx) -> Exec<Value> {
        match reference {
            Reference::Name(name) => self.lookup(&ctx.frame, name),
            Reference::Member(object, key) => self.get_member(object, key),
        }
    }

    fn put_reference(&self, reference: &Reference, value: Value, ctx: &Ctx) -> Exec<()> {
        match reference {
            Reference::Name(name) => self.assign_name(&ctx.frame, name, value),
            Reference::Member(object, key) => self.set_member(object, key, value),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MEMBERS
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn get_member(&self, object: &Value, key: &str) -> Exec<Value> {
        match object {
            Value::Undefined | Value::Null => Err(throw_error(
                "TypeError",
                &format!(
                    "Cannot read properties of {} (reading '{}')",
                    object.to_js_string(),
                    key
                ),
            )),
            Value::String(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.encode_utf16().count() as f64));
                }
                if let Ok(index) = key.parse::<usize>() {
                    return Ok(s
                        .encode_utf16()
                        .nth(index)
                        .map(|u| Value::from(builtins::unit_string(u)))
                        .unwrap_or_default());
                }
                Ok(builtins::prototype_method(object, key).unwrap_or_default())
            }
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                if let Ok(index) = key.parse::<usize>() {
                    return Ok(items.borrow().get(index).cloned().unwrap_or_default());
                }
                Ok(builtins::prototype_method(object, key).unwrap_or_default())
            }
            Value::Object(map) => {
                if let Some(value) = map.borrow().get(key) {
                    return Ok(value.clone());
                }
                Ok(builtins::prototype_method(object, key).unwrap_or_default())
            }
            Value::Function(func) => Ok(match func.as_ref() {
                Function::Class(class) => {
                    if key == "name" {
                        return Ok(Value::string(class.def.name.as_deref().unwrap_or("")));
                    }
                    class
                        .def
                        .static_methods
                        .iter()
                        .find(|(name, _)| name.as_ref() == key)
                        .map(|(_, def)| {
                            Value::Function(Rc::new(Function::Closure(Closure {
                                def: def.clone(),
                                frame: class.frame.clone(),
                                this: None,
                            })))
                        })
                        .unwrap_or_default()
                }
                Function::Native { name, .. } => {
                    if key == "name" {
                        return Ok(Value::string(name.rsplit('.').next().unwrap_or_default()));
                    }
                    builtins::static_member(name, key).unwrap_or_default()
                }
                Function::Closure(closure) => {
                    if key == "name" {
                        Value::string(closure.def.name.as_deref().unwrap_or(""))
                    } else {
                        builtins::prototype_method(object, key).unwrap_or_default()
                    }
                }
            }),
            Value::Special(Special::LocalThis) => {
                Ok(self.realm.bindings.get(key).unwrap_or_default())
            }
            Value::Special(Special::BuildStore(store)) => {
                if key == "size" {
                    return Ok(Value::Number(store.len() as f64));
                }
                Ok(builtins::prototype_method(object, key).unwrap_or_default())
            }
            Value::Bool(_) | Value::Number(_) => {
                Ok(builtins::prototype_method(object, key).unwrap_or_default())
            }
        }
    }

    pub(crate) fn set_member(&self, object: &Value, key: &str, value: Value) -> Exec<()> {
        match object {
            Value::Undefined | Value::Null => Err(throw_error(
                "TypeError",
                &format!(
                    "Cannot set properties of {} (setting '{}')",
                    object.to_js_string(),
                    key
                ),
            )),
            Value::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                let mut items = items.borrow_mut();
                if key == "length" {
                    let len = value.to_number();
                    if len < 0.0 || len.fract() != 0.0 {
                        return Err(throw_error("RangeError", "Invalid array length"));
                    }
                    items.resize(len as usize, Value::Undefined);
                } else if let Ok(index) = key.parse::<usize>() {
                    if index >= items.len() {
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                }
                Ok(())
            }
            Value::Special(Special::LocalThis) => self
                .realm
                .bindings
                .assign_or_declare(key, value)
                .map_err(binding_abort),
            Value::Special(Special::BuildStore(_)) => Err(throw_error(
                "TypeError",
                "buildStore entries are written with buildStore.set(key, value)",
            )),
            _ => Ok(()),
        }
    }

    fn delete_member(&self, object: &Value, key: &str) -> bool {
        match object {
            Value::Object(map) => {
                map.borrow_mut().shift_remove(key);
                true
            }
            Value::Special(Special::BuildStore(store)) => store.delete(key),
            _ => true,
        }
    }

    /// Enumerable own entries, as seen by spread and `Object.entries`.
    pub(crate) fn own_entries(&self, value: &Value) -> Vec<(String, Value)> {
        match value {
            Value::Object(map) => map
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
            Value::String(s) => s
                .encode_utf16()
                .enumerate()
                .map(|(i, u)| (i.to_string(), Value::from(builtins::unit_string(u))))
                .collect(),
            Value::Special(Special::LocalThis) => {
                self.realm.bindings.snapshot().into_iter().collect()
            }
            Value::Special(Special::BuildStore(store)) => store
                .keys()
                .into_iter()
                .map(|k| {
                    let v = store.get(&k);
                    (k, v)
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn iterate(&self, value: &Value) -> Exec<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::String(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            other => Err(throw_error(
                "TypeError",
                &format!("{} is not iterable", other.to_js_string()),
            )),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CALLS
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn call_value(&self, func: &Value, this: Value, args: Vec<Value>) -> Exec<Value> {
        let Value::Function(f) = func else {
            return Err(throw_error(
                "TypeError",
                &format!("{} is not a function", func.to_js_string()),
            ));
        };
        match f.as_ref() {
            Function::Closure(closure) => {
                let this = closure.this.clone().unwrap_or(this);
                self.call_closure(&closure.def, &closure.frame, this, args)
            }
            Function::Class(class) => Err(throw_error(
                "TypeError",
                &format!(
                    "Class constructor {} cannot be invoked without 'new'",
                    class.def.name.as_deref().unwrap_or("")
                ),
            )),
            Function::Native { name, this: bound } => {
                let this = if bound.is_undefined() {
                    this
                } else {
                    bound.clone()
                };
                builtins::call(self, name, this, args)
            }
        }
    }

    fn call_closure(
        &self,
        def: &ir::FunctionDef,
        parent: &Rc<Frame>,
        this: Value,
        args: Vec<Value>,
    ) -> Exec<Value> {
        let depth = self.depth.get();
        if depth >= self.realm.config.max_call_depth {
            return Err(Abort::Fatal(ScriptError::Limit(format!(
                "call depth exceeded {}",
                self.realm.config.max_call_depth
            ))));
        }
        self.depth.set(depth + 1);
        let result = self.invoke(def, parent, this, args);
        self.depth.set(depth);
        result
    }

    fn invoke(
        &self,
        def: &ir::FunctionDef,
        parent: &Rc<Frame>,
        this: Value,
        mut args: Vec<Value>,
    ) -> Exec<Value> {
        let ctx = Ctx {
            frame: Frame::child(parent, FrameKind::Function),
            this,
        };
        let mode = BindMode::Declare {
            mutable: true,
            var: false,
        };
        let rest = if args.len() > def.params.len() {
            args.split_off(def.params.len())
        } else {
            Vec::new()
        };
        let mut args = args.into_iter();
        for param in &def.params {
            self.bind_pattern(param, args.next().unwrap_or_default(), mode, &ctx)?;
        }
        if let Some(pattern) = &def.rest {
            self.bind_pattern(pattern, Value::array(rest), mode, &ctx)?;
        }
        match &def.body {
            ir::FunctionBody::Expr(e) => self.eval(e, &ctx),
            ir::FunctionBody::Block(stmts) => match self.exec_block(stmts, &ctx)? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Value::Undefined),
            },
        }
    }

    fn construct(&self, func: &Value, args: Vec<Value>, callee: &ir::Expr) -> Exec<Value> {
        let not_constructor = || {
            throw_error(
                "TypeError",
                &format!("{} is not a constructor", describe_callee(callee)),
            )
        };
        let Value::Function(f) = func else {
            return Err(not_constructor());
        };
        match f.as_ref() {
            Function::Class(class) => {
                let instance = Value::empty_object();
                for (name, def) in &class.def.methods {
                    self.set_member(
                        &instance,
                        name,
                        Value::Function(Rc::new(Function::Closure(Closure {
                            def: def.clone(),
                            frame: class.frame.clone(),
                            this: None,
                        }))),
                    )?;
                }
                let field_ctx = Ctx {
                    frame: Frame::child(&class.frame, FrameKind::Function),
                    this: instance.clone(),
                };
                for (name, init) in &class.def.fields {
                    let value = match init {
                        Some(e) => self.eval(e, &field_ctx)?,
                        None => Value::Undefined,
                    };
                    self.set_member(&instance, name, value)?;
                }
                if let Some(ctor) = &class.def.constructor {
                    self.call_closure(ctor, &class.frame, instance.clone(), args)?;
                }
                Ok(instance)
            }
            Function::Closure(closure) if !closure.def.is_arrow => {
                let instance = Value::empty_object();
                let result = self.call_closure(&closure.def, &closure.frame, instance.clone(), args)?;
                Ok(match result {
                    Value::Object(_) | Value::Array(_) => result,
                    _ => instance,
                })
            }
            Function::Native { name, .. } => {
                builtins::construct(self, name, args)?.ok_or_else(not_constructor)
            }
            _ => Err(not_constructor()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PATTERNS
    // ═══════════════════════════════════════════════════════════════════════════

    fn bind_pattern(
        &self,
        pattern: &ir::Pattern,
        value: Value,
        mode: BindMode,
        ctx: &Ctx,
    ) -> Exec<()> {
        match pattern {
            ir::Pattern::Ident(name) => match mode {
                BindMode::Declare { var: true, .. } => self.declare_var(&ctx.frame, name, value),
                BindMode::Declare { mutable, .. } => self.declare(&ctx.frame, name, value, mutable),
                BindMode::Assign => self.assign_name(&ctx.frame, name, value),
            },
            ir::Pattern::Member { object, property } => {
                let object = self.eval(object, ctx)?;
                let key = self.member_key(property, ctx)?;
                self.set_member(&object, &key, value)
            }
            ir::Pattern::Object { props, rest } => {
                if value.is_nullish() {
                    return Err(throw_error(
                        "TypeError",
                        &format!("Cannot destructure '{}'", value.to_js_string()),
                    ));
                }
                let mut used = Vec::new();
                for (key, sub) in props {
                    let key = self.property_key(key, ctx)?;
                    let member = self.get_member(&value, &key)?;
                    self.bind_pattern(sub, member, mode, ctx)?;
                    used.push(key);
                }
                if let Some(rest) = rest {
                    let remaining: IndexMap<String, Value> = self
                        .own_entries(&value)
                        .into_iter()
                        .filter(|(k, _)| !used.contains(k))
                        .collect();
                    self.bind_pattern(rest, Value::object(remaining), mode, ctx)?;
                }
                Ok(())
            }
            ir::Pattern::Array { items, rest } => {
                let values = self.iterate(&value)?;
                for (i, item) in items.iter().enumerate() {
                    if let Some(sub) = item {
                        self.bind_pattern(sub, values.get(i).cloned().unwrap_or_default(), mode, ctx)?;
                    }
                }
                if let Some(rest) = rest {
                    let remaining = values.into_iter().skip(items.len()).collect();
                    self.bind_pattern(rest, Value::array(remaining), mode, ctx)?;
                }
                Ok(())
            }
            ir::Pattern::Default { pattern, default } => {
                let value = if value.is_undefined() {
                    self.eval(default, ctx)?
                } else {
                    value
                };
                self.bind_pattern(pattern, value, mode, ctx)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn exec_block(&self, stmts: &[ir::Stmt], ctx: &Ctx) -> Exec<Flow> {
        for stmt in stmts {
            if let ir::Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let closure = Value::Function(Rc::new(Function::Closure(Closure {
                        def: def.clone(),
                        frame: ctx.frame.clone(),
                        this: None,
                    })));
                    self.declare(&ctx.frame, name, closure, true)?;
                }
            }
        }
        for stmt in stmts {
            match self.exec(stmt, ctx)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn block_ctx(&self, ctx: &Ctx) -> Ctx {
        Ctx {
            frame: Frame::child(&ctx.frame, FrameKind::Block),
            this: ctx.this.clone(),
        }
    }

    fn exec(&self, stmt: &ir::Stmt, ctx: &Ctx) -> Exec<Flow> {
        self.tick()?;
        match stmt {
            ir::Stmt::Empty | ir::Stmt::Function(_) => Ok(Flow::Normal),
            ir::Stmt::Expr(e) => {
                self.eval(e, ctx)?;
                Ok(Flow::Normal)
            }
            ir::Stmt::Declare { kind, decls } => {
                let mode = BindMode::Declare {
                    mutable: !kind.is_const(),
                    var: *kind == ir::DeclKind::Var,
                };
                for decl in decls {
                    let value = match &decl.init {
                        Some(e) => self.eval(e, ctx)?,
                        None => Value::Undefined,
                    };
                    self.bind_pattern(&decl.pattern, value, mode, ctx)?;
                }
                Ok(Flow::Normal)
            }
            ir::Stmt::Class(def) => {
                let class = Value::Function(Rc::new(Function::Class(ClassValue {
                    def: def.clone(),
                    frame: ctx.frame.clone(),
                })));
                if let Some(name) = &def.name {
                    self.declare(&ctx.frame, name, class, true)?;
                }
                Ok(Flow::Normal)
            }
            ir::Stmt::Return(e) => Ok(Flow::Return(match e {
                Some(e) => self.eval(e, ctx)?,
                None => Value::Undefined,
            })),
            ir::Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, ctx)?.is_truthy() {
                    self.exec(consequent, ctx)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, ctx)
                } else {
                    Ok(Flow::Normal)
                }
            }
            ir::Stmt::Block(stmts) => self.exec_block(stmts, &self.block_ctx(ctx)),
            ir::Stmt::Labeled { label, body } => {
                let flow = match body.as_ref() {
                    loop_stmt @ (ir::Stmt::For { .. }
                    | ir::Stmt::ForOf { .. }
                    | ir::Stmt::ForIn { .. }
                    | ir::Stmt::While { .. }
                    | ir::Stmt::DoWhile { .. }) => self.exec_loop(loop_stmt, Some(label), ctx)?,
                    other => self.exec(other, ctx)?,
                };
                Ok(match flow {
                    Flow::Break(Some(l)) if l == *label => Flow::Normal,
                    other => other,
                })
            }
            ir::Stmt::For { .. }
            | ir::Stmt::ForOf { .. }
            | ir::Stmt::ForIn { .. }
            | ir::Stmt::While { .. }
            | ir::Stmt::DoWhile { .. } => self.exec_loop(stmt, None, ctx),
            ir::Stmt::Break(label) => Ok(Flow::Break(label.clone())),
            ir::Stmt::Continue(label) => Ok(Flow::Continue(label.clone())),
            ir::Stmt::Throw(e) => Err(Abort::Throw(self.eval(e, ctx)?)),
            ir::Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let mut result = self.exec_block(block, &self.block_ctx(ctx));
                if let (Err(Abort::Throw(thrown)), Some(handler)) = (&result, handler) {
                    let thrown = thrown.clone();
                    let handler_ctx = self.block_ctx(ctx);
                    result = match param {
                        Some(pattern) => self
                            .bind_pattern(
                                pattern,
                                thrown,
                                BindMode::Declare {
                                    mutable: true,
                                    var: false,
                                },
                                &handler_ctx,
                            )
                            .and_then(|_| self.exec_block(handler, &handler_ctx)),
                        None => self.exec_block(handler, &handler_ctx),
                    };
                }
                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer, &self.block_ctx(ctx))? {
                        Flow::Normal => {}
                        overriding => return Ok(overriding),
                    }
                }
                result
            }
            ir::Stmt::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval(discriminant, ctx)?;
                let mut start = None;
                for (i, case) in cases.iter().enumerate() {
                    if let Some(test) = &case.test {
                        if self.eval(test, ctx)?.strict_equals(&value) {
                            start = Some(i);
                            break;
                        }
                    }
                }
                let start = start.or_else(|| cases.iter().position(|c| c.test.is_none()));
                let Some(start) = start else {
                    return Ok(Flow::Normal);
                };
                let body_ctx = self.block_ctx(ctx);
                for case in &cases[start..] {
                    match self.exec_block(&case.body, &body_ctx)? {
                        Flow::Normal => {}
                        Flow::Break(None) => return Ok(Flow::Normal),
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_loop(&self, stmt: &ir::Stmt, label: Option<&Name>, ctx: &Ctx) -> Exec<Flow> {
        match stmt {
            ir::Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let loop_ctx = self.block_ctx(ctx);
                match init {
                    Some(ir::ForInit::Declare(decl)) => {
                        self.exec(decl, &loop_ctx)?;
                    }
                    Some(ir::ForInit::Expr(e)) => {
                        self.eval(e, &loop_ctx)?;
                    }
                    None => {}
                }
                loop {
                    if let Some(test) = test {
                        if !self.eval(test, &loop_ctx)?.is_truthy() {
                            break;
                        }
                    }
                    let flow = self.exec(body, &self.block_ctx(&loop_ctx))?;
                    if let Some(exit) = loop_exit(flow, label) {
                        return Ok(exit);
                    }
                    if let Some(update) = update {
                        self.eval(update, &loop_ctx)?;
                    }
                }
                Ok(Flow::Normal)
            }
            ir::Stmt::ForOf { left, right, body } => {
                let items = self.iterate(&self.eval(right, ctx)?)?;
                self.for_each(left, items, body, label, ctx)
            }
            ir::Stmt::ForIn { left, right, body } => {
                let object = self.eval(right, ctx)?;
                let keys = self
                    .own_entries(&object)
                    .into_iter()
                    .map(|(k, _)| Value::from(k))
                    .collect();
                self.for_each(left, keys, body, label, ctx)
            }
            ir::Stmt::While { test, body } => {
                while self.eval(test, ctx)?.is_truthy() {
                    let flow = self.exec(body, &self.block_ctx(ctx))?;
                    if let Some(exit) = loop_exit(flow, label) {
                        return Ok(exit);
                    }
                }
                Ok(Flow::Normal)
            }
            ir::Stmt::DoWhile { body, test } => {
                loop {
                    let flow = self.exec(body, &self.block_ctx(ctx))?;
                    if let Some(exit) = loop_exit(flow, label) {
                        return Ok(exit);
                    }
                    if !self.eval(test, ctx)?.is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            other => self.exec(other, ctx),
        }
    }

    fn for_each(
        &self,
        left: &ir::ForBinding,
        items: Vec<Value>,
        body: &ir::Stmt,
        label: Option<&Name>,
        ctx: &Ctx,
    ) -> Exec<Flow> {
        for item in items {
            let iteration = self.block_ctx(ctx);
            match left {
                ir::ForBinding::Declare(kind, pattern) => self.bind_pattern(
                    pattern,
                    item,
                    BindMode::Declare {
                        mutable: !kind.is_const(),
                        var: *kind == ir::DeclKind::Var,
                    },
                    &iteration,
                )?,
                ir::ForBinding::Assign(pattern) => {
                    self.bind_pattern(pattern, item, BindMode::Assign, &iteration)?
                }
            }
            let flow = self.exec(body, &iteration)?;
            if let Some(exit) = loop_exit(flow, label) {
                return Ok(exit);
            }
        }
        Ok(Flow::Normal)
    }
}

/// Decides whether a loop stops after one body run. `None` keeps looping.
fn loop_exit(flow: Flow, label: Option<&Name>) -> Option<Flow> {
    match flow {
        Flow::Normal | Flow::Continue(None) => None,
        Flow::Continue(Some(l)) if Some(&l) == label => None,
        Flow::Break(None) => Some(Flow::Normal),
        Flow::Break(Some(l)) if Some(&l) == label => Some(Flow::Normal),
        other => Some(other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn throw_error(kind: &str, message: &str) -> Abort {
    Abort::Throw(builtins::make_error(kind, message))
}

fn binding_abort(err: BindingError) -> Abort {
    let kind = match err {
        BindingError::ConstAssignment(_) => "TypeError",
        BindingError::Undeclared(_) => "ReferenceError",
        BindingError::Redeclared(_) => "SyntaxError",
    };
    throw_error(kind, &err.to_string())
}

/// `Name: message` for error objects, `String(value)` otherwise.
pub fn describe_thrown(value: &Value) -> String {
    if let Value::Object(map) = value {
        let map = map.borrow();
        if let Some(message) = map.get("message") {
            return match map.get("name") {
                Some(name) if !name.is_undefined() => {
                    format!("{}: {}", name.to_js_string(), message.to_js_string())
                }
                _ => message.to_js_string(),
            };
        }
    }
    value.to_js_string()
}

fn describe_callee(callee: &ir::Expr) -> String {
    match callee {
        ir::Expr::Ident(name) => name.to_string(),
        ir::Expr::Member {
            object, property, ..
        } => match property.as_ref() {
            ir::Property::Static(name) => format!("{}.{}", describe_callee(object), name),
            ir::Property::Computed(_) => format!("{}[...]", describe_callee(object)),
        },
        ir::Expr::This => "this".to_string(),
        _ => "expression".to_string(),
    }
}

fn is_string_like(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Special(_)
    )
}

fn compare(l: &Value, r: &Value, test: fn(std::cmp::Ordering) -> bool) -> bool {
    if let (Value::String(a), Value::String(b)) = (l, r) {
        return test(a.cmp(b));
    }
    match l.to_number().partial_cmp(&r.to_number()) {
        Some(ordering) => test(ordering),
        None => false,
    }
}

pub(crate) fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

pub(crate) fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    (n.trunc() % 4_294_967_296.0) as i64 as u32
}

fn compound_operator(op: AssignmentOperator) -> BinaryOperator {
    match op {
        AssignmentOperator::Addition => BinaryOperator::Addition,
        AssignmentOperator::Subtraction => BinaryOperator::Subtraction,
        AssignmentOperator::Multiplication => BinaryOperator::Multiplication,
        AssignmentOperator::Division => BinaryOperator::Division,
        AssignmentOperator::Remainder => BinaryOperator::Remainder,
        AssignmentOperator::Exponential => BinaryOperator::Exponential,
        AssignmentOperator::ShiftLeft => BinaryOperator::ShiftLeft,
        AssignmentOperator::ShiftRight => BinaryOperator::ShiftRight,
        AssignmentOperator::ShiftRightZeroFill => BinaryOperator::ShiftRightZeroFill,
        AssignmentOperator::BitwiseOR => BinaryOperator::BitwiseOR,
        AssignmentOperator::BitwiseXOR => BinaryOperator::BitwiseXOR,
        AssignmentOperator::BitwiseAnd => BinaryOperator::BitwiseAnd,
        _ => BinaryOperator::Addition,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::lower::{lower_expression, lower_script};

    struct Fixture {
        bindings: Bindings,
        host: MemoryHost,
        config: CompilerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                bindings: Bindings::new(),
                host: MemoryHost::new(),
                config: CompilerConfig::default(),
            }
        }

        fn interpreter(&self) -> Interpreter<'_> {
            Interpreter::new(Realm {
                bindings: &self.bindings,
                props: Value::empty_object(),
                store: BuildStore::new(),
                host: &self.host,
                file_url: "/pages/index.html".to_string(),
                modules: HashMap::new(),
                config: &self.config,
            })
        }

        fn run(&self, source: &str) -> Result<(), ScriptError> {
            let lowered = lower_script(source, false, &|s: &str| s.to_string())?;
            self.interpreter().run_script(&lowered.body)
        }

        fn eval(&self, source: &str) -> Value {
            let expr = lower_expression(source).unwrap();
            self.interpreter().eval_expression(&expr).unwrap()
        }
    }

    #[test]
    fn test_top_level_declarations_reach_bindings() {
        let fx = Fixture::new();
        fx.run("const a = 1; let b = a + 1; function f() { return b * 10; }")
            .unwrap();
        assert_eq!(fx.eval("f()").to_number(), 20.0);
        assert!(fx.run("a = 5;").is_err());
        fx.run("b = 7;").unwrap();
        assert_eq!(fx.eval("f()").to_number(), 70.0);
    }

    #[test]
    fn test_block_scoped_names_stay_local() {
        let fx = Fixture::new();
        fx.run("{ const hidden = 1; } let seen = typeof hidden;").unwrap();
        assert_eq!(fx.eval("seen").as_str(), Some("undefined"));
        assert!(fx.bindings.get("hidden").is_none());
    }

    #[test]
    fn test_closures_capture_frames() {
        let fx = Fixture::new();
        fx.run(
            "function counter() { let n = 0; return () => ++n; } const next = counter(); next(); next();",
        )
        .unwrap();
        assert_eq!(fx.eval("next()").to_number(), 3.0);
    }

    #[test]
    fn test_thrown_errors_render_name_and_message() {
        let fx = Fixture::new();
        let err = fx.run("throw new TypeError('bad input');").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: bad input");
        let err = fx.run("undefinedName + 1;").unwrap_err();
        assert!(err.to_string().starts_with("ReferenceError"), "{}", err);
    }

    #[test]
    fn test_step_budget() {
        let mut fx = Fixture::new();
        fx.config.max_steps = 500;
        let err = fx.run("let i = 0; while (true) { i++; }").unwrap_err();
        assert!(matches!(err, ScriptError::Limit(_)));
    }

    #[test]
    fn test_call_depth_limit() {
        let mut fx = Fixture::new();
        fx.config.max_call_depth = 16;
        let err = fx.run("function f(n) { return f(n + 1); } f(0);").unwrap_err();
        assert!(matches!(err, ScriptError::Limit(_)));
    }

    #[test]
    fn test_strings_count_utf16_units() {
        let fx = Fixture::new();
        assert_eq!(fx.eval("'😀x'.length").to_number(), 3.0);
        assert_eq!(fx.eval("'😀x'.indexOf('x')").to_number(), 2.0);
        assert_eq!(fx.eval("'😀x'.slice(2)").as_str(), Some("x"));
        assert_eq!(fx.eval("'😀x'.charCodeAt(0)").to_number(), 55357.0);
        assert_eq!(fx.eval("'😀x'.padStart(5, '-')").as_str(), Some("--😀x"));
        assert_eq!(fx.eval("'a,b'.split(',', -1).length").to_number(), 2.0);
        assert_eq!(fx.eval("'a,b'.split(',', 0).length").to_number(), 0.0);
    }

    #[test]
    fn test_string_length_limit() {
        let mut fx = Fixture::new();
        fx.config.max_string_length = 1000;
        let err = fx.run("'x'.padStart(1e9);").unwrap_err();
        assert_eq!(err.to_string(), "RangeError: Invalid string length");
        assert!(fx.run("'ab'.repeat(501);").is_err());
        fx.run("const fits = 'ab'.repeat(500);").unwrap();
        let err = fx.run("let s = 'x'; while (true) { s = s + s; }").unwrap_err();
        assert_eq!(err.to_string(), "RangeError: Invalid string length");
    }

    #[test]
    fn test_labeled_break_and_continue() {
        let fx = Fixture::new();
        fx.run(concat!(
            "let out = [];",
            "outer: for (const i of [1, 2, 3]) {",
            "  for (const j of [1, 2, 3]) {",
            "    if (j === 2) continue outer;",
            "    if (i === 3) break outer;",
            "    out.push(i * 10 + j);",
            "  }",
            "}",
        ))
        .unwrap();
        assert_eq!(fx.eval("out.join(',')").as_str(), Some("11,21"));
    }

    #[test]
    fn test_optional_chaining_and_nullish() {
        let fx = Fixture::new();
        fx.run("const cfg = { a: { b: null } };").unwrap();
        assert!(fx.eval("cfg.x?.y").is_undefined());
        assert_eq!(fx.eval("cfg.a.b ?? 'fallback'").as_str(), Some("fallback"));
        assert_eq!(fx.eval("cfg.a?.b?.c ?? 0").to_number(), 0.0);
    }
}
