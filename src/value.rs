//! Runtime values for UTTR
//!
//! Lists and dicts have reference semantics: they live behind
//! `Rc<RefCell<..>>`, so every binding that reads one observes mutations made
//! through any other. Numbers, strings, tuples and sets behave as values; the
//! collection kinds among them are immutable and share their storage freely.
//!
//! Operators are dispatched on the left operand. Failures come back as an
//! [`OpError`] without a position; the evaluator attaches the operand spans.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::{BinaryOperator, FunctionBody};
use crate::error::{RuntimeErrorKind, UttrError};
use crate::functions::NativeFunction;
use crate::stack::ensure_sufficient_stack;
use crate::symbol_table::EnvId;

/// Shared, mutable list storage
pub type ListRef = Rc<RefCell<Vec<Value>>>;

/// Shared, mutable dict storage
pub type DictRef = Rc<RefCell<Dict>>;

/// Immutable set storage
pub type SetRef = Rc<BTreeSet<SetElement>>;

/// A runtime value
#[derive(Debug, Clone)]
pub enum Value {
    Number(Number),
    String(String),
    List(ListRef),
    Tuple(Rc<[Value]>),
    Dict(DictRef),
    Set(SetRef),
    Regex(Rc<RegexValue>),
    Match(Rc<MatchValue>),
    Error(Rc<ErrorValue>),
    Function(Rc<Function>),
}

/// Integer or floating point number
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int(i) => i == 0,
            Number::Float(f) => f == 0.0,
        }
    }

    /// Integer value, if this number has one
    pub fn as_int(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i),
            Number::Float(_) => None,
        }
    }

    fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }

    /// Total order used for set elements; `1` and `1.0` compare equal
    fn total_order(self, other: Number) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (a, b) => normalize_zero(a.as_f64()).total_cmp(&normalize_zero(b.as_f64())),
        }
    }
}

fn normalize_zero(f: f64) -> f64 {
    if f == 0.0 {
        0.0
    } else {
        f
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.compare(*other) == Some(Ordering::Equal)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(x) => {
                let text = x.to_string();
                if x.is_finite() && !text.contains('.') {
                    write!(f, "{}.0", text)
                } else {
                    f.write_str(&text)
                }
            }
        }
    }
}

/// Insertion-ordered dictionary with Number/String keys
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys are restricted to numbers and strings
    pub fn is_valid_key(key: &Value) -> bool {
        matches!(key, Value::Number(_) | Value::String(_))
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    /// Insert or overwrite, keeping the original position of an existing key
    pub fn insert(&mut self, key: Value, value: Value) {
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }
}

impl Dict {
    fn equals(&self, other: &Dict, comparing: &mut Vec<(usize, usize)>) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|ov| v.equals(ov, comparing)))
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other, &mut Vec::new())
    }
}

/// An element stored in a set
///
/// Only value-semantics kinds can live in a set; lists, dicts and functions
/// are rejected by [`SetElement::from_value`].
#[derive(Debug, Clone)]
pub enum SetElement {
    Number(Number),
    String(String),
    Tuple(Vec<SetElement>),
    Set(BTreeSet<SetElement>),
}

impl SetElement {
    pub fn from_value(value: &Value) -> Result<Self, OpError> {
        match value {
            Value::Number(n) => Ok(SetElement::Number(*n)),
            Value::String(s) => Ok(SetElement::String(s.clone())),
            Value::Tuple(items) => items
                .iter()
                .map(SetElement::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(SetElement::Tuple),
            Value::Set(set) => Ok(SetElement::Set(set.as_ref().clone())),
            other => Err(OpError::new(
                RuntimeErrorKind::TypeMismatch,
                format!("Sets cannot contain a {}", other.type_name()),
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            SetElement::Number(n) => Value::Number(*n),
            SetElement::String(s) => Value::String(s.clone()),
            SetElement::Tuple(items) => {
                Value::Tuple(items.iter().map(SetElement::to_value).collect())
            }
            SetElement::Set(set) => Value::Set(Rc::new(set.clone())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SetElement::Number(_) => 0,
            SetElement::String(_) => 1,
            SetElement::Tuple(_) => 2,
            SetElement::Set(_) => 3,
        }
    }
}

impl Ord for SetElement {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SetElement::Number(a), SetElement::Number(b)) => a.total_order(*b),
            (SetElement::String(a), SetElement::String(b)) => a.cmp(b),
            (SetElement::Tuple(a), SetElement::Tuple(b)) => a.cmp(b),
            (SetElement::Set(a), SetElement::Set(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for SetElement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SetElement {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SetElement {}

/// Compiled regular expression
#[derive(Debug)]
pub struct RegexValue {
    pub pattern: String,
    pub regex: regex::Regex,
}

impl RegexValue {
    pub fn new(pattern: &str) -> Result<Self, OpError> {
        regex::Regex::new(pattern)
            .map(|regex| Self {
                pattern: pattern.to_string(),
                regex,
            })
            .map_err(|e| {
                OpError::new(
                    RuntimeErrorKind::InvalidPattern,
                    format!("Invalid regex pattern '{}': {}", pattern, e),
                )
            })
    }
}

/// Result of a regex match attempt
#[derive(Debug, Clone, PartialEq)]
pub struct MatchValue {
    pub matched: Option<MatchData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchData {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub groups: Vec<Option<String>>,
}

/// An error caught by `attempt ... handle as e`
#[derive(Debug)]
pub struct ErrorValue {
    pub message: String,
    pub kind: String,
    pub source: Option<UttrError>,
}

impl ErrorValue {
    pub fn from_error(error: UttrError) -> Self {
        Self {
            message: error.message(),
            kind: error.name().to_string(),
            source: Some(error),
        }
    }
}

/// A callable value
#[derive(Debug)]
pub enum Function {
    User {
        name: Option<String>,
        params: Vec<String>,
        body: Rc<FunctionBody>,
        /// Environment the function was defined in
        env: EnvId,
    },
    Native(NativeFunction),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::User { name, .. } => name.as_deref().unwrap_or("<lambda>"),
            Function::Native(native) => native.name,
        }
    }
}

/// A failed value operation, positioned later by the evaluator
///
/// Built-in functions return these inside `anyhow::Error` so the evaluator
/// can recover the runtime error kind.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct OpError {
    pub kind: RuntimeErrorKind,
    pub message: String,
}

impl OpError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn illegal(op: impl fmt::Display, left: &Value, right: &Value) -> Self {
        Self::new(
            RuntimeErrorKind::IllegalOperation,
            format!(
                "Illegal operation: {} {} {}",
                left.type_name(),
                op,
                right.type_name()
            ),
        )
    }
}

pub type OpResult = Result<Value, OpError>;

/// Largest string that `*` may build
pub const MAX_STRING_BYTES: usize = 1 << 28;

impl Value {
    /// The null value (the number zero)
    pub fn null() -> Self {
        Value::Number(Number::Int(0))
    }

    pub fn int(i: i64) -> Self {
        Value::Number(Number::Int(i))
    }

    pub fn float(f: f64) -> Self {
        Value::Number(Number::Float(f))
    }

    pub fn bool(b: bool) -> Self {
        Value::int(b as i64)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(items.into())
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(set: BTreeSet<SetElement>) -> Self {
        Value::Set(Rc::new(set))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Number(Number::Int(0)))
    }

    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Regex(_) => "regex",
            Value::Match(_) => "match",
            Value::Error(_) => "error",
            Value::Function(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => !n.is_zero(),
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Set(set) => !set.is_empty(),
            Value::Match(m) => m.matched.is_some(),
            Value::Regex(_) | Value::Error(_) | Value::Function(_) => true,
        }
    }

    /// Quoted rendering used for nested elements and the REPL
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, true, &mut Vec::new());
        out
    }

    /// Append the display form (or the quoted form) to `out`.
    ///
    /// `visiting` holds the storage addresses of the lists and dicts being
    /// rendered; meeting one again renders `[...]` or `{...}`.
    fn render(&self, out: &mut String, quote: bool, visiting: &mut Vec<usize>) {
        match self {
            Value::Number(n) => out.push_str(&n.to_string()),
            Value::String(s) if quote => out.push_str(&format!("{:?}", s)),
            Value::String(s) => out.push_str(s),
            Value::List(items) => {
                let address = Rc::as_ptr(items) as usize;
                if visiting.contains(&address) {
                    out.push_str("[...]");
                    return;
                }
                visiting.push(address);
                out.push('[');
                render_items(items.borrow().iter(), out, visiting);
                out.push(']');
                visiting.pop();
            }
            Value::Tuple(items) => {
                out.push('<');
                render_items(items.iter(), out, visiting);
                out.push('>');
            }
            Value::Dict(dict) => {
                let address = Rc::as_ptr(dict) as usize;
                if visiting.contains(&address) {
                    out.push_str("{...}");
                    return;
                }
                visiting.push(address);
                out.push('{');
                for (i, (key, value)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.render(out, true, visiting);
                    out.push_str(": ");
                    ensure_sufficient_stack(|| value.render(out, true, visiting));
                }
                out.push('}');
                visiting.pop();
            }
            Value::Set(set) if set.is_empty() => out.push_str("{: :}"),
            Value::Set(set) => {
                let elements: Vec<Value> = set.iter().map(SetElement::to_value).collect();
                out.push_str("{: ");
                render_items(elements.iter(), out, visiting);
                out.push_str(" :}");
            }
            Value::Regex(r) => out.push_str(&format!("r\"{}\"", r.pattern)),
            Value::Match(m) => match &m.matched {
                Some(data) => out.push_str(&format!("<Match: {}>", data.text)),
                None => out.push_str("<No Match>"),
            },
            Value::Error(e) => out.push_str(&format!("<Error: {}: {}>", e.kind, e.message)),
            Value::Function(func) => match func.as_ref() {
                Function::User { .. } => out.push_str(&format!("<function {}>", func.name())),
                Function::Native(native) => {
                    out.push_str(&format!("<built-in function {}>", native.name))
                }
            },
        }
    }

    /// Structural equality. `comparing` holds the pairs of list/dict
    /// addresses already under comparison; a pair met again counts as equal.
    fn equals(&self, other: &Value, comparing: &mut Vec<(usize, usize)>) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a) as usize, Rc::as_ptr(b) as usize);
                if comparing.contains(&pair) {
                    return true;
                }
                comparing.push(pair);
                let equal = items_equal(&a.borrow(), &b.borrow(), comparing);
                comparing.pop();
                equal
            }
            (Value::Tuple(a), Value::Tuple(b)) => items_equal(a, b, comparing),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a) as usize, Rc::as_ptr(b) as usize);
                if comparing.contains(&pair) {
                    return true;
                }
                comparing.push(pair);
                let equal = a.borrow().equals(&b.borrow(), comparing);
                comparing.pop();
                equal
            }
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.pattern == b.pattern,
            (Value::Match(a), Value::Match(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Apply a binary operator with this value as the left operand
    pub fn binary_op(&self, op: BinaryOperator, right: &Value) -> OpResult {
        match op {
            BinaryOperator::Equal => return Ok(Value::bool(self == right)),
            BinaryOperator::NotEqual => return Ok(Value::bool(self != right)),
            BinaryOperator::And => return Ok(Value::bool(self.is_truthy() && right.is_truthy())),
            BinaryOperator::Or => return Ok(Value::bool(self.is_truthy() || right.is_truthy())),
            _ => {}
        }

        match self {
            Value::Number(a) => number_op(op, *a, self, right),
            Value::String(s) => string_op(op, s, self, right),
            Value::List(items) => list_op(op, items, self, right),
            Value::Tuple(items) => tuple_op(op, items, self, right),
            Value::Dict(dict) => dict_op(op, dict, self, right),
            Value::Set(set) => set_op(op, set, self, right),
            _ => Err(OpError::illegal(op, self, right)),
        }
    }

    /// Unary minus
    pub fn negate(&self) -> OpResult {
        match self {
            Value::Number(Number::Int(i)) => i.checked_neg().map(Value::int).ok_or_else(overflow),
            Value::Number(Number::Float(f)) => Ok(Value::float(-f)),
            other => Err(OpError::new(
                RuntimeErrorKind::IllegalOperation,
                format!("Illegal operation: -{}", other.type_name()),
            )),
        }
    }

    /// Unary plus
    pub fn positive(&self) -> OpResult {
        match self {
            Value::Number(_) => Ok(self.clone()),
            other => Err(OpError::new(
                RuntimeErrorKind::IllegalOperation,
                format!("Illegal operation: +{}", other.type_name()),
            )),
        }
    }

    /// Indexing with `@`
    pub fn index(&self, index: &Value) -> OpResult {
        match self {
            Value::List(items) => sequence_get(&items.borrow(), index),
            Value::Tuple(items) => sequence_get(items, index),
            Value::Dict(dict) => {
                if !Dict::is_valid_key(index) {
                    return Err(OpError::new(
                        RuntimeErrorKind::TypeMismatch,
                        format!("Dict keys must be numbers or strings, not {}", index.type_name()),
                    ));
                }
                dict.borrow().get(index).cloned().ok_or_else(|| {
                    OpError::new(
                        RuntimeErrorKind::KeyNotFound,
                        format!("Key {} not found in dict", index.repr()),
                    )
                })
            }
            Value::Set(_) => Err(OpError::new(
                RuntimeErrorKind::IllegalOperation,
                "Sets are unordered and do not support indexing",
            )),
            other => Err(OpError::new(
                RuntimeErrorKind::IllegalOperation,
                format!("Cannot index into a {}", other.type_name()),
            )),
        }
    }

    /// Elements of a list or tuple, for iteration
    pub fn elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.borrow().clone()),
            Value::Tuple(items) => Some(items.to_vec()),
            _ => None,
        }
    }
}

fn overflow() -> OpError {
    OpError::new(RuntimeErrorKind::IllegalOperation, "Integer overflow")
}

fn division_by_zero(op: BinaryOperator) -> OpError {
    let what = if op == BinaryOperator::Modulo {
        "Modulo"
    } else {
        "Division"
    };
    OpError::new(RuntimeErrorKind::DivisionByZero, format!("{} by zero", what))
}

/// Resolve a possibly negative index against a sequence length
pub fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let resolved = if index < 0 {
        i64::try_from(len).ok()? + index
    } else {
        index
    };
    usize::try_from(resolved).ok().filter(|&i| i < len)
}

/// Integer index out of a Number value
pub fn index_from(value: &Value) -> Result<i64, OpError> {
    match value {
        Value::Number(Number::Int(i)) => Ok(*i),
        other => Err(OpError::new(
            RuntimeErrorKind::TypeMismatch,
            format!("Index must be an integer, not {}", other.repr()),
        )),
    }
}

fn sequence_get(items: &[Value], index: &Value) -> OpResult {
    let i = index_from(index)?;
    resolve_index(items.len(), i)
        .map(|i| items[i].clone())
        .ok_or_else(|| {
            OpError::new(
                RuntimeErrorKind::IndexOutOfBounds,
                format!("Index {} is out of bounds for length {}", i, items.len()),
            )
        })
}

fn number_op(op: BinaryOperator, a: Number, left: &Value, right: &Value) -> OpResult {
    let b = match right {
        Value::Number(b) => *b,
        _ => return Err(OpError::illegal(op, left, right)),
    };

    match op {
        BinaryOperator::Less => return Ok(Value::bool(a.compare(b) == Some(Ordering::Less))),
        BinaryOperator::Greater => return Ok(Value::bool(a.compare(b) == Some(Ordering::Greater))),
        BinaryOperator::LessEqual => {
            return Ok(Value::bool(matches!(
                a.compare(b),
                Some(Ordering::Less | Ordering::Equal)
            )))
        }
        BinaryOperator::GreaterEqual => {
            return Ok(Value::bool(matches!(
                a.compare(b),
                Some(Ordering::Greater | Ordering::Equal)
            )))
        }
        _ => {}
    }

    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            let result = match op {
                BinaryOperator::Add => x.checked_add(y),
                BinaryOperator::Subtract => x.checked_sub(y),
                BinaryOperator::Multiply => x.checked_mul(y),
                BinaryOperator::Divide | BinaryOperator::Modulo if y == 0 => {
                    return Err(division_by_zero(op))
                }
                BinaryOperator::Divide => x.checked_div(y),
                BinaryOperator::Modulo => x.checked_rem(y),
                _ => return Err(OpError::illegal(op, left, right)),
            };
            result.map(Value::int).ok_or_else(overflow)
        }
        (a, b) => {
            let (x, y) = (a.as_f64(), b.as_f64());
            let result = match op {
                BinaryOperator::Add => x + y,
                BinaryOperator::Subtract => x - y,
                BinaryOperator::Multiply => x * y,
                BinaryOperator::Divide | BinaryOperator::Modulo if y == 0.0 => {
                    return Err(division_by_zero(op))
                }
                BinaryOperator::Divide => x / y,
                BinaryOperator::Modulo => x % y,
                _ => return Err(OpError::illegal(op, left, right)),
            };
            Ok(Value::float(result))
        }
    }
}

fn string_op(op: BinaryOperator, s: &str, left: &Value, right: &Value) -> OpResult {
    match (op, right) {
        (BinaryOperator::Add, Value::String(other)) => Ok(Value::String(format!("{}{}", s, other))),
        (BinaryOperator::Add, Value::Number(n)) => Ok(Value::String(format!("{}{}", s, n))),
        (BinaryOperator::Add, other) => Ok(Value::String(format!("{}{}", s, other.repr()))),
        (BinaryOperator::Multiply, Value::Number(n)) => {
            let count = match n {
                Number::Int(i) => *i,
                Number::Float(f) => *f as i64,
            };
            let count = usize::try_from(count).unwrap_or(0);
            match s.len().checked_mul(count) {
                Some(total) if total <= MAX_STRING_BYTES => Ok(Value::String(s.repeat(count))),
                _ => Err(OpError::new(
                    RuntimeErrorKind::IllegalOperation,
                    format!("Repeated string would exceed {} bytes", MAX_STRING_BYTES),
                )),
            }
        }
        (BinaryOperator::Less, Value::String(other)) => Ok(Value::bool(s < other.as_str())),
        (BinaryOperator::Greater, Value::String(other)) => Ok(Value::bool(s > other.as_str())),
        (BinaryOperator::LessEqual, Value::String(other)) => Ok(Value::bool(s <= other.as_str())),
        (BinaryOperator::GreaterEqual, Value::String(other)) => {
            Ok(Value::bool(s >= other.as_str()))
        }
        _ => Err(OpError::illegal(op, left, right)),
    }
}

fn list_op(op: BinaryOperator, items: &ListRef, left: &Value, right: &Value) -> OpResult {
    match (op, right) {
        (BinaryOperator::Add, value) => {
            let mut new_items = items.borrow().clone();
            new_items.push(value.clone());
            Ok(Value::list(new_items))
        }
        (BinaryOperator::Subtract, Value::Number(_)) => {
            let mut new_items = items.borrow().clone();
            let i = index_from(right)?;
            let position = resolve_index(new_items.len(), i).ok_or_else(|| {
                OpError::new(
                    RuntimeErrorKind::IndexOutOfBounds,
                    format!("Index {} is out of bounds for length {}", i, new_items.len()),
                )
            })?;
            new_items.remove(position);
            Ok(Value::list(new_items))
        }
        (BinaryOperator::Multiply, Value::List(other)) => {
            let mut new_items = items.borrow().clone();
            new_items.extend(other.borrow().iter().cloned());
            Ok(Value::list(new_items))
        }
        (BinaryOperator::Divide, Value::Number(_)) => sequence_get(&items.borrow(), right),
        _ => Err(OpError::illegal(op, left, right)),
    }
}

fn tuple_op(op: BinaryOperator, items: &Rc<[Value]>, left: &Value, right: &Value) -> OpResult {
    match (op, right) {
        (BinaryOperator::Add | BinaryOperator::Subtract, _) => Err(OpError::new(
            RuntimeErrorKind::IllegalOperation,
            "Tuples are immutable and cannot be modified",
        )),
        (BinaryOperator::Multiply, Value::Tuple(other)) => Ok(Value::Tuple(
            items.iter().chain(other.iter()).cloned().collect(),
        )),
        (BinaryOperator::Divide, Value::Number(_)) => sequence_get(items, right),
        _ => Err(OpError::illegal(op, left, right)),
    }
}

fn dict_op(op: BinaryOperator, dict: &DictRef, left: &Value, right: &Value) -> OpResult {
    match op {
        BinaryOperator::Add => {
            let pair = right.elements().filter(|pair| pair.len() == 2).ok_or_else(|| {
                OpError::new(
                    RuntimeErrorKind::TypeMismatch,
                    "Dict addition needs a [key, value] pair",
                )
            })?;
            let mut pair = pair.into_iter();
            let (key, value) = match (pair.next(), pair.next()) {
                (Some(key), Some(value)) => (key, value),
                _ => return Err(OpError::illegal(op, left, right)),
            };
            if !Dict::is_valid_key(&key) {
                return Err(OpError::new(
                    RuntimeErrorKind::TypeMismatch,
                    format!("Dict keys must be numbers or strings, not {}", key.type_name()),
                ));
            }
            let mut new_dict = dict.borrow().clone();
            new_dict.insert(key, value);
            Ok(Value::dict(new_dict))
        }
        BinaryOperator::Subtract => {
            let mut new_dict = dict.borrow().clone();
            new_dict.remove(right).ok_or_else(|| {
                OpError::new(
                    RuntimeErrorKind::KeyNotFound,
                    format!("Key {} not found in dict", right.repr()),
                )
            })?;
            Ok(Value::dict(new_dict))
        }
        _ => Err(OpError::illegal(op, left, right)),
    }
}

fn set_op(op: BinaryOperator, set: &SetRef, left: &Value, right: &Value) -> OpResult {
    match (op, right) {
        (BinaryOperator::Add, Value::Set(other)) => {
            Ok(Value::set(set.union(other).cloned().collect()))
        }
        (BinaryOperator::Subtract, Value::Set(other)) => {
            Ok(Value::set(set.difference(other).cloned().collect()))
        }
        _ => Err(OpError::illegal(op, left, right)),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other, &mut Vec::new())
    }
}

fn items_equal(a: &[Value], b: &[Value], comparing: &mut Vec<(usize, usize)>) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| ensure_sufficient_stack(|| x.equals(y, comparing)))
}

fn render_items<'a>(items: impl Iterator<Item = &'a Value>, out: &mut String, visiting: &mut Vec<usize>) {
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        ensure_sufficient_stack(|| item.render(out, true, visiting));
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out, false, &mut Vec::new());
        f.write_str(&out)
    }
}
