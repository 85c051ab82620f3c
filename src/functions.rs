//! Built-in functions for UTTR
//!
//! Every built-in declares its parameter names and is installed into the
//! global environment as a function value. The evaluator checks arity exactly
//! as for user functions, then hands the arguments over by name.
//!
//! Failures are `anyhow` errors. An [`OpError`] inside one carries the runtime
//! error kind; anything else is reported as a built-in failure.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use anyhow::{anyhow, Result};

use crate::error::RuntimeErrorKind;
use crate::value::{
    index_from, resolve_index, Dict, DictRef, ListRef, MatchData, MatchValue, OpError,
    RegexValue, SetElement, SetRef, Value,
};

/// Function signature
pub type BuiltinFunction = fn(&Arguments, &mut dyn Write) -> Result<Value>;

/// A built-in function and its declared parameters
#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub params: &'static [&'static str],
    /// Number of trailing parameters that may be omitted
    pub optional: usize,
    pub func: BuiltinFunction,
}

impl NativeFunction {
    pub fn required(&self) -> usize {
        self.params.len() - self.optional
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Arguments of a built-in call, resolved by parameter name
pub struct Arguments {
    params: &'static [&'static str],
    values: Vec<Value>,
}

impl Arguments {
    pub fn new(params: &'static [&'static str], values: Vec<Value>) -> Self {
        Self { params, values }
    }

    /// A required argument
    pub fn get(&self, name: &str) -> Result<&Value> {
        self.optional(name)
            .ok_or_else(|| anyhow!("Missing argument '{}'", name))
    }

    /// An argument that may have been omitted
    pub fn optional(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .position(|p| *p == name)
            .and_then(|i| self.values.get(i))
    }
}

/// Function registry
pub struct FunctionRegistry {
    functions: Vec<NativeFunction>,
}

impl FunctionRegistry {
    /// Create a new function registry with all built-in functions
    pub fn new() -> Self {
        let mut registry = Self {
            functions: Vec::new(),
        };

        // Output
        registry.register("show", &["value"], fn_show);

        // Collections
        registry.register("len", &["list"], fn_len);
        registry.register("append", &["list", "value"], fn_append);
        registry.register("pop", &["list", "index"], fn_pop);
        registry.register("extend", &["listA", "listB"], fn_extend);
        registry.register("keys", &["dict"], fn_keys);
        registry.register("values", &["dict"], fn_values);
        registry.register("has_key", &["dict", "key"], fn_has_key);
        registry.register("remove", &["dict", "key"], fn_remove);
        registry.register("tuple", &["value"], fn_tuple);
        registry.register("list", &["value"], fn_list);
        registry.register("copy", &["value"], fn_copy);

        // Errors
        registry.register("error_message", &["error"], fn_error_message);
        registry.register("error_type", &["error"], fn_error_type);

        // Strings
        registry.register_optional("split", &["string", "delimiter"], 1, fn_split);
        registry.register("join", &["list", "separator"], fn_join);
        registry.register("upper", &["string"], fn_upper);
        registry.register("lower", &["string"], fn_lower);
        registry.register("replace", &["string", "old", "new"], fn_replace);
        registry.register_optional("substring", &["string", "start", "end"], 1, fn_substring);

        // Regular expressions
        registry.register("regex_match", &["pattern", "text"], fn_regex_match);
        registry.register("regex_search", &["pattern", "text"], fn_regex_search);
        registry.register(
            "regex_replace",
            &["pattern", "replacement", "text"],
            fn_regex_replace,
        );
        registry.register("regex_findall", &["pattern", "text"], fn_regex_findall);
        registry.register("regex_split", &["pattern", "text"], fn_regex_split);

        // Sets
        registry.register("set_from_list", &["list"], fn_set_from_list);
        registry.register("union", &["set1", "set2"], fn_union);
        registry.register("intersection", &["set1", "set2"], fn_intersection);
        registry.register("difference", &["set1", "set2"], fn_difference);
        registry.register(
            "symmetric_difference",
            &["set1", "set2"],
            fn_symmetric_difference,
        );
        registry.register("add", &["set", "element"], fn_add);
        registry.register("contains", &["collection", "element"], fn_contains);
        registry.register("is_subset", &["set1", "set2"], fn_is_subset);
        registry.register("is_superset", &["set1", "set2"], fn_is_superset);

        registry
    }

    /// Register a function
    pub fn register(
        &mut self,
        name: &'static str,
        params: &'static [&'static str],
        func: BuiltinFunction,
    ) {
        self.register_optional(name, params, 0, func);
    }

    /// Register a function whose last `optional` parameters may be omitted
    pub fn register_optional(
        &mut self,
        name: &'static str,
        params: &'static [&'static str],
        optional: usize,
        func: BuiltinFunction,
    ) {
        self.functions.push(NativeFunction {
            name,
            params,
            optional,
            func,
        });
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<&NativeFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// All registered functions, in registration order
    pub fn functions(&self) -> impl Iterator<Item = &NativeFunction> {
        self.functions.iter()
    }

    /// Get list of all function names
    pub fn function_names(&self) -> Vec<&'static str> {
        self.functions.iter().map(|f| f.name).collect()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn type_error(message: impl Into<String>) -> anyhow::Error {
    OpError::new(RuntimeErrorKind::TypeMismatch, message).into()
}

fn expect_string<'a>(args: &'a Arguments, name: &str) -> Result<&'a str> {
    match args.get(name)? {
        Value::String(s) => Ok(s.as_str()),
        other => Err(type_error(format!(
            "Argument '{}' must be a string, not {}",
            name,
            other.type_name()
        ))),
    }
}

fn expect_int(args: &Arguments, name: &str) -> Result<i64> {
    Ok(index_from(args.get(name)?)?)
}

fn expect_list(args: &Arguments, name: &str) -> Result<ListRef> {
    match args.get(name)? {
        Value::List(items) => Ok(Rc::clone(items)),
        other => Err(type_error(format!(
            "Argument '{}' must be a list, not {}",
            name,
            other.type_name()
        ))),
    }
}

fn expect_dict(args: &Arguments, name: &str) -> Result<DictRef> {
    match args.get(name)? {
        Value::Dict(dict) => Ok(Rc::clone(dict)),
        other => Err(type_error(format!(
            "Argument '{}' must be a dict, not {}",
            name,
            other.type_name()
        ))),
    }
}

fn expect_set(args: &Arguments, name: &str) -> Result<SetRef> {
    match args.get(name)? {
        Value::Set(set) => Ok(Rc::clone(set)),
        other => Err(type_error(format!(
            "Argument '{}' must be a set, not {}",
            name,
            other.type_name()
        ))),
    }
}

/// A regex argument: a regex value, or a string compiled on use
fn expect_regex(args: &Arguments, name: &str) -> Result<Rc<RegexValue>> {
    match args.get(name)? {
        Value::Regex(regex) => Ok(Rc::clone(regex)),
        Value::String(pattern) => Ok(Rc::new(RegexValue::new(pattern)?)),
        other => Err(type_error(format!(
            "Argument '{}' must be a regex or string pattern, not {}",
            name,
            other.type_name()
        ))),
    }
}

fn expect_dict_key(key: &Value) -> Result<()> {
    if Dict::is_valid_key(key) {
        Ok(())
    } else {
        Err(type_error(format!(
            "Dict keys must be numbers or strings, not {}",
            key.type_name()
        )))
    }
}

// Output

fn fn_show(args: &Arguments, out: &mut dyn Write) -> Result<Value> {
    writeln!(out, "{}", args.get("value")?)?;
    Ok(Value::null())
}

// Collections

fn fn_len(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let len = match args.get("list")? {
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Set(set) => set.len(),
        Value::Dict(dict) => dict.borrow().len(),
        Value::String(s) => s.chars().count(),
        other => {
            return Err(type_error(format!(
                "len() does not support {}",
                other.type_name()
            )))
        }
    };
    Ok(Value::int(len as i64))
}

fn fn_append(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let list = expect_list(args, "list")?;
    let value = args.get("value")?.clone();
    list.borrow_mut().push(value);
    Ok(Value::null())
}

fn fn_pop(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let list = expect_list(args, "list")?;
    let index = expect_int(args, "index")?;
    let mut items = list.borrow_mut();
    let position = resolve_index(items.len(), index).ok_or_else(|| {
        anyhow::Error::from(OpError::new(
            RuntimeErrorKind::IndexOutOfBounds,
            format!("Cannot pop index {} from a list of length {}", index, items.len()),
        ))
    })?;
    Ok(items.remove(position))
}

fn fn_extend(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let target = expect_list(args, "listA")?;
    let source = expect_list(args, "listB")?;
    // Snapshot first so extending a list with itself does not alias the borrow
    let items = source.borrow().clone();
    target.borrow_mut().extend(items);
    Ok(Value::null())
}

fn fn_keys(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let dict = expect_dict(args, "dict")?;
    let keys = dict.borrow().keys().cloned().collect();
    Ok(Value::list(keys))
}

fn fn_values(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let dict = expect_dict(args, "dict")?;
    let values = dict.borrow().values().cloned().collect();
    Ok(Value::list(values))
}

fn fn_has_key(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let dict = expect_dict(args, "dict")?;
    let key = args.get("key")?;
    expect_dict_key(key)?;
    let found = dict.borrow().contains_key(key);
    Ok(Value::bool(found))
}

fn fn_remove(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let key = args.get("key")?;
    match args.get("dict")? {
        Value::Dict(dict) => {
            expect_dict_key(key)?;
            let removed = dict.borrow_mut().remove(key);
            removed.ok_or_else(|| {
                OpError::new(
                    RuntimeErrorKind::KeyNotFound,
                    format!("Key {} not found in dict", key.repr()),
                )
                .into()
            })
        }
        Value::Set(set) => {
            let element = SetElement::from_value(key)?;
            if !set.contains(&element) {
                return Err(OpError::new(
                    RuntimeErrorKind::KeyNotFound,
                    format!("Element {} not found in set", key.repr()),
                )
                .into());
            }
            let mut new_set = set.as_ref().clone();
            new_set.remove(&element);
            Ok(Value::set(new_set))
        }
        other => Err(type_error(format!(
            "remove() needs a dict or set, not {}",
            other.type_name()
        ))),
    }
}

fn string_chars(s: &str) -> Vec<Value> {
    s.chars().map(|c| Value::String(c.to_string())).collect()
}

fn fn_tuple(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let value = args.get("value")?;
    Ok(match value {
        Value::Tuple(_) => value.clone(),
        Value::List(items) => Value::tuple(items.borrow().clone()),
        Value::String(s) => Value::tuple(string_chars(s)),
        other => Value::tuple(vec![other.clone()]),
    })
}

fn fn_list(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let value = args.get("value")?;
    Ok(match value {
        Value::List(_) => value.clone(),
        Value::Tuple(items) => Value::list(items.to_vec()),
        Value::Set(set) => Value::list(set.iter().map(SetElement::to_value).collect()),
        Value::String(s) => Value::list(string_chars(s)),
        other => Value::list(vec![other.clone()]),
    })
}

fn fn_copy(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    Ok(match args.get("value")? {
        Value::List(items) => Value::list(items.borrow().clone()),
        Value::Dict(dict) => Value::dict(dict.borrow().clone()),
        other => other.clone(),
    })
}

// Errors

fn fn_error_message(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    match args.get("error")? {
        Value::Error(error) => Ok(Value::string(error.message.clone())),
        other => Err(type_error(format!(
            "error_message() needs an error, not {}",
            other.type_name()
        ))),
    }
}

fn fn_error_type(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    match args.get("error")? {
        Value::Error(error) => Ok(Value::string(error.kind.clone())),
        other => Err(type_error(format!(
            "error_type() needs an error, not {}",
            other.type_name()
        ))),
    }
}

// Strings

fn fn_split(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let string = expect_string(args, "string")?;
    let delimiter = match args.optional("delimiter") {
        None => " ",
        Some(value) if value.is_null() => " ",
        Some(Value::String(d)) => d.as_str(),
        Some(other) => {
            return Err(type_error(format!(
                "Delimiter must be a string, not {}",
                other.type_name()
            )))
        }
    };
    if delimiter.is_empty() {
        return Err(anyhow!("Delimiter must not be empty"));
    }
    let parts = string.split(delimiter).map(Value::string).collect();
    Ok(Value::list(parts))
}

fn fn_join(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let list = expect_list(args, "list")?;
    let separator = expect_string(args, "separator")?;
    let parts = list
        .borrow()
        .iter()
        .map(|item| match item {
            Value::String(_) | Value::Number(_) => Ok(item.to_string()),
            other => Err(type_error(format!(
                "join() elements must be strings or numbers, not {}",
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::string(parts.join(separator)))
}

fn fn_upper(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    Ok(Value::string(expect_string(args, "string")?.to_uppercase()))
}

fn fn_lower(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    Ok(Value::string(expect_string(args, "string")?.to_lowercase()))
}

fn fn_replace(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let string = expect_string(args, "string")?;
    let old = expect_string(args, "old")?;
    let new = expect_string(args, "new")?;
    if old.is_empty() {
        return Err(anyhow!("Cannot replace an empty string"));
    }
    Ok(Value::string(string.replace(old, new)))
}

/// Clamp a slice bound: negative counts from the end, overshoot saturates
fn clamp_bound(bound: i64, len: usize) -> usize {
    let len = len as i64;
    let resolved = if bound < 0 { len + bound } else { bound };
    resolved.clamp(0, len) as usize
}

fn fn_substring(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let chars: Vec<char> = expect_string(args, "string")?.chars().collect();
    let start = clamp_bound(expect_int(args, "start")?, chars.len());
    let end = match args.optional("end") {
        None => chars.len(),
        Some(value) if value.is_null() => chars.len(),
        Some(value) => clamp_bound(index_from(value)?, chars.len()),
    };
    let slice: String = if start < end {
        chars[start..end].iter().collect()
    } else {
        String::new()
    };
    Ok(Value::string(slice))
}

// Regular expressions

fn match_data(captures: &regex::Captures<'_>) -> Option<MatchData> {
    let whole = captures.get(0)?;
    Some(MatchData {
        text: whole.as_str().to_string(),
        start: whole.start(),
        end: whole.end(),
        groups: captures
            .iter()
            .skip(1)
            .map(|g| g.map(|m| m.as_str().to_string()))
            .collect(),
    })
}

fn fn_regex_match(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let regex = expect_regex(args, "pattern")?;
    let text = expect_string(args, "text")?;
    // Anchored at the start of the text
    let matched = regex
        .regex
        .captures(text)
        .filter(|c| c.get(0).is_some_and(|m| m.start() == 0))
        .and_then(|c| match_data(&c));
    Ok(Value::Match(Rc::new(MatchValue { matched })))
}

fn fn_regex_search(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let regex = expect_regex(args, "pattern")?;
    let text = expect_string(args, "text")?;
    let Some(data) = regex.regex.captures(text).and_then(|c| match_data(&c)) else {
        return Ok(Value::null());
    };

    let groups = data
        .groups
        .into_iter()
        .map(|g| g.map(Value::string).unwrap_or_else(Value::null))
        .collect();
    let mut dict = Dict::new();
    dict.insert(Value::string("matched_text"), Value::string(data.text));
    dict.insert(Value::string("start_pos"), Value::int(data.start as i64));
    dict.insert(Value::string("end_pos"), Value::int(data.end as i64));
    dict.insert(Value::string("groups"), Value::list(groups));
    Ok(Value::dict(dict))
}

fn fn_regex_replace(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let regex = expect_regex(args, "pattern")?;
    let replacement = expect_string(args, "replacement")?;
    let text = expect_string(args, "text")?;
    Ok(Value::string(regex.regex.replace_all(text, replacement)))
}

fn fn_regex_findall(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let regex = expect_regex(args, "pattern")?;
    let text = expect_string(args, "text")?;
    let group_count = regex.regex.captures_len() - 1;

    let matches = regex
        .regex
        .captures_iter(text)
        .map(|captures| match group_count {
            0 => captures
                .get(0)
                .map(|m| Value::string(m.as_str()))
                .unwrap_or_else(Value::null),
            1 => captures
                .get(1)
                .map(|m| Value::string(m.as_str()))
                .unwrap_or_else(|| Value::string("")),
            _ => Value::list(
                captures
                    .iter()
                    .skip(1)
                    .map(|g| g.map(|m| Value::string(m.as_str())).unwrap_or_else(Value::null))
                    .collect(),
            ),
        })
        .collect();
    Ok(Value::list(matches))
}

fn fn_regex_split(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let regex = expect_regex(args, "pattern")?;
    let text = expect_string(args, "text")?;
    let parts = regex.regex.split(text).map(Value::string).collect();
    Ok(Value::list(parts))
}

// Sets

fn fn_set_from_list(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let value = args.get("list")?;
    let elements = value.elements().ok_or_else(|| {
        type_error(format!(
            "set_from_list() needs a list or tuple, not {}",
            value.type_name()
        ))
    })?;
    let set = elements
        .iter()
        .map(SetElement::from_value)
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(Value::set(set))
}

fn two_sets(args: &Arguments) -> Result<(SetRef, SetRef)> {
    Ok((expect_set(args, "set1")?, expect_set(args, "set2")?))
}

fn fn_union(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let (a, b) = two_sets(args)?;
    Ok(Value::set(a.union(&b).cloned().collect()))
}

fn fn_intersection(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let (a, b) = two_sets(args)?;
    Ok(Value::set(a.intersection(&b).cloned().collect()))
}

fn fn_difference(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let (a, b) = two_sets(args)?;
    Ok(Value::set(a.difference(&b).cloned().collect()))
}

fn fn_symmetric_difference(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let (a, b) = two_sets(args)?;
    Ok(Value::set(a.symmetric_difference(&b).cloned().collect()))
}

fn fn_add(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let set = expect_set(args, "set")?;
    let element = SetElement::from_value(args.get("element")?)?;
    let mut new_set = set.as_ref().clone();
    new_set.insert(element);
    Ok(Value::set(new_set))
}

fn fn_contains(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let element = args.get("element")?;
    match args.get("collection")? {
        Value::Set(set) => {
            let found = SetElement::from_value(element)
                .map(|e| set.contains(&e))
                .unwrap_or(false);
            Ok(Value::bool(found))
        }
        Value::List(items) => Ok(Value::bool(items.borrow().iter().any(|v| v == element))),
        Value::Tuple(items) => Ok(Value::bool(items.iter().any(|v| v == element))),
        other => Err(type_error(format!(
            "contains() needs a set or list, not {}",
            other.type_name()
        ))),
    }
}

fn fn_is_subset(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let (a, b) = two_sets(args)?;
    Ok(Value::bool(a.is_subset(&b)))
}

fn fn_is_superset(args: &Arguments, _out: &mut dyn Write) -> Result<Value> {
    let (a, b) = two_sets(args)?;
    Ok(Value::bool(a.is_superset(&b)))
}
