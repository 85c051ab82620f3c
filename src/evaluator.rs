//! Evaluator for UTTR - walks the AST against an arena of environments
//!
//! Every evaluation step returns an [`Outcome`]: a value, or a [`Signal`]
//! that unwinds to whoever consumes it. Loops consume `Break`/`Continue`,
//! function calls consume `Return`, and `attempt` consumes `Error`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{BinaryOperator, Body, Expression, FunctionBody, ImportItem, Program, UnaryOperator};
use crate::error::{RuntimeErrorKind, UttrError};
use crate::functions::{Arguments, FunctionRegistry, NativeFunction};
use crate::lexer::Span;
use crate::module_source::{unit_dir, Module, ModuleLoader};
use crate::stack::ensure_sufficient_stack;
use crate::symbol_table::{EnvId, ScopeKind, SymbolTable};
use crate::token_parser::parse;
use crate::value::{Dict, ErrorValue, Function, OpError, RegexValue, Value};

/// Non-value result of an evaluation step
#[derive(Debug)]
pub enum Signal {
    Error(UttrError),
    /// `give`: unwind to the nearest function call
    Return(Value),
    /// `cut`: leave the nearest loop
    Break(Span),
    /// `skip`: next iteration of the nearest loop
    Continue(Span),
}

impl From<UttrError> for Signal {
    fn from(error: UttrError) -> Self {
        Signal::Error(error)
    }
}

pub type Outcome = Result<Value, Signal>;

/// In-memory output sink that can be read back after a run
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    buffer: Rc<RefCell<Vec<u8>>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.borrow()).into_owned()
    }

    pub fn clear(&self) {
        self.buffer.borrow_mut().clear();
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Evaluator context
pub struct Evaluator {
    symbols: SymbolTable,
    modules: ModuleLoader,
    output: Box<dyn Write>,
    builtin_names: HashSet<String>,
    max_call_depth: usize,
    call_depth: usize,
}

impl Evaluator {
    /// Create a new evaluator with the built-ins installed in its global scope
    pub fn new(max_call_depth: usize, stdlib_dir: PathBuf, output: Box<dyn Write>) -> Self {
        let mut evaluator = Self {
            symbols: SymbolTable::new(),
            modules: ModuleLoader::new(stdlib_dir),
            output,
            builtin_names: HashSet::new(),
            max_call_depth,
            call_depth: 0,
        };
        evaluator.register_builtins();
        evaluator
    }

    fn register_builtins(&mut self) {
        let global = self.symbols.global();
        let registry = FunctionRegistry::new();
        for native in registry.functions() {
            self.define_builtin(global, native.name, native_value(native));
        }
        self.define_builtin(global, "null", Value::null());
        self.define_builtin(global, "true", Value::bool(true));
        self.define_builtin(global, "false", Value::bool(false));
    }

    fn define_builtin(&mut self, env: EnvId, name: &str, value: Value) {
        self.builtin_names.insert(name.to_string());
        self.symbols.define(env, name, value);
    }

    pub fn global(&self) -> EnvId {
        self.symbols.global()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn modules(&self) -> &ModuleLoader {
        &self.modules
    }

    /// Replace the sink that `show` writes to
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    /// Global bindings made by programs, excluding untouched built-ins
    pub fn user_bindings(&self) -> Vec<(String, Value)> {
        self.symbols
            .bindings(self.global())
            .into_iter()
            .filter(|(name, _)| !self.builtin_names.contains(name))
            .collect()
    }

    /// Run a parsed program in the global scope
    pub fn run_program(&mut self, program: &Program) -> Result<Value, UttrError> {
        let global = self.global();
        let result = self.run_statements(&program.statements, global);
        if let Err(e) = self.output.flush() {
            debug!("Failed to flush output: {}", e);
        }
        result
    }

    /// Evaluate a top-level statement sequence.
    ///
    /// A `give` here ends the sequence with its value; `cut`/`skip` have no
    /// loop to act on.
    fn run_statements(&mut self, statements: &[Expression], env: EnvId) -> Result<Value, UttrError> {
        let mut last = Value::null();
        for statement in statements {
            match self.evaluate(statement, env) {
                Ok(value) => last = value,
                Err(Signal::Return(value)) => return Ok(value),
                Err(Signal::Error(error)) => return Err(error),
                Err(Signal::Break(span)) => return Err(stray_control("cut", span)),
                Err(Signal::Continue(span)) => return Err(stray_control("skip", span)),
            }
        }
        Ok(last)
    }

    /// Evaluate an expression
    pub fn evaluate(&mut self, expr: &Expression, env: EnvId) -> Outcome {
        ensure_sufficient_stack(|| self.evaluate_expression(expr, env))
    }

    fn evaluate_expression(&mut self, expr: &Expression, env: EnvId) -> Outcome {
        match expr {
            Expression::Number { value, .. } => Ok(match value {
                crate::ast::NumberLiteral::Int(i) => Value::int(*i),
                crate::ast::NumberLiteral::Float(f) => Value::float(*f),
            }),

            Expression::String { value, .. } => Ok(Value::string(value.clone())),

            Expression::Regex { pattern, span } => RegexValue::new(pattern)
                .map(|regex| Value::Regex(Rc::new(regex)))
                .map_err(|e| op_error(e, span)),

            Expression::List { elements, .. } => Ok(Value::list(self.evaluate_all(elements, env)?)),

            Expression::Tuple { elements, .. } => {
                Ok(Value::tuple(self.evaluate_all(elements, env)?))
            }

            Expression::Dict { entries, .. } => {
                let mut dict = Dict::new();
                for (key_expr, value_expr) in entries {
                    let key = self.evaluate(key_expr, env)?;
                    if !Dict::is_valid_key(&key) {
                        return Err(runtime(
                            RuntimeErrorKind::TypeMismatch,
                            format!("Dict keys must be numbers or strings, not {}", key.type_name()),
                            key_expr.span(),
                        ));
                    }
                    let value = self.evaluate(value_expr, env)?;
                    dict.insert(key, value);
                }
                Ok(Value::dict(dict))
            }

            Expression::Variable { name, span } => self.symbols.get(env, name).cloned().ok_or_else(|| {
                runtime(
                    RuntimeErrorKind::UndefinedName,
                    format!("'{}' is not defined", name),
                    span,
                )
            }),

            Expression::Assign { name, value, .. } | Expression::ConstAssign { name, value, .. } => {
                let value = self.evaluate(value, env)?;
                self.symbols.assign(env, name, value.clone());
                Ok(value)
            }

            Expression::BinaryOp {
                op,
                left,
                right,
                span,
            } => {
                let left = self.evaluate(left, env)?;
                let right = self.evaluate(right, env)?;
                self.evaluate_binary_op(*op, &left, &right, span)
            }

            Expression::UnaryOp { op, operand, span } => {
                let value = self.evaluate(operand, env)?;
                let result = match op {
                    UnaryOperator::Plus => value.positive(),
                    UnaryOperator::Negate => value.negate(),
                    UnaryOperator::Not => Ok(Value::bool(!value.is_truthy())),
                };
                result.map_err(|e| op_error(e, span))
            }

            Expression::If {
                branches,
                otherwise,
                ..
            } => {
                for branch in branches {
                    if self.evaluate(&branch.guard, env)?.is_truthy() {
                        return self.evaluate_body(&branch.body, env);
                    }
                }
                match otherwise {
                    Some(body) => self.evaluate_body(body, env),
                    None => Ok(Value::null()),
                }
            }

            Expression::Switch {
                subject,
                cases,
                default,
                ..
            } => {
                let subject = self.evaluate(subject, env)?;
                for case in cases {
                    if self.evaluate(&case.guard, env)? == subject {
                        return self.evaluate_body(&case.body, env);
                    }
                }
                match default {
                    Some(body) => self.evaluate_body(body, env),
                    None => Ok(Value::null()),
                }
            }

            Expression::ForRange {
                variable,
                start,
                end,
                step,
                body,
                ..
            } => self.evaluate_for_range(variable, start, end, step.as_deref(), body, env),

            Expression::ForEach {
                variable,
                iterable,
                body,
                ..
            } => {
                let items = self.evaluate(iterable, env)?;
                let elements = items.elements().ok_or_else(|| {
                    runtime(
                        RuntimeErrorKind::TypeMismatch,
                        format!("Can only iterate through lists and tuples, not {}", items.type_name()),
                        iterable.span(),
                    )
                })?;

                for element in elements {
                    self.symbols.define(env, variable.as_str(), element);
                    if !self.run_loop_body(body, env)? {
                        break;
                    }
                }
                Ok(Value::null())
            }

            Expression::While {
                condition, body, ..
            } => {
                while self.evaluate(condition, env)?.is_truthy() {
                    if !self.run_loop_body(body, env)? {
                        break;
                    }
                }
                Ok(Value::null())
            }

            Expression::DoWhile {
                condition, body, ..
            } => {
                loop {
                    if !self.run_loop_body(body, env)? {
                        break;
                    }
                    if !self.evaluate(condition, env)?.is_truthy() {
                        break;
                    }
                }
                Ok(Value::null())
            }

            Expression::FunctionDef {
                name, params, body, ..
            } => {
                let function = self.make_function(name.clone(), params, body, env);
                if let Some(name) = name {
                    self.symbols.define(env, name.as_str(), function.clone());
                }
                Ok(function)
            }

            Expression::Lambda { params, body, .. } => Ok(self.make_function(None, params, body, env)),

            Expression::Call { callee, args, span } => {
                let callee = self.evaluate(callee, env)?;
                let args = self.evaluate_all(args, env)?;
                self.call_function(&callee, args, span)
            }

            Expression::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr, env)?,
                    None => Value::null(),
                };
                Err(Signal::Return(value))
            }

            Expression::Break { span } => Err(Signal::Break(span.clone())),

            Expression::Continue { span } => Err(Signal::Continue(span.clone())),

            Expression::Index {
                target,
                index,
                span,
            } => {
                let target = self.evaluate(target, env)?;
                let index = self.evaluate(index, env)?;
                target.index(&index).map_err(|e| op_error(e, span))
            }

            Expression::Attempt {
                body,
                binding,
                handler,
                ..
            } => match self.evaluate_body(body, env) {
                Err(Signal::Error(error)) => {
                    debug!("Handled error: {}", error);
                    if let Some(name) = binding {
                        let caught = Value::Error(Rc::new(ErrorValue::from_error(error)));
                        self.symbols.define(env, name.as_str(), caught);
                    }
                    self.evaluate_body(handler, env)
                }
                other => other,
            },

            Expression::Import {
                module,
                items,
                span,
            } => {
                let loaded = self.import_module(module, span)?;
                self.bind_imports(&loaded, items.as_deref(), env)?;
                Ok(Value::null())
            }

            Expression::Share { names, .. } => {
                for (name, span) in names {
                    if self.symbols.get(env, name).is_none() {
                        return Err(runtime(
                            RuntimeErrorKind::UndefinedName,
                            format!("Cannot share undefined symbol '{}'", name),
                            span,
                        ));
                    }
                    self.symbols.share(env, name);
                }
                Ok(Value::null())
            }

            Expression::Block { statements, .. } => {
                let mut last = Value::null();
                for statement in statements {
                    last = self.evaluate(statement, env)?;
                }
                Ok(last)
            }
        }
    }

    fn evaluate_all(&mut self, exprs: &[Expression], env: EnvId) -> Result<Vec<Value>, Signal> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.evaluate(expr, env)?);
        }
        Ok(values)
    }

    /// Block bodies yield null, inline bodies their value
    fn evaluate_body(&mut self, body: &Body, env: EnvId) -> Outcome {
        let value = self.evaluate(&body.expr, env)?;
        Ok(if body.block { Value::null() } else { value })
    }

    /// Run one loop iteration; `Ok(false)` means the loop was cut
    fn run_loop_body(&mut self, body: &Body, env: EnvId) -> Result<bool, Signal> {
        match self.evaluate(&body.expr, env) {
            Ok(_) | Err(Signal::Continue(_)) => Ok(true),
            Err(Signal::Break(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn evaluate_binary_op(&self, op: BinaryOperator, left: &Value, right: &Value, span: &Span) -> Outcome {
        left.binary_op(op, right).map_err(|e| op_error(e, span))
    }

    fn evaluate_for_range(
        &mut self,
        variable: &str,
        start: &Expression,
        end: &Expression,
        step: Option<&Expression>,
        body: &Body,
        env: EnvId,
    ) -> Outcome {
        let mut current = self.evaluate_bound(start, env)?;
        let end_value = self.evaluate_bound(end, env)?;
        let step_value = match step {
            Some(expr) => self.evaluate_bound(expr, env)?,
            None => Value::int(1),
        };

        let ascending = match &step_value {
            Value::Number(n) if n.is_zero() => {
                let span = step.map(Expression::span).unwrap_or_else(|| start.span());
                return Err(runtime(
                    RuntimeErrorKind::IllegalOperation,
                    "Loop step cannot be zero",
                    span,
                ));
            }
            Value::Number(n) => n.as_f64() > 0.0,
            _ => true,
        };
        let bound_check = if ascending {
            BinaryOperator::Less
        } else {
            BinaryOperator::Greater
        };

        loop {
            let in_range = current
                .binary_op(bound_check, &end_value)
                .map_err(|e| op_error(e, end.span()))?;
            if !in_range.is_truthy() {
                break;
            }

            self.symbols.define(env, variable, current.clone());
            // Stepping past the integer range simply ends the loop
            let next = current.binary_op(BinaryOperator::Add, &step_value).ok();

            if !self.run_loop_body(body, env)? {
                break;
            }
            match next {
                Some(value) => current = value,
                None => break,
            }
        }
        Ok(Value::null())
    }

    fn evaluate_bound(&mut self, expr: &Expression, env: EnvId) -> Outcome {
        let value = self.evaluate(expr, env)?;
        match value {
            Value::Number(_) => Ok(value),
            other => Err(runtime(
                RuntimeErrorKind::TypeMismatch,
                format!("Loop bounds must be numbers, not {}", other.type_name()),
                expr.span(),
            )),
        }
    }

    fn make_function(
        &self,
        name: Option<String>,
        params: &[String],
        body: &Rc<FunctionBody>,
        env: EnvId,
    ) -> Value {
        Value::Function(Rc::new(Function::User {
            name,
            params: params.to_vec(),
            body: Rc::clone(body),
            env,
        }))
    }

    /// Invoke a function value with evaluated arguments
    pub fn call_function(&mut self, callee: &Value, args: Vec<Value>, span: &Span) -> Outcome {
        let function = match callee {
            Value::Function(function) => Rc::clone(function),
            other => {
                return Err(runtime(
                    RuntimeErrorKind::TypeMismatch,
                    format!("Cannot call a {}", other.type_name()),
                    span,
                ))
            }
        };

        match function.as_ref() {
            Function::User {
                params, body, env, ..
            } => {
                if args.len() != params.len() {
                    return Err(arity_error(function.name(), params.len(), params.len(), args.len(), span));
                }
                if self.call_depth >= self.max_call_depth {
                    return Err(runtime(
                        RuntimeErrorKind::RecursionLimit,
                        "Maximum recursion depth exceeded",
                        span,
                    ));
                }

                let call_env = self.symbols.push_scope(*env, ScopeKind::Call);
                for (param, arg) in params.iter().zip(args) {
                    self.symbols.define(call_env, param.as_str(), arg);
                }

                self.call_depth += 1;
                if self.call_depth % 100 == 0 {
                    trace!(depth = self.call_depth, "Call depth milestone");
                }
                let result = self.evaluate(&body.expr, call_env);
                self.call_depth -= 1;

                match result {
                    Ok(value) if body.auto_return => Ok(value),
                    Ok(_) => Ok(Value::null()),
                    Err(Signal::Return(value)) => Ok(value),
                    Err(Signal::Break(span)) => Err(stray_control("cut", span).into()),
                    Err(Signal::Continue(span)) => Err(stray_control("skip", span).into()),
                    Err(error) => Err(error),
                }
            }
            Function::Native(native) => self.call_native(native, args, span),
        }
    }

    fn call_native(&mut self, native: &NativeFunction, args: Vec<Value>, span: &Span) -> Outcome {
        if args.len() < native.required() || args.len() > native.params.len() {
            return Err(arity_error(
                native.name,
                native.required(),
                native.params.len(),
                args.len(),
                span,
            ));
        }

        let arguments = Arguments::new(native.params, args);
        (native.func)(&arguments, self.output.as_mut()).map_err(|error| {
            let kind = error
                .downcast_ref::<OpError>()
                .map(|e| e.kind)
                .unwrap_or(RuntimeErrorKind::Native);
            runtime(kind, error.to_string(), span)
        })
    }

    /// Load a module through the loader, running its body on first import
    fn import_module(&mut self, name: &str, span: &Span) -> Result<Rc<Module>, Signal> {
        let importer_dir = unit_dir(span.unit_name());
        let path = self
            .modules
            .resolve(name, importer_dir.as_deref())
            .map_err(|searched| UttrError::ModuleNotFound {
                module: name.to_string(),
                searched,
                span: span.clone(),
            })?;

        if let Some(module) = self.modules.cached(&path) {
            return Ok(module);
        }

        let _guard = self
            .modules
            .begin_loading(&path, name)
            .map_err(|chain| UttrError::CircularImport {
                module: name.to_string(),
                chain,
                span: span.clone(),
            })?;

        let module_failed = |message: String| -> Signal {
            runtime(
                RuntimeErrorKind::ModuleFailed,
                format!("Error in module '{}': {}", name, message),
                span,
            )
        };

        let source = fs::read_to_string(&path)
            .map_err(|e| module_failed(format!("Cannot read {}: {}", path.display(), e)))?;
        let program = parse(&path.display().to_string(), &source).map_err(|e| module_failed(e.to_string()))?;

        let env = self.symbols.push_scope(self.global(), ScopeKind::Module);
        match self.run_statements(&program.statements, env) {
            Ok(_) => {}
            Err(error @ UttrError::CircularImport { .. }) => return Err(error.into()),
            Err(error) => return Err(module_failed(error.to_string())),
        }

        debug!("Loaded module '{}' from {}", name, path.display());
        let module = Rc::new(Module {
            name: name.to_string(),
            path,
            env,
            file: Rc::clone(&program.file),
        });
        self.modules.insert(Rc::clone(&module));
        Ok(module)
    }

    fn bind_imports(&mut self, module: &Module, items: Option<&[ImportItem]>, env: EnvId) -> Result<(), Signal> {
        let exports = self.symbols.exports(module.env);

        let Some(items) = items else {
            for (name, value) in exports {
                self.symbols.define(env, name, value);
            }
            return Ok(());
        };

        for item in items {
            let value = exports
                .iter()
                .find(|(name, _)| *name == item.name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| {
                    runtime(
                        RuntimeErrorKind::UndefinedName,
                        format!("Module '{}' does not export '{}'", module.name, item.name),
                        &item.span,
                    )
                })?;
            let bound_name = item.alias.as_ref().unwrap_or(&item.name);
            self.symbols.define(env, bound_name.as_str(), value);
        }
        Ok(())
    }
}

fn native_value(native: &NativeFunction) -> Value {
    Value::Function(Rc::new(Function::Native(native.clone())))
}

fn runtime(kind: RuntimeErrorKind, message: impl Into<String>, span: &Span) -> Signal {
    UttrError::runtime(kind, message, span.clone()).into()
}

fn op_error(error: OpError, span: &Span) -> Signal {
    runtime(error.kind, error.message, span)
}

fn stray_control(keyword: &str, span: Span) -> UttrError {
    UttrError::runtime(
        RuntimeErrorKind::StrayControl,
        format!("'{}' used outside of a loop", keyword),
        span,
    )
}

fn arity_error(name: &str, min: usize, max: usize, given: usize, span: &Span) -> Signal {
    let expected = if min == max {
        min.to_string()
    } else {
        format!("{} to {}", min, max)
    };
    runtime(
        RuntimeErrorKind::ArityMismatch,
        format!("'{}' expects {} argument(s) but got {}", name, expected, given),
        span,
    )
}
