//! Tree-walking evaluator
//!
//! One [`Interpreter`] runs one program against one [`EvaluationContext`].
//! Runtime errors never escape: they are captured together with the failing
//! line and a stack trace and returned in [`EvalResult::error`].

use crate::builtins::{self, Builtin};
use crate::context::{Announcement, EvaluationContext};
use crate::error::{Result, ScriptError};
use crate::lang::ast::*;
use crate::signals::WorkerSignal;
use crate::subscriptions::SubscriptionManager;
use crate::value::Value;
use qbscript_config::EngineConfig;
use qbscript_core::{IdGenerator, ScriptErrorReport};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Shared handle to a scope
pub type Env = Rc<RefCell<Environment>>;

/// Variable scope; function calls get a child of the defining scope
#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    parent: Option<Env>,
}

impl Environment {
    pub fn root() -> Env {
        Rc::new(RefCell::new(Environment::default()))
    }

    pub fn child(parent: &Env) -> Env {
        Rc::new(RefCell::new(Environment {
            values: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    /// Bind `name` in this scope, shadowing outer bindings
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Look `name` up through the scope chain
    pub fn lookup(env: &Env, name: &str) -> Option<Value> {
        let mut current = Some(Rc::clone(env));
        while let Some(scope) = current {
            let scope = scope.borrow();
            if let Some(value) = scope.values.get(name) {
                return Some(value.clone());
            }
            current = scope.parent.clone();
        }
        None
    }

    /// Update the nearest existing binding, otherwise define in `env`
    pub fn assign(env: &Env, name: &str, value: Value) {
        let mut current = Some(Rc::clone(env));
        while let Some(scope) = current {
            let mut scope = scope.borrow_mut();
            if let Some(slot) = scope.values.get_mut(name) {
                *slot = value;
                return;
            }
            current = scope.parent.clone();
        }
        env.borrow_mut().define(name, value);
    }
}

/// User-defined function bound to the scope it was declared in
pub struct Closure {
    decl: Arc<Function>,
    env: Env,
}

impl Closure {
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn params(&self) -> &[String] {
        &self.decl.params
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<function {}({})>", self.decl.name, self.decl.params.join(", "))
    }
}

/// Evaluation budgets
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOptions {
    pub max_call_depth: usize,
    pub max_loop_iterations: u64,
    pub console_log: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EvalOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_call_depth: config.max_call_depth,
            max_loop_iterations: config.max_loop_iterations,
            console_log: config.console_log,
        }
    }
}

/// A failed run
#[derive(Debug, Clone, PartialEq)]
pub struct EvalFailure {
    pub error: ScriptError,
    /// Line of the failing statement (parse errors: the offending token)
    pub line: Option<usize>,
    /// Innermost call first, ending with `at <script> (line N)`
    pub stack_trace: Vec<String>,
}

impl EvalFailure {
    pub fn from_parse_error(error: ScriptError) -> Self {
        let line = match &error {
            ScriptError::Parse { line, .. } => Some(*line),
            _ => None,
        };
        Self {
            error,
            line,
            stack_trace: Vec::new(),
        }
    }

    /// Build the persisted error record for this failure
    pub fn report(&self, ids: &IdGenerator, script_id: &str, character_id: Option<&str>) -> ScriptErrorReport {
        ScriptErrorReport::new(
            ids,
            script_id,
            character_id.map(str::to_string),
            self.error.to_string(),
            self.line,
            &self.stack_trace,
        )
    }
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct EvalResult {
    pub value: Value,
    pub announce_messages: Vec<Announcement>,
    pub log_messages: Vec<String>,
    pub signals: Vec<WorkerSignal>,
    pub modified_attribute_ids: Vec<String>,
    pub error: Option<EvalFailure>,
}

impl EvalResult {
    /// Result of a run that did nothing
    pub fn empty() -> Self {
        Self {
            value: Value::Null,
            announce_messages: Vec::new(),
            log_messages: Vec::new(),
            signals: Vec::new(),
            modified_attribute_ids: Vec::new(),
            error: None,
        }
    }

    pub fn failed(failure: EvalFailure) -> Self {
        Self {
            error: Some(failure),
            ..Self::empty()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Evaluate `program` in `ctx`
pub fn evaluate(
    program: &Program,
    ctx: &mut EvaluationContext,
    subscriptions: &SubscriptionManager,
    options: &EvalOptions,
) -> EvalResult {
    Interpreter::new(ctx, subscriptions, options.clone()).run(program)
}

enum Flow {
    Normal,
    Return(Value),
}

struct Frame {
    name: String,
    call_line: usize,
}

/// Tree-walking interpreter for one run
pub struct Interpreter<'a> {
    ctx: &'a mut EvaluationContext,
    subscriptions: &'a SubscriptionManager,
    options: EvalOptions,
    root: Env,
    frames: Vec<Frame>,
    current_line: usize,
    iterations: u64,
    last_value: Value,
    /// Scopes captured by closures, keyed by address; cleared after the run
    /// to break cycles
    captured: HashMap<*const RefCell<Environment>, Env>,
    failure: Option<(usize, Vec<String>)>,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: &'a mut EvaluationContext, subscriptions: &'a SubscriptionManager, options: EvalOptions) -> Self {
        Self {
            ctx,
            subscriptions,
            options,
            root: Environment::root(),
            frames: Vec::new(),
            current_line: 0,
            iterations: 0,
            last_value: Value::Null,
            captured: HashMap::new(),
            failure: None,
        }
    }

    /// Run the whole program; its value is the top-level `return` value or
    /// the value of the last executed expression or assignment
    pub fn run(mut self, program: &Program) -> EvalResult {
        let outcome = self.run_program(program);
        self.finish(outcome)
    }

    /// Run the program's top level, then call `function` with `args`
    pub fn run_function(mut self, program: &Program, function: &str, args: Vec<Value>) -> EvalResult {
        let outcome = self.run_program(program).and_then(|_| {
            let callee = Environment::lookup(&self.root, function)
                .ok_or_else(|| ScriptError::UndefinedVariable(function.to_string()))?;
            if let Some(decl) = program.function(function) {
                self.current_line = decl.line;
            }
            self.call_value(callee, args, function)
        });
        self.finish(outcome)
    }

    fn run_program(&mut self, program: &Program) -> Result<Value> {
        let root = Rc::clone(&self.root);
        match self.execute_block(&root, &program.statements)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(self.last_value.clone()),
        }
    }

    fn finish(mut self, outcome: Result<Value>) -> EvalResult {
        for (_, env) in self.captured.drain() {
            env.borrow_mut().values.clear();
        }

        let effects = self.ctx.take_effects();
        let (value, error) = match outcome {
            Ok(value) => (value, None),
            Err(error) => {
                let (line, stack_trace) = match self.failure.take() {
                    Some((line, trace)) => (Some(line), trace),
                    None => (None, Vec::new()),
                };
                debug!("Script {} failed: {}", self.ctx.script_id().unwrap_or("-"), error);
                (
                    Value::Null,
                    Some(EvalFailure {
                        error,
                        line,
                        stack_trace,
                    }),
                )
            }
        };

        EvalResult {
            value,
            announce_messages: effects.announcements,
            log_messages: effects.log_messages,
            signals: effects.signals,
            modified_attribute_ids: effects.modified_attribute_ids,
            error,
        }
    }

    /// Bind every function declared directly in `statements`
    fn hoist(&mut self, env: &Env, statements: &[Stmt]) {
        let mut any = false;
        for stmt in statements {
            if let StmtKind::Function(decl) = &stmt.kind {
                let closure = Closure {
                    decl: Arc::clone(decl),
                    env: Rc::clone(env),
                };
                env.borrow_mut().define(decl.name.clone(), Value::Function(Rc::new(closure)));
                any = true;
            }
        }
        if any {
            self.captured.entry(Rc::as_ptr(env)).or_insert_with(|| Rc::clone(env));
        }
    }

    fn execute_block(&mut self, env: &Env, statements: &[Stmt]) -> Result<Flow> {
        self.hoist(env, statements);
        for stmt in statements {
            if let Flow::Return(value) = self.execute(env, stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn execute(&mut self, env: &Env, stmt: &Stmt) -> Result<Flow> {
        self.current_line = stmt.line;
        let result = self.execute_kind(env, &stmt.kind);
        if result.is_err() && self.failure.is_none() {
            self.failure = Some((stmt.line, self.stack_trace(stmt.line)));
        }
        result
    }

    fn execute_kind(&mut self, env: &Env, kind: &StmtKind) -> Result<Flow> {
        match kind {
            StmtKind::Expr(expr) => {
                self.last_value = self.evaluate(env, expr)?;
                Ok(Flow::Normal)
            }
            StmtKind::Assign { target, op, value } => {
                let value = self.evaluate(env, value)?;
                self.last_value = self.assign(env, target, *op, value)?;
                Ok(Flow::Normal)
            }
            StmtKind::If { branches, else_body } => {
                for branch in branches {
                    if self.evaluate(env, &branch.condition)?.is_truthy() {
                        return self.execute_block(env, &branch.body);
                    }
                }
                match else_body {
                    Some(body) => self.execute_block(env, body),
                    None => Ok(Flow::Normal),
                }
            }
            StmtKind::For { var, iterable, body } => self.execute_for(env, var, iterable, body),
            // Bound when the enclosing block was entered
            StmtKind::Function(_) => Ok(Flow::Normal),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.evaluate(env, expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
        }
    }

    fn execute_for(&mut self, env: &Env, var: &str, iterable: &Expr, body: &[Stmt]) -> Result<Flow> {
        let iterable = self.evaluate(env, iterable)?;

        let items: Box<dyn Iterator<Item = Value>> = match iterable {
            Value::Number(n) => {
                let count = if n.is_nan() || n <= 0.0 { 0 } else { n.floor() as u64 };
                Box::new((0..count).map(|i| Value::Number(i as f64)))
            }
            Value::Array(items) => Box::new(items.into_iter()),
            Value::String(s) => Box::new(
                s.chars()
                    .map(|c| Value::String(c.to_string()))
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            Value::Map(entries) => Box::new(entries.into_keys().map(Value::String)),
            other => {
                return Err(ScriptError::TypeError(format!(
                    "Cannot iterate over {}",
                    other.type_name()
                )))
            }
        };

        for item in items {
            self.iterations += 1;
            if self.iterations > self.options.max_loop_iterations {
                return Err(ScriptError::IterationLimit(self.options.max_loop_iterations));
            }

            Environment::assign(env, var, item);
            if let Flow::Return(value) = self.execute_block(env, body)? {
                return Ok(Flow::Return(value));
            }
        }

        Ok(Flow::Normal)
    }

    /// Perform an assignment and return the stored value
    fn assign(&mut self, env: &Env, target: &AssignTarget, op: Option<BinaryOp>, value: Value) -> Result<Value> {
        match target {
            AssignTarget::Variable(name) => {
                self.check_assignable(name)?;
                let value = match op {
                    Some(op) => {
                        let current = Environment::lookup(env, name)
                            .ok_or_else(|| ScriptError::UndefinedVariable(name.clone()))?;
                        binary(op, current, value)?
                    }
                    None => value,
                };
                Environment::assign(env, name, value.clone());
                Ok(value)
            }
            AssignTarget::Index { object, index } => {
                let index = self.evaluate(env, index)?;
                self.assign_index(env, object, index, op, value)
            }
        }
    }

    fn check_assignable(&self, name: &str) -> Result<()> {
        if Builtin::from_name(name).is_some() || self.ctx.has_global(name) {
            return Err(ScriptError::TypeError(format!("Cannot assign to built-in '{}'", name)));
        }
        Ok(())
    }

    /// `object[index] (op)= value`, writing the updated container back
    /// into `object`
    fn assign_index(
        &mut self,
        env: &Env,
        object: &Expr,
        index: Value,
        op: Option<BinaryOp>,
        value: Value,
    ) -> Result<Value> {
        let mut container = self.evaluate(env, object)?;
        let value = match op {
            Some(op) => binary(op, get_index(&container, &index)?, value)?,
            None => value,
        };
        set_index(&mut container, &index, value.clone())?;

        match object {
            Expr::Variable(name) => {
                self.check_assignable(name)?;
                Environment::assign(env, name, container);
            }
            Expr::Index { object, index } => {
                let index = self.evaluate(env, index)?;
                self.assign_index(env, object, index, None, container)?;
            }
            other => {
                return Err(ScriptError::TypeError(format!("Cannot assign to {}", other)));
            }
        }
        Ok(value)
    }

    fn evaluate(&mut self, env: &Env, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Variable(name) => self.lookup(env, name),
            Expr::Binary { left, op, right } => {
                let left = self.evaluate(env, left)?;
                let right = self.evaluate(env, right)?;
                binary(*op, left, right)
            }
            Expr::Logical { left, op, right } => {
                let left = self.evaluate(env, left)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.evaluate(env, right),
                }
            }
            Expr::Unary { op, operand } => {
                let operand = self.evaluate(env, operand)?;
                match op {
                    UnaryOp::Negate => match operand {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => Err(ScriptError::TypeError(format!(
                            "Cannot negate {}",
                            other.type_name()
                        ))),
                    },
                    UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
                }
            }
            Expr::Call { callee, args } => self.evaluate_call(env, callee, args),
            Expr::GetProp { object, name } => {
                let object = self.evaluate(env, object)?;
                builtins::get_property(&object, name)
            }
            Expr::Index { object, index } => {
                let object = self.evaluate(env, object)?;
                let index = self.evaluate(env, index)?;
                get_index(&object, &index)
            }
            Expr::Array(elements) => Ok(Value::Array(self.evaluate_args(env, elements)?)),
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let value = self.evaluate(env, value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Map(map))
            }
        }
    }

    /// Built-ins, then host globals, then user scope
    fn lookup(&self, env: &Env, name: &str) -> Result<Value> {
        if let Some(builtin) = Builtin::from_name(name) {
            return Ok(Value::Builtin(builtin));
        }
        if let Some(value) = self.ctx.get_global(name) {
            return Ok(value);
        }
        Environment::lookup(env, name).ok_or_else(|| ScriptError::UndefinedVariable(name.to_string()))
    }

    fn evaluate_args(&mut self, env: &Env, args: &[Expr]) -> Result<Vec<Value>> {
        args.iter().map(|arg| self.evaluate(env, arg)).collect()
    }

    fn evaluate_call(&mut self, env: &Env, callee: &Expr, args: &[Expr]) -> Result<Value> {
        if let Expr::GetProp { object, name } = callee {
            let receiver = self.evaluate(env, object)?;
            let args = self.evaluate_args(env, args)?;
            if let Value::Map(entries) = &receiver {
                if let Some(function) = entries.get(name) {
                    return self.call_value(function.clone(), args, name);
                }
            }
            return builtins::call_method(&receiver, name, &args, self.ctx.effects_mut());
        }

        let function = self.evaluate(env, callee)?;
        let args = self.evaluate_args(env, args)?;
        self.call_value(function, args, &callee.to_string())
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>, description: &str) -> Result<Value> {
        match callee {
            Value::Function(closure) => self.call_closure(&closure, args),
            Value::Builtin(builtin) => builtin.call(&args, self.ctx, self.subscriptions, self.options.console_log),
            Value::Native(native) => (native.func)(&args, self.ctx.effects_mut()),
            _ => Err(ScriptError::NotCallable(description.to_string())),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Result<Value> {
        let decl = &closure.decl;
        if args.len() != decl.params.len() {
            return Err(ScriptError::Arity {
                name: decl.name.clone(),
                expected: decl.params.len(),
                got: args.len(),
            });
        }
        if self.frames.len() >= self.options.max_call_depth {
            return Err(ScriptError::StackOverflow(self.options.max_call_depth));
        }

        let scope = Environment::child(&closure.env);
        {
            let mut scope = scope.borrow_mut();
            for (param, arg) in decl.params.iter().zip(args) {
                scope.define(param.clone(), arg);
            }
        }

        let call_line = self.current_line;
        self.frames.push(Frame {
            name: decl.name.clone(),
            call_line,
        });
        let result = self.execute_block(&scope, &decl.body);
        self.frames.pop();
        self.current_line = call_line;

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
        }
    }

    fn stack_trace(&self, line: usize) -> Vec<String> {
        let mut trace = Vec::with_capacity(self.frames.len() + 1);
        let mut line = line;
        for frame in self.frames.iter().rev() {
            trace.push(format!("at {} (line {})", frame.name, line));
            line = frame.call_line;
        }
        trace.push(format!("at <script> (line {})", line));
        trace
    }
}

fn type_mismatch(op: BinaryOp, left: &Value, right: &Value) -> ScriptError {
    ScriptError::TypeError(format!(
        "Cannot apply '{}' to {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

/// Apply a binary operator
pub fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    match op {
        BinaryOp::Equal => return Ok(Value::Bool(left.loose_eq(&right))),
        BinaryOp::NotEqual => return Ok(Value::Bool(!left.loose_eq(&right))),
        _ => {}
    }

    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let value = match op {
                BinaryOp::Add => Value::Number(a + b),
                BinaryOp::Sub => Value::Number(a - b),
                BinaryOp::Mul => Value::Number(a * b),
                BinaryOp::Div => Value::Number(a / b),
                BinaryOp::FloorDiv => Value::Number((a / b).floor()),
                BinaryOp::Mod => Value::Number(floored_mod(a, b)),
                BinaryOp::Pow => Value::Number(a.powf(b)),
                BinaryOp::Less => Value::Bool(a < b),
                BinaryOp::Greater => Value::Bool(a > b),
                BinaryOp::LessEqual => Value::Bool(a <= b),
                BinaryOp::GreaterEqual => Value::Bool(a >= b),
                BinaryOp::Equal => Value::Bool(a == b),
                BinaryOp::NotEqual => Value::Bool(a != b),
            };
            Ok(value)
        }
        (Value::String(a), Value::String(b)) => match op {
            BinaryOp::Add => Ok(Value::String(a + &b)),
            BinaryOp::Less => Ok(Value::Bool(a < b)),
            BinaryOp::Greater => Ok(Value::Bool(a > b)),
            BinaryOp::LessEqual => Ok(Value::Bool(a <= b)),
            BinaryOp::GreaterEqual => Ok(Value::Bool(a >= b)),
            _ => Err(type_mismatch(op, &Value::String(a), &Value::String(b))),
        },
        (Value::String(a), other) if op == BinaryOp::Add => Ok(Value::String(format!("{}{}", a, other))),
        (other, Value::String(b)) if op == BinaryOp::Add => Ok(Value::String(format!("{}{}", other, b))),
        (Value::Array(mut a), Value::Array(b)) if op == BinaryOp::Add => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (left, right) => Err(type_mismatch(op, &left, &right)),
    }
}

/// Modulo with the sign of the divisor
fn floored_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn array_index(index: &Value, len: usize) -> Result<usize> {
    let n = match index {
        Value::Number(n) if n.fract() == 0.0 => *n,
        other => {
            return Err(ScriptError::TypeError(format!(
                "Array index must be an integer, got {}",
                other
            )))
        }
    };
    if n < 0.0 || n >= len as f64 {
        return Err(ScriptError::IndexOutOfRange { index: n as i64, len });
    }
    Ok(n as usize)
}

/// `object[index]`
pub fn get_index(object: &Value, index: &Value) -> Result<Value> {
    match object {
        Value::Array(items) => Ok(items[array_index(index, items.len())?].clone()),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = array_index(index, chars.len())?;
            Ok(Value::String(chars[i].to_string()))
        }
        Value::Map(entries) => Ok(entries.get(&index.to_string()).cloned().unwrap_or(Value::Null)),
        other => Err(ScriptError::TypeError(format!("Cannot index into {}", other.type_name()))),
    }
}

/// `object[index] = value`; writing one past the end of an array appends
fn set_index(object: &mut Value, index: &Value, value: Value) -> Result<()> {
    match object {
        Value::Array(items) => {
            if matches!(index, Value::Number(n) if *n == items.len() as f64) {
                items.push(value);
            } else {
                let i = array_index(index, items.len())?;
                items[i] = value;
            }
            Ok(())
        }
        Value::Map(entries) => {
            entries.insert(index.to_string(), value);
            Ok(())
        }
        other => Err(ScriptError::TypeError(format!(
            "Cannot assign into {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parse_source;

    fn run_with(source: &str, options: EvalOptions) -> EvalResult {
        let program = parse_source(source).unwrap();
        let mut ctx = EvaluationContext::new();
        evaluate(&program, &mut ctx, &SubscriptionManager::new(), &options)
    }

    fn run(source: &str) -> EvalResult {
        run_with(source, EvalOptions::default())
    }

    fn number(source: &str) -> f64 {
        let result = run(source);
        assert!(result.is_ok(), "script failed: {:?}", result.error);
        match result.value {
            Value::Number(n) => n,
            other => panic!("expected number, got {:?}", other),
        }
    }

    fn error(source: &str) -> EvalFailure {
        run(source).error.expect("script should fail")
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(number("1 + 2 * 3"), 7.0);
        assert_eq!(number("(1 + 2) * 3"), 9.0);
        assert_eq!(number("-2 ** 2"), -4.0);
        assert_eq!(number("2 ** 3 ** 2"), 512.0);
        assert_eq!(number("7 // 2"), 3.0);
        assert_eq!(number("-7 // 2"), -4.0);
        assert_eq!(number("-7 % 3"), 2.0);
        assert_eq!(number("7 % -3"), -2.0);
        assert_eq!(number("1 / 0"), f64::INFINITY);
        assert!(number("0 / 0").is_nan());
    }

    #[test]
    fn test_string_concat_and_compare() {
        let result = run("\"HP: \" + 10");
        assert!(matches!(result.value, Value::String(s) if s == "HP: 10"));
        assert!(matches!(run("\"a\" < \"b\"").value, Value::Bool(true)));
        assert!(matches!(run("2 == \"2\"").value, Value::Bool(true)));
        assert!(matches!(run("[1] + [2, 3]").value, Value::Array(items) if items.len() == 3));
    }

    #[test]
    fn test_type_errors() {
        assert!(matches!(error("\"a\" - 1").error, ScriptError::TypeError(_)));
        assert!(matches!(error("1 < \"2\"").error, ScriptError::TypeError(_)));
        assert!(matches!(error("-\"x\"").error, ScriptError::TypeError(_)));
    }

    #[test]
    fn test_array_sum() {
        let source = "arr = [1, 2, 3, 4, 5]\nsum = 0\nfor item in arr:\n    sum = sum + item\nresult = sum * 2\n";
        assert_eq!(number(source), 30.0);
    }

    #[test]
    fn test_closure_scopes_tracked_once() {
        let mut ctx = EvaluationContext::new();
        let subscriptions = SubscriptionManager::new();

        let looped = parse_source("for i in 500:\n    if true:\n        helper():\n            return i\n").unwrap();
        {
            let mut interpreter = Interpreter::new(&mut ctx, &subscriptions, EvalOptions::default());
            interpreter.run_program(&looped).unwrap();
            assert_eq!(interpreter.captured.len(), 1);
        }

        let nested = parse_source("outer():\n    inner():\n        return 1\n    return inner()\nfor i in 4:\n    outer()\n").unwrap();
        let mut interpreter = Interpreter::new(&mut ctx, &subscriptions, EvalOptions::default());
        interpreter.run_program(&nested).unwrap();
        // The root scope plus one scope per call of `outer`
        assert_eq!(interpreter.captured.len(), 5);
    }

    #[test]
    fn test_factorial() {
        let source = "factorial(n):\n    if n <= 1:\n        return 1\n    return n * factorial(n - 1)\nfactorial(10)\n";
        assert_eq!(number(source), 3628800.0);
    }

    #[test]
    fn test_calculate_modifier() {
        let source = "calculateModifier(score):\n    return floor((score - 10) / 2)\ncalculateModifier(16)\n";
        assert_eq!(number(source), 3.0);
    }

    #[test]
    fn test_hoisting() {
        let source = "result = double(4)\ndouble(n):\n    return n * 2\n";
        assert_eq!(number(source), 8.0);
    }

    #[test]
    fn test_if_else_chain() {
        let source = "x = 75\nif x > 90:\n    grade = 1\nelse if x > 50:\n    grade = 2\nelse:\n    grade = 3\ngrade\n";
        assert_eq!(number(source), 2.0);
        assert_eq!(number("x = 0\nif x: y = 1\nelse: y = 2\ny"), 2.0);
    }

    #[test]
    fn test_for_loops() {
        assert_eq!(number("n = 0\nfor i in 4.7:\n    n = n + i\nn"), 6.0);
        assert_eq!(number("n = 0\nfor c in \"abc\":\n    n += 1\nn"), 3.0);
        assert_eq!(number("n = 0\nfor i in 10:\n    for j in 10:\n        n += 1\nn"), 100.0);
        assert_eq!(number("n = 5\nfor i in -3:\n    n = 0\nn"), 5.0);
    }

    #[test]
    fn test_top_level_return() {
        assert_eq!(number("x = 1\nreturn x + 1\nx = 10\n"), 2.0);
    }

    #[test]
    fn test_scoping() {
        // Assignment updates the outer binding
        assert_eq!(number("total = 1\nbump():\n    total = total + 1\nbump()\nbump()\ntotal"), 3.0);

        // Parameters are local
        assert_eq!(number("x = 1\nset(x):\n    x = 99\nset(5)\nx"), 1.0);

        // Locals do not leak
        let failure = error("f():\n    inner = 1\nf()\ninner");
        assert_eq!(failure.error, ScriptError::UndefinedVariable("inner".into()));
    }

    #[test]
    fn test_nested_function_captures_scope() {
        let source = "outer(a):\n    inner(b):\n        return a + b\n    return inner(10)\nouter(5)\n";
        assert_eq!(number(source), 15.0);
    }

    #[test]
    fn test_logical_short_circuit() {
        assert!(matches!(run("false and missing").value, Value::Bool(false)));
        assert_eq!(number("0 or 7"), 7.0);
        assert!(matches!(run("not []").value, Value::Bool(true)));
    }

    #[test]
    fn test_index_assignment() {
        assert_eq!(number("a = [1, 2, 3]\na[1] = 20\na[1] + a[2]"), 23.0);
        assert_eq!(number("m = {hp: 10}\nm[\"hp\"] += 5\nm.hp"), 15.0);
        assert_eq!(number("g = [[0, 0], [0, 0]]\ng[1][0] = 7\ng[1][0]"), 7.0);
        assert_eq!(number("a = []\na[0] = 4\na.count()"), 1.0);
    }

    #[test]
    fn test_array_methods_in_script() {
        assert_eq!(number("[3, 1, 2].count()"), 3.0);
        assert_eq!(number("[\"\", null, \"null\", 0, 5].filterEmpty().count()"), 2.0);
        assert_eq!(number("[0, 1, false, 2].filter().last()"), 2.0);

        let failure = error("[1].sort()");
        assert!(matches!(failure.error, ScriptError::UnknownMethod { .. }));
    }

    #[test]
    fn test_runtime_error_line_and_trace() {
        let source = "f(x):\n    return g(x)\ng(y):\n    return y + undefinedThing\nf(1)\n";
        let failure = error(source);
        assert_eq!(failure.error, ScriptError::UndefinedVariable("undefinedThing".into()));
        assert_eq!(failure.line, Some(4));
        assert_eq!(
            failure.stack_trace,
            vec!["at g (line 4)", "at f (line 2)", "at <script> (line 5)"]
        );
    }

    #[test]
    fn test_call_errors() {
        let failure = error("x = 3\nx(1)");
        assert_eq!(failure.error, ScriptError::NotCallable("x".into()));
        assert_eq!(failure.line, Some(2));

        let failure = error("f(a, b):\n    return a\nf(1)");
        assert_eq!(
            failure.error,
            ScriptError::Arity {
                name: "f".into(),
                expected: 2,
                got: 1
            }
        );

        let failure = error("a = [1]\na[3]");
        assert_eq!(failure.error, ScriptError::IndexOutOfRange { index: 3, len: 1 });
    }

    #[test]
    fn test_builtins_are_not_assignable() {
        assert!(matches!(error("floor = 1").error, ScriptError::TypeError(_)));
    }

    #[test]
    fn test_call_depth_budget() {
        let options = EvalOptions {
            max_call_depth: 16,
            ..EvalOptions::default()
        };
        let result = run_with("down(n):\n    return down(n + 1)\ndown(0)\n", options);
        let failure = result.error.expect("runaway recursion should fail");
        assert_eq!(failure.error, ScriptError::StackOverflow(16));
        assert_eq!(failure.line, Some(2));
    }

    #[test]
    fn test_loop_budget() {
        let options = EvalOptions {
            max_loop_iterations: 100,
            ..EvalOptions::default()
        };
        let result = run_with("for i in 1000:\n    x = i\n", options);
        assert_eq!(result.error.map(|f| f.error), Some(ScriptError::IterationLimit(100)));
    }

    #[test]
    fn test_announce_and_log_collected() {
        let result = run("announce(\"Level up!\")\nlog(\"hp\", 10)\n42");
        assert!(result.is_ok());
        assert_eq!(result.announce_messages[0].message, "Level up!");
        assert_eq!(result.log_messages, vec!["hp 10"]);
        assert_eq!(result.signals.len(), 2);
    }

    #[test]
    fn test_host_globals() {
        let program = parse_source("bonus * 2").unwrap();
        let mut ctx = EvaluationContext::new();
        ctx.define_global("bonus", Value::Number(4.0));
        let result = evaluate(&program, &mut ctx, &SubscriptionManager::new(), &EvalOptions::default());
        assert!(matches!(result.value, Value::Number(n) if n == 8.0));

        let program = parse_source("bonus = 1").unwrap();
        let result = evaluate(&program, &mut ctx, &SubscriptionManager::new(), &EvalOptions::default());
        assert!(matches!(result.error.map(|f| f.error), Some(ScriptError::TypeError(_))));
    }

    #[test]
    fn test_run_function() {
        let program = parse_source("on_equip(bonus):\n    return bonus + 1\n").unwrap();
        let mut ctx = EvaluationContext::new();
        let subscriptions = SubscriptionManager::new();
        let result = Interpreter::new(&mut ctx, &subscriptions, EvalOptions::default()).run_function(
            &program,
            "on_equip",
            vec![Value::Number(2.0)],
        );
        assert!(matches!(result.value, Value::Number(n) if n == 3.0));
    }

    #[test]
    fn test_deterministic() {
        let source = "(3 + 4) * 2 ** 3 // 5 - 1 % 4";
        assert_eq!(number(source).to_bits(), number(source).to_bits());
    }
}
