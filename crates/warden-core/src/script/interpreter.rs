//! Tree-walking evaluator with capability interception and resource metering.
//!
//! Every statement and expression goes through [`Interpreter::tick`], which
//! polls the cancellation flag and, every few hundred steps, the deadline.
//! Allocations are charged against the policy's memory limit. Bindings are
//! credited back when their scope exits. Once the running total passes the
//! reclaim threshold it is replaced by a measurement of what is still
//! reachable, so garbage stops counting and only live data can exhaust the
//! limit.

use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::sandbox::execution::{timeout_message, FailureKind, SecurityViolation, ViolationKind};

use super::parser::{AssignOp, BinaryOp, Expr, FunctionDef, Stmt, UnaryOp};
use super::value::{error_value, ArrayRef, Builtin, Closure, ErrorName, ObjectRef, Value};

/// Name carried by errors raised for a disallowed capability reference.
pub const SECURITY_ERROR: &str = "SecurityError";

const MAX_CALL_DEPTH: usize = 128;
const MAX_NESTING: usize = 1024;
const DEADLINE_CHECK_INTERVAL: u64 = 256;
const PRUNE_THRESHOLD: usize = 4096;
const MAX_ARRAY_INDEX: f64 = 4_294_967_294.0;
const SCOPE_COST: u64 = 48;
const BINDING_COST: u64 = 32;
/// Smallest running total that triggers a reclaim.
const RECLAIM_FLOOR: u64 = 64 * 1024;

const DYNAMIC_CODE_NAMES: &[&str] = &["eval", "Function"];
const PROTOTYPE_KEYS: &[&str] = &["constructor", "__proto__", "prototype"];

/// Capability names visible to one run, with the policy's I/O flags already
/// applied.
#[derive(Debug, Clone, Default)]
pub struct Grants {
    pub policy: String,
    pub capabilities: BTreeSet<String>,
}

/// Resource bounds for one run.
#[derive(Debug, Clone)]
pub struct Limits {
    pub memory_limit_bytes: u64,
    pub timeout: Duration,
    pub deadline: Instant,
    pub cancel: Arc<AtomicBool>,
}

impl Limits {
    pub fn new(memory_limit_bytes: u64, timeout: Duration, cancel: Arc<AtomicBool>) -> Self {
        Self {
            memory_limit_bytes,
            timeout,
            deadline: Instant::now() + timeout,
            cancel,
        }
    }
}

struct Binding {
    value: Value,
    constant: bool,
}

#[derive(Default)]
pub struct Scope {
    vars: HashMap<String, Binding>,
    parent: Option<Rc<RefCell<Scope>>>,
    charged: u64,
}

enum Assignment {
    Done,
    Constant,
    Missing,
}

impl Scope {
    fn lookup(scope: &Rc<RefCell<Scope>>, name: &str) -> Option<Value> {
        let mut current = Some(scope.clone());
        while let Some(s) = current {
            let s = s.borrow();
            if let Some(binding) = s.vars.get(name) {
                return Some(binding.value.clone());
            }
            current = s.parent.clone();
        }
        None
    }

    fn assign(scope: &Rc<RefCell<Scope>>, name: &str, value: Value) -> Assignment {
        let mut current = Some(scope.clone());
        while let Some(s) = current {
            let mut s = s.borrow_mut();
            if let Some(binding) = s.vars.get_mut(name) {
                if binding.constant {
                    return Assignment::Constant;
                }
                binding.value = value;
                return Assignment::Done;
            }
            current = s.parent.clone();
        }
        Assignment::Missing
    }
}

pub enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Why evaluation stopped early.
pub enum Abort {
    /// A script-level exception; `try/catch` can intercept it.
    Throw(Value),
    /// Containment stop; never catchable by the script.
    Halt { kind: FailureKind, message: String },
}

type Eval<T> = Result<T, Abort>;
type ScopeRef = Rc<RefCell<Scope>>;

pub struct Interpreter<'a> {
    grants: &'a Grants,
    limits: &'a Limits,
    globals: ScopeRef,
    capabilities: HashMap<String, Value>,
    violations: Vec<SecurityViolation>,
    logs: Vec<String>,
    allocated: u64,
    // Source text and captured logs; held until the run ends.
    retained: u64,
    next_reclaim: u64,
    peak: u64,
    steps: u64,
    call_depth: usize,
    nesting: usize,
    // Weak handles used to measure live data and to break reference cycles
    // when the run ends.
    scopes: Vec<Weak<RefCell<Scope>>>,
    arrays: Vec<Weak<RefCell<Vec<Value>>>>,
    objects: Vec<Weak<RefCell<Vec<(String, Value)>>>>,
}

impl<'a> Interpreter<'a> {
    pub fn new(grants: &'a Grants, limits: &'a Limits) -> Self {
        let globals = Rc::new(RefCell::new(Scope::default()));
        Self {
            grants,
            limits,
            scopes: vec![Rc::downgrade(&globals)],
            globals,
            capabilities: HashMap::new(),
            violations: Vec::new(),
            logs: Vec::new(),
            allocated: 0,
            retained: 0,
            next_reclaim: RECLAIM_FLOOR.min(limits.memory_limit_bytes),
            peak: 0,
            steps: 0,
            call_depth: 0,
            nesting: 0,
            arrays: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Run a parsed program. `Some(value)` when it executed a top-level
    /// `return`.
    pub fn run(&mut self, program: &[Stmt]) -> Eval<Option<Value>> {
        let globals = self.globals.clone();
        match self.exec_block(program, &globals)? {
            Flow::Return(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    pub fn peak_memory(&self) -> u64 {
        self.peak
    }

    pub fn take_violations(&mut self) -> Vec<SecurityViolation> {
        std::mem::take(&mut self.violations)
    }

    pub fn take_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.logs)
    }

    // ---------------------------------------------------------------------
    // Metering
    // ---------------------------------------------------------------------

    fn tick(&mut self) -> Eval<()> {
        self.steps += 1;
        if self.limits.cancel.load(Ordering::Relaxed) {
            return Err(Abort::Halt {
                kind: FailureKind::Cancelled,
                message: "execution cancelled".into(),
            });
        }
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.limits.deadline {
            self.record(SecurityViolation::timeout());
            return Err(Abort::Halt {
                kind: FailureKind::ExecutionTimeout,
                message: timeout_message(self.limits.timeout),
            });
        }
        Ok(())
    }

    pub fn charge(&mut self, bytes: u64) -> Eval<()> {
        self.allocated = self.allocated.saturating_add(bytes);
        if self.allocated > self.next_reclaim {
            self.reclaim(bytes);
        }
        self.peak = self.peak.max(self.allocated);
        if self.allocated > self.limits.memory_limit_bytes {
            let message = format!(
                "memory limit exceeded: {} bytes used of {} allowed",
                self.allocated, self.limits.memory_limit_bytes
            );
            self.record(SecurityViolation::new(
                ViolationKind::MemoryLimitExceeded,
                message.clone(),
            ));
            return Err(Abort::Halt {
                kind: FailureKind::MemoryLimitExceeded,
                message,
            });
        }
        Ok(())
    }

    /// Charge bytes that stay in use until the run ends.
    pub fn charge_retained(&mut self, bytes: u64) -> Eval<()> {
        self.charge(bytes)?;
        self.retained = self.retained.saturating_add(bytes);
        Ok(())
    }

    /// Reset the running total to the live measurement plus `pending`, the
    /// charge in progress whose value is not reachable yet.
    fn reclaim(&mut self, pending: u64) {
        let live = self.retained.saturating_add(self.live_bytes());
        tracing::trace!(
            before = self.allocated,
            live,
            "reclaimed unreachable script values"
        );
        self.allocated = live.saturating_add(pending);
        self.next_reclaim = live
            .saturating_mul(2)
            .max(RECLAIM_FLOOR)
            .min(self.limits.memory_limit_bytes);
    }

    /// Bytes held by live scopes and everything their bindings, or any
    /// container still referenced, can reach. Shared values count once.
    fn live_bytes(&mut self) -> u64 {
        self.scopes.retain(|w| w.strong_count() > 0);
        self.arrays.retain(|w| w.strong_count() > 0);
        self.objects.retain(|w| w.strong_count() > 0);

        let mut total = 0u64;
        let mut pending: Vec<Value> = Vec::new();
        for scope_ref in self.scopes.iter().filter_map(Weak::upgrade) {
            let Ok(scope) = scope_ref.try_borrow() else {
                continue;
            };
            total += SCOPE_COST;
            for (name, binding) in &scope.vars {
                total += BINDING_COST + name.len() as u64;
                pending.push(binding.value.clone());
            }
        }
        pending.extend(self.arrays.iter().filter_map(Weak::upgrade).map(Value::Array));
        pending.extend(self.objects.iter().filter_map(Weak::upgrade).map(Value::Object));

        let mut seen: HashSet<usize> = HashSet::new();
        while let Some(value) = pending.pop() {
            match &value {
                Value::Str(s) => {
                    if seen.insert(Rc::as_ptr(s) as *const u8 as usize) {
                        total += value.footprint();
                    }
                }
                Value::Array(items) => {
                    if !seen.insert(Rc::as_ptr(items) as usize) {
                        continue;
                    }
                    if let Ok(items) = items.try_borrow() {
                        total += value.footprint();
                        pending.extend(items.iter().filter(|v| is_stringish(v)).cloned());
                    }
                }
                Value::Object(props) => {
                    if !seen.insert(Rc::as_ptr(props) as usize) {
                        continue;
                    }
                    if let Ok(props) = props.try_borrow() {
                        total += value.footprint();
                        pending.extend(
                            props
                                .iter()
                                .map(|(_, v)| v)
                                .filter(|v| is_stringish(v))
                                .cloned(),
                        );
                    }
                }
                _ => {}
            }
        }
        total
    }

    fn alloc(&mut self, value: Value) -> Eval<Value> {
        self.charge(value.footprint())?;
        Ok(value)
    }

    fn release(&mut self, scope: &ScopeRef) {
        let charged = std::mem::take(&mut scope.borrow_mut().charged);
        self.allocated = self.allocated.saturating_sub(charged);
    }

    fn nest(&mut self) -> Eval<()> {
        if self.nesting >= MAX_NESTING {
            return Err(self.throw("RangeError", "Maximum call stack size exceeded"));
        }
        self.nesting += 1;
        Ok(())
    }

    fn record(&mut self, violation: SecurityViolation) {
        if !self.violations.contains(&violation) {
            self.violations.push(violation);
        }
    }

    fn throw(&self, name: &str, message: impl Into<String>) -> Abort {
        Abort::Throw(error_value(name, message))
    }

    fn dynamic_code(&mut self, what: &str) -> Abort {
        let message = format!("dynamic code generation blocked: {what}");
        self.record(SecurityViolation::new(
            ViolationKind::DynamicCode,
            message.clone(),
        ));
        Abort::Halt {
            kind: FailureKind::DynamicCode,
            message,
        }
    }

    // ---------------------------------------------------------------------
    // Scopes
    // ---------------------------------------------------------------------

    fn child_scope(&mut self, parent: &ScopeRef) -> Eval<ScopeRef> {
        self.charge(SCOPE_COST)?;
        let scope = Rc::new(RefCell::new(Scope {
            parent: Some(parent.clone()),
            charged: SCOPE_COST,
            ..Scope::default()
        }));
        if self.scopes.len() >= PRUNE_THRESHOLD {
            self.scopes.retain(|w| w.strong_count() > 0);
        }
        self.scopes.push(Rc::downgrade(&scope));
        Ok(scope)
    }

    fn declare(&mut self, scope: &ScopeRef, name: &str, value: Value, constant: bool) -> Eval<()> {
        let cost = BINDING_COST + name.len() as u64;
        self.charge(cost)?;
        let mut s = scope.borrow_mut();
        s.charged += cost;
        s.vars.insert(name.to_string(), Binding { value, constant });
        Ok(())
    }

    fn store(&mut self, name: &str, value: Value, scope: &ScopeRef) -> Eval<()> {
        match Scope::assign(scope, name, value) {
            Assignment::Done => Ok(()),
            Assignment::Constant => Err(self.throw("TypeError", "Assignment to constant variable.")),
            Assignment::Missing => Err(self.throw("ReferenceError", format!("{name} is not defined"))),
        }
    }

    fn closure(&self, def: &Rc<FunctionDef>, scope: &ScopeRef) -> Value {
        Value::Function(Closure {
            def: def.clone(),
            scope: scope.clone(),
        })
    }

    fn track_array(&mut self, items: &ArrayRef) {
        if self
            .arrays
            .last()
            .is_some_and(|w| w.as_ptr() == Rc::as_ptr(items))
        {
            return;
        }
        if self.arrays.len() >= PRUNE_THRESHOLD {
            self.arrays.retain(|w| w.strong_count() > 0);
        }
        self.arrays.push(Rc::downgrade(items));
    }

    fn track_object(&mut self, props: &ObjectRef) {
        if self
            .objects
            .last()
            .is_some_and(|w| w.as_ptr() == Rc::as_ptr(props))
        {
            return;
        }
        if self.objects.len() >= PRUNE_THRESHOLD {
            self.objects.retain(|w| w.strong_count() > 0);
        }
        self.objects.push(Rc::downgrade(props));
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn exec_block(&mut self, stmts: &[Stmt], scope: &ScopeRef) -> Eval<Flow> {
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let function = self.closure(def, scope);
                    self.declare(scope, name, function, false)?;
                }
            }
        }
        for stmt in stmts {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Run `stmts` in a fresh child scope and credit it back afterwards.
    fn exec_scoped(&mut self, stmts: &[Stmt], parent: &ScopeRef) -> Eval<Flow> {
        let scope = self.child_scope(parent)?;
        let flow = self.exec_block(stmts, &scope);
        self.release(&scope);
        flow
    }

    fn exec(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Eval<Flow> {
        self.tick()?;
        self.nest()?;
        let flow = self.exec_inner(stmt, scope);
        self.nesting -= 1;
        flow
    }

    fn exec_inner(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Eval<Flow> {
        match stmt {
            Stmt::Declare { bindings, constant } => {
                for (name, init) in bindings {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    self.declare(scope, name, value, *constant)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, scope)?.is_truthy() {
                    self.exec(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond, scope)?.is_truthy() {
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                let loop_scope = self.child_scope(scope)?;
                let flow = self.exec_for(init.as_deref(), cond.as_ref(), step.as_ref(), body, &loop_scope);
                self.release(&loop_scope);
                flow
            }
            Stmt::ForOf {
                name,
                iterable,
                body,
            } => {
                let items: Vec<Value> = match self.eval(iterable, scope)? {
                    Value::Array(items) => {
                        let snapshot = items.borrow().clone();
                        snapshot
                    }
                    Value::Str(s) => {
                        self.charge(24 * s.len() as u64)?;
                        s.chars().map(|c| Value::string(c.to_string())).collect()
                    }
                    other => {
                        return Err(self.throw(
                            "TypeError",
                            format!("{} is not iterable", other.type_of()),
                        ))
                    }
                };
                for item in items {
                    let iteration = self.child_scope(scope)?;
                    self.declare(&iteration, name, item, false)?;
                    let flow = self.exec(body, &iteration);
                    self.release(&iteration);
                    match flow? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(stmts) => self.exec_scoped(stmts, scope),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Throw(expr) => Err(Abort::Throw(self.eval(expr, scope)?)),
            Stmt::Try {
                body,
                param,
                handler,
                finalizer,
            } => {
                let mut outcome = self.exec_scoped(body, scope);
                if let Some(handler) = handler {
                    if let Err(Abort::Throw(thrown)) = outcome {
                        let catch_scope = self.child_scope(scope)?;
                        if let Some(param) = param {
                            self.declare(&catch_scope, param, thrown, false)?;
                        }
                        outcome = self.exec_block(handler, &catch_scope);
                        self.release(&catch_scope);
                    }
                }
                if let Some(finalizer) = finalizer {
                    if matches!(outcome, Err(Abort::Halt { .. })) {
                        return outcome;
                    }
                    match self.exec_scoped(finalizer, scope)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                outcome
            }
            Stmt::Function(def) => {
                if let Some(name) = &def.name {
                    let function = self.closure(def, scope);
                    if Scope::lookup(scope, name).is_none() {
                        self.declare(scope, name, function, false)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Empty => Ok(Flow::Normal),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
        scope: &ScopeRef,
    ) -> Eval<Flow> {
        if let Some(init) = init {
            self.exec(init, scope)?;
        }
        loop {
            match cond {
                Some(cond) => {
                    if !self.eval(cond, scope)?.is_truthy() {
                        break;
                    }
                }
                None => self.tick()?,
            }
            match self.exec(body, scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if let Some(step) = step {
                self.eval(step, scope)?;
            }
        }
        Ok(Flow::Normal)
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn eval(&mut self, expr: &Expr, scope: &ScopeRef) -> Eval<Value> {
        self.tick()?;
        self.nest()?;
        let value = self.eval_inner(expr, scope);
        self.nesting -= 1;
        value
    }

    fn eval_inner(&mut self, expr: &Expr, scope: &ScopeRef) -> Eval<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => self.lookup(name, scope),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                self.alloc(Value::array(values))
            }
            Expr::Object(props) => {
                let mut values: Vec<(String, Value)> = Vec::with_capacity(props.len());
                for (key, expr) in props {
                    let value = self.eval(expr, scope)?;
                    match values.iter_mut().find(|(k, _)| k == key) {
                        Some(slot) => slot.1 = value,
                        None => values.push((key.clone(), value)),
                    }
                }
                self.alloc(Value::object(values))
            }
            Expr::Function(def) => Ok(self.closure(def, scope)),
            Expr::Unary { op, expr } => {
                let value = self.eval(expr, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::string(value.type_of()),
                })
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                let rhs = self.eval(rhs, scope)?;
                self.binary(*op, &lhs, &rhs)
            }
            Expr::Logical { and, lhs, rhs } => {
                let lhs = self.eval(lhs, scope)?;
                if lhs.is_truthy() != *and {
                    return Ok(lhs);
                }
                self.eval(rhs, scope)
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, scope)?.is_truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign { target, op, value } => self.assign(target, *op, value, scope),
            Expr::Update {
                target,
                delta,
                prefix,
            } => {
                let old = self.update(target, *delta, scope)?;
                Ok(Value::Number(if *prefix { old + delta } else { old }))
            }
            Expr::Member { object, property } => {
                let object = self.eval(object, scope)?;
                self.get_property(&object, property)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                self.get_index(&object, &index)
            }
            Expr::Call {
                callee,
                args,
                construct,
            } => self.call_expr(callee, args, *construct, scope),
        }
    }

    fn lookup(&mut self, name: &str, scope: &ScopeRef) -> Eval<Value> {
        if let Some(value) = Scope::lookup(scope, name) {
            return Ok(value);
        }
        if DYNAMIC_CODE_NAMES.contains(&name) {
            return Err(self.dynamic_code(name));
        }
        if let Some(value) = intrinsic(name) {
            return Ok(value);
        }
        self.capability(name)
    }

    /// Resolve a free identifier against the policy's grants.
    fn capability(&mut self, name: &str) -> Eval<Value> {
        if !self.grants.capabilities.contains(name) {
            let message = format!(
                "capability '{name}' is not permitted by policy '{}'",
                self.grants.policy
            );
            self.record(SecurityViolation::new(
                ViolationKind::CapabilityViolation,
                message.clone(),
            ));
            return Err(Abort::Throw(error_value(SECURITY_ERROR, message)));
        }
        if let Some(value) = self.capabilities.get(name) {
            return Ok(value.clone());
        }
        let value = capability_value(name).ok_or_else(|| {
            self.throw(
                "ReferenceError",
                format!("capability '{name}' is not provided by this runtime"),
            )
        })?;
        self.capabilities.insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Eval<Value> {
        let number = |f: fn(f64, f64) -> f64| Value::Number(f(lhs.to_number(), rhs.to_number()));
        Ok(match op {
            BinaryOp::Add => {
                if is_stringish(lhs) || is_stringish(rhs) {
                    let joined = format!("{}{}", lhs.to_display(), rhs.to_display());
                    return self.alloc(Value::string(joined));
                }
                number(|a, b| a + b)
            }
            BinaryOp::Sub => number(|a, b| a - b),
            BinaryOp::Mul => number(|a, b| a * b),
            BinaryOp::Div => number(|a, b| a / b),
            BinaryOp::Rem => number(|a, b| a % b),
            BinaryOp::Lt => Value::Bool(compare(lhs, rhs) == Some(CmpOrdering::Less)),
            BinaryOp::Le => Value::Bool(matches!(
                compare(lhs, rhs),
                Some(CmpOrdering::Less | CmpOrdering::Equal)
            )),
            BinaryOp::Gt => Value::Bool(compare(lhs, rhs) == Some(CmpOrdering::Greater)),
            BinaryOp::Ge => Value::Bool(matches!(
                compare(lhs, rhs),
                Some(CmpOrdering::Greater | CmpOrdering::Equal)
            )),
            BinaryOp::Eq => Value::Bool(lhs.loose_eq(rhs)),
            BinaryOp::Ne => Value::Bool(!lhs.loose_eq(rhs)),
            BinaryOp::StrictEq => Value::Bool(lhs.strict_eq(rhs)),
            BinaryOp::StrictNe => Value::Bool(!lhs.strict_eq(rhs)),
        })
    }

    fn combine(&mut self, op: AssignOp, current: &Value, rhs: Value) -> Eval<Value> {
        match op {
            AssignOp::Set => Ok(rhs),
            AssignOp::Add => self.binary(BinaryOp::Add, current, &rhs),
            AssignOp::Sub => self.binary(BinaryOp::Sub, current, &rhs),
        }
    }

    fn assign(&mut self, target: &Expr, op: AssignOp, value: &Expr, scope: &ScopeRef) -> Eval<Value> {
        match target {
            Expr::Ident(name) => {
                let current = match op {
                    AssignOp::Set => Value::Undefined,
                    _ => self.lookup(name, scope)?,
                };
                let rhs = self.eval(value, scope)?;
                let new = self.combine(op, &current, rhs)?;
                self.store(name, new.clone(), scope)?;
                Ok(new)
            }
            Expr::Member { object, property } => {
                let object = self.eval(object, scope)?;
                let current = match op {
                    AssignOp::Set => Value::Undefined,
                    _ => self.get_property(&object, property)?,
                };
                let rhs = self.eval(value, scope)?;
                let new = self.combine(op, &current, rhs)?;
                self.set_property(&object, property, new.clone())?;
                Ok(new)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                let current = match op {
                    AssignOp::Set => Value::Undefined,
                    _ => self.get_index(&object, &index)?,
                };
                let rhs = self.eval(value, scope)?;
                let new = self.combine(op, &current, rhs)?;
                self.set_index(&object, &index, new.clone())?;
                Ok(new)
            }
            _ => Err(self.throw("SyntaxError", "invalid assignment target")),
        }
    }

    /// Apply `++`/`--`; returns the previous numeric value.
    fn update(&mut self, target: &Expr, delta: f64, scope: &ScopeRef) -> Eval<f64> {
        match target {
            Expr::Ident(name) => {
                let old = self.lookup(name, scope)?.to_number();
                self.store(name, Value::Number(old + delta), scope)?;
                Ok(old)
            }
            Expr::Member { object, property } => {
                let object = self.eval(object, scope)?;
                let old = self.get_property(&object, property)?.to_number();
                self.set_property(&object, property, Value::Number(old + delta))?;
                Ok(old)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                let old = self.get_index(&object, &index)?.to_number();
                self.set_index(&object, &index, Value::Number(old + delta))?;
                Ok(old)
            }
            _ => Err(self.throw("SyntaxError", "invalid update target")),
        }
    }

    fn get_property(&mut self, target: &Value, key: &str) -> Eval<Value> {
        if PROTOTYPE_KEYS.contains(&key) {
            return Err(self.dynamic_code(&format!("{key} access")));
        }
        match target {
            Value::Object(props) => Ok(props
                .borrow()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Undefined)),
            Value::Array(items) if key == "length" => Ok(Value::Number(items.borrow().len() as f64)),
            Value::Str(s) if key == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Undefined | Value::Null => Err(self.throw(
                "TypeError",
                format!(
                    "cannot read properties of {} (reading '{key}')",
                    target.to_display()
                ),
            )),
            _ => Ok(Value::Undefined),
        }
    }

    fn get_index(&mut self, target: &Value, index: &Value) -> Eval<Value> {
        match (target, index) {
            (Value::Array(items), Value::Number(n)) if is_array_index(*n) => Ok(items
                .borrow()
                .get(*n as usize)
                .cloned()
                .unwrap_or(Value::Undefined)),
            (Value::Str(s), Value::Number(n)) if is_array_index(*n) => {
                match s.chars().nth(*n as usize) {
                    Some(c) => self.alloc(Value::string(c.to_string())),
                    None => Ok(Value::Undefined),
                }
            }
            _ => self.get_property(target, &index.to_display()),
        }
    }

    fn set_property(&mut self, target: &Value, key: &str, value: Value) -> Eval<()> {
        if PROTOTYPE_KEYS.contains(&key) {
            return Err(self.dynamic_code(&format!("{key} access")));
        }
        match target {
            Value::Object(props) => {
                let exists = props.borrow().iter().any(|(k, _)| k == key);
                if !exists {
                    self.charge(BINDING_COST + key.len() as u64)?;
                }
                self.track_object(props);
                let mut props = props.borrow_mut();
                match props.iter_mut().find(|(k, _)| k == key) {
                    Some(slot) => slot.1 = value,
                    None => props.push((key.to_string(), value)),
                }
                Ok(())
            }
            _ => Err(self.throw(
                "TypeError",
                format!("cannot set property '{key}' on {}", target.type_of()),
            )),
        }
    }

    fn set_index(&mut self, target: &Value, index: &Value, value: Value) -> Eval<()> {
        match (target, index) {
            (Value::Array(items), Value::Number(n)) if is_array_index(*n) => {
                let position = *n as usize;
                let len = items.borrow().len();
                if position >= len {
                    self.charge(16 * (position + 1 - len) as u64)?;
                }
                self.track_array(items);
                let mut items = items.borrow_mut();
                if position >= items.len() {
                    items.resize(position + 1, Value::Undefined);
                }
                items[position] = value;
                Ok(())
            }
            _ => self.set_property(target, &index.to_display(), value),
        }
    }

    // ---------------------------------------------------------------------
    // Calls
    // ---------------------------------------------------------------------

    fn eval_args(&mut self, args: &[Expr], scope: &ScopeRef) -> Eval<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, scope)?);
        }
        Ok(values)
    }

    fn call_expr(&mut self, callee: &Expr, args: &[Expr], construct: bool, scope: &ScopeRef) -> Eval<Value> {
        if let (Expr::Member { object, property }, false) = (callee, construct) {
            let receiver = self.eval(object, scope)?;
            let args = self.eval_args(args, scope)?;
            return self.call_method(&receiver, property, args);
        }
        let function = self.eval(callee, scope)?;
        let args = self.eval_args(args, scope)?;
        if construct {
            self.construct(&function, args)
        } else {
            self.call_value(&function, args)
        }
    }

    fn construct(&mut self, function: &Value, args: Vec<Value>) -> Eval<Value> {
        match function {
            Value::Builtin(Builtin::ErrorCtor(_)) => self.call_value(function, args),
            Value::Function(_) => match self.call_value(function, args)? {
                object @ (Value::Object(_) | Value::Array(_)) => Ok(object),
                _ => self.alloc(Value::object(Vec::new())),
            },
            other => Err(self.throw(
                "TypeError",
                format!("{} is not a constructor", other.type_of()),
            )),
        }
    }

    fn call_value(&mut self, function: &Value, args: Vec<Value>) -> Eval<Value> {
        match function {
            Value::Builtin(builtin) => self.call_builtin(*builtin, args),
            Value::Function(closure) => {
                if self.call_depth >= MAX_CALL_DEPTH {
                    return Err(self.throw("RangeError", "Maximum call stack size exceeded"));
                }
                let frame = self.child_scope(&closure.scope)?;
                let mut args = args.into_iter();
                for param in &closure.def.params {
                    let value = args.next().unwrap_or(Value::Undefined);
                    self.declare(&frame, param, value, false)?;
                }
                self.call_depth += 1;
                let result = self.exec_block(&closure.def.body, &frame);
                self.call_depth -= 1;
                self.release(&frame);
                match result? {
                    Flow::Return(value) => Ok(value),
                    _ => Ok(Value::Undefined),
                }
            }
            other => Err(self.throw(
                "TypeError",
                format!("{} is not a function", other.type_of()),
            )),
        }
    }

    fn call_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> Eval<Value> {
        if PROTOTYPE_KEYS.contains(&name) {
            return Err(self.dynamic_code(&format!("{name} access")));
        }
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);

        match receiver {
            Value::Array(items) => match name {
                "push" => {
                    self.charge(16 * args.len() as u64)?;
                    self.track_array(items);
                    let mut items = items.borrow_mut();
                    items.extend(args);
                    return Ok(Value::Number(items.len() as f64));
                }
                "pop" => return Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
                "join" => {
                    let separator = match arg(0) {
                        Value::Undefined => ",".to_string(),
                        other => other.to_display(),
                    };
                    let joined = items
                        .borrow()
                        .iter()
                        .map(|v| match v {
                            Value::Undefined | Value::Null => String::new(),
                            other => other.to_display(),
                        })
                        .collect::<Vec<_>>()
                        .join(&separator);
                    return self.alloc(Value::string(joined));
                }
                "includes" => {
                    let needle = arg(0);
                    let found = items
                        .borrow()
                        .iter()
                        .any(|v| v.strict_eq(&needle) || (is_nan(v) && is_nan(&needle)));
                    return Ok(Value::Bool(found));
                }
                "indexOf" => {
                    let needle = arg(0);
                    let position = items.borrow().iter().position(|v| v.strict_eq(&needle));
                    return Ok(Value::Number(position.map_or(-1.0, |p| p as f64)));
                }
                "slice" => {
                    let items = items.borrow();
                    let (start, end) = slice_bounds(items.len(), &arg(0), &arg(1));
                    let sliced = items[start..end].to_vec();
                    drop(items);
                    return self.alloc(Value::array(sliced));
                }
                "toString" => return self.alloc(Value::string(receiver.to_display())),
                _ => {}
            },
            Value::Str(s) => {
                let text: Option<String> = match name {
                    "toUpperCase" => Some(s.to_uppercase()),
                    "toLowerCase" => Some(s.to_lowercase()),
                    "trim" => Some(s.trim().to_string()),
                    "toString" => Some(s.to_string()),
                    "slice" => {
                        let chars: Vec<char> = s.chars().collect();
                        let (start, end) = slice_bounds(chars.len(), &arg(0), &arg(1));
                        Some(chars[start..end].iter().collect())
                    }
                    _ => None,
                };
                if let Some(text) = text {
                    return self.alloc(Value::string(text));
                }
                match name {
                    "includes" => return Ok(Value::Bool(s.contains(arg(0).to_display().as_str()))),
                    "startsWith" => return Ok(Value::Bool(s.starts_with(arg(0).to_display().as_str()))),
                    "endsWith" => return Ok(Value::Bool(s.ends_with(arg(0).to_display().as_str()))),
                    "indexOf" => {
                        let needle = arg(0).to_display();
                        let position = s
                            .find(needle.as_str())
                            .map_or(-1.0, |byte| s[..byte].chars().count() as f64);
                        return Ok(Value::Number(position));
                    }
                    "split" => {
                        let parts: Vec<Value> = match arg(0) {
                            Value::Undefined => vec![Value::Str(s.clone())],
                            separator => {
                                let separator = separator.to_display();
                                if separator.is_empty() {
                                    s.chars().map(|c| Value::string(c.to_string())).collect()
                                } else {
                                    s.split(separator.as_str()).map(Value::string).collect()
                                }
                            }
                        };
                        self.charge(s.len() as u64 + 16 * parts.len() as u64)?;
                        return self.alloc(Value::array(parts));
                    }
                    _ => {}
                }
            }
            Value::Number(n) => match name {
                "toFixed" => {
                    let digits = arg(0).to_number();
                    let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
                    return self.alloc(Value::string(format!("{n:.digits$}")));
                }
                "toString" => return self.alloc(Value::string(receiver.to_display())),
                _ => {}
            },
            Value::Bool(_) if name == "toString" => {
                return Ok(Value::string(receiver.to_display()));
            }
            _ => {}
        }

        let function = self.get_property(receiver, name)?;
        if !function.is_callable() {
            return Err(self.throw(
                "TypeError",
                format!("{}.{name} is not a function", receiver.type_of()),
            ));
        }
        self.call_value(&function, args)
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Eval<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        let num = |i: usize| arg(i).to_number();

        match builtin {
            Builtin::ConsoleLog | Builtin::ConsoleWarn | Builtin::ConsoleError => {
                let line = args
                    .iter()
                    .map(Value::to_display)
                    .collect::<Vec<_>>()
                    .join(" ");
                let line = match builtin {
                    Builtin::ConsoleWarn => format!("[warn] {line}"),
                    Builtin::ConsoleError => format!("[error] {line}"),
                    _ => line,
                };
                self.charge_retained(16 + line.len() as u64)?;
                self.logs.push(line);
                Ok(Value::Undefined)
            }
            Builtin::MathAbs => Ok(Value::Number(num(0).abs())),
            Builtin::MathFloor => Ok(Value::Number(num(0).floor())),
            Builtin::MathCeil => Ok(Value::Number(num(0).ceil())),
            Builtin::MathRound => Ok(Value::Number((num(0) + 0.5).floor())),
            Builtin::MathSqrt => Ok(Value::Number(num(0).sqrt())),
            Builtin::MathPow => Ok(Value::Number(num(0).powf(num(1)))),
            Builtin::MathMin => Ok(Value::Number(
                args.iter().map(Value::to_number).fold(f64::INFINITY, |a, b| {
                    if a.is_nan() || b.is_nan() {
                        f64::NAN
                    } else {
                        a.min(b)
                    }
                }),
            )),
            Builtin::MathMax => Ok(Value::Number(
                args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |a, b| {
                    if a.is_nan() || b.is_nan() {
                        f64::NAN
                    } else {
                        a.max(b)
                    }
                }),
            )),
            Builtin::JsonStringify => {
                let value = arg(0);
                if matches!(
                    value,
                    Value::Undefined | Value::Function(_) | Value::Builtin(_)
                ) {
                    return Ok(Value::Undefined);
                }
                let json = value
                    .to_json()
                    .map_err(|e| self.throw("TypeError", e))?;
                let text = serde_json::to_string(&json)
                    .map_err(|e| self.throw("TypeError", e.to_string()))?;
                self.alloc(Value::string(text))
            }
            Builtin::JsonParse => {
                let text = arg(0).to_display();
                let json: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| self.throw("SyntaxError", format!("JSON.parse: {e}")))?;
                self.charge(2 * text.len() as u64)?;
                Ok(Value::from_json(&json))
            }
            Builtin::DateNow => Ok(Value::Number(
                chrono::Utc::now().timestamp_millis() as f64,
            )),
            Builtin::Fetch => Err(self.throw(
                "Error",
                "network I/O is not available inside the isolation unit",
            )),
            Builtin::FsReadFile => Err(self.throw(
                "Error",
                "file I/O is not available inside the isolation unit",
            )),
            Builtin::ErrorCtor(name) => {
                let message = match arg(0) {
                    Value::Undefined => String::new(),
                    other => other.to_display(),
                };
                self.alloc(error_value(name.as_str(), message))
            }
            Builtin::ToString => {
                let text = if args.is_empty() {
                    String::new()
                } else {
                    arg(0).to_display()
                };
                self.alloc(Value::string(text))
            }
            Builtin::ToNumber => Ok(Value::Number(if args.is_empty() { 0.0 } else { num(0) })),
            Builtin::ToBoolean => Ok(Value::Bool(arg(0).is_truthy())),
            Builtin::ParseInt => Ok(Value::Number(parse_int(&arg(0).to_display(), &arg(1)))),
            Builtin::ParseFloat => Ok(Value::Number(parse_float(&arg(0).to_display()))),
            Builtin::IsNaN => Ok(Value::Bool(num(0).is_nan())),
        }
    }
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        // Closures and self-referencing containers form Rc cycles; empty
        // everything the run created so none of it outlives the unit.
        for scope in self.scopes.drain(..).filter_map(|w| w.upgrade()) {
            if let Ok(mut scope) = scope.try_borrow_mut() {
                scope.vars.clear();
                scope.parent = None;
            }
        }
        for items in self.arrays.drain(..).filter_map(|w| w.upgrade()) {
            if let Ok(mut items) = items.try_borrow_mut() {
                items.clear();
            }
        }
        for props in self.objects.drain(..).filter_map(|w| w.upgrade()) {
            if let Ok(mut props) = props.try_borrow_mut() {
                props.clear();
            }
        }
        self.capabilities.clear();
    }
}

/// Language intrinsics; always available and not subject to policy.
fn intrinsic(name: &str) -> Option<Value> {
    let builtin = match name {
        "Error" => Builtin::ErrorCtor(ErrorName::Error),
        "TypeError" => Builtin::ErrorCtor(ErrorName::TypeError),
        "RangeError" => Builtin::ErrorCtor(ErrorName::RangeError),
        "String" => Builtin::ToString,
        "Number" => Builtin::ToNumber,
        "Boolean" => Builtin::ToBoolean,
        "parseInt" => Builtin::ParseInt,
        "parseFloat" => Builtin::ParseFloat,
        "isNaN" => Builtin::IsNaN,
        _ => return None,
    };
    Some(Value::Builtin(builtin))
}

/// Values behind the capability names the runtime implements.
fn capability_value(name: &str) -> Option<Value> {
    let namespace = |members: &[(&str, Value)]| {
        Value::object(
            members
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    };
    Some(match name {
        "console" => namespace(&[
            ("log", Value::Builtin(Builtin::ConsoleLog)),
            ("info", Value::Builtin(Builtin::ConsoleLog)),
            ("warn", Value::Builtin(Builtin::ConsoleWarn)),
            ("error", Value::Builtin(Builtin::ConsoleError)),
        ]),
        "Math" => namespace(&[
            ("abs", Value::Builtin(Builtin::MathAbs)),
            ("floor", Value::Builtin(Builtin::MathFloor)),
            ("ceil", Value::Builtin(Builtin::MathCeil)),
            ("round", Value::Builtin(Builtin::MathRound)),
            ("sqrt", Value::Builtin(Builtin::MathSqrt)),
            ("pow", Value::Builtin(Builtin::MathPow)),
            ("min", Value::Builtin(Builtin::MathMin)),
            ("max", Value::Builtin(Builtin::MathMax)),
            ("PI", Value::Number(std::f64::consts::PI)),
            ("E", Value::Number(std::f64::consts::E)),
        ]),
        "JSON" => namespace(&[
            ("stringify", Value::Builtin(Builtin::JsonStringify)),
            ("parse", Value::Builtin(Builtin::JsonParse)),
        ]),
        "Date" => namespace(&[("now", Value::Builtin(Builtin::DateNow))]),
        "fetch" => Value::Builtin(Builtin::Fetch),
        "fs" => namespace(&[("readFile", Value::Builtin(Builtin::FsReadFile))]),
        _ => return None,
    })
}

fn is_stringish(value: &Value) -> bool {
    matches!(value, Value::Str(_) | Value::Array(_) | Value::Object(_))
}

fn is_nan(value: &Value) -> bool {
    matches!(value, Value::Number(n) if n.is_nan())
}

fn is_array_index(n: f64) -> bool {
    n >= 0.0 && n.fract() == 0.0 && n <= MAX_ARRAY_INDEX
}

fn compare(lhs: &Value, rhs: &Value) -> Option<CmpOrdering> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => lhs.to_number().partial_cmp(&rhs.to_number()),
    }
}

/// `slice(start, end)` bounds with negative offsets counted from the end.
fn slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
    let resolve = |value: &Value, default: usize| -> usize {
        if matches!(value, Value::Undefined) {
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
            n.min(len as f64) as usize
        }
    };
    let start = resolve(start, 0);
    let end = resolve(end, len);
    (start.min(end), end)
}

fn parse_int(text: &str, radix: &Value) -> f64 {
    let text = text.trim();
    let (negative, mut digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let mut radix = match radix {
        Value::Undefined => 10,
        other => other.to_number() as u32,
    };
    if radix == 0 {
        radix = 10;
    }
    if radix == 16 || radix == 10 {
        if let Some(rest) = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            digits = rest;
            radix = 16;
        }
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut value = 0.0;
    let mut seen = false;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * f64::from(radix) + f64::from(d);
                seen = true;
            }
            None => break,
        }
    }
    if !seen {
        return f64::NAN;
    }
    if negative {
        -value
    } else {
        value
    }
}

fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    if text[end..].starts_with("Infinity") {
        return if text.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    let mut seen_dot = false;
    let mut seen_digit = false;
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    if seen_digit && matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        if bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
                exp_end += 1;
            }
            end = exp_end;
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    text[..end].parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42px", &Value::Undefined), 42.0);
        assert_eq!(parse_int("-0x1F", &Value::Undefined), -31.0);
        assert_eq!(parse_int("101", &Value::Number(2.0)), 5.0);
        assert!(parse_int("abc", &Value::Undefined).is_nan());
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("3.25kg"), 3.25);
        assert_eq!(parse_float("-1e3x"), -1000.0);
        assert_eq!(parse_float("2e"), 2.0);
        assert!(parse_float(".").is_nan());
    }

    #[test]
    fn test_slice_bounds() {
        let n = |x: f64| Value::Number(x);
        assert_eq!(slice_bounds(5, &n(1.0), &Value::Undefined), (1, 5));
        assert_eq!(slice_bounds(5, &n(-2.0), &Value::Undefined), (3, 5));
        assert_eq!(slice_bounds(5, &n(4.0), &n(2.0)), (2, 2));
        assert_eq!(slice_bounds(5, &n(0.0), &n(99.0)), (0, 5));
    }
}
