//! Runtime check library.
//!
//! Instrumented code calls into a [`Runtime`] through its hook object
//! (see [`Runtime::handle_object`]): every arithmetic operation goes through
//! [`Runtime::arithmetic_check`], every call through [`Runtime::call_check`]
//! and every assignment through [`Runtime::assign`], which feeds the
//! data-flow [`tracer`]. Fired checks are delivered to a
//! [`DiagnosticSink`].

pub mod checks;
pub mod classify;
pub mod coerce;
pub mod errors;
pub mod handle;
pub mod identity;
pub mod realm;
pub mod tracer;
pub mod value;


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use regex::Regex;

pub use checks::{
    CheckConfig, CheckKind, CheckReport, ConsoleSink, DiagnosticSink, RecordingSink, Severity, MESSAGE_PREFIX,
};
pub use errors::{RuntimeError, TracerError};
pub use identity::{scope_token, ObjectHooks, TraceIds, GLOBAL_OBJECT_TRACE_ID, TRACE_ID_PROPERTY};
pub use realm::{NativeReflection, Realm, Reflection};
pub use tracer::{ScopeId, Slot, TraceItem, TraceKey, Tracer};
pub use value::{FunctionSource, Object, ObjectRef, Value};

use classify::{classify, is_array, is_finite_number, is_string, should_trace, ValueClass};

/// Slot name instrumented code uses for a function's return value.
pub const RETURN_SLOT_NAME: &str = "$ ret";

/// Longest function source quoted in a W6 message.
const SOURCE_EXCERPT_CHARS: usize = 200;

/// A trace key as instrumented code passes it: a scope (`null` for the
/// current frame, the hook object for globals, a frame's scope token for
/// its closed-over variables, any other object for its properties) and a
/// slot (a name, an argument index, or `null`). Primitive scopes are
/// untraced.
#[derive(Debug, Clone, PartialEq)]
pub struct RawKey {
    pub scope: Value,
    pub slot: Value,
}

impl RawKey {
    pub fn new(scope: Value, slot: Value) -> Self {
        Self { scope, slot }
    }

    pub fn untraced() -> Self {
        Self::new(Value::Null, Value::Null)
    }

    pub fn local(name: &str) -> Self {
        Self::new(Value::Null, Value::string(name))
    }

    pub fn argument(index: u32) -> Self {
        Self::new(Value::Null, Value::Number(index as f64))
    }

    pub fn returned() -> Self {
        Self::local(RETURN_SLOT_NAME)
    }

    pub fn global(name: &str) -> Self {
        Self::frame(GLOBAL_OBJECT_TRACE_ID, name)
    }

    /// A variable kept in the global table under a call's trace id.
    pub fn frame(id: u64, name: &str) -> Self {
        Self::new(scope_token(id), Value::string(name))
    }

    pub fn on(object: &ObjectRef, name: &str) -> Self {
        Self::new(Value::Object(object.clone()), Value::string(name))
    }
}

/// One operand of a checked expression with the key it was read from.
#[derive(Debug, Clone)]
pub struct Operand {
    pub value: Value,
    pub key: RawKey,
}

impl Operand {
    pub fn new(value: Value, key: RawKey) -> Self {
        Self { value, key }
    }

    pub fn untraced(value: Value) -> Self {
        Self::new(value, RawKey::untraced())
    }
}

fn arguments_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\barguments\b").expect("arguments pattern is valid"))
}

fn eval_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\beval\b").expect("eval pattern is valid"))
}

/// One runtime context: check configuration, diagnostic sink, tracer state
/// and the reflection patch on its realm.
pub struct Runtime {
    realm: Arc<Realm>,
    hooks: ObjectHooks,
    tracer: Tracer,
    checks: RwLock<CheckConfig>,
    sink: RwLock<Arc<dyn DiagnosticSink>>,
    handle: Mutex<Option<ObjectRef>>,
    torn_down: AtomicBool,
}

impl Runtime {
    /// Create a context on `realm` and install its object hooks.
    pub fn new(realm: Arc<Realm>, checks: CheckConfig) -> Arc<Self> {
        let ids = Arc::new(TraceIds::new());
        let hooks = ObjectHooks::install(realm.clone(), ids.clone());
        tracing::debug!("runtime context created");
        Arc::new(Self {
            realm,
            hooks,
            tracer: Tracer::new(ids),
            checks: RwLock::new(checks),
            sink: RwLock::new(Arc::new(ConsoleSink)),
            handle: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn info(&self) -> &'static str {
        "JSane runtime library, v0.1"
    }

    pub fn realm(&self) -> &Arc<Realm> {
        &self.realm
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn check_config(&self) -> CheckConfig {
        self.checks.read().clone()
    }

    pub fn set_check_severity(&self, kind: CheckKind, severity: Severity) {
        self.checks.write().set(kind, severity);
    }

    /// Replace the diagnostic sink; `None` restores the console.
    pub fn set_diagnostic_sink(&self, sink: Option<Arc<dyn DiagnosticSink>>) {
        *self.sink.write() = sink.unwrap_or_else(|| Arc::new(ConsoleSink));
    }

    pub fn object_trace_id(&self, object: &ObjectRef) -> u64 {
        self.hooks.object_trace_id(object)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<(), RuntimeError> {
        if self.is_torn_down() {
            return Err(RuntimeError::TornDown);
        }
        Ok(())
    }

    fn is_handle(&self, object: &ObjectRef) -> bool {
        matches!(&*self.handle.lock(), Some(handle) if handle.ptr_eq(object))
    }

    /// Resolve a key from instrumented code, tagging object scopes.
    /// A member read off a primitive has no identity to trace.
    pub fn trace_key(&self, raw: &RawKey) -> TraceKey {
        let scope = match &raw.scope {
            Value::Null | Value::Undefined => ScopeId::Local,
            Value::Object(object) if self.is_handle(object) => ScopeId::Id(GLOBAL_OBJECT_TRACE_ID),
            Value::Object(object) => ScopeId::Id(self.hooks.object_trace_id(object)),
            _ => return TraceKey::untraced(),
        };
        let slot = match (&raw.slot, scope) {
            (Value::Null | Value::Undefined, _) => Slot::Anonymous,
            (Value::Number(n), ScopeId::Local) if n.is_finite() && *n >= 0.0 => Slot::Argument(*n as u32),
            (Value::String(name), ScopeId::Local) if &**name == RETURN_SLOT_NAME => Slot::Return,
            (other, _) => Slot::Name(other.to_string()),
        };
        TraceKey::new(scope, slot)
    }

    /// Format, deliver and, for error severity, raise one check.
    fn report(
        &self,
        kind: CheckKind,
        arguments: &[String],
        location: Option<&str>,
        cause: Option<&RawKey>,
    ) -> Result<(), RuntimeError> {
        let severity = self.checks.read().severity(kind);
        if severity == Severity::Ignore {
            return Ok(());
        }
        let lines = match cause {
            Some(raw) => self.tracer.trace_lines(&self.trace_key(raw)),
            None => Vec::new(),
        };
        let report = CheckReport::new(kind, severity, arguments, location.map(str::to_string), &lines);
        tracing::debug!(code = %report.code(), location = ?report.location, "check fired");

        let sink = self.sink.read().clone();
        sink.report(&report);

        if severity == Severity::Error {
            return Err(RuntimeError::Check {
                code: report.code(),
                message: report.head,
            });
        }
        Ok(())
    }

    /// Inspect `left <operator> right` that evaluated to `result`, which is
    /// returned unchanged.
    pub fn arithmetic_check(
        &self,
        result: Value,
        left: &Operand,
        right: &Operand,
        operator: &str,
        location: &str,
    ) -> Result<Value, RuntimeError> {
        self.ensure_live()?;
        let (a, b) = (&left.value, &right.value);
        let arguments = [
            result.to_string(),
            a.to_string(),
            b.to_string(),
            operator.to_string(),
            location.to_string(),
        ];

        if operator == "+" {
            if classify(a) == ValueClass::PlainObject || classify(b) == ValueClass::PlainObject {
                self.report(CheckKind::BadStringConversion, &arguments, Some(location), None)?;
                return Ok(result);
            }
            if is_array(a) && is_array(b) {
                self.report(CheckKind::ArrayConcatenation, &arguments, Some(location), None)?;
                return Ok(result);
            }
            if is_string(&result) {
                return Ok(result);
            }
        } else if is_string(a) || is_string(b) {
            self.report(CheckKind::StringCoercion, &arguments, Some(location), None)?;
            return Ok(result);
        }

        if !is_finite_number(a) || !is_finite_number(b) {
            let cause = if is_finite_number(b) { &left.key } else { &right.key };
            let kind = if is_finite_number(&result) {
                CheckKind::HiddenBadOperand
            } else {
                CheckKind::NonFiniteResult
            };
            self.report(kind, &arguments, Some(location), Some(cause))?;
        }
        Ok(result)
    }

    /// Call `callee` with `this` and `arguments` after checking it is
    /// callable and not over-supplied.
    pub fn call_check(
        &self,
        callee: &Value,
        this: &Value,
        arguments: Vec<Value>,
        callee_text: &str,
        location: &str,
    ) -> Result<Value, RuntimeError> {
        self.ensure_live()?;
        let Some(function) = callee.as_object().and_then(ObjectRef::function_data) else {
            let details = [
                callee.to_string(),
                this.to_string(),
                Value::array(arguments).to_string(),
                callee_text.to_string(),
                location.to_string(),
            ];
            self.report(CheckKind::NotCallable, &details, Some(location), None)?;
            return Err(RuntimeError::NotCallable {
                callee: callee_text.to_string(),
            });
        };

        let over_supplied = arguments.len() > function.arity
            && arguments[function.arity..].iter().any(|argument| !argument.is_undefined());
        if over_supplied {
            // Native code has no source to inspect for `arguments` use.
            if let FunctionSource::Script(source) = &function.source {
                if !arguments_pattern().is_match(source) && !eval_pattern().is_match(source) {
                    let excerpt: String = source.chars().take(SOURCE_EXCERPT_CHARS).collect();
                    let details = [function.arity.to_string(), arguments.len().to_string(), excerpt];
                    self.report(CheckKind::TooManyArguments, &details, Some(location), None)?;
                }
            }
        }

        self.tracer.clear_return();
        if !function.is_native() {
            self.tracer.stamp_pending(arguments.len());
        }
        let result = (function.call)(this, &arguments);
        self.tracer.clear_pending();
        result
    }

    /// Record `target = value` read from `source`; returns `value`.
    pub fn assign(&self, value: Value, target: &RawKey, source: &RawKey, location: &str) -> Result<Value, RuntimeError> {
        self.ensure_live()?;
        // Objects are tagged only when something is actually recorded on them.
        if matches!(target.scope, Value::Object(_)) && !should_trace(&value) {
            return Ok(value);
        }
        let target = self.trace_key(target);
        let source = self.trace_key(source);
        tracing::trace!(%target, %source, location, "assign");
        self.tracer.record(target, value.clone(), source)?;
        Ok(value)
    }

    /// Enter an instrumented function with the given parameter names.
    /// `captured` names the parameters that closures read.
    pub fn enter_call(&self, parameters: &[Option<String>], captured: &[String]) -> Result<u64, RuntimeError> {
        self.ensure_live()?;
        Ok(self.tracer.push_frame(parameters, captured)?)
    }

    pub fn leave_call(&self) -> Result<(), RuntimeError> {
        self.ensure_live()?;
        self.tracer.pop_frame()?;
        Ok(())
    }

    /// Run `body` the way an instrumented function body runs: between
    /// `enterCall` and `leaveCall`, the latter even when `body` fails.
    pub fn with_frame<F>(&self, parameters: &[&str], body: F) -> Result<Value, RuntimeError>
    where
        F: FnOnce(u64) -> Result<Value, RuntimeError>,
    {
        self.with_closure_frame(parameters, &[], body)
    }

    /// [`Self::with_frame`] for a function whose `captured` parameters are
    /// read by nested closures.
    pub fn with_closure_frame<F>(&self, parameters: &[&str], captured: &[&str], body: F) -> Result<Value, RuntimeError>
    where
        F: FnOnce(u64) -> Result<Value, RuntimeError>,
    {
        let names: Vec<Option<String>> = parameters.iter().map(|name| Some(name.to_string())).collect();
        let captured: Vec<String> = captured.iter().map(|name| name.to_string()).collect();
        let trace_id = self.enter_call(&names, &captured)?;
        let result = body(trace_id);
        self.leave_call()?;
        result
    }

    /// `key in object` with the trace id property hidden.
    pub fn in_operator_proxy(&self, key: &Value, object: &Value) -> Result<bool, RuntimeError> {
        self.ensure_live()?;
        self.hooks.proxy_in_operator(key, object)
    }

    /// Undo every change made to the realm and disable this context.
    /// Global properties holding the hook object are deleted.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.hooks.clear();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let mut global = self.realm.global().write();
            let holders: Vec<String> = global
                .own_keys()
                .into_iter()
                .filter(|key| matches!(global.get_own(key), Some(Value::Object(object)) if object.ptr_eq(&handle)))
                .collect();
            for key in holders {
                global.delete(&key);
            }
        }
        tracing::info!("runtime torn down");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("tracer", &self.tracer)
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

static CURRENT: Mutex<Option<Arc<Runtime>>> = parking_lot::const_mutex(None);

/// Create the process-wide runtime context, tearing down any previous one.
/// Programs instrumented separately share it when run in one process.
pub fn init(realm: Arc<Realm>, checks: CheckConfig) -> Arc<Runtime> {
    let mut slot = CURRENT.lock();
    // The old context restores the reflection it found, so it goes first.
    if let Some(previous) = slot.take() {
        previous.teardown();
    }
    let runtime = Runtime::new(realm, checks);
    *slot = Some(runtime.clone());
    runtime
}

pub fn current() -> Option<Arc<Runtime>> {
    CURRENT.lock().clone()
}

/// Tear down and release the process-wide context.
pub fn teardown() {
    let previous = CURRENT.lock().take();
    if let Some(previous) = previous {
        previous.teardown();
    }
}
