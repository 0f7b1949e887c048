//! The hook object instrumented code calls, bound by the instrumenter to
//! the hook variable (`__rt` by default).

use std::sync::{Arc, Weak};

use super::checks::{CheckReport, DiagnosticSink};
use super::errors::RuntimeError;
use super::identity::scope_token;
use super::value::{Object, ObjectKind, ObjectRef, Value};
use super::{Operand, RawKey, Runtime};

/// Names of the hook object's methods.
pub const HOOK_METHODS: [&str; 9] = [
    "arithmeticCheck",
    "callCheck",
    "assign",
    "enterCall",
    "leaveCall",
    "inOperatorProxy",
    "setDiagnosticSink",
    "info",
    "teardown",
];

fn argument(arguments: &[Value], index: usize) -> Value {
    arguments.get(index).cloned().unwrap_or(Value::Undefined)
}

fn text_argument(arguments: &[Value], index: usize) -> String {
    argument(arguments, index).to_string()
}

fn elements_of(value: &Value, what: &str) -> Result<Vec<Value>, RuntimeError> {
    if let Some(object) = value.as_object() {
        if let ObjectKind::Array(elements) = &object.read().kind {
            return Ok(elements.clone());
        }
    }
    Err(RuntimeError::TypeError(format!("{what} must be an array, got {}", value.type_of())))
}

/// Diagnostic sink backed by a program function receiving the full message.
struct ScriptSink {
    function: ObjectRef,
}

impl DiagnosticSink for ScriptSink {
    fn report(&self, report: &CheckReport) {
        if let Err(err) = self.function.call(&Value::Undefined, &[Value::string(report.to_string())]) {
            tracing::warn!(code = %report.code(), error = %err, "diagnostic sink failed");
        }
    }
}

type Method = fn(&Runtime, &[Value]) -> Result<Value, RuntimeError>;

fn arithmetic_check(runtime: &Runtime, arguments: &[Value]) -> Result<Value, RuntimeError> {
    let left = Operand::new(
        argument(arguments, 1),
        RawKey::new(argument(arguments, 5), argument(arguments, 6)),
    );
    let right = Operand::new(
        argument(arguments, 2),
        RawKey::new(argument(arguments, 7), argument(arguments, 8)),
    );
    runtime.arithmetic_check(
        argument(arguments, 0),
        &left,
        &right,
        &text_argument(arguments, 3),
        &text_argument(arguments, 4),
    )
}

fn call_check(runtime: &Runtime, arguments: &[Value]) -> Result<Value, RuntimeError> {
    let passed = elements_of(&argument(arguments, 2), "callCheck arguments")?;
    runtime.call_check(
        &argument(arguments, 0),
        &argument(arguments, 1),
        passed,
        &text_argument(arguments, 3),
        &text_argument(arguments, 4),
    )
}

fn assign(runtime: &Runtime, arguments: &[Value]) -> Result<Value, RuntimeError> {
    runtime.assign(
        argument(arguments, 0),
        &RawKey::new(argument(arguments, 1), argument(arguments, 2)),
        &RawKey::new(argument(arguments, 3), argument(arguments, 4)),
        &text_argument(arguments, 5),
    )
}

fn enter_call(runtime: &Runtime, arguments: &[Value]) -> Result<Value, RuntimeError> {
    let names: Vec<Option<String>> = elements_of(&argument(arguments, 0), "enterCall parameters")?
        .iter()
        .map(|name| name.as_str().map(str::to_string))
        .collect();
    let captured: Vec<String> = match argument(arguments, 1) {
        Value::Undefined => Vec::new(),
        listed => elements_of(&listed, "enterCall captured parameters")?
            .iter()
            .filter_map(|name| name.as_str().map(str::to_string))
            .collect(),
    };
    let trace_id = runtime.enter_call(&names, &captured)?;
    Ok(scope_token(trace_id))
}

fn leave_call(runtime: &Runtime, _arguments: &[Value]) -> Result<Value, RuntimeError> {
    runtime.leave_call()?;
    Ok(Value::Undefined)
}

fn in_operator_proxy(runtime: &Runtime, arguments: &[Value]) -> Result<Value, RuntimeError> {
    let found = runtime.in_operator_proxy(&argument(arguments, 0), &argument(arguments, 1))?;
    Ok(Value::Boolean(found))
}

fn set_diagnostic_sink(runtime: &Runtime, arguments: &[Value]) -> Result<Value, RuntimeError> {
    match argument(arguments, 0) {
        Value::Undefined => runtime.set_diagnostic_sink(None),
        Value::Object(function) if function.is_callable() => {
            runtime.set_diagnostic_sink(Some(Arc::new(ScriptSink { function })));
        }
        other => {
            return Err(RuntimeError::TypeError(format!(
                "setDiagnosticSink expects a function, got {}",
                other.type_of()
            )))
        }
    }
    Ok(Value::Undefined)
}

fn info(runtime: &Runtime, _arguments: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::string(runtime.info()))
}

fn teardown(runtime: &Runtime, _arguments: &[Value]) -> Result<Value, RuntimeError> {
    runtime.teardown();
    Ok(Value::Undefined)
}

fn bind(runtime: &Weak<Runtime>, name: &str, arity: usize, method: Method) -> Value {
    let runtime = runtime.clone();
    Value::native_function(name, arity, move |_this, arguments| {
        let runtime = runtime.upgrade().ok_or(RuntimeError::TornDown)?;
        method(&runtime, arguments)
    })
}

impl Runtime {
    /// The hook object for instrumented code. Created once per context;
    /// later calls return the same object.
    pub fn handle_object(self: &Arc<Self>) -> ObjectRef {
        let mut cached = self.handle.lock();
        if let Some(handle) = cached.as_ref() {
            return handle.clone();
        }

        let runtime = Arc::downgrade(self);
        let methods: [(&str, usize, Method); 9] = [
            ("arithmeticCheck", 9, arithmetic_check),
            ("callCheck", 5, call_check),
            ("assign", 6, assign),
            ("enterCall", 1, enter_call),
            ("leaveCall", 0, leave_call),
            ("inOperatorProxy", 2, in_operator_proxy),
            ("setDiagnosticSink", 1, set_diagnostic_sink),
            ("info", 0, info),
            ("teardown", 0, teardown),
        ];
        let object = methods
            .into_iter()
            .fold(Object::ordinary(), |object, (name, arity, method)| {
                object.with_property(name, bind(&runtime, name, arity, method))
            });

        let handle = ObjectRef::new(object);
        *cached = Some(handle.clone());
        handle
    }

    /// Store the hook object in a global variable of the realm, as the
    /// embedded runtime does for itself.
    pub fn install_global(self: &Arc<Self>, name: &str) -> ObjectRef {
        let handle = self.handle_object();
        self.realm.global().set(name, Value::Object(handle.clone()));
        handle
    }
}
