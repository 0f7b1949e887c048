/*!
# Runtime Integration Tests

Drives the runtime the way instrumented code does: host closures stand in
for rewritten functions and call the hooks in the order the rewriter emits
them.
*/

use std::sync::Arc;

use jsane_core::runtime::coerce::binary_operation;
use jsane_core::runtime::{
    self, CheckConfig, CheckKind, Object, ObjectRef, Operand, RawKey, Realm, RecordingSink, Runtime, RuntimeError,
    Severity, TraceKey, Value, TRACE_ID_PROPERTY,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

fn runtime_with_sink() -> (Arc<Runtime>, RecordingSink) {
    let runtime = Runtime::new(Arc::new(Realm::new()), CheckConfig::default());
    let sink = RecordingSink::new();
    runtime.set_diagnostic_sink(Some(Arc::new(sink.clone())));
    (runtime, sink)
}

/// `left <op> right` as the rewriter emits it: compute, then check.
fn checked(runtime: &Runtime, operator: &str, left: Operand, right: Operand) -> Result<Value, RuntimeError> {
    let result = binary_operation(operator, &left.value, &right.value)?;
    runtime.arithmetic_check(result, &left, &right, operator, "t.js:1")
}

#[test]
fn test_addition_with_null_is_hidden_bad_operand() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    runtime.assign(Value::Null, &RawKey::global("b"), &RawKey::untraced(), "t.js:1")?;

    let result = checked(
        &runtime,
        "+",
        Operand::new(Value::Number(2.0), RawKey::global("a")),
        Operand::new(Value::Null, RawKey::global("b")),
    )?;

    assert_eq!(result, Value::Number(2.0));
    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, CheckKind::HiddenBadOperand);
    assert_eq!(reports[0].location.as_deref(), Some("t.js:1"));
    assert!(reports[0].message.contains("Expression: '2 + null => 2'"));
    assert!(reports[0].message.ends_with("\nTrace+\n\tglobal 'b' = null <- literal"));
    Ok(())
}

#[test]
fn test_undefined_times_number_is_non_finite_result() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    let result = checked(
        &runtime,
        "*",
        Operand::untraced(Value::Undefined),
        Operand::untraced(Value::Number(2.0)),
    )?;
    assert!(result.as_number().map(f64::is_nan).unwrap_or(false));
    assert_eq!(sink.kinds(), vec![CheckKind::NonFiniteResult]);
    assert!(!sink.reports()[0].message.contains("Trace+"));
    Ok(())
}

#[test]
fn test_array_addition_is_concatenation() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    let left = Value::array(vec![Value::Number(1.0), Value::Number(2.0)]);
    let right = Value::array(vec![Value::Number(2.0), Value::Number(3.0), Value::Number(4.0)]);
    let result = checked(&runtime, "+", Operand::untraced(left), Operand::untraced(right))?;
    assert_eq!(result, Value::string("1,22,3,4"));
    assert_eq!(sink.kinds(), vec![CheckKind::ArrayConcatenation]);
    assert!(sink.reports()[0].message.contains("Left array: '1,2', right array: '2,3,4'"));
    Ok(())
}

#[test]
fn test_plain_object_in_concatenation() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    let result = checked(
        &runtime,
        "+",
        Operand::untraced(Value::plain_object()),
        Operand::untraced(Value::Number(1.0)),
    )?;
    assert_eq!(result, Value::string("[object Object]1"));
    assert_eq!(sink.kinds(), vec![CheckKind::BadStringConversion]);
    Ok(())
}

#[test]
fn test_string_operands() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    let difference = checked(
        &runtime,
        "-",
        Operand::untraced(Value::string("32")),
        Operand::untraced(Value::Number(4.0)),
    )?;
    assert_eq!(difference, Value::Number(28.0));
    assert_eq!(sink.kinds(), vec![CheckKind::StringCoercion]);

    sink.clear();
    let concatenation = checked(
        &runtime,
        "+",
        Operand::untraced(Value::string("32")),
        Operand::untraced(Value::Number(4.0)),
    )?;
    assert_eq!(concatenation, Value::string("324"));
    assert!(sink.reports().is_empty());
    Ok(())
}

#[test]
fn test_clean_arithmetic_is_silent() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    let result = checked(
        &runtime,
        "/",
        Operand::untraced(Value::Number(7.0)),
        Operand::untraced(Value::Number(2.0)),
    )?;
    assert_eq!(result, Value::Number(3.5));
    assert!(sink.reports().is_empty());
    Ok(())
}

#[test]
fn test_too_many_arguments() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    let one = Value::script_function("one", 1, "function one(a) { return a; }", |_, args| {
        Ok(args.first().cloned().unwrap_or(Value::Undefined))
    });

    let result = runtime.call_check(
        &one,
        &Value::Undefined,
        vec![Value::Number(1.0), Value::Number(2.0)],
        "one",
        "t.js:3",
    )?;
    assert_eq!(result, Value::Number(1.0));
    assert_eq!(sink.kinds(), vec![CheckKind::TooManyArguments]);
    assert!(sink.reports()[0]
        .message
        .contains("Expected 1 arguments but received 2. Function: function one(a) { return a; }"));

    // Trailing undefined arguments are not extra.
    sink.clear();
    runtime.call_check(&one, &Value::Undefined, vec![Value::Null, Value::Undefined], "one", "t.js:4")?;
    assert!(sink.reports().is_empty());
    Ok(())
}

#[test]
fn test_too_many_arguments_exemptions() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    let variadic = Value::script_function("sum", 0, "function sum() { return arguments.length; }", |_, args| {
        Ok(Value::Number(args.len() as f64))
    });
    let evaluating = Value::script_function("run", 0, "function run() { return eval('x'); }", |_, _| {
        Ok(Value::Undefined)
    });
    let native = Value::native_function("log", 0, |_, _| Ok(Value::Undefined));

    for callee in [&variadic, &evaluating, &native] {
        runtime.call_check(callee, &Value::Undefined, vec![Value::Number(1.0)], "f", "t.js:1")?;
    }
    assert!(sink.reports().is_empty());
    Ok(())
}

#[test]
fn test_calling_non_callable_is_an_error() {
    let (runtime, sink) = runtime_with_sink();
    let err = runtime
        .call_check(&Value::Null, &Value::Undefined, vec![], "f", "t.js:9")
        .unwrap_err();
    match err {
        RuntimeError::Check { code, message } => {
            assert_eq!(code, "E2");
            assert_eq!(message, "Attempted to call a non-callable expression");
        }
        other => panic!("expected a check error, got {other:?}"),
    }
    assert_eq!(sink.kinds(), vec![CheckKind::NotCallable]);
    assert!(sink.reports()[0].message.contains("Function Expression: 'f' is null"));

    runtime.set_check_severity(CheckKind::NotCallable, Severity::Warn);
    let err = runtime
        .call_check(&Value::plain_object(), &Value::Undefined, vec![], "o.m", "t.js:9")
        .unwrap_err();
    assert!(matches!(err, RuntimeError::NotCallable { ref callee } if callee == "o.m"));
    assert_eq!(sink.reports()[1].code(), "W2");
}

#[test]
fn test_ignored_check_is_silent() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    runtime.set_check_severity(CheckKind::HiddenBadOperand, Severity::Ignore);
    checked(
        &runtime,
        "+",
        Operand::untraced(Value::Number(2.0)),
        Operand::untraced(Value::Null),
    )?;
    assert!(sink.reports().is_empty());
    Ok(())
}

#[test]
fn test_error_severity_throws_after_reporting() {
    let (runtime, sink) = runtime_with_sink();
    runtime.set_check_severity(CheckKind::ArrayConcatenation, Severity::Error);
    let err = checked(
        &runtime,
        "+",
        Operand::untraced(Value::array(vec![])),
        Operand::untraced(Value::array(vec![])),
    )
    .unwrap_err();
    assert!(matches!(err, RuntimeError::Check { ref code, .. } if code == "E3"));
    assert_eq!(sink.reports()[0].code(), "E3");
}

/// `function counter() { var n = start; return function () { n = n + 1; return n; }; }`
fn make_counter(runtime: &Arc<Runtime>, start: Value) -> Result<Value, RuntimeError> {
    let outer_runtime = runtime.clone();
    let counter = Value::script_function("counter", 0, "function counter() { var n = 0; ... }", move |_, _| {
        let runtime = outer_runtime.clone();
        outer_runtime.with_frame(&[], |frame| {
            let n = Arc::new(Mutex::new(runtime.assign(
                start.clone(),
                &RawKey::frame(frame, "n"),
                &RawKey::untraced(),
                "t.js:2",
            )?));
            let inner_runtime = runtime.clone();
            let increment = Value::script_function("", 0, "function () { n = n + 1; return n; }", move |_, _| {
                inner_runtime.with_frame(&[], |_| {
                    let current = n.lock().clone();
                    let sum = binary_operation("+", &current, &Value::Number(1.0))?;
                    let sum = inner_runtime.arithmetic_check(
                        sum,
                        &Operand::new(current, RawKey::frame(frame, "n")),
                        &Operand::untraced(Value::Number(1.0)),
                        "+",
                        "t.js:3",
                    )?;
                    let stored = inner_runtime.assign(sum, &RawKey::frame(frame, "n"), &RawKey::untraced(), "t.js:3")?;
                    *n.lock() = stored.clone();
                    inner_runtime.assign(stored, &RawKey::returned(), &RawKey::frame(frame, "n"), "t.js:3")
                })
            });
            runtime.assign(increment, &RawKey::returned(), &RawKey::untraced(), "t.js:4")
        })
    });
    runtime.call_check(&counter, &Value::Undefined, vec![], "counter", "t.js:5")
}

#[test]
fn test_closure_counter_keeps_state() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    let increment = make_counter(&runtime, Value::Number(0.0))?;
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(runtime.call_check(&increment, &Value::Undefined, vec![], "next", "t.js:6")?);
    }
    assert_eq!(seen, vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
    assert_eq!(runtime.tracer().depth(), 1);
    assert!(sink.reports().is_empty());
    Ok(())
}

#[test]
fn test_closure_variable_history_survives_its_frame() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    let increment = make_counter(&runtime, Value::Undefined)?;
    let result = runtime.call_check(&increment, &Value::Undefined, vec![], "next", "t.js:6")?;
    assert!(result.as_number().map(f64::is_nan).unwrap_or(false));

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, CheckKind::NonFiniteResult);
    assert!(reports[0].message.contains("Trace+\n\t#"));
    assert!(reports[0].message.contains(".'n' = undefined <- literal"));
    Ok(())
}

#[test]
fn test_argument_history_reaches_parameter() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    runtime.assign(Value::Null, &RawKey::global("x"), &RawKey::untraced(), "t.js:1")?;

    let body_runtime = runtime.clone();
    let double = Value::script_function("double", 1, "function double(p) { return p * 2; }", move |_, args| {
        let p = args.first().cloned().unwrap_or(Value::Undefined);
        body_runtime.with_frame(&["p"], |_| {
            let product = binary_operation("*", &p, &Value::Number(2.0))?;
            body_runtime.arithmetic_check(
                product,
                &Operand::new(p.clone(), RawKey::local("p")),
                &Operand::untraced(Value::Number(2.0)),
                "*",
                "t.js:2",
            )
        })
    });

    let argument = runtime.assign(Value::Null, &RawKey::argument(0), &RawKey::global("x"), "t.js:3")?;
    let result = runtime.call_check(&double, &Value::Undefined, vec![argument], "double", "t.js:3")?;
    assert_eq!(result, Value::Number(0.0));

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, CheckKind::HiddenBadOperand);
    assert!(reports[0].message.ends_with(
        "Trace+\n\tlocal 'p' = null <- argument #0\n\targument #0 = null <- global 'x'\n\tglobal 'x' = null <- literal"
    ));
    Ok(())
}

#[test]
fn test_return_value_history_reaches_caller() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    runtime.assign(Value::Null, &RawKey::global("src"), &RawKey::untraced(), "t.js:1")?;

    let body_runtime = runtime.clone();
    let source = Value::script_function("source", 0, "function source() { var v = src; return v; }", move |_, _| {
        body_runtime.with_frame(&[], |_| {
            let v = body_runtime.assign(Value::Null, &RawKey::local("v"), &RawKey::global("src"), "t.js:2")?;
            body_runtime.assign(v, &RawKey::returned(), &RawKey::local("v"), "t.js:2")
        })
    });

    let returned = runtime.call_check(&source, &Value::Undefined, vec![], "source", "t.js:4")?;
    let r = runtime.assign(returned, &RawKey::global("r"), &RawKey::returned(), "t.js:4")?;
    checked(
        &runtime,
        "+",
        Operand::new(r, RawKey::global("r")),
        Operand::untraced(Value::Number(1.0)),
    )?;

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    let trace: Vec<&str> = reports[0].message.split("\n\t").skip_while(|line| !line.ends_with("Trace+")).skip(1).collect();
    assert_eq!(trace.len(), 4);
    assert!(trace[0].starts_with("global 'r' = null <- return value of call #"));
    assert!(trace[1].starts_with("return value of call #"));
    assert!(trace[2].ends_with(".'v' = null <- global 'src'"));
    assert_eq!(trace[3], "global 'src' = null <- literal");
    Ok(())
}

/// `f(a, g(b))` with `function f(p, r) { return p * 2; }`: both arguments
/// are evaluated before either slot is traced.
#[test]
fn test_nested_call_does_not_disturb_earlier_argument_slots() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    runtime.assign(Value::Null, &RawKey::global("a"), &RawKey::untraced(), "t.js:1")?;
    runtime.assign(Value::Number(5.0), &RawKey::global("b"), &RawKey::untraced(), "t.js:1")?;

    let g_runtime = runtime.clone();
    let g = Value::script_function("g", 1, "function g(q) { return q; }", move |_, args| {
        let q = args.first().cloned().unwrap_or(Value::Undefined);
        g_runtime.with_frame(&["q"], |_| {
            g_runtime.assign(q.clone(), &RawKey::returned(), &RawKey::local("q"), "t.js:2")
        })
    });
    let f_runtime = runtime.clone();
    let f = Value::script_function("f", 2, "function f(p, r) { return p * 2; }", move |_, args| {
        let p = args.first().cloned().unwrap_or(Value::Undefined);
        f_runtime.with_frame(&["p", "r"], |_| {
            let product = binary_operation("*", &p, &Value::Number(2.0))?;
            f_runtime.arithmetic_check(
                product,
                &Operand::new(p.clone(), RawKey::local("p")),
                &Operand::untraced(Value::Number(2.0)),
                "*",
                "t.js:3",
            )
        })
    });

    let held_a = Value::Null;
    let b = runtime.assign(Value::Number(5.0), &RawKey::argument(0), &RawKey::global("b"), "t.js:4")?;
    let returned = runtime.call_check(&g, &Value::Undefined, vec![b], "g", "t.js:4")?;
    let held_g = runtime.assign(returned, &RawKey::local("$$t1"), &RawKey::returned(), "t.js:4")?;
    let arguments = vec![
        runtime.assign(held_a, &RawKey::argument(0), &RawKey::global("a"), "t.js:4")?,
        runtime.assign(held_g, &RawKey::argument(1), &RawKey::local("$$t1"), "t.js:4")?,
    ];
    let result = runtime.call_check(&f, &Value::Undefined, arguments, "f", "t.js:4")?;
    assert_eq!(result, Value::Number(0.0));

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, CheckKind::HiddenBadOperand);
    assert!(reports[0].message.contains("Expression: 'null * 2 => 0'"));
    assert!(reports[0].message.ends_with(
        "Trace+\n\tlocal 'p' = null <- argument #0\n\targument #0 = null <- global 'a'\n\tglobal 'a' = null <- literal"
    ));
    Ok(())
}

/// `f() + g()` where `f` returns the null in `src` and `g` returns 3.
#[test]
fn test_call_operands_keep_their_own_return_history() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    runtime.assign(Value::Null, &RawKey::global("src"), &RawKey::untraced(), "t.js:1")?;

    let f_runtime = runtime.clone();
    let f = Value::script_function("f", 0, "function f() { return src; }", move |_, _| {
        f_runtime.with_frame(&[], |_| {
            f_runtime.assign(Value::Null, &RawKey::returned(), &RawKey::global("src"), "t.js:2")
        })
    });
    let g_runtime = runtime.clone();
    let g = Value::script_function("g", 0, "function g() { return 3; }", move |_, _| {
        g_runtime.with_frame(&[], |_| {
            g_runtime.assign(Value::Number(3.0), &RawKey::returned(), &RawKey::untraced(), "t.js:3")
        })
    });

    let left = runtime.call_check(&f, &Value::Undefined, vec![], "f", "t.js:4")?;
    let left = runtime.assign(left, &RawKey::local("$$t0"), &RawKey::returned(), "t.js:4")?;
    let right = runtime.call_check(&g, &Value::Undefined, vec![], "g", "t.js:4")?;
    let right = runtime.assign(right, &RawKey::local("$$t1"), &RawKey::returned(), "t.js:4")?;
    checked(
        &runtime,
        "+",
        Operand::new(left, RawKey::local("$$t0")),
        Operand::new(right, RawKey::local("$$t1")),
    )?;

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, CheckKind::HiddenBadOperand);
    let trace: Vec<&str> = reports[0].message.split("\n\t").skip_while(|line| !line.ends_with("Trace+")).skip(1).collect();
    assert_eq!(trace.len(), 3);
    assert!(trace[0].starts_with("local '$$t0' = null <- return value of call #"));
    assert!(trace[1].ends_with(" = null <- global 'src'"));
    assert_eq!(trace[2], "global 'src' = null <- literal");
    Ok(())
}

#[test]
fn test_primitive_member_base_is_untraced() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    runtime.assign(Value::Null, &RawKey::global("foo"), &RawKey::untraced(), "t.js:1")?;

    // `k.foo + 1` with `k === 1`, then with a string `k`.
    for base in [Value::Number(1.0), Value::string("1"), Value::Boolean(true)] {
        checked(
            &runtime,
            "+",
            Operand::new(Value::Undefined, RawKey::new(base, Value::string("foo"))),
            Operand::untraced(Value::Number(1.0)),
        )?;
    }
    let reports = sink.reports();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|report| !report.message.contains("Trace+")));

    runtime.assign(
        Value::Null,
        &RawKey::new(Value::Number(1.0), Value::string("bar")),
        &RawKey::untraced(),
        "t.js:2",
    )?;
    assert!(runtime.tracer().global_entry(&TraceKey::global("bar")).is_none());
    Ok(())
}

/// `function f(p) { return function () { return p + 1; }; }` called as
/// `f(src)`, then the returned closure called.
#[test]
fn test_closed_over_parameter_keeps_argument_history() -> anyhow::Result<()> {
    let (runtime, sink) = runtime_with_sink();
    runtime.assign(Value::Null, &RawKey::global("src"), &RawKey::untraced(), "t.js:1")?;

    let outer_runtime = runtime.clone();
    let f = Value::script_function("f", 1, "function f(p) { return function () { return p + 1; }; }", move |_, args| {
        let p = args.first().cloned().unwrap_or(Value::Undefined);
        let runtime = outer_runtime.clone();
        outer_runtime.with_closure_frame(&["p"], &["p"], |frame| {
            let inner_runtime = runtime.clone();
            let inner = Value::script_function("", 0, "function () { return p + 1; }", move |_, _| {
                inner_runtime.with_frame(&[], |_| {
                    let sum = binary_operation("+", &p, &Value::Number(1.0))?;
                    let sum = inner_runtime.arithmetic_check(
                        sum,
                        &Operand::new(p.clone(), RawKey::frame(frame, "p")),
                        &Operand::untraced(Value::Number(1.0)),
                        "+",
                        "t.js:2",
                    )?;
                    inner_runtime.assign(sum, &RawKey::returned(), &RawKey::untraced(), "t.js:2")
                })
            });
            runtime.assign(inner, &RawKey::returned(), &RawKey::untraced(), "t.js:2")
        })
    });

    let argument = runtime.assign(Value::Null, &RawKey::argument(0), &RawKey::global("src"), "t.js:3")?;
    let inner = runtime.call_check(&f, &Value::Undefined, vec![argument], "f", "t.js:3")?;
    let result = runtime.call_check(&inner, &Value::Undefined, vec![], "inner", "t.js:4")?;
    assert_eq!(result, Value::Number(1.0));

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, CheckKind::HiddenBadOperand);
    assert!(reports[0].message.contains(".'p' = null <- argument #0 of call #"));
    assert!(reports[0].message.ends_with("= null <- global 'src'\n\tglobal 'src' = null <- literal"));
    assert_eq!(runtime.tracer().depth(), 1);
    Ok(())
}

#[test]
fn test_object_identity_is_idempotent_and_hidden() -> anyhow::Result<()> {
    let (runtime, _sink) = runtime_with_sink();
    let object = ObjectRef::new(Object::ordinary().with_property("x", Value::Number(1.0)));

    runtime.assign(Value::Undefined, &RawKey::on(&object, "y"), &RawKey::untraced(), "t.js:1")?;
    let id = runtime.object_trace_id(&object);
    assert_eq!(runtime.object_trace_id(&object), id);
    assert_eq!(runtime.object_trace_id(runtime.realm().global()), 1);

    let realm = runtime.realm();
    assert_eq!(realm.keys(&object), vec!["x".to_string()]);
    assert_eq!(realm.own_property_names(&object), vec!["x".to_string()]);
    assert!(!realm.has_own_property(&object, TRACE_ID_PROPERTY));
    assert!(!runtime.in_operator_proxy(&Value::string(TRACE_ID_PROPERTY), &Value::Object(object.clone()))?);
    assert!(runtime.in_operator_proxy(&Value::string("x"), &Value::Object(object))?);
    Ok(())
}

#[test]
fn test_clean_assignment_to_object_does_not_tag_it() -> anyhow::Result<()> {
    let (runtime, _sink) = runtime_with_sink();
    let object = ObjectRef::new(Object::ordinary());
    runtime.assign(Value::Number(3.0), &RawKey::on(&object, "y"), &RawKey::untraced(), "t.js:1")?;
    assert!(object.read().property(TRACE_ID_PROPERTY).is_none());
    Ok(())
}

#[test]
fn test_teardown_restores_reflection() {
    let (runtime, _sink) = runtime_with_sink();
    let object = ObjectRef::new(Object::ordinary());
    runtime.object_trace_id(&object);
    runtime.teardown();

    assert!(runtime.realm().has_own_property(&object, TRACE_ID_PROPERTY));
    assert!(matches!(runtime.enter_call(&[], &[]), Err(RuntimeError::TornDown)));
    assert!(matches!(
        runtime.assign(Value::Null, &RawKey::local("a"), &RawKey::untraced(), "t.js:1"),
        Err(RuntimeError::TornDown)
    ));
}

#[test]
fn test_unbalanced_leave_is_fatal() {
    let (runtime, _sink) = runtime_with_sink();
    let err = runtime.leave_call().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.to_string(), "trace stack underflow: leaveCall without a matching enterCall");
}

#[test]
fn test_program_exception_passes_through_and_unwinds_frame() {
    let (runtime, _sink) = runtime_with_sink();
    let body_runtime = runtime.clone();
    let thrower = Value::script_function("boom", 0, "function boom() { throw 'x'; }", move |_, _| {
        body_runtime.with_frame(&[], |_| Err(RuntimeError::Thrown(Value::string("x"))))
    });
    let err = runtime
        .call_check(&thrower, &Value::Undefined, vec![], "boom", "t.js:1")
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Thrown(Value::String(ref s)) if &**s == "x"));
    assert_eq!(runtime.tracer().depth(), 1);
}

#[test]
fn test_process_wide_context() {
    let realm = Arc::new(Realm::new());
    let object = ObjectRef::new(Object::ordinary());

    let first = runtime::init(realm.clone(), CheckConfig::default());
    first.object_trace_id(&object);
    assert!(Arc::ptr_eq(&runtime::current().expect("context installed"), &first));

    // Re-initializing replaces the context and keeps the tag hidden.
    let second = runtime::init(realm.clone(), CheckConfig::default().with(CheckKind::TooManyArguments, Severity::Ignore));
    assert!(first.is_torn_down());
    assert!(!second.is_torn_down());
    assert!(!realm.has_own_property(&object, TRACE_ID_PROPERTY));
    assert_eq!(second.check_config().severity(CheckKind::TooManyArguments), Severity::Ignore);

    runtime::teardown();
    assert!(runtime::current().is_none());
    assert!(second.is_torn_down());
    assert!(realm.has_own_property(&object, TRACE_ID_PROPERTY));
}
