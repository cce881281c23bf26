//! VM tests

use eva::{
    vm::{stack::Stack, value::Value, VmConfig, VmError},
    Eva, EvaError,
};

use crate::util::{self, Test, TestResult};

/// Runs tests defined in the test case file
#[test]
fn vm() {
    let src = include_str!("test_cases/vm_test_cases.txt");
    util::run_tests(src, runner)
}

fn runner(test: Test) -> TestResult {
    let mut eva = Eva::new();
    let output = match eva.exec(&test.code) {
        Ok(value) => eva.display(value),
        Err(err) => format!("error[{}]", err.code()),
    };
    test.result(&output)
}

#[test]
fn deep_recursion_overflows() {
    let mut eva = Eva::new();
    let res = eva.exec("(def loop (n) (+ 1 (loop n))) (loop 0)");
    assert_eq!(res, Err(EvaError::Vm(VmError::StackOverflow)));
}

#[test]
fn small_stack() {
    let mut eva = Eva::with_config(VmConfig {
        stack_limit: 4,
        frame_limit: 1024,
    });

    // main, 1, 2, 3 fit; the fourth operand doesn't
    assert_eq!(eva.exec("(+ 1 (+ 2 3))"), Ok(Value::Number(6.0)));
    assert_eq!(
        eva.exec("(+ 1 (+ 2 (+ 3 4)))"),
        Err(EvaError::Vm(VmError::StackOverflow))
    );
}

#[test]
fn arity_is_checked() {
    let mut eva = Eva::new();
    let res = eva.exec("(def f (a b) a) (f 1)");
    assert_eq!(
        res,
        Err(EvaError::Vm(VmError::Arity {
            name: "f".to_string(),
            expected: 2,
            found: 1,
        }))
    );
}

#[test]
fn native_must_push_one_value() {
    let mut eva = Eva::new();
    eva.add_native("nothing", 0, |_stack: &mut Stack| Ok(()));

    assert!(matches!(
        eva.exec("(nothing)"),
        Err(EvaError::Vm(VmError::Native { .. }))
    ));
}

#[test]
fn native_errors_propagate() {
    let mut eva = Eva::new();
    eva.add_native("fail", 1, |_stack: &mut Stack| {
        Err(VmError::Native {
            name: "fail".to_string(),
            msg: "always fails".to_string(),
        })
    });

    let err = eva.exec("(fail 1)").unwrap_err();
    assert_eq!(err.to_string(), "native function `fail` failed: always fails");
}

#[test]
fn repl_session() -> Result<(), EvaError> {
    let mut eva = Eva::new();

    eva.exec("(def inc (x) (+ x 1))")?;
    eva.exec("(var n 0)")?;
    for _ in 0..3 {
        eva.exec("(set n (inc n))")?;
    }

    assert_eq!(eva.exec("n")?, Value::Number(3.0));
    Ok(())
}

#[test]
fn repl_recovers_from_compile_error() -> Result<(), EvaError> {
    let mut eva = Eva::new();

    let err = eva.exec("(def f () 1) (nope)").unwrap_err();
    assert_eq!(err.code(), "reference");

    // nothing from the failed input is visible
    let err = eva.exec("(f)").unwrap_err();
    assert_eq!(err.code(), "reference");

    assert_eq!(eva.exec("(def f () 1) (f)")?, Value::Number(1.0));
    Ok(())
}

#[test]
fn repl_reports_unassigned_global() -> Result<(), EvaError> {
    let mut eva = Eva::new();

    // compiles, but fails before `x` is assigned
    let err = eva.exec("(def f () x) (f) (var x 1)").unwrap_err();
    assert_eq!(
        err,
        EvaError::Vm(VmError::Reference {
            name: "x".to_string()
        })
    );

    eva.exec("(set x 2)")?;
    assert_eq!(eva.exec("(f)")?, Value::Number(2.0));
    Ok(())
}

#[test]
fn type_error_message() {
    let mut eva = Eva::new();
    let err = eva.exec(r#"(- "a" 1)"#).unwrap_err();
    assert_eq!(err.to_string(), "type error: SUB expected NUMBER, found STRING");
}

#[test]
fn debug_string_has_type_tag() -> Result<(), EvaError> {
    let mut eva = Eva::new();

    let value = eva.exec("(== 1 1)")?;
    assert_eq!(value.debug_string(eva.heap()), "EvaValue (BOOLEAN): true");

    let value = eva.exec(r#""hi""#)?;
    assert_eq!(value.debug_string(eva.heap()), "EvaValue (STRING): \"hi\"");

    let value = eva.exec("square")?;
    assert_eq!(value.debug_string(eva.heap()), "EvaValue (NATIVE): <native square/1>");

    Ok(())
}
